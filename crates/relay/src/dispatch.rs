// Inbound frame dispatch.
//
// Validation precedes any state change: a frame is parsed once into a
// `ClientCommand` and rejected with an ERROR envelope before the registry
// is touched. Unparseable JSON has no session to answer, so it is logged
// and dropped.

use scrimlink_common::protocol::{ClientCommand, Header, ProtocolViolation};
use scrimlink_common::types::ConnectionId;
use serde_json::Value;
use tracing::{debug, info};

use crate::registry::Registry;

/// What the socket loop needs to know about a handled frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Frame processed, including any ERROR reply sent on our side.
    Handled,
    /// The frame was a protocol-level PONG; the caller refreshes liveness.
    Pong,
    /// Unparseable JSON, dropped without a reply.
    Dropped,
}

/// Handle one raw text frame from a connection.
pub async fn handle_text(registry: &Registry, conn: ConnectionId, raw: &str) -> HandleOutcome {
    let frame = match serde_json::from_str::<Value>(raw) {
        Ok(frame) => frame,
        Err(error) => {
            debug!(conn_id = %conn, %error, "discarding unparseable frame");
            return HandleOutcome::Dropped;
        }
    };

    match ClientCommand::parse(&frame) {
        Ok(command) => run_command(registry, conn, command).await,
        Err(violation) => {
            debug!(conn_id = %conn, %violation, "protocol violation");
            reply_error(registry, conn, &violation).await;
            HandleOutcome::Handled
        }
    }
}

async fn run_command(
    registry: &Registry,
    conn: ConnectionId,
    command: ClientCommand,
) -> HandleOutcome {
    match command {
        ClientCommand::Ident(Some(target)) => registry.merge(conn, target).await,
        ClientCommand::Ident(None) => {}
        ClientCommand::Set(record) => registry.set_scrim(conn, record).await,
        ClientCommand::Clear => registry.clear_scrim(conn).await,
        ClientCommand::Pong => return HandleOutcome::Pong,
        ClientCommand::Sessions => {
            let sessions = registry.session_ids().await;
            info!(?sessions, "live sessions");
        }
    }
    HandleOutcome::Handled
}

async fn reply_error(registry: &Registry, conn: ConnectionId, violation: &ProtocolViolation) {
    let Some(session) = registry.session_of(conn).await else {
        debug!(conn_id = %conn, "error reply for unknown connection dropped");
        return;
    };
    registry
        .send(session, Header::Error, Value::String(violation.to_string()))
        .await;
}
