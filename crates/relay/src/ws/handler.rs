use super::protocol::send_envelope;
use crate::dispatch::{self, HandleOutcome};
use crate::registry::Registry;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use scrimlink_common::protocol::{Envelope, Header};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Clone)]
struct WsRouterState {
    registry: Registry,
    pong_timeout: Duration,
}

pub fn router(registry: Registry, pong_timeout: Duration) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(WsRouterState { registry, pong_timeout })
}

async fn ws_upgrade(State(state): State<WsRouterState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state.registry, socket, state.pong_timeout))
}

async fn handle_socket(registry: Registry, mut socket: WebSocket, pong_timeout: Duration) {
    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<Envelope>();
    let (conn, session) = registry.register(outbound_sender).await;

    // Handshake: tell the client its session identity, then announce the
    // current presence set so the newcomer has the live list.
    registry.send(session, Header::Ident, Value::String(session.to_string())).await;
    registry.update_broadcast().await;

    // The global pinger broadcasts PING per session; this loop only watches
    // for prolonged pong silence on its own connection. Protocol PONG
    // envelopes and transport-level pong frames both count.
    let mut liveness = tokio::time::interval(pong_timeout / 2);
    liveness.reset(); // skip immediate first tick
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            _ = liveness.tick() => {
                if last_pong.elapsed() > pong_timeout {
                    warn!(conn_id = %conn, "pong silence exceeded timeout, closing");
                    break;
                }
            }
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(envelope) => {
                        if send_envelope(&mut socket, &envelope).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw)) => {
                        if dispatch::handle_text(&registry, conn, &raw).await == HandleOutcome::Pong {
                            last_pong = Instant::now();
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        last_pong = Instant::now();
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(error) => {
                        debug!(conn_id = %conn, %error, "websocket receive failed");
                        break;
                    }
                }
            }
        }
    }

    registry.unregister(conn).await;
}
