use axum::extract::ws::{Message, WebSocket};
use scrimlink_common::protocol::Envelope;
use tracing::warn;

/// Encode and send one envelope on a socket.
///
/// A serialization failure is logged and the frame skipped (`Ok`), so a bad
/// body never tears down the connection and no partial frame is written. A
/// transport failure is returned so the socket loop can close.
pub(crate) async fn send_envelope(socket: &mut WebSocket, envelope: &Envelope) -> Result<(), ()> {
    let encoded = match serde_json::to_string(envelope) {
        Ok(encoded) => encoded,
        Err(error) => {
            warn!(%error, header = %envelope.header, "envelope failed to encode, frame skipped");
            return Ok(());
        }
    };
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}
