// Heartbeat scheduler.
//
// Heartbeats are per session, not per connection: one process-wide ticker
// broadcasts a PING envelope through the session store, so delivery always
// goes through each session's membership list and stops for evicted
// sessions on its own. Connection-level liveness (pong silence) lives in
// the socket loop.

use scrimlink_common::protocol::Header;
use serde_json::Value;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::registry::Registry;

/// Spawn the pinger task. The returned handle is only used by tests; in the
/// server it runs for the life of the process.
pub fn spawn_pinger(registry: Registry, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.reset(); // skip immediate first tick
        loop {
            ticker.tick().await;
            debug!("pinging all sessions");
            registry.broadcast(Header::Ping, Value::Null).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::time::sleep;

    #[tokio::test]
    async fn pinger_broadcasts_ping_envelopes_on_the_interval() {
        let registry = Registry::new(Duration::from_secs(120));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_conn, _session) = registry.register(tx).await;

        let pinger = spawn_pinger(registry, Duration::from_millis(25));
        sleep(Duration::from_millis(120)).await;
        pinger.abort();

        let mut pings = 0;
        while let Ok(envelope) = rx.try_recv() {
            assert_eq!(envelope.header, "PING");
            assert!(envelope.body.is_null());
            pings += 1;
        }
        assert!(pings >= 2, "expected repeated pings, got {pings}");
    }
}
