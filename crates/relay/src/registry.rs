// Session registry: the relay's state machine core.
//
// One mutex guards connections, sessions, and the presence directory,
// because merge and eviction mutate several sessions atomically and must
// not interleave with a concurrent disconnect on the same identities.
// Frame delivery happens outside the lock: mutators collect the outbound
// senders they need, release the lock, then send.

use indexmap::IndexMap;
use scrimlink_common::protocol::{Envelope, Header};
use scrimlink_common::types::{ConnectionId, ScrimRecord, SessionId};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Outbound = mpsc::UnboundedSender<Envelope>;

/// Shared handle to the relay's session, connection, and presence state.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Mutex<RegistryInner>>,
    grace: Duration,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    sessions: HashMap<SessionId, SessionEntry>,
    /// Insertion-ordered so UPDATE bodies list records in SET order.
    scrims: IndexMap<SessionId, ScrimRecord>,
}

struct ConnectionEntry {
    session: SessionId,
    outbound: Outbound,
}

#[derive(Default)]
struct SessionEntry {
    members: Vec<ConnectionId>,
    /// Pending grace timer while the session is draining.
    eviction: Option<EvictionTimer>,
    /// Bumped on every draining -> active revival. A fired timer carrying a
    /// stale epoch must not evict, even if it already slipped past the abort.
    epoch: u64,
}

struct EvictionTimer {
    task: JoinHandle<()>,
}

impl SessionEntry {
    fn cancel_eviction(&mut self) {
        if let Some(timer) = self.eviction.take() {
            timer.task.abort();
        }
        self.epoch += 1;
    }
}

impl Registry {
    pub fn new(grace: Duration) -> Self {
        Self { inner: Arc::new(Mutex::new(RegistryInner::default())), grace }
    }

    /// Register a freshly opened connection under a brand-new session.
    pub async fn register(&self, outbound: Outbound) -> (ConnectionId, SessionId) {
        let conn = ConnectionId::generate();
        let session = SessionId::generate();
        let mut inner = self.inner.lock().await;
        inner.connections.insert(conn, ConnectionEntry { session, outbound });
        inner
            .sessions
            .insert(session, SessionEntry { members: vec![conn], ..Default::default() });
        info!(conn_id = %conn, session_id = %session, "connection registered");
        (conn, session)
    }

    /// Remove a closed connection from its session.
    ///
    /// A session left with no members starts draining: the grace timer is
    /// armed and eviction fires unless a reconnect cancels it first.
    /// Unknown connections are a no-op.
    pub async fn unregister(&self, conn: ConnectionId) {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.connections.remove(&conn) else {
            debug!(conn_id = %conn, "unregister for unknown connection");
            return;
        };
        let Some(session) = inner.sessions.get_mut(&entry.session) else {
            debug!(conn_id = %conn, session_id = %entry.session, "closed connection had no live session");
            return;
        };
        session.members.retain(|member| *member != conn);
        if session.members.is_empty() {
            let timer = EvictionTimer { task: self.spawn_eviction(entry.session, session.epoch) };
            session.eviction = Some(timer);
            info!(
                session_id = %entry.session,
                grace_secs = self.grace.as_secs(),
                "session draining"
            );
        } else {
            info!(
                conn_id = %conn,
                session_id = %entry.session,
                remaining = session.members.len(),
                "connection left session"
            );
        }
    }

    fn spawn_eviction(&self, session: SessionId, epoch: u64) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(registry.grace).await;
            registry.evict(session, epoch).await;
        })
    }

    /// Grace timer body.
    ///
    /// Revalidates under the lock: the session must still exist, still have
    /// no members, and still be in the epoch the timer was armed for.
    /// Anything else means a reconnect won the race and the firing is a
    /// no-op.
    async fn evict(&self, session: SessionId, epoch: u64) {
        let evicted = {
            let mut inner = self.inner.lock().await;
            let still_draining = matches!(
                inner.sessions.get(&session),
                Some(entry) if entry.epoch == epoch && entry.members.is_empty()
            );
            if still_draining {
                inner.sessions.remove(&session);
                inner.scrims.shift_remove(&session);
            } else {
                debug!(session_id = %session, "stale eviction timer ignored");
            }
            still_draining
        };
        if evicted {
            info!(session_id = %session, "session evicted");
            self.update_broadcast().await;
        }
    }

    /// Move this connection's session to `target`.
    ///
    /// Rename when the target is unknown, true merge when it exists; in both
    /// cases the whole membership list travels and the presence record
    /// follows the session's effective identity. The connection ends up
    /// belonging to `target` regardless of which path ran.
    pub async fn merge(&self, conn: ConnectionId, target: SessionId) {
        let presence_moved = {
            let mut inner = self.inner.lock().await;
            let state = &mut *inner;
            let Some(current) = state.connections.get(&conn).map(|entry| entry.session) else {
                debug!(conn_id = %conn, "merge for unknown connection");
                return;
            };
            if current == target {
                return;
            }

            let mut source = state.sessions.remove(&current).unwrap_or_else(|| {
                debug!(conn_id = %conn, session_id = %current, "merge source session missing");
                SessionEntry { members: vec![conn], ..Default::default() }
            });
            source.cancel_eviction();

            for member in &source.members {
                if let Some(entry) = state.connections.get_mut(member) {
                    entry.session = target;
                }
            }

            match state.sessions.get_mut(&target) {
                None => {
                    // Rename: the entry moves wholesale to the new identity,
                    // so the visible presence set does not change.
                    if let Some(record) = state.scrims.shift_remove(&current) {
                        state.scrims.insert(target, record);
                    }
                    state.sessions.insert(target, source);
                    info!(conn_id = %conn, from = %current, to = %target, "session renamed");
                    false
                }
                Some(existing) => {
                    existing.cancel_eviction();
                    existing.members.extend(source.members.iter().copied());
                    let moved = match state.scrims.shift_remove(&current) {
                        Some(record) => {
                            // Incoming side wins over whatever the target had.
                            state.scrims.insert(target, record);
                            true
                        }
                        None => false,
                    };
                    info!(conn_id = %conn, from = %current, to = %target, "sessions merged");
                    moved
                }
            }
        };

        if presence_moved {
            self.update_broadcast().await;
        }
    }

    /// Publish or overwrite the sender's scrim record, then announce the
    /// new presence set.
    pub async fn set_scrim(&self, conn: ConnectionId, record: ScrimRecord) {
        {
            let mut inner = self.inner.lock().await;
            let Some(session) = inner.connections.get(&conn).map(|entry| entry.session) else {
                debug!(conn_id = %conn, "set for unknown connection");
                return;
            };
            inner.scrims.insert(session, record);
        }
        self.update_broadcast().await;
    }

    /// Retract the sender's record. Broadcasts unconditionally, matching
    /// the wire contract for CLEAR.
    pub async fn clear_scrim(&self, conn: ConnectionId) {
        {
            let mut inner = self.inner.lock().await;
            let Some(session) = inner.connections.get(&conn).map(|entry| entry.session) else {
                debug!(conn_id = %conn, "clear for unknown connection");
                return;
            };
            inner.scrims.shift_remove(&session);
        }
        self.update_broadcast().await;
    }

    pub async fn session_of(&self, conn: ConnectionId) -> Option<SessionId> {
        self.inner.lock().await.connections.get(&conn).map(|entry| entry.session)
    }

    /// Live session identities, for the SESSIONS diagnostic.
    pub async fn session_ids(&self) -> Vec<SessionId> {
        self.inner.lock().await.sessions.keys().copied().collect()
    }

    /// Deliver an envelope to every member connection of one session.
    ///
    /// An absent session is logged and dropped, never an error to the
    /// caller; per-member delivery failures are isolated from siblings.
    pub async fn send(&self, session: SessionId, header: Header, body: Value) {
        let envelope = Envelope::new(header, body);
        let recipients = {
            let inner = self.inner.lock().await;
            let Some(entry) = inner.sessions.get(&session) else {
                debug!(session_id = %session, header = header.as_str(), "send to unknown session dropped");
                return;
            };
            collect_recipients(&inner, &entry.members)
        };
        deliver(session, recipients, &envelope);
    }

    /// Send the same envelope to every session in the store.
    ///
    /// Delivery is always framed through each session's membership list,
    /// never raw connections.
    pub async fn broadcast(&self, header: Header, body: Value) {
        let envelope = Envelope::new(header, body);
        let recipients: Vec<(SessionId, Vec<(ConnectionId, Outbound)>)> = {
            let inner = self.inner.lock().await;
            inner
                .sessions
                .iter()
                .map(|(session, entry)| (*session, collect_recipients(&inner, &entry.members)))
                .collect()
        };
        for (session, members) in recipients {
            deliver(session, members, &envelope);
        }
    }

    /// Announce the current presence set to everyone.
    pub async fn update_broadcast(&self) {
        let records: Vec<ScrimRecord> =
            { self.inner.lock().await.scrims.values().cloned().collect() };
        let body = match serde_json::to_value(&records) {
            Ok(body) => body,
            Err(error) => {
                warn!(%error, "presence list failed to serialize, update skipped");
                return;
            }
        };
        debug!(records = records.len(), "broadcasting presence update");
        self.broadcast(Header::Update, body).await;
    }

    #[cfg(test)]
    pub(crate) async fn scrim_sessions(&self) -> Vec<SessionId> {
        self.inner.lock().await.scrims.keys().copied().collect()
    }

    #[cfg(test)]
    pub(crate) async fn member_count(&self, session: SessionId) -> Option<usize> {
        self.inner.lock().await.sessions.get(&session).map(|entry| entry.members.len())
    }
}

fn collect_recipients(
    inner: &RegistryInner,
    members: &[ConnectionId],
) -> Vec<(ConnectionId, Outbound)> {
    members
        .iter()
        .filter_map(|member| {
            inner.connections.get(member).map(|entry| (*member, entry.outbound.clone()))
        })
        .collect()
}

fn deliver(
    session: SessionId,
    recipients: Vec<(ConnectionId, Outbound)>,
    envelope: &Envelope,
) {
    for (conn, outbound) in recipients {
        if outbound.send(envelope.clone()).is_err() {
            debug!(
                session_id = %session,
                conn_id = %conn,
                header = %envelope.header,
                "delivery to closed connection dropped"
            );
        }
    }
}
