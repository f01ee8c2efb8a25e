//! Session hub
//!
//! Owns the set of live client sessions and fans protocol notifications out
//! to each of them. Every session carries a bounded outbound queue drained
//! by its streaming response; a per-session keep-alive task pings the queue
//! at a fixed interval and tears the session down after three consecutive
//! failures. The map lock is never held across a queue send.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::rpc;

/// Outbound queue depth per session; bounds memory for clients that never
/// open their stream.
const QUEUE_CAPACITY: usize = 128;

/// Keep-alive strikes before a session is abandoned.
const MAX_MISSED_PINGS: u32 = 3;

struct SessionEntry {
    transport: mpsc::Sender<Value>,
    /// Receiver parked here until a stream claims it.
    stream: Option<mpsc::Receiver<Value>>,
    missed_pings: u32,
    initial_context_sent: bool,
    keep_alive: AbortHandle,
}

pub struct SessionHub {
    sessions: Mutex<HashMap<Uuid, SessionEntry>>,
    keep_alive_interval: Duration,
}

impl SessionHub {
    pub fn new(keep_alive_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            keep_alive_interval,
        })
    }

    /// Create a session with a fresh UUID, an outbound queue, and a running
    /// keep-alive task.
    pub fn create_session(self: &Arc<Self>) -> Uuid {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);

        let keep_alive = tokio::spawn(keep_alive_loop(
            Arc::downgrade(self),
            id,
            self.keep_alive_interval,
        ))
        .abort_handle();

        self.sessions.lock().insert(
            id,
            SessionEntry {
                transport: tx,
                stream: Some(rx),
                missed_pings: 0,
                initial_context_sent: false,
                keep_alive,
            },
        );
        tracing::info!("Session {} created", id);
        id
    }

    /// Claim the session's outbound stream for a streaming response.
    ///
    /// The first claim also enqueues `initial_context` (exactly once per
    /// session) before the receiver is handed out. A later claim replaces
    /// the transport pair, which lets a client reconnect its stream.
    pub fn attach_stream(&self, id: &Uuid, initial_context: Value) -> Option<mpsc::Receiver<Value>> {
        let (rx, first_tx) = {
            let mut sessions = self.sessions.lock();
            let entry = sessions.get_mut(id)?;
            let rx = match entry.stream.take() {
                Some(rx) => rx,
                None => {
                    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
                    entry.transport = tx;
                    rx
                }
            };
            let first_tx = if entry.initial_context_sent {
                None
            } else {
                entry.initial_context_sent = true;
                Some(entry.transport.clone())
            };
            (rx, first_tx)
        };
        if let Some(tx) = first_tx {
            if tx.try_send(initial_context).is_err() {
                tracing::debug!("Initial context dropped for session {}", id);
            }
        }
        Some(rx)
    }

    /// Submit a notification to every live session, preserving per-session
    /// submission order. Send failures are counted by the keep-alive task,
    /// not here.
    pub fn broadcast(&self, notification: Value) {
        let transports: Vec<(Uuid, mpsc::Sender<Value>)> = {
            let sessions = self.sessions.lock();
            sessions
                .iter()
                .map(|(id, e)| (*id, e.transport.clone()))
                .collect()
        };
        for (id, tx) in transports {
            if let Err(e) = tx.try_send(notification.clone()) {
                tracing::debug!("Notification not delivered to session {}: {}", id, e);
            }
        }
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.sessions.lock().contains_key(id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Remove one session, stopping its keep-alive task and dropping its
    /// transport.
    pub fn remove_session(&self, id: &Uuid) {
        if let Some(entry) = self.sessions.lock().remove(id) {
            entry.keep_alive.abort();
            tracing::info!("Session {} removed", id);
        }
    }

    /// Drop every session. Used on shutdown.
    pub fn close_all(&self) {
        let entries: Vec<(Uuid, SessionEntry)> = self.sessions.lock().drain().collect();
        for (id, entry) in entries {
            entry.keep_alive.abort();
            tracing::debug!("Session {} closed", id);
        }
    }

    /// One keep-alive tick: try to push a ping onto the session's queue.
    ///
    /// Returns `false` once the session is gone and the calling task should
    /// stop. A failed push counts a strike; the third strike abandons the
    /// session.
    fn ping(&self, id: &Uuid) -> bool {
        let transport = {
            let sessions = self.sessions.lock();
            match sessions.get(id) {
                Some(entry) => entry.transport.clone(),
                None => return false,
            }
        };

        match transport.try_send(rpc::notification("ping", Value::Null)) {
            Ok(()) => {
                if let Some(entry) = self.sessions.lock().get_mut(id) {
                    entry.missed_pings = 0;
                    true
                } else {
                    false
                }
            }
            Err(e) => {
                let mut sessions = self.sessions.lock();
                let Some(entry) = sessions.get_mut(id) else {
                    return false;
                };
                entry.missed_pings += 1;
                tracing::warn!(
                    "Ping to session {} failed ({}): {}/{} missed",
                    id,
                    e,
                    entry.missed_pings,
                    MAX_MISSED_PINGS
                );
                if entry.missed_pings >= MAX_MISSED_PINGS {
                    sessions.remove(id);
                    drop(sessions);
                    tracing::info!("Session {} abandoned after missed pings", id);
                    false
                } else {
                    true
                }
            }
        }
    }
}

async fn keep_alive_loop(hub: Weak<SessionHub>, id: Uuid, period: Duration) {
    let start = tokio::time::Instant::now() + period;
    let mut interval = tokio::time::interval_at(start, period);
    loop {
        interval.tick().await;
        let Some(hub) = hub.upgrade() else { break };
        if !hub.ping(&id) {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context_note() -> Value {
        rpc::notification("ide/contextUpdate", json!({"workspaceState": {}}))
    }

    #[tokio::test]
    async fn initial_context_sent_exactly_once() {
        let hub = SessionHub::new(Duration::from_secs(60));
        let id = hub.create_session();

        let mut rx = hub.attach_stream(&id, context_note()).unwrap();
        let first = rx.recv().await.unwrap();
        assert_eq!(first["method"], "ide/contextUpdate");
        drop(rx);

        // Reconnect: no second initial context.
        let mut rx = hub.attach_stream(&id, context_note()).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_session_in_order() {
        let hub = SessionHub::new(Duration::from_secs(60));
        let a = hub.create_session();
        let b = hub.create_session();
        let mut rx_a = hub.attach_stream(&a, context_note()).unwrap();
        let mut rx_b = hub.attach_stream(&b, context_note()).unwrap();
        let _ = rx_a.recv().await;
        let _ = rx_b.recv().await;

        hub.broadcast(rpc::notification("ide/diffAccepted", json!({"filePath": "/x"})));
        hub.broadcast(rpc::notification("ide/diffRejected", json!({"filePath": "/y"})));

        for rx in [&mut rx_a, &mut rx_b] {
            let first = rx.recv().await.unwrap();
            let second = rx.recv().await.unwrap();
            assert_eq!(first["method"], "ide/diffAccepted");
            assert_eq!(second["method"], "ide/diffRejected");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn session_abandoned_after_three_missed_pings() {
        let hub = SessionHub::new(Duration::from_secs(60));
        let id = hub.create_session();

        // Claim and drop the stream so every ping push fails.
        let rx = hub.attach_stream(&id, context_note()).unwrap();
        drop(rx);

        tokio::time::sleep(Duration::from_secs(200)).await;
        assert!(!hub.contains(&id));
        assert_eq!(hub.session_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_session_receives_pings_and_survives() {
        let hub = SessionHub::new(Duration::from_secs(60));
        let id = hub.create_session();
        let mut rx = hub.attach_stream(&id, context_note()).unwrap();
        let _ = rx.recv().await;

        tokio::time::sleep(Duration::from_secs(130)).await;
        assert!(hub.contains(&id));

        let mut pings = 0;
        while let Ok(msg) = rx.try_recv() {
            if msg["method"] == "ping" {
                pings += 1;
            }
        }
        assert_eq!(pings, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_ping_resets_strikes() {
        let hub = SessionHub::new(Duration::from_secs(60));
        let id = hub.create_session();
        let rx = hub.attach_stream(&id, context_note()).unwrap();
        drop(rx);

        // Two strikes, then reconnect before the third.
        tokio::time::sleep(Duration::from_secs(130)).await;
        assert!(hub.contains(&id));
        let mut rx = hub.attach_stream(&id, context_note()).unwrap();

        tokio::time::sleep(Duration::from_secs(130)).await;
        assert!(hub.contains(&id));
        let mut pings = 0;
        while let Ok(msg) = rx.try_recv() {
            if msg["method"] == "ping" {
                pings += 1;
            }
        }
        assert!(pings >= 1);
    }

    #[tokio::test]
    async fn remove_session_clears_map() {
        let hub = SessionHub::new(Duration::from_secs(60));
        let id = hub.create_session();
        assert!(hub.contains(&id));
        hub.remove_session(&id);
        assert!(!hub.contains(&id));
    }
}
