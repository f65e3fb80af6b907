//! Duplex session (spec.md §4.7.2): a long-lived, bidirectional channel
//! between two routers with independent per-direction FIFO ordering,
//! multiplexed queries, and a keepalive-driven liveness check.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use codec::message::Message;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplexCloseReason {
    /// This side closed explicitly, or observed the peer close cleanly.
    Closed,
    /// No traffic for `SessionTimeout`; this side is the survivor.
    PeerTimedOut,
}

pub enum DuplexInbound {
    Message(Message),
    Query { query_id: u64, message: Message },
    QueryReply { query_id: u64, message: Message },
    KeepAlive,
}

struct QueryWaiter {
    tx: oneshot::Sender<Message>,
}

/// One side of an open duplex session. Both client and server hold one of
/// these; the only asymmetry is which side initiated `Connect`.
pub struct DuplexSession {
    pub session_id: Uuid,
    outbound: mpsc::UnboundedSender<DuplexInbound>,
    pending_queries: Mutex<HashMap<u64, QueryWaiter>>,
    next_query_id: AtomicU64,
    last_activity: AtomicU64,
    keep_alive: Duration,
    session_timeout: Duration,
}

impl DuplexSession {
    pub fn new(session_id: Uuid, outbound: mpsc::UnboundedSender<DuplexInbound>, keep_alive: Duration, session_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            session_id,
            outbound,
            pending_queries: Mutex::new(HashMap::new()),
            next_query_id: AtomicU64::new(0),
            last_activity: AtomicU64::new(0),
            keep_alive,
            session_timeout,
        })
    }

    /// One-way send. Ordering is FIFO per direction only (spec.md §4.7.2).
    pub fn send(&self, message: Message) {
        let _ = self.outbound.send(DuplexInbound::Message(message));
    }

    /// Request/response multiplexed over the duplex wire; any number may be
    /// in flight concurrently, paired by a per-session monotonic query id.
    pub async fn query(&self, message: Message, timeout: Duration) -> Result<Message, super::query::QueryError> {
        let query_id = self.next_query_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending_queries.lock().insert(query_id, QueryWaiter { tx });

        if self.outbound.send(DuplexInbound::Query { query_id, message }).is_err() {
            self.pending_queries.lock().remove(&query_id);
            return Err(super::query::QueryError::Cancel);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(super::query::QueryError::Cancel),
            Err(_) => {
                self.pending_queries.lock().remove(&query_id);
                Err(super::query::QueryError::Timeout)
            }
        }
    }

    /// Called by the channel read loop when a `QueryReply` arrives for this
    /// session; resolves the matching waiter.
    pub fn resolve_query(&self, query_id: u64, reply: Message) {
        if let Some(waiter) = self.pending_queries.lock().remove(&query_id) {
            let _ = waiter.tx.send(reply);
        }
    }

    pub fn note_activity(&self, now_secs: u64) {
        self.last_activity.store(now_secs, Ordering::Relaxed);
    }

    /// True once `now_secs - last_activity > SessionTimeout`, meaning the
    /// peer should be considered gone (spec.md §4.7.2,
    /// `DuplexSession_Fail_Client`).
    pub fn is_stale(&self, now_secs: u64) -> bool {
        now_secs.saturating_sub(self.last_activity.load(Ordering::Relaxed)) > self.session_timeout.as_secs()
    }

    pub fn keep_alive_interval(&self) -> Duration {
        self.keep_alive
    }

    pub fn close(&self) {
        for (_, waiter) in self.pending_queries.lock().drain() {
            drop(waiter.tx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(s: &str) -> codec::endpoint::MsgEp {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn query_resolved_by_matching_query_id() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = DuplexSession::new(Uuid::new_v4(), tx, Duration::from_secs(1), Duration::from_secs(5));

        let session_for_responder = session.clone();
        let responder = tokio::spawn(async move {
            if let Some(DuplexInbound::Query { query_id, .. }) = rx.recv().await {
                session_for_responder.resolve_query(
                    query_id,
                    Message::new("reply", ep("physical://root"), ep("physical://root")),
                );
            }
        });

        let reply = session
            .query(Message::new("app.ping", ep("physical://root"), ep("physical://root")), Duration::from_secs(1))
            .await;
        assert!(reply.is_ok());
        responder.await.unwrap();
    }

    #[test]
    fn staleness_detected_after_session_timeout() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = DuplexSession::new(Uuid::new_v4(), tx, Duration::from_secs(1), Duration::from_secs(5));
        session.note_activity(0);
        assert!(!session.is_stale(3));
        assert!(session.is_stale(10));
    }
}
