//! Query/Reply session (spec.md §4.7.1): a single round trip with retry,
//! layered on the primitives in [`super::SessionManager`].

use std::{sync::Arc, time::Duration};

use codec::message::{Flags, Message};
use uuid::Uuid;

use super::{SessionKind, SessionManager};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Retries exhausted without a reply.
    Timeout,
    /// Explicit cancellation by either party.
    Cancel,
    /// The handler raised an error; message is copied from the reply.
    Session(String),
}

/// Execute one query/reply transaction to exhaustion: `send` fires a message
/// (fire-and-forget into the router/channel layer); `build` constructs the
/// outbound message for a given `sessionID`, called once per attempt so the
/// `KeepSessionID` flag and retry-count can be set correctly.
///
/// Implements spec.md §4.7's client state machine: `IDLE -> SENDING ->
/// WAITING_REPLY -> COMPLETED`, with up to `retries` timeout-triggered
/// resends of the identical `sessionID` before failing with
/// [`QueryError::Timeout`].
pub async fn query_with_retry(
    manager: &Arc<SessionManager>,
    mut send: impl FnMut(Message),
    build: impl Fn(Uuid, bool) -> Message,
    timeout: Duration,
    retries: u32,
) -> Result<Message, QueryError> {
    let (session_id, mut rx) = manager.open(SessionKind::Query, timeout, retries);

    let mut is_retry = false;
    loop {
        send(build(session_id, is_retry));

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(reply)) => {
                if let Some(codec::message::PropertyValue::Text(err)) = reply.get_property("error") {
                    return Err(QueryError::Session(err.clone()));
                }
                return Ok(reply);
            }
            Ok(Err(_channel_closed)) => return Err(QueryError::Cancel),
            Err(_elapsed) => {
                if !manager.rearm(session_id, timeout) {
                    manager.cancel(session_id);
                    return Err(QueryError::Timeout);
                }
                is_retry = true;
            }
        }
    }
}

/// Server-side handling of an inbound `OpenSession` query: consult the
/// idempotent reply cache before invoking `handler`, and populate the cache
/// afterward when `idempotent` is set (spec.md §4.7, testable property #2).
pub async fn handle_query<F>(manager: &SessionManager, session_id: Uuid, idempotent: bool, request: Message, handler: F) -> Message
where
    F: FnOnce(Message) -> std::pin::Pin<Box<dyn std::future::Future<Output = Message> + Send>>,
{
    if idempotent {
        if let Some(cached) = manager.cached_reply(session_id) {
            return cached;
        }
    }

    let mut reply = handler(request).await;
    reply.session_id = session_id;
    reply.flags = reply.flags | Flags::SERVER_SESSION | Flags::KEEP_SESSION_ID;

    if idempotent {
        manager.cache_reply(session_id, reply.clone());
    }

    reply
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionManagerOptions;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ep(s: &str) -> codec::endpoint::MsgEp {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn successful_reply_completes_without_retry() {
        let manager = SessionManager::new(SessionManagerOptions::default());
        let attempts = AtomicU32::new(0);
        let manager_for_send = manager.clone();

        let result = query_with_retry(
            &manager,
            |msg| {
                attempts.fetch_add(1, Ordering::SeqCst);
                manager_for_send.complete(msg.session_id, Message::new("reply", ep("physical://root"), ep("physical://root")));
            },
            |id, _retry| {
                let mut m = Message::new("app.ping", ep("physical://root"), ep("physical://root"));
                m.session_id = id;
                m
            },
            Duration::from_millis(50),
            3,
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_yield_timeout_error() {
        let manager = SessionManager::new(SessionManagerOptions::default());
        let attempts = AtomicU32::new(0);

        let result = query_with_retry(
            &manager,
            |_msg| {
                attempts.fetch_add(1, Ordering::SeqCst);
            },
            |id, _retry| {
                let mut m = Message::new("app.ping", ep("physical://root"), ep("physical://root"));
                m.session_id = id;
                m
            },
            Duration::from_millis(10),
            2,
        )
        .await;

        assert_eq!(result, Err(QueryError::Timeout));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
