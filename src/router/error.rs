//! Error taxonomy for routing decisions (spec.md §7). Wire-level errors
//! (`codec::Error`) never reach this layer — they are logged and the frame
//! is dropped by the channel or the inbound decode step.

use codec::endpoint::MsgEp;

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("no route to {0}")]
    NoRoute(MsgEp),
    #[error("message ttl exceeded en route to {0}")]
    TtlExceeded(MsgEp),
    #[error("session {0} exhausted its retries")]
    SessionRetriesExhausted(uuid::Uuid),
    #[error("session {0} timed out")]
    SessionTimeout(uuid::Uuid),
}
