//! Event fan-out for router- and session-level occurrences (spec.md §9:
//! "Delegate/event fan-out -> interface or channel"). [`RouterEvents`] is a
//! single handler interface with one method per event, in the teacher's
//! `Observer` idiom: a struct holding `config` and `statistics`, invoked
//! synchronously from the hot path.

use std::sync::Arc;

use codec::endpoint::MsgEp;
use uuid::Uuid;

use crate::{config::Config, statistics::Statistics};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Upload,
    Download,
}

/// Every event below must be observed before its session is considered
/// complete (spec.md §9) — callers invoke these synchronously rather than
/// fire-and-forget.
pub trait RouterEvents: Send + Sync {
    /// A message was delivered to a local handler or session waiter.
    fn on_receive(&self, from: &MsgEp, to: &MsgEp, type_tag: &str);

    /// A session (query, duplex, reliable-transfer) closed, either on reply
    /// delivery or on timeout.
    fn on_close(&self, session_id: Uuid, timeout: bool);

    /// A query-session request arrived at the server side.
    fn on_query(&self, session_id: Uuid, from: &MsgEp);

    /// A reliable-transfer session negotiated `(direction, size)`.
    fn on_begin_transfer(&self, transfer_id: Uuid, direction: TransferDirection, size: Option<u64>);

    /// One reliable-transfer block was sent.
    fn on_send(&self, transfer_id: Uuid, seq: u64, len: usize);

    /// One reliable-transfer block was received.
    fn on_receive_block(&self, transfer_id: Uuid, seq: u64, len: usize);

    /// A reliable-transfer session ended, successfully or with an error.
    fn on_end_transfer(&self, transfer_id: Uuid, error: Option<&str>);

    /// A physical endpoint collision was detected (spec.md §4.5 "Duplicate
    /// leaf detection").
    fn on_duplicate_leaf_detected(&self, router_ep: &str);
}

/// Default observer: logs every event at an appropriate level and feeds
/// [`Statistics`] where the event has a corresponding counter.
#[derive(Clone)]
pub struct LoggingObserver {
    #[allow(unused)]
    config: Arc<Config>,
    statistics: Statistics,
}

impl LoggingObserver {
    pub fn new(config: Arc<Config>, statistics: Statistics) -> Self {
        Self { config, statistics }
    }
}

impl RouterEvents for LoggingObserver {
    fn on_receive(&self, from: &MsgEp, to: &MsgEp, type_tag: &str) {
        log::trace!("receive: from={from} to={to} type={type_tag}");
        self.statistics.record_received(1);
    }

    fn on_close(&self, session_id: Uuid, timeout: bool) {
        log::debug!("session closed: id={session_id} timeout={timeout}");
    }

    fn on_query(&self, session_id: Uuid, from: &MsgEp) {
        log::trace!("query: id={session_id} from={from}");
    }

    fn on_begin_transfer(&self, transfer_id: Uuid, direction: TransferDirection, size: Option<u64>) {
        log::info!("transfer begin: id={transfer_id} direction={direction:?} size={size:?}");
    }

    fn on_send(&self, transfer_id: Uuid, seq: u64, len: usize) {
        log::trace!("transfer send: id={transfer_id} seq={seq} len={len}");
        self.statistics.record_sent(1);
    }

    fn on_receive_block(&self, transfer_id: Uuid, seq: u64, len: usize) {
        log::trace!("transfer receive: id={transfer_id} seq={seq} len={len}");
        self.statistics.record_received(1);
    }

    fn on_end_transfer(&self, transfer_id: Uuid, error: Option<&str>) {
        match error {
            Some(message) => log::warn!("transfer end: id={transfer_id} error={message}"),
            None => log::info!("transfer end: id={transfer_id}"),
        }
    }

    fn on_duplicate_leaf_detected(&self, router_ep: &str) {
        log::warn!("duplicate leaf detected: router_ep={router_ep}");
        self.statistics.record_duplicate_leaf_detection();
    }
}
