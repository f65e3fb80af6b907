//! Persisted message queue (spec.md §6: "the core uses this only when the
//! queue engine is enabled"). [`MemoryQueueStore`] is the in-process
//! collaborator used by default and in tests; a file-backed store is an
//! external concern the spec explicitly keeps out of scope.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use codec::{endpoint::MsgEp, message::Message};
use parking_lot::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    Pending,
    Delivered,
    Expired,
}

#[derive(Debug, Clone)]
pub struct QueueInfo {
    pub target_ep: MsgEp,
    pub delivery_time: u64,
    pub expire_time: u64,
    pub priority: u8,
    pub delivery_attempts: u32,
    pub status: QueueStatus,
}

pub type PersistId = u64;

/// The queue engine's contract (spec.md §6). Implementations are free to
/// persist however they like; the core only depends on this trait.
pub trait QueueStore: Send + Sync {
    fn add(&self, info: QueueInfo, msg: Message) -> PersistId;
    fn get(&self, id: PersistId) -> Option<Message>;
    fn get_info(&self, id: PersistId) -> Option<QueueInfo>;
    fn get_persist_id(&self, msg_id: Uuid) -> Option<PersistId>;
    fn set_delivery_attempt(&self, id: PersistId, attempts: u32);
    fn set_priority(&self, id: PersistId, priority: u8);
    fn modify(&self, id: PersistId, target_ep: Option<MsgEp>, delivery_time: Option<u64>, expire_time: Option<u64>, status: Option<QueueStatus>);
    fn remove(&self, id: PersistId) -> bool;
    /// All entries still `Pending` with `delivery_time <= now`, ready to be
    /// resent.
    fn due(&self, now: u64) -> Vec<PersistId>;
}

struct Entry {
    info: QueueInfo,
    msg: Message,
}

/// In-memory `QueueStore`. Not crash-durable; suitable for tests and for
/// deployments that accept losing in-flight queued messages on restart.
pub struct MemoryQueueStore {
    entries: RwLock<HashMap<PersistId, Entry>>,
    by_msg_id: RwLock<HashMap<Uuid, PersistId>>,
    next_id: AtomicU64,
}

impl Default for MemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            by_msg_id: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl QueueStore for MemoryQueueStore {
    fn add(&self, info: QueueInfo, msg: Message) -> PersistId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.by_msg_id.write().insert(msg.msg_id, id);
        self.entries.write().insert(id, Entry { info, msg });
        id
    }

    fn get(&self, id: PersistId) -> Option<Message> {
        self.entries.read().get(&id).map(|e| e.msg.clone())
    }

    fn get_info(&self, id: PersistId) -> Option<QueueInfo> {
        self.entries.read().get(&id).map(|e| e.info.clone())
    }

    fn get_persist_id(&self, msg_id: Uuid) -> Option<PersistId> {
        self.by_msg_id.read().get(&msg_id).copied()
    }

    fn set_delivery_attempt(&self, id: PersistId, attempts: u32) {
        if let Some(entry) = self.entries.write().get_mut(&id) {
            entry.info.delivery_attempts = attempts;
        }
    }

    fn set_priority(&self, id: PersistId, priority: u8) {
        if let Some(entry) = self.entries.write().get_mut(&id) {
            entry.info.priority = priority;
        }
    }

    fn modify(&self, id: PersistId, target_ep: Option<MsgEp>, delivery_time: Option<u64>, expire_time: Option<u64>, status: Option<QueueStatus>) {
        if let Some(entry) = self.entries.write().get_mut(&id) {
            if let Some(ep) = target_ep {
                entry.info.target_ep = ep;
            }
            if let Some(t) = delivery_time {
                entry.info.delivery_time = t;
            }
            if let Some(t) = expire_time {
                entry.info.expire_time = t;
            }
            if let Some(s) = status {
                entry.info.status = s;
            }
        }
    }

    fn remove(&self, id: PersistId) -> bool {
        if let Some(entry) = self.entries.write().remove(&id) {
            self.by_msg_id.write().remove(&entry.msg.msg_id);
            true
        } else {
            false
        }
    }

    fn due(&self, now: u64) -> Vec<PersistId> {
        self.entries
            .read()
            .iter()
            .filter(|(_, e)| e.info.status == QueueStatus::Pending && e.info.delivery_time <= now)
            .map(|(id, _)| *id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg() -> Message {
        Message::new("app.queued", "physical://root".parse().unwrap(), "physical://root/hub".parse().unwrap())
    }

    fn info() -> QueueInfo {
        QueueInfo {
            target_ep: "physical://root/hub".parse().unwrap(),
            delivery_time: 0,
            expire_time: 100,
            priority: 0,
            delivery_attempts: 0,
            status: QueueStatus::Pending,
        }
    }

    #[test]
    fn add_get_remove_round_trip() {
        let store = MemoryQueueStore::new();
        let m = msg();
        let msg_id = m.msg_id;
        let id = store.add(info(), m);

        assert_eq!(store.get_persist_id(msg_id), Some(id));
        assert!(store.get(id).is_some());
        assert!(store.remove(id));
        assert!(store.get(id).is_none());
        assert_eq!(store.get_persist_id(msg_id), None);
    }

    #[test]
    fn due_returns_only_pending_entries_past_delivery_time() {
        let store = MemoryQueueStore::new();
        let id = store.add(info(), msg());
        assert_eq!(store.due(0), vec![id]);

        store.modify(id, None, None, None, Some(QueueStatus::Delivered));
        assert!(store.due(0).is_empty());
    }
}
