//! Session manager (spec.md §4.7): a process-wide map `sessionID -> Session`
//! with retry timers, an idempotent-reply cache, and the four session
//! variants layered on top in [`query`], [`duplex`], [`reliable`], and
//! [`parallel`].

pub mod duplex;
pub mod parallel;
pub mod query;
pub mod reliable;

use std::{
    collections::HashMap,
    ops::{Deref, DerefMut},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, sleep},
    time::Duration,
};

use codec::message::Message;
use parking_lot::{RwLock, RwLockReadGuard};
use uuid::Uuid;

/// Pre-allocated `HashMap` wrapper, matching the capacity-aware table idiom
/// used throughout this fabric's hot-path maps.
pub struct Table<K, V>(HashMap<K, V>);

impl<K, V> Default for Table<K, V> {
    fn default() -> Self {
        Self(HashMap::with_capacity(256))
    }
}

impl<K, V> Deref for Table<K, V> {
    type Target = HashMap<K, V>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<K, V> DerefMut for Table<K, V> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Extends the lifetime of a read-lock guard so callers can return a
/// borrowed view without cloning the value out of the table.
pub struct ReadLock<'a, 'b, K, R> {
    pub key: &'a K,
    pub lock: RwLockReadGuard<'b, R>,
}

impl<'a, 'b, V> ReadLock<'a, 'b, Uuid, Table<Uuid, V>> {
    pub fn get_ref(&self) -> Option<&V> {
        self.lock.get(self.key)
    }
}

/// Manually-advanced tick counter (driven by the session manager's
/// background sweep thread, once per second).
///
/// # Test
///
/// ```
/// use mesh_router_service::session::Timer;
///
/// let timer = Timer::default();
/// assert_eq!(timer.get(), 0);
/// assert_eq!(timer.add(), 1);
/// assert_eq!(timer.get(), 1);
/// ```
#[derive(Default)]
pub struct Timer(AtomicU64);

impl Timer {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn add(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    None,
    Query,
    Duplex,
    ReliableTransfer,
}

/// Registration-time session configuration (spec.md §9: explicit
/// registration replaces the source's attribute-scanning discovery).
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub kind: SessionKind,
    pub idempotent: bool,
    pub keep_alive: Duration,
    pub session_timeout: Duration,
    pub is_async: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            kind: SessionKind::None,
            idempotent: false,
            keep_alive: Duration::from_secs(1),
            session_timeout: Duration::from_secs(10),
            is_async: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Sending,
    WaitingReply,
    Completed,
    Cancelled,
    Failed,
}

/// Bookkeeping for one in-flight client-side transaction. Duplex and
/// reliable-transfer sessions carry their own richer state (see
/// [`duplex::DuplexSession`], [`reliable::ReliableTransferSession`]) and are
/// tracked here only for expiry and idempotent-reply purposes.
pub struct SessionEntry {
    pub kind: SessionKind,
    pub state: SessionState,
    pub retries_left: u32,
    pub expires_at: u64,
    pub waiter: Option<tokio::sync::oneshot::Sender<Message>>,
}

pub struct SessionManagerOptions {
    pub session_cache_time: Duration,
    pub default_retries: u32,
    pub default_timeout: Duration,
}

impl Default for SessionManagerOptions {
    fn default() -> Self {
        Self {
            session_cache_time: Duration::from_secs(60),
            default_retries: 3,
            default_timeout: Duration::from_secs(10),
        }
    }
}

/// The process-wide `sessionID -> Session` map (spec.md §3, §4.7).
pub struct SessionManager {
    sessions: RwLock<Table<Uuid, SessionEntry>>,
    idempotent_cache: RwLock<Table<Uuid, (Message, u64)>>,
    timer: Timer,
    session_cache_time_secs: u64,
    pub default_retries: u32,
    pub default_timeout: Duration,
}

impl SessionManager {
    pub fn new(options: SessionManagerOptions) -> Arc<Self> {
        let this = Arc::new(Self {
            sessions: RwLock::new(Table::default()),
            idempotent_cache: RwLock::new(Table::default()),
            timer: Timer::default(),
            session_cache_time_secs: options.session_cache_time.as_secs(),
            default_retries: options.default_retries,
            default_timeout: options.default_timeout,
        });

        let weak = Arc::downgrade(&this);
        thread::spawn(move || {
            let mut expired = Vec::with_capacity(64);
            while let Some(this) = weak.upgrade() {
                let now = this.timer.add();

                {
                    let sessions = this.sessions.read();
                    expired.extend(
                        sessions
                            .iter()
                            .filter(|(_, v)| v.expires_at <= now && v.state != SessionState::Completed)
                            .map(|(k, _)| *k),
                    );
                }
                if !expired.is_empty() {
                    let mut sessions = this.sessions.write();
                    for id in expired.drain(..) {
                        if let Some(entry) = sessions.get_mut(&id) {
                            entry.state = SessionState::Failed;
                        }
                    }
                }

                {
                    let mut cache = this.idempotent_cache.write();
                    cache.retain(|_, (_, cached_at)| now.saturating_sub(*cached_at) <= this.session_cache_time_secs);
                }

                sleep(Duration::from_secs(1));
            }
        });

        this
    }

    pub fn now(&self) -> u64 {
        self.timer.get()
    }

    /// Open a new client-side session, installing a reply waiter. Returns
    /// the fresh `sessionID` and the receiver half the caller awaits (with
    /// its own timeout/retry loop — see [`query::query_with_retry`]).
    pub fn open(&self, kind: SessionKind, timeout: Duration, retries: u32) -> (Uuid, tokio::sync::oneshot::Receiver<Message>) {
        let session_id = Uuid::new_v4();
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sessions.write().insert(
            session_id,
            SessionEntry {
                kind,
                state: SessionState::Sending,
                retries_left: retries,
                expires_at: self.now() + timeout.as_secs().max(1),
                waiter: Some(tx),
            },
        );
        (session_id, rx)
    }

    /// Re-arm an existing session for a retry: fresh expiry, one fewer
    /// retry remaining. Returns `false` once retries are exhausted.
    pub fn rearm(&self, session_id: Uuid, timeout: Duration) -> bool {
        let mut sessions = self.sessions.write();
        if let Some(entry) = sessions.get_mut(&session_id) {
            if entry.retries_left == 0 {
                return false;
            }
            entry.retries_left -= 1;
            entry.expires_at = self.now() + timeout.as_secs().max(1);
            true
        } else {
            false
        }
    }

    /// Deliver a reply to the waiting client, consuming the session. If
    /// `idempotent` server-side caching applies, the caller should also call
    /// [`Self::cache_reply`] at the handler (not here — this method is the
    /// *client*-side half).
    pub fn complete(&self, session_id: Uuid, reply: Message) -> bool {
        let mut sessions = self.sessions.write();
        if let Some(mut entry) = sessions.remove(&session_id) {
            entry.state = SessionState::Completed;
            if let Some(waiter) = entry.waiter.take() {
                let _ = waiter.send(reply);
            }
            true
        } else {
            false
        }
    }

    pub fn cancel(&self, session_id: Uuid) {
        if let Some(mut entry) = self.sessions.write().remove(&session_id) {
            entry.state = SessionState::Cancelled;
        }
    }

    pub fn state(&self, session_id: Uuid) -> Option<SessionState> {
        self.sessions.read().get(&session_id).map(|e| e.state)
    }

    /// Server-side idempotent reply cache (spec.md §4.7): a duplicate query
    /// within `SessionCacheTime` is answered from here without re-invoking
    /// the handler.
    pub fn cached_reply(&self, session_id: Uuid) -> Option<Message> {
        self.idempotent_cache.read().get(&session_id).map(|(msg, _)| msg.clone())
    }

    pub fn cache_reply(&self, session_id: Uuid, reply: Message) {
        self.idempotent_cache.write().insert(session_id, (reply, self.now()));
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().len()
    }
}
