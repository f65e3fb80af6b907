//! # Topology layer
//!
//! Clustering primitives built on top of [`service`]'s session manager
//! (spec.md §4.8): a `Topology` maps a cluster name — a
//! [`DynamicScope`](dynamic_scope)-rewritten logical endpoint — onto a set
//! of server instances and implements send / broadcast / query /
//! parallel-query across them. [`LazyMessenger`](messenger::LazyMessenger)
//! layers reliable-delivery confirmation on top of a query.
//!
//! This crate owns no transport of its own: callers supply a `transport`
//! closure that hands an encoded [`Message`] to the router/channel layer for
//! a selected [`Instance`], the same way the session layer takes a `send`
//! closure rather than owning a socket.
//!
//! ## Example
//!
//! ```
//! use mesh_router_topology::{BasicTopology, Instance, Topology};
//!
//! let topology = BasicTopology::new();
//! topology.set_instances(vec![Instance {
//!     key: None,
//!     ep: "physical://root/hub/leaf-1".parse().unwrap(),
//! }]);
//!
//! let instance = topology.select(None).unwrap();
//! assert_eq!(instance.ep.to_string(), "physical://root/hub/leaf-1");
//! ```

pub mod dynamic_scope;
pub mod messenger;

use std::{sync::Arc, time::Duration};

use codec::{endpoint::MsgEp, message::Message};
use parking_lot::RwLock;
use service::session::{
    SessionManager,
    parallel::{CompletionMode, Operation, OperationResult, parallel_query as run_parallel_query},
    query::{QueryError, query_with_retry},
};
use uuid::Uuid;

/// One member of a topology: a concrete endpoint plus whatever key it was
/// discovered or configured under. `StaticHashedTopology` assigns each
/// member a fixed `0..N-1` key; `BasicTopology` instances are discovered
/// dynamically and carry no key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub key: Option<u64>,
    pub ep: MsgEp,
}

/// No instance could be found for a selection (spec.md §4.8:
/// `StaticHashedTopology`'s missing configured members "produce
/// `NoRouteError` per-operation").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoRouteError {
    NoInstances,
    KeyNotAssigned(u64),
}

#[derive(Debug, Clone)]
pub enum TopologyError {
    NoRoute(NoRouteError),
    Query(QueryError),
}

/// A pluggable strategy mapping a cluster name to a set of server instances
/// and selecting among them (spec.md §4.8).
pub trait Topology: Send + Sync {
    /// Pick the instance a `Send` or single-target `Query` should target.
    /// `key` is the caller-supplied hash key; topologies that ignore keys
    /// (e.g. [`BasicTopology`]) select at random regardless.
    fn select(&self, key: Option<u64>) -> Result<Instance, NoRouteError>;

    /// Every instance a `Broadcast` or `ParallelQuery` should target.
    /// Configured-but-undiscovered members are reported as `Err` rather than
    /// silently dropped, so broadcast/parallel-query can surface per-target
    /// failures without failing the whole operation.
    fn broadcast_targets(&self) -> Vec<Result<Instance, NoRouteError>>;
}

/// Random selection among dynamically discovered server instances
/// (spec.md §4.8): `Send` picks one at random, `Broadcast` fans out to all,
/// `Query` returns the first reply, `ParallelQuery` issues one query per
/// discovered instance.
pub struct BasicTopology {
    instances: RwLock<Vec<Instance>>,
}

impl Default for BasicTopology {
    fn default() -> Self {
        Self::new()
    }
}

impl BasicTopology {
    pub fn new() -> Self {
        Self { instances: RwLock::new(Vec::new()) }
    }

    /// Replace the discovered instance set. The owning router calls this as
    /// its advertise/discovery loop learns about or loses peers.
    pub fn set_instances(&self, instances: Vec<Instance>) {
        *self.instances.write() = instances;
    }

    pub fn instances(&self) -> Vec<Instance> {
        self.instances.read().clone()
    }
}

impl Topology for BasicTopology {
    fn select(&self, _key: Option<u64>) -> Result<Instance, NoRouteError> {
        let instances = self.instances.read();
        if instances.is_empty() {
            return Err(NoRouteError::NoInstances);
        }
        let idx = rand::random::<usize>() % instances.len();
        Ok(instances[idx].clone())
    }

    fn broadcast_targets(&self) -> Vec<Result<Instance, NoRouteError>> {
        self.instances.read().iter().cloned().map(Ok).collect()
    }
}

/// Statically configured membership: a fixed list of `0..N-1` keys, each
/// bound to an instance endpoint as it is discovered (spec.md §4.8).
/// Selection with a key picks `instances[hash(key) mod N]`; selection
/// without one degrades to `BasicTopology`'s random pick among bound
/// members. A server using this topology declares its own `this-instance`
/// index, tolerated as absent for a client-only role (spec.md §9, open
/// question (b)).
pub struct StaticHashedTopology {
    members: RwLock<Vec<Option<Instance>>>,
    this_instance: Option<u64>,
}

impl StaticHashedTopology {
    /// `member_count` is the fixed cluster size `N`; members start unbound
    /// and are filled in by [`Self::bind`] as their endpoints are
    /// discovered.
    pub fn new(member_count: usize, this_instance: Option<u64>) -> Self {
        Self {
            members: RwLock::new(vec![None; member_count]),
            this_instance,
        }
    }

    pub fn this_instance(&self) -> Option<u64> {
        self.this_instance
    }

    pub fn member_count(&self) -> usize {
        self.members.read().len()
    }

    /// Bind `index` to a concrete endpoint once discovered. Out-of-range
    /// indices are ignored; `instances[]` is a fixed-size configuration.
    pub fn bind(&self, index: u64, ep: MsgEp) {
        let mut members = self.members.write();
        if let Some(slot) = members.get_mut(index as usize) {
            *slot = Some(Instance { key: Some(index), ep });
        }
    }

    pub fn unbind(&self, index: u64) {
        let mut members = self.members.write();
        if let Some(slot) = members.get_mut(index as usize) {
            *slot = None;
        }
    }
}

impl Topology for StaticHashedTopology {
    fn select(&self, key: Option<u64>) -> Result<Instance, NoRouteError> {
        let members = self.members.read();
        if members.is_empty() {
            return Err(NoRouteError::NoInstances);
        }
        match key {
            None => {
                let bound: Vec<&Instance> = members.iter().filter_map(|slot| slot.as_ref()).collect();
                if bound.is_empty() {
                    return Err(NoRouteError::NoInstances);
                }
                let idx = rand::random::<usize>() % bound.len();
                Ok(bound[idx].clone())
            }
            Some(hash_key) => {
                let idx = (hash_key as usize) % members.len();
                members[idx].clone().ok_or(NoRouteError::KeyNotAssigned(idx as u64))
            }
        }
    }

    fn broadcast_targets(&self) -> Vec<Result<Instance, NoRouteError>> {
        self.members
            .read()
            .iter()
            .enumerate()
            .map(|(idx, slot)| slot.clone().ok_or(NoRouteError::KeyNotAssigned(idx as u64)))
            .collect()
    }
}

/// Drives send/broadcast/query/parallel-query operations for a given
/// [`Topology`] against a shared [`SessionManager`] (spec.md §4.8).
pub struct TopologyClient<T: Topology> {
    pub topology: Arc<T>,
    sessions: Arc<SessionManager>,
}

impl<T: Topology> TopologyClient<T> {
    pub fn new(topology: Arc<T>, sessions: Arc<SessionManager>) -> Self {
        Self { topology, sessions }
    }

    /// Fire-and-forget send to one instance (spec.md §4.8: "random selection
    /// among server instances" / `instances[hash(key) mod N]`).
    pub fn send(&self, key: Option<u64>, build: impl FnOnce(&Instance) -> Message, transport: impl FnOnce(&Instance, Message)) -> Result<(), NoRouteError> {
        let instance = self.topology.select(key)?;
        let msg = build(&instance);
        transport(&instance, msg);
        Ok(())
    }

    /// Fan `build`/`transport` out to every topology member. Per-target
    /// `NoRouteError`s (an unbound `StaticHashedTopology` slot) are reported
    /// in-place rather than aborting the whole broadcast.
    pub fn broadcast(&self, mut build: impl FnMut(&Instance) -> Message, mut transport: impl FnMut(&Instance, Message)) -> Vec<Result<(), NoRouteError>> {
        self.topology
            .broadcast_targets()
            .into_iter()
            .map(|target| {
                let instance = target?;
                transport(&instance, build(&instance));
                Ok(())
            })
            .collect()
    }

    /// Query a single selected instance and return its first reply
    /// (spec.md §4.8: "query returns first reply").
    pub async fn query(
        &self,
        key: Option<u64>,
        build: impl Fn(Uuid, bool) -> Message + Send + 'static,
        mut transport: impl FnMut(&Instance, Message) + Send + 'static,
        timeout: Duration,
        retries: u32,
    ) -> Result<Message, TopologyError> {
        let instance = self.topology.select(key).map_err(TopologyError::NoRoute)?;
        let instance_for_send = instance.clone();
        self.query_instance(&instance, build, move |msg| transport(&instance_for_send, msg), timeout, retries).await
    }

    /// Query a caller-chosen instance directly, bypassing selection. Used by
    /// [`messenger::LazyMessenger`], which needs the selected instance's
    /// endpoint to fill in a [`messenger::DeliveryConfirmation`].
    pub async fn query_instance(
        &self,
        _instance: &Instance,
        build: impl Fn(Uuid, bool) -> Message + Send + 'static,
        send: impl FnMut(Message) + Send + 'static,
        timeout: Duration,
        retries: u32,
    ) -> Result<Message, TopologyError> {
        query_with_retry(&self.sessions, send, build, timeout, retries).await.map_err(TopologyError::Query)
    }

    /// Parallel-query every discovered/bound instance (spec.md §4.8:
    /// "parallel-query issues one per discovered instance"). `transport_for`
    /// is called once per target instance to obtain its send closure.
    pub async fn parallel_query(
        &self,
        mode: CompletionMode,
        build: Arc<dyn Fn(Uuid, bool) -> Message + Send + Sync>,
        mut transport_for: impl FnMut(&Instance) -> Box<dyn FnMut(Message) + Send>,
        timeout: Duration,
        retries: u32,
    ) -> Vec<OperationResult> {
        let ops: Vec<Operation<_, _>> = self
            .topology
            .broadcast_targets()
            .into_iter()
            .filter_map(Result::ok)
            .map(|instance| {
                let mut send = transport_for(&instance);
                let build = build.clone();
                Operation {
                    send: move |msg: Message| send(msg),
                    build: move |id, retry| build(id, retry),
                    timeout,
                    retries,
                }
            })
            .collect();

        run_parallel_query(&self.sessions, mode, ops).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(s: &str) -> MsgEp {
        s.parse().unwrap()
    }

    #[test]
    fn basic_topology_selects_among_discovered_instances() {
        let topology = BasicTopology::new();
        assert_eq!(topology.select(None), Err(NoRouteError::NoInstances));

        topology.set_instances(vec![Instance { key: None, ep: ep("physical://root/hub/leaf-1") }]);
        assert_eq!(topology.select(None).unwrap().ep, ep("physical://root/hub/leaf-1"));
    }

    #[test]
    fn static_hashed_selection_is_stable_and_ignores_key_when_absent() {
        let topology = StaticHashedTopology::new(4, Some(0));
        for i in 0..4u64 {
            topology.bind(i, ep(&format!("physical://root/hub/leaf-{i}")));
        }

        let first = topology.select(Some(9)).unwrap();
        let second = topology.select(Some(9)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.ep, ep("physical://root/hub/leaf-1")); // 9 mod 4 == 1
    }

    #[test]
    fn static_hashed_unbound_member_errors_per_operation() {
        let topology = StaticHashedTopology::new(2, None);
        topology.bind(0, ep("physical://root/hub/leaf-0"));

        assert_eq!(topology.select(Some(1)), Err(NoRouteError::KeyNotAssigned(1)));

        let targets = topology.broadcast_targets();
        assert_eq!(targets.len(), 2);
        assert!(targets[0].is_ok());
        assert_eq!(targets[1], Err(NoRouteError::KeyNotAssigned(1)));
    }

    #[tokio::test]
    async fn client_query_resolves_against_selected_instance() {
        use service::session::SessionManagerOptions;

        let topology = Arc::new(BasicTopology::new());
        topology.set_instances(vec![Instance { key: None, ep: ep("physical://root/hub/leaf-1") }]);
        let sessions = SessionManager::new(SessionManagerOptions::default());
        let client = TopologyClient::new(topology, sessions.clone());

        let result = client
            .query(
                None,
                |id, _retry| {
                    let mut m = Message::new("app.ping", ep("physical://root"), ep("physical://root/hub/leaf-1"));
                    m.session_id = id;
                    m
                },
                move |_instance, msg| {
                    sessions.complete(msg.session_id, Message::new("reply", ep("physical://root/hub/leaf-1"), ep("physical://root")));
                },
                Duration::from_millis(50),
                1,
            )
            .await;

        assert!(result.is_ok());
    }
}
