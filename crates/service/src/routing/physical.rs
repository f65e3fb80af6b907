//! Physical routing table (spec.md §4.3): `PhysicalEP -> {addresses,
//! capabilities, last-heard, expiry}`, keyed by the canonicalized endpoint
//! string.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
};

use codec::endpoint::PhysicalEp;
use parking_lot::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalRoute {
    pub router_ep: PhysicalEp,
    pub capabilities: u32,
    pub logical_endpoint_set_id: Uuid,
    pub udp_ep: Option<SocketAddr>,
    pub tcp_ep: Option<SocketAddr>,
    pub last_heard: u64,
    pub expires_at: u64,
}

/// Outcome of an `upsert`: whether the caller should flush logical routes
/// pointing at this physical endpoint, because its advertised logical
/// endpoint set changed (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Refreshed,
    EndpointSetChanged,
}

pub struct PhysicalTable {
    routes: RwLock<HashMap<String, PhysicalRoute>>,
    ticks: AtomicU64,
    default_ttl: u64,
}

impl PhysicalTable {
    pub fn new(default_ttl_secs: u64) -> Self {
        Self {
            routes: RwLock::new(HashMap::with_capacity(64)),
            ticks: AtomicU64::new(0),
            default_ttl: default_ttl_secs,
        }
    }

    pub fn now(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Advance the table's internal clock by one tick (driven by the
    /// router's background tick loop).
    pub fn tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn upsert(&self, mut route: PhysicalRoute) -> UpsertOutcome {
        let key = route.router_ep.to_string();
        let now = self.now();
        route.last_heard = now;
        route.expires_at = now + self.default_ttl;

        let mut table = self.routes.write();
        match table.get(&key) {
            Some(existing) if existing.logical_endpoint_set_id != route.logical_endpoint_set_id => {
                table.insert(key, route);
                UpsertOutcome::EndpointSetChanged
            }
            Some(_) => {
                table.insert(key, route);
                UpsertOutcome::Refreshed
            }
            None => {
                table.insert(key, route);
                UpsertOutcome::Inserted
            }
        }
    }

    pub fn remove(&self, endpoint: &PhysicalEp) -> Option<PhysicalRoute> {
        self.routes.write().remove(&endpoint.to_string())
    }

    pub fn get(&self, endpoint: &PhysicalEp) -> Option<PhysicalRoute> {
        self.routes.read().get(&endpoint.to_string()).cloned()
    }

    pub fn contains(&self, endpoint: &PhysicalEp) -> bool {
        self.routes.read().contains_key(&endpoint.to_string())
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop and return all routes whose `expires_at` has passed.
    pub fn sweep_expired(&self) -> Vec<PhysicalRoute> {
        let now = self.now();
        let mut table = self.routes.write();
        let expired: Vec<String> = table
            .iter()
            .filter(|(_, route)| now > route.expires_at)
            .map(|(key, _)| key.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|key| table.remove(&key))
            .collect()
    }

    pub fn snapshot(&self) -> Vec<PhysicalRoute> {
        self.routes.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(ep: &str, set_id: Uuid) -> PhysicalRoute {
        PhysicalRoute {
            router_ep: ep.parse().unwrap(),
            capabilities: 0,
            logical_endpoint_set_id: set_id,
            udp_ep: None,
            tcp_ep: None,
            last_heard: 0,
            expires_at: 0,
        }
    }

    #[test]
    fn upsert_reports_inserted_then_refreshed() {
        let table = PhysicalTable::new(30);
        let set_id = Uuid::new_v4();
        assert_eq!(table.upsert(route("physical://root/hub/leaf-1", set_id)), UpsertOutcome::Inserted);
        assert_eq!(table.upsert(route("physical://root/hub/leaf-1", set_id)), UpsertOutcome::Refreshed);
    }

    #[test]
    fn upsert_with_changed_endpoint_set_id_is_flagged() {
        let table = PhysicalTable::new(30);
        table.upsert(route("physical://root/hub/leaf-1", Uuid::new_v4()));
        let outcome = table.upsert(route("physical://root/hub/leaf-1", Uuid::new_v4()));
        assert_eq!(outcome, UpsertOutcome::EndpointSetChanged);
    }

    #[test]
    fn sweep_expired_removes_stale_routes() {
        let table = PhysicalTable::new(1);
        table.upsert(route("physical://root/hub/leaf-1", Uuid::new_v4()));
        assert_eq!(table.len(), 1);

        table.tick();
        table.tick();
        let expired = table.sweep_expired();
        assert_eq!(expired.len(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn get_and_remove_round_trip() {
        let table = PhysicalTable::new(30);
        let ep: PhysicalEp = "physical://root/hub/leaf-1".parse().unwrap();
        table.upsert(route("physical://root/hub/leaf-1", Uuid::new_v4()));
        assert!(table.get(&ep).is_some());
        assert!(table.remove(&ep).is_some());
        assert!(table.get(&ep).is_none());
    }
}
