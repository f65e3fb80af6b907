//! Logical routing table (spec.md §4.4): `logical pattern -> {local handler |
//! physical route}`, with distance-ranked, policy-driven selection.

use super::{Distance, SelectionPolicy};

use codec::endpoint::{LogicalEp, PhysicalEp};
use parking_lot::RwLock;

/// What a logical route resolves to: a handler registered in this same
/// process, or a physical endpoint reachable via the physical table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    Local(String),
    Physical(PhysicalEp),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalRouteEntry {
    pub pattern: LogicalEp,
    pub target: RouteTarget,
    pub distance: Distance,
}

pub struct LogicalTable {
    entries: RwLock<Vec<LogicalRouteEntry>>,
}

impl Default for LogicalTable {
    fn default() -> Self {
        Self::new()
    }
}

impl LogicalTable {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::with_capacity(64)),
        }
    }

    pub fn insert(&self, entry: LogicalRouteEntry) {
        let mut entries = self.entries.write();
        entries.retain(|existing| existing != &entry);
        entries.push(entry);
    }

    pub fn remove_target(&self, target: &RouteTarget) {
        self.entries.write().retain(|e| &e.target != target);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All entries whose pattern matches `query`, honoring wildcards on
    /// either side (spec.md §4.4: "a query may itself be a wildcard
    /// pattern").
    pub fn matching(&self, query: &LogicalEp) -> Vec<LogicalRouteEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.pattern.matches(query) || query.matches(&e.pattern))
            .cloned()
            .collect()
    }

    /// Resolve `query` to the set of targets a `SendTo` should deliver to,
    /// applying distance tie-breaking and the caller's selection policy
    /// (spec.md §4.4).
    pub fn resolve(&self, query: &LogicalEp, policy: SelectionPolicy) -> Vec<RouteTarget> {
        let mut candidates = self.matching(query);
        if candidates.is_empty() {
            return Vec::new();
        }

        let closest = candidates.iter().map(|e| e.distance).min().unwrap();
        candidates.retain(|e| e.distance == closest);

        match policy {
            SelectionPolicy::BroadcastAll => candidates.into_iter().map(|e| e.target).collect(),
            SelectionPolicy::SingleRandom => {
                if candidates.is_empty() {
                    return Vec::new();
                }
                let idx = rand::random::<usize>() % candidates.len();
                vec![candidates.swap_remove(idx).target]
            }
            SelectionPolicy::Hashed(key) => {
                candidates.sort_by(|a, b| route_target_key(&a.target).cmp(&route_target_key(&b.target)));
                let idx = (key as usize) % candidates.len();
                vec![candidates.swap_remove(idx).target]
            }
        }
    }

    /// Remove entries whose physical target is no longer present in the
    /// physical table, or whose local handler has been deregistered
    /// (spec.md §4.4 `flush()`). `still_present` is supplied by the caller
    /// since liveness is defined against the physical table / dispatcher,
    /// which this module does not own.
    pub fn flush(&self, still_present: impl Fn(&RouteTarget) -> bool) {
        self.entries.write().retain(|e| still_present(&e.target));
    }

    pub fn snapshot(&self) -> Vec<LogicalRouteEntry> {
        self.entries.read().clone()
    }
}

fn route_target_key(target: &RouteTarget) -> String {
    match target {
        RouteTarget::Local(id) => id.clone(),
        RouteTarget::Physical(ep) => ep.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pattern: &str, target: RouteTarget, distance: Distance) -> LogicalRouteEntry {
        LogicalRouteEntry {
            pattern: pattern.parse().unwrap(),
            target,
            distance,
        }
    }

    #[test]
    fn resolve_prefers_closest_distance_tier() {
        let table = LogicalTable::new();
        table.insert(entry(
            "logical://accounts/billing",
            RouteTarget::Local("h1".into()),
            Distance::Process,
        ));
        table.insert(entry(
            "logical://accounts/billing",
            RouteTarget::Physical("physical://root/hub/leaf-2".parse().unwrap()),
            Distance::External,
        ));

        let query: LogicalEp = "logical://accounts/billing".parse().unwrap();
        let targets = table.resolve(&query, SelectionPolicy::BroadcastAll);
        assert_eq!(targets, vec![RouteTarget::Local("h1".into())]);
    }

    #[test]
    fn broadcast_all_returns_every_route_in_tier() {
        let table = LogicalTable::new();
        for i in 0..3 {
            table.insert(entry(
                "logical://accounts/billing",
                RouteTarget::Physical(format!("physical://root/hub/leaf-{i}").parse().unwrap()),
                Distance::Subnet,
            ));
        }
        let query: LogicalEp = "logical://accounts/billing".parse().unwrap();
        let targets = table.resolve(&query, SelectionPolicy::BroadcastAll);
        assert_eq!(targets.len(), 3);
    }

    #[test]
    fn hashed_selection_is_stable_for_stable_membership() {
        let table = LogicalTable::new();
        for i in 0..4 {
            table.insert(entry(
                "logical://accounts/billing",
                RouteTarget::Physical(format!("physical://root/hub/leaf-{i}").parse().unwrap()),
                Distance::Subnet,
            ));
        }
        let query: LogicalEp = "logical://accounts/billing".parse().unwrap();
        let first = table.resolve(&query, SelectionPolicy::Hashed(42));
        let second = table.resolve(&query, SelectionPolicy::Hashed(42));
        assert_eq!(first, second);
    }

    #[test]
    fn wildcard_query_enumerates_concrete_patterns() {
        let table = LogicalTable::new();
        table.insert(entry(
            "logical://accounts/billing",
            RouteTarget::Local("h1".into()),
            Distance::Process,
        ));
        let query: LogicalEp = "logical://accounts/*".parse().unwrap();
        assert_eq!(table.matching(&query).len(), 1);
    }

    #[test]
    fn flush_drops_targets_the_predicate_rejects() {
        let table = LogicalTable::new();
        table.insert(entry("logical://foo", RouteTarget::Local("h1".into()), Distance::Process));
        table.flush(|_| false);
        assert!(table.is_empty());
    }
}
