//! Directory of live peer nodes and server-selection policies (§4.6).

// Layer 1: Standard library imports
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;

// Layer 3: Internal module imports
use playhouse_proto::ids::{NodeId, NodeType, ServiceId};

/// Default liveness TTL: entries older than this are evicted (§4.6).
pub const DEFAULT_LIVENESS_TTL: Duration = Duration::from_secs(30);

/// A live peer node (§3 "Server Info Entry").
#[derive(Debug, Clone)]
pub struct ServerInfoEntry {
    pub node_id: NodeId,
    pub node_type: NodeType,
    pub service_id: ServiceId,
    pub endpoint: String,
    pub last_seen: DateTime<Utc>,
    pub weight: u32,
}

impl ServerInfoEntry {
    pub fn new(node_id: NodeId, node_type: NodeType, service_id: ServiceId, endpoint: impl Into<String>) -> Self {
        Self {
            node_id,
            node_type,
            service_id,
            endpoint: endpoint.into(),
            last_seen: Utc::now(),
            weight: 1,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        let elapsed = Utc::now().signed_duration_since(self.last_seen);
        elapsed
            > chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(ttl.as_secs() as i64))
    }
}

/// Server-selection policy (§4.6): the four strategies a service can
/// choose between when picking one live node out of several candidates.
#[derive(Debug, Clone)]
pub enum SelectionPolicy {
    RoundRobin,
    Random,
    LeastLoaded,
    ByKey(u64),
}

impl SelectionPolicy {
    /// Build a `ByKey` policy by hashing an arbitrary stable key (e.g. an
    /// account id used for sticky routing).
    pub fn by_key(key: impl Hash) -> Self {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        SelectionPolicy::ByKey(hasher.finish())
    }
}

/// A map of live peer nodes indexed by `(type, serviceId)`, kept fresh by a
/// periodic heartbeat and pruned of stale entries (§4.6). `DashMap`-backed
/// routing table plus round-robin/random pool strategy, extended with a
/// TTL sweep and two additional selection policies.
pub struct ServerInfoCenter {
    entries: DashMap<NodeId, ServerInfoEntry>,
    round_robin_counters: DashMap<(NodeType, ServiceId), AtomicUsize>,
    ttl: Duration,
}

impl ServerInfoCenter {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_LIVENESS_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            round_robin_counters: DashMap::new(),
            ttl,
        }
    }

    /// Insert or refresh a peer's directory entry (heartbeat loop, §4.6).
    pub fn upsert(&self, mut entry: ServerInfoEntry) {
        entry.last_seen = Utc::now();
        self.entries.insert(entry.node_id.clone(), entry);
    }

    pub fn remove(&self, node_id: &NodeId) {
        self.entries.remove(node_id);
    }

    /// `getById` (§4.6), `None` if absent or past its TTL.
    pub fn get_by_id(&self, node_id: &NodeId) -> Option<ServerInfoEntry> {
        let entry = self.entries.get(node_id)?;
        if entry.is_expired(self.ttl) {
            return None;
        }
        Some(entry.clone())
    }

    /// `getByService` (§4.6): select one live node of `node_type` in
    /// `service_id` using `policy`. Deterministic tie-break by `nodeId`
    /// string order when multiple candidates are otherwise equal.
    pub fn get_by_service(
        &self,
        node_type: NodeType,
        service_id: ServiceId,
        policy: &SelectionPolicy,
    ) -> Option<ServerInfoEntry> {
        let mut candidates: Vec<ServerInfoEntry> = self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|entry| entry.node_type == node_type && entry.service_id == service_id)
            .filter(|entry| !entry.is_expired(self.ttl))
            .collect();

        if candidates.is_empty() {
            return None;
        }
        candidates.sort_by(|a, b| a.node_id.as_str().cmp(b.node_id.as_str()));

        match policy {
            SelectionPolicy::RoundRobin => {
                let counter = self
                    .round_robin_counters
                    .entry((node_type, service_id))
                    .or_insert_with(|| AtomicUsize::new(0));
                let index = counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
                Some(candidates[index].clone())
            }
            SelectionPolicy::Random => {
                let index = rand::thread_rng().gen_range(0..candidates.len());
                Some(candidates[index].clone())
            }
            SelectionPolicy::LeastLoaded => candidates
                .into_iter()
                .min_by_key(|entry| entry.weight)
                .map(|entry| entry),
            SelectionPolicy::ByKey(hash) => {
                let index = (*hash as usize) % candidates.len();
                Some(candidates[index].clone())
            }
        }
    }

    /// Evict entries past their TTL; returns the evicted node ids.
    pub fn sweep_expired(&self) -> Vec<NodeId> {
        let expired: Vec<NodeId> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_expired(self.ttl))
            .map(|entry| entry.key().clone())
            .collect();
        for node_id in &expired {
            self.entries.remove(node_id);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ServerInfoCenter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, weight: u32) -> ServerInfoEntry {
        ServerInfoEntry::new(NodeId::new(id), NodeType::Play, ServiceId::new(1), "127.0.0.1:9100").with_weight(weight)
    }

    #[test]
    fn get_by_id_returns_live_entry() {
        let center = ServerInfoCenter::new();
        center.upsert(entry("play-01", 1));
        assert!(center.get_by_id(&NodeId::new("play-01")).is_some());
        assert!(center.get_by_id(&NodeId::new("play-02")).is_none());
    }

    #[test]
    fn round_robin_cycles_through_candidates_in_order() {
        let center = ServerInfoCenter::new();
        center.upsert(entry("play-01", 1));
        center.upsert(entry("play-02", 1));

        let policy = SelectionPolicy::RoundRobin;
        let first = center
            .get_by_service(NodeType::Play, ServiceId::new(1), &policy)
            .expect("candidate");
        let second = center
            .get_by_service(NodeType::Play, ServiceId::new(1), &policy)
            .expect("candidate");
        let third = center
            .get_by_service(NodeType::Play, ServiceId::new(1), &policy)
            .expect("candidate");

        assert_ne!(first.node_id, second.node_id);
        assert_eq!(first.node_id, third.node_id);
    }

    #[test]
    fn least_loaded_picks_minimum_weight() {
        let center = ServerInfoCenter::new();
        center.upsert(entry("play-01", 10));
        center.upsert(entry("play-02", 2));

        let picked = center
            .get_by_service(NodeType::Play, ServiceId::new(1), &SelectionPolicy::LeastLoaded)
            .expect("candidate");
        assert_eq!(picked.node_id, NodeId::new("play-02"));
    }

    #[test]
    fn by_key_is_deterministic_for_the_same_key() {
        let center = ServerInfoCenter::new();
        center.upsert(entry("play-01", 1));
        center.upsert(entry("play-02", 1));

        let policy = SelectionPolicy::by_key("account-42");
        let first = center
            .get_by_service(NodeType::Play, ServiceId::new(1), &policy)
            .expect("candidate");
        let second = center
            .get_by_service(NodeType::Play, ServiceId::new(1), &policy)
            .expect("candidate");
        assert_eq!(first.node_id, second.node_id);
    }

    #[test]
    fn expired_entries_are_not_returned() {
        let center = ServerInfoCenter::with_ttl(Duration::from_millis(1));
        center.upsert(entry("play-01", 1));
        std::thread::sleep(Duration::from_millis(20));
        assert!(center.get_by_id(&NodeId::new("play-01")).is_none());
        assert!(center
            .get_by_service(NodeType::Play, ServiceId::new(1), &SelectionPolicy::RoundRobin)
            .is_none());
    }

    #[test]
    fn sweep_expired_evicts_stale_entries() {
        let center = ServerInfoCenter::with_ttl(Duration::from_millis(1));
        center.upsert(entry("play-01", 1));
        std::thread::sleep(Duration::from_millis(20));
        let evicted = center.sweep_expired();
        assert_eq!(evicted, vec![NodeId::new("play-01")]);
        assert!(center.is_empty());
    }
}
