//! Conflict matrix: cache of known conflicts between node pairs.
//!
//! Multi-degree conflict detection walks the graph, which is the expensive
//! part of ingestion. Once a conflict between a pair is established it is
//! recorded here so subsequent proposals touching the same pair skip the
//! traversal. Entries expire on a TTL because the graph underneath keeps
//! changing; an expired entry just means "walk again".
//!
//! Keys are order-independent, so (a, b) and (b, a) hit the same entry.

use chrono::{DateTime, Duration, Utc};
use coigraph_graph::NodeId;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

type MatrixKey = (NodeId, NodeId, String);

/// A cached conflict between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictEntry {
    pub a: NodeId,
    pub b: NodeId,
    /// Order-independent opposing-pair label, e.g. "Legal_Counsel|Opposing_Counsel".
    pub conflict_type: String,
    /// Strength of the connecting path between the pair (1.0 for degree-0).
    /// Severity relative to a specific proposal is recomputed at report time.
    pub path_strength: f64,
    /// 0 = the same actor holds both sides; >= 1 = connected through a path
    /// of that many hops.
    pub degree: usize,
    /// Node chain of the connecting path, endpoints included. Empty for
    /// degree-0 conflicts.
    pub via: Vec<NodeId>,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ConflictMatrix {
    entries: DashMap<MatrixKey, ConflictEntry>,
    ttl: Duration,
}

fn key(a: NodeId, b: NodeId, conflict_type: &str) -> MatrixKey {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    (lo, hi, conflict_type.to_string())
}

impl ConflictMatrix {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Record a conflict between a pair, replacing any earlier entry.
    pub fn record(
        &self,
        a: NodeId,
        b: NodeId,
        conflict_type: &str,
        path_strength: f64,
        degree: usize,
        via: Vec<NodeId>,
    ) {
        let entry = ConflictEntry {
            a,
            b,
            conflict_type: conflict_type.to_string(),
            path_strength,
            degree,
            via,
            computed_at: Utc::now(),
        };
        self.entries.insert(key(a, b, conflict_type), entry);
    }

    /// Fresh cached conflict for a pair, if any. Expired entries are evicted
    /// on the way out.
    pub fn lookup(&self, a: NodeId, b: NodeId, conflict_type: &str) -> Option<ConflictEntry> {
        let k = key(a, b, conflict_type);
        let hit = self.entries.get(&k).map(|e| e.value().clone())?;
        if Utc::now() - hit.computed_at > self.ttl {
            self.entries.remove(&k);
            return None;
        }
        Some(hit)
    }

    /// All fresh entries, for reporting.
    pub fn entries(&self) -> Vec<ConflictEntry> {
        let now = Utc::now();
        let mut fresh: Vec<ConflictEntry> = self
            .entries
            .iter()
            .filter(|e| now - e.value().computed_at <= self.ttl)
            .map(|e| e.value().clone())
            .collect();
        fresh.sort_by(|x, y| (x.a, x.b).cmp(&(y.a, y.b)));
        fresh
    }

    /// Drop every entry touching a node. Called after merges, where cached
    /// paths may reference the retired node.
    pub fn invalidate_node(&self, node: NodeId) {
        self.entries
            .retain(|_, e| e.a != node && e.b != node && !e.via.contains(&node));
    }

    /// Drop every entry, ahead of a full rebuild from traversal.
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn nid() -> NodeId {
        NodeId(Uuid::now_v7())
    }

    #[test]
    fn lookup_is_order_independent() {
        let matrix = ConflictMatrix::new(Duration::minutes(60));
        let (a, b) = (nid(), nid());
        matrix.record(a, b, "Legal_Counsel|Opposing_Counsel", 0.6, 2, vec![a, b]);
        assert!(matrix.lookup(b, a, "Legal_Counsel|Opposing_Counsel").is_some());
        assert!(matrix.lookup(a, b, "Plaintiff|Defendant").is_none());
    }

    #[test]
    fn expired_entries_are_evicted_on_lookup() {
        let matrix = ConflictMatrix::new(Duration::seconds(-1));
        let (a, b) = (nid(), nid());
        matrix.record(a, b, "Plaintiff|Defendant", 0.5, 1, vec![a, b]);
        assert!(matrix.lookup(a, b, "Plaintiff|Defendant").is_none());
        assert!(matrix.is_empty());
    }

    #[test]
    fn invalidate_node_drops_entries_through_it() {
        let matrix = ConflictMatrix::new(Duration::minutes(60));
        let (a, b, via) = (nid(), nid(), nid());
        matrix.record(a, b, "Plaintiff|Defendant", 0.5, 2, vec![a, via, b]);
        matrix.invalidate_node(via);
        assert!(matrix.is_empty());
    }
}
