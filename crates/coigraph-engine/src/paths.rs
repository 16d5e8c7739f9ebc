//! Bounded multi-degree path traversal over the active graph.
//!
//! Finds simple paths (no repeated node) between two nodes, up to a
//! configured degree. Edges are traversed in both directions; a path's
//! strength is the product of its hop strengths, so longer chains are
//! naturally weaker. Results come back strongest-first.

use coigraph_graph::{GraphRead, NodeId, RelationshipId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Which way the underlying edge was walked relative to the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HopDirection {
    Outbound,
    Inbound,
}

/// One traversed edge within a path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathHop {
    pub relationship_id: RelationshipId,
    pub rel_type: String,
    pub direction: HopDirection,
    pub from: NodeId,
    pub to: NodeId,
    pub strength: f64,
}

/// A complete path between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathResult {
    pub start: NodeId,
    pub end: NodeId,
    pub hops: Vec<PathHop>,
    /// Product of hop strengths.
    pub strength: f64,
    /// Number of hops.
    pub degree: usize,
}

impl PathResult {
    /// Ordered node sequence including both endpoints.
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes = vec![self.start];
        nodes.extend(self.hops.iter().map(|h| h.to));
        nodes
    }
}

/// Hard cap on frontier states so a dense graph cannot blow up a query.
const MAX_FRONTIER: usize = 100_000;

/// Enumerate all simple paths from `start` to `end` with at most
/// `max_degree` hops, strongest first.
///
/// `exclude` drops one relationship from the traversal, so a caller can ask
/// "is there a path besides the edge I am about to write".
pub fn paths_between<V: GraphRead>(
    view: &V,
    start: NodeId,
    end: NodeId,
    max_degree: usize,
    exclude: Option<RelationshipId>,
) -> Vec<PathResult> {
    if start == end || max_degree == 0 {
        return Vec::new();
    }

    struct Frontier {
        node: NodeId,
        hops: Vec<PathHop>,
        // Nodes already on this path; keeps paths simple.
        visited: Vec<NodeId>,
        strength: f64,
    }

    let mut results = Vec::new();
    let mut queue = VecDeque::new();
    queue.push_back(Frontier {
        node: start,
        hops: Vec::new(),
        visited: vec![start],
        strength: 1.0,
    });

    let mut expanded = 0usize;
    while let Some(state) = queue.pop_front() {
        expanded += 1;
        if expanded > MAX_FRONTIER {
            tracing::warn!(%start, %end, max_degree, "path search frontier cap hit");
            break;
        }
        for rel in view.relationships_of(state.node) {
            if Some(rel.id) == exclude {
                continue;
            }
            let (next, direction) = if rel.source == state.node {
                (rel.target, HopDirection::Outbound)
            } else {
                (rel.source, HopDirection::Inbound)
            };
            if state.visited.contains(&next) {
                continue;
            }
            let hop = PathHop {
                relationship_id: rel.id,
                rel_type: rel.rel_type.clone(),
                direction,
                from: state.node,
                to: next,
                strength: rel.strength,
            };
            let mut hops = state.hops.clone();
            hops.push(hop);
            let strength = state.strength * rel.strength;
            if next == end {
                let degree = hops.len();
                results.push(PathResult {
                    start,
                    end,
                    hops,
                    strength,
                    degree,
                });
                continue;
            }
            if state.hops.len() + 1 < max_degree {
                let mut visited = state.visited.clone();
                visited.push(next);
                queue.push_back(Frontier {
                    node: next,
                    hops,
                    visited,
                    strength,
                });
            }
        }
    }

    results.sort_by(|a, b| {
        b.strength
            .partial_cmp(&a.strength)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.degree.cmp(&b.degree))
    });
    results
}

/// Strongest path between two nodes, if any.
pub fn strongest_path<V: GraphRead>(
    view: &V,
    start: NodeId,
    end: NodeId,
    max_degree: usize,
    exclude: Option<RelationshipId>,
) -> Option<PathResult> {
    paths_between(view, start, end, max_degree, exclude)
        .into_iter()
        .next()
}
