//! Relationship reconciliation: duplicate / update / conflict / create.
//!
//! Given a proposed edge between two already-resolved nodes, decide what the
//! graph should do with it:
//!
//! - a proposal whose type opposes a relationship the source, or a node one
//!   hop from it, already holds is still written, at a penalized strength,
//!   and the conflict is reported (`Conflict`);
//! - an existing Active edge with the same key absorbs weaker proposals
//!   (`Duplicate`, no write) and is upgraded by stronger ones (`Updated`);
//!   the comparison uses the penalized strength, so re-proposing a
//!   conflicted fact cannot launder the penalty away;
//! - everything else is `Created` at the proposed strength.
//!
//! Runs inside the same transaction as both endpoint resolutions so a
//! resolve-then-lose race cannot split the fact.

use crate::error::{EngineError, Result};
use coigraph_graph::{GraphRead, NodeId, RelationshipId, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Conflict rules
// ============================================================================

/// Configured table of opposing relationship-type pairs.
///
/// `require_target_link = false` (the default) treats one actor holding both
/// sides of an opposing pair as a conflict outright; when true, the existing
/// counterparty must additionally be directly connected to the proposed one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRules {
    opposing: HashMap<String, String>,
    pub require_target_link: bool,
}

impl ConflictRules {
    pub fn empty() -> Self {
        Self {
            opposing: HashMap::new(),
            require_target_link: false,
        }
    }

    /// Register an opposing pair; registration is symmetric.
    pub fn add_pair(&mut self, a: &str, b: &str) {
        self.opposing.insert(a.to_string(), b.to_string());
        self.opposing.insert(b.to_string(), a.to_string());
    }

    pub fn opposing_of(&self, rel_type: &str) -> Option<&str> {
        self.opposing.get(rel_type).map(String::as_str)
    }

    /// Conflict-type label for a pair, order-independent.
    pub fn conflict_label(&self, a: &str, b: &str) -> String {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        format!("{lo}|{hi}")
    }
}

impl Default for ConflictRules {
    fn default() -> Self {
        let mut rules = Self::empty();
        rules.add_pair("Legal_Counsel", "Opposing_Counsel");
        rules.add_pair("Plaintiff", "Defendant");
        rules
    }
}

// ============================================================================
// Reconciliation
// ============================================================================

/// What the reconciler decided to do with the proposed edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeAction {
    /// Existing edge already covers this at equal-or-higher strength.
    Duplicate,
    /// Existing edge kept, strength replaced with the stronger proposal.
    Updated,
    /// New edge written at the proposed strength.
    Created,
    /// New edge written at a penalized strength; conflict reported.
    Conflict,
}

impl EdgeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeAction::Duplicate => "duplicate",
            EdgeAction::Updated => "updated",
            EdgeAction::Created => "created",
            EdgeAction::Conflict => "conflict",
        }
    }
}

/// A degree-0 conflict: the opposing type is held by the source itself or
/// by a node directly linked to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectConflict {
    /// The node holding the opposing relationship; the proposal's source,
    /// or one of its direct links.
    pub actor: NodeId,
    /// Counterparty of the pre-existing opposing relationship.
    pub existing_counterparty: NodeId,
    pub existing_rel_type: String,
    /// Counterparty of the proposal that triggered the conflict.
    pub proposed_counterparty: NodeId,
    pub proposed_rel_type: String,
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub action: EdgeAction,
    pub relationship_id: RelationshipId,
    pub final_strength: f64,
    /// Strength the existing edge had before an `Updated` upgrade.
    pub previous_strength: Option<f64>,
    pub conflict: Option<DirectConflict>,
}

/// Reconcile a proposed edge inside the transaction.
pub fn evaluate(
    tx: &mut Transaction,
    source: NodeId,
    target: NodeId,
    rel_type: &str,
    proposed_strength: f64,
    rules: &ConflictRules,
    conflict_penalty: f64,
) -> Result<Reconciliation> {
    if !(0.0..=1.0).contains(&proposed_strength) {
        return Err(EngineError::Validation(format!(
            "relationship strength must be in [0, 1], got {proposed_strength}"
        )));
    }
    if rel_type.trim().is_empty() {
        return Err(EngineError::Validation(
            "relationship type must be non-empty".to_string(),
        ));
    }

    // The conflict check comes before the duplicate/upgrade comparison:
    // the effective strength of a conflicted proposal is the penalized one,
    // and a repeat of the same fact must be compared at that value.
    let existing = tx.active_relationship(source, target, rel_type);
    let conflict =
        find_direct_conflict(tx, source, target, rel_type, rules, existing.as_ref().map(|e| e.id));
    let effective_strength = match &conflict {
        Some(c) => {
            tracing::warn!(
                actor = %c.actor,
                existing = %c.existing_counterparty,
                proposed = %c.proposed_counterparty,
                rel_type,
                "opposing-pair conflict on proposed relationship"
            );
            proposed_strength * conflict_penalty
        }
        None => proposed_strength,
    };

    // At most one Active edge per (source, target, type): absorb or upgrade.
    if let Some(existing) = existing {
        if effective_strength <= existing.strength {
            return Ok(Reconciliation {
                action: EdgeAction::Duplicate,
                relationship_id: existing.id,
                final_strength: existing.strength,
                previous_strength: None,
                conflict,
            });
        }
        tx.stage_strength_update(existing.id, effective_strength);
        return Ok(Reconciliation {
            action: EdgeAction::Updated,
            relationship_id: existing.id,
            final_strength: effective_strength,
            previous_strength: Some(existing.strength),
            conflict,
        });
    }

    let action = if conflict.is_some() {
        EdgeAction::Conflict
    } else {
        EdgeAction::Created
    };

    // The edge is written either way; a conflict is data, not a veto.
    let relationship_id = tx.stage_relationship(
        source,
        target,
        rel_type,
        effective_strength,
        serde_json::Value::Null,
    );
    Ok(Reconciliation {
        action,
        relationship_id,
        final_strength: effective_strength,
        previous_strength: None,
        conflict,
    })
}

/// An opposing-type relationship counted against a proposal's source.
#[derive(Debug, Clone, PartialEq)]
pub struct OpposingHolding {
    /// Node holding the opposing relationship: the source itself, or a node
    /// one hop from it.
    pub holder: NodeId,
    pub relationship_id: RelationshipId,
    /// Counterparty of the opposing relationship.
    pub counterparty: NodeId,
    pub rel_type: String,
    pub strength: f64,
    /// Strength of the edge linking the source to the holder; 1.0 when the
    /// source is the holder.
    pub link_strength: f64,
}

/// Opposing-type relationships held by `source` or by any node one hop from
/// it, excluding those toward `target` itself. `exclude` drops one linking
/// edge from the hop scan, so the edge under proposal cannot manufacture
/// its own holder. Sorted by relationship id for determinism.
pub fn opposing_holdings<V: GraphRead>(
    view: &V,
    source: NodeId,
    target: NodeId,
    opposing: &str,
    exclude: Option<RelationshipId>,
) -> Vec<OpposingHolding> {
    let mut out = Vec::new();
    let mut seen = Vec::new();

    // Held by the source itself.
    for r in view.relationships_of(source) {
        if r.source == source && r.rel_type == opposing && r.target != target {
            seen.push(r.id);
            out.push(OpposingHolding {
                holder: source,
                relationship_id: r.id,
                counterparty: r.target,
                rel_type: r.rel_type,
                strength: r.strength,
                link_strength: 1.0,
            });
        }
    }

    // Held one hop away: the rule reaches through the source's links, so an
    // attorney inherits the holdings of their firm.
    for link in view.relationships_of(source) {
        if Some(link.id) == exclude {
            continue;
        }
        let Some(holder) = link.other_endpoint(source) else {
            continue;
        };
        for r in view.relationships_of(holder) {
            if r.source == holder
                && r.rel_type == opposing
                && r.target != target
                && r.target != source
                && !seen.contains(&r.id)
            {
                seen.push(r.id);
                out.push(OpposingHolding {
                    holder,
                    relationship_id: r.id,
                    counterparty: r.target,
                    rel_type: r.rel_type,
                    strength: r.strength,
                    link_strength: link.strength,
                });
            }
        }
    }

    out.sort_by_key(|h| h.relationship_id);
    out
}

/// Is the opposing type already held by the source or a node linked to it,
/// toward a different target?
fn find_direct_conflict(
    tx: &Transaction,
    source: NodeId,
    target: NodeId,
    rel_type: &str,
    rules: &ConflictRules,
    exclude: Option<RelationshipId>,
) -> Option<DirectConflict> {
    let opposing = rules.opposing_of(rel_type)?;
    for held in opposing_holdings(tx, source, target, opposing, exclude) {
        if rules.require_target_link && !directly_connected(tx, held.counterparty, target) {
            continue;
        }
        return Some(DirectConflict {
            actor: held.holder,
            existing_counterparty: held.counterparty,
            existing_rel_type: held.rel_type,
            proposed_counterparty: target,
            proposed_rel_type: rel_type.to_string(),
        });
    }
    None
}

fn directly_connected(tx: &Transaction, a: NodeId, b: NodeId) -> bool {
    tx.relationships_of(a)
        .into_iter()
        .any(|r| r.other_endpoint(a) == Some(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use coigraph_graph::{EntityClass, GraphStore, NodeType};

    const PENALTY: f64 = 0.7;

    fn two_nodes(store: &GraphStore) -> (NodeId, NodeId) {
        let mut tx = store.begin();
        let a = tx.stage_node(NodeType::Person, "Jennifer White", EntityClass::FactBased);
        let b = tx.stage_node(NodeType::Company, "TechCorp Industries", EntityClass::FactBased);
        store.commit(tx).unwrap();
        (a, b)
    }

    fn evaluate_and_commit(
        store: &GraphStore,
        source: NodeId,
        target: NodeId,
        rel_type: &str,
        strength: f64,
    ) -> Reconciliation {
        let rules = ConflictRules::default();
        let mut tx = store.begin();
        let recon = evaluate(&mut tx, source, target, rel_type, strength, &rules, PENALTY).unwrap();
        store.commit(tx).unwrap();
        recon
    }

    #[test]
    fn create_then_duplicate_then_upgrade() {
        let store = GraphStore::new();
        let (a, b) = two_nodes(&store);

        let first = evaluate_and_commit(&store, a, b, "Employment", 0.95);
        assert_eq!(first.action, EdgeAction::Created);

        let weaker = evaluate_and_commit(&store, a, b, "Employment", 0.75);
        assert_eq!(weaker.action, EdgeAction::Duplicate);
        assert_eq!(weaker.relationship_id, first.relationship_id);
        assert!((weaker.final_strength - 0.95).abs() < 1e-12);
        assert_eq!(store.counts().relationships, 1);

        let stronger = evaluate_and_commit(&store, a, b, "Employment", 0.99);
        assert_eq!(stronger.action, EdgeAction::Updated);
        assert_eq!(stronger.relationship_id, first.relationship_id);
        let snap = store.snapshot();
        use coigraph_graph::GraphRead as _;
        let rel = snap.active_relationship(a, b, "Employment").unwrap();
        assert!((rel.strength - 0.99).abs() < 1e-12);
    }

    #[test]
    fn opposing_pair_conflict_is_written_with_penalty() {
        let store = GraphStore::new();
        let (attorney, techcorp) = two_nodes(&store);
        let mut tx = store.begin();
        let acme = tx.stage_node(NodeType::Company, "ACME Corporation", EntityClass::FactBased);
        store.commit(tx).unwrap();

        evaluate_and_commit(&store, attorney, techcorp, "Legal_Counsel", 0.9);
        let recon = evaluate_and_commit(&store, attorney, acme, "Opposing_Counsel", 0.8);

        assert_eq!(recon.action, EdgeAction::Conflict);
        assert!((recon.final_strength - 0.8 * PENALTY).abs() < 1e-12);
        let conflict = recon.conflict.unwrap();
        assert_eq!(conflict.actor, attorney);
        assert_eq!(conflict.existing_counterparty, techcorp);
        assert_eq!(conflict.proposed_counterparty, acme);

        // Written, not dropped.
        assert_eq!(store.counts().relationships, 2);
    }

    #[test]
    fn reproposal_does_not_erase_the_conflict_penalty() {
        let store = GraphStore::new();
        let (attorney, techcorp) = two_nodes(&store);
        let mut tx = store.begin();
        let acme = tx.stage_node(NodeType::Company, "ACME Corporation", EntityClass::FactBased);
        store.commit(tx).unwrap();

        evaluate_and_commit(&store, attorney, techcorp, "Legal_Counsel", 0.9);
        let first = evaluate_and_commit(&store, attorney, acme, "Opposing_Counsel", 0.8);
        assert_eq!(first.action, EdgeAction::Conflict);
        assert!((first.final_strength - 0.8 * PENALTY).abs() < 1e-12);

        // The identical fact again: compared at the penalized strength, so
        // it is absorbed instead of upgraded back to the raw 0.8.
        let again = evaluate_and_commit(&store, attorney, acme, "Opposing_Counsel", 0.8);
        assert_eq!(again.action, EdgeAction::Duplicate);
        assert!((again.final_strength - 0.8 * PENALTY).abs() < 1e-12);
        assert!(again.conflict.is_some());

        // A genuinely stronger repeat upgrades, but stays penalized.
        let stronger = evaluate_and_commit(&store, attorney, acme, "Opposing_Counsel", 0.9);
        assert_eq!(stronger.action, EdgeAction::Updated);
        assert!((stronger.final_strength - 0.9 * PENALTY).abs() < 1e-12);
        use coigraph_graph::GraphRead as _;
        let snap = store.snapshot();
        let rel = snap.active_relationship(attorney, acme, "Opposing_Counsel").unwrap();
        assert!((rel.strength - 0.9 * PENALTY).abs() < 1e-12);
    }

    #[test]
    fn opposing_role_held_through_a_link_still_conflicts() {
        let store = GraphStore::new();
        let mut tx = store.begin();
        let attorney = tx.stage_node(NodeType::Person, "Alice Chen", EntityClass::FactBased);
        let firm = tx.stage_node(NodeType::LawFirm, "Hartwell & Boone", EntityClass::FactBased);
        let techcorp =
            tx.stage_node(NodeType::Company, "TechCorp Industries", EntityClass::FactBased);
        let acme = tx.stage_node(NodeType::Company, "ACME Corporation", EntityClass::FactBased);
        tx.stage_relationship(attorney, firm, "Employment", 0.9, serde_json::Value::Null);
        tx.stage_relationship(firm, techcorp, "Legal_Counsel", 0.9, serde_json::Value::Null);
        store.commit(tx).unwrap();

        let recon = evaluate_and_commit(&store, attorney, acme, "Opposing_Counsel", 0.8);
        assert_eq!(recon.action, EdgeAction::Conflict);
        assert!((recon.final_strength - 0.8 * PENALTY).abs() < 1e-12);
        let conflict = recon.conflict.unwrap();
        assert_eq!(conflict.actor, firm);
        assert_eq!(conflict.existing_counterparty, techcorp);
        assert_eq!(conflict.existing_rel_type, "Legal_Counsel");
    }

    #[test]
    fn unrelated_types_never_conflict() {
        let store = GraphStore::new();
        let (a, b) = two_nodes(&store);
        let recon = evaluate_and_commit(&store, a, b, "Employment", 0.5);
        assert_eq!(recon.action, EdgeAction::Created);
        assert!(recon.conflict.is_none());
    }

    #[test]
    fn require_target_link_suppresses_unlinked_conflict() {
        let store = GraphStore::new();
        let (attorney, techcorp) = two_nodes(&store);
        let mut tx = store.begin();
        let acme = tx.stage_node(NodeType::Company, "ACME Corporation", EntityClass::FactBased);
        store.commit(tx).unwrap();

        evaluate_and_commit(&store, attorney, techcorp, "Legal_Counsel", 0.9);

        let mut rules = ConflictRules::default();
        rules.require_target_link = true;
        let mut tx = store.begin();
        let recon =
            evaluate(&mut tx, attorney, acme, "Opposing_Counsel", 0.8, &rules, PENALTY).unwrap();
        assert_eq!(recon.action, EdgeAction::Created);
        drop(tx);

        // Link the counterparties and the conflict fires.
        let mut tx = store.begin();
        tx.stage_relationship(acme, techcorp, "Subsidiary_Of", 1.0, serde_json::Value::Null);
        store.commit(tx).unwrap();
        let mut tx = store.begin();
        let recon =
            evaluate(&mut tx, attorney, acme, "Opposing_Counsel", 0.8, &rules, PENALTY).unwrap();
        assert_eq!(recon.action, EdgeAction::Conflict);
    }

    #[test]
    fn out_of_range_strength_is_rejected() {
        let store = GraphStore::new();
        let (a, b) = two_nodes(&store);
        let mut tx = store.begin();
        let err = evaluate(&mut tx, a, b, "Employment", 1.2, &ConflictRules::default(), PENALTY)
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
