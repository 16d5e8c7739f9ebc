//! Entity resolution: map a (type, name, attributes) mention onto a graph
//! node.
//!
//! Tiered cascade, first match wins:
//!
//! 1. **Exact**: normalized primary name equality, confidence 1.0.
//! 2. **Alias**: the mention matches a `NameAlias` attribute of a candidate,
//!    or a supplied alias matches a candidate's primary name. Confidence 0.9.
//! 3. **Fuzzy**: trigram similarity against primary names of the same type;
//!    scores below the floor are rejected, accepted scores scale
//!    monotonically into [0.4, 0.8]. Ties break by higher similarity, then
//!    earliest creation.
//! 4. **Create**: a new fact-based node at confidence 1.0.
//!
//! "No match" is never an error; only malformed input is. Resolution also
//! materializes the supplied attributes on the resolved node, deduplicated
//! by (type, normalized value).

use crate::classify::EntityClassifier;
use crate::error::{EngineError, Result};
use coigraph_graph::{
    normalize, trigram_similarity, AttributeId, AttributeType, EntityClass, GraphRead, Node,
    NodeId, NodeType, Transaction,
};
use serde::{Deserialize, Serialize};

/// Fuzzy-tier confidence band: accepted similarities map into this range.
const FUZZY_CONFIDENCE_MIN: f64 = 0.4;
const FUZZY_CONFIDENCE_MAX: f64 = 0.8;

/// How a mention was matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchReason {
    ExactNameMatch,
    AliasMatch,
    FuzzyMatch,
    NewEntity,
}

impl MatchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchReason::ExactNameMatch => "exact_name_match",
            MatchReason::AliasMatch => "alias_match",
            MatchReason::FuzzyMatch => "fuzzy_match",
            MatchReason::NewEntity => "new_entity",
        }
    }
}

/// An attribute supplied alongside a mention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeInput {
    pub attr_type: AttributeType,
    pub value: String,
    /// Defaults to 1.0 when omitted.
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Outcome of resolving one mention.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub node_id: NodeId,
    pub confidence: f64,
    pub reason: MatchReason,
    pub created: bool,
    /// Attributes newly materialized on the node by this resolution.
    pub new_attributes: Vec<AttributeId>,
}

/// Resolve a mention inside the given transaction.
///
/// `fuzzy_floor` is the similarity below which the fuzzy tier rejects; the
/// classifier may rewrite the proposed type before any matching happens.
pub fn resolve(
    tx: &mut Transaction,
    node_type: NodeType,
    name: &str,
    attrs: &[AttributeInput],
    fuzzy_floor: f64,
    classifier: &dyn EntityClassifier,
    attribution_source: &str,
) -> Result<Resolution> {
    let normalized = normalize(name);
    if normalized.is_empty() {
        return Err(EngineError::Validation(format!(
            "entity name normalizes to empty: {name:?}"
        )));
    }
    let effective_type = classifier.classify(node_type, name);
    if effective_type != node_type {
        tracing::debug!(
            proposed = %node_type,
            effective = %effective_type,
            name,
            "classifier rewrote entity type"
        );
    }

    // Tier 1: exact normalized-name match.
    if let Some(node) = earliest(tx.active_nodes_by_name(effective_type, &normalized)) {
        let new_attributes = materialize_attributes(tx, node.id, attrs, attribution_source);
        return Ok(Resolution {
            node_id: node.id,
            confidence: 1.0,
            reason: MatchReason::ExactNameMatch,
            created: false,
            new_attributes,
        });
    }

    // Tier 2: alias match, both directions.
    let mut alias_candidates = tx.active_nodes_by_alias(effective_type, &normalized);
    for attr in attrs {
        if attr.attr_type != AttributeType::NameAlias {
            continue;
        }
        let alias_norm = normalize(&attr.value);
        if alias_norm.is_empty() {
            continue;
        }
        alias_candidates.extend(tx.active_nodes_by_name(effective_type, &alias_norm));
    }
    if let Some(node) = earliest(alias_candidates) {
        let new_attributes = materialize_attributes(tx, node.id, attrs, attribution_source);
        return Ok(Resolution {
            node_id: node.id,
            confidence: 0.9,
            reason: MatchReason::AliasMatch,
            created: false,
            new_attributes,
        });
    }

    // Tier 3: fuzzy match over primary names of the same type.
    let mut best: Option<(f64, Node)> = None;
    for candidate in tx.active_nodes_of_type(effective_type) {
        let similarity = trigram_similarity(&normalized, &candidate.normalized_name);
        if similarity < fuzzy_floor {
            continue;
        }
        let better = match &best {
            None => true,
            // Higher similarity wins; equal similarity goes to the earlier
            // node (ids are creation-ordered).
            Some((s, n)) => similarity > *s || (similarity == *s && candidate.id < n.id),
        };
        if better {
            best = Some((similarity, candidate));
        }
    }
    if let Some((similarity, node)) = best {
        let confidence = scale_fuzzy_confidence(similarity, fuzzy_floor);
        let new_attributes = materialize_attributes(tx, node.id, attrs, attribution_source);
        return Ok(Resolution {
            node_id: node.id,
            confidence,
            reason: MatchReason::FuzzyMatch,
            created: false,
            new_attributes,
        });
    }

    // Tier 4: create a fact-based node.
    let node_id = tx.stage_node(effective_type, name, EntityClass::FactBased);
    let new_attributes = materialize_attributes(tx, node_id, attrs, attribution_source);
    Ok(Resolution {
        node_id,
        confidence: 1.0,
        reason: MatchReason::NewEntity,
        created: true,
        new_attributes,
    })
}

/// Map a similarity in `[floor, 1]` monotonically into the fuzzy band.
fn scale_fuzzy_confidence(similarity: f64, floor: f64) -> f64 {
    let span = (1.0 - floor).max(f64::EPSILON);
    let t = ((similarity - floor) / span).clamp(0.0, 1.0);
    FUZZY_CONFIDENCE_MIN + t * (FUZZY_CONFIDENCE_MAX - FUZZY_CONFIDENCE_MIN)
}

fn earliest(mut nodes: Vec<Node>) -> Option<Node> {
    nodes.sort_by_key(|n| n.id);
    nodes.into_iter().next()
}

/// Stage the supplied attributes on `node_id`, deduplicated by
/// (attr_type, normalized value) against both existing attributes and the
/// rest of the input list.
fn materialize_attributes(
    tx: &mut Transaction,
    node_id: NodeId,
    attrs: &[AttributeInput],
    attribution_source: &str,
) -> Vec<AttributeId> {
    let mut seen: Vec<(AttributeType, String)> = tx
        .attributes_of(node_id)
        .into_iter()
        .map(|a| (a.attr_type, a.normalized_value))
        .collect();
    let mut staged = Vec::new();
    for attr in attrs {
        let normalized_value = normalize(&attr.value);
        if normalized_value.is_empty() {
            continue;
        }
        let key = (attr.attr_type.clone(), normalized_value);
        if seen.contains(&key) {
            continue;
        }
        let id = tx.stage_attribute(
            node_id,
            attr.attr_type.clone(),
            &attr.value,
            attr.confidence.unwrap_or(1.0),
            attribution_source,
        );
        seen.push(key);
        staged.push(id);
    }
    staged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::TypeAsGiven;
    use coigraph_graph::GraphStore;

    const FLOOR: f64 = 0.3;

    fn resolve_in(
        store: &GraphStore,
        node_type: NodeType,
        name: &str,
        attrs: &[AttributeInput],
    ) -> Resolution {
        let mut tx = store.begin();
        let res = resolve(&mut tx, node_type, name, attrs, FLOOR, &TypeAsGiven, "test").unwrap();
        store.commit(tx).unwrap();
        res
    }

    #[test]
    fn same_name_twice_yields_same_node_at_full_confidence() {
        let store = GraphStore::new();
        let first = resolve_in(&store, NodeType::Person, "John Smith", &[]);
        assert_eq!(first.reason, MatchReason::NewEntity);
        assert!(first.created);

        let second = resolve_in(&store, NodeType::Person, "John Smith", &[]);
        assert_eq!(second.node_id, first.node_id);
        assert_eq!(second.reason, MatchReason::ExactNameMatch);
        assert!((second.confidence - 1.0).abs() < 1e-12);
        assert!(!second.created);
    }

    #[test]
    fn different_types_do_not_collide() {
        let store = GraphStore::new();
        let person = resolve_in(&store, NodeType::Person, "Jordan", &[]);
        let company = resolve_in(&store, NodeType::Company, "Jordan", &[]);
        assert_ne!(person.node_id, company.node_id);
        assert_eq!(company.reason, MatchReason::NewEntity);
    }

    #[test]
    fn alias_resolution_is_symmetric() {
        let store = GraphStore::new();
        let canonical = resolve_in(
            &store,
            NodeType::Person,
            "John Smith",
            &[AttributeInput {
                attr_type: AttributeType::NameAlias,
                value: "J. Smith".to_string(),
                confidence: None,
            }],
        );

        // Input is the alias of an existing node.
        let by_alias = resolve_in(&store, NodeType::Person, "J. Smith", &[]);
        assert_eq!(by_alias.node_id, canonical.node_id);
        assert_eq!(by_alias.reason, MatchReason::AliasMatch);
        assert!((by_alias.confidence - 0.9).abs() < 1e-12);

        // Supplied alias matches an existing primary name.
        let store2 = GraphStore::new();
        let plain = resolve_in(&store2, NodeType::Person, "John Smith", &[]);
        let with_alias = resolve_in(
            &store2,
            NodeType::Person,
            "Jonathan Smith III",
            &[AttributeInput {
                attr_type: AttributeType::NameAlias,
                value: "John Smith".to_string(),
                confidence: None,
            }],
        );
        assert_eq!(with_alias.node_id, plain.node_id);
        assert_eq!(with_alias.reason, MatchReason::AliasMatch);
    }

    #[test]
    fn fuzzy_match_lands_in_band_and_scales() {
        let store = GraphStore::new();
        resolve_in(&store, NodeType::Company, "TechCorp Industries", &[]);

        let close = resolve_in(&store, NodeType::Company, "TechCorp Industry", &[]);
        assert_eq!(close.reason, MatchReason::FuzzyMatch);
        assert!(close.confidence >= FUZZY_CONFIDENCE_MIN);
        assert!(close.confidence <= FUZZY_CONFIDENCE_MAX);
    }

    #[test]
    fn below_floor_creates_instead_of_matching() {
        let store = GraphStore::new();
        resolve_in(&store, NodeType::Company, "TechCorp Industries", &[]);
        let unrelated = resolve_in(&store, NodeType::Company, "Global Shipping Lines", &[]);
        assert_eq!(unrelated.reason, MatchReason::NewEntity);
    }

    #[test]
    fn attributes_deduplicate_by_type_and_normalized_value() {
        let store = GraphStore::new();
        let attrs = [
            AttributeInput {
                attr_type: AttributeType::NameAlias,
                value: "J. Smith".to_string(),
                confidence: None,
            },
            AttributeInput {
                attr_type: AttributeType::NameAlias,
                value: "j smith".to_string(), // same after normalization
                confidence: None,
            },
            AttributeInput {
                attr_type: AttributeType::Title,
                value: "Attorney".to_string(),
                confidence: Some(0.8),
            },
        ];
        let first = resolve_in(&store, NodeType::Person, "John Smith", &attrs);
        assert_eq!(first.new_attributes.len(), 2);

        // Re-resolving with the same attributes stages nothing new.
        let second = resolve_in(&store, NodeType::Person, "John Smith", &attrs);
        assert!(second.new_attributes.is_empty());
    }

    #[test]
    fn empty_name_is_a_validation_error() {
        let store = GraphStore::new();
        let mut tx = store.begin();
        let err =
            resolve(&mut tx, NodeType::Person, "  --  ", &[], FLOOR, &TypeAsGiven, "test")
                .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn fuzzy_scaling_is_monotonic() {
        let a = scale_fuzzy_confidence(0.3, 0.3);
        let b = scale_fuzzy_confidence(0.6, 0.3);
        let c = scale_fuzzy_confidence(1.0, 0.3);
        assert!(a < b && b < c);
        assert!((a - FUZZY_CONFIDENCE_MIN).abs() < 1e-12);
        assert!((c - FUZZY_CONFIDENCE_MAX).abs() < 1e-12);
    }
}
