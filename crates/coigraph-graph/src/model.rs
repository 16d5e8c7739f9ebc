//! Core data model for the entity graph.
//!
//! Everything here is a plain serde-derived record; behavior lives in the
//! store and the engine. Identifiers are UUID newtypes so a relationship id
//! can never be passed where a node id is expected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! id_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_newtype!(
    /// Identifier of a graph node.
    NodeId
);
id_newtype!(
    /// Identifier of a directed relationship.
    RelationshipId
);
id_newtype!(
    /// Identifier of a node attribute.
    AttributeId
);
id_newtype!(
    /// Identifier of a provenance record.
    ProvenanceId
);
id_newtype!(
    /// Identifier of a change-history row.
    ChangeId
);

// ============================================================================
// Nodes
// ============================================================================

/// Kind of real-world entity a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Person,
    Company,
    LawFirm,
    Address,
    ZipCode,
    City,
    County,
    State,
    Country,
    Thing,
    Event,
}

impl NodeType {
    pub const ALL: [NodeType; 11] = [
        NodeType::Person,
        NodeType::Company,
        NodeType::LawFirm,
        NodeType::Address,
        NodeType::ZipCode,
        NodeType::City,
        NodeType::County,
        NodeType::State,
        NodeType::Country,
        NodeType::Thing,
        NodeType::Event,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Person => "Person",
            NodeType::Company => "Company",
            NodeType::LawFirm => "LawFirm",
            NodeType::Address => "Address",
            NodeType::ZipCode => "ZipCode",
            NodeType::City => "City",
            NodeType::County => "County",
            NodeType::State => "State",
            NodeType::Country => "Country",
            NodeType::Thing => "Thing",
            NodeType::Event => "Event",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        NodeType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().to_ascii_lowercase() == needle)
            .ok_or_else(|| format!("unknown node type: {s}"))
    }
}

/// Whether a node is a canonical authority record or was discovered from a
/// source.
///
/// Reference-class nodes are singletons: the store enforces that at most one
/// Active node exists per (type, normalized name). Fact-based nodes may carry
/// near-duplicates; resolution, never the schema, reconciles those.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityClass {
    /// Canonical singleton authority record.
    Reference,
    /// Discovered from an arbitrary source; duplicates tolerated.
    FactBased,
}

/// Lifecycle status shared by nodes, relationships, and attributes.
///
/// There are no hard deletes in normal operation: retiring a record means
/// flipping it to `Inactive`. `Merged` marks the loser of a duplicate-node
/// merge whose dependents were repointed before removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    Active,
    Inactive,
    Merged,
}

impl RecordStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, RecordStatus::Active)
    }
}

/// A canonical graph entity (person, company, place, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub node_type: NodeType,
    /// Primary display name, as supplied.
    pub name: String,
    /// Canonicalized name used for all comparisons.
    pub normalized_name: String,
    pub entity_class: EntityClass,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Relationships
// ============================================================================

/// A directed, typed, weighted edge between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelationshipId,
    pub source: NodeId,
    pub target: NodeId,
    pub rel_type: String,
    /// Edge weight in `[0, 1]`.
    pub strength: f64,
    /// Optional real-world validity window.
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Relationship {
    /// The endpoint opposite `node`, if `node` is an endpoint at all.
    pub fn other_endpoint(&self, node: NodeId) -> Option<NodeId> {
        if self.source == node {
            Some(self.target)
        } else if self.target == node {
            Some(self.source)
        } else {
            None
        }
    }
}

// ============================================================================
// Attributes
// ============================================================================

/// Typed key/value fact attached to a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeType {
    /// Alternate name; the only attribute type that participates in entity
    /// resolution.
    NameAlias,
    Title,
    ComputedFirstName,
    ComputedSurname,
    Geometry,
    FipsCode,
    Other(String),
}

impl AttributeType {
    pub fn is_resolution_relevant(&self) -> bool {
        matches!(self, AttributeType::NameAlias)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub id: AttributeId,
    pub node_id: NodeId,
    pub attr_type: AttributeType,
    pub value: String,
    /// Canonicalized value; dedup key together with `attr_type`.
    pub normalized_value: String,
    pub confidence: f64,
    pub source: String,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Provenance
// ============================================================================

/// Which kind of asset a provenance record or change row points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetType {
    Node,
    Relationship,
    Attribute,
}

/// Human-review state of a provenance record. Review is additive metadata:
/// it never mutates the original source attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewStatus {
    Pending,
    Reviewed,
    Verified,
    Disputed,
    Corrected,
}

/// A later confidence/reliability assessment appended to a provenance record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRevision {
    pub confidence_score: f64,
    pub reliability_rating: f64,
    pub annotated_at: DateTime<Utc>,
    pub note: Option<String>,
}

/// A reviewer's verdict, attached without touching source fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewAnnotation {
    pub status: ReviewStatus,
    pub reviewer: String,
    pub notes: Option<String>,
    pub reviewed_at: DateTime<Utc>,
}

/// Source attribution for a single graph mutation.
///
/// Never deleted and never overwritten: later assessments land in
/// `revisions`, reviewer verdicts in `reviews`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub id: ProvenanceId,
    pub asset_type: AssetType,
    pub asset_id: Uuid,
    pub source_name: String,
    pub source_type: String,
    pub confidence_score: f64,
    pub reliability_rating: f64,
    pub review_status: ReviewStatus,
    pub notes: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub revisions: Vec<ProvenanceRevision>,
    #[serde(default)]
    pub reviews: Vec<ReviewAnnotation>,
}

// ============================================================================
// Change history
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOperation {
    Insert,
    Update,
    Merge,
}

/// Append-only audit row for one mutated field (or one inserted record).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: ChangeId,
    pub table: AssetType,
    pub operation: ChangeOperation,
    pub asset_id: Uuid,
    /// Field name for updates; `None` for whole-record inserts.
    pub field: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub provenance_id: Option<ProvenanceId>,
}
