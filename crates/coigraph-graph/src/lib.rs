//! Coigraph entity graph: data model and transactional in-memory store.
//!
//! This crate holds the storage half of the conflict-of-interest ingestion
//! engine:
//!
//! - **Model**: nodes, directed weighted relationships, attributes,
//!   provenance records, and the append-only change history.
//! - **Normalizer**: deterministic name canonicalization plus trigram
//!   similarity for the fuzzy resolution tier.
//! - **Store**: snapshot-isolated transactions over shared in-memory state,
//!   with commit-time uniqueness constraints so concurrent writers are
//!   serialized by the data, not by caller-side locking.
//!
//! The resolution/reconciliation/traversal logic lives in `coigraph-engine`;
//! this crate only promises that what it is asked to write either commits
//! atomically or leaves no trace.

pub mod id;
pub mod model;
pub mod normalize;
pub mod store;

pub use id::{IdGenerator, UuidV7Generator};
pub use model::{
    AssetType, Attribute, AttributeId, AttributeType, ChangeId, ChangeOperation, ChangeRecord,
    EntityClass, Node, NodeId, NodeType, Provenance, ProvenanceId, ProvenanceRevision,
    RecordStatus, Relationship, RelationshipId, ReviewAnnotation, ReviewStatus,
};
pub use normalize::{normalize, trigram_similarity};
pub use store::{GraphRead, GraphStore, MergeReport, Snapshot, StoreCounts, StoreError, Transaction};
