//! Conflict-of-interest fact-ingestion engine.
//!
//! Sits on top of [`coigraph_graph`] and turns raw "A relates to B" claims
//! into a deduplicated, provenance-tracked entity graph:
//!
//! - **resolver**: tiered entity resolution (exact, alias, fuzzy, create)
//! - **reconciler**: duplicate/upgrade/conflict handling for proposed edges
//! - **paths**: bounded multi-degree traversal between entities
//! - **matrix**: TTL-cached conflict pairs, so repeat proposals skip walks
//! - **provenance**: source attribution and append-only audit rows
//! - **ingest**: the [`Engine`] composing all of it into one atomic
//!   `propose_fact`
//!
//! Ambiguity is not an error here: a weak match resolves with low
//! confidence, a detected conflict still commits its (penalized) edge, and
//! the caller decides what to do with the report.

pub mod catalog;
pub mod classify;
pub mod error;
pub mod ingest;
pub mod matrix;
pub mod paths;
pub mod provenance;
pub mod reconciler;
pub mod resolver;

pub use catalog::SourceCatalog;
pub use classify::{EntityClassifier, PersonNameHeuristic, TypeAsGiven};
pub use error::{EngineError, Result};
pub use ingest::{
    ConflictReport, Engine, EngineConfig, EntityMention, FactProposal, ProposalOutcome,
    ProposalStatus, ResolutionSummary,
};
pub use matrix::{ConflictEntry, ConflictMatrix};
pub use paths::{paths_between, strongest_path, HopDirection, PathHop, PathResult};
pub use provenance::SourceAttribution;
pub use reconciler::{
    opposing_holdings, ConflictRules, DirectConflict, EdgeAction, OpposingHolding, Reconciliation,
};
pub use resolver::{AttributeInput, MatchReason, Resolution};
