//! Fact-ingestion orchestrator.
//!
//! `Engine::propose_fact` is the one write path: it resolves both entity
//! mentions, reconciles the proposed relationship, detects conflicts,
//! attaches provenance and audit rows, and commits all of it in a single
//! transaction. A proposal either lands completely or not at all.
//!
//! Concurrency is resolved by the data, not by locks held across the
//! operation: when a racing writer wins a uniqueness constraint at commit,
//! the whole proposal re-runs and the resolution tiers find the survivor.

use crate::catalog::SourceCatalog;
use crate::classify::{EntityClassifier, TypeAsGiven};
use crate::error::{EngineError, Result};
use crate::matrix::{ConflictEntry, ConflictMatrix};
use crate::paths::{paths_between, strongest_path, PathResult};
use crate::provenance::{self, SourceAttribution};
use crate::reconciler::{self, ConflictRules, EdgeAction};
use crate::resolver::{self, AttributeInput, Resolution};
use chrono::Duration;
use coigraph_graph::{
    AssetType, AttributeType, GraphRead, GraphStore, MergeReport, Node, NodeId, NodeType,
    ProvenanceId, RelationshipId, ReviewStatus, Snapshot, StoreError, Transaction,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// Configuration
// ============================================================================

/// Tunables for one engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Similarity below which fuzzy matching refuses to resolve.
    pub fuzzy_floor: f64,
    /// Strength multiplier applied to an edge written under conflict.
    pub conflict_penalty: f64,
    /// Per-degree decay of multi-degree conflict severity.
    pub degree_decay: f64,
    /// Maximum traversal depth for conflict paths.
    pub max_degree: usize,
    /// Freshness window of conflict-matrix entries, in minutes.
    pub matrix_ttl_minutes: i64,
    /// Commit retries before a constraint race becomes a system error.
    pub commit_retries: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fuzzy_floor: 0.3,
            conflict_penalty: 0.7,
            degree_decay: 0.85,
            max_degree: 3,
            matrix_ttl_minutes: 60,
            commit_retries: 3,
        }
    }
}

// ============================================================================
// Proposal input
// ============================================================================

/// One entity mention inside a proposed fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMention {
    pub entity_type: NodeType,
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<AttributeInput>,
}

impl EntityMention {
    pub fn new(entity_type: NodeType, name: &str) -> Self {
        Self {
            entity_type,
            name: name.to_string(),
            attributes: Vec::new(),
        }
    }
}

/// A complete proposed fact: source --rel_type--> target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactProposal {
    pub source: EntityMention,
    pub target: EntityMention,
    pub rel_type: String,
    pub strength: f64,
    pub attribution: SourceAttribution,
}

// ============================================================================
// Proposal outcome
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalStatus {
    Success,
    ConflictsDetected,
}

/// How one mention resolved, reported back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionSummary {
    pub node_id: NodeId,
    pub name: String,
    pub match_reason: String,
    pub confidence: f64,
    pub created: bool,
}

impl ResolutionSummary {
    fn from_resolution(res: &Resolution, view: &impl GraphRead) -> Self {
        let name = view
            .node(res.node_id)
            .map(|n| n.name)
            .unwrap_or_default();
        Self {
            node_id: res.node_id,
            name,
            match_reason: res.reason.as_str().to_string(),
            confidence: res.confidence,
            created: res.created,
        }
    }
}

/// One detected conflict-of-interest, any degree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictReport {
    /// Order-independent opposing-pair label.
    pub conflict_type: String,
    /// Node holding the opposing relationship: the proposal's source, or a
    /// node one hop from it.
    pub actor: NodeId,
    pub existing_counterparty: NodeId,
    pub proposed_counterparty: NodeId,
    /// 0 = bare coexistence of opposing roles; >= 1 = counterparties
    /// connected through a path of that many hops.
    pub degree: usize,
    /// Graded severity in [0, 1].
    pub severity: f64,
    /// Node chain connecting the counterparties, empty for degree 0.
    pub via: Vec<NodeId>,
    pub from_cache: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalOutcome {
    pub status: ProposalStatus,
    pub source: ResolutionSummary,
    pub target: ResolutionSummary,
    pub relationship_id: RelationshipId,
    pub edge_action: EdgeAction,
    pub final_strength: f64,
    /// Weakest link of the whole proposal: min of both resolution
    /// confidences and the attribution confidence.
    pub overall_confidence: f64,
    pub conflicts: Vec<ConflictReport>,
    /// Provenance attached to the relationship, when one was written or
    /// upgraded this call.
    pub relationship_provenance: Option<ProvenanceId>,
}

// ============================================================================
// Engine
// ============================================================================

pub struct Engine {
    store: GraphStore,
    config: EngineConfig,
    rules: ConflictRules,
    catalog: SourceCatalog,
    matrix: ConflictMatrix,
    classifier: Box<dyn EntityClassifier>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let ttl = Duration::minutes(config.matrix_ttl_minutes);
        Self {
            store: GraphStore::new(),
            config,
            rules: ConflictRules::default(),
            catalog: SourceCatalog::default(),
            matrix: ConflictMatrix::new(ttl),
            classifier: Box::new(TypeAsGiven),
        }
    }

    pub fn with_rules(mut self, rules: ConflictRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_catalog(mut self, catalog: SourceCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_classifier(mut self, classifier: Box<dyn EntityClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    /// Ingest one proposed fact atomically.
    pub fn propose_fact(&self, proposal: &FactProposal) -> Result<ProposalOutcome> {
        proposal.attribution.validate()?;

        let mut attempt = 0;
        loop {
            let (tx, outcome, fresh_conflicts) = self.build_proposal(proposal)?;
            match self.store.commit(tx) {
                Ok(()) => {
                    // Only cache what actually landed.
                    for (entry_a, entry_b, label, path) in fresh_conflicts {
                        self.matrix.record(
                            entry_a,
                            entry_b,
                            &label,
                            path.strength,
                            path.degree,
                            path.nodes(),
                        );
                    }
                    tracing::info!(
                        source = %outcome.source.node_id,
                        target = %outcome.target.node_id,
                        rel_type = %proposal.rel_type,
                        action = outcome.edge_action.as_str(),
                        conflicts = outcome.conflicts.len(),
                        "fact ingested"
                    );
                    return Ok(outcome);
                }
                Err(err) if err.is_commit_conflict() && attempt < self.config.commit_retries => {
                    attempt += 1;
                    tracing::debug!(%err, attempt, "commit lost a constraint race, re-running");
                }
                Err(err) if err.is_commit_conflict() => {
                    return Err(EngineError::System(format!(
                        "retry budget exhausted after {attempt} attempts: {err}"
                    )));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Resolve, reconcile, and stage one proposal into a fresh transaction.
    #[allow(clippy::type_complexity)]
    fn build_proposal(
        &self,
        proposal: &FactProposal,
    ) -> Result<(
        Transaction,
        ProposalOutcome,
        Vec<(NodeId, NodeId, String, PathResult)>,
    )> {
        let mut tx = self.store.begin();

        let src = resolver::resolve(
            &mut tx,
            proposal.source.entity_type,
            &proposal.source.name,
            &proposal.source.attributes,
            self.config.fuzzy_floor,
            self.classifier.as_ref(),
            &proposal.attribution.source_name,
        )?;
        let tgt = resolver::resolve(
            &mut tx,
            proposal.target.entity_type,
            &proposal.target.name,
            &proposal.target.attributes,
            self.config.fuzzy_floor,
            self.classifier.as_ref(),
            &proposal.attribution.source_name,
        )?;
        if src.node_id == tgt.node_id {
            return Err(EngineError::Validation(format!(
                "source and target resolve to the same entity: {:?}",
                proposal.source.name
            )));
        }

        let recon = reconciler::evaluate(
            &mut tx,
            src.node_id,
            tgt.node_id,
            &proposal.rel_type,
            proposal.strength,
            &self.rules,
            self.config.conflict_penalty,
        )?;

        self.stage_audit(&mut tx, proposal, &src, &tgt, &recon);
        let relationship_provenance = self.stage_relationship_provenance(&mut tx, proposal, &recon);

        let (conflicts, fresh) = self.detect_conflicts(&tx, &src, &tgt, &proposal.rel_type, &recon);

        let (attr_confidence, _) = proposal.attribution.effective(&self.catalog);
        let overall_confidence = src
            .confidence
            .min(tgt.confidence)
            .min(attr_confidence);
        let status = if conflicts.is_empty() {
            ProposalStatus::Success
        } else {
            ProposalStatus::ConflictsDetected
        };
        let outcome = ProposalOutcome {
            status,
            source: ResolutionSummary::from_resolution(&src, &tx),
            target: ResolutionSummary::from_resolution(&tgt, &tx),
            relationship_id: recon.relationship_id,
            edge_action: recon.action,
            final_strength: recon.final_strength,
            overall_confidence,
            conflicts,
            relationship_provenance,
        };
        Ok((tx, outcome, fresh))
    }

    /// Provenance and change rows for resolved entities and their attributes.
    fn stage_audit(
        &self,
        tx: &mut Transaction,
        proposal: &FactProposal,
        src: &Resolution,
        tgt: &Resolution,
        recon: &reconciler::Reconciliation,
    ) {
        let actor = &proposal.attribution.source_name;
        for res in [src, tgt] {
            if res.created {
                let prov = provenance::attach(
                    tx,
                    AssetType::Node,
                    res.node_id.as_uuid(),
                    &proposal.attribution,
                    &self.catalog,
                );
                provenance::record_insert(tx, AssetType::Node, res.node_id.as_uuid(), actor, Some(prov));
            }
            for attr_id in &res.new_attributes {
                let prov = provenance::attach(
                    tx,
                    AssetType::Attribute,
                    attr_id.as_uuid(),
                    &proposal.attribution,
                    &self.catalog,
                );
                provenance::record_insert(tx, AssetType::Attribute, attr_id.as_uuid(), actor, Some(prov));
            }
        }
        if let (EdgeAction::Updated, Some(previous)) = (recon.action, recon.previous_strength) {
            provenance::record_update(
                tx,
                AssetType::Relationship,
                recon.relationship_id.as_uuid(),
                "strength",
                &previous.to_string(),
                &recon.final_strength.to_string(),
                actor,
                None,
            );
        }
    }

    fn stage_relationship_provenance(
        &self,
        tx: &mut Transaction,
        proposal: &FactProposal,
        recon: &reconciler::Reconciliation,
    ) -> Option<ProvenanceId> {
        match recon.action {
            // Duplicates write nothing; the existing provenance stands.
            EdgeAction::Duplicate => None,
            EdgeAction::Created | EdgeAction::Conflict | EdgeAction::Updated => {
                let prov = provenance::attach(
                    tx,
                    AssetType::Relationship,
                    recon.relationship_id.as_uuid(),
                    &proposal.attribution,
                    &self.catalog,
                );
                if recon.action != EdgeAction::Updated {
                    provenance::record_insert(
                        tx,
                        AssetType::Relationship,
                        recon.relationship_id.as_uuid(),
                        &proposal.attribution.source_name,
                        Some(prov),
                    );
                }
                Some(prov)
            }
        }
    }

    /// Full conflict scan for the proposed edge: degree-0 coexistence plus
    /// bounded path conflicts between the counterparties. Opposing holdings
    /// count whether the source holds them itself or through a direct link
    /// (an attorney inherits their firm's engagements). Returns the reports
    /// and the entries to cache if the transaction commits.
    fn detect_conflicts(
        &self,
        tx: &Transaction,
        src: &Resolution,
        tgt: &Resolution,
        rel_type: &str,
        recon: &reconciler::Reconciliation,
    ) -> (
        Vec<ConflictReport>,
        Vec<(NodeId, NodeId, String, PathResult)>,
    ) {
        let Some(opposing) = self.rules.opposing_of(rel_type) else {
            return (Vec::new(), Vec::new());
        };
        let label = self.rules.conflict_label(rel_type, opposing);
        let e2 = recon.final_strength;

        let holdings = reconciler::opposing_holdings(
            tx,
            src.node_id,
            tgt.node_id,
            opposing,
            Some(recon.relationship_id),
        );

        let mut reports = Vec::new();
        let mut fresh = Vec::new();
        for held in holdings {
            // Holdings through a link are discounted by the link's strength.
            let e1 = held.strength * held.link_strength;
            let report_base = |degree, severity, via, from_cache| ConflictReport {
                conflict_type: label.clone(),
                actor: held.holder,
                existing_counterparty: held.counterparty,
                proposed_counterparty: tgt.node_id,
                degree,
                severity,
                via,
                from_cache,
            };

            // Degree 0: both roles are held, linked counterparties or not.
            if !self.rules.require_target_link {
                let severity = e1 * e2 * self.config.conflict_penalty;
                reports.push(report_base(0, severity, Vec::new(), false));
            }

            // Degree 1 is always checked live against the current view.
            let direct = strongest_path(
                tx,
                held.counterparty,
                tgt.node_id,
                1,
                Some(recon.relationship_id),
            );
            if let Some(path) = direct {
                reports.push(report_base(
                    1,
                    self.path_severity(e1, e2, &path),
                    path.nodes(),
                    false,
                ));
                fresh.push((held.counterparty, tgt.node_id, label.clone(), path));
                continue;
            }

            // Deeper degrees go through the matrix before any traversal.
            if let Some(hit) = self.matrix.lookup(held.counterparty, tgt.node_id, &label) {
                if hit.degree >= 1 {
                    let severity = e1
                        * e2
                        * hit.path_strength
                        * self.config.conflict_penalty
                        * self.config.degree_decay.powi(hit.degree as i32 - 1);
                    reports.push(report_base(hit.degree, severity, hit.via.clone(), true));
                }
                continue;
            }
            let deeper = strongest_path(
                tx,
                held.counterparty,
                tgt.node_id,
                self.config.max_degree,
                Some(recon.relationship_id),
            );
            if let Some(path) = deeper {
                reports.push(report_base(
                    path.degree,
                    self.path_severity(e1, e2, &path),
                    path.nodes(),
                    false,
                ));
                fresh.push((held.counterparty, tgt.node_id, label.clone(), path));
            }
        }
        (reports, fresh)
    }

    fn path_severity(&self, e1: f64, e2: f64, path: &PathResult) -> f64 {
        e1 * e2
            * path.strength
            * self.config.conflict_penalty
            * self.config.degree_decay.powi(path.degree as i32 - 1)
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Merge a duplicate entity into a canonical one and drop cached
    /// conflicts that may reference it.
    pub fn merge_entities(
        &self,
        canonical: NodeId,
        duplicate: NodeId,
        actor: &str,
    ) -> Result<MergeReport> {
        let report = self
            .store
            .merge_nodes(canonical, duplicate, actor)
            .map_err(|e| match e {
                StoreError::UnknownNode(id) => {
                    EngineError::Validation(format!("unknown entity: {id}"))
                }
                other => other.into(),
            })?;
        self.matrix.invalidate_node(duplicate);
        self.matrix.invalidate_node(canonical);
        Ok(report)
    }

    /// Rebuild the whole conflict matrix from a fresh traversal.
    ///
    /// Every cached entry is discarded, then every opposing-pair holding in
    /// the graph is re-walked and the strongest connecting path between its
    /// counterparties cached again. The matrix stays a derived structure:
    /// nothing survives a rebuild that traversal cannot reproduce. Returns
    /// the number of cached conflicts afterward.
    pub fn refresh_matrix(&self) -> usize {
        let snap = self.store.snapshot();
        self.matrix.clear();
        for node in self.entities(None) {
            self.refresh_actor(&snap, node.id);
        }
        tracing::info!(entries = self.matrix.len(), "conflict matrix rebuilt");
        self.matrix.len()
    }

    /// Recompute cached conflicts around one entity after its edges changed.
    ///
    /// Entries touching the node are dropped, then the node and its direct
    /// links are re-walked. Returns the number of cached conflicts afterward.
    pub fn refresh_matrix_for(&self, node: NodeId) -> usize {
        let snap = self.store.snapshot();
        self.matrix.invalidate_node(node);
        self.refresh_actor(&snap, node);
        for rel in snap.relationships_of(node) {
            if let Some(peer) = rel.other_endpoint(node) {
                self.refresh_actor(&snap, peer);
            }
        }
        self.matrix.len()
    }

    /// Re-walk one actor's opposing holdings and cache the connecting paths,
    /// mirroring what `propose_fact` caches when it detects them.
    fn refresh_actor(&self, snap: &Snapshot, actor: NodeId) {
        let outgoing: Vec<_> = snap
            .relationships_of(actor)
            .into_iter()
            .filter(|r| r.source == actor)
            .collect();
        for edge in &outgoing {
            let Some(opposing) = self.rules.opposing_of(&edge.rel_type) else {
                continue;
            };
            let label = self.rules.conflict_label(&edge.rel_type, opposing);
            for held in
                reconciler::opposing_holdings(snap, actor, edge.target, opposing, Some(edge.id))
            {
                let path = strongest_path(
                    snap,
                    held.counterparty,
                    edge.target,
                    self.config.max_degree,
                    Some(edge.id),
                );
                if let Some(path) = path {
                    self.matrix.record(
                        held.counterparty,
                        edge.target,
                        &label,
                        path.strength,
                        path.degree,
                        path.nodes(),
                    );
                }
            }
        }
    }

    /// Append a reviewer verdict to a provenance record.
    pub fn review_provenance(
        &self,
        provenance_id: ProvenanceId,
        status: ReviewStatus,
        reviewer: &str,
        notes: Option<String>,
    ) -> Result<()> {
        let mut tx = self.store.begin();
        provenance::review(&mut tx, provenance_id, status, reviewer, notes)?;
        self.store.commit(tx).map_err(|e| match e {
            StoreError::UnknownProvenance(id) => {
                EngineError::Validation(format!("unknown provenance record: {id}"))
            }
            other => other.into(),
        })
    }

    /// Append a confidence reassessment to a provenance record.
    pub fn revise_provenance(
        &self,
        provenance_id: ProvenanceId,
        confidence: f64,
        reliability: f64,
        note: Option<String>,
    ) -> Result<()> {
        let mut tx = self.store.begin();
        provenance::revise(&mut tx, provenance_id, confidence, reliability, note)?;
        self.store.commit(tx).map_err(|e| match e {
            StoreError::UnknownProvenance(id) => {
                EngineError::Validation(format!("unknown provenance record: {id}"))
            }
            other => other.into(),
        })
    }

    // ------------------------------------------------------------------
    // Read queries
    // ------------------------------------------------------------------

    /// Point-in-time read view of the graph.
    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    /// All active entities, optionally filtered by type, sorted by name.
    pub fn entities(&self, node_type: Option<NodeType>) -> Vec<Node> {
        let snap = self.store.snapshot();
        let mut out: Vec<Node> = match node_type {
            Some(t) => snap.active_nodes_of_type(t),
            None => NodeType::ALL
                .iter()
                .flat_map(|t| snap.active_nodes_of_type(*t))
                .collect(),
        };
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }

    /// Alias expansion: every known name of an entity, primary first, then
    /// active name aliases, deduplicated by normalized form.
    pub fn entity_names(&self, node: NodeId) -> Result<Vec<String>> {
        let snap = self.store.snapshot();
        let n = snap
            .node(node)
            .ok_or_else(|| EngineError::Validation(format!("unknown entity: {node}")))?;
        let mut seen = vec![n.normalized_name.clone()];
        let mut names = vec![n.name];
        for attr in snap.attributes_of(node) {
            if attr.attr_type != AttributeType::NameAlias {
                continue;
            }
            if !seen.contains(&attr.normalized_value) {
                seen.push(attr.normalized_value);
                names.push(attr.value);
            }
        }
        Ok(names)
    }

    /// Paths between two entities, bounded by the configured degree.
    pub fn paths(&self, a: NodeId, b: NodeId) -> Vec<PathResult> {
        paths_between(&self.store.snapshot(), a, b, self.config.max_degree, None)
    }

    /// All fresh conflict-matrix entries.
    pub fn conflict_matrix(&self) -> Vec<ConflictEntry> {
        self.matrix.entries()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
