//! Transactional in-memory graph store.
//!
//! Concurrency model (one `propose_fact` = one transaction):
//!
//! - `begin()` hands out a [`Transaction`] holding an immutable snapshot of
//!   the whole graph plus a private write-set. Reads see the snapshot
//!   overlaid with the transaction's own staged writes, nothing else.
//! - `commit()` takes the single write lock, re-validates the two uniqueness
//!   constraints against the *live* state, and swaps in a new state with the
//!   write-set applied. A constraint collision reports the surviving record
//!   so the caller can retry the whole operation as a lookup.
//! - Dropping a transaction aborts it: the snapshot is just an `Arc`, so an
//!   abort leaves zero partial writes by construction.
//!
//! Soft-delete discipline: nothing is removed in normal operation; records
//! flip to `Inactive`. The only true deletion is [`GraphStore::merge_nodes`],
//! which repoints a duplicate's dependents onto the canonical node first.

use crate::id::{IdGenerator, UuidV7Generator};
use crate::model::{
    AssetType, Attribute, AttributeId, AttributeType, ChangeRecord, EntityClass, Node, NodeId,
    NodeType, Provenance, ProvenanceId, ProvenanceRevision, RecordStatus, Relationship,
    RelationshipId, ReviewAnnotation,
};
use crate::normalize::normalize;
use ahash::AHashMap;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    /// Another Active relationship with the same (source, target, type) key
    /// won the race. Carries the survivor so callers can retry-as-lookup.
    #[error("active relationship already exists for ({source_node}, {target_node}, {rel_type}): {existing}")]
    RelationshipExists {
        // Not named `source`: thiserror would treat that field as the
        // error's source() cause.
        source_node: NodeId,
        target_node: NodeId,
        rel_type: String,
        existing: RelationshipId,
    },

    /// Another Active reference-class node with the same (type, normalized
    /// name) key won the race.
    #[error("active reference node already exists for ({node_type}, \"{normalized_name}\"): {existing}")]
    ReferenceNodeExists {
        node_type: NodeType,
        normalized_name: String,
        existing: NodeId,
    },

    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("unknown relationship: {0}")]
    UnknownRelationship(RelationshipId),

    #[error("unknown provenance record: {0}")]
    UnknownProvenance(ProvenanceId),
}

impl StoreError {
    /// True for the unique-constraint races that callers recover from by
    /// re-running their operation as a lookup.
    pub fn is_commit_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::RelationshipExists { .. } | StoreError::ReferenceNodeExists { .. }
        )
    }
}

// ============================================================================
// Graph state
// ============================================================================

/// Whole-graph state. Cloned on commit so readers keep consistent snapshots.
#[derive(Debug, Default, Clone)]
struct GraphState {
    nodes: AHashMap<NodeId, Node>,
    relationships: AHashMap<RelationshipId, Relationship>,
    attributes: AHashMap<AttributeId, Attribute>,
    provenance: AHashMap<ProvenanceId, Provenance>,
    changes: Vec<ChangeRecord>,

    /// (type, normalized_name) -> node ids (any status; filtered at read).
    name_index: AHashMap<(NodeType, String), Vec<NodeId>>,
    /// Active relationships only: (source, target, rel_type) -> id.
    edge_index: AHashMap<(NodeId, NodeId, String), RelationshipId>,
    /// Node -> relationship ids touching it (either direction, any status).
    adjacency: AHashMap<NodeId, Vec<RelationshipId>>,
    /// Node -> attribute ids.
    node_attrs: AHashMap<NodeId, Vec<AttributeId>>,
    /// Asset id -> provenance ids, append order.
    asset_prov: AHashMap<Uuid, Vec<ProvenanceId>>,
}

impl GraphState {
    fn apply_node(&mut self, node: Node) {
        self.name_index
            .entry((node.node_type, node.normalized_name.clone()))
            .or_default()
            .push(node.id);
        self.nodes.insert(node.id, node);
    }

    fn apply_relationship(&mut self, rel: Relationship) {
        if rel.status.is_active() {
            self.edge_index
                .insert((rel.source, rel.target, rel.rel_type.clone()), rel.id);
        }
        self.adjacency.entry(rel.source).or_default().push(rel.id);
        self.adjacency.entry(rel.target).or_default().push(rel.id);
        self.relationships.insert(rel.id, rel);
    }

    fn apply_attribute(&mut self, attr: Attribute) {
        self.node_attrs.entry(attr.node_id).or_default().push(attr.id);
        self.attributes.insert(attr.id, attr);
    }

    fn apply_provenance(&mut self, prov: Provenance) {
        self.asset_prov.entry(prov.asset_id).or_default().push(prov.id);
        self.provenance.insert(prov.id, prov);
    }

    fn active_reference_node(&self, node_type: NodeType, normalized_name: &str) -> Option<&Node> {
        let ids = self
            .name_index
            .get(&(node_type, normalized_name.to_string()))?;
        ids.iter()
            .filter_map(|id| self.nodes.get(id))
            .find(|n| n.status.is_active() && n.entity_class == EntityClass::Reference)
    }
}

// ============================================================================
// Read interface
// ============================================================================

/// Read-side view of the graph. Implemented by [`Snapshot`] (consistent
/// point-in-time reads) and [`Transaction`] (snapshot plus staged writes),
/// so traversal and resolution code runs identically inside and outside a
/// transaction.
pub trait GraphRead {
    fn node(&self, id: NodeId) -> Option<Node>;

    /// Active nodes whose (type, normalized primary name) match exactly.
    fn active_nodes_by_name(&self, node_type: NodeType, normalized_name: &str) -> Vec<Node>;

    /// Active nodes of `node_type` carrying an Active `NameAlias` attribute
    /// whose normalized value matches.
    fn active_nodes_by_alias(&self, node_type: NodeType, normalized_value: &str) -> Vec<Node>;

    /// All Active nodes of a type (fuzzy-tier candidate scan).
    fn active_nodes_of_type(&self, node_type: NodeType) -> Vec<Node>;

    /// The Active relationship with this exact (source, target, type) key.
    fn active_relationship(
        &self,
        source: NodeId,
        target: NodeId,
        rel_type: &str,
    ) -> Option<Relationship>;

    /// Active relationships touching `node`, either direction.
    fn relationships_of(&self, node: NodeId) -> Vec<Relationship>;

    /// Active attributes of `node`.
    fn attributes_of(&self, node: NodeId) -> Vec<Attribute>;

    /// Provenance records for an asset, in append order.
    fn provenance_of(&self, asset_id: Uuid) -> Vec<Provenance>;
}

/// Point-in-time immutable view of the graph.
#[derive(Clone)]
pub struct Snapshot {
    state: Arc<GraphState>,
}

impl GraphRead for Snapshot {
    fn node(&self, id: NodeId) -> Option<Node> {
        self.state.nodes.get(&id).cloned()
    }

    fn active_nodes_by_name(&self, node_type: NodeType, normalized_name: &str) -> Vec<Node> {
        self.state
            .name_index
            .get(&(node_type, normalized_name.to_string()))
            .into_iter()
            .flatten()
            .filter_map(|id| self.state.nodes.get(id))
            .filter(|n| n.status.is_active())
            .cloned()
            .collect()
    }

    fn active_nodes_by_alias(&self, node_type: NodeType, normalized_value: &str) -> Vec<Node> {
        let mut out = Vec::new();
        for attr in self.state.attributes.values() {
            if attr.attr_type != AttributeType::NameAlias
                || !attr.status.is_active()
                || attr.normalized_value != normalized_value
            {
                continue;
            }
            if let Some(node) = self.state.nodes.get(&attr.node_id) {
                if node.status.is_active() && node.node_type == node_type {
                    out.push(node.clone());
                }
            }
        }
        out.sort_by_key(|n| n.id);
        out.dedup_by_key(|n| n.id);
        out
    }

    fn active_nodes_of_type(&self, node_type: NodeType) -> Vec<Node> {
        // Full scan; candidate sets at this engine's scale stay small enough
        // that a per-type secondary index has not earned its keep.
        let mut out: Vec<Node> = self
            .state
            .nodes
            .values()
            .filter(|n| n.node_type == node_type && n.status.is_active())
            .cloned()
            .collect();
        out.sort_by_key(|n| n.id);
        out
    }

    fn active_relationship(
        &self,
        source: NodeId,
        target: NodeId,
        rel_type: &str,
    ) -> Option<Relationship> {
        let id = self
            .state
            .edge_index
            .get(&(source, target, rel_type.to_string()))?;
        self.state
            .relationships
            .get(id)
            .filter(|r| r.status.is_active())
            .cloned()
    }

    fn relationships_of(&self, node: NodeId) -> Vec<Relationship> {
        self.state
            .adjacency
            .get(&node)
            .into_iter()
            .flatten()
            .filter_map(|id| self.state.relationships.get(id))
            .filter(|r| r.status.is_active())
            .cloned()
            .collect()
    }

    fn attributes_of(&self, node: NodeId) -> Vec<Attribute> {
        self.state
            .node_attrs
            .get(&node)
            .into_iter()
            .flatten()
            .filter_map(|id| self.state.attributes.get(id))
            .filter(|a| a.status.is_active())
            .cloned()
            .collect()
    }

    fn provenance_of(&self, asset_id: Uuid) -> Vec<Provenance> {
        self.state
            .asset_prov
            .get(&asset_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.state.provenance.get(id))
            .cloned()
            .collect()
    }
}

// ============================================================================
// Transactions
// ============================================================================

#[derive(Debug, Default)]
struct WriteSet {
    nodes: Vec<Node>,
    relationships: Vec<Relationship>,
    attributes: Vec<Attribute>,
    provenance: Vec<Provenance>,
    changes: Vec<ChangeRecord>,
    strength_updates: Vec<(RelationshipId, f64)>,
    prov_revisions: Vec<(ProvenanceId, ProvenanceRevision)>,
    prov_reviews: Vec<(ProvenanceId, ReviewAnnotation)>,
}

impl WriteSet {
    fn is_empty(&self) -> bool {
        self.nodes.is_empty()
            && self.relationships.is_empty()
            && self.attributes.is_empty()
            && self.provenance.is_empty()
            && self.changes.is_empty()
            && self.strength_updates.is_empty()
            && self.prov_revisions.is_empty()
            && self.prov_reviews.is_empty()
    }
}

/// One atomic unit of work against the store.
///
/// Reads are read-your-writes: staged records shadow the snapshot. Nothing
/// is visible to other readers until [`GraphStore::commit`] succeeds.
pub struct Transaction {
    snapshot: Snapshot,
    ids: Arc<dyn IdGenerator>,
    writes: WriteSet,
}

impl Transaction {
    /// Mint an identifier from the store's generator.
    pub fn mint_uuid(&self) -> Uuid {
        self.ids.next_id()
    }

    /// Snapshot this transaction reads against (without the overlay).
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn has_writes(&self) -> bool {
        !self.writes.is_empty()
    }

    // ------------------------------------------------------------------
    // Staging
    // ------------------------------------------------------------------

    /// Stage a new node. The normalized name is computed here so every node
    /// in the store went through the same canonicalization.
    pub fn stage_node(
        &mut self,
        node_type: NodeType,
        name: &str,
        entity_class: EntityClass,
    ) -> NodeId {
        let now = Utc::now();
        let id = NodeId(self.mint_uuid());
        self.writes.nodes.push(Node {
            id,
            node_type,
            name: name.to_string(),
            normalized_name: normalize(name),
            entity_class,
            status: RecordStatus::Active,
            created_at: now,
            updated_at: now,
        });
        id
    }

    pub fn stage_relationship(
        &mut self,
        source: NodeId,
        target: NodeId,
        rel_type: &str,
        strength: f64,
        metadata: Value,
    ) -> RelationshipId {
        let now = Utc::now();
        let id = RelationshipId(self.mint_uuid());
        self.writes.relationships.push(Relationship {
            id,
            source,
            target,
            rel_type: rel_type.to_string(),
            strength,
            valid_from: None,
            valid_to: None,
            status: RecordStatus::Active,
            created_at: now,
            updated_at: now,
            metadata,
        });
        id
    }

    pub fn stage_attribute(
        &mut self,
        node_id: NodeId,
        attr_type: AttributeType,
        value: &str,
        confidence: f64,
        source: &str,
    ) -> AttributeId {
        let id = AttributeId(self.mint_uuid());
        self.writes.attributes.push(Attribute {
            id,
            node_id,
            attr_type,
            value: value.to_string(),
            normalized_value: normalize(value),
            confidence,
            source: source.to_string(),
            status: RecordStatus::Active,
            created_at: Utc::now(),
        });
        id
    }

    /// Stage a fully-built provenance record (the recorder owns its shape).
    pub fn stage_provenance(&mut self, prov: Provenance) {
        self.writes.provenance.push(prov);
    }

    /// Stage an append-only change-history row.
    pub fn stage_change(&mut self, change: ChangeRecord) {
        self.writes.changes.push(change);
    }

    /// Stage a strength replacement on an existing Active relationship.
    pub fn stage_strength_update(&mut self, rel: RelationshipId, new_strength: f64) {
        self.writes.strength_updates.push((rel, new_strength));
    }

    /// Append a confidence/reliability revision to a provenance record.
    pub fn stage_provenance_revision(&mut self, prov: ProvenanceId, rev: ProvenanceRevision) {
        self.writes.prov_revisions.push((prov, rev));
    }

    /// Attach a reviewer verdict to a provenance record.
    pub fn stage_provenance_review(&mut self, prov: ProvenanceId, review: ReviewAnnotation) {
        self.writes.prov_reviews.push((prov, review));
    }
}

impl GraphRead for Transaction {
    fn node(&self, id: NodeId) -> Option<Node> {
        self.writes
            .nodes
            .iter()
            .find(|n| n.id == id)
            .cloned()
            .or_else(|| self.snapshot.node(id))
    }

    fn active_nodes_by_name(&self, node_type: NodeType, normalized_name: &str) -> Vec<Node> {
        let mut out = self.snapshot.active_nodes_by_name(node_type, normalized_name);
        out.extend(
            self.writes
                .nodes
                .iter()
                .filter(|n| {
                    n.node_type == node_type
                        && n.normalized_name == normalized_name
                        && n.status.is_active()
                })
                .cloned(),
        );
        out
    }

    fn active_nodes_by_alias(&self, node_type: NodeType, normalized_value: &str) -> Vec<Node> {
        let mut out = self.snapshot.active_nodes_by_alias(node_type, normalized_value);
        for attr in &self.writes.attributes {
            if attr.attr_type == AttributeType::NameAlias
                && attr.normalized_value == normalized_value
                && attr.status.is_active()
            {
                if let Some(node) = self.node(attr.node_id) {
                    if node.status.is_active() && node.node_type == node_type {
                        out.push(node);
                    }
                }
            }
        }
        out.sort_by_key(|n| n.id);
        out.dedup_by_key(|n| n.id);
        out
    }

    fn active_nodes_of_type(&self, node_type: NodeType) -> Vec<Node> {
        let mut out = self.snapshot.active_nodes_of_type(node_type);
        out.extend(
            self.writes
                .nodes
                .iter()
                .filter(|n| n.node_type == node_type && n.status.is_active())
                .cloned(),
        );
        out
    }

    fn active_relationship(
        &self,
        source: NodeId,
        target: NodeId,
        rel_type: &str,
    ) -> Option<Relationship> {
        let staged = self
            .writes
            .relationships
            .iter()
            .find(|r| r.source == source && r.target == target && r.rel_type == rel_type)
            .cloned();
        let found = staged.or_else(|| self.snapshot.active_relationship(source, target, rel_type));
        found.map(|r| self.with_strength_override(r))
    }

    fn relationships_of(&self, node: NodeId) -> Vec<Relationship> {
        let mut out = self.snapshot.relationships_of(node);
        out.extend(
            self.writes
                .relationships
                .iter()
                .filter(|r| r.source == node || r.target == node)
                .cloned(),
        );
        out.into_iter()
            .map(|r| self.with_strength_override(r))
            .collect()
    }

    fn attributes_of(&self, node: NodeId) -> Vec<Attribute> {
        let mut out = self.snapshot.attributes_of(node);
        out.extend(
            self.writes
                .attributes
                .iter()
                .filter(|a| a.node_id == node)
                .cloned(),
        );
        out
    }

    fn provenance_of(&self, asset_id: Uuid) -> Vec<Provenance> {
        let mut out = self.snapshot.provenance_of(asset_id);
        out.extend(
            self.writes
                .provenance
                .iter()
                .filter(|p| p.asset_id == asset_id)
                .cloned(),
        );
        out
    }
}

impl Transaction {
    fn with_strength_override(&self, mut rel: Relationship) -> Relationship {
        for (id, strength) in &self.writes.strength_updates {
            if *id == rel.id {
                rel.strength = *strength;
            }
        }
        rel
    }
}

// ============================================================================
// Store
// ============================================================================

/// Counts used by audit tooling and the no-partial-write tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCounts {
    pub nodes: usize,
    pub relationships: usize,
    pub attributes: usize,
    pub provenance: usize,
    pub changes: usize,
}

/// Outcome of a duplicate-node merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    pub relationships_repointed: usize,
    pub attributes_repointed: usize,
    pub provenance_repointed: usize,
}

/// Shared, transactional entity graph.
pub struct GraphStore {
    state: RwLock<Arc<GraphState>>,
    ids: Arc<dyn IdGenerator>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::with_id_generator(Arc::new(UuidV7Generator::new()))
    }

    /// The id encoding is a deployment parameter, not a core algorithm.
    pub fn with_id_generator(ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            state: RwLock::new(Arc::new(GraphState::default())),
            ids,
        }
    }

    /// Begin a snapshot-isolated transaction.
    pub fn begin(&self) -> Transaction {
        Transaction {
            snapshot: self.snapshot(),
            ids: Arc::clone(&self.ids),
            writes: WriteSet::default(),
        }
    }

    /// Consistent point-in-time read view.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: Arc::clone(&self.state.read()),
        }
    }

    pub fn counts(&self) -> StoreCounts {
        let state = self.state.read();
        StoreCounts {
            nodes: state.nodes.len(),
            relationships: state.relationships.len(),
            attributes: state.attributes.len(),
            provenance: state.provenance.len(),
            changes: state.changes.len(),
        }
    }

    /// Atomically apply a transaction's write-set.
    ///
    /// Uniqueness constraints are re-validated against the live state under
    /// the write lock, so two racing transactions that both staged the
    /// "first" record for a key are serialized by the data: the loser gets a
    /// [`StoreError`] naming the surviving record and re-runs as a lookup.
    pub fn commit(&self, tx: Transaction) -> Result<(), StoreError> {
        let mut guard = self.state.write();
        let current = guard.as_ref();
        let writes = &tx.writes;

        // Reference-node uniqueness: (type, normalized_name) among Active.
        for node in &writes.nodes {
            if node.entity_class != EntityClass::Reference || !node.status.is_active() {
                continue;
            }
            if let Some(existing) =
                current.active_reference_node(node.node_type, &node.normalized_name)
            {
                return Err(StoreError::ReferenceNodeExists {
                    node_type: node.node_type,
                    normalized_name: node.normalized_name.clone(),
                    existing: existing.id,
                });
            }
        }

        // Relationship uniqueness: one Active edge per (source, target, type).
        for rel in &writes.relationships {
            if !rel.status.is_active() {
                continue;
            }
            let key = (rel.source, rel.target, rel.rel_type.clone());
            if let Some(existing) = current.edge_index.get(&key) {
                return Err(StoreError::RelationshipExists {
                    source_node: rel.source,
                    target_node: rel.target,
                    rel_type: rel.rel_type.clone(),
                    existing: *existing,
                });
            }
            // Endpoints must exist in the live state or in this write-set.
            for endpoint in [rel.source, rel.target] {
                let staged = writes.nodes.iter().any(|n| n.id == endpoint);
                if !staged && !current.nodes.contains_key(&endpoint) {
                    return Err(StoreError::UnknownNode(endpoint));
                }
            }
        }

        for (rel_id, _) in &writes.strength_updates {
            if !current.relationships.contains_key(rel_id) {
                return Err(StoreError::UnknownRelationship(*rel_id));
            }
        }
        for (prov_id, _) in &writes.prov_revisions {
            if !current.provenance.contains_key(prov_id) {
                return Err(StoreError::UnknownProvenance(*prov_id));
            }
        }
        for (prov_id, _) in &writes.prov_reviews {
            if !current.provenance.contains_key(prov_id) {
                return Err(StoreError::UnknownProvenance(*prov_id));
            }
        }

        // Validation passed: build the successor state and swap it in.
        let mut next = current.clone();
        for node in &writes.nodes {
            next.apply_node(node.clone());
        }
        for rel in &writes.relationships {
            next.apply_relationship(rel.clone());
        }
        for attr in &writes.attributes {
            next.apply_attribute(attr.clone());
        }
        for prov in &writes.provenance {
            next.apply_provenance(prov.clone());
        }
        for (rel_id, strength) in &writes.strength_updates {
            if let Some(rel) = next.relationships.get_mut(rel_id) {
                rel.strength = *strength;
                rel.updated_at = Utc::now();
            }
        }
        for (prov_id, rev) in &writes.prov_revisions {
            if let Some(prov) = next.provenance.get_mut(prov_id) {
                prov.revisions.push(rev.clone());
            }
        }
        for (prov_id, review) in &writes.prov_reviews {
            if let Some(prov) = next.provenance.get_mut(prov_id) {
                prov.review_status = review.status;
                prov.reviews.push(review.clone());
            }
        }
        next.changes.extend(writes.changes.iter().cloned());

        tracing::debug!(
            nodes = writes.nodes.len(),
            relationships = writes.relationships.len(),
            attributes = writes.attributes.len(),
            provenance = writes.provenance.len(),
            "transaction committed"
        );
        *guard = Arc::new(next);
        Ok(())
    }

    /// Merge a duplicate node into a canonical one.
    ///
    /// Runs under the exclusive write lock (consolidation must not interleave
    /// with live ingestion): repoints the duplicate's relationships,
    /// attributes, and provenance onto the canonical node, appends a change
    /// row per repointed record, then removes the duplicate, the only hard
    /// delete the store performs. A repointed relationship whose new key
    /// collides with an existing Active edge is retired instead of repointed.
    pub fn merge_nodes(
        &self,
        canonical: NodeId,
        duplicate: NodeId,
        actor: &str,
    ) -> Result<MergeReport, StoreError> {
        let mut guard = self.state.write();
        if !guard.nodes.contains_key(&canonical) {
            return Err(StoreError::UnknownNode(canonical));
        }
        if !guard.nodes.contains_key(&duplicate) {
            return Err(StoreError::UnknownNode(duplicate));
        }

        let mut next = guard.as_ref().clone();
        let now = Utc::now();
        let mut report = MergeReport {
            relationships_repointed: 0,
            attributes_repointed: 0,
            provenance_repointed: 0,
        };
        let merge_change = |table: AssetType, asset_id: Uuid, field: &str, old: String, new: String| {
            ChangeRecord {
                id: crate::model::ChangeId(self.ids.next_id()),
                table,
                operation: crate::model::ChangeOperation::Merge,
                asset_id,
                field: Some(field.to_string()),
                old_value: Some(old),
                new_value: Some(new),
                actor: actor.to_string(),
                timestamp: now,
                provenance_id: None,
            }
        };
        let mut changes = Vec::new();

        // Relationships: repoint whichever endpoint referenced the duplicate.
        let rel_ids: Vec<RelationshipId> = next
            .adjacency
            .get(&duplicate)
            .cloned()
            .unwrap_or_default();
        for rel_id in rel_ids {
            let Some(rel) = next.relationships.get(&rel_id).cloned() else {
                continue;
            };
            let old_key = (rel.source, rel.target, rel.rel_type.clone());
            let mut updated = rel.clone();
            if updated.source == duplicate {
                updated.source = canonical;
            }
            if updated.target == duplicate {
                updated.target = canonical;
            }
            if updated.source == updated.target {
                // A duplicate edge between the two merged nodes would become
                // a self-loop; retire it.
                updated.status = RecordStatus::Inactive;
            }
            let new_key = (updated.source, updated.target, updated.rel_type.clone());
            if updated.status.is_active() {
                if let Some(existing) = next.edge_index.get(&new_key) {
                    if *existing != rel_id {
                        updated.status = RecordStatus::Inactive;
                    }
                }
            }
            updated.updated_at = now;
            if rel.status.is_active() {
                next.edge_index.remove(&old_key);
            }
            if updated.status.is_active() {
                next.edge_index.insert(new_key, rel_id);
            }
            next.adjacency.entry(canonical).or_default().push(rel_id);
            changes.push(merge_change(
                AssetType::Relationship,
                rel_id.as_uuid(),
                "endpoint",
                duplicate.to_string(),
                canonical.to_string(),
            ));
            next.relationships.insert(rel_id, updated);
            report.relationships_repointed += 1;
        }
        next.adjacency.remove(&duplicate);

        // Attributes.
        let attr_ids: Vec<AttributeId> = next.node_attrs.remove(&duplicate).unwrap_or_default();
        for attr_id in &attr_ids {
            if let Some(attr) = next.attributes.get_mut(attr_id) {
                attr.node_id = canonical;
                changes.push(merge_change(
                    AssetType::Attribute,
                    attr_id.as_uuid(),
                    "node_id",
                    duplicate.to_string(),
                    canonical.to_string(),
                ));
                report.attributes_repointed += 1;
            }
        }
        next.node_attrs
            .entry(canonical)
            .or_default()
            .extend(attr_ids);

        // Provenance of the duplicate node itself follows the survivor.
        let prov_ids: Vec<ProvenanceId> = next
            .asset_prov
            .remove(&duplicate.as_uuid())
            .unwrap_or_default();
        for prov_id in &prov_ids {
            if let Some(prov) = next.provenance.get_mut(prov_id) {
                prov.asset_id = canonical.as_uuid();
                report.provenance_repointed += 1;
            }
        }
        next.asset_prov
            .entry(canonical.as_uuid())
            .or_default()
            .extend(prov_ids);

        // Drop the duplicate from the name index, then delete it.
        if let Some(dup) = next.nodes.get(&duplicate).cloned() {
            if let Some(ids) = next
                .name_index
                .get_mut(&(dup.node_type, dup.normalized_name.clone()))
            {
                ids.retain(|id| *id != duplicate);
            }
            changes.push(merge_change(
                AssetType::Node,
                duplicate.as_uuid(),
                "merged_into",
                duplicate.to_string(),
                canonical.to_string(),
            ));
        }
        next.nodes.remove(&duplicate);
        next.changes.extend(changes);

        *guard = Arc::new(next);
        Ok(report)
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> GraphStore {
        GraphStore::new()
    }

    fn commit_node(store: &GraphStore, node_type: NodeType, name: &str, class: EntityClass) -> NodeId {
        let mut tx = store.begin();
        let id = tx.stage_node(node_type, name, class);
        store.commit(tx).unwrap();
        id
    }

    #[test]
    fn committed_node_is_visible_to_new_snapshots() {
        let store = store();
        let id = commit_node(&store, NodeType::Person, "John Smith", EntityClass::FactBased);
        let snap = store.snapshot();
        let node = snap.node(id).unwrap();
        assert_eq!(node.normalized_name, "john smith");
        assert_eq!(
            snap.active_nodes_by_name(NodeType::Person, "john smith")[0].id,
            id
        );
    }

    #[test]
    fn snapshot_taken_before_commit_does_not_see_it() {
        let store = store();
        let before = store.snapshot();
        let id = commit_node(&store, NodeType::Company, "Acme", EntityClass::FactBased);
        assert!(before.node(id).is_none());
        assert!(store.snapshot().node(id).is_some());
    }

    #[test]
    fn dropped_transaction_leaves_no_trace() {
        let store = store();
        {
            let mut tx = store.begin();
            tx.stage_node(NodeType::Person, "Ghost", EntityClass::FactBased);
            // dropped without commit
        }
        assert_eq!(store.counts().nodes, 0);
    }

    #[test]
    fn transaction_reads_its_own_writes() {
        let store = store();
        let mut tx = store.begin();
        let id = tx.stage_node(NodeType::Person, "Jane Doe", EntityClass::FactBased);
        assert_eq!(tx.node(id).unwrap().name, "Jane Doe");
        assert_eq!(tx.active_nodes_by_name(NodeType::Person, "jane doe").len(), 1);
        // Invisible outside the transaction until commit.
        assert!(store.snapshot().node(id).is_none());
    }

    #[test]
    fn duplicate_active_edge_is_rejected_with_survivor() {
        let store = store();
        let a = commit_node(&store, NodeType::Person, "A", EntityClass::FactBased);
        let b = commit_node(&store, NodeType::Company, "B", EntityClass::FactBased);

        let mut tx1 = store.begin();
        let first = tx1.stage_relationship(a, b, "Employment", 0.9, Value::Null);
        store.commit(tx1).unwrap();

        // A racing transaction staged against an older snapshot.
        let mut tx2 = store.begin();
        tx2.stage_relationship(a, b, "Employment", 0.5, Value::Null);
        let err = store.commit(tx2).unwrap_err();
        match &err {
            StoreError::RelationshipExists { source_node, existing, .. } => {
                assert_eq!(*source_node, a);
                assert_eq!(*existing, first);
            }
            other => panic!("unexpected error: {other}"),
        }
        // The endpoints name themselves in the message, not a cause chain.
        use std::error::Error as _;
        assert!(err.source().is_none());
        assert!(err.to_string().contains("Employment"));
        assert!(err.is_commit_conflict());
        assert_eq!(store.counts().relationships, 1);
    }

    #[test]
    fn reference_node_uniqueness_is_enforced_at_commit() {
        let store = store();
        commit_node(&store, NodeType::State, "California", EntityClass::Reference);

        let mut tx = store.begin();
        tx.stage_node(NodeType::State, "  CALIFORNIA ", EntityClass::Reference);
        let err = store.commit(tx).unwrap_err();
        assert!(matches!(err, StoreError::ReferenceNodeExists { .. }));

        // Fact-based near-duplicates are tolerated.
        let mut tx = store.begin();
        tx.stage_node(NodeType::State, "California", EntityClass::FactBased);
        store.commit(tx).unwrap();
        assert_eq!(store.counts().nodes, 2);
    }

    #[test]
    fn strength_update_applies_and_overlays() {
        let store = store();
        let a = commit_node(&store, NodeType::Person, "A", EntityClass::FactBased);
        let b = commit_node(&store, NodeType::Company, "B", EntityClass::FactBased);
        let mut tx = store.begin();
        let rel = tx.stage_relationship(a, b, "Employment", 0.5, Value::Null);
        store.commit(tx).unwrap();

        let mut tx = store.begin();
        tx.stage_strength_update(rel, 0.8);
        // Overlay read inside the transaction already sees the new strength.
        let seen = tx.active_relationship(a, b, "Employment").unwrap();
        assert!((seen.strength - 0.8).abs() < 1e-12);
        store.commit(tx).unwrap();

        let snap = store.snapshot();
        let rel = snap.active_relationship(a, b, "Employment").unwrap();
        assert!((rel.strength - 0.8).abs() < 1e-12);
    }

    #[test]
    fn merge_repoints_dependents_and_deletes_duplicate() {
        let store = store();
        let canonical = commit_node(&store, NodeType::Company, "TechCorp Industries", EntityClass::FactBased);
        let duplicate = commit_node(&store, NodeType::Company, "TechCorp Industries Inc", EntityClass::FactBased);
        let person = commit_node(&store, NodeType::Person, "John Smith", EntityClass::FactBased);

        let mut tx = store.begin();
        tx.stage_relationship(person, duplicate, "Employment", 0.9, Value::Null);
        tx.stage_attribute(duplicate, AttributeType::NameAlias, "TCI", 0.8, "manual");
        store.commit(tx).unwrap();

        let report = store.merge_nodes(canonical, duplicate, "consolidation").unwrap();
        assert_eq!(report.relationships_repointed, 1);
        assert_eq!(report.attributes_repointed, 1);

        let snap = store.snapshot();
        assert!(snap.node(duplicate).is_none());
        assert!(snap.active_relationship(person, canonical, "Employment").is_some());
        assert_eq!(snap.attributes_of(canonical).len(), 1);
    }

    #[test]
    fn merge_collision_retires_loser_edge() {
        let store = store();
        let canonical = commit_node(&store, NodeType::Company, "Acme", EntityClass::FactBased);
        let duplicate = commit_node(&store, NodeType::Company, "Acme Corp", EntityClass::FactBased);
        let person = commit_node(&store, NodeType::Person, "Jane", EntityClass::FactBased);

        let mut tx = store.begin();
        tx.stage_relationship(person, canonical, "Employment", 0.9, Value::Null);
        tx.stage_relationship(person, duplicate, "Employment", 0.7, Value::Null);
        store.commit(tx).unwrap();

        store.merge_nodes(canonical, duplicate, "consolidation").unwrap();

        // At-most-one Active (source, target, type) still holds.
        let snap = store.snapshot();
        let active: Vec<_> = snap
            .relationships_of(person)
            .into_iter()
            .filter(|r| r.target == canonical)
            .collect();
        assert_eq!(active.len(), 1);
        assert!((active[0].strength - 0.9).abs() < 1e-12);
    }
}
