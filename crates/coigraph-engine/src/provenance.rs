//! Provenance and audit-trail staging.
//!
//! Every mutation the engine makes carries a source attribution, and every
//! field it touches gets an append-only change row. Attribution records are
//! immutable once written: later assessments are appended as revisions and
//! reviewer verdicts as annotations, so the original claim stays auditable.

use crate::catalog::SourceCatalog;
use crate::error::{EngineError, Result};
use chrono::Utc;
use coigraph_graph::{
    AssetType, ChangeId, ChangeOperation, ChangeRecord, Provenance, ProvenanceId,
    ProvenanceRevision, ReviewAnnotation, ReviewStatus, Transaction,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Caller-supplied attribution for one proposed fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceAttribution {
    pub source_name: String,
    pub source_type: String,
    /// Confidence in this specific claim. Defaults to the source type's
    /// reliability when omitted.
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Reliability of the source itself. Defaults from the catalogue.
    #[serde(default)]
    pub reliability: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl SourceAttribution {
    pub fn new(source_name: &str, source_type: &str) -> Self {
        Self {
            source_name: source_name.to_string(),
            source_type: source_type.to_string(),
            confidence: None,
            reliability: None,
            notes: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.source_name.trim().is_empty() {
            return Err(EngineError::Validation(
                "attribution source name must be non-empty".to_string(),
            ));
        }
        for (label, value) in [("confidence", self.confidence), ("reliability", self.reliability)] {
            if let Some(v) = value {
                if !(0.0..=1.0).contains(&v) {
                    return Err(EngineError::Validation(format!(
                        "attribution {label} must be in [0, 1], got {v}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Effective (confidence, reliability), filling omissions from the
    /// catalogue.
    pub fn effective(&self, catalog: &SourceCatalog) -> (f64, f64) {
        let reliability = self
            .reliability
            .unwrap_or_else(|| catalog.reliability_for(&self.source_type));
        (self.confidence.unwrap_or(reliability), reliability)
    }
}

/// Stage a provenance record for one asset written in this transaction.
pub fn attach(
    tx: &mut Transaction,
    asset_type: AssetType,
    asset_id: Uuid,
    attribution: &SourceAttribution,
    catalog: &SourceCatalog,
) -> ProvenanceId {
    let (confidence, reliability) = attribution.effective(catalog);
    let id = ProvenanceId(tx.mint_uuid());
    tx.stage_provenance(Provenance {
        id,
        asset_type,
        asset_id,
        source_name: attribution.source_name.clone(),
        source_type: attribution.source_type.clone(),
        confidence_score: confidence,
        reliability_rating: reliability,
        review_status: ReviewStatus::Pending,
        notes: attribution.notes.clone(),
        metadata: attribution.metadata.clone(),
        created_at: Utc::now(),
        revisions: Vec::new(),
        reviews: Vec::new(),
    });
    id
}

/// Stage an insert-audit row for a freshly written asset.
pub fn record_insert(
    tx: &mut Transaction,
    table: AssetType,
    asset_id: Uuid,
    actor: &str,
    provenance_id: Option<ProvenanceId>,
) -> ChangeId {
    let id = ChangeId(tx.mint_uuid());
    tx.stage_change(ChangeRecord {
        id,
        table,
        operation: ChangeOperation::Insert,
        asset_id,
        field: None,
        old_value: None,
        new_value: None,
        actor: actor.to_string(),
        timestamp: Utc::now(),
        provenance_id,
    });
    id
}

/// Stage a field-update audit row.
pub fn record_update(
    tx: &mut Transaction,
    table: AssetType,
    asset_id: Uuid,
    field: &str,
    old_value: &str,
    new_value: &str,
    actor: &str,
    provenance_id: Option<ProvenanceId>,
) -> ChangeId {
    let id = ChangeId(tx.mint_uuid());
    tx.stage_change(ChangeRecord {
        id,
        table,
        operation: ChangeOperation::Update,
        asset_id,
        field: Some(field.to_string()),
        old_value: Some(old_value.to_string()),
        new_value: Some(new_value.to_string()),
        actor: actor.to_string(),
        timestamp: Utc::now(),
        provenance_id,
    });
    id
}

/// Append a confidence reassessment to an existing provenance record.
pub fn revise(
    tx: &mut Transaction,
    provenance_id: ProvenanceId,
    confidence: f64,
    reliability: f64,
    note: Option<String>,
) -> Result<()> {
    if !(0.0..=1.0).contains(&confidence) || !(0.0..=1.0).contains(&reliability) {
        return Err(EngineError::Validation(
            "revision scores must be in [0, 1]".to_string(),
        ));
    }
    tx.stage_provenance_revision(
        provenance_id,
        ProvenanceRevision {
            confidence_score: confidence,
            reliability_rating: reliability,
            annotated_at: Utc::now(),
            note,
        },
    );
    Ok(())
}

/// Attach a reviewer verdict to an existing provenance record.
pub fn review(
    tx: &mut Transaction,
    provenance_id: ProvenanceId,
    status: ReviewStatus,
    reviewer: &str,
    notes: Option<String>,
) -> Result<()> {
    if reviewer.trim().is_empty() {
        return Err(EngineError::Validation(
            "reviewer must be non-empty".to_string(),
        ));
    }
    tx.stage_provenance_review(
        provenance_id,
        ReviewAnnotation {
            status,
            reviewer: reviewer.to_string(),
            notes,
            reviewed_at: Utc::now(),
        },
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use coigraph_graph::{EntityClass, GraphRead, GraphStore, NodeType};

    #[test]
    fn effective_scores_fall_back_to_catalogue() {
        let catalog = SourceCatalog::default();
        let bare = SourceAttribution::new("PACER", "court_record");
        let (conf, rel) = bare.effective(&catalog);
        assert_relative_eq!(conf, 0.95);
        assert_relative_eq!(rel, 0.95);

        let pinned = SourceAttribution::new("PACER", "court_record").with_confidence(0.6);
        let (conf, rel) = pinned.effective(&catalog);
        assert_relative_eq!(conf, 0.6);
        assert_relative_eq!(rel, 0.95);
    }

    #[test]
    fn attach_then_revise_and_review_keep_original_fields() {
        let store = GraphStore::new();
        let catalog = SourceCatalog::default();

        let mut tx = store.begin();
        let node = tx.stage_node(NodeType::Company, "TechCorp Industries", EntityClass::FactBased);
        let prov = attach(
            &mut tx,
            AssetType::Node,
            node.as_uuid(),
            &SourceAttribution::new("SEC EDGAR", "sec_filing"),
            &catalog,
        );
        record_insert(&mut tx, AssetType::Node, node.as_uuid(), "ingest", Some(prov));
        store.commit(tx).unwrap();

        let mut tx = store.begin();
        revise(&mut tx, prov, 0.4, 0.9, Some("contradicted by later filing".into())).unwrap();
        review(&mut tx, prov, ReviewStatus::Disputed, "analyst", None).unwrap();
        store.commit(tx).unwrap();

        let snap = store.snapshot();
        let records = snap.provenance_of(node.as_uuid());
        assert_eq!(records.len(), 1);
        let p = &records[0];
        assert_relative_eq!(p.confidence_score, 0.9);
        assert_eq!(p.revisions.len(), 1);
        assert_relative_eq!(p.revisions[0].confidence_score, 0.4);
        assert_eq!(p.reviews.len(), 1);
        assert_eq!(p.reviews[0].status, ReviewStatus::Disputed);
    }

    #[test]
    fn out_of_range_attribution_is_rejected() {
        let attr = SourceAttribution::new("x", "web").with_confidence(1.5);
        assert!(attr.validate().is_err());
    }
}
