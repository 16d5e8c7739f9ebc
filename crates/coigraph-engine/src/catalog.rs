//! Source-type catalogue.
//!
//! Maps a source type ("court_record", "news_article", ...) to a default
//! reliability rating used when the caller's attribution omits one. The
//! catalogue is a consumed collaborator: deployments register their own
//! entries; unknown types fall back to neutral.

use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct SourceCatalog {
    defaults: HashMap<String, f64>,
    fallback: f64,
}

impl SourceCatalog {
    pub fn empty(fallback: f64) -> Self {
        Self {
            defaults: HashMap::new(),
            fallback: fallback.clamp(0.0, 1.0),
        }
    }

    /// Register (or replace) the default reliability for a source type.
    pub fn register(&mut self, source_type: &str, reliability: f64) {
        self.defaults
            .insert(source_type.to_string(), reliability.clamp(0.0, 1.0));
    }

    /// Default reliability for a source type; neutral fallback when unknown.
    pub fn reliability_for(&self, source_type: &str) -> f64 {
        self.defaults
            .get(source_type)
            .copied()
            .unwrap_or(self.fallback)
    }
}

impl Default for SourceCatalog {
    fn default() -> Self {
        let mut catalog = Self::empty(0.5);
        catalog.register("court_record", 0.95);
        catalog.register("sec_filing", 0.9);
        catalog.register("government_registry", 0.9);
        catalog.register("manual_entry", 0.8);
        catalog.register("news_article", 0.7);
        catalog.register("web", 0.5);
        catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn known_types_resolve_and_unknown_falls_back() {
        let catalog = SourceCatalog::default();
        assert_relative_eq!(catalog.reliability_for("court_record"), 0.95);
        assert_relative_eq!(catalog.reliability_for("carrier_pigeon"), 0.5);
    }

    #[test]
    fn registration_clamps_to_unit_interval() {
        let mut catalog = SourceCatalog::empty(0.5);
        catalog.register("overeager", 1.7);
        assert_relative_eq!(catalog.reliability_for("overeager"), 1.0);
    }
}
