//! Entity-type classification seam.
//!
//! Upstream loaders sometimes mislabel mentions (a person-shaped name filed
//! under Company). Type correction is deployment policy, so it sits behind a
//! trait: the engine consults the classifier once per mention before
//! resolution, and the default keeps whatever the caller said.

use coigraph_graph::NodeType;

/// Decides the effective node type for a mention.
pub trait EntityClassifier: Send + Sync {
    fn classify(&self, proposed: NodeType, name: &str) -> NodeType;
}

/// Default: trust the caller's type.
#[derive(Debug, Default, Clone, Copy)]
pub struct TypeAsGiven;

impl EntityClassifier for TypeAsGiven {
    fn classify(&self, proposed: NodeType, _name: &str) -> NodeType {
        proposed
    }
}

/// Heuristic corrector for person-shaped names proposed as Company.
///
/// A mention is "person-shaped" when it is two or three alphabetic tokens
/// with no corporate marker ("inc", "llc", ...). Conservative on purpose:
/// anything ambiguous keeps the proposed type.
#[derive(Debug, Default, Clone, Copy)]
pub struct PersonNameHeuristic;

const CORPORATE_MARKERS: &[&str] = &[
    "inc", "incorporated", "llc", "llp", "lp", "ltd", "limited", "corp", "corporation", "co",
    "company", "companies", "industries", "group", "holdings", "partners", "associates",
    "enterprises", "international", "services", "systems",
];

impl EntityClassifier for PersonNameHeuristic {
    fn classify(&self, proposed: NodeType, name: &str) -> NodeType {
        if proposed != NodeType::Company {
            return proposed;
        }
        let normalized = coigraph_graph::normalize(name);
        let tokens: Vec<&str> = normalized.split(' ').filter(|t| !t.is_empty()).collect();
        if !(2..=3).contains(&tokens.len()) {
            return proposed;
        }
        let person_shaped = tokens
            .iter()
            .all(|t| t.chars().all(|c| c.is_alphabetic()) && !CORPORATE_MARKERS.contains(t));
        if person_shaped {
            NodeType::Person
        } else {
            proposed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_as_given_never_overrides() {
        let c = TypeAsGiven;
        assert_eq!(c.classify(NodeType::Company, "John Smith"), NodeType::Company);
    }

    #[test]
    fn person_shaped_company_is_corrected() {
        let c = PersonNameHeuristic;
        assert_eq!(c.classify(NodeType::Company, "John Smith"), NodeType::Person);
        assert_eq!(c.classify(NodeType::Company, "Mary Jane Watson"), NodeType::Person);
    }

    #[test]
    fn corporate_markers_block_correction() {
        let c = PersonNameHeuristic;
        assert_eq!(c.classify(NodeType::Company, "Smith Industries"), NodeType::Company);
        assert_eq!(c.classify(NodeType::Company, "Watson & Co"), NodeType::Company);
        assert_eq!(c.classify(NodeType::Company, "TechCorp Industries Inc"), NodeType::Company);
    }

    #[test]
    fn non_company_types_pass_through() {
        let c = PersonNameHeuristic;
        assert_eq!(c.classify(NodeType::LawFirm, "John Smith"), NodeType::LawFirm);
    }
}
