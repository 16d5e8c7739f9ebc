//! Coigraph CLI
//!
//! Command-line front end for the conflict-of-interest ingestion engine:
//! - Ingesting fact files (JSON arrays of proposals) into an in-memory graph
//! - Listing resolved entities and their alias expansions
//! - Querying bounded paths between two entities
//! - Dumping the conflict matrix built up during ingestion
//!
//! The graph lives in process memory, so every subcommand takes a facts file
//! and replays it before answering its query.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use coigraph_engine::{Engine, EngineConfig, FactProposal, ProposalOutcome, ProposalStatus};
use coigraph_graph::{GraphRead, Node, NodeType};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "coigraph")]
#[command(author, version, about = "Conflict-of-interest fact-ingestion engine")]
struct Cli {
    /// Maximum traversal depth for conflict paths
    #[arg(long, global = true)]
    max_degree: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a facts file and report every proposal outcome.
    Ingest {
        /// JSON array of fact proposals
        facts: PathBuf,
        /// Emit outcomes as a JSON array instead of human-readable text
        #[arg(long)]
        json: bool,
    },

    /// List resolved entities, optionally filtered by type.
    Entities {
        facts: PathBuf,
        /// Entity type filter (person, company, lawfirm, ...)
        #[arg(long, value_name = "TYPE")]
        r#type: Option<String>,
    },

    /// Alias expansion: every known name of one entity.
    Names {
        facts: PathBuf,
        /// Primary name or alias of the entity
        #[arg(long)]
        entity: String,
        /// Entity type (person, company, lawfirm, ...)
        #[arg(long, value_name = "TYPE")]
        r#type: String,
    },

    /// Bounded paths between two entities.
    Paths {
        facts: PathBuf,
        #[arg(long)]
        from: String,
        #[arg(long, value_name = "TYPE")]
        from_type: String,
        #[arg(long)]
        to: String,
        #[arg(long, value_name = "TYPE")]
        to_type: String,
    },

    /// Dump the conflict matrix accumulated while ingesting.
    Matrix { facts: PathBuf },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = EngineConfig {
        max_degree: cli.max_degree.unwrap_or(EngineConfig::default().max_degree),
        ..EngineConfig::default()
    };

    match cli.command {
        Commands::Ingest { facts, json } => cmd_ingest(&facts, json, config),
        Commands::Entities { facts, r#type } => cmd_entities(&facts, r#type.as_deref(), config),
        Commands::Names {
            facts,
            entity,
            r#type,
        } => cmd_names(&facts, &entity, &r#type, config),
        Commands::Paths {
            facts,
            from,
            from_type,
            to,
            to_type,
        } => cmd_paths(&facts, &from, &from_type, &to, &to_type, config),
        Commands::Matrix { facts } => cmd_matrix(&facts, config),
    }
}

// ============================================================================
// Loading
// ============================================================================

fn load_proposals(path: &Path) -> Result<Vec<FactProposal>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading facts file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing facts file {}", path.display()))
}

/// Replay a facts file into a fresh engine.
fn ingest_all(path: &Path, config: EngineConfig) -> Result<(Engine, Vec<ProposalOutcome>)> {
    let proposals = load_proposals(path)?;
    let engine = Engine::new(config);
    let mut outcomes = Vec::with_capacity(proposals.len());
    for (i, proposal) in proposals.iter().enumerate() {
        let outcome = engine
            .propose_fact(proposal)
            .with_context(|| format!("fact #{i} ({} -> {})", proposal.source.name, proposal.target.name))?;
        outcomes.push(outcome);
    }
    Ok((engine, outcomes))
}

fn parse_type(s: &str) -> Result<NodeType> {
    s.parse::<NodeType>()
        .map_err(|_| anyhow!("unknown entity type: {s}"))
}

fn find_entity(engine: &Engine, node_type: NodeType, name: &str) -> Result<Node> {
    let snap = engine.snapshot();
    let normalized = coigraph_graph::normalize(name);
    snap.active_nodes_by_name(node_type, &normalized)
        .into_iter()
        .chain(snap.active_nodes_by_alias(node_type, &normalized))
        .next()
        .ok_or_else(|| anyhow!("no {} named {name:?}", node_type.as_str()))
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_ingest(facts: &Path, json: bool, config: EngineConfig) -> Result<()> {
    let (engine, outcomes) = ingest_all(facts, config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
        return Ok(());
    }

    let mut conflicted = 0usize;
    for outcome in &outcomes {
        let badge = match outcome.status {
            ProposalStatus::Success => "ok".green().bold(),
            ProposalStatus::ConflictsDetected => "conflict".red().bold(),
        };
        println!(
            "{badge} {} --{}--> {} [{}] strength {:.2} confidence {:.2}",
            outcome.source.name.bold(),
            outcome.edge_action.as_str(),
            outcome.target.name.bold(),
            outcome.source.match_reason,
            outcome.final_strength,
            outcome.overall_confidence,
        );
        for conflict in &outcome.conflicts {
            conflicted += 1;
            println!(
                "  {} {} degree {} severity {:.3}{}",
                "→".yellow(),
                conflict.conflict_type,
                conflict.degree,
                conflict.severity,
                if conflict.from_cache { " (cached)" } else { "" },
            );
        }
    }

    let counts = engine.store().counts();
    println!(
        "\n{} {} facts, {} entities, {} relationships, {} conflicts",
        "Ingested".green().bold(),
        outcomes.len(),
        counts.nodes,
        counts.relationships,
        conflicted,
    );
    Ok(())
}

fn cmd_entities(facts: &Path, type_filter: Option<&str>, config: EngineConfig) -> Result<()> {
    let (engine, _) = ingest_all(facts, config)?;
    let filter = type_filter.map(parse_type).transpose()?;
    for node in engine.entities(filter) {
        println!(
            "{}  {}  {}",
            node.id,
            node.node_type.as_str().cyan(),
            node.name.bold(),
        );
    }
    Ok(())
}

fn cmd_names(facts: &Path, entity: &str, entity_type: &str, config: EngineConfig) -> Result<()> {
    let (engine, _) = ingest_all(facts, config)?;
    let node = find_entity(&engine, parse_type(entity_type)?, entity)?;
    for name in engine.entity_names(node.id)? {
        println!("{name}");
    }
    Ok(())
}

fn cmd_paths(
    facts: &Path,
    from: &str,
    from_type: &str,
    to: &str,
    to_type: &str,
    config: EngineConfig,
) -> Result<()> {
    let (engine, _) = ingest_all(facts, config)?;
    let start = find_entity(&engine, parse_type(from_type)?, from)?;
    let end = find_entity(&engine, parse_type(to_type)?, to)?;
    if start.id == end.id {
        bail!("from and to are the same entity");
    }

    let snap = engine.snapshot();
    let paths = engine.paths(start.id, end.id);
    if paths.is_empty() {
        println!("no path within {} hops", engine.config().max_degree);
        return Ok(());
    }
    for path in paths {
        let chain: Vec<String> = path
            .nodes()
            .into_iter()
            .map(|id| snap.node(id).map(|n| n.name).unwrap_or_else(|| id.to_string()))
            .collect();
        println!(
            "{} {} (degree {}, strength {:.3})",
            "→".cyan(),
            chain.join(" -> "),
            path.degree,
            path.strength,
        );
    }
    Ok(())
}

fn cmd_matrix(facts: &Path, config: EngineConfig) -> Result<()> {
    let (engine, _) = ingest_all(facts, config)?;
    let snap = engine.snapshot();
    let entries = engine.conflict_matrix();
    if entries.is_empty() {
        println!("conflict matrix is empty");
        return Ok(());
    }
    for entry in entries {
        let name = |id| {
            snap.node(id)
                .map(|n: Node| n.name)
                .unwrap_or_else(|| id.to_string())
        };
        println!(
            "{} {} / {}  degree {}  path strength {:.3}",
            entry.conflict_type.red().bold(),
            name(entry.a).bold(),
            name(entry.b).bold(),
            entry.degree,
            entry.path_strength,
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use coigraph_engine::EdgeAction;
    use std::io::Write;

    const FACTS: &str = r#"[
        {
            "source": { "entity_type": "Person", "name": "Jennifer White" },
            "target": { "entity_type": "Company", "name": "TechCorp Industries" },
            "rel_type": "Legal_Counsel",
            "strength": 0.9,
            "attribution": { "source_name": "PACER", "source_type": "court_record" }
        },
        {
            "source": { "entity_type": "Person", "name": "Jennifer White" },
            "target": { "entity_type": "Company", "name": "ACME Corporation" },
            "rel_type": "Opposing_Counsel",
            "strength": 0.8,
            "attribution": { "source_name": "PACER", "source_type": "court_record" }
        }
    ]"#;

    fn facts_file() -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(FACTS.as_bytes()).unwrap();
        f
    }

    #[test]
    fn facts_file_parses_and_replays() {
        let f = facts_file();
        let proposals = load_proposals(f.path()).unwrap();
        assert_eq!(proposals.len(), 2);
        assert!(proposals[0].source.attributes.is_empty());

        let (engine, outcomes) = ingest_all(f.path(), EngineConfig::default()).unwrap();
        assert_eq!(outcomes[0].status, ProposalStatus::Success);
        assert_eq!(outcomes[1].status, ProposalStatus::ConflictsDetected);
        assert_eq!(outcomes[1].edge_action, EdgeAction::Conflict);
        assert_eq!(engine.store().counts().nodes, 3);
    }

    #[test]
    fn entities_are_found_by_name_or_alias() {
        let f = facts_file();
        let (engine, _) = ingest_all(f.path(), EngineConfig::default()).unwrap();
        let node = find_entity(&engine, NodeType::Person, "  jennifer  WHITE ").unwrap();
        assert_eq!(node.name, "Jennifer White");
        assert!(find_entity(&engine, NodeType::LawFirm, "Jennifer White").is_err());
    }

    #[test]
    fn malformed_facts_fail_with_context() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"{ not json").unwrap();
        let err = load_proposals(f.path()).unwrap_err();
        assert!(err.to_string().contains("parsing facts file"));
    }
}
