pub mod ask;
pub mod check;
pub mod config;
pub mod entities;
pub mod properties;
pub mod query;

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kgrag_core::PipelineConfig;

#[derive(Parser)]
#[command(
    name = "kgrag",
    about = "Answer natural-language questions from Wikidata",
    version
)]
pub struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Answer a question
    Ask {
        /// The question, in plain language
        question: String,
        /// Show mentions, resolved entities and the generated query
        #[arg(short, long)]
        verbose: bool,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Extract and resolve the entities a question mentions
    Entities {
        question: String,
    },
    /// Run a SPARQL query against the query endpoint
    Query {
        /// Query file, or - for stdin (default)
        file: Option<PathBuf>,
    },
    /// Check a SPARQL query for identifiers outside the allowed set
    Check {
        /// Query file, or - for stdin
        file: PathBuf,
        /// Entity id the query may reference (repeatable)
        #[arg(long = "entity", short = 'e')]
        entities: Vec<String>,
    },
    /// List the properties generated queries may use
    Properties {
        /// Filter by id, label or description
        #[arg(long, short)]
        search: Option<String>,
    },
    /// Print the effective configuration
    Config,
}

pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    PipelineConfig::load(path).context("Failed to load configuration")
}

/// Contents of `path`, or stdin when it is absent or `-`
pub fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(p) if p != Path::new("-") => {
            std::fs::read_to_string(p).with_context(|| format!("Failed to read {}", p.display()))
        }
        _ => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read stdin")?;
            Ok(text)
        }
    }
}
