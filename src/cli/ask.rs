use std::path::Path;

use anyhow::{bail, Context, Result};
use console::style;
use kgrag_core::{Pipeline, PipelineReport, Resolution};

use super::load_config;

pub async fn run(config_path: Option<&Path>, question: &str, verbose: bool, json: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let pipeline = Pipeline::from_config(&config).context("Failed to set up the pipeline")?;

    let report = pipeline.run(question).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        if let Some(e) = report.error() {
            bail!("{}", e.kind());
        }
        return Ok(());
    }

    if verbose {
        print_trace(&report);
    }

    match report.outcome {
        Ok(answer) => {
            println!("{answer}");
            Ok(())
        }
        Err(e) => {
            tracing::debug!("{e}");
            bail!(e.user_message())
        }
    }
}

fn print_trace(report: &PipelineReport) {
    let trace = &report.trace;
    eprintln!("{} {}", style("Request").dim(), trace.request_id);
    eprintln!("{} {}", style("Mentions:").bold(), trace.mentions.join(", "));

    for resolution in &trace.resolutions {
        match resolution {
            Resolution::Resolved(entity) => eprintln!(
                "  {} {} {} {}",
                style("✓").green(),
                entity.mention,
                style(&entity.id).cyan(),
                style(&entity.label).dim()
            ),
            Resolution::Unresolved { mention, reason } => eprintln!(
                "  {} {} ({})",
                style("✗").red(),
                mention,
                reason.describe()
            ),
        }
    }

    if let Some(query) = &trace.query {
        eprintln!("{}", style("Query:").bold());
        eprintln!("{query}");
    }
    if let Some(result) = &trace.result {
        eprintln!("{} {}", style("Rows:").bold(), result.len());
    }
    eprintln!("{} {} ms", style("Elapsed:").dim(), trace.elapsed_ms);
}
