use std::path::Path;

use anyhow::{bail, Context, Result};
use console::style;
use kgrag_core::{Pipeline, Resolution};

use super::load_config;

pub async fn run(config_path: Option<&Path>, question: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let pipeline = Pipeline::from_config(&config).context("Failed to set up the pipeline")?;

    let resolutions = match pipeline.resolve(question).await {
        Ok(resolutions) => resolutions,
        Err(e) => bail!(e.user_message()),
    };

    for resolution in &resolutions {
        match resolution {
            Resolution::Resolved(entity) => {
                println!("{}\t{}\t{}", entity.mention, entity.id, entity.label);
                if !entity.description.is_empty() {
                    eprintln!("  {}", style(&entity.description).dim());
                }
            }
            Resolution::Unresolved { mention, reason } => {
                println!("{mention}\t-\t");
                eprintln!("  {} {}", style("unresolved:").yellow(), reason.describe());
            }
        }
    }

    Ok(())
}
