use std::path::Path;

use anyhow::{bail, Context, Result};
use console::style;
use kgrag_core::{QueryEndpoint, WikidataSparql};

use super::{load_config, read_input};

pub async fn run(config_path: Option<&Path>, file: Option<&Path>) -> Result<()> {
    let query = read_input(file)?;
    if query.trim().is_empty() {
        bail!("query is empty");
    }

    let config = load_config(config_path)?;
    let endpoint = WikidataSparql::new(&config.knowledge_base)
        .context("Failed to set up the query endpoint")?;
    let result = endpoint.execute(query.trim()).await?;

    println!("{}", result.vars.join("\t"));
    for row in &result.rows {
        let cells: Vec<&str> = result
            .vars
            .iter()
            .map(|var| row.get(var).map_or("", String::as_str))
            .collect();
        println!("{}", cells.join("\t"));
    }
    eprintln!("{} {} rows", style("●").green(), result.len());

    Ok(())
}
