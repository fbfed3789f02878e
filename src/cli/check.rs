use std::path::Path;

use anyhow::{bail, Result};
use console::style;
use kgrag_core::QueryGuard;

use super::{load_config, read_input};

pub fn run(config_path: Option<&Path>, file: &Path, entities: &[String]) -> Result<()> {
    let query = read_input(Some(file))?;
    let properties = load_config(config_path)?.load_properties()?;
    let guard = QueryGuard::new(entities.iter().map(String::as_str), &properties);

    match guard.check(&query) {
        Ok(()) => {
            eprintln!("{} Query uses only allowed identifiers", style("✓").green());
            Ok(())
        }
        Err(ids) => {
            for id in &ids {
                println!("{id}");
            }
            bail!("{} identifier(s) not allowed: {}", ids.len(), ids.join(", "))
        }
    }
}
