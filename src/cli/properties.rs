use std::path::Path;

use anyhow::Result;
use console::style;
use kgrag_core::Property;

use super::load_config;

pub fn run(config_path: Option<&Path>, search: Option<&str>) -> Result<()> {
    let properties = load_config(config_path)?.load_properties()?;

    let listed: Vec<&Property> = match search {
        Some(text) => properties.search(text),
        None => properties.iter().collect(),
    };

    for property in &listed {
        println!("{}\t{}", property.id, property.label);
    }
    eprintln!(
        "{} {} of {} properties",
        style("●").dim(),
        listed.len(),
        properties.len()
    );

    Ok(())
}
