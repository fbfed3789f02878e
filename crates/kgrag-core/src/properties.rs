//! The fixed vocabulary of Wikidata properties a synthesized query may use.
//!
//! The default table holds the 100 most used properties and is compiled into
//! the binary. A replacement table can be loaded from a JSON file with the same
//! shape: an array of `{"id": "P31", "label": "instance of", "description": "..."}`.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const BUILTIN_PROPERTIES: &str = include_str!("../data/properties.json");

#[derive(Debug, Error)]
pub enum PropertyError {
    #[error("Failed to read property table {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid property table: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Not a property id: {0}")]
    InvalidId(String),
    #[error("Property listed twice: {0}")]
    Duplicate(String),
    #[error("Property table is empty")]
    Empty,
}

pub type PropertyResult<T> = Result<T, PropertyError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl Property {
    #[must_use]
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: String::new(),
        }
    }
}

/// Read-only set of allowed property ids, shared by every request
#[derive(Debug, Clone)]
pub struct PropertyAllowList {
    properties: Vec<Property>,
    ids: HashSet<String>,
}

impl PropertyAllowList {
    pub fn builtin() -> PropertyResult<Self> {
        Self::from_json(BUILTIN_PROPERTIES)
    }

    pub fn from_json(json: &str) -> PropertyResult<Self> {
        let properties: Vec<Property> = serde_json::from_str(json)?;
        Self::from_properties(properties)
    }

    pub fn load(path: &Path) -> PropertyResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|source| PropertyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn from_properties(properties: Vec<Property>) -> PropertyResult<Self> {
        if properties.is_empty() {
            return Err(PropertyError::Empty);
        }

        let mut ids = HashSet::with_capacity(properties.len());
        for property in &properties {
            if !is_property_id(&property.id) {
                return Err(PropertyError::InvalidId(property.id.clone()));
            }
            if !ids.insert(property.id.clone()) {
                return Err(PropertyError::Duplicate(property.id.clone()));
            }
        }

        Ok(Self { properties, ids })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn get(&self, id: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.id == id)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.properties.iter().map(|p| p.id.as_str())
    }

    /// Case-insensitive match on id, label or description
    pub fn search(&self, text: &str) -> Vec<&Property> {
        let needle = text.to_lowercase();
        self.properties
            .iter()
            .filter(|p| {
                p.id.to_lowercase() == needle
                    || p.label.to_lowercase().contains(&needle)
                    || p.description.to_lowercase().contains(&needle)
            })
            .collect()
    }

    /// One JSON object per line, in table order
    pub fn render_for_prompt(&self) -> String {
        self.properties
            .iter()
            .filter_map(|p| serde_json::to_string(p).ok())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn is_property_id(id: &str) -> bool {
    id.strip_prefix('P')
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}
