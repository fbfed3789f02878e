mod search;
mod sparql;

use std::collections::BTreeMap;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::network::ClientError;

pub use search::WikidataSearch;
pub use sparql::WikidataSparql;

/// Upper bound on candidates kept per mention
pub const MAX_CANDIDATES: usize = 5;

/// A knowledge-base entry returned by search for one mention
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCandidate {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept_uri: Option<String>,
}

impl EntityCandidate {
    #[must_use]
    pub fn new(id: impl Into<String>, label: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: description.into(),
            concept_uri: None,
        }
    }
}

/// One result row: output variable name to value
pub type Row = BTreeMap<String, String>;

/// Tabular result of a structured query
///
/// `vars` keeps the projection order of the query; rows omit variables that
/// were left unbound.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    pub vars: Vec<String>,
    pub rows: Vec<Row>,
}

impl QueryResult {
    #[must_use]
    pub fn new(vars: Vec<String>) -> Self {
        Self {
            vars,
            rows: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_row<K, V>(mut self, row: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.rows
            .push(row.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Knowledge base search failed: {0}")]
    Client(#[from] ClientError),
    #[error("Knowledge base search timed out")]
    TimedOut,
}

pub type SearchResult<T> = Result<T, SearchError>;

/// Why a structured query could not run
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("Query rejected by the endpoint: {0}")]
    MalformedQuery(String),
    #[error("Query timed out")]
    Timeout,
    #[error("Query endpoint rate limit exceeded")]
    RateLimited,
    #[error("Query endpoint unavailable (HTTP {0})")]
    Unavailable(u16),
    #[error("Could not reach query endpoint: {0}")]
    Transport(String),
    #[error("Unreadable query response: {0}")]
    InvalidResponse(String),
}

impl From<ClientError> for ExecutionError {
    fn from(err: ClientError) -> Self {
        match err.root() {
            ClientError::Timeout { .. } => Self::Timeout,
            ClientError::RateLimited { .. } => Self::RateLimited,
            ClientError::Status { status, body, .. } => {
                // WDQS reports its own 60s query deadline as a 500 with a Java stack trace
                if body.contains("TimeoutException") || *status == StatusCode::GATEWAY_TIMEOUT {
                    Self::Timeout
                } else if *status == StatusCode::BAD_REQUEST {
                    Self::MalformedQuery(body.clone())
                } else {
                    Self::Unavailable(status.as_u16())
                }
            }
            ClientError::Http(e) if e.is_timeout() => Self::Timeout,
            ClientError::Http(e) if e.is_decode() => Self::InvalidResponse(e.to_string()),
            other => Self::Transport(other.to_string()),
        }
    }
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Free-text entity search, ranked by the knowledge base's relevance order
#[async_trait::async_trait]
pub trait EntitySearch: Send + Sync {
    async fn search(&self, mention: &str, limit: usize) -> SearchResult<Vec<EntityCandidate>>;
}

/// Structured query execution
#[async_trait::async_trait]
pub trait QueryEndpoint: Send + Sync {
    async fn execute(&self, query: &str) -> ExecutionResult<QueryResult>;
}
