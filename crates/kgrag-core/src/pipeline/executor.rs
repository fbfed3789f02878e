use std::time::Duration;

use super::synthesizer::StructuredQuery;
use crate::knowledge::{ExecutionError, ExecutionResult, QueryEndpoint, QueryResult};

/// Runs validated queries against the query endpoint
pub struct QueryExecutor<'a> {
    endpoint: &'a dyn QueryEndpoint,
    timeout: Duration,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(endpoint: &'a dyn QueryEndpoint, timeout: Duration) -> Self {
        Self { endpoint, timeout }
    }

    /// An empty result is `Ok`; only a query that could not run is an error
    pub async fn execute(&self, query: &StructuredQuery) -> ExecutionResult<QueryResult> {
        let result = tokio::time::timeout(self.timeout, self.endpoint.execute(query.as_str()))
            .await
            .map_err(|_| ExecutionError::Timeout)?;

        match &result {
            Ok(r) if r.is_empty() => tracing::info!("Query ran and returned no rows"),
            Ok(r) => tracing::info!("Query returned {} rows", r.len()),
            Err(e) => tracing::warn!("Query failed: {}", e),
        }
        result
    }
}
