use std::collections::HashMap;

use reqwest::header::ACCEPT;
use reqwest::Method;
use serde::Deserialize;

use super::{ExecutionError, ExecutionResult, QueryEndpoint, QueryResult, Row};
use crate::config::KnowledgeBaseConfig;
use crate::network::{ClientError, ClientResult, HttpClient};

const SPARQL_RESULTS_JSON: &str = "application/sparql-results+json";

/// Wikidata Query Service SPARQL endpoint
pub struct WikidataSparql {
    client: HttpClient,
    url: String,
}

#[derive(Debug, Deserialize)]
struct SparqlResponse {
    #[serde(default)]
    head: SparqlHead,
    results: Option<SparqlBindings>,
    boolean: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct SparqlHead {
    #[serde(default)]
    vars: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SparqlBindings {
    #[serde(default)]
    bindings: Vec<HashMap<String, SparqlTerm>>,
}

#[derive(Debug, Deserialize)]
struct SparqlTerm {
    value: String,
}

impl SparqlResponse {
    fn into_result(self) -> ExecutionResult<QueryResult> {
        if let Some(answer) = self.boolean {
            return Ok(QueryResult::new(vec!["boolean".to_string()])
                .with_row([("boolean", answer.to_string())]));
        }

        let bindings = self.results.ok_or_else(|| {
            ExecutionError::InvalidResponse("neither results nor boolean in response".into())
        })?;

        let vars = self.head.vars;
        let rows = bindings
            .bindings
            .into_iter()
            .map(|mut binding| {
                vars.iter()
                    .filter_map(|var| binding.remove(var).map(|term| (var.clone(), term.value)))
                    .collect::<Row>()
            })
            .collect();

        Ok(QueryResult { vars, rows })
    }
}

impl WikidataSparql {
    pub fn new(config: &KnowledgeBaseConfig) -> ClientResult<Self> {
        Ok(Self {
            client: HttpClient::new(config.network.clone())?,
            url: config.sparql_url.clone(),
        })
    }

    fn parse(body: &str) -> ExecutionResult<QueryResult> {
        let response: SparqlResponse = serde_json::from_str(body)
            .map_err(|e| ExecutionError::InvalidResponse(e.to_string()))?;
        response.into_result()
    }
}

#[async_trait::async_trait]
impl QueryEndpoint for WikidataSparql {
    async fn execute(&self, query: &str) -> ExecutionResult<QueryResult> {
        let params = [("query", query), ("format", "json")];
        let response = self
            .client
            .send(Method::GET, &self.url, |r| {
                r.query(&params).header(ACCEPT, SPARQL_RESULTS_JSON)
            })
            .await?;

        let body = response.text().await.map_err(ClientError::from)?;
        let result = Self::parse(&body)?;
        tracing::debug!("SPARQL query returned {} rows", result.len());

        Ok(result)
    }
}
