//! Canned collaborators for handler tests.

use std::sync::Arc;

use async_trait::async_trait;
use kgrag_core::llm::CompletionResult;
use kgrag_core::{
    Completion, CompletionError, EntityCandidate, EntitySearch, ExecutionError, Pipeline,
    PipelineOptions, PropertyAllowList, QueryEndpoint, QueryResult, SearchError,
};

use crate::state::AppState;

/// Answers by the instruction line each stage's prompt carries
pub struct CannedModel;

#[async_trait]
impl Completion for CannedModel {
    fn model_name(&self) -> &str {
        "canned"
    }

    async fn complete(&self, prompt: &str) -> CompletionResult<String> {
        let text = if prompt.contains("Extract the entities") {
            if prompt.contains("Question: Who is Zorblax?") {
                r#"```json{"entities": ["Zorblax"]}```"#
            } else if prompt.contains("Question: Hello there") {
                r#"```json{"entities": []}```"#
            } else {
                r#"```json{"entities": ["Mosque"]}```"#
            }
        } else if prompt.contains("Pick the Wikidata entity") {
            r#"```json{"id": "Q32815"}```"#
        } else if prompt.contains("Generate a SPARQL query") {
            "SPARQL Query: ```sparql\nSELECT ?m WHERE { ?m wdt:P31 wd:Q32815 }\n```"
        } else if prompt.contains("Answer the question") {
            "There are many mosques."
        } else {
            return Err(CompletionError::Unavailable("no canned reply".into()));
        };
        Ok(text.to_string())
    }
}

pub struct CannedSearch;

#[async_trait]
impl EntitySearch for CannedSearch {
    async fn search(&self, mention: &str, _limit: usize) -> Result<Vec<EntityCandidate>, SearchError> {
        if mention == "Mosque" {
            Ok(vec![EntityCandidate::new(
                "Q32815",
                "mosque",
                "place of worship for Muslims",
            )])
        } else {
            Ok(Vec::new())
        }
    }
}

pub struct CannedEndpoint {
    pub fail: bool,
}

#[async_trait]
impl QueryEndpoint for CannedEndpoint {
    async fn execute(&self, _query: &str) -> Result<QueryResult, ExecutionError> {
        if self.fail {
            return Err(ExecutionError::Timeout);
        }
        Ok(QueryResult::new(vec!["m".into()])
            .with_row([("m", "http://www.wikidata.org/entity/Q1")]))
    }
}

pub fn state() -> AppState {
    state_with_endpoint(CannedEndpoint { fail: false })
}

pub fn state_with_endpoint(endpoint: CannedEndpoint) -> AppState {
    let properties = PropertyAllowList::builtin().unwrap();
    let pipeline = Pipeline::new(
        Arc::new(CannedModel),
        Arc::new(CannedSearch),
        Arc::new(endpoint),
        Arc::new(properties),
    )
    .with_options(PipelineOptions::default());
    AppState::new(pipeline)
}
