use serde::Deserialize;

use super::{EntityCandidate, EntitySearch, SearchResult, MAX_CANDIDATES};
use crate::config::KnowledgeBaseConfig;
use crate::network::{ClientResult, HttpClient};

/// `wbsearchentities` on the Wikibase action API
pub struct WikidataSearch {
    client: HttpClient,
    url: String,
    language: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: String,
    label: Option<String>,
    description: Option<String>,
    concepturi: Option<String>,
}

impl From<SearchHit> for EntityCandidate {
    fn from(hit: SearchHit) -> Self {
        Self {
            label: hit.label.unwrap_or_else(|| hit.id.clone()),
            description: hit.description.unwrap_or_default(),
            concept_uri: hit.concepturi,
            id: hit.id,
        }
    }
}

impl WikidataSearch {
    pub fn new(config: &KnowledgeBaseConfig) -> ClientResult<Self> {
        Ok(Self {
            client: HttpClient::new(config.network.clone())?,
            url: config.search_url.clone(),
            language: config.language.clone(),
        })
    }

    fn candidates(response: SearchResponse, limit: usize) -> Vec<EntityCandidate> {
        response
            .search
            .into_iter()
            .take(limit.min(MAX_CANDIDATES))
            .map(EntityCandidate::from)
            .collect()
    }
}

#[async_trait::async_trait]
impl EntitySearch for WikidataSearch {
    async fn search(&self, mention: &str, limit: usize) -> SearchResult<Vec<EntityCandidate>> {
        let limit = limit.clamp(1, MAX_CANDIDATES);
        let limit_param = limit.to_string();
        let params = [
            ("action", "wbsearchentities"),
            ("format", "json"),
            ("type", "item"),
            ("search", mention),
            ("language", self.language.as_str()),
            ("uselang", self.language.as_str()),
            ("limit", limit_param.as_str()),
        ];

        let response: SearchResponse = self.client.get_json(&self.url, &params).await?;
        let candidates = Self::candidates(response, limit);
        tracing::debug!("Search '{}' returned {} candidates", mention, candidates.len());

        Ok(candidates)
    }
}
