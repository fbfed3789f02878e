use std::time::Duration;

use futures::future::join_all;

use crate::knowledge::{EntityCandidate, EntitySearch, SearchError, SearchResult, MAX_CANDIDATES};

/// Search outcome for one mention
#[derive(Debug)]
pub struct Lookup {
    pub mention: String,
    pub outcome: SearchResult<Vec<EntityCandidate>>,
}

/// Looks mentions up in the knowledge base's search index
pub struct EntityRetriever<'a> {
    search: &'a dyn EntitySearch,
    limit: usize,
    concurrent: bool,
    timeout: Duration,
}

impl<'a> EntityRetriever<'a> {
    pub fn new(search: &'a dyn EntitySearch, limit: usize, timeout: Duration) -> Self {
        Self {
            search,
            limit: limit.clamp(1, MAX_CANDIDATES),
            concurrent: true,
            timeout,
        }
    }

    #[must_use]
    pub fn sequential(mut self) -> Self {
        self.concurrent = false;
        self
    }

    /// Up to `limit` candidates in the search API's relevance order
    pub async fn retrieve(&self, mention: &str) -> SearchResult<Vec<EntityCandidate>> {
        let mut candidates = tokio::time::timeout(self.timeout, self.search.search(mention, self.limit))
            .await
            .map_err(|_| SearchError::TimedOut)??;
        candidates.truncate(self.limit);
        Ok(candidates)
    }

    /// One lookup per mention, returned in mention order
    pub async fn retrieve_all(&self, mentions: &[String]) -> Vec<Lookup> {
        if self.concurrent {
            join_all(mentions.iter().map(|m| self.lookup(m))).await
        } else {
            let mut lookups = Vec::with_capacity(mentions.len());
            for mention in mentions {
                lookups.push(self.lookup(mention).await);
            }
            lookups
        }
    }

    async fn lookup(&self, mention: &str) -> Lookup {
        let outcome = self.retrieve(mention).await;
        match &outcome {
            Ok(candidates) => tracing::debug!("'{}': {} candidates", mention, candidates.len()),
            Err(e) => tracing::warn!("Lookup for '{}' failed: {}", mention, e),
        }
        Lookup {
            mention: mention.to_string(),
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticSearch;

    fn mentions(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn test_results_follow_mention_order() {
        let search = StaticSearch::new()
            .with("Mosque", &[("Q32815", "mosque")])
            .with("Country", &[("Q6256", "country")]);
        let retriever = EntityRetriever::new(&search, 5, Duration::from_secs(5));

        let lookups = retriever.retrieve_all(&mentions(&["Mosque", "Country"])).await;
        assert_eq!(lookups.len(), 2);
        assert_eq!(lookups[0].mention, "Mosque");
        assert_eq!(lookups[0].outcome.as_ref().unwrap()[0].id, "Q32815");
        assert_eq!(lookups[1].outcome.as_ref().unwrap()[0].id, "Q6256");
    }

    #[tokio::test]
    async fn test_zero_results_is_not_an_error() {
        let search = StaticSearch::new();
        let retriever = EntityRetriever::new(&search, 5, Duration::from_secs(5)).sequential();

        let lookups = retriever.retrieve_all(&mentions(&["Zorblaxian"])).await;
        assert!(lookups[0].outcome.as_ref().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_per_mention() {
        let search = StaticSearch::new()
            .with("Mosque", &[("Q32815", "mosque")])
            .failing("Country");
        let retriever = EntityRetriever::new(&search, 5, Duration::from_secs(5));

        let lookups = retriever.retrieve_all(&mentions(&["Mosque", "Country"])).await;
        assert!(lookups[0].outcome.is_ok());
        assert!(lookups[1].outcome.is_err());
        assert_eq!(search.calls(), 2);
    }

    #[tokio::test]
    async fn test_caps_candidates_at_limit() {
        let many: Vec<(String, String)> = (1..=8).map(|i| (format!("Q{i}"), format!("item {i}"))).collect();
        let many: Vec<(&str, &str)> = many.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
        let search = StaticSearch::new().with("thing", &many);

        let candidates = EntityRetriever::new(&search, 3, Duration::from_secs(5))
            .retrieve("thing")
            .await
            .unwrap();
        assert_eq!(candidates.len(), 3);

        let candidates = EntityRetriever::new(&search, 50, Duration::from_secs(5))
            .retrieve("thing")
            .await
            .unwrap();
        assert_eq!(candidates.len(), MAX_CANDIDATES);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_search_times_out() {
        let search = StaticSearch::new()
            .with("Mosque", &[("Q32815", "mosque")])
            .with_delay(Duration::from_secs(60));
        let retriever = EntityRetriever::new(&search, 5, Duration::from_secs(1));

        assert!(matches!(
            retriever.retrieve("Mosque").await,
            Err(SearchError::TimedOut)
        ));
    }
}
