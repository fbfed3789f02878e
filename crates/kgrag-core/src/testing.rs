//! In-process stand-ins for the model, search and query services.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::knowledge::{
    EntityCandidate, EntitySearch, ExecutionError, ExecutionResult, QueryEndpoint, QueryResult,
    SearchError, SearchResult,
};
use crate::llm::{Completion, CompletionError, CompletionResult};
use crate::network::ClientError;

struct Rule {
    needles: Vec<String>,
    response: String,
}

/// Answers prompts by substring rules; the most recently added matching rule wins
#[derive(Default)]
pub struct ScriptedCompletion {
    rules: Vec<Rule>,
    unavailable: Option<String>,
    delay: Option<Duration>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, needle: &str, response: &str) -> Self {
        self.on_all(&[needle], response)
    }

    pub fn on_all(mut self, needles: &[&str], response: &str) -> Self {
        self.rules.push(Rule {
            needles: needles.iter().map(|n| (*n).to_string()).collect(),
            response: response.to_string(),
        });
        self
    }

    pub fn unavailable(mut self, message: &str) -> Self {
        self.unavailable = Some(message.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts_matching(&self, needle: &str) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.contains(needle))
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl Completion for ScriptedCompletion {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str) -> CompletionResult<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.unavailable {
            return Err(CompletionError::Unavailable(message.clone()));
        }

        self.rules
            .iter()
            .rev()
            .find(|rule| rule.needles.iter().all(|n| prompt.contains(n.as_str())))
            .map(|rule| rule.response.clone())
            .ok_or_else(|| CompletionError::Unavailable("no scripted response".into()))
    }
}

/// Search index backed by a fixed map from mention to candidates
#[derive(Default)]
pub struct StaticSearch {
    entries: HashMap<String, Vec<EntityCandidate>>,
    failing: HashSet<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StaticSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, mention: &str, candidates: &[(&str, &str)]) -> Self {
        self.entries.insert(
            mention.to_string(),
            candidates
                .iter()
                .map(|(id, label)| EntityCandidate::new(*id, *label, ""))
                .collect(),
        );
        self
    }

    pub fn failing(mut self, mention: &str) -> Self {
        self.failing.insert(mention.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl EntitySearch for StaticSearch {
    async fn search(&self, mention: &str, _limit: usize) -> SearchResult<Vec<EntityCandidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(mention) {
            return Err(SearchError::Client(ClientError::Timeout {
                host: "www.wikidata.org".into(),
            }));
        }
        Ok(self.entries.get(mention).cloned().unwrap_or_default())
    }
}

/// Query endpoint returning one canned result or error
pub struct StaticEndpoint {
    outcome: ExecutionResult<QueryResult>,
    delay: Option<Duration>,
    queries: Mutex<Vec<String>>,
}

impl StaticEndpoint {
    pub fn returning(result: QueryResult) -> Self {
        Self {
            outcome: Ok(result),
            delay: None,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: ExecutionError) -> Self {
        Self {
            outcome: Err(error),
            delay: None,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl QueryEndpoint for StaticEndpoint {
    async fn execute(&self, query: &str) -> ExecutionResult<QueryResult> {
        self.queries.lock().unwrap().push(query.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outcome.clone()
    }
}
