pub mod answer;
pub mod disambiguator;
pub mod executor;
pub mod extractor;
pub mod guard;
pub mod retriever;
pub mod synthesizer;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tracing::Instrument;
use uuid::Uuid;

pub use answer::AnswerGenerator;
pub use disambiguator::{Disambiguator, Resolution, ResolvedEntity, UnresolvedReason};
pub use executor::QueryExecutor;
pub use extractor::EntityExtractor;
pub use guard::{referenced_ids, QueryGuard};
pub use retriever::{EntityRetriever, Lookup};
pub use synthesizer::{QuerySynthesizer, StructuredQuery, SynthesisError, SynthesisResult};

use crate::config::{PipelineConfig, PipelineOptions};
use crate::error::{BuildError, PipelineError};
use crate::knowledge::{
    EntitySearch, QueryEndpoint, QueryResult, WikidataSearch, WikidataSparql, MAX_CANDIDATES,
};
use crate::llm::{provider_from_config, Completion};
use crate::properties::PropertyAllowList;

/// Pipeline step, used to attribute failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extraction,
    Retrieval,
    Disambiguation,
    Synthesis,
    Execution,
    Answer,
}

impl Stage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Retrieval => "retrieval",
            Self::Disambiguation => "disambiguation",
            Self::Synthesis => "synthesis",
            Self::Execution => "execution",
            Self::Answer => "answer",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened while answering one question
#[derive(Debug, Clone, Serialize)]
pub struct PipelineTrace {
    pub request_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub question: String,
    pub mentions: Vec<String>,
    pub resolutions: Vec<Resolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<QueryResult>,
    pub elapsed_ms: u64,
}

impl PipelineTrace {
    fn new(question: &str) -> Self {
        Self {
            request_id: Uuid::now_v7(),
            started_at: Utc::now(),
            question: question.to_string(),
            mentions: Vec::new(),
            resolutions: Vec::new(),
            query: None,
            result: None,
            elapsed_ms: 0,
        }
    }

    pub fn resolved(&self) -> impl Iterator<Item = &ResolvedEntity> {
        self.resolutions.iter().filter_map(Resolution::entity)
    }
}

/// Trace plus outcome of one run
#[derive(Debug)]
pub struct PipelineReport {
    pub trace: PipelineTrace,
    pub outcome: Result<String, PipelineError>,
}

impl PipelineReport {
    pub fn answer(&self) -> Option<&str> {
        self.outcome.as_deref().ok()
    }

    pub fn error(&self) -> Option<&PipelineError> {
        self.outcome.as_ref().err()
    }

    /// The answer, or the error rendered for the person who asked
    pub fn into_message(self) -> String {
        match self.outcome {
            Ok(answer) => answer,
            Err(e) => e.user_message(),
        }
    }
}

#[derive(Serialize)]
struct ReportError {
    kind: &'static str,
    message: String,
    detail: String,
}

#[derive(Serialize)]
struct ReportView<'a> {
    #[serde(flatten)]
    trace: &'a PipelineTrace,
    #[serde(skip_serializing_if = "Option::is_none")]
    answer: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ReportError>,
}

impl Serialize for PipelineReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ReportView {
            trace: &self.trace,
            answer: self.answer(),
            error: self.error().map(|e| ReportError {
                kind: e.kind(),
                message: e.user_message(),
                detail: e.to_string(),
            }),
        }
        .serialize(serializer)
    }
}

/// Question answering over a knowledge graph
///
/// Holds the shared, read-only collaborators; every call to [`Pipeline::run`]
/// builds its per-request state from scratch.
pub struct Pipeline {
    completion: Arc<dyn Completion>,
    search: Arc<dyn EntitySearch>,
    endpoint: Arc<dyn QueryEndpoint>,
    properties: Arc<PropertyAllowList>,
    options: PipelineOptions,
    search_limit: usize,
    language: String,
}

impl Pipeline {
    pub fn new(
        completion: Arc<dyn Completion>,
        search: Arc<dyn EntitySearch>,
        endpoint: Arc<dyn QueryEndpoint>,
        properties: Arc<PropertyAllowList>,
    ) -> Self {
        Self {
            completion,
            search,
            endpoint,
            properties,
            options: PipelineOptions::default(),
            search_limit: MAX_CANDIDATES,
            language: "en".to_string(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_search_limit(mut self, limit: usize) -> Self {
        self.search_limit = limit.clamp(1, MAX_CANDIDATES);
        self
    }

    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Wikidata search and SPARQL plus the configured model provider
    pub fn from_config(config: &PipelineConfig) -> Result<Self, BuildError> {
        config.validate()?;

        let properties = Arc::new(config.load_properties()?);
        let completion = provider_from_config(&config.llm)?;
        let search = Arc::new(WikidataSearch::new(&config.knowledge_base)?);
        let endpoint = Arc::new(WikidataSparql::new(&config.knowledge_base)?);
        tracing::info!("Loaded {} allowed properties", properties.len());

        Ok(Self::new(completion, search, endpoint, properties)
            .with_options(config.pipeline.clone())
            .with_search_limit(config.knowledge_base.search_limit)
            .with_language(config.knowledge_base.language.clone()))
    }

    pub fn properties(&self) -> &PropertyAllowList {
        &self.properties
    }

    pub fn model_name(&self) -> &str {
        self.completion.model_name()
    }

    fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.options.stage_timeout_seconds)
    }

    async fn bounded<T>(&self, stage: Stage, work: impl Future<Output = T>) -> Result<T, PipelineError> {
        tokio::time::timeout(self.stage_timeout(), work)
            .await
            .map_err(|_| PipelineError::StageTimedOut { stage })
    }

    /// Answer `question`, recording every intermediate result
    pub async fn run(&self, question: &str) -> PipelineReport {
        let mut trace = PipelineTrace::new(question);
        let span = tracing::info_span!("request", id = %trace.request_id);
        let start = Instant::now();

        let outcome = self.answer(question, &mut trace).instrument(span.clone()).await;

        trace.elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        span.in_scope(|| match &outcome {
            Ok(_) => tracing::info!("Answered in {} ms", trace.elapsed_ms),
            Err(e) => tracing::warn!("No answer ({}): {}", e.kind(), e),
        });

        PipelineReport { trace, outcome }
    }

    /// Answer text, or a message naming why there is none
    pub async fn handle(&self, question: &str) -> String {
        self.run(question).await.into_message()
    }

    /// Extraction, retrieval and disambiguation only
    pub async fn resolve(&self, question: &str) -> Result<Vec<Resolution>, PipelineError> {
        let mut trace = PipelineTrace::new(question);
        let span = tracing::info_span!("resolve", id = %trace.request_id);
        self.resolve_into(question, &mut trace).instrument(span).await?;
        Ok(trace.resolutions)
    }

    async fn resolve_into(&self, question: &str, trace: &mut PipelineTrace) -> Result<(), PipelineError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(PipelineError::EmptyQuestion);
        }

        let extractor = EntityExtractor::new(self.completion.as_ref());
        let mentions = self
            .bounded(Stage::Extraction, extractor.extract(question))
            .await?
            .map_err(|source| PipelineError::ModelUnavailable {
                stage: Stage::Extraction,
                source,
            })?;
        tracing::info!("Extracted mentions: {:?}", mentions);
        trace.mentions.clone_from(&mentions);

        if mentions.is_empty() {
            return Err(PipelineError::NoEntitiesFound);
        }

        let mut retriever = EntityRetriever::new(self.search.as_ref(), self.search_limit, self.stage_timeout());
        if !self.options.concurrent_lookups {
            retriever = retriever.sequential();
        }
        let lookups = retriever.retrieve_all(&mentions).await;

        let disambiguator = Disambiguator::new(self.completion.as_ref());
        for lookup in lookups {
            let resolution = match lookup.outcome {
                Ok(candidates) => self
                    .bounded(
                        Stage::Disambiguation,
                        disambiguator.disambiguate(question, &lookup.mention, &candidates),
                    )
                    .await?
                    .map_err(|source| PipelineError::ModelUnavailable {
                        stage: Stage::Disambiguation,
                        source,
                    })?,
                Err(_) => Resolution::unresolved(&lookup.mention, UnresolvedReason::RetrievalFailed),
            };
            trace.resolutions.push(resolution);
        }

        Ok(())
    }

    async fn answer(&self, question: &str, trace: &mut PipelineTrace) -> Result<String, PipelineError> {
        self.resolve_into(question, trace).await?;
        let question = question.trim();

        let resolved: Vec<ResolvedEntity> = trace.resolved().cloned().collect();
        let unresolved: Vec<&Resolution> = trace
            .resolutions
            .iter()
            .filter(|r| r.entity().is_none())
            .collect();

        if resolved.is_empty() {
            let all_failed = unresolved.iter().all(|r| {
                matches!(
                    r,
                    Resolution::Unresolved {
                        reason: UnresolvedReason::RetrievalFailed,
                        ..
                    }
                )
            });
            let mentions = unresolved.iter().map(|r| r.mention().to_string()).collect();
            return Err(if all_failed {
                PipelineError::RetrievalFailed { mentions }
            } else {
                PipelineError::NoResolvedEntities { unresolved: mentions }
            });
        }
        if !unresolved.is_empty() {
            tracing::warn!(
                "Proceeding with {} of {} mentions; unresolved: {:?}",
                resolved.len(),
                trace.resolutions.len(),
                unresolved.iter().map(|r| r.mention()).collect::<Vec<_>>()
            );
        }

        let synthesizer = QuerySynthesizer::new(self.completion.as_ref(), &self.properties)
            .with_language(&self.language);
        let query = self
            .bounded(Stage::Synthesis, synthesizer.synthesize(question, &resolved))
            .await?
            .map_err(|e| match e {
                SynthesisError::Model(source) => PipelineError::ModelUnavailable {
                    stage: Stage::Synthesis,
                    source,
                },
                other => PipelineError::SynthesisFailed(other),
            })?;
        trace.query = Some(query.as_str().to_string());

        let executor = QueryExecutor::new(self.endpoint.as_ref(), self.stage_timeout());
        let result = executor
            .execute(&query)
            .await
            .map_err(PipelineError::ExecutionFailed)?;
        trace.result = Some(result.clone());

        let answerer = AnswerGenerator::new(self.completion.as_ref(), self.options.max_context_rows);
        self.bounded(Stage::Answer, answerer.answer(question, &result))
            .await?
            .map_err(|source| PipelineError::ModelUnavailable {
                stage: Stage::Answer,
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::ExecutionError;
    use crate::properties::Property;
    use crate::testing::{ScriptedCompletion, StaticEndpoint, StaticSearch};

    const MOSQUE_QUERY: &str = "SPARQL Query: ```sparql\n\
        SELECT ?mosqueLabel ?countryLabel WHERE {\n\
          ?mosque wdt:P31 wd:Q32815 ; wdt:P17 ?country .\n\
          SERVICE wikibase:label { bd:serviceParam wikibase:language \"en\". }\n\
        }\n```";

    fn properties() -> Arc<PropertyAllowList> {
        Arc::new(
            PropertyAllowList::from_properties(vec![
                Property::new("P31", "instance of"),
                Property::new("P17", "country"),
            ])
            .unwrap(),
        )
    }

    fn mosque_search() -> StaticSearch {
        StaticSearch::new()
            .with(
                "Mosque",
                &[
                    ("Q32815", "mosque"),
                    ("Q1454820", "Mosque"),
                    ("Q6901", "Mosque"),
                    ("Q20669", "Mosque"),
                    ("Q3330018", "Mosque"),
                ],
            )
            .with(
                "Country",
                &[
                    ("Q6256", "country"),
                    ("Q1244922", "Country"),
                    ("Q5177918", "Country"),
                    ("Q17201685", "Country"),
                    ("Q2277", "Country"),
                ],
            )
    }

    fn mosque_rows() -> QueryResult {
        QueryResult::new(vec!["mosqueLabel".into(), "countryLabel".into()])
            .with_row([("mosqueLabel", "Blue Mosque"), ("countryLabel", "Turkey")])
            .with_row([("mosqueLabel", "Faisal Mosque"), ("countryLabel", "Pakistan")])
    }

    fn pipeline(model: &Arc<ScriptedCompletion>, search: &Arc<StaticSearch>, endpoint: &Arc<StaticEndpoint>) -> Pipeline {
        Pipeline::new(model.clone(), search.clone(), endpoint.clone(), properties())
    }

    fn mosque_model() -> ScriptedCompletion {
        ScriptedCompletion::new()
            .on(extractor::TASK, r#"```json{"entities": ["Mosque", "Country"]}```"#)
            .on_all(
                &[disambiguator::TASK, "Mention: Mosque"],
                r#"{"id": "Q32815"}"#,
            )
            .on_all(&[disambiguator::TASK, "Mention: Country"], r#"{"id": "Q6256"}"#)
            .on(synthesizer::TASK, MOSQUE_QUERY)
            .on(
                answer::TASK,
                "The Blue Mosque is in Turkey and the Faisal Mosque is in Pakistan.",
            )
    }

    #[tokio::test]
    async fn test_mosques_with_countries() {
        let model = Arc::new(mosque_model());
        let search = Arc::new(mosque_search());
        let endpoint = Arc::new(StaticEndpoint::returning(mosque_rows()));

        let report = pipeline(&model, &search, &endpoint).run("Mosques, with countries").await;

        assert_eq!(
            report.answer(),
            Some("The Blue Mosque is in Turkey and the Faisal Mosque is in Pakistan.")
        );
        assert_eq!(report.trace.mentions, vec!["Mosque", "Country"]);
        let ids: Vec<&str> = report.trace.resolved().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["Q32815", "Q6256"]);
        assert!(report.trace.query.as_deref().unwrap().contains("wdt:P17"));
        assert_eq!(report.trace.result.as_ref().unwrap().len(), 2);
        assert_eq!(endpoint.queries().len(), 1);

        let answer_prompt = model.prompts_matching(answer::TASK);
        assert!(answer_prompt[0].contains("Faisal Mosque"));
    }

    #[tokio::test]
    async fn test_no_entities_makes_no_knowledge_base_calls() {
        let model = Arc::new(ScriptedCompletion::new().on(extractor::TASK, r#"{"entities": []}"#));
        let search = Arc::new(mosque_search());
        let endpoint = Arc::new(StaticEndpoint::returning(mosque_rows()));

        let report = pipeline(&model, &search, &endpoint).run("how fast is it?").await;

        assert!(matches!(report.error(), Some(PipelineError::NoEntitiesFound)));
        assert_eq!(search.calls(), 0);
        assert!(endpoint.queries().is_empty());
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_absent_entity_stops_before_synthesis() {
        let model = Arc::new(ScriptedCompletion::new().on(extractor::TASK, r#"{"entities": ["Zorblaxian"]}"#));
        let search = Arc::new(StaticSearch::new());
        let endpoint = Arc::new(StaticEndpoint::returning(mosque_rows()));

        let report = pipeline(&model, &search, &endpoint).run("Where do Zorblaxians live?").await;

        match report.error() {
            Some(PipelineError::NoResolvedEntities { unresolved }) => {
                assert_eq!(unresolved, &vec!["Zorblaxian".to_string()]);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(model.prompts_matching(synthesizer::TASK).is_empty());
        assert!(model.prompts_matching(disambiguator::TASK).is_empty());
        assert!(endpoint.queries().is_empty());
    }

    #[tokio::test]
    async fn test_execution_timeout_is_not_an_empty_answer() {
        let model = Arc::new(mosque_model());
        let search = Arc::new(mosque_search());
        let endpoint = Arc::new(StaticEndpoint::failing(ExecutionError::Timeout));

        let report = pipeline(&model, &search, &endpoint).run("Mosques, with countries").await;

        assert!(matches!(
            report.error(),
            Some(PipelineError::ExecutionFailed(ExecutionError::Timeout))
        ));
        assert!(model.prompts_matching(answer::TASK).is_empty());
    }

    #[tokio::test]
    async fn test_empty_result_reaches_answer_stage() {
        let model = Arc::new(mosque_model());
        let search = Arc::new(mosque_search());
        let endpoint = Arc::new(StaticEndpoint::returning(QueryResult::new(vec!["mosqueLabel".into()])));

        let report = pipeline(&model, &search, &endpoint).run("Mosques, with countries").await;

        assert!(report.answer().is_some());
        let prompts = model.prompts_matching(answer::TASK);
        assert!(prompts[0].contains("returned no results"));
    }

    #[tokio::test]
    async fn test_hallucinated_query_is_rejected() {
        let model = Arc::new(mosque_model().on(
            synthesizer::TASK,
            "SPARQL Query: ```sparql\nSELECT ?m WHERE { ?m wdt:P31 wd:Q32815 ; wdt:P131 wd:Q79 . }\n```",
        ));
        let search = Arc::new(mosque_search());
        let endpoint = Arc::new(StaticEndpoint::returning(mosque_rows()));

        let report = pipeline(&model, &search, &endpoint).run("Mosques, with countries").await;

        match report.error() {
            Some(PipelineError::SynthesisFailed(SynthesisError::DisallowedIds(ids))) => {
                assert_eq!(ids, &vec!["P131".to_string(), "Q79".to_string()]);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(endpoint.queries().is_empty());
        assert!(report.trace.query.is_none());
    }

    #[tokio::test]
    async fn test_partial_resolution_proceeds() {
        let model = Arc::new(mosque_model());
        let search = Arc::new(mosque_search().failing("Country"));
        let endpoint = Arc::new(StaticEndpoint::returning(mosque_rows()));

        let report = pipeline(&model, &search, &endpoint).run("Mosques, with countries").await;

        assert!(report.answer().is_some());
        assert_eq!(
            report.trace.resolutions[1],
            Resolution::unresolved("Country", UnresolvedReason::RetrievalFailed)
        );
        let synthesis = model.prompts_matching(synthesizer::TASK);
        assert!(synthesis[0].contains("Q32815"));
        assert!(!synthesis[0].contains("Q6256"));
    }

    #[tokio::test]
    async fn test_all_lookups_failing_is_retrieval_failure() {
        let model = Arc::new(mosque_model());
        let search = Arc::new(StaticSearch::new().failing("Mosque").failing("Country"));
        let endpoint = Arc::new(StaticEndpoint::returning(mosque_rows()));

        let report = pipeline(&model, &search, &endpoint).run("Mosques, with countries").await;

        assert!(matches!(report.error(), Some(PipelineError::RetrievalFailed { .. })));
        assert_eq!(report.error().unwrap().kind(), "retrieval_failed");
    }

    #[tokio::test]
    async fn test_model_failure_names_stage() {
        let model = Arc::new(ScriptedCompletion::new().unavailable("HTTP 503"));
        let search = Arc::new(mosque_search());
        let endpoint = Arc::new(StaticEndpoint::returning(mosque_rows()));

        let report = pipeline(&model, &search, &endpoint).run("Mosques, with countries").await;

        assert!(matches!(
            report.error(),
            Some(PipelineError::ModelUnavailable {
                stage: Stage::Extraction,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_invalid_selection_never_reaches_synthesis() {
        let model = Arc::new(
            ScriptedCompletion::new()
                .on(extractor::TASK, r#"{"entities": ["Mosque"]}"#)
                .on(disambiguator::TASK, r#"{"id": "Q42"}"#),
        );
        let search = Arc::new(mosque_search());
        let endpoint = Arc::new(StaticEndpoint::returning(mosque_rows()));

        let report = pipeline(&model, &search, &endpoint).run("Mosques").await;

        assert_eq!(
            report.trace.resolutions,
            vec![Resolution::unresolved("Mosque", UnresolvedReason::InvalidSelection)]
        );
        assert!(matches!(report.error(), Some(PipelineError::NoResolvedEntities { .. })));
    }

    #[tokio::test]
    async fn test_same_question_resolves_the_same() {
        let model = Arc::new(mosque_model());
        let search = Arc::new(mosque_search());
        let endpoint = Arc::new(StaticEndpoint::returning(mosque_rows()));
        let pipeline = pipeline(&model, &search, &endpoint);

        let first = pipeline.resolve("Mosques, with countries").await.unwrap();
        let second = pipeline.resolve("Mosques, with countries").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_empty_question() {
        let model = Arc::new(ScriptedCompletion::new());
        let search = Arc::new(StaticSearch::new());
        let endpoint = Arc::new(StaticEndpoint::returning(QueryResult::default()));

        let message = pipeline(&model, &search, &endpoint).handle("   ").await;
        assert_eq!(message, PipelineError::EmptyQuestion.user_message());
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_model_times_out() {
        let model = Arc::new(mosque_model().with_delay(Duration::from_secs(3600)));
        let search = Arc::new(mosque_search());
        let endpoint = Arc::new(StaticEndpoint::returning(mosque_rows()));

        let report = pipeline(&model, &search, &endpoint)
            .with_options(PipelineOptions {
                stage_timeout_seconds: 5,
                ..PipelineOptions::default()
            })
            .run("Mosques, with countries")
            .await;

        assert!(matches!(
            report.error(),
            Some(PipelineError::StageTimedOut {
                stage: Stage::Extraction
            })
        ));
    }

    #[tokio::test]
    async fn test_report_serializes_outcome() {
        let model = Arc::new(ScriptedCompletion::new().on(extractor::TASK, r#"{"entities": []}"#));
        let search = Arc::new(StaticSearch::new());
        let endpoint = Arc::new(StaticEndpoint::returning(QueryResult::default()));

        let report = pipeline(&model, &search, &endpoint).run("how fast is it?").await;
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["question"], "how fast is it?");
        assert_eq!(json["error"]["kind"], "no_entities_found");
        assert!(json.get("answer").is_none());
        assert!(json["request_id"].is_string());
    }
}
