use thiserror::Error;

use crate::config::ConfigError;
use crate::knowledge::ExecutionError;
use crate::llm::CompletionError;
use crate::network::ClientError;
use crate::pipeline::{Stage, SynthesisError};

/// Why a question did not get an answer
///
/// Each variant is a distinct outcome with its own user-facing message, so
/// callers never have to show a raw error chain.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Question is empty")]
    EmptyQuestion,

    #[error("No entities found in the question")]
    NoEntitiesFound,

    #[error("No mention could be matched to a Wikidata entity: {}", .unresolved.join(", "))]
    NoResolvedEntities { unresolved: Vec<String> },

    #[error("Knowledge base search failed for: {}", .mentions.join(", "))]
    RetrievalFailed { mentions: Vec<String> },

    #[error("Query synthesis failed: {0}")]
    SynthesisFailed(#[source] SynthesisError),

    #[error("Query execution failed: {0}")]
    ExecutionFailed(#[source] ExecutionError),

    #[error("Language model failed during {stage}: {source}")]
    ModelUnavailable {
        stage: Stage,
        #[source]
        source: CompletionError,
    },

    #[error("{stage} stage timed out")]
    StageTimedOut { stage: Stage },
}

impl PipelineError {
    /// Stable identifier for machine consumers
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::EmptyQuestion => "empty_question",
            Self::NoEntitiesFound => "no_entities_found",
            Self::NoResolvedEntities { .. } => "no_resolved_entities",
            Self::RetrievalFailed { .. } => "retrieval_failed",
            Self::SynthesisFailed(_) => "synthesis_failed",
            Self::ExecutionFailed(_) => "execution_failed",
            Self::ModelUnavailable { .. } => "model_unavailable",
            Self::StageTimedOut { .. } => "stage_timed_out",
        }
    }

    /// Message suitable for showing to the person who asked
    pub fn user_message(&self) -> String {
        match self {
            Self::EmptyQuestion => "Please ask a question.".to_string(),
            Self::NoEntitiesFound => {
                "I couldn't find anything to look up in that question. \
                 Try rephrasing it with the names of the things you are asking about."
                    .to_string()
            }
            Self::NoResolvedEntities { unresolved } => format!(
                "I couldn't match {} to anything in Wikidata, so I can't answer this question.",
                quoted_list(unresolved)
            ),
            Self::RetrievalFailed { .. } => {
                "I couldn't reach the Wikidata search service. Please try again later.".to_string()
            }
            Self::SynthesisFailed(SynthesisError::Empty) => {
                "Sorry, this kind of question is not supported yet.".to_string()
            }
            Self::SynthesisFailed(_) => {
                "Sorry, I couldn't construct a query for this question.".to_string()
            }
            Self::ExecutionFailed(ExecutionError::Timeout) => {
                "The Wikidata query took too long and was stopped. Try a narrower question."
                    .to_string()
            }
            Self::ExecutionFailed(_) => {
                "I couldn't reach the knowledge base to run the query. Please try again later."
                    .to_string()
            }
            Self::ModelUnavailable { .. } => {
                "The language model is not available right now. Please try again later."
                    .to_string()
            }
            Self::StageTimedOut { stage } => {
                format!("The {stage} step took too long. Please try again later.")
            }
        }
    }

    /// Failures caused by an upstream service rather than by the question
    pub const fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::RetrievalFailed { .. }
                | Self::ExecutionFailed(_)
                | Self::ModelUnavailable { .. }
                | Self::StageTimedOut { .. }
        )
    }
}

fn quoted_list(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|m| format!("\"{m}\"")).collect();
    match quoted.as_slice() {
        [] => "the question".to_string(),
        [one] => one.clone(),
        [init @ .., last] => format!("{} or {}", init.join(", "), last),
    }
}

/// Failure to assemble a pipeline from configuration
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Language model setup failed: {0}")]
    Completion(#[from] CompletionError),
    #[error("HTTP client setup failed: {0}")]
    Client(#[from] ClientError),
}
