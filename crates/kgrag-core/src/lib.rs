pub mod config;
pub mod error;
pub mod knowledge;
pub mod llm;
pub mod network;
pub mod pipeline;
pub mod properties;

#[cfg(test)]
mod testing;

pub use config::{
    ConfigError, KnowledgeBaseConfig, LlmConfig, LlmProviderKind, PipelineConfig, PipelineOptions,
};
pub use error::{BuildError, PipelineError};
pub use knowledge::{
    EntityCandidate, EntitySearch, ExecutionError, QueryEndpoint, QueryResult, Row, SearchError,
    WikidataSearch, WikidataSparql,
};
pub use llm::{provider_from_config, Completion, CompletionError};
pub use network::{ClientError, HttpClient, NetworkConfig, RetryPolicy};
pub use pipeline::{
    Pipeline, PipelineReport, PipelineTrace, QueryGuard, Resolution, ResolvedEntity, Stage,
    StructuredQuery, SynthesisError, UnresolvedReason,
};
pub use properties::{Property, PropertyAllowList, PropertyError};
