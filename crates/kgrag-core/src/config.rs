use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::knowledge::MAX_CANDIDATES;
use crate::network::{NetworkConfig, NetworkConfigError};
use crate::properties::{PropertyAllowList, PropertyError};

pub const DEFAULT_SEARCH_URL: &str = "https://www.wikidata.org/w/api.php";
pub const DEFAULT_SPARQL_URL: &str = "https://query.wikidata.org/sparql";
pub const DEFAULT_HF_MODEL: &str = "mistralai/Mistral-7B-Instruct-v0.3";
pub const DEFAULT_HF_BASE_URL: &str = "https://api-inference.huggingface.co/models";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Config file name under the user config directory
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid config {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("Unknown language model provider: {0}")]
    UnknownProvider(String),
    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("{service} network settings: {source}")]
    Network {
        service: &'static str,
        source: NetworkConfigError,
    },
    #[error(transparent)]
    Properties(#[from] PropertyError),
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LlmProviderKind {
    #[default]
    #[serde(rename = "huggingface")]
    HuggingFace,
    #[serde(rename = "openai")]
    OpenAi,
}

impl LlmProviderKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HuggingFace => "huggingface",
            Self::OpenAi => "openai",
        }
    }

    /// Environment variables conventionally holding this provider's token
    const fn key_variables(self) -> &'static [&'static str] {
        match self {
            Self::HuggingFace => &["HF_TOKEN", "HUGGINGFACEHUB_API_TOKEN"],
            Self::OpenAi => &["OPENAI_API_KEY"],
        }
    }
}

impl fmt::Display for LlmProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LlmProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "huggingface" | "hf" => Ok(Self::HuggingFace),
            "openai" => Ok(Self::OpenAi),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

/// Language model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProviderKind,
    /// Model id; provider default when unset
    pub model: Option<String>,
    /// API base URL; provider default when unset
    pub base_url: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_new_tokens: u32,
    pub network: NetworkConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::default(),
            model: None,
            base_url: None,
            api_key: None,
            temperature: 0.0,
            max_new_tokens: 1024,
            network: NetworkConfig::for_language_model(),
        }
    }
}

impl LlmConfig {
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(match self.provider {
            LlmProviderKind::HuggingFace => DEFAULT_HF_MODEL,
            LlmProviderKind::OpenAi => DEFAULT_OPENAI_MODEL,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(match self.provider {
            LlmProviderKind::HuggingFace => DEFAULT_HF_BASE_URL,
            LlmProviderKind::OpenAi => DEFAULT_OPENAI_BASE_URL,
        })
    }
}

/// Wikidata endpoints and search settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeBaseConfig {
    pub search_url: String,
    pub sparql_url: String,
    /// Language for search matching and returned labels
    pub language: String,
    /// Candidates requested per mention (1..=5)
    pub search_limit: usize,
    pub network: NetworkConfig,
}

impl Default for KnowledgeBaseConfig {
    fn default() -> Self {
        Self {
            search_url: DEFAULT_SEARCH_URL.to_string(),
            sparql_url: DEFAULT_SPARQL_URL.to_string(),
            language: "en".to_string(),
            search_limit: MAX_CANDIDATES,
            network: NetworkConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Look up all mentions at once instead of one after another
    pub concurrent_lookups: bool,
    /// Rows passed to the answer stage
    pub max_context_rows: usize,
    /// Upper bound for any single stage, retries included
    pub stage_timeout_seconds: u64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            concurrent_lookups: true,
            max_context_rows: 50,
            stage_timeout_seconds: 180,
        }
    }
}

/// Everything needed to build a `Pipeline`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub llm: LlmConfig,
    pub knowledge_base: KnowledgeBaseConfig,
    pub pipeline: PipelineOptions,
    /// Replacement property table; the built-in table when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties_path: Option<PathBuf>,
}

impl PipelineConfig {
    /// `<config_dir>/kgrag/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("kgrag").join(CONFIG_FILE))
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Load from `path`, else the user config file if present, else defaults,
    /// then apply environment overrides and validate
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => {
                    tracing::debug!("Using config file {}", path.display());
                    Self::from_file(&path)?
                }
                None => Self::default(),
            },
        };

        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `KGRAG_*` variables looked up through `get`
    pub fn apply_overrides<F>(&mut self, get: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| get(name).filter(|v| !v.trim().is_empty());

        if let Some(provider) = get("KGRAG_LLM_PROVIDER") {
            self.llm.provider = provider.parse()?;
        }
        if let Some(model) = get("KGRAG_LLM_MODEL") {
            self.llm.model = Some(model);
        }
        if let Some(base_url) = get("KGRAG_LLM_BASE_URL") {
            self.llm.base_url = Some(base_url);
        }
        if let Some(key) = get("KGRAG_LLM_API_KEY") {
            self.llm.api_key = Some(key);
        } else if self.llm.api_key.is_none() {
            self.llm.api_key = self
                .llm
                .provider
                .key_variables()
                .iter()
                .find_map(|&name| get(name));
        }
        if let Some(language) = get("KGRAG_LANGUAGE") {
            self.knowledge_base.language = language;
        }
        if let Some(path) = get("KGRAG_PROPERTIES") {
            self.properties_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let kb = &self.knowledge_base;

        if !(1..=MAX_CANDIDATES).contains(&kb.search_limit) {
            return Err(ConfigError::invalid(
                "knowledge_base.search_limit",
                format!("must be between 1 and {MAX_CANDIDATES}"),
            ));
        }
        if kb.language.trim().is_empty() {
            return Err(ConfigError::invalid("knowledge_base.language", "must not be empty"));
        }
        validate_url("knowledge_base.search_url", &kb.search_url)?;
        validate_url("knowledge_base.sparql_url", &kb.sparql_url)?;
        validate_url("llm.base_url", self.llm.base_url())?;

        kb.network
            .validate()
            .map_err(|source| ConfigError::Network {
                service: "knowledge_base",
                source,
            })?;
        self.llm
            .network
            .validate()
            .map_err(|source| ConfigError::Network {
                service: "llm",
                source,
            })?;

        if self.pipeline.max_context_rows == 0 {
            return Err(ConfigError::invalid(
                "pipeline.max_context_rows",
                "must be greater than zero",
            ));
        }
        if self.pipeline.stage_timeout_seconds == 0 {
            return Err(ConfigError::invalid(
                "pipeline.stage_timeout_seconds",
                "must be greater than zero",
            ));
        }
        if !self.llm.temperature.is_finite() || self.llm.temperature < 0.0 {
            return Err(ConfigError::invalid("llm.temperature", "must be zero or positive"));
        }
        Ok(())
    }

    pub fn load_properties(&self) -> ConfigResult<PropertyAllowList> {
        let list = match &self.properties_path {
            Some(path) => PropertyAllowList::load(path)?,
            None => PropertyAllowList::builtin()?,
        };
        Ok(list)
    }
}

fn validate_url(field: &'static str, value: &str) -> ConfigResult<()> {
    let url = Url::parse(value).map_err(|e| ConfigError::invalid(field, e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::invalid(
            field,
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    Ok(())
}
