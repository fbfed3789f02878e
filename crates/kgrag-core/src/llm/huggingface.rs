use serde::{Deserialize, Serialize};

use super::{Completion, CompletionError, CompletionResult};
use crate::config::LlmConfig;
use crate::network::HttpClient;

/// HuggingFace Inference API text-generation client
pub struct HuggingFaceProvider {
    client: HttpClient,
    endpoint: String,
    model: String,
    api_key: String,
    max_new_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    inputs: &'a str,
    parameters: GenerateParameters,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateParameters {
    max_new_tokens: u32,
    return_full_text: bool,
    do_sample: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    wait_for_model: bool,
}

#[derive(Debug, Deserialize)]
struct Generated {
    generated_text: String,
}

impl HuggingFaceProvider {
    pub fn new(config: &LlmConfig) -> CompletionResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(CompletionError::MissingApiKey("HuggingFace"))?;

        let endpoint = format!("{}/{}", config.base_url().trim_end_matches('/'), config.model());

        Ok(Self {
            client: HttpClient::new(config.network.clone())?,
            endpoint,
            model: config.model().to_string(),
            api_key,
            max_new_tokens: config.max_new_tokens,
            temperature: config.temperature,
        })
    }

    fn request<'a>(&self, prompt: &'a str) -> GenerateRequest<'a> {
        // The API rejects temperature 0; greedy decoding is expressed with do_sample
        let sample = self.temperature > 0.0;
        GenerateRequest {
            inputs: prompt,
            parameters: GenerateParameters {
                max_new_tokens: self.max_new_tokens,
                return_full_text: false,
                do_sample: sample,
                temperature: sample.then_some(self.temperature),
            },
            options: GenerateOptions {
                wait_for_model: true,
            },
        }
    }
}

#[async_trait::async_trait]
impl Completion for HuggingFaceProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> CompletionResult<String> {
        let body = self.request(prompt);
        let generated: Vec<Generated> = self
            .client
            .post_json(&self.endpoint, &body, Some(self.api_key.as_str()))
            .await?;

        generated
            .into_iter()
            .next()
            .map(|g| g.generated_text)
            .ok_or(CompletionError::EmptyResponse)
    }
}
