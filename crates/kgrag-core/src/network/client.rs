use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use super::config::NetworkConfig;

/// Error bodies are only kept for diagnostics
const MAX_ERROR_BODY: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("Request to {host} timed out")]
    Timeout { host: String },
    #[error("Rate limited by {host}")]
    RateLimited {
        host: String,
        retry_after: Option<Duration>,
    },
    #[error("HTTP {status} from {host}: {body}")]
    Status {
        host: String,
        status: StatusCode,
        body: String,
    },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<ClientError>,
    },
}

impl ClientError {
    /// Whether sending the same request again may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::RateLimited { .. } => true,
            Self::Status { status, .. } => status.is_server_error(),
            Self::Http(e) => e.is_connect() || e.is_timeout(),
            Self::InvalidUrl(_) | Self::UrlParse(_) | Self::Exhausted { .. } => false,
        }
    }

    /// The underlying failure, looking through retry exhaustion
    pub fn root(&self) -> &Self {
        match self {
            Self::Exhausted { last, .. } => last.root(),
            other => other,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self.root() {
            Self::Status { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(StatusCode::TOO_MANY_REQUESTS),
            Self::Http(e) => e.status(),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self.root() {
            Self::Timeout { .. } => true,
            Self::Http(e) => e.is_timeout(),
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// HTTP client with fixed timeouts and bounded retries
///
/// Every request is validated before it leaves the process and every send is
/// bounded by the connect/request timeouts of the service's `NetworkConfig`.
/// Transient failures (timeouts, connect errors, 429, 5xx) are retried
/// according to the configured `RetryPolicy`; anything else is returned at once.
#[derive(Debug, Clone)]
pub struct HttpClient {
    config: NetworkConfig,
    inner: Client,
}

impl HttpClient {
    pub fn new(config: NetworkConfig) -> ClientResult<Self> {
        let inner = Client::builder()
            .connect_timeout(Duration::from_secs(u64::from(config.connect_timeout_seconds)))
            .timeout(Duration::from_secs(u64::from(config.request_timeout_seconds)))
            .user_agent(config.user_agent())
            .build()?;

        Ok(Self { config, inner })
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    fn validate_request(url: &str) -> ClientResult<(Url, String)> {
        let parsed = Url::parse(url)?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ClientError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| ClientError::InvalidUrl("No host in URL".to_string()))?
            .to_string();

        Ok((parsed, host))
    }

    /// Send a request, retrying transient failures
    ///
    /// `configure` is called once per attempt so bodies and headers are
    /// rebuilt for every retry.
    pub async fn send<F>(&self, method: Method, url: &str, configure: F) -> ClientResult<Response>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let (parsed, host) = Self::validate_request(url)?;
        let policy = self.config.retry;
        let attempts = policy.attempts();
        let mut attempt = 1;

        loop {
            let request = configure(self.inner.request(method.clone(), parsed.clone()));

            match Self::send_once(request, &host).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = policy.delay_for(attempt, e.retry_after());
                    tracing::warn!(
                        "{} {} failed (attempt {}/{}): {}; retrying in {:?}",
                        method,
                        host,
                        attempt,
                        attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_retryable() && attempts > 1 => {
                    return Err(ClientError::Exhausted {
                        attempts,
                        last: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(request: RequestBuilder, host: &str) -> ClientResult<Response> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ClientError::Timeout {
                    host: host.to_string(),
                }
            } else {
                ClientError::Http(e)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ClientError::RateLimited {
                host: host.to_string(),
                retry_after,
            });
        }

        let body = response.text().await.unwrap_or_default();
        Err(ClientError::Status {
            host: host.to_string(),
            status,
            body: truncate(&body, MAX_ERROR_BODY).to_string(),
        })
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> ClientResult<T> {
        let response = self.send(Method::GET, url, |r| r.query(query)).await?;
        Ok(response.json::<T>().await?)
    }

    pub async fn post_json<B, T>(&self, url: &str, body: &B, bearer: Option<&str>) -> ClientResult<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let response = self
            .send(Method::POST, url, |r| {
                let r = r.json(body);
                match bearer {
                    Some(token) => r.bearer_auth(token),
                    None => r,
                }
            })
            .await?;
        Ok(response.json::<T>().await?)
    }
}

/// Cut `text` to at most `max` bytes on a char boundary
pub fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
