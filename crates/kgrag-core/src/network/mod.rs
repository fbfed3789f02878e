mod client;
mod config;
mod retry;

pub use client::{truncate, ClientError, ClientResult, HttpClient};
pub use config::{NetworkConfig, NetworkConfigError, DEFAULT_USER_AGENT};
pub use retry::RetryPolicy;
