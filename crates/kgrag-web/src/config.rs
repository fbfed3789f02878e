use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;

const DEFAULT_BIND: &str = "127.0.0.1:8642";

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Listen address
    pub bind: SocketAddr,
    /// Pipeline config file; the user config file or defaults when unset
    pub config_path: Option<PathBuf>,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let bind = get("KGRAG_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind
            .parse()
            .with_context(|| format!("KGRAG_BIND is not a socket address: {bind}"))?;

        Ok(Self {
            bind,
            config_path: get("KGRAG_CONFIG").filter(|p| !p.is_empty()).map(PathBuf::from),
        })
    }
}
