use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;

// Relay service configuration sourced from environment variables. Fixed at
// startup; not reloadable.
#[derive(Debug, Clone)]
pub struct HubConfig {
    // TCP listener bind address.
    pub bind: SocketAddr,
    // Metrics HTTP listener bind address.
    pub metrics_bind: SocketAddr,
    // Per-connection inbound buffer capacity in bytes.
    pub buffer_bytes: usize,
    // Lowers the default log filter from info to debug.
    pub verbose: bool,
    // Optional credential service base URL.
    pub accounts_url: Option<String>,
    // Bounded timeout for credential service requests.
    pub accounts_timeout_ms: u64,
}

const DEFAULT_BUFFER_BYTES: usize = 8 * 1024;
const DEFAULT_ACCOUNTS_TIMEOUT_MS: u64 = 2000;

#[derive(Debug, Deserialize)]
struct HubConfigOverride {
    bind: Option<String>,
    metrics_bind: Option<String>,
    buffer_bytes: Option<usize>,
    verbose: Option<bool>,
    accounts_url: Option<String>,
    accounts_timeout_ms: Option<u64>,
}

impl HubConfig {
    pub fn from_env() -> Result<Self> {
        // Environment variables provide defaults for local development.
        let bind = std::env::var("HUB_BIND")
            .unwrap_or_else(|_| "0.0.0.0:1337".to_string())
            .parse()
            .with_context(|| "parse HUB_BIND")?;
        let metrics_bind = std::env::var("HUB_METRICS_BIND")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .with_context(|| "parse HUB_METRICS_BIND")?;
        let buffer_bytes = std::env::var("HUB_BUFFER_BYTES")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_BUFFER_BYTES);
        let verbose = std::env::var("HUB_VERBOSE")
            .ok()
            .map(|value| matches!(value.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let accounts_url = std::env::var("HUB_ACCOUNTS_URL").ok();
        let accounts_timeout_ms = std::env::var("HUB_ACCOUNTS_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_ACCOUNTS_TIMEOUT_MS);
        Ok(Self {
            bind,
            metrics_bind,
            buffer_bytes,
            verbose,
            accounts_url,
            accounts_timeout_ms,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("HUB_CONFIG") {
            // YAML overrides allow ops-friendly config files.
            let contents =
                fs::read_to_string(&path).with_context(|| format!("read HUB_CONFIG: {path}"))?;
            let override_cfg: HubConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse relay config yaml")?;
            if let Some(value) = override_cfg.bind {
                config.bind = value.parse().with_context(|| "parse bind")?;
            }
            if let Some(value) = override_cfg.metrics_bind {
                config.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
            }
            if let Some(value) = override_cfg.buffer_bytes
                && value > 0
            {
                config.buffer_bytes = value;
            }
            if let Some(value) = override_cfg.verbose {
                config.verbose = value;
            }
            if let Some(value) = override_cfg.accounts_url {
                config.accounts_url = Some(value);
            }
            if let Some(value) = override_cfg.accounts_timeout_ms
                && value > 0
            {
                config.accounts_timeout_ms = value;
            }
        }
        Ok(config)
    }
}
