//! Application configuration: JSON file, then environment / CLI overrides.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::trading::TradingConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub binance_api_key: String,
    pub binance_secret_key: String,

    /// Trade on the futures testnet instead of the live exchange
    pub testnet: bool,

    /// Address the webhook server binds to
    pub listen_addr: String,

    pub trading: TradingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            binance_api_key: String::new(),
            binance_secret_key: String::new(),
            testnet: false,
            listen_addr: "0.0.0.0:8002".to_string(),
            trading: TradingConfig::default(),
        }
    }
}

/// Values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub api_key: Option<String>,
    pub secret_key: Option<String>,
    pub testnet: Option<bool>,
    pub listen_addr: Option<String>,
}

impl AppConfig {
    /// Load the config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(key) = overrides.api_key {
            self.binance_api_key = key;
        }
        if let Some(secret) = overrides.secret_key {
            self.binance_secret_key = secret;
        }
        if let Some(testnet) = overrides.testnet {
            self.testnet = testnet;
        }
        if let Some(addr) = overrides.listen_addr {
            self.listen_addr = addr;
        }
    }

    /// API key and secret, trimmed. Errors if either is missing.
    pub fn credentials(&self) -> Result<(&str, &str)> {
        let key = self.binance_api_key.trim();
        let secret = self.binance_secret_key.trim();
        if key.is_empty() || secret.is_empty() {
            bail!(
                "Binance credentials missing: set binance_api_key / binance_secret_key in the \
                 config file or BINANCE_API_KEY / BINANCE_SECRET_KEY in the environment"
            );
        }
        Ok((key, secret))
    }

    /// API key prefix safe to print.
    pub fn masked_api_key(&self) -> String {
        let key = self.binance_api_key.trim();
        if key.is_empty() {
            "(not set)".to_string()
        } else {
            format!("{}...", key.chars().take(8).collect::<String>())
        }
    }
}
