//! TOML configuration for building a provider and fetcher.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration that talks to Yahoo Finance with the adjusted-close/close
//! fallback.
//!
//! ```toml
//! [provider]
//! kind = "yahoo"            # or "csv"
//! csv_path = "prices.csv"   # required when kind = "csv"
//! timeout_secs = 30
//!
//! [circuit_breaker]
//! failure_threshold = 3
//! cooldown_secs = 1800
//!
//! [fetch]
//! price_fields = ["adj_close", "close"]
//! ```

use crate::data::yahoo::{DEFAULT_BASE_URL, DEFAULT_USER_AGENT};
use crate::data::{
    CircuitBreaker, DataError, PriceField, PriceProvider, StaticProvider, YahooProvider,
    YahooSettings,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize config TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("provider setup failed: {0}")]
    Provider(#[from] DataError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Yahoo,
    Csv,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csv_path: Option<PathBuf>,
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Yahoo,
            csv_path: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    /// Candidate fields, tried in order for each row.
    pub price_fields: Vec<PriceField>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            price_fields: PriceField::CLOSE_FALLBACK.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub provider: ProviderConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub fetch: FetchSettings,
}

impl FetchConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch.price_fields.is_empty() {
            return Err(ConfigError::Invalid(
                "fetch.price_fields must name at least one field".into(),
            ));
        }
        if self.provider.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "provider.timeout_secs must be positive".into(),
            ));
        }
        if self.provider.kind == ProviderKind::Csv && self.provider.csv_path.is_none() {
            return Err(ConfigError::Invalid(
                "provider.csv_path is required when provider.kind = \"csv\"".into(),
            ));
        }
        Ok(())
    }

    pub fn yahoo_settings(&self) -> YahooSettings {
        YahooSettings {
            base_url: self.provider.base_url.clone(),
            user_agent: self.provider.user_agent.clone(),
            timeout: Duration::from_secs(self.provider.timeout_secs),
        }
    }

    pub fn circuit_breaker(&self) -> CircuitBreaker {
        CircuitBreaker::new(
            Duration::from_secs(self.circuit_breaker.cooldown_secs),
            self.circuit_breaker.failure_threshold,
        )
    }

    /// Build the configured provider.
    pub fn build_provider(&self) -> Result<Box<dyn PriceProvider>, ConfigError> {
        self.validate()?;
        match self.provider.kind {
            ProviderKind::Yahoo => {
                let provider =
                    YahooProvider::new(self.yahoo_settings(), Arc::new(self.circuit_breaker()))?;
                Ok(Box::new(provider))
            }
            ProviderKind::Csv => {
                let path = self.provider.csv_path.as_deref().ok_or_else(|| {
                    ConfigError::Invalid("provider.csv_path is required".into())
                })?;
                Ok(Box::new(StaticProvider::from_csv(path)?))
            }
        }
    }
}
