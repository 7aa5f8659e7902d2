//! Allocator configuration.
//!
//! Loaded from TOML with per-field defaults, then optionally overridden from
//! environment variables:
//!
//! | Variable | Field |
//! |---|---|
//! | `STABLEID_MAX_CAS_RETRIES` | `registry.max_cas_retries` |
//! | `STABLEID_CAS_INITIAL_BACKOFF_MS` | `registry.cas_initial_backoff_ms` |
//! | `STABLEID_CAS_MAX_BACKOFF_MS` | `registry.cas_max_backoff_ms` |
//! | `STABLEID_RESERVE_COUNT` | `pool.reserve_count` |
//!
//! ```toml
//! [registry]
//! max_cas_retries = 10
//!
//! [pool]
//! reserve_count = 50
//! ```

use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use snafu::ResultExt;
use snafu::Snafu;

use crate::constants::CAS_RETRY_INITIAL_BACKOFF_MS;
use crate::constants::CAS_RETRY_MAX_BACKOFF_MS;
use crate::constants::DEFAULT_MAX_CAS_RETRIES;
use crate::constants::DEFAULT_RESERVE_COUNT;
use crate::constants::MAX_CAS_RETRIES;
use crate::constants::MAX_RESERVE_COUNT;

/// Configuration error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// A configuration value is invalid.
    #[snafu(display("invalid configuration for {key}: '{value}' ({reason})"))]
    InvalidValue { key: String, value: String, reason: String },

    /// The configuration file could not be read.
    #[snafu(display("failed to read config file {}: {source}", path.display()))]
    ReadFile { path: PathBuf, source: std::io::Error },

    /// The configuration file is not valid TOML for this schema.
    #[snafu(display("failed to parse config: {source}"))]
    ParseToml { source: toml::de::Error },
}

mod defaults {
    pub fn max_cas_retries() -> u32 {
        super::DEFAULT_MAX_CAS_RETRIES
    }
    pub fn cas_initial_backoff_ms() -> u64 {
        super::CAS_RETRY_INITIAL_BACKOFF_MS
    }
    pub fn cas_max_backoff_ms() -> u64 {
        super::CAS_RETRY_MAX_BACKOFF_MS
    }
    pub fn reserve_count() -> u32 {
        super::DEFAULT_RESERVE_COUNT
    }
}

/// Retry policy for reserve and commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Attempts before giving up with a conflict error.
    #[serde(default = "defaults::max_cas_retries")]
    pub max_cas_retries: u32,
    /// Backoff after the first lost race.
    #[serde(default = "defaults::cas_initial_backoff_ms")]
    pub cas_initial_backoff_ms: u64,
    /// Backoff ceiling.
    #[serde(default = "defaults::cas_max_backoff_ms")]
    pub cas_max_backoff_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_cas_retries: defaults::max_cas_retries(),
            cas_initial_backoff_ms: defaults::cas_initial_backoff_ms(),
            cas_max_backoff_ms: defaults::cas_max_backoff_ms(),
        }
    }
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_cas_retries == 0 || self.max_cas_retries > MAX_CAS_RETRIES {
            return Err(ConfigError::InvalidValue {
                key: "registry.max_cas_retries".to_string(),
                value: self.max_cas_retries.to_string(),
                reason: format!("must be between 1 and {MAX_CAS_RETRIES}"),
            });
        }
        if self.cas_initial_backoff_ms > self.cas_max_backoff_ms {
            return Err(ConfigError::InvalidValue {
                key: "registry.cas_initial_backoff_ms".to_string(),
                value: self.cas_initial_backoff_ms.to_string(),
                reason: format!("must not exceed cas_max_backoff_ms ({})", self.cas_max_backoff_ms),
            });
        }
        Ok(())
    }
}

/// Client-side reservation pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// IDs reserved per batch.
    #[serde(default = "defaults::reserve_count")]
    pub reserve_count: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            reserve_count: defaults::reserve_count(),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reserve_count == 0 || self.reserve_count > MAX_RESERVE_COUNT {
            return Err(ConfigError::InvalidValue {
                key: "pool.reserve_count".to_string(),
                value: self.reserve_count.to_string(),
                reason: format!("must be between 1 and {MAX_RESERVE_COUNT}"),
            });
        }
        Ok(())
    }
}

/// Complete allocator configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StableIdConfig {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub pool: PoolConfig,
}

impl StableIdConfig {
    /// Parse configuration from a TOML string.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).context(ParseTomlSnafu)
    }

    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        tracing::info!(path = %path.display(), "loaded stable id configuration");
        Self::from_toml_str(&contents)
    }

    /// Load with layers: optional TOML file, then environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `STABLEID_*` environment variables.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = parse_override(&lookup, "STABLEID_MAX_CAS_RETRIES")? {
            self.registry.max_cas_retries = v;
        }
        if let Some(v) = parse_override(&lookup, "STABLEID_CAS_INITIAL_BACKOFF_MS")? {
            self.registry.cas_initial_backoff_ms = v;
        }
        if let Some(v) = parse_override(&lookup, "STABLEID_CAS_MAX_BACKOFF_MS")? {
            self.registry.cas_max_backoff_ms = v;
        }
        if let Some(v) = parse_override(&lookup, "STABLEID_RESERVE_COUNT")? {
            self.pool.reserve_count = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.registry.validate()?;
        self.pool.validate()
    }
}

fn parse_override<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>, ConfigError>
where T::Err: std::fmt::Display {
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    raw.trim().parse::<T>().map(Some).map_err(|e| ConfigError::InvalidValue {
        key: name.to_string(),
        value: raw.clone(),
        reason: e.to_string(),
    })
}
