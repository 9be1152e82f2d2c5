// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::hash_signer::DigestAlgorithm;
use crate::window::{WindowConfig, DEFAULT_GRACE_MS, DEFAULT_MAX_RECORD_SIZE, DEFAULT_WINDOW_SIZE_MS};

pub const ENV_PREFIX: &str = "TRACE_REDUCER_";

const DEFAULT_REDUCTION_DEPTH: i64 = 10;
const DEFAULT_PARTITIONS: usize = 4;
const DEFAULT_STATUS_INTERVAL_SECS: u64 = 10;
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:4318";
const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration for the reconstruction and reduction pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Tumbling window size in event-time milliseconds
    pub window_size_ms: i64,
    /// Extra event time a window stays open after its end
    pub grace_ms: i64,
    /// Deepest call tree level kept by reduction
    pub reduction_depth: i64,
    /// Largest serialized trace handed to persistence, in bytes
    pub max_record_size: usize,
    pub partitions: usize,
    /// Count spans without windowing them
    pub discard: bool,
    pub digest_algorithm: DigestAlgorithm,
    pub status_interval: Duration,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
    pub listen_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_size_ms: DEFAULT_WINDOW_SIZE_MS,
            grace_ms: DEFAULT_GRACE_MS,
            reduction_depth: DEFAULT_REDUCTION_DEPTH,
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
            partitions: DEFAULT_PARTITIONS,
            discard: false,
            digest_algorithm: DigestAlgorithm::default(),
            status_interval: Duration::from_secs(DEFAULT_STATUS_INTERVAL_SECS),
            log_level: "info".to_string(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
        }
    }
}

impl Config {
    /// Create configuration from `TRACE_REDUCER_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            window_size_ms: parse_var("WINDOW_SIZE_MS")?.unwrap_or(defaults.window_size_ms),
            grace_ms: parse_var("GRACE_MS")?.unwrap_or(defaults.grace_ms),
            reduction_depth: parse_var("REDUCTION_DEPTH")?.unwrap_or(defaults.reduction_depth),
            max_record_size: parse_var("MAX_RECORD_SIZE")?.unwrap_or(defaults.max_record_size),
            partitions: parse_var("PARTITIONS")?.unwrap_or(defaults.partitions),
            discard: parse_var("DISCARD")?.unwrap_or(defaults.discard),
            digest_algorithm: match var("DIGEST_ALGORITHM") {
                Some(name) => name.parse()?,
                None => defaults.digest_algorithm,
            },
            status_interval: parse_var("STATUS_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.status_interval),
            log_level: var("LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
            listen_addr: var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.window_config().validate()?;

        if self.reduction_depth < 0 {
            return Err(ConfigError::NegativeDepthLimit(self.reduction_depth));
        }
        if self.partitions == 0 {
            return Err(ConfigError::Invalid(
                "partition count must be greater than 0".to_string(),
            ));
        }
        if self.status_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "status interval must be greater than 0".to_string(),
            ));
        }
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    pub fn window_config(&self) -> WindowConfig {
        WindowConfig {
            size_ms: self.window_size_ms,
            grace_ms: self.grace_ms,
            max_record_size: self.max_record_size,
        }
    }
}

fn var(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{name}"))
        .ok()
        .filter(|val| !val.trim().is_empty())
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    var(name)
        .map(|val| {
            val.trim().to_lowercase().parse::<T>().map_err(|_| {
                ConfigError::Invalid(format!("{ENV_PREFIX}{name} has invalid value '{val}'"))
            })
        })
        .transpose()
}
