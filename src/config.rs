use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QuarryError, Result};

/// Behaviour of a plan once its time limit is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutStrategy {
    /// Raise [`QuarryError::Timeout`].
    #[default]
    Fail,
    /// End the stream quietly with whatever was produced so far.
    Return,
}

/// Tunables for planning and execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Seed tuples pulled per batch by traversal steps.
    pub traverse_batch_size: usize,
    /// Pattern aliases estimated below this many rows are prefetched.
    pub prefetch_threshold: u64,
    /// Upper bound on AND blocks produced when flattening a predicate.
    pub max_flattened_blocks: usize,
    /// Time limit applied when a statement does not carry its own.
    pub default_timeout_ms: Option<u64>,
    /// What to do when a time limit is exceeded.
    pub timeout_strategy: TimeoutStrategy,
    /// Collect per-step timings for `pretty_print`.
    pub profile_steps: bool,
    /// Capacity of the plan cache.
    pub plan_cache_capacity: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            traverse_batch_size: 100,
            prefetch_threshold: 100,
            max_flattened_blocks: 64,
            default_timeout_ms: None,
            timeout_strategy: TimeoutStrategy::Fail,
            profile_steps: false,
            plan_cache_capacity: 256,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    execution: Option<ExecutionConfig>,
}

impl ExecutionConfig {
    /// Interactive workloads: short default timeout, larger plan cache.
    pub fn interactive() -> Self {
        Self {
            default_timeout_ms: Some(30_000),
            plan_cache_capacity: 1024,
            ..Self::default()
        }
    }

    /// Analytical workloads: no timeout, larger batches, more flattening headroom.
    pub fn analytical() -> Self {
        Self {
            traverse_batch_size: 1000,
            max_flattened_blocks: 256,
            plan_cache_capacity: 64,
            ..Self::default()
        }
    }

    /// Diagnostics: profiling on, small cache so plans are rebuilt often.
    pub fn diagnostic() -> Self {
        Self {
            profile_steps: true,
            plan_cache_capacity: 16,
            ..Self::default()
        }
    }

    /// Parses the `[execution]` table of a TOML document.
    ///
    /// Missing keys fall back to [`ExecutionConfig::default`].
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(text)?;
        let config = file.execution.unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML configuration file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| QuarryError::Config(format!("{}: {err}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Applies `QUARRY_*` environment overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(value) = env_u64("QUARRY_TRAVERSE_BATCH_SIZE")? {
            self.traverse_batch_size = value as usize;
        }
        if let Some(value) = env_u64("QUARRY_PREFETCH_THRESHOLD")? {
            self.prefetch_threshold = value;
        }
        if let Some(value) = env_u64("QUARRY_TIMEOUT_MS")? {
            self.default_timeout_ms = Some(value);
        }
        if std::env::var_os("QUARRY_PROFILE").is_some() {
            self.profile_steps = true;
        }
        self.validate()?;
        Ok(self)
    }

    /// Default timeout as a [`Duration`].
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }

    fn validate(&self) -> Result<()> {
        if self.traverse_batch_size == 0 {
            return Err(QuarryError::Config(
                "traverse_batch_size must be positive".into(),
            ));
        }
        if self.max_flattened_blocks == 0 {
            return Err(QuarryError::Config(
                "max_flattened_blocks must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|err| QuarryError::Config(format!("{name}={raw}: {err}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_table_keeps_defaults() -> Result<()> {
        let config = ExecutionConfig::from_toml_str(
            r#"
            [execution]
            traverse_batch_size = 10
            timeout_strategy = "return"
            "#,
        )?;
        assert_eq!(config.traverse_batch_size, 10);
        assert_eq!(config.timeout_strategy, TimeoutStrategy::Return);
        assert_eq!(config.prefetch_threshold, 100);
        Ok(())
    }

    #[test]
    fn rejects_zero_batch() {
        let err = ExecutionConfig::from_toml_str("[execution]\ntraverse_batch_size = 0\n")
            .unwrap_err();
        assert_eq!(err.code(), "Config");
    }

    #[test]
    fn empty_document_is_default() -> Result<()> {
        assert_eq!(ExecutionConfig::from_toml_str("")?, ExecutionConfig::default());
        Ok(())
    }
}
