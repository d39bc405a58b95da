use crate::checkgroup::{ConcurrentCheckgroup, Factory, SequentialCheckgroup};
use crate::error::{CheckError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix of the environment variables overriding file configuration,
/// e.g. `KETO_CHECK__MAX_READ_DEPTH=8`.
pub const ENV_PREFIX: &str = "KETO_CHECK";

/// How the branches of a union are evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckgroupKind {
    #[default]
    Concurrent,
    Sequential,
}

impl CheckgroupKind {
    pub fn factory(self) -> Factory {
        match self {
            CheckgroupKind::Concurrent => ConcurrentCheckgroup::factory as Factory,
            CheckgroupKind::Sequential => SequentialCheckgroup::factory as Factory,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound for the depth of a check or expand request
    pub max_read_depth: u32,
    /// Number of edges requested from the store per page
    pub page_size: usize,
    pub checkgroup: CheckgroupKind,
    /// Deadline applied to every check request, if any
    pub request_timeout_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_read_depth: 5,
            page_size: 100,
            checkgroup: CheckgroupKind::Concurrent,
            request_timeout_ms: None,
        }
    }
}

impl EngineConfig {
    /// Loads the configuration from an optional file, overridden by
    /// `KETO_CHECK__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: EngineConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_read_depth == 0 {
            return Err(CheckError::InvalidConfig(
                "max_read_depth must be at least 1".to_string(),
            ));
        }
        if self.page_size == 0 {
            return Err(CheckError::InvalidConfig(
                "page_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    /// Depth used for a request asking for `requested`: values of zero or
    /// above the configured maximum fall back to the maximum.
    pub fn effective_depth(&self, requested: Option<u32>) -> u32 {
        match requested {
            Some(depth) if depth > 0 && depth <= self.max_read_depth => depth,
            _ => self.max_read_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.checkgroup, CheckgroupKind::Concurrent);
        assert!(config.request_timeout().is_none());
    }

    #[test]
    fn test_effective_depth() {
        let config = EngineConfig::default();
        assert_eq!(config.effective_depth(None), 5);
        assert_eq!(config.effective_depth(Some(0)), 5);
        assert_eq!(config.effective_depth(Some(3)), 3);
        assert_eq!(config.effective_depth(Some(50)), 5);
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join(format!("auth-check-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("engine.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "max_read_depth: 8\ncheckgroup: sequential\nrequest_timeout_ms: 250").unwrap();

        let config = EngineConfig::load(Some(&path)).unwrap();
        assert_eq!(config.max_read_depth, 8);
        assert_eq!(config.page_size, 100);
        assert_eq!(config.checkgroup, CheckgroupKind::Sequential);
        assert_eq!(config.request_timeout(), Some(Duration::from_millis(250)));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let config = EngineConfig {
            page_size: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(CheckError::InvalidConfig(_))));
    }
}
