use std::fs;
use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

use crate::host::LogLevel;

const CONFIG_ENV: &str = "MERCURY_BRIDGE_CONFIG";
const CONFIG_FILE: &str = "bridge.yaml";
const DEFAULT_MAX_PENDING_JOBS: usize = 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read bridge config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("bridge config not found at {}", .0.display())]
    NotFound(PathBuf),
    #[error("max_pending_jobs must be at least 1")]
    InvalidJobLimit,
}

/// Settings for a bridge environment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Expose the singleton `mercury.dispatcher` on the bridge export.
    pub expose_dispatcher: bool,
    /// Upper bound on promise jobs drained per pump.
    pub max_pending_jobs: usize,
    /// Prints below this level are dropped before they reach the host.
    pub console_level: LogLevel,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            expose_dispatcher: true,
            max_pending_jobs: DEFAULT_MAX_PENDING_JOBS,
            console_level: LogLevel::Debug,
        }
    }
}

impl BridgeConfig {
    /// Load from `config_path`, or defaults when no path is given. A path
    /// that does not exist is an error.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let Some(path) = config_path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        let contents = fs::read_to_string(&path)?;
        tracing::debug!(target: "mercury", path = %path.display(), "loading bridge config");
        Self::from_yaml(&contents)
    }

    /// Load from `MERCURY_BRIDGE_CONFIG` when set, otherwise from the user's
    /// config directory if a file exists there.
    pub fn discover() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::load(Some(PathBuf::from(path)));
        }
        Self::load(default_config_path().filter(|path| path.exists()))
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: BridgeConfig = serde_yaml::from_str(contents)?;
        config.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.max_pending_jobs == 0 {
            return Err(ConfigError::InvalidJobLimit);
        }
        Ok(self)
    }
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "openwebf", "mercury").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn loads_default() {
        let config = BridgeConfig::load(None).unwrap();
        assert!(config.expose_dispatcher);
        assert_eq!(config.max_pending_jobs, DEFAULT_MAX_PENDING_JOBS);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let path = PathBuf::from("/definitely/not/here/bridge.yaml");
        match BridgeConfig::load(Some(path.clone())) {
            Err(ConfigError::NotFound(missing)) => assert_eq!(missing, path),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn loads_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        use std::io::Write;
        writeln!(
            file,
            "expose_dispatcher: false\nmax_pending_jobs: 16\nconsole_level: warn"
        )
        .unwrap();
        let config = BridgeConfig::load(Some(file.path().to_path_buf())).unwrap();
        assert!(!config.expose_dispatcher);
        assert_eq!(config.max_pending_jobs, 16);
        assert_eq!(config.console_level, LogLevel::Warn);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = BridgeConfig::from_yaml("console_level: error\n").unwrap();
        assert!(config.expose_dispatcher);
        assert_eq!(config.console_level, LogLevel::Error);
    }

    #[test]
    fn rejects_zero_job_limit() {
        let err = BridgeConfig::from_yaml("max_pending_jobs: 0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidJobLimit));
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(matches!(
            BridgeConfig::from_yaml("expose_dispatch: true"),
            Err(ConfigError::Yaml(_))
        ));
    }
}
