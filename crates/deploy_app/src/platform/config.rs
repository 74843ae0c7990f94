use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use deploy_engine::{BackendSettings, EngineSettings, JobPoller, StreamSettings};
use deploy_logging::deploy_info;
use serde::Deserialize;

use super::logging::LogDestination;

/// Looked up in the working directory when no `--config` is given.
pub(crate) const DEFAULT_CONFIG_FILE: &str = "deploy.ron";

#[derive(Debug, thiserror::Error)]
pub(crate) enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: ron::error::SpannedError,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Settings file contents. Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub(crate) struct DeployConfig {
    pub base_url: String,
    /// Sent verbatim as the `Cookie` header, e.g. `Some("tableau_token=...")`.
    pub session_cookie: Option<String>,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub poll_max_attempts: u32,
    pub stream_initial_timeout_secs: u64,
    pub stream_idle_timeout_secs: u64,
    pub reconnect_delay_secs: u64,
    pub startup_delay_millis: u64,
    pub log: LogDestination,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/bi/".to_string(),
            session_cookie: None,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            poll_interval_secs: 10,
            poll_max_attempts: 90,
            stream_initial_timeout_secs: 10,
            stream_idle_timeout_secs: 60,
            reconnect_delay_secs: 3,
            startup_delay_millis: 500,
            log: LogDestination::default(),
        }
    }
}

impl DeployConfig {
    /// Loads `explicit` if given, otherwise `fallback` when it exists, otherwise defaults.
    pub(crate) fn load(explicit: Option<&Path>, fallback: &Path) -> Result<Self, ConfigError> {
        let config = match explicit {
            Some(path) => Self::read(path)?,
            None => match fs::read_to_string(fallback) {
                Ok(text) => Self::parse(&text, fallback)?,
                Err(err) if err.kind() == io::ErrorKind::NotFound => Self::default(),
                Err(source) => {
                    return Err(ConfigError::Read {
                        path: fallback.to_path_buf(),
                        source,
                    })
                }
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let config = ron::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        deploy_info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("base_url must not be empty".into()));
        }
        if self.poll_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "poll_max_attempts must be at least 1".into(),
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            backend: BackendSettings {
                base_url: self.base_url.trim().to_string(),
                session_cookie: self.session_cookie.clone(),
                connect_timeout: Duration::from_secs(self.connect_timeout_secs),
                request_timeout: Duration::from_secs(self.request_timeout_secs),
            },
            poller: JobPoller::new(
                Duration::from_secs(self.poll_interval_secs),
                self.poll_max_attempts,
            ),
            stream: StreamSettings {
                initial_timeout: Duration::from_secs(self.stream_initial_timeout_secs),
                idle_timeout: Duration::from_secs(self.stream_idle_timeout_secs),
                reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
            },
            startup_delay: Duration::from_millis(self.startup_delay_millis),
        }
    }
}
