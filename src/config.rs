//! Global configuration parsing and validation.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Timing and process-control knobs for the session runner.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RunnerConfig {
    /// Delay between a stop request and the forced `SIGKILL`.
    #[serde(default = "default_force_kill_delay_ms")]
    pub force_kill_delay_ms: u64,
    /// Idle heartbeat interval for attached subscribers.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Grace period before a completed session is evicted from the registry.
    #[serde(default = "default_cleanup_delay_seconds")]
    pub cleanup_delay_seconds: u64,
    /// Spawn each command in its own process group and signal the group.
    #[serde(default = "default_true")]
    pub process_groups: bool,
}

impl RunnerConfig {
    /// Delay before the stop escalation sends `SIGKILL`.
    #[must_use]
    pub fn force_kill_delay(&self) -> Duration {
        Duration::from_millis(self.force_kill_delay_ms)
    }

    /// Interval between idle heartbeat frames on a subscriber stream.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// How long a completed session stays reachable before eviction.
    #[must_use]
    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_secs(self.cleanup_delay_seconds)
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            force_kill_delay_ms: default_force_kill_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            cleanup_delay_seconds: default_cleanup_delay_seconds(),
            process_groups: default_true(),
        }
    }
}

fn default_force_kill_delay_ms() -> u64 {
    5_000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_cleanup_delay_seconds() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

fn default_http_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_http_port() -> u16 {
    3000
}

fn default_shell() -> String {
    if cfg!(windows) {
        "cmd".into()
    } else {
        "/bin/sh".into()
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Project root; every command runs with this as its working directory.
    pub project_root: PathBuf,
    /// Address the HTTP server binds to.
    #[serde(default = "default_http_host")]
    pub http_host: IpAddr,
    /// Port the HTTP server binds to; 0 lets the OS pick one.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Shell used to interpret command strings.
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Session runner timing.
    #[serde(default)]
    pub runner: RunnerConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration with defaults for everything but the project root.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `project_root` does not exist.
    pub fn for_project_root(project_root: impl Into<PathBuf>) -> Result<Self> {
        let mut config = Self {
            project_root: project_root.into(),
            http_host: default_http_host(),
            http_port: default_http_port(),
            shell: default_shell(),
            runner: RunnerConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Replace the project root, re-validating the new path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the path does not exist.
    pub fn set_project_root(&mut self, project_root: impl Into<PathBuf>) -> Result<()> {
        self.project_root = project_root.into();
        self.validate()
    }

    /// Socket address for the HTTP listener.
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http_host, self.http_port)
    }

    fn validate(&mut self) -> Result<()> {
        if self.shell.trim().is_empty() {
            return Err(AppError::Config("shell must not be empty".into()));
        }

        if self.runner.heartbeat_interval_ms == 0 {
            return Err(AppError::Config(
                "runner.heartbeat_interval_ms must be greater than zero".into(),
            ));
        }

        let canonical_root = self
            .project_root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("project_root invalid: {err}")))?;
        if !canonical_root.is_dir() {
            return Err(AppError::Config(format!(
                "project_root is not a directory: {}",
                canonical_root.display()
            )));
        }
        self.project_root = canonical_root;

        Ok(())
    }
}
