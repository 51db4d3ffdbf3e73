//! Configuration loading and validation.
//!
//! Resolution order (highest to lowest priority):
//! 1. Explicit CLI flags (via [`ConfigOptions`])
//! 2. Environment variables (`ZENC_ZFS_BIN`, `ZENC_PROBE_TIMEOUT_MS`,
//!    `ZENC_QUERY_TIMEOUT_MS`)
//! 3. Config file: `--config`, else `ZENC_CONFIG`, else
//!    `$XDG_CONFIG_HOME/zenc/config.toml` when it exists
//! 4. Built-in defaults
//!
//! The capability override (`ZENC_ENCRYPTION_CLI_SUPPORTED`) is not read
//! here: the prober reads it when it probes, with `encryption_cli_supported`
//! from this config as the fallback.

use crate::tool_runner::{ToolConfig, ToolRunner};
use crate::zfs::{
    CapabilityProber, EncryptionGate, FeatureDetector, KeyVocabularyDetector, OverrideSource,
    SendPreflight, VersionDetector, ZfsCli, ZfsGet, DEFAULT_ZFS_BINARY,
    ENCRYPTION_CLI_OVERRIDE_ENV,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Config directory name under the XDG config home.
const CONFIG_DIR_NAME: &str = "zenc";

/// Config file name inside [`CONFIG_DIR_NAME`].
const CONFIG_FILE_NAME: &str = "config.toml";

/// Errors that can occur during config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidEnv {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("semantic validation failed: {0}")]
    Validation(String),
}

impl From<ConfigError> for zenc_common::Error {
    fn from(err: ConfigError) -> Self {
        zenc_common::Error::Config(err.to_string())
    }
}

/// Which capability heuristic to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectorKind {
    /// `zfs load-key` usage text mentions `load-key` and `keylocation`.
    #[default]
    KeyVocabulary,
    /// `zfs version` reports OpenZFS 0.8 or later.
    Version,
}

impl DetectorKind {
    pub fn detector(self) -> Box<dyn FeatureDetector> {
        match self {
            DetectorKind::KeyVocabulary => Box::new(KeyVocabularyDetector::default()),
            DetectorKind::Version => Box::new(VersionDetector::default()),
        }
    }
}

/// zenc configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ZencConfig {
    /// zfs binary name or path.
    pub zfs_binary: String,
    /// Timeout for the capability probe.
    pub probe_timeout_ms: u64,
    /// Timeout for each property query.
    pub query_timeout_ms: u64,
    /// Cap on captured output per stream.
    pub max_output_bytes: usize,
    /// Run zfs under `nice`.
    pub use_nice: bool,
    /// Forced capability result when the override variable is unset.
    pub encryption_cli_supported: Option<bool>,
    /// Capability heuristic.
    pub detector: DetectorKind,
}

impl Default for ZencConfig {
    fn default() -> Self {
        Self {
            zfs_binary: DEFAULT_ZFS_BINARY.to_string(),
            probe_timeout_ms: 10_000,
            query_timeout_ms: 30_000,
            max_output_bytes: 1024 * 1024,
            use_nice: false,
            encryption_cli_supported: None,
            detector: DetectorKind::default(),
        }
    }
}

impl ZencConfig {
    /// Reject values that parse but make no sense.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.zfs_binary.trim().is_empty() {
            return Err(ConfigError::Validation("zfs_binary must not be empty".to_string()));
        }
        if self.probe_timeout_ms == 0 {
            return Err(ConfigError::Validation("probe_timeout_ms must be positive".to_string()));
        }
        if self.query_timeout_ms == 0 {
            return Err(ConfigError::Validation("query_timeout_ms must be positive".to_string()));
        }
        if self.max_output_bytes == 0 {
            return Err(ConfigError::Validation("max_output_bytes must be positive".to_string()));
        }
        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Runner limits derived from this config.
    pub fn tool_config(&self) -> ToolConfig {
        ToolConfig {
            default_timeout: self.query_timeout(),
            max_output_bytes: self.max_output_bytes,
            use_nice: self.use_nice,
        }
    }

    /// Wire up the runner, prober, gate and preflight.
    pub fn build_services(&self) -> Services {
        let runner = Arc::new(ToolRunner::new(self.tool_config()));
        let cli = ZfsCli::new(runner, self.zfs_binary.clone());

        let prober = Arc::new(
            CapabilityProber::new(cli.clone().with_timeout(self.probe_timeout()))
                .with_detector(self.detector.detector())
                .with_override(OverrideSource::Env {
                    key: ENCRYPTION_CLI_OVERRIDE_ENV.to_string(),
                    fallback: self.encryption_cli_supported,
                }),
        );
        let query = Arc::new(ZfsGet::new(cli.with_timeout(self.query_timeout())));
        let gate = Arc::new(EncryptionGate::new(Arc::clone(&prober), query));
        let preflight = SendPreflight::new(Arc::clone(&gate));

        Services {
            prober,
            gate,
            preflight,
        }
    }
}

/// Long-lived service objects sharing one capability cache.
#[derive(Debug, Clone)]
pub struct Services {
    pub prober: Arc<CapabilityProber>,
    pub gate: Arc<EncryptionGate>,
    pub preflight: SendPreflight,
}

/// Configuration resolution options from the CLI.
#[derive(Debug, Default, Clone)]
pub struct ConfigOptions {
    /// Explicit config file (highest priority).
    pub config_path: Option<PathBuf>,
    /// `--zfs-bin`.
    pub zfs_binary: Option<String>,
    /// `--timeout`, applied to queries.
    pub query_timeout_ms: Option<u64>,
}

/// Configuration with provenance.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: ZencConfig,
    /// File the config was read from (None if using defaults).
    pub path: Option<PathBuf>,
}

/// Load configuration from the process environment.
pub fn load_config(options: &ConfigOptions) -> Result<ResolvedConfig, ConfigError> {
    load_config_with(options, |key| std::env::var(key).ok())
}

/// Load configuration with an explicit environment lookup.
pub fn load_config_with<F>(options: &ConfigOptions, env: F) -> Result<ResolvedConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let path = resolve_config_path(options, &env)?;
    let mut config = match &path {
        Some(path) => load_file(path)?,
        None => ZencConfig::default(),
    };

    if let Some(bin) = env("ZENC_ZFS_BIN").filter(|v| !v.is_empty()) {
        config.zfs_binary = bin;
    }
    if let Some(ms) = env_u64(&env, "ZENC_PROBE_TIMEOUT_MS")? {
        config.probe_timeout_ms = ms;
    }
    if let Some(ms) = env_u64(&env, "ZENC_QUERY_TIMEOUT_MS")? {
        config.query_timeout_ms = ms;
    }

    if let Some(bin) = &options.zfs_binary {
        config.zfs_binary = bin.clone();
    }
    if let Some(ms) = options.query_timeout_ms {
        config.query_timeout_ms = ms;
    }

    config.validate()?;
    debug!(path = ?path, zfs_binary = %config.zfs_binary, "configuration resolved");
    Ok(ResolvedConfig { config, path })
}

/// Explicit paths must exist; the XDG default is optional.
fn resolve_config_path<F>(options: &ConfigOptions, env: &F) -> Result<Option<PathBuf>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let explicit = options
        .config_path
        .clone()
        .or_else(|| env("ZENC_CONFIG").filter(|v| !v.is_empty()).map(PathBuf::from));
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(ConfigError::NotFound { path });
        }
        return Ok(Some(path));
    }

    let config_home = env("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(dirs::config_dir);
    Ok(config_home
        .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
        .filter(|path| path.exists()))
}

fn load_file(path: &Path) -> Result<ZencConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn env_u64<F>(env: &F, key: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match env(key) {
        None => Ok(None),
        Some(value) if value.trim().is_empty() => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: std::num::ParseIntError| ConfigError::InvalidEnv {
                key,
                value,
                reason: e.to_string(),
            }),
    }
}
