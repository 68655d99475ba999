//! Runtime settings for Quarry.
//!
//! Uses `figment` for layered configuration merging from defaults, the user's
//! config file, the workspace `quarry.toml`, an explicit file and `QUARRY_*`
//! environment variables (later layers win).

use crate::error::{QuarryError, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level Quarry settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuarryConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub job: JobSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings for the local engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Polling interval of streaming queries without an explicit trigger.
    #[serde(default = "default_trigger_interval_ms")]
    pub trigger_interval_ms: u64,
    /// Upper bound on new files picked up per micro-batch.
    #[serde(default)]
    pub max_files_per_trigger: Option<usize>,
}

fn default_trigger_interval_ms() -> u64 {
    1000
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            trigger_interval_ms: default_trigger_interval_ms(),
            max_files_per_trigger: None,
        }
    }
}

/// Settings for loading job documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSettings {
    /// Substitute `${VAR}` patterns from the environment before parsing.
    #[serde(default = "default_true")]
    pub substitute_env: bool,
}

fn default_true() -> bool {
    true
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            substitute_env: true,
        }
    }
}

/// Logging output settings, applied by the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines on stderr instead of human-readable output.
    #[serde(default)]
    pub json: bool,
    /// Also write JSON logs to daily-rolled files under this path.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: None,
        }
    }
}

/// Path of the user-level config file, if a home directory can be determined.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "quarry", "quarry")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load settings by merging all layers.
pub fn load_config(
    workspace: Option<&Path>,
    explicit: Option<&Path>,
) -> Result<QuarryConfig> {
    let mut figment = Figment::from(Serialized::defaults(QuarryConfig::default()));

    if let Some(user_config) = user_config_path()
        && user_config.exists()
    {
        figment = figment.merge(Toml::file(&user_config));
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join("quarry.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(QuarryError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("config file not found: {}", path.display()),
            )));
        }
        figment = figment.merge(Toml::file(path));
    }

    // QUARRY_ENGINE__TRIGGER_INTERVAL_MS, QUARRY_LOGGING__LEVEL, ...
    figment = figment.merge(Env::prefixed("QUARRY_").split("__"));

    Ok(figment.extract().map_err(Box::new)?)
}
