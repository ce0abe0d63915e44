//! Configuration for ctx.
//!
//! Values are layered: built-in defaults, then `~/.ctx/config.toml`, then
//! `CTX_*` environment variables. Command-line flags are applied on top by the
//! binary. The result is a [`Settings`] value the engine consumes directly.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod duration;
mod settings;

use std::path::{Path, PathBuf};

use ctx_exec::ShellConfig;
use serde::Deserialize;
use thiserror::Error;

pub use duration::parse_duration;
pub use settings::{DEFAULT_TIMEOUT, DEFAULT_TOKEN_MODEL, Settings, load_settings};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Contents of `config.toml`. Every table and key is optional.
///
/// ```toml
/// [limits]
/// max_tokens = 5000
/// max_output_bytes = 1048576
/// max_lines = 1000
/// max_pipeline_stages = 4
/// timeout = "2m"
///
/// [termination]
/// grace_period = "100ms"
/// wait_delay = "3s"
///
/// [tokenizer]
/// model = "anthropic"
/// enabled = true
///
/// [shell]
/// binary = "/bin/bash"
/// args = ["-c"]
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct CtxConfig {
    pub limits: Option<LimitsConfig>,
    pub termination: Option<TerminationConfig>,
    pub tokenizer: Option<TokenizerConfig>,
    pub shell: Option<ShellConfig>,
}

/// `[limits]`. Values `<= 0` mean unlimited.
#[derive(Debug, Default, Deserialize)]
pub struct LimitsConfig {
    pub max_tokens: Option<i64>,
    pub max_output_bytes: Option<i64>,
    pub max_lines: Option<i64>,
    pub max_pipeline_stages: Option<i64>,
    /// Duration string, e.g. `"30s"`.
    pub timeout: Option<String>,
}

/// `[termination]`
#[derive(Debug, Default, Deserialize)]
pub struct TerminationConfig {
    pub grace_period: Option<String>,
    pub wait_delay: Option<String>,
}

/// `[tokenizer]`
#[derive(Debug, Default, Deserialize)]
pub struct TokenizerConfig {
    /// Provider name: `anthropic`, `openai` or `gemini`.
    pub model: Option<String>,
    pub enabled: Option<bool>,
}

impl CtxConfig {
    /// Load the user's config file. `Ok(None)` when it does not exist.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(Some(config))
    }
}

/// `~/.ctx/config.toml`, if a home directory is known.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".ctx").join("config.toml"))
}
