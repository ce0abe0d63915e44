//! Resolution of defaults, config file and `CTX_*` environment variables into
//! the values the engine runs with.

use std::time::Duration;

use ctx_exec::{ShellConfig, TerminationSettings};
use ctx_types::Limits;

use crate::duration::parse_duration;
use crate::{ConfigError, CtxConfig};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_TOKEN_MODEL: &str = "anthropic";

const ENV_TOKEN_MODEL: &str = "CTX_TOKEN_MODEL";
const ENV_TIMEOUT: &str = "CTX_TIMEOUT";
const ENV_MAX_TOKENS: &str = "CTX_MAX_TOKENS";
const ENV_MAX_OUTPUT_BYTES: &str = "CTX_MAX_OUTPUT_BYTES";
const ENV_MAX_LINES: &str = "CTX_MAX_LINES";
const ENV_MAX_PIPELINE_STAGES: &str = "CTX_MAX_PIPELINE_STAGES";
const ENV_NO_TOKENS: &str = "CTX_NO_TOKENS";
const ENV_SIGTERM_GRACE: &str = "CTX_SIGTERM_GRACE";
const ENV_WAIT_DELAY: &str = "CTX_WAIT_DELAY";

/// Fully resolved settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub limits: Limits,
    pub max_pipeline_stages: Option<usize>,
    pub termination: TerminationSettings,
    pub token_model: String,
    pub tokens_enabled: bool,
    pub shell: ShellConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            limits: Limits::default().with_timeout(DEFAULT_TIMEOUT),
            max_pipeline_stages: None,
            termination: TerminationSettings::default(),
            token_model: DEFAULT_TOKEN_MODEL.to_string(),
            tokens_enabled: true,
            shell: ShellConfig::default(),
        }
    }
}

impl Settings {
    /// Layer `config` and then the variables visible through `env` over the
    /// defaults. Invalid values are logged and skipped.
    pub fn resolve<F>(config: Option<&CtxConfig>, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        if let Some(config) = config {
            settings.apply_file(config);
        }
        settings.apply_env(env);
        settings
    }

    fn apply_file(&mut self, config: &CtxConfig) {
        if let Some(limits) = &config.limits {
            if let Some(value) = limits.max_tokens.and_then(positive) {
                self.limits.max_tokens = Some(value);
            }
            if let Some(value) = limits.max_output_bytes.and_then(positive) {
                self.limits.max_output_bytes = Some(value);
            }
            if let Some(value) = limits.max_lines.and_then(positive) {
                self.limits.max_lines = Some(value);
            }
            if let Some(value) = limits.max_pipeline_stages.and_then(positive) {
                self.max_pipeline_stages = usize::try_from(value).ok();
            }
            if let Some(value) = limits.timeout.as_deref().and_then(|raw| duration("timeout", raw)) {
                self.limits.timeout = Some(value);
            }
        }

        if let Some(termination) = &config.termination {
            if let Some(value) = termination
                .grace_period
                .as_deref()
                .and_then(|raw| duration("grace_period", raw))
            {
                self.termination.grace_period = value;
            }
            if let Some(value) = termination
                .wait_delay
                .as_deref()
                .and_then(|raw| duration("wait_delay", raw))
            {
                self.termination.wait_delay = value;
            }
        }

        if let Some(tokenizer) = &config.tokenizer {
            if let Some(model) = tokenizer.model.as_deref().map(str::trim)
                && !model.is_empty()
            {
                self.token_model = model.to_string();
            }
            if let Some(enabled) = tokenizer.enabled {
                self.tokens_enabled = enabled;
            }
        }

        if let Some(shell) = &config.shell {
            self.shell = shell.clone();
        }
    }

    fn apply_env<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = env(ENV_TOKEN_MODEL).map(|v| v.trim().to_string())
            && !model.is_empty()
        {
            self.token_model = model;
        }
        if let Some(value) = env(ENV_TIMEOUT).and_then(|raw| duration(ENV_TIMEOUT, &raw)) {
            self.limits.timeout = Some(value);
        }
        if let Some(value) = env(ENV_MAX_TOKENS).and_then(|raw| integer(ENV_MAX_TOKENS, &raw)) {
            self.limits.max_tokens = Some(value);
        }
        if let Some(value) =
            env(ENV_MAX_OUTPUT_BYTES).and_then(|raw| integer(ENV_MAX_OUTPUT_BYTES, &raw))
        {
            self.limits.max_output_bytes = Some(value);
        }
        if let Some(value) = env(ENV_MAX_LINES).and_then(|raw| integer(ENV_MAX_LINES, &raw)) {
            self.limits.max_lines = Some(value);
        }
        if let Some(value) =
            env(ENV_MAX_PIPELINE_STAGES).and_then(|raw| integer(ENV_MAX_PIPELINE_STAGES, &raw))
        {
            self.max_pipeline_stages = usize::try_from(value).ok();
        }
        if env(ENV_NO_TOKENS).is_some_and(|raw| is_truthy(&raw)) {
            self.tokens_enabled = false;
        }
        if let Some(value) = env(ENV_SIGTERM_GRACE).and_then(|raw| duration(ENV_SIGTERM_GRACE, &raw))
        {
            self.termination.grace_period = value;
        }
        if let Some(value) = env(ENV_WAIT_DELAY).and_then(|raw| duration(ENV_WAIT_DELAY, &raw)) {
            self.termination.wait_delay = value;
        }
    }
}

/// Load `~/.ctx/config.toml` (if present) and resolve against the process
/// environment.
pub fn load_settings() -> Result<Settings, ConfigError> {
    let config = CtxConfig::load()?;
    Ok(Settings::resolve(config.as_ref(), |key| {
        std::env::var(key).ok()
    }))
}

fn positive(value: i64) -> Option<u64> {
    u64::try_from(value).ok().filter(|&v| v > 0)
}

fn integer(key: &str, raw: &str) -> Option<u64> {
    match raw.trim().parse::<i64>() {
        Ok(value) => positive(value),
        Err(_) => {
            tracing::warn!(key, value = raw, "Ignoring invalid integer");
            None
        }
    }
}

fn duration(key: &str, raw: &str) -> Option<Duration> {
    let parsed = parse_duration(raw);
    if parsed.is_none() {
        tracing::warn!(key, value = raw, "Ignoring invalid duration");
    }
    parsed
}

fn is_truthy(raw: &str) -> bool {
    matches!(raw.trim(), "true" | "1")
}
