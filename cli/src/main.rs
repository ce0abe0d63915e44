//! ctx - run a command and report its output as JSON.
//!
//! ```text
//! ctx [FLAGS] [--stream] <COMMAND>...
//! ctx --max-lines 100 -- git log | head -n 500
//! ```
//!
//! Settings are layered defaults < `~/.ctx/config.toml` < `CTX_*` environment
//! < flags. A standalone `|` word splits the trailing command into pipeline
//! stages. Logs go to stderr (`RUST_LOG`, default `warn`); stdout carries only
//! the JSON envelope or, with `--stream`, one JSON event per line.

mod envelope;
mod stages;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use ctx_config::{Settings, load_settings, parse_duration};
use ctx_exec::{CancellationToken, ExecError, Executor, stream_events};
use ctx_tokenizer::{SharedTokenizer, TokenizerCache};
use ctx_types::StreamEvent;

use envelope::{Envelope, ResultEvent, count_tokens, print_line_event};

/// ctx and the wrapped command both succeeded.
const EXIT_SUCCESS: u8 = 0;
/// The wrapped command failed, or a ceiling was crossed.
const EXIT_COMMAND_FAILED: u8 = 1;
/// ctx itself failed (config, engine).
const EXIT_APP_ERROR: u8 = 2;

#[derive(Parser)]
#[command(name = "ctx")]
#[command(about = "Run a command with output ceilings and report the result as JSON")]
struct Cli {
    /// Command timeout (e.g. "5s", "1m", "0" for none). Overrides CTX_TIMEOUT.
    #[arg(long, value_parser = parse_timeout)]
    timeout: Option<Duration>,

    /// Maximum tokens in the output (0 for no limit). Overrides CTX_MAX_TOKENS.
    #[arg(long)]
    max_tokens: Option<u64>,

    /// Maximum output lines (0 for no limit). Overrides CTX_MAX_LINES.
    #[arg(long)]
    max_lines: Option<u64>,

    /// Maximum output bytes (0 for no limit). Overrides CTX_MAX_OUTPUT_BYTES.
    #[arg(long)]
    max_output_bytes: Option<u64>,

    /// Maximum pipeline stages (0 for no limit). Overrides CTX_MAX_PIPELINE_STAGES.
    #[arg(long)]
    max_pipeline_stages: Option<usize>,

    /// Token provider (anthropic, openai, gemini). Overrides CTX_TOKEN_MODEL.
    #[arg(long)]
    token_model: Option<String>,

    /// Disable token counting. Overrides CTX_NO_TOKENS.
    #[arg(long)]
    no_tokens: bool,

    /// Stream output line by line as JSON events.
    #[arg(long)]
    stream: bool,

    /// Command to run. Quote it, or separate pipeline stages with a standalone `|`.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if let Some(timeout) = self.timeout {
            settings.limits.timeout = Some(timeout);
        }
        if let Some(max_tokens) = self.max_tokens {
            settings.limits.max_tokens = Some(max_tokens);
        }
        if let Some(max_lines) = self.max_lines {
            settings.limits.max_lines = Some(max_lines);
        }
        if let Some(max_output_bytes) = self.max_output_bytes {
            settings.limits.max_output_bytes = Some(max_output_bytes);
        }
        if let Some(max_stages) = self.max_pipeline_stages {
            settings.max_pipeline_stages = Some(max_stages);
        }
        if let Some(model) = &self.token_model {
            settings.token_model.clone_from(model);
        }
        if self.no_tokens {
            settings.tokens_enabled = false;
        }
    }
}

fn parse_timeout(raw: &str) -> Result<Duration, String> {
    parse_duration(raw).ok_or_else(|| format!("invalid duration: {raw:?}"))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("warn"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(EXIT_APP_ERROR)
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let mut settings = load_settings().context("failed to load configuration")?;
    cli.apply(&mut settings);
    tracing::debug!(?settings, "Resolved settings");

    let invocation = stages::invocation_from_args(&cli.command, settings.max_pipeline_stages)
        .context("invalid command")?;
    let executor = Executor::from_config(Some(&settings.shell), settings.termination);
    let tokenizer = tokenizer_for(&settings, &TokenizerCache::default());

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, stopping command");
            on_interrupt.cancel();
        }
    });

    if cli.stream {
        run_streaming(executor, invocation, &settings, tokenizer, cancel).await
    } else {
        run_buffered(&executor, &invocation, &settings, tokenizer, cancel).await
    }
}

/// Tokenizer for the configured model. A model that cannot be loaded
/// disables counting for this run.
fn tokenizer_for(settings: &Settings, cache: &TokenizerCache) -> Option<SharedTokenizer> {
    if !settings.tokens_enabled {
        return None;
    }
    match cache.get_or_create(&settings.token_model) {
        Ok(tokenizer) => Some(tokenizer),
        Err(err) => {
            tracing::warn!(
                model = %settings.token_model,
                error = %err,
                "Tokenizer unavailable; token counting disabled"
            );
            None
        }
    }
}

async fn run_buffered(
    executor: &Executor,
    invocation: &ctx_types::Invocation,
    settings: &Settings,
    tokenizer: Option<SharedTokenizer>,
    cancel: CancellationToken,
) -> Result<u8> {
    let result = match executor.execute(invocation, &settings.limits, cancel).await {
        Ok(result) => result,
        Err(err @ ExecError::Spawn { .. }) => {
            print_envelope(&Envelope::spawn_failure(invocation.command(), &err.to_string()))?;
            return Ok(EXIT_COMMAND_FAILED);
        }
        Err(err) => return Err(err.into()),
    };

    let tokens = count_tokens(tokenizer.as_deref(), &result.output_lossy());
    let mut envelope = Envelope::from_result(&result, tokens);
    envelope.check_token_ceiling(settings.limits.max_tokens);
    print_envelope(&envelope)?;

    Ok(exit_code_for(&envelope))
}

async fn run_streaming(
    executor: Executor,
    invocation: ctx_types::Invocation,
    settings: &Settings,
    tokenizer: Option<SharedTokenizer>,
    cancel: CancellationToken,
) -> Result<u8> {
    let command = invocation.command().to_string();
    let mut events = stream_events(
        executor,
        invocation,
        settings.limits,
        tokenizer.clone(),
        cancel,
    );

    let mut result = None;
    while let Some(event) = events.next().await {
        match event {
            StreamEvent::Result { result: finished } => result = Some(finished),
            line => print_line_event(&line)?,
        }
    }

    let exceeded = match events.finish().await {
        Ok(exceeded) => exceeded,
        Err(err @ ExecError::Spawn { .. }) => {
            let envelope = Envelope::spawn_failure(&command, &err.to_string());
            print_line_event(&StreamEvent::Line {
                stream: ctx_types::StreamKind::Stderr,
                line: err.to_string(),
            })?;
            println!("{}", serde_json::to_string(&ResultEvent::new(&envelope))?);
            return Ok(EXIT_COMMAND_FAILED);
        }
        Err(err) => return Err(err.into()),
    };
    let result = result.context("stream ended without a result")?;

    let mut envelope = match exceeded {
        Some(exceeded) => {
            let mut envelope = Envelope::from_result(&result, 0);
            envelope.fail_with_limit(&exceeded);
            envelope
        }
        None => {
            let tokens = count_tokens(tokenizer.as_deref(), &result.output_lossy());
            let mut envelope = Envelope::from_result(&result, tokens);
            envelope.check_token_ceiling(settings.limits.max_tokens);
            envelope
        }
    };
    // Already delivered line by line.
    envelope.output.clear();
    println!("{}", serde_json::to_string(&ResultEvent::new(&envelope))?);

    Ok(exit_code_for(&envelope))
}

fn print_envelope(envelope: &Envelope) -> Result<()> {
    let data = serde_json::to_string_pretty(envelope).context("failed to encode output")?;
    println!("{data}");
    Ok(())
}

fn exit_code_for(envelope: &Envelope) -> u8 {
    if envelope.metadata.success {
        EXIT_SUCCESS
    } else {
        EXIT_COMMAND_FAILED
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clap::Parser;
    use ctx_config::Settings;
    use ctx_tokenizer::TokenizerCache;

    use super::{Cli, tokenizer_for};

    #[test]
    fn trailing_command_keeps_its_flags() {
        let cli = Cli::try_parse_from(["ctx", "--max-lines", "10", "ls", "-la", "|", "wc"]).unwrap();
        assert_eq!(cli.max_lines, Some(10));
        assert_eq!(cli.command, vec!["ls", "-la", "|", "wc"]);
    }

    #[test]
    fn command_is_required() {
        assert!(Cli::try_parse_from(["ctx", "--stream"]).is_err());
    }

    #[test]
    fn invalid_timeout_is_rejected() {
        assert!(Cli::try_parse_from(["ctx", "--timeout", "soon", "ls"]).is_err());
    }

    #[test]
    fn flags_override_settings() {
        let cli = Cli::try_parse_from([
            "ctx",
            "--timeout",
            "5s",
            "--max-tokens",
            "0",
            "--max-output-bytes",
            "2048",
            "--max-pipeline-stages",
            "3",
            "--token-model",
            "openai",
            "--no-tokens",
            "echo",
            "hi",
        ])
        .unwrap();

        let mut settings = Settings::default();
        settings.limits.max_tokens = Some(500);
        cli.apply(&mut settings);

        assert_eq!(settings.limits.timeout, Some(Duration::from_secs(5)));
        assert_eq!(settings.limits.tokens_ceiling(), None);
        assert_eq!(settings.limits.max_output_bytes, Some(2048));
        assert_eq!(settings.max_pipeline_stages, Some(3));
        assert_eq!(settings.token_model, "openai");
        assert!(!settings.tokens_enabled);
    }

    #[test]
    fn unknown_token_model_disables_counting() {
        let settings = Settings {
            token_model: "bogus".to_string(),
            ..Settings::default()
        };
        assert!(tokenizer_for(&settings, &TokenizerCache::default()).is_none());
    }

    #[test]
    fn disabled_tokens_skip_the_tokenizer() {
        let settings = Settings {
            tokens_enabled: false,
            ..Settings::default()
        };
        let cache = TokenizerCache::default();
        assert!(tokenizer_for(&settings, &cache).is_none());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn absent_flags_leave_settings_alone() {
        let cli = Cli::try_parse_from(["ctx", "true"]).unwrap();
        let mut settings = Settings::default();
        cli.apply(&mut settings);
        assert_eq!(settings, Settings::default());
    }
}
