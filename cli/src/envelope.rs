//! JSON report printed for every run.

use ctx_tokenizer::Tokenizer;
use ctx_types::{ExecutionResult, FAILURE_EXIT_CODE, LimitExceeded, LimitKind, StreamEvent};
use serde::Serialize;

pub const SCHEMA_VERSION: &str = "0.1";

#[derive(Debug, Serialize)]
pub struct Envelope {
    pub tokens: usize,
    pub output: String,
    pub input: String,
    pub metadata: Metadata,
    pub schema_version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct Metadata {
    pub exit_code: i32,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<&'static str>,
    /// Milliseconds.
    pub duration: u64,
    pub bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination_reason: Option<&'static str>,
}

impl Envelope {
    pub fn from_result(result: &ExecutionResult, tokens: usize) -> Self {
        Self {
            tokens,
            output: result.output_lossy().into_owned(),
            input: result.command.clone(),
            metadata: Metadata {
                exit_code: result.exit_code,
                success: result.success(),
                error: None,
                failure_reason: None,
                duration: u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX),
                bytes: result.output.len(),
                termination_reason: result.termination_reason().map(|r| r.as_str()),
            },
            schema_version: SCHEMA_VERSION,
        }
    }

    /// Report for a command that never started.
    pub fn spawn_failure(command: &str, error: &str) -> Self {
        Self {
            tokens: 0,
            output: error.to_string(),
            input: command.to_string(),
            metadata: Metadata {
                exit_code: FAILURE_EXIT_CODE,
                success: false,
                error: Some(error.to_string()),
                failure_reason: None,
                duration: 0,
                bytes: error.len(),
                termination_reason: None,
            },
            schema_version: SCHEMA_VERSION,
        }
    }

    pub fn fail_with_limit(&mut self, exceeded: &LimitExceeded) {
        self.metadata.success = false;
        self.metadata.error = Some(exceeded.to_string());
        self.metadata.failure_reason = Some(exceeded.failure_reason());
    }

    /// Mark the run failed when `tokens` is over `max_tokens`.
    pub fn check_token_ceiling(&mut self, max_tokens: Option<u64>) {
        let Some(limit) = max_tokens.filter(|&limit| limit > 0) else {
            return;
        };
        if self.tokens as u64 > limit {
            let exceeded = LimitExceeded::new(LimitKind::Tokens, limit);
            self.fail_with_limit(&exceeded);
            self.metadata.error = Some(format!("{exceeded} (actual: {})", self.tokens));
        }
    }
}

/// Final line of stream mode: `{"type":"result","envelope":{...}}`.
#[derive(Debug, Serialize)]
pub struct ResultEvent<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub envelope: &'a Envelope,
}

impl<'a> ResultEvent<'a> {
    pub fn new(envelope: &'a Envelope) -> Self {
        Self {
            kind: "result",
            envelope,
        }
    }
}

/// Print a line event as one JSON line. Terminal events are not printed here.
pub fn print_line_event(event: &StreamEvent) -> serde_json::Result<()> {
    if !event.is_terminal() {
        println!("{}", serde_json::to_string(event)?);
    }
    Ok(())
}

/// Token count of `text`, or zero when counting is disabled or fails.
pub fn count_tokens(tokenizer: Option<&dyn Tokenizer>, text: &str) -> usize {
    let Some(tokenizer) = tokenizer else {
        return 0;
    };
    match tokenizer.count_tokens(text) {
        Ok(count) => count,
        Err(err) => {
            tracing::warn!(model = tokenizer.model_name(), error = %err, "Token counting failed");
            0
        }
    }
}
