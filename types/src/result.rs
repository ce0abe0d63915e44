//! The outcome of one invocation.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Serialize, Serializer};
use serde_json::Value;

/// Metadata key under which the termination reason is recorded.
pub const TERMINATION_REASON_KEY: &str = "termination_reason";

/// Exit code reported when the process was killed by a signal or could not be
/// reaped normally.
pub const FAILURE_EXIT_CODE: i32 = 1;

/// Why an invocation was stopped before natural exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminationReason {
    /// The invocation's deadline expired.
    Timeout,
    /// The caller cancelled, or a streaming ceiling was crossed.
    Cancelled,
}

impl TerminationReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TerminationReason::Timeout => "timeout",
            TerminationReason::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "timeout" => Some(TerminationReason::Timeout),
            "cancelled" => Some(TerminationReason::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Produced exactly once per invocation; owned by the caller afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub exit_code: i32,
    #[serde(serialize_with = "serialize_lossy")]
    pub output: Vec<u8>,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    pub command: String,
    pub metadata: BTreeMap<String, Value>,
}

impl ExecutionResult {
    #[must_use]
    pub fn new(
        command: impl Into<String>,
        output: Vec<u8>,
        exit_code: i32,
        duration: Duration,
    ) -> Self {
        Self {
            exit_code,
            output,
            duration,
            command: command.into(),
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Output decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn output_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.output)
    }

    #[must_use]
    pub fn termination_reason(&self) -> Option<TerminationReason> {
        self.metadata
            .get(TERMINATION_REASON_KEY)
            .and_then(Value::as_str)
            .and_then(TerminationReason::parse)
    }

    /// Record why the invocation was stopped.
    ///
    /// First writer wins: an invocation has at most one termination reason, so
    /// a second call is a no-op. Returns whether `reason` was recorded.
    pub fn set_termination_reason(&mut self, reason: TerminationReason) -> bool {
        if self.metadata.contains_key(TERMINATION_REASON_KEY) {
            return false;
        }
        self.metadata.insert(
            TERMINATION_REASON_KEY.to_string(),
            Value::String(reason.as_str().to_string()),
        );
        true
    }
}

/// Join captured streams: stdout first, then stderr, with a single newline
/// between them when both are non-empty.
///
/// This order is not the chronological interleaving of the two streams.
#[must_use]
pub fn combine_output(mut stdout: Vec<u8>, stderr: &[u8]) -> Vec<u8> {
    if !stderr.is_empty() {
        if !stdout.is_empty() {
            stdout.push(b'\n');
        }
        stdout.extend_from_slice(stderr);
    }
    stdout
}

fn serialize_lossy<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}
