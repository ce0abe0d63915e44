//! Per-invocation resource ceilings.
//!
//! Limits are set once before execution begins and never mutated afterwards.
//! A ceiling of zero is treated exactly like an absent one: unlimited.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Four independent, optional ceilings for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Limits {
    pub max_output_bytes: Option<u64>,
    pub max_lines: Option<u64>,
    pub max_tokens: Option<u64>,
    pub timeout: Option<Duration>,
}

impl Limits {
    pub const UNLIMITED: Limits = Limits {
        max_output_bytes: None,
        max_lines: None,
        max_tokens: None,
        timeout: None,
    };

    #[must_use]
    pub fn with_max_output_bytes(mut self, bytes: u64) -> Self {
        self.max_output_bytes = Some(bytes);
        self
    }

    #[must_use]
    pub fn with_max_lines(mut self, lines: u64) -> Self {
        self.max_lines = Some(lines);
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, tokens: u64) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Effective byte ceiling (`None` when unlimited).
    #[must_use]
    pub fn output_bytes_ceiling(&self) -> Option<u64> {
        self.max_output_bytes.filter(|&v| v > 0)
    }

    #[must_use]
    pub fn lines_ceiling(&self) -> Option<u64> {
        self.max_lines.filter(|&v| v > 0)
    }

    #[must_use]
    pub fn tokens_ceiling(&self) -> Option<u64> {
        self.max_tokens.filter(|&v| v > 0)
    }

    #[must_use]
    pub fn timeout_ceiling(&self) -> Option<Duration> {
        self.timeout.filter(|d| !d.is_zero())
    }

    /// Ceiling for `kind`, with zero normalized to `None`.
    #[must_use]
    pub fn ceiling(&self, kind: LimitKind) -> Option<u64> {
        match kind {
            LimitKind::Lines => self.lines_ceiling(),
            LimitKind::Bytes => self.output_bytes_ceiling(),
            LimitKind::Tokens => self.tokens_ceiling(),
        }
    }

    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.output_bytes_ceiling().is_none()
            && self.lines_ceiling().is_none()
            && self.tokens_ceiling().is_none()
            && self.timeout_ceiling().is_none()
    }
}

/// The specific streaming ceiling that was crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitKind {
    Lines,
    Bytes,
    Tokens,
}

impl LimitKind {
    /// Stable machine-readable failure reason for downstream consumers.
    #[must_use]
    pub const fn failure_reason(self) -> &'static str {
        match self {
            LimitKind::Lines => "line_limit_exceeded",
            LimitKind::Bytes => "output_limit_exceeded",
            LimitKind::Tokens => "token_limit_exceeded",
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            LimitKind::Lines => "line",
            LimitKind::Bytes => "output",
            LimitKind::Tokens => "token",
        }
    }
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A streaming ceiling was crossed and the invocation was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{kind} limit exceeded (limit: {limit})")]
pub struct LimitExceeded {
    pub kind: LimitKind,
    pub limit: u64,
}

impl LimitExceeded {
    #[must_use]
    pub fn new(kind: LimitKind, limit: u64) -> Self {
        Self { kind, limit }
    }

    #[must_use]
    pub fn failure_reason(&self) -> &'static str {
        self.kind.failure_reason()
    }
}
