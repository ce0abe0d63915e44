//! Streaming Ingestion Engine: line-by-line delivery with live ceilings.
//!
//! Both pipes are consumed concurrently. Every complete line is checked against
//! the invocation's ceilings (lines, then bytes, then tokens) using counters
//! shared by both streams, so a ceiling applies to the invocation as a whole.
//! The first line that crosses a ceiling is neither buffered nor delivered; it
//! cancels the invocation and the whole process tree is terminated.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

use ctx_tokenizer::Tokenizer;
use ctx_types::{
    ExecutionResult, Invocation, LimitExceeded, LimitKind, Limits, StreamKind, TerminationReason,
    combine_output,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::ExecError;
use crate::executor::{Drain, Executor, Stop, drain, supervise};
use crate::termination::exit_code;

/// Result of a streaming invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingOutcome {
    pub result: ExecutionResult,
    /// The ceiling that stopped the invocation, if any.
    pub limit_exceeded: Option<LimitExceeded>,
}

impl StreamingOutcome {
    /// Stable machine-readable reason, e.g. `"line_limit_exceeded"`.
    #[must_use]
    pub fn failure_reason(&self) -> Option<&'static str> {
        self.limit_exceeded.map(|exceeded| exceeded.failure_reason())
    }
}

#[derive(Debug, Default)]
struct Counters {
    lines: AtomicU64,
    bytes: AtomicU64,
    tokens: AtomicU64,
}

/// Admission check for one line against the shared counters.
struct LineGate<'a> {
    limits: Limits,
    counters: Counters,
    tokenizer: Option<&'a dyn Tokenizer>,
}

impl LineGate<'_> {
    /// `line` excludes its terminator; one byte is charged for the newline.
    fn admit(&self, line: &str, raw_len: usize) -> Result<(), LimitExceeded> {
        if let Some(max) = self.limits.ceiling(LimitKind::Lines) {
            let seen = self.counters.lines.fetch_add(1, Ordering::SeqCst) + 1;
            if seen > max {
                return Err(LimitExceeded::new(LimitKind::Lines, max));
            }
        }

        let len = raw_len as u64 + 1;
        let total = self.counters.bytes.fetch_add(len, Ordering::SeqCst) + len;
        if let Some(max) = self.limits.ceiling(LimitKind::Bytes)
            && total > max
        {
            return Err(LimitExceeded::new(LimitKind::Bytes, max));
        }

        if let (Some(tokenizer), Some(max)) =
            (self.tokenizer, self.limits.ceiling(LimitKind::Tokens))
        {
            match tokenizer.count_tokens(line) {
                Ok(count) => {
                    let count = count as u64;
                    let total = self.counters.tokens.fetch_add(count, Ordering::SeqCst) + count;
                    if total > max {
                        return Err(LimitExceeded::new(LimitKind::Tokens, max));
                    }
                }
                Err(e) => tracing::debug!("Token count failed; line not counted: {e}"),
            }
        }

        Ok(())
    }
}

impl Executor {
    /// Run `invocation`, delivering each complete output line to `on_line` as
    /// it arrives.
    ///
    /// Lines are delivered in arrival order per stream; the order between
    /// stdout and stderr is unspecified. `on_line` runs before the next line of
    /// the same stream is read. A final line without a trailing newline is kept
    /// in the buffered output but not delivered.
    ///
    /// Token ceilings are enforced only when `tokenizer` is provided; counting
    /// failures skip the line's token charge.
    pub async fn execute_streaming<F>(
        &self,
        invocation: &Invocation,
        limits: &Limits,
        tokenizer: Option<&dyn Tokenizer>,
        on_line: F,
        cancel: CancellationToken,
    ) -> Result<StreamingOutcome, ExecError>
    where
        F: Fn(&str, StreamKind) + Send + Sync,
    {
        let started = Instant::now();
        let deadline = limits.timeout_ceiling().map(|timeout| started + timeout);
        // Cancelled by the caller, by supervision, or by a breached ceiling.
        let run = cancel.child_token();

        let mut tree = self.spawn(invocation)?;
        let stdout = tree.take_stdout().ok_or(ExecError::Capture {
            stream: StreamKind::Stdout,
        })?;
        let stderr = tree.take_stderr().ok_or(ExecError::Capture {
            stream: StreamKind::Stderr,
        })?;

        let gate = LineGate {
            limits: *limits,
            counters: Counters::default(),
            tokenizer,
        };
        let breach = OnceLock::new();
        let readers_done = CancellationToken::new();
        let wait_delay = self.settings().wait_delay;

        let consume = async {
            let buffers = tokio::join!(
                consume_lines(stdout, StreamKind::Stdout, &gate, &on_line, &run, &breach),
                consume_lines(stderr, StreamKind::Stderr, &gate, &on_line, &run, &breach),
            );
            readers_done.cancel();
            buffers
        };

        let supervision = async {
            let (status, reason) = match supervise(&mut tree, deadline, &run).await {
                Stop::Exited(status) => {
                    match drain(readers_done.cancelled(), wait_delay, deadline, &cancel).await {
                        Drain::Closed(()) => (status, None),
                        Drain::Lingering => {
                            // Descendants still hold the pipes open after the root exited.
                            tree.sweep().await;
                            if tokio::time::timeout(wait_delay, readers_done.cancelled())
                                .await
                                .is_err()
                            {
                                tracing::warn!("Output pipes still open after wait delay; closing");
                                run.cancel();
                            }
                            (status, None)
                        }
                        Drain::Interrupted(reason) => (status, Some(reason)),
                    }
                }
                Stop::Interrupted(reason) => (None, Some(reason)),
            };
            match reason {
                Some(reason) => {
                    tracing::info!(command = invocation.command(), %reason, "Terminating invocation");
                    run.cancel();
                    let report = tree.terminate().await;
                    (report.exit_status, Some(reason))
                }
                None => (status, None),
            }
        };

        let ((stdout, stderr), (status, reason)) = tokio::join!(consume, supervision);
        // A breached ceiling cancels the invocation even if the root exited
        // before supervision saw the cancellation.
        let reason = reason.or_else(|| breach.get().map(|_| TerminationReason::Cancelled));
        let report = tree.sweep().await;
        tracing::debug!(
            command = invocation.command(),
            outcome = ?report.outcome,
            "Process tree released"
        );

        let mut result = ExecutionResult::new(
            invocation.command(),
            combine_output(stdout, &stderr),
            exit_code(status),
            started.elapsed(),
        );
        if let Some(reason) = reason {
            result.set_termination_reason(reason);
        }

        Ok(StreamingOutcome {
            result,
            limit_exceeded: breach.into_inner(),
        })
    }
}

async fn consume_lines<R, F>(
    reader: R,
    stream: StreamKind,
    gate: &LineGate<'_>,
    on_line: &F,
    run: &CancellationToken,
    breach: &OnceLock<LimitExceeded>,
) -> Vec<u8>
where
    R: AsyncRead + Unpin,
    F: Fn(&str, StreamKind),
{
    let mut reader = BufReader::new(reader);
    let mut buffered = Vec::new();
    let mut raw = Vec::new();

    loop {
        raw.clear();
        let read = tokio::select! {
            biased;
            () = run.cancelled() => break,
            read = reader.read_until(b'\n', &mut raw) => read,
        };
        match read {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(%stream, "Read failed: {e}");
                break;
            }
        }
        if run.is_cancelled() {
            break;
        }

        if raw.last() != Some(&b'\n') {
            buffered.extend_from_slice(&raw);
            break;
        }
        raw.pop();
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }

        let line = String::from_utf8_lossy(&raw);
        if let Err(exceeded) = gate.admit(&line, raw.len()) {
            if breach.set(exceeded).is_ok() {
                tracing::info!(%stream, limit = exceeded.limit, "{exceeded}");
            }
            run.cancel();
            break;
        }

        buffered.extend_from_slice(&raw);
        buffered.push(b'\n');
        on_line(&line, stream);
    }

    buffered
}
