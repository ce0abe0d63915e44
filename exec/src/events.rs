//! Streaming invocations as a channel of [`StreamEvent`]s.

use ctx_tokenizer::SharedTokenizer;
use ctx_types::{Invocation, LimitExceeded, Limits, StreamEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{ExecError, Executor};

/// Events of one running streaming invocation.
///
/// Yields line events as they arrive, then exactly one terminal
/// [`StreamEvent::Result`], then `None`. If the process could not be started the
/// channel closes without a result event and [`EventStream::finish`] returns the
/// error.
#[derive(Debug)]
pub struct EventStream {
    events: mpsc::UnboundedReceiver<StreamEvent>,
    task: JoinHandle<Result<Option<LimitExceeded>, ExecError>>,
}

impl EventStream {
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Wait for the invocation to end. Returns the ceiling that stopped it, if any.
    ///
    /// Events not yet received are discarded.
    pub async fn finish(self) -> Result<Option<LimitExceeded>, ExecError> {
        drop(self.events);
        self.task.await?
    }
}

/// Start `invocation` in streaming mode on the current runtime.
#[must_use]
pub fn stream_events(
    executor: Executor,
    invocation: Invocation,
    limits: Limits,
    tokenizer: Option<SharedTokenizer>,
    cancel: CancellationToken,
) -> EventStream {
    let (tx, events) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        let lines = tx.clone();
        let outcome = executor
            .execute_streaming(
                &invocation,
                &limits,
                tokenizer.as_deref(),
                move |line, stream| {
                    let _ = lines.send(StreamEvent::Line {
                        stream,
                        line: line.to_string(),
                    });
                },
                cancel,
            )
            .await?;
        let _ = tx.send(StreamEvent::Result {
            result: outcome.result,
        });
        Ok(outcome.limit_exceeded)
    });
    EventStream { events, task }
}
