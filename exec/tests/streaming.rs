//! Process-level tests for streaming ingestion and live ceilings.

#![cfg(unix)]

mod common;

use std::sync::Mutex;
use std::time::{Duration, Instant};

use common::executor;
use ctx_exec::{CancellationToken, stream_events};
use ctx_tokenizer::{Tokenizer, TokenizerError};
use ctx_types::{Invocation, LimitKind, Limits, StreamEvent, StreamKind, TerminationReason};

/// One token per whitespace-separated word.
#[derive(Debug)]
struct WordTokenizer;

impl Tokenizer for WordTokenizer {
    fn count_tokens(&self, text: &str) -> Result<usize, TokenizerError> {
        Ok(text.split_whitespace().count())
    }

    fn model_name(&self) -> &str {
        "words"
    }
}

#[derive(Default)]
struct Collected {
    lines: Mutex<Vec<(StreamKind, String)>>,
}

impl Collected {
    fn push(&self, line: &str, stream: StreamKind) {
        self.lines.lock().unwrap().push((stream, line.to_string()));
    }

    fn of(&self, kind: StreamKind) -> Vec<String> {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|(stream, _)| *stream == kind)
            .map(|(_, line)| line.clone())
            .collect()
    }

    fn len(&self) -> usize {
        self.lines.lock().unwrap().len()
    }
}

#[tokio::test]
async fn line_ceiling_is_exact() {
    let collected = Collected::default();
    let outcome = executor()
        .execute_streaming(
            &Invocation::new("seq 1 500"),
            &Limits::default().with_max_lines(100),
            None,
            |line, stream| collected.push(line, stream),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let exceeded = outcome.limit_exceeded.expect("line ceiling crossed");
    assert_eq!(exceeded.kind, LimitKind::Lines);
    assert_eq!(exceeded.limit, 100);
    assert_eq!(outcome.failure_reason(), Some("line_limit_exceeded"));
    assert_eq!(
        outcome.result.termination_reason(),
        Some(TerminationReason::Cancelled)
    );

    let expected: Vec<String> = (1..=100).map(|n| n.to_string()).collect();
    assert_eq!(collected.of(StreamKind::Stdout), expected);
    assert_eq!(
        outcome.result.output_lossy(),
        format!("{}\n", expected.join("\n"))
    );
}

#[tokio::test]
async fn byte_ceiling_counts_newlines() {
    let collected = Collected::default();
    let outcome = executor()
        .execute_streaming(
            &Invocation::new("seq 1 1000"),
            &Limits::default().with_max_output_bytes(20),
            None,
            |line, stream| collected.push(line, stream),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    // "1\n" .. "9\n" is 18 bytes; "10\n" would make 21.
    assert_eq!(outcome.limit_exceeded.map(|e| e.kind), Some(LimitKind::Bytes));
    assert_eq!(collected.len(), 9);
    assert_eq!(outcome.result.output.len(), 18);
    assert_eq!(outcome.failure_reason(), Some("output_limit_exceeded"));
    assert_eq!(
        outcome.result.termination_reason(),
        Some(TerminationReason::Cancelled)
    );
}

#[tokio::test]
async fn token_ceiling_uses_tokenizer() {
    let collected = Collected::default();
    let tokenizer = WordTokenizer;
    let outcome = executor()
        .execute_streaming(
            &Invocation::new("seq 1 100"),
            &Limits::default().with_max_tokens(5),
            Some(&tokenizer),
            |line, stream| collected.push(line, stream),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.limit_exceeded.map(|e| e.kind), Some(LimitKind::Tokens));
    assert_eq!(collected.len(), 5);
    assert_eq!(outcome.failure_reason(), Some("token_limit_exceeded"));
}

#[tokio::test]
async fn ceilings_are_shared_across_streams() {
    let collected = Collected::default();
    let outcome = executor()
        .execute_streaming(
            &Invocation::new("for i in 1 2 3 4 5; do echo out$i; echo err$i >&2; done"),
            &Limits::default().with_max_lines(6),
            None,
            |line, stream| collected.push(line, stream),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.limit_exceeded.map(|e| e.kind), Some(LimitKind::Lines));
    assert_eq!(collected.len(), 6);
}

#[tokio::test]
async fn per_stream_order_is_preserved() {
    let collected = Collected::default();
    let outcome = executor()
        .execute_streaming(
            &Invocation::new("echo a; echo b >&2; echo c; echo d >&2"),
            &Limits::default(),
            None,
            |line, stream| collected.push(line, stream),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(outcome.limit_exceeded.is_none());
    assert_eq!(outcome.result.exit_code, 0);
    assert_eq!(collected.of(StreamKind::Stdout), vec!["a", "c"]);
    assert_eq!(collected.of(StreamKind::Stderr), vec!["b", "d"]);
    assert_eq!(outcome.result.output_lossy(), "a\nc\n\nb\nd\n");
    assert_eq!(outcome.result.termination_reason(), None);
}

#[tokio::test]
async fn truncated_final_line_is_buffered_not_delivered() {
    let collected = Collected::default();
    let outcome = executor()
        .execute_streaming(
            &Invocation::new("printf 'one\\ntwo' | cat"),
            &Limits::default(),
            None,
            |line, stream| collected.push(line, stream),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(collected.of(StreamKind::Stdout), vec!["one"]);
    assert_eq!(outcome.result.output_lossy(), "one\ntwo");
}

#[tokio::test]
async fn streaming_timeout_stops_tree() {
    let collected = Collected::default();
    let start = Instant::now();
    let outcome = executor()
        .execute_streaming(
            &Invocation::new("sh -c 'echo start; sleep 10'"),
            &Limits::default().with_timeout(Duration::from_millis(500)),
            None,
            |line, stream| collected.push(line, stream),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(start.elapsed() < Duration::from_secs(2), "took {:?}", start.elapsed());
    assert_eq!(collected.of(StreamKind::Stdout), vec!["start"]);
    assert_eq!(
        outcome.result.termination_reason(),
        Some(TerminationReason::Timeout)
    );
    assert!(outcome.limit_exceeded.is_none());
    assert_ne!(outcome.result.exit_code, 0);
}

#[tokio::test]
async fn breach_after_root_exit_is_still_cancelled() {
    // All output is written before the root exits, so the root usually wins
    // the race against the ceiling's cancellation.
    for _ in 0..5 {
        let outcome = executor()
            .execute_streaming(
                &Invocation::new("seq 1 20"),
                &Limits::default().with_max_lines(10),
                None,
                |_, _| {},
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.limit_exceeded.map(|e| e.kind), Some(LimitKind::Lines));
        assert_eq!(
            outcome.result.termination_reason(),
            Some(TerminationReason::Cancelled)
        );
    }
}

#[tokio::test]
async fn streaming_timeout_still_applies_after_root_exits() {
    let collected = Collected::default();
    let start = Instant::now();
    let outcome = executor()
        .execute_streaming(
            &Invocation::new("sleep 10 & echo hi"),
            &Limits::default().with_timeout(Duration::from_secs(1)),
            None,
            |line, stream| collected.push(line, stream),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(start.elapsed() < Duration::from_secs(2), "took {:?}", start.elapsed());
    assert_eq!(collected.of(StreamKind::Stdout), vec!["hi"]);
    assert_eq!(
        outcome.result.termination_reason(),
        Some(TerminationReason::Timeout)
    );
    assert!(outcome.limit_exceeded.is_none());
}

#[tokio::test]
async fn streaming_cancel_still_applies_after_root_exits() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let outcome = executor()
        .execute_streaming(
            &Invocation::new("sleep 10 & echo hi"),
            &Limits::default(),
            None,
            |_, _| {},
            cancel,
        )
        .await
        .unwrap();

    assert!(start.elapsed() < Duration::from_secs(2), "took {:?}", start.elapsed());
    assert_eq!(
        outcome.result.termination_reason(),
        Some(TerminationReason::Cancelled)
    );
}

#[tokio::test]
async fn callback_can_cancel_the_invocation() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let collected = Collected::default();
    let start = Instant::now();

    let outcome = executor()
        .execute_streaming(
            &Invocation::new("i=0; while :; do echo $i; i=$((i+1)); sleep 0.01; done"),
            &Limits::default(),
            None,
            |line, stream| {
                collected.push(line, stream);
                if line == "3" {
                    trigger.cancel();
                }
            },
            cancel,
        )
        .await
        .unwrap();

    assert!(start.elapsed() < Duration::from_secs(3));
    assert_eq!(
        outcome.result.termination_reason(),
        Some(TerminationReason::Cancelled)
    );
    assert!(outcome.limit_exceeded.is_none());
    assert_eq!(collected.of(StreamKind::Stdout), vec!["0", "1", "2", "3"]);
}

#[tokio::test]
async fn event_stream_ends_with_result() {
    let mut events = stream_events(
        executor(),
        Invocation::new("echo one; echo two"),
        Limits::default(),
        None,
        CancellationToken::new(),
    );

    let mut received = Vec::new();
    while let Some(event) = events.next().await {
        received.push(event);
    }
    assert!(events.finish().await.unwrap().is_none());

    assert_eq!(received.len(), 3);
    assert_eq!(
        received[0],
        StreamEvent::Line {
            stream: StreamKind::Stdout,
            line: "one".to_string(),
        }
    );
    assert!(!received[1].is_terminal());
    let StreamEvent::Result { result } = &received[2] else {
        panic!("last event must be the result: {:?}", received[2]);
    };
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.output_lossy(), "one\ntwo\n");
}

#[tokio::test]
async fn event_stream_reports_limit_after_result() {
    let mut events = stream_events(
        executor(),
        Invocation::new("seq 1 50"),
        Limits::default().with_max_lines(10),
        Some(std::sync::Arc::new(WordTokenizer)),
        CancellationToken::new(),
    );

    let mut lines = 0;
    let mut results = 0;
    while let Some(event) = events.next().await {
        if event.is_terminal() {
            results += 1;
        } else {
            assert_eq!(results, 0, "line after result");
            lines += 1;
        }
    }
    assert_eq!(lines, 10);
    assert_eq!(results, 1);
    let exceeded = events.finish().await.unwrap().unwrap();
    assert_eq!(exceeded.kind, LimitKind::Lines);
}

#[tokio::test]
async fn event_stream_spawn_failure_has_no_result() {
    let mut events = stream_events(
        executor(),
        Invocation::new("ctx-definitely-not-a-real-binary"),
        Limits::default(),
        None,
        CancellationToken::new(),
    );
    assert!(events.next().await.is_none());
    let err = events.finish().await.unwrap_err();
    assert!(err.is_not_found(), "unexpected error: {err}");
}
