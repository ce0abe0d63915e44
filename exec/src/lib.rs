//! Command execution for ctx.
//!
//! An [`Executor`] runs an [`Invocation`](ctx_types::Invocation) either to
//! completion with buffered output ([`Executor::execute`]) or line by line with
//! live byte/line/token ceilings ([`Executor::execute_streaming`],
//! [`stream_events`]).
//!
//! Every invocation runs in its own termination group (process group on Unix,
//! job object on Windows). Timeouts, cancellation and breached ceilings stop
//! the entire process tree, not just the direct child, and no call returns
//! while a member of the tree is known to be alive.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod error;
mod events;
mod executor;
mod shell;
mod streaming;
mod termination;

pub use error::ExecError;
pub use events::{EventStream, stream_events};
pub use executor::Executor;
pub use shell::{DetectedShell, ShellConfig, detect_shell};
pub use streaming::StreamingOutcome;
pub use termination::{
    DEFAULT_GRACE_PERIOD, DEFAULT_WAIT_DELAY, GroupState, KillOutcome, ProcessTree,
    TerminationGroup, TerminationOutcome, TerminationReport, TerminationSettings, exit_code,
};
pub use tokio_util::sync::CancellationToken;
