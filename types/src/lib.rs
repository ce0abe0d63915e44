//! Core domain types for ctx.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod event;
mod invocation;
mod limits;
mod result;

pub use event::{StreamEvent, StreamKind};
pub use invocation::{
    Invocation, InvocationError, PIPE_SEPARATOR, SHELL_METACHARACTERS, needs_shell_wrap,
    split_command,
};
pub use limits::{LimitExceeded, LimitKind, Limits};
pub use result::{
    ExecutionResult, FAILURE_EXIT_CODE, TERMINATION_REASON_KEY, TerminationReason,
    combine_output,
};
