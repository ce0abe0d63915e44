//! Turning trailing command-line words into an [`Invocation`].

use ctx_types::{Invocation, InvocationError};

const STAGE_SEPARATOR: &str = "|";

/// Split `args` on standalone `|` words. Empty stages are dropped.
pub fn split_stages(args: &[String]) -> Vec<Vec<String>> {
    let mut stages = Vec::new();
    let mut current = Vec::new();
    for arg in args {
        if arg == STAGE_SEPARATOR {
            if !current.is_empty() {
                stages.push(std::mem::take(&mut current));
            }
        } else {
            current.push(arg.clone());
        }
    }
    if !current.is_empty() {
        stages.push(current);
    }
    stages
}

/// Build the invocation for `args`. More than one stage becomes a shell
/// pipeline bounded by `max_stages`; a single stage is the words joined by
/// spaces.
pub fn invocation_from_args(
    args: &[String],
    max_stages: Option<usize>,
) -> Result<Invocation, InvocationError> {
    let stages = split_stages(args);
    if stages.len() > 1 {
        return Invocation::pipeline(&stages, max_stages);
    }
    Ok(Invocation::new(args.join(" ")))
}
