//! Command text as handed to the engine.
//!
//! An [`Invocation`] is immutable once built. Whether the text is handed to the
//! system shell or split into argv locally is decided here, from the text alone.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Characters that make a command require shell interpretation:
/// pipes, redirection, backgrounding, sequencing and substitution.
pub const SHELL_METACHARACTERS: &[char] = &['|', '<', '>', '&', ';', '`', '$'];

/// Separator used when assembling pipeline stages into one shell command.
pub const PIPE_SEPARATOR: &str = " | ";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvocationError {
    #[error("pipeline has no stages")]
    EmptyPipeline,
    #[error("pipeline stage {index} is empty")]
    EmptyStage { index: usize },
    #[error("pipeline stage limit exceeded: {found} stages found, limit is {limit}")]
    TooManyStages { found: usize, limit: usize },
}

/// One request to run a command through the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    command: String,
    needs_shell_wrap: bool,
    working_dir: Option<PathBuf>,
}

impl Invocation {
    /// Build an invocation for a single command line.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        let command = command.into();
        let needs_shell_wrap = needs_shell_wrap(&command);
        Self {
            command,
            needs_shell_wrap,
            working_dir: None,
        }
    }

    /// Assemble pre-split pipeline stages into a single shell command.
    ///
    /// Stage boundary detection is the caller's job; this only joins words with
    /// spaces and stages with `" | "`. A `max_stages` of `None` or `0` means
    /// unlimited.
    pub fn pipeline<S: AsRef<str>>(
        stages: &[Vec<S>],
        max_stages: Option<usize>,
    ) -> Result<Self, InvocationError> {
        if stages.is_empty() {
            return Err(InvocationError::EmptyPipeline);
        }
        if let Some(limit) = max_stages.filter(|&limit| limit > 0)
            && stages.len() > limit
        {
            return Err(InvocationError::TooManyStages {
                found: stages.len(),
                limit,
            });
        }

        let mut joined = Vec::with_capacity(stages.len());
        for (index, stage) in stages.iter().enumerate() {
            if stage.is_empty() {
                return Err(InvocationError::EmptyStage { index });
            }
            let words: Vec<&str> = stage.iter().map(AsRef::as_ref).collect();
            joined.push(words.join(" "));
        }

        Ok(Self::new(joined.join(PIPE_SEPARATOR)))
    }

    /// Run in `dir` instead of the caller's current directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    #[must_use]
    pub fn needs_shell_wrap(&self) -> bool {
        self.needs_shell_wrap
    }

    /// Explicit working directory, if any. `None` inherits the caller's.
    #[must_use]
    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// argv for direct execution. Meaningless for shell-wrapped commands.
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        split_command(&self.command)
    }
}

/// True if `command` contains any of [`SHELL_METACHARACTERS`].
#[must_use]
pub fn needs_shell_wrap(command: &str) -> bool {
    command.contains(SHELL_METACHARACTERS)
}

/// Split a command line into argv.
///
/// Honors single and double quotes and backslash escapes. There is no variable
/// expansion and no globbing. A backslash escapes the next character everywhere,
/// including inside quotes; a trailing lone backslash is dropped.
#[must_use]
pub fn split_command(command: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    // Distinguishes `""` (an empty argument) from no argument at all.
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in command.chars() {
        if escaped {
            current.push(ch);
            in_word = true;
            escaped = false;
            continue;
        }

        if ch == '\\' {
            escaped = true;
            continue;
        }

        if let Some(open) = quote {
            if ch == open {
                quote = None;
            } else {
                current.push(ch);
            }
            continue;
        }

        match ch {
            '"' | '\'' => {
                quote = Some(ch);
                in_word = true;
            }
            ' ' | '\t' => {
                if in_word {
                    parts.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            _ => {
                current.push(ch);
                in_word = true;
            }
        }
    }

    if in_word {
        parts.push(current);
    }

    parts
}
