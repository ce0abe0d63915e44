//! Incremental output events for streaming mode.

use std::fmt;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::ExecutionResult;

/// Which output pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event in an invocation's stream.
///
/// Line events are ordered per stream; stdout/stderr interleaving is not
/// guaranteed. `Result` is emitted exactly once and always last.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Line { stream: StreamKind, line: String },
    Result { result: ExecutionResult },
}

impl StreamEvent {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Result { .. })
    }
}

// Wire shape: {"type":"stdout","line":"..."} or {"type":"result","result":{...}}.
impl Serialize for StreamEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        match self {
            StreamEvent::Line { stream, line } => {
                map.serialize_entry("type", stream.as_str())?;
                map.serialize_entry("line", line)?;
            }
            StreamEvent::Result { result } => {
                map.serialize_entry("type", "result")?;
                map.serialize_entry("result", result)?;
            }
        }
        map.end()
    }
}
