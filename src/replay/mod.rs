//! Replay of cached executions

mod engine;

pub use engine::{ReplayOptions, ReplayOutcome, ReplaySession, Termination};

use serde::{Deserialize, Serialize};

/// Records decoded ahead of the writer during replay
pub const DECODE_AHEAD: usize = 16;

/// How replay treats a record stream that cannot be decoded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeMode {
    /// Stop at the first bad record as if the stream had ended
    #[default]
    Lenient,
    /// Fail the replay on the first bad record
    Strict,
}
