//! Capture of live command output into cache entries

mod multiplexer;
mod session;

pub use multiplexer::{ClockMode, Multiplexer, Producer};
pub use session::{exit_code_of, run_uncached, CaptureOptions, CaptureOutcome, CaptureSession};

/// Default bound of the producer → consumer channel
pub const CHANNEL_CAPACITY: usize = 64;

/// Default size of a single pipe read
pub const READ_BUFFER_SIZE: usize = 32 * 1024;
