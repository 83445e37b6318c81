//! Cmdcache - record a command's interleaved output once, replay it after
//!
//! A capture stores stdout, stderr and the exit status as a timed record
//! stream in a gzip entry under `~/.cmdcache`. Identical invocations replay
//! that stream, optionally with the original pacing.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::field_reassign_with_default,
    clippy::multiple_crate_versions
)]

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod record;
pub mod recording;
pub mod replay;
pub mod storage;

pub use error::{CmdcacheError, Result};
pub use executor::{Execution, Executor, Source};
