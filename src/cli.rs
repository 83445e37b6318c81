//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::config::Config;
use crate::recording::ClockMode;
use crate::replay::DecodeMode;

/// Execute a command and cache its output.
///
/// Output is stored with timestamps and interleaved so that it can be
/// replayed later. Stdout, stderr and the exit code are preserved.
#[derive(Parser, Debug)]
#[command(name = "cmdcache")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Time to live in seconds (-1 never expires)
    #[arg(long, allow_negative_numbers = true, value_name = "SECONDS")]
    pub ttl: Option<i64>,

    /// Replay with the original timing
    #[arg(long, visible_alias = "pace")]
    pub delay: bool,

    /// Cache non-zero exit codes
    #[arg(long = "ve", visible_alias = "keep-failures")]
    pub keep_failures: bool,

    /// Fail replay on corrupt entries instead of stopping early
    #[arg(long)]
    pub strict: bool,

    /// Timing clock for new captures
    #[arg(long, value_enum)]
    pub clock: Option<ClockMode>,

    /// Cache directory
    #[arg(long, env = "CMDCACHE_DIR", value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long, env = "CMDCACHE_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Command to run, followed by its arguments
    #[arg(
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "COMMAND"
    )]
    pub command: Vec<String>,
}

/// Process exit code for a failed argument parse
///
/// Help and version requests exit 0. Usage errors, including a bare
/// invocation that prints help, exit 1.
#[must_use]
pub fn usage_exit_code(error: &clap::Error) -> u8 {
    if error.use_stderr() {
        1
    } else {
        0
    }
}

impl Cli {
    /// Overlay flags given on the command line onto `config`
    pub fn apply(&self, config: &mut Config) {
        if let Some(ttl) = self.ttl {
            config.ttl_seconds = ttl;
        }
        if self.delay {
            config.pace = true;
        }
        if self.keep_failures {
            config.keep_failures = true;
        }
        if self.strict {
            config.decode = DecodeMode::Strict;
        }
        if let Some(clock) = self.clock {
            config.clock = clock;
        }
        if let Some(ref dir) = self.cache_dir {
            config.cache_dir.clone_from(dir);
        }
    }
}
