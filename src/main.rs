//! Cmdcache CLI

use std::io::ErrorKind;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use cmdcache::cli::{usage_exit_code, Cli};
use cmdcache::config::{Config, CONFIG_FILE_NAME};
use cmdcache::{CmdcacheError, Executor};

const EXIT_NOT_FOUND: u8 = 127;
const EXIT_NOT_EXECUTABLE: u8 = 126;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(usage_exit_code(&e));
        }
    };
    init_tracing(cli.verbose);

    match run(&cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("cmdcache: {e:#}");
            ExitCode::from(failure_code(&e))
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<u8> {
    // A config file inside an explicit cache dir is picked up too
    let config_path = cli.config.clone().or_else(|| {
        cli.cache_dir
            .as_ref()
            .map(|dir| dir.join(CONFIG_FILE_NAME))
            .filter(|path| path.is_file())
    });

    let mut config = Config::load(config_path.as_deref()).context("loading configuration")?;
    cli.apply(&mut config);

    let executor = Executor::new(config).context("invalid configuration")?;

    let mut out = tokio::io::stdout();
    let mut err = tokio::io::stderr();
    let execution = executor.execute(&cli.command, &mut out, &mut err).await?;

    debug!("Finished via {:?} with exit code {}", execution.source, execution.exit_code);
    Ok(execution.exit_code)
}

fn failure_code(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<CmdcacheError>() {
        Some(CmdcacheError::Spawn { source, .. }) if source.kind() == ErrorKind::NotFound => {
            EXIT_NOT_FOUND
        }
        Some(CmdcacheError::Spawn { .. }) => EXIT_NOT_EXECUTABLE,
        _ => 1,
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "cmdcache=warn",
        1 => "cmdcache=info",
        _ => "cmdcache=debug",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}
