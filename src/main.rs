//! scrun - run self-contained node scripts
//!
//! CLI entry point: parses flags, loads config and hands off to `run`.

use clap::Parser;
use scrun::cli::Cli;
use scrun::config::{Config, ConfigManager};
use scrun::error::ScrunResult;
use scrun::ui;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Overrides the `-v` level with a full filter directive
const LOG_ENV: &str = "SCRUN_LOG";

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => exit_code(code),
        Err(e) => match e.exit_code() {
            Some(code) => exit_code(code),
            None => {
                ui::error(&e);
                ExitCode::FAILURE
            }
        },
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

async fn run() -> ScrunResult<i32> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    init_tracing(cli.verbose, &config);

    scrun::cli::commands::run(&cli, &config).await
}

/// Initialize logging on stderr: 0 = warn, 1 = info, 2+ = debug
fn init_tracing(verbose: u8, config: &Config) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("scrun=warn"),
        1 => EnvFilter::new("scrun=info"),
        _ => EnvFilter::new("scrun=debug"),
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    if config.general.log_format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
