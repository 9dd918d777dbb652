use clap::Parser;
use arena::cli::{self, Cli};
use arena::config::AppConfig;
use std::process::ExitCode;

mod main_runtime;

use main_runtime::{init_logging, init_logging_simple};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let cfg = match AppConfig::load_from(&cli.config_dir) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load configuration from {}: {}", cli.config_dir, e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(problems) = cfg.validate() {
        eprintln!("invalid configuration:");
        for p in problems {
            eprintln!("  - {p}");
        }
        return ExitCode::FAILURE;
    }

    if cli.is_one_shot() {
        init_logging_simple();
    } else {
        init_logging(&cfg.logging);
    }

    match cli::commands::run(cli.command, cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
