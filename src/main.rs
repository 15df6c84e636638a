//! instaclone - cached installs of versioned files
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use instaclone::cli::{Cli, Commands};
use instaclone::config::ConfigManager;
use instaclone::error::InstacloneResult;
use std::error::Error;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let debug = cli.debug;

    init_logging(debug);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            if debug {
                let mut source = e.source();
                while let Some(cause) = source {
                    eprintln!("  {} {}", style("caused by:").dim(), cause);
                    source = cause.source();
                }
            } else {
                eprintln!("(run with --debug for more detail)");
            }
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("hint:").yellow(), hint);
            }
            ExitCode::from(2)
        }
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("instaclone=debug")
    } else {
        EnvFilter::new("instaclone=info")
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    if debug {
        builder.with_file(true).with_line_number(true).init();
    } else {
        builder.init();
    }
}

fn run(cli: Cli) -> InstacloneResult<()> {
    let Cli {
        force,
        config,
        command,
        ..
    } = cli;
    let manager = || match config {
        Some(path) => {
            debug!("Using config override: {}", path.display());
            ConfigManager::with_path(path)
        }
        None => ConfigManager::new(),
    };

    match command {
        // Purge needs the cache but no config
        Commands::Purge => instaclone::cli::commands::purge(),
        Commands::Publish(args) => instaclone::cli::commands::publish(args, &manager(), force),
        Commands::Install(args) => instaclone::cli::commands::install(args, &manager(), force),
        Commands::Configs(args) => instaclone::cli::commands::configs(args, &manager()),
    }
}
