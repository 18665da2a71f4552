mod cli;
mod commands;
mod config;
mod progress;
mod providers;
mod schema;
mod state;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Commands};
use std::io;

/// Output flags shared by every subcommand.
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // -v raises the log level; -q silences everything below errors.
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Validate => commands::validate::run(&ctx, &cli.config),
        Commands::Plan(args) => commands::plan::run(&ctx, &cli.config, &args),
        Commands::Apply(args) => commands::apply::run(&ctx, &cli.config, &args),
        Commands::Destroy(args) => commands::destroy::run(&ctx, &cli.config, &args),
        Commands::Output(args) => commands::output::run(&ctx, &cli.config, &args),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "terral", &mut io::stdout());
            Ok(())
        }
    }
}
