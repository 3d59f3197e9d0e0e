mod cli;
mod commands;
mod config;
mod engine;
mod provider;
mod runner;
mod schema;
mod signal;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use config::Settings;
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    /// Declaration files and directories from `-f`
    pub files: Vec<PathBuf>,
    /// `--state` / `TERRACE_STATE` override
    pub state: Option<PathBuf>,
    pub settings: Settings,
}

impl Context {
    pub fn state_path(&self) -> PathBuf {
        self.settings.state_path(self.state.as_deref())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
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

    if let Command::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "terrace", &mut io::stdout());
        return Ok(());
    }

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        files: cli.files,
        state: cli.state,
        settings: Settings::load(&config::expand(&cli.config.to_string_lossy()))?,
    };
    log::debug!("State file: {}", ctx.state_path().display());

    let code = match cli.command {
        Command::Plan(args) => commands::plan::run(&ctx, args)?,
        Command::Apply(args) => commands::apply::run(&ctx, args)?,
        Command::Destroy(args) => commands::destroy::run(&ctx, args)?,
        Command::Validate => commands::validate::run(&ctx)?,
        Command::Graph => commands::graph::run(&ctx)?,
        Command::State(cmd) => commands::state::run(&ctx, cmd)?,
        Command::Completions { .. } => 0,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
