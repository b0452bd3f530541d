use std::io::IsTerminal;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use colored::Colorize;

use reportq::cli::args::{Cli, Commands};
use reportq::cli::commands::{self, Context};
use reportq::config::{ColorSetting, Config, Paths};
use reportq::logging::init_logging;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{}: {e:#}", "error".red().bold());
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let paths = Paths::new()?;
    let mut config = Config::load_from_path(&paths.config_file)?;

    if let Some(url) = cli.remote {
        config.sync.remote_url = Some(url);
    }
    if cli.verbose {
        config.log.level = "debug".to_string();
    }

    match config.general.color {
        ColorSetting::Always => colored::control::set_override(true),
        ColorSetting::Never => colored::control::set_override(false),
        ColorSetting::Auto => {},
    }
    let ansi = match config.general.color {
        ColorSetting::Always => true,
        ColorSetting::Never => false,
        ColorSetting::Auto => std::io::stderr().is_terminal(),
    };
    init_logging(&config.log, ansi)?;

    let format = cli.output.unwrap_or(config.general.default_output);
    let ctx = Context {
        paths,
        config,
        format,
    };

    let output = match cli.command {
        Commands::Enqueue(args) => commands::enqueue(&ctx, args)?,
        Commands::List { unsynced, entity } => commands::list(&ctx, unsynced, entity.as_ref())?,
        Commands::Show { id } => commands::show(&ctx, &id)?,
        Commands::Status => commands::status(&ctx)?,
        Commands::Remove { id } => commands::remove(&ctx, &id)?,
        Commands::Purge { older_than } => commands::purge(&ctx, older_than)?,
        Commands::Conflicts => commands::conflicts(&ctx)?,
        Commands::Resolve { id, retry, .. } => commands::resolve(&ctx, &id, retry)?,
        Commands::Sync { dry_run } => commands::sync(&ctx, dry_run).await?,
        Commands::Daemon { offline } => commands::daemon(&ctx, offline).await?,
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "reportq", &mut std::io::stdout());
            String::new()
        },
    };

    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}
