use std::error::Error;
use std::fs::OpenOptions;
use std::path::Path;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{error, LevelFilter};
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};

use commands::{
    run::{self, RunArgs},
    validate::{self, ValidateArgs},
};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "runman", version, about = "Parameter-sweep run manager for tracking pipelines")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute every run of a parameter sweep.
    Run(RunArgs),
    /// Check a configuration and parameter document without running anything.
    Validate(ValidateArgs),
}

fn init_logging(log_file: Option<&Path>, verbose: bool) -> Result<(), Box<dyn Error>> {
    let config = ConfigBuilder::new()
        .set_target_level(LevelFilter::Off)
        .set_thread_level(LevelFilter::Off)
        .build();
    let terminal_level = if verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        terminal_level,
        config.clone(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    if let Some(path) = log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        loggers.push(WriteLogger::new(LevelFilter::Info, config, file));
    }
    CombinedLogger::init(loggers)?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let logging = match &cli.command {
        Command::Run(args) => init_logging(Some(&args.log), args.verbose),
        Command::Validate(_) => init_logging(None, true),
    };
    if let Err(err) = logging {
        eprintln!("could not initialise logging: {err}");
        return ExitCode::FAILURE;
    }
    let result = match &cli.command {
        Command::Run(args) => run::run(args),
        Command::Validate(args) => validate::run(args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
