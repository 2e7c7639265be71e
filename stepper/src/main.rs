//! Runs TOML step units one host-loop tick at a time.
//!
//! `stepper run` drives the units through a [`MainLoop`] with a terminal
//! host: symbolic steps are echoed to stdout, `--ask` prompts on stdin.
//! `stepper check` parses units without running them; `stepper init` writes
//! a default configuration file.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use stepper::exit_codes;
use stepper::io::config::{DEFAULT_CONFIG_FILE, StepperConfig, load_config, write_config};
use stepper::io::terminal::TerminalHost;
use stepper::io::unit_file::{TomlUnitProvider, check_unit};
use stepper::{MainLoop, Stepper, StepperState};

#[derive(Parser)]
#[command(
    name = "stepper",
    version,
    about = "Run step units one host-loop tick at a time"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run units in order; exits non-zero when a step fails.
    Run {
        /// Confirm every step before it runs.
        #[arg(long)]
        ask: bool,
        /// Configuration file (missing file = defaults).
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
        /// Unit files, run in the order given.
        #[arg(required = true)]
        units: Vec<PathBuf>,
    },
    /// Write a default `stepper.toml` if missing.
    Init {
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Parse units and report malformed steps without running anything.
    Check {
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
        #[arg(required = true)]
        units: Vec<PathBuf>,
    },
}

/// Outcome of a command that got far enough to run.
enum Outcome {
    Ok,
    Failed,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = match &cli.command {
        Command::Run { config, .. } | Command::Check { config, .. } => config.clone(),
        Command::Init { config, force } => {
            stepper::logging::init("warn");
            return match cmd_init(config, *force) {
                Ok(()) => exit_code(exit_codes::OK),
                Err(err) => {
                    eprintln!("{err:#}");
                    exit_code(exit_codes::INVALID)
                }
            };
        }
    };
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err:#}");
            return exit_code(exit_codes::INVALID);
        }
    };
    stepper::logging::init(&config.log_filter);

    let result = match cli.command {
        Command::Run { ask, units, .. } => cmd_run(&config, &config_path, ask, &units),
        Command::Check { units, .. } => cmd_check(&config, &config_path, &units),
        Command::Init { .. } => Ok(Outcome::Ok),
    };
    match result {
        Ok(Outcome::Ok) => exit_code(exit_codes::OK),
        Ok(Outcome::Failed) => exit_code(exit_codes::FAILED),
        Err(err) => {
            eprintln!("{err:#}");
            exit_code(exit_codes::INVALID)
        }
    }
}

fn cmd_run(
    config: &StepperConfig,
    config_path: &Path,
    ask: bool,
    units: &[PathBuf],
) -> Result<Outcome> {
    let provider = TomlUnitProvider::new(config.resolved_unit_dir(config_path));
    let mut stepper = Stepper::new().with_provider(provider);
    stepper.set_ask(ask || config.ask);
    for unit in units {
        stepper.add_unit(unit.as_path()).context("add unit")?;
    }

    let mut main_loop = MainLoop::new().with_max_ticks(config.max_ticks);
    let mut host = TerminalHost::stdio();
    stepper.start(&mut main_loop).context("start stepper")?;
    let report = main_loop
        .drive(&mut stepper, &mut host)
        .context("drive stepper")?;
    info!(
        ticks = report.ticks,
        steps = stepper.step_count(),
        units = stepper.unit_count(),
        "run finished"
    );

    if report.limited {
        eprintln!(
            "tick limit of {} reached after {} steps",
            config.max_ticks,
            stepper.step_count()
        );
        return Ok(Outcome::Failed);
    }
    match (report.state, stepper.error()) {
        (StepperState::Completed, None) => Ok(Outcome::Ok),
        (_, Some(err)) => {
            eprintln!("{err}");
            Ok(Outcome::Failed)
        }
        (state, None) => {
            eprintln!("stepper stopped in state {state}");
            Ok(Outcome::Failed)
        }
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    write_config(config_path, &StepperConfig::default())?;
    println!("wrote {}", config_path.display());
    Ok(())
}

fn cmd_check(config: &StepperConfig, config_path: &Path, units: &[PathBuf]) -> Result<Outcome> {
    let provider = TomlUnitProvider::new(config.resolved_unit_dir(config_path));
    for unit in units {
        let path = provider.resolve(&unit.as_path().into());
        let count = check_unit(&path)?;
        println!("{}: {count} steps", unit.display());
    }
    Ok(Outcome::Ok)
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
