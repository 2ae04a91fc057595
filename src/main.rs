//! mboxflash - NOR flash programming through a target-resident loader
//!
//! The flash controller of the target is never touched from the host.
//! mboxflash uploads a small loader into target RAM over the debug link,
//! starts it, and drives it through a shared-memory mailbox.
//!
//! # Architecture
//!
//! - Debug targets implement `DebugTarget` (halt, resume, memory access,
//!   scratch RAM allocation) and are selected with `--target`
//! - `LoaderFlash` turns a target plus a loader image into a `FlashDriver`
//! - The commands here only ever see the `FlashDriver` trait object

mod cli;
mod commands;
mod targets;

use clap::Parser;
use cli::{Cli, Commands, TargetArgs};
use commands::Activity;
use mboxflash_core::config::{BankConfig, DriverConfig};
use mboxflash_core::driver::FlashDriver;
use std::path::Path;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let config_path = cli.config.as_deref();
    let activity = Activity::new();

    match cli.command {
        Commands::Probe { target } => {
            let mut driver = open(config_path, &target, &activity)?;
            commands::run_probe(driver.as_mut(), &activity)
        }
        Commands::Info { target } => {
            let mut driver = open(config_path, &target, &activity)?;
            commands::run_info(driver.as_mut(), &activity)
        }
        Commands::Read {
            target,
            output,
            offset,
            length,
        } => {
            let mut driver = open(config_path, &target, &activity)?;
            commands::run_read(driver.as_mut(), &activity, &output, offset, length)
        }
        Commands::Write {
            target,
            input,
            offset,
            no_erase,
            no_verify,
        } => {
            let mut driver = open(config_path, &target, &activity)?;
            commands::run_write(
                driver.as_mut(),
                &activity,
                &input,
                offset,
                !no_erase,
                !no_verify,
            )
        }
        Commands::Verify {
            target,
            input,
            offset,
        } => {
            let mut driver = open(config_path, &target, &activity)?;
            commands::run_verify(driver.as_mut(), &activity, &input, offset)
        }
        Commands::Erase {
            target,
            first,
            last,
        } => {
            let mut driver = open(config_path, &target, &activity)?;
            commands::run_erase(driver.as_mut(), &activity, first, last)
        }
        Commands::BlankCheck { target } => {
            let mut driver = open(config_path, &target, &activity)?;
            commands::run_blank_check(driver.as_mut(), &activity)
        }
        Commands::ListTargets => {
            commands::list_targets();
            Ok(())
        }
    }
}

/// Load the configuration, apply command-line overrides and open the target
fn open(
    config_path: Option<&Path>,
    args: &TargetArgs,
    activity: &Activity,
) -> Result<Box<dyn FlashDriver>, Box<dyn std::error::Error>> {
    let config = load_config(config_path, args)?;
    targets::open_driver(&args.target, &config, Some(activity.keep_alive()))
}

/// Load the configuration file (if any) and apply command-line overrides
fn load_config(
    path: Option<&Path>,
    args: &TargetArgs,
) -> Result<DriverConfig, Box<dyn std::error::Error>> {
    let mut config = match path {
        Some(path) => {
            let config = DriverConfig::from_file(path)?;
            log::debug!("Loaded configuration from {}", path.display());
            config
        }
        None => DriverConfig::default(),
    };

    if args.bank_base.is_some() || args.bank_size.is_some() || args.sector_size.is_some() {
        let mut bank = match (config.bank, args.bank_size) {
            (Some(bank), _) => bank,
            (None, Some(size)) => BankConfig {
                base: 0,
                size,
                sector_size: None,
            },
            (None, None) => {
                return Err("--bank-base/--sector-size need a bank size (--bank-size or config)".into())
            }
        };
        if let Some(base) = args.bank_base {
            bank.base = base;
        }
        if let Some(size) = args.bank_size {
            bank.size = size;
        }
        if let Some(sector_size) = args.sector_size {
            bank.sector_size = Some(sector_size);
        }
        config.bank = Some(bank);
    }

    if let Some(loader) = &args.loader {
        // Command-line paths are relative to the working directory
        config.loader.path = Some(std::env::current_dir()?.join(loader));
    }
    config.options.erase_verify |= args.erase_verify;

    Ok(config)
}
