//! CLI argument parsing

use crate::targets;
use clap::{Parser, Subcommand};
use mboxflash_core::config::{parse_number, parse_size};
use std::path::PathBuf;

/// Generate dynamic help text for the target argument
fn target_help() -> String {
    format!(
        "Debug target to use, as name[:key=value,...] [available: {}]",
        targets::target_names_short()
    )
}

#[derive(Parser)]
#[command(name = "mboxflash")]
#[command(
    author,
    version,
    about = "Program NOR flash through a target-resident loader",
    long_about = None
)]
pub struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Driver configuration file (TOML format)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Target selection and configuration overrides shared across commands
#[derive(clap::Args, Debug, Clone)]
pub struct TargetArgs {
    #[arg(short, long, help = target_help())]
    pub target: String,

    /// Flash bank base address (hex, e.g., 0x08000000)
    #[arg(long, value_parser = parse_number)]
    pub bank_base: Option<u32>,

    /// Flash bank size (e.g., "64 KiB", "0x10000")
    #[arg(long, value_parser = parse_size)]
    pub bank_size: Option<u32>,

    /// Sector size (e.g., "4 KiB")
    #[arg(long, value_parser = parse_size)]
    pub sector_size: Option<u32>,

    /// Loader binary to upload
    #[arg(long)]
    pub loader: Option<PathBuf>,

    /// Have the loader verify every sector after erasing it
    #[arg(long)]
    pub erase_verify: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Identify the flash device
    Probe {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Show device and bank information
    Info {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Read flash contents to file
    Read {
        #[command(flatten)]
        target: TargetArgs,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Bank offset to start reading at
        #[arg(long, value_parser = parse_number, default_value = "0")]
        offset: u32,

        /// Number of bytes to read (defaults to the rest of the bank)
        #[arg(long, value_parser = parse_size)]
        length: Option<u32>,
    },

    /// Write file to flash
    Write {
        #[command(flatten)]
        target: TargetArgs,

        /// Input file path
        #[arg(short, long)]
        input: PathBuf,

        /// Bank offset to write at
        #[arg(long, value_parser = parse_number, default_value = "0")]
        offset: u32,

        /// Don't erase the sectors touched by the image before writing
        #[arg(long)]
        no_erase: bool,

        /// Don't read back and compare after writing
        #[arg(long)]
        no_verify: bool,
    },

    /// Verify flash contents against file
    Verify {
        #[command(flatten)]
        target: TargetArgs,

        /// Input file path to verify against
        #[arg(short, long)]
        input: PathBuf,

        /// Bank offset the image starts at
        #[arg(long, value_parser = parse_number, default_value = "0")]
        offset: u32,
    },

    /// Erase sectors (the whole bank by default)
    Erase {
        #[command(flatten)]
        target: TargetArgs,

        /// First sector to erase
        #[arg(long)]
        first: Option<u32>,

        /// Last sector to erase (inclusive)
        #[arg(long)]
        last: Option<u32>,
    },

    /// Check that the whole bank is erased
    BlankCheck {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// List supported debug targets
    ListTargets,
}
