//! CLI command implementations
//!
//! Every command works on a `FlashDriver` trait object, so the same code
//! runs regardless of which debug target backs the driver.
//!
//! Long loader commands (mass erase, large transfers) report liveness
//! through the driver's keep-alive hook, which ticks the [`Activity`]
//! spinner.

mod erase;
mod list;
mod probe;
mod read;
mod write;

pub use erase::{run_blank_check, run_erase};
pub use list::list_targets;
pub use probe::{run_info, run_probe};
pub use read::run_read;
pub use write::{run_verify, run_write};

use indicatif::{ProgressBar, ProgressStyle};
use mboxflash_core::session::KeepAlive;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Spinner shown while the loader works
pub struct Activity {
    bar: ProgressBar,
}

impl Activity {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(create_spinner_style().unwrap_or_else(|_| ProgressStyle::default_spinner()));
        Self { bar }
    }

    /// Keep-alive hook that advances the spinner
    pub fn keep_alive(&self) -> KeepAlive {
        let bar = self.bar.clone();
        Box::new(move || bar.tick())
    }

    /// Show what is happening now
    pub fn phase(&self, message: impl Into<String>) {
        self.bar.set_message(message.into());
        self.bar.tick();
    }

    /// Remove the spinner before printing results
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a standard spinner style
fn create_spinner_style() -> Result<ProgressStyle, Box<dyn std::error::Error>> {
    Ok(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?)
}

/// Read file contents into a Vec
fn read_file(path: &Path) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let mut file = File::open(path)?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;
    println!("Read {} bytes from {:?}", data.len(), path);
    Ok(data)
}

/// Format a byte count for humans
fn format_size(bytes: u32) -> String {
    if bytes >= 1024 * 1024 && bytes % (1024 * 1024) == 0 {
        format!("{} MiB", bytes / (1024 * 1024))
    } else if bytes >= 1024 && bytes % 1024 == 0 {
        format!("{} KiB", bytes / 1024)
    } else {
        format!("{} B", bytes)
    }
}

/// Describe the first difference between flash contents and an image
fn first_mismatch(actual: &[u8], expected: &[u8]) -> Option<(usize, u8, u8)> {
    actual
        .iter()
        .zip(expected)
        .position(|(a, e)| a != e)
        .map(|i| (i, actual[i], expected[i]))
}
