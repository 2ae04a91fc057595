//! TOML driver configuration
//!
//! Describes everything the driver needs that cannot be read from the
//! target: bank geometry, mailbox placement, the loader image and its
//! placement, timeout budgets and options.
//!
//! # Format
//!
//! ```toml
//! [bank]
//! base = "0x00000000"
//! size = "64 KiB"
//! sector_size = "4 KiB"      # optional, default 4096
//!
//! [mailbox]
//! base = "0x1C018000"
//!
//! [loader]
//! path = "loader.bin"        # relative to the configuration file
//! load_address = "0x1C000000"
//! entry_address = "0x1C000080"
//! working_size = "0x1A000"
//!
//! [timeouts]
//! command_ms = 2000
//! erase_all_ms = 60000
//!
//! [options]
//! erase_verify = false
//! ```
//!
//! Numbers can be decimal or `0x` hex, either as TOML integers or strings.
//! Sizes additionally accept `B`, `KiB`/`KB` and `MiB`/`MB` suffixes.

use std::fs;
use std::path::{Path, PathBuf};
use std::string::String;

use serde::Deserialize;
use thiserror::Error;

use crate::error::Error;
use crate::geometry::FlashBank;
use crate::loader::{
    LoaderImage, DEFAULT_ENTRY_ADDRESS, DEFAULT_LOAD_ADDRESS, DEFAULT_WORKING_SIZE,
};
use crate::mailbox::{MailboxLayout, DEFAULT_MAILBOX_BASE};
use crate::session::Timeouts;

/// Errors raised while loading a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file could not be read
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
    /// The TOML document is malformed
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// Values are well-formed but inconsistent
    #[error("invalid configuration: {0}")]
    Invalid(#[from] Error),
}

/// Top-level driver configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverConfig {
    /// Bank geometry; when absent the target's own default applies
    pub bank: Option<BankConfig>,
    /// Mailbox placement
    pub mailbox: MailboxConfig,
    /// Loader image and placement
    pub loader: LoaderConfig,
    /// Timeout budgets
    pub timeouts: Timeouts,
    /// Driver options
    pub options: Options,
    /// Directory relative loader paths are resolved against
    #[serde(skip)]
    pub source_dir: Option<PathBuf>,
}

/// Flash bank geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BankConfig {
    /// Absolute base address
    #[serde(default, deserialize_with = "deserialize_hex_u32")]
    pub base: u32,
    /// Size in bytes
    #[serde(deserialize_with = "deserialize_size")]
    pub size: u32,
    /// Uniform sector size
    #[serde(default, deserialize_with = "deserialize_opt_size")]
    pub sector_size: Option<u32>,
}

/// Mailbox placement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MailboxConfig {
    /// Base address of the mailbox
    #[serde(deserialize_with = "deserialize_hex_u32")]
    pub base: u32,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            base: DEFAULT_MAILBOX_BASE,
        }
    }
}

/// Loader image and placement
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    /// Path to the raw loader binary
    pub path: Option<PathBuf>,
    /// Address the loader must be written to
    #[serde(deserialize_with = "deserialize_hex_u32")]
    pub load_address: u32,
    /// Address execution starts at
    #[serde(deserialize_with = "deserialize_hex_u32")]
    pub entry_address: u32,
    /// RAM the loader needs, starting at the load address
    #[serde(deserialize_with = "deserialize_size")]
    pub working_size: u32,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            path: None,
            load_address: DEFAULT_LOAD_ADDRESS,
            entry_address: DEFAULT_ENTRY_ADDRESS,
            working_size: DEFAULT_WORKING_SIZE,
        }
    }
}

/// Driver options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Options {
    /// Follow every sector erase with `VERIFY_SECTOR_AFTER_ERASE`
    pub erase_verify: bool,
}

fn deserialize_hex_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(n),
        HexOrInt::Str(s) => parse_number(&s).map_err(serde::de::Error::custom),
    }
}

fn deserialize_size<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(n),
        HexOrInt::Str(s) => parse_size(&s).map_err(serde::de::Error::custom),
    }
}

fn deserialize_opt_size<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    deserialize_size(deserializer).map(Some)
}

// Try to deserialize as a number first, then as a string
#[derive(Deserialize)]
#[serde(untagged)]
enum HexOrInt {
    Int(u32),
    Str(String),
}

/// Parse a number that can be hex (0x...) or decimal
pub fn parse_number(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| std::format!("invalid hex: {}", e))
    } else {
        s.parse()
            .map_err(|e| std::format!("invalid number: {}", e))
    }
}

/// Parse a size string like "64 KiB", "0x1A000" or "4096"
pub fn parse_size(s: &str) -> Result<u32, String> {
    let s = s.trim();

    if let Ok(n) = parse_number(s) {
        return Ok(n);
    }

    let lower = s.to_lowercase();
    let (num_str, multiplier) = if let Some(n) = lower.strip_suffix("mib") {
        (n.trim(), 1024 * 1024)
    } else if let Some(n) = lower.strip_suffix("mb") {
        (n.trim(), 1024 * 1024)
    } else if let Some(n) = lower.strip_suffix("kib") {
        (n.trim(), 1024)
    } else if let Some(n) = lower.strip_suffix("kb") {
        (n.trim(), 1024)
    } else if let Some(n) = lower.strip_suffix('b') {
        (n.trim(), 1)
    } else {
        return Err(std::format!("invalid size: {}", s));
    };

    let num: u32 = num_str
        .parse()
        .map_err(|_| std::format!("invalid size: {}", s))?;
    num.checked_mul(multiplier)
        .ok_or_else(|| std::format!("size too large: {}", s))
}

impl DriverConfig {
    /// Parse a configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load a configuration file
    ///
    /// A relative loader path is resolved against the file's directory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.source_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// Build the flash bank, if geometry is configured
    pub fn geometry(&self) -> Result<Option<FlashBank>, ConfigError> {
        match self.bank {
            Some(bank) => Ok(Some(FlashBank::new(bank.base, bank.size, bank.sector_size)?)),
            None => Ok(None),
        }
    }

    /// Mailbox layout at the configured base
    pub fn mailbox_layout(&self) -> MailboxLayout {
        MailboxLayout::new(self.mailbox.base)
    }

    /// Resolved path of the loader binary, if one is configured
    pub fn loader_path(&self) -> Option<PathBuf> {
        let path = self.loader.path.as_ref()?;
        match &self.source_dir {
            Some(dir) if path.is_relative() => Some(dir.join(path)),
            _ => Some(path.clone()),
        }
    }

    /// Load the configured loader binary
    ///
    /// Returns `None` when no loader path is configured.
    pub fn loader_image(&self) -> Result<Option<LoaderImage>, ConfigError> {
        let Some(path) = self.loader_path() else {
            return Ok(None);
        };
        let code = fs::read(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        log::debug!("Read {} byte loader from {}", code.len(), path.display());
        self.image_from(code).map(Some)
    }

    /// Place `code` according to the configured loader addresses
    pub fn image_from(&self, code: std::vec::Vec<u8>) -> Result<LoaderImage, ConfigError> {
        Ok(LoaderImage::new(
            code,
            self.loader.load_address,
            self.loader.entry_address,
            self.loader.working_size,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("4096"), Ok(4096));
        assert_eq!(parse_size("0x1A000"), Ok(0x1_A000));
        assert_eq!(parse_size("64 KiB"), Ok(65536));
        assert_eq!(parse_size("4kb"), Ok(4096));
        assert_eq!(parse_size("2 MiB"), Ok(2 * 1024 * 1024));
        assert_eq!(parse_size("512B"), Ok(512));
        assert!(parse_size("lots").is_err());
        assert!(parse_size("8192 MiB").is_err());
    }

    #[test]
    fn test_full_config() {
        let config = DriverConfig::from_toml_str(
            r#"
            [bank]
            base = "0x08000000"
            size = "64 KiB"
            sector_size = 4096

            [mailbox]
            base = "0x20001000"

            [loader]
            load_address = "0x20000000"
            entry_address = "0x20000040"
            working_size = "8 KiB"

            [timeouts]
            command_ms = 500

            [options]
            erase_verify = true
            "#,
        )
        .unwrap();

        let bank = config.geometry().unwrap().unwrap();
        assert_eq!(bank.base(), 0x0800_0000);
        assert_eq!(bank.sector_count(), 16);
        assert_eq!(config.mailbox_layout().base(), 0x2000_1000);
        assert_eq!(config.timeouts.command_ms, 500);
        assert_eq!(config.timeouts.erase_all_ms, 60_000);
        assert!(config.options.erase_verify);

        let image = config.image_from(vec![0u8; 0x100]).unwrap();
        assert_eq!(image.load_address(), 0x2000_0000);
        assert_eq!(image.entry_address(), 0x2000_0040);
        assert_eq!(image.working_size(), 8192);
    }

    #[test]
    fn test_defaults() {
        let config = DriverConfig::from_toml_str("").unwrap();
        assert!(config.geometry().unwrap().is_none());
        assert_eq!(config.mailbox_layout(), MailboxLayout::default());
        assert_eq!(config.loader, LoaderConfig::default());
        assert_eq!(config.timeouts, Timeouts::default());
        assert!(config.loader_image().unwrap().is_none());
    }

    #[test]
    fn test_inconsistent_geometry_rejected() {
        let config = DriverConfig::from_toml_str(
            r#"
            [bank]
            size = 5000
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.geometry(),
            Err(ConfigError::Invalid(Error::InvalidGeometry))
        ));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result = DriverConfig::from_toml_str("[options]\nturbo = true\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_relative_loader_path() {
        let mut config = DriverConfig::from_toml_str("[loader]\npath = \"algo.bin\"\n").unwrap();
        config.source_dir = Some(PathBuf::from("/etc/mboxflash"));
        assert_eq!(
            config.loader_path(),
            Some(PathBuf::from("/etc/mboxflash/algo.bin"))
        );
    }
}
