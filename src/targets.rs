//! Debug target registry and driver construction
//!
//! Targets are selected with a string of the form `name` or
//! `name:key1=value1,key2=value2`. Opening a target yields a ready
//! [`FlashDriver`] with the configuration applied; the concrete debug
//! target and clock types stay hidden behind the trait object.

use mboxflash_core::clock::Clock;
use mboxflash_core::config::DriverConfig;
use mboxflash_core::driver::{FlashDriver, LoaderFlash};
use mboxflash_core::geometry::FlashBank;
use mboxflash_core::loader::LoaderImage;
use mboxflash_core::session::{KeepAlive, Mailbox};
use mboxflash_core::target::DebugTarget;
use std::collections::HashMap;

/// Information about a debug target
pub struct TargetInfo {
    /// Primary name (used for matching)
    pub name: &'static str,
    /// Alternative names/aliases
    pub aliases: &'static [&'static str],
    /// Short description
    pub description: &'static str,
}

/// Get information about all available targets (enabled at compile time)
#[allow(unused_mut, clippy::vec_init_then_push)]
pub fn available_targets() -> Vec<TargetInfo> {
    let mut targets = Vec::new();

    #[cfg(feature = "sim")]
    targets.push(TargetInfo {
        name: "sim",
        aliases: &["simulator"],
        description: "Simulated target with emulated loader (size=,sector_size=,id=,image=,realtime=)",
    });

    targets
}

/// Generate a short list of target names for CLI help
pub fn target_names_short() -> String {
    let targets = available_targets();
    if targets.is_empty() {
        return "none".to_string();
    }
    let names: Vec<&str> = targets.iter().map(|t| t.name).collect();
    names.join(", ")
}

/// Parsed target parameters
pub struct TargetParams {
    /// Target name as given
    pub name: String,
    /// Key-value parameters
    pub params: HashMap<String, String>,
}

/// Parse a target string into name and parameters
///
/// Format: "name" or "name:key1=value1,key2=value2"
pub fn parse_target_params(s: &str) -> Result<TargetParams, Box<dyn std::error::Error>> {
    let (name, opts_str) = s.split_once(':').unwrap_or((s, ""));

    let mut params = HashMap::new();
    for opt in opts_str.split(',').filter(|o| !o.is_empty()) {
        match opt.split_once('=') {
            Some((key, value)) => {
                params.insert(key.trim().to_string(), value.trim().to_string());
            }
            None => return Err(format!("Invalid target parameter: {}", opt).into()),
        }
    }

    Ok(TargetParams {
        name: name.trim().to_string(),
        params,
    })
}

/// Open a target and build a driver for it
pub fn open_driver(
    target: &str,
    config: &DriverConfig,
    keep_alive: Option<KeepAlive>,
) -> Result<Box<dyn FlashDriver>, Box<dyn std::error::Error>> {
    let params = parse_target_params(target)?;

    match params.name.as_str() {
        #[cfg(feature = "sim")]
        "sim" | "simulator" => open_sim(&params, config, keep_alive),
        _ => {
            let _ = (config, keep_alive);
            Err(format!(
                "Unknown target: {} (available: {})",
                params.name,
                target_names_short()
            )
            .into())
        }
    }
}

/// Wrap a mailbox channel into a configured driver
#[allow(dead_code)] // Used in feature-gated code
fn build_driver<T, C>(
    mut mailbox: Mailbox<T, C>,
    bank: FlashBank,
    config: &DriverConfig,
    keep_alive: Option<KeepAlive>,
) -> Box<dyn FlashDriver>
where
    T: DebugTarget + 'static,
    C: Clock + 'static,
{
    mailbox.set_timeouts(config.timeouts);
    mailbox.set_keep_alive(keep_alive);
    Box::new(LoaderFlash::new(mailbox, bank).with_erase_verify(config.options.erase_verify))
}

/// Load the configured loader, falling back to `fallback` when none is set
#[allow(dead_code)] // Used in feature-gated code
fn loader_or(
    config: &DriverConfig,
    fallback: impl FnOnce() -> Vec<u8>,
) -> Result<LoaderImage, Box<dyn std::error::Error>> {
    match config.loader_image()? {
        Some(image) => Ok(image),
        None => Ok(config.image_from(fallback())?),
    }
}

#[cfg(feature = "sim")]
fn open_sim(
    params: &TargetParams,
    config: &DriverConfig,
    keep_alive: Option<KeepAlive>,
) -> Result<Box<dyn FlashDriver>, Box<dyn std::error::Error>> {
    use mboxflash_core::clock::StdClock;
    use mboxflash_core::geometry::DEFAULT_SECTOR_SIZE;
    use mboxflash_sim::{SimConfig, SimTarget};

    // The simulated flash follows the configured bank unless overridden
    let mut sim_config = SimConfig {
        mailbox_base: config.mailbox.base,
        ..SimConfig::default()
    };
    if let Some(bank) = config.bank {
        sim_config.flash_base = bank.base;
        sim_config.flash_size = bank.size;
        sim_config.sector_size = bank.sector_size.unwrap_or(DEFAULT_SECTOR_SIZE);
    }

    let mut image = None;
    for (key, value) in &params.params {
        match key.as_str() {
            "image" => image = Some(value.clone()),
            _ => sim_config.set_option(key, value)?,
        }
    }

    let mut target = SimTarget::new(sim_config.clone())?;
    if let Some(path) = image {
        let data = std::fs::read(&path)?;
        target.preload(&data)?;
        log::info!("Preloaded {} bytes from {} into simulated flash", data.len(), path);
    }

    let loader = loader_or(config, mboxflash_sim::stub_loader)?;
    // Target parameters may override [bank]; the driver follows the simulated flash
    let bank = FlashBank::new(
        sim_config.flash_base,
        sim_config.flash_size,
        Some(sim_config.sector_size),
    )?;
    log::info!(
        "Opened simulated target: {} KiB flash at 0x{:08X}",
        sim_config.flash_size / 1024,
        sim_config.flash_base
    );

    let layout = config.mailbox_layout();
    if sim_config.realtime {
        let mailbox = Mailbox::new(target, StdClock::new(), layout, loader);
        Ok(build_driver(mailbox, bank, config, keep_alive))
    } else {
        let clock = target.clock();
        let mailbox = Mailbox::new(target, clock, layout, loader);
        Ok(build_driver(mailbox, bank, config, keep_alive))
    }
}
