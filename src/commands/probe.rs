//! Probe and info command implementations

use super::{format_size, Activity};
use mboxflash_core::driver::FlashDriver;
use mboxflash_core::geometry::EraseState;
use mboxflash_core::mailbox::MAILBOX_PROTOCOL_VERSION;

/// Identify the flash device behind the loader
pub fn run_probe(
    driver: &mut dyn FlashDriver,
    activity: &Activity,
) -> Result<(), Box<dyn std::error::Error>> {
    activity.phase("Probing flash device");
    let result = driver.probe();
    activity.finish();

    match result {
        Ok(()) => {
            print_device(driver);
            Ok(())
        }
        Err(e) => {
            eprintln!("Probe failed: {}", e);
            Err(Box::new(e))
        }
    }
}

/// Probe, then show the bank geometry and mailbox protocol details
pub fn run_info(
    driver: &mut dyn FlashDriver,
    activity: &Activity,
) -> Result<(), Box<dyn std::error::Error>> {
    run_probe(driver, activity)?;

    let bank = driver.bank();
    println!();
    println!("Bank:");
    println!(
        "  Base:    0x{:08X} - 0x{:08X}",
        bank.base(),
        bank.base() as u64 + bank.size() as u64 - 1
    );
    println!("  Sectors: {} x {}", bank.sector_count(), format_size(bank.sector_size()));
    println!("  Mailbox protocol version: {}", MAILBOX_PROTOCOL_VERSION);

    let summary = |state: EraseState| {
        bank.sectors()
            .iter()
            .filter(|s| s.erase_state == state)
            .count()
    };
    println!(
        "  Erase state: {} erased, {} programmed, {} unknown",
        summary(EraseState::Erased),
        summary(EraseState::NotErased),
        summary(EraseState::Unknown)
    );

    Ok(())
}

fn print_device(driver: &dyn FlashDriver) {
    let bank = driver.bank();
    println!("Found flash device:");
    println!("  Name:        {}", driver.describe());
    if let Some(ty) = driver.device_type() {
        println!("  Device type: {}", ty);
    }
    println!(
        "  Size:        {} bytes ({})",
        bank.size(),
        format_size(bank.size())
    );
}
