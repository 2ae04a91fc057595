//! Erase and blank-check command implementations

use super::Activity;
use mboxflash_core::driver::FlashDriver;
use std::time::Instant;

/// Erase sectors `first..=last`, defaulting to the whole bank
pub fn run_erase(
    driver: &mut dyn FlashDriver,
    activity: &Activity,
    first: Option<u32>,
    last: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let count = driver.bank().sector_count();
    let first = first.unwrap_or(0);
    let last = last.unwrap_or(count - 1);

    if driver.bank().is_full_range(first, last) {
        activity.phase(format!("Erasing all {} sectors", count));
    } else {
        activity.phase(format!("Erasing sectors {}..={}", first, last));
    }
    let start = Instant::now();
    let result = driver.erase(first, last);
    activity.finish();
    result?;

    println!(
        "Erased {} sector(s) in {:.2?}",
        last - first + 1,
        start.elapsed()
    );
    Ok(())
}

/// Ask the loader whether the whole bank is erased
pub fn run_blank_check(
    driver: &mut dyn FlashDriver,
    activity: &Activity,
) -> Result<(), Box<dyn std::error::Error>> {
    activity.phase("Checking that the bank is blank");
    let result = driver.blank_check();
    activity.finish();

    match result {
        Ok(()) => {
            println!("Bank is blank");
            Ok(())
        }
        Err(e @ mboxflash_core::Error::DeviceFailure { .. }) => {
            println!("Bank is not blank");
            Err(Box::new(e))
        }
        Err(e) => Err(Box::new(e)),
    }
}
