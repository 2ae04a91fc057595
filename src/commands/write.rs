//! Write and verify command implementations

use super::{first_mismatch, read_file, Activity};
use mboxflash_core::driver::{FlashDriver, FlashDriverExt};
use std::path::Path;
use std::time::Instant;

/// Write a file into the bank
///
/// Sectors touched by the image are erased first unless `erase` is false;
/// data sharing those sectors outside the image is lost.
pub fn run_write(
    driver: &mut dyn FlashDriver,
    activity: &Activity,
    input: &Path,
    offset: u32,
    erase: bool,
    verify: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = read_file(input)?;
    if !driver.bank().contains(offset, data.len()) {
        activity.finish();
        return Err(format!(
            "Image of {} bytes at offset 0x{:08X} does not fit the {} byte bank",
            data.len(),
            offset,
            driver.bank().size()
        )
        .into());
    }
    let start = Instant::now();

    if erase {
        let sectors = driver.bank().sectors_touching(offset, data.len());
        if !sectors.is_empty() {
            activity.phase(format!(
                "Erasing sectors {}..={}",
                sectors.start,
                sectors.end - 1
            ));
            if let Err(e) = driver.erase_covering(offset, data.len()) {
                activity.finish();
                return Err(Box::new(e));
            }
        }
    }

    activity.phase(format!("Writing {} bytes at offset 0x{:08X}", data.len(), offset));
    if let Err(e) = driver.write(&data, offset) {
        activity.finish();
        return Err(Box::new(e));
    }

    if verify {
        activity.phase("Verifying");
        let mut readback = vec![0u8; data.len()];
        let result = driver.read(&mut readback, offset);
        activity.finish();
        result?;
        if let Some((i, actual, expected)) = first_mismatch(&readback, &data) {
            return Err(format!(
                "Verification failed at offset 0x{:08X}: expected 0x{:02X}, got 0x{:02X}",
                offset as usize + i,
                expected,
                actual
            )
            .into());
        }
        println!("Wrote and verified {} bytes in {:.2?}", data.len(), start.elapsed());
    } else {
        activity.finish();
        println!("Wrote {} bytes in {:.2?}", data.len(), start.elapsed());
    }

    Ok(())
}

/// Compare the bank against a file
pub fn run_verify(
    driver: &mut dyn FlashDriver,
    activity: &Activity,
    input: &Path,
    offset: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let expected = read_file(input)?;

    activity.phase(format!("Reading {} bytes at offset 0x{:08X}", expected.len(), offset));
    let mut actual = vec![0u8; expected.len()];
    let result = driver.read(&mut actual, offset);
    activity.finish();
    result?;

    match first_mismatch(&actual, &expected) {
        None => {
            println!("Verification passed ({} bytes)", expected.len());
            Ok(())
        }
        Some((i, actual, expected)) => Err(format!(
            "Verification failed at offset 0x{:08X}: expected 0x{:02X}, got 0x{:02X}",
            offset as usize + i,
            expected,
            actual
        )
        .into()),
    }
}
