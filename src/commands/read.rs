//! Read command implementation

use super::Activity;
use mboxflash_core::driver::FlashDriver;
use std::path::Path;
use std::time::Instant;

/// Read a region of the bank to a file
pub fn run_read(
    driver: &mut dyn FlashDriver,
    activity: &Activity,
    output: &Path,
    offset: u32,
    length: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let bank_size = driver.bank().size();
    if offset > bank_size {
        return Err(format!("Offset 0x{:08X} is beyond the {} byte bank", offset, bank_size).into());
    }
    let length = length.unwrap_or(bank_size - offset);

    let mut data = vec![0u8; length as usize];
    activity.phase(format!("Reading {} bytes at offset 0x{:08X}", length, offset));
    let start = Instant::now();
    let result = driver.read(&mut data, offset);
    activity.finish();
    result?;

    std::fs::write(output, &data)?;
    println!(
        "Read {} bytes in {:.2?}, saved to {:?}",
        data.len(),
        start.elapsed(),
        output
    );
    Ok(())
}
