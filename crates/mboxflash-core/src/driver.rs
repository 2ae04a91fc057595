//! Flash driver operations
//!
//! This module provides the `FlashDriver` trait, the set of operations the
//! surrounding flash framework calls, and `LoaderFlash`, which implements
//! them by running loader sessions on a [`Mailbox`].
//!
//! Uses `maybe_async` to support both sync and async modes.

use maybe_async::maybe_async;

use crate::clock::Clock;
use crate::device::DeviceType;
use crate::error::{Error, Result};
use crate::geometry::{EraseState, FlashBank};
use crate::mailbox::Command;
use crate::session::Mailbox;
use crate::target::DebugTarget;

/// Flash bank driver (sync or async depending on `is_sync`)
///
/// Offsets are relative to the bank base. Every operation other than
/// `probe` probes the device first if that has not happened yet.
///
/// # Example
///
/// ```ignore
/// use mboxflash_core::driver::FlashDriver;
///
/// fn program<D: FlashDriver>(driver: &mut D, image: &[u8]) -> Result<()> {
///     let last = driver.bank().sector_count() - 1;
///     driver.erase(0, last)?;
///     driver.write(image, 0)
/// }
/// ```
#[maybe_async(AFIT)]
pub trait FlashDriver {
    /// The bank geometry and sector erase states
    fn bank(&self) -> &FlashBank;

    /// Human-readable device name
    ///
    /// `"unknown"` before a successful probe, `"unrecognized"` when the
    /// device type is not in the known-device table.
    fn describe(&self) -> &'static str;

    /// Device type read by the last successful probe
    fn device_type(&self) -> Option<DeviceType>;

    /// Identify the device and rebuild the sector table
    async fn probe(&mut self) -> Result<()>;

    /// Probe unless a probe has already succeeded
    async fn auto_probe(&mut self) -> Result<()>;

    /// Erase sectors `first..=last`
    ///
    /// A range covering the whole bank is carried out as a mass erase.
    ///
    /// # Errors
    /// * `InvalidSectorRange` - if `first > last` or `last` is past the bank
    async fn erase(&mut self, first: u32, last: u32) -> Result<()>;

    /// Erase the whole bank with a single loader command
    async fn mass_erase(&mut self) -> Result<()>;

    /// Program `data` at `offset`
    ///
    /// The target region should be erased first.
    ///
    /// # Errors
    /// * `AddressOutOfBounds` - if the write extends beyond the bank
    async fn write(&mut self, data: &[u8], offset: u32) -> Result<()>;

    /// Read flash at `offset` into `buf`
    ///
    /// `buf` is filled with `0xFF` before anything else happens, so bytes
    /// that could not be read keep the erased value.
    ///
    /// # Errors
    /// * `AddressOutOfBounds` - if the read extends beyond the bank
    async fn read(&mut self, buf: &mut [u8], offset: u32) -> Result<()>;

    /// Ask the loader whether the whole bank reads back erased
    async fn blank_check(&mut self) -> Result<()>;
}

/// Extension trait for FlashDriver that provides additional capabilities
///
/// This is separate from the main trait to keep the core trait minimal and
/// easier to implement, while still providing useful derived functionality.
#[maybe_async(AFIT)]
pub trait FlashDriverExt: FlashDriver {
    /// Read the entire bank
    async fn read_all(&mut self) -> Result<alloc::vec::Vec<u8>> {
        let mut buf = alloc::vec![0u8; self.bank().size() as usize];
        self.read(&mut buf, 0).await?;
        Ok(buf)
    }

    /// Erase every sector overlapping `[offset, offset + len)`
    async fn erase_covering(&mut self, offset: u32, len: usize) -> Result<()> {
        if !self.bank().contains(offset, len) {
            return Err(Error::AddressOutOfBounds);
        }
        let sectors = self.bank().sectors_touching(offset, len);
        if sectors.is_empty() {
            return Ok(());
        }
        self.erase(sectors.start, sectors.end - 1).await
    }
}

impl<D: FlashDriver + ?Sized> FlashDriverExt for D {}

/// Driver for a NOR bank programmed through the mailbox loader
pub struct LoaderFlash<T, C> {
    mailbox: Mailbox<T, C>,
    bank: FlashBank,
    device_type: Option<DeviceType>,
    probed: bool,
    erase_verify: bool,
}

impl<T: DebugTarget, C: Clock> LoaderFlash<T, C> {
    /// Create a driver for `bank` talking through `mailbox`
    pub fn new(mailbox: Mailbox<T, C>, bank: FlashBank) -> Self {
        Self {
            mailbox,
            bank,
            device_type: None,
            probed: false,
            erase_verify: false,
        }
    }

    /// Follow every sector erase with a `VERIFY_SECTOR_AFTER_ERASE` cycle
    pub fn with_erase_verify(mut self, erase_verify: bool) -> Self {
        self.erase_verify = erase_verify;
        self
    }

    /// The mailbox channel
    pub fn mailbox(&self) -> &Mailbox<T, C> {
        &self.mailbox
    }

    /// Mutable access to the mailbox channel
    pub fn mailbox_mut(&mut self) -> &mut Mailbox<T, C> {
        &mut self.mailbox
    }

    /// Whether a probe has succeeded since creation or the last reset
    pub fn is_probed(&self) -> bool {
        self.probed
    }

    /// Forget the probe result; the next operation probes again
    pub fn reset(&mut self) {
        self.probed = false;
        self.device_type = None;
    }

    /// Replace the bank geometry and forget the probe result
    pub fn reconfigure(&mut self, bank: FlashBank) {
        self.bank = bank;
        self.reset();
    }
}

#[maybe_async(AFIT)]
impl<T: DebugTarget, C: Clock> FlashDriver for LoaderFlash<T, C> {
    fn bank(&self) -> &FlashBank {
        &self.bank
    }

    fn describe(&self) -> &'static str {
        match self.device_type {
            None => "unknown",
            Some(ty) => ty.name().unwrap_or("unrecognized"),
        }
    }

    fn device_type(&self) -> Option<DeviceType> {
        self.device_type
    }

    async fn probe(&mut self) -> Result<()> {
        let mut session = self.mailbox.begin().await?;
        let id = session.read_flash_id().await;
        session.end().await;
        let id = id?;

        let ty = DeviceType::from_id(&id);
        match ty.name() {
            Some(name) => log::info!("Found {} (device type {})", name, ty),
            None => log::warn!("Unrecognized flash device type {}", ty),
        }
        log::debug!("Flash ID: {:02X?}", id);

        self.device_type = Some(ty);
        self.bank.rebuild_sectors();
        self.probed = true;
        log::info!(
            "Flash bank at 0x{:08X}: {} sectors of {} bytes",
            self.bank.base(),
            self.bank.sector_count(),
            self.bank.sector_size()
        );
        Ok(())
    }

    async fn auto_probe(&mut self) -> Result<()> {
        if self.probed {
            return Ok(());
        }
        self.probe().await
    }

    async fn erase(&mut self, first: u32, last: u32) -> Result<()> {
        if first > last || last >= self.bank.sector_count() {
            return Err(Error::InvalidSectorRange { first, last });
        }
        if self.bank.is_full_range(first, last) {
            log::debug!("Sectors {}..={} cover the bank, using mass erase", first, last);
            return self.mass_erase().await;
        }

        self.auto_probe().await?;
        let verify = self.erase_verify;
        let mut session = self.mailbox.begin().await?;

        let mut done = first;
        let mut result = Ok(());
        for index in first..=last {
            log::debug!("Erasing sector {}", index);
            result = session.erase_sector(index).await;
            if result.is_ok() && verify {
                result = session.verify_sector(index).await;
            }
            if result.is_err() {
                break;
            }
            done = index + 1;
        }
        session.end().await;

        self.bank.mark(first..done, EraseState::Erased);
        if result.is_err() {
            self.bank.mark(done..done + 1, EraseState::Unknown);
        }
        result
    }

    async fn mass_erase(&mut self) -> Result<()> {
        self.auto_probe().await?;
        let mut session = self.mailbox.begin().await?;
        log::debug!("Erasing all {} sectors", self.bank.sector_count());
        let result = session.run_command(Command::EraseAll).await;
        session.end().await;

        match result {
            Ok(()) => self.bank.mark_all(EraseState::Erased),
            Err(_) => self.bank.mark_all(EraseState::Unknown),
        }
        result
    }

    async fn write(&mut self, data: &[u8], offset: u32) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        if !self.bank.contains(offset, data.len()) {
            return Err(Error::AddressOutOfBounds);
        }

        self.auto_probe().await?;
        let address = self.bank.address_of(offset);
        let mut session = self.mailbox.begin().await?;
        log::debug!("Writing {} bytes at 0x{:08X}", data.len(), address);
        let result = session.write_chunked(address, data).await;
        session.end().await;

        // Even a partial write leaves programmed bytes behind
        let touched = self.bank.sectors_touching(offset, data.len());
        self.bank.mark(touched, EraseState::NotErased);
        result
    }

    async fn read(&mut self, buf: &mut [u8], offset: u32) -> Result<()> {
        buf.fill(0xFF);
        if buf.is_empty() {
            return Ok(());
        }
        if !self.bank.contains(offset, buf.len()) {
            return Err(Error::AddressOutOfBounds);
        }

        self.auto_probe().await?;
        let address = self.bank.address_of(offset);
        let mut session = self.mailbox.begin().await?;
        log::debug!("Reading {} bytes at 0x{:08X}", buf.len(), address);
        let result = session.read_chunked(address, buf).await;
        session.end().await;
        result
    }

    async fn blank_check(&mut self) -> Result<()> {
        self.auto_probe().await?;
        let mut session = self.mailbox.begin().await?;
        let result = session.run_command(Command::VerifyBlank).await;
        session.end().await;

        match result {
            Ok(()) => self.bank.mark_all(EraseState::Erased),
            Err(Error::DeviceFailure { .. }) => self.bank.mark_all(EraseState::Unknown),
            Err(_) => {}
        }
        result
    }
}
