//! Loader sessions and the mailbox handshake
//!
//! A [`Mailbox`] owns the debug target together with everything needed to
//! talk to the loader: the mailbox layout, the loader image, timeout budgets
//! and the keep-alive hook. Every host-level operation runs inside exactly
//! one [`Session`]:
//!
//! 1. [`Mailbox::begin`] checks the target is halted, allocates scratch RAM
//!    at the loader's load address, uploads the loader and resumes the
//!    target at its entry point
//! 2. one or more command cycles ([`Session::run_command`])
//! 3. [`Session::end`] halts the target and releases the scratch region
//!
//! `end` consumes the session and must be called on every exit path,
//! including after a failed command cycle. A session that is dropped
//! without `end` leaves its scratch region recorded in the mailbox; the
//! next `begin` releases it before allocating again.
//!
//! Uses `maybe_async` to support both sync and async modes.

use alloc::boxed::Box;
use maybe_async::maybe_async;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::loader::LoaderImage;
use crate::mailbox::{Command, MailboxLayout, FLASH_ID_LEN, STATUS_OK};
use crate::target::{DebugTarget, ScratchRegion, TargetResult, TargetState};

/// Interval between keep-alive ticks while a session is waiting
pub const KEEP_ALIVE_INTERVAL_MS: u64 = 500;

/// Liveness callback invoked periodically while waiting on the loader
///
/// Lets the surrounding application service its console or progress
/// display during long command cycles. It has no effect on the protocol.
pub type KeepAlive = Box<dyn FnMut()>;

/// Timeout budgets for command cycles and teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(serde::Deserialize))]
#[cfg_attr(feature = "std", serde(default, deny_unknown_fields))]
pub struct Timeouts {
    /// Budget for page and sector level commands
    pub command_ms: u32,
    /// Budget for `ERASE_ALL`
    pub erase_all_ms: u32,
    /// Budget for the target to reach halted state during teardown
    pub halt_ms: u32,
    /// Delay between two reads of the command register
    ///
    /// Zero is treated as 1 us so every poll moves the clock forward.
    pub poll_interval_us: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            command_ms: 2_000,
            erase_all_ms: 60_000,
            halt_ms: 2_000,
            poll_interval_us: 100,
        }
    }
}

impl Timeouts {
    /// Budget that applies to `command`
    pub fn for_command(&self, command: Command) -> u32 {
        match command {
            Command::EraseAll => self.erase_all_ms,
            _ => self.command_ms,
        }
    }

    /// Delay actually used between two polls, never zero
    pub fn poll_delay_us(&self) -> u32 {
        self.poll_interval_us.max(1)
    }
}

/// Single-owner channel to the loader on a debug target
pub struct Mailbox<T, C> {
    target: T,
    clock: C,
    layout: MailboxLayout,
    loader: LoaderImage,
    timeouts: Timeouts,
    keep_alive: Option<KeepAlive>,
    scratch: Option<ScratchRegion>,
}

impl<T: DebugTarget, C: Clock> Mailbox<T, C> {
    /// Create a mailbox channel with default timeouts
    pub fn new(target: T, clock: C, layout: MailboxLayout, loader: LoaderImage) -> Self {
        Self {
            target,
            clock,
            layout,
            loader,
            timeouts: Timeouts::default(),
            keep_alive: None,
            scratch: None,
        }
    }

    /// Replace the timeout budgets (builder style)
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Replace the timeout budgets
    pub fn set_timeouts(&mut self, timeouts: Timeouts) {
        self.timeouts = timeouts;
    }

    /// Install or remove the keep-alive callback
    pub fn set_keep_alive(&mut self, keep_alive: Option<KeepAlive>) {
        self.keep_alive = keep_alive;
    }

    /// The debug target
    pub fn target(&self) -> &T {
        &self.target
    }

    /// Mutable access to the debug target
    pub fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }

    /// The time source
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// The mailbox layout
    pub fn layout(&self) -> MailboxLayout {
        self.layout
    }

    /// The loader image
    pub fn loader(&self) -> &LoaderImage {
        &self.loader
    }

    /// The timeout budgets
    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Scratch region currently held, if any
    pub fn scratch(&self) -> Option<ScratchRegion> {
        self.scratch
    }

    /// Start a loader session
    ///
    /// # Errors
    /// * `NotHalted` - the target is not halted
    /// * `ResourceUnavailable` - scratch RAM could not be allocated at the
    ///   loader's load address
    /// * `UploadFailed` - writing the loader into RAM failed
    /// * `Target` - querying the state or resuming the target failed
    #[maybe_async]
    pub async fn begin(&mut self) -> Result<Session<'_, T, C>> {
        let state = self.target.state().await.map_err(Error::Target)?;
        if state != TargetState::Halted {
            log::error!("Target not halted");
            return Err(Error::NotHalted);
        }

        self.release_scratch().await;

        let size = self.loader.working_size();
        let region = match self.target.alloc_scratch(size).await {
            Ok(region) => region,
            Err(e) => {
                log::error!("Unable to allocate {} bytes of scratch memory: {}", size, e);
                return Err(Error::ResourceUnavailable);
            }
        };
        self.scratch = Some(region);

        // The loader is position dependent
        let load_address = self.loader.load_address();
        if region.address != load_address || !region.contains(load_address, self.loader.code().len())
        {
            log::error!(
                "Scratch region 0x{:08X} ({} bytes) does not match loader address 0x{:08X}",
                region.address,
                region.size,
                load_address
            );
            self.release_scratch().await;
            return Err(Error::ResourceUnavailable);
        }
        if !region.contains(self.layout.base(), self.layout.span()) {
            log::warn!(
                "Mailbox at 0x{:08X} lies outside the loader working area",
                self.layout.base()
            );
        }

        log::debug!(
            "Uploading {} byte loader to 0x{:08X}",
            self.loader.code().len(),
            load_address
        );
        if let Err(e) = self.upload().await {
            log::error!("Failed to load flash helper algorithm: {}", e);
            self.release_scratch().await;
            return Err(Error::UploadFailed(e));
        }

        let entry = self.loader.entry_address();
        if let Err(e) = self.target.resume(entry).await {
            log::error!("Failed to start flash helper algorithm at 0x{:08X}: {}", entry, e);
            self.release_scratch().await;
            return Err(Error::Target(e));
        }
        log::debug!("Loader running from 0x{:08X}", entry);

        let now = self.clock.now_ms();
        Ok(Session {
            mailbox: self,
            next_tick_ms: now + KEEP_ALIVE_INTERVAL_MS,
            cycles: 0,
        })
    }

    /// Write the loader and clear the handshake registers
    #[maybe_async]
    async fn upload(&mut self) -> TargetResult<()> {
        self.target
            .write_memory(self.loader.load_address(), self.loader.code())
            .await?;
        self.target.write_u32(self.layout.status(), STATUS_OK).await?;
        self.target
            .write_u32(self.layout.command(), Command::Idle.code())
            .await
    }

    #[maybe_async]
    async fn release_scratch(&mut self) {
        if let Some(region) = self.scratch.take() {
            log::trace!("Releasing scratch region at 0x{:08X}", region.address);
            self.target.free_scratch(region).await;
        }
    }
}

/// One loader run on a [`Mailbox`]
///
/// Only one command is ever outstanding: every method that issues a command
/// waits for it to complete or time out before returning.
pub struct Session<'m, T: DebugTarget, C: Clock> {
    mailbox: &'m mut Mailbox<T, C>,
    next_tick_ms: u64,
    cycles: u32,
}

impl<T: DebugTarget, C: Clock> Session<'_, T, C> {
    /// Number of command cycles issued so far
    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    /// Run one command cycle with the budget configured for `command`
    #[maybe_async]
    pub async fn run_command(&mut self, command: Command) -> Result<()> {
        let timeout_ms = self.mailbox.timeouts.for_command(command);
        self.run_command_with_timeout(command, timeout_ms).await
    }

    /// Run one command cycle
    ///
    /// Parameters (`address`, `size`, data window) must already be in
    /// place. Writes `command`, then polls it until the loader clears it or
    /// `timeout_ms` elapses, and finally checks the loader's status word.
    ///
    /// # Errors
    /// * `OperationTimeout` - the command register is still non-idle on the
    ///   read taken after the deadline
    /// * `DeviceFailure` - the loader reported a non-zero status
    /// * `TransferIOError` - a mailbox register access failed
    #[maybe_async]
    pub async fn run_command_with_timeout(
        &mut self,
        command: Command,
        timeout_ms: u32,
    ) -> Result<()> {
        let layout = self.mailbox.layout;
        let idle = Command::Idle.code();

        self.write_reg(layout.status(), STATUS_OK).await?;
        self.write_reg(layout.command(), command.code()).await?;
        self.cycles += 1;
        log::trace!("mailbox: issued {} with {} ms budget", command, timeout_ms);

        let start = self.mailbox.clock.now_ms();
        let deadline = start + timeout_ms as u64;
        let poll_delay_us = self.mailbox.timeouts.poll_delay_us();

        let mut value = self.read_reg(layout.command()).await?;
        while value != idle {
            let now = self.mailbox.clock.now_ms();
            self.keep_alive(now);

            if now >= deadline {
                value = self.read_reg(layout.command()).await?;
                if value != idle {
                    log::error!(
                        "Flash operation {} timed out after {} ms (command register 0x{:08X})",
                        command,
                        now - start,
                        value
                    );
                    return Err(Error::OperationTimeout { command });
                }
                break;
            }

            self.mailbox.target.delay_us(poll_delay_us).await;
            value = self.read_reg(layout.command()).await?;
        }

        let status = self.read_reg(layout.status()).await?;
        if status != STATUS_OK {
            log::error!(
                "Flash operation {} failed with status 0x{:08X}",
                command,
                status
            );
            return Err(Error::DeviceFailure { command, status });
        }

        let now = self.mailbox.clock.now_ms();
        log::trace!("mailbox: {} done in {} ms", command, now - start);
        self.keep_alive(now);
        Ok(())
    }

    /// Write the `address` and `size` registers
    #[maybe_async]
    pub async fn set_params(&mut self, address: u32, size: u32) -> Result<()> {
        let layout = self.mailbox.layout;
        self.write_reg(layout.address(), address).await?;
        self.write_reg(layout.size(), size).await
    }

    /// Copy up to one window of data into the data window
    #[maybe_async]
    pub async fn write_window(&mut self, data: &[u8]) -> Result<()> {
        let layout = self.mailbox.layout;
        if data.len() > layout.window_capacity() {
            return Err(Error::AddressOutOfBounds);
        }
        self.mailbox
            .target
            .write_memory(layout.data_window(), data)
            .await
            .map_err(Error::TransferIOError)
    }

    /// Copy up to one window of data out of the data window
    #[maybe_async]
    pub async fn read_window(&mut self, buf: &mut [u8]) -> Result<()> {
        let layout = self.mailbox.layout;
        if buf.len() > layout.window_capacity() {
            return Err(Error::AddressOutOfBounds);
        }
        self.mailbox
            .target
            .read_memory(layout.data_window(), buf)
            .await
            .map_err(Error::TransferIOError)
    }

    /// Program `data` at absolute flash `address`, one window per cycle
    ///
    /// Stops at the first failed chunk; nothing is retried.
    #[maybe_async]
    pub async fn write_chunked(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let capacity = self.mailbox.layout.window_capacity();
        let mut chunk_address = address;

        for chunk in data.chunks(capacity) {
            log::trace!(
                "mailbox: writing {} bytes at 0x{:08X}",
                chunk.len(),
                chunk_address
            );
            self.write_window(chunk).await?;
            self.set_params(chunk_address, chunk.len() as u32).await?;
            self.run_command(Command::WritePage).await?;
            // The last chunk may end exactly at the top of the address space
            chunk_address = chunk_address.wrapping_add(chunk.len() as u32);
        }

        Ok(())
    }

    /// Read flash at absolute `address` into `buf`, one window per cycle
    ///
    /// Stops at the first failed chunk; bytes of later chunks are left
    /// untouched.
    #[maybe_async]
    pub async fn read_chunked(&mut self, address: u32, buf: &mut [u8]) -> Result<()> {
        let capacity = self.mailbox.layout.window_capacity();
        let mut chunk_address = address;

        for chunk in buf.chunks_mut(capacity) {
            log::trace!(
                "mailbox: reading {} bytes at 0x{:08X}",
                chunk.len(),
                chunk_address
            );
            self.set_params(chunk_address, chunk.len() as u32).await?;
            self.run_command(Command::ReadPage).await?;
            self.read_window(chunk).await?;
            // The last chunk may end exactly at the top of the address space
            chunk_address = chunk_address.wrapping_add(chunk.len() as u32);
        }

        Ok(())
    }

    /// Erase one sector by index
    #[maybe_async]
    pub async fn erase_sector(&mut self, index: u32) -> Result<()> {
        let layout = self.mailbox.layout;
        self.write_reg(layout.address(), index).await?;
        self.run_command(Command::EraseSector).await
    }

    /// Ask the loader to confirm that a sector reads back erased
    #[maybe_async]
    pub async fn verify_sector(&mut self, index: u32) -> Result<()> {
        let layout = self.mailbox.layout;
        self.write_reg(layout.address(), index).await?;
        self.run_command(Command::VerifySectorAfterErase).await
    }

    /// Run `READ_FLASH_ID` and return the identifier block
    #[maybe_async]
    pub async fn read_flash_id(&mut self) -> Result<[u8; FLASH_ID_LEN]> {
        self.run_command(Command::ReadFlashId).await?;
        let mut id = [0u8; FLASH_ID_LEN];
        self.read_window(&mut id).await?;
        Ok(id)
    }

    /// Tear the session down
    ///
    /// Halts the target, waits for it to report halted, then releases the
    /// scratch region. Problems are logged and never reported to the
    /// caller, so the error of the operation itself is preserved.
    #[maybe_async]
    pub async fn end(self) {
        let Session {
            mailbox, cycles, ..
        } = self;
        let timeouts = mailbox.timeouts;

        // Regardless of the loader's state, attempt to halt the target
        if let Err(e) = mailbox.target.halt().await {
            log::debug!("Halt request failed: {}", e);
        }

        let start = mailbox.clock.now_ms();
        loop {
            match mailbox.target.state().await {
                Ok(TargetState::Halted) => break,
                Ok(_) => {}
                Err(e) => {
                    log::warn!("Unable to read target state during teardown: {}", e);
                    break;
                }
            }
            if mailbox.clock.now_ms().saturating_sub(start) >= timeouts.halt_ms as u64 {
                log::warn!("Target did not halt within {} ms", timeouts.halt_ms);
                break;
            }
            mailbox.target.delay_us(timeouts.poll_delay_us()).await;
        }

        mailbox.release_scratch().await;
        log::debug!("Loader session ended after {} command cycle(s)", cycles);
    }

    fn keep_alive(&mut self, now: u64) {
        if now < self.next_tick_ms {
            return;
        }
        self.next_tick_ms = now + KEEP_ALIVE_INTERVAL_MS;
        if let Some(tick) = self.mailbox.keep_alive.as_mut() {
            tick();
        }
    }

    #[maybe_async]
    async fn write_reg(&mut self, address: u32, value: u32) -> Result<()> {
        self.mailbox
            .target
            .write_u32(address, value)
            .await
            .map_err(Error::TransferIOError)
    }

    #[maybe_async]
    async fn read_reg(&mut self, address: u32) -> Result<u32> {
        self.mailbox
            .target
            .read_u32(address)
            .await
            .map_err(Error::TransferIOError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_classes() {
        let timeouts = Timeouts::default();
        assert_eq!(timeouts.for_command(Command::EraseAll), 60_000);
        for cmd in [
            Command::ReadFlashId,
            Command::WritePage,
            Command::ReadPage,
            Command::EraseSector,
            Command::VerifySectorAfterErase,
            Command::VerifyBlank,
        ] {
            assert_eq!(timeouts.for_command(cmd), 2_000);
        }
    }

    #[test]
    fn test_poll_delay_never_zero() {
        let timeouts = Timeouts {
            poll_interval_us: 0,
            ..Timeouts::default()
        };
        assert_eq!(timeouts.poll_delay_us(), 1);
        assert_eq!(Timeouts::default().poll_delay_us(), 100);
    }
}
