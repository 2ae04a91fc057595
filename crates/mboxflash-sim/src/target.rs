//! Simulated debug target
//!
//! Emulates a halted-or-running core with one block of RAM and a NOR flash
//! array behind it. While the core runs, an emulated loader services the
//! mailbox in RAM: a write to the command register starts a command, and
//! the command completes after a configurable number of command register
//! polls, at which point the status register is written and the command
//! register cleared.

use std::ops::Range;
use std::time::Duration;

use mboxflash_core::config::{parse_number, parse_size};
use mboxflash_core::mailbox::{
    Command, MailboxLayout, DEFAULT_MAILBOX_BASE, FLASH_ID_LEN, STATUS_OK,
};
use mboxflash_core::target::{DebugTarget, ScratchRegion, TargetError, TargetResult, TargetState};

use crate::clock::SimClock;
use crate::error::{Result, SimError};

/// Status reported when a command addresses memory outside the flash
pub const STATUS_RANGE_ERROR: u32 = 0x10;
/// Status reported when a verify command finds programmed bytes
pub const STATUS_NOT_BLANK: u32 = 0x20;
/// Status reported for command codes the loader does not know
pub const STATUS_UNKNOWN_COMMAND: u32 = 0xFF;

/// Configuration for the simulated target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    /// Start of target RAM
    pub ram_base: u32,
    /// Size of target RAM
    pub ram_size: u32,
    /// Start of the region handed out by the scratch allocator
    pub scratch_base: u32,
    /// Largest scratch allocation
    pub scratch_size: u32,
    /// Absolute address of flash offset 0
    pub flash_base: u32,
    /// Flash size in bytes
    pub flash_size: u32,
    /// Sector size used by `ERASE_SECTOR`
    pub sector_size: u32,
    /// Identifier block returned by `READ_FLASH_ID`
    pub flash_id: [u8; FLASH_ID_LEN],
    /// Mailbox base the emulated loader serves
    pub mailbox_base: u32,
    /// Command register polls a command stays busy for
    pub busy_polls: u32,
    /// Whether delays really sleep (for interactive use with a wall clock)
    pub realtime: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            ram_base: 0x1C00_0000,
            ram_size: 0x2_0000,
            scratch_base: 0x1C00_0000,
            scratch_size: 0x1_A000,
            flash_base: 0,
            flash_size: 64 * 1024,
            sector_size: 4096,
            flash_id: [0x01, 0x17, 0x01, 0x17, 0x00, 0x00, 0x00, 0x00],
            mailbox_base: DEFAULT_MAILBOX_BASE,
            busy_polls: 2,
            realtime: false,
        }
    }
}

impl SimConfig {
    /// Apply one `key=value` option
    ///
    /// Keys: `ram_base`, `ram_size`, `scratch_base`, `scratch_size`,
    /// `flash_base`, `size`, `sector_size`, `id`, `mailbox`, `busy_polls`,
    /// `realtime`.
    pub fn set_option(&mut self, key: &str, value: &str) -> Result<()> {
        let invalid = || SimError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        let number = || parse_number(value).map_err(|_| invalid());
        let size = || parse_size(value).map_err(|_| invalid());

        match key {
            "ram_base" => self.ram_base = number()?,
            "ram_size" => self.ram_size = size()?,
            "scratch_base" => self.scratch_base = number()?,
            "scratch_size" => self.scratch_size = size()?,
            "flash_base" => self.flash_base = number()?,
            "size" | "flash_size" => self.flash_size = size()?,
            "sector_size" => self.sector_size = size()?,
            "id" => self.flash_id = parse_flash_id(value).ok_or_else(|| invalid())?,
            "mailbox" => self.mailbox_base = number()?,
            "busy_polls" => self.busy_polls = number()?,
            "realtime" => {
                self.realtime = match value {
                    "1" | "true" | "yes" => true,
                    "0" | "false" | "no" => false,
                    _ => return Err(invalid()),
                }
            }
            _ => return Err(SimError::UnknownOption(key.to_string())),
        }
        Ok(())
    }

    /// Check that the configured regions fit together
    pub fn validate(&self) -> Result<()> {
        let ram_end = self.ram_base as u64 + self.ram_size as u64;
        if self.ram_size == 0 || ram_end > 1 << 32 {
            return Err(SimError::InvalidLayout("RAM region wraps the address space"));
        }
        let scratch_end = self.scratch_base as u64 + self.scratch_size as u64;
        if self.scratch_base < self.ram_base || scratch_end > ram_end {
            return Err(SimError::InvalidLayout("scratch region lies outside RAM"));
        }
        let mailbox_end = self.mailbox_base as u64 + MailboxLayout::new(0).span() as u64;
        if self.mailbox_base < self.ram_base || mailbox_end > ram_end {
            return Err(SimError::InvalidLayout("mailbox lies outside RAM"));
        }
        if self.sector_size == 0 || self.flash_size == 0 || self.flash_size % self.sector_size != 0
        {
            return Err(SimError::InvalidLayout(
                "flash size is not a multiple of the sector size",
            ));
        }
        if self.flash_base as u64 + self.flash_size as u64 > 1 << 32 {
            return Err(SimError::InvalidLayout("flash region wraps the address space"));
        }
        Ok(())
    }
}

/// Parse an identifier given as up to 16 hex digits, big-endian
fn parse_flash_id(value: &str) -> Option<[u8; FLASH_ID_LEN]> {
    let digits = value.trim();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(digits);
    if digits.is_empty() || digits.len() > 2 * FLASH_ID_LEN || digits.len() % 2 != 0 {
        return None;
    }

    let mut id = [0u8; FLASH_ID_LEN];
    for (i, byte) in id.iter_mut().enumerate().take(digits.len() / 2) {
        *byte = u8::from_str_radix(digits.get(2 * i..2 * i + 2)?, 16).ok()?;
    }
    Some(id)
}

/// A command accepted by the emulated loader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRecord {
    /// Command code written by the host
    pub command: Command,
    /// Value of the address register when the command was issued
    pub address: u32,
    /// Value of the size register when the command was issued
    pub size: u32,
    /// Virtual time the command was issued at
    pub issued_at_us: u64,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    code: u32,
    polls_left: u32,
}

/// In-memory debug target running an emulated loader
#[derive(Debug)]
pub struct SimTarget {
    config: SimConfig,
    layout: MailboxLayout,
    clock: SimClock,
    ram: Vec<u8>,
    flash: Vec<u8>,
    state: TargetState,
    entry: Option<u32>,
    scratch: Option<ScratchRegion>,
    pending: Option<Pending>,
    commands: Vec<CommandRecord>,
    stalled: Option<Command>,
    failures: Vec<(Command, u32)>,
    write_fault: Option<u32>,
    scratch_shift: u32,
    ignore_halt: bool,
}

impl SimTarget {
    /// Create a halted target with erased flash and zeroed RAM
    pub fn new(config: SimConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Create a target with the default configuration
    pub fn new_default() -> Self {
        Self::build(SimConfig::default())
    }

    fn build(config: SimConfig) -> Self {
        Self {
            layout: MailboxLayout::new(config.mailbox_base),
            clock: SimClock::new(),
            ram: vec![0; config.ram_size as usize],
            flash: vec![0xFF; config.flash_size as usize],
            state: TargetState::Halted,
            entry: None,
            scratch: None,
            pending: None,
            commands: Vec::new(),
            stalled: None,
            failures: Vec::new(),
            write_fault: None,
            scratch_shift: 0,
            ignore_halt: false,
            config,
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Handle to the virtual clock this target advances
    pub fn clock(&self) -> SimClock {
        self.clock.clone()
    }

    /// Get a reference to the flash data
    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    /// Get a mutable reference to the flash data
    pub fn flash_mut(&mut self) -> &mut [u8] {
        &mut self.flash
    }

    /// Copy `image` into flash starting at offset 0
    pub fn preload(&mut self, image: &[u8]) -> Result<()> {
        if image.len() > self.flash.len() {
            return Err(SimError::ImageTooLarge {
                image: image.len(),
                flash: self.flash.len(),
            });
        }
        self.flash[..image.len()].copy_from_slice(image);
        Ok(())
    }

    /// RAM contents at an absolute address, if the range is backed by RAM
    pub fn ram_at(&self, address: u32, len: usize) -> Option<&[u8]> {
        self.ram_range(address, len).ok().map(|r| &self.ram[r])
    }

    /// Commands accepted by the emulated loader, in issue order
    pub fn commands(&self) -> &[CommandRecord] {
        &self.commands
    }

    /// Forget the command history
    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Scratch region currently allocated
    pub fn scratch(&self) -> Option<ScratchRegion> {
        self.scratch
    }

    /// Address the core was last resumed at
    pub fn entry(&self) -> Option<u32> {
        self.entry
    }

    /// Current run state
    pub fn run_state(&self) -> TargetState {
        self.state
    }

    /// Force the run state
    pub fn set_state(&mut self, state: TargetState) {
        self.state = state;
    }

    /// Make `command` stay busy forever
    pub fn stall(&mut self, command: Option<Command>) {
        self.stalled = command;
    }

    /// Make `command` complete with `status` instead of executing
    pub fn fail(&mut self, command: Command, status: u32) {
        self.failures.retain(|(c, _)| *c != command);
        self.failures.push((command, status));
    }

    /// Remove all injected command failures
    pub fn clear_failures(&mut self) {
        self.failures.clear();
    }

    /// Reject any memory write covering `address`
    pub fn fault_writes_at(&mut self, address: Option<u32>) {
        self.write_fault = address;
    }

    /// Hand out scratch regions `shift` bytes above the configured base
    pub fn misplace_scratch(&mut self, shift: u32) {
        self.scratch_shift = shift;
    }

    /// Accept halt requests without actually stopping the core
    pub fn ignore_halt(&mut self, ignore: bool) {
        self.ignore_halt = ignore;
    }

    fn ram_range(&self, address: u32, len: usize) -> TargetResult<Range<usize>> {
        let start = address as u64;
        let end = start + len as u64;
        let ram_end = self.config.ram_base as u64 + self.config.ram_size as u64;
        if start < self.config.ram_base as u64 || end > ram_end {
            return Err(TargetError::MemoryFault { addr: address });
        }
        let offset = (start - self.config.ram_base as u64) as usize;
        Ok(offset..offset + len)
    }

    fn reg(&self, address: u32) -> u32 {
        match self.ram_range(address, 4) {
            Ok(r) => u32::from_le_bytes([
                self.ram[r.start],
                self.ram[r.start + 1],
                self.ram[r.start + 2],
                self.ram[r.start + 3],
            ]),
            Err(_) => 0,
        }
    }

    fn set_reg(&mut self, address: u32, value: u32) {
        if let Ok(r) = self.ram_range(address, 4) {
            self.ram[r].copy_from_slice(&value.to_le_bytes());
        }
    }

    fn flash_range(&self, address: u32, size: u32) -> Option<Range<usize>> {
        let start = (address as u64).checked_sub(self.config.flash_base as u64)?;
        let end = start + size as u64;
        if end > self.flash.len() as u64 {
            return None;
        }
        Some(start as usize..end as usize)
    }

    fn sector_range(&self, index: u32) -> Option<Range<usize>> {
        let start = index as u64 * self.config.sector_size as u64;
        let end = start + self.config.sector_size as u64;
        if end > self.flash.len() as u64 {
            return None;
        }
        Some(start as usize..end as usize)
    }

    fn window_range(&self, size: u32) -> Option<Range<usize>> {
        if size as usize > self.layout.window_capacity() {
            return None;
        }
        self.ram_range(self.layout.data_window(), size as usize).ok()
    }

    /// The host wrote a non-idle value to the command register
    fn accept(&mut self, code: u32) {
        if let Some(command) = Command::from_code(code) {
            self.commands.push(CommandRecord {
                command,
                address: self.reg(self.layout.address()),
                size: self.reg(self.layout.size()),
                issued_at_us: self.clock.now_us(),
            });
        }
        log::trace!("sim: loader accepted command 0x{:02X}", code);
        self.pending = Some(Pending {
            code,
            polls_left: self.config.busy_polls,
        });
    }

    /// The host polled the command register
    fn service(&mut self) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        if self.stalled.is_some() && Command::from_code(pending.code) == self.stalled {
            return;
        }
        if pending.polls_left > 0 {
            pending.polls_left -= 1;
            return;
        }

        let code = pending.code;
        self.pending = None;
        let status = self.execute(code);
        self.set_reg(self.layout.status(), status);
        self.set_reg(self.layout.command(), Command::Idle.code());
    }

    fn execute(&mut self, code: u32) -> u32 {
        let Some(command) = Command::from_code(code) else {
            return STATUS_UNKNOWN_COMMAND;
        };
        if let Some(&(_, status)) = self.failures.iter().find(|(c, _)| *c == command) {
            return status;
        }

        let address = self.reg(self.layout.address());
        let size = self.reg(self.layout.size());

        match command {
            Command::Idle => STATUS_OK,
            Command::ReadFlashId => match self.window_range(FLASH_ID_LEN as u32) {
                Some(w) => {
                    self.ram[w].copy_from_slice(&self.config.flash_id);
                    STATUS_OK
                }
                None => STATUS_RANGE_ERROR,
            },
            Command::WritePage => match (self.window_range(size), self.flash_range(address, size))
            {
                (Some(w), Some(f)) => {
                    // NOR programming only clears bits
                    for (dst, src) in self.flash[f].iter_mut().zip(&self.ram[w]) {
                        *dst &= *src;
                    }
                    STATUS_OK
                }
                _ => STATUS_RANGE_ERROR,
            },
            Command::ReadPage => match (self.window_range(size), self.flash_range(address, size)) {
                (Some(w), Some(f)) => {
                    self.ram[w].copy_from_slice(&self.flash[f]);
                    STATUS_OK
                }
                _ => STATUS_RANGE_ERROR,
            },
            Command::EraseSector => match self.sector_range(address) {
                Some(s) => {
                    self.flash[s].fill(0xFF);
                    STATUS_OK
                }
                None => STATUS_RANGE_ERROR,
            },
            Command::VerifySectorAfterErase => match self.sector_range(address) {
                Some(s) if self.flash[s.clone()].iter().all(|&b| b == 0xFF) => STATUS_OK,
                Some(_) => STATUS_NOT_BLANK,
                None => STATUS_RANGE_ERROR,
            },
            Command::EraseAll => {
                self.flash.fill(0xFF);
                STATUS_OK
            }
            Command::VerifyBlank => {
                if self.flash.iter().all(|&b| b == 0xFF) {
                    STATUS_OK
                } else {
                    STATUS_NOT_BLANK
                }
            }
        }
    }
}

impl DebugTarget for SimTarget {
    fn state(&mut self) -> TargetResult<TargetState> {
        Ok(self.state)
    }

    fn halt(&mut self) -> TargetResult<()> {
        if self.ignore_halt {
            return Ok(());
        }
        if self.state == TargetState::Running {
            log::trace!("sim: core halted");
        }
        self.state = TargetState::Halted;
        self.pending = None;
        Ok(())
    }

    fn resume(&mut self, address: u32) -> TargetResult<()> {
        self.ram_range(address, 4)?;
        log::trace!("sim: core resumed at 0x{:08X}", address);
        self.entry = Some(address);
        self.state = TargetState::Running;
        Ok(())
    }

    fn read_memory(&mut self, address: u32, buf: &mut [u8]) -> TargetResult<()> {
        let range = self.ram_range(address, buf.len())?;
        if self.state == TargetState::Running && address == self.layout.command() {
            self.service();
        }
        buf.copy_from_slice(&self.ram[range]);
        Ok(())
    }

    fn write_memory(&mut self, address: u32, data: &[u8]) -> TargetResult<()> {
        if let Some(fault) = self.write_fault {
            if address <= fault && (fault as u64) < address as u64 + data.len() as u64 {
                return Err(TargetError::MemoryFault { addr: fault });
            }
        }
        let range = self.ram_range(address, data.len())?;
        self.ram[range].copy_from_slice(data);

        if self.state == TargetState::Running && address == self.layout.command() {
            let code = self.reg(address);
            if code != Command::Idle.code() {
                self.accept(code);
            }
        }
        Ok(())
    }

    fn alloc_scratch(&mut self, size: u32) -> TargetResult<ScratchRegion> {
        if self.scratch.is_some() || size > self.config.scratch_size {
            return Err(TargetError::NoScratchMemory);
        }
        let region = ScratchRegion {
            address: self.config.scratch_base + self.scratch_shift,
            size,
        };
        self.scratch = Some(region);
        Ok(region)
    }

    fn free_scratch(&mut self, region: ScratchRegion) {
        if self.scratch == Some(region) {
            self.scratch = None;
        } else {
            log::warn!("sim: free of unknown scratch region 0x{:08X}", region.address);
        }
    }

    fn delay_us(&mut self, us: u32) {
        self.clock.advance_us(us as u64);
        if self.config.realtime {
            std::thread::sleep(Duration::from_micros(us as u64));
        }
    }
}
