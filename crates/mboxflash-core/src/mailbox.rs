//! Mailbox memory map and command codes
//!
//! The mailbox is a fixed-offset block of target RAM shared between the
//! host and the loader:
//!
//! | Offset | Width | Field                                   |
//! |--------|-------|-----------------------------------------|
//! | `0x00` | 32    | status (0 = ok, written by the loader)  |
//! | `0x04` | 32    | command (0 = idle/done)                 |
//! | `0x08` | 32    | address / sector index                  |
//! | `0x0C` | 32    | size                                    |
//! | `0x10` | 256 B | data window                             |
//!
//! The host writes `address`, `size` and the data window before `command`;
//! the loader clears `command` when it is done. Any change to these offsets
//! or to the opcode values is a protocol version bump.

use core::fmt;

/// Version of the host/loader mailbox contract implemented here
pub const MAILBOX_PROTOCOL_VERSION: u32 = 1;

/// Offset of the status register
pub const STATUS_OFFSET: u32 = 0x00;
/// Offset of the command register
pub const COMMAND_OFFSET: u32 = 0x04;
/// Offset of the address register
pub const ADDRESS_OFFSET: u32 = 0x08;
/// Offset of the size register
pub const SIZE_OFFSET: u32 = 0x0C;
/// Offset of the data window
pub const DATA_WINDOW_OFFSET: u32 = 0x10;
/// Capacity of the data window in bytes (one page per command cycle)
pub const DATA_WINDOW_CAPACITY: usize = 256;

/// Status value reported by the loader on success
pub const STATUS_OK: u32 = 0;

/// Length of the identifier block returned by `READ_FLASH_ID`
pub const FLASH_ID_LEN: usize = 8;

/// Default mailbox base address used by the stock loader
pub const DEFAULT_MAILBOX_BASE: u32 = 0x1C01_8000;

/// Loader command codes
///
/// Values are fixed by the loader and must match it bit for bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    /// No command pending / last command complete
    Idle = 0x00,
    /// Copy the flash identifier block into the data window
    ReadFlashId = 0x01,
    /// Program `size` bytes from the data window at `address`
    WritePage = 0x02,
    /// Copy `size` bytes at `address` into the data window
    ReadPage = 0x03,
    /// Erase the sector whose index is in `address`
    EraseSector = 0x0A,
    /// Check that the sector whose index is in `address` reads back erased
    VerifySectorAfterErase = 0xA0,
    /// Erase the whole array
    EraseAll = 0xAA,
    /// Check that the whole array reads back erased
    VerifyBlank = 0x55,
}

impl Command {
    /// All non-idle commands
    pub const ALL: [Command; 7] = [
        Command::ReadFlashId,
        Command::WritePage,
        Command::ReadPage,
        Command::EraseSector,
        Command::VerifySectorAfterErase,
        Command::EraseAll,
        Command::VerifyBlank,
    ];

    /// Wire value of this command
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Decode a wire value
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0x00 => Some(Self::Idle),
            0x01 => Some(Self::ReadFlashId),
            0x02 => Some(Self::WritePage),
            0x03 => Some(Self::ReadPage),
            0x0A => Some(Self::EraseSector),
            0xA0 => Some(Self::VerifySectorAfterErase),
            0xAA => Some(Self::EraseAll),
            0x55 => Some(Self::VerifyBlank),
            _ => None,
        }
    }

    /// Short mnemonic used in logs
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::ReadFlashId => "READ_FLASH_ID",
            Self::WritePage => "WRITE_PAGE",
            Self::ReadPage => "READ_PAGE",
            Self::EraseSector => "ERASE_SECTOR",
            Self::VerifySectorAfterErase => "VERIFY_SECTOR_AFTER_ERASE",
            Self::EraseAll => "ERASE_ALL",
            Self::VerifyBlank => "VERIFY_BLANK",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.code())
    }
}

/// Absolute addresses of the mailbox fields for a given base
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxLayout {
    base: u32,
}

impl MailboxLayout {
    /// Create a layout rooted at `base`
    pub const fn new(base: u32) -> Self {
        Self { base }
    }

    /// Base address of the mailbox
    pub const fn base(&self) -> u32 {
        self.base
    }

    /// Address of the status register
    pub const fn status(&self) -> u32 {
        self.base + STATUS_OFFSET
    }

    /// Address of the command register
    pub const fn command(&self) -> u32 {
        self.base + COMMAND_OFFSET
    }

    /// Address of the address register
    pub const fn address(&self) -> u32 {
        self.base + ADDRESS_OFFSET
    }

    /// Address of the size register
    pub const fn size(&self) -> u32 {
        self.base + SIZE_OFFSET
    }

    /// Address of the first byte of the data window
    pub const fn data_window(&self) -> u32 {
        self.base + DATA_WINDOW_OFFSET
    }

    /// Capacity of the data window in bytes
    pub const fn window_capacity(&self) -> usize {
        DATA_WINDOW_CAPACITY
    }

    /// Total number of bytes occupied by the mailbox
    pub const fn span(&self) -> usize {
        DATA_WINDOW_OFFSET as usize + DATA_WINDOW_CAPACITY
    }
}

impl Default for MailboxLayout {
    fn default() -> Self {
        Self::new(DEFAULT_MAILBOX_BASE)
    }
}
