//! Flash bank geometry and sector bookkeeping
//!
//! The bank is a contiguous run of uniform sectors. Geometry comes from
//! configuration; the identifier read during probe does not change it.

use alloc::vec::Vec;
use core::ops::Range;

use crate::error::{Error, Result};

/// Sector size used when the configuration does not specify one
pub const DEFAULT_SECTOR_SIZE: u32 = 4096;

/// Erase state of a sector as last observed by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EraseState {
    /// Known to be erased
    Erased,
    /// Known to contain programmed data
    NotErased,
    /// Not known
    #[default]
    Unknown,
}

/// One sector of the bank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sector {
    /// Offset from the bank base
    pub offset: u32,
    /// Sector size in bytes
    pub size: u32,
    /// Last known erase state
    pub erase_state: EraseState,
    /// Write protection flag (this driver never protects sectors)
    pub protected: bool,
}

/// Addressable flash region programmed through the loader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashBank {
    base: u32,
    sector_size: u32,
    sectors: Vec<Sector>,
}

impl FlashBank {
    /// Create a bank of `size` bytes at `base`
    ///
    /// `sector_size` defaults to [`DEFAULT_SECTOR_SIZE`].
    ///
    /// # Errors
    /// * `InvalidGeometry` - if the size is zero, is not a multiple of the
    ///   sector size, or the bank would wrap the 32-bit address space
    pub fn new(base: u32, size: u32, sector_size: Option<u32>) -> Result<Self> {
        let sector_size = sector_size.unwrap_or(DEFAULT_SECTOR_SIZE);

        if size == 0 || sector_size == 0 || size % sector_size != 0 {
            return Err(Error::InvalidGeometry);
        }
        if base as u64 + size as u64 > 1 << 32 {
            return Err(Error::InvalidGeometry);
        }

        let mut bank = Self {
            base,
            sector_size,
            sectors: Vec::new(),
        };
        bank.rebuild_sectors_for(size / sector_size);
        Ok(bank)
    }

    /// Absolute address of the first byte of the bank
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Total size in bytes
    pub fn size(&self) -> u32 {
        self.sector_size * self.sectors.len() as u32
    }

    /// Uniform sector size in bytes
    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    /// Number of sectors
    pub fn sector_count(&self) -> u32 {
        self.sectors.len() as u32
    }

    /// All sectors in address order
    pub fn sectors(&self) -> &[Sector] {
        &self.sectors
    }

    /// A single sector by index
    pub fn sector(&self, index: u32) -> Option<&Sector> {
        self.sectors.get(index as usize)
    }

    /// Check if `[offset, offset + len)` lies inside the bank
    pub fn contains(&self, offset: u32, len: usize) -> bool {
        // Use u64 arithmetic to avoid truncation when len > u32::MAX
        offset as u64 + len as u64 <= self.size() as u64
    }

    /// Absolute address of a bank offset
    pub fn address_of(&self, offset: u32) -> u32 {
        self.base + offset
    }

    /// Check whether the inclusive sector range covers the whole bank
    pub fn is_full_range(&self, first: u32, last: u32) -> bool {
        first == 0 && last == self.sector_count() - 1
    }

    /// Indices of the sectors overlapping `[offset, offset + len)`
    pub fn sectors_touching(&self, offset: u32, len: usize) -> Range<u32> {
        if len == 0 {
            return 0..0;
        }
        let first = offset / self.sector_size;
        let end = offset as u64 + len as u64;
        let last = end.div_ceil(self.sector_size as u64) as u32;
        first..last.min(self.sector_count())
    }

    /// Reset the sector table; every sector becomes `Unknown`
    pub fn rebuild_sectors(&mut self) {
        self.rebuild_sectors_for(self.sector_count());
    }

    /// Set the erase state of a range of sectors
    pub fn mark(&mut self, range: Range<u32>, state: EraseState) {
        let end = range.end.min(self.sector_count()) as usize;
        let start = (range.start as usize).min(end);
        for sector in &mut self.sectors[start..end] {
            sector.erase_state = state;
        }
    }

    /// Set the erase state of every sector
    pub fn mark_all(&mut self, state: EraseState) {
        self.mark(0..self.sector_count(), state);
    }

    fn rebuild_sectors_for(&mut self, count: u32) {
        let size = self.sector_size;
        self.sectors = (0..count)
            .map(|i| Sector {
                offset: i * size,
                size,
                erase_state: EraseState::Unknown,
                protected: false,
            })
            .collect();
    }
}
