//! Target-resident loader image
//!
//! The loader is position dependent: it must be placed at exactly its load
//! address and started at its entry address. It expects `working_size`
//! bytes of RAM starting at the load address for code, stack and the
//! mailbox.

use alloc::vec::Vec;

use crate::error::{Error, Result};

/// Default load address of the stock loader
pub const DEFAULT_LOAD_ADDRESS: u32 = 0x1C00_0000;
/// Default entry address of the stock loader
pub const DEFAULT_ENTRY_ADDRESS: u32 = 0x1C00_0080;
/// Default RAM requirement of the stock loader
pub const DEFAULT_WORKING_SIZE: u32 = 0x1_A000;

/// An immutable loader blob plus its placement requirements
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderImage {
    code: Vec<u8>,
    load_address: u32,
    entry_address: u32,
    working_size: u32,
}

impl LoaderImage {
    /// Create a loader image
    ///
    /// # Errors
    /// * `InvalidLoader` - if the image is empty, does not fit into
    ///   `working_size`, or the entry point lies outside the image
    pub fn new(
        code: Vec<u8>,
        load_address: u32,
        entry_address: u32,
        working_size: u32,
    ) -> Result<Self> {
        let code_end = load_address as u64 + code.len() as u64;
        let area_end = load_address as u64 + working_size as u64;

        if code.is_empty() || code.len() as u64 > working_size as u64 || area_end > 1 << 32 {
            return Err(Error::InvalidLoader);
        }
        if entry_address < load_address || entry_address as u64 >= code_end {
            return Err(Error::InvalidLoader);
        }

        Ok(Self {
            code,
            load_address,
            entry_address,
            working_size,
        })
    }

    /// Create an image placed at the stock loader addresses
    pub fn with_default_placement(code: Vec<u8>) -> Result<Self> {
        Self::new(
            code,
            DEFAULT_LOAD_ADDRESS,
            DEFAULT_ENTRY_ADDRESS,
            DEFAULT_WORKING_SIZE,
        )
    }

    /// The loader binary
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Address the image must be written to
    pub fn load_address(&self) -> u32 {
        self.load_address
    }

    /// Address execution starts at
    pub fn entry_address(&self) -> u32 {
        self.entry_address
    }

    /// Bytes of scratch RAM the loader needs, starting at the load address
    pub fn working_size(&self) -> u32 {
        self.working_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_default_placement() {
        let image = LoaderImage::with_default_placement(vec![0u8; 0x200]).unwrap();
        assert_eq!(image.load_address(), 0x1C00_0000);
        assert_eq!(image.entry_address(), 0x1C00_0080);
        assert_eq!(image.working_size(), 0x1_A000);
        assert_eq!(image.code().len(), 0x200);
    }

    #[test]
    fn test_entry_outside_image_rejected() {
        // Entry at 0x80 needs more than 0x80 bytes of code
        let result = LoaderImage::with_default_placement(vec![0u8; 0x80]);
        assert_eq!(result, Err(Error::InvalidLoader));

        let result = LoaderImage::new(vec![0u8; 16], 0x1000, 0x0FFC, 0x100);
        assert_eq!(result, Err(Error::InvalidLoader));
    }

    #[test]
    fn test_image_larger_than_working_area_rejected() {
        let result = LoaderImage::new(vec![0u8; 0x200], 0x1000, 0x1000, 0x100);
        assert_eq!(result, Err(Error::InvalidLoader));
    }

    #[test]
    fn test_empty_image_rejected() {
        let result = LoaderImage::new(Vec::new(), 0x1000, 0x1000, 0x100);
        assert_eq!(result, Err(Error::InvalidLoader));
    }
}
