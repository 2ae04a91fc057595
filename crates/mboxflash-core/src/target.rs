//! Debug target abstraction
//!
//! The driver consumes a remote target through the [`DebugTarget`] trait:
//! run control, memory access and scratch RAM allocation, all performed
//! over whatever probe transport the implementation uses. Every call may
//! be a slow probe round trip.
//!
//! The trait uses `maybe_async` to support both sync and async modes.
//! - By default, the trait is async
//! - With the `is_sync` feature, it becomes synchronous

use core::fmt;
use maybe_async::maybe_async;

/// Run state of the target core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    /// Core is halted under debugger control
    Halted,
    /// Core is executing
    Running,
    /// State could not be determined (e.g. core in reset)
    Unknown,
}

/// A block of target RAM granted by the scratch allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchRegion {
    /// Start address of the region
    pub address: u32,
    /// Size of the region in bytes
    pub size: u32,
}

impl ScratchRegion {
    /// Exclusive end address of the region
    pub fn end(&self) -> u64 {
        self.address as u64 + self.size as u64
    }

    /// Check whether `[addr, addr + len)` lies inside this region
    pub fn contains(&self, addr: u32, len: usize) -> bool {
        addr >= self.address && addr as u64 + len as u64 <= self.end()
    }
}

/// Errors reported by debug target primitives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetError {
    /// Memory access at the given address was rejected by the target
    MemoryFault {
        /// Faulting address
        addr: u32,
    },
    /// The probe transport failed
    ProbeError,
    /// No scratch memory of the requested size is available
    NoScratchMemory,
    /// The target did not respond in time
    Timeout,
    /// The operation is not supported by this target
    Unsupported,
}

impl fmt::Display for TargetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MemoryFault { addr } => write!(f, "memory fault at 0x{:08X}", addr),
            Self::ProbeError => write!(f, "probe transport error"),
            Self::NoScratchMemory => write!(f, "no scratch memory available"),
            Self::Timeout => write!(f, "target did not respond"),
            Self::Unsupported => write!(f, "operation not supported by target"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for TargetError {}

/// Result type for debug target primitives
pub type TargetResult<T> = core::result::Result<T, TargetError>;

/// Debug access to a remote target (sync or async depending on `is_sync`)
///
/// Implementations only need to provide the bulk memory accessors; the
/// scalar accessors default to little-endian accesses built on top of them.
/// Probes with native 8/16/32-bit transfers should override the scalar
/// methods, since the mailbox registers are 32-bit words.
///
/// ## Example
///
/// ```ignore
/// #[maybe_async]
/// impl DebugTarget for MyProbe {
///     async fn state(&mut self) -> TargetResult<TargetState> {
///         self.read_dhcsr().await.map(decode_state)
///     }
///     // ...
/// }
/// ```
#[maybe_async(AFIT)]
pub trait DebugTarget {
    /// Query the current run state
    async fn state(&mut self) -> TargetResult<TargetState>;

    /// Request the core to halt
    ///
    /// Returns once the request is issued; use [`DebugTarget::state`] to
    /// confirm the core actually stopped.
    async fn halt(&mut self) -> TargetResult<()>;

    /// Resume execution at `address`
    async fn resume(&mut self, address: u32) -> TargetResult<()>;

    /// Read target memory into `buf`
    async fn read_memory(&mut self, address: u32, buf: &mut [u8]) -> TargetResult<()>;

    /// Write `data` into target memory
    async fn write_memory(&mut self, address: u32, data: &[u8]) -> TargetResult<()>;

    /// Allocate a scratch RAM region of at least `size` bytes
    async fn alloc_scratch(&mut self, size: u32) -> TargetResult<ScratchRegion>;

    /// Release a region returned by [`DebugTarget::alloc_scratch`]
    async fn free_scratch(&mut self, region: ScratchRegion);

    /// Delay for the specified number of microseconds
    async fn delay_us(&mut self, us: u32);

    /// Read an 8-bit value
    async fn read_u8(&mut self, address: u32) -> TargetResult<u8> {
        let mut buf = [0u8; 1];
        self.read_memory(address, &mut buf).await?;
        Ok(buf[0])
    }

    /// Read a 16-bit little-endian value
    async fn read_u16(&mut self, address: u32) -> TargetResult<u16> {
        let mut buf = [0u8; 2];
        self.read_memory(address, &mut buf).await?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Read a 32-bit little-endian value
    async fn read_u32(&mut self, address: u32) -> TargetResult<u32> {
        let mut buf = [0u8; 4];
        self.read_memory(address, &mut buf).await?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Write an 8-bit value
    async fn write_u8(&mut self, address: u32, value: u8) -> TargetResult<()> {
        self.write_memory(address, &[value]).await
    }

    /// Write a 16-bit little-endian value
    async fn write_u16(&mut self, address: u32, value: u16) -> TargetResult<()> {
        self.write_memory(address, &value.to_le_bytes()).await
    }

    /// Write a 32-bit little-endian value
    async fn write_u32(&mut self, address: u32, value: u32) -> TargetResult<()> {
        self.write_memory(address, &value.to_le_bytes()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_region_contains() {
        let region = ScratchRegion {
            address: 0x1C00_0000,
            size: 0x1_A000,
        };
        assert!(region.contains(0x1C00_0000, 0x1_A000));
        assert!(region.contains(0x1C01_8000, 0x110));
        assert!(!region.contains(0x1C01_9F00, 0x200));
        assert!(!region.contains(0x1BFF_FFFF, 4));
    }

    #[test]
    fn test_scratch_region_end_does_not_wrap() {
        let region = ScratchRegion {
            address: 0xFFFF_F000,
            size: 0x1000,
        };
        assert_eq!(region.end(), 0x1_0000_0000);
        assert!(region.contains(0xFFFF_FFFC, 4));
    }
}
