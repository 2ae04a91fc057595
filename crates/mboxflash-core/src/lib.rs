//! mboxflash-core - NOR flash programming through a target-resident loader
//!
//! The host never touches the flash controller of the target. Instead it
//! uploads a small loader program into target RAM, starts it, and talks to
//! it through a shared-memory mailbox (command, address, size, status and a
//! fixed-size data window) using nothing but debug memory reads and writes.
//!
//! # Layers
//!
//! - [`target::DebugTarget`] - the debug-access primitives consumed by the
//!   driver (halt, resume, memory access, scratch RAM allocation)
//! - [`mailbox`] - the bit-exact mailbox memory map and command codes
//! - [`session`] - one loader run: upload, command cycles, teardown
//! - [`driver`] - the [`driver::FlashDriver`] operations built on sessions
//!
//! # Features
//!
//! - `std` - Enable standard library support (TOML configuration,
//!   `std::error::Error`, wall clock)
//! - `is_sync` - Compile the `maybe_async` traits as blocking code
//!
//! # Example
//!
//! ```ignore
//! use mboxflash_core::driver::{FlashDriver, LoaderFlash};
//!
//! fn dump<D: FlashDriver>(driver: &mut D) -> mboxflash_core::Result<()> {
//!     driver.probe()?;
//!     println!("Found: {}", driver.describe());
//!     let mut buf = vec![0u8; 1024];
//!     driver.read(&mut buf, 0)
//! }
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
// Allow async fn in traits - we use maybe-async for dual sync/async support
#![allow(async_fn_in_trait)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod clock;
#[cfg(feature = "std")]
pub mod config;
pub mod device;
pub mod driver;
pub mod error;
pub mod geometry;
pub mod loader;
pub mod mailbox;
pub mod session;
pub mod target;

pub use error::{Error, Result};
