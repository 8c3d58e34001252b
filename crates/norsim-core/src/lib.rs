//! norsim-core - NOR flash command-set emulation
//!
//! This crate models memory-mapped NOR flash at the command-set level:
//! the AMD/Fujitsu unlock-sequence protocol and the Intel/Sharp
//! single-byte protocol, over a bank of up to eight interleaved chips
//! sharing one bus. Array contents live behind the [`backend::Storage`]
//! trait; timed operations are delivered through [`backend::BusyClock`]
//! so the host environment owns the clock.
//!
//! # Example
//!
//! ```ignore
//! use norsim_core::{FlashConfig, FlashDevice};
//!
//! fn build(storage: Box<dyn norsim_core::Storage>) -> FlashDevice {
//!     let cfg = FlashConfig {
//!         interleave: 2,
//!         bus_width: 16,
//!         unit_size: vec![0x1_0000; 8],
//!         command_set: Some(2),
//!         ..Default::default()
//!     };
//!     FlashDevice::new("flash0", cfg, storage).unwrap()
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod amd;
mod busy;
mod intel;
mod optimize;

pub mod backend;
pub mod bus;
pub mod cfi;
pub mod chip;
pub mod config;
pub mod device;
pub mod error;
pub mod logging;
pub mod mode;

pub use backend::{BusyClock, Signal, Storage};
pub use config::{FlashConfig, Geometry, Vendor};
pub use device::{DeviceState, FlashDevice};
pub use error::{ConfigError, Error, Result};
pub use logging::LogGroups;
pub use mode::Mode;
