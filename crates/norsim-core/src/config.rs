//! Device configuration
//!
//! `FlashConfig` is the user-facing description of a flash device (the
//! serde derive makes it loadable from RON/TOML description files).
//! Validation happens once, when the device is constructed; the widths
//! and the interleave are immutable afterwards. The derived `Geometry`
//! holds the byte-unit quantities the rest of the engine works with.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cfi;
use crate::error::ConfigError;

/// Which command-set family the device decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    /// Intel-style single-byte commands (command set ids 1 and 3)
    Intel,
    /// AMD/Fujitsu-style unlock sequences (command set ids 2 and 4)
    Amd,
}

impl Vendor {
    /// Map a CFI primary command-set id to a vendor family.
    pub fn from_command_set(id: u8) -> Result<Vendor, ConfigError> {
        match id {
            1 | 3 => Ok(Vendor::Intel),
            2 | 4 => Ok(Vendor::Amd),
            other => Err(ConfigError::InvalidCommandSet(other)),
        }
    }
}

/// Intel lock model selector.
pub mod intel_lock {
    /// Locking commands disabled
    pub const NONE: u8 = 0;
    /// Simple model: lock one block / unlock all
    pub const SIMPLE: u8 = 1;
    /// Advanced model: per-block lock, unlock and lock-down with WP# interplay
    pub const ADVANCED: u8 = 2;
}

/// User-facing flash device description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashConfig {
    /// Number of interleaved chips (1, 2, 4 or 8)
    pub interleave: u32,
    /// Bus width in bits (8, 16, 32 or 64)
    pub bus_width: u32,
    /// Widest bus the chip could sit on, in bits; defaults to the chip width.
    /// Command addresses are derived from this width.
    pub max_chip_width: Option<u32>,
    /// Per-chip erase unit sizes in bytes, in address order
    pub unit_size: Vec<u64>,
    /// CFI primary command-set id (1-4); derived from the CFI table when unset
    pub command_set: Option<u8>,
    /// CFI query table, mapped at query addresses 0x10 and up
    pub cfi_query: Option<Vec<u8>>,
    /// Device identifier bytes, indexed by autoselect addresses 0x01/0x0E/0x0F
    pub device_id: Vec<u8>,
    /// Manufacturer identifier byte
    pub manufacturer_id: u8,
    /// Reverse byte order within each chip-width chunk
    pub big_endian: bool,
    /// Treat protocol violations as fatal to the chip (mode goes to `unknown`)
    pub strict_cmd_set: bool,
    /// Accept AMD command bytes at any command address
    pub amd_ignore_cmd_address: bool,
    /// Maximum write-buffer payload per chip, in bytes
    pub write_buffer_len: usize,
    /// Intel lock model (see [`intel_lock`])
    pub intel_lock: u8,
    /// Enable the Intel chip-erase command (0x20 0x20)
    pub intel_chip_erase: bool,
    /// Enable the Intel write-to-buffer command (0xE8)
    pub intel_write_buffer: bool,
    /// Accept the Intel protection-program command (0xC0); still unimplemented
    pub intel_protection_program: bool,
    /// Accept the Intel configuration command (0xB8); still unimplemented
    pub intel_configuration: bool,
    /// Delay in seconds per timed operation, keyed by state name.
    /// Zero or absent entries complete synchronously.
    pub timing_model: HashMap<String, f64>,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            interleave: 1,
            bus_width: 8,
            max_chip_width: None,
            unit_size: Vec::new(),
            command_set: None,
            cfi_query: None,
            device_id: Vec::new(),
            manufacturer_id: 0,
            big_endian: false,
            strict_cmd_set: false,
            amd_ignore_cmd_address: false,
            write_buffer_len: 64,
            intel_lock: intel_lock::NONE,
            intel_chip_erase: false,
            intel_write_buffer: false,
            intel_protection_program: false,
            intel_configuration: false,
            timing_model: HashMap::new(),
        }
    }
}

/// Validated, byte-unit view of the configured widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// log2 of the chip count
    pub interleave_bits: u32,
    /// Bus width in bytes
    pub bus_bytes: u64,
    /// Chip width in bytes
    pub chip_bytes: u64,
    /// Maximum chip width in bytes (command address divisor)
    pub max_chip_bytes: u64,
    /// Per-chip size in bytes (sum of the unit sizes)
    pub chip_size: u64,
    /// Total device size in bytes
    pub device_size: u64,
}

impl Geometry {
    /// Number of interleaved chips.
    pub fn chips(&self) -> usize {
        1usize << self.interleave_bits
    }
}

impl FlashConfig {
    /// Validate the description and derive the working geometry and
    /// vendor. Called once at device construction; any failure leaves
    /// the device unconstructed.
    pub fn validate(&self) -> Result<(Geometry, Vendor), ConfigError> {
        if !matches!(self.interleave, 1 | 2 | 4 | 8) {
            return Err(ConfigError::InvalidInterleave(self.interleave));
        }
        let interleave_bits = self.interleave.trailing_zeros();

        if !matches!(self.bus_width, 8 | 16 | 32 | 64) {
            return Err(ConfigError::InvalidBusWidth(self.bus_width));
        }
        let chip_width = self.bus_width / self.interleave;
        if chip_width * self.interleave != self.bus_width || chip_width % 8 != 0 {
            return Err(ConfigError::WidthMismatch {
                bus: self.bus_width,
                interleave: self.interleave,
            });
        }

        let max_chip_width = self.max_chip_width.unwrap_or(chip_width);
        if max_chip_width < chip_width {
            return Err(ConfigError::MaxChipWidthTooSmall {
                max: max_chip_width,
                chip: chip_width,
            });
        }

        let chip_bytes = u64::from(chip_width / 8);
        if self.unit_size.is_empty() {
            return Err(ConfigError::InvalidUnitSize("no units configured".into()));
        }
        for (i, &size) in self.unit_size.iter().enumerate() {
            if size == 0 || size % chip_bytes != 0 {
                return Err(ConfigError::InvalidUnitSize(format!(
                    "unit {} has size {:#x}, not a positive multiple of the chip width",
                    i, size
                )));
            }
        }
        let chip_size: u64 = self.unit_size.iter().sum();

        if self.write_buffer_len == 0 || self.write_buffer_len as u64 % chip_bytes != 0 {
            return Err(ConfigError::InvalidWriteBufferLen(self.write_buffer_len));
        }
        if self.intel_lock > intel_lock::ADVANCED {
            return Err(ConfigError::InvalidLockMode(self.intel_lock));
        }

        // Command set comes from the explicit attribute or the CFI table.
        let cfi_command_set = match &self.cfi_query {
            Some(table) => cfi::validate(table, chip_size)?,
            None => None,
        };
        let command_set = self
            .command_set
            .or(cfi_command_set)
            .ok_or(ConfigError::NoCommandSet)?;
        let vendor = Vendor::from_command_set(command_set)?;

        let geometry = Geometry {
            interleave_bits,
            bus_bytes: u64::from(self.bus_width / 8),
            chip_bytes,
            max_chip_bytes: u64::from(max_chip_width / 8),
            chip_size,
            device_size: chip_size << interleave_bits,
        };
        Ok((geometry, vendor))
    }

    /// Timing-model delay for an operation key; zero when unset.
    pub fn delay_for(&self, key: &str) -> f64 {
        self.timing_model.get(key).copied().unwrap_or(0.0)
    }
}
