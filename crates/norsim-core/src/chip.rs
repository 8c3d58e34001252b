//! Per-chip and per-unit state
//!
//! A device is built from `2^interleave_bits` identical chips; each chip
//! is partitioned into erase units. Unit boundaries are chip-local byte
//! offsets and cover the chip contiguously and exhaustively.

use crate::backend::Signal;
use crate::mode::Mode;

/// Intel status register: device ready
pub const SR_READY: u8 = 0x80;
/// Intel status register: erase error
pub const SR_ERASE_ERROR: u8 = 0x20;
/// Intel status register: program error
pub const SR_PROGRAM_ERROR: u8 = 0x10;
/// Intel status register: block locked during operation
pub const SR_LOCKED: u8 = 0x02;

/// AMD data polling: toggle bit DQ6
pub const DQ6: u8 = 0x40;
/// AMD data polling: erase toggle bit DQ2
pub const DQ2: u8 = 0x04;

/// One erase unit (sector) within a chip.
#[derive(Debug, Clone)]
pub struct Unit {
    /// Chip-local byte offset of the first byte of the unit
    pub start: u64,
    /// Unit length in bytes
    pub size: u64,
    /// Latched status byte returned by status-polling reads
    pub status: u8,
    /// Intel lock code: bit 0 = locked, bit 1 = lock-down
    pub lock_status: u8,
    /// Intel advanced locking: lock-down latched while WP# was asserted
    pub hardware_lock: bool,
    /// AMD persistent protection bit; true = unprotected
    pub ppb: bool,
    /// AMD dynamic protection bit; true = unprotected
    pub dyb: bool,
}

impl Unit {
    fn new(start: u64, size: u64) -> Self {
        Self {
            start,
            size,
            status: SR_READY,
            lock_status: 0,
            hardware_lock: false,
            ppb: true,
            dyb: true,
        }
    }

    /// Exclusive end offset of the unit.
    pub fn end(&self) -> u64 {
        self.start + self.size
    }

    /// Reset to power-on defaults.
    pub fn reset(&mut self) {
        self.status = SR_READY;
        self.lock_status = 0;
        self.hardware_lock = false;
        self.ppb = true;
        self.dyb = true;
    }
}

/// In-flight write-buffer command state.
///
/// Owned by the chip and dropped on completion or abort; valid only
/// while the chip mode is one of the write-buffer gather states.
#[derive(Debug, Clone, Default)]
pub struct WriteBuffer {
    /// Chip-local byte offset the gathered data will be programmed at
    pub start: u64,
    /// Total number of data bytes announced by the count word
    pub expected: usize,
    /// Bytes gathered so far, in arrival order
    pub data: Vec<u8>,
}

/// One physical flash chip.
pub struct Chip {
    /// Position on the bus, in [0, 2^interleave_bits)
    pub index: usize,
    /// Current decoder state
    pub mode: Mode,
    /// Erase units, ordered by start offset
    pub units: Vec<Unit>,
    /// In-flight write-buffer command, if any
    pub write_buffer: Option<WriteBuffer>,
    /// AMD 16-bit lock register, programmed by AND
    pub lock_register: u16,
    /// AMD PPB lock bit; false freezes all PPB bits until reset
    pub ppb_lock: bool,
    /// Busy output pin, if connected
    pub busy_signal: Option<Box<dyn Signal>>,
    /// A completion event is armed on the host clock
    pub event_armed: bool,
}

impl Chip {
    /// Build a chip from the configured unit size list.
    pub fn new(index: usize, unit_sizes: &[u64]) -> Self {
        let mut units = Vec::with_capacity(unit_sizes.len());
        let mut start = 0u64;
        for &size in unit_sizes {
            units.push(Unit::new(start, size));
            start += size;
        }
        Self {
            index,
            mode: Mode::ReadArray,
            units,
            write_buffer: None,
            lock_register: 0xFFFF,
            ppb_lock: true,
            busy_signal: None,
            event_armed: false,
        }
    }

    /// Total chip size in bytes.
    pub fn size(&self) -> u64 {
        self.units.last().map(Unit::end).unwrap_or(0)
    }

    /// Index of the unit containing the chip-local byte offset.
    ///
    /// Callers guarantee `offset < self.size()`; offsets are bounds
    /// checked at the device entry points.
    pub fn unit_index_at(&self, offset: u64) -> usize {
        debug_assert!(offset < self.size());
        self.units.partition_point(|u| u.end() <= offset)
    }

    /// Unit containing the chip-local byte offset.
    pub fn unit_at(&self, offset: u64) -> &Unit {
        &self.units[self.unit_index_at(offset)]
    }

    /// Reset the chip to power-on state. The PPB lock bit and the lock
    /// register are volatile and return to their defaults as well.
    pub fn reset(&mut self) {
        self.mode = Mode::ReadArray;
        self.write_buffer = None;
        self.lock_register = 0xFFFF;
        self.ppb_lock = true;
        self.event_armed = false;
        for unit in &mut self.units {
            unit.reset();
        }
    }
}

impl core::fmt::Debug for Chip {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Chip")
            .field("index", &self.index)
            .field("mode", &self.mode)
            .field("units", &self.units.len())
            .field("write_buffer", &self.write_buffer.is_some())
            .field("event_armed", &self.event_armed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn units_partition_the_chip() {
        let chip = Chip::new(0, &[0x1000, 0x1000, 0x800]);
        assert_eq!(chip.size(), 0x2800);
        assert_eq!(chip.unit_index_at(0), 0);
        assert_eq!(chip.unit_index_at(0xFFF), 0);
        assert_eq!(chip.unit_index_at(0x1000), 1);
        assert_eq!(chip.unit_index_at(0x27FF), 2);
    }

    #[test]
    fn reset_restores_protection_defaults() {
        let mut chip = Chip::new(0, &[0x1000]);
        chip.units[0].dyb = false;
        chip.units[0].ppb = false;
        chip.units[0].lock_status = 3;
        chip.ppb_lock = false;
        chip.mode = Mode::Unknown;
        chip.write_buffer = Some(WriteBuffer::default());

        chip.reset();
        assert_eq!(chip.mode, Mode::ReadArray);
        assert!(chip.write_buffer.is_none());
        assert!(chip.ppb_lock);
        assert!(chip.units[0].dyb);
        assert!(chip.units[0].ppb);
        assert_eq!(chip.units[0].lock_status, 0);
    }
}
