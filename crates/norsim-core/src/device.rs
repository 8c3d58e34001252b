//! The flash device aggregate
//!
//! `FlashDevice` owns the chips, the validated geometry and the host
//! service handles, and is the single entry point for bus accesses.
//! Dispatch is synchronous: every access is decoded to completion
//! before control returns; the only asynchrony is the busy-completion
//! callback delivered by the host clock.

use serde::{Deserialize, Serialize};

use crate::backend::{BusyClock, Signal, Storage};
use crate::bus;
use crate::chip::Chip;
use crate::config::{FlashConfig, Geometry, Vendor};
use crate::error::{ConfigError, Error, Result};
use crate::logging::LogGroups;
use crate::mode::Mode;
use crate::optimize::OptimizationContext;
use crate::{amd, busy, intel};

/// A memory-mapped, interleaved NOR flash device.
pub struct FlashDevice {
    pub(crate) name: String,
    pub(crate) cfg: FlashConfig,
    pub(crate) geo: Geometry,
    pub(crate) vendor: Vendor,
    pub(crate) chips: Vec<Chip>,
    pub(crate) storage: Box<dyn Storage>,
    pub(crate) clock: Option<Box<dyn BusyClock>>,
    pub(crate) wp: bool,
}

impl FlashDevice {
    /// Validate `cfg` and construct the device over `storage`.
    ///
    /// The interleave and widths are fixed from here on. A validation
    /// failure is fatal to this device instance only.
    pub fn new(
        name: impl Into<String>,
        cfg: FlashConfig,
        storage: Box<dyn Storage>,
    ) -> core::result::Result<Self, ConfigError> {
        let name = name.into();
        let (geo, vendor) = cfg.validate().inspect_err(|e| {
            log::error!(target: "norsim", "{}: configuration rejected: {}", name, e);
        })?;
        let chips = (0..geo.chips())
            .map(|i| Chip::new(i, &cfg.unit_size))
            .collect();
        Ok(Self {
            name,
            cfg,
            geo,
            vendor,
            chips,
            storage,
            clock: None,
            wp: false,
        })
    }

    /// Attach the host's timed-event service.
    pub fn attach_clock(&mut self, clock: Box<dyn BusyClock>) {
        self.clock = Some(clock);
    }

    /// Connect a chip's busy output pin.
    pub fn connect_busy_signal(&mut self, chip: usize, signal: Box<dyn Signal>) {
        self.chips[chip].busy_signal = Some(signal);
    }

    /// Device name used in log messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Validated geometry.
    pub fn geometry(&self) -> &Geometry {
        &self.geo
    }

    /// Command-set family the device decodes.
    pub fn vendor(&self) -> Vendor {
        self.vendor
    }

    /// Read-only view of one chip.
    pub fn chip(&self, index: usize) -> &Chip {
        &self.chips[index]
    }

    /// State of the write-protect input pin.
    pub fn wp(&self) -> bool {
        self.wp
    }

    /// Drive the write-protect input pin.
    pub fn set_wp(&mut self, asserted: bool) {
        self.wp = asserted;
    }

    /// Hard reset: every chip returns to read-array mode, in-flight
    /// write buffers and busy waits are dropped, protection bits return
    /// to their defaults.
    pub fn reset(&mut self) {
        for i in 0..self.chips.len() {
            busy::cancel_event(self, i);
            if self.chips[i].mode.is_busy() {
                if let Some(signal) = self.chips[i].busy_signal.as_mut() {
                    signal.lower();
                }
            }
            self.chips[i].reset();
        }
        self.log_info(0, LogGroups::STATE, format_args!("device reset"));
    }

    /// Busy-completion callback from the host clock.
    ///
    /// Idempotent: completing a chip that is not busy is a no-op.
    pub fn complete_operation(&mut self, chip: usize) {
        let Some(mut next) = self.chips[chip].mode.busy_return() else {
            return;
        };
        // Intel chips report through the status register after a
        // completed operation; 0xFF returns them to array reads.
        if self.vendor == Vendor::Intel && next == Mode::ReadArray {
            next = Mode::IntelReadStatus;
        }
        self.chips[chip].event_armed = false;
        if let Some(signal) = self.chips[chip].busy_signal.as_mut() {
            signal.lower();
        }
        self.set_mode(chip, next);
    }

    /// Handle a bus write.
    pub fn write(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.check_bounds(addr, data.len())?;

        let w = self.geo.chip_bytes;
        if addr % w != 0 || data.len() as u64 % w != 0 {
            return self.write_padded(addr, data);
        }

        let mut opt = OptimizationContext::analyze(self, addr, data);
        let geo = self.geo;
        let big_endian = self.cfg.big_endian;
        for sub in bus::split(&geo, addr, data.len()) {
            let value = bus::chunk_value(data, sub.pos, geo.chip_bytes, big_endian);
            match self.vendor {
                Vendor::Amd => amd::write(self, &mut opt, sub, value, data)?,
                Vendor::Intel => intel::write(self, &mut opt, sub, value, data)?,
            }
        }
        Ok(())
    }

    /// Handle a bus read.
    ///
    /// Takes `&mut self` because status-polling reads mutate latched
    /// status bytes (AMD toggle bits, the Intel chip-erase one-shot).
    pub fn read(&mut self, addr: u64, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        self.check_bounds(addr, buf.len())?;

        // Fast fall-through: with every chip reading the array the
        // access needs no decoding at all.
        if self.chips.iter().all(|c| c.mode == Mode::ReadArray) {
            return self.storage.read(addr, buf);
        }

        let w = self.geo.chip_bytes;
        if addr % w != 0 || buf.len() as u64 % w != 0 {
            return self.read_padded(addr, buf);
        }

        let geo = self.geo;
        let big_endian = self.cfg.big_endian;
        for sub in bus::split(&geo, addr, buf.len()) {
            let handled = match self.vendor {
                Vendor::Amd => amd::read(self, sub),
                Vendor::Intel => intel::read(self, sub),
            };
            let w = geo.chip_bytes as usize;
            match handled {
                Some(value) => bus::put_chunk_value(buf, sub.pos, geo.chip_bytes, big_endian, value),
                None => self
                    .storage
                    .read(addr + sub.pos as u64, &mut buf[sub.pos..sub.pos + w])?,
            }
        }
        Ok(())
    }

    /// Re-align an unaligned write onto the chip-width grid.
    ///
    /// Command addresses are only meaningful for chip-aligned offsets,
    /// so the access is widened to the minimal aligned superset. The
    /// padding is the current array content: for programs the AND
    /// semantics make it a no-op, and command interpretation of real
    /// unaligned command writes is undefined on hardware too.
    fn write_padded(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        let w = self.geo.chip_bytes;
        let start = bus::align_down(addr, w);
        let end = bus::align_up(addr + data.len() as u64, w);
        let mut scratch = vec![0u8; (end - start) as usize];
        self.storage.read(start, &mut scratch)?;
        let interior = (addr - start) as usize;
        scratch[interior..interior + data.len()].copy_from_slice(data);
        self.write(start, &scratch)
    }

    /// Re-align an unaligned read; see [`Self::write_padded`].
    fn read_padded(&mut self, addr: u64, buf: &mut [u8]) -> Result<()> {
        let w = self.geo.chip_bytes;
        let start = bus::align_down(addr, w);
        let end = bus::align_up(addr + buf.len() as u64, w);
        let mut scratch = vec![0u8; (end - start) as usize];
        self.read(start, &mut scratch)?;
        let interior = (addr - start) as usize;
        buf.copy_from_slice(&scratch[interior..interior + buf.len()]);
        Ok(())
    }

    fn check_bounds(&self, addr: u64, len: usize) -> Result<()> {
        match addr.checked_add(len as u64) {
            Some(end) if end <= self.geo.device_size => Ok(()),
            _ => {
                self.log_error(
                    LogGroups::OTHER,
                    format_args!("access {:#x}+{:#x} beyond device end", addr, len),
                );
                Err(Error::AddressOutOfBounds)
            }
        }
    }

    // ---------------------------------------------------------------
    // Protection
    // ---------------------------------------------------------------

    /// Whether writes to a unit are blocked by protection bits, lock
    /// state or the WP# pin.
    pub(crate) fn unit_blocked(&self, chip: usize, unit: usize) -> bool {
        let u = &self.chips[chip].units[unit];
        let mut blocked = !u.dyb || !u.ppb || self.wp;
        if self.vendor == Vendor::Intel {
            blocked |= u.lock_status & 1 != 0;
        }
        blocked
    }

    /// Whether every chip accepts writes to the given unit index.
    /// Gates the merged bulk paths of the optimizer.
    pub(crate) fn unit_unblocked_everywhere(&self, unit: usize) -> bool {
        (0..self.chips.len()).all(|c| !self.unit_blocked(c, unit))
    }

    // ---------------------------------------------------------------
    // Logging
    // ---------------------------------------------------------------

    pub(crate) fn log_info(&self, chip: usize, groups: LogGroups, args: core::fmt::Arguments<'_>) {
        log::info!(target: "norsim", "{}.chip{} [{}] {}", self.name, chip, groups, args);
    }

    pub(crate) fn log_spec_violation(
        &self,
        chip: usize,
        groups: LogGroups,
        args: core::fmt::Arguments<'_>,
    ) {
        log::warn!(
            target: "norsim",
            "{}.chip{} [{}] spec violation: {}",
            self.name, chip, groups, args
        );
    }

    pub(crate) fn log_unimplemented(
        &self,
        chip: usize,
        groups: LogGroups,
        args: core::fmt::Arguments<'_>,
    ) {
        log::warn!(
            target: "norsim",
            "{}.chip{} [{}] unimplemented: {}",
            self.name, chip, groups, args
        );
    }

    pub(crate) fn log_error(&self, groups: LogGroups, args: core::fmt::Arguments<'_>) {
        log::error!(target: "norsim", "{} [{}] {}", self.name, groups, args);
    }

    /// Log a protocol violation and apply the strictness policy: under
    /// `strict_cmd_set` the chip falls to `unknown` and stays there
    /// until a reset-class command; otherwise the mode is unchanged.
    pub(crate) fn protocol_violation(
        &mut self,
        chip: usize,
        groups: LogGroups,
        args: core::fmt::Arguments<'_>,
    ) {
        self.log_spec_violation(chip, groups, args);
        if self.cfg.strict_cmd_set {
            self.set_mode(chip, Mode::Unknown);
        }
    }

    pub(crate) fn set_mode(&mut self, chip: usize, mode: Mode) {
        let old = self.chips[chip].mode;
        if old != mode {
            log::debug!(
                target: "norsim",
                "{}.chip{} [state] {} -> {}",
                self.name, chip, old, mode
            );
            self.chips[chip].mode = mode;
        }
    }

    // ---------------------------------------------------------------
    // Checkpointing
    // ---------------------------------------------------------------

    /// Snapshot the checkpoint-visible device state.
    pub fn save_state(&self) -> DeviceState {
        DeviceState {
            chip_mode: self.chips.iter().map(|c| c.mode).collect(),
            lock_status: self
                .chips
                .iter()
                .map(|c| c.units.iter().map(|u| u.lock_status).collect())
                .collect(),
            ppb_bits: self
                .chips
                .iter()
                .map(|c| c.units.iter().map(|u| u.ppb).collect())
                .collect(),
            dyb_bits: self
                .chips
                .iter()
                .map(|c| c.units.iter().map(|u| u.dyb).collect())
                .collect(),
            unit_status: self
                .chips
                .iter()
                .map(|c| c.units.iter().map(|u| u.status).collect())
                .collect(),
            lock_register: self.chips.iter().map(|c| c.lock_register).collect(),
            ppb_lock: self.chips.iter().map(|c| c.ppb_lock).collect(),
            wp: self.wp,
        }
    }

    /// Restore a previously saved snapshot.
    pub fn restore_state(&mut self, state: &DeviceState) -> core::result::Result<(), ConfigError> {
        let chips = self.chips.len();
        let units = self.cfg.unit_size.len();
        if state.chip_mode.len() != chips {
            return Err(ConfigError::InvalidState(format!(
                "chip_mode has {} entries, device has {} chips",
                state.chip_mode.len(),
                chips
            )));
        }
        for &mode in &state.chip_mode {
            let foreign = match self.vendor {
                Vendor::Amd => mode.is_intel(),
                Vendor::Intel => mode.is_amd(),
            };
            if foreign {
                return Err(ConfigError::InvalidState(format!(
                    "mode {} does not belong to the configured command set",
                    mode
                )));
            }
        }
        for matrix_len in [
            state.lock_status.len(),
            state.ppb_bits.len(),
            state.dyb_bits.len(),
            state.unit_status.len(),
        ] {
            if matrix_len != chips {
                return Err(ConfigError::InvalidState(
                    "per-unit matrix has wrong chip count".into(),
                ));
            }
        }
        if state.lock_register.len() != chips || state.ppb_lock.len() != chips {
            return Err(ConfigError::InvalidState(
                "per-chip vector has wrong chip count".into(),
            ));
        }
        for c in 0..chips {
            for row in [
                state.lock_status[c].len(),
                state.ppb_bits[c].len(),
                state.dyb_bits[c].len(),
                state.unit_status[c].len(),
            ] {
                if row != units {
                    return Err(ConfigError::InvalidState(format!(
                        "chip {} matrix row has wrong unit count",
                        c
                    )));
                }
            }
        }

        for c in 0..chips {
            let chip = &mut self.chips[c];
            chip.mode = state.chip_mode[c];
            chip.lock_register = state.lock_register[c];
            chip.ppb_lock = state.ppb_lock[c];
            chip.write_buffer = None;
            for (u, unit) in chip.units.iter_mut().enumerate() {
                unit.lock_status = state.lock_status[c][u];
                unit.ppb = state.ppb_bits[c][u];
                unit.dyb = state.dyb_bits[c][u];
                unit.status = state.unit_status[c][u];
            }
        }
        self.wp = state.wp;
        Ok(())
    }
}

impl core::fmt::Debug for FlashDevice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FlashDevice")
            .field("name", &self.name)
            .field("vendor", &self.vendor)
            .field("geometry", &self.geo)
            .field("chips", &self.chips)
            .finish()
    }
}

/// Checkpoint-visible device state.
///
/// Chip modes serialize as their state-name strings; restoring accepts
/// the historical aliases as well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    /// Per-chip decoder mode, by state name
    pub chip_mode: Vec<Mode>,
    /// Per-chip, per-unit Intel lock code
    pub lock_status: Vec<Vec<u8>>,
    /// Per-chip, per-unit PPB bit (true = unprotected)
    pub ppb_bits: Vec<Vec<bool>>,
    /// Per-chip, per-unit DYB bit (true = unprotected)
    pub dyb_bits: Vec<Vec<bool>>,
    /// Per-chip, per-unit latched status byte
    pub unit_status: Vec<Vec<u8>>,
    /// Per-chip AMD lock register
    pub lock_register: Vec<u16>,
    /// Per-chip AMD PPB lock bit
    pub ppb_lock: Vec<bool>,
    /// Write-protect pin state
    pub wp: bool,
}
