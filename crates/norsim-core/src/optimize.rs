//! Write/erase optimization
//!
//! Every top-level write gets one `OptimizationContext`. When all the
//! interleaved chips are in the same state and the access covers exactly
//! one aligned bus line, the memory side effect of the per-chip decoders
//! can be merged into a single bulk storage operation; the first chip to
//! act performs it and sets `done`, the remaining chips only update
//! their own state and flags. When the fast path is not eligible, each
//! chip issues its own storage operations at addresses strided by the
//! chip width within the interleave cycle.
//!
//! The context is scratch state: it is created at the start of an access
//! and never persisted, so nothing can leak between accesses.

use crate::bus;
use crate::device::FlashDevice;
use crate::error::Result;

/// Per-access optimization facts.
#[derive(Debug, Clone, Copy)]
pub struct OptimizationContext {
    /// Every chip is in the same mode
    pub same_state: bool,
    /// The access is exactly one bus line long
    pub bus_size: bool,
    /// The access starts on a bus-line boundary
    pub bus_aligned: bool,
    /// Every chip-width chunk of the payload is bit-identical
    pub same_value: bool,
    /// The single bulk operation has executed for this access
    pub done: bool,
}

impl OptimizationContext {
    /// Gather the facts for one write access.
    pub(crate) fn analyze(dev: &FlashDevice, addr: u64, data: &[u8]) -> Self {
        let geo = &dev.geo;
        let w = geo.chip_bytes as usize;
        let first = dev.chips[0].mode;
        let same_value = data
            .chunks_exact(w)
            .all(|chunk| chunk == &data[..w.min(data.len())]);
        Self {
            same_state: dev.chips.iter().all(|c| c.mode == first),
            bus_size: data.len() as u64 == geo.bus_bytes,
            bus_aligned: addr % geo.bus_bytes == 0,
            same_value,
            done: false,
        }
    }

    /// Eligibility for merging a write operation (value may differ per chip).
    fn write_fast_path(&self) -> bool {
        self.same_state && self.bus_size && self.bus_aligned
    }

    /// Eligibility for merging a trigger operation such as an erase.
    fn trigger_fast_path(&self) -> bool {
        self.write_fast_path() && self.same_value
    }
}

/// Program one chip-width chunk (bitwise AND into the array).
///
/// `data`/`pos` reference the caller's full payload; `bulk_ok` asserts
/// that the merged bus line would touch no protected lane, so the
/// decoders must only pass true when every chip's target unit accepts
/// the write.
pub(crate) fn program_chunk(
    dev: &mut FlashDevice,
    opt: &mut OptimizationContext,
    chip: usize,
    offset: u64,
    data: &[u8],
    pos: usize,
    bulk_ok: bool,
) -> Result<()> {
    let geo = dev.geo;
    if bulk_ok && opt.write_fast_path() {
        if !opt.done {
            opt.done = true;
            let base = bus::align_down(bus::flash_addr(&geo, chip, offset), geo.bus_bytes);
            let mut line = vec![0u8; geo.bus_bytes as usize];
            dev.storage.read(base, &mut line)?;
            for (have, want) in line.iter_mut().zip(data) {
                *have &= want;
            }
            dev.storage.write(base, &line)?;
        }
        return Ok(());
    }

    let w = geo.chip_bytes as usize;
    let addr = bus::flash_addr(&geo, chip, offset);
    let mut have = vec![0u8; w];
    dev.storage.read(addr, &mut have)?;
    for (have, want) in have.iter_mut().zip(&data[pos..pos + w]) {
        *have &= want;
    }
    dev.storage.write(addr, &have)
}

/// Program a gathered byte run for one chip (write-buffer flush).
///
/// Always strided; buffer contents are chip-private so there is nothing
/// to merge across chips.
pub(crate) fn program_chip_run(
    dev: &mut FlashDevice,
    chip: usize,
    start: u64,
    bytes: &[u8],
) -> Result<()> {
    let geo = dev.geo;
    let w = geo.chip_bytes as usize;
    for (i, chunk) in bytes.chunks(w).enumerate() {
        let addr = bus::flash_addr(&geo, chip, start + (i * w) as u64);
        let mut have = vec![0u8; chunk.len()];
        dev.storage.read(addr, &mut have)?;
        for (have, want) in have.iter_mut().zip(chunk) {
            *have &= want;
        }
        dev.storage.write(addr, &have)?;
    }
    Ok(())
}

/// Flush a gathered write buffer to storage, skipping protected units.
///
/// Returns true when protection dropped at least one chunk.
pub(crate) fn flush_write_buffer(
    dev: &mut FlashDevice,
    chip: usize,
    wb: &crate::chip::WriteBuffer,
) -> Result<bool> {
    let w = dev.geo.chip_bytes as usize;
    let mut blocked = false;
    for (i, chunk) in wb.data.chunks(w).enumerate() {
        let offset = wb.start + (i * w) as u64;
        let unit = dev.chips[chip].unit_index_at(offset);
        if dev.unit_blocked(chip, unit) {
            blocked = true;
            continue;
        }
        program_chip_run(dev, chip, offset, chunk)?;
    }
    Ok(blocked)
}

/// Fill a chip-local byte range with `value` (erase side effect).
pub(crate) fn fill_range(
    dev: &mut FlashDevice,
    opt: &mut OptimizationContext,
    chip: usize,
    start: u64,
    len: u64,
    value: u8,
    bulk_ok: bool,
) -> Result<()> {
    let geo = dev.geo;
    if bulk_ok && opt.trigger_fast_path() {
        if !opt.done {
            opt.done = true;
            dev.storage.fill(
                start << geo.interleave_bits,
                len << geo.interleave_bits,
                value,
            )?;
        }
        return Ok(());
    }

    if geo.interleave_bits == 0 {
        return dev.storage.fill(start, len, value);
    }
    // Straddled fill: one chip-width chunk per bus line. `start` and
    // `len` are plain chip-local byte quantities (unit bounds), so the
    // lines are derived directly rather than through `bus::flash_addr`,
    // which expects the skewed chunk offsets `bus::split` hands out.
    let lane = chip as u64 * geo.chip_bytes;
    for line in start / geo.chip_bytes..(start + len) / geo.chip_bytes {
        dev.storage
            .fill(line * geo.bus_bytes + lane, geo.chip_bytes, value)?;
    }
    Ok(())
}
