//! Address/bus translation
//!
//! Splits a flash-relative access into one sub-operation per addressed
//! chip. Interleaved chips each contribute `chip_bytes` to every bus
//! line, so consecutive chip-width chunks of an access round-robin over
//! the chips while the chip-local offset advances once per full bus
//! line:
//!
//! ```text
//! flash addr:   0    w   2w   3w   4w  ...   (w = chip width)
//! chip:         0    1    2    3    0  ...   (interleave 4, x8 chips)
//! chip offset:  0    0    0    0    w  ...
//! ```
//!
//! Command addresses are what the unlock-sequence logic on real
//! hardware decodes: the chip-local offset divided by the maximum chip
//! width, with the decoder masking down to its significant low bits.

use crate::config::Geometry;

/// One chip-width sub-operation of a bus access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubAccess {
    /// Which interleaved chip the chunk addresses
    pub chip: usize,
    /// Chip-local byte offset of the chunk
    pub offset: u64,
    /// Command address as seen by the chip's decoder
    pub cmd_addr: u64,
    /// Bus-aligned flash address of the bus line the chunk sits on
    pub report_addr: u64,
    /// Byte position of the chunk within the caller's buffer
    pub pos: usize,
}

/// Iterate the chip-width chunks of an aligned access.
///
/// `addr` and `len` must be multiples of the chip width; unaligned
/// accesses are padded to this form at the device entry points.
pub fn split(geo: &Geometry, addr: u64, len: usize) -> impl Iterator<Item = SubAccess> + '_ {
    debug_assert_eq!(addr % geo.chip_bytes, 0);
    debug_assert_eq!(len as u64 % geo.chip_bytes, 0);

    let chips = geo.chips() as u64;
    (addr..addr + len as u64)
        .step_by(geo.chip_bytes as usize)
        .map(move |a| {
            let offset = a >> geo.interleave_bits;
            SubAccess {
                chip: ((a % geo.bus_bytes) / geo.chip_bytes % chips) as usize,
                offset,
                cmd_addr: offset / geo.max_chip_bytes,
                report_addr: a & !(geo.bus_bytes - 1),
                pos: (a - addr) as usize,
            }
        })
}

/// Flash address of a chip-local chunk (inverse of the mapping above).
///
/// Chunk offsets carry a fixed per-chip skew when the chips are wider
/// than the interleave step: chip `c`'s chunk on bus line `L` sits at
/// chip-local offset `L*w + ((c*w) >> interleave_bits)`. The inverse
/// removes the skew before recovering the bus line.
pub fn flash_addr(geo: &Geometry, chip: usize, offset: u64) -> u64 {
    let lane = chip as u64 * geo.chip_bytes;
    let skew = lane >> geo.interleave_bits;
    (offset - skew) / geo.chip_bytes * geo.bus_bytes + lane
}

/// Extract the chip-width value at `pos`, honoring the endian setting.
///
/// The byte swap covers the chip-width chunk only, never the whole
/// transaction.
pub fn chunk_value(data: &[u8], pos: usize, chip_bytes: u64, big_endian: bool) -> u64 {
    let chunk = &data[pos..pos + chip_bytes as usize];
    let mut value = 0u64;
    if big_endian {
        for &b in chunk {
            value = (value << 8) | u64::from(b);
        }
    } else {
        for &b in chunk.iter().rev() {
            value = (value << 8) | u64::from(b);
        }
    }
    value
}

/// Store a chip-width value at `pos`, honoring the endian setting.
pub fn put_chunk_value(buf: &mut [u8], pos: usize, chip_bytes: u64, big_endian: bool, value: u64) {
    let chunk = &mut buf[pos..pos + chip_bytes as usize];
    let n = chunk.len();
    for (i, b) in chunk.iter_mut().enumerate() {
        let shift = if big_endian { n - 1 - i } else { i } * 8;
        *b = (value >> shift) as u8;
    }
}

/// Round down to a chip-width boundary.
pub fn align_down(addr: u64, width: u64) -> u64 {
    addr & !(width - 1)
}

/// Round up to a chip-width boundary.
pub fn align_up(addr: u64, width: u64) -> u64 {
    (addr + width - 1) & !(width - 1)
}
