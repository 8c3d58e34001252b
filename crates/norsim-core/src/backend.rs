//! Host service traits
//!
//! The model talks to its host exclusively through these three seams:
//! byte-addressable backing storage for the array contents, a timed
//! event service for busy completion, and pin-style signal sinks for
//! the busy outputs. Hosts resolve the implementations once, before
//! the first access.

use crate::error::Result;

/// Byte-addressable backing store holding the flash array image.
pub trait Storage {
    /// Read `buf.len()` bytes starting at `offset`.
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `data` starting at `offset`.
    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    /// Fill `len` bytes starting at `offset` with `value`.
    ///
    /// The default implementation loops over bounded `write` calls;
    /// implementations with a cheaper memset should override it.
    fn fill(&mut self, offset: u64, len: u64, value: u8) -> Result<()> {
        let chunk = [value; 4096];
        let mut at = offset;
        let end = offset + len;
        while at < end {
            let n = ((end - at) as usize).min(chunk.len());
            self.write(at, &chunk[..n])?;
            at += n as u64;
        }
        Ok(())
    }
}

/// Timed event service driving busy completion.
///
/// Events are identified by the chip index they carry; the host calls
/// [`FlashDevice::complete_operation`] with that index when an event
/// expires. Cancelling an index with no armed event is a no-op.
///
/// [`FlashDevice::complete_operation`]: crate::device::FlashDevice::complete_operation
pub trait BusyClock {
    /// Arm a completion event `delay` seconds of simulated time ahead.
    fn post(&mut self, delay: f64, chip: usize);

    /// Cancel the pending event for `chip`, if any.
    fn cancel(&mut self, chip: usize);
}

/// Pin-style output sink (busy signal).
pub trait Signal {
    /// Drive the pin high.
    fn raise(&mut self);

    /// Drive the pin low.
    fn lower(&mut self);
}
