//! norsim-dummy - In-memory host backends for testing
//!
//! Provides trivial implementations of the norsim host traits: a
//! heap-backed storage that can be shared with the test for inspection,
//! a manually advanced clock, and a pin recorder. Useful for tests and
//! development without a real simulation environment.

use std::cell::RefCell;
use std::rc::Rc;

use norsim_core::error::{Error, Result};
use norsim_core::{BusyClock, Signal, Storage};

/// Heap-backed flash image, sharable between the device and the test.
///
/// Clones share the same buffer, so a test can keep one handle while
/// handing another to the device as its backing store. New images come
/// up erased (all 0xFF).
#[derive(Debug, Clone)]
pub struct SharedRam {
    data: Rc<RefCell<Vec<u8>>>,
}

impl SharedRam {
    /// Allocate an erased image of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            data: Rc::new(RefCell::new(vec![0xFF; size])),
        }
    }

    /// Image size in bytes.
    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    /// Whether the image is zero-sized.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read one byte.
    pub fn get(&self, offset: u64) -> u8 {
        self.data.borrow()[offset as usize]
    }

    /// Copy `data` into the image without going through the device.
    pub fn load(&self, offset: u64, data: &[u8]) {
        let offset = offset as usize;
        self.data.borrow_mut()[offset..offset + data.len()].copy_from_slice(data);
    }

    /// Copy a byte range out of the image.
    pub fn extract(&self, offset: u64, len: usize) -> Vec<u8> {
        let offset = offset as usize;
        self.data.borrow()[offset..offset + len].to_vec()
    }

    fn check(&self, offset: u64, len: usize) -> Result<()> {
        let end = offset as usize + len;
        if end > self.data.borrow().len() {
            log::error!("dummy storage access {:#x}+{:#x} out of range", offset, len);
            return Err(Error::StorageError);
        }
        Ok(())
    }
}

impl Storage for SharedRam {
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.check(offset, buf.len())?;
        let offset = offset as usize;
        buf.copy_from_slice(&self.data.borrow()[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.check(offset, data.len())?;
        let offset = offset as usize;
        self.data.borrow_mut()[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn fill(&mut self, offset: u64, len: u64, value: u8) -> Result<()> {
        self.check(offset, len as usize)?;
        let offset = offset as usize;
        self.data.borrow_mut()[offset..offset + len as usize].fill(value);
        Ok(())
    }
}

/// Manually advanced event clock.
///
/// Events are recorded with an absolute expiry time; the test advances
/// simulated time with [`ManualClock::advance`] and delivers the expired
/// chip indices to `FlashDevice::complete_operation` itself. Clones
/// share the same event list.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    inner: Rc<RefCell<ClockInner>>,
}

#[derive(Debug, Default)]
struct ClockInner {
    now: f64,
    // (expiry time, chip index)
    events: Vec<(f64, usize)>,
}

impl ManualClock {
    /// New clock at time zero with no events.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current simulated time in seconds.
    pub fn now(&self) -> f64 {
        self.inner.borrow().now
    }

    /// Number of pending events.
    pub fn pending(&self) -> usize {
        self.inner.borrow().events.len()
    }

    /// Advance simulated time by `dt` seconds and collect the chip
    /// indices whose events expired, in expiry order.
    pub fn advance(&self, dt: f64) -> Vec<usize> {
        let mut inner = self.inner.borrow_mut();
        inner.now += dt;
        let now = inner.now;
        let mut expired: Vec<(f64, usize)> = Vec::new();
        inner.events.retain(|&(at, chip)| {
            if at <= now {
                expired.push((at, chip));
                false
            } else {
                true
            }
        });
        expired.sort_by(|a, b| a.0.total_cmp(&b.0));
        expired.into_iter().map(|(_, chip)| chip).collect()
    }
}

impl BusyClock for ManualClock {
    fn post(&mut self, delay: f64, chip: usize) {
        let mut inner = self.inner.borrow_mut();
        let at = inner.now + delay;
        inner.events.push((at, chip));
    }

    fn cancel(&mut self, chip: usize) {
        self.inner
            .borrow_mut()
            .events
            .retain(|&(_, c)| c != chip);
    }
}

/// Pin sink that records every edge it sees.
#[derive(Debug, Clone, Default)]
pub struct PinRecorder {
    inner: Rc<RefCell<PinInner>>,
}

#[derive(Debug, Default)]
struct PinInner {
    level: bool,
    edges: Vec<bool>,
}

impl PinRecorder {
    /// New recorder, pin low, no edges.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current pin level.
    pub fn level(&self) -> bool {
        self.inner.borrow().level
    }

    /// Every level written to the pin, in order.
    pub fn edges(&self) -> Vec<bool> {
        self.inner.borrow().edges.clone()
    }
}

impl Signal for PinRecorder {
    fn raise(&mut self) {
        let mut inner = self.inner.borrow_mut();
        inner.level = true;
        inner.edges.push(true);
    }

    fn lower(&mut self) {
        let mut inner = self.inner.borrow_mut();
        inner.level = false;
        inner.edges.push(false);
    }
}
