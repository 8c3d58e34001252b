//! Busy/timing model
//!
//! Timed operations look their delay up in the configured timing model
//! by operation key. A zero or absent delay means the operation
//! completes synchronously and the chip never enters the in-progress
//! state. Otherwise the chip enters `busy_mode`, its busy output (if
//! connected) is raised, and a completion event is armed on the host
//! clock; the host calls back into
//! [`FlashDevice::complete_operation`](crate::device::FlashDevice::complete_operation)
//! when the event expires.

use crate::device::FlashDevice;
use crate::logging::LogGroups;
use crate::mode::Mode;

/// Operation key for sector erase.
pub const KEY_ERASE: &str = "erase_in_progress";
/// Operation key for whole-chip erase.
pub const KEY_CHIP_ERASE: &str = "chip_erase_in_progress";
/// Operation key for AMD buffer programming.
pub const KEY_AMD_WRITE_BUFFER: &str = "amd_write_buffer_in_progress";
/// Operation key for Intel buffer programming.
pub const KEY_INTEL_WRITE_BUFFER: &str = "intel_write_buffer_in_progress";

/// Enter a timed operation if the timing model asks for one.
///
/// Returns true when the chip went busy; false means the caller must
/// complete the operation synchronously (the mode is left untouched).
pub(crate) fn start_operation(
    dev: &mut FlashDevice,
    chip: usize,
    busy_mode: Mode,
    key: &str,
) -> bool {
    debug_assert!(busy_mode.is_busy());
    let delay = dev.cfg.delay_for(key);
    if delay <= 0.0 {
        return false;
    }
    if dev.clock.is_none() {
        dev.log_info(
            chip,
            LogGroups::STATE,
            format_args!("no event clock attached, {} completes synchronously", key),
        );
        return false;
    }

    dev.set_mode(chip, busy_mode);
    if let Some(signal) = dev.chips[chip].busy_signal.as_mut() {
        signal.raise();
    }
    if let Some(clock) = dev.clock.as_mut() {
        clock.post(delay, chip);
    }
    dev.chips[chip].event_armed = true;
    true
}

/// Cancel the armed completion event, if any, without running the
/// completion logic. Idempotent.
pub(crate) fn cancel_event(dev: &mut FlashDevice, chip: usize) {
    if !dev.chips[chip].event_armed {
        return;
    }
    if let Some(clock) = dev.clock.as_mut() {
        clock.cancel(chip);
    }
    dev.chips[chip].event_armed = false;
}

/// Collapse an in-flight busy wait: cancel the event and run the
/// completion logic now. Used when a new command arrives while busy.
pub(crate) fn cancel_and_complete(dev: &mut FlashDevice, chip: usize) {
    cancel_event(dev, chip);
    dev.complete_operation(chip);
}
