//! Intel/Sharp command-set decoder
//!
//! Commands are single bytes with no unlock sequence; a command byte
//! written in any of the idle modes selects the next operation, and
//! 0xFF always returns the chip to array reads. Operation results are
//! reported through the status register, which most non-array modes
//! return on reads.
//!
//! Block locking comes in two models selected by configuration. The
//! simple model locks a single block and unlocks all of them at once.
//! The advanced model keeps a per-block lock/lock-down pair with WP#
//! interplay: a lock-down issued while WP# is asserted latches as a
//! hardware lock-down that no later unlock can clear.

use crate::bus::SubAccess;
use crate::busy;
use crate::cfi;
use crate::chip::{WriteBuffer, SR_ERASE_ERROR, SR_LOCKED, SR_PROGRAM_ERROR, SR_READY};
use crate::config::intel_lock;
use crate::device::FlashDevice;
use crate::error::Result;
use crate::logging::LogGroups;
use crate::mode::Mode;
use crate::optimize::{self, OptimizationContext};

/// Decode one chip-width write.
pub(crate) fn write(
    dev: &mut FlashDevice,
    opt: &mut OptimizationContext,
    sub: SubAccess,
    value: u64,
    data: &[u8],
) -> Result<()> {
    let chip = sub.chip;
    let cmd = value as u8;
    let mode = dev.chips[chip].mode;

    if mode.is_busy() {
        // New command collapses the wait; decode against the settled mode.
        busy::cancel_and_complete(dev, chip);
        return write(dev, opt, sub, value, data);
    }

    match mode {
        Mode::ReadArray
        | Mode::CfiQuery
        | Mode::IntelReadStatus
        | Mode::IntelReadIdentifierCodes
        | Mode::IntelLockDone => idle_dispatch(dev, sub, cmd),

        Mode::IntelLockCommandError => error_dispatch(dev, sub, cmd),

        Mode::Unknown | Mode::Unimplemented => match cmd {
            0xFF | 0xF0 => dev.set_mode(chip, Mode::ReadArray),
            0x50 => {
                clear_status(dev, chip);
                dev.set_mode(chip, Mode::ReadArray);
            }
            _ => dev.log_info(
                chip,
                LogGroups::COMMAND,
                format_args!("write {:#04x} ignored in {} mode", cmd, mode),
            ),
        },

        Mode::IntelBlockErase => match cmd {
            0xD0 => block_erase(dev, opt, sub)?,
            0x20 if dev.cfg.intel_chip_erase => chip_erase(dev, opt, sub)?,
            _ => {
                let unit = dev.chips[chip].unit_index_at(sub.offset);
                dev.chips[chip].units[unit].status |= SR_ERASE_ERROR;
                dev.protocol_violation(
                    chip,
                    LogGroups::ERASE | LogGroups::COMMAND,
                    format_args!("erase not confirmed, got {:#04x}", cmd),
                );
                if dev.chips[chip].mode == Mode::IntelBlockErase {
                    dev.set_mode(chip, Mode::IntelReadStatus);
                }
            }
        },

        Mode::IntelWordProgram => word_program(dev, opt, sub, data)?,

        Mode::IntelWriteBufferSize => buffer_size(dev, sub, value),
        Mode::IntelWriteBufferGather => buffer_gather(dev, sub, data),
        Mode::IntelWriteBufferConfirm => buffer_confirm(dev, sub, cmd)?,

        Mode::IntelLockSetup => lock_dispatch(dev, sub, cmd),

        m if m.is_amd() => unreachable!("AMD mode {} reached by the Intel decoder", m),
        m => unreachable!("mode {} cannot be dispatched by the Intel decoder", m),
    }
    Ok(())
}

/// Command dispatch shared by all idle (non-sequence) modes.
fn idle_dispatch(dev: &mut FlashDevice, sub: SubAccess, cmd: u8) {
    let chip = sub.chip;
    match cmd {
        0x20 => dev.set_mode(chip, Mode::IntelBlockErase),
        0x40 | 0x10 => dev.set_mode(chip, Mode::IntelWordProgram),
        0x70 => dev.set_mode(chip, Mode::IntelReadStatus),
        0x90 => dev.set_mode(chip, Mode::IntelReadIdentifierCodes),
        0x98 => dev.set_mode(chip, Mode::CfiQuery),
        0x50 => {
            clear_status(dev, chip);
            dev.set_mode(chip, Mode::ReadArray);
        }
        0x60 => {
            if dev.cfg.intel_lock == intel_lock::NONE {
                dev.log_unimplemented(
                    chip,
                    LogGroups::LOCK,
                    format_args!("block locking is disabled on this device"),
                );
                dev.set_mode(chip, Mode::Unimplemented);
            } else {
                dev.set_mode(chip, Mode::IntelLockSetup);
            }
        }
        0xE8 => {
            if dev.cfg.intel_write_buffer {
                dev.chips[chip].write_buffer = Some(WriteBuffer {
                    start: sub.offset,
                    ..Default::default()
                });
                dev.set_mode(chip, Mode::IntelWriteBufferSize);
            } else {
                dev.log_unimplemented(
                    chip,
                    LogGroups::WRITE_BUFFER,
                    format_args!("write-to-buffer is disabled on this device"),
                );
                dev.set_mode(chip, Mode::Unimplemented);
            }
        }
        0xB8 => {
            if dev.cfg.intel_configuration {
                dev.log_unimplemented(
                    chip,
                    LogGroups::COMMAND,
                    format_args!("configuration command is not modeled"),
                );
                dev.set_mode(chip, Mode::Unimplemented);
            } else {
                dev.protocol_violation(
                    chip,
                    LogGroups::COMMAND,
                    format_args!("configuration command not enabled on this device"),
                );
            }
        }
        0xC0 => {
            if dev.cfg.intel_protection_program {
                dev.log_unimplemented(
                    chip,
                    LogGroups::LOCK,
                    format_args!("protection program command is not modeled"),
                );
                dev.set_mode(chip, Mode::Unimplemented);
            } else {
                dev.protocol_violation(
                    chip,
                    LogGroups::LOCK | LogGroups::COMMAND,
                    format_args!("protection program command not enabled on this device"),
                );
            }
        }
        // Read-array class: resets and stray confirm/lock bytes all
        // land back in array reads.
        0xFF | 0xF0 | 0xD0 | 0xB0 | 0x2F | 0x01 | 0x00 => dev.set_mode(chip, Mode::ReadArray),
        _ => dev.protocol_violation(
            chip,
            LogGroups::COMMAND,
            format_args!(
                "unexpected command {:#04x} at bus address {:#x}",
                cmd, sub.report_addr
            ),
        ),
    }
}

/// After a failed lock command only status and array reads make sense.
fn error_dispatch(dev: &mut FlashDevice, sub: SubAccess, cmd: u8) {
    let chip = sub.chip;
    match cmd {
        0x70 => dev.set_mode(chip, Mode::IntelReadStatus),
        0x50 => {
            clear_status(dev, chip);
            dev.set_mode(chip, Mode::ReadArray);
        }
        0xFF | 0xF0 | 0xD0 | 0xB0 | 0x2F | 0x01 | 0x00 => dev.set_mode(chip, Mode::ReadArray),
        _ => dev.log_spec_violation(
            chip,
            LogGroups::LOCK | LogGroups::COMMAND,
            format_args!("command {:#04x} ignored after failed lock command", cmd),
        ),
    }
}

fn clear_status(dev: &mut FlashDevice, chip: usize) {
    for unit in &mut dev.chips[chip].units {
        unit.status = SR_READY;
    }
}

fn block_erase(dev: &mut FlashDevice, opt: &mut OptimizationContext, sub: SubAccess) -> Result<()> {
    let chip = sub.chip;
    let unit = dev.chips[chip].unit_index_at(sub.offset);
    if dev.unit_blocked(chip, unit) {
        dev.chips[chip].units[unit].status |= SR_ERASE_ERROR | SR_LOCKED;
        dev.log_spec_violation(
            chip,
            LogGroups::ERASE | LogGroups::LOCK,
            format_args!("block erase of locked unit {} failed", unit),
        );
        dev.set_mode(chip, Mode::IntelReadStatus);
        return Ok(());
    }

    let (start, size) = {
        let u = &dev.chips[chip].units[unit];
        (u.start, u.size)
    };
    let bulk_ok = dev.unit_unblocked_everywhere(unit);
    optimize::fill_range(dev, opt, chip, start, size, 0xFF, bulk_ok)?;
    dev.chips[chip].units[unit].status = SR_READY;
    dev.log_info(
        chip,
        LogGroups::ERASE,
        format_args!("block erase of unit {} ({:#x}..{:#x})", unit, start, start + size),
    );

    if !busy::start_operation(dev, chip, Mode::EraseInProgress, busy::KEY_ERASE) {
        dev.set_mode(chip, Mode::IntelReadStatus);
    }
    Ok(())
}

/// Chip erase (0x20 0x20). The first status read after the erase
/// reports not-ready once, then the chip reads status normally.
fn chip_erase(dev: &mut FlashDevice, opt: &mut OptimizationContext, sub: SubAccess) -> Result<()> {
    let chip = sub.chip;
    let units = dev.chips[chip].units.len();
    let all_clear = (0..units).all(|u| dev.unit_unblocked_everywhere(u));
    if all_clear {
        let size = dev.geo.chip_size;
        optimize::fill_range(dev, opt, chip, 0, size, 0xFF, true)?;
    } else {
        for unit in 0..units {
            if dev.unit_blocked(chip, unit) {
                dev.chips[chip].units[unit].status |= SR_ERASE_ERROR | SR_LOCKED;
                dev.log_spec_violation(
                    chip,
                    LogGroups::ERASE | LogGroups::LOCK,
                    format_args!("chip erase skips locked unit {}", unit),
                );
                continue;
            }
            let (start, size) = {
                let u = &dev.chips[chip].units[unit];
                (u.start, u.size)
            };
            optimize::fill_range(dev, opt, chip, start, size, 0xFF, false)?;
        }
    }
    dev.log_info(chip, LogGroups::ERASE, format_args!("chip erase"));

    if !busy::start_operation(dev, chip, Mode::ChipEraseInProgress, busy::KEY_CHIP_ERASE) {
        dev.set_mode(chip, Mode::ChipEraseInProgress);
    }
    Ok(())
}

fn word_program(
    dev: &mut FlashDevice,
    opt: &mut OptimizationContext,
    sub: SubAccess,
    data: &[u8],
) -> Result<()> {
    let chip = sub.chip;
    let unit = dev.chips[chip].unit_index_at(sub.offset);
    if dev.unit_blocked(chip, unit) {
        dev.chips[chip].units[unit].status |= SR_PROGRAM_ERROR | SR_LOCKED;
        dev.log_spec_violation(
            chip,
            LogGroups::WRITE | LogGroups::LOCK,
            format_args!("program at {:#x} dropped, unit {} is locked", sub.offset, unit),
        );
    } else {
        let bulk_ok = dev.unit_unblocked_everywhere(unit);
        optimize::program_chunk(dev, opt, chip, sub.offset, data, sub.pos, bulk_ok)?;
    }
    dev.set_mode(chip, Mode::IntelReadStatus);
    Ok(())
}

fn buffer_size(dev: &mut FlashDevice, sub: SubAccess, value: u64) {
    let chip = sub.chip;
    let w = dev.geo.chip_bytes as usize;
    let words = value as usize + 1;
    let bytes = words * w;
    if bytes > dev.cfg.write_buffer_len {
        dev.log_spec_violation(
            chip,
            LogGroups::WRITE_BUFFER,
            format_args!(
                "write-buffer count of {} words exceeds the {}-byte buffer, command aborted",
                words, dev.cfg.write_buffer_len
            ),
        );
        dev.chips[chip].write_buffer = None;
        dev.set_mode(chip, Mode::IntelReadStatus);
        return;
    }
    let Some(wb) = dev.chips[chip].write_buffer.as_mut() else {
        unreachable!("write-buffer size state without a buffer");
    };
    wb.expected = bytes;
    dev.set_mode(chip, Mode::IntelWriteBufferGather);
}

fn buffer_gather(dev: &mut FlashDevice, sub: SubAccess, data: &[u8]) {
    let chip = sub.chip;
    let w = dev.geo.chip_bytes as usize;
    let chunk = &data[sub.pos..sub.pos + w];
    let Some(wb) = dev.chips[chip].write_buffer.as_mut() else {
        unreachable!("write-buffer gather state without a buffer");
    };
    if wb.data.is_empty() {
        // The first data word carries the real start address.
        wb.start = sub.offset;
    }
    wb.data.extend_from_slice(chunk);
    if wb.data.len() >= wb.expected {
        dev.set_mode(chip, Mode::IntelWriteBufferConfirm);
    }
}

fn buffer_confirm(dev: &mut FlashDevice, sub: SubAccess, cmd: u8) -> Result<()> {
    let chip = sub.chip;
    if cmd != 0xD0 {
        dev.log_spec_violation(
            chip,
            LogGroups::WRITE_BUFFER | LogGroups::COMMAND,
            format_args!("write-buffer aborted by {:#04x} instead of confirm", cmd),
        );
        dev.chips[chip].write_buffer = None;
        let unit = dev.chips[chip].unit_index_at(sub.offset);
        dev.chips[chip].units[unit].status |= SR_PROGRAM_ERROR;
        dev.set_mode(chip, Mode::IntelReadStatus);
        return Ok(());
    }

    let Some(wb) = dev.chips[chip].write_buffer.take() else {
        unreachable!("write-buffer confirm state without a buffer");
    };
    let blocked = optimize::flush_write_buffer(dev, chip, &wb)?;
    if blocked {
        let unit = dev.chips[chip].unit_index_at(wb.start);
        dev.chips[chip].units[unit].status |= SR_PROGRAM_ERROR | SR_LOCKED;
        dev.log_spec_violation(
            chip,
            LogGroups::WRITE_BUFFER | LogGroups::LOCK,
            format_args!("write-buffer program partially dropped by locking"),
        );
    }
    dev.log_info(
        chip,
        LogGroups::WRITE_BUFFER,
        format_args!("write-buffer program of {} bytes at {:#x}", wb.data.len(), wb.start),
    );

    if !busy::start_operation(
        dev,
        chip,
        Mode::IntelWriteBufferInProgress,
        busy::KEY_INTEL_WRITE_BUFFER,
    ) {
        dev.set_mode(chip, Mode::IntelReadStatus);
    }
    Ok(())
}

fn lock_dispatch(dev: &mut FlashDevice, sub: SubAccess, cmd: u8) {
    let chip = sub.chip;
    let unit = dev.chips[chip].unit_index_at(sub.offset);
    match dev.cfg.intel_lock {
        intel_lock::SIMPLE => match cmd {
            0x01 => {
                dev.chips[chip].units[unit].lock_status = 1;
                dev.log_info(chip, LogGroups::LOCK, format_args!("unit {} locked", unit));
                dev.set_mode(chip, Mode::IntelLockDone);
            }
            0xD0 => {
                for u in &mut dev.chips[chip].units {
                    u.lock_status = 0;
                }
                dev.log_info(chip, LogGroups::LOCK, format_args!("all units unlocked"));
                dev.set_mode(chip, Mode::IntelLockDone);
            }
            _ => lock_command_error(dev, chip, cmd),
        },
        intel_lock::ADVANCED => match cmd {
            0x01 | 0xD0 | 0x2F => {
                let wp = dev.wp;
                let u = &mut dev.chips[chip].units[unit];
                let (status, hw) =
                    advanced_lock_transition(u.lock_status, u.hardware_lock, wp, cmd);
                u.lock_status = status;
                u.hardware_lock = hw;
                dev.log_info(
                    chip,
                    LogGroups::LOCK,
                    format_args!("unit {} lock code set to {}", unit, status),
                );
                dev.set_mode(chip, Mode::IntelLockDone);
            }
            _ => lock_command_error(dev, chip, cmd),
        },
        _ => unreachable!("lock setup reached with locking disabled"),
    }
}

fn lock_command_error(dev: &mut FlashDevice, chip: usize, cmd: u8) {
    dev.log_spec_violation(
        chip,
        LogGroups::LOCK | LogGroups::COMMAND,
        format_args!("unexpected lock sub-command {:#04x}", cmd),
    );
    dev.set_mode(chip, Mode::IntelLockCommandError);
}

/// Advanced lock model transition.
///
/// The lock code is bit 0 = locked, bit 1 = lock-down. A lock-down
/// taken while WP# is asserted latches the hardware lock; an unlock
/// then leaves the block fully locked until WP# is released, while a
/// software lock-down only survives as the latched lock-down bit.
fn advanced_lock_transition(status: u8, hardware_lock: bool, wp: bool, cmd: u8) -> (u8, bool) {
    match cmd {
        // Lock
        0x01 => (status | 1, hardware_lock),
        // Unlock
        0xD0 => {
            let lock_down = status & 2 != 0;
            if lock_down && (hardware_lock || wp) {
                (status, hardware_lock)
            } else if lock_down {
                (2, hardware_lock)
            } else {
                (0, hardware_lock)
            }
        }
        // Lock-down
        0x2F => (status | 3, hardware_lock || wp),
        _ => unreachable!("lock transition on non-lock command {:#04x}", cmd),
    }
}

/// Decode one chip-width read. `None` falls through to backing storage.
pub(crate) fn read(dev: &mut FlashDevice, sub: SubAccess) -> Option<u64> {
    let chip = sub.chip;
    match dev.chips[chip].mode {
        Mode::ReadArray => None,

        Mode::CfiQuery => Some(u64::from(cfi::read(
            dev.cfg.cfi_query.as_deref(),
            sub.cmd_addr,
        ))),

        Mode::IntelReadIdentifierCodes => Some(identifier(dev, sub)),

        // The one-shot not-ready report after a chip erase: the first
        // read returns 0 and the chip settles into status reads. A
        // timed erase keeps reporting 0 until the event completes it.
        Mode::ChipEraseInProgress => {
            if !dev.chips[chip].event_armed {
                dev.set_mode(chip, Mode::IntelReadStatus);
            }
            Some(0)
        }

        Mode::EraseInProgress | Mode::IntelWriteBufferInProgress => {
            let unit = dev.chips[chip].unit_index_at(sub.offset);
            Some(u64::from(dev.chips[chip].units[unit].status & !SR_READY))
        }

        Mode::IntelReadStatus
        | Mode::IntelBlockErase
        | Mode::IntelWordProgram
        | Mode::IntelWriteBufferSize
        | Mode::IntelWriteBufferGather
        | Mode::IntelWriteBufferConfirm
        | Mode::IntelLockSetup
        | Mode::IntelLockDone
        | Mode::IntelLockCommandError => {
            let unit = dev.chips[chip].unit_index_at(sub.offset);
            Some(u64::from(dev.chips[chip].units[unit].status))
        }

        m @ (Mode::Unknown | Mode::Unimplemented) => {
            dev.log_spec_violation(
                chip,
                LogGroups::READ,
                format_args!("read in {} mode returns undefined data", m),
            );
            Some(0)
        }

        m => unreachable!("mode {} cannot be dispatched by the Intel decoder", m),
    }
}

fn identifier(dev: &mut FlashDevice, sub: SubAccess) -> u64 {
    let chip = sub.chip;
    let id_byte = |i: usize| u64::from(dev.cfg.device_id.get(i).copied().unwrap_or(0));
    match sub.cmd_addr & 0xFF {
        0x00 => u64::from(dev.cfg.manufacturer_id),
        0x01 => id_byte(0),
        0x0E => id_byte(1),
        0x0F => id_byte(2),
        0x02 => {
            let unit = dev.chips[chip].unit_index_at(sub.offset);
            u64::from(dev.chips[chip].units[unit].lock_status)
        }
        other => {
            dev.log_spec_violation(
                chip,
                LogGroups::READ,
                format_args!("identifier read at unsupported offset {:#x}", other),
            );
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_and_unlock() {
        assert_eq!(advanced_lock_transition(0, false, false, 0x01), (1, false));
        assert_eq!(advanced_lock_transition(1, false, false, 0xD0), (0, false));
    }

    #[test]
    fn lock_down_latches_wp() {
        // Lock-down with WP# asserted becomes a hardware lock that an
        // unlock cannot clear.
        let (status, hw) = advanced_lock_transition(0, false, true, 0x2F);
        assert_eq!((status, hw), (3, true));
        assert_eq!(advanced_lock_transition(status, hw, true, 0xD0), (3, true));
        assert_eq!(advanced_lock_transition(status, hw, false, 0xD0), (3, true));
    }

    #[test]
    fn soft_lock_down_unlocks_to_latched_bit() {
        let (status, hw) = advanced_lock_transition(0, false, false, 0x2F);
        assert_eq!((status, hw), (3, false));
        // The lock bit clears but the lock-down bit stays latched.
        assert_eq!(advanced_lock_transition(status, hw, false, 0xD0), (2, false));
    }
}
