//! AMD/Fujitsu command-set decoder
//!
//! Commands are multi-byte unlock sequences keyed on the command byte
//! and the low bits of the command address. Only the low 11 address
//! lines reach the unlock-sequence logic, so addresses are masked with
//! 0x7FF before comparison; `amd_ignore_cmd_address` drops the address
//! check entirely (some boards wire fewer lines).
//!
//! Writes arriving while a timed operation runs follow the
//! cancel-and-complete protocol: the pending completion is collapsed
//! synchronously and the new byte is decoded against the settled mode.
//! The one exception is a repeated sector erase (0x30 while a sector
//! erase wait is running), which erases the new sector and re-arms the
//! timer without completing early.

use crate::bus::SubAccess;
use crate::cfi;
use crate::chip::{WriteBuffer, DQ2, DQ6};
use crate::device::FlashDevice;
use crate::error::Result;
use crate::logging::LogGroups;
use crate::mode::Mode;
use crate::optimize::{self, OptimizationContext};
use crate::busy;

const UNLOCK1_ADDR: u64 = 0x555;
const UNLOCK2_ADDR: u64 = 0x2AA;
const CFI_ADDR: u64 = 0x55;

/// Only the low address lines are decoded by the unlock logic.
const CMD_ADDR_MASK: u64 = 0x7FF;

fn at(dev: &FlashDevice, cmd_addr: u64, expected: u64) -> bool {
    dev.cfg.amd_ignore_cmd_address || (cmd_addr & CMD_ADDR_MASK) == expected
}

fn is_reset(cmd: u8) -> bool {
    cmd == 0xF0 || cmd == 0xFF
}

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
        return write_while_busy(dev, opt, sub, value, data);
    }

    match mode {
        Mode::ReadArray => {
            if cmd == 0xAA && at(dev, sub.cmd_addr, UNLOCK1_ADDR) {
                dev.set_mode(chip, Mode::AmdUnlock1);
            } else if cmd == 0x98 && at(dev, sub.cmd_addr, CFI_ADDR) {
                dev.log_info(chip, LogGroups::CFI, format_args!("entering CFI query mode"));
                dev.set_mode(chip, Mode::CfiQuery);
            } else if is_reset(cmd) {
                // Explicit reset, already reading the array.
            } else {
                dev.protocol_violation(
                    chip,
                    LogGroups::COMMAND,
                    format_args!(
                        "unexpected command {:#04x}@{:#x} in read-array mode (bus address {:#x})",
                        cmd, sub.cmd_addr, sub.report_addr
                    ),
                );
            }
        }

        Mode::CfiQuery => {
            if is_reset(cmd) {
                dev.set_mode(chip, Mode::ReadArray);
            } else {
                dev.protocol_violation(
                    chip,
                    LogGroups::CFI | LogGroups::COMMAND,
                    format_args!("unexpected command {:#04x} in CFI query mode", cmd),
                );
            }
        }

        Mode::Unknown | Mode::Unimplemented => {
            if is_reset(cmd) {
                dev.set_mode(chip, Mode::ReadArray);
            } else {
                dev.log_info(
                    chip,
                    LogGroups::COMMAND,
                    format_args!("write {:#04x} ignored in {} mode", cmd, mode),
                );
            }
        }

        Mode::AmdUnlock1 => {
            if cmd == 0x55 && at(dev, sub.cmd_addr, UNLOCK2_ADDR) {
                dev.set_mode(chip, Mode::AmdUnlock2);
            } else if is_reset(cmd) {
                dev.set_mode(chip, Mode::ReadArray);
            } else {
                dev.protocol_violation(
                    chip,
                    LogGroups::COMMAND,
                    format_args!(
                        "broken unlock sequence: {:#04x}@{:#x}",
                        cmd, sub.cmd_addr
                    ),
                );
            }
        }

        Mode::AmdUnlock2 => unlock2_dispatch(dev, sub, cmd),

        Mode::AmdAutoselect => {
            if is_reset(cmd) {
                dev.set_mode(chip, Mode::ReadArray);
            } else {
                dev.protocol_violation(
                    chip,
                    LogGroups::COMMAND,
                    format_args!("unexpected command {:#04x} in autoselect mode", cmd),
                );
            }
        }

        Mode::AmdProgram => program(dev, opt, sub, data, Mode::ReadArray)?,

        Mode::AmdErase3 => {
            if cmd == 0xAA && at(dev, sub.cmd_addr, UNLOCK1_ADDR) {
                dev.set_mode(chip, Mode::AmdErase4);
            } else if is_reset(cmd) {
                dev.set_mode(chip, Mode::ReadArray);
            } else {
                dev.protocol_violation(
                    chip,
                    LogGroups::ERASE | LogGroups::COMMAND,
                    format_args!("broken erase sequence: {:#04x}@{:#x}", cmd, sub.cmd_addr),
                );
            }
        }

        Mode::AmdErase4 => {
            if cmd == 0x55 && at(dev, sub.cmd_addr, UNLOCK2_ADDR) {
                dev.set_mode(chip, Mode::AmdErase5);
            } else if is_reset(cmd) {
                dev.set_mode(chip, Mode::ReadArray);
            } else {
                dev.protocol_violation(
                    chip,
                    LogGroups::ERASE | LogGroups::COMMAND,
                    format_args!("broken erase sequence: {:#04x}@{:#x}", cmd, sub.cmd_addr),
                );
            }
        }

        Mode::AmdErase5 => erase_dispatch(dev, opt, sub, cmd, false)?,

        Mode::AmdWriteBufferSize => buffer_size(dev, sub, value, false),
        Mode::AmdWriteBufferGather => buffer_gather(dev, sub, data, false),
        Mode::AmdWriteBufferConfirm => buffer_confirm(dev, sub, cmd, false)?,

        Mode::AmdUnlockBypass => match cmd {
            0xA0 => dev.set_mode(chip, Mode::AmdUnlockBypassProgram),
            0x90 => dev.set_mode(chip, Mode::AmdUnlockBypassReset),
            0x80 => dev.set_mode(chip, Mode::AmdUnlockBypassErase),
            0x25 => {
                dev.chips[chip].write_buffer = Some(WriteBuffer {
                    start: sub.offset,
                    ..Default::default()
                });
                dev.set_mode(chip, Mode::AmdUnlockBypassWriteBufferSize);
            }
            0xAA if at(dev, sub.cmd_addr, UNLOCK1_ADDR) => {
                dev.set_mode(chip, Mode::AmdUnlockBypassCommand1);
            }
            _ => dev.protocol_violation(
                chip,
                LogGroups::COMMAND,
                format_args!("unexpected command {:#04x} in unlock bypass mode", cmd),
            ),
        },

        Mode::AmdUnlockBypassCommand1 => {
            if cmd == 0x55 && at(dev, sub.cmd_addr, UNLOCK2_ADDR) {
                dev.set_mode(chip, Mode::AmdUnlockBypassCommand2);
            } else {
                dev.protocol_violation(
                    chip,
                    LogGroups::COMMAND,
                    format_args!("broken bypass unlock sequence: {:#04x}", cmd),
                );
            }
        }

        Mode::AmdUnlockBypassCommand2 => match cmd {
            0xA0 => dev.set_mode(chip, Mode::AmdUnlockBypassProgram),
            0x80 => dev.set_mode(chip, Mode::AmdUnlockBypassErase),
            0x90 => dev.set_mode(chip, Mode::AmdUnlockBypassReset),
            0xF0 => dev.set_mode(chip, Mode::AmdUnlockBypass),
            _ => dev.protocol_violation(
                chip,
                LogGroups::COMMAND,
                format_args!("unexpected bypass command {:#04x}", cmd),
            ),
        },

        Mode::AmdUnlockBypassProgram => program(dev, opt, sub, data, Mode::AmdUnlockBypass)?,

        Mode::AmdUnlockBypassReset => {
            if cmd == 0x00 {
                dev.log_info(chip, LogGroups::COMMAND, format_args!("leaving unlock bypass"));
                dev.set_mode(chip, Mode::ReadArray);
            } else {
                dev.protocol_violation(
                    chip,
                    LogGroups::COMMAND,
                    format_args!("unexpected bypass reset byte {:#04x}", cmd),
                );
            }
        }

        Mode::AmdUnlockBypassErase => erase_dispatch(dev, opt, sub, cmd, true)?,

        Mode::AmdUnlockBypassWriteBufferSize => buffer_size(dev, sub, value, true),
        Mode::AmdUnlockBypassWriteBufferGather => buffer_gather(dev, sub, data, true),
        Mode::AmdUnlockBypassWriteBufferConfirm => buffer_confirm(dev, sub, cmd, true)?,

        Mode::AmdLockRegisterCommandSet => match cmd {
            0xA0 => dev.set_mode(chip, Mode::AmdLockRegisterBits),
            0x90 => dev.set_mode(chip, Mode::AmdLockRegisterExit),
            _ => dev.protocol_violation(
                chip,
                LogGroups::LOCK | LogGroups::COMMAND,
                format_args!("unexpected lock-register command {:#04x}", cmd),
            ),
        },

        Mode::AmdLockRegisterBits => {
            // Lock register programs like the array: bits can only
            // clear, and only within the written chip-width lane.
            let keep = match dev.geo.chip_bytes {
                1 => 0xFF00u16,
                _ => 0,
            };
            let new = dev.chips[chip].lock_register & (value as u16 | keep);
            dev.chips[chip].lock_register = new;
            dev.log_info(
                chip,
                LogGroups::LOCK,
                format_args!("lock register programmed to {:#06x}", new),
            );
            dev.set_mode(chip, Mode::AmdLockRegisterCommandSet);
        }

        Mode::AmdLockRegisterExit => exit_command_set(dev, sub, cmd),

        Mode::AmdPpbCommandSet => match cmd {
            0xA0 => dev.set_mode(chip, Mode::AmdPpbProgram),
            0x80 => dev.set_mode(chip, Mode::AmdPpbErase),
            0x90 => dev.set_mode(chip, Mode::AmdPpbExit),
            _ => dev.protocol_violation(
                chip,
                LogGroups::LOCK | LogGroups::COMMAND,
                format_args!("unexpected PPB command {:#04x}", cmd),
            ),
        },

        Mode::AmdPpbProgram => ppb_program(dev, sub, cmd),

        Mode::AmdPpbErase => {
            if cmd == 0x30 {
                if dev.chips[chip].ppb_lock {
                    for unit in &mut dev.chips[chip].units {
                        unit.ppb = true;
                    }
                    dev.log_info(chip, LogGroups::LOCK, format_args!("all PPB bits erased"));
                } else {
                    dev.log_spec_violation(
                        chip,
                        LogGroups::LOCK,
                        format_args!("PPB erase ignored, PPB bits are frozen"),
                    );
                }
                dev.set_mode(chip, Mode::AmdPpbCommandSet);
            } else {
                dev.protocol_violation(
                    chip,
                    LogGroups::LOCK | LogGroups::COMMAND,
                    format_args!("unexpected PPB erase byte {:#04x}", cmd),
                );
            }
        }

        Mode::AmdPpbExit => exit_command_set(dev, sub, cmd),

        Mode::AmdPpbLockCommandSet => match cmd {
            0xA0 => dev.set_mode(chip, Mode::AmdPpbLockProgram),
            0x90 => dev.set_mode(chip, Mode::AmdPpbLockExit),
            _ => dev.protocol_violation(
                chip,
                LogGroups::LOCK | LogGroups::COMMAND,
                format_args!("unexpected PPB-lock command {:#04x}", cmd),
            ),
        },

        Mode::AmdPpbLockProgram => {
            // Any programmed value clears the bit; it returns on reset.
            dev.chips[chip].ppb_lock = false;
            dev.log_info(
                chip,
                LogGroups::LOCK,
                format_args!("PPB lock bit programmed, PPB bits frozen until reset"),
            );
            dev.set_mode(chip, Mode::AmdPpbLockCommandSet);
        }

        Mode::AmdPpbLockExit => exit_command_set(dev, sub, cmd),

        Mode::AmdDybCommandSet => match cmd {
            0xA0 => dev.set_mode(chip, Mode::AmdDybWrite),
            0x90 => dev.set_mode(chip, Mode::AmdDybExit),
            _ => dev.protocol_violation(
                chip,
                LogGroups::LOCK | LogGroups::COMMAND,
                format_args!("unexpected DYB command {:#04x}", cmd),
            ),
        },

        Mode::AmdDybWrite => {
            let unit = dev.chips[chip].unit_index_at(sub.offset);
            match cmd {
                0x00 => {
                    dev.chips[chip].units[unit].dyb = false;
                    dev.log_info(chip, LogGroups::LOCK, format_args!("DYB set on unit {}", unit));
                    dev.set_mode(chip, Mode::AmdDybCommandSet);
                }
                0x01 => {
                    dev.chips[chip].units[unit].dyb = true;
                    dev.log_info(
                        chip,
                        LogGroups::LOCK,
                        format_args!("DYB cleared on unit {}", unit),
                    );
                    dev.set_mode(chip, Mode::AmdDybCommandSet);
                }
                _ => dev.protocol_violation(
                    chip,
                    LogGroups::LOCK,
                    format_args!("unexpected DYB write value {:#04x}", cmd),
                ),
            }
        }

        Mode::AmdDybExit => exit_command_set(dev, sub, cmd),

        m => unreachable!("mode {} cannot be dispatched by the AMD decoder", m),
    }
    Ok(())
}

/// Shared exit handling for the two-state command-set exits.
fn exit_command_set(dev: &mut FlashDevice, sub: SubAccess, cmd: u8) {
    if cmd == 0x00 {
        dev.set_mode(sub.chip, Mode::ReadArray);
    } else {
        dev.protocol_violation(
            sub.chip,
            LogGroups::LOCK | LogGroups::COMMAND,
            format_args!("unexpected command-set exit byte {:#04x}", cmd),
        );
    }
}

fn write_while_busy(
    dev: &mut FlashDevice,
    opt: &mut OptimizationContext,
    sub: SubAccess,
    value: u64,
    data: &[u8],
) -> Result<()> {
    let chip = sub.chip;
    let cmd = value as u8;
    let mode = dev.chips[chip].mode;

    // Repeated sector erase keeps the wait alive on a new sector.
    if cmd == 0x30
        && matches!(
            mode,
            Mode::EraseInProgress | Mode::AmdUnlockBypassEraseInProgress
        )
    {
        busy::cancel_event(dev, chip);
        return erase_sector(dev, opt, sub, mode == Mode::AmdUnlockBypassEraseInProgress);
    }

    busy::cancel_and_complete(dev, chip);
    write(dev, opt, sub, value, data)
}

fn unlock2_dispatch(dev: &mut FlashDevice, sub: SubAccess, cmd: u8) {
    let chip = sub.chip;
    let a = at(dev, sub.cmd_addr, UNLOCK1_ADDR);
    match cmd {
        0xA0 if a => dev.set_mode(chip, Mode::AmdProgram),
        0x90 if a => dev.set_mode(chip, Mode::AmdAutoselect),
        0x80 if a => dev.set_mode(chip, Mode::AmdErase3),
        // Write-to-buffer takes the sector address, not the unlock address.
        0x25 => {
            dev.chips[chip].write_buffer = Some(WriteBuffer {
                start: sub.offset,
                ..Default::default()
            });
            dev.set_mode(chip, Mode::AmdWriteBufferSize);
        }
        0x20 if a => {
            dev.log_info(chip, LogGroups::COMMAND, format_args!("entering unlock bypass"));
            dev.set_mode(chip, Mode::AmdUnlockBypass);
        }
        0x40 if a => dev.set_mode(chip, Mode::AmdLockRegisterCommandSet),
        0x50 if a => dev.set_mode(chip, Mode::AmdPpbLockCommandSet),
        0xC0 if a => dev.set_mode(chip, Mode::AmdPpbCommandSet),
        0xE0 if a => dev.set_mode(chip, Mode::AmdDybCommandSet),
        0xF0 | 0xFF => dev.set_mode(chip, Mode::ReadArray),
        _ => dev.protocol_violation(
            chip,
            LogGroups::COMMAND,
            format_args!(
                "unexpected command {:#04x}@{:#x} after unlock sequence (bus address {:#x})",
                cmd, sub.cmd_addr, sub.report_addr
            ),
        ),
    }
}

/// Perform the program write, respecting the protection bits and WP#.
fn program(
    dev: &mut FlashDevice,
    opt: &mut OptimizationContext,
    sub: SubAccess,
    data: &[u8],
    next: Mode,
) -> Result<()> {
    let chip = sub.chip;
    let unit = dev.chips[chip].unit_index_at(sub.offset);
    if dev.unit_blocked(chip, unit) {
        dev.log_spec_violation(
            chip,
            LogGroups::WRITE | LogGroups::LOCK,
            format_args!("program at {:#x} dropped, unit {} is protected", sub.offset, unit),
        );
    } else {
        let bulk_ok = dev.unit_unblocked_everywhere(unit);
        optimize::program_chunk(dev, opt, chip, sub.offset, data, sub.pos, bulk_ok)?;
    }
    dev.set_mode(chip, next);
    Ok(())
}

fn erase_dispatch(
    dev: &mut FlashDevice,
    opt: &mut OptimizationContext,
    sub: SubAccess,
    cmd: u8,
    bypass: bool,
) -> Result<()> {
    match cmd {
        0x30 => erase_sector(dev, opt, sub, bypass),
        0x10 => erase_chip(dev, opt, sub, bypass),
        _ => {
            dev.protocol_violation(
                sub.chip,
                LogGroups::ERASE | LogGroups::COMMAND,
                format_args!("unexpected erase sub-command {:#04x}", cmd),
            );
            Ok(())
        }
    }
}

fn erase_sector(
    dev: &mut FlashDevice,
    opt: &mut OptimizationContext,
    sub: SubAccess,
    bypass: bool,
) -> Result<()> {
    let chip = sub.chip;
    let (busy_mode, sync_mode) = if bypass {
        (Mode::AmdUnlockBypassEraseInProgress, Mode::AmdUnlockBypass)
    } else {
        (Mode::EraseInProgress, Mode::ReadArray)
    };

    let unit = dev.chips[chip].unit_index_at(sub.offset);
    if dev.unit_blocked(chip, unit) {
        dev.log_spec_violation(
            chip,
            LogGroups::ERASE | LogGroups::LOCK,
            format_args!("sector erase of protected unit {} ignored", unit),
        );
        dev.set_mode(chip, sync_mode);
        return Ok(());
    }

    let (start, size) = {
        let u = &dev.chips[chip].units[unit];
        (u.start, u.size)
    };
    let bulk_ok = dev.unit_unblocked_everywhere(unit);
    optimize::fill_range(dev, opt, chip, start, size, 0xFF, bulk_ok)?;
    dev.log_info(
        chip,
        LogGroups::ERASE,
        format_args!("sector erase of unit {} ({:#x}..{:#x})", unit, start, start + size),
    );

    if !busy::start_operation(dev, chip, busy_mode, busy::KEY_ERASE) {
        dev.set_mode(chip, sync_mode);
    }
    Ok(())
}

fn erase_chip(
    dev: &mut FlashDevice,
    opt: &mut OptimizationContext,
    sub: SubAccess,
    bypass: bool,
) -> Result<()> {
    let chip = sub.chip;
    let (busy_mode, sync_mode) = if bypass {
        (Mode::AmdUnlockBypassEraseInProgress, Mode::AmdUnlockBypass)
    } else {
        (Mode::ChipEraseInProgress, Mode::ReadArray)
    };

    let units = dev.chips[chip].units.len();
    let all_clear = (0..units).all(|u| dev.unit_unblocked_everywhere(u));
    if all_clear {
        // One contiguous fill; eligible for the merged bulk path.
        let size = dev.geo.chip_size;
        optimize::fill_range(dev, opt, chip, 0, size, 0xFF, true)?;
    } else {
        for unit in 0..units {
            if dev.unit_blocked(chip, unit) {
                dev.log_spec_violation(
                    chip,
                    LogGroups::ERASE | LogGroups::LOCK,
                    format_args!("chip erase skips protected unit {}", unit),
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

    if !busy::start_operation(dev, chip, busy_mode, busy::KEY_CHIP_ERASE) {
        dev.set_mode(chip, sync_mode);
    }
    Ok(())
}

fn ppb_program(dev: &mut FlashDevice, sub: SubAccess, cmd: u8) {
    let chip = sub.chip;
    if !dev.chips[chip].ppb_lock {
        dev.log_spec_violation(
            chip,
            LogGroups::LOCK,
            format_args!("PPB program ignored, PPB bits are frozen"),
        );
        dev.set_mode(chip, Mode::AmdPpbCommandSet);
        return;
    }
    if cmd != 0x00 {
        dev.protocol_violation(
            chip,
            LogGroups::LOCK,
            format_args!("unexpected PPB program value {:#04x}", cmd),
        );
        return;
    }
    let unit = dev.chips[chip].unit_index_at(sub.offset);
    dev.chips[chip].units[unit].ppb = false;
    dev.log_info(chip, LogGroups::LOCK, format_args!("PPB set on unit {}", unit));
    dev.set_mode(chip, Mode::AmdPpbCommandSet);
}

fn buffer_size(dev: &mut FlashDevice, sub: SubAccess, value: u64, bypass: bool) {
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
        dev.set_mode(chip, Mode::ReadArray);
        return;
    }
    let Some(wb) = dev.chips[chip].write_buffer.as_mut() else {
        unreachable!("write-buffer size state without a buffer");
    };
    wb.expected = bytes;
    let next = if bypass {
        Mode::AmdUnlockBypassWriteBufferGather
    } else {
        Mode::AmdWriteBufferGather
    };
    dev.set_mode(chip, next);
}

fn buffer_gather(dev: &mut FlashDevice, sub: SubAccess, data: &[u8], bypass: bool) {
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
        let next = if bypass {
            Mode::AmdUnlockBypassWriteBufferConfirm
        } else {
            Mode::AmdWriteBufferConfirm
        };
        dev.set_mode(chip, next);
    }
}

fn buffer_confirm(
    dev: &mut FlashDevice,
    sub: SubAccess,
    cmd: u8,
    bypass: bool,
) -> Result<()> {
    let chip = sub.chip;
    if cmd != 0x29 {
        dev.log_spec_violation(
            chip,
            LogGroups::WRITE_BUFFER | LogGroups::COMMAND,
            format_args!("write-buffer aborted by {:#04x} instead of confirm", cmd),
        );
        dev.chips[chip].write_buffer = None;
        dev.set_mode(chip, Mode::ReadArray);
        return Ok(());
    }

    let Some(wb) = dev.chips[chip].write_buffer.take() else {
        unreachable!("write-buffer confirm state without a buffer");
    };
    let blocked = optimize::flush_write_buffer(dev, chip, &wb)?;
    if blocked {
        dev.log_spec_violation(
            chip,
            LogGroups::WRITE_BUFFER | LogGroups::LOCK,
            format_args!("write-buffer program partially dropped by protection"),
        );
    }
    dev.log_info(
        chip,
        LogGroups::WRITE_BUFFER,
        format_args!("write-buffer program of {} bytes at {:#x}", wb.data.len(), wb.start),
    );

    let (busy_mode, sync_mode) = if bypass {
        (
            Mode::AmdUnlockBypassWriteBufferInProgress,
            Mode::AmdUnlockBypass,
        )
    } else {
        (Mode::AmdWriteBufferInProgress, Mode::ReadArray)
    };
    if !busy::start_operation(dev, chip, busy_mode, busy::KEY_AMD_WRITE_BUFFER) {
        dev.set_mode(chip, sync_mode);
    }
    Ok(())
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

        Mode::AmdAutoselect => Some(autoselect(dev, sub)),

        // Data polling: DQ6 toggles on every status read, DQ2 toggles
        // while an erase is running.
        Mode::EraseInProgress
        | Mode::ChipEraseInProgress
        | Mode::AmdUnlockBypassEraseInProgress => Some(toggle_status(dev, sub, DQ6 | DQ2)),

        Mode::AmdWriteBufferInProgress | Mode::AmdUnlockBypassWriteBufferInProgress => {
            Some(toggle_status(dev, sub, DQ6))
        }

        m if m.is_intel() => unreachable!("intel mode {} reached by the AMD decoder", m),

        m => {
            dev.log_spec_violation(
                chip,
                LogGroups::READ,
                format_args!("read in {} mode returns undefined data", m),
            );
            Some(0)
        }
    }
}

fn toggle_status(dev: &mut FlashDevice, sub: SubAccess, bits: u8) -> u64 {
    let chip = sub.chip;
    let unit = dev.chips[chip].unit_index_at(sub.offset);
    let u = &mut dev.chips[chip].units[unit];
    u.status ^= bits;
    u64::from(u.status)
}

fn autoselect(dev: &mut FlashDevice, sub: SubAccess) -> u64 {
    let chip = sub.chip;
    let id_byte = |i: usize| u64::from(dev.cfg.device_id.get(i).copied().unwrap_or(0));
    match sub.cmd_addr & 0xFF {
        0x00 => u64::from(dev.cfg.manufacturer_id),
        0x01 => id_byte(0),
        0x0E => id_byte(1),
        0x0F => id_byte(2),
        0x02 => {
            let unit = dev.chips[chip].unit_index_at(sub.offset);
            let u = &dev.chips[chip].units[unit];
            u64::from(!(u.dyb && u.ppb))
        }
        other => {
            dev.log_spec_violation(
                chip,
                LogGroups::READ,
                format_args!("autoselect read at unsupported offset {:#x}", other),
            );
            1
        }
    }
}
