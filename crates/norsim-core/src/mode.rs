//! Chip state machine modes
//!
//! One flat enum covers both command sets plus the states they share.
//! The string names are part of the persisted-state contract: snapshots
//! store modes by name, and `from_name` must keep accepting every string
//! that was ever emitted (plus hyphenated aliases).

use serde::{Deserialize, Serialize};

/// Current state of one flash chip's command decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Mode {
    // Shared between command sets
    /// Normal array read mode; writes are interpreted as command bytes
    ReadArray,
    /// CFI query table is mapped over reads
    CfiQuery,
    /// Decoder lost track after an illegal sequence (strict mode only)
    Unknown,
    /// A recognized but unimplemented command was received
    Unimplemented,
    /// Timed sector erase running
    EraseInProgress,
    /// Timed whole-chip erase running
    ChipEraseInProgress,

    // AMD command set
    /// First unlock byte (0xAA@0x555) seen
    AmdUnlock1,
    /// Second unlock byte (0x55@0x2AA) seen; command byte expected
    AmdUnlock2,
    /// Autoselect: identifier codes mapped over reads
    AmdAutoselect,
    /// Program command armed; next write is data
    AmdProgram,
    /// Erase sequence, third byte (0x80) seen
    AmdErase3,
    /// Erase sequence, fourth byte seen
    AmdErase4,
    /// Erase sequence complete; erase sub-command expected
    AmdErase5,
    /// Write-to-buffer: word count expected
    AmdWriteBufferSize,
    /// Write-to-buffer: gathering data words
    AmdWriteBufferGather,
    /// Write-to-buffer: confirm byte expected
    AmdWriteBufferConfirm,
    /// Timed buffer program running
    AmdWriteBufferInProgress,
    /// Unlock bypass entered; shortened commands accepted
    AmdUnlockBypass,
    /// Bypass program armed; next write is data
    AmdUnlockBypassProgram,
    /// Bypass exit, first byte (0x90) seen
    AmdUnlockBypassReset,
    /// Bypass erase armed; erase sub-command expected
    AmdUnlockBypassErase,
    /// Full unlock sequence inside bypass, first byte seen
    AmdUnlockBypassCommand1,
    /// Full unlock sequence inside bypass, second byte seen
    AmdUnlockBypassCommand2,
    /// Bypass write-to-buffer: word count expected
    AmdUnlockBypassWriteBufferSize,
    /// Bypass write-to-buffer: gathering data words
    AmdUnlockBypassWriteBufferGather,
    /// Bypass write-to-buffer: confirm byte expected
    AmdUnlockBypassWriteBufferConfirm,
    /// Timed buffer program running, bypass variant
    AmdUnlockBypassWriteBufferInProgress,
    /// Timed erase running, bypass variant
    AmdUnlockBypassEraseInProgress,
    /// Lock register command set entered
    AmdLockRegisterCommandSet,
    /// Lock register program armed; next write is register data
    AmdLockRegisterBits,
    /// Lock register command set exit, first byte seen
    AmdLockRegisterExit,
    /// Non-volatile (PPB) command set entered
    AmdPpbCommandSet,
    /// PPB program armed; next write selects the unit
    AmdPpbProgram,
    /// All-PPB erase armed
    AmdPpbErase,
    /// PPB command set exit, first byte seen
    AmdPpbExit,
    /// PPB lock command set entered
    AmdPpbLockCommandSet,
    /// PPB lock program armed
    AmdPpbLockProgram,
    /// PPB lock command set exit, first byte seen
    AmdPpbLockExit,
    /// Volatile (DYB) command set entered
    AmdDybCommandSet,
    /// DYB write armed; next write selects unit and value
    AmdDybWrite,
    /// DYB command set exit, first byte seen
    AmdDybExit,

    // Intel command set
    /// Status register mapped over reads
    IntelReadStatus,
    /// Identifier codes mapped over reads
    IntelReadIdentifierCodes,
    /// Block erase setup; confirm expected
    IntelBlockErase,
    /// Word program setup; next write is data
    IntelWordProgram,
    /// Write-to-buffer: word count expected
    IntelWriteBufferSize,
    /// Write-to-buffer: gathering data words
    IntelWriteBufferGather,
    /// Write-to-buffer: confirm byte expected
    IntelWriteBufferConfirm,
    /// Timed buffer program running
    IntelWriteBufferInProgress,
    /// Lock setup; lock sub-command expected
    IntelLockSetup,
    /// Sticky lock error; exits only on a read-array-class command
    IntelLockCommandError,
    /// Lock operation completed
    IntelLockDone,
}

impl Mode {
    /// All modes, in declaration order.
    pub const ALL: &'static [Mode] = &[
        Mode::ReadArray,
        Mode::CfiQuery,
        Mode::Unknown,
        Mode::Unimplemented,
        Mode::EraseInProgress,
        Mode::ChipEraseInProgress,
        Mode::AmdUnlock1,
        Mode::AmdUnlock2,
        Mode::AmdAutoselect,
        Mode::AmdProgram,
        Mode::AmdErase3,
        Mode::AmdErase4,
        Mode::AmdErase5,
        Mode::AmdWriteBufferSize,
        Mode::AmdWriteBufferGather,
        Mode::AmdWriteBufferConfirm,
        Mode::AmdWriteBufferInProgress,
        Mode::AmdUnlockBypass,
        Mode::AmdUnlockBypassProgram,
        Mode::AmdUnlockBypassReset,
        Mode::AmdUnlockBypassErase,
        Mode::AmdUnlockBypassCommand1,
        Mode::AmdUnlockBypassCommand2,
        Mode::AmdUnlockBypassWriteBufferSize,
        Mode::AmdUnlockBypassWriteBufferGather,
        Mode::AmdUnlockBypassWriteBufferConfirm,
        Mode::AmdUnlockBypassWriteBufferInProgress,
        Mode::AmdUnlockBypassEraseInProgress,
        Mode::AmdLockRegisterCommandSet,
        Mode::AmdLockRegisterBits,
        Mode::AmdLockRegisterExit,
        Mode::AmdPpbCommandSet,
        Mode::AmdPpbProgram,
        Mode::AmdPpbErase,
        Mode::AmdPpbExit,
        Mode::AmdPpbLockCommandSet,
        Mode::AmdPpbLockProgram,
        Mode::AmdPpbLockExit,
        Mode::AmdDybCommandSet,
        Mode::AmdDybWrite,
        Mode::AmdDybExit,
        Mode::IntelReadStatus,
        Mode::IntelReadIdentifierCodes,
        Mode::IntelBlockErase,
        Mode::IntelWordProgram,
        Mode::IntelWriteBufferSize,
        Mode::IntelWriteBufferGather,
        Mode::IntelWriteBufferConfirm,
        Mode::IntelWriteBufferInProgress,
        Mode::IntelLockSetup,
        Mode::IntelLockCommandError,
        Mode::IntelLockDone,
    ];

    /// Stable state name, used in snapshots and the timing model.
    pub fn name(self) -> &'static str {
        match self {
            Mode::ReadArray => "read_array",
            Mode::CfiQuery => "cfi_query",
            Mode::Unknown => "unknown",
            Mode::Unimplemented => "unimplemented",
            Mode::EraseInProgress => "erase_in_progress",
            Mode::ChipEraseInProgress => "chip_erase_in_progress",
            Mode::AmdUnlock1 => "amd_unlock1",
            Mode::AmdUnlock2 => "amd_unlock2",
            Mode::AmdAutoselect => "amd_autoselect",
            Mode::AmdProgram => "amd_program",
            Mode::AmdErase3 => "amd_erase3",
            Mode::AmdErase4 => "amd_erase4",
            Mode::AmdErase5 => "amd_erase5",
            Mode::AmdWriteBufferSize => "amd_write_buffer_size",
            Mode::AmdWriteBufferGather => "amd_write_buffer_gather",
            Mode::AmdWriteBufferConfirm => "amd_write_buffer_confirm",
            Mode::AmdWriteBufferInProgress => "amd_write_buffer_in_progress",
            Mode::AmdUnlockBypass => "amd_unlock_bypass",
            Mode::AmdUnlockBypassProgram => "amd_unlock_bypass_program",
            Mode::AmdUnlockBypassReset => "amd_unlock_bypass_reset",
            Mode::AmdUnlockBypassErase => "amd_unlock_bypass_erase",
            Mode::AmdUnlockBypassCommand1 => "amd_unlock_bypass_command1",
            Mode::AmdUnlockBypassCommand2 => "amd_unlock_bypass_command2",
            Mode::AmdUnlockBypassWriteBufferSize => "amd_unlock_bypass_write_buffer_size",
            Mode::AmdUnlockBypassWriteBufferGather => "amd_unlock_bypass_write_buffer_gather",
            Mode::AmdUnlockBypassWriteBufferConfirm => "amd_unlock_bypass_write_buffer_confirm",
            Mode::AmdUnlockBypassWriteBufferInProgress => {
                "amd_unlock_bypass_write_buffer_in_progress"
            }
            Mode::AmdUnlockBypassEraseInProgress => "amd_unlock_bypass_erase_in_progress",
            Mode::AmdLockRegisterCommandSet => "amd_lock_register_command_set",
            Mode::AmdLockRegisterBits => "amd_lock_register_bits",
            Mode::AmdLockRegisterExit => "amd_lock_register_exit",
            Mode::AmdPpbCommandSet => "amd_non_volatile_command_set",
            Mode::AmdPpbProgram => "amd_non_volatile_program",
            Mode::AmdPpbErase => "amd_non_volatile_erase",
            Mode::AmdPpbExit => "amd_non_volatile_exit",
            Mode::AmdPpbLockCommandSet => "amd_ppb_lock_command_set",
            Mode::AmdPpbLockProgram => "amd_ppb_lock_program",
            Mode::AmdPpbLockExit => "amd_ppb_lock_exit",
            Mode::AmdDybCommandSet => "amd_volatile_command_set",
            Mode::AmdDybWrite => "amd_volatile_write",
            Mode::AmdDybExit => "amd_volatile_exit",
            Mode::IntelReadStatus => "intel_read_status",
            Mode::IntelReadIdentifierCodes => "intel_read_identifier_codes",
            Mode::IntelBlockErase => "intel_block_erase",
            Mode::IntelWordProgram => "intel_word_program",
            Mode::IntelWriteBufferSize => "intel_write_buffer_size",
            Mode::IntelWriteBufferGather => "intel_write_buffer_gather",
            Mode::IntelWriteBufferConfirm => "intel_write_buffer_confirm",
            Mode::IntelWriteBufferInProgress => "intel_write_buffer_in_progress",
            Mode::IntelLockSetup => "intel_lock_setup",
            Mode::IntelLockCommandError => "intel_lock_command_error",
            Mode::IntelLockDone => "intel_lock_done",
        }
    }

    /// Parse a state name. Accepts the canonical snake_case names plus
    /// hyphenated aliases ("read-array").
    pub fn from_name(name: &str) -> Option<Mode> {
        let canonical = name.replace('-', "_");
        Mode::ALL.iter().copied().find(|m| m.name() == canonical)
    }

    /// True for states only reachable under the AMD command set.
    pub fn is_amd(self) -> bool {
        matches!(
            self,
            Mode::AmdUnlock1
                | Mode::AmdUnlock2
                | Mode::AmdAutoselect
                | Mode::AmdProgram
                | Mode::AmdErase3
                | Mode::AmdErase4
                | Mode::AmdErase5
                | Mode::AmdWriteBufferSize
                | Mode::AmdWriteBufferGather
                | Mode::AmdWriteBufferConfirm
                | Mode::AmdWriteBufferInProgress
                | Mode::AmdUnlockBypass
                | Mode::AmdUnlockBypassProgram
                | Mode::AmdUnlockBypassReset
                | Mode::AmdUnlockBypassErase
                | Mode::AmdUnlockBypassCommand1
                | Mode::AmdUnlockBypassCommand2
                | Mode::AmdUnlockBypassWriteBufferSize
                | Mode::AmdUnlockBypassWriteBufferGather
                | Mode::AmdUnlockBypassWriteBufferConfirm
                | Mode::AmdUnlockBypassWriteBufferInProgress
                | Mode::AmdUnlockBypassEraseInProgress
                | Mode::AmdLockRegisterCommandSet
                | Mode::AmdLockRegisterBits
                | Mode::AmdLockRegisterExit
                | Mode::AmdPpbCommandSet
                | Mode::AmdPpbProgram
                | Mode::AmdPpbErase
                | Mode::AmdPpbExit
                | Mode::AmdPpbLockCommandSet
                | Mode::AmdPpbLockProgram
                | Mode::AmdPpbLockExit
                | Mode::AmdDybCommandSet
                | Mode::AmdDybWrite
                | Mode::AmdDybExit
        )
    }

    /// True for states only reachable under the Intel command set.
    pub fn is_intel(self) -> bool {
        matches!(
            self,
            Mode::IntelReadStatus
                | Mode::IntelReadIdentifierCodes
                | Mode::IntelBlockErase
                | Mode::IntelWordProgram
                | Mode::IntelWriteBufferSize
                | Mode::IntelWriteBufferGather
                | Mode::IntelWriteBufferConfirm
                | Mode::IntelWriteBufferInProgress
                | Mode::IntelLockSetup
                | Mode::IntelLockCommandError
                | Mode::IntelLockDone
        )
    }

    /// Mode the chip returns to when a timed operation completes.
    /// `None` means the mode is not a busy state.
    pub fn busy_return(self) -> Option<Mode> {
        match self {
            Mode::EraseInProgress => Some(Mode::ReadArray),
            Mode::ChipEraseInProgress => Some(Mode::ReadArray),
            Mode::AmdWriteBufferInProgress => Some(Mode::ReadArray),
            Mode::AmdUnlockBypassEraseInProgress => Some(Mode::AmdUnlockBypass),
            Mode::AmdUnlockBypassWriteBufferInProgress => Some(Mode::AmdUnlockBypass),
            Mode::IntelWriteBufferInProgress => Some(Mode::IntelReadStatus),
            _ => None,
        }
    }

    /// True while a timed operation is running on the chip.
    pub fn is_busy(self) -> bool {
        self.busy_return().is_some()
    }

    /// States a write-buffer allocation is valid in.
    pub fn holds_write_buffer(self) -> bool {
        matches!(
            self,
            Mode::AmdWriteBufferSize
                | Mode::AmdWriteBufferGather
                | Mode::AmdWriteBufferConfirm
                | Mode::AmdUnlockBypassWriteBufferSize
                | Mode::AmdUnlockBypassWriteBufferGather
                | Mode::AmdUnlockBypassWriteBufferConfirm
                | Mode::IntelWriteBufferSize
                | Mode::IntelWriteBufferGather
                | Mode::IntelWriteBufferConfirm
        )
    }
}

impl core::fmt::Display for Mode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

impl From<Mode> for String {
    fn from(mode: Mode) -> String {
        mode.name().to_owned()
    }
}

impl TryFrom<String> for Mode {
    type Error = String;

    fn try_from(value: String) -> core::result::Result<Self, Self::Error> {
        Mode::from_name(&value).ok_or_else(|| format!("unknown chip mode {:?}", value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for &mode in Mode::ALL {
            assert_eq!(Mode::from_name(mode.name()), Some(mode), "{:?}", mode);
        }
    }

    #[test]
    fn names_are_unique() {
        for &a in Mode::ALL {
            for &b in Mode::ALL {
                if a != b {
                    assert_ne!(a.name(), b.name());
                }
            }
        }
    }

    #[test]
    fn hyphen_alias_accepted() {
        assert_eq!(Mode::from_name("read-array"), Some(Mode::ReadArray));
        assert_eq!(
            Mode::from_name("amd-unlock-bypass-erase-in-progress"),
            Some(Mode::AmdUnlockBypassEraseInProgress)
        );
        assert_eq!(Mode::from_name("no-such-state"), None);
    }

    #[test]
    fn busy_states_return_to_read_modes() {
        for &mode in Mode::ALL {
            if let Some(ret) = mode.busy_return() {
                assert!(!ret.is_busy());
            }
        }
    }

    #[test]
    fn vendor_partition_is_disjoint() {
        for &mode in Mode::ALL {
            assert!(!(mode.is_amd() && mode.is_intel()), "{:?}", mode);
        }
    }
}
