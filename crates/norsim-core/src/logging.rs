//! Log groups
//!
//! Every log statement in the decoders is tagged with the set of
//! functional groups it belongs to, so a host can filter flash traffic
//! by concern (command decoding vs. lock handling vs. raw reads).
//! Groups are bitwise - a single statement may belong to several.

use bitflags::bitflags;

bitflags! {
    /// Functional log groups for flash model messages
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LogGroups: u32 {
        /// Data reads and read dispatch
        const READ         = 1 << 0;
        /// Data writes and program operations
        const WRITE        = 1 << 1;
        /// Command-byte decoding
        const COMMAND      = 1 << 2;
        /// Lock, protection and PPB/DYB handling
        const LOCK         = 1 << 3;
        /// Sector and chip erase
        const ERASE        = 1 << 4;
        /// State machine transitions
        const STATE        = 1 << 5;
        /// Write-buffer gather/confirm handling
        const WRITE_BUFFER = 1 << 6;
        /// CFI query handling
        const CFI          = 1 << 7;
        /// Everything else
        const OTHER        = 1 << 8;
    }
}

impl core::fmt::Display for LogGroups {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        const NAMES: &[(LogGroups, &str)] = &[
            (LogGroups::READ, "read"),
            (LogGroups::WRITE, "write"),
            (LogGroups::COMMAND, "command"),
            (LogGroups::LOCK, "lock"),
            (LogGroups::ERASE, "erase"),
            (LogGroups::STATE, "state"),
            (LogGroups::WRITE_BUFFER, "write-buffer"),
            (LogGroups::CFI, "cfi"),
            (LogGroups::OTHER, "other"),
        ];
        let mut first = true;
        for (group, name) in NAMES {
            if self.contains(*group) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        if first {
            write!(f, "none")?;
        }
        Ok(())
    }
}
