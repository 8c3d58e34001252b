//! CFI query table handling
//!
//! The configured table is the byte array a real chip would return for
//! query addresses 0x10 and up: "QRY", the primary command-set id, the
//! geometry block. Reads below 0x10 or past the end of the table return
//! zero. Validation cross-checks the declared device size against the
//! configured unit list and extracts the command-set id.

use crate::error::ConfigError;

/// First query address covered by the table ('Q' of "QRY").
pub const QUERY_BASE: u64 = 0x10;

/// Table index of the primary command-set id (query address 0x13, LE u16).
const IDX_COMMAND_SET: usize = 0x03;
/// Table index of the device size byte (query address 0x27, log2 bytes).
const IDX_DEVICE_SIZE: usize = 0x17;

/// Read one CFI byte at a chip command address.
pub fn read(table: Option<&[u8]>, cmd_addr: u64) -> u8 {
    let Some(table) = table else { return 0 };
    cmd_addr
        .checked_sub(QUERY_BASE)
        .and_then(|idx| table.get(idx as usize).copied())
        .unwrap_or(0)
}

/// Validate a configured CFI table against the unit list.
///
/// Returns the primary command-set id when the table declares one.
pub fn validate(table: &[u8], chip_size: u64) -> Result<Option<u8>, ConfigError> {
    if table.len() < 3 || &table[..3] != b"QRY" {
        return Err(ConfigError::InvalidCfi(
            "table does not start with the QRY signature".into(),
        ));
    }

    if let Some(&size_log2) = table.get(IDX_DEVICE_SIZE) {
        let declared = 1u64.checked_shl(size_log2.into()).unwrap_or(0);
        if declared != chip_size {
            return Err(ConfigError::InvalidCfi(format!(
                "declared device size 2^{} does not match unit list total {:#x}",
                size_log2, chip_size
            )));
        }
    }

    let id = match (table.get(IDX_COMMAND_SET), table.get(IDX_COMMAND_SET + 1)) {
        (Some(&lo), Some(&hi)) => u16::from_le_bytes([lo, hi]),
        _ => 0,
    };
    match id {
        0 => Ok(None),
        1..=4 => Ok(Some(id as u8)),
        other => Err(ConfigError::InvalidCfi(format!(
            "unsupported primary command set id {:#x}",
            other
        ))),
    }
}

/// Build a minimal valid query table for a uniform chip.
///
/// Useful for tests and demo configurations; real chips ship far larger
/// tables, which can be configured verbatim instead.
pub fn minimal_table(command_set: u8, chip_size: u64) -> Vec<u8> {
    assert!(chip_size.is_power_of_two(), "CFI declares sizes as 2^n");
    let mut table = vec![0u8; 0x20];
    table[..3].copy_from_slice(b"QRY");
    table[IDX_COMMAND_SET] = command_set;
    table[IDX_DEVICE_SIZE] = chip_size.trailing_zeros() as u8;
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_table_validates() {
        let table = minimal_table(2, 0x10000);
        assert_eq!(validate(&table, 0x10000).unwrap(), Some(2));
    }

    #[test]
    fn size_mismatch_rejected() {
        let table = minimal_table(2, 0x10000);
        assert!(validate(&table, 0x8000).is_err());
    }

    #[test]
    fn missing_signature_rejected() {
        assert!(validate(&[0u8; 0x20], 0x10000).is_err());
    }

    #[test]
    fn reads_map_from_query_base() {
        let table = minimal_table(1, 0x10000);
        assert_eq!(read(Some(&table), 0x10), b'Q');
        assert_eq!(read(Some(&table), 0x12), b'Y');
        assert_eq!(read(Some(&table), 0x13), 1);
        assert_eq!(read(Some(&table), 0x27), 16);
        assert_eq!(read(Some(&table), 0x0F), 0);
        assert_eq!(read(Some(&table), 0x1000), 0);
        assert_eq!(read(None, 0x10), 0);
    }
}
