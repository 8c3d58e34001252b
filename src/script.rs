//! Bus script parsing and replay
//!
//! Scripts are plain text, one operation per line, `#` starts a
//! comment:
//!
//! ```text
//! write 0xAAA 0xAA      # bus write, one byte per argument
//! read 0x0 16           # bus read, prints the bytes
//! advance 0.5           # advance simulated time, deliver completions
//! wp on                 # drive the write-protect pin
//! reset                 # hard reset
//! ```

use norsim_core::FlashDevice;
use norsim_dummy::ManualClock;
use thiserror::Error;

use crate::cli::parse_hex_u64;

/// Script replay failure, tagged with the offending line number.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The line could not be parsed
    #[error("line {line}: {msg}")]
    Parse {
        /// 1-based line number
        line: usize,
        /// What went wrong
        msg: String,
    },

    /// The device rejected the operation
    #[error("line {line}: {source}")]
    Device {
        /// 1-based line number
        line: usize,
        /// Device error
        #[source]
        source: norsim_core::Error,
    },
}

/// Replay a whole script against the device.
pub fn replay(dev: &mut FlashDevice, clock: &ManualClock, text: &str) -> Result<(), ScriptError> {
    for (i, raw) in text.lines().enumerate() {
        let line = i + 1;
        let stripped = raw.split('#').next().unwrap_or("").trim();
        if stripped.is_empty() {
            continue;
        }
        run_line(dev, clock, stripped, line)?;
    }
    Ok(())
}

fn run_line(
    dev: &mut FlashDevice,
    clock: &ManualClock,
    stripped: &str,
    line: usize,
) -> Result<(), ScriptError> {
    let parse = |msg: String| ScriptError::Parse { line, msg };
    let mut parts = stripped.split_whitespace();
    let verb = parts.next().unwrap_or("");
    match verb {
        "write" => {
            let addr = parts
                .next()
                .ok_or_else(|| parse("write needs an address".into()))
                .and_then(|s| parse_hex_u64(s).map_err(&parse))?;
            let data = parts
                .map(|s| {
                    parse_hex_u64(s).and_then(|v| {
                        u8::try_from(v).map_err(|_| format!("byte {:#x} out of range", v))
                    })
                })
                .collect::<Result<Vec<u8>, _>>()
                .map_err(&parse)?;
            if data.is_empty() {
                return Err(parse("write needs at least one data byte".into()));
            }
            dev.write(addr, &data)
                .map_err(|source| ScriptError::Device { line, source })
        }
        "read" => {
            let addr = parts
                .next()
                .ok_or_else(|| parse("read needs an address".into()))
                .and_then(|s| parse_hex_u64(s).map_err(&parse))?;
            let len = parts
                .next()
                .ok_or_else(|| parse("read needs a length".into()))
                .and_then(|s| parse_hex_u64(s).map_err(&parse))?;
            let mut buf = vec![0u8; len as usize];
            dev.read(addr, &mut buf)
                .map_err(|source| ScriptError::Device { line, source })?;
            let hex: Vec<String> = buf.iter().map(|b| format!("{:02x}", b)).collect();
            println!("read {:#x}: {}", addr, hex.join(" "));
            Ok(())
        }
        "advance" => {
            let secs: f64 = parts
                .next()
                .ok_or_else(|| parse("advance needs a duration in seconds".into()))?
                .parse()
                .map_err(|e| parse(format!("invalid duration: {}", e)))?;
            for chip in clock.advance(secs) {
                dev.complete_operation(chip);
            }
            Ok(())
        }
        "wp" => match parts.next() {
            Some("on") => {
                dev.set_wp(true);
                Ok(())
            }
            Some("off") => {
                dev.set_wp(false);
                Ok(())
            }
            _ => Err(parse("wp needs 'on' or 'off'".into())),
        },
        "reset" => {
            dev.reset();
            Ok(())
        }
        other => Err(parse(format!("unknown operation '{}'", other))),
    }
}
