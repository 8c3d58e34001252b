//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u64
pub fn parse_hex_u64(s: &str) -> Result<u64, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u64>().map_err(|e| format!("Invalid number: {}", e))
    }
}

#[derive(Parser)]
#[command(name = "norsim")]
#[command(author, version, about = "Parallel NOR flash command-set simulator", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a device description and print the derived geometry
    Validate {
        /// Device description (RON)
        config: PathBuf,
    },

    /// Replay a bus script against a simulated device
    Run {
        /// Device description (RON)
        config: PathBuf,

        /// Bus script to replay
        script: PathBuf,

        /// Initial flash image; the device comes up erased without one
        #[arg(long)]
        image: Option<PathBuf>,

        /// Write the final flash image to this file
        #[arg(long)]
        save_image: Option<PathBuf>,

        /// Restore a device state snapshot (RON) before the replay
        #[arg(long)]
        state: Option<PathBuf>,

        /// Write a device state snapshot (RON) after the replay
        #[arg(long)]
        save_state: Option<PathBuf>,
    },
}
