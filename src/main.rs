//! norsim - Parallel NOR flash command-set simulator
//!
//! Loads a device description, builds a simulated flash device over an
//! in-memory image and replays a bus script against it. The simulation
//! engine lives in `norsim-core`; this binary only wires it to files
//! and a manually advanced clock.

mod cli;
mod script;

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use norsim_core::{DeviceState, FlashConfig, FlashDevice};
use norsim_dummy::{ManualClock, SharedRam};

use cli::{Cli, Commands};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.verbose {
        0 => {}
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    match cli.command {
        Commands::Validate { config } => validate(&config),
        Commands::Run {
            config,
            script,
            image,
            save_image,
            state,
            save_state,
        } => run(&config, &script, image, save_image, state, save_state),
    }
}

fn load_config(path: &Path) -> Result<FlashConfig, Box<dyn std::error::Error>> {
    let text = fs::read_to_string(path)?;
    Ok(ron::from_str(&text)?)
}

fn validate(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = load_config(path)?;
    let (geo, vendor) = cfg.validate()?;
    println!("command set:  {:?}", vendor);
    println!("chips:        {}", geo.chips());
    println!("bus width:    {} bits", geo.bus_bytes * 8);
    println!("chip width:   {} bits", geo.chip_bytes * 8);
    println!("chip size:    {:#x} bytes", geo.chip_size);
    println!("device size:  {:#x} bytes", geo.device_size);
    Ok(())
}

fn run(
    config: &Path,
    script_path: &Path,
    image: Option<PathBuf>,
    save_image: Option<PathBuf>,
    state: Option<PathBuf>,
    save_state: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = load_config(config)?;
    let (geo, _) = cfg.validate()?;

    let ram = SharedRam::new(geo.device_size as usize);
    if let Some(path) = image {
        let data = fs::read(&path)?;
        if data.len() as u64 > geo.device_size {
            return Err(format!(
                "image {} is {:#x} bytes, device holds {:#x}",
                path.display(),
                data.len(),
                geo.device_size
            )
            .into());
        }
        ram.load(0, &data);
    }

    let mut dev = FlashDevice::new("flash0", cfg, Box::new(ram.clone()))?;
    let clock = ManualClock::new();
    dev.attach_clock(Box::new(clock.clone()));

    if let Some(path) = state {
        let snapshot: DeviceState = ron::from_str(&fs::read_to_string(path)?)?;
        dev.restore_state(&snapshot)?;
    }

    let text = fs::read_to_string(script_path)?;
    script::replay(&mut dev, &clock, &text)?;

    if let Some(path) = save_state {
        let snapshot = dev.save_state();
        fs::write(
            path,
            ron::ser::to_string_pretty(&snapshot, ron::ser::PrettyConfig::default())?,
        )?;
    }
    if let Some(path) = save_image {
        fs::write(path, ram.extract(0, geo.device_size as usize))?;
    }
    Ok(())
}
