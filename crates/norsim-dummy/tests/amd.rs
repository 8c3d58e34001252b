//! AMD command-set integration tests: a single x8 chip and an
//! interleaved x8 pair driven through the public bus interface.

use std::collections::HashMap;

use norsim_core::{cfi, FlashConfig, FlashDevice, Mode};
use norsim_dummy::{ManualClock, PinRecorder, SharedRam};

const UNIT: u64 = 0x1000;

fn x8_config() -> FlashConfig {
    FlashConfig {
        interleave: 1,
        bus_width: 8,
        unit_size: vec![UNIT; 4],
        command_set: Some(2),
        manufacturer_id: 0x01,
        device_id: vec![0x7E, 0x28, 0x01],
        ..Default::default()
    }
}

fn build(cfg: FlashConfig) -> (FlashDevice, SharedRam) {
    let size = cfg.unit_size.iter().sum::<u64>() << cfg.interleave.trailing_zeros();
    let ram = SharedRam::new(size as usize);
    let dev = FlashDevice::new("amd0", cfg, Box::new(ram.clone())).unwrap();
    (dev, ram)
}

fn unlock(dev: &mut FlashDevice) {
    dev.write(0x555, &[0xAA]).unwrap();
    dev.write(0x2AA, &[0x55]).unwrap();
}

fn program(dev: &mut FlashDevice, addr: u64, byte: u8) {
    unlock(dev);
    dev.write(0x555, &[0xA0]).unwrap();
    dev.write(addr, &[byte]).unwrap();
}

fn erase_sector(dev: &mut FlashDevice, addr: u64) {
    unlock(dev);
    dev.write(0x555, &[0x80]).unwrap();
    unlock(dev);
    dev.write(addr, &[0x30]).unwrap();
}

fn read_byte(dev: &mut FlashDevice, addr: u64) -> u8 {
    let mut buf = [0u8; 1];
    dev.read(addr, &mut buf).unwrap();
    buf[0]
}

#[test]
fn program_clears_bits_only() {
    let (mut dev, ram) = build(x8_config());
    program(&mut dev, 0x1234, 0x5A);
    assert_eq!(ram.get(0x1234), 0x5A);
    assert_eq!(dev.chip(0).mode, Mode::ReadArray);

    // Programming over existing data can only clear bits.
    program(&mut dev, 0x1234, 0xA5);
    assert_eq!(ram.get(0x1234), 0x00);
    assert_eq!(read_byte(&mut dev, 0x1234), 0x00);
}

#[test]
fn sector_erase_is_local() {
    let (mut dev, ram) = build(x8_config());
    program(&mut dev, 0x1800, 0x00);
    program(&mut dev, 0x2100, 0x00);

    erase_sector(&mut dev, 0x1800);
    assert_eq!(ram.get(0x1800), 0xFF);
    assert_eq!(ram.get(0x2100), 0x00);
    assert_eq!(dev.chip(0).mode, Mode::ReadArray);
}

#[test]
fn chip_erase_covers_everything() {
    let (mut dev, ram) = build(x8_config());
    program(&mut dev, 0x0123, 0x00);
    program(&mut dev, 0x3FFF, 0x00);

    unlock(&mut dev);
    dev.write(0x555, &[0x80]).unwrap();
    unlock(&mut dev);
    dev.write(0x555, &[0x10]).unwrap();

    assert_eq!(ram.get(0x0123), 0xFF);
    assert_eq!(ram.get(0x3FFF), 0xFF);
    assert_eq!(dev.chip(0).mode, Mode::ReadArray);
}

#[test]
fn cfi_query_round_trip() {
    let mut cfg = x8_config();
    cfg.command_set = None;
    cfg.cfi_query = Some(cfi::minimal_table(2, 4 * UNIT));
    let (mut dev, _ram) = build(cfg);

    dev.write(0x55, &[0x98]).unwrap();
    assert_eq!(dev.chip(0).mode, Mode::CfiQuery);
    assert_eq!(read_byte(&mut dev, 0x10), b'Q');
    assert_eq!(read_byte(&mut dev, 0x11), b'R');
    assert_eq!(read_byte(&mut dev, 0x12), b'Y');
    assert_eq!(read_byte(&mut dev, 0x13), 2);
    // Outside the table the chip returns zero.
    assert_eq!(read_byte(&mut dev, 0x05), 0);

    dev.write(0, &[0xF0]).unwrap();
    assert_eq!(dev.chip(0).mode, Mode::ReadArray);
}

#[test]
fn autoselect_reports_identifiers() {
    let (mut dev, _ram) = build(x8_config());
    unlock(&mut dev);
    dev.write(0x555, &[0x90]).unwrap();
    assert_eq!(dev.chip(0).mode, Mode::AmdAutoselect);

    assert_eq!(read_byte(&mut dev, 0x00), 0x01);
    assert_eq!(read_byte(&mut dev, 0x01), 0x7E);
    assert_eq!(read_byte(&mut dev, 0x0E), 0x28);
    assert_eq!(read_byte(&mut dev, 0x0F), 0x01);
    // Unprotected sector reports 0.
    assert_eq!(read_byte(&mut dev, 0x02), 0x00);

    dev.write(0, &[0xF0]).unwrap();
    assert_eq!(dev.chip(0).mode, Mode::ReadArray);
}

#[test]
fn timed_erase_toggles_and_completes() {
    let mut cfg = x8_config();
    cfg.timing_model = HashMap::from([("erase_in_progress".to_string(), 1.0)]);
    let (mut dev, _ram) = build(cfg);
    let clock = ManualClock::new();
    let pin = PinRecorder::new();
    dev.attach_clock(Box::new(clock.clone()));
    dev.connect_busy_signal(0, Box::new(pin.clone()));

    erase_sector(&mut dev, 0);
    assert_eq!(dev.chip(0).mode, Mode::EraseInProgress);
    assert!(pin.level());

    // DQ6 and DQ2 toggle between consecutive status reads.
    let r1 = read_byte(&mut dev, 0);
    let r2 = read_byte(&mut dev, 0);
    assert_eq!(r1 ^ r2, 0x44);

    assert_eq!(clock.advance(0.5), Vec::<usize>::new());
    for chip in clock.advance(1.0) {
        dev.complete_operation(chip);
    }
    assert_eq!(dev.chip(0).mode, Mode::ReadArray);
    assert!(!pin.level());
}

#[test]
fn repeated_sector_erase_rearms_the_wait() {
    let mut cfg = x8_config();
    cfg.timing_model = HashMap::from([("erase_in_progress".to_string(), 1.0)]);
    let (mut dev, ram) = build(cfg);
    let clock = ManualClock::new();
    dev.attach_clock(Box::new(clock.clone()));

    program(&mut dev, 0x1800, 0x00);
    erase_sector(&mut dev, 0);
    assert_eq!(dev.chip(0).mode, Mode::EraseInProgress);

    // Another 0x30 erases its sector too and keeps the chip busy.
    dev.write(0x1800, &[0x30]).unwrap();
    assert_eq!(dev.chip(0).mode, Mode::EraseInProgress);
    assert_eq!(ram.get(0x1800), 0xFF);
    assert_eq!(clock.pending(), 1);

    for chip in clock.advance(2.0) {
        dev.complete_operation(chip);
    }
    assert_eq!(dev.chip(0).mode, Mode::ReadArray);
}

#[test]
fn command_while_busy_completes_early() {
    let mut cfg = x8_config();
    cfg.timing_model = HashMap::from([("erase_in_progress".to_string(), 1.0)]);
    let (mut dev, _ram) = build(cfg);
    let clock = ManualClock::new();
    let pin = PinRecorder::new();
    dev.attach_clock(Box::new(clock.clone()));
    dev.connect_busy_signal(0, Box::new(pin.clone()));

    erase_sector(&mut dev, 0);
    assert!(pin.level());

    // A non-erase command collapses the wait and is then decoded.
    dev.write(0x555, &[0xAA]).unwrap();
    assert_eq!(dev.chip(0).mode, Mode::AmdUnlock1);
    assert!(!pin.level());
    assert_eq!(clock.pending(), 0);
}

#[test]
fn unlock_bypass_programs_without_sequences() {
    let (mut dev, ram) = build(x8_config());
    unlock(&mut dev);
    dev.write(0x555, &[0x20]).unwrap();
    assert_eq!(dev.chip(0).mode, Mode::AmdUnlockBypass);

    dev.write(0, &[0xA0]).unwrap();
    dev.write(0x2000, &[0x3C]).unwrap();
    assert_eq!(ram.get(0x2000), 0x3C);
    assert_eq!(dev.chip(0).mode, Mode::AmdUnlockBypass);

    dev.write(0, &[0x90]).unwrap();
    dev.write(0, &[0x00]).unwrap();
    assert_eq!(dev.chip(0).mode, Mode::ReadArray);
}

#[test]
fn write_buffer_programs_a_run() {
    let (mut dev, ram) = build(x8_config());
    unlock(&mut dev);
    dev.write(0x100, &[0x25]).unwrap();
    // Count is words minus one.
    dev.write(0x100, &[0x03]).unwrap();
    for (i, byte) in [0x11, 0x22, 0x33, 0x44].iter().enumerate() {
        dev.write(0x100 + i as u64, &[*byte]).unwrap();
    }
    dev.write(0x100, &[0x29]).unwrap();

    assert_eq!(ram.extract(0x100, 4), vec![0x11, 0x22, 0x33, 0x44]);
    assert_eq!(dev.chip(0).mode, Mode::ReadArray);
    assert!(dev.chip(0).write_buffer.is_none());
}

#[test]
fn oversized_write_buffer_count_aborts() {
    let (mut dev, _ram) = build(x8_config());
    unlock(&mut dev);
    dev.write(0x100, &[0x25]).unwrap();
    // 0x7F + 1 words exceed the default 64-byte buffer.
    dev.write(0x100, &[0x7F]).unwrap();
    assert_eq!(dev.chip(0).mode, Mode::ReadArray);
    assert!(dev.chip(0).write_buffer.is_none());
}

#[test]
fn dyb_protection_blocks_program_and_erase() {
    let (mut dev, ram) = build(x8_config());
    program(&mut dev, 0x1800, 0x00);

    unlock(&mut dev);
    dev.write(0x555, &[0xE0]).unwrap();
    assert_eq!(dev.chip(0).mode, Mode::AmdDybCommandSet);
    dev.write(0, &[0xA0]).unwrap();
    dev.write(0x1000, &[0x00]).unwrap();
    dev.write(0, &[0x90]).unwrap();
    dev.write(0, &[0x00]).unwrap();
    assert!(!dev.chip(0).units[1].dyb);

    program(&mut dev, 0x1801, 0x00);
    assert_eq!(ram.get(0x1801), 0xFF);
    erase_sector(&mut dev, 0x1000);
    assert_eq!(ram.get(0x1800), 0x00);

    // DYB bits are volatile.
    dev.reset();
    assert!(dev.chip(0).units[1].dyb);
    program(&mut dev, 0x1801, 0x00);
    assert_eq!(ram.get(0x1801), 0x00);
}

#[test]
fn ppb_lock_freezes_ppb_bits() {
    let (mut dev, _ram) = build(x8_config());

    // Protect unit 2 through the non-volatile command set.
    unlock(&mut dev);
    dev.write(0x555, &[0xC0]).unwrap();
    dev.write(0, &[0xA0]).unwrap();
    dev.write(0x2000, &[0x00]).unwrap();
    dev.write(0, &[0x90]).unwrap();
    dev.write(0, &[0x00]).unwrap();
    assert!(!dev.chip(0).units[2].ppb);

    // Program the PPB lock bit; PPB erase is now refused.
    unlock(&mut dev);
    dev.write(0x555, &[0x50]).unwrap();
    dev.write(0, &[0xA0]).unwrap();
    dev.write(0, &[0x00]).unwrap();
    dev.write(0, &[0x90]).unwrap();
    dev.write(0, &[0x00]).unwrap();
    assert!(!dev.chip(0).ppb_lock);

    unlock(&mut dev);
    dev.write(0x555, &[0xC0]).unwrap();
    dev.write(0, &[0x80]).unwrap();
    dev.write(0, &[0x30]).unwrap();
    assert!(!dev.chip(0).units[2].ppb);
}

#[test]
fn lock_register_programs_by_and() {
    let (mut dev, _ram) = build(x8_config());
    unlock(&mut dev);
    dev.write(0x555, &[0x40]).unwrap();
    dev.write(0, &[0xA0]).unwrap();
    dev.write(0, &[0xF7]).unwrap();
    assert_eq!(dev.chip(0).lock_register, 0xFFF7);
    dev.write(0, &[0xA0]).unwrap();
    dev.write(0, &[0x7F]).unwrap();
    assert_eq!(dev.chip(0).lock_register, 0xFF77);
    dev.write(0, &[0x90]).unwrap();
    dev.write(0, &[0x00]).unwrap();
    assert_eq!(dev.chip(0).mode, Mode::ReadArray);
}

#[test]
fn wp_pin_blocks_writes() {
    let (mut dev, ram) = build(x8_config());
    dev.set_wp(true);
    program(&mut dev, 0x40, 0x00);
    assert_eq!(ram.get(0x40), 0xFF);

    dev.set_wp(false);
    program(&mut dev, 0x40, 0x00);
    assert_eq!(ram.get(0x40), 0x00);
}

#[test]
fn strict_mode_latches_unknown() {
    let mut cfg = x8_config();
    cfg.strict_cmd_set = true;
    let (mut dev, _ram) = build(cfg);

    dev.write(0x555, &[0x12]).unwrap();
    assert_eq!(dev.chip(0).mode, Mode::Unknown);
    assert_eq!(read_byte(&mut dev, 0x10), 0x00);

    dev.write(0, &[0xF0]).unwrap();
    assert_eq!(dev.chip(0).mode, Mode::ReadArray);
    assert_eq!(read_byte(&mut dev, 0x10), 0xFF);
}

#[test]
fn lenient_mode_keeps_state_on_violation() {
    let (mut dev, _ram) = build(x8_config());
    dev.write(0x555, &[0xAA]).unwrap();
    dev.write(0x2AA, &[0x12]).unwrap();
    assert_eq!(dev.chip(0).mode, Mode::AmdUnlock1);
}

#[test]
fn ignore_cmd_address_accepts_any_location() {
    let mut cfg = x8_config();
    cfg.amd_ignore_cmd_address = true;
    let (mut dev, ram) = build(cfg);

    dev.write(0x10, &[0xAA]).unwrap();
    dev.write(0x10, &[0x55]).unwrap();
    dev.write(0x10, &[0xA0]).unwrap();
    dev.write(0x3000, &[0x00]).unwrap();
    assert_eq!(ram.get(0x3000), 0x00);
}

// The classic two-chip setup: two x8 chips on a 16-bit bus. Flash
// address 0xAAA presents command address 0x555 to both chips, 0x554
// presents 0x2AA.
#[test]
fn interleaved_pair_chip_erase() {
    let mut cfg = x8_config();
    cfg.interleave = 2;
    cfg.bus_width = 16;
    let (mut dev, ram) = build(cfg);

    // Program a word through both chips first.
    dev.write(0xAAA, &[0xAA, 0xAA]).unwrap();
    dev.write(0x554, &[0x55, 0x55]).unwrap();
    dev.write(0xAAA, &[0xA0, 0xA0]).unwrap();
    dev.write(0x10, &[0x12, 0x34]).unwrap();
    assert_eq!(ram.get(0x10), 0x12);
    assert_eq!(ram.get(0x11), 0x34);

    dev.write(0xAAA, &[0xAA, 0xAA]).unwrap();
    dev.write(0x554, &[0x55, 0x55]).unwrap();
    dev.write(0xAAA, &[0x80, 0x80]).unwrap();
    dev.write(0xAAA, &[0xAA, 0xAA]).unwrap();
    dev.write(0x554, &[0x55, 0x55]).unwrap();
    dev.write(0xAAA, &[0x10, 0x10]).unwrap();

    assert_eq!(dev.chip(0).mode, Mode::ReadArray);
    assert_eq!(dev.chip(1).mode, Mode::ReadArray);
    assert_eq!(ram.get(0x10), 0xFF);
    assert_eq!(ram.get(0x11), 0xFF);
    assert!(ram.extract(0, ram.len()).iter().all(|&b| b == 0xFF));
}

#[test]
fn interleaved_pair_tracks_state_per_chip() {
    let mut cfg = x8_config();
    cfg.interleave = 2;
    cfg.bus_width = 16;
    let (mut dev, ram) = build(cfg);

    // Single-byte writes command only the addressed chip.
    dev.write(0xAAA, &[0xAA]).unwrap();
    assert_eq!(dev.chip(0).mode, Mode::AmdUnlock1);
    assert_eq!(dev.chip(1).mode, Mode::ReadArray);

    dev.write(0x554, &[0x55]).unwrap();
    dev.write(0xAAA, &[0xA0]).unwrap();
    dev.write(0x20, &[0x77]).unwrap();
    assert_eq!(ram.get(0x20), 0x77);
    assert_eq!(ram.get(0x21), 0xFF);
    assert_eq!(dev.chip(0).mode, Mode::ReadArray);
    assert_eq!(dev.chip(1).mode, Mode::ReadArray);
}
