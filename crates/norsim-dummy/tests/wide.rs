//! Wide-bus integration tests: two interleaved x16 chips on a 32-bit
//! bus. The chip-local offsets of the second chip carry a skew on this
//! geometry, so these cover the address mapping and the strided slow
//! paths that the x8 suites never reach.

use norsim_core::{FlashConfig, FlashDevice, Mode};
use norsim_dummy::SharedRam;

const UNIT: u64 = 0x1000;

fn x16_pair_config() -> FlashConfig {
    FlashConfig {
        interleave: 2,
        bus_width: 32,
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
    let dev = FlashDevice::new("wide0", cfg, Box::new(ram.clone())).unwrap();
    (dev, ram)
}

// Flash address 0x1554 presents command address 0x555 to both chips,
// 0xAA8 presents 0x2AA. Chip 1 alone is reached with 2-byte writes at
// the +2 bus positions.
fn unlock_both(dev: &mut FlashDevice) {
    dev.write(0x1554, &[0xAA; 4]).unwrap();
    dev.write(0xAA8, &[0x55; 4]).unwrap();
}

fn unlock_chip0(dev: &mut FlashDevice) {
    dev.write(0x1554, &[0xAA; 2]).unwrap();
    dev.write(0xAA8, &[0x55; 2]).unwrap();
}

fn unlock_chip1(dev: &mut FlashDevice) {
    dev.write(0x1556, &[0xAA; 2]).unwrap();
    dev.write(0xAAA, &[0x55; 2]).unwrap();
}

fn program_both(dev: &mut FlashDevice, addr: u64, data: [u8; 4]) {
    unlock_both(dev);
    dev.write(0x1554, &[0xA0; 4]).unwrap();
    dev.write(addr, &data).unwrap();
}

#[test]
fn chip1_program_lands_at_written_address() {
    let (mut dev, ram) = build(x16_pair_config());

    // A 2-byte access addresses chip 1 only, so the program takes the
    // strided slow path.
    unlock_chip1(&mut dev);
    dev.write(0x1556, &[0xA0, 0xA0]).unwrap();
    dev.write(2, &[0x00, 0x00]).unwrap();

    assert_eq!(ram.get(2), 0x00);
    assert_eq!(ram.get(3), 0x00);
    assert_eq!(ram.get(0), 0xFF);
    assert_eq!(ram.get(4), 0xFF);
    assert_eq!(dev.chip(0).mode, Mode::ReadArray);
    assert_eq!(dev.chip(1).mode, Mode::ReadArray);
}

#[test]
fn bus_wide_program_reads_back_interleaved() {
    let (mut dev, ram) = build(x16_pair_config());
    program_both(&mut dev, 0x10, [0x12, 0x34, 0x56, 0x78]);

    // Chip 0 holds the low half of the line, chip 1 the high half.
    assert_eq!(ram.get(0x10), 0x12);
    assert_eq!(ram.get(0x11), 0x34);
    assert_eq!(ram.get(0x12), 0x56);
    assert_eq!(ram.get(0x13), 0x78);

    let mut buf = [0u8; 4];
    dev.read(0x10, &mut buf).unwrap();
    assert_eq!(buf, [0x12, 0x34, 0x56, 0x78]);
}

#[test]
fn sector_erase_strides_around_protected_chip() {
    let (mut dev, ram) = build(x16_pair_config());
    program_both(&mut dev, 0x20, [0x00; 4]);
    program_both(&mut dev, 0x2020, [0x00; 4]);

    // Protect chip 1's first unit through its DYB.
    unlock_chip1(&mut dev);
    dev.write(0x1556, &[0xE0, 0xE0]).unwrap();
    dev.write(2, &[0xA0, 0xA0]).unwrap();
    dev.write(2, &[0x00, 0x00]).unwrap();
    dev.write(2, &[0x90, 0x90]).unwrap();
    dev.write(2, &[0x00, 0x00]).unwrap();
    assert!(!dev.chip(1).units[0].dyb);

    // A bus-wide sector erase of the first unit erases chip 0 only;
    // the non-uniform protection forces the strided fill.
    unlock_both(&mut dev);
    dev.write(0x1554, &[0x80; 4]).unwrap();
    unlock_both(&mut dev);
    dev.write(0x20, &[0x30; 4]).unwrap();

    assert_eq!(ram.get(0x20), 0xFF);
    assert_eq!(ram.get(0x21), 0xFF);
    assert_eq!(ram.get(0x22), 0x00);
    assert_eq!(ram.get(0x23), 0x00);
    // Chip 0's fill covers its whole unit and nothing past it.
    assert_eq!(ram.get(0x1FFC), 0xFF);
    assert_eq!(ram.get(0x2020), 0x00);
    assert_eq!(ram.get(0x2022), 0x00);
    assert_eq!(dev.chip(0).mode, Mode::ReadArray);
    assert_eq!(dev.chip(1).mode, Mode::ReadArray);
}

#[test]
fn sector_erase_strides_on_the_skewed_chip() {
    let (mut dev, ram) = build(x16_pair_config());
    program_both(&mut dev, 0x20, [0x00; 4]);
    program_both(&mut dev, 0x2020, [0x00; 4]);

    // Protect chip 0's first unit so chip 1, whose chunk offsets carry
    // the interleave skew, takes the strided fill.
    unlock_chip0(&mut dev);
    dev.write(0x1554, &[0xE0, 0xE0]).unwrap();
    dev.write(0, &[0xA0, 0xA0]).unwrap();
    dev.write(0, &[0x00, 0x00]).unwrap();
    dev.write(0, &[0x90, 0x90]).unwrap();
    dev.write(0, &[0x00, 0x00]).unwrap();
    assert!(!dev.chip(0).units[0].dyb);

    unlock_both(&mut dev);
    dev.write(0x1554, &[0x80; 4]).unwrap();
    unlock_both(&mut dev);
    dev.write(0x20, &[0x30; 4]).unwrap();

    assert_eq!(ram.get(0x20), 0x00);
    assert_eq!(ram.get(0x21), 0x00);
    assert_eq!(ram.get(0x22), 0xFF);
    assert_eq!(ram.get(0x23), 0xFF);
    // Chip 1's fill reaches the last chunk of its unit and no further.
    assert_eq!(ram.get(0x1FFE), 0xFF);
    assert_eq!(ram.get(0x2022), 0x00);
    assert_eq!(dev.chip(0).mode, Mode::ReadArray);
    assert_eq!(dev.chip(1).mode, Mode::ReadArray);
}
