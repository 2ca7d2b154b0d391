use oberon_risc::config::Config;
use oberon_risc::disk::Disk;
use oberon_risc::frame::FrameDriver;
use oberon_risc::hostfs::DirHostFs;
use oberon_risc::mmio::Mmio;
use oberon_risc::peripherals::HostFs;
use oberon_risc::risc::Risc;
use std::fs::File;
use std::io::Write;

fn new_machine() -> FrameDriver {
    let config = Config::default();
    let mem = Mmio::new(&config);
    FrameDriver::new(Risc::new(mem))
}

/// A tiny hand-assembled program runs through two single steps and leaves
/// the expected register state, exercising fetch from RAM and the register
/// format's immediate and register operand modes together.
#[test]
fn running_a_small_program_updates_registers() {
    let mut driver = new_machine();
    // MOV R0, #5  (register format, v=1 selects the sign-extended
    // immediate operand, u=0 selects plain load over the flags-word variant)
    let mov_r0_5: u32 = (1 << 28) | (0 << 24) | 5;
    // ADD R1, R0, R0 (register operands, op=Add=8)
    let add_r1_r0_r0: u32 = (8u32 << 16) | (1 << 24) | (0 << 20) | 0;
    driver.cpu.mem.store_word(0, mov_r0_5);
    driver.cpu.mem.store_word(4, add_r1_r0_r0);
    driver.cpu.pc = 0;
    driver.cpu.step();
    driver.cpu.step();
    assert_eq!(driver.cpu.r[0], 5);
    assert_eq!(driver.cpu.r[1], 10);
}

/// A filesystem-only disk image (magic-tagged sector 0) is read back
/// through the SPI command protocol with the 0x80002 sector bias applied.
#[test]
fn disk_scenario_reads_filesystem_image() {
    use std::io::{Seek, SeekFrom};

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("disk.img");
    let marker_sector = 1usize;
    let byte_off = (marker_sector + 0x80002) * 512;

    let mut f = File::create(&path).unwrap();
    f.write_all(&0x9B1E_A38Du32.to_le_bytes()).unwrap();
    f.set_len((byte_off + 512) as u64).unwrap();
    f.seek(SeekFrom::Start(byte_off as u64)).unwrap();
    f.write_all(&[0x42]).unwrap();
    drop(f);

    let mut disk = Disk::open(path.to_str().unwrap()).unwrap();
    use oberon_risc::peripherals::SpiDevice;
    for &b in &[0x51u8, 0, 0, 0, 1, 0] {
        disk.write_data(b as u32);
    }
    assert_eq!(disk.read_data(), 0);
    disk.write_data(0xFF);
    assert_eq!(disk.read_data(), 254);
    disk.write_data(0xFF);
    assert_eq!(disk.read_data(), 0x42);
}

/// Writes inside the framebuffer region grow the damage rectangle, and
/// reading it out resets it to empty.
#[test]
fn damage_rectangle_grows_then_resets() {
    let mut driver = new_machine();
    let base = driver.cpu.mem.display_start;
    driver.cpu.mem.store_word(base, 0xFFFF_FFFF);
    let damage = driver.cpu.mem.take_damage();
    assert!(!damage.is_empty());
    let damage_again = driver.cpu.mem.take_damage();
    assert!(damage_again.is_empty());
}

/// Host-FS enumeration skips tombstones and dotfiles and returns a
/// stable sector per name.
#[test]
fn hostfs_enumerate_skips_hidden_and_tombstoned_entries() {
    let dir = tempfile::tempdir().unwrap();
    File::create(dir.path().join("visible.txt")).unwrap();
    File::create(dir.path().join(".hidden")).unwrap();
    File::create(dir.path().join("~Del~gone_000001")).unwrap();

    let mut bridge = DirHostFs::open(dir.path().to_str().unwrap()).unwrap();
    let mut ram = vec![0u32; 64];
    // EnumerateStart with an empty prefix at offset 0: op word at ram[0],
    // sector result at ram[1], name buffer starting at ram[2].
    ram[0] = 1;
    ram[1] = 0;
    bridge.write(0, &mut ram);
    assert_ne!(ram[1], 0, "expected the visible file to be returned first");
}

/// IRET inside a simulated interrupt entry restores PC and flags.
#[test]
fn interrupt_entry_and_iret_round_trip() {
    let mut driver = new_machine();
    driver.cpu.mem.store_word(4, 0); // MOV R0, R0 at PC=1 (the handler entry point)
    let iret: u32 = (7u32 << 24) | 0x10;
    driver.cpu.mem.store_word(8, iret); // IRET at PC=2
    driver.cpu.pc = 0;
    driver.cpu.e_flag = true;
    driver.cpu.trigger_interrupt();

    driver.cpu.step(); // enters the handler: PC 0 -> 1, runs the MOV, PC -> 2
    assert!(driver.cpu.i_flag);
    assert_eq!(driver.cpu.pc, 2);

    driver.cpu.step(); // runs the IRET at PC 2
    assert!(!driver.cpu.i_flag);
    assert_eq!(driver.cpu.pc, 0);
}
