//! Address decoder: RAM / boot ROM / palette / memory-mapped I/O port
//! table, plus the hardware-enumerator protocol exposed through port 60.

use crate::config::Config;
use crate::damage::Damage;
use crate::peripherals::{Clipboard, HostFs, HostTransfer, Led, Serial, SpiDevice};
use std::collections::VecDeque;

pub const ROM_START: usize = 0xFFFF_F800;
pub const ROM_WORDS: usize = 512;
pub const IO_START: usize = 0xFFFF_FFC0;
pub const PALETTE_START: usize = 0xFFFF_FB00;
pub const PALETTE_WORDS: usize = 256;

const DEFAULT_PALETTE: [u32; 16] = [
    0x000000, 0xFFFFFF, 0x888888, 0x717171, 0xF00000, 0x00F000, 0x0000F0, 0xF0F000, 0x00F0F0,
    0xF000F0, 0xFFA500, 0xA52A2A, 0x006400, 0x8B0000, 0x00008B, 0x808080,
];

/// Placeholder boot code wired into the low ROM words; the real Oberon
/// bootloader binary (a disk-loader written in the RISC's own machine
/// code) is not reproduced here, so this is a small reset-to-self
/// stand-in rather than a faithful copy. The three memory-limit/
/// stack-origin patch words below it (`rom[372]`, `rom[373]`, `rom[376]`)
/// are the part of ROM contents this crate actually pins down.
const BOOT_ROM: [u32; 1] = [0];

pub struct Mmio {
    ram: Vec<u8>,
    mem_size: usize,
    rom: [u32; ROM_WORDS],
    palette: [u32; PALETTE_WORDS],

    pub display_start: usize,
    pub damage: Damage,
    span: i32,
    height: i32,

    current_tick: u32,
    switches: u32,
    leds_value: u32,

    mouse: u32,
    key_buf: VecDeque<u8>,

    spi_selected: usize,
    spi: [Option<Box<dyn SpiDevice>>; 4],

    serial: Option<Box<dyn Serial>>,
    clipboard: Option<Box<dyn Clipboard>>,
    led: Option<Box<dyn Led>>,
    hostfs: Option<Box<dyn HostFs>>,
    hosttransfer: Option<Box<dyn HostTransfer>>,

    hwenum_buf: Vec<u32>,
    hwenum_idx: usize,

    debug_buffer: Vec<u8>,
}

impl Mmio {
    pub fn new(config: &Config) -> Self {
        let mem_size = (config.ram_megabytes as usize) << 20;
        let mode = config.modes.first().copied().unwrap_or(crate::config::DisplayMode {
            index: 0,
            width: 1024,
            height: 768,
            depth: 1,
        });
        let span = (mode.width / (32 / mode.depth.max(1))) as i32;
        let height = mode.height as i32;
        let framebuffer_words = (span * height) as usize;
        let display_start = mem_size.saturating_sub(framebuffer_words * 4).max(0);

        let mut rom = [0u32; ROM_WORDS];
        rom[..BOOT_ROM.len()].copy_from_slice(&BOOT_ROM);

        let mem_lim = display_start as u32 - 16;
        let stack_org = display_start as u32 / 2;
        rom[372] = 0x6100_0000 | (mem_lim >> 16);
        rom[373] = 0x4116_0000 | (mem_lim & 0xFFFF);
        rom[376] = 0x6100_0000 | (stack_org >> 16);

        let mut palette = [0u32; PALETTE_WORDS];
        for (i, &c) in DEFAULT_PALETTE.iter().enumerate() {
            palette[i] = c;
        }
        if mode.depth == 8 {
            for i in 16..40 {
                let g = ((i - 15) * 10) as u32;
                palette[i] = g | (g << 8) | (g << 16);
            }
            let mut idx = 40;
            for r in 0..6u32 {
                for g in 0..6u32 {
                    for b in 0..6u32 {
                        if idx >= PALETTE_WORDS {
                            break;
                        }
                        palette[idx] = (r * 0x33) << 16 | (g * 0x33) << 8 | (b * 0x33);
                        idx += 1;
                    }
                }
            }
        }

        Mmio {
            ram: vec![0u8; mem_size],
            mem_size,
            rom,
            palette,
            display_start,
            damage: Damage::empty(span, height),
            span,
            height,
            current_tick: 0,
            switches: 0,
            leds_value: 0,
            mouse: 0,
            key_buf: VecDeque::new(),
            spi_selected: 0,
            spi: [None, None, None, None],
            serial: None,
            clipboard: None,
            led: None,
            hostfs: None,
            hosttransfer: None,
            hwenum_buf: Vec::new(),
            hwenum_idx: 0,
            debug_buffer: Vec::new(),
        }
    }

    pub fn mem_size(&self) -> usize {
        self.mem_size
    }

    pub fn rom_word(&self, idx: usize) -> u32 {
        self.rom[idx]
    }

    pub fn attach_spi(&mut self, slot: usize, device: Box<dyn SpiDevice>) {
        self.spi[slot] = Some(device);
    }
    pub fn attach_serial(&mut self, device: Box<dyn Serial>) {
        self.serial = Some(device);
    }
    pub fn attach_clipboard(&mut self, device: Box<dyn Clipboard>) {
        self.clipboard = Some(device);
    }
    pub fn attach_led(&mut self, device: Box<dyn Led>) {
        self.led = Some(device);
    }
    pub fn attach_hostfs(&mut self, device: Box<dyn HostFs>) {
        self.hostfs = Some(device);
    }
    pub fn attach_hosttransfer(&mut self, device: Box<dyn HostTransfer>) {
        self.hosttransfer = Some(device);
    }

    pub fn set_time(&mut self, tick: u32) {
        self.current_tick = tick;
    }
    pub fn set_switches(&mut self, switches: u32) {
        self.switches = switches;
    }
    pub fn mouse_moved(&mut self, x: u32, y: u32) {
        self.mouse = (self.mouse & !0xFFF) | (x & 0xFFF);
        self.mouse = (self.mouse & !0xFFF000) | ((y & 0xFFF) << 12);
    }
    pub fn mouse_button(&mut self, button: u32, down: bool) {
        let bit = 1 << (27 - button);
        if down {
            self.mouse |= bit;
        } else {
            self.mouse &= !bit;
        }
    }
    pub fn keyboard_input(&mut self, byte: u8) {
        if self.key_buf.len() < 16 {
            self.key_buf.push_back(byte);
        }
    }

    /// Word-aligned RAM load used by `Risc::fetch`; caller guarantees the
    /// address is in range.
    pub fn load_word_aligned(&self, byte_addr: usize) -> u32 {
        self.load_ram_word(byte_addr)
    }

    /// Read-only RAM access for a display front end reading out the
    /// framebuffer; unlike `load_word` this never touches MMIO ports, so
    /// it can't have side effects and doesn't need `&mut self`.
    pub fn peek_word(&self, byte_addr: usize) -> u32 {
        self.load_ram_word(byte_addr)
    }

    fn load_ram_word(&self, byte_addr: usize) -> u32 {
        let a = byte_addr & !3 & (self.mem_size - 1);
        u32::from_le_bytes([self.ram[a], self.ram[a + 1], self.ram[a + 2], self.ram[a + 3]])
    }

    fn store_ram_word(&mut self, byte_addr: usize, value: u32) {
        let a = byte_addr & !3 & (self.mem_size - 1);
        let bytes = value.to_le_bytes();
        self.ram[a..a + 4].copy_from_slice(&bytes);
        self.mark_damage(a);
    }

    fn mark_damage(&mut self, byte_addr: usize) {
        if byte_addr < self.display_start {
            return;
        }
        let word_index = (byte_addr - self.display_start) / 4;
        if self.span == 0 {
            return;
        }
        let row = word_index as i32 / self.span;
        let col = word_index as i32 % self.span;
        self.damage.expand(row, col, self.height);
    }

    pub fn take_damage(&mut self) -> Damage {
        let d = self.damage;
        self.damage = Damage::empty(self.span, self.height);
        d
    }

    pub fn force_full_damage(&mut self) {
        self.damage = Damage::full(self.span, self.height);
    }

    pub fn load_word(&mut self, address: usize) -> u32 {
        if address < self.mem_size {
            self.load_ram_word(address)
        } else if (ROM_START..ROM_START + ROM_WORDS * 4).contains(&address) {
            self.rom[(address - ROM_START) / 4]
        } else if (PALETTE_START..PALETTE_START + PALETTE_WORDS * 4).contains(&address) {
            self.palette[(address - PALETTE_START) / 4]
        } else if address >= IO_START {
            self.load_io(address)
        } else {
            0
        }
    }

    pub fn store_word(&mut self, address: usize, value: u32) {
        if address < self.mem_size {
            self.store_ram_word(address, value);
        } else if (PALETTE_START..PALETTE_START + PALETTE_WORDS * 4).contains(&address) {
            self.palette[(address - PALETTE_START) / 4] = value;
            self.force_full_damage();
        } else if address >= IO_START {
            self.store_io(address, value);
        }
    }

    pub fn load_byte(&mut self, address: usize) -> u8 {
        let word = self.load_word(address & !3);
        let shift = (address & 3) * 8;
        (word >> shift) as u8
    }

    pub fn store_byte(&mut self, address: usize, value: u8) {
        let aligned = address & !3;
        let mut word = self.load_word(aligned);
        let shift = (address & 3) * 8;
        word = (word & !(0xFFu32 << shift)) | ((value as u32) << shift);
        self.store_word(aligned, word);
    }

    fn load_io(&mut self, address: usize) -> u32 {
        let port = address - IO_START;
        match port {
            0 => self.current_tick,
            4 => self.switches,
            8 => {
                if let Some(serial) = &mut self.serial {
                    serial.read_status()
                } else {
                    0
                }
            }
            12 => {
                if let Some(serial) = &mut self.serial {
                    serial.read_data()
                } else {
                    0
                }
            }
            16 => {
                let sel = self.spi_selected;
                if let Some(dev) = &mut self.spi[sel] {
                    dev.read_data()
                } else {
                    0xFF
                }
            }
            20 => self.mouse | (1 << 28),
            24 => self.key_buf.pop_front().map(|b| b as u32).unwrap_or(0),
            28 => if self.key_buf.is_empty() { 0 } else { 1 },
            40 => {
                if let Some(clip) = &mut self.clipboard {
                    clip.read_control()
                } else {
                    0
                }
            }
            44 => {
                if let Some(clip) = &mut self.clipboard {
                    clip.read_data()
                } else {
                    0
                }
            }
            48 => self.rtc_value(),
            60 => self.hwenum_read(),
            _ => 0,
        }
    }

    fn store_io(&mut self, address: usize, value: u32) {
        let port = address - IO_START;
        match port {
            16 => {
                self.spi_selected = (value & 3) as usize;
            }
            20 => {
                if let Some(dev) = &mut self.spi[self.spi_selected] {
                    dev.write_data(value);
                }
            }
            32 => {
                let mut ram_words: Vec<u32> = (0..self.mem_size / 4)
                    .map(|i| self.load_ram_word(i * 4))
                    .collect();
                if let Some(hostfs) = &mut self.hostfs {
                    hostfs.write(value, &mut ram_words);
                }
                if let Some(hosttransfer) = &mut self.hosttransfer {
                    hosttransfer.write(value, &mut ram_words);
                }
                for (i, w) in ram_words.into_iter().enumerate() {
                    self.store_ram_word(i * 4, w);
                }
            }
            36 => {
                let sel = self.spi_selected;
                let mut ram_words: Vec<u32> = (0..self.mem_size / 4)
                    .map(|i| self.load_ram_word(i * 4))
                    .collect();
                if let Some(dev) = &mut self.spi[sel] {
                    dev.paravirtual_write(value, &mut ram_words);
                }
                for (i, w) in ram_words.into_iter().enumerate() {
                    self.store_ram_word(i * 4, w);
                }
            }
            8 => {
                if let Some(serial) = &mut self.serial {
                    serial.write_data(value);
                }
            }
            40 => {
                if let Some(clip) = &mut self.clipboard {
                    clip.write_control(value);
                }
            }
            44 => {
                if let Some(clip) = &mut self.clipboard {
                    clip.write_data(value);
                }
            }
            52 => {
                if let Some(led) = &mut self.led {
                    led.write(value);
                }
                self.leds_value = value;
            }
            56 => {
                // Debug console: flush the accumulated line at newline or
                // once the buffer hits its 512-byte cap.
                let b = value as u8;
                self.debug_buffer.push(b);
                if b == b'\n' || self.debug_buffer.len() >= 512 {
                    if let Ok(s) = std::str::from_utf8(&self.debug_buffer) {
                        print!("{}", s);
                    }
                    self.debug_buffer.clear();
                }
            }
            60 => self.hwenum_request(value),
            _ => {}
        }
    }

    fn rtc_value(&self) -> u32 {
        use chrono::{Datelike, Local, Timelike};
        let now = Local::now();
        let year = (now.year() % 100) as u32;
        let month = now.month();
        let day = now.day();
        let hour = now.hour();
        let minute = now.minute();
        let second = now.second();
        (((year * 16 + month) * 32 + day) * 32 + hour) * 64 * 64 + minute * 64 + second
    }

    /// Port-60 write: select which hardware-enumerator record to build.
    fn hwenum_request(&mut self, tag: u32) {
        self.hwenum_idx = 0;
        self.hwenum_buf.clear();
        let push_id = |buf: &mut Vec<u32>, id: [u8; 4]| {
            buf.push(u32::from_le_bytes(id));
        };
        match tag {
            0 => {
                push_id(&mut self.hwenum_buf, *b"mVid");
                self.hwenum_buf.push(self.span as u32 * 32 / self.height.max(1) as u32);
                self.hwenum_buf.push(self.height as u32);
                self.hwenum_buf.push((IO_START - 16) as u32);
            }
            1 => {
                push_id(&mut self.hwenum_buf, *b"Timr");
                self.hwenum_buf.push((IO_START) as u32);
            }
            2 => {
                push_id(&mut self.hwenum_buf, *b"Swtc");
                self.hwenum_buf.push((IO_START + 4) as u32);
            }
            3 => {
                push_id(&mut self.hwenum_buf, *b"LEDs");
                self.hwenum_buf.push((IO_START + 52) as u32);
            }
            4 => {
                push_id(&mut self.hwenum_buf, *b"MsKb");
                self.hwenum_buf.push((IO_START + 20) as u32);
                self.hwenum_buf.push((IO_START + 24) as u32);
            }
            5 => {
                push_id(&mut self.hwenum_buf, *b"HsFs");
                self.hwenum_buf.push((IO_START + 32) as u32);
            }
            6 => {
                push_id(&mut self.hwenum_buf, *b"vHTx");
                self.hwenum_buf.push((IO_START + 32) as u32);
            }
            7 => {
                push_id(&mut self.hwenum_buf, *b"vDsk");
                self.hwenum_buf.push((IO_START + 36) as u32);
            }
            8 => {
                push_id(&mut self.hwenum_buf, *b"DbgC");
                self.hwenum_buf.push((IO_START + 56) as u32);
            }
            9 => {
                push_id(&mut self.hwenum_buf, *b"vRTC");
                self.hwenum_buf.push((IO_START + 48) as u32);
            }
            _ => {
                push_id(&mut self.hwenum_buf, *b"Rset");
            }
        }
    }

    fn hwenum_read(&mut self) -> u32 {
        if self.hwenum_idx < self.hwenum_buf.len() {
            let v = self.hwenum_buf[self.hwenum_idx];
            self.hwenum_idx += 1;
            v
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn ram_round_trips_a_word() {
        let mut mem = Mmio::new(&Config::default());
        mem.store_word(100, 0xDEAD_BEEF);
        assert_eq!(mem.load_word(100), 0xDEAD_BEEF);
    }

    #[test]
    fn byte_store_preserves_neighbors() {
        let mut mem = Mmio::new(&Config::default());
        mem.store_word(200, 0x1122_3344);
        mem.store_byte(201, 0xAA);
        let w = mem.load_word(200);
        assert_eq!(w & 0xFF00, 0xAA00);
        assert_eq!(w & 0xFF, 0x44);
        assert_eq!(w & 0xFF00_0000, 0x1100_0000);
    }

    /// Writing inside the framebuffer region expands the damage rect.
    #[test]
    fn framebuffer_write_expands_damage() {
        let mut mem = Mmio::new(&Config::default());
        mem.damage = Damage::empty(mem.span, mem.height);
        let addr = mem.display_start;
        mem.store_word(addr, 0xFFFF_FFFF);
        assert!(!mem.damage.is_empty());
    }

    #[test]
    fn palette_write_forces_full_damage() {
        let mut mem = Mmio::new(&Config::default());
        mem.damage = Damage::empty(mem.span, mem.height);
        mem.store_word(PALETTE_START, 0x0);
        assert_eq!(mem.damage, Damage::full(mem.span, mem.height));
    }

    #[test]
    fn unmapped_read_returns_zero() {
        let mut mem = Mmio::new(&Config::default());
        assert_eq!(mem.load_io(0x1234), 0);
    }
}
