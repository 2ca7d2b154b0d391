//! Demo driver binary: wires `Risc`/`Mmio` up to a `minifb` window and an
//! optional disk image / host-filesystem directory given as command-line
//! positional arguments (argument *parsing* is out of scope here, just
//! `std::env::args` reading, per `Config`'s doc comment).

use anyhow::{Context, Result};
use minifb::{Key, Window, WindowOptions};
use oberon_risc::config::Config;
use oberon_risc::disk::Disk;
use oberon_risc::frame::FrameDriver;
use oberon_risc::hostfs::DirHostFs;
use oberon_risc::mmio::Mmio;
use oberon_risc::peripherals::Signal;
use oberon_risc::risc::Risc;
use std::sync::mpsc;
use std::time::Duration;

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let ram_megabytes: u32 = args.next().map(|s| s.parse().unwrap_or(1)).unwrap_or(1);
    let disk_image = args.next();
    let hostfs_dir = args.next();

    let config = Config::default().with_ram_megabytes(ram_megabytes)?;
    let mode = config.modes[0];
    let mut mem = Mmio::new(&config);

    if let Some(path) = &disk_image {
        let disk = Disk::open(path).with_context(|| format!("opening disk image {path}"))?;
        mem.attach_spi(0, Box::new(disk));
    }
    if let Some(dir) = &hostfs_dir {
        let bridge = DirHostFs::open(dir).with_context(|| format!("opening host fs dir {dir}"))?;
        mem.attach_hostfs(Box::new(bridge));
    }

    let cpu = Risc::new(mem);
    let mut driver = FrameDriver::new(cpu);

    let mut window = Window::new(
        "Oberon RISC - ESC to exit",
        mode.width as usize,
        mode.height as usize,
        WindowOptions::default(),
    )
    .with_context(|| "opening display window")?;

    let (tick_tx, tick_rx) = mpsc::channel::<()>();
    let timer = timer::Timer::new();
    let _guard = timer.schedule_repeating(chrono::Duration::milliseconds(20), move || {
        let _ = tick_tx.send(());
    });

    let mut screen = vec![0u32; (mode.width * mode.height) as usize];

    while window.is_open() && !window.is_key_down(Key::Escape) {
        if tick_rx.recv_timeout(Duration::from_millis(50)).is_ok() {
            let (signal, damage) = driver.tick(false);
            if signal == Signal::Quit {
                break;
            }
            if !damage.is_empty() {
                render(&driver, &mut screen, mode.width as usize, mode.depth);
            }
            window
                .update_with_buffer(&screen, mode.width as usize, mode.height as usize)
                .with_context(|| "updating display buffer")?;
        }
    }
    Ok(())
}

/// Unpack the 1/4/8-bit-per-pixel framebuffer into a 32-bit RGB buffer for
/// `minifb`, generalized over the display mode's configured bit depth.
fn render(driver: &FrameDriver, screen: &mut [u32], width: usize, depth: u32) {
    let pixels_per_word = 32 / depth.max(1);
    let span = width / pixels_per_word as usize;
    let base = driver.cpu.mem.display_start;
    let height = screen.len() / width;

    for row in 0..height {
        for col in 0..span {
            let addr = base + (row * span + col) * 4;
            let word = driver.cpu.mem.peek_word(addr);
            for p in 0..pixels_per_word {
                let x = col * pixels_per_word as usize + p as usize;
                if x >= width {
                    break;
                }
                let value = (word >> (p * depth)) & ((1 << depth) - 1);
                screen[row * width + x] = gray(value, depth);
            }
        }
    }
}

fn gray(value: u32, depth: u32) -> u32 {
    if depth == 1 {
        if value == 0 {
            0x00_00_00
        } else {
            0xFF_FF_FF
        }
    } else {
        let scale = 255 / ((1u32 << depth) - 1).max(1);
        let v = value * scale;
        (v << 16) | (v << 8) | v
    }
}
