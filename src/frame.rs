//! Per-tick orchestration: stamp the time, run a cycle batch, optionally
//! raise an interrupt, read out accumulated framebuffer damage.

use crate::damage::Damage;
use crate::peripherals::Signal;
use crate::risc::Risc;

/// Instructions executed per tick before yielding back to the host loop.
const CYCLES_PER_TICK: u32 = 2_000_000;

pub struct FrameDriver {
    pub cpu: Risc,
    start: std::time::Instant,
}

impl FrameDriver {
    pub fn new(cpu: Risc) -> Self {
        FrameDriver { cpu, start: std::time::Instant::now() }
    }

    /// Run one tick: timestamp, instruction batch, optional interrupt,
    /// damage read-out. Returns `Signal::Quit` when the caller should stop
    /// driving the machine (this crate never raises it itself; it exists so
    /// an embedding application's window-close handling composes with the
    /// same enum the peripheral traits use).
    pub fn tick(&mut self, raise_interrupt: bool) -> (Signal, Damage) {
        let elapsed_ms = self.start.elapsed().as_millis() as u32;
        self.cpu.mem.set_time(elapsed_ms);
        self.cpu.run(CYCLES_PER_TICK);
        if raise_interrupt {
            self.cpu.trigger_interrupt();
        }
        let damage = self.cpu.mem.take_damage();
        (Signal::Ok, damage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::mmio::Mmio;

    #[test]
    fn tick_advances_time_and_runs_cycles() {
        let mem = Mmio::new(&Config::default());
        let cpu = Risc::new(mem);
        let mut driver = FrameDriver::new(cpu);
        let (signal, _damage) = driver.tick(false);
        assert!(signal == Signal::Ok);
    }
}
