//! Narrow capability traits for the machine's external collaborators:
//! serial line, SPI bus, clipboard, LEDs, and the host filesystem bridge.
//! Each is a small trait a `Box<dyn Trait>` can hold, rather than a single
//! shared struct of callbacks.

use std::mem::discriminant;

/// Outcome of driving a peripheral for one tick.
pub enum Signal {
    Ok,
    Quit,
    NoOp,
}

impl PartialEq for Signal {
    fn eq(&self, other: &Signal) -> bool {
        discriminant(self) == discriminant(other)
    }
}

impl Signal {
    pub fn add(&mut self, rhs: &Self) {
        match rhs {
            Self::Quit => *self = Self::Quit,
            Self::NoOp => {
                if *self != Self::Quit {
                    *self = Self::NoOp;
                }
            }
            Self::Ok => {}
        }
    }
}

/// A raw serial port: status byte, data byte, write side.
pub trait Serial {
    fn read_status(&mut self) -> u32;
    fn read_data(&mut self) -> u32;
    fn write_data(&mut self, value: u32);
}

/// An SPI-attached peripheral selected through the SPI port table.
/// `paravirtual_write` is a fast-path extension some devices (the
/// paravirtualized disk) support in addition to ordinary byte-at-a-time
/// SPI shifting; devices that don't support it keep the default no-op.
pub trait SpiDevice {
    fn read_data(&mut self) -> u32;
    fn write_data(&mut self, value: u32);
    fn paravirtual_write(&mut self, _value: u32, _ram: &mut [u32]) {}
}

/// Host clipboard bridge.
pub trait Clipboard {
    fn write_control(&mut self, value: u32);
    fn read_control(&mut self) -> u32;
    fn write_data(&mut self, value: u32);
    fn read_data(&mut self) -> u32;
}

/// Front-panel LEDs.
pub trait Led {
    fn write(&mut self, value: u32);
}

/// Host-filesystem bridge accessed through the paravirtual FS port.
pub trait HostFs {
    fn write(&mut self, value: u32, ram: &mut [u32]);
}

/// Host network/transfer bridge accessed through the paravirtual transfer
/// port.
pub trait HostTransfer {
    fn write(&mut self, value: u32, ram: &mut [u32]);
}
