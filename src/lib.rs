pub mod config;
pub mod damage;
pub mod disk;
pub mod fp;
pub mod frame;
pub mod hostfs;
pub mod mmio;
pub mod peripherals;
pub mod risc;
