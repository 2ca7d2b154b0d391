//! SPI-attached block device: an SD-card-like command/response state
//! machine backed by a flat sector image on the host.

use crate::peripherals::SpiDevice;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("could not open disk image {path}: {source}")]
    Open { path: String, source: std::io::Error },
}

const SECTOR_BYTES: usize = 512;
const CMD_READ: u8 = 0x51;
const CMD_WRITE: u8 = 0x58;
const FS_MAGIC: u32 = 0x9B1E_A38D;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiskState {
    Command,
    Read,
    Write,
    Writing,
}

pub struct Disk {
    file: Option<File>,
    state: DiskState,
    offset: u32,

    rx_buf: [u8; 6],
    rx_idx: usize,

    tx_buf: [u8; 130],
    tx_cnt: usize,
    tx_idx: usize,

    sector_buf: [u8; SECTOR_BYTES],
    sector_idx: usize,
    write_sector: u32,
    write_crc_remaining: u8,
}

impl Disk {
    /// Opens `path` for read/write, peeking sector 0 for the
    /// filesystem-only magic number to decide the sector-offset bias.
    pub fn open(path: &str) -> Result<Self, DiskError> {
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| DiskError::Open { path: path.to_string(), source })?;

        let mut first_word = [0u8; 4];
        let offset = if file.read_exact(&mut first_word).is_ok()
            && u32::from_le_bytes(first_word) == FS_MAGIC
        {
            0x80002
        } else {
            0
        };
        let _ = file.seek(SeekFrom::Start(0));

        Ok(Disk {
            file: Some(file),
            state: DiskState::Command,
            offset,
            rx_buf: [0; 6],
            rx_idx: 0,
            tx_buf: [0; 130],
            tx_cnt: 0,
            tx_idx: 0,
            sector_buf: [0; SECTOR_BYTES],
            sector_idx: 0,
            write_sector: 0,
            write_crc_remaining: 0,
        })
    }

    fn seek_sector(&mut self, sector: u32) {
        if let Some(file) = &mut self.file {
            let byte = ((sector + self.offset) as u64) * SECTOR_BYTES as u64;
            let _ = file.seek(SeekFrom::Start(byte));
        }
    }

    fn read_sector(&mut self, sector: u32, out: &mut [u8; SECTOR_BYTES]) {
        self.seek_sector(sector);
        if let Some(file) = &mut self.file {
            let _ = file.read_exact(out);
        }
    }

    fn write_sector(&mut self, sector: u32, data: &[u8; SECTOR_BYTES]) {
        self.seek_sector(sector);
        if let Some(file) = &mut self.file {
            let _ = file.write_all(data);
        }
    }

    /// Dispatches the accumulated 6-byte command.
    fn run_command(&mut self) {
        let cmd = self.rx_buf[0];
        let sector = u32::from_be_bytes([
            self.rx_buf[1],
            self.rx_buf[2],
            self.rx_buf[3],
            self.rx_buf[4],
        ]);
        match cmd {
            CMD_READ => {
                let mut data = [0u8; SECTOR_BYTES];
                self.read_sector(sector, &mut data);
                self.tx_buf[0] = 0;
                self.tx_buf[1] = 254;
                self.tx_buf[2..2 + SECTOR_BYTES].copy_from_slice(&data);
                self.tx_cnt = SECTOR_BYTES + 2;
                self.tx_idx = 0;
                self.state = DiskState::Read;
            }
            CMD_WRITE => {
                self.tx_buf[0] = 0;
                self.tx_cnt = 1;
                self.tx_idx = 0;
                self.write_sector = sector;
                self.state = DiskState::Write;
            }
            _ => {
                self.tx_buf[0] = 0;
                self.tx_cnt = 1;
                self.tx_idx = 0;
                self.state = DiskState::Read;
            }
        }
    }
}

impl SpiDevice for Disk {
    fn read_data(&mut self) -> u32 {
        if self.tx_idx < self.tx_cnt {
            self.tx_buf[self.tx_idx] as u32
        } else {
            255
        }
    }

    fn write_data(&mut self, value: u32) {
        let byte = value as u8;
        match self.state {
            DiskState::Command => {
                if byte != 0xFF {
                    self.rx_buf[self.rx_idx] = byte;
                    self.rx_idx += 1;
                    if self.rx_idx == 6 {
                        self.rx_idx = 0;
                        self.run_command();
                    }
                }
            }
            DiskState::Read => {
                if self.tx_idx < self.tx_cnt {
                    self.tx_idx += 1;
                }
                if self.tx_idx >= self.tx_cnt {
                    self.state = DiskState::Command;
                }
            }
            DiskState::Write => {
                if byte == 254 {
                    self.state = DiskState::Writing;
                    self.sector_idx = 0;
                    self.write_crc_remaining = 2;
                }
            }
            DiskState::Writing => {
                if self.sector_idx < SECTOR_BYTES {
                    self.sector_buf[self.sector_idx] = byte;
                    self.sector_idx += 1;
                    if self.sector_idx == SECTOR_BYTES {
                        let sector = self.write_sector;
                        let data = self.sector_buf;
                        self.write_sector(sector, &data);
                    }
                } else if self.write_crc_remaining > 0 {
                    self.write_crc_remaining -= 1;
                    if self.write_crc_remaining == 0 {
                        self.tx_buf[0] = 5;
                        self.tx_cnt = 1;
                        self.tx_idx = 0;
                        self.state = DiskState::Command;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn scratch_disk(bytes: &[u8]) -> (tempfile::NamedTempFile, Disk) {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        let disk = Disk::open(f.path().to_str().unwrap()).unwrap();
        (f, disk)
    }

    /// Reading a filesystem-only image applies the 0x80002 sector bias.
    #[test]
    fn filesystem_image_gets_sector_bias() {
        let mut image = vec![0u8; 512 * 4];
        image[0..4].copy_from_slice(&FS_MAGIC.to_le_bytes());
        let (_f, disk) = scratch_disk(&image);
        assert_eq!(disk.offset, 0x80002);
    }

    #[test]
    fn full_disk_image_has_no_bias() {
        let image = vec![0u8; 512 * 4];
        let (_f, disk) = scratch_disk(&image);
        assert_eq!(disk.offset, 0);
    }

    #[test]
    fn idle_read_returns_high_byte() {
        let image = vec![0u8; 512];
        let (_f, mut disk) = scratch_disk(&image);
        assert_eq!(disk.read_data(), 255);
    }

    #[test]
    fn read_command_fills_response_buffer() {
        let mut image = vec![0u8; SECTOR_BYTES * 2];
        image[SECTOR_BYTES] = 0xAB;
        let (_f, mut disk) = scratch_disk(&image);
        for &b in &[CMD_READ, 0, 0, 0, 1, 0] {
            disk.write_data(b as u32);
        }
        assert_eq!(disk.read_data(), 0);
        disk.write_data(0xFF);
        assert_eq!(disk.read_data(), 254);
        disk.write_data(0xFF);
        assert_eq!(disk.read_data(), 0xAB);
    }
}
