//! Directory-backed host filesystem bridge: a guest "sector number" stands
//! in for a file handle, stably mapped to a slot in an append-mostly table
//! so that repeated searches for the same name return the same number
//! across a session.

use crate::peripherals::HostFs;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

const SECTOR_MAGIC: u32 = 290_000_000;

const OP_SEARCH: u32 = 0;
const OP_ENUMERATE_START: u32 = 1;
const OP_ENUMERATE_NEXT: u32 = 2;
const OP_GET_ATTRIBUTES: u32 = 3;
const OP_INSERT: u32 = 4;
const OP_DELETE: u32 = 5;
const OP_NEW: u32 = 6;
const OP_READ_BUF: u32 = 7;
const OP_WRITE_BUF: u32 = 8;

struct Slot {
    name: String,
    full_path: PathBuf,
}

pub struct DirHostFs {
    dir: PathBuf,
    slots: Vec<Slot>,
    enum_prefix: String,
    enum_cursor: usize,
    /// Directory listing snapshot taken at `EnumerateStart`, so that
    /// `EnumerateNext` calls walk a stable sequence.
    enum_entries: Vec<String>,
}

impl DirHostFs {
    pub fn open(directory: &str) -> Result<Self> {
        fs::read_dir(directory)
            .with_context(|| format!("opening host filesystem directory {directory}"))?;
        Ok(DirHostFs {
            dir: PathBuf::from(directory),
            // Slot 0 is never surfaced as a valid sector.
            slots: vec![Slot { name: String::new(), full_path: PathBuf::new() }],
            enum_prefix: String::new(),
            enum_cursor: 0,
            enum_entries: Vec::new(),
        })
    }

    fn sector_for_slot(idx: usize) -> u32 {
        SECTOR_MAGIC + idx as u32
    }

    fn slot_for_sector(&self, sector: u32) -> Option<usize> {
        if sector < SECTOR_MAGIC {
            return None;
        }
        let idx = (sector - SECTOR_MAGIC) as usize;
        if idx == 0 || idx >= self.slots.len() {
            None
        } else {
            Some(idx)
        }
    }

    /// Find an existing slot by exact name match, or allocate a new one if
    /// the name exists on disk. Preserves the historical "skip a slot every
    /// 29 entries" allocation quirk exactly.
    fn search_file(&mut self, name: &str) -> u32 {
        for (idx, slot) in self.slots.iter().enumerate().skip(1) {
            if slot.name == name {
                return Self::sector_for_slot(idx);
            }
        }
        let full_path = self.dir.join(name);
        if !full_path.exists() {
            return 0;
        }
        if self.slots.len() % 29 == 0 {
            self.slots.push(Slot { name: String::new(), full_path: PathBuf::new() });
        }
        let idx = self.slots.len();
        self.slots.push(Slot { name: name.to_string(), full_path });
        Self::sector_for_slot(idx)
    }

    fn read_name_arg(ram: &[u32], offset: usize) -> String {
        let mut bytes = Vec::new();
        let mut i = offset;
        loop {
            let word = ram.get(i).copied().unwrap_or(0);
            for shift in [0, 8, 16, 24] {
                let b = ((word >> shift) & 0xFF) as u8;
                if b == 0 {
                    return String::from_utf8_lossy(&bytes).into_owned();
                }
                bytes.push(b);
            }
            i += 1;
        }
    }

    fn write_name(ram: &mut [u32], offset: usize, name: &str) {
        let bytes = name.as_bytes();
        let mut i = offset;
        let mut chunk = [0u8; 4];
        for (j, &b) in bytes.iter().chain(std::iter::once(&0u8)).enumerate() {
            chunk[j % 4] = b;
            if j % 4 == 3 {
                if let Some(slot) = ram.get_mut(i) {
                    *slot = u32::from_le_bytes(chunk);
                }
                i += 1;
                chunk = [0u8; 4];
            }
        }
    }

    fn unique_path(dir: &Path, prefix: &str, name: &str) -> PathBuf {
        for n in 0.. {
            let candidate = dir.join(format!("{prefix}{name}_{n:06}"));
            if !candidate.exists() {
                return candidate;
            }
        }
        unreachable!()
    }
}

impl HostFs for DirHostFs {
    fn write(&mut self, value: u32, ram: &mut [u32]) {
        // Guest request layout: word 0 is the opcode; subsequent words are
        // argument-specific (a name-argument offset, a sector number, a RAM
        // buffer offset, and a byte count).
        let op = ram.get(value as usize / 4).copied().unwrap_or(0) & 0xFF;
        let args = value as usize / 4 + 1;

        match op {
            OP_SEARCH => {
                let name = Self::read_name_arg(ram, args + 1);
                let sector = self.search_file(&name);
                if let Some(slot) = ram.get_mut(args) {
                    *slot = sector;
                }
            }
            OP_ENUMERATE_START => {
                self.enum_prefix = Self::read_name_arg(ram, args + 1);
                self.enum_entries = fs::read_dir(&self.dir)
                    .map(|it| {
                        it.filter_map(|e| e.ok())
                            .filter_map(|e| e.file_name().into_string().ok())
                            .collect()
                    })
                    .unwrap_or_default();
                self.enum_cursor = 0;
                self.enumerate_next(ram, args);
            }
            OP_ENUMERATE_NEXT => self.enumerate_next(ram, args),
            OP_GET_ATTRIBUTES => {
                let sector = ram.get(args).copied().unwrap_or(0);
                let attrs = self.slot_for_sector(sector).and_then(|idx| {
                    let path = &self.slots[idx].full_path;
                    fs::metadata(path).ok().map(|m| (m.len() as u32, packed_mtime(&m)))
                });
                if let Some((size, mtime)) = attrs {
                    if let Some(w) = ram.get_mut(args + 1) {
                        *w = mtime;
                    }
                    if let Some(w) = ram.get_mut(args + 2) {
                        *w = size;
                    }
                }
            }
            OP_INSERT => {
                let sector = ram.get(args).copied().unwrap_or(0);
                let name = Self::read_name_arg(ram, args + 1);
                if let Some(idx) = self.slot_for_sector(sector) {
                    if self.slots[idx].name.starts_with('~') {
                        let target = self.dir.join(&name);
                        if target.exists() {
                            if let Some(existing_idx) =
                                self.slots.iter().position(|s| s.full_path == target)
                            {
                                let tomb = Self::unique_path(&self.dir, "~OvW~", &name);
                                let _ = fs::rename(&target, &tomb);
                                self.slots[existing_idx].full_path = tomb.clone();
                                self.slots[existing_idx].name =
                                    tomb.file_name().unwrap().to_string_lossy().into_owned();
                            } else {
                                let _ = fs::remove_file(&target);
                            }
                        }
                        let _ = fs::rename(&self.slots[idx].full_path, &target);
                        self.slots[idx].name = name;
                        self.slots[idx].full_path = target;
                    }
                }
            }
            OP_DELETE => {
                let name = Self::read_name_arg(ram, args + 1);
                let sector = self.search_file(&name);
                if let Some(idx) = self.slot_for_sector(sector) {
                    let tomb = Self::unique_path(&self.dir, "~Del~", &name);
                    let _ = fs::rename(&self.slots[idx].full_path, &tomb);
                    self.slots[idx].full_path = tomb;
                    self.slots[idx].name = "~Del".to_string();
                }
            }
            OP_NEW => {
                let hint = Self::read_name_arg(ram, args + 1);
                let path = Self::unique_path(&self.dir, "~New~", &hint);
                let _ = fs::File::create(&path);
                let name = path.file_name().unwrap().to_string_lossy().into_owned();
                let sector = self.search_file(&name);
                if let Some(w) = ram.get_mut(args) {
                    *w = sector;
                }
            }
            OP_READ_BUF => {
                let sector = ram.get(args).copied().unwrap_or(0);
                let file_offset = ram.get(args + 1).copied().unwrap_or(0) as u64;
                let ram_offset = ram.get(args + 2).copied().unwrap_or(0) as usize;
                let count = ram.get(args + 3).copied().unwrap_or(0) as usize;
                if let Some(idx) = self.slot_for_sector(sector) {
                    if let Ok(data) = fs::read(&self.slots[idx].full_path) {
                        let start = file_offset as usize;
                        let end = (start + count).min(data.len());
                        if start < end {
                            copy_into_ram(ram, ram_offset, &data[start..end]);
                        }
                    }
                }
            }
            OP_WRITE_BUF => {
                let sector = ram.get(args).copied().unwrap_or(0);
                let file_offset = ram.get(args + 1).copied().unwrap_or(0) as u64;
                let ram_offset = ram.get(args + 2).copied().unwrap_or(0) as usize;
                let count = ram.get(args + 3).copied().unwrap_or(0) as usize;
                if let Some(idx) = self.slot_for_sector(sector) {
                    let data = copy_from_ram(ram, ram_offset, count);
                    if let Ok(mut f) =
                        fs::OpenOptions::new().write(true).open(&self.slots[idx].full_path)
                    {
                        use std::io::{Seek, SeekFrom, Write};
                        if f.seek(SeekFrom::Start(file_offset)).is_ok() {
                            let _ = f.write_all(&data);
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

impl DirHostFs {
    /// Op 2, also entered via fallthrough from op 1: advances the
    /// enumeration cursor past dotfiles, tombstones, and names outside the
    /// current prefix.
    fn enumerate_next(&mut self, ram: &mut [u32], args: usize) {
        while self.enum_cursor < self.enum_entries.len() {
            let name = self.enum_entries[self.enum_cursor].clone();
            self.enum_cursor += 1;
            if name.starts_with('~') || name.starts_with('.') {
                continue;
            }
            if !name.starts_with(&self.enum_prefix) {
                continue;
            }
            let sector = self.search_file(&name);
            if let Some(w) = ram.get_mut(args) {
                *w = sector;
            }
            Self::write_name(ram, args + 1, &name);
            return;
        }
        if let Some(w) = ram.get_mut(args) {
            *w = 0;
        }
    }
}

fn packed_mtime(meta: &fs::Metadata) -> u32 {
    use chrono::{Datelike, Local, TimeZone, Timelike};
    let modified = meta.modified().unwrap_or(UNIX_EPOCH);
    let secs = modified.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    let dt = Local.timestamp_opt(secs as i64, 0).single().unwrap_or_else(|| Local::now());
    dt.second()
        + dt.minute() * 0x40
        + dt.hour() * 0x1000
        + dt.day() * 0x20000
        + dt.month() * 0x400000
        + (dt.year() as u32 % 100) * 0x4000000
}

fn copy_into_ram(ram: &mut [u32], word_offset: usize, bytes: &[u8]) {
    for (i, chunk) in bytes.chunks(4).enumerate() {
        let mut buf = [0u8; 4];
        buf[..chunk.len()].copy_from_slice(chunk);
        if let Some(w) = ram.get_mut(word_offset + i) {
            *w = u32::from_le_bytes(buf);
        }
    }
}

fn copy_from_ram(ram: &[u32], word_offset: usize, count: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(count);
    let mut i = 0;
    while out.len() < count {
        let word = ram.get(word_offset + i).copied().unwrap_or(0);
        out.extend_from_slice(&word.to_le_bytes());
        i += 1;
    }
    out.truncate(count);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write as _;

    fn dir_with_file(name: &str, contents: &[u8]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let mut f = File::create(dir.path().join(name)).unwrap();
        f.write_all(contents).unwrap();
        dir
    }

    /// Searching for the same name twice returns the same sector number.
    #[test]
    fn search_then_reuse_is_stable() {
        let dir = dir_with_file("hello.txt", b"hi");
        let mut fs_bridge = DirHostFs::open(dir.path().to_str().unwrap()).unwrap();
        let first = fs_bridge.search_file("hello.txt");
        let second = fs_bridge.search_file("hello.txt");
        assert_eq!(first, second);
        assert!(first >= SECTOR_MAGIC);
    }

    #[test]
    fn unknown_file_returns_zero_sector() {
        let dir = tempfile::tempdir().unwrap();
        let mut fs_bridge = DirHostFs::open(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(fs_bridge.search_file("nope.txt"), 0);
    }

    #[test]
    fn slot_allocation_skips_every_29th_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut fs_bridge = DirHostFs::open(dir.path().to_str().unwrap()).unwrap();
        for i in 0..40 {
            let name = format!("f{i}.txt");
            File::create(dir.path().join(&name)).unwrap();
        }
        let mut sectors = Vec::new();
        for i in 0..40 {
            let name = format!("f{i}.txt");
            sectors.push(fs_bridge.search_file(&name));
        }
        // Every sector is unique: the skip quirk must not collide two names.
        let mut sorted = sectors.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), sectors.len());
    }
}
