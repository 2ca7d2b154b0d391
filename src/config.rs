//! Configuration assembled from command-line positional arguments.
//!
//! CLI parsing itself is out of scope — this is bare `std::env::args`
//! reading in `main.rs`, not a parser — but the resulting `Config` and its
//! typed failure modes follow the usual split: a typed error
//! (`ConfigError`) at the library boundary, `anyhow` for the caller.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMode {
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub ram_megabytes: u32,
    pub modes: Vec<DisplayMode>,
    pub screen_dynsize: bool,
    pub disk_image: Option<String>,
    pub hostfs_dir: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ram_megabytes: 1,
            modes: vec![DisplayMode { index: 0, width: 1024, height: 768, depth: 1 }],
            screen_dynsize: false,
            disk_image: None,
            hostfs_dir: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid RAM size {0} (must be 1..=64 megabytes)")]
    InvalidMemSize(u32),
    #[error("could not open disk image {path}: {source}")]
    DiskOpen { path: String, source: std::io::Error },
    #[error("could not open host filesystem directory {path}: {source}")]
    HostFsOpen { path: String, source: std::io::Error },
}

impl Config {
    pub fn with_ram_megabytes(mut self, megabytes: u32) -> Result<Self, ConfigError> {
        if megabytes == 0 || megabytes > 64 {
            return Err(ConfigError::InvalidMemSize(megabytes));
        }
        self.ram_megabytes = megabytes;
        Ok(self)
    }
}
