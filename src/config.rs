// src/config.rs

//! Repackaging configuration
//!
//! Configuration is a plain struct built from command-line arguments.
//! There are no configuration files.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Default bytes per I/O transfer (1 MiB)
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

/// Default deflate level for transcoded images
pub const DEFAULT_ZLEVEL: u32 = 9;

/// Settings for one repackaging run
#[derive(Debug, Clone)]
pub struct RepackConfig {
    /// Root under which canonical output paths are derived
    pub output_base: PathBuf,
    /// Bytes per read/write transfer
    pub block_size: usize,
    /// Deflate level (1-9) used when transcoding images
    pub zlevel: u32,
}

impl RepackConfig {
    /// Create a config with default block size and compression level
    pub fn new(output_base: impl Into<PathBuf>) -> Self {
        Self {
            output_base: output_base.into(),
            block_size: DEFAULT_BLOCK_SIZE,
            zlevel: DEFAULT_ZLEVEL,
        }
    }

    /// Set the I/O block size
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Set the deflate level for transcoded images
    pub fn with_zlevel(mut self, zlevel: u32) -> Self {
        self.zlevel = zlevel;
        self
    }

    /// Output base directory
    pub fn output_base(&self) -> &Path {
        &self.output_base
    }

    /// Check values before any work is done
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::Config("block size must be greater than zero".to_string()));
        }
        if !(1..=9).contains(&self.zlevel) {
            return Err(Error::Config(format!(
                "zlevel must be between 1 and 9, got {}",
                self.zlevel
            )));
        }
        if self.output_base.exists() && !self.output_base.is_dir() {
            return Err(Error::Config(format!(
                "output base is not a directory: {}",
                self.output_base.display()
            )));
        }
        Ok(())
    }
}
