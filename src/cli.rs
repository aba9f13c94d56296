// src/cli.rs
//! CLI definitions for eorepack
//!
//! This module contains the command-line interface definitions using clap.
//! The command implementations are in the `commands` module.

use clap::{Parser, Subcommand};
use eorepack::{DEFAULT_BLOCK_SIZE, DEFAULT_ZLEVEL};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "eorepack")]
#[command(version)]
#[command(about = "Repackage satellite datasets into normalized, checksummed tar packages")]
#[command(long_about = None)]
pub struct Cli {
    /// Enable debug logging (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Repackage datasets (archives or directories) under an output base
    Repack {
        /// Root directory for packages; the input's layout below USGS/ is mirrored here
        #[arg(long, value_name = "DIR")]
        output_base: PathBuf,

        /// Bytes per I/O transfer
        #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
        block_size: usize,

        /// Deflate level for recompressed images (1-9)
        #[arg(
            long,
            default_value_t = DEFAULT_ZLEVEL,
            value_parser = clap::value_parser!(u32).range(1..=9)
        )]
        zlevel: u32,

        /// Dataset archives or directories
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Check packages against their package.sha1 manifests
    Verify {
        /// Bytes per I/O transfer
        #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
        block_size: usize,

        /// Package files to check
        #[arg(required = true)]
        packages: Vec<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_repack() {
        let cli = Cli::parse_from([
            "eorepack",
            "repack",
            "--output-base",
            "/out",
            "--block-size",
            "32",
            "/in/USGS/L1/C1/092_091/X/a.tar.gz",
            "/in/USGS/L1/C1/092_091/Y",
        ]);
        match cli.command {
            Commands::Repack {
                output_base,
                block_size,
                zlevel,
                inputs,
            } => {
                assert_eq!(output_base, PathBuf::from("/out"));
                assert_eq!(block_size, 32);
                assert_eq!(zlevel, DEFAULT_ZLEVEL);
                assert_eq!(inputs.len(), 2);
            }
            Commands::Verify { .. } => panic!("expected repack"),
        }
    }

    #[test]
    fn test_zlevel_range() {
        let result = Cli::try_parse_from([
            "eorepack",
            "repack",
            "--output-base",
            "/out",
            "--zlevel",
            "12",
            "/in/x.tar",
        ]);
        assert!(result.is_err());
    }
}
