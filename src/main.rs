// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing subscriber for logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Repack {
            output_base,
            block_size,
            zlevel,
            inputs,
        } => commands::cmd_repack(&output_base, block_size, zlevel, &inputs),
        Commands::Verify { block_size, packages } => commands::cmd_verify(block_size, &packages),
    }
}
