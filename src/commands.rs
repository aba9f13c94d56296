// src/commands.rs
//! Command implementations for the eorepack binary

use anyhow::{Context, Result, bail};
use eorepack::{RepackConfig, RepackOutcome, Repackager, verify_package};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Repackage each input in order, stopping at the first failure
pub fn cmd_repack(
    output_base: &Path,
    block_size: usize,
    zlevel: u32,
    inputs: &[PathBuf],
) -> Result<()> {
    let config = RepackConfig::new(output_base)
        .with_block_size(block_size)
        .with_zlevel(zlevel);
    let repackager = Repackager::new(config).context("Invalid repack configuration")?;
    info!(
        "Repackaging {} inputs under {} (zlevel {})",
        inputs.len(),
        repackager.config().output_base().display(),
        repackager.config().zlevel
    );

    let mut skipped = 0;
    for input in inputs {
        let outcome = match repackager.repackage(input) {
            Ok(outcome) => outcome,
            Err(e) if e.is_structural() => {
                return Err(e).with_context(|| {
                    format!("Rejected {} before writing anything", input.display())
                });
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to repackage {}", input.display()));
            }
        };
        if outcome.is_skipped() {
            skipped += 1;
        }

        match outcome {
            RepackOutcome::Created {
                path,
                members,
                bytes,
                transcoded,
            } => println!(
                "Created {} ({} members, {} bytes, {} recompressed)",
                path.display(),
                members,
                bytes,
                transcoded
            ),
            RepackOutcome::Skipped { path } => {
                println!("Skipped {} (already exists)", path.display())
            }
        }
    }

    info!("{} inputs done, {} already packaged", inputs.len(), skipped);
    Ok(())
}

/// Verify each package, failing if any has problems
pub fn cmd_verify(block_size: usize, packages: &[PathBuf]) -> Result<()> {
    let mut failed = 0;

    for package in packages {
        let report = verify_package(package, block_size)
            .with_context(|| format!("Failed to verify {}", package.display()))?;

        if report.is_ok() {
            println!(
                "{}: OK ({} members, crc32 {:08x})",
                package.display(),
                report.members,
                report.crc32
            );
            continue;
        }

        failed += 1;
        println!("{}: FAILED ({} problems)", package.display(), report.problem_count());
        for mismatch in &report.mismatches {
            println!(
                "  checksum mismatch: {} (expected {}, got {})",
                mismatch.name, mismatch.expected, mismatch.actual
            );
        }
        for name in &report.missing {
            println!("  missing member: {}", name);
        }
        for name in &report.unlisted {
            println!("  not in manifest: {}", name);
        }
        for problem in &report.layout_errors {
            println!("  layout: {}", problem);
        }
        error!("{} failed verification", package.display());
    }

    if failed > 0 {
        bail!("{} of {} packages failed verification", failed, packages.len());
    }
    info!("All {} packages verified", packages.len());
    Ok(())
}
