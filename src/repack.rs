// src/repack.rs

//! The repackaging pipeline
//!
//! For one input the steps are:
//!
//! 1. derive the canonical destination ([`naming::resolve_output_path`])
//! 2. skip if anything already exists there
//! 3. enumerate the input's members ([`DatasetInput::resolve`])
//! 4. classify and order them ([`OrderedMemberPlan::build`])
//! 5. stream them into a [`PackageWriter`], transcoding eligible images
//! 6. append the manifest and promote the package
//!
//! A run either creates the whole package or leaves the destination alone.

use crate::config::RepackConfig;
use crate::error::Result;
use crate::input::DatasetInput;
use crate::naming;
use crate::plan::{OrderedMemberPlan, PlannedMember};
use crate::recompress::{RecompressDecision, Transcoder};
use crate::writer::{PackageSummary, PackageWriter, Promotion};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What a repackaging run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepackOutcome {
    /// A new package was written
    Created {
        path: PathBuf,
        /// Archive members, including directories and the manifest
        members: usize,
        bytes: u64,
        /// Images stored in transcoded form
        transcoded: usize,
    },
    /// The destination already existed and was left untouched
    Skipped { path: PathBuf },
}

impl RepackOutcome {
    /// Destination path
    pub fn path(&self) -> &Path {
        match self {
            Self::Created { path, .. } | Self::Skipped { path } => path,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

/// Idempotency check: does anything (even a dangling link) occupy `path`?
pub fn output_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Repackages datasets under one output base
pub struct Repackager {
    config: RepackConfig,
    transcoder: Transcoder,
}

impl Repackager {
    /// Create a repackager, validating the configuration
    pub fn new(config: RepackConfig) -> Result<Self> {
        config.validate()?;
        let transcoder = Transcoder::new(config.zlevel, config.block_size);
        Ok(Self { config, transcoder })
    }

    pub fn config(&self) -> &RepackConfig {
        &self.config
    }

    /// Canonical destination for an input
    pub fn output_path(&self, input: &Path) -> Result<PathBuf> {
        naming::resolve_output_path(self.config.output_base(), input)
    }

    /// Repackage one input
    pub fn repackage(&self, input: &Path) -> Result<RepackOutcome> {
        let destination = self.output_path(input)?;
        info!("Repackaging {} -> {}", input.display(), destination.display());

        if output_exists(&destination) {
            info!("Output already exists, skipping: {}", destination.display());
            return Ok(RepackOutcome::Skipped { path: destination });
        }

        let dataset = DatasetInput::open(input)?;
        let work_dir = destination
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.output_base().to_path_buf());
        fs::create_dir_all(&work_dir)?;

        let mut resolved = dataset.resolve(&work_dir, self.config.block_size)?;
        debug!(
            "{} members, {} bytes in {} ({:?})",
            resolved.member_count(),
            resolved.total_size(),
            input.display(),
            dataset.kind()
        );

        let plan = OrderedMemberPlan::build(std::mem::take(&mut resolved.members), input)?;
        let candidates = plan.transcode_count();
        debug!("Member order: {}", plan.names().join(", "));
        let (summary, transcoded) = self.write_package(&plan, &destination, &work_dir)?;
        drop(resolved);

        match summary.promotion {
            Promotion::Created => {
                info!(
                    "Created {} ({} members, {} bytes, {} of {} candidate images recompressed)",
                    summary.path.display(),
                    summary.members,
                    summary.bytes,
                    transcoded,
                    candidates
                );
                Ok(RepackOutcome::Created {
                    path: summary.path,
                    members: summary.members,
                    bytes: summary.bytes,
                    transcoded,
                })
            }
            Promotion::AlreadyPresent => Ok(RepackOutcome::Skipped { path: summary.path }),
        }
    }

    fn write_package(
        &self,
        plan: &OrderedMemberPlan,
        destination: &Path,
        work_dir: &Path,
    ) -> Result<(PackageSummary, usize)> {
        let mut writer = PackageWriter::create(destination, self.config.block_size)?;
        let mut transcoded = 0;

        for member in plan.iter() {
            if self.append_member(&mut writer, member, work_dir)? {
                transcoded += 1;
            }
        }

        Ok((writer.finish()?, transcoded))
    }

    /// Append one planned member; true if it was stored transcoded
    fn append_member(
        &self,
        writer: &mut PackageWriter,
        member: &PlannedMember,
        work_dir: &Path,
    ) -> Result<bool> {
        let entry = &member.entry;
        if entry.is_dir() {
            writer.append_directory(&entry.name, member.mode, entry.mtime)?;
            return Ok(false);
        }

        if member.decision == RecompressDecision::Transcode
            && let Some(image) = self.transcoder.transcode(entry, work_dir)?
        {
            let size = image.size();
            writer.append_file(&entry.name, size, member.mode, entry.mtime, image.into_reader()?)?;
            return Ok(true);
        }

        writer.append_file(&entry.name, entry.size, member.mode, entry.mtime, entry.open()?)?;
        Ok(false)
    }
}
