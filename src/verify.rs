// src/verify.rs

//! Integrity verification of produced packages
//!
//! A package is read once, front to back. Every file member is re-digested
//! and compared with its `package.sha1` line, and the layout rules are
//! checked: primary metadata first, manifest last, manifest lines in member
//! order.

use crate::error::{Error, Result};
use crate::hash::{file_crc32, hash_reader};
use crate::input::normalize_member_name;
use crate::manifest::{CHECKSUM_FILE_NAME, ChecksumManifest};
use crate::plan::MemberClassifier;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Largest manifest the verifier will load
const MAX_MANIFEST_BYTES: u64 = 16 * 1024 * 1024;

/// A member whose digest does not match the manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberMismatch {
    pub name: String,
    pub expected: String,
    pub actual: String,
}

/// Findings for one package
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    pub path: PathBuf,
    /// File members checked, excluding the manifest
    pub members: usize,
    /// CRC32 of the whole package file
    pub crc32: u32,
    pub mismatches: Vec<MemberMismatch>,
    /// Listed in the manifest but absent from the archive
    pub missing: Vec<String>,
    /// Present in the archive but absent from the manifest
    pub unlisted: Vec<String>,
    pub layout_errors: Vec<String>,
}

impl VerifyReport {
    /// True if nothing is wrong with the package
    pub fn is_ok(&self) -> bool {
        self.mismatches.is_empty()
            && self.missing.is_empty()
            && self.unlisted.is_empty()
            && self.layout_errors.is_empty()
    }

    /// Total number of problems found
    pub fn problem_count(&self) -> usize {
        self.mismatches.len() + self.missing.len() + self.unlisted.len() + self.layout_errors.len()
    }
}

/// Verify a package against its own checksum manifest
///
/// Problems with the package contents are reported, not raised; errors are
/// reserved for unreadable files and malformed manifests.
pub fn verify_package(path: &Path, block_size: usize) -> Result<VerifyReport> {
    let mut report = VerifyReport {
        path: path.to_path_buf(),
        ..Default::default()
    };

    let reader = BufReader::with_capacity(block_size.max(1), File::open(path)?);
    let mut archive = tar::Archive::new(reader);
    let mut computed: Vec<(String, String)> = Vec::new();
    let mut manifest_text: Option<String> = None;
    let mut first_file: Option<String> = None;
    let mut after_manifest = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let raw = entry.path()?.to_string_lossy().into_owned();
        let name = normalize_member_name(&raw)?;
        let entry_type = entry.header().entry_type();

        if manifest_text.is_some() {
            after_manifest.push(name.clone());
        }

        if entry_type.is_dir() {
            continue;
        }
        if !entry_type.is_file() {
            report
                .layout_errors
                .push(format!("{}: unexpected member type {:?}", name, entry_type));
            continue;
        }

        if name == CHECKSUM_FILE_NAME {
            if entry.size() > MAX_MANIFEST_BYTES {
                return Err(Error::manifest(format!("manifest too large ({} bytes)", entry.size())));
            }
            let mut text = String::new();
            entry
                .read_to_string(&mut text)
                .map_err(|e| Error::manifest(format!("manifest is not valid text: {}", e)))?;
            manifest_text = Some(text);
            continue;
        }

        if first_file.is_none() {
            first_file = Some(name.clone());
        }
        let digest = hash_reader(&mut entry, block_size)?;
        computed.push((name, digest));
    }

    report.members = computed.len();
    report.crc32 = file_crc32(path, block_size)?;

    match first_file {
        Some(name) if !MemberClassifier::is_primary_metadata(&name) => report
            .layout_errors
            .push(format!("first member {} is not a primary metadata file", name)),
        None => report.layout_errors.push("package holds no file members".to_string()),
        Some(_) => {}
    }
    if !after_manifest.is_empty() {
        report.layout_errors.push(format!(
            "{} is not the last member (followed by {})",
            CHECKSUM_FILE_NAME,
            after_manifest.join(", ")
        ));
    }

    let Some(text) = manifest_text else {
        report.layout_errors.push(format!("{} is missing", CHECKSUM_FILE_NAME));
        report.unlisted = computed.into_iter().map(|(name, _)| name).collect();
        warn!("{}: no checksum manifest", path.display());
        return Ok(report);
    };
    let manifest = ChecksumManifest::parse(&text)?;

    for (name, actual) in &computed {
        match manifest.get(name) {
            None => report.unlisted.push(name.clone()),
            Some(expected) if expected != actual.as_str() => report.mismatches.push(MemberMismatch {
                name: name.clone(),
                expected: expected.to_string(),
                actual: actual.clone(),
            }),
            Some(_) => {}
        }
    }
    for entry in manifest.iter() {
        if !computed.iter().any(|(name, _)| *name == entry.name) {
            report.missing.push(entry.name.clone());
        }
    }

    let listed: Vec<&str> = manifest.iter().map(|e| e.name.as_str()).collect();
    let present: Vec<&str> = computed
        .iter()
        .map(|(name, _)| name.as_str())
        .filter(|name| manifest.contains(name))
        .collect();
    let listed_present: Vec<&str> = listed
        .into_iter()
        .filter(|name| computed.iter().any(|(n, _)| n.as_str() == *name))
        .collect();
    if present != listed_present {
        report
            .layout_errors
            .push(format!("{} lines are not in member order", CHECKSUM_FILE_NAME));
    }

    debug!(
        "Verified {}: {} members, {} problems, crc32 {:08x}",
        path.display(),
        report.members,
        report.problem_count(),
        report.crc32
    );
    Ok(report)
}
