// src/writer.rs

//! Streaming package writer
//!
//! Members are appended to an uncompressed tar that lives in a temporary
//! file next to the destination. Each file member is digested as its bytes
//! stream into the archive; [`PackageWriter::finish`] appends the checksum
//! manifest as the last member, syncs the file and links it into place
//! without ever replacing an existing file.

use crate::error::{Error, Result};
use crate::hash::DigestReader;
use crate::manifest::{CHECKSUM_FILE_NAME, ChecksumManifest};
use std::fs::{self, File, Permissions};
use std::io::{self, BufWriter, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Mode of the manifest member and of the package file itself
pub const PACKAGE_FILE_MODE: u32 = 0o664;

/// How the finished package reached its destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Promotion {
    /// The package was linked into place
    Created,
    /// Another writer got there first; our copy was discarded
    AlreadyPresent,
}

/// Result of a finished write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSummary {
    pub path: PathBuf,
    /// Members written, including directories and the manifest
    pub members: usize,
    /// Size of the package file
    pub bytes: u64,
    pub promotion: Promotion,
}

/// Writes one package
pub struct PackageWriter {
    builder: tar::Builder<BufWriter<NamedTempFile>>,
    destination: PathBuf,
    manifest: ChecksumManifest,
    block_size: usize,
    members: usize,
    latest_mtime: u64,
}

impl PackageWriter {
    /// Start a package destined for `destination`
    ///
    /// The temporary file is created in the destination's directory so the
    /// final link never crosses filesystems.
    pub fn create(destination: &Path, block_size: usize) -> Result<Self> {
        let parent = destination
            .parent()
            .ok_or_else(|| Error::InvalidPath(destination.display().to_string()))?;
        let file_name = destination
            .file_name()
            .ok_or_else(|| Error::InvalidPath(destination.display().to_string()))?
            .to_string_lossy();

        fs::create_dir_all(parent)?;
        let temp = tempfile::Builder::new()
            .prefix(&format!(".{}.", file_name))
            .suffix(".tmp")
            .tempfile_in(parent)?;
        debug!("Writing {} via {}", destination.display(), temp.path().display());

        let block_size = block_size.max(1);
        Ok(Self {
            builder: tar::Builder::new(BufWriter::with_capacity(block_size, temp)),
            destination: destination.to_path_buf(),
            manifest: ChecksumManifest::new(),
            block_size,
            members: 0,
            latest_mtime: 0,
        })
    }

    fn header(entry_type: tar::EntryType, size: u64, mode: u32, mtime: u64) -> tar::Header {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(entry_type);
        header.set_mode(mode);
        header.set_uid(0);
        header.set_gid(0);
        header.set_size(size);
        header.set_mtime(mtime);
        header.set_cksum();
        header
    }

    /// Append a directory entry (not listed in the manifest)
    pub fn append_directory(&mut self, name: &str, mode: u32, mtime: u64) -> Result<()> {
        let mut header = Self::header(tar::EntryType::Directory, 0, mode, mtime);
        self.builder
            .append_data(&mut header, format!("{}/", name), io::empty())?;
        self.members += 1;
        self.latest_mtime = self.latest_mtime.max(mtime);
        Ok(())
    }

    /// Append a file member, streaming exactly `size` bytes from `reader`
    ///
    /// Returns the member's SHA-1. A reader that ends early is an error.
    pub fn append_file<R: Read>(
        &mut self,
        name: &str,
        size: u64,
        mode: u32,
        mtime: u64,
        reader: R,
    ) -> Result<String> {
        let mut header = Self::header(tar::EntryType::Regular, size, mode, mtime);
        let mut digest = DigestReader::new(reader.take(size), self.block_size);
        self.builder.append_data(&mut header, name, &mut digest)?;

        let (sha1, copied) = digest.finish();
        if copied != size {
            return Err(Error::ShortRead {
                name: name.to_string(),
                expected: size,
                actual: copied,
            });
        }

        self.manifest.insert(name, sha1.clone())?;
        self.members += 1;
        self.latest_mtime = self.latest_mtime.max(mtime);
        Ok(sha1)
    }

    /// Manifest accumulated so far
    pub fn manifest(&self) -> &ChecksumManifest {
        &self.manifest
    }

    /// Append the manifest, flush and promote the package
    ///
    /// Dropping a writer without finishing discards the temporary file.
    pub fn finish(self) -> Result<PackageSummary> {
        let PackageWriter {
            mut builder,
            destination,
            manifest,
            members,
            latest_mtime,
            ..
        } = self;

        let rendered = manifest.render();
        let mut header = Self::header(
            tar::EntryType::Regular,
            rendered.len() as u64,
            PACKAGE_FILE_MODE,
            latest_mtime,
        );
        builder.append_data(&mut header, CHECKSUM_FILE_NAME, rendered.as_bytes())?;

        let buffered = builder.into_inner()?;
        let temp = buffered.into_inner().map_err(|e| e.into_error())?;
        temp.as_file().sync_all()?;
        fs::set_permissions(temp.path(), Permissions::from_mode(PACKAGE_FILE_MODE))?;
        let bytes = temp.as_file().metadata()?.len();

        let promotion = match temp.persist_noclobber(&destination) {
            Ok(_) => Promotion::Created,
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                warn!(
                    "{} appeared while writing, discarding this copy",
                    destination.display()
                );
                Promotion::AlreadyPresent
            }
            Err(e) => return Err(e.into()),
        };

        if promotion == Promotion::Created
            && let Some(parent) = destination.parent()
            && let Ok(dir) = File::open(parent)
        {
            // Not every filesystem supports fsync on directories
            let _ = dir.sync_all();
        }

        Ok(PackageSummary {
            path: destination,
            members: members + 1,
            bytes,
            promotion,
        })
    }
}
