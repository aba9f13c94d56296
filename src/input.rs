// src/input.rs

//! Input resolution: enumerating the members of a delivered dataset
//!
//! A dataset arrives either as a tar archive (plain or compressed) or as an
//! already-expanded directory. Both are turned into a flat list of
//! [`MemberEntry`] values, each of which can be reopened for reading (with
//! random access) while the package is written:
//!
//! - **Directory**: members are the files and subdirectories themselves.
//! - **Plain tar**: members are byte spans of the archive file, read in place.
//! - **Compressed tar**: the archive is streamed once into a staging
//!   directory beside the destination; members are the staged files.
//!
//! Nothing is held in memory beyond one I/O block at a time.

use crate::compression::{CompressionFormat, create_decoder};
use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use tempfile::TempDir;
use tracing::debug;
use walkdir::WalkDir;

/// Normalise a member name to a relative posix path
///
/// Leading `/` and `./` are dropped, as is a trailing `/`. Parent directory
/// components are rejected.
pub fn normalize_member_name(raw: &str) -> Result<String> {
    let relative = raw.trim_start_matches('/');
    let mut parts = Vec::new();

    for component in Path::new(relative).components() {
        match component {
            Component::Normal(c) => parts.push(c.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir => return Err(Error::PathTraversal(raw.to_string())),
            Component::Prefix(_) | Component::RootDir => {}
        }
    }

    if parts.is_empty() {
        return Err(Error::InvalidPath(raw.to_string()));
    }
    Ok(parts.join("/"))
}

/// Copy a reader to a writer one block at a time
pub(crate) fn copy_blocks<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    block_size: usize,
) -> io::Result<u64> {
    let mut buffer = vec![0u8; block_size.max(1)];
    let mut total = 0u64;

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buffer[..n])?;
        total += n as u64;
    }

    Ok(total)
}

/// Kind of a dataset input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// Tar archive with the given outer compression
    Archive(CompressionFormat),
    /// Expanded directory
    Directory,
}

/// Type of a member entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    File,
    Directory,
}

/// Where a member's bytes live
#[derive(Debug, Clone)]
pub enum ByteSource {
    /// A whole file on disk (directory inputs and staged members)
    File(PathBuf),
    /// A span of an uncompressed tar archive
    Span { archive: PathBuf, offset: u64 },
}

/// Read-only view of a byte range of a file
///
/// Positions are relative to the start of the span; reads stop at its end.
pub struct SpanReader {
    file: File,
    start: u64,
    len: u64,
    pos: u64,
}

impl SpanReader {
    /// Open `len` bytes of `path` starting at `start`
    pub fn open(path: &Path, start: u64, len: u64) -> io::Result<Self> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(start))?;
        Ok(Self {
            file,
            start,
            len,
            pos: 0,
        })
    }

    /// Length of the span
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the span is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Read for SpanReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.len.saturating_sub(self.pos);
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let cap = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = self.file.read(&mut buf[..cap])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for SpanReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(d) => self.len.checked_add_signed(d),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
        }
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek before start of span"))?;

        self.file.seek(SeekFrom::Start(self.start + target))?;
        self.pos = target;
        Ok(target)
    }
}

/// One file or directory inside a dataset
#[derive(Debug, Clone)]
pub struct MemberEntry {
    /// Relative posix name (`gap_mask/X_GM_B1.TIF`)
    pub name: String,
    /// Byte size (zero for directories)
    pub size: u64,
    /// Source mode bits
    pub mode: u32,
    /// Modification time, seconds since the epoch
    pub mtime: u64,
    /// File or directory
    pub entry_type: EntryType,
    source: Option<ByteSource>,
}

impl MemberEntry {
    /// Create a directory entry
    pub fn directory(name: impl Into<String>, mode: u32, mtime: u64) -> Self {
        Self {
            name: name.into(),
            size: 0,
            mode,
            mtime,
            entry_type: EntryType::Directory,
            source: None,
        }
    }

    /// Create a file entry backed by `source`
    pub fn file(
        name: impl Into<String>,
        size: u64,
        mode: u32,
        mtime: u64,
        source: ByteSource,
    ) -> Self {
        Self {
            name: name.into(),
            size,
            mode,
            mtime,
            entry_type: EntryType::File,
            source: Some(source),
        }
    }

    /// Check if this is a directory entry
    pub fn is_dir(&self) -> bool {
        self.entry_type == EntryType::Directory
    }

    /// Final path segment of the name
    pub fn file_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// First path segment when the member is nested (`gap_mask` for `gap_mask/x.TIF`)
    pub fn top_level_dir(&self) -> Option<&str> {
        self.name.split_once('/').map(|(dir, _)| dir)
    }

    /// Where the bytes come from
    pub fn source(&self) -> Option<&ByteSource> {
        self.source.as_ref()
    }

    /// Open the member's bytes with random access
    ///
    /// Directories yield an empty reader.
    pub fn open(&self) -> io::Result<SpanReader> {
        match &self.source {
            Some(ByteSource::File(path)) => SpanReader::open(path, 0, self.size),
            Some(ByteSource::Span { archive, offset }) => {
                SpanReader::open(archive, *offset, self.size)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no content", self.name),
            )),
        }
    }
}

/// A dataset input: an archive file or a directory
#[derive(Debug, Clone)]
pub struct DatasetInput {
    root: PathBuf,
    kind: InputKind,
}

impl DatasetInput {
    /// Inspect `path` and determine its kind
    pub fn open(path: &Path) -> Result<Self> {
        let metadata = fs::metadata(path)?;
        let kind = if metadata.is_dir() {
            InputKind::Directory
        } else if metadata.is_file() {
            InputKind::Archive(CompressionFormat::detect_file(path)?)
        } else {
            return Err(Error::InvalidPath(path.display().to_string()));
        };

        Ok(Self {
            root: path.to_path_buf(),
            kind,
        })
    }

    /// Root path of the input
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Kind of the input
    pub fn kind(&self) -> InputKind {
        self.kind
    }

    /// Enumerate all members
    ///
    /// `work_dir` receives the staging directory for compressed archives; it
    /// should be on the same filesystem as the destination.
    pub fn resolve(&self, work_dir: &Path, block_size: usize) -> Result<ResolvedInput> {
        match self.kind {
            InputKind::Directory => Ok(ResolvedInput {
                members: directory_members(&self.root)?,
                _staging: None,
            }),
            InputKind::Archive(format) if format.is_seekable() => Ok(ResolvedInput {
                members: archive_spans(&self.root)?,
                _staging: None,
            }),
            InputKind::Archive(format) => {
                let staging = tempfile::Builder::new()
                    .prefix(".eorepack-staging-")
                    .tempdir_in(work_dir)?;
                let members = stage_archive(&self.root, format, staging.path(), block_size)?;
                Ok(ResolvedInput {
                    members,
                    _staging: Some(staging),
                })
            }
        }
    }
}

/// Members of a dataset, plus whatever keeps their sources alive
pub struct ResolvedInput {
    /// Members in native enumeration order
    pub members: Vec<MemberEntry>,
    _staging: Option<TempDir>,
}

impl ResolvedInput {
    /// Number of members
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Sum of member sizes
    pub fn total_size(&self) -> u64 {
        self.members.iter().map(|m| m.size).sum()
    }
}

fn mtime_secs(metadata: &fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Walk a directory input (filesystem order)
fn directory_members(root: &Path) -> Result<Vec<MemberEntry>> {
    let mut members = Vec::new();

    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|_| Error::InvalidPath(entry.path().display().to_string()))?;
        let name = normalize_member_name(&relative.to_string_lossy())?;
        let metadata = entry.metadata()?;
        let mode = metadata.permissions().mode();
        let mtime = mtime_secs(&metadata);

        if entry.file_type().is_dir() {
            members.push(MemberEntry::directory(name, mode, mtime));
        } else if entry.file_type().is_file() {
            members.push(MemberEntry::file(
                name,
                metadata.len(),
                mode,
                mtime,
                ByteSource::File(entry.path().to_path_buf()),
            ));
        } else {
            return Err(Error::UnsupportedMember {
                name,
                kind: "symlink".to_string(),
            });
        }
    }

    debug!("Found {} members in directory {}", members.len(), root.display());
    Ok(members)
}

/// True for names that denote the archive root (`.`, `./`, `/`)
fn is_archive_root(raw: &str) -> bool {
    Path::new(raw)
        .components()
        .all(|c| matches!(c, Component::CurDir | Component::RootDir))
}

enum TarMember {
    File,
    Directory,
    Skip,
}

fn classify_tar_entry<R: Read>(entry: &tar::Entry<'_, R>) -> Result<(String, TarMember)> {
    let raw = entry.path()?.to_string_lossy().into_owned();
    let entry_type = entry.header().entry_type();

    let member = match entry_type {
        tar::EntryType::Regular | tar::EntryType::Continuous => TarMember::File,
        tar::EntryType::Directory => TarMember::Directory,
        tar::EntryType::XGlobalHeader => TarMember::Skip,
        other => {
            return Err(Error::UnsupportedMember {
                name: raw,
                kind: format!("{:?}", other),
            });
        }
    };

    // `tar -C dir -cf x.tar .` records the dataset directory itself as `./`
    let member = match member {
        TarMember::Directory if is_archive_root(&raw) => TarMember::Skip,
        other => other,
    };
    if matches!(member, TarMember::Skip) {
        return Ok((raw, member));
    }
    Ok((normalize_member_name(&raw)?, member))
}

/// Index an uncompressed tar in place
fn archive_spans(path: &Path) -> Result<Vec<MemberEntry>> {
    let mut archive = tar::Archive::new(File::open(path)?);
    let mut members = Vec::new();

    for entry in archive.entries()? {
        let entry = entry?;
        let (name, member) = classify_tar_entry(&entry)?;
        let header = entry.header();
        let mode = header.mode()?;
        let mtime = header.mtime()?;

        match member {
            TarMember::File => members.push(MemberEntry::file(
                name,
                entry.size(),
                mode,
                mtime,
                ByteSource::Span {
                    archive: path.to_path_buf(),
                    offset: entry.raw_file_position(),
                },
            )),
            TarMember::Directory => members.push(MemberEntry::directory(name, mode, mtime)),
            TarMember::Skip => {}
        }
    }

    debug!("Indexed {} members of {}", members.len(), path.display());
    Ok(members)
}

/// Stream a compressed tar into `staging`, one member at a time
fn stage_archive(
    path: &Path,
    format: CompressionFormat,
    staging: &Path,
    block_size: usize,
) -> Result<Vec<MemberEntry>> {
    let decoder = create_decoder(File::open(path)?, format)?;
    let mut archive = tar::Archive::new(decoder);
    let mut members = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let (name, member) = classify_tar_entry(&entry)?;
        let mode = entry.header().mode()?;
        let mtime = entry.header().mtime()?;

        match member {
            TarMember::File => {
                let expected = entry.size();
                let staged = staging.join(&name);
                if let Some(parent) = staged.parent() {
                    fs::create_dir_all(parent)?;
                }

                let mut out = File::create(&staged)?;
                let copied = copy_blocks(&mut entry, &mut out, block_size)?;
                if copied != expected {
                    return Err(Error::ShortRead {
                        name,
                        expected,
                        actual: copied,
                    });
                }

                let source = ByteSource::File(staged);
                members.push(MemberEntry::file(name, expected, mode, mtime, source));
            }
            TarMember::Directory => members.push(MemberEntry::directory(name, mode, mtime)),
            TarMember::Skip => {}
        }
    }

    debug!(
        "Staged {} members of {} ({} archive)",
        members.len(),
        path.display(),
        format
    );
    Ok(members)
}
