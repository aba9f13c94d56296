// src/recompress.rs

//! Per-member recompression decisions and the image transcoder
//!
//! Only band images that are single-band, strip-organised and uncompressed
//! are rewritten. Everything else, including images that are already
//! compressed or that fail to parse, is copied unchanged.

use crate::error::{Error, Result};
use crate::input::MemberEntry;
use crate::tiff::{self, TiffInfo};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, warn};

/// Image file extensions, compared case-insensitively
const IMAGE_EXTENSIONS: &[&str] = &[".tif", ".tiff"];

/// What to do with one member's bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecompressDecision {
    /// Copy the bytes unchanged
    Passthrough,
    /// Rewrite as a deflate-compressed TIFF
    Transcode,
}

/// Check if a member name looks like a raster image
///
/// ```
/// use eorepack::recompress::is_image_name;
///
/// assert!(is_image_name("LT05_L1GS_092091_19910506_20170126_01_T2_B1.TIF"));
/// assert!(is_image_name("gap_mask/x_GM_B1.tiff"));
/// assert!(!is_image_name("x_BQA.TIF.msk"));
/// ```
pub fn is_image_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Chooses a [`RecompressDecision`] for each member
pub struct RecompressionSelector;

impl RecompressionSelector {
    /// Inspect a member and decide whether it should be transcoded
    pub fn decide(entry: &MemberEntry) -> RecompressDecision {
        if entry.is_dir() || !is_image_name(&entry.name) {
            return RecompressDecision::Passthrough;
        }

        let info = entry
            .open()
            .map_err(Error::from)
            .and_then(|reader| TiffInfo::read(&mut BufReader::new(reader)));

        match info {
            Ok(info) => {
                let eligibility = info.eligibility();
                if eligibility.is_eligible() {
                    RecompressDecision::Transcode
                } else {
                    debug!("{}: {}, passing through", entry.name, eligibility);
                    RecompressDecision::Passthrough
                }
            }
            Err(e) => {
                debug!("{}: not a readable TIFF ({}), passing through", entry.name, e);
                RecompressDecision::Passthrough
            }
        }
    }
}

/// A transcoded image held in an anonymous temporary file
#[derive(Debug)]
pub struct TranscodedImage {
    file: File,
    size: u64,
}

impl TranscodedImage {
    /// Size of the transcoded image in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Rewind and hand out the file for reading
    pub fn into_reader(mut self) -> io::Result<File> {
        self.file.seek(SeekFrom::Start(0))?;
        Ok(self.file)
    }
}

/// Rewrites eligible images with deflate compression
#[derive(Debug, Clone, Copy)]
pub struct Transcoder {
    level: u32,
    block_size: usize,
}

impl Transcoder {
    pub fn new(level: u32, block_size: usize) -> Self {
        Self {
            level,
            block_size: block_size.max(1),
        }
    }

    /// Transcode `entry` into a temporary file under `work_dir`
    ///
    /// Returns `None` when the member should be passed through instead: the
    /// result is not smaller, its decoded pixels differ from the source, or
    /// the source turned out to be malformed part way through. Read and
    /// write failures are errors.
    pub fn transcode(
        &self,
        entry: &MemberEntry,
        work_dir: &Path,
    ) -> Result<Option<TranscodedImage>> {
        match self.try_transcode(entry, work_dir) {
            Err(Error::Tiff(msg)) => {
                warn!("{}: transcoding failed ({}), passing through", entry.name, msg);
                Ok(None)
            }
            other => other,
        }
    }

    fn try_transcode(
        &self,
        entry: &MemberEntry,
        work_dir: &Path,
    ) -> Result<Option<TranscodedImage>> {
        let mut source = BufReader::with_capacity(self.block_size, entry.open()?);
        let info = TiffInfo::read(&mut source)?;

        let mut file = tempfile::tempfile_in(work_dir)?;
        let size = {
            let mut writer = BufWriter::with_capacity(self.block_size, &mut file);
            let size = tiff::transcode(&info, &mut source, &mut writer, self.level)?;
            writer.into_inner().map_err(|e| e.into_error())?;
            size
        };

        if size >= entry.size {
            debug!(
                "{}: transcoded size {} is not below {}, passing through",
                entry.name, size, entry.size
            );
            return Ok(None);
        }

        source.seek(SeekFrom::Start(0))?;
        file.seek(SeekFrom::Start(0))?;
        let original = tiff::pixel_digest(&mut source)?;
        let rewritten =
            tiff::pixel_digest(&mut BufReader::with_capacity(self.block_size, &mut file))?;
        if original != rewritten {
            warn!("{}: transcoded pixels differ from source, passing through", entry.name);
            return Ok(None);
        }

        debug!("{}: {} -> {} bytes", entry.name, entry.size, size);
        Ok(Some(TranscodedImage { file, size }))
    }
}
