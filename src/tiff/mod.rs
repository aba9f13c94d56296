// src/tiff/mod.rs

//! Minimal TIFF inspection and lossless recompression
//!
//! Band images in a delivered dataset are usually single-band, uncompressed,
//! strip-organised GeoTIFFs. This module knows just enough TIFF to:
//!
//! - read the first image directory and decide whether the file is a
//!   candidate for recompression ([`TiffInfo::eligibility`])
//! - rewrite it with deflate compression and, for integer samples, the
//!   horizontal differencing predictor ([`transcode`])
//! - compute a digest of the decoded pixel data ([`pixel_digest`]) so a
//!   rewritten file can be checked against its source
//!
//! Every tag other than the strip layout, compression and predictor is
//! copied byte for byte, which keeps GeoTIFF georeferencing intact.

mod ifd;
mod transcode;

pub use ifd::{ByteOrder, Ifd, IfdEntry, field_type, read_header};
pub use transcode::transcode;

use crate::error::{Error, Result};
use crate::hash::Hasher;
use flate2::read::ZlibDecoder;
use std::fmt;
use std::io::{Read, Seek, SeekFrom};

/// TIFF tag numbers used by the inspector and transcoder
pub mod tag {
    pub const IMAGE_WIDTH: u16 = 256;
    pub const IMAGE_LENGTH: u16 = 257;
    pub const BITS_PER_SAMPLE: u16 = 258;
    pub const COMPRESSION: u16 = 259;
    pub const PHOTOMETRIC: u16 = 262;
    pub const IMAGE_DESCRIPTION: u16 = 270;
    pub const STRIP_OFFSETS: u16 = 273;
    pub const SAMPLES_PER_PIXEL: u16 = 277;
    pub const ROWS_PER_STRIP: u16 = 278;
    pub const STRIP_BYTE_COUNTS: u16 = 279;
    pub const PLANAR_CONFIGURATION: u16 = 284;
    pub const FREE_OFFSETS: u16 = 288;
    pub const PREDICTOR: u16 = 317;
    pub const TILE_WIDTH: u16 = 322;
    pub const TILE_LENGTH: u16 = 323;
    pub const TILE_OFFSETS: u16 = 324;
    pub const TILE_BYTE_COUNTS: u16 = 325;
    pub const SUB_IFDS: u16 = 330;
    pub const SAMPLE_FORMAT: u16 = 339;
    pub const EXIF_IFD: u16 = 34665;
    pub const GPS_IFD: u16 = 34853;
    pub const INTEROPERABILITY_IFD: u16 = 40965;
}

/// Tags whose values are file offsets the transcoder cannot relocate
const POINTER_TAGS: &[u16] = &[
    tag::FREE_OFFSETS,
    tag::EXIF_IFD,
    tag::GPS_IFD,
    tag::INTEROPERABILITY_IFD,
];

pub const COMPRESSION_NONE: u16 = 1;
pub const COMPRESSION_DEFLATE: u16 = 8;
/// Pre-standard deflate code still written by some producers
pub const COMPRESSION_DEFLATE_LEGACY: u16 = 32946;

pub const PREDICTOR_NONE: u16 = 1;
pub const PREDICTOR_HORIZONTAL: u16 = 2;

pub const SAMPLE_FORMAT_UINT: u16 = 1;
pub const SAMPLE_FORMAT_INT: u16 = 2;

/// Largest single strip the inspector will buffer
const MAX_STRIP_BYTES: u64 = 512 * 1024 * 1024;

/// Why an image can or cannot be recompressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    /// Compression tag other than "none"
    AlreadyCompressed(u16),
    /// More than one sample per pixel
    MultiBand(u16),
    /// Tiled rather than strip organised
    Tiled,
    /// Further images follow the first directory
    MultipleImages,
    /// Image carries SubIFDs (overviews)
    SubImages,
    /// A tag points at other structures in the file (EXIF, GPS, free space)
    PointerTag(u16),
    /// Strip tables do not describe the image
    BadStripLayout,
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible)
    }
}

impl fmt::Display for Eligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eligible => write!(f, "eligible"),
            Self::AlreadyCompressed(c) => write!(f, "already compressed (scheme {})", c),
            Self::MultiBand(n) => write!(f, "{} samples per pixel", n),
            Self::Tiled => write!(f, "tiled layout"),
            Self::MultipleImages => write!(f, "multiple images"),
            Self::SubImages => write!(f, "has sub-images"),
            Self::PointerTag(t) => write!(f, "offset-valued tag {}", t),
            Self::BadStripLayout => write!(f, "inconsistent strip tables"),
        }
    }
}

/// Structure of the first image in a TIFF file
#[derive(Debug, Clone)]
pub struct TiffInfo {
    pub byte_order: ByteOrder,
    pub width: u32,
    pub height: u32,
    pub bits_per_sample: u16,
    pub samples_per_pixel: u16,
    pub sample_format: u16,
    pub compression: u16,
    pub predictor: u16,
    pub planar_configuration: u16,
    pub rows_per_strip: u32,
    pub strip_offsets: Vec<u32>,
    pub strip_byte_counts: Vec<u32>,
    pub tiled: bool,
    pub has_sub_ifds: bool,
    /// The first directory, raw
    pub ifd: Ifd,
}

impl TiffInfo {
    /// Parse the header and first directory
    pub fn read<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let (order, offset) = read_header(reader)?;
        let ifd = Ifd::read(reader, order, offset)?;

        let mut number = |tag: u16, default: Option<u32>| -> Result<u32> {
            match ifd.get(tag) {
                Some(entry) => entry.first_u32(reader, order),
                None => default.ok_or_else(|| Error::tiff(format!("missing required tag {}", tag))),
            }
        };

        let width = number(tag::IMAGE_WIDTH, None)?;
        let height = number(tag::IMAGE_LENGTH, None)?;
        let bits_per_sample = number(tag::BITS_PER_SAMPLE, Some(1))?;
        let samples_per_pixel = number(tag::SAMPLES_PER_PIXEL, Some(1))?;
        let sample_format = number(tag::SAMPLE_FORMAT, Some(u32::from(SAMPLE_FORMAT_UINT)))?;
        let compression = number(tag::COMPRESSION, Some(u32::from(COMPRESSION_NONE)))?;
        let predictor = number(tag::PREDICTOR, Some(u32::from(PREDICTOR_NONE)))?;
        let planar_configuration = number(tag::PLANAR_CONFIGURATION, Some(1))?;
        let rows_per_strip = number(tag::ROWS_PER_STRIP, Some(u32::MAX))?;

        let tiled = ifd.get(tag::TILE_OFFSETS).is_some() || ifd.get(tag::TILE_WIDTH).is_some();
        let (strip_offsets, strip_byte_counts) = if tiled {
            (Vec::new(), Vec::new())
        } else {
            let offsets = ifd
                .get(tag::STRIP_OFFSETS)
                .ok_or_else(|| Error::tiff("missing strip offsets"))?
                .read_u32s(reader, order)?;
            let counts = ifd
                .get(tag::STRIP_BYTE_COUNTS)
                .ok_or_else(|| Error::tiff("missing strip byte counts"))?
                .read_u32s(reader, order)?;
            (offsets, counts)
        };

        let narrow = |value: u32, what: &str| -> Result<u16> {
            u16::try_from(value)
                .map_err(|_| Error::tiff(format!("{} out of range: {}", what, value)))
        };

        Ok(Self {
            byte_order: order,
            width,
            height,
            bits_per_sample: narrow(bits_per_sample, "bits per sample")?,
            samples_per_pixel: narrow(samples_per_pixel, "samples per pixel")?,
            sample_format: narrow(sample_format, "sample format")?,
            compression: narrow(compression, "compression")?,
            predictor: narrow(predictor, "predictor")?,
            planar_configuration: narrow(planar_configuration, "planar configuration")?,
            rows_per_strip,
            strip_offsets,
            strip_byte_counts,
            tiled,
            has_sub_ifds: ifd.get(tag::SUB_IFDS).is_some(),
            ifd,
        })
    }

    /// Decide whether the image can be transcoded
    pub fn eligibility(&self) -> Eligibility {
        if self.ifd.next_offset != 0 {
            return Eligibility::MultipleImages;
        }
        if self.has_sub_ifds {
            return Eligibility::SubImages;
        }
        if let Some(entry) = self
            .ifd
            .entries
            .iter()
            .find(|e| e.field_type == field_type::IFD || POINTER_TAGS.contains(&e.tag))
        {
            return Eligibility::PointerTag(entry.tag);
        }
        if self.tiled {
            return Eligibility::Tiled;
        }
        if self.compression != COMPRESSION_NONE {
            return Eligibility::AlreadyCompressed(self.compression);
        }
        if self.samples_per_pixel != 1 {
            return Eligibility::MultiBand(self.samples_per_pixel);
        }

        let strips = self.strip_count();
        let layout_ok = self.rows_per_strip > 0
            && self.bits_per_sample > 0
            && self.width > 0
            && strips > 0
            && self.strip_offsets.len() as u64 == strips
            && self.strip_byte_counts.len() as u64 == strips
            && self.strip_byte_counts.iter().all(|c| u64::from(*c) <= MAX_STRIP_BYTES);
        if !layout_ok {
            return Eligibility::BadStripLayout;
        }

        Eligibility::Eligible
    }

    /// Rows per strip, clamped to the image height
    pub fn effective_rows_per_strip(&self) -> u32 {
        self.rows_per_strip.min(self.height).max(1)
    }

    /// Number of strips the image height implies
    pub fn strip_count(&self) -> u64 {
        if self.height == 0 || self.rows_per_strip == 0 {
            return 0;
        }
        u64::from(self.height).div_ceil(u64::from(self.effective_rows_per_strip()))
    }

    /// Rows held by strip `index` (the last strip may be short)
    pub fn rows_in_strip(&self, index: usize) -> u32 {
        let rps = self.effective_rows_per_strip();
        let start = (index as u64) * u64::from(rps);
        let remaining = u64::from(self.height).saturating_sub(start);
        remaining.min(u64::from(rps)) as u32
    }

    /// Bytes in one decoded row, for chunky layouts
    pub fn row_bytes(&self) -> u64 {
        let samples = if self.planar_configuration == 2 {
            1
        } else {
            u64::from(self.samples_per_pixel)
        };
        (u64::from(self.width) * samples * u64::from(self.bits_per_sample)).div_ceil(8)
    }

    /// Whether horizontal differencing applies to these samples
    pub fn predictor_applicable(&self) -> bool {
        matches!(self.bits_per_sample, 8 | 16 | 32)
            && matches!(self.sample_format, SAMPLE_FORMAT_UINT | SAMPLE_FORMAT_INT)
            && self.planar_configuration != 2
    }

    /// Bytes per sample when samples are byte aligned
    fn sample_bytes(&self) -> usize {
        usize::from(self.bits_per_sample / 8)
    }

    /// Samples per row (stride for the predictor is samples per pixel)
    fn row_samples(&self) -> usize {
        self.width as usize * usize::from(self.samples_per_pixel)
    }
}

fn sample(row: &[u8], index: usize, width: usize, order: ByteOrder) -> u32 {
    let at = index * width;
    match width {
        1 => u32::from(row[at]),
        2 => u32::from(order.u16([row[at], row[at + 1]])),
        _ => order.u32([row[at], row[at + 1], row[at + 2], row[at + 3]]),
    }
}

fn set_sample(row: &mut [u8], index: usize, width: usize, order: ByteOrder, value: u32) {
    let at = index * width;
    match width {
        1 => row[at] = value as u8,
        2 => row[at..at + 2].copy_from_slice(&order.u16_bytes(value as u16)),
        _ => row[at..at + 4].copy_from_slice(&order.u32_bytes(value)),
    }
}

/// Apply horizontal differencing to one row in place
pub(crate) fn apply_predictor(row: &mut [u8], info: &TiffInfo) {
    let width = info.sample_bytes();
    let stride = usize::from(info.samples_per_pixel);
    let samples = info.row_samples().min(row.len() / width);
    let order = info.byte_order;

    for i in (stride..samples).rev() {
        let diff = sample(row, i, width, order).wrapping_sub(sample(row, i - stride, width, order));
        set_sample(row, i, width, order, diff);
    }
}

/// Undo horizontal differencing on one row in place
pub(crate) fn undo_predictor(row: &mut [u8], info: &TiffInfo) {
    let width = info.sample_bytes();
    let stride = usize::from(info.samples_per_pixel);
    let samples = info.row_samples().min(row.len() / width);
    let order = info.byte_order;

    for i in stride..samples {
        let sum = sample(row, i, width, order).wrapping_add(sample(row, i - stride, width, order));
        set_sample(row, i, width, order, sum);
    }
}

/// SHA-1 of the decoded pixel data of the first image
///
/// Strips are decoded one at a time. Only uncompressed and deflate images
/// are understood; anything else is an error.
pub fn pixel_digest<R: Read + Seek>(reader: &mut R) -> Result<String> {
    let info = TiffInfo::read(reader)?;
    if info.tiled {
        return Err(Error::tiff("tiled images are not supported"));
    }
    let compressed = match info.compression {
        COMPRESSION_NONE => false,
        COMPRESSION_DEFLATE | COMPRESSION_DEFLATE_LEGACY => true,
        other => return Err(Error::tiff(format!("unsupported compression scheme {}", other))),
    };
    if info.strip_offsets.len() != info.strip_byte_counts.len() {
        return Err(Error::tiff("strip offset and byte count tables differ in length"));
    }
    let unpredict = compressed && info.predictor == PREDICTOR_HORIZONTAL;
    if unpredict && !info.predictor_applicable() {
        return Err(Error::tiff("predictor on unsupported sample layout"));
    }

    let row_bytes = usize::try_from(info.row_bytes()).map_err(|_| Error::tiff("row too large"))?;
    let mut hasher = Hasher::new();

    for (index, (&offset, &count)) in info
        .strip_offsets
        .iter()
        .zip(info.strip_byte_counts.iter())
        .enumerate()
    {
        if u64::from(count) > MAX_STRIP_BYTES {
            return Err(Error::tiff(format!("strip {} too large ({} bytes)", index, count)));
        }
        reader.seek(SeekFrom::Start(u64::from(offset)))?;
        let mut raw = vec![0u8; count as usize];
        reader
            .read_exact(&mut raw)
            .map_err(|_| Error::tiff(format!("strip {} runs past end of file", index)))?;

        let mut data = if compressed {
            let mut decoded = Vec::new();
            ZlibDecoder::new(raw.as_slice())
                .read_to_end(&mut decoded)
                .map_err(|e| Error::tiff(format!("strip {} does not inflate: {}", index, e)))?;
            decoded
        } else {
            raw
        };

        let expected = info.rows_in_strip(index) as usize * row_bytes;
        if data.len() < expected {
            return Err(Error::tiff(format!(
                "strip {} decodes to {} bytes, expected {}",
                index,
                data.len(),
                expected
            )));
        }
        data.truncate(expected);

        if unpredict && row_bytes > 0 {
            for row in data.chunks_exact_mut(row_bytes) {
                undo_predictor(row, &info);
            }
        }
        hasher.update(&data);
    }

    Ok(hasher.finalize())
}
