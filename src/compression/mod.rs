// src/compression/mod.rs
//! Outer compression of delivered dataset archives
//!
//! USGS bundles arrive as `.tar.gz`; older holdings and local re-deliveries
//! also use plain tar, xz and zstd. Detection looks at the leading bytes and
//! only falls back to the file name when the file is too short to tell.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("cannot open {format} stream: {source}")]
    Stream {
        format: CompressionFormat,
        #[source]
        source: io::Error,
    },
}

/// Outer compression of an input archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionFormat {
    Plain,
    Gzip,
    Xz,
    Zstd,
}

/// Per-format signature and the name suffixes it is delivered under
struct Signature {
    format: CompressionFormat,
    magic: &'static [u8],
    suffixes: &'static [&'static str],
}

const SIGNATURES: &[Signature] = &[
    Signature {
        format: CompressionFormat::Gzip,
        magic: &[0x1f, 0x8b],
        suffixes: &[".tar.gz", ".tgz", ".gz"],
    },
    Signature {
        format: CompressionFormat::Xz,
        magic: &[0xfd, b'7', b'z', b'X', b'Z', 0x00],
        suffixes: &[".tar.xz", ".txz", ".xz"],
    },
    Signature {
        format: CompressionFormat::Zstd,
        magic: &[0x28, 0xb5, 0x2f, 0xfd],
        suffixes: &[".tar.zst", ".tar.zstd", ".tzst", ".zst", ".zstd"],
    },
];

/// Longest magic in [`SIGNATURES`]
const SNIFF_LEN: usize = 6;

impl CompressionFormat {
    /// Guess from an archive's file name
    ///
    /// ```
    /// use eorepack::compression::CompressionFormat;
    ///
    /// assert_eq!(CompressionFormat::from_name("LT05_L1GS.tar.gz"), CompressionFormat::Gzip);
    /// assert_eq!(CompressionFormat::from_name("LT05_L1GS.tar"), CompressionFormat::Plain);
    /// ```
    pub fn from_name(name: &str) -> Self {
        SIGNATURES
            .iter()
            .find(|sig| sig.suffixes.iter().any(|s| name.ends_with(s)))
            .map_or(Self::Plain, |sig| sig.format)
    }

    /// Identify a stream from its first bytes
    pub fn sniff(head: &[u8]) -> Self {
        SIGNATURES
            .iter()
            .find(|sig| head.starts_with(sig.magic))
            .map_or(Self::Plain, |sig| sig.format)
    }

    /// Identify an archive on disk, trusting content over name
    pub fn detect_file(path: &Path) -> io::Result<Self> {
        let mut head = Vec::with_capacity(SNIFF_LEN);
        File::open(path)?
            .take(SNIFF_LEN as u64)
            .read_to_end(&mut head)?;

        if head.len() < 2 {
            return Ok(Self::from_name(&path.to_string_lossy()));
        }
        Ok(Self::sniff(&head))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "tar",
            Self::Gzip => "gzip",
            Self::Xz => "xz",
            Self::Zstd => "zstd",
        }
    }

    /// Plain tar can be re-read from arbitrary offsets
    pub fn is_seekable(&self) -> bool {
        *self == Self::Plain
    }
}

impl std::fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dataset name with tar and compression suffixes removed
///
/// ```
/// use eorepack::compression::archive_stem;
///
/// assert_eq!(archive_stem("LT05_L1GS_092091_19910506_20170126_01_T2.tar.gz"),
///            "LT05_L1GS_092091_19910506_20170126_01_T2");
/// assert_eq!(archive_stem("dataset"), "dataset");
/// ```
pub fn archive_stem(file_name: &str) -> &str {
    let unpacked = SIGNATURES
        .iter()
        .flat_map(|sig| sig.suffixes.iter())
        .filter_map(|suffix| file_name.strip_suffix(suffix))
        .min_by_key(|stem| stem.len())
        .unwrap_or(file_name);
    unpacked.strip_suffix(".tar").unwrap_or(unpacked)
}

/// Wrap `reader` so it yields the uncompressed tar stream
pub fn create_decoder<'a, R: Read + 'a>(
    reader: R,
    format: CompressionFormat,
) -> Result<Box<dyn Read + 'a>, CompressionError> {
    Ok(match format {
        CompressionFormat::Plain => Box::new(reader),
        CompressionFormat::Gzip => Box::new(flate2::read::MultiGzDecoder::new(reader)),
        CompressionFormat::Xz => Box::new(xz2::read::XzDecoder::new_multi_decoder(reader)),
        CompressionFormat::Zstd => Box::new(
            zstd::Decoder::new(reader)
                .map_err(|source| CompressionError::Stream { format, source })?,
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::fast());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_from_name() {
        assert_eq!(CompressionFormat::from_name("x.tgz"), CompressionFormat::Gzip);
        assert_eq!(CompressionFormat::from_name("x.tar.xz"), CompressionFormat::Xz);
        assert_eq!(CompressionFormat::from_name("x.tar.zstd"), CompressionFormat::Zstd);
        assert_eq!(CompressionFormat::from_name("x.TIF"), CompressionFormat::Plain);
    }

    #[test]
    fn test_sniff() {
        assert_eq!(CompressionFormat::sniff(&gzip(b"abc")), CompressionFormat::Gzip);
        assert_eq!(CompressionFormat::sniff(b"\xfd7zXZ\x00rest"), CompressionFormat::Xz);
        assert_eq!(CompressionFormat::sniff(&[0x28, 0xb5, 0x2f, 0xfd, 0]), CompressionFormat::Zstd);
        // Truncated gzip magic
        assert_eq!(CompressionFormat::sniff(&[0x1f]), CompressionFormat::Plain);
    }

    #[test]
    fn test_detect_file_trusts_content() {
        let temp_dir = tempfile::tempdir().unwrap();

        let mislabelled = temp_dir.path().join("dataset.tar");
        std::fs::write(&mislabelled, gzip(b"payload")).unwrap();
        assert_eq!(
            CompressionFormat::detect_file(&mislabelled).unwrap(),
            CompressionFormat::Gzip
        );

        let empty = temp_dir.path().join("empty.tar.zst");
        std::fs::write(&empty, b"").unwrap();
        assert_eq!(CompressionFormat::detect_file(&empty).unwrap(), CompressionFormat::Zstd);
    }

    #[test]
    fn test_decoders() {
        let mut out = Vec::new();
        create_decoder(gzip(b"band data").as_slice(), CompressionFormat::Gzip)
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, b"band data");

        let packed = zstd::encode_all(&b"mtl text"[..], 3).unwrap();
        out.clear();
        create_decoder(packed.as_slice(), CompressionFormat::Zstd)
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, b"mtl text");
    }

    #[test]
    fn test_archive_stem() {
        assert_eq!(archive_stem("a.tar.zst"), "a");
        assert_eq!(archive_stem("a.tgz"), "a");
        assert_eq!(archive_stem("a.tar"), "a");
        assert_eq!(archive_stem("a.b.tar.gz"), "a.b");
        assert_eq!(archive_stem("a.txt"), "a.txt");
    }
}
