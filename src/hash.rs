// src/hash.rs

//! Content digests for package members
//!
//! Every member written to a package is fed through a SHA-1 hasher as its
//! bytes pass by, so the checksum manifest can be produced without reading
//! anything twice. Digests are rendered as lowercase hex.
//!
//! [`DigestReader`] also bounds every read to the configured block size,
//! which keeps the transfer granularity of the whole pipeline fixed.

use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Length of a rendered SHA-1 digest
pub const SHA1_HEX_LEN: usize = 40;

/// Incremental SHA-1 hasher
#[derive(Clone, Default)]
pub struct Hasher {
    state: Sha1,
}

impl Hasher {
    /// Create a new hasher
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the hasher with more data
    pub fn update(&mut self, data: &[u8]) {
        self.state.update(data);
    }

    /// Finalize and return the lowercase hex digest
    pub fn finalize(self) -> String {
        format!("{:x}", self.state.finalize())
    }
}

/// Compute the SHA-1 of a byte slice
pub fn sha1(data: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Compute the SHA-1 of everything a reader yields
pub fn hash_reader<R: Read>(reader: R, block_size: usize) -> io::Result<String> {
    let mut reader = DigestReader::new(reader, block_size);
    io::copy(&mut reader, &mut io::sink())?;
    Ok(reader.finish().0)
}

/// Check whether a string is a well-formed lowercase SHA-1 hex digest
pub fn is_sha1_hex(s: &str) -> bool {
    s.len() == SHA1_HEX_LEN && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Reader adapter that digests bytes as they pass through
///
/// No single `read` call returns more than `block_size` bytes.
pub struct DigestReader<R> {
    inner: R,
    hasher: Hasher,
    block_size: usize,
    bytes: u64,
}

impl<R: Read> DigestReader<R> {
    /// Wrap a reader
    pub fn new(inner: R, block_size: usize) -> Self {
        Self {
            inner,
            hasher: Hasher::new(),
            block_size: block_size.max(1),
            bytes: 0,
        }
    }

    /// Consume the reader, returning the digest and the byte count
    pub fn finish(self) -> (String, u64) {
        (self.hasher.finalize(), self.bytes)
    }
}

impl<R: Read> Read for DigestReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let cap = buf.len().min(self.block_size);
        let n = self.inner.read(&mut buf[..cap])?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }
}

/// Compute the CRC32 of a whole file
///
/// Used as a cheap identity check of finished packages.
pub fn file_crc32(path: &Path, block_size: usize) -> io::Result<u32> {
    let mut file = File::open(path)?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buffer = vec![0u8; block_size.max(1)];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}
