// src/tiff/ifd.rs

//! TIFF header and image file directory (IFD) parsing
//!
//! Only classic TIFF is understood. Entry values are kept as raw bytes in
//! the file's own byte order so they can be copied verbatim.

use crate::error::{Error, Result};
use std::io::{Read, Seek, SeekFrom};

/// Classic TIFF magic number
const TIFF_MAGIC: u16 = 42;
/// BigTIFF magic number (not supported)
const BIGTIFF_MAGIC: u16 = 43;

/// Upper bound on out-of-line tag data, to reject garbage offsets early
const MAX_TAG_BYTES: u64 = 64 * 1024 * 1024;

/// Upper bound on entries in one directory
const MAX_ENTRIES: u16 = 4096;

/// TIFF field types
pub mod field_type {
    pub const BYTE: u16 = 1;
    pub const ASCII: u16 = 2;
    pub const SHORT: u16 = 3;
    pub const LONG: u16 = 4;
    pub const RATIONAL: u16 = 5;
    pub const SBYTE: u16 = 6;
    pub const UNDEFINED: u16 = 7;
    pub const SSHORT: u16 = 8;
    pub const SLONG: u16 = 9;
    pub const SRATIONAL: u16 = 10;
    pub const FLOAT: u16 = 11;
    pub const DOUBLE: u16 = 12;
    pub const IFD: u16 = 13;

    /// Size in bytes of one value of the given type
    pub fn size(field_type: u16) -> Option<u64> {
        match field_type {
            BYTE | ASCII | SBYTE | UNDEFINED => Some(1),
            SHORT | SSHORT => Some(2),
            LONG | SLONG | FLOAT | IFD => Some(4),
            RATIONAL | SRATIONAL | DOUBLE => Some(8),
            _ => None,
        }
    }
}

/// Byte order of a TIFF file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// `II`
    Little,
    /// `MM`
    Big,
}

impl ByteOrder {
    /// Header marker bytes
    pub fn marker(self) -> [u8; 2] {
        match self {
            Self::Little => *b"II",
            Self::Big => *b"MM",
        }
    }

    pub fn u16(self, bytes: [u8; 2]) -> u16 {
        match self {
            Self::Little => u16::from_le_bytes(bytes),
            Self::Big => u16::from_be_bytes(bytes),
        }
    }

    pub fn u32(self, bytes: [u8; 4]) -> u32 {
        match self {
            Self::Little => u32::from_le_bytes(bytes),
            Self::Big => u32::from_be_bytes(bytes),
        }
    }

    pub fn u16_bytes(self, value: u16) -> [u8; 2] {
        match self {
            Self::Little => value.to_le_bytes(),
            Self::Big => value.to_be_bytes(),
        }
    }

    pub fn u32_bytes(self, value: u32) -> [u8; 4] {
        match self {
            Self::Little => value.to_le_bytes(),
            Self::Big => value.to_be_bytes(),
        }
    }
}

fn read_array<R: Read, const N: usize>(reader: &mut R) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Read the 8-byte header, returning the byte order and first IFD offset
pub fn read_header<R: Read + Seek>(reader: &mut R) -> Result<(ByteOrder, u32)> {
    reader.seek(SeekFrom::Start(0))?;
    let header: [u8; 8] =
        read_array(reader).map_err(|_| Error::tiff("file too short for a TIFF header"))?;

    let order = match &header[0..2] {
        b"II" => ByteOrder::Little,
        b"MM" => ByteOrder::Big,
        other => return Err(Error::tiff(format!("invalid byte order marker {:?}", other))),
    };

    match order.u16([header[2], header[3]]) {
        TIFF_MAGIC => {}
        BIGTIFF_MAGIC => return Err(Error::tiff("BigTIFF is not supported")),
        magic => return Err(Error::tiff(format!("invalid TIFF magic {}", magic))),
    }

    let offset = order.u32([header[4], header[5], header[6], header[7]]);
    Ok((order, offset))
}

/// One 12-byte directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfdEntry {
    pub tag: u16,
    pub field_type: u16,
    pub count: u32,
    /// Raw value/offset field
    pub value: [u8; 4],
}

impl IfdEntry {
    /// Total length of the entry's values in bytes
    pub fn value_len(&self) -> Result<u64> {
        let size = field_type::size(self.field_type).ok_or_else(|| {
            Error::tiff(format!(
                "tag {} has unknown field type {}",
                self.tag, self.field_type
            ))
        })?;
        Ok(size * u64::from(self.count))
    }

    /// Whether the values fit in the entry itself
    pub fn is_inline(&self) -> Result<bool> {
        Ok(self.value_len()? <= 4)
    }

    /// Read the entry's raw value bytes, following the offset if needed
    pub fn read_bytes<R: Read + Seek>(&self, reader: &mut R, order: ByteOrder) -> Result<Vec<u8>> {
        let len = self.value_len()?;
        if self.is_inline()? {
            return Ok(self.value[..len as usize].to_vec());
        }
        if len > MAX_TAG_BYTES {
            return Err(Error::tiff(format!("tag {} value too large ({} bytes)", self.tag, len)));
        }

        reader.seek(SeekFrom::Start(u64::from(order.u32(self.value))))?;
        let mut data = vec![0u8; len as usize];
        reader
            .read_exact(&mut data)
            .map_err(|_| Error::tiff(format!("tag {} data runs past end of file", self.tag)))?;
        Ok(data)
    }

    /// Read an integer array (BYTE, SHORT or LONG)
    pub fn read_u32s<R: Read + Seek>(&self, reader: &mut R, order: ByteOrder) -> Result<Vec<u32>> {
        let data = self.read_bytes(reader, order)?;
        let values = match self.field_type {
            field_type::BYTE => data.iter().map(|b| u32::from(*b)).collect(),
            field_type::SHORT => data
                .chunks_exact(2)
                .map(|c| u32::from(order.u16([c[0], c[1]])))
                .collect(),
            field_type::LONG => data
                .chunks_exact(4)
                .map(|c| order.u32([c[0], c[1], c[2], c[3]]))
                .collect(),
            other => {
                return Err(Error::tiff(format!(
                    "tag {} has non-integer field type {}",
                    self.tag, other
                )));
            }
        };
        Ok(values)
    }

    /// First integer value of the entry
    pub fn first_u32<R: Read + Seek>(&self, reader: &mut R, order: ByteOrder) -> Result<u32> {
        self.read_u32s(reader, order)?
            .first()
            .copied()
            .ok_or_else(|| Error::tiff(format!("tag {} has no values", self.tag)))
    }
}

/// An image file directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ifd {
    pub entries: Vec<IfdEntry>,
    /// Offset of the next directory, zero if this is the last one
    pub next_offset: u32,
}

impl Ifd {
    /// Read the directory at `offset`
    pub fn read<R: Read + Seek>(reader: &mut R, order: ByteOrder, offset: u32) -> Result<Self> {
        if offset < 8 {
            return Err(Error::tiff(format!("invalid IFD offset {}", offset)));
        }
        reader.seek(SeekFrom::Start(u64::from(offset)))?;

        let count = order.u16(read_array(reader).map_err(|_| Error::tiff("truncated IFD"))?);
        if count == 0 || count > MAX_ENTRIES {
            return Err(Error::tiff(format!("implausible IFD entry count {}", count)));
        }

        let mut entries = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let raw: [u8; 12] = read_array(reader).map_err(|_| Error::tiff("truncated IFD entry"))?;
            entries.push(IfdEntry {
                tag: order.u16([raw[0], raw[1]]),
                field_type: order.u16([raw[2], raw[3]]),
                count: order.u32([raw[4], raw[5], raw[6], raw[7]]),
                value: [raw[8], raw[9], raw[10], raw[11]],
            });
        }

        let next_offset = order.u32(read_array(reader).map_err(|_| Error::tiff("truncated IFD"))?);
        Ok(Self { entries, next_offset })
    }

    /// Look up an entry by tag
    pub fn get(&self, tag: u16) -> Option<&IfdEntry> {
        self.entries.iter().find(|e| e.tag == tag)
    }
}
