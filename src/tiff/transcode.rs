// src/tiff/transcode.rs

//! Rewrite an uncompressed strip TIFF with deflate compression
//!
//! Output layout: header, compressed strips, out-of-line tag data, then the
//! single IFD. The header's IFD offset is patched once the IFD position is
//! known.

use super::ifd::{ByteOrder, field_type};
use super::{COMPRESSION_DEFLATE, Eligibility, PREDICTOR_HORIZONTAL, TiffInfo, apply_predictor, tag};
use crate::error::{Error, Result};
use flate2::Compression;
use flate2::write::ZlibEncoder;
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::debug;

/// A directory entry as it will be written
struct OutEntry {
    tag: u16,
    field_type: u16,
    count: u32,
    data: Vec<u8>,
}

impl OutEntry {
    fn short(tag: u16, value: u16, order: ByteOrder) -> Self {
        Self {
            tag,
            field_type: field_type::SHORT,
            count: 1,
            data: order.u16_bytes(value).to_vec(),
        }
    }

    fn longs(tag: u16, values: &[u32], order: ByteOrder) -> Self {
        Self {
            tag,
            field_type: field_type::LONG,
            count: values.len() as u32,
            data: values.iter().flat_map(|v| order.u32_bytes(*v)).collect(),
        }
    }
}

fn offset32(pos: u64) -> Result<u32> {
    u32::try_from(pos).map_err(|_| Error::tiff("output exceeds classic TIFF size limit"))
}

fn pad_to_word<W: Write + Seek>(writer: &mut W) -> Result<u64> {
    let pos = writer.stream_position()?;
    if pos % 2 == 1 {
        writer.write_all(&[0])?;
        return Ok(pos + 1);
    }
    Ok(pos)
}

/// Transcode the image described by `info` from `source` into `dest`
///
/// `dest` must be empty and positioned at its start. Returns the number of
/// bytes written. The caller is expected to confirm the pixel data with
/// [`super::pixel_digest`] before trusting the result.
pub fn transcode<R, W>(info: &TiffInfo, source: &mut R, dest: &mut W, level: u32) -> Result<u64>
where
    R: Read + Seek,
    W: Write + Seek,
{
    let eligibility = info.eligibility();
    if eligibility != Eligibility::Eligible {
        return Err(Error::tiff(format!("image is not transcodable: {}", eligibility)));
    }

    let order = info.byte_order;
    let row_bytes = info.row_bytes();
    let use_predictor = info.predictor_applicable()
        && info
            .strip_byte_counts
            .iter()
            .enumerate()
            .all(|(i, c)| u64::from(*c) == u64::from(info.rows_in_strip(i)) * row_bytes);

    // Header with a placeholder IFD offset
    dest.write_all(&order.marker())?;
    dest.write_all(&order.u16_bytes(42))?;
    dest.write_all(&[0u8; 4])?;

    let mut offsets = Vec::with_capacity(info.strip_offsets.len());
    let mut counts = Vec::with_capacity(info.strip_offsets.len());
    let mut row = vec![0u8; row_bytes as usize];

    for (index, (&offset, &count)) in info
        .strip_offsets
        .iter()
        .zip(info.strip_byte_counts.iter())
        .enumerate()
    {
        let start = dest.stream_position()?;
        source.seek(SeekFrom::Start(u64::from(offset)))?;
        let mut strip = source.by_ref().take(u64::from(count));

        let mut encoder = ZlibEncoder::new(&mut *dest, Compression::new(level));
        if use_predictor {
            for _ in 0..info.rows_in_strip(index) {
                strip
                    .read_exact(&mut row)
                    .map_err(|_| Error::tiff(format!("strip {} runs past end of file", index)))?;
                apply_predictor(&mut row, info);
                encoder.write_all(&row)?;
            }
        } else {
            let copied = io::copy(&mut strip, &mut encoder)?;
            if copied != u64::from(count) {
                return Err(Error::tiff(format!("strip {} runs past end of file", index)));
            }
        }
        encoder.finish()?;

        let end = dest.stream_position()?;
        offsets.push(offset32(start)?);
        counts.push(offset32(end - start)?);
    }

    let mut entries = Vec::with_capacity(info.ifd.entries.len() + 1);
    for entry in &info.ifd.entries {
        match entry.tag {
            tag::COMPRESSION | tag::STRIP_OFFSETS | tag::STRIP_BYTE_COUNTS | tag::PREDICTOR => {}
            _ => entries.push(OutEntry {
                tag: entry.tag,
                field_type: entry.field_type,
                count: entry.count,
                data: entry.read_bytes(source, order)?,
            }),
        }
    }
    entries.push(OutEntry::short(tag::COMPRESSION, COMPRESSION_DEFLATE, order));
    entries.push(OutEntry::longs(tag::STRIP_OFFSETS, &offsets, order));
    entries.push(OutEntry::longs(tag::STRIP_BYTE_COUNTS, &counts, order));
    if use_predictor {
        entries.push(OutEntry::short(tag::PREDICTOR, PREDICTOR_HORIZONTAL, order));
    }
    entries.sort_by_key(|e| e.tag);

    // Out-of-line values
    let mut value_fields = Vec::with_capacity(entries.len());
    for entry in &entries {
        if entry.data.len() > 4 {
            let at = pad_to_word(dest)?;
            dest.write_all(&entry.data)?;
            value_fields.push(order.u32_bytes(offset32(at)?));
        } else {
            let mut inline = [0u8; 4];
            inline[..entry.data.len()].copy_from_slice(&entry.data);
            value_fields.push(inline);
        }
    }

    let ifd_at = offset32(pad_to_word(dest)?)?;
    dest.write_all(&order.u16_bytes(entries.len() as u16))?;
    for (entry, value) in entries.iter().zip(value_fields.iter()) {
        dest.write_all(&order.u16_bytes(entry.tag))?;
        dest.write_all(&order.u16_bytes(entry.field_type))?;
        dest.write_all(&order.u32_bytes(entry.count))?;
        dest.write_all(value)?;
    }
    dest.write_all(&[0u8; 4])?;
    let total = dest.stream_position()?;

    dest.seek(SeekFrom::Start(4))?;
    dest.write_all(&order.u32_bytes(ifd_at))?;
    dest.seek(SeekFrom::Start(total))?;
    dest.flush()?;

    debug!(
        "Transcoded {}x{} image in {} strips (predictor: {}), {} bytes",
        info.width,
        info.height,
        offsets.len(),
        use_predictor,
        total
    );
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::super::{COMPRESSION_NONE, pixel_digest};
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_transcode_preserves_pixels_and_tags() {
        let source = uncompressed_u16(64, 40, 16);
        let info = TiffInfo::read(&mut Cursor::new(&source)).unwrap();

        let mut out = Cursor::new(Vec::new());
        let written = transcode(&info, &mut Cursor::new(&source), &mut out, 9).unwrap();
        let out = out.into_inner();
        assert_eq!(written, out.len() as u64);
        assert!(out.len() < source.len());

        let rewritten = TiffInfo::read(&mut Cursor::new(&out)).unwrap();
        assert_eq!(rewritten.compression, COMPRESSION_DEFLATE);
        assert_eq!(rewritten.predictor, PREDICTOR_HORIZONTAL);
        assert_eq!((rewritten.width, rewritten.height), (64, 40));
        assert_eq!(rewritten.strip_offsets.len(), 3);

        let description = rewritten
            .ifd
            .get(tag::IMAGE_DESCRIPTION)
            .unwrap()
            .read_bytes(&mut Cursor::new(&out), rewritten.byte_order)
            .unwrap();
        assert_eq!(description, b"synthetic band\0");

        assert_eq!(
            pixel_digest(&mut Cursor::new(&source)).unwrap(),
            pixel_digest(&mut Cursor::new(&out)).unwrap()
        );
    }

    #[test]
    fn test_transcode_without_predictor() {
        // 12-bit samples are not byte aligned, so no predictor is applied
        let pixels = vec![0x5a; 48 * 8];
        let source = build(32, 8, 8, 12, 1, COMPRESSION_NONE, &pixels);
        let info = TiffInfo::read(&mut Cursor::new(&source)).unwrap();
        assert!(!info.predictor_applicable());

        let mut out = Cursor::new(Vec::new());
        transcode(&info, &mut Cursor::new(&source), &mut out, 6).unwrap();
        let out = out.into_inner();

        let rewritten = TiffInfo::read(&mut Cursor::new(&out)).unwrap();
        assert_eq!(rewritten.compression, COMPRESSION_DEFLATE);
        assert!(rewritten.ifd.get(tag::PREDICTOR).is_none());
        assert_eq!(
            pixel_digest(&mut Cursor::new(&source)).unwrap(),
            pixel_digest(&mut Cursor::new(&out)).unwrap()
        );
    }

    #[test]
    fn test_transcode_refuses_ineligible() {
        let rgb = build(4, 2, 2, 8, 3, COMPRESSION_NONE, &[7u8; 24]);
        let info = TiffInfo::read(&mut Cursor::new(&rgb)).unwrap();
        let mut out = Cursor::new(Vec::new());
        assert!(matches!(
            transcode(&info, &mut Cursor::new(&rgb), &mut out, 9),
            Err(Error::Tiff(_))
        ));
    }
}
