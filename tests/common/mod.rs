// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.
//!
//! Builds synthetic Landsat datasets laid out the way the ingest area holds
//! them (`.../USGS/L1/Landsat/C1/<path_row>/<tile>/`), either expanded or
//! packed into a tar archive.

#![allow(dead_code)]

use eorepack::{RepackConfig, RepackOutcome, Repackager};
use flate2::write::{GzEncoder, ZlibEncoder};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

pub const PRODUCT_ID: &str = "LT05_L1GS_092091_19910506_20170126_01_T2";

/// Layout segments between the ingest root and the dataset
pub const LAYOUT: &str = "USGS/L1/Landsat/C1/092_091/LT50920911991126";

/// Where packages for [`PRODUCT_ID`] land, relative to the output base
pub const OUTPUT_RELATIVE: &str =
    "L1/Landsat/C1/092_091/LT50920911991126/LT05_L1GS_092091_19910506_20170126_01_T2.tar";

/// Size of the generated metadata file
pub const MTL_SIZE: usize = 6693;

/// Block size used by the tests, far below the production default
pub const TEST_BLOCK_SIZE: usize = 32;

/// Band suffixes of the generated images
pub const BANDS: &[&str] = &["B1", "B2", "B3", "B4", "B5", "B6", "B7", "B8", "BQA"];

/// Archive compression used when packing a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packing {
    Plain,
    Gzip,
    Xz,
    Zstd,
}

/// How the band images are encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStyle {
    /// Uncompressed single-band 16-bit, as delivered by USGS
    Uncompressed,
    /// Deflate-compressed three-band 8-bit
    CompressedRgb,
}

/// Options for a generated dataset
#[derive(Debug, Clone, Copy)]
pub struct DatasetSpec {
    pub images: ImageStyle,
    pub gap_mask: bool,
    pub extras: bool,
}

impl Default for DatasetSpec {
    fn default() -> Self {
        Self {
            images: ImageStyle::Uncompressed,
            gap_mask: false,
            extras: false,
        }
    }
}

/// One member read back from a package
#[derive(Debug, Clone)]
pub struct TarMember {
    pub name: String,
    pub is_dir: bool,
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    pub data: Vec<u8>,
}

/// Deterministic metadata text of exactly [`MTL_SIZE`] bytes
pub fn mtl_content() -> Vec<u8> {
    let mut text = String::from("GROUP = L1_METADATA_FILE\n");
    let mut i = 0;
    while text.len() < MTL_SIZE {
        text.push_str(&format!("    PARAMETER_{:04} = {}\n", i, i * 37 % 1000));
        i += 1;
    }
    text.truncate(MTL_SIZE - 1);
    text.push('\n');
    text.into_bytes()
}

/// Little-endian strip TIFF builder
fn tiff_bytes(
    width: u32,
    height: u32,
    rows_per_strip: u32,
    bits: u16,
    samples: u16,
    compression: u16,
    strips: Vec<Vec<u8>>,
) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(b"II");
    data.extend_from_slice(&42u16.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());

    let mut offsets = Vec::new();
    for strip in &strips {
        offsets.push(data.len() as u32);
        data.extend_from_slice(strip);
    }
    if data.len() % 2 == 1 {
        data.push(0);
    }

    let description = b"synthetic landsat band\0";
    let description_at = data.len() as u32;
    data.extend_from_slice(description);
    let offsets_at = data.len() as u32;
    for o in &offsets {
        data.extend_from_slice(&o.to_le_bytes());
    }
    let counts_at = data.len() as u32;
    for s in &strips {
        data.extend_from_slice(&(s.len() as u32).to_le_bytes());
    }
    let bits_at = data.len() as u32;
    for _ in 0..samples {
        data.extend_from_slice(&bits.to_le_bytes());
    }

    let short = |v: u16| {
        let mut b = [0u8; 4];
        b[..2].copy_from_slice(&v.to_le_bytes());
        b
    };
    let long = |v: u32| v.to_le_bytes();
    let n = strips.len() as u32;
    let bits_value = if samples == 1 { short(bits) } else { long(bits_at) };
    let offsets_value = if n == 1 { long(offsets[0]) } else { long(offsets_at) };
    let counts_value = if n == 1 {
        long(strips[0].len() as u32)
    } else {
        long(counts_at)
    };

    // (tag, type, count, value), sorted by tag
    let entries: Vec<(u16, u16, u32, [u8; 4])> = vec![
        (256, 4, 1, long(width)),
        (257, 4, 1, long(height)),
        (258, 3, u32::from(samples), bits_value),
        (259, 3, 1, short(compression)),
        (262, 3, 1, short(if samples == 3 { 2 } else { 1 })),
        (270, 2, description.len() as u32, long(description_at)),
        (273, 4, n, offsets_value),
        (277, 3, 1, short(samples)),
        (278, 4, 1, long(rows_per_strip)),
        (279, 4, n, counts_value),
    ];

    let ifd_at = data.len() as u32;
    data[4..8].copy_from_slice(&ifd_at.to_le_bytes());
    data.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for (tag, field_type, count, value) in entries {
        data.extend_from_slice(&tag.to_le_bytes());
        data.extend_from_slice(&field_type.to_le_bytes());
        data.extend_from_slice(&count.to_le_bytes());
        data.extend_from_slice(&value);
    }
    data.extend_from_slice(&0u32.to_le_bytes());
    data
}

/// Uncompressed single-band 16-bit image with smooth content
pub fn uncompressed_band(seed: u32) -> Vec<u8> {
    let (width, height, rows_per_strip) = (64u32, 48u32, 16u32);
    let mut strips = Vec::new();
    for strip in 0..height / rows_per_strip {
        let mut bytes = Vec::new();
        for y in strip * rows_per_strip..(strip + 1) * rows_per_strip {
            for x in 0..width {
                let value = (seed * 100 + y * 5 + x * 2) as u16;
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
        strips.push(bytes);
    }
    tiff_bytes(width, height, rows_per_strip, 16, 1, 1, strips)
}

/// Deflate-compressed three-band 8-bit image
pub fn compressed_rgb(seed: u32) -> Vec<u8> {
    let (width, height) = (32u32, 16u32);
    let mut pixels = Vec::new();
    for y in 0..height {
        for x in 0..width {
            pixels.extend_from_slice(&[(x + seed) as u8, (y * 3) as u8, (x ^ y) as u8]);
        }
    }
    let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&pixels).unwrap();
    let strip = encoder.finish().unwrap();
    tiff_bytes(width, height, height, 8, 3, 8, vec![strip])
}

fn write_with_mode(path: &Path, data: &[u8], mode: u32) {
    fs::write(path, data).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
}

fn mkdir_with_mode(path: &Path, mode: u32) {
    fs::create_dir_all(path).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
}

/// Write an expanded dataset into `dir`
pub fn write_dataset(dir: &Path, spec: DatasetSpec) {
    mkdir_with_mode(dir, 0o775);

    write_with_mode(&dir.join(format!("{}_MTL.txt", PRODUCT_ID)), &mtl_content(), 0o664);
    write_with_mode(
        &dir.join(format!("{}_ANG.txt", PRODUCT_ID)),
        b"GROUP = FILE_HEADER\n  SATELLITE = \"LANDSAT_5\"\nEND_GROUP = FILE_HEADER\nEND\n",
        0o664,
    );
    write_with_mode(&dir.join("README.GTF"), b"Landsat ground truth readme\n", 0o664);

    for (i, band) in BANDS.iter().enumerate() {
        let data = match spec.images {
            ImageStyle::Uncompressed => uncompressed_band(i as u32),
            ImageStyle::CompressedRgb => compressed_rgb(i as u32),
        };
        write_with_mode(&dir.join(format!("{}_{}.TIF", PRODUCT_ID, band)), &data, 0o664);
    }

    if spec.gap_mask {
        let gap_mask = dir.join("gap_mask");
        mkdir_with_mode(&gap_mask, 0o775);
        for (i, band) in ["B1", "B2"].iter().enumerate() {
            write_with_mode(
                &gap_mask.join(format!("{}_GM_{}.TIF", PRODUCT_ID, band)),
                &compressed_rgb(100 + i as u32),
                0o664,
            );
        }
    }

    if spec.extras {
        let extras = dir.join("extras");
        mkdir_with_mode(&extras, 0o775);
        write_with_mode(&extras.join("notes.txt"), b"extra notes\n", 0o664);
    }
}

/// Create an expanded dataset under `root/in/USGS/...`
pub fn dataset_directory(root: &Path, spec: DatasetSpec) -> PathBuf {
    let dir = root.join("in").join(LAYOUT);
    write_dataset(&dir, spec);
    dir
}

/// Pack an expanded dataset into `root/packed/USGS/.../<product>.tar[.gz|.zst]`
///
/// Members are written in reverse name order so nothing downstream can rely
/// on the archive's native order.
pub fn dataset_archive(root: &Path, spec: DatasetSpec, packing: Packing) -> PathBuf {
    let staging = root.join("unpacked");
    write_dataset(&staging, spec);

    let extension = match packing {
        Packing::Plain => "tar",
        Packing::Gzip => "tar.gz",
        Packing::Xz => "tar.xz",
        Packing::Zstd => "tar.zst",
    };
    let tile = root.join("packed").join(LAYOUT);
    fs::create_dir_all(&tile).unwrap();
    let path = tile.join(format!("{}.{}", PRODUCT_ID, extension));

    let mut entries: Vec<_> = WalkDir::new(&staging)
        .min_depth(1)
        .into_iter()
        .map(|e| e.unwrap())
        .collect();
    entries.sort_by(|a, b| b.path().cmp(a.path()));

    let file = File::create(&path).unwrap();
    let writer: Box<dyn Write> = match packing {
        Packing::Plain => Box::new(file),
        Packing::Gzip => Box::new(GzEncoder::new(file, flate2::Compression::default())),
        Packing::Xz => Box::new(xz2::write::XzEncoder::new(file, 6)),
        Packing::Zstd => Box::new(zstd::Encoder::new(file, 3).unwrap().auto_finish()),
    };
    let mut builder = tar::Builder::new(writer);

    for entry in entries {
        let name = entry
            .path()
            .strip_prefix(&staging)
            .unwrap()
            .to_string_lossy()
            .into_owned();
        let mut header = tar::Header::new_gnu();
        header.set_mtime(1_485_388_800);
        header.set_uid(1000);
        header.set_gid(1000);
        if entry.file_type().is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_mode(0o775);
            header.set_size(0);
            builder
                .append_data(&mut header, format!("{}/", name), std::io::empty())
                .unwrap();
        } else {
            let data = fs::read(entry.path()).unwrap();
            header.set_entry_type(tar::EntryType::Regular);
            header.set_mode(0o664);
            header.set_size(data.len() as u64);
            builder.append_data(&mut header, &name, data.as_slice()).unwrap();
        }
    }
    builder.into_inner().unwrap().flush().unwrap();

    fs::remove_dir_all(&staging).unwrap();
    path
}

/// Header whose name field holds `name` verbatim, without path cleanup
fn raw_named_header(name: &str, entry_type: tar::EntryType, mode: u32, size: u64) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.as_old_mut().name[..name.len()].copy_from_slice(name.as_bytes());
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_size(size);
    header.set_mtime(1_485_388_800);
    header.set_cksum();
    header
}

/// Plain tar as produced by `tar -C <dataset> -cf <product>.tar .`
///
/// The first entry is the dataset directory itself (`./`) and every other
/// name carries a `./` prefix.
pub fn dataset_archive_retarred(root: &Path, spec: DatasetSpec) -> PathBuf {
    let staging = root.join("unpacked");
    write_dataset(&staging, spec);

    let tile = root.join("packed").join(LAYOUT);
    fs::create_dir_all(&tile).unwrap();
    let path = tile.join(format!("{}.tar", PRODUCT_ID));
    let mut builder = tar::Builder::new(File::create(&path).unwrap());

    for entry in WalkDir::new(&staging).sort_by_file_name() {
        let entry = entry.unwrap();
        let relative = entry.path().strip_prefix(&staging).unwrap().to_string_lossy().into_owned();
        if entry.file_type().is_dir() {
            let name = if relative.is_empty() {
                "./".to_string()
            } else {
                format!("./{}/", relative)
            };
            let header = raw_named_header(&name, tar::EntryType::Directory, 0o775, 0);
            builder.append(&header, std::io::empty()).unwrap();
        } else {
            let data = fs::read(entry.path()).unwrap();
            let name = format!("./{}", relative);
            let header = raw_named_header(&name, tar::EntryType::Regular, 0o664, data.len() as u64);
            builder.append(&header, data.as_slice()).unwrap();
        }
    }
    builder.into_inner().unwrap().flush().unwrap();

    fs::remove_dir_all(&staging).unwrap();
    path
}

/// Repackage with the test block size
pub fn repack(input: &Path, output_base: &Path) -> eorepack::Result<RepackOutcome> {
    let config = RepackConfig::new(output_base).with_block_size(TEST_BLOCK_SIZE);
    Repackager::new(config)?.repackage(input)
}

/// All regular files below `dir`
pub fn files_under(dir: &Path) -> Vec<PathBuf> {
    if !dir.exists() {
        return Vec::new();
    }
    WalkDir::new(dir)
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

/// Read every member of an uncompressed tar
pub fn read_members(path: &Path) -> Vec<TarMember> {
    let mut archive = tar::Archive::new(File::open(path).unwrap());
    archive
        .entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let name = entry
                .path()
                .unwrap()
                .to_string_lossy()
                .trim_end_matches('/')
                .to_string();
            let header = entry.header();
            let is_dir = header.entry_type().is_dir();
            let mode = header.mode().unwrap();
            let uid = header.uid().unwrap();
            let gid = header.gid().unwrap();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            TarMember {
                name,
                is_dir,
                mode,
                uid,
                gid,
                data,
            }
        })
        .collect()
}

/// Parse `package.sha1` content into (digest, name) pairs
pub fn manifest_lines(data: &[u8]) -> Vec<(String, String)> {
    String::from_utf8(data.to_vec())
        .unwrap()
        .lines()
        .map(|line| {
            let (digest, name) = line.split_once('\t').unwrap();
            (digest.to_string(), name.to_string())
        })
        .collect()
}

/// Keep the temp dir alive alongside the paths derived from it
pub fn workspace() -> (TempDir, PathBuf) {
    let temp_dir = tempfile::tempdir().unwrap();
    let output_base = temp_dir.path().join("out");
    (temp_dir, output_base)
}
