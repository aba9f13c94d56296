// src/naming.rs

//! Dataset naming convention and canonical output paths
//!
//! Datasets are identified by a Landsat product id such as
//! `LT05_L1GS_092091_19910506_20170126_01_T2`:
//!
//! ```text
//! L T 05 _ L1GS _ 092 091 _ 19910506 _ 20170126 _ 01 _ T2
//! | |  |     |      |   |       |          |        |    |
//! | |  |     |      |   |       |          |        |    tier
//! | |  |     |      |   |       |          |        collection number
//! | |  |     |      |   |       |          processing date
//! | |  |     |      |   |       acquisition date
//! | |  |     |      |   WRS row
//! | |  |     |      WRS path
//! | |  |     processing level
//! | |  satellite number
//! | sensor code
//! Landsat
//! ```
//!
//! Inputs must live inside the ingest layout
//! `.../USGS/<collection segments>/<tile id>/<dataset>`. Everything after the
//! `USGS` segment is reproduced under the output base, so the output path is
//! `<output-base>/<collection segments>/<tile id>/<product id>.tar`.

use crate::compression::archive_stem;
use crate::error::{Error, Result};
use chrono::NaiveDate;
use regex::Regex;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use tracing::warn;

/// Path segment that anchors the supported ingest layout
pub const LAYOUT_ROOT: &str = "USGS";

/// File name suffix of the primary metadata file
pub const PRIMARY_METADATA_SUFFIX: &str = "_MTL.txt";

/// Example shown when an input sits outside the ingest layout
pub const EXPECTED_STRUCTURE: &str =
    "USGS/L1/Landsat/C1/092_091/LT50920911991126/LT05_L1GS_092091_19910506_20170126_01_T2.tar.gz";

/// Minimum number of segments between the layout root and the dataset
/// (at least one collection segment plus the tile id)
const MIN_LAYOUT_SEGMENTS: usize = 2;

static PRODUCT_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^L([A-Z])(\d{2})_(L[0-9][A-Z0-9]{2})_(\d{3})(\d{3})_(\d{8})_(\d{8})_(\d{2})_(T1|T2|RT)$")
        .unwrap()
});

/// Identity tokens parsed from a dataset's product id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingIdentity {
    /// Full product id, used as the output base name
    pub product_id: String,
    /// Sensor code (`T` = TM, `E` = ETM+, `C` = OLI/TIRS, ...)
    pub sensor: char,
    /// Satellite number (5, 7, 8, ...)
    pub satellite: u8,
    /// Processing level (`L1TP`, `L1GT`, `L1GS`, ...)
    pub processing_level: String,
    /// WRS path
    pub path: u16,
    /// WRS row
    pub row: u16,
    /// Acquisition date
    pub acquisition_date: NaiveDate,
    /// Processing date
    pub processing_date: NaiveDate,
    /// Collection number
    pub collection: u8,
    /// Collection tier (`T1`, `T2`, `RT`)
    pub tier: String,
}

impl NamingIdentity {
    /// Parse a bare product id
    pub fn parse(product_id: &str) -> Result<Self> {
        let invalid = || Error::InvalidIdentifier(product_id.to_string());
        let caps = PRODUCT_ID.captures(product_id).ok_or_else(invalid)?;

        let date = |i: usize| NaiveDate::parse_from_str(&caps[i], "%Y%m%d").map_err(|_| invalid());
        let number = |i: usize| caps[i].parse::<u16>().map_err(|_| invalid());

        Ok(Self {
            product_id: product_id.to_string(),
            sensor: caps[1].chars().next().ok_or_else(invalid)?,
            satellite: caps[2].parse().map_err(|_| invalid())?,
            processing_level: caps[3].to_string(),
            path: number(4)?,
            row: number(5)?,
            acquisition_date: date(6)?,
            processing_date: date(7)?,
            collection: caps[8].parse().map_err(|_| invalid())?,
            tier: caps[9].to_string(),
        })
    }

    /// Parse from an archive file name, ignoring tar/compression suffixes
    pub fn from_archive_name(file_name: &str) -> Result<Self> {
        Self::parse(archive_stem(file_name))
    }

    /// Parse from a primary metadata file name (`<product id>_MTL.txt`)
    pub fn from_metadata_name(file_name: &str) -> Result<Self> {
        let product_id = file_name
            .strip_suffix(PRIMARY_METADATA_SUFFIX)
            .ok_or_else(|| Error::InvalidIdentifier(file_name.to_string()))?;
        Self::parse(product_id)
    }

    /// File name of the output package
    pub fn tar_name(&self) -> String {
        format!("{}.tar", self.product_id)
    }

    /// WRS path/row formatted as in the ingest layout (`092_091`)
    pub fn path_row(&self) -> String {
        format!("{:03}_{:03}", self.path, self.row)
    }
}

impl fmt::Display for NamingIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.product_id)
    }
}

/// Segments following the last layout root in `dir`
///
/// Fails with a structure error when the layout root is missing or fewer
/// than the minimum number of segments follow it.
fn layout_segments(dir: &Path, input: &Path) -> Result<Vec<String>> {
    let structure_error = || Error::Structure {
        path: input.to_path_buf(),
        expected: EXPECTED_STRUCTURE,
    };

    let parts: Vec<String> = dir
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    let root = parts
        .iter()
        .rposition(|p| p == LAYOUT_ROOT)
        .ok_or_else(structure_error)?;

    let segments = parts[root + 1..].to_vec();
    if segments.len() < MIN_LAYOUT_SEGMENTS {
        return Err(structure_error());
    }
    Ok(segments)
}

fn join_segments(output_base: &Path, segments: &[String], identity: &NamingIdentity) -> PathBuf {
    let path_row = identity.path_row();
    if !segments.iter().any(|s| *s == path_row) {
        warn!("{} is filed outside its {} directory", identity, path_row);
    }

    let mut out = output_base.to_path_buf();
    out.extend(segments);
    out.push(identity.tar_name());
    out
}

/// Output path for an archive input
///
/// Purely lexical: the input is not opened and symlinks are not resolved,
/// so a link placed outside the layout is rejected even if its target is
/// inside it.
pub fn output_tar_path(output_base: &Path, input: &Path) -> Result<PathBuf> {
    let parent = input.parent().unwrap_or(Path::new(""));
    let segments = layout_segments(parent, input)?;

    let file_name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::InvalidIdentifier(input.display().to_string()))?;
    let identity = NamingIdentity::from_archive_name(&file_name)?;

    Ok(join_segments(output_base, &segments, &identity))
}

/// Locate the single primary metadata file directly inside a directory
pub fn find_primary_metadata(dir: &Path) -> Result<PathBuf> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_string_lossy().ends_with(PRIMARY_METADATA_SUFFIX)
            && entry.file_type()?.is_file()
        {
            found.push(entry.path());
        }
    }

    if found.len() != 1 {
        return Err(Error::Resolution {
            path: dir.to_path_buf(),
            found: found.len(),
        });
    }
    Ok(found.remove(0))
}

/// Output path for a directory input, named after its primary metadata file
pub fn output_tar_path_from_directory(output_base: &Path, dir: &Path) -> Result<PathBuf> {
    let segments = layout_segments(dir, dir)?;

    let mtl = find_primary_metadata(dir)?;
    let file_name = mtl
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let identity = NamingIdentity::from_metadata_name(&file_name)?;

    Ok(join_segments(output_base, &segments, &identity))
}

/// Output path for any input, dispatching on whether it is a directory
pub fn resolve_output_path(output_base: &Path, input: &Path) -> Result<PathBuf> {
    if input.is_dir() {
        output_tar_path_from_directory(output_base, input)
    } else {
        output_tar_path(output_base, input)
    }
}
