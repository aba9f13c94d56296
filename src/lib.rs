// src/lib.rs

//! eorepack: satellite dataset repackaging
//!
//! Turns a delivered Landsat dataset (a tar archive, possibly compressed, or
//! an expanded directory) into one normalised, uncompressed tar package:
//!
//! - the primary `*_MTL.txt` metadata file is always the first member
//! - remaining members follow in path order, directories before their children
//! - uncompressed single-band GeoTIFFs are losslessly deflate-compressed
//!   when that makes them smaller; everything else is copied byte for byte
//! - `package.sha1`, a SHA-1 line per file member, is always the last member
//!
//! # Architecture
//!
//! - Canonical paths: the output location mirrors the input's position in
//!   the `USGS/...` ingest layout ([`naming`])
//! - Idempotent: an existing destination is never opened, read or replaced
//! - Atomic: packages are written to a temporary file beside the destination
//!   and linked into place only when complete ([`writer`])
//! - Streaming: members move in fixed-size blocks; nothing is held whole in
//!   memory

pub mod compression;
pub mod config;
mod error;
pub mod hash;
pub mod input;
pub mod manifest;
pub mod naming;
pub mod plan;
pub mod recompress;
pub mod repack;
pub mod tiff;
pub mod verify;
pub mod writer;

pub use config::{DEFAULT_BLOCK_SIZE, DEFAULT_ZLEVEL, RepackConfig};
pub use error::{Error, Result};
pub use input::{DatasetInput, InputKind, MemberEntry};
pub use manifest::{CHECKSUM_FILE_NAME, ChecksumManifest};
pub use naming::NamingIdentity;
pub use plan::{MemberKind, OrderedMemberPlan};
pub use recompress::RecompressDecision;
pub use repack::{RepackOutcome, Repackager};
pub use verify::{VerifyReport, verify_package};
