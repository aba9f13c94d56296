// src/plan.rs

//! Member classification and canonical emission order
//!
//! Every member of a dataset falls into one of a few categories, decided
//! purely by its name. The plan puts the primary metadata file first and
//! everything else after it in path order, comparing names one path
//! component at a time so a directory's children always directly follow the
//! directory entry itself.

use crate::error::{Error, Result};
use crate::input::MemberEntry;
use crate::manifest::CHECKSUM_FILE_NAME;
use crate::naming::PRIMARY_METADATA_SUFFIX;
use crate::recompress::{RecompressDecision, RecompressionSelector, is_image_name};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};

/// Subdirectory holding per-band gap masks
pub const GAP_MASK_DIR: &str = "gap_mask";

/// Suffix of the angle coefficients file
pub const ANGLE_SUFFIX: &str = "_ANG.txt";

/// Ground truth readme shipped with some products
pub const README_NAME: &str = "README.GTF";

/// Normalised mode for regular files
pub const FILE_MODE: u32 = 0o644;

/// Normalised mode for directories
pub const DIR_MODE: u32 = 0o755;

/// Group write bit carried over from the source
const GROUP_WRITE: u32 = 0o020;

/// Member categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    /// The `*_MTL.txt` file, always emitted first
    PrimaryMetadata,
    /// Top-level text companions (angle coefficients, readme)
    Auxiliary,
    /// Raster images
    Image,
    /// The gap mask directory and everything inside it
    GapMask,
    /// Anything else, passed through verbatim
    Extra,
}

impl MemberKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrimaryMetadata => "primary-metadata",
            Self::Auxiliary => "auxiliary",
            Self::Image => "image",
            Self::GapMask => "gap-mask",
            Self::Extra => "extra",
        }
    }
}

impl std::fmt::Display for MemberKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Name-based member classifier
pub struct MemberClassifier;

impl MemberClassifier {
    /// Check if a member name is a top-level primary metadata file
    pub fn is_primary_metadata(name: &str) -> bool {
        !name.contains('/') && name.ends_with(PRIMARY_METADATA_SUFFIX)
    }

    /// Classify a member by its name
    pub fn classify(entry: &MemberEntry) -> MemberKind {
        let name = entry.name.as_str();

        if name == GAP_MASK_DIR || entry.top_level_dir() == Some(GAP_MASK_DIR) {
            return MemberKind::GapMask;
        }
        if entry.is_dir() || name.contains('/') {
            return MemberKind::Extra;
        }
        if Self::is_primary_metadata(name) {
            return MemberKind::PrimaryMetadata;
        }
        if name.ends_with(ANGLE_SUFFIX) || name == README_NAME {
            return MemberKind::Auxiliary;
        }
        if is_image_name(name) {
            return MemberKind::Image;
        }
        MemberKind::Extra
    }
}

/// Archive mode for a member given its source mode
///
/// ```
/// use eorepack::plan::target_mode;
///
/// assert_eq!(target_mode(0o100664, false), 0o664);
/// assert_eq!(target_mode(0o600, false), 0o644);
/// assert_eq!(target_mode(0o40775, true), 0o775);
/// assert_eq!(target_mode(0o700, true), 0o755);
/// ```
pub fn target_mode(source_mode: u32, is_dir: bool) -> u32 {
    let base = if is_dir { DIR_MODE } else { FILE_MODE };
    base | (source_mode & GROUP_WRITE)
}

/// Compare member names component by component
fn compare_names(a: &str, b: &str) -> Ordering {
    a.split('/').cmp(b.split('/'))
}

/// One member with its emission decisions applied
#[derive(Debug, Clone)]
pub struct PlannedMember {
    pub entry: MemberEntry,
    pub kind: MemberKind,
    pub decision: RecompressDecision,
    /// Mode written to the archive header
    pub mode: u32,
}

/// Members in canonical emission order
#[derive(Debug, Clone)]
pub struct OrderedMemberPlan {
    members: Vec<PlannedMember>,
}

impl OrderedMemberPlan {
    /// Classify, validate and order the members of a dataset
    ///
    /// `source` is only used in error messages. A top-level `package.sha1`
    /// from an earlier packaging run is dropped; it is regenerated on write.
    pub fn build(entries: Vec<MemberEntry>, source: &Path) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(entries.len());

        for entry in entries {
            if entry.name == CHECKSUM_FILE_NAME {
                warn!("Dropping {} from {}, it will be regenerated", entry.name, source.display());
                continue;
            }
            if !seen.insert(entry.name.clone()) {
                return Err(Error::DuplicateMember(entry.name));
            }
            let kind = MemberClassifier::classify(&entry);
            kept.push((entry, kind));
        }

        let primaries = kept
            .iter()
            .filter(|(_, kind)| *kind == MemberKind::PrimaryMetadata)
            .count();
        if primaries != 1 {
            return Err(Error::Resolution {
                path: source.to_path_buf(),
                found: primaries,
            });
        }

        kept.sort_by(|(a, a_kind), (b, b_kind)| {
            let a_first = *a_kind != MemberKind::PrimaryMetadata;
            let b_first = *b_kind != MemberKind::PrimaryMetadata;
            a_first.cmp(&b_first).then_with(|| compare_names(&a.name, &b.name))
        });

        let members = kept
            .into_iter()
            .map(|(entry, kind)| {
                let decision = match kind {
                    MemberKind::Image | MemberKind::GapMask | MemberKind::Extra => {
                        RecompressionSelector::decide(&entry)
                    }
                    MemberKind::PrimaryMetadata | MemberKind::Auxiliary => {
                        RecompressDecision::Passthrough
                    }
                };
                let mode = target_mode(entry.mode, entry.is_dir());
                debug!("{} [{}] {:?} mode {:o}", entry.name, kind, decision, mode);
                PlannedMember {
                    entry,
                    kind,
                    decision,
                    mode,
                }
            })
            .collect();

        Ok(Self { members })
    }

    /// Members in emission order
    pub fn members(&self) -> &[PlannedMember] {
        &self.members
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlannedMember> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Member names in emission order
    pub fn names(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.entry.name.as_str()).collect()
    }

    /// Number of members scheduled for transcoding
    pub fn transcode_count(&self) -> usize {
        self.members
            .iter()
            .filter(|m| m.decision == RecompressDecision::Transcode)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::ByteSource;
    use std::path::PathBuf;

    fn file(name: &str) -> MemberEntry {
        MemberEntry::file(name, 0, 0o100664, 0, ByteSource::File(PathBuf::from("/nonexistent")))
    }

    fn dir(name: &str) -> MemberEntry {
        MemberEntry::directory(name, 0o40775, 0)
    }

    #[test]
    fn test_classify() {
        assert_eq!(MemberClassifier::classify(&file("X_MTL.txt")), MemberKind::PrimaryMetadata);
        assert_eq!(MemberClassifier::classify(&file("X_ANG.txt")), MemberKind::Auxiliary);
        assert_eq!(MemberClassifier::classify(&file("README.GTF")), MemberKind::Auxiliary);
        assert_eq!(MemberClassifier::classify(&file("X_B1.TIF")), MemberKind::Image);
        assert_eq!(MemberClassifier::classify(&file("X_BQA.TIF.msk")), MemberKind::Extra);
        assert_eq!(MemberClassifier::classify(&dir("gap_mask")), MemberKind::GapMask);
        assert_eq!(MemberClassifier::classify(&file("gap_mask/X_GM_B1.TIF")), MemberKind::GapMask);
        assert_eq!(MemberClassifier::classify(&dir("extras")), MemberKind::Extra);
        assert_eq!(MemberClassifier::classify(&file("extras/Y_MTL.txt")), MemberKind::Extra);
    }

    #[test]
    fn test_target_mode() {
        assert_eq!(target_mode(0o100664, false), 0o664);
        assert_eq!(target_mode(0o100755, false), 0o644);
        assert_eq!(target_mode(0o40775, true), 0o775);
        assert_eq!(target_mode(0o40700, true), 0o755);
    }

    #[test]
    fn test_primary_first_then_component_order() {
        let entries = vec![
            file("X_B1.TIF"),
            file("gap_mask/X_GM_B1.TIF"),
            file("gap_mask.txt"),
            dir("gap_mask"),
            file("README.GTF"),
            file("X_MTL.txt"),
            file("X_ANG.txt"),
            file("gap_mask-notes"),
        ];
        let plan = OrderedMemberPlan::build(entries, Path::new("/in")).unwrap();

        // Plain byte order would put "gap_mask-notes" and "gap_mask.txt"
        // between "gap_mask" and its children
        assert_eq!(
            plan.names(),
            vec![
                "X_MTL.txt",
                "README.GTF",
                "X_ANG.txt",
                "X_B1.TIF",
                "gap_mask",
                "gap_mask/X_GM_B1.TIF",
                "gap_mask-notes",
                "gap_mask.txt",
            ]
        );
        assert_eq!(plan.members()[0].kind, MemberKind::PrimaryMetadata);
        assert_eq!(plan.members()[4].mode, 0o775);
    }

    #[test]
    fn test_primary_metadata_count() {
        let none = vec![file("X_ANG.txt"), file("extras/Y_MTL.txt")];
        assert!(matches!(
            OrderedMemberPlan::build(none, Path::new("/in")),
            Err(Error::Resolution { found: 0, .. })
        ));

        let two = vec![file("X_MTL.txt"), file("Y_MTL.txt")];
        assert!(matches!(
            OrderedMemberPlan::build(two, Path::new("/in")),
            Err(Error::Resolution { found: 2, .. })
        ));
    }

    #[test]
    fn test_duplicates_and_stale_manifest() {
        let dup = vec![file("X_MTL.txt"), file("X_B1.TIF"), file("X_B1.TIF")];
        assert!(matches!(
            OrderedMemberPlan::build(dup, Path::new("/in")),
            Err(Error::DuplicateMember(name)) if name == "X_B1.TIF"
        ));

        let stale = vec![file("package.sha1"), file("X_MTL.txt")];
        let plan = OrderedMemberPlan::build(stale, Path::new("/in")).unwrap();
        assert_eq!(plan.names(), vec!["X_MTL.txt"]);
    }
}
