// src/manifest.rs

//! The `package.sha1` checksum manifest
//!
//! One line per file member, in emission order:
//!
//! ```text
//! 2aae6c35c94fcfb415dbe95f408b9ce91ee846ed<TAB>LT05_..._MTL.txt
//! ```
//!
//! Directory members carry no content and are not listed. The manifest never
//! lists itself.

use crate::error::{Error, Result};
use crate::hash::is_sha1_hex;
use std::collections::HashMap;

/// Name of the manifest member, always the last member of a package
pub const CHECKSUM_FILE_NAME: &str = "package.sha1";

/// One manifest line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub name: String,
    pub digest: String,
}

/// Ordered mapping from member name to SHA-1 digest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumManifest {
    entries: Vec<ManifestEntry>,
    index: HashMap<String, usize>,
}

impl ChecksumManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a member digest
    ///
    /// Names must be unique, must not be the manifest itself and must not
    /// contain tabs or line breaks (they would break the line format).
    pub fn insert(&mut self, name: impl Into<String>, digest: impl Into<String>) -> Result<()> {
        let name = name.into();
        let digest = digest.into();

        if name == CHECKSUM_FILE_NAME {
            return Err(Error::manifest("the manifest cannot list itself"));
        }
        if name.is_empty() || name.contains(['\t', '\n', '\r']) {
            return Err(Error::manifest(format!("unrepresentable member name {:?}", name)));
        }
        if !is_sha1_hex(&digest) {
            return Err(Error::manifest(format!("invalid digest {:?} for {}", digest, name)));
        }
        if self.index.contains_key(&name) {
            return Err(Error::DuplicateMember(name));
        }

        self.index.insert(name.clone(), self.entries.len());
        self.entries.push(ManifestEntry { name, digest });
        Ok(())
    }

    /// Digest recorded for `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.index.get(name).map(|&i| self.entries[i].digest.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter()
    }

    /// Render as `digest<TAB>name` lines, each newline terminated
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.entries.len() * 96);
        for entry in &self.entries {
            out.push_str(&entry.digest);
            out.push('\t');
            out.push_str(&entry.name);
            out.push('\n');
        }
        out
    }

    /// Parse a rendered manifest
    ///
    /// Each non-empty line must hold exactly one tab. A missing final
    /// newline is accepted.
    pub fn parse(content: &str) -> Result<Self> {
        let mut manifest = Self::new();

        for (number, line) in content.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split('\t');
            let (Some(digest), Some(name), None) = (fields.next(), fields.next(), fields.next())
            else {
                return Err(Error::manifest(format!(
                    "line {}: expected exactly one tab separator",
                    number + 1
                )));
            };
            manifest
                .insert(name, digest)
                .map_err(|e| Error::manifest(format!("line {}: {}", number + 1, e)))?;
        }

        Ok(manifest)
    }
}
