//! Installed package records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ownership and permission bits declared for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ownership {
    pub uid: u32,
    pub gid: u32,
    /// Permission bits (`0o7777` mask)
    pub mode: u32,
}

impl Ownership {
    /// Root-owned with the given mode
    #[must_use]
    pub const fn root(mode: u32) -> Self {
        Self {
            uid: 0,
            gid: 0,
            mode,
        }
    }

    /// Same mode, different owner
    #[must_use]
    pub const fn with_ids(self, uid: u32, gid: u32) -> Self {
        Self { uid, gid, ..self }
    }
}

/// A file shipped by an installed package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledFile {
    /// Path relative to the tree root, without a leading `/`
    pub path: String,
    pub ownership: Option<Ownership>,
    /// Checksum as recorded by the package database (`Q1…` form)
    pub checksum: Option<String>,
}

/// A directory owned by an installed package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledDir {
    pub path: String,
    pub ownership: Option<Ownership>,
}

/// One record of the installed package database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
    pub arch: Option<String>,
    pub license: Option<String>,
    pub origin: Option<String>,
    pub maintainer: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    /// Build time in seconds since the Unix epoch
    pub build_time: Option<i64>,
    pub commit: Option<String>,
    pub checksum: Option<String>,
    pub size: Option<u64>,
    pub installed_size: Option<u64>,
    pub dependencies: Vec<String>,
    pub provides: Vec<String>,
    pub dirs: Vec<InstalledDir>,
    pub files: Vec<InstalledFile>,
}

impl InstalledPackage {
    /// Create a package record with just a name and version
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    /// Build time as a timestamp
    #[must_use]
    pub fn build_date(&self) -> Option<DateTime<Utc>> {
        self.build_time
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
    }
}

/// The newest build time across a set of packages.
#[must_use]
pub fn newest_build_date(packages: &[InstalledPackage]) -> Option<DateTime<Utc>> {
    packages.iter().filter_map(InstalledPackage::build_date).max()
}
