//! Build outputs.

use std::path::PathBuf;

use serde::Serialize;

use super::{Architecture, Digest, SbomFormat};

/// A finished layer blob. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerArtifact {
    pub path: PathBuf,
    /// SHA-256 of the uncompressed tar stream
    pub diff_id: Digest,
    /// SHA-256 of the compressed file as stored
    pub digest: Digest,
    /// Compressed size in bytes
    pub size: u64,
}

/// One SBOM document written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SbomRecord {
    pub path: PathBuf,
    pub format: SbomFormat,
    /// `None` for index documents
    pub arch: Option<Architecture>,
    /// SHA-256 of the document file
    pub digest: Digest,
    /// Image or index digest the document describes
    pub subject: Digest,
}

/// Per-architecture image identity consumed by index assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchImageInfo {
    pub arch: Architecture,
    pub image_digest: Digest,
    /// Manifest media type of the image
    pub media_type: String,
    pub sbom_digest: Digest,
}
