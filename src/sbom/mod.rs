//! SBOM generation.
//!
//! [`SbomAssembler`] produces the per-architecture documents once a layer
//! and its image exist; [`IndexAssembler`] aggregates the per-architecture
//! results into the index document after every architecture finished.
//!
//! Documents are rendered from the same inputs in every format:
//!
//! | format      | file                     | content                    |
//! |-------------|--------------------------|----------------------------|
//! | `spdx`      | `sbom-<arch>.spdx.json`  | SPDX 2.3 JSON              |
//! | `cyclonedx` | `sbom-<arch>.cdx`        | CycloneDX 1.4 JSON         |
//! | `idb`       | `sbom-<arch>.idb`        | the installed database     |
//!
//! No document contains a timestamp other than the build epoch.

mod assembler;
pub mod cyclonedx;
mod index;
mod license;
mod purl;
pub mod spdx;

use chrono::{DateTime, Utc};

use crate::error::{ImgforgeError, Result, SbomErrorKind};
use crate::layer::LayerFile;
use crate::model::{
    ArchImageInfo, Architecture, Digest, InstalledPackage, OsRelease, SbomFormat, TagReference,
};

pub use assembler::{SbomAssembler, SbomStage};
pub use index::{IndexAssembler, INDEX_MANIFEST_FILE};
pub use license::{declared_license, is_valid_expression, NOASSERTION};
pub use purl::Purl;

/// Identity of the image a per-architecture document describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    /// Primary tag, if one was configured and valid
    pub reference: Option<TagReference>,
    pub image_digest: Digest,
    pub layer_digest: Digest,
    pub layer_diff_id: Digest,
    pub arch: Architecture,
    /// Image manifest media type
    pub media_type: String,
    pub epoch: DateTime<Utc>,
    pub vcs_url: Option<String>,
}

fn reference_name(reference: Option<&TagReference>) -> String {
    reference
        .and_then(|r| r.repository.rsplit('/').next())
        .unwrap_or("image")
        .to_string()
}

impl ImageInfo {
    /// Short image name: last repository component, or `image`.
    #[must_use]
    pub fn image_name(&self) -> String {
        reference_name(self.reference.as_ref())
    }

    #[must_use]
    pub fn image_purl(&self) -> Purl {
        Purl::oci(
            &self.image_name(),
            &self.image_digest,
            Some(&self.arch),
            self.reference.as_ref().map(|r| r.repository.as_str()),
            self.reference.as_ref().map(|r| r.tag.as_str()),
            &self.media_type,
        )
    }
}

/// Inputs to a per-architecture document.
#[derive(Debug, Clone, Copy)]
pub struct ImageSbomInput<'a> {
    pub info: &'a ImageInfo,
    pub release: &'a OsRelease,
    pub packages: &'a [InstalledPackage],
    pub files: &'a [LayerFile],
}

/// Inputs to an index document.
#[derive(Debug, Clone, Copy)]
pub struct IndexSbomInput<'a> {
    pub index_digest: &'a Digest,
    /// Sorted by architecture
    pub images: &'a [ArchImageInfo],
    pub reference: Option<&'a TagReference>,
    /// Index media type, OCI image index or Docker manifest list
    pub index_media_type: &'a str,
    pub epoch: DateTime<Utc>,
    pub vcs_url: Option<&'a str>,
}

impl IndexSbomInput<'_> {
    #[must_use]
    pub fn image_name(&self) -> String {
        reference_name(self.reference)
    }

    #[must_use]
    pub fn index_purl(&self) -> Purl {
        Purl::oci(
            &self.image_name(),
            self.index_digest,
            None,
            self.reference.map(|r| r.repository.as_str()),
            self.reference.map(|r| r.tag.as_str()),
            self.index_media_type,
        )
    }

    #[must_use]
    pub fn image_purl(&self, image: &ArchImageInfo) -> Purl {
        Purl::oci(
            &self.image_name(),
            &image.image_digest,
            Some(&image.arch),
            self.reference.map(|r| r.repository.as_str()),
            self.reference.map(|r| r.tag.as_str()),
            &image.media_type,
        )
    }
}

/// Render a per-architecture document. `installed_db` is the raw database
/// the `idb` format reproduces verbatim.
pub fn render_image_document(
    format: SbomFormat,
    input: &ImageSbomInput<'_>,
    installed_db: &[u8],
) -> Result<Vec<u8>> {
    let bytes = match format {
        SbomFormat::Spdx => serde_json::to_vec_pretty(&spdx::image_document(input))?,
        SbomFormat::Cyclonedx => serde_json::to_vec_pretty(&cyclonedx::image_document(input))?,
        SbomFormat::Idb => installed_db.to_vec(),
    };
    Ok(bytes)
}

/// Render an index document.
pub fn render_index_document(format: SbomFormat, input: &IndexSbomInput<'_>) -> Result<Vec<u8>> {
    let bytes = match format {
        SbomFormat::Spdx => serde_json::to_vec_pretty(&spdx::index_document(input))?,
        SbomFormat::Cyclonedx => serde_json::to_vec_pretty(&cyclonedx::index_document(input))?,
        SbomFormat::Idb => {
            return Err(ImgforgeError::sbom(
                "rendering index document",
                SbomErrorKind::UnsupportedFormat(format.to_string()),
            ))
        }
    };
    Ok(bytes)
}
