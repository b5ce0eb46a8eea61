//! SBOM output formats.

use clap::ValueEnum;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// An SBOM document format.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum SbomFormat {
    /// SPDX 2.3 JSON
    Spdx,
    /// CycloneDX 1.4 JSON
    #[value(alias = "cdx")]
    Cyclonedx,
    /// Verbatim APK installed database
    Idb,
}

impl SbomFormat {
    /// File extension for documents in this format
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Spdx => "spdx.json",
            Self::Cyclonedx => "cdx",
            Self::Idb => "idb",
        }
    }

    /// Whether the format can describe a multi-arch index
    #[must_use]
    pub const fn has_index_form(&self) -> bool {
        !matches!(self, Self::Idb)
    }

    /// Per-architecture file name, `sbom-<arch>.<ext>`
    #[must_use]
    pub fn arch_file_name(&self, arch: &crate::model::Architecture) -> String {
        format!("sbom-{arch}.{}", self.extension())
    }

    /// Index file name, `sbom-index.<ext>`
    #[must_use]
    pub fn index_file_name(&self) -> String {
        format!("sbom-index.{}", self.extension())
    }
}

impl std::fmt::Display for SbomFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spdx => write!(f, "spdx"),
            Self::Cyclonedx => write!(f, "cyclonedx"),
            Self::Idb => write!(f, "idb"),
        }
    }
}
