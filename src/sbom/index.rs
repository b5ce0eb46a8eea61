//! Multi-architecture index aggregation.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::assembler::write_document;
use super::{render_index_document, IndexSbomInput};
use crate::error::{ImgforgeError, IndexErrorKind, Result};
use crate::model::{
    ArchImageInfo, BuiltImage, BuiltIndex, Digest, SbomFormat, SbomRecord,
    TagReference,
};
use crate::utils::sha256_file;

/// File the raw index manifest is written to.
pub const INDEX_MANIFEST_FILE: &str = "index.json";

/// Aggregates finished architectures into the index artifacts.
#[derive(Debug, Clone)]
pub struct IndexAssembler {
    sbom_dir: PathBuf,
    output_dir: PathBuf,
    formats: Vec<SbomFormat>,
    reference: Option<TagReference>,
    epoch: DateTime<Utc>,
    vcs_url: Option<String>,
}

impl IndexAssembler {
    #[must_use]
    pub fn new(
        sbom_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        formats: &[SbomFormat],
    ) -> Self {
        Self {
            sbom_dir: sbom_dir.into(),
            output_dir: output_dir.into(),
            formats: formats.to_vec(),
            reference: None,
            epoch: DateTime::<Utc>::UNIX_EPOCH,
            vcs_url: None,
        }
    }

    #[must_use]
    pub fn with_reference(mut self, reference: Option<TagReference>) -> Self {
        self.reference = reference;
        self
    }

    #[must_use]
    pub const fn with_epoch(mut self, epoch: DateTime<Utc>) -> Self {
        self.epoch = epoch;
        self
    }

    #[must_use]
    pub fn with_vcs_url(mut self, vcs_url: Option<String>) -> Self {
        self.vcs_url = vcs_url;
        self
    }

    /// Per-architecture identities in canonical order.
    ///
    /// The SBOM digest is recomputed from the primary-format file on disk
    /// rather than taken from the per-architecture records.
    pub fn collect(&self, images: &[BuiltImage]) -> Result<Vec<ArchImageInfo>> {
        let Some(primary) = self.formats.first() else {
            return Ok(Vec::new());
        };

        let mut sorted: Vec<&BuiltImage> = images.iter().collect();
        sorted.sort_by(|a, b| a.arch.cmp(&b.arch));

        let mut infos = Vec::with_capacity(sorted.len());
        for image in sorted {
            image.manifest.single_layer().map_err(|count| {
                ImgforgeError::index(
                    format!("checking manifest for {}", image.arch),
                    IndexErrorKind::LayerCount(count),
                )
            })?;
            let path = self.sbom_dir.join(primary.arch_file_name(&image.arch));
            let sbom_digest = sha256_file(&path).map_err(|e| {
                ImgforgeError::index(
                    format!("{} ({})", path.display(), image.arch),
                    IndexErrorKind::Checksum(e),
                )
            })?;
            infos.push(ArchImageInfo {
                arch: image.arch,
                image_digest: image.digest.clone(),
                media_type: image.manifest.media_type.clone(),
                sbom_digest,
            });
        }
        Ok(infos)
    }

    /// Write the raw index bytes to `<output_dir>/index.json`.
    pub fn write_index_manifest(&self, index: &BuiltIndex) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir)
            .map_err(|e| ImgforgeError::io(&self.output_dir, e))?;
        let path = self.output_dir.join(INDEX_MANIFEST_FILE);
        fs::write(&path, &index.bytes).map_err(|e| ImgforgeError::io(&path, e))?;
        info!(path = %path.display(), digest = %index.digest, "index manifest written");
        Ok(path)
    }

    /// Emit the index SBOM in the primary format.
    pub fn generate(&self, index: &BuiltIndex, infos: &[ArchImageInfo]) -> Result<Vec<SbomRecord>> {
        let Some(&primary) = self.formats.first() else {
            warn!("no SBOM formats configured, skipping index SBOM");
            return Ok(Vec::new());
        };
        if !primary.has_index_form() {
            warn!(format = %primary, "primary SBOM format has no index form, skipping index SBOM");
            return Ok(Vec::new());
        }

        let input = IndexSbomInput {
            index_digest: &index.digest,
            images: infos,
            reference: self.reference.as_ref(),
            index_media_type: &index.index.media_type,
            epoch: self.epoch,
            vcs_url: self.vcs_url.as_deref(),
        };
        let bytes = render_index_document(primary, &input)?;
        fs::create_dir_all(&self.sbom_dir).map_err(|e| ImgforgeError::io(&self.sbom_dir, e))?;
        let path = self.sbom_dir.join(primary.index_file_name());
        write_document(&path, &bytes)?;
        let digest = Digest::of(&bytes);
        info!(format = %primary, path = %path.display(), digest = %digest, "index SBOM written");

        Ok(vec![SbomRecord {
            path,
            format: primary,
            arch: None,
            digest,
            subject: index.digest.clone(),
        }])
    }

    /// Collect, write `index.json`, then emit the index SBOM.
    pub fn assemble(&self, images: &[BuiltImage], index: &BuiltIndex) -> Result<Vec<SbomRecord>> {
        let infos = self.collect(images)?;
        self.write_index_manifest(index)?;
        self.generate(index, &infos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use crate::model::{Architecture, Descriptor, ImageIndex, ImageManifest, MediaTypes};
    use std::collections::BTreeMap;

    fn image(arch: Architecture, layers: usize) -> BuiltImage {
        let manifest = ImageManifest {
            schema_version: 2,
            media_type: MediaTypes::Oci.manifest().to_string(),
            config: Descriptor::new(MediaTypes::Oci.config(), 2, Digest::of(b"{}")),
            layers: (0..layers)
                .map(|i| Descriptor::new(MediaTypes::Oci.layer(), 1, Digest::of(&[i as u8])))
                .collect(),
            annotations: BTreeMap::new(),
        };
        let manifest_bytes = serde_json::to_vec(&manifest).expect("serialize");
        BuiltImage {
            arch,
            digest: Digest::of(&manifest_bytes),
            manifest,
            manifest_bytes,
            config_bytes: b"{}".to_vec(),
        }
    }

    fn built_index() -> BuiltIndex {
        let index = ImageIndex {
            schema_version: 2,
            media_type: MediaTypes::Oci.index().to_string(),
            manifests: Vec::new(),
            annotations: BTreeMap::new(),
        };
        let bytes = serde_json::to_vec(&index).expect("serialize");
        BuiltIndex {
            digest: Digest::of(&bytes),
            index,
            bytes,
        }
    }

    fn write_sboms(dir: &Path, archs: &[Architecture]) {
        for arch in archs {
            fs::write(
                dir.join(SbomFormat::Spdx.arch_file_name(arch)),
                format!("sbom for {arch}"),
            )
            .expect("write");
        }
    }

    #[test]
    fn test_collect_orders_by_canonical_arch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archs = [Architecture::X86_64, Architecture::Aarch64, Architecture::Riscv64];
        write_sboms(dir.path(), &archs);
        let images: Vec<_> = archs.iter().map(|a| image(*a, 1)).collect();

        let asm = IndexAssembler::new(dir.path(), dir.path(), &[SbomFormat::Spdx]);
        let infos = asm.collect(&images).expect("collect");
        let order: Vec<_> = infos.iter().map(|i| i.arch.to_apk()).collect();
        assert_eq!(order, ["aarch64", "riscv64", "x86_64"]);
        assert_eq!(
            infos[0].sbom_digest,
            Digest::of(b"sbom for aarch64")
        );
    }

    #[test]
    fn test_collect_rejects_multi_layer_manifest() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_sboms(dir.path(), &[Architecture::X86_64]);
        let asm = IndexAssembler::new(dir.path(), dir.path(), &[SbomFormat::Spdx]);
        let err = asm.collect(&[image(Architecture::X86_64, 2)]).expect_err("collect");
        assert!(matches!(
            err,
            ImgforgeError::Index {
                source: IndexErrorKind::LayerCount(2),
                ..
            }
        ));
        assert!(err.to_string().contains("x86_64"));
    }

    #[test]
    fn test_missing_sbom_is_checksum_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let asm = IndexAssembler::new(dir.path(), dir.path(), &[SbomFormat::Spdx]);
        let err = asm.collect(&[image(Architecture::Aarch64, 1)]).expect_err("collect");
        assert!(matches!(
            err,
            ImgforgeError::Index {
                source: IndexErrorKind::Checksum(_),
                ..
            }
        ));
    }

    #[test]
    fn test_assemble_writes_index_and_sbom() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_sboms(dir.path(), &[Architecture::Aarch64]);
        let index = built_index();
        let asm = IndexAssembler::new(dir.path(), dir.path(), &[SbomFormat::Spdx]);
        let records = asm
            .assemble(&[image(Architecture::Aarch64, 1)], &index)
            .expect("assemble");

        assert_eq!(fs::read(dir.path().join(INDEX_MANIFEST_FILE)).expect("read"), index.bytes);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].arch, None);
        assert_eq!(records[0].subject, index.digest);
        assert!(records[0].path.ends_with("sbom-index.spdx.json"));
    }

    #[test]
    fn test_idb_primary_skips_index_sbom() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("sbom-x86_64.idb"), b"P:musl\n").expect("write");
        let index = built_index();
        let asm = IndexAssembler::new(dir.path(), dir.path(), &[SbomFormat::Idb]);
        let records = asm
            .assemble(&[image(Architecture::X86_64, 1)], &index)
            .expect("assemble");
        assert!(records.is_empty());
        assert!(dir.path().join(INDEX_MANIFEST_FILE).exists());
        assert!(!dir.path().join("sbom-index.idb").exists());
    }
}
