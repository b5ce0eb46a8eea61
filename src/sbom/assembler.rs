//! Per-architecture SBOM state machine.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::{render_image_document, ImageInfo, ImageSbomInput};
use crate::apk::{parse_installed, INSTALLED_DB_PATH};
use crate::error::{ImgforgeError, Result, SbomErrorKind};
use crate::layer::{read_layer_files, LayerFile};
use crate::model::{
    Digest, ImageManifest, InstalledPackage, LayerArtifact, OsRelease, SbomFormat, SbomRecord,
};
use crate::mutate::OS_RELEASE_PATH;
use crate::tree::WorkTree;

/// Where an [`SbomAssembler`] is in its sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SbomStage {
    Uninitialized,
    LayerBound,
    ReleaseDataLoaded,
    PackageDataLoaded,
    ImageInfoBound,
    Generated,
}

impl fmt::Display for SbomStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::LayerBound => "layer-bound",
            Self::ReleaseDataLoaded => "release-data-loaded",
            Self::PackageDataLoaded => "package-data-loaded",
            Self::ImageInfoBound => "image-info-bound",
            Self::Generated => "generated",
        };
        f.write_str(name)
    }
}

/// Builds the SBOM documents for one architecture.
///
/// Transitions must be called in order:
/// [`bind_layer`](Self::bind_layer), [`load_release_data`](Self::load_release_data),
/// [`load_package_data`](Self::load_package_data),
/// [`bind_image_info`](Self::bind_image_info), [`generate`](Self::generate).
/// A failed transition leaves the stage unchanged.
pub struct SbomAssembler<'a> {
    tree: &'a WorkTree,
    formats: Vec<SbomFormat>,
    out_dir: PathBuf,
    stage: SbomStage,
    layer: Option<LayerArtifact>,
    files: Vec<LayerFile>,
    release: Option<OsRelease>,
    packages: Vec<InstalledPackage>,
    installed_db: Vec<u8>,
    info: Option<ImageInfo>,
}

impl<'a> SbomAssembler<'a> {
    #[must_use]
    pub fn new(tree: &'a WorkTree, formats: &[SbomFormat], out_dir: impl Into<PathBuf>) -> Self {
        Self {
            tree,
            formats: formats.to_vec(),
            out_dir: out_dir.into(),
            stage: SbomStage::Uninitialized,
            layer: None,
            files: Vec::new(),
            release: None,
            packages: Vec::new(),
            installed_db: Vec::new(),
            info: None,
        }
    }

    #[must_use]
    pub const fn stage(&self) -> SbomStage {
        self.stage
    }

    fn expect_stage(&self, expected: SbomStage) -> Result<()> {
        if self.stage == expected {
            return Ok(());
        }
        Err(ImgforgeError::sbom(
            "advancing SBOM assembly",
            SbomErrorKind::StageOrder {
                expected: expected.to_string(),
                actual: self.stage.to_string(),
            },
        ))
    }

    /// Bind the built layer. The manifest must reference exactly that layer.
    pub fn bind_layer(&mut self, layer: &LayerArtifact, manifest: &ImageManifest) -> Result<()> {
        self.expect_stage(SbomStage::Uninitialized)?;

        let descriptor = manifest.single_layer().map_err(|count| {
            ImgforgeError::sbom("binding layer", SbomErrorKind::LayerCount(count))
        })?;
        if descriptor.digest != layer.digest {
            return Err(ImgforgeError::sbom(
                "binding layer",
                SbomErrorKind::DigestMismatch {
                    expected: layer.digest.to_string(),
                    actual: descriptor.digest.to_string(),
                },
            ));
        }

        let files = read_layer_files(layer)?;
        debug!(files = files.len(), layer = %layer.digest, "layer read back");
        self.files = files;
        self.layer = Some(layer.clone());
        self.stage = SbomStage::LayerBound;
        Ok(())
    }

    /// Parse `etc/os-release` from the tree.
    pub fn load_release_data(&mut self) -> Result<()> {
        self.expect_stage(SbomStage::LayerBound)?;

        let malformed = |message: String| {
            ImgforgeError::sbom(
                format!("loading {OS_RELEASE_PATH}"),
                SbomErrorKind::MalformedRelease(message),
            )
        };
        let content = self
            .tree
            .read_to_string(OS_RELEASE_PATH)
            .map_err(|e| malformed(e.to_string()))?;
        let release = OsRelease::parse(&content).map_err(malformed)?;
        debug!(id = release.id(), version = release.version_id(), "release data loaded");
        self.release = Some(release);
        self.stage = SbomStage::ReleaseDataLoaded;
        Ok(())
    }

    /// Parse the installed database, keeping its raw bytes for `idb`.
    pub fn load_package_data(&mut self) -> Result<()> {
        self.expect_stage(SbomStage::ReleaseDataLoaded)?;

        let unavailable = |message: String| {
            ImgforgeError::sbom(
                format!("loading {INSTALLED_DB_PATH}"),
                SbomErrorKind::PackageIndex(message),
            )
        };
        let raw = self
            .tree
            .read(INSTALLED_DB_PATH)
            .map_err(|e| unavailable(e.to_string()))?;
        let content = std::str::from_utf8(&raw).map_err(|e| unavailable(e.to_string()))?;
        let packages = parse_installed(content).map_err(unavailable)?;
        debug!(packages = packages.len(), "package data loaded");
        self.packages = packages;
        self.installed_db = raw;
        self.stage = SbomStage::PackageDataLoaded;
        Ok(())
    }

    /// Attach the image identity. Its layer digest must be the bound layer's.
    pub fn bind_image_info(&mut self, info: ImageInfo) -> Result<()> {
        self.expect_stage(SbomStage::PackageDataLoaded)?;

        if let Some(ref layer) = self.layer {
            if layer.digest != info.layer_digest {
                return Err(ImgforgeError::sbom(
                    "binding image info",
                    SbomErrorKind::DigestMismatch {
                        expected: layer.digest.to_string(),
                        actual: info.layer_digest.to_string(),
                    },
                ));
            }
        }
        self.info = Some(info);
        self.stage = SbomStage::ImageInfoBound;
        Ok(())
    }

    /// Write one document per requested format.
    pub fn generate(&mut self) -> Result<Vec<SbomRecord>> {
        self.expect_stage(SbomStage::ImageInfoBound)?;
        let (Some(info), Some(release)) = (self.info.as_ref(), self.release.as_ref()) else {
            return Err(ImgforgeError::sbom(
                "generating SBOM",
                SbomErrorKind::StageOrder {
                    expected: SbomStage::ImageInfoBound.to_string(),
                    actual: self.stage.to_string(),
                },
            ));
        };

        if self.formats.is_empty() {
            warn!(arch = %info.arch, "no SBOM formats configured, skipping SBOM generation");
            self.stage = SbomStage::Generated;
            return Ok(Vec::new());
        }

        fs::create_dir_all(&self.out_dir).map_err(|e| ImgforgeError::io(&self.out_dir, e))?;
        let input = ImageSbomInput {
            info,
            release,
            packages: &self.packages,
            files: &self.files,
        };

        let mut records = Vec::with_capacity(self.formats.len());
        for format in &self.formats {
            let path = self.out_dir.join(format.arch_file_name(&info.arch));
            let bytes = render_image_document(*format, &input, &self.installed_db)?;
            write_document(&path, &bytes)?;
            let digest = Digest::of(&bytes);
            info!(format = %format, path = %path.display(), digest = %digest, "SBOM written");
            records.push(SbomRecord {
                path,
                format: *format,
                arch: Some(info.arch),
                digest,
                subject: info.image_digest.clone(),
            });
        }

        self.stage = SbomStage::Generated;
        Ok(records)
    }
}

pub(super) fn write_document(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes).map_err(|e| ImgforgeError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apk::render_installed;
    use crate::layer::LayerBuilder;
    use crate::model::{Architecture, Descriptor, MediaTypes};
    use chrono::{DateTime, Utc};
    use std::collections::BTreeMap;

    struct Fixture {
        _root: tempfile::TempDir,
        out: tempfile::TempDir,
        tree: WorkTree,
        layer: LayerArtifact,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().expect("root");
        let out = tempfile::tempdir().expect("out");
        let tree = WorkTree::open(root.path()).expect("open");
        tree.write_file(OS_RELEASE_PATH, b"ID=alpine\nVERSION_ID=3.20.0\n", 0o644)
            .expect("os-release");
        let mut pkg = InstalledPackage::new("alpine-baselayout", "3.6.5-r0");
        pkg.license = Some("GPL-2.0-only".to_string());
        tree.write_file(INSTALLED_DB_PATH, render_installed(&[pkg]).as_bytes(), 0o644)
            .expect("db");
        let layer = LayerBuilder::new(&tree, DateTime::<Utc>::UNIX_EPOCH)
            .build(&out.path().join("layer.tar.gz"))
            .expect("layer");
        Fixture {
            _root: root,
            out,
            tree,
            layer,
        }
    }

    fn manifest(layers: Vec<Descriptor>) -> ImageManifest {
        ImageManifest {
            schema_version: 2,
            media_type: MediaTypes::Oci.manifest().to_string(),
            config: Descriptor::new(MediaTypes::Oci.config(), 2, Digest::of(b"{}")),
            layers,
            annotations: BTreeMap::new(),
        }
    }

    fn layer_descriptor(layer: &LayerArtifact) -> Descriptor {
        Descriptor::new(MediaTypes::Oci.layer(), layer.size, layer.digest.clone())
    }

    fn info(layer: &LayerArtifact) -> ImageInfo {
        ImageInfo {
            reference: None,
            image_digest: Digest::of(b"manifest"),
            layer_digest: layer.digest.clone(),
            layer_diff_id: layer.diff_id.clone(),
            arch: Architecture::X86_64,
            media_type: MediaTypes::Oci.manifest().to_string(),
            epoch: DateTime::<Utc>::UNIX_EPOCH,
            vcs_url: None,
        }
    }

    #[test]
    fn test_full_sequence_writes_every_format() {
        let fx = fixture();
        let formats = [SbomFormat::Spdx, SbomFormat::Cyclonedx, SbomFormat::Idb];
        let mut asm = SbomAssembler::new(&fx.tree, &formats, fx.out.path());
        asm.bind_layer(&fx.layer, &manifest(vec![layer_descriptor(&fx.layer)]))
            .expect("bind layer");
        asm.load_release_data().expect("release");
        asm.load_package_data().expect("packages");
        asm.bind_image_info(info(&fx.layer)).expect("info");
        let records = asm.generate().expect("generate");

        assert_eq!(asm.stage(), SbomStage::Generated);
        let names: Vec<_> = records
            .iter()
            .map(|r| r.path.file_name().expect("file name").to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            ["sbom-x86_64.spdx.json", "sbom-x86_64.cdx", "sbom-x86_64.idb"]
        );
        for record in &records {
            let bytes = fs::read(&record.path).expect("read");
            assert_eq!(record.digest, Digest::of(&bytes));
            assert_eq!(record.subject, Digest::of(b"manifest"));
        }
        let idb = fs::read(&records[2].path).expect("read");
        assert_eq!(idb, fx.tree.read(INSTALLED_DB_PATH).expect("read"));
    }

    #[test]
    fn test_out_of_order_transition() {
        let fx = fixture();
        let mut asm = SbomAssembler::new(&fx.tree, &[SbomFormat::Spdx], fx.out.path());
        let err = asm.load_release_data().expect_err("out of order");
        assert!(matches!(
            err,
            ImgforgeError::Sbom {
                source: SbomErrorKind::StageOrder { .. },
                ..
            }
        ));
        assert_eq!(asm.stage(), SbomStage::Uninitialized);
    }

    #[test]
    fn test_layer_count_invariant() {
        let fx = fixture();
        for layers in [vec![], vec![layer_descriptor(&fx.layer), layer_descriptor(&fx.layer)]] {
            let expected = layers.len();
            let mut asm = SbomAssembler::new(&fx.tree, &[SbomFormat::Spdx], fx.out.path());
            let err = asm
                .bind_layer(&fx.layer, &manifest(layers))
                .expect_err("bad layer count");
            match err {
                ImgforgeError::Sbom {
                    source: SbomErrorKind::LayerCount(n),
                    ..
                } => assert_eq!(n, expected),
                other => panic!("unexpected error {other:?}"),
            }
        }
    }

    #[test]
    fn test_manifest_layer_must_match_artifact() {
        let fx = fixture();
        let mut other = layer_descriptor(&fx.layer);
        other.digest = Digest::of(b"another layer");
        let mut asm = SbomAssembler::new(&fx.tree, &[SbomFormat::Spdx], fx.out.path());
        assert!(asm.bind_layer(&fx.layer, &manifest(vec![other])).is_err());
    }

    #[test]
    fn test_malformed_release_is_fatal() {
        let fx = fixture();
        fx.tree
            .write_file(OS_RELEASE_PATH, b"NAME=thing\nnot a pair\n", 0o644)
            .expect("rewrite");
        let mut asm = SbomAssembler::new(&fx.tree, &[SbomFormat::Spdx], fx.out.path());
        asm.bind_layer(&fx.layer, &manifest(vec![layer_descriptor(&fx.layer)]))
            .expect("bind");
        let err = asm.load_release_data().expect_err("malformed");
        assert!(matches!(
            err,
            ImgforgeError::Sbom {
                source: SbomErrorKind::MalformedRelease(_),
                ..
            }
        ));
        assert_eq!(asm.stage(), SbomStage::LayerBound);
    }

    #[test]
    fn test_no_formats_is_skipped() {
        let fx = fixture();
        let mut asm = SbomAssembler::new(&fx.tree, &[], fx.out.path().join("sboms"));
        asm.bind_layer(&fx.layer, &manifest(vec![layer_descriptor(&fx.layer)]))
            .expect("bind");
        asm.load_release_data().expect("release");
        asm.load_package_data().expect("packages");
        asm.bind_image_info(info(&fx.layer)).expect("info");
        assert!(asm.generate().expect("generate").is_empty());
        assert!(!fx.out.path().join("sboms").exists());
    }
}
