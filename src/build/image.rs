//! Image config, manifest and index assembly.
//!
//! Documents are serialized once with `serde_json::to_vec`; digests are
//! taken over exactly those bytes and the bytes are kept alongside.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::config::{BuildOptions, ImageConfiguration};
use crate::error::{ImgforgeError, IndexErrorKind, Result};
use crate::model::{
    Architecture, BuiltImage, BuiltIndex, ContainerConfig, Descriptor, Digest, ImageConfigBlob,
    ImageIndex, ImageManifest, LayerArtifact, MediaTypes, Platform, RootFs,
};
use crate::utils::rfc3339;

const SOURCE_ANNOTATION: &str = "org.opencontainers.image.source";
const CREATED_ANNOTATION: &str = "org.opencontainers.image.created";
const SUPERVISOR: [&str; 2] = ["/bin/s6-svscan", "/sv"];

fn encode<T: serde::Serialize>(value: &T, what: &str, arch: Option<&Architecture>) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| {
        let context = match arch {
            Some(arch) => format!("encoding {what} for {arch}"),
            None => format!("encoding {what}"),
        };
        ImgforgeError::index(context, IndexErrorKind::Manifest(e.to_string()))
    })
}

fn annotations(image: &ImageConfiguration, epoch: DateTime<Utc>) -> BTreeMap<String, String> {
    let mut annotations = image.annotations.clone();
    annotations
        .entry(CREATED_ANNOTATION.to_string())
        .or_insert_with(|| rfc3339(epoch));
    if let Some(ref url) = image.vcs_url {
        annotations
            .entry(SOURCE_ANNOTATION.to_string())
            .or_insert_with(|| url.clone());
    }
    annotations
}

/// The runtime config blob for one architecture.
///
/// Without an explicit entrypoint, images with services start the
/// supervisor over `/sv`.
#[must_use]
pub fn config_blob(
    image: &ImageConfiguration,
    arch: &Architecture,
    layer: &LayerArtifact,
    epoch: DateTime<Utc>,
) -> ImageConfigBlob {
    let entrypoint = image.entrypoint_argv().or_else(|| {
        (!image.entrypoint.services.is_empty())
            .then(|| SUPERVISOR.iter().map(|s| (*s).to_string()).collect())
    });
    ImageConfigBlob {
        created: rfc3339(epoch),
        architecture: arch.oci_arch().to_string(),
        variant: arch.oci_variant().map(str::to_string),
        os: "linux".to_string(),
        config: ContainerConfig {
            env: image.env_list(),
            entrypoint,
            cmd: image.cmd_argv(),
            working_dir: image.work_dir.clone(),
            user: image.accounts.run_as.clone(),
        },
        rootfs: RootFs {
            kind: "layers".to_string(),
            diff_ids: vec![layer.diff_id.clone()],
        },
    }
}

/// Assemble the single-layer image for one architecture.
pub fn build_image(
    options: &BuildOptions,
    image: &ImageConfiguration,
    arch: Architecture,
    layer: &LayerArtifact,
    epoch: DateTime<Utc>,
) -> Result<BuiltImage> {
    let media = options.media_types();
    let config_bytes = encode(&config_blob(image, &arch, layer, epoch), "image config", Some(&arch))?;
    let manifest = ImageManifest {
        schema_version: 2,
        media_type: media.manifest().to_string(),
        config: Descriptor::new(
            media.config(),
            config_bytes.len() as u64,
            Digest::of(&config_bytes),
        ),
        layers: vec![Descriptor::new(media.layer(), layer.size, layer.digest.clone())],
        annotations: annotations(image, epoch),
    };
    let manifest_bytes = encode(&manifest, "image manifest", Some(&arch))?;
    let digest = Digest::of(&manifest_bytes);
    Ok(BuiltImage {
        arch,
        manifest,
        manifest_bytes,
        config_bytes,
        digest,
    })
}

/// Assemble the index over every built image, in canonical architecture order.
pub fn build_index(
    images: &[BuiltImage],
    media: MediaTypes,
    image: &ImageConfiguration,
    epoch: DateTime<Utc>,
) -> Result<BuiltIndex> {
    let mut sorted: Vec<&BuiltImage> = images.iter().collect();
    sorted.sort_by(|a, b| a.arch.cmp(&b.arch));

    let manifests = sorted
        .into_iter()
        .map(|built| {
            let mut descriptor = Descriptor::new(
                media.manifest(),
                built.manifest_bytes.len() as u64,
                built.digest.clone(),
            );
            descriptor.platform = Some(Platform::linux(&built.arch));
            descriptor
        })
        .collect();
    let index = ImageIndex {
        schema_version: 2,
        media_type: media.index().to_string(),
        manifests,
        annotations: annotations(image, epoch),
    };
    let bytes = encode(&index, "image index", None)?;
    let digest = Digest::of(&bytes);
    Ok(BuiltIndex {
        index,
        bytes,
        digest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn layer(seed: &[u8]) -> LayerArtifact {
        LayerArtifact {
            path: PathBuf::from("/out/layer.tar.gz"),
            diff_id: Digest::of(&[seed, b"-tar"].concat()),
            digest: Digest::of(seed),
            size: 42,
        }
    }

    #[test]
    fn test_manifest_references_layer_and_config() {
        let options = BuildOptions::default();
        let image = ImageConfiguration::default();
        let layer = layer(b"l");
        let built = build_image(&options, &image, Architecture::X86_64, &layer, DateTime::<Utc>::UNIX_EPOCH)
            .expect("image");

        assert_eq!(built.manifest.single_layer().map(|d| &d.digest), Ok(&layer.digest));
        assert_eq!(built.manifest.config.digest, Digest::of(&built.config_bytes));
        assert_eq!(built.digest, Digest::of(&built.manifest_bytes));

        let config: serde_json::Value = serde_json::from_slice(&built.config_bytes).expect("parse");
        assert_eq!(config["architecture"], "amd64");
        assert_eq!(config["created"], "1970-01-01T00:00:00Z");
        assert_eq!(config["rootfs"]["diff_ids"][0], layer.diff_id.to_string());
    }

    #[test]
    fn test_same_inputs_same_digest() {
        let options = BuildOptions::default();
        let image = ImageConfiguration::default();
        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        let a = build_image(&options, &image, Architecture::Aarch64, &layer(b"l"), epoch).expect("build image");
        let b = build_image(&options, &image, Architecture::Aarch64, &layer(b"l"), epoch).expect("build image");
        assert_eq!(a.digest, b.digest);
        assert_eq!(a.manifest_bytes, b.manifest_bytes);
    }

    #[test]
    fn test_services_default_to_supervisor() {
        let mut image = ImageConfiguration::default();
        image
            .entrypoint
            .services
            .insert("web".to_string(), "/usr/bin/web".to_string());
        let blob = config_blob(&image, &Architecture::X86_64, &layer(b"l"), DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(
            blob.config.entrypoint,
            Some(vec!["/bin/s6-svscan".to_string(), "/sv".to_string()])
        );
    }

    #[test]
    fn test_index_is_sorted_by_arch() {
        let options = BuildOptions::default();
        let image = ImageConfiguration::default();
        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        let images: Vec<_> = [Architecture::X86_64, Architecture::Riscv64, Architecture::Aarch64]
            .into_iter()
            .map(|arch| build_image(&options, &image, arch, &layer(arch.to_apk().as_bytes()), epoch).expect("build image"))
            .collect();
        let index = build_index(&images, MediaTypes::Oci, &image, epoch).expect("build index");
        let archs: Vec<_> = index
            .index
            .manifests
            .iter()
            .filter_map(|d| d.platform.as_ref().map(|p| p.architecture.as_str()))
            .collect();
        assert_eq!(archs, ["arm64", "riscv64", "amd64"]);
        assert_eq!(index.digest, Digest::of(&index.bytes));
    }
}
