//! Build and layer command handlers.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use super::overrides::resolve_rootfs;
use crate::build::{ArchBuild, Builder, BuildOutput};
use crate::config::{ensure_valid, ImgforgeConfig};
use crate::model::{Architecture, Digest, LayerArtifact, SbomRecord};
use crate::tree::WorkTree;

/// What a build produced, printed as JSON on stdout.
#[derive(Debug, Serialize)]
pub struct BuildSummary {
    pub index_digest: Option<Digest>,
    pub images: Vec<ImageSummary>,
    pub sboms: Vec<SbomRecord>,
}

#[derive(Debug, Serialize)]
pub struct ImageSummary {
    pub arch: Architecture,
    pub image_digest: Digest,
    pub layer: LayerArtifact,
    pub tags: Vec<String>,
}

impl From<&ArchBuild> for ImageSummary {
    fn from(build: &ArchBuild) -> Self {
        Self {
            arch: build.image.arch,
            image_digest: build.image.digest.clone(),
            layer: build.layer.clone(),
            tags: build.tags.clone(),
        }
    }
}

impl From<&BuildOutput> for BuildSummary {
    fn from(output: &BuildOutput) -> Self {
        let mut sboms: Vec<SbomRecord> = output
            .archs
            .iter()
            .flat_map(|a| a.sboms.iter().cloned())
            .collect();
        sboms.extend(output.index_sboms.iter().cloned());
        Self {
            index_digest: Some(output.index.digest.clone()),
            images: output.archs.iter().map(ImageSummary::from).collect(),
            sboms,
        }
    }
}

fn open_trees(rootfs: &str, archs: &[Architecture]) -> Result<Vec<(Architecture, WorkTree)>> {
    resolve_rootfs(rootfs, archs)?
        .into_iter()
        .map(|(arch, path)| {
            let tree = WorkTree::open(&path)
                .with_context(|| format!("opening rootfs {} for {arch}", path.display()))?;
            Ok((arch, tree))
        })
        .collect()
}

/// Build every configured architecture and the index.
pub fn run_build(config: ImgforgeConfig, rootfs: &str) -> Result<BuildSummary> {
    ensure_valid(&config)?;
    let archs = config.build.sorted_archs();
    let trees = open_trees(rootfs, &archs)?;

    let builder = Builder::new(config.build, config.image);
    let output = builder.build_all(trees)?;
    tracing::info!(
        archs = output.archs.len(),
        index = %output.index.digest,
        "build complete"
    );
    Ok(BuildSummary::from(&output))
}

/// Mutate one tree and write its layer, without image or SBOM output.
pub fn run_layer(config: ImgforgeConfig, arch: Architecture, rootfs: &Path) -> Result<LayerArtifact> {
    ensure_valid(&config)?;
    let tree = WorkTree::open(rootfs)
        .with_context(|| format!("opening rootfs {}", rootfs.display()))?;
    let builder = Builder::new(config.build, config.image);
    let mut ctx = builder.context(arch, tree)?;
    let layer = builder.build_layer(&mut ctx)?;
    Ok(layer)
}

/// Pretty JSON for stdout.
pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("failed to serialize output")
}
