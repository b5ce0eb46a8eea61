//! Build orchestration.
//!
//! [`Builder::build_arch`] runs one architecture end to end: mutation
//! pipeline, layer, image, SBOM. [`Builder::build_all`] runs every
//! architecture in parallel on the rayon pool, then assembles the index
//! once all of them succeeded.
//!
//! ```no_run
//! use imgforge::build::Builder;
//! use imgforge::config::{BuildOptions, ImageConfiguration};
//! use imgforge::model::Architecture;
//! use imgforge::tree::WorkTree;
//!
//! # fn main() -> imgforge::error::Result<()> {
//! let builder = Builder::new(BuildOptions::default(), ImageConfiguration::default());
//! let tree = WorkTree::open("rootfs-x86_64")?;
//! let output = builder.build_all(vec![(Architecture::X86_64, tree)])?;
//! println!("index {}", output.index.digest);
//! # Ok(())
//! # }
//! ```

mod context;
mod image;

use std::fs;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use tracing::{info, info_span, warn};

use crate::apk::{InstalledTree, PackageManager};
use crate::cancel::CancellationToken;
use crate::config::{BuildOptions, ImageConfiguration};
use crate::error::{ImgforgeError, Result};
use crate::layer::{layer_path, LayerBuilder};
use crate::model::{
    Architecture, BuiltImage, BuiltIndex, InstalledPackage, LayerArtifact, SbomRecord,
    TagReference,
};
use crate::mutate::{run_pipeline, S6Writer, SupervisionWriter};
use crate::sbom::{ImageInfo, IndexAssembler, SbomAssembler};
use crate::tree::WorkTree;

pub use context::{resolve_epoch, BuildContext, WorkState};
pub use image::{build_image, build_index, config_blob};

/// Result of one architecture's build.
#[derive(Debug, Clone)]
pub struct ArchBuild {
    pub layer: LayerArtifact,
    pub image: BuiltImage,
    pub sboms: Vec<SbomRecord>,
    /// Configured and derived tags
    pub tags: Vec<String>,
    pub epoch: DateTime<Utc>,
}

/// Result of a multi-architecture build.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    /// Ordered by architecture
    pub archs: Vec<ArchBuild>,
    pub index: BuiltIndex,
    pub index_sboms: Vec<SbomRecord>,
}

/// Drives builds for a fixed configuration.
pub struct Builder {
    options: Arc<BuildOptions>,
    image: Arc<ImageConfiguration>,
    package_manager: Arc<dyn PackageManager>,
    supervision: Arc<dyn SupervisionWriter>,
    cancel: CancellationToken,
}

impl Builder {
    /// A builder using [`InstalledTree`] and [`S6Writer`].
    #[must_use]
    pub fn new(options: BuildOptions, image: ImageConfiguration) -> Self {
        Self {
            options: Arc::new(options),
            image: Arc::new(image),
            package_manager: Arc::new(InstalledTree::new()),
            supervision: Arc::new(S6Writer),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_package_manager(mut self, package_manager: Arc<dyn PackageManager>) -> Self {
        self.package_manager = package_manager;
        self
    }

    #[must_use]
    pub fn with_supervision(mut self, supervision: Arc<dyn SupervisionWriter>) -> Self {
        self.supervision = supervision;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// A fresh context for one architecture.
    pub fn context(&self, arch: Architecture, tree: WorkTree) -> Result<BuildContext> {
        BuildContext::new(
            Arc::clone(&self.options),
            Arc::clone(&self.image),
            arch,
            tree,
            Arc::clone(&self.package_manager),
            Arc::clone(&self.supervision),
        )
    }

    /// Resolve the installed package set, logging every conflict.
    pub fn package_list(&self, tree: &WorkTree) -> Result<Vec<InstalledPackage>> {
        let (packages, conflicts) = self.package_manager.resolve_world(tree)?;
        for conflict in &conflicts {
            warn!(%conflict, "package conflict");
        }
        info!(
            packages = packages.len(),
            conflicts = conflicts.len(),
            "package list resolved"
        );
        Ok(packages)
    }

    /// Mutate the tree and serialize it into a layer.
    pub fn build_layer(&self, ctx: &mut BuildContext) -> Result<LayerArtifact> {
        let arch = ctx.arch;
        run_pipeline(ctx, &self.cancel)?;

        let span = ctx.span.clone();
        let _arch = span.enter();
        let step = |e: ImgforgeError| ImgforgeError::step("layer", arch, e);
        self.cancel.check("layer").map_err(step)?;

        let packages = self.package_list(&ctx.state.tree).map_err(step)?;
        let path = layer_path(
            self.options.tarball_path.as_deref(),
            &self.options.output_dir,
            &arch,
        );
        let layer = {
            let _layer = info_span!("layer").entered();
            LayerBuilder::new(&ctx.state.tree, ctx.state.epoch)
                .with_packages(&packages)
                .with_cancellation(self.cancel.clone())
                .build(&path)
                .map_err(step)?
        };
        info!(
            path = %layer.path.display(),
            diff_id = %layer.diff_id,
            digest = %layer.digest,
            size = layer.size,
            "layer built"
        );
        Ok(layer)
    }

    /// Build one architecture: mutation, layer, image and SBOM.
    pub fn build_arch(&self, arch: Architecture, tree: WorkTree) -> Result<ArchBuild> {
        let mut ctx = self
            .context(arch, tree)
            .map_err(|e| ImgforgeError::step("context", arch, e))?;
        let layer = self.build_layer(&mut ctx)?;

        let span = ctx.span.clone();
        let _arch = span.enter();
        let epoch = ctx.state.epoch;
        let image = build_image(&self.options, &self.image, arch, &layer, epoch)
            .map_err(|e| ImgforgeError::step("image", arch, e))?;
        info!(digest = %image.digest, "image assembled");

        self.cancel
            .check("sbom")
            .map_err(|e| ImgforgeError::step("sbom", arch, e))?;
        let sboms = self
            .generate_sboms(&ctx, &layer, &image)
            .map_err(|e| ImgforgeError::step("sbom", arch, e))?;

        Ok(ArchBuild {
            layer,
            image,
            sboms,
            tags: ctx.state.tags,
            epoch,
        })
    }

    fn primary_reference(tag: Option<&str>) -> Option<TagReference> {
        let tag = tag?;
        match TagReference::parse(tag) {
            Ok(reference) => Some(reference),
            Err(e) => {
                warn!(tag = %tag, error = %e, "ignoring invalid primary tag for SBOM naming");
                None
            }
        }
    }

    fn generate_sboms(
        &self,
        ctx: &BuildContext,
        layer: &LayerArtifact,
        image: &BuiltImage,
    ) -> Result<Vec<SbomRecord>> {
        let _sbom = info_span!("sbom").entered();
        if !self.options.want_sbom() {
            warn!("no SBOM formats configured, skipping SBOM generation");
            return Ok(Vec::new());
        }

        let mut assembler = SbomAssembler::new(
            &ctx.state.tree,
            &self.options.sbom_formats,
            self.options.sbom_dir(),
        );
        assembler.bind_layer(layer, &image.manifest)?;
        assembler.load_release_data()?;
        assembler.load_package_data()?;
        assembler.bind_image_info(ImageInfo {
            reference: Self::primary_reference(ctx.primary_tag()),
            image_digest: image.digest.clone(),
            layer_digest: layer.digest.clone(),
            layer_diff_id: layer.diff_id.clone(),
            arch: ctx.arch,
            media_type: image.manifest.media_type.clone(),
            epoch: ctx.state.epoch,
            vcs_url: self.image.vcs_url.clone(),
        })?;
        assembler.generate()
    }

    /// Build every architecture in parallel, then the index.
    ///
    /// The first failing architecture cancels the others. Output does not
    /// depend on scheduling: results are ordered by architecture before
    /// anything is aggregated.
    pub fn build_all(&self, trees: Vec<(Architecture, WorkTree)>) -> Result<BuildOutput> {
        let mut trees = trees;
        trees.sort_by(|a, b| a.0.cmp(&b.0));
        if let Some(pair) = trees.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(ImgforgeError::config(format!(
                "architecture {} given more than once",
                pair[0].0
            )));
        }
        if trees.is_empty() {
            return Err(ImgforgeError::config("no architectures to build"));
        }
        fs::create_dir_all(&self.options.output_dir)
            .map_err(|e| ImgforgeError::io(&self.options.output_dir, e))?;

        let results: Vec<Result<ArchBuild>> = trees
            .into_par_iter()
            .map(|(arch, tree)| {
                let result = self.build_arch(arch, tree);
                if let Err(ref e) = result {
                    if !e.is_cancelled() {
                        self.cancel.cancel();
                    }
                }
                result
            })
            .collect();

        // Report the root cause, not a sibling's cancellation.
        let mut archs = Vec::with_capacity(results.len());
        let mut cancelled = None;
        for result in results {
            match result {
                Ok(build) => archs.push(build),
                Err(e) if e.is_cancelled() => {
                    cancelled.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }
        if let Some(e) = cancelled {
            return Err(e);
        }

        self.write_index(archs)
    }

    fn write_index(&self, archs: Vec<ArchBuild>) -> Result<BuildOutput> {
        let _index = info_span!("index").entered();
        let epoch = archs
            .iter()
            .map(|a| a.epoch)
            .max()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let images: Vec<BuiltImage> = archs.iter().map(|a| a.image.clone()).collect();
        let index = build_index(&images, self.options.media_types(), &self.image, epoch)?;

        let reference = archs
            .first()
            .and_then(|a| Self::primary_reference(a.tags.first().map(String::as_str)));
        let index_sboms = IndexAssembler::new(
            self.options.sbom_dir(),
            &self.options.output_dir,
            &self.options.sbom_formats,
        )
        .with_reference(reference)
        .with_epoch(epoch)
        .with_vcs_url(self.image.vcs_url.clone())
        .assemble(&images, &index)?;

        info!(
            archs = archs.len(),
            digest = %index.digest,
            "index assembled"
        );
        Ok(BuildOutput {
            archs,
            index,
            index_sboms,
        })
    }
}
