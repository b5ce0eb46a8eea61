//! **Reproducible OCI layers and images, with SBOMs, from prepared root filesystems.**
//!
//! `imgforge` takes one populated root filesystem per architecture, applies a
//! fixed sequence of mutations (accounts, paths, os-release, supervision,
//! symlinks, device nodes), serializes each tree into a deterministic
//! gzip-compressed tar layer, and assembles single-layer OCI images, an image
//! index and SPDX 2.3 or `CycloneDX` 1.4 documents describing them.
//!
//! Given the same trees, configuration and epoch, every output byte is the
//! same on every run, regardless of how architectures were scheduled.
//!
//! ## Core Concepts & Modules
//!
//! - **[`config`]**: [`BuildOptions`] and [`ImageConfiguration`], loaded from
//!   `imgforge.yaml` and validated before anything is touched.
//! - **[`mutate`]**: the ordered mutation steps run against a [`WorkTree`].
//! - **[`layer`]**: [`LayerBuilder`], which writes the tarball and computes
//!   its diffID, digest and size in a single pass.
//! - **[`sbom`]**: [`SbomAssembler`] for per-architecture documents and
//!   [`IndexAssembler`] for the index-level document.
//! - **[`build`]**: the [`Builder`] that drives all of the above in parallel.
//!
//! ## Building an image
//!
//! ```no_run
//! use imgforge::{BuildOptions, Builder, ImageConfiguration, WorkTree};
//! use imgforge::model::Architecture;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = BuildOptions::builder()
//!         .output_dir("out")
//!         .tag("registry.local/app:1.0")
//!         .source_date_epoch(0)
//!         .build();
//!     let builder = Builder::new(options, ImageConfiguration::default());
//!
//!     let tree = WorkTree::open("work/x86_64")?;
//!     let output = builder.build_all(vec![(Architecture::X86_64, tree)])?;
//!     println!("index {}", output.index.digest);
//!     Ok(())
//! }
//! ```

// Lint to discourage unwrap() in production code - prefer explicit error handling
#![warn(clippy::unwrap_used)]
// Pedantic lints: allow categories that are design choices for this codebase
#![allow(
    // Sizes and modes are bounded by the tar format
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::too_many_lines,
    clippy::struct_excessive_bools,
    // Variable names like `uid`/`gid` are clear in context
    clippy::similar_names
)]

pub mod apk;
pub mod build;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod error;
pub mod layer;
pub mod model;
pub mod mutate;
pub mod sbom;
pub mod tree;
pub mod utils;

// Re-export main types for convenience
pub use build::{ArchBuild, BuildOutput, Builder};
pub use cancel::CancellationToken;
pub use config::{BuildOptions, BuildOptionsBuilder, ImageConfiguration, ImgforgeConfig};
pub use config::{ConfigError, Validatable};
pub use error::{ErrorContext, ImgforgeError, OptionContext, Result};
pub use layer::LayerBuilder;
pub use model::{Architecture, Digest, LayerArtifact, SbomFormat, SbomRecord};
pub use sbom::{IndexAssembler, SbomAssembler, SbomStage};
pub use tree::WorkTree;
