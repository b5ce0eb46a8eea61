//! imgforge: reproducible OCI layer and image builder with SBOMs
//!
//! Turns prepared root filesystems into single-layer OCI images, one per
//! architecture, plus an index and SPDX or `CycloneDX` documents.

#![allow(clippy::needless_pass_by_value)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use imgforge::{
    cli::{self, BuildOverrides},
    config::{ImgforgeConfig, generate_example_config, generate_json_schema, load_or_default},
    model::{Architecture, SbomFormat},
};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "imgforge")]
#[command(version)]
#[command(about = "Reproducible OCI layer builder with SBOMs", long_about = None)]
#[command(after_help = "EXAMPLES:
    # Build amd64 and arm64 images from two prepared trees
    imgforge build --rootfs 'work/{arch}' --arch x86_64 --arch aarch64 --tag registry.local/app:1.0

    # Only write the layer for one tree
    imgforge layer work/x86_64 --arch x86_64

    # Pin the build time
    SOURCE_DATE_EPOCH=1700000000 imgforge build --rootfs work/x86_64")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by `build` and `layer`
#[derive(Parser)]
struct OutputArgs {
    /// Directory for layers, index.json and SBOMs
    #[arg(short = 'O', long)]
    output_dir: Option<PathBuf>,

    /// Layer output path; may contain {arch}
    #[arg(long)]
    tarball: Option<String>,

    /// Build time in seconds since the Unix epoch (overrides SOURCE_DATE_EPOCH)
    #[arg(long)]
    source_date_epoch: Option<i64>,
}

/// Arguments for the `build` subcommand
#[derive(Parser)]
struct BuildArgs {
    /// Root filesystem to package; use {arch} when building several architectures
    #[arg(long)]
    rootfs: String,

    /// Target architecture (repeatable)
    #[arg(short, long = "arch")]
    archs: Vec<Architecture>,

    /// Image reference (repeatable)
    #[arg(short, long = "tag")]
    tags: Vec<String>,

    /// SBOM format (repeatable); the first is primary
    #[arg(long = "sbom-format", conflicts_with = "no_sbom")]
    sbom_formats: Vec<SbomFormat>,

    /// Directory for SBOM documents
    #[arg(long)]
    sbom_dir: Option<PathBuf>,

    /// Skip SBOM generation
    #[arg(long)]
    no_sbom: bool,

    /// Use Docker media types instead of OCI
    #[arg(long)]
    docker: bool,

    #[command(flatten)]
    output: OutputArgs,
}

/// Arguments for the `layer` subcommand
#[derive(Parser)]
struct LayerArgs {
    /// Root filesystem to package
    rootfs: PathBuf,

    /// Architecture the tree was prepared for
    #[arg(short, long, default_value = "x86_64")]
    arch: Architecture,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Build layers, images, the index and SBOMs
    Build(BuildArgs),

    /// Mutate one tree and write its layer only
    Layer(LayerArgs),

    /// Configuration helpers
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Sub-subcommands for the `config` command
#[derive(Subcommand)]
enum ConfigAction {
    /// Print the JSON Schema for imgforge.yaml
    Schema {
        /// Output file (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print current effective configuration (merged from defaults + file)
    Show,
    /// Generate an example imgforge.yaml in the current directory
    Init,
}

fn load_config(explicit: Option<&Path>) -> Result<ImgforgeConfig> {
    let (config, loaded_from) = load_or_default(explicit).context("failed to load config")?;
    if let Some(path) = loaded_from {
        tracing::debug!("Loaded config from {}", path.display());
    }
    Ok(config)
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.to_string()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match cli.command {
        Commands::Build(args) => {
            let mut config = load_config(cli.config.as_deref())?;
            let overrides = BuildOverrides {
                archs: args.archs,
                output_dir: args.output.output_dir,
                sbom_dir: args.sbom_dir,
                sbom_formats: args.sbom_formats,
                no_sbom: args.no_sbom,
                tags: args.tags,
                tarball: args.output.tarball,
                source_date_epoch: args.output.source_date_epoch,
                docker_media_types: args.docker,
            };
            overrides.apply(&mut config.build, env_var)?;
            let summary = cli::run_build(config, &args.rootfs)?;
            println!("{}", cli::to_json(&summary)?);
            Ok(())
        }

        Commands::Layer(args) => {
            let mut config = load_config(cli.config.as_deref())?;
            let overrides = BuildOverrides {
                archs: vec![args.arch],
                output_dir: args.output.output_dir,
                tarball: args.output.tarball,
                source_date_epoch: args.output.source_date_epoch,
                ..BuildOverrides::default()
            };
            overrides.apply(&mut config.build, env_var)?;
            let layer = cli::run_layer(config, args.arch, &args.rootfs)?;
            println!("{}", cli::to_json(&layer)?);
            Ok(())
        }

        Commands::Config { action } => match action {
            ConfigAction::Schema { output } => {
                let schema = generate_json_schema();
                match output {
                    Some(path) => {
                        std::fs::write(&path, &schema)
                            .with_context(|| format!("failed to write {}", path.display()))?;
                        eprintln!("Schema written to {}", path.display());
                    }
                    None => {
                        println!("{schema}");
                    }
                }
                Ok(())
            }
            ConfigAction::Show => {
                let (config, loaded_from) = load_or_default(cli.config.as_deref())
                    .context("failed to load config")?;
                if let Some(path) = &loaded_from {
                    eprintln!("# Loaded from: {}", path.display());
                } else {
                    eprintln!("# No config file found; showing defaults");
                }
                let yaml = serde_yaml::to_string(&config).context("failed to serialize config")?;
                print!("{yaml}");
                Ok(())
            }
            ConfigAction::Init => {
                let target = std::env::current_dir()
                    .context("cannot determine current directory")?
                    .join("imgforge.yaml");
                if target.exists() {
                    anyhow::bail!(
                        "{} already exists. Remove it first to re-initialize.",
                        target.display()
                    );
                }
                std::fs::write(&target, generate_example_config())
                    .with_context(|| format!("failed to write {}", target.display()))?;
                eprintln!("Created {}", target.display());
                Ok(())
            }
        },
    }
}
