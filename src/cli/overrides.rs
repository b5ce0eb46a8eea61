//! Command-line and environment overrides for build options.
//!
//! Precedence, highest first: command-line flags, `SOURCE_DATE_EPOCH`,
//! the configuration file, built-in defaults.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use crate::config::defaults::SOURCE_DATE_EPOCH_ENV;
use crate::config::BuildOptions;
use crate::layer::ARCH_PLACEHOLDER;
use crate::model::{Architecture, SbomFormat};

/// Build options given on the command line. Empty or `None` fields keep the
/// configured value.
#[derive(Debug, Clone, Default)]
pub struct BuildOverrides {
    pub archs: Vec<Architecture>,
    pub output_dir: Option<PathBuf>,
    pub sbom_dir: Option<PathBuf>,
    pub sbom_formats: Vec<SbomFormat>,
    pub no_sbom: bool,
    pub tags: Vec<String>,
    pub tarball: Option<String>,
    pub source_date_epoch: Option<i64>,
    pub docker_media_types: bool,
}

impl BuildOverrides {
    /// Apply the overrides. `env` looks up environment variables.
    pub fn apply(
        &self,
        options: &mut BuildOptions,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        if !self.archs.is_empty() {
            options.archs.clone_from(&self.archs);
        }
        if let Some(ref dir) = self.output_dir {
            options.output_dir.clone_from(dir);
        }
        if let Some(ref dir) = self.sbom_dir {
            options.sbom_path = Some(dir.clone());
        }
        if self.no_sbom {
            options.sbom_formats.clear();
        } else if !self.sbom_formats.is_empty() {
            options.sbom_formats.clone_from(&self.sbom_formats);
        }
        if !self.tags.is_empty() {
            options.tags.clone_from(&self.tags);
        }
        if let Some(ref tarball) = self.tarball {
            options.tarball_path = Some(tarball.clone());
        }
        if self.docker_media_types {
            options.docker_media_types = true;
        }

        if let Some(epoch) = self.source_date_epoch {
            options.source_date_epoch = Some(epoch);
        } else if let Some(raw) = env(SOURCE_DATE_EPOCH_ENV).filter(|v| !v.trim().is_empty()) {
            let epoch = raw
                .trim()
                .parse::<i64>()
                .with_context(|| format!("{SOURCE_DATE_EPOCH_ENV}={raw} is not a number"))?;
            options.source_date_epoch = Some(epoch);
        }
        Ok(())
    }
}

/// Root filesystem directory for every architecture.
///
/// `template` may contain `{arch}`; it must when more than one architecture
/// is built.
pub fn resolve_rootfs(template: &str, archs: &[Architecture]) -> Result<Vec<(Architecture, PathBuf)>> {
    if archs.len() > 1 && !template.contains(ARCH_PLACEHOLDER) {
        bail!(
            "rootfs '{template}' must contain {ARCH_PLACEHOLDER} when building {} architectures",
            archs.len()
        );
    }
    Ok(archs
        .iter()
        .map(|arch| (*arch, PathBuf::from(template.replace(ARCH_PLACEHOLDER, arch.to_apk()))))
        .collect())
}
