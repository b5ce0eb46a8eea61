//! Configuration types for image builds.
//!
//! [`BuildOptions`] says how to build (outputs, formats, epoch, tags,
//! architectures). [`ImageConfiguration`] says what goes into the image
//! (accounts, paths, services, runtime config). All maps are ordered so
//! iterating them never depends on hashing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::defaults;
use crate::model::{Architecture, MediaTypes, SbomFormat};

// ============================================================================
// Top-level configuration file
// ============================================================================

/// Contents of an `imgforge.yaml` file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ImgforgeConfig {
    /// How to build
    pub build: BuildOptions,
    /// What to put in the image
    pub image: ImageConfiguration,
}

// ============================================================================
// Build options
// ============================================================================

/// Output and reproducibility settings for a build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BuildOptions {
    /// Layer output path. May contain `{arch}`; required when building
    /// more than one architecture. Defaults to
    /// `<output_dir>/imgforge-<arch>.tar.gz`.
    pub tarball_path: Option<String>,
    /// Directory for layers, index.json and (by default) SBOMs
    pub output_dir: PathBuf,
    /// Directory for SBOM documents, when different from `output_dir`
    pub sbom_path: Option<PathBuf>,
    /// Requested SBOM formats; the first is primary. Empty disables SBOMs.
    pub sbom_formats: Vec<SbomFormat>,
    /// Fixed build time in seconds since the Unix epoch
    pub source_date_epoch: Option<i64>,
    /// Label documents with Docker media types instead of OCI
    pub docker_media_types: bool,
    /// Image references, e.g. `registry.local/app:1.0`
    pub tags: Vec<String>,
    /// Target architectures
    #[schemars(with = "Vec<String>")]
    pub archs: Vec<Architecture>,
    /// Installed package whose version is appended as an extra tag
    pub package_version_tag: Option<String>,
    /// Also tag every version stem (`1.2.3` → `1.2`, `1`)
    pub package_version_tag_stem: bool,
    /// Prefix for derived version tags
    pub package_version_tag_prefix: String,
    /// Suffix for derived version tags
    pub tag_suffix: String,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            tarball_path: None,
            output_dir: PathBuf::from(defaults::DEFAULT_OUTPUT_DIR),
            sbom_path: None,
            sbom_formats: defaults::default_sbom_formats(),
            source_date_epoch: None,
            docker_media_types: false,
            tags: Vec::new(),
            archs: vec![defaults::DEFAULT_ARCH],
            package_version_tag: None,
            package_version_tag_stem: false,
            package_version_tag_prefix: String::new(),
            tag_suffix: String::new(),
        }
    }
}

impl BuildOptions {
    /// Create a builder.
    pub fn builder() -> BuildOptionsBuilder {
        BuildOptionsBuilder::default()
    }

    /// Whether any SBOM format was requested
    #[must_use]
    pub fn want_sbom(&self) -> bool {
        !self.sbom_formats.is_empty()
    }

    /// The format index-level documents are produced in
    #[must_use]
    pub fn primary_format(&self) -> Option<SbomFormat> {
        self.sbom_formats.first().copied()
    }

    /// Where SBOM documents are written
    #[must_use]
    pub fn sbom_dir(&self) -> &Path {
        self.sbom_path.as_deref().unwrap_or(&self.output_dir)
    }

    #[must_use]
    pub const fn media_types(&self) -> MediaTypes {
        MediaTypes::from_docker_flag(self.docker_media_types)
    }

    /// Configured architectures, deduplicated in canonical order
    #[must_use]
    pub fn sorted_archs(&self) -> Vec<Architecture> {
        let mut archs = self.archs.clone();
        Architecture::sort_canonical(&mut archs);
        archs.dedup();
        archs
    }

    /// The configured epoch as a timestamp
    #[must_use]
    pub fn configured_epoch(&self) -> Option<DateTime<Utc>> {
        self.source_date_epoch
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
    }
}

/// Builder for [`BuildOptions`] with a fluent API.
#[derive(Debug, Default)]
#[must_use]
pub struct BuildOptionsBuilder {
    options: BuildOptions,
}

impl BuildOptionsBuilder {
    pub fn tarball_path(mut self, path: impl Into<String>) -> Self {
        self.options.tarball_path = Some(path.into());
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.options.output_dir = dir.into();
        self
    }

    pub fn sbom_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.options.sbom_path = Some(dir.into());
        self
    }

    pub fn sbom_formats(mut self, formats: Vec<SbomFormat>) -> Self {
        self.options.sbom_formats = formats;
        self
    }

    pub const fn source_date_epoch(mut self, epoch: i64) -> Self {
        self.options.source_date_epoch = Some(epoch);
        self
    }

    pub const fn docker_media_types(mut self, docker: bool) -> Self {
        self.options.docker_media_types = docker;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.options.tags.push(tag.into());
        self
    }

    pub fn archs(mut self, archs: Vec<Architecture>) -> Self {
        self.options.archs = archs;
        self
    }

    pub fn package_version_tag(mut self, package: impl Into<String>) -> Self {
        self.options.package_version_tag = Some(package.into());
        self
    }

    pub const fn package_version_tag_stem(mut self, stem: bool) -> Self {
        self.options.package_version_tag_stem = stem;
        self
    }

    pub fn package_version_tag_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.options.package_version_tag_prefix = prefix.into();
        self
    }

    pub fn tag_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.options.tag_suffix = suffix.into();
        self
    }

    #[must_use]
    pub fn build(self) -> BuildOptions {
        self.options
    }
}

// ============================================================================
// Image configuration
// ============================================================================

/// Declarative description of the image contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ImageConfiguration {
    /// Source repository URL recorded in SBOMs
    pub vcs_url: Option<String>,
    pub entrypoint: Entrypoint,
    /// Default arguments
    pub cmd: Option<String>,
    pub work_dir: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub accounts: Accounts,
    pub paths: Vec<PathMutation>,
    /// Values for a generated `/etc/os-release`
    pub os_release: OsReleaseConfig,
    /// Annotations copied onto manifests and the index
    pub annotations: BTreeMap<String, String>,
}

/// Entrypoint and supervised services.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Entrypoint {
    /// Command line, split on whitespace
    pub command: Option<String>,
    /// Service name to command line; each becomes a supervised service
    pub services: BTreeMap<String, String>,
}

/// Users and groups added to the image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Accounts {
    pub users: Vec<User>,
    pub groups: Vec<Group>,
    /// User the image runs as
    pub run_as: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct User {
    pub username: String,
    pub uid: u32,
    /// Primary group, defaults to the uid
    #[serde(default)]
    pub gid: Option<u32>,
    #[serde(default)]
    pub shell: Option<String>,
    /// Home directory, defaults to `/home/<username>`
    #[serde(default)]
    pub home_dir: Option<String>,
}

impl User {
    #[must_use]
    pub fn primary_gid(&self) -> u32 {
        self.gid.unwrap_or(self.uid)
    }

    #[must_use]
    pub fn home(&self) -> String {
        self.home_dir
            .clone()
            .unwrap_or_else(|| format!("/home/{}", self.username))
    }

    #[must_use]
    pub fn login_shell(&self) -> &str {
        self.shell.as_deref().unwrap_or(defaults::DEFAULT_SHELL)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Group {
    pub groupname: String,
    pub gid: u32,
    #[serde(default)]
    pub members: Vec<String>,
}

/// Kind of path directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum PathKind {
    Directory,
    EmptyFile,
    Hardlink,
    Symlink,
    Permissions,
}

impl std::fmt::Display for PathKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Directory => write!(f, "directory"),
            Self::EmptyFile => write!(f, "empty-file"),
            Self::Hardlink => write!(f, "hardlink"),
            Self::Symlink => write!(f, "symlink"),
            Self::Permissions => write!(f, "permissions"),
        }
    }
}

/// One path directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PathMutation {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: PathKind,
    #[serde(default)]
    pub uid: u32,
    #[serde(default)]
    pub gid: u32,
    /// Permission bits, e.g. `0o755`
    #[serde(default = "defaults::default_path_permissions")]
    pub permissions: u32,
    /// Link target for `hardlink` and `symlink`
    #[serde(default)]
    pub source: Option<String>,
    /// Apply ownership to every descendant as well
    #[serde(default)]
    pub recursive: bool,
}

/// Overrides for a generated `/etc/os-release`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct OsReleaseConfig {
    pub id: Option<String>,
    pub name: Option<String>,
    pub pretty_name: Option<String>,
    pub version_id: Option<String>,
    pub home_url: Option<String>,
    pub bug_report_url: Option<String>,
}

impl ImageConfiguration {
    /// Entrypoint split into argv
    #[must_use]
    pub fn entrypoint_argv(&self) -> Option<Vec<String>> {
        self.entrypoint
            .command
            .as_deref()
            .map(|c| c.split_whitespace().map(str::to_string).collect())
    }

    /// Cmd split into argv
    #[must_use]
    pub fn cmd_argv(&self) -> Option<Vec<String>> {
        self.cmd
            .as_deref()
            .map(|c| c.split_whitespace().map(str::to_string).collect())
    }

    /// Environment in `KEY=value` form, ordered by key
    #[must_use]
    pub fn env_list(&self) -> Vec<String> {
        self.environment
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect()
    }
}
