//! Default values for build configuration.

use crate::model::{Architecture, SbomFormat};

/// Default output directory
pub const DEFAULT_OUTPUT_DIR: &str = ".";

/// Architecture built when none is configured
pub const DEFAULT_ARCH: Architecture = Architecture::X86_64;

/// Permission bits for path directives that give none
pub const DEFAULT_PATH_PERMISSIONS: u32 = 0o755;

/// Login shell for configured users
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Name of a generated os-release when the configuration gives none
pub const DEFAULT_OS_NAME: &str = "imgforge-generated image";

/// Placeholder for unknown os-release values
pub const UNKNOWN: &str = "unknown";

/// Environment variable overriding the configured build epoch
pub const SOURCE_DATE_EPOCH_ENV: &str = "SOURCE_DATE_EPOCH";

pub(crate) fn default_sbom_formats() -> Vec<SbomFormat> {
    vec![SbomFormat::Spdx]
}

pub(crate) const fn default_path_permissions() -> u32 {
    DEFAULT_PATH_PERMISSIONS
}
