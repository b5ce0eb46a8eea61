//! Configuration for imgforge builds.
//!
//! This module provides:
//! - Type-safe build and image configuration structures
//! - Validation for all configuration values
//! - YAML config file loading and discovery
//! - JSON Schema export for editor support
//!
//! # Configuration File
//!
//! Place an `imgforge.yaml` file in your project root or `~/.config/imgforge/`:
//!
//! ```yaml
//! build:
//!   archs: [x86_64, aarch64]
//!   sbom_formats: [spdx, cyclonedx]
//!   tags: ["registry.local/app:1.0"]
//! image:
//!   entrypoint:
//!     command: /usr/bin/app
//!   accounts:
//!     run_as: app
//!     users:
//!       - username: app
//!         uid: 1000
//! ```

pub mod defaults;
pub mod file;
mod types;
mod validation;

pub use types::{
    Accounts, BuildOptions, BuildOptionsBuilder, Entrypoint, Group, ImageConfiguration,
    ImgforgeConfig, OsReleaseConfig, PathKind, PathMutation, User,
};
pub use validation::{ensure_valid, ConfigError, Validatable};

pub use file::{
    discover_config_file, generate_example_config, load_config_file, load_or_default,
    ConfigFileError,
};

/// Generate a JSON Schema for the `imgforge.yaml` format.
///
/// Editors can use it for validation and autocompletion.
#[must_use]
pub fn generate_json_schema() -> String {
    let schema = schemars::schema_for!(ImgforgeConfig);
    serde_json::to_string_pretty(&schema).expect("schema serialization should not fail")
}
