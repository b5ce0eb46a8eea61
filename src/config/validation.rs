//! Configuration validation.
//!
//! Provides the validation trait and its implementations for every
//! configuration type.

use std::collections::BTreeSet;

use super::types::*;
use crate::error::{ImgforgeError, Result};
use crate::layer::ARCH_PLACEHOLDER;
use crate::model::TagReference;
use crate::tree::normalize;

// ============================================================================
// Configuration Error
// ============================================================================

/// Error type for configuration validation.
#[derive(Debug, Clone)]
pub struct ConfigError {
    /// The field that failed validation
    pub field: String,
    /// Description of the validation error
    pub message: String,
}

impl ConfigError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Validation Trait
// ============================================================================

/// Trait for validatable configuration types.
pub trait Validatable {
    /// Validate the configuration, returning any errors found.
    fn validate(&self) -> Vec<ConfigError>;

    /// Check if the configuration is valid.
    fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}

/// Fail with every validation problem joined into one config error.
pub fn ensure_valid(config: &impl Validatable) -> Result<()> {
    let errors = config.validate();
    if errors.is_empty() {
        return Ok(());
    }
    let joined = errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    Err(ImgforgeError::config(joined))
}

// ============================================================================
// Validation Implementations
// ============================================================================

impl Validatable for ImgforgeConfig {
    fn validate(&self) -> Vec<ConfigError> {
        let mut errors = self.build.validate();
        errors.extend(self.image.validate());
        errors
    }
}

impl Validatable for BuildOptions {
    fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.archs.is_empty() {
            errors.push(ConfigError::new(
                "build.archs",
                "at least one architecture is required",
            ));
        }

        if let Some(ref path) = self.tarball_path {
            if self.sorted_archs().len() > 1 && !path.contains(ARCH_PLACEHOLDER) {
                errors.push(ConfigError::new(
                    "build.tarball_path",
                    format!(
                        "'{path}' must contain {ARCH_PLACEHOLDER} when building several architectures"
                    ),
                ));
            }
        }

        let mut seen = BTreeSet::new();
        for format in &self.sbom_formats {
            if !seen.insert(format.to_string()) {
                errors.push(ConfigError::new(
                    "build.sbom_formats",
                    format!("format '{format}' is listed more than once"),
                ));
            }
        }

        if let Some(epoch) = self.source_date_epoch {
            if epoch < 0 {
                errors.push(ConfigError::new(
                    "build.source_date_epoch",
                    format!("must not be negative, got {epoch}"),
                ));
            }
        }

        for (i, tag) in self.tags.iter().enumerate() {
            if let Err(e) = TagReference::parse(tag) {
                errors.push(ConfigError::new(format!("build.tags[{i}]"), e));
            }
        }

        errors
    }
}

impl Validatable for ImageConfiguration {
    fn validate(&self) -> Vec<ConfigError> {
        let mut errors = self.accounts.validate();

        for (i, p) in self.paths.iter().enumerate() {
            errors.extend(p.validate().into_iter().map(|mut e| {
                e.field = format!("image.paths[{i}].{}", e.field);
                e
            }));
        }

        for name in self.entrypoint.services.keys() {
            if name.is_empty() || name.contains('/') || name.starts_with('.') {
                errors.push(ConfigError::new(
                    "image.entrypoint.services",
                    format!("invalid service name '{name}'"),
                ));
            }
        }

        errors
    }
}

impl Validatable for Accounts {
    fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        let mut names = BTreeSet::new();
        for user in &self.users {
            if user.username.is_empty() || user.username.contains(':') {
                errors.push(ConfigError::new(
                    "image.accounts.users",
                    format!("invalid username '{}'", user.username),
                ));
            }
            if !names.insert(user.username.as_str()) {
                errors.push(ConfigError::new(
                    "image.accounts.users",
                    format!("duplicate user '{}'", user.username),
                ));
            }
        }

        let mut groups = BTreeSet::new();
        for group in &self.groups {
            if group.groupname.is_empty() || group.groupname.contains(':') {
                errors.push(ConfigError::new(
                    "image.accounts.groups",
                    format!("invalid group name '{}'", group.groupname),
                ));
            }
            if !groups.insert(group.groupname.as_str()) {
                errors.push(ConfigError::new(
                    "image.accounts.groups",
                    format!("duplicate group '{}'", group.groupname),
                ));
            }
        }

        errors
    }
}

impl Validatable for PathMutation {
    fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        match normalize(&self.path) {
            Ok(rel) if rel.is_empty() => {
                errors.push(ConfigError::new("path", "must not be the tree root"));
            }
            Ok(_) => {}
            Err(e) => errors.push(ConfigError::new("path", e.to_string())),
        }

        if self.permissions > 0o7777 {
            errors.push(ConfigError::new(
                "permissions",
                format!("{:o} is not a permission mask", self.permissions),
            ));
        }

        let needs_source = matches!(self.kind, PathKind::Hardlink | PathKind::Symlink);
        if needs_source && self.source.as_deref().map_or(true, str::is_empty) {
            errors.push(ConfigError::new(
                "source",
                format!("{} requires a source", self.kind),
            ));
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Architecture, SbomFormat};

    fn path(kind: PathKind) -> PathMutation {
        PathMutation {
            path: "/srv".to_string(),
            kind,
            uid: 0,
            gid: 0,
            permissions: 0o755,
            source: None,
            recursive: false,
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(ImgforgeConfig::default().is_valid());
    }

    #[test]
    fn test_multi_arch_tarball_needs_placeholder() {
        let opts = BuildOptions::builder()
            .archs(vec![Architecture::X86_64, Architecture::Aarch64])
            .tarball_path("/out/layer.tar.gz")
            .build();
        let errors = opts.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "build.tarball_path");

        let ok = BuildOptions::builder()
            .archs(vec![Architecture::X86_64, Architecture::Aarch64])
            .tarball_path("/out/layer-{arch}.tar.gz")
            .build();
        assert!(ok.is_valid());
    }

    #[test]
    fn test_duplicate_formats_and_bad_tags() {
        let opts = BuildOptions::builder()
            .sbom_formats(vec![SbomFormat::Spdx, SbomFormat::Spdx])
            .tag("Not A Tag")
            .build();
        let fields: Vec<_> = opts.validate().into_iter().map(|e| e.field).collect();
        assert_eq!(fields, ["build.sbom_formats", "build.tags[0]"]);
    }

    #[test]
    fn test_negative_epoch() {
        let opts = BuildOptions::builder().source_date_epoch(-1).build();
        assert!(!opts.is_valid());
    }

    #[test]
    fn test_path_mutation_validation() {
        assert!(path(PathKind::Directory).is_valid());
        assert!(!path(PathKind::Symlink).is_valid());

        let mut escape = path(PathKind::Directory);
        escape.path = "../outside".to_string();
        assert!(!escape.is_valid());

        let mut wide = path(PathKind::Permissions);
        wide.permissions = 0o17777;
        assert!(!wide.is_valid());
    }

    #[test]
    fn test_duplicate_users() {
        let user = User {
            username: "app".to_string(),
            uid: 1000,
            gid: None,
            shell: None,
            home_dir: None,
        };
        let accounts = Accounts {
            users: vec![user.clone(), user],
            ..Accounts::default()
        };
        assert_eq!(accounts.validate().len(), 1);
    }

    #[test]
    fn test_ensure_valid_joins_errors() {
        let opts = BuildOptions::builder()
            .archs(vec![])
            .source_date_epoch(-5)
            .build();
        let err = ensure_valid(&opts).expect_err("invalid");
        let msg = err.to_string();
        assert!(msg.contains("build.archs"), "{msg}");
        assert!(msg.contains("build.source_date_epoch"), "{msg}");
    }
}
