//! Locating and reading `imgforge.yaml`.
//!
//! A config file is looked up next to the build (the working directory),
//! then at the root of the enclosing git checkout, then in the per-user
//! config directory. The first directory holding one of
//! [`CONFIG_FILE_NAMES`] wins.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::types::ImgforgeConfig;

/// Recognized config file names, in preference order.
pub const CONFIG_FILE_NAMES: [&str; 3] = ["imgforge.yaml", "imgforge.yml", ".imgforge.yaml"];

/// Failure to read a config file.
#[derive(Error, Debug)]
pub enum ConfigFileError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parsing {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Directories searched for a config file when starting from `start`.
fn search_dirs(start: &Path) -> Vec<PathBuf> {
    let mut dirs = vec![start.to_path_buf()];
    if let Some(checkout) = start.ancestors().find(|dir| dir.join(".git").exists()) {
        if checkout != start {
            dirs.push(checkout.to_path_buf());
        }
    }
    if let Some(user) = dirs::config_dir() {
        dirs.push(user.join("imgforge"));
    }
    dirs
}

fn config_in(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

/// Find the config file to use. An existing explicit path always wins.
#[must_use]
pub fn discover_config_file(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path.filter(|p| p.exists()) {
        return Some(path.to_path_buf());
    }
    let cwd = std::env::current_dir().ok()?;
    search_dirs(&cwd).iter().find_map(|dir| config_in(dir))
}

/// Read an [`ImgforgeConfig`] from a YAML file.
pub fn load_config_file(path: &Path) -> Result<ImgforgeConfig, ConfigFileError> {
    let content = std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            ConfigFileError::NotFound(path.to_path_buf())
        } else {
            ConfigFileError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    serde_yaml::from_str(&content).map_err(|source| ConfigFileError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load the explicit or discovered config, falling back to defaults.
///
/// Returns the path the config came from. An explicit path that cannot be
/// loaded is an error. A discovered file that cannot be loaded is skipped
/// with a warning.
pub fn load_or_default(
    explicit_path: Option<&Path>,
) -> Result<(ImgforgeConfig, Option<PathBuf>), ConfigFileError> {
    if let Some(path) = explicit_path {
        return load_config_file(path).map(|config| (config, Some(path.to_path_buf())));
    }
    let Some(path) = discover_config_file(None) else {
        return Ok((ImgforgeConfig::default(), None));
    };
    match load_config_file(&path) {
        Ok(config) => Ok((config, Some(path))),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unreadable config file");
            Ok((ImgforgeConfig::default(), None))
        }
    }
}

/// The defaults rendered as a commented `imgforge.yaml`.
#[must_use]
pub fn generate_example_config() -> String {
    let body = serde_yaml::to_string(&ImgforgeConfig::default()).unwrap_or_default();
    format!(
        "# imgforge configuration\n\
         # Place this file at imgforge.yaml in your project root or ~/.config/imgforge/\n\n\
         {body}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SbomFormat;
    use tempfile::TempDir;

    #[test]
    fn test_config_in_prefers_first_name() {
        let tmp = TempDir::new().expect("tempdir");
        std::fs::write(tmp.path().join(".imgforge.yaml"), "{}\n").expect("write");
        std::fs::write(tmp.path().join("imgforge.yaml"), "{}\n").expect("write");
        assert_eq!(config_in(tmp.path()), Some(tmp.path().join("imgforge.yaml")));

        let empty = TempDir::new().expect("tempdir");
        assert_eq!(config_in(empty.path()), None);
    }

    #[test]
    fn test_search_dirs_include_checkout_root() {
        let tmp = TempDir::new().expect("tempdir");
        std::fs::create_dir_all(tmp.path().join(".git")).expect("git dir");
        let nested = tmp.path().join("images/base");
        std::fs::create_dir_all(&nested).expect("nested");

        let dirs = search_dirs(&nested);
        assert_eq!(dirs[0], nested);
        assert_eq!(dirs[1], tmp.path());

        // Starting at the checkout root does not list it twice
        let dirs = search_dirs(tmp.path());
        assert_eq!(dirs.iter().filter(|d| *d == tmp.path()).count(), 1);
    }

    #[test]
    fn test_load_config_file() {
        let tmp = TempDir::new().expect("tempdir");
        let config_path = tmp.path().join("config.yaml");
        std::fs::write(
            &config_path,
            "build:\n  sbom_formats: [cyclonedx]\n  source_date_epoch: 1700000000\n",
        )
        .expect("write");

        let config = load_config_file(&config_path).expect("load config file");
        assert_eq!(config.build.sbom_formats, [SbomFormat::Cyclonedx]);
        assert_eq!(config.build.source_date_epoch, Some(1_700_000_000));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config_file(Path::new("/nonexistent/imgforge.yaml"));
        assert!(matches!(result, Err(ConfigFileError::NotFound(_))));
    }

    #[test]
    fn test_load_config_file_parse_error_names_file() {
        let tmp = TempDir::new().expect("tempdir");
        let config_path = tmp.path().join("bad.yaml");
        std::fs::write(&config_path, "build: [not, a, map]\n").expect("write");

        let err = load_config_file(&config_path).expect_err("parse");
        assert!(matches!(err, ConfigFileError::Parse { .. }));
        assert!(err.to_string().contains("bad.yaml"));
    }

    #[test]
    fn test_explicit_missing_path_is_error() {
        assert!(load_or_default(Some(Path::new("/nonexistent/imgforge.yaml"))).is_err());
    }

    #[test]
    fn test_example_config_parses() {
        let example = generate_example_config();
        assert!(example.contains("build:"));
        let parsed: ImgforgeConfig = serde_yaml::from_str(&example).expect("example parses");
        assert_eq!(parsed, ImgforgeConfig::default());
    }
}
