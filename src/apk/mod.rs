//! Package database access.
//!
//! The build never installs packages itself. A [`PackageManager`] reports
//! what an installer already put into the tree and finalizes the world
//! file; [`InstalledTree`] does that offline from the APK installed database.

mod installed;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{ImgforgeError, MutationErrorKind, Result};
use crate::model::InstalledPackage;
use crate::tree::WorkTree;

pub use installed::{parse_installed, render_installed, INSTALLED_DB_PATH, WORLD_PATH};

/// Read and parse the installed database of a tree.
pub fn read_installed_db(tree: &WorkTree) -> std::result::Result<Vec<InstalledPackage>, String> {
    let content = tree
        .read_to_string(INSTALLED_DB_PATH)
        .map_err(|e| format!("{INSTALLED_DB_PATH}: {e}"))?;
    parse_installed(&content).map_err(|e| format!("{INSTALLED_DB_PATH}: {e}"))
}

/// Access to the packages installed into a tree.
pub trait PackageManager: Send + Sync {
    /// Installed packages plus a description of every conflict found.
    fn resolve_world(&self, tree: &WorkTree) -> Result<(Vec<InstalledPackage>, Vec<String>)>;

    /// Finalize the world so later steps see a stable package set.
    fn fixate_world(&self, tree: &WorkTree, epoch: DateTime<Utc>) -> Result<()>;

    /// Packages recorded in the installed database.
    fn installed_packages(&self, tree: &WorkTree) -> Result<Vec<InstalledPackage>>;
}

/// A [`PackageManager`] for trees populated by an external installer.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstalledTree;

impl InstalledTree {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn package_error(context: impl Into<String>, message: String) -> ImgforgeError {
    ImgforgeError::mutation(context, MutationErrorKind::PackageManager(message))
}

impl PackageManager for InstalledTree {
    fn resolve_world(&self, tree: &WorkTree) -> Result<(Vec<InstalledPackage>, Vec<String>)> {
        let packages = self.installed_packages(tree)?;
        let mut conflicts = Vec::new();

        let mut names: BTreeMap<&str, usize> = BTreeMap::new();
        for pkg in &packages {
            *names.entry(pkg.name.as_str()).or_default() += 1;
        }
        for (name, count) in names.into_iter().filter(|(_, c)| *c > 1) {
            conflicts.push(format!("{name} is installed {count} times"));
        }

        let mut owners: BTreeMap<&str, &str> = BTreeMap::new();
        for pkg in &packages {
            for file in &pkg.files {
                if let Some(prev) = owners.insert(file.path.as_str(), pkg.name.as_str()) {
                    if prev != pkg.name {
                        conflicts.push(format!("{} is owned by {prev} and {}", file.path, pkg.name));
                    }
                }
            }
        }

        Ok((packages, conflicts))
    }

    fn fixate_world(&self, tree: &WorkTree, epoch: DateTime<Utc>) -> Result<()> {
        let world: BTreeSet<String> = if tree.exists(WORLD_PATH) {
            tree.read_to_string(WORLD_PATH)
                .map_err(|e| package_error(format!("reading {WORLD_PATH}"), e.to_string()))?
                .split_whitespace()
                .map(str::to_string)
                .collect()
        } else {
            self.installed_packages(tree)?
                .into_iter()
                .map(|p| p.name)
                .collect()
        };

        let mut content = world.iter().cloned().collect::<Vec<_>>().join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        tree.write_file(WORLD_PATH, content.as_bytes(), 0o644)
            .map_err(|e| package_error(format!("writing {WORLD_PATH}"), e.to_string()))?;
        info!(packages = world.len(), %epoch, "world fixated");
        Ok(())
    }

    fn installed_packages(&self, tree: &WorkTree) -> Result<Vec<InstalledPackage>> {
        let packages = read_installed_db(tree)
            .map_err(|e| package_error("reading installed packages", e))?;
        debug!(count = packages.len(), "installed packages loaded");
        Ok(packages)
    }
}
