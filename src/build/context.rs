//! Per-architecture build state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info_span, Span};

use crate::apk::PackageManager;
use crate::config::{BuildOptions, ImageConfiguration};
use crate::error::Result;
use crate::model::{newest_build_date, Architecture};
use crate::mutate::SupervisionWriter;
use crate::tree::WorkTree;

/// Values that change while one architecture is built.
pub struct WorkState {
    pub tree: WorkTree,
    /// Configured tags plus any derived during mutation
    pub tags: Vec<String>,
    /// Build epoch every timestamp is pinned to
    pub epoch: DateTime<Utc>,
    pub package_manager: Arc<dyn PackageManager>,
    pub supervision: Arc<dyn SupervisionWriter>,
}

/// Everything one architecture's build needs. One per architecture per
/// build invocation; the shared configuration is immutable.
pub struct BuildContext {
    pub options: Arc<BuildOptions>,
    pub image: Arc<ImageConfiguration>,
    pub arch: Architecture,
    pub span: Span,
    pub state: WorkState,
}

/// The build epoch: the configured one, else the newest installed package
/// build time, else the Unix epoch.
pub fn resolve_epoch(
    options: &BuildOptions,
    tree: &WorkTree,
    package_manager: &dyn PackageManager,
) -> Result<DateTime<Utc>> {
    if let Some(epoch) = options.configured_epoch() {
        return Ok(epoch);
    }
    let packages = package_manager.installed_packages(tree)?;
    let epoch = newest_build_date(&packages).unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    debug!(%epoch, "build epoch derived from installed packages");
    Ok(epoch)
}

impl BuildContext {
    pub fn new(
        options: Arc<BuildOptions>,
        image: Arc<ImageConfiguration>,
        arch: Architecture,
        tree: WorkTree,
        package_manager: Arc<dyn PackageManager>,
        supervision: Arc<dyn SupervisionWriter>,
    ) -> Result<Self> {
        let span = info_span!("build", arch = %arch);
        let epoch = {
            let _enter = span.enter();
            resolve_epoch(&options, &tree, package_manager.as_ref())?
        };
        let tags = options.tags.clone();
        Ok(Self {
            options,
            image,
            arch,
            span,
            state: WorkState {
                tree,
                tags,
                epoch,
                package_manager,
                supervision,
            },
        })
    }

    /// The first configured or derived tag
    #[must_use]
    pub fn primary_tag(&self) -> Option<&str> {
        self.state.tags.first().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apk::{render_installed, InstalledTree, INSTALLED_DB_PATH};
    use crate::model::InstalledPackage;

    fn tree_with_build_times(dir: &std::path::Path, times: &[Option<i64>]) -> WorkTree {
        let tree = WorkTree::open(dir).expect("open");
        let packages: Vec<_> = times
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let mut pkg = InstalledPackage::new(format!("pkg{i}"), "1.0-r0");
                pkg.build_time = *t;
                pkg
            })
            .collect();
        tree.write_file(INSTALLED_DB_PATH, render_installed(&packages).as_bytes(), 0o644)
            .expect("db");
        tree
    }

    #[test]
    fn test_configured_epoch_wins() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tree = tree_with_build_times(dir.path(), &[Some(1_700_000_000)]);
        let options = BuildOptions::builder().source_date_epoch(42).build();
        let epoch = resolve_epoch(&options, &tree, &InstalledTree::new()).expect("resolve epoch");
        assert_eq!(epoch.timestamp(), 42);
    }

    #[test]
    fn test_newest_package_build_time() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tree = tree_with_build_times(dir.path(), &[Some(100), None, Some(300), Some(200)]);
        let epoch = resolve_epoch(&BuildOptions::default(), &tree, &InstalledTree::new()).expect("resolve epoch");
        assert_eq!(epoch.timestamp(), 300);
    }

    #[test]
    fn test_falls_back_to_unix_epoch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tree = tree_with_build_times(dir.path(), &[None]);
        let epoch = resolve_epoch(&BuildOptions::default(), &tree, &InstalledTree::new()).expect("resolve epoch");
        assert_eq!(epoch, DateTime::<Utc>::UNIX_EPOCH);
    }
}
