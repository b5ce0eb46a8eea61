//! `/etc/os-release` generation.

use tracing::debug;

use super::io_err;
use crate::config::defaults::{DEFAULT_OS_NAME, UNKNOWN};
use crate::config::ImageConfiguration;
use crate::error::Result;
use crate::model::OsRelease;
use crate::tree::WorkTree;

/// Location of the release file inside a tree.
pub const OS_RELEASE_PATH: &str = "etc/os-release";

/// What [`generate_os_release`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsReleaseOutcome {
    Written,
    /// A release file (or a link to one) already existed and was left alone
    AlreadyPresent,
}

/// Write `/etc/os-release` from the image configuration unless the tree
/// already has one.
pub fn generate_os_release(
    tree: &WorkTree,
    image: &ImageConfiguration,
) -> Result<OsReleaseOutcome> {
    if tree.exists(OS_RELEASE_PATH) {
        return Ok(OsReleaseOutcome::AlreadyPresent);
    }

    let cfg = &image.os_release;
    let mut pairs = vec![
        ("ID", cfg.id.clone().unwrap_or_else(|| UNKNOWN.to_string())),
        (
            "NAME",
            cfg.name.clone().unwrap_or_else(|| DEFAULT_OS_NAME.to_string()),
        ),
    ];
    if let Some(ref pretty) = cfg.pretty_name {
        pairs.push(("PRETTY_NAME", pretty.clone()));
    }
    pairs.push((
        "VERSION_ID",
        cfg.version_id.clone().unwrap_or_else(|| UNKNOWN.to_string()),
    ));
    if let Some(ref url) = cfg.home_url {
        pairs.push(("HOME_URL", url.clone()));
    }
    if let Some(ref url) = cfg.bug_report_url {
        pairs.push(("BUG_REPORT_URL", url.clone()));
    }

    let release = OsRelease::from_pairs(pairs);
    tree.write_file(OS_RELEASE_PATH, release.render().as_bytes(), 0o644)
        .map_err(|e| io_err(format!("writing {OS_RELEASE_PATH}"), e))?;
    debug!(id = release.id(), "os-release written");
    Ok(OsReleaseOutcome::Written)
}
