//! Symlinks for multi-call binaries and shared library sonames.

use std::fs;

use tracing::debug;

use super::io_err;
use crate::error::Result;
use crate::model::InstalledPackage;
use crate::tree::WorkTree;

const BUSYBOX_PATHS_DIR: &str = "etc/busybox-paths.d";
const BUSYBOX_BINARY: &str = "/bin/busybox";
const LIBRARY_DIRS: [&str; 2] = ["lib", "usr/lib"];

/// Link every applet busybox declares to `/bin/busybox`.
///
/// Applets are read from the files in `etc/busybox-paths.d`, one absolute
/// path per line. Paths that already exist are left alone. Returns the
/// number of links created.
pub fn install_busybox_links(tree: &WorkTree, packages: &[InstalledPackage]) -> Result<usize> {
    if !packages.iter().any(|p| p.name == "busybox") {
        return Ok(0);
    }
    let dir = tree
        .host_path(BUSYBOX_PATHS_DIR)
        .map_err(|e| io_err(BUSYBOX_PATHS_DIR, e))?;
    if !dir.is_dir() {
        debug!("busybox installed without an applet list");
        return Ok(0);
    }

    let mut lists: Vec<_> = fs::read_dir(&dir)
        .map_err(|e| io_err(format!("listing {BUSYBOX_PATHS_DIR}"), e))?
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| io_err(format!("listing {BUSYBOX_PATHS_DIR}"), e))?
        .into_iter()
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .map(|entry| format!("{BUSYBOX_PATHS_DIR}/{}", entry.file_name().to_string_lossy()))
        .collect();
    lists.sort();

    let mut created = 0;
    for list in lists {
        let content = tree
            .read_to_string(&list)
            .map_err(|e| io_err(format!("reading {list}"), e))?;
        for applet in content.lines().map(str::trim) {
            if !applet.starts_with('/') || tree.exists(applet) {
                continue;
            }
            tree.symlink(BUSYBOX_BINARY, applet)
                .map_err(|e| io_err(format!("linking {applet}"), e))?;
            created += 1;
        }
    }
    debug!(created, "busybox links installed");
    Ok(created)
}

/// `libfoo.so.1.2.3` → `libfoo.so.1`
fn soname_for(file_name: &str) -> Option<String> {
    if !file_name.starts_with("lib") {
        return None;
    }
    let (stem, version) = file_name.split_once(".so.")?;
    let major = version.split('.').next()?;
    if major.is_empty() || !major.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(format!("{stem}.so.{major}"))
}

/// Create missing `lib<name>.so.<major>` links next to versioned libraries
/// in `/lib` and `/usr/lib`. Returns the number of links created.
pub fn install_ldconfig_links(tree: &WorkTree) -> Result<usize> {
    let mut created = 0;
    for dir in LIBRARY_DIRS {
        let host = tree.host_path(dir).map_err(|e| io_err(dir, e))?;
        if !host.is_dir() {
            continue;
        }
        let mut names: Vec<String> = fs::read_dir(&host)
            .map_err(|e| io_err(format!("listing {dir}"), e))?
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();

        for name in names {
            let Some(soname) = soname_for(&name) else {
                continue;
            };
            let link = format!("{dir}/{soname}");
            if soname == name || tree.exists(&link) {
                continue;
            }
            tree.symlink(&name, &link)
                .map_err(|e| io_err(format!("linking {link}"), e))?;
            created += 1;
        }
    }
    debug!(created, "soname links installed");
    Ok(created)
}
