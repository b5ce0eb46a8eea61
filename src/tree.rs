//! The working filesystem tree an image is assembled in.
//!
//! A [`WorkTree`] is a real directory plus an in-memory overlay. The overlay
//! records what an unprivileged process cannot put on disk: character device
//! nodes and explicit ownership. The layer writer merges both.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use crate::model::Ownership;

/// Mode of directories created on the way to a path.
pub const IMPLICIT_DIR_MODE: u32 = 0o755;

const MAX_SYMLINK_HOPS: usize = 40;

/// A character device recorded on the tree without a real `mknod`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceNode {
    pub major: u32,
    pub minor: u32,
    pub mode: u32,
}

/// A directory tree under construction.
#[derive(Debug, Clone)]
pub struct WorkTree {
    root: PathBuf,
    devices: BTreeMap<String, DeviceNode>,
    ownership: BTreeMap<String, Ownership>,
}

/// Normalize a tree path to its relative `a/b/c` form.
///
/// Leading `/` and `.` components are dropped. `..` is rejected so nothing
/// can escape the root.
pub fn normalize(path: &str) -> io::Result<String> {
    let mut parts = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("path escapes tree root: {path}"),
                ));
            }
        }
    }
    Ok(parts.join("/"))
}

impl WorkTree {
    /// Open an existing directory as a tree.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        if !fs::metadata(&root)?.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", root.display()),
            ));
        }
        Ok(Self {
            root,
            devices: BTreeMap::new(),
            ownership: BTreeMap::new(),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a tree path to its real location inside the root.
    ///
    /// Symlinks met along the way are followed as if the root were `/`:
    /// absolute targets restart at the root and `..` stops there. The last
    /// component is only followed when `follow_final` is set. Components
    /// that do not exist yet are kept as written.
    pub fn resolve(&self, path: &str, follow_final: bool) -> io::Result<String> {
        let mut pending: VecDeque<String> = normalize(path)?
            .split('/')
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect();
        let mut resolved: Vec<String> = Vec::new();
        let mut hops = 0;

        while let Some(part) = pending.pop_front() {
            if part == ".." {
                resolved.pop();
                continue;
            }
            let mut host = self.root.clone();
            host.extend(&resolved);
            host.push(&part);
            let is_link = fs::symlink_metadata(&host).is_ok_and(|m| m.file_type().is_symlink());
            if !is_link || (pending.is_empty() && !follow_final) {
                resolved.push(part);
                continue;
            }

            hops += 1;
            if hops > MAX_SYMLINK_HOPS {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("too many levels of symbolic links: {path}"),
                ));
            }
            let target = fs::read_link(&host)?;
            if target.has_root() {
                resolved.clear();
            }
            let parts: Vec<String> = target
                .components()
                .filter_map(|component| match component {
                    Component::Normal(p) => Some(p.to_string_lossy().into_owned()),
                    Component::ParentDir => Some("..".to_string()),
                    _ => None,
                })
                .collect();
            for part in parts.into_iter().rev() {
                pending.push_front(part);
            }
        }
        Ok(resolved.join("/"))
    }

    /// Host path of a tree path, following symlinks inside the root.
    pub fn host_path(&self, path: &str) -> io::Result<PathBuf> {
        Ok(self.root.join(self.resolve(path, true)?))
    }

    /// True if the path exists on disk (without following a final symlink)
    /// or as a virtual device.
    #[must_use]
    pub fn exists(&self, path: &str) -> bool {
        let Ok(rel) = self.resolve(path, false) else {
            return false;
        };
        self.devices.contains_key(&rel) || fs::symlink_metadata(self.root.join(&rel)).is_ok()
    }

    pub fn read_to_string(&self, path: &str) -> io::Result<String> {
        fs::read_to_string(self.host_path(path)?)
    }

    pub fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        fs::read(self.host_path(path)?)
    }

    /// Create every missing directory along a resolved path with mode
    /// `0o755`, whatever the process umask is.
    fn create_missing_dirs(&self, rel: &str) -> io::Result<()> {
        let mut host = self.root.clone();
        for part in rel.split('/').filter(|part| !part.is_empty()) {
            host.push(part);
            match fs::symlink_metadata(&host) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    match fs::create_dir(&host) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                        Err(e) => return Err(e),
                    }
                    fs::set_permissions(&host, fs::Permissions::from_mode(IMPLICIT_DIR_MODE))?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn create_parents(&self, rel: &str) -> io::Result<()> {
        match rel.rsplit_once('/') {
            Some((parent, _)) => self.create_missing_dirs(parent),
            None => Ok(()),
        }
    }

    /// Create a directory and any missing parents (parents get `0o755`).
    pub fn create_dir_all(&self, path: &str, mode: u32) -> io::Result<()> {
        let rel = self.resolve(path, true)?;
        self.create_missing_dirs(&rel)?;
        fs::set_permissions(self.root.join(rel), fs::Permissions::from_mode(mode & 0o7777))
    }

    /// Write a file, creating parent directories as needed.
    pub fn write_file(&self, path: &str, contents: &[u8], mode: u32) -> io::Result<()> {
        let rel = self.resolve(path, true)?;
        self.create_parents(&rel)?;
        let host = self.root.join(rel);
        fs::write(&host, contents)?;
        fs::set_permissions(&host, fs::Permissions::from_mode(mode & 0o7777))
    }

    /// Create a symlink at `link` pointing at `target` (stored verbatim).
    pub fn symlink(&self, target: &str, link: &str) -> io::Result<()> {
        let rel = self.resolve(link, false)?;
        self.create_parents(&rel)?;
        std::os::unix::fs::symlink(target, self.root.join(rel))
    }

    /// Create a hard link at `link` to the existing tree path `existing`.
    pub fn hard_link(&self, existing: &str, link: &str) -> io::Result<()> {
        let source = self.root.join(self.resolve(existing, false)?);
        let rel = self.resolve(link, false)?;
        self.create_parents(&rel)?;
        fs::hard_link(source, self.root.join(rel))
    }

    /// Change permission bits on disk.
    pub fn chmod(&self, path: &str, mode: u32) -> io::Result<()> {
        fs::set_permissions(
            self.host_path(path)?,
            fs::Permissions::from_mode(mode & 0o7777),
        )
    }

    /// Record explicit ownership for a path. Recorded ownership wins over
    /// anything the package database declares.
    pub fn set_ownership(&mut self, path: &str, ownership: Ownership) -> io::Result<()> {
        let rel = self.resolve(path, false)?;
        self.ownership.insert(rel, ownership);
        Ok(())
    }

    /// Record ownership for a path and everything below it. Each
    /// descendant keeps its own permission bits.
    pub fn set_ownership_recursive(&mut self, path: &str, ownership: Ownership) -> io::Result<()> {
        let rel = self.resolve(path, false)?;
        let host = self.root.join(&rel);
        self.ownership.insert(rel.clone(), ownership);
        if fs::symlink_metadata(&host)?.file_type().is_symlink() {
            return Ok(());
        }
        for entry in walkdir::WalkDir::new(&host).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from)?;
            let child = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?
                .to_string_lossy()
                .replace('\\', "/");
            let mode = entry.metadata().map_err(io::Error::from)?.permissions().mode() & 0o7777;
            self.ownership.insert(
                child,
                Ownership {
                    mode,
                    ..ownership
                },
            );
        }
        Ok(())
    }

    /// Record a character device node.
    pub fn add_char_device(&mut self, path: &str, node: DeviceNode) -> io::Result<()> {
        let rel = self.resolve(path, false)?;
        self.create_parents(&rel)?;
        self.devices.insert(rel, node);
        Ok(())
    }

    #[must_use]
    pub fn devices(&self) -> &BTreeMap<String, DeviceNode> {
        &self.devices
    }

    #[must_use]
    pub fn ownership_overrides(&self) -> &BTreeMap<String, Ownership> {
        &self.ownership
    }
}
