//! Deterministic layer archives.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, Metadata};
use std::io::{self, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tar::{EntryType, Header};
use tracing::{debug, info};

use super::digest_writer::DigestWriter;
use crate::cancel::CancellationToken;
use crate::error::{ImgforgeError, LayerErrorKind, Result};
use crate::model::{InstalledPackage, LayerArtifact, Ownership};
use crate::tree::{normalize, DeviceNode, WorkTree};

#[derive(Debug, Clone, PartialEq, Eq)]
enum EntryKind {
    Directory,
    Regular { size: u64 },
    Symlink(PathBuf),
    HardLink(String),
    CharDevice(DeviceNode),
}

#[derive(Debug, Clone)]
struct Entry {
    path: String,
    kind: EntryKind,
    /// Permission bits as found on disk (or on the virtual node)
    mode: u32,
}

/// Per-path ownership declared by the installed package database.
#[must_use]
pub fn package_ownership(packages: &[InstalledPackage]) -> BTreeMap<String, Ownership> {
    let mut owned = BTreeMap::new();
    for pkg in packages {
        let dirs = pkg.dirs.iter().map(|d| (&d.path, d.ownership));
        let files = pkg.files.iter().map(|f| (&f.path, f.ownership));
        for (path, ownership) in dirs.chain(files) {
            if let (Some(ownership), Ok(rel)) = (ownership, normalize(path)) {
                owned.insert(rel, ownership);
            }
        }
    }
    owned
}

/// Serializes a [`WorkTree`] into a reproducible gzip-compressed tar.
///
/// Entries are sorted by path so parents precede children. Every header
/// carries the build epoch as mtime and empty user/group names. Ownership is
/// `0:0` plus the on-disk mode, then whatever the package database declares,
/// then whatever was recorded on the tree.
pub struct LayerBuilder<'a> {
    tree: &'a WorkTree,
    package_ownership: BTreeMap<String, Ownership>,
    epoch: DateTime<Utc>,
    cancel: CancellationToken,
}

impl<'a> LayerBuilder<'a> {
    pub fn new(tree: &'a WorkTree, epoch: DateTime<Utc>) -> Self {
        Self {
            tree,
            package_ownership: BTreeMap::new(),
            epoch,
            cancel: CancellationToken::new(),
        }
    }

    /// Apply ownership from installed package records
    #[must_use]
    pub fn with_packages(mut self, packages: &[InstalledPackage]) -> Self {
        self.package_ownership = package_ownership(packages);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Build the layer at `out_path`.
    ///
    /// Output goes to a temporary file beside `out_path` that is renamed into
    /// place only once every byte is flushed, so a failed or cancelled build
    /// never leaves a partial file at `out_path`.
    pub fn build(&self, out_path: &Path) -> Result<LayerArtifact> {
        let dir = match out_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| {
            ImgforgeError::layer(
                format!("creating {}", dir.display()),
                LayerErrorKind::OpenSink(e),
            )
        })?;
        let tmp = tempfile::Builder::new()
            .prefix(".imgforge-layer-")
            .tempfile_in(&dir)
            .map_err(|e| {
                ImgforgeError::layer(
                    format!("creating temporary file in {}", dir.display()),
                    LayerErrorKind::OpenSink(e),
                )
            })?;
        let file = tmp.as_file().try_clone().map_err(|e| {
            ImgforgeError::layer("duplicating output handle", LayerErrorKind::OpenSink(e))
        })?;

        let writer = self.write_archive(DigestWriter::new(file))?;
        let digests = writer.finish()?;

        tmp.persist(out_path).map_err(|e| {
            ImgforgeError::layer(
                format!("persisting {}", out_path.display()),
                LayerErrorKind::Persist(e.error),
            )
        })?;

        info!(
            path = %out_path.display(),
            digest = %digests.digest,
            diff_id = %digests.diff_id,
            size = digests.size,
            "layer written"
        );

        Ok(LayerArtifact {
            path: out_path.to_path_buf(),
            diff_id: digests.diff_id,
            digest: digests.digest,
            size: digests.size,
        })
    }

    /// Write the uncompressed tar stream to `writer` and hand it back.
    pub fn write_archive<W: Write>(&self, writer: W) -> Result<W> {
        let entries = self.collect_entries()?;
        debug!(entries = entries.len(), "archiving tree");

        let mut builder = tar::Builder::new(writer);
        for entry in &entries {
            self.cancel.check(format_args!("archiving {}", entry.path))?;
            self.append(&mut builder, entry).map_err(|e| {
                ImgforgeError::layer(
                    format!("writing {}", entry.path),
                    LayerErrorKind::Serialize(e),
                )
            })?;
        }
        builder.into_inner().map_err(|e| {
            ImgforgeError::layer("writing archive trailer", LayerErrorKind::Serialize(e))
        })
    }

    fn collect_entries(&self) -> Result<Vec<Entry>> {
        let root = self.tree.root();
        let devices = self.tree.devices();
        let mut found: Vec<(String, Metadata)> = Vec::new();

        for item in walkdir::WalkDir::new(root).follow_links(false).min_depth(1) {
            let item =
                item.map_err(|e| ImgforgeError::layer("walking tree", LayerErrorKind::Walk(e.to_string())))?;
            let rel = item
                .path()
                .strip_prefix(root)
                .map_err(|e| ImgforgeError::layer("walking tree", LayerErrorKind::Walk(e.to_string())))?
                .to_string_lossy()
                .replace('\\', "/");
            if devices.contains_key(&rel) {
                continue;
            }
            let meta = fs::symlink_metadata(item.path()).map_err(|e| {
                ImgforgeError::layer(format!("stat {rel}"), LayerErrorKind::Walk(e.to_string()))
            })?;
            found.push((rel, meta));
        }
        found.sort_by(|a, b| Path::new(&a.0).cmp(Path::new(&b.0)));

        let mut entries = Vec::with_capacity(found.len() + devices.len());
        let mut first_link: HashMap<(u64, u64), String> = HashMap::new();
        for (rel, meta) in found {
            let mode = meta.permissions().mode() & 0o7777;
            let ft = meta.file_type();
            let kind = if ft.is_dir() {
                EntryKind::Directory
            } else if ft.is_symlink() {
                let target = fs::read_link(root.join(&rel)).map_err(|e| {
                    ImgforgeError::layer(
                        format!("reading link {rel}"),
                        LayerErrorKind::Walk(e.to_string()),
                    )
                })?;
                EntryKind::Symlink(target)
            } else if ft.is_file() {
                if meta.nlink() > 1 {
                    let key = (meta.dev(), meta.ino());
                    if let Some(first) = first_link.get(&key) {
                        entries.push(Entry {
                            path: rel,
                            kind: EntryKind::HardLink(first.clone()),
                            mode,
                        });
                        continue;
                    }
                    first_link.insert(key, rel.clone());
                }
                EntryKind::Regular { size: meta.len() }
            } else {
                debug!(path = %rel, "skipping special file");
                continue;
            };
            entries.push(Entry {
                path: rel,
                kind,
                mode,
            });
        }

        for (path, node) in devices {
            entries.push(Entry {
                path: path.clone(),
                kind: EntryKind::CharDevice(*node),
                mode: node.mode & 0o7777,
            });
        }
        entries.sort_by(|a, b| Path::new(&a.path).cmp(Path::new(&b.path)));
        Ok(entries)
    }

    fn ownership_for(&self, entry: &Entry) -> Ownership {
        let mut owner = Ownership::root(entry.mode);
        if let Some(db) = self.package_ownership.get(&entry.path) {
            owner = *db;
        }
        if let Some(explicit) = self.tree.ownership_overrides().get(&entry.path) {
            owner = *explicit;
        }
        owner
    }

    fn append<W: Write>(&self, builder: &mut tar::Builder<W>, entry: &Entry) -> io::Result<()> {
        let owner = self.ownership_for(entry);
        let mut header = Header::new_gnu();
        header.set_mtime(u64::try_from(self.epoch.timestamp()).unwrap_or(0));
        header.set_uid(u64::from(owner.uid));
        header.set_gid(u64::from(owner.gid));
        header.set_username("")?;
        header.set_groupname("")?;
        header.set_mode(owner.mode & 0o7777);
        header.set_size(0);

        match &entry.kind {
            EntryKind::Directory => {
                header.set_entry_type(EntryType::Directory);
                builder.append_data(&mut header, format!("{}/", entry.path), io::empty())
            }
            EntryKind::Regular { size } => {
                header.set_entry_type(EntryType::Regular);
                header.set_size(*size);
                let file = File::open(self.tree.root().join(&entry.path))?;
                builder.append_data(&mut header, &entry.path, file)
            }
            EntryKind::Symlink(target) => {
                header.set_entry_type(EntryType::Symlink);
                header.set_mode(0o777);
                builder.append_link(&mut header, &entry.path, target)
            }
            EntryKind::HardLink(target) => {
                header.set_entry_type(EntryType::Link);
                builder.append_link(&mut header, &entry.path, target)
            }
            EntryKind::CharDevice(node) => {
                header.set_entry_type(EntryType::Char);
                header.set_device_major(node.major)?;
                header.set_device_minor(node.minor)?;
                builder.append_data(&mut header, &entry.path, io::empty())
            }
        }
    }
}
