//! Path directives.

use tracing::debug;

use super::{directive_err, io_err};
use crate::config::{PathKind, PathMutation};
use crate::error::Result;
use crate::model::Ownership;
use crate::tree::WorkTree;

fn source_of(directive: &PathMutation) -> Result<&str> {
    directive
        .source
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            directive_err(format!(
                "{} at {} requires a source",
                directive.kind, directive.path
            ))
        })
}

fn apply_one(tree: &mut WorkTree, directive: &PathMutation) -> Result<()> {
    let path = directive.path.as_str();
    let mode = directive.permissions & 0o7777;
    let owner = Ownership::root(mode).with_ids(directive.uid, directive.gid);
    let ctx = || format!("{} {path}", directive.kind);

    match directive.kind {
        PathKind::Directory => {
            tree.create_dir_all(path, mode).map_err(|e| io_err(ctx(), e))?;
        }
        PathKind::EmptyFile => {
            tree.write_file(path, b"", mode).map_err(|e| io_err(ctx(), e))?;
        }
        PathKind::Hardlink => {
            let source = source_of(directive)?;
            if !tree.exists(source) {
                return Err(directive_err(format!(
                    "hardlink source {source} does not exist"
                )));
            }
            tree.hard_link(source, path).map_err(|e| io_err(ctx(), e))?;
        }
        PathKind::Symlink => {
            let source = source_of(directive)?;
            tree.symlink(source, path).map_err(|e| io_err(ctx(), e))?;
        }
        PathKind::Permissions => {
            if !tree.exists(path) {
                return Err(directive_err(format!(
                    "cannot set permissions on missing path {path}"
                )));
            }
            tree.chmod(path, mode).map_err(|e| io_err(ctx(), e))?;
        }
    }

    let recursive = directive.recursive
        && matches!(directive.kind, PathKind::Directory | PathKind::Permissions);
    let recorded = if recursive {
        tree.set_ownership_recursive(path, owner)
    } else {
        tree.set_ownership(path, owner)
    };
    recorded.map_err(|e| io_err(format!("recording ownership of {path}"), e))?;

    debug!(path, kind = %directive.kind, recursive, "path applied");
    Ok(())
}

/// Apply path directives in configuration order.
pub fn apply_paths(tree: &mut WorkTree, directives: &[PathMutation]) -> Result<()> {
    directives.iter().try_for_each(|d| apply_one(tree, d))
}
