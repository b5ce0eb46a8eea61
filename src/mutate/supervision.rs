//! Process supervision trees.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{ImgforgeError, MutationErrorKind, Result};
use crate::tree::WorkTree;

/// Emits the on-disk layout a process supervisor reads its services from.
pub trait SupervisionWriter: Send + Sync {
    /// Write one service definition per entry of `services` (name to
    /// command line).
    fn write_tree(&self, tree: &mut WorkTree, services: &BTreeMap<String, String>) -> Result<()>;
}

/// Writes s6 service directories: `sv/<name>/run` as an execline script.
#[derive(Debug, Clone, Copy, Default)]
pub struct S6Writer;

impl S6Writer {
    /// Directory holding service definitions
    pub const SERVICE_DIR: &'static str = "sv";
}

impl SupervisionWriter for S6Writer {
    fn write_tree(&self, tree: &mut WorkTree, services: &BTreeMap<String, String>) -> Result<()> {
        for (name, command) in services {
            let path = format!("{}/{name}/run", Self::SERVICE_DIR);
            let script = format!("#!/bin/execlineb -P\n{command}\n");
            tree.write_file(&path, script.as_bytes(), 0o755).map_err(|e| {
                ImgforgeError::mutation(
                    format!("writing {path}"),
                    MutationErrorKind::Supervision(e.to_string()),
                )
            })?;
            debug!(service = %name, "service written");
        }
        Ok(())
    }
}
