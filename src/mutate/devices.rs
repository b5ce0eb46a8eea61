//! Character device nodes.

use tracing::debug;

use super::io_err;
use crate::error::Result;
use crate::tree::{DeviceNode, WorkTree};

/// Devices every image carries: path, major, minor.
pub const CHAR_DEVICES: [(&str, u32, u32); 5] = [
    ("dev/null", 1, 3),
    ("dev/zero", 1, 5),
    ("dev/random", 1, 8),
    ("dev/urandom", 1, 9),
    ("dev/console", 5, 1),
];

const DEVICE_MODE: u32 = 0o666;

/// Record the standard character devices that are not already present.
pub fn install_char_devices(tree: &mut WorkTree) -> Result<usize> {
    let mut created = 0;
    for (path, major, minor) in CHAR_DEVICES {
        if tree.exists(path) {
            continue;
        }
        tree.add_char_device(
            path,
            DeviceNode {
                major,
                minor,
                mode: DEVICE_MODE,
            },
        )
        .map_err(|e| io_err(format!("adding {path}"), e))?;
        created += 1;
    }
    debug!(created, "device nodes recorded");
    Ok(created)
}
