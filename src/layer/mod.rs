//! Layer construction.
//!
//! [`LayerBuilder`] walks a [`WorkTree`](crate::tree::WorkTree) and streams a
//! reproducible tar through a [`DigestWriter`], which computes the diffID
//! and the blob digest in the same pass.

mod digest_writer;
mod readback;
mod tarball;

use std::path::{Path, PathBuf};

use crate::model::Architecture;

pub use digest_writer::{DigestWriter, HashingWriter, StreamDigests, OUTPUT_BUFFER_SIZE};
pub use readback::{read_layer_files, LayerFile};
pub use tarball::{package_ownership, LayerBuilder};

/// Placeholder substituted with the architecture in configured layer paths.
pub const ARCH_PLACEHOLDER: &str = "{arch}";

/// Where the layer for `arch` is written.
///
/// A configured path has `{arch}` replaced; otherwise the layer lands at
/// `<output_dir>/imgforge-<arch>.tar.gz`.
#[must_use]
pub fn layer_path(configured: Option<&str>, output_dir: &Path, arch: &Architecture) -> PathBuf {
    match configured {
        Some(path) => PathBuf::from(path.replace(ARCH_PLACEHOLDER, arch.to_apk())),
        None => output_dir.join(format!("imgforge-{arch}.tar.gz")),
    }
}
