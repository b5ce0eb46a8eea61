//! Shared utilities.

mod hash;
mod time;
mod version;

pub use hash::{sha256_file, sha256_reader};
pub use time::rfc3339;
pub use version::{upstream_version, version_stems};
