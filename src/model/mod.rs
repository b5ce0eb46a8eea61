//! Core data types shared across the build pipeline.
//!
//! Everything here is plain data: digests, architectures, package records,
//! the OCI documents the image stage assembles, and the artifacts each stage
//! hands to the next.

mod arch;
mod artifact;
mod digest;
mod format;
mod oci;
mod package;
mod reference;
mod release;

pub use arch::*;
pub use artifact::*;
pub use digest::*;
pub use format::*;
pub use oci::*;
pub use package::*;
pub use reference::*;
pub use release::*;
