//! CLI command handlers.
//!
//! This module provides testable command handlers that are invoked by main.rs.
//! Each handler implements the business logic for a specific CLI subcommand.

mod build;
mod overrides;

pub use build::{run_build, run_layer, to_json, BuildSummary, ImageSummary};
pub use overrides::{resolve_rootfs, BuildOverrides};
