//! Filesystem mutations applied before a tree is packaged.
//!
//! The steps always run in [`MutationStep::ORDER`]. Each runs inside its own
//! tracing span, and the cancellation token is checked before every step.
//! A failing step aborts the pipeline with [`ImgforgeError::Step`].

mod accounts;
mod devices;
mod links;
mod paths;
mod release;
mod supervision;
mod tags;

use std::fmt;

use tracing::{info, info_span, warn};

use crate::build::BuildContext;
use crate::cancel::CancellationToken;
use crate::error::{ImgforgeError, MutationErrorKind, Result};

pub use accounts::apply_accounts;
pub use devices::{install_char_devices, CHAR_DEVICES};
pub use links::{install_busybox_links, install_ldconfig_links};
pub use paths::apply_paths;
pub use release::{generate_os_release, OsReleaseOutcome, OS_RELEASE_PATH};
pub use supervision::{S6Writer, SupervisionWriter};
pub use tags::additional_tags;

pub(crate) fn io_err(context: impl Into<String>, err: std::io::Error) -> ImgforgeError {
    ImgforgeError::mutation(context, MutationErrorKind::Io(err))
}

pub(crate) fn directive_err(message: String) -> ImgforgeError {
    ImgforgeError::mutation("applying path directive", MutationErrorKind::InvalidDirective(message))
}

/// One mutation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationStep {
    FixateWorld,
    AdditionalTags,
    Accounts,
    Paths,
    OsRelease,
    SupervisionTree,
    BusyboxLinks,
    LdconfigLinks,
    CharDevices,
}

impl MutationStep {
    /// The fixed execution order.
    pub const ORDER: [Self; 9] = [
        Self::FixateWorld,
        Self::AdditionalTags,
        Self::Accounts,
        Self::Paths,
        Self::OsRelease,
        Self::SupervisionTree,
        Self::BusyboxLinks,
        Self::LdconfigLinks,
        Self::CharDevices,
    ];

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::FixateWorld => "fixate-world",
            Self::AdditionalTags => "additional-tags",
            Self::Accounts => "accounts",
            Self::Paths => "paths",
            Self::OsRelease => "os-release",
            Self::SupervisionTree => "supervision-tree",
            Self::BusyboxLinks => "busybox-links",
            Self::LdconfigLinks => "ldconfig-links",
            Self::CharDevices => "char-devices",
        }
    }
}

impl fmt::Display for MutationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Run every step in order against the context's tree.
pub fn run_pipeline(ctx: &mut BuildContext, cancel: &CancellationToken) -> Result<()> {
    let arch_span = ctx.span.clone();
    let _arch = arch_span.enter();
    for step in MutationStep::ORDER {
        cancel.check(step)?;
        let span = info_span!("mutate", step = %step);
        let _enter = span.enter();
        run_step(step, ctx).map_err(|e| ImgforgeError::step(step, ctx.arch, e))?;
    }
    info!(tags = ctx.state.tags.len(), "tree mutated");
    Ok(())
}

/// Run a single step.
pub fn run_step(step: MutationStep, ctx: &mut BuildContext) -> Result<()> {
    let state = &mut ctx.state;
    match step {
        MutationStep::FixateWorld => state.package_manager.fixate_world(&state.tree, state.epoch),
        MutationStep::AdditionalTags => {
            let packages = state.package_manager.installed_packages(&state.tree)?;
            let derived = additional_tags(&ctx.options, &packages);
            state.tags.extend(derived);
            Ok(())
        }
        MutationStep::Accounts => apply_accounts(&mut state.tree, &ctx.image.accounts),
        MutationStep::Paths => apply_paths(&mut state.tree, &ctx.image.paths),
        MutationStep::OsRelease => match generate_os_release(&state.tree, &ctx.image)? {
            OsReleaseOutcome::Written => Ok(()),
            OsReleaseOutcome::AlreadyPresent => {
                warn!("{OS_RELEASE_PATH} already present, leaving it unchanged");
                Ok(())
            }
        },
        MutationStep::SupervisionTree => {
            let services = &ctx.image.entrypoint.services;
            if services.is_empty() {
                return Ok(());
            }
            let writer = state.supervision.clone();
            writer.write_tree(&mut state.tree, services)
        }
        MutationStep::BusyboxLinks => {
            let packages = state.package_manager.installed_packages(&state.tree)?;
            install_busybox_links(&state.tree, &packages).map(|_| ())
        }
        MutationStep::LdconfigLinks => install_ldconfig_links(&state.tree).map(|_| ()),
        MutationStep::CharDevices => install_char_devices(&mut state.tree).map(|_| ()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apk::{render_installed, InstalledTree, INSTALLED_DB_PATH};
    use crate::config::{BuildOptions, ImageConfiguration, PathKind, PathMutation};
    use crate::model::{Architecture, InstalledPackage};
    use crate::tree::WorkTree;
    use std::sync::Arc;

    #[test]
    fn test_order_is_fixed() {
        let names: Vec<_> = MutationStep::ORDER.iter().map(MutationStep::name).collect();
        assert_eq!(
            names,
            [
                "fixate-world",
                "additional-tags",
                "accounts",
                "paths",
                "os-release",
                "supervision-tree",
                "busybox-links",
                "ldconfig-links",
                "char-devices",
            ]
        );
    }

    fn context(root: &std::path::Path, image: ImageConfiguration) -> BuildContext {
        let tree = WorkTree::open(root).expect("open");
        let db = render_installed(&[InstalledPackage::new("musl", "1.2.5-r0")]);
        tree.write_file(INSTALLED_DB_PATH, db.as_bytes(), 0o644)
            .expect("db");
        BuildContext::new(
            Arc::new(BuildOptions::builder().source_date_epoch(0).build()),
            Arc::new(image),
            Architecture::X86_64,
            tree,
            Arc::new(InstalledTree::new()),
            Arc::new(S6Writer),
        )
        .expect("context")
    }

    #[test]
    fn test_pipeline_runs_every_step() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut ctx = context(dir.path(), ImageConfiguration::default());
        run_pipeline(&mut ctx, &CancellationToken::new()).expect("run pipeline");

        assert!(dir.path().join(OS_RELEASE_PATH).exists());
        assert!(dir.path().join("etc/apk/world").exists());
        assert!(ctx.state.tree.devices().contains_key("dev/null"));
    }

    #[test]
    fn test_cancelled_pipeline_touches_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut ctx = context(dir.path(), ImageConfiguration::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = run_pipeline(&mut ctx, &cancel).expect_err("pipeline");
        assert!(err.is_cancelled());
        assert!(!dir.path().join(OS_RELEASE_PATH).exists());
    }

    #[test]
    fn test_failure_names_step_and_arch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut image = ImageConfiguration::default();
        image.paths.push(PathMutation {
            path: "/missing".to_string(),
            kind: PathKind::Permissions,
            uid: 0,
            gid: 0,
            permissions: 0o644,
            source: None,
            recursive: false,
        });
        let mut ctx = context(dir.path(), image);

        let err = run_pipeline(&mut ctx, &CancellationToken::new()).expect_err("pipeline");
        match err {
            ImgforgeError::Step { step, arch, .. } => {
                assert_eq!(step, "paths");
                assert_eq!(arch, "x86_64");
            }
            other => panic!("expected step error, got {other}"),
        }
    }
}
