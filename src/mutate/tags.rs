//! Version tags derived from installed packages.

use tracing::{debug, warn};

use crate::config::BuildOptions;
use crate::model::{InstalledPackage, TagReference};
use crate::utils::version_stems;

/// Tags to append for the configured package-version settings.
///
/// For every configured `repo:tag`, a `repo:<prefix><version><suffix>` tag is
/// derived, and with stems enabled one per version stem. `+` is not valid
/// in a tag and becomes `_`. A configured package that is not installed
/// yields no tags.
#[must_use]
pub fn additional_tags(options: &BuildOptions, packages: &[InstalledPackage]) -> Vec<String> {
    let Some(ref wanted) = options.package_version_tag else {
        return Vec::new();
    };
    let Some(pkg) = packages.iter().find(|p| &p.name == wanted) else {
        warn!(package = %wanted, "package for version tag is not installed");
        return Vec::new();
    };

    let versions = if options.package_version_tag_stem {
        version_stems(&pkg.version)
    } else {
        vec![pkg.version.clone()]
    };

    let mut derived = Vec::new();
    for tag in &options.tags {
        let reference = match TagReference::parse(tag) {
            Ok(r) => r,
            Err(e) => {
                warn!(tag = %tag, error = %e, "skipping unparseable tag");
                continue;
            }
        };
        for version in &versions {
            let value = format!(
                "{}{}{}",
                options.package_version_tag_prefix,
                version.replace('+', "_"),
                options.tag_suffix
            );
            let new_tag = reference.with_tag(value).to_string();
            if !options.tags.contains(&new_tag) && !derived.contains(&new_tag) {
                debug!(tag = %new_tag, "derived version tag");
                derived.push(new_tag);
            }
        }
    }
    derived
}
