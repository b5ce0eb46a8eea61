//! Package version helpers.

/// Strip an APK package release suffix (`-r<N>`).
#[must_use]
pub fn upstream_version(version: &str) -> &str {
    match version.rsplit_once("-r") {
        Some((base, rel)) if !rel.is_empty() && rel.bytes().all(|b| b.is_ascii_digit()) => base,
        _ => version,
    }
}

/// Every version stem, longest first.
///
/// `1.2.3-r4` yields `1.2.3-r4`, `1.2.3`, `1.2`, `1`.
#[must_use]
pub fn version_stems(version: &str) -> Vec<String> {
    let mut stems = vec![version.to_string()];
    let mut current = upstream_version(version);
    if current != version {
        stems.push(current.to_string());
    }
    while let Some((head, _)) = current.rsplit_once('.') {
        if head.is_empty() {
            break;
        }
        stems.push(head.to_string());
        current = head;
    }
    stems
}
