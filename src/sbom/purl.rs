//! Package URL formatting.
//!
//! Only the two purl types the documents need are produced: `pkg:apk` for
//! installed packages and `pkg:oci` for images.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::model::{Architecture, Digest, InstalledPackage, OsRelease};

/// Percent-encode everything outside the purl unreserved set.
fn encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char);
            }
            _ => {
                let _ = write!(out, "%{byte:02X}");
            }
        }
    }
    out
}

/// A package URL under construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Purl {
    kind: &'static str,
    namespace: Option<String>,
    name: String,
    version: Option<String>,
    qualifiers: BTreeMap<&'static str, String>,
}

impl Purl {
    #[must_use]
    pub fn new(kind: &'static str, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: None,
            name: name.into(),
            version: None,
            qualifiers: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Add a qualifier. Empty values are dropped.
    #[must_use]
    pub fn qualifier(mut self, key: &'static str, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.qualifiers.insert(key, value);
        }
        self
    }

    /// `pkg:apk/<os id>/<name>@<version>?arch=..&distro=..`
    #[must_use]
    pub fn apk(package: &InstalledPackage, release: &OsRelease, arch: &Architecture) -> Self {
        let distro = match release.get("VERSION_ID") {
            Some(version) if !version.is_empty() => format!("{}-{version}", release.id()),
            _ => release.id().to_string(),
        };
        Self::new("apk", &package.name)
            .namespace(release.id().to_lowercase())
            .version(&package.version)
            .qualifier(
                "arch",
                package.arch.clone().unwrap_or_else(|| arch.to_apk().to_string()),
            )
            .qualifier("distro", distro)
            .qualifier("origin", package.origin.clone().unwrap_or_default())
    }

    /// `pkg:oci/<name>@sha256:..?arch=..&repository_url=..&tag=..`
    #[must_use]
    pub fn oci(
        name: &str,
        digest: &Digest,
        arch: Option<&Architecture>,
        repository: Option<&str>,
        tag: Option<&str>,
        media_type: &str,
    ) -> Self {
        let mut purl = Self::new("oci", name.to_lowercase())
            .version(digest.to_string())
            .qualifier("mediaType", media_type);
        if let Some(arch) = arch {
            purl = purl.qualifier("arch", arch.oci_arch());
        }
        if let Some(repository) = repository {
            purl = purl.qualifier("repository_url", repository);
        }
        if let Some(tag) = tag {
            purl = purl.qualifier("tag", tag);
        }
        purl
    }
}

impl std::fmt::Display for Purl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pkg:{}/", self.kind)?;
        if let Some(ref namespace) = self.namespace {
            write!(f, "{}/", encode(namespace))?;
        }
        f.write_str(&encode(&self.name))?;
        if let Some(ref version) = self.version {
            write!(f, "@{}", encode(version))?;
        }
        let mut sep = '?';
        for (key, value) in &self.qualifiers {
            write!(f, "{sep}{key}={}", encode(value))?;
            sep = '&';
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alpine() -> OsRelease {
        OsRelease::from_pairs([("ID", "alpine"), ("VERSION_ID", "3.20.1")])
    }

    #[test]
    fn test_apk_purl() {
        let mut pkg = InstalledPackage::new("musl", "1.2.5-r0");
        pkg.arch = Some("x86_64".to_string());
        let purl = Purl::apk(&pkg, &alpine(), &Architecture::X86_64).to_string();
        assert_eq!(
            purl,
            "pkg:apk/alpine/musl@1.2.5-r0?arch=x86_64&distro=alpine-3.20.1"
        );
    }

    #[test]
    fn test_apk_purl_falls_back_to_build_arch() {
        let mut pkg = InstalledPackage::new("libstdc++", "13.2.1-r0");
        pkg.origin = Some("gcc".to_string());
        let purl = Purl::apk(&pkg, &alpine(), &Architecture::Aarch64).to_string();
        assert_eq!(
            purl,
            "pkg:apk/alpine/libstdc%2B%2B@13.2.1-r0?arch=aarch64&distro=alpine-3.20.1&origin=gcc"
        );
    }

    #[test]
    fn test_oci_purl_encodes_digest_colon() {
        let digest = Digest::of(b"manifest");
        let purl = Purl::oci(
            "App",
            &digest,
            Some(&Architecture::Aarch64),
            Some("registry.local/app"),
            Some("1.0"),
            "application/vnd.oci.image.manifest.v1+json",
        )
        .to_string();
        assert!(purl.starts_with(&format!("pkg:oci/app@sha256%3A{}", digest.hex())));
        assert!(purl.ends_with(
            "?arch=arm64&mediaType=application%2Fvnd.oci.image.manifest.v1%2Bjson\
             &repository_url=registry.local%2Fapp&tag=1.0"
        ));
    }
}
