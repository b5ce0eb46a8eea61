//! CycloneDX 1.4 JSON documents.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::license::is_valid_expression;
use super::purl::Purl;
use super::{ImageSbomInput, IndexSbomInput};
use crate::model::{Digest, InstalledPackage, SbomFormat};
use crate::utils::rfc3339;

const SPEC_VERSION: &str = "1.4";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycloneDxBom {
    bom_format: &'static str,
    spec_version: &'static str,
    serial_number: String,
    version: u32,
    metadata: CdxMetadata,
    components: Vec<CdxComponent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    dependencies: Vec<CdxDependency>,
}

impl CycloneDxBom {
    #[must_use]
    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CdxMetadata {
    timestamp: String,
    tools: Vec<CdxTool>,
    component: CdxComponent,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CdxTool {
    vendor: &'static str,
    name: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CdxComponent {
    #[serde(rename = "bom-ref")]
    bom_ref: String,
    #[serde(rename = "type")]
    component_type: &'static str,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    licenses: Vec<CdxLicenseChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    purl: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    hashes: Vec<CdxHash>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    external_references: Vec<CdxExternalReference>,
}

impl CdxComponent {
    fn new(bom_ref: impl Into<String>, component_type: &'static str, name: impl Into<String>) -> Self {
        Self {
            bom_ref: bom_ref.into(),
            component_type,
            name: name.into(),
            version: None,
            description: None,
            licenses: Vec::new(),
            purl: None,
            hashes: Vec::new(),
            external_references: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum CdxLicenseChoice {
    Expression { expression: String },
    License { license: CdxLicense },
}

#[derive(Debug, Serialize)]
struct CdxLicense {
    name: String,
}

impl CdxLicenseChoice {
    /// A valid SPDX expression is emitted as one; anything else as a name.
    fn from_raw(raw: Option<&str>) -> Option<Self> {
        let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
        Some(if is_valid_expression(raw) {
            Self::Expression {
                expression: raw.to_string(),
            }
        } else {
            Self::License {
                license: CdxLicense {
                    name: raw.to_string(),
                },
            }
        })
    }
}

#[derive(Debug, Serialize)]
struct CdxHash {
    alg: &'static str,
    content: String,
}

impl CdxHash {
    fn sha256(digest: &Digest) -> Self {
        Self {
            alg: "SHA-256",
            content: digest.hex().to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CdxExternalReference {
    #[serde(rename = "type")]
    ref_type: &'static str,
    url: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    hashes: Vec<CdxHash>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CdxDependency {
    #[serde(rename = "ref")]
    ref_field: String,
    depends_on: Vec<String>,
}

fn tools() -> Vec<CdxTool> {
    vec![CdxTool {
        vendor: "imgforge",
        name: "imgforge",
        version: env!("CARGO_PKG_VERSION"),
    }]
}

/// A name-based UUID (version 5 layout) taken from the digest of `seed`,
/// so the same inputs always give the same serial number.
#[must_use]
pub fn serial_number(seed: &str) -> String {
    let hex = Digest::of(seed.as_bytes()).hex().to_string();
    let mut chars: Vec<char> = hex.chars().take(32).collect();
    chars[12] = '5';
    let variant = chars[16].to_digit(16).unwrap_or(0);
    chars[16] = std::char::from_digit((variant & 0x3) | 0x8, 16).unwrap_or('8');
    let s: String = chars.into_iter().collect();
    format!(
        "urn:uuid:{}-{}-{}-{}-{}",
        &s[0..8],
        &s[8..12],
        &s[12..16],
        &s[16..20],
        &s[20..32]
    )
}

/// Strip a dependency atom down to the name it refers to.
///
/// `so:libc.musl-x86_64.so.1`, `musl>=1.2` and `cmd:sh=1.36` become
/// `so:libc.musl-x86_64.so.1`, `musl` and `cmd:sh`. Conflicts (`!name`)
/// yield `None`.
fn dependency_name(atom: &str) -> Option<&str> {
    if atom.starts_with('!') {
        return None;
    }
    let end = atom.find(['<', '>', '=', '~']).unwrap_or(atom.len());
    let name = &atom[..end];
    (!name.is_empty()).then_some(name)
}

/// Map every package name and provided name to the providing package's ref.
fn provider_index<'a>(packages: &'a [InstalledPackage], refs: &'a [String]) -> BTreeMap<&'a str, &'a str> {
    let mut index = BTreeMap::new();
    for (pkg, bom_ref) in packages.iter().zip(refs) {
        index.entry(pkg.name.as_str()).or_insert(bom_ref.as_str());
    }
    for (pkg, bom_ref) in packages.iter().zip(refs) {
        for provided in &pkg.provides {
            if let Some(name) = dependency_name(provided) {
                index.entry(name).or_insert(bom_ref.as_str());
            }
        }
    }
    index
}

/// Build the per-architecture document.
#[must_use]
pub fn image_document(input: &ImageSbomInput<'_>) -> CycloneDxBom {
    let info = input.info;
    let release = input.release;
    let image_purl = info.image_purl().to_string();

    let mut container = CdxComponent::new(image_purl.clone(), "container", info.image_name());
    container.version = Some(info.image_digest.to_string());
    container.purl = Some(image_purl.clone());
    container.hashes.push(CdxHash::sha256(&info.image_digest));
    if let Some(ref url) = info.vcs_url {
        container.external_references.push(CdxExternalReference {
            ref_type: "vcs",
            url: url.clone(),
            hashes: Vec::new(),
        });
    }

    let os_ref = format!("os:{}@{}", release.id(), release.version_id());
    let mut os = CdxComponent::new(os_ref.clone(), "operating-system", release.id());
    os.version = Some(release.version_id().to_string());
    os.description = release.pretty_name().map(str::to_string);
    if let Some(url) = release.home_url() {
        os.external_references.push(CdxExternalReference {
            ref_type: "website",
            url: url.to_string(),
            hashes: Vec::new(),
        });
    }

    let refs: Vec<String> = input
        .packages
        .iter()
        .map(|pkg| Purl::apk(pkg, release, &info.arch).to_string())
        .collect();
    let providers = provider_index(input.packages, &refs);

    let mut components = vec![os];
    let mut dependencies = Vec::with_capacity(input.packages.len() + 1);
    let mut seen = BTreeSet::new();
    for (pkg, bom_ref) in input.packages.iter().zip(&refs) {
        if !seen.insert(bom_ref.as_str()) {
            continue;
        }
        let mut component = CdxComponent::new(bom_ref.clone(), "library", &pkg.name);
        component.version = Some(pkg.version.clone());
        component.description = pkg.description.clone();
        component.licenses = CdxLicenseChoice::from_raw(pkg.license.as_deref())
            .into_iter()
            .collect();
        component.purl = Some(bom_ref.clone());
        if let Some(ref url) = pkg.url {
            component.external_references.push(CdxExternalReference {
                ref_type: "website",
                url: url.clone(),
                hashes: Vec::new(),
            });
        }
        components.push(component);

        let depends_on: BTreeSet<&str> = pkg
            .dependencies
            .iter()
            .filter_map(|atom| dependency_name(atom))
            .filter_map(|name| providers.get(name).copied())
            .filter(|target| *target != bom_ref.as_str())
            .collect();
        dependencies.push(CdxDependency {
            ref_field: bom_ref.clone(),
            depends_on: depends_on.into_iter().map(str::to_string).collect(),
        });
    }

    let mut top_level = vec![os_ref];
    top_level.extend(seen.iter().map(|r| (*r).to_string()));
    dependencies.insert(
        0,
        CdxDependency {
            ref_field: image_purl,
            depends_on: top_level,
        },
    );

    CycloneDxBom {
        bom_format: "CycloneDX",
        spec_version: SPEC_VERSION,
        serial_number: serial_number(&format!(
            "{}:{}:{}",
            info.arch, info.image_digest, info.layer_digest
        )),
        version: 1,
        metadata: CdxMetadata {
            timestamp: rfc3339(info.epoch),
            tools: tools(),
            component: container,
        },
        components,
        dependencies,
    }
}

/// Build the index document. Each architecture is a container component
/// whose `bom` reference carries the checksum of its own document.
#[must_use]
pub fn index_document(input: &IndexSbomInput<'_>) -> CycloneDxBom {
    let index_purl = input.index_purl().to_string();
    let mut index = CdxComponent::new(index_purl.clone(), "container", input.image_name());
    index.version = Some(input.index_digest.to_string());
    index.purl = Some(index_purl.clone());
    index.hashes.push(CdxHash::sha256(input.index_digest));
    if let Some(url) = input.vcs_url {
        index.external_references.push(CdxExternalReference {
            ref_type: "vcs",
            url: url.to_string(),
            hashes: Vec::new(),
        });
    }

    let mut components = Vec::with_capacity(input.images.len());
    let mut refs = Vec::with_capacity(input.images.len());
    for image in input.images {
        let purl = input.image_purl(image).to_string();
        let mut component =
            CdxComponent::new(purl.clone(), "container", format!("{} ({})", input.image_name(), image.arch));
        component.version = Some(image.image_digest.to_string());
        component.purl = Some(purl.clone());
        component.hashes.push(CdxHash::sha256(&image.image_digest));
        component.external_references.push(CdxExternalReference {
            ref_type: "bom",
            url: SbomFormat::Cyclonedx.arch_file_name(&image.arch),
            hashes: vec![CdxHash::sha256(&image.sbom_digest)],
        });
        components.push(component);
        refs.push(purl);
    }

    CycloneDxBom {
        bom_format: "CycloneDX",
        spec_version: SPEC_VERSION,
        serial_number: serial_number(&format!("index:{}", input.index_digest)),
        version: 1,
        metadata: CdxMetadata {
            timestamp: rfc3339(input.epoch),
            tools: tools(),
            component: index,
        },
        components,
        dependencies: vec![CdxDependency {
            ref_field: index_purl,
            depends_on: refs,
        }],
    }
}
