//! SPDX 2.3 JSON documents.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::license::{declared_license, NOASSERTION};
use super::purl::Purl;
use super::{ImageSbomInput, IndexSbomInput};
use crate::model::{Architecture, Digest};
use crate::utils::rfc3339;

const SPDX_VERSION: &str = "SPDX-2.3";
const DATA_LICENSE: &str = "CC0-1.0";
const DOCUMENT_ID: &str = "SPDXRef-DOCUMENT";
const OS_ID: &str = "SPDXRef-OperatingSystem";
const NAMESPACE_BASE: &str = "https://spdx.org/spdxdocs/imgforge";
const LICENSE_LIST_VERSION: &str = "3.22";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpdxDocument {
    spdx_version: &'static str,
    data_license: &'static str,
    #[serde(rename = "SPDXID")]
    spdx_id: &'static str,
    name: String,
    document_namespace: String,
    creation_info: SpdxCreationInfo,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    external_document_refs: Vec<SpdxExternalDocRef>,
    packages: Vec<SpdxPackage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    files: Vec<SpdxFile>,
    relationships: Vec<SpdxRelationship>,
}

impl SpdxDocument {
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.document_namespace
    }

    #[must_use]
    pub fn packages(&self) -> &[SpdxPackage] {
        &self.packages
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpdxCreationInfo {
    created: String,
    creators: Vec<String>,
    license_list_version: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpdxPackage {
    #[serde(rename = "SPDXID")]
    spdx_id: String,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    version_info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    supplier: Option<String>,
    download_location: String,
    files_analyzed: bool,
    license_concluded: String,
    license_declared: String,
    copyright_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    homepage: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    checksums: Vec<SpdxChecksum>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    external_refs: Vec<SpdxExternalRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    primary_package_purpose: Option<&'static str>,
}

impl SpdxPackage {
    fn new(spdx_id: String, name: impl Into<String>) -> Self {
        Self {
            spdx_id,
            name: name.into(),
            version_info: None,
            supplier: None,
            download_location: NOASSERTION.to_string(),
            files_analyzed: false,
            license_concluded: NOASSERTION.to_string(),
            license_declared: NOASSERTION.to_string(),
            copyright_text: NOASSERTION.to_string(),
            description: None,
            homepage: None,
            checksums: Vec::new(),
            external_refs: Vec::new(),
            primary_package_purpose: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.spdx_id
    }

    /// SHA256 checksum values attached to the package
    pub fn sha256_values(&self) -> impl Iterator<Item = &str> {
        self.checksums
            .iter()
            .filter(|c| c.algorithm == "SHA256")
            .map(|c| c.checksum_value.as_str())
    }

    fn with_sha256(mut self, digest: &Digest) -> Self {
        self.checksums.push(SpdxChecksum::sha256(digest));
        self
    }

    fn with_purl(mut self, purl: &Purl) -> Self {
        self.external_refs.push(SpdxExternalRef {
            reference_category: "PACKAGE-MANAGER",
            reference_type: "purl",
            reference_locator: purl.to_string(),
        });
        self
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpdxFile {
    #[serde(rename = "SPDXID")]
    spdx_id: String,
    file_name: String,
    checksums: Vec<SpdxChecksum>,
    license_concluded: &'static str,
    copyright_text: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpdxChecksum {
    algorithm: &'static str,
    checksum_value: String,
}

impl SpdxChecksum {
    fn sha256(digest: &Digest) -> Self {
        Self {
            algorithm: "SHA256",
            checksum_value: digest.hex().to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpdxExternalRef {
    reference_category: &'static str,
    reference_type: &'static str,
    reference_locator: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpdxRelationship {
    spdx_element_id: String,
    relationship_type: &'static str,
    related_spdx_element: String,
}

impl SpdxRelationship {
    fn new(from: &str, kind: &'static str, to: &str) -> Self {
        Self {
            spdx_element_id: from.to_string(),
            relationship_type: kind,
            related_spdx_element: to.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpdxExternalDocRef {
    external_document_id: String,
    spdx_document: String,
    checksum: SpdxChecksum,
}

/// Replace every character SPDX identifiers do not allow.
fn sanitize_id(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '-' })
        .collect()
}

fn digest_package_id(digest: &Digest) -> String {
    format!("SPDXRef-Package-sha256-{}", digest.hex())
}

fn creators() -> Vec<String> {
    vec![format!("Tool: imgforge-{}", env!("CARGO_PKG_VERSION"))]
}

/// Namespace of the per-architecture document for an image.
#[must_use]
pub fn document_namespace(arch: &Architecture, image_digest: &Digest) -> String {
    format!("{NAMESPACE_BASE}/{arch}/{}", image_digest.hex())
}

/// Build the per-architecture document.
#[must_use]
pub fn image_document(input: &ImageSbomInput<'_>) -> SpdxDocument {
    let info = input.info;
    let release = input.release;
    let image_name = info.image_name();

    let image_id = digest_package_id(&info.image_digest);
    let mut image = SpdxPackage::new(image_id.clone(), image_name.clone())
        .with_sha256(&info.image_digest)
        .with_purl(&info.image_purl());
    image.version_info = Some(info.image_digest.to_string());
    image.primary_package_purpose = Some("CONTAINER");
    if let Some(ref url) = info.vcs_url {
        image.download_location = url.clone();
    }

    let layer_id = digest_package_id(&info.layer_digest);
    let mut layer = SpdxPackage::new(layer_id.clone(), info.layer_digest.to_string())
        .with_sha256(&info.layer_digest);
    layer.version_info = Some(info.layer_digest.to_string());
    layer.description = Some(format!("layer diffID {}", info.layer_diff_id));

    let mut os = SpdxPackage::new(OS_ID.to_string(), release.id());
    os.version_info = Some(release.version_id().to_string());
    os.supplier = Some(format!("Organization: {}", release.name()));
    os.description = release.pretty_name().map(str::to_string);
    os.homepage = release.home_url().map(str::to_string);
    os.primary_package_purpose = Some("OPERATING-SYSTEM");

    let mut packages = vec![image, layer, os];
    let mut relationships = vec![
        SpdxRelationship::new(DOCUMENT_ID, "DESCRIBES", &image_id),
        SpdxRelationship::new(&image_id, "CONTAINS", &layer_id),
        SpdxRelationship::new(&layer_id, "CONTAINS", OS_ID),
    ];

    let mut owners: BTreeMap<&str, String> = BTreeMap::new();
    let mut used_ids = BTreeSet::new();
    for pkg in input.packages {
        let base = format!(
            "SPDXRef-Package-{}-{}",
            sanitize_id(&pkg.name),
            sanitize_id(&pkg.version)
        );
        let mut id = base.clone();
        let mut n = 1;
        while !used_ids.insert(id.clone()) {
            n += 1;
            id = format!("{base}-{n}");
        }

        let mut spdx_pkg = SpdxPackage::new(id.clone(), &pkg.name)
            .with_purl(&Purl::apk(pkg, release, &info.arch));
        spdx_pkg.version_info = Some(pkg.version.clone());
        spdx_pkg.supplier = Some(format!("Organization: {}", release.name()));
        spdx_pkg.license_declared = declared_license(pkg.license.as_deref());
        spdx_pkg.description = pkg.description.clone();
        spdx_pkg.homepage = pkg.url.clone();
        packages.push(spdx_pkg);
        relationships.push(SpdxRelationship::new(&layer_id, "CONTAINS", &id));

        for file in &pkg.files {
            owners
                .entry(file.path.trim_start_matches('/'))
                .or_insert_with(|| id.clone());
        }
    }

    let mut files = Vec::with_capacity(input.files.len());
    for file in input.files {
        let file_id = format!("SPDXRef-File-{}", Digest::of(file.path.as_bytes()).short(16));
        let owner = owners.get(file.path.as_str()).unwrap_or(&layer_id);
        relationships.push(SpdxRelationship::new(owner, "CONTAINS", &file_id));
        files.push(SpdxFile {
            spdx_id: file_id,
            file_name: format!("/{}", file.path),
            checksums: vec![SpdxChecksum::sha256(&file.digest)],
            license_concluded: NOASSERTION,
            copyright_text: NOASSERTION,
        });
    }

    SpdxDocument {
        spdx_version: SPDX_VERSION,
        data_license: DATA_LICENSE,
        spdx_id: DOCUMENT_ID,
        name: format!("sbom-{image_name}-{}", info.arch),
        document_namespace: document_namespace(&info.arch, &info.image_digest),
        creation_info: SpdxCreationInfo {
            created: rfc3339(info.epoch),
            creators: creators(),
            license_list_version: LICENSE_LIST_VERSION,
        },
        external_document_refs: Vec::new(),
        packages,
        files,
        relationships,
    }
}

/// Build the index document, which references every per-architecture
/// document by namespace and checksum.
#[must_use]
pub fn index_document(input: &IndexSbomInput<'_>) -> SpdxDocument {
    let index_name = input.image_name();
    let index_id = digest_package_id(input.index_digest);
    let mut index = SpdxPackage::new(index_id.clone(), index_name.clone())
        .with_sha256(input.index_digest)
        .with_purl(&input.index_purl());
    index.version_info = Some(input.index_digest.to_string());
    index.primary_package_purpose = Some("CONTAINER");
    if let Some(url) = input.vcs_url {
        index.download_location = url.to_string();
    }

    let mut packages = vec![index];
    let mut relationships = vec![SpdxRelationship::new(DOCUMENT_ID, "DESCRIBES", &index_id)];
    let mut external_document_refs = Vec::with_capacity(input.images.len());

    for image in input.images {
        let arch_id = sanitize_id(image.arch.to_apk());
        let image_id = format!("SPDXRef-Package-{arch_id}-sha256-{}", image.image_digest.hex());
        let doc_ref = format!("DocumentRef-image-{arch_id}");

        let mut pkg = SpdxPackage::new(image_id.clone(), format!("{index_name} ({})", image.arch))
            .with_sha256(&image.image_digest)
            .with_purl(&input.image_purl(image));
        pkg.version_info = Some(image.image_digest.to_string());
        pkg.primary_package_purpose = Some("CONTAINER");
        packages.push(pkg);

        relationships.push(SpdxRelationship::new(&index_id, "CONTAINS", &image_id));
        relationships.push(SpdxRelationship::new(
            &image_id,
            "DESCRIBED_BY",
            &format!("{doc_ref}:{DOCUMENT_ID}"),
        ));
        external_document_refs.push(SpdxExternalDocRef {
            external_document_id: doc_ref,
            spdx_document: document_namespace(&image.arch, &image.image_digest),
            checksum: SpdxChecksum::sha256(&image.sbom_digest),
        });
    }

    SpdxDocument {
        spdx_version: SPDX_VERSION,
        data_license: DATA_LICENSE,
        spdx_id: DOCUMENT_ID,
        name: format!("sbom-{index_name}-index"),
        document_namespace: format!("{NAMESPACE_BASE}/index/{}", input.index_digest.hex()),
        creation_info: SpdxCreationInfo {
            created: rfc3339(input.epoch),
            creators: creators(),
            license_list_version: LICENSE_LIST_VERSION,
        },
        external_document_refs,
        packages,
        files: Vec::new(),
        relationships,
    }
}
