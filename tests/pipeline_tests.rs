//! Build pipeline integration tests.
//!
//! These tests run whole builds against temporary root filesystems and
//! check the outputs a registry or scanner would see: layer bytes, image
//! and index digests, and the SBOM documents.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use imgforge::apk::{render_installed, INSTALLED_DB_PATH};
use imgforge::cli::{resolve_rootfs, run_build, run_layer, BuildOverrides};
use imgforge::config::ImgforgeConfig;
use imgforge::model::{Architecture, Digest, InstalledDir, InstalledFile, InstalledPackage, SbomFormat};
use imgforge::mutate::OS_RELEASE_PATH;
use imgforge::sbom::INDEX_MANIFEST_FILE;
use imgforge::{BuildOptions, BuildOutput, Builder, ImageConfiguration, WorkTree};

// ============================================================================
// Test Fixtures
// ============================================================================

const OS_RELEASE: &str = "ID=alpine\nNAME=\"Alpine Linux\"\nVERSION_ID=3.20.0\n";

fn packages() -> Vec<InstalledPackage> {
    let mut musl = InstalledPackage::new("musl", "1.2.5-r0");
    musl.license = Some("MIT".to_string());
    musl.build_time = Some(1_700_000_000);
    musl.dirs.push(InstalledDir {
        path: "lib".to_string(),
        ownership: None,
    });
    musl.files.push(InstalledFile {
        path: "lib/ld-musl-x86_64.so.1".to_string(),
        ownership: None,
        checksum: None,
    });

    let mut hello = InstalledPackage::new("hello", "2.12-r0");
    hello.license = Some("GPL-3.0-or-later".to_string());
    hello.build_time = Some(1_700_000_100);
    hello.dependencies.push("so:libc.musl-x86_64.so.1".to_string());
    hello.dirs.push(InstalledDir {
        path: "usr/bin".to_string(),
        ownership: None,
    });
    hello.files.push(InstalledFile {
        path: "usr/bin/hello".to_string(),
        ownership: None,
        checksum: None,
    });
    vec![musl, hello]
}

/// A small tree with an installed database and the files it lists.
fn seed_tree(dir: &Path) -> WorkTree {
    let tree = WorkTree::open(dir).expect("open tree");
    tree.write_file("lib/ld-musl-x86_64.so.1", b"\x7fELF musl", 0o755)
        .expect("musl");
    tree.write_file("usr/bin/hello", b"#!/bin/sh\necho hello\n", 0o755)
        .expect("hello");
    tree.write_file("etc/hostname", b"box\n", 0o644)
        .expect("hostname");
    tree.write_file(INSTALLED_DB_PATH, render_installed(&packages()).as_bytes(), 0o644)
        .expect("installed db");
    tree
}

fn options(out: &Path, formats: Vec<SbomFormat>) -> BuildOptions {
    BuildOptions::builder()
        .output_dir(out)
        .sbom_formats(formats)
        .source_date_epoch(0)
        .tag("registry.local/team/hello:1.0")
        .build()
}

fn build(archs: &[Architecture], out: &Path, formats: Vec<SbomFormat>) -> BuildOutput {
    let roots: Vec<_> = archs
        .iter()
        .map(|_| tempfile::tempdir().expect("tempdir"))
        .collect();
    let trees = archs
        .iter()
        .zip(&roots)
        .map(|(arch, dir)| (*arch, seed_tree(dir.path())))
        .collect();
    Builder::new(options(out, formats), ImageConfiguration::default())
        .build_all(trees)
        .expect("build")
}

/// Archived mode of every layer entry, keyed by path without a trailing `/`.
fn layer_modes(layer: &Path) -> BTreeMap<String, u32> {
    let mut archive = tar::Archive::new(GzDecoder::new(fs::File::open(layer).expect("open layer")));
    archive
        .entries()
        .expect("entries")
        .map(|entry| {
            let entry = entry.expect("entry");
            let path = entry.path().expect("path").to_string_lossy().trim_end_matches('/').to_string();
            (path, entry.header().mode().expect("mode"))
        })
        .collect()
}

fn read_json(path: &Path) -> serde_json::Value {
    let bytes = fs::read(path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()));
    serde_json::from_slice(&bytes).expect("valid json")
}

// ============================================================================
// Reproducibility
// ============================================================================

mod reproducibility {
    use super::*;

    #[test]
    fn same_inputs_produce_identical_outputs() {
        let first = tempfile::tempdir().expect("tempdir");
        let second = tempfile::tempdir().expect("tempdir");
        let archs = [Architecture::X86_64, Architecture::Aarch64];

        let a = build(&archs, first.path(), vec![SbomFormat::Spdx]);
        let b = build(&archs, second.path(), vec![SbomFormat::Spdx]);

        assert_eq!(a.index.digest, b.index.digest);
        for (x, y) in a.archs.iter().zip(&b.archs) {
            assert_eq!(x.layer.digest, y.layer.digest);
            assert_eq!(x.layer.diff_id, y.layer.diff_id);
            assert_eq!(x.image.digest, y.image.digest);
            assert_eq!(fs::read(&x.layer.path).expect("read"), fs::read(&y.layer.path).expect("read"));
        }

        for name in ["sbom-x86_64.spdx.json", "sbom-aarch64.spdx.json", "sbom-index.spdx.json"] {
            assert_eq!(
                fs::read(first.path().join(name)).expect("read"),
                fs::read(second.path().join(name)).expect("read"),
                "{name} differs between runs"
            );
        }
    }

    #[test]
    fn layer_entries_carry_the_epoch() {
        let out = tempfile::tempdir().expect("tempdir");
        let output = build(&[Architecture::X86_64], out.path(), Vec::new());
        let layer = &output.archs[0].layer;

        let mut archive = tar::Archive::new(GzDecoder::new(fs::File::open(&layer.path).expect("open")));
        let mut paths = Vec::new();
        for entry in archive.entries().expect("entries") {
            let entry = entry.expect("entry");
            assert_eq!(entry.header().mtime().expect("mtime"), 0);
            paths.push(entry.path().expect("path").into_owned());
        }
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted, "parents must precede children");
        assert!(paths.contains(&PathBuf::from("usr/bin/hello")));
    }

    #[test]
    fn layer_header_modes_are_pinned() {
        let out = tempfile::tempdir().expect("tempdir");
        let output = build(&[Architecture::X86_64], out.path(), Vec::new());
        let modes = layer_modes(&output.archs[0].layer.path);

        // Directories nobody asked for explicitly, including those the
        // mutation steps create for the world file and device nodes.
        for dir in ["dev", "etc", "etc/apk", "lib", "lib/apk", "lib/apk/db", "usr", "usr/bin"] {
            assert_eq!(modes.get(dir), Some(&0o755), "{dir}");
        }
        assert_eq!(modes.get("usr/bin/hello"), Some(&0o755));
        assert_eq!(modes.get("etc/hostname"), Some(&0o644));
        assert_eq!(modes.get("dev/null"), Some(&0o666));
    }

    #[test]
    fn layer_digest_matches_file_bytes() {
        let out = tempfile::tempdir().expect("tempdir");
        let output = build(&[Architecture::X86_64], out.path(), Vec::new());
        let layer = &output.archs[0].layer;

        let compressed = fs::read(&layer.path).expect("read");
        assert_eq!(layer.digest, Digest::of(&compressed));
        assert_eq!(layer.size, compressed.len() as u64);

        let mut tar_bytes = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut tar_bytes)
            .expect("read to end");
        assert_eq!(layer.diff_id, Digest::of(&tar_bytes));
    }
}

// ============================================================================
// Images and index
// ============================================================================

mod images {
    use super::*;

    #[test]
    fn index_is_ordered_by_architecture() {
        let out = tempfile::tempdir().expect("tempdir");
        let output = build(
            &[Architecture::X86_64, Architecture::Aarch64, Architecture::Riscv64],
            out.path(),
            Vec::new(),
        );

        let archs: Vec<_> = output.archs.iter().map(|a| a.image.arch).collect();
        assert_eq!(
            archs,
            [Architecture::Aarch64, Architecture::Riscv64, Architecture::X86_64]
        );

        let index = read_json(&out.path().join(INDEX_MANIFEST_FILE));
        let platforms: Vec<_> = index["manifests"]
            .as_array()
            .expect("array")
            .iter()
            .map(|m| m["platform"]["architecture"].as_str().expect("string").to_string())
            .collect();
        assert_eq!(platforms, ["arm64", "riscv64", "amd64"]);
        assert_eq!(
            Digest::of(&fs::read(out.path().join(INDEX_MANIFEST_FILE)).expect("read")),
            output.index.digest
        );
    }

    #[test]
    fn every_image_has_exactly_one_layer() {
        let out = tempfile::tempdir().expect("tempdir");
        let output = build(&[Architecture::X86_64, Architecture::Aarch64], out.path(), Vec::new());
        for arch in &output.archs {
            assert_eq!(arch.image.manifest.layers.len(), 1);
            assert_eq!(arch.image.manifest.layers[0].digest, arch.layer.digest);
            assert_eq!(arch.image.manifest.layers[0].size, arch.layer.size);
        }
    }

    #[test]
    fn existing_os_release_is_left_alone() {
        let root = tempfile::tempdir().expect("tempdir");
        let out = tempfile::tempdir().expect("tempdir");
        let tree = seed_tree(root.path());
        tree.write_file(OS_RELEASE_PATH, OS_RELEASE.as_bytes(), 0o644)
            .expect("write file");

        Builder::new(options(out.path(), Vec::new()), ImageConfiguration::default())
            .build_all(vec![(Architecture::X86_64, tree)])
            .expect("build");
        assert_eq!(
            fs::read_to_string(root.path().join(OS_RELEASE_PATH)).expect("read"),
            OS_RELEASE
        );
    }
}

// ============================================================================
// SBOM documents
// ============================================================================

mod sboms {
    use super::*;

    #[test]
    fn spdx_describes_the_built_image() {
        let out = tempfile::tempdir().expect("tempdir");
        let output = build(&[Architecture::X86_64], out.path(), vec![SbomFormat::Spdx]);
        let arch = &output.archs[0];

        let doc = read_json(&out.path().join("sbom-x86_64.spdx.json"));
        assert_eq!(doc["spdxVersion"], "SPDX-2.3");
        assert_eq!(doc["creationInfo"]["created"], "1970-01-01T00:00:00Z");

        let image_id = format!("SPDXRef-Package-sha256-{}", arch.image.digest.hex());
        let image = doc["packages"]
            .as_array()
            .expect("array")
            .iter()
            .find(|p| p["SPDXID"] == image_id.as_str())
            .expect("image package");
        assert_eq!(image["checksums"][0]["checksumValue"], arch.image.digest.hex());

        let describes: Vec<_> = doc["relationships"]
            .as_array()
            .expect("array")
            .iter()
            .filter(|r| r["relationshipType"] == "DESCRIBES")
            .map(|r| r["relatedSpdxElement"].as_str().expect("string").to_string())
            .collect();
        assert_eq!(describes, [image_id]);

        let names: Vec<_> = doc["packages"]
            .as_array()
            .expect("array")
            .iter()
            .map(|p| p["name"].as_str().expect("string").to_string())
            .collect();
        assert!(names.contains(&"musl".to_string()));
        assert!(names.contains(&"hello".to_string()));
    }

    #[test]
    fn sbom_records_point_at_written_files() {
        let out = tempfile::tempdir().expect("tempdir");
        let output = build(
            &[Architecture::X86_64],
            out.path(),
            vec![SbomFormat::Spdx, SbomFormat::Cyclonedx, SbomFormat::Idb],
        );
        let records = &output.archs[0].sboms;
        assert_eq!(records.len(), 3);
        for record in records {
            let bytes = fs::read(&record.path).expect("read");
            assert_eq!(record.digest, Digest::of(&bytes));
            assert_eq!(record.subject, output.archs[0].image.digest);
        }

        let idb = fs::read_to_string(out.path().join("sbom-x86_64.idb")).expect("read");
        assert_eq!(idb, render_installed(&packages()));
    }

    #[test]
    fn cyclonedx_index_references_arch_documents() {
        let out = tempfile::tempdir().expect("tempdir");
        let output = build(
            &[Architecture::X86_64, Architecture::Aarch64],
            out.path(),
            vec![SbomFormat::Cyclonedx],
        );
        assert_eq!(output.index_sboms.len(), 1);

        let index = read_json(&out.path().join("sbom-index.cdx"));
        let components = index["components"].as_array().expect("array");
        assert_eq!(components.len(), 2);
        for (component, arch) in components.iter().zip(["aarch64", "x86_64"]) {
            let reference = &component["externalReferences"][0];
            let url = format!("sbom-{arch}.cdx");
            assert_eq!(reference["url"], url.as_str());
            let expected = Digest::of(&fs::read(out.path().join(&url)).expect("read"));
            assert_eq!(reference["hashes"][0]["content"], expected.hex());
        }
    }

    fn purls(doc: &serde_json::Value) -> Vec<String> {
        doc["packages"]
            .as_array()
            .expect("array")
            .iter()
            .filter_map(|p| p["externalRefs"][0]["referenceLocator"].as_str())
            .filter(|purl| purl.starts_with("pkg:oci/"))
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn docker_media_types_reach_the_documents() {
        let root = tempfile::tempdir().expect("tempdir");
        let out = tempfile::tempdir().expect("tempdir");
        let mut options = options(out.path(), vec![SbomFormat::Spdx, SbomFormat::Cyclonedx]);
        options.docker_media_types = true;
        Builder::new(options, ImageConfiguration::default())
            .build_all(vec![(Architecture::X86_64, seed_tree(root.path()))])
            .expect("build");

        let manifest = "mediaType=application%2Fvnd.docker.distribution.manifest.v2%2Bjson";
        let list = "mediaType=application%2Fvnd.docker.distribution.manifest.list.v2%2Bjson";

        let image = purls(&read_json(&out.path().join("sbom-x86_64.spdx.json")));
        assert_eq!(image.len(), 1);
        assert!(image[0].contains(manifest), "{}", image[0]);

        let cdx = read_json(&out.path().join("sbom-x86_64.cdx"));
        let container = cdx["metadata"]["component"]["purl"].as_str().expect("string");
        assert!(container.contains(manifest), "{container}");

        // Index package first, then one package per image
        let index = purls(&read_json(&out.path().join("sbom-index.spdx.json")));
        assert_eq!(index.len(), 2);
        assert!(index[0].contains(list), "{}", index[0]);
        assert!(index[1].contains(manifest), "{}", index[1]);
    }

    #[test]
    fn oci_media_types_are_the_default() {
        let out = tempfile::tempdir().expect("tempdir");
        build(&[Architecture::X86_64], out.path(), vec![SbomFormat::Spdx]);
        let index = purls(&read_json(&out.path().join("sbom-index.spdx.json")));
        assert!(index[0].contains("mediaType=application%2Fvnd.oci.image.index.v1%2Bjson"));
        assert!(index[1].contains("mediaType=application%2Fvnd.oci.image.manifest.v1%2Bjson"));
    }

    #[test]
    fn no_formats_means_no_documents() {
        let out = tempfile::tempdir().expect("tempdir");
        let output = build(&[Architecture::X86_64], out.path(), Vec::new());
        assert!(output.archs[0].sboms.is_empty());
        assert!(output.index_sboms.is_empty());
        assert!(out.path().join(INDEX_MANIFEST_FILE).exists());
        assert!(!out.path().join("sbom-x86_64.spdx.json").exists());
    }
}

// ============================================================================
// CLI handlers
// ============================================================================

mod cli_handlers {
    use super::*;

    fn config(out: &Path) -> ImgforgeConfig {
        let mut config = ImgforgeConfig::default();
        let overrides = BuildOverrides {
            archs: vec![Architecture::X86_64, Architecture::Aarch64],
            output_dir: Some(out.to_path_buf()),
            sbom_formats: vec![SbomFormat::Spdx],
            source_date_epoch: Some(0),
            ..BuildOverrides::default()
        };
        overrides.apply(&mut config.build, |_| None).expect("apply");
        config
    }

    #[test]
    fn run_build_with_arch_template() {
        let work = tempfile::tempdir().expect("tempdir");
        let out = tempfile::tempdir().expect("tempdir");
        let template = format!("{}/{{arch}}", work.path().display());
        for (_, path) in resolve_rootfs(&template, &[Architecture::X86_64, Architecture::Aarch64]).expect("resolve rootfs") {
            fs::create_dir_all(&path).expect("create dir all");
            seed_tree(&path);
        }

        let summary = run_build(config(out.path()), &template).expect("run build");
        assert_eq!(summary.images.len(), 2);
        assert_eq!(summary.images[0].arch, Architecture::Aarch64);
        // Two per-arch documents and the index document
        assert_eq!(summary.sboms.len(), 3);
        assert!(summary.index_digest.is_some());
    }

    #[test]
    fn run_build_rejects_shared_rootfs_for_many_archs() {
        let work = tempfile::tempdir().expect("tempdir");
        let out = tempfile::tempdir().expect("tempdir");
        let rootfs = work.path().display().to_string();
        assert!(run_build(config(out.path()), &rootfs).is_err());
    }

    #[test]
    fn run_layer_writes_only_the_layer() {
        let root = tempfile::tempdir().expect("tempdir");
        let out = tempfile::tempdir().expect("tempdir");
        seed_tree(root.path());

        let mut config = ImgforgeConfig::default();
        config.build.output_dir = out.path().to_path_buf();
        config.build.source_date_epoch = Some(0);
        let layer = run_layer(config, Architecture::X86_64, root.path()).expect("run layer");

        assert!(layer.path.exists());
        assert!(!out.path().join(INDEX_MANIFEST_FILE).exists());
        assert!(!out.path().join("sbom-x86_64.spdx.json").exists());
    }
}
