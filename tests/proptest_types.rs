//! Property-based tests for core model types and parsers.
//!
//! Ensures parsers handle arbitrary input without panicking,
//! and that key invariants hold across random inputs.

use proptest::prelude::*;
use imgforge::apk::parse_installed;
use imgforge::model::{Architecture, Digest, OsRelease, TagReference};
use imgforge::sbom::{is_valid_expression, Purl};
use imgforge::tree::normalize;
use imgforge::utils::{upstream_version, version_stems};

fn arch() -> impl Strategy<Value = Architecture> {
    prop::sample::select(Architecture::ALL.to_vec())
}

proptest! {
    // 500 cases balances coverage vs speed. Parser tests only assert
    // no-panic since random input is expected to produce Err almost always.
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn parse_installed_doesnt_panic(s in "\\PC{0,2000}") {
        let _ = parse_installed(&s);
    }

    #[test]
    fn installed_db_like_input_doesnt_panic(
        s in prop::string::string_regex(r"([PVLFRMaZtD]:[ -~]{0,40}\n){0,30}").expect("string regex")
    ) {
        let _ = parse_installed(&s);
    }

    #[test]
    fn os_release_parse_doesnt_panic(s in "\\PC{0,1000}") {
        let _ = OsRelease::parse(&s);
    }

    #[test]
    fn os_release_render_reparses(
        id in "[a-z]{1,12}",
        version in "[0-9]{1,2}(\\.[0-9]{1,2}){0,2}",
        name in "[A-Za-z ]{1,20}",
    ) {
        let release = OsRelease::from_pairs([
            ("ID", id.clone()),
            ("NAME", name.clone()),
            ("VERSION_ID", version.clone()),
        ]);
        let parsed = OsRelease::parse(&release.render()).expect("parse");
        prop_assert_eq!(parsed.id(), id.as_str());
        prop_assert_eq!(parsed.name(), name.as_str());
        prop_assert_eq!(parsed.version_id(), version.as_str());
    }

    #[test]
    fn tag_reference_parse_doesnt_panic(s in "\\PC{0,200}") {
        let _ = TagReference::parse(&s);
    }

    #[test]
    fn normalized_paths_never_escape(s in "[a-z./]{0,60}") {
        if let Ok(rel) = normalize(&s) {
            prop_assert!(!rel.starts_with('/'));
            prop_assert!(rel.split('/').all(|c| c != ".." && c != "."));
        }
    }

    #[test]
    fn license_validation_doesnt_panic(s in "\\PC{0,200}") {
        let _ = is_valid_expression(&s);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn architecture_names_roundtrip(arch in arch()) {
        prop_assert_eq!(arch.to_apk().parse::<Architecture>(), Ok(arch));
    }

    #[test]
    fn architecture_order_follows_apk_names(a in arch(), b in arch()) {
        prop_assert_eq!(a.cmp(&b), a.to_apk().cmp(b.to_apk()));
    }

    #[test]
    fn digest_is_lowercase_hex(data in prop::collection::vec(any::<u8>(), 0..256)) {
        let digest = Digest::of(&data);
        prop_assert_eq!(digest.hex().len(), 64);
        prop_assert!(digest.hex().bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)));
        prop_assert_eq!(digest.to_string(), format!("sha256:{}", digest.hex()));
    }

    #[test]
    fn version_stems_are_prefixes(
        version in "[0-9]{1,3}(\\.[0-9]{1,3}){0,3}(-r[0-9]{1,2})?"
    ) {
        let stems = version_stems(&version);
        prop_assert_eq!(stems.first().map(String::as_str), Some(version.as_str()));
        let upstream = upstream_version(&version);
        for stem in &stems[1..] {
            prop_assert!(upstream.starts_with(stem.as_str()), "{} is not a prefix of {}", stem, upstream);
        }
    }

    #[test]
    fn purl_components_are_encoded(
        name in "\\PC{1,30}",
        version in "\\PC{0,20}",
    ) {
        let purl = Purl::new("apk", name).version(version).to_string();
        prop_assert!(purl.starts_with("pkg:apk/"));
        let tail = &purl["pkg:apk/".len()..];
        // Only the structural separators survive unencoded
        prop_assert!(tail.chars().all(|c| c.is_ascii_alphanumeric() || "-._~%@".contains(c)), "{}", purl);
        prop_assert!(tail.matches('@').count() <= 1);
    }
}
