#![no_main]
use imgforge::apk::{parse_installed, render_installed};
use libfuzzer_sys::fuzz_target;

/// Fuzz the installed package database parser.
///
/// Anything that parses must render to text that parses to the same records.
fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(packages) = parse_installed(s) {
            let rendered = render_installed(&packages);
            let reparsed = parse_installed(&rendered).expect("rendered database must parse");
            assert_eq!(reparsed.len(), packages.len());
        }
    }
});
