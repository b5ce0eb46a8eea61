#![no_main]
use imgforge::model::OsRelease;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(release) = OsRelease::parse(s) {
            let _ = release.id();
            let _ = release.version_id();
            let _ = OsRelease::parse(&release.render());
        }
    }
});
