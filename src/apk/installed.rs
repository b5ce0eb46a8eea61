//! The APK installed database (`lib/apk/db/installed`).
//!
//! Records are blocks of `K:value` lines separated by blank lines. File
//! lines (`R:`) belong to the most recent directory line (`F:`); `M:` and
//! `a:` carry `uid:gid:mode` for the preceding directory or file.

use std::fmt::Write as _;

use crate::model::{InstalledDir, InstalledFile, InstalledPackage, Ownership};

/// Path of the database inside a tree.
pub const INSTALLED_DB_PATH: &str = "lib/apk/db/installed";

/// Path of the world file inside a tree.
pub const WORLD_PATH: &str = "etc/apk/world";

fn parse_acl(value: &str) -> Result<Ownership, String> {
    let mut parts = value.splitn(3, ':');
    let (Some(uid), Some(gid), Some(mode)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(format!("malformed ownership '{value}'"));
    };
    Ok(Ownership {
        uid: uid.parse().map_err(|_| format!("bad uid in '{value}'"))?,
        gid: gid.parse().map_err(|_| format!("bad gid in '{value}'"))?,
        mode: u32::from_str_radix(mode, 8).map_err(|_| format!("bad mode in '{value}'"))?,
    })
}

fn join(dir: Option<&str>, name: &str) -> String {
    match dir {
        Some(d) if !d.is_empty() => format!("{d}/{name}"),
        _ => name.to_string(),
    }
}

fn finish_record(pkg: InstalledPackage, lineno: usize, out: &mut Vec<InstalledPackage>) -> Result<(), String> {
    if pkg.name.is_empty() || pkg.version.is_empty() {
        return Err(format!(
            "record ending at line {lineno} is missing a name or version"
        ));
    }
    out.push(pkg);
    Ok(())
}

/// Parse installed database content.
pub fn parse_installed(content: &str) -> Result<Vec<InstalledPackage>, String> {
    let mut packages = Vec::new();
    let mut current: Option<InstalledPackage> = None;
    let mut dir: Option<String> = None;

    for (idx, line) in content.lines().enumerate() {
        let lineno = idx + 1;
        if line.trim().is_empty() {
            if let Some(pkg) = current.take() {
                finish_record(pkg, lineno, &mut packages)?;
            }
            dir = None;
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            return Err(format!("line {lineno}: expected K:value"));
        };
        if key.len() != 1 {
            return Err(format!("line {lineno}: invalid field key '{key}'"));
        }
        let pkg = current.get_or_insert_with(InstalledPackage::default);
        match key {
            "P" => pkg.name = value.to_string(),
            "V" => pkg.version = value.to_string(),
            "A" => pkg.arch = Some(value.to_string()),
            "L" => pkg.license = Some(value.to_string()),
            "o" => pkg.origin = Some(value.to_string()),
            "m" => pkg.maintainer = Some(value.to_string()),
            "T" => pkg.description = Some(value.to_string()),
            "U" => pkg.url = Some(value.to_string()),
            "c" => pkg.commit = Some(value.to_string()),
            "C" => pkg.checksum = Some(value.to_string()),
            "t" => {
                pkg.build_time = Some(
                    value
                        .parse()
                        .map_err(|_| format!("line {lineno}: bad build time '{value}'"))?,
                );
            }
            "S" => pkg.size = value.parse().ok(),
            "I" => pkg.installed_size = value.parse().ok(),
            "D" => pkg
                .dependencies
                .extend(value.split_whitespace().map(str::to_string)),
            "p" => pkg
                .provides
                .extend(value.split_whitespace().map(str::to_string)),
            "F" => {
                dir = Some(value.to_string());
                pkg.dirs.push(InstalledDir {
                    path: value.to_string(),
                    ownership: None,
                });
            }
            "M" => {
                let acl = parse_acl(value).map_err(|e| format!("line {lineno}: {e}"))?;
                match pkg.dirs.last_mut() {
                    Some(d) => d.ownership = Some(acl),
                    None => return Err(format!("line {lineno}: M: without F:")),
                }
            }
            "R" => pkg.files.push(InstalledFile {
                path: join(dir.as_deref(), value),
                ownership: None,
                checksum: None,
            }),
            "a" => {
                let acl = parse_acl(value).map_err(|e| format!("line {lineno}: {e}"))?;
                match pkg.files.last_mut() {
                    Some(f) => f.ownership = Some(acl),
                    None => return Err(format!("line {lineno}: a: without R:")),
                }
            }
            "Z" => match pkg.files.last_mut() {
                Some(f) => f.checksum = Some(value.to_string()),
                None => return Err(format!("line {lineno}: Z: without R:")),
            },
            // Fields this crate does not use
            _ => {}
        }
    }
    if let Some(pkg) = current.take() {
        finish_record(pkg, content.lines().count(), &mut packages)?;
    }
    Ok(packages)
}

/// Render packages in installed database syntax.
#[must_use]
pub fn render_installed(packages: &[InstalledPackage]) -> String {
    let mut out = String::new();
    for pkg in packages {
        let _ = writeln!(out, "P:{}", pkg.name);
        let _ = writeln!(out, "V:{}", pkg.version);
        let optional = [
            ("A", &pkg.arch),
            ("L", &pkg.license),
            ("o", &pkg.origin),
            ("m", &pkg.maintainer),
            ("T", &pkg.description),
            ("U", &pkg.url),
            ("c", &pkg.commit),
            ("C", &pkg.checksum),
        ];
        for (key, value) in optional {
            if let Some(v) = value {
                let _ = writeln!(out, "{key}:{v}");
            }
        }
        if let Some(t) = pkg.build_time {
            let _ = writeln!(out, "t:{t}");
        }
        if let Some(s) = pkg.size {
            let _ = writeln!(out, "S:{s}");
        }
        if let Some(i) = pkg.installed_size {
            let _ = writeln!(out, "I:{i}");
        }
        if !pkg.dependencies.is_empty() {
            let _ = writeln!(out, "D:{}", pkg.dependencies.join(" "));
        }
        if !pkg.provides.is_empty() {
            let _ = writeln!(out, "p:{}", pkg.provides.join(" "));
        }

        for d in &pkg.dirs {
            let _ = writeln!(out, "F:{}", d.path);
            if let Some(o) = d.ownership {
                let _ = writeln!(out, "M:{}:{}:{:o}", o.uid, o.gid, o.mode);
            }
            let prefix = format!("{}/", d.path);
            for f in pkg.files.iter().filter(|f| {
                f.path
                    .strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.contains('/'))
            }) {
                let _ = writeln!(out, "R:{}", &f.path[prefix.len()..]);
                if let Some(o) = f.ownership {
                    let _ = writeln!(out, "a:{}:{}:{:o}", o.uid, o.gid, o.mode);
                }
                if let Some(z) = &f.checksum {
                    let _ = writeln!(out, "Z:{z}");
                }
            }
        }
        out.push('\n');
    }
    out
}
