//! Target architectures.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A target CPU architecture.
///
/// The canonical string form is the APK architecture name. That form is what
/// SBOM file names use and what every architecture-ordered collection sorts
/// on, so `aarch64 < riscv64 < x86_64` regardless of OCI naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Architecture {
    X86_64,
    Aarch64,
    Armv7,
    Armhf,
    Ppc64le,
    S390x,
    Riscv64,
    X86,
    Loongarch64,
}

impl Architecture {
    /// All known architectures, in canonical order.
    pub const ALL: [Self; 9] = [
        Self::Aarch64,
        Self::Armhf,
        Self::Armv7,
        Self::Loongarch64,
        Self::Ppc64le,
        Self::Riscv64,
        Self::S390x,
        Self::X86,
        Self::X86_64,
    ];

    /// APK architecture name (the canonical form)
    #[must_use]
    pub const fn to_apk(&self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::Aarch64 => "aarch64",
            Self::Armv7 => "armv7",
            Self::Armhf => "armhf",
            Self::Ppc64le => "ppc64le",
            Self::S390x => "s390x",
            Self::Riscv64 => "riscv64",
            Self::X86 => "x86",
            Self::Loongarch64 => "loongarch64",
        }
    }

    /// OCI `architecture` field
    #[must_use]
    pub const fn oci_arch(&self) -> &'static str {
        match self {
            Self::X86_64 => "amd64",
            Self::Aarch64 => "arm64",
            Self::Armv7 | Self::Armhf => "arm",
            Self::Ppc64le => "ppc64le",
            Self::S390x => "s390x",
            Self::Riscv64 => "riscv64",
            Self::X86 => "386",
            Self::Loongarch64 => "loong64",
        }
    }

    /// OCI `variant` field, when the architecture has one
    #[must_use]
    pub const fn oci_variant(&self) -> Option<&'static str> {
        match self {
            Self::Armv7 => Some("v7"),
            Self::Armhf => Some("v6"),
            Self::Aarch64 => Some("v8"),
            _ => None,
        }
    }

    /// Sort a set of architectures by canonical string, the order every
    /// aggregated artifact is emitted in.
    pub fn sort_canonical(archs: &mut [Self]) {
        archs.sort_by(|a, b| a.to_apk().cmp(b.to_apk()));
    }
}

impl PartialOrd for Architecture {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Architecture {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_apk().cmp(other.to_apk())
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_apk())
    }
}

impl FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "x86_64" | "amd64" => Ok(Self::X86_64),
            "aarch64" | "arm64" | "arm64/v8" => Ok(Self::Aarch64),
            "armv7" | "arm/v7" => Ok(Self::Armv7),
            "armhf" | "arm/v6" => Ok(Self::Armhf),
            "ppc64le" => Ok(Self::Ppc64le),
            "s390x" => Ok(Self::S390x),
            "riscv64" => Ok(Self::Riscv64),
            "x86" | "386" | "i386" => Ok(Self::X86),
            "loongarch64" | "loong64" => Ok(Self::Loongarch64),
            other => Err(format!("unknown architecture '{other}'")),
        }
    }
}

impl TryFrom<String> for Architecture {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Architecture> for String {
    fn from(arch: Architecture) -> Self {
        arch.to_string()
    }
}

impl clap::ValueEnum for Architecture {
    fn value_variants<'a>() -> &'a [Self] {
        &Self::ALL
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        let value = clap::builder::PossibleValue::new(self.to_apk());
        // "arm" is ambiguous between armv7 and armhf
        Some(match self {
            Self::X86_64 | Self::Aarch64 | Self::X86 | Self::Loongarch64 => {
                value.alias(self.oci_arch())
            }
            _ => value,
        })
    }
}
