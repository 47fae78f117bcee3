//! CPU architectures an image can target.
//!
//! Two naming schemes meet here: apk's (`x86_64`, `aarch64`, `armhf`) and the
//! OCI platform one (`amd64`, `arm64`, `arm/v6`). [`Architecture`] always
//! holds the OCI-style name; apk names are accepted on input and produced by
//! [`Architecture::to_apk`].

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A normalized CPU architecture tag.
///
/// Equality, ordering and hashing all go through [`Architecture::as_str`],
/// so a hand-built `Other("amd64")` is the same architecture as `Amd64`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Architecture {
    I386,
    Amd64,
    Arm64,
    ArmV6,
    ArmV7,
    Ppc64le,
    Riscv64,
    S390x,
    /// Anything not in the standard set, kept verbatim.
    Other(String),
}

/// The standard set used when a configuration names no architectures.
const ALL: [Architecture; 8] = [
    Architecture::I386,
    Architecture::Amd64,
    Architecture::Arm64,
    Architecture::ArmV6,
    Architecture::ArmV7,
    Architecture::Ppc64le,
    Architecture::Riscv64,
    Architecture::S390x,
];

impl Architecture {
    /// Every supported architecture, sorted.
    pub fn all() -> Vec<Architecture> {
        let mut archs = ALL.to_vec();
        archs.sort();
        archs
    }

    /// Parse one name, accepting either naming scheme.
    pub fn parse(s: &str) -> Architecture {
        match s {
            "386" | "x86" => Architecture::I386,
            "amd64" | "x86_64" => Architecture::Amd64,
            "arm64" | "aarch64" => Architecture::Arm64,
            "arm/v6" | "armhf" => Architecture::ArmV6,
            "arm/v7" | "armv7" => Architecture::ArmV7,
            "ppc64le" => Architecture::Ppc64le,
            "riscv64" => Architecture::Riscv64,
            "s390x" => Architecture::S390x,
            other => Architecture::Other(other.to_string()),
        }
    }

    /// OCI-style name (`amd64`, `arm/v7`, ...).
    pub fn as_str(&self) -> &str {
        match self {
            Architecture::I386 => "386",
            Architecture::Amd64 => "amd64",
            Architecture::Arm64 => "arm64",
            Architecture::ArmV6 => "arm/v6",
            Architecture::ArmV7 => "arm/v7",
            Architecture::Ppc64le => "ppc64le",
            Architecture::Riscv64 => "riscv64",
            Architecture::S390x => "s390x",
            Architecture::Other(s) => s,
        }
    }

    /// apk-style name for this architecture.
    pub fn to_apk(&self) -> &str {
        match self {
            Architecture::I386 => "x86",
            Architecture::Amd64 => "x86_64",
            Architecture::Arm64 => "aarch64",
            Architecture::ArmV6 => "armhf",
            Architecture::ArmV7 => "armv7",
            other => other.as_str(),
        }
    }

    /// The OCI platform triple for a linux image of this architecture.
    pub fn to_oci_platform(&self) -> Platform {
        let (architecture, variant) = match self {
            Architecture::ArmV6 => ("arm", Some("v6")),
            Architecture::ArmV7 => ("arm", Some("v7")),
            other => (other.as_str(), None),
        };
        Platform {
            os: "linux".to_string(),
            architecture: architecture.to_string(),
            variant: variant.map(str::to_string),
        }
    }

    /// Suffix of the qemu user-mode emulator for this architecture
    /// (`qemu-<suffix>`).
    pub fn to_qemu(&self) -> &str {
        match self {
            Architecture::I386 => "i386",
            Architecture::Amd64 => "x86_64",
            Architecture::Arm64 => "aarch64",
            Architecture::ArmV6 | Architecture::ArmV7 => "arm",
            other => other.as_str(),
        }
    }

    /// Architecture of the machine running the build, if it is one we know.
    pub fn host() -> Option<Architecture> {
        match Architecture::parse(std::env::consts::ARCH) {
            Architecture::Other(_) => None,
            arch => Some(arch),
        }
    }
}

impl PartialEq for Architecture {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for Architecture {}

impl Hash for Architecture {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl Ord for Architecture {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl PartialOrd for Architecture {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Architecture {
    fn from(s: &str) -> Self {
        Architecture::parse(s)
    }
}

impl From<String> for Architecture {
    fn from(s: String) -> Self {
        Architecture::parse(&s)
    }
}

impl From<Architecture> for String {
    fn from(arch: Architecture) -> Self {
        arch.as_str().to_string()
    }
}

/// OS / architecture / variant triple used by image platform descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

/// Parse raw architecture names into canonical, deduplicated, sorted values.
///
/// The result depends only on the set of names given, never on their order.
pub fn parse_architectures<S: AsRef<str>>(raw: &[S]) -> Vec<Architecture> {
    raw.iter()
        .map(|s| Architecture::parse(s.as_ref()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
