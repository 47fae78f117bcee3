//! Build phases, in execution order.

use std::fmt;

/// A step of [`BuildContext::build_image`](super::BuildContext::build_image).
///
/// Phases run strictly in declaration order. Only operations inside one
/// phase run concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Phase {
    /// Normalize and validate the configuration. No filesystem work yet.
    Validate = 1,
    /// Create the apk database. Everything after depends on it.
    InitDb = 2,
    /// Keyring, repositories and world, concurrently.
    Bootstrap = 3,
    /// Make installed packages match the world.
    Fixate = 4,
    /// Scripts archive normalization and account mutation, concurrently.
    PostInstall = 5,
    /// Post-build invariant checks.
    Assertions = 6,
    /// Busybox symlinks through the emulation layer, when requested.
    Emulation = 7,
    /// Service supervision layout.
    SupervisionTree = 8,
    /// Software bill of materials, when an output path is set.
    Sbom = 9,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Validate => write!(f, "Validate"),
            Phase::InitDb => write!(f, "InitDb"),
            Phase::Bootstrap => write!(f, "Bootstrap"),
            Phase::Fixate => write!(f, "Fixate"),
            Phase::PostInstall => write!(f, "PostInstall"),
            Phase::Assertions => write!(f, "Assertions"),
            Phase::Emulation => write!(f, "Emulation"),
            Phase::SupervisionTree => write!(f, "SupervisionTree"),
            Phase::Sbom => write!(f, "Sbom"),
        }
    }
}
