//! Error types returned by the build core.
//!
//! Collaborators (package manager, filesystem helpers, host commands) speak
//! `anyhow`; everything the core hands back to a caller is one of the typed
//! errors below so callers can tell a bad manifest from a failed install.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::build::Phase;

/// A manifest that could not be read, decoded, or that violates an invariant.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read image configuration file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse image configuration")]
    Parse {
        path: Option<PathBuf>,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("configured user {user} {reason}")]
    InvalidUser { user: String, reason: &'static str },

    #[error("configured group {group} {reason}")]
    InvalidGroup { group: String, reason: &'static str },
}

/// Failures writing the software bill of materials.
#[derive(Error, Debug)]
pub enum SbomError {
    #[error("opening SBOM path {path:?} for writing")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("encoding BOM")]
    Encode(#[source] serde_json::Error),

    #[error("writing SBOM to {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Every failed post-build assertion, in completion order.
///
/// Nothing is dropped: `len()` is exactly the number of assertions that
/// returned an error.
#[derive(Debug, Default)]
pub struct AssertionFailures {
    errors: Vec<anyhow::Error>,
}

impl AssertionFailures {
    pub fn new(errors: Vec<anyhow::Error>) -> Self {
        Self { errors }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[anyhow::Error] {
        &self.errors
    }

    /// Rendered message of each failure, including its context chain.
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| format!("{e:#}")).collect()
    }
}

impl fmt::Display for AssertionFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} assertion(s) failed:", self.errors.len())?;
        for err in &self.errors {
            write!(f, "\n  * {err:#}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AssertionFailures {}

/// A failed build, identifying the phase that stopped it.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("failed to validate configuration")]
    Configuration(#[from] ConfigError),

    #[error("{phase} phase: failed to {operation}")]
    Operation {
        phase: Phase,
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Assertions(#[from] AssertionFailures),

    #[error("failed to generate SBOM")]
    Sbom(#[from] SbomError),

    #[error("writing TAR archive failed")]
    Archive(#[source] std::io::Error),

    #[error("working directory {path:?} is locked by another build")]
    Locked {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    /// The phase the build stopped in.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            BuildError::Configuration(_) => Some(Phase::Validate),
            BuildError::Operation { phase, .. } => Some(*phase),
            BuildError::Assertions(_) => Some(Phase::Assertions),
            BuildError::Sbom(_) => Some(Phase::Sbom),
            BuildError::Archive(_) | BuildError::Locked { .. } => None,
        }
    }
}
