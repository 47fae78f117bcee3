//! Build context: configuration, options and collaborators for one build.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use fs2::FileExt;
use time::OffsetDateTime;

use super::assertions::Assertion;
use crate::apk::PackageManager;
use crate::config::{Architecture, ImageConfiguration};
use crate::error::BuildError;
use crate::observer::{BuildObserver, TracingObserver};

/// Environment variable holding the reproducible timestamp, in seconds.
pub const SOURCE_DATE_EPOCH_ENV: &str = "SOURCE_DATE_EPOCH";

/// Knobs that are not part of the image description itself.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Root of the filesystem being built.
    pub work_dir: PathBuf,
    /// Where to write the SBOM; `None` skips it.
    pub sbom_path: Option<PathBuf>,
    /// Timestamp stamped on every archive entry.
    pub source_date_epoch: OffsetDateTime,
    /// Architecture of the filesystem being built.
    pub arch: Architecture,
    /// Run in-image commands through proot (and qemu for foreign arches).
    pub use_proot: bool,
}

impl BuildOptions {
    /// Options for a native build in `work_dir` with epoch 0.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            sbom_path: None,
            source_date_epoch: OffsetDateTime::UNIX_EPOCH,
            arch: Architecture::host().unwrap_or(Architecture::Amd64),
            use_proot: false,
        }
    }
}

/// Parse `SOURCE_DATE_EPOCH`, falling back to the Unix epoch when unset.
pub fn source_date_epoch_from_env() -> Result<OffsetDateTime> {
    match std::env::var(SOURCE_DATE_EPOCH_ENV) {
        Ok(value) if !value.trim().is_empty() => parse_source_date_epoch(&value),
        _ => Ok(OffsetDateTime::UNIX_EPOCH),
    }
}

/// Parse a decimal seconds-since-epoch value.
pub fn parse_source_date_epoch(value: &str) -> Result<OffsetDateTime> {
    let secs: i64 = value
        .trim()
        .parse()
        .with_context(|| format!("invalid {SOURCE_DATE_EPOCH_ENV} value '{value}'"))?;
    OffsetDateTime::from_unix_timestamp(secs)
        .with_context(|| format!("{SOURCE_DATE_EPOCH_ENV} out of range: {secs}"))
}

/// Mutable state of one image build.
///
/// The context owns everything under `options.work_dir` while a build runs;
/// concurrent operations inside a phase touch disjoint parts of that tree.
pub struct BuildContext {
    pub image_configuration: ImageConfiguration,
    pub options: BuildOptions,
    pub assertions: Vec<Assertion>,
    package_manager: Box<dyn PackageManager>,
    observer: Arc<dyn BuildObserver>,
}

impl BuildContext {
    pub fn new(
        image_configuration: ImageConfiguration,
        options: BuildOptions,
        package_manager: Box<dyn PackageManager>,
    ) -> Self {
        Self {
            image_configuration,
            options,
            assertions: Vec::new(),
            package_manager,
            observer: Arc::new(TracingObserver),
        }
    }

    /// Replace the default `tracing` observer.
    pub fn with_observer(mut self, observer: Arc<dyn BuildObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_assertion(mut self, assertion: Assertion) -> Self {
        self.assertions.push(assertion);
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.options.work_dir
    }

    pub fn observer(&self) -> &dyn BuildObserver {
        self.observer.as_ref()
    }

    pub fn package_manager(&self) -> &dyn PackageManager {
        self.package_manager.as_ref()
    }

    /// Run a command inside the image root.
    pub fn execute_in_root(&self, args: &[&str]) -> Result<()> {
        self.package_manager.execute_in_root(self, args)
    }

    /// Path of the lock file guarding the working directory.
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self
            .options
            .work_dir
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "rootfs".into());
        name.push(".lock");
        match self.options.work_dir.parent() {
            Some(parent) => parent.join(name),
            None => PathBuf::from(name),
        }
    }

    /// Take an exclusive lock on the working directory.
    ///
    /// The lock file lives next to the working directory so it never ends
    /// up in the image.
    pub(crate) fn lock_work_dir(&self) -> Result<WorkDirLock, BuildError> {
        let path = self.lock_path();
        let locked = |source| BuildError::Locked {
            path: self.options.work_dir.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(locked)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(locked)?;
        file.try_lock_exclusive().map_err(locked)?;

        Ok(WorkDirLock { _file: file })
    }
}

/// Held for the duration of a build; released on drop.
pub(crate) struct WorkDirLock {
    _file: File,
}
