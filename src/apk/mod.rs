//! apk package manager integration.
//!
//! The build core only needs a handful of idempotent operations from the
//! package manager, expressed by [`PackageManager`]. [`ApkCli`] implements
//! them by writing apk's configuration files and driving the host `apk`
//! binary.

pub mod cli;
pub mod installed;
pub mod scripts;

use anyhow::Result;

use crate::build::BuildContext;

pub use cli::ApkCli;
pub use installed::{parse_installed, read_installed, Package, INSTALLED_DB};

/// Package manager operations on a build's working directory.
///
/// Implementations must be safe to call from several threads at once: the
/// keyring, repositories and world operations run concurrently and each
/// touches its own files.
pub trait PackageManager: Send + Sync {
    /// Create the package database. Runs before everything else.
    fn init_db(&self, ctx: &BuildContext) -> Result<()>;

    /// Install the configured signing keys.
    fn init_keyring(&self, ctx: &BuildContext) -> Result<()>;

    /// Write the repository list.
    fn init_repositories(&self, ctx: &BuildContext) -> Result<()>;

    /// Write the desired top-level package set.
    fn init_world(&self, ctx: &BuildContext) -> Result<()>;

    /// Install and remove packages until the installed set matches the world.
    fn fixate_world(&self, ctx: &BuildContext) -> Result<()>;

    /// Run a command with the working directory as its root filesystem.
    fn execute_in_root(&self, ctx: &BuildContext, args: &[&str]) -> Result<()>;

    /// Packages currently installed in the working directory.
    fn installed_packages(&self, ctx: &BuildContext) -> Result<Vec<Package>> {
        read_installed(ctx.work_dir())
    }
}
