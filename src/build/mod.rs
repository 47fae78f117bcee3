//! Build orchestration.
//!
//! [`BuildContext::build_image`] turns a configuration into a populated root
//! filesystem:
//!
//! ```text
//! Validate ─► InitDb ─► Bootstrap ──────────────► Fixate ─► PostInstall ──────────► Assertions
//!                       ├ keyring                           ├ scripts.tar           (all at once)
//!                       ├ repositories                      └ accounts
//!                       └ world
//!          ─► Emulation (optional) ─► SupervisionTree ─► Sbom (optional)
//! ```
//!
//! Phases never overlap. Operations inside Bootstrap and PostInstall run
//! concurrently and all finish before the first error is reported.

pub mod assertions;
pub mod context;
pub mod join;
pub mod phase;

use std::io;
use std::path::Path;

use anyhow::Context as _;

pub use assertions::{run_assertions, Assertion};
pub use context::{
    parse_source_date_epoch, source_date_epoch_from_env, BuildContext, BuildOptions,
    SOURCE_DATE_EPOCH_ENV,
};
pub use phase::Phase;

use join::{join_first_error, task, Task};

use crate::apk::scripts;
use crate::error::BuildError;
use crate::observer::BuildEvent;
use crate::sbom::{self, OsRelease, SbomOptions};
use crate::tarball::{self, LayerInfo};
use crate::{accounts, emulation, supervision};

impl BuildContext {
    /// Build the image filesystem in the working directory.
    ///
    /// On failure the working directory is left as it was when the failing
    /// phase stopped.
    pub fn build_image(&mut self) -> Result<(), BuildError> {
        self.begin(Phase::Validate);
        self.image_configuration.normalize();
        self.image_configuration.validate()?;
        self.image_configuration.summarize(self.observer());
        self.finish(Phase::Validate);

        let ctx: &BuildContext = self;
        let _lock = ctx.lock_work_dir()?;

        ctx.observer().on_event(&BuildEvent::BuildStarted {
            work_dir: ctx.work_dir().to_path_buf(),
        });

        ctx.begin(Phase::InitDb);
        ctx.run_op(Phase::InitDb, "create working directory", |c| {
            std::fs::create_dir_all(c.work_dir())
                .with_context(|| format!("creating {}", c.work_dir().display()))
        })?;
        ctx.run_op(Phase::InitDb, "initialize apk database", |c| {
            c.package_manager().init_db(c)
        })?;
        ctx.finish(Phase::InitDb);

        ctx.begin(Phase::Bootstrap);
        join_first_error(vec![
            ctx.op_task(Phase::Bootstrap, "initialize apk keyring", |c| {
                c.package_manager().init_keyring(c)
            }),
            ctx.op_task(Phase::Bootstrap, "initialize apk repositories", |c| {
                c.package_manager().init_repositories(c)
            }),
            ctx.op_task(Phase::Bootstrap, "initialize apk world", |c| {
                c.package_manager().init_world(c)
            }),
        ])?;
        ctx.finish(Phase::Bootstrap);

        ctx.begin(Phase::Fixate);
        ctx.run_op(Phase::Fixate, "fixate apk world", |c| {
            c.package_manager().fixate_world(c)
        })?;
        ctx.finish(Phase::Fixate);

        ctx.begin(Phase::PostInstall);
        join_first_error(vec![
            ctx.op_task(Phase::PostInstall, "normalize scripts.tar", |c| {
                scripts::normalize_scripts_tar(c.work_dir(), c.options.source_date_epoch)
            }),
            ctx.op_task(Phase::PostInstall, "mutate accounts", |c| {
                accounts::mutate_accounts(c.work_dir(), &c.image_configuration.accounts)
            }),
        ])?;
        ctx.finish(Phase::PostInstall);

        ctx.begin(Phase::Assertions);
        run_assertions(ctx, &ctx.assertions)?;
        ctx.finish(Phase::Assertions);

        if ctx.options.use_proot {
            ctx.begin(Phase::Emulation);
            ctx.run_op(
                Phase::Emulation,
                "install busybox symlinks",
                emulation::install_busybox_symlinks,
            )?;
            ctx.finish(Phase::Emulation);
        } else {
            ctx.skip(Phase::Emulation, "emulation not requested");
        }

        ctx.begin(Phase::SupervisionTree);
        ctx.run_op(Phase::SupervisionTree, "write supervision tree", |c| {
            supervision::write_supervision_tree(
                c.work_dir(),
                &c.image_configuration.entrypoint.services,
            )
        })?;
        ctx.finish(Phase::SupervisionTree);

        match ctx.options.sbom_path.as_deref() {
            Some(path) => {
                ctx.begin(Phase::Sbom);
                ctx.generate_sbom(path)?;
                ctx.finish(Phase::Sbom);
            }
            None => ctx.skip(Phase::Sbom, "no SBOM path configured"),
        }

        ctx.observer().on_event(&BuildEvent::BuildFinished {
            work_dir: ctx.work_dir().to_path_buf(),
        });
        Ok(())
    }

    /// Write the SBOM for the installed packages to `path`.
    pub fn generate_sbom(&self, path: &Path) -> Result<(), BuildError> {
        let packages = self.run_op_value(Phase::Sbom, "read installed packages", |c| {
            c.package_manager().installed_packages(c)
        })?;
        let os = self.run_op_value(Phase::Sbom, "read os-release", |c| {
            OsRelease::read(c.work_dir())
        })?;

        sbom::generate(&SbomOptions { os, packages }, path)?;
        self.observer().on_event(&BuildEvent::SbomWritten {
            path: path.to_path_buf(),
        });
        Ok(())
    }

    /// Archive the working directory as a reproducible gzip'd tar layer.
    ///
    /// The layer is staged next to `output` and renamed into place once
    /// complete.
    pub fn write_layer(&self, output: &Path) -> Result<LayerInfo, BuildError> {
        tarball::write_layer(self.work_dir(), output, self.options.source_date_epoch)
            .map_err(BuildError::Archive)
    }

    /// Write the archive of the working directory to any sink.
    pub fn write_archive<W: io::Write>(&self, out: W) -> Result<W, BuildError> {
        let source = tarball::DirSource::new(self.work_dir());
        tarball::write_archive(&source, out, self.options.source_date_epoch)
            .map_err(BuildError::Archive)
    }

    fn run_op<F>(&self, phase: Phase, operation: &'static str, f: F) -> Result<(), BuildError>
    where
        F: FnOnce(&BuildContext) -> anyhow::Result<()>,
    {
        self.run_op_value(phase, operation, f)
    }

    fn run_op_value<T, F>(&self, phase: Phase, operation: &'static str, f: F) -> Result<T, BuildError>
    where
        F: FnOnce(&BuildContext) -> anyhow::Result<T>,
    {
        f(self).map_err(|source| BuildError::Operation {
            phase,
            operation,
            source,
        })
    }

    fn op_task<'a, F>(&'a self, phase: Phase, operation: &'static str, f: F) -> Task<'a, BuildError>
    where
        F: FnOnce(&BuildContext) -> anyhow::Result<()> + Send + 'a,
    {
        task(move || self.run_op(phase, operation, f))
    }

    fn begin(&self, phase: Phase) {
        self.observer().on_event(&BuildEvent::PhaseStarted(phase));
    }

    fn finish(&self, phase: Phase) {
        self.observer().on_event(&BuildEvent::PhaseFinished(phase));
    }

    fn skip(&self, phase: Phase, reason: &str) {
        self.observer().on_event(&BuildEvent::PhaseSkipped {
            phase,
            reason: reason.to_string(),
        });
    }
}


#[cfg(test)]
mod tests {
    use super::testing::test_context;
    use super::*;
    use crate::observer::RecordingObserver;
    use std::sync::Arc;

    #[test]
    fn test_noop_build_runs_every_mandatory_phase() {
        let (_temp, ctx) = test_context();
        let observer = Arc::new(RecordingObserver::default());
        let mut ctx = ctx.with_observer(observer.clone());

        ctx.build_image().unwrap();

        assert_eq!(
            observer.started_phases(),
            [
                Phase::Validate,
                Phase::InitDb,
                Phase::Bootstrap,
                Phase::Fixate,
                Phase::PostInstall,
                Phase::Assertions,
                Phase::SupervisionTree,
            ]
        );
        assert!(ctx.work_dir().join("sv").is_dir());
    }

    #[test]
    fn test_invalid_configuration_stops_before_filesystem_work() {
        let (temp, ctx) = test_context();
        std::fs::remove_dir_all(ctx.work_dir()).unwrap();

        let mut ctx = ctx;
        ctx.image_configuration
            .accounts
            .users
            .push(crate::config::User {
                username: "root".into(),
                uid: 0,
                gid: 0,
            });

        let err = ctx.build_image().unwrap_err();
        assert!(matches!(err, BuildError::Configuration(_)));
        assert_eq!(err.phase(), Some(Phase::Validate));
        assert!(!ctx.work_dir().exists());
        assert!(!temp.path().join("rootfs.lock").exists());
    }
}
