//! [`PackageManager`] backed by the host `apk` binary.
//!
//! Configuration files (`etc/apk/{arch,keys,repositories,world}`) are
//! written directly; only resolution and installation go through `apk`
//! itself, always with `--root` pointing at the working directory.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::PackageManager;
use crate::build::BuildContext;
use crate::config::Architecture;
use crate::process::Cmd;

/// Drives `apk` (and `proot` for in-image commands).
#[derive(Debug, Clone)]
pub struct ApkCli {
    apk: PathBuf,
    proot: Option<PathBuf>,
}

impl ApkCli {
    /// Locate `apk` and, if present, `proot` on `PATH`.
    pub fn new() -> Result<Self> {
        let apk = which::which("apk").context(
            "apk not found in PATH. Install apk-tools (apk-tools-static works on non-Alpine hosts).",
        )?;
        Ok(Self {
            apk,
            proot: which::which("proot").ok(),
        })
    }

    /// Use a specific `apk` binary.
    pub fn with_binary(apk: impl Into<PathBuf>) -> Self {
        Self {
            apk: apk.into(),
            proot: None,
        }
    }

    /// Use a specific `proot` binary for in-image commands.
    pub fn with_proot(mut self, proot: impl Into<PathBuf>) -> Self {
        self.proot = Some(proot.into());
        self
    }

    fn apk(&self, ctx: &BuildContext) -> Cmd {
        Cmd::new(&self.apk)
            .arg("--root")
            .arg_path(ctx.work_dir())
            .args(["--arch", ctx.options.arch.to_apk()])
            .arg("--no-interactive")
    }
}

fn apk_dir(ctx: &BuildContext) -> Result<PathBuf> {
    let dir = ctx.work_dir().join("etc/apk");
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    Ok(dir)
}

fn write_lines(path: &Path, lines: &[String]) -> Result<()> {
    let mut content = lines.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

fn is_remote(reference: &str) -> bool {
    reference.starts_with("http://") || reference.starts_with("https://")
}

impl PackageManager for ApkCli {
    fn init_db(&self, ctx: &BuildContext) -> Result<()> {
        let dir = apk_dir(ctx)?;
        fs::write(dir.join("arch"), format!("{}\n", ctx.options.arch.to_apk()))
            .context("Failed to write etc/apk/arch")?;

        self.apk(ctx)
            .args(["add", "--initdb"])
            .error_msg("apk database initialization failed")
            .run()?;
        tracing::info!(arch = %ctx.options.arch, "initialized apk database");
        Ok(())
    }

    fn init_keyring(&self, ctx: &BuildContext) -> Result<()> {
        let keys_dir = apk_dir(ctx)?.join("keys");
        fs::create_dir_all(&keys_dir)
            .with_context(|| format!("Failed to create keys directory: {}", keys_dir.display()))?;

        let keyring = &ctx.image_configuration.contents.keyring;
        for reference in keyring {
            if is_remote(reference) {
                bail!(
                    "remote keyring {} is not supported; download it and reference the local file",
                    reference
                );
            }

            let source = Path::new(reference);
            let Some(filename) = source.file_name() else {
                bail!("keyring entry '{}' does not name a file", reference);
            };
            let content = fs::read_to_string(source)
                .with_context(|| format!("Failed to read key file: {}", source.display()))?;
            if !content.contains("BEGIN PUBLIC KEY") {
                bail!(
                    "Key file {} does not contain valid PEM format",
                    source.display()
                );
            }

            let key_path = keys_dir.join(filename);
            fs::write(&key_path, content)
                .with_context(|| format!("Failed to write key file: {}", key_path.display()))?;
        }

        tracing::info!(keys = keyring.len(), "installed signing keys");
        Ok(())
    }

    fn init_repositories(&self, ctx: &BuildContext) -> Result<()> {
        let repos = &ctx.image_configuration.contents.repositories;
        write_lines(&apk_dir(ctx)?.join("repositories"), repos)?;
        tracing::info!(repositories = repos.len(), "wrote repository list");
        Ok(())
    }

    fn init_world(&self, ctx: &BuildContext) -> Result<()> {
        let packages = &ctx.image_configuration.contents.packages;
        write_lines(&apk_dir(ctx)?.join("world"), packages)?;
        tracing::info!(packages = packages.len(), "wrote world");
        Ok(())
    }

    fn fixate_world(&self, ctx: &BuildContext) -> Result<()> {
        let packages = &ctx.image_configuration.contents.packages;
        if packages.is_empty() {
            tracing::warn!("world is empty, nothing to install");
            return Ok(());
        }

        // Install scripts are not run: they would execute host-side or
        // need emulation for foreign architectures.
        let result = self
            .apk(ctx)
            .args(["add", "--update-cache", "--no-scripts", "--no-cache"])
            .args(packages)
            .error_msg("apk failed to install the world")
            .run()?;
        for line in result.stdout.lines() {
            tracing::debug!(target: "apk", "{}", line);
        }
        tracing::info!(packages = packages.len(), "fixated world");
        Ok(())
    }

    fn execute_in_root(&self, ctx: &BuildContext, args: &[&str]) -> Result<()> {
        let Some(proot) = &self.proot else {
            bail!("proot not found in PATH; it is required to run commands inside the image");
        };

        let mut cmd = Cmd::new(proot).arg("-R").arg_path(ctx.work_dir());
        let target = &ctx.options.arch;
        if Architecture::host().as_ref() != Some(target) {
            cmd = cmd.arg("-q").arg(format!("qemu-{}", target.to_qemu()));
        }
        cmd.args(args)
            .error_msg(format!("'{}' failed inside the image", args.join(" ")))
            .run()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::testing::test_context;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    const KEY: &str = "-----BEGIN PUBLIC KEY-----\nMIIBIjANBg==\n-----END PUBLIC KEY-----\n";

    /// A stand-in binary that records its arguments, one per line.
    fn recording_binary(dir: &Path, name: &str, exit: i32) -> (PathBuf, PathBuf) {
        let log = dir.join(format!("{name}.args"));
        let bin = dir.join(name);
        fs::write(
            &bin,
            format!(
                "#!/bin/sh\nfor a in \"$@\"; do echo \"$a\"; done > {}\necho 'ERROR: unable to select packages' >&2\nexit {}\n",
                log.display(),
                exit
            ),
        )
        .unwrap();
        fs::set_permissions(&bin, fs::Permissions::from_mode(0o755)).unwrap();
        (bin, log)
    }

    fn recorded(log: &Path) -> Vec<String> {
        fs::read_to_string(log)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_repositories_and_world_are_written() {
        let (_temp, mut ctx) = test_context();
        ctx.image_configuration.contents.repositories =
            vec!["https://dl-cdn.alpinelinux.org/alpine/edge/main".into()];
        ctx.image_configuration.contents.packages = vec!["busybox".into(), "busybox".into()];

        let apk = ApkCli::with_binary("/nonexistent/apk");
        apk.init_repositories(&ctx).unwrap();
        apk.init_world(&ctx).unwrap();

        let etc = ctx.work_dir().join("etc/apk");
        assert_eq!(
            fs::read_to_string(etc.join("repositories")).unwrap(),
            "https://dl-cdn.alpinelinux.org/alpine/edge/main\n"
        );
        assert_eq!(
            fs::read_to_string(etc.join("world")).unwrap(),
            "busybox\nbusybox\n"
        );
    }

    #[test]
    fn test_keyring_copies_local_keys() {
        let (temp, mut ctx) = test_context();
        let key = temp.path().join("alpine-devel@lists.alpinelinux.org-6165ee59.rsa.pub");
        fs::write(&key, KEY).unwrap();
        ctx.image_configuration.contents.keyring = vec![key.to_string_lossy().into_owned()];

        ApkCli::with_binary("/nonexistent/apk")
            .init_keyring(&ctx)
            .unwrap();

        let installed = ctx
            .work_dir()
            .join("etc/apk/keys/alpine-devel@lists.alpinelinux.org-6165ee59.rsa.pub");
        assert_eq!(fs::read_to_string(installed).unwrap(), KEY);
    }

    #[test]
    fn test_keyring_rejects_remote_and_invalid_keys() {
        let (temp, mut ctx) = test_context();
        let apk = ApkCli::with_binary("/nonexistent/apk");

        ctx.image_configuration.contents.keyring =
            vec!["https://example.com/key.rsa.pub".into()];
        let err = apk.init_keyring(&ctx).unwrap_err();
        assert!(err.to_string().contains("remote keyring"));

        let bogus = temp.path().join("bogus.rsa.pub");
        fs::write(&bogus, "not a key").unwrap();
        ctx.image_configuration.contents.keyring = vec![bogus.to_string_lossy().into_owned()];
        let err = apk.init_keyring(&ctx).unwrap_err();
        assert!(err.to_string().contains("PEM"));
    }

    #[test]
    fn test_fixate_invokes_apk_with_root_and_arch() {
        let bins = TempDir::new().unwrap();
        let (bin, log) = recording_binary(bins.path(), "apk", 0);

        let (_temp, mut ctx) = test_context();
        ctx.options.arch = Architecture::Arm64;
        ctx.image_configuration.contents.packages = vec!["busybox".into(), "s6".into()];

        ApkCli::with_binary(&bin).fixate_world(&ctx).unwrap();

        let args = recorded(&log);
        let root = ctx.work_dir().to_string_lossy().into_owned();
        assert_eq!(&args[..5], ["--root", root.as_str(), "--arch", "aarch64", "--no-interactive"]);
        assert_eq!(args[5], "add");
        assert!(args.ends_with(&["busybox".to_string(), "s6".to_string()]));
    }

    #[test]
    fn test_fixate_with_empty_world_skips_apk() {
        let (_temp, ctx) = test_context();
        ApkCli::with_binary("/nonexistent/apk")
            .fixate_world(&ctx)
            .unwrap();
    }

    #[test]
    fn test_apk_failure_carries_stderr() {
        let bins = TempDir::new().unwrap();
        let (bin, _log) = recording_binary(bins.path(), "apk", 1);

        let (_temp, ctx) = test_context();
        let err = ApkCli::with_binary(&bin).init_db(&ctx).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("apk database initialization failed"));
        assert!(msg.contains("unable to select packages"));
        assert_eq!(
            fs::read_to_string(ctx.work_dir().join("etc/apk/arch")).unwrap(),
            format!("{}\n", ctx.options.arch.to_apk())
        );
    }

    #[test]
    fn test_execute_in_root_uses_proot() {
        let bins = TempDir::new().unwrap();
        let (proot, log) = recording_binary(bins.path(), "proot", 0);

        let (_temp, mut ctx) = test_context();
        ctx.options.arch = Architecture::Other("mips64".into());

        ApkCli::with_binary("/nonexistent/apk")
            .with_proot(&proot)
            .execute_in_root(&ctx, &["/bin/busybox", "--install", "-s"])
            .unwrap();

        let args = recorded(&log);
        let root = ctx.work_dir().to_string_lossy().into_owned();
        assert_eq!(
            args,
            ["-R", root.as_str(), "-q", "qemu-mips64", "/bin/busybox", "--install", "-s"]
        );
    }

    #[test]
    fn test_execute_in_root_without_proot() {
        let (_temp, ctx) = test_context();
        let err = ApkCli::with_binary("/nonexistent/apk")
            .execute_in_root(&ctx, &["true"])
            .unwrap_err();
        assert!(err.to_string().contains("proot not found"));
    }
}
