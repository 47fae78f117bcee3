//! Running host commands (apk, proot) with captured output.
//!
//! Every failure carries the command's stderr so a failed install says why.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

/// Output of a finished command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }
}

/// Builder for a host command.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: PathBuf,
    args: Vec<String>,
    error_prefix: Option<String>,
}

impl Cmd {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            error_prefix: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_string()));
        self
    }

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Prefix for the error message on non-zero exit.
    pub fn error_msg(mut self, msg: impl AsRef<str>) -> Self {
        self.error_prefix = Some(msg.as_ref().to_string());
        self
    }

    /// The command line as it would be typed, for logs.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }

    /// Run to completion, failing on non-zero exit.
    pub fn run(self) -> Result<CommandResult> {
        tracing::debug!(command = %self.display(), "running");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        let output = cmd.output().with_context(|| {
            format!(
                "Failed to execute '{}'. Is it installed?",
                self.program.display()
            )
        })?;

        let result = CommandResult {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !result.success() {
            let prefix = self
                .error_prefix
                .unwrap_or_else(|| format!("'{}' failed", self.program.display()));
            let stderr = result.stderr.trim();
            if stderr.is_empty() {
                bail!("{} (exit code {})", prefix, result.code());
            }
            bail!("{} (exit code {}):\n{}", prefix, result.code(), stderr);
        }

        Ok(result)
    }
}
