//! Post-build assertions.
//!
//! An assertion is any check over the finished build context. They run all
//! at once, each to completion, and every failure is reported.

use anyhow::{bail, Result};

use super::join::{join_all, task, Task};
use super::BuildContext;
use crate::accounts;
use crate::error::AssertionFailures;

/// A check run against the finished filesystem.
pub type Assertion = Box<dyn Fn(&BuildContext) -> Result<()> + Send + Sync>;

/// Run every assertion concurrently and aggregate the failures.
///
/// The order of messages in the aggregate follows completion order and is
/// not stable between runs.
pub fn run_assertions(ctx: &BuildContext, assertions: &[Assertion]) -> Result<(), AssertionFailures> {
    let tasks: Vec<Task<'_, anyhow::Error>> = assertions
        .iter()
        .map(|assertion| task(move || assertion(ctx)))
        .collect();

    let errors = join_all(tasks);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AssertionFailures::new(errors))
    }
}

/// Require a path (relative to the image root) to exist.
pub fn require_path(path: impl Into<String>) -> Assertion {
    let path = path.into();
    Box::new(move |ctx: &BuildContext| -> Result<()> {
        let rel = path.trim_start_matches('/');
        if ctx.work_dir().join(rel).symlink_metadata().is_err() {
            bail!("required path /{} is missing from the image", rel);
        }
        Ok(())
    })
}

/// Require a user to be present in the image's passwd file.
pub fn require_user(username: impl Into<String>) -> Assertion {
    let username = username.into();
    Box::new(move |ctx: &BuildContext| -> Result<()> {
        if accounts::read_uid_from_rootfs(ctx.work_dir(), &username)?.is_none() {
            bail!("required user {} is missing from /etc/passwd", username);
        }
        Ok(())
    })
}
