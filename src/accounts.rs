//! Account databases of the built image: `etc/passwd` and `etc/group`.
//!
//! Packages may already have created system accounts; configured users and
//! groups are upserted by name next to them.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

use crate::config::{Accounts, Group, User};

const PASSWD: &str = "etc/passwd";
const GROUP: &str = "etc/group";

/// Read a UID from the rootfs passwd file.
///
/// Returns:
/// - Ok(Some((uid, gid))) if user found
/// - Ok(None) if user not found or file doesn't exist
/// - Err if file exists but is corrupted/unreadable
pub fn read_uid_from_rootfs(rootfs: &Path, username: &str) -> Result<Option<(u32, u32)>> {
    let passwd_path = rootfs.join(PASSWD);
    if !passwd_path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(&passwd_path)
        .with_context(|| format!("Failed to read passwd file at {}", passwd_path.display()))?;

    for line in content.lines() {
        let parts: Vec<&str> = line.split(':').collect();
        if parts.len() >= 4 && parts[0] == username {
            let uid: u32 = parts[2].parse().with_context(|| {
                format!(
                    "Corrupted passwd file: invalid UID '{}' for user '{}' at {}",
                    parts[2],
                    username,
                    passwd_path.display()
                )
            })?;
            let gid: u32 = parts[3].parse().with_context(|| {
                format!(
                    "Corrupted passwd file: invalid GID '{}' for user '{}' at {}",
                    parts[3],
                    username,
                    passwd_path.display()
                )
            })?;
            return Ok(Some((uid, gid)));
        }
    }
    Ok(None)
}

/// Name of the group owning `gid` in the rootfs group file.
///
/// `Ok(None)` when no group has that GID or the file is missing. Lines
/// with a malformed GID field are skipped rather than failing the lookup.
pub fn group_name_for_gid(rootfs: &Path, gid: u32) -> Result<Option<String>> {
    let group_path = rootfs.join(GROUP);
    if !group_path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(&group_path)
        .with_context(|| format!("Failed to read group file at {}", group_path.display()))?;

    Ok(content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split(':');
            let name = fields.next()?;
            let entry_gid = fields.nth(1)?.parse::<u32>().ok()?;
            (entry_gid == gid).then(|| name.to_string())
        })
        .next())
}

fn passwd_line(user: &User) -> String {
    format!(
        "{name}:x:{uid}:{gid}:{name}:/home/{name}:/bin/sh",
        name = user.username,
        uid = user.uid,
        gid = user.gid
    )
}

fn group_line(group: &Group) -> String {
    format!(
        "{}:x:{}:{}",
        group.groupname,
        group.gid,
        group.members.join(",")
    )
}

/// Replace lines whose first field matches an entry's name, append the rest.
///
/// Existing lines keep their position so package-created accounts stay put.
fn upsert(path: &Path, entries: &[(&str, String)]) -> Result<()> {
    let existing = if path.exists() {
        fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?
    } else {
        String::new()
    };

    let mut pending: Vec<Option<&(&str, String)>> = entries.iter().map(Some).collect();
    let mut out = String::with_capacity(existing.len());

    for line in existing.lines() {
        let name = line.split(':').next().unwrap_or("");
        let replacement = pending
            .iter_mut()
            .find(|e| e.map(|(n, _)| *n == name).unwrap_or(false))
            .and_then(Option::take);
        match replacement {
            Some((_, new_line)) => out.push_str(new_line),
            None => out.push_str(line),
        }
        out.push('\n');
    }
    for (_, new_line) in pending.into_iter().flatten() {
        out.push_str(new_line);
        out.push('\n');
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, out).with_context(|| format!("Failed to write {}", path.display()))
}

/// Apply configured accounts to the image rooted at `rootfs`.
///
/// Groups are written first, then users along with their home
/// directories. A non-numeric `run-as` must name a user that exists once
/// the configured users are in place.
pub fn mutate_accounts(rootfs: &Path, accounts: &Accounts) -> Result<()> {
    if !accounts.groups.is_empty() {
        let entries: Vec<(&str, String)> = accounts
            .groups
            .iter()
            .map(|g| (g.groupname.as_str(), group_line(g)))
            .collect();
        upsert(&rootfs.join(GROUP), &entries)?;
    }

    if !accounts.users.is_empty() {
        let entries: Vec<(&str, String)> = accounts
            .users
            .iter()
            .map(|u| (u.username.as_str(), passwd_line(u)))
            .collect();
        upsert(&rootfs.join(PASSWD), &entries)?;

        for user in &accounts.users {
            let home = rootfs.join("home").join(&user.username);
            fs::create_dir_all(&home)
                .with_context(|| format!("Failed to create home directory {}", home.display()))?;

            if group_name_for_gid(rootfs, user.gid)?.is_none() {
                tracing::warn!(
                    user = %user.username,
                    gid = user.gid,
                    "primary group has no entry in /{}",
                    GROUP
                );
            }
        }
    }

    let run_as = accounts.run_as.as_str();
    if !run_as.is_empty() && !run_as.chars().all(|c| c.is_ascii_digit()) {
        if read_uid_from_rootfs(rootfs, run_as)?.is_none() {
            bail!("run-as user '{}' does not exist in /{}", run_as, PASSWD);
        }
    }

    tracing::info!(
        users = accounts.users.len(),
        groups = accounts.groups.len(),
        "mutated accounts"
    );
    Ok(())
}
