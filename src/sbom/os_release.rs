//! OS identity from the built image's `os-release`.

use anyhow::{bail, Context, Result};
use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Searched in order; the first that exists wins.
const OS_RELEASE_PATHS: [&str; 2] = ["etc/os-release", "usr/lib/os-release"];

const UNKNOWN: &str = "unknown";

/// Symlink hops allowed while resolving a path inside the image.
const MAX_LINK_HOPS: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsRelease {
    /// `ID`, used as the purl namespace.
    pub id: String,
    /// `NAME`
    pub name: String,
    /// `VERSION_ID`
    pub version: String,
}

impl Default for OsRelease {
    fn default() -> Self {
        Self {
            id: UNKNOWN.to_string(),
            name: UNKNOWN.to_string(),
            version: UNKNOWN.to_string(),
        }
    }
}

impl OsRelease {
    /// Parse `os-release` contents. Missing keys stay `unknown`.
    pub fn parse(content: &str) -> Self {
        let mut release = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').trim_matches('\'');
            if value.is_empty() {
                continue;
            }
            match key.trim() {
                "ID" => release.id = value.to_string(),
                "NAME" => release.name = value.to_string(),
                "VERSION_ID" => release.version = value.to_string(),
                _ => {}
            }
        }
        release
    }

    /// Read the identity of the image rooted at `root`.
    pub fn read(root: &Path) -> Result<Self> {
        for rel in OS_RELEASE_PATHS {
            let Some(path) = resolve_in_root(root, Path::new(rel))? else {
                continue;
            };
            if path.is_file() {
                let content = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                return Ok(Self::parse(&content));
            }
        }
        tracing::warn!("image has no os-release, OS identity is unknown");
        Ok(Self::default())
    }
}

fn push_component(queue: &mut VecDeque<OsString>, component: Component<'_>) {
    match component {
        Component::Normal(name) => queue.push_back(name.to_os_string()),
        Component::ParentDir => queue.push_back(OsString::from("..")),
        Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
    }
}

/// Resolve `rel` against the image rooted at `root`, following symlinks
/// as the image would see them.
///
/// Absolute link targets restart at `root` and `..` never climbs above
/// it, so nothing on the build host is consulted. `Ok(None)` when some
/// component does not exist.
fn resolve_in_root(root: &Path, rel: &Path) -> Result<Option<PathBuf>> {
    let mut pending = VecDeque::new();
    for component in rel.components() {
        push_component(&mut pending, component);
    }

    let mut resolved: Vec<OsString> = Vec::new();
    let mut hops = 0;
    while let Some(name) = pending.pop_front() {
        if name == ".." {
            resolved.pop();
            continue;
        }
        resolved.push(name);

        let path: PathBuf = root.join(resolved.iter().collect::<PathBuf>());
        let meta = match fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to stat {}", path.display()))
            }
        };
        if !meta.file_type().is_symlink() {
            continue;
        }

        hops += 1;
        if hops > MAX_LINK_HOPS {
            bail!("too many levels of symbolic links at {}", path.display());
        }
        let target = fs::read_link(&path)
            .with_context(|| format!("Failed to read link {}", path.display()))?;
        resolved.pop();
        if target.is_absolute() {
            resolved.clear();
        }

        let mut expanded = VecDeque::new();
        for component in target.components() {
            push_component(&mut expanded, component);
        }
        expanded.extend(pending.drain(..));
        pending = expanded;
    }

    Ok(Some(root.join(resolved.iter().collect::<PathBuf>())))
}
