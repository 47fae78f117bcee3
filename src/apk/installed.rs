//! Reader for apk's installed-package database (`lib/apk/db/installed`).
//!
//! The database is a sequence of stanzas separated by blank lines. Each line
//! is `<field letter>:<value>`; only the fields the SBOM needs are kept.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Location of the database relative to the image root.
pub const INSTALLED_DB: &str = "lib/apk/db/installed";

/// An installed package as recorded by apk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Package {
    pub name: String,
    pub version: String,
    pub description: String,
    /// License expression, verbatim.
    pub license: String,
    /// Dependency specifiers, verbatim (`so:libc.musl-x86_64.so.1`, `foo>=1.2`).
    pub dependencies: Vec<String>,
}

/// Parse the database contents.
///
/// Stanzas without a `P:` line are ignored.
pub fn parse_installed(content: &str) -> Vec<Package> {
    let mut packages = Vec::new();
    let mut current = Package::default();

    for line in content.lines().chain(std::iter::once("")) {
        if line.trim().is_empty() {
            if !current.name.is_empty() {
                packages.push(std::mem::take(&mut current));
            } else {
                current = Package::default();
            }
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key {
            "P" => current.name = value.to_string(),
            "V" => current.version = value.to_string(),
            "T" => current.description = value.to_string(),
            "L" => current.license = value.to_string(),
            "D" => current
                .dependencies
                .extend(value.split_whitespace().map(str::to_string)),
            _ => {}
        }
    }

    packages
}

/// Read the installed packages of the image rooted at `root`.
///
/// A missing database means nothing is installed.
pub fn read_installed(root: &Path) -> Result<Vec<Package>> {
    let path = root.join(INSTALLED_DB);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read installed database at {}", path.display()))?;
    Ok(parse_installed(&content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const INSTALLED: &str = "\
C:Q1abc=
P:musl
V:1.2.4-r2
A:x86_64
T:the musl c library (libc) implementation
L:MIT
p:so:libc.musl-x86_64.so.1=1

C:Q1def=
P:busybox
V:1.36.1-r5
T:Size optimized toolbox of many common UNIX utilities
L:GPL-2.0-only
D:so:libc.musl-x86_64.so.1 musl>=1.2
";

    #[test]
    fn test_parse_installed() {
        let pkgs = parse_installed(INSTALLED);
        assert_eq!(pkgs.len(), 2);

        assert_eq!(pkgs[0].name, "musl");
        assert_eq!(pkgs[0].version, "1.2.4-r2");
        assert_eq!(pkgs[0].license, "MIT");
        assert!(pkgs[0].dependencies.is_empty());

        assert_eq!(pkgs[1].name, "busybox");
        assert_eq!(
            pkgs[1].description,
            "Size optimized toolbox of many common UNIX utilities"
        );
        assert_eq!(
            pkgs[1].dependencies,
            ["so:libc.musl-x86_64.so.1", "musl>=1.2"]
        );
    }

    #[test]
    fn test_stanza_without_name_is_skipped() {
        let pkgs = parse_installed("V:1.0\nL:MIT\n\nP:zlib\nV:1.3-r0\n");
        assert_eq!(pkgs.len(), 1);
        assert_eq!(pkgs[0].name, "zlib");
        assert_eq!(pkgs[0].license, "");
    }

    #[test]
    fn test_read_installed_missing_db() {
        let temp = TempDir::new().unwrap();
        assert!(read_installed(temp.path()).unwrap().is_empty());
    }

    #[test]
    fn test_read_installed() {
        let temp = TempDir::new().unwrap();
        let db = temp.path().join(INSTALLED_DB);
        fs::create_dir_all(db.parent().unwrap()).unwrap();
        fs::write(&db, INSTALLED).unwrap();
        assert_eq!(read_installed(temp.path()).unwrap().len(), 2);
    }
}
