//! Normalization of apk's installed-scripts archive.
//!
//! apk stores package install scripts in `lib/apk/db/scripts.tar` with the
//! wall-clock time of installation, which would leak into the image.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tar::{Archive, Builder, EntryType};
use tempfile::NamedTempFile;
use time::OffsetDateTime;

use crate::tarball::{epoch_secs, pin_timestamps};

/// Location of the scripts archive relative to the image root.
pub const SCRIPTS_TAR: &str = "lib/apk/db/scripts.tar";

/// Rewrite the scripts archive with every timestamp set to `epoch`.
///
/// Entry order, names and contents are preserved. Nothing happens if no
/// package installed a script.
pub fn normalize_scripts_tar(root: &Path, epoch: OffsetDateTime) -> Result<()> {
    let path = root.join(SCRIPTS_TAR);
    if !path.exists() {
        tracing::debug!("no {} to normalize", SCRIPTS_TAR);
        return Ok(());
    }

    let dir = path.parent().unwrap_or(root);
    let staged = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    let input = File::open(&path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let permissions = input.metadata()?.permissions();
    let mut archive = Archive::new(input);
    let mut builder = Builder::new(BufWriter::new(staged));
    let secs = epoch_secs(epoch);
    let mut count = 0usize;

    for entry in archive
        .entries()
        .with_context(|| format!("Failed to read {}", path.display()))?
    {
        let entry = entry.with_context(|| format!("Corrupted entry in {}", path.display()))?;
        let name = entry.path()?.into_owned();
        let mut header = entry.header().clone();
        pin_timestamps(&mut header, secs);

        let appended = match header.entry_type() {
            EntryType::Symlink | EntryType::Link => {
                let target = entry
                    .link_name()?
                    .map(|t| t.into_owned())
                    .unwrap_or_default();
                builder.append_link(&mut header, &name, &target)
            }
            _ => builder.append_data(&mut header, &name, entry),
        };
        appended
            .with_context(|| format!("Failed to rewrite {} in {}", name.display(), SCRIPTS_TAR))?;
        count += 1;
    }

    let staged = builder
        .into_inner()
        .context("Failed to finish scripts archive")?
        .into_inner()
        .map_err(|e| e.into_error())
        .context("Failed to flush scripts archive")?;
    staged.as_file().set_permissions(permissions)?;
    staged
        .persist(&path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;

    tracing::debug!(entries = count, "normalized {}", SCRIPTS_TAR);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Read;
    use tar::Header;
    use tempfile::TempDir;

    fn write_scripts(root: &Path, scripts: &[(&str, &str, u64)]) {
        let path = root.join(SCRIPTS_TAR);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut builder = Builder::new(File::create(&path).unwrap());
        for (name, body, mtime) in scripts {
            let mut header = Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o755);
            header.set_mtime(*mtime);
            builder
                .append_data(&mut header, name, body.as_bytes())
                .unwrap();
        }
        builder.finish().unwrap();
    }

    #[test]
    fn test_missing_archive_is_noop() {
        let temp = TempDir::new().unwrap();
        normalize_scripts_tar(temp.path(), OffsetDateTime::UNIX_EPOCH).unwrap();
        assert!(!temp.path().join(SCRIPTS_TAR).exists());
    }

    #[test]
    fn test_timestamps_pinned_and_contents_kept() {
        let temp = TempDir::new().unwrap();
        write_scripts(
            temp.path(),
            &[
                (
                    "busybox-1.36.1-r5.Q1abc=.post-install",
                    "#!/bin/sh\nbusybox --install -s\n",
                    1_712_345_678,
                ),
                (
                    "ca-certificates-20240226-r0.Q1def=.trigger",
                    "#!/bin/sh\nupdate-ca-certificates\n",
                    1_712_345_999,
                ),
            ],
        );

        let epoch = OffsetDateTime::from_unix_timestamp(1_600_000_000).unwrap();
        normalize_scripts_tar(temp.path(), epoch).unwrap();

        let mut archive = Archive::new(File::open(temp.path().join(SCRIPTS_TAR)).unwrap());
        let mut seen = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            assert_eq!(entry.header().mtime().unwrap(), 1_600_000_000);
            let name = entry.path().unwrap().to_string_lossy().into_owned();
            let mut body = String::new();
            entry.read_to_string(&mut body).unwrap();
            seen.push((name, body));
        }

        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, "busybox-1.36.1-r5.Q1abc=.post-install");
        assert_eq!(seen[0].1, "#!/bin/sh\nbusybox --install -s\n");
        assert!(seen[1].0.ends_with(".trigger"));
    }

    #[test]
    fn test_normalization_is_stable() {
        let temp = TempDir::new().unwrap();
        write_scripts(temp.path(), &[("x.post-install", "true\n", 42)]);

        normalize_scripts_tar(temp.path(), OffsetDateTime::UNIX_EPOCH).unwrap();
        let first = fs::read(temp.path().join(SCRIPTS_TAR)).unwrap();
        normalize_scripts_tar(temp.path(), OffsetDateTime::UNIX_EPOCH).unwrap();
        let second = fs::read(temp.path().join(SCRIPTS_TAR)).unwrap();
        assert_eq!(first, second);
    }
}
