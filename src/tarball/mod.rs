//! Reproducible gzip'd tar archives.
//!
//! The archive bytes depend only on the tree's content, names, modes and
//! owners, and the epoch passed in:
//!
//! - entries are written depth-first with siblings sorted by name
//! - mtime, atime and ctime of every entry are the epoch
//! - symlinks keep their literal target
//! - names are relative to the tree root, which is itself written as `.`
//!
//! File contents are streamed, never buffered whole.

pub mod layer;
pub mod source;

use std::io::{self, Write};

use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Builder, EntryType, Header};
use time::OffsetDateTime;

pub use layer::{write_layer, LayerInfo};
pub use source::{ArchiveSource, DirSource, EntryKind, MemorySource, SourceEntry};

/// Serialize `source` as a gzip'd tar stream into `out`.
///
/// Returns the sink once the gzip trailer has been written. Any error
/// aborts the archive; whatever was already written to `out` is left for
/// the caller to discard.
pub fn write_archive<S, W>(source: &S, out: W, epoch: OffsetDateTime) -> io::Result<W>
where
    S: ArchiveSource + ?Sized,
    W: Write,
{
    let secs = epoch_secs(epoch);
    let mut builder = Builder::new(GzEncoder::new(out, Compression::default()));

    for entry in source.entries()? {
        let mut header = Header::new_gnu();
        header.set_mode(entry.mode);
        header.set_uid(entry.uid);
        header.set_gid(entry.gid);
        pin_timestamps(&mut header, secs);

        match entry.kind {
            EntryKind::Directory => {
                header.set_entry_type(EntryType::Directory);
                header.set_size(0);
                builder.append_data(&mut header, &entry.path, io::empty())?;
            }
            EntryKind::Symlink => {
                let target = source.read_link(&entry.path)?;
                header.set_entry_type(EntryType::Symlink);
                header.set_size(0);
                builder.append_link(&mut header, &entry.path, &target)?;
            }
            EntryKind::File => {
                header.set_entry_type(EntryType::Regular);
                header.set_size(entry.size);
                let reader = source.open(&entry.path)?;
                builder.append_data(&mut header, &entry.path, reader)?;
            }
        }
    }

    builder.into_inner()?.finish()
}

/// Seconds since the Unix epoch, clamped at zero for tar's unsigned fields.
pub(crate) fn epoch_secs(epoch: OffsetDateTime) -> u64 {
    u64::try_from(epoch.unix_timestamp()).unwrap_or(0)
}

/// Set all three timestamps of a header.
///
/// Only GNU headers carry atime and ctime; other formats get mtime alone.
pub(crate) fn pin_timestamps(header: &mut Header, secs: u64) {
    header.set_mtime(secs);
    if let Some(gnu) = header.as_gnu_mut() {
        gnu.set_atime(secs);
        gnu.set_ctime(secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn epoch() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    fn archive_dir(root: &Path) -> Vec<u8> {
        write_archive(&DirSource::new(root), Vec::new(), epoch()).unwrap()
    }

    struct Listed {
        path: PathBuf,
        entry_type: EntryType,
        mtime: u64,
        atime: Option<u64>,
        ctime: Option<u64>,
        link: Option<PathBuf>,
        body: Vec<u8>,
    }

    fn list(bytes: &[u8]) -> Vec<Listed> {
        use std::io::Read;

        let mut archive = tar::Archive::new(GzDecoder::new(bytes));
        let mut out = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let header = entry.header().clone();
            let gnu = header.as_gnu();
            let mut body = Vec::new();
            let path = entry.path().unwrap().into_owned();
            let link = entry.link_name().unwrap().map(|l| l.into_owned());
            entry.read_to_end(&mut body).unwrap();
            out.push(Listed {
                path,
                entry_type: header.entry_type(),
                mtime: header.mtime().unwrap(),
                atime: gnu.map(|g| g.atime().unwrap()),
                ctime: gnu.map(|g| g.ctime().unwrap()),
                link,
                body,
            });
        }
        out
    }

    fn populate(root: &Path, reversed: bool) {
        let mut dirs = vec!["etc/apk", "bin", "var/empty"];
        if reversed {
            dirs.reverse();
        }
        for dir in dirs {
            fs::create_dir_all(root.join(dir)).unwrap();
        }

        let mut files = vec![
            ("etc/apk/world", "busybox\n"),
            ("etc/os-release", "ID=alpine\n"),
            ("bin/busybox", "\x7fELF"),
        ];
        if reversed {
            files.reverse();
        }
        for (path, body) in files {
            fs::write(root.join(path), body).unwrap();
        }
        std::os::unix::fs::symlink("busybox", root.join("bin/sh")).unwrap();
    }

    #[test]
    fn test_creation_order_does_not_change_bytes() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        populate(a.path(), false);
        std::thread::sleep(std::time::Duration::from_millis(1100));
        populate(b.path(), true);

        assert_eq!(archive_dir(a.path()), archive_dir(b.path()));
    }

    #[test]
    fn test_every_timestamp_is_the_epoch() {
        let temp = TempDir::new().unwrap();
        populate(temp.path(), false);

        let entries = list(&archive_dir(temp.path()));
        assert!(!entries.is_empty());
        for e in &entries {
            assert_eq!(e.mtime, 1_700_000_000, "{}", e.path.display());
            assert_eq!(e.atime, Some(1_700_000_000));
            assert_eq!(e.ctime, Some(1_700_000_000));
        }
    }

    #[test]
    fn test_names_are_relative_and_symlinks_literal() {
        let temp = TempDir::new().unwrap();
        populate(temp.path(), false);

        let entries = list(&archive_dir(temp.path()));
        let root = temp.path().to_string_lossy().into_owned();
        for e in &entries {
            let name = e.path.to_string_lossy();
            assert!(!name.starts_with('/'));
            assert!(!name.contains(root.trim_start_matches('/')));
        }

        let sh = entries
            .iter()
            .find(|e| e.path == Path::new("bin/sh"))
            .unwrap();
        assert_eq!(sh.entry_type, EntryType::Symlink);
        assert_eq!(sh.link.as_deref(), Some(Path::new("busybox")));

        let world = entries
            .iter()
            .find(|e| e.path == Path::new("etc/apk/world"))
            .unwrap();
        assert_eq!(world.body, b"busybox\n");
    }

    #[test]
    fn test_root_entry_keeps_mode_of_slash() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        populate(temp.path(), false);
        fs::set_permissions(temp.path(), fs::Permissions::from_mode(0o755)).unwrap();

        let bytes = archive_dir(temp.path());
        let mut archive = tar::Archive::new(GzDecoder::new(bytes.as_slice()));
        let first = archive.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(first.path().unwrap(), Path::new("."));
        assert_eq!(first.header().entry_type(), EntryType::Directory);
        assert_eq!(first.header().mode().unwrap(), 0o755);
    }

    #[test]
    fn test_memory_source_archive() {
        let source = MemorySource::new()
            .dir("sv", 0o755)
            .dir("sv/nginx", 0o755)
            .file("sv/nginx/run", "#!/bin/execlineb -P\nnginx\n", 0o755);

        let bytes = write_archive(&source, Vec::new(), epoch()).unwrap();
        let entries = list(&bytes);
        let names: Vec<_> = entries
            .iter()
            .map(|e| e.path.to_string_lossy().trim_end_matches('/').to_string())
            .collect();
        assert_eq!(names, ["sv", "sv/nginx", "sv/nginx/run"]);
        assert_eq!(
            write_archive(&source, Vec::new(), epoch()).unwrap(),
            bytes
        );
    }

    #[test]
    fn test_missing_root_aborts() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope");
        assert!(write_archive(&DirSource::new(missing), Vec::new(), epoch()).is_err());
    }

    #[test]
    fn test_negative_epoch_clamps() {
        let before = OffsetDateTime::from_unix_timestamp(-5).unwrap();
        assert_eq!(epoch_secs(before), 0);
    }
}
