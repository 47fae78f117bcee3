//! Writing an image layer to its final path.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use time::OffsetDateTime;

use super::{write_archive, DirSource};

/// A layer written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerInfo {
    pub path: PathBuf,
    /// `sha256:<hex>` of the compressed bytes.
    pub digest: String,
    /// Compressed size in bytes.
    pub size: u64,
}

/// Passes writes through while hashing and counting them.
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    size: u64,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            size: 0,
        }
    }

    fn finish(self) -> (W, String, u64) {
        let digest = format!("sha256:{:x}", self.hasher.finalize());
        (self.inner, digest, self.size)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Archive the directory at `root` into `output`.
///
/// The archive is staged in a temporary file beside `output` and renamed
/// over it only once complete, so a failed write never leaves a truncated
/// layer at the final path.
pub fn write_layer(root: &Path, output: &Path, epoch: OffsetDateTime) -> io::Result<LayerInfo> {
    let dir = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let staged = NamedTempFile::new_in(dir)?;
    let sink = HashingWriter::new(BufWriter::new(staged));
    let sink = write_archive(&DirSource::new(root), sink, epoch)?;

    let (buffered, digest, size) = sink.finish();
    let staged = buffered.into_inner().map_err(|e| e.into_error())?;
    staged.as_file().sync_all()?;
    staged.persist(output)?;
    fs::set_permissions(output, fs::Permissions::from_mode(0o644))?;

    tracing::debug!(path = %output.display(), %digest, size, "layer written");
    Ok(LayerInfo {
        path: output.to_path_buf(),
        digest,
        size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sha256_file(path: &Path) -> String {
        let bytes = fs::read(path).unwrap();
        format!("sha256:{:x}", Sha256::digest(&bytes))
    }

    #[test]
    fn test_write_layer_reports_digest_and_size() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("rootfs");
        fs::create_dir_all(root.join("etc")).unwrap();
        fs::write(root.join("etc/hostname"), "forge\n").unwrap();

        let output = temp.path().join("out/layer.tar.gz");
        let info = write_layer(&root, &output, OffsetDateTime::UNIX_EPOCH).unwrap();

        assert_eq!(info.path, output);
        assert_eq!(info.size, fs::metadata(&output).unwrap().len());
        assert_eq!(info.digest, sha256_file(&output));
    }

    #[test]
    fn test_rewrite_is_identical() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("rootfs");
        fs::create_dir_all(root.join("usr/share")).unwrap();
        fs::write(root.join("usr/share/README"), "hello").unwrap();

        let first = write_layer(&root, &temp.path().join("a.tar.gz"), OffsetDateTime::UNIX_EPOCH)
            .unwrap();
        let second = write_layer(&root, &temp.path().join("b.tar.gz"), OffsetDateTime::UNIX_EPOCH)
            .unwrap();
        assert_eq!(first.digest, second.digest);
    }

    #[test]
    fn test_failed_write_leaves_no_output() {
        let temp = TempDir::new().unwrap();
        let output = temp.path().join("layer.tar.gz");
        let err = write_layer(
            &temp.path().join("missing"),
            &output,
            OffsetDateTime::UNIX_EPOCH,
        );
        assert!(err.is_err());
        assert!(!output.exists());
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }
}
