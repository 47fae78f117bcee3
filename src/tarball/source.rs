//! Trees the archive writer can walk.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Kind of an archivable entry. Anything else in a tree is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Symlink,
}

/// One entry of a source tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    /// Path relative to the tree root, without a leading `/`. The root
    /// itself is `.`.
    pub path: PathBuf,
    pub kind: EntryKind,
    /// Permission bits, including setuid/setgid/sticky.
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    /// Content length; zero for directories and symlinks.
    pub size: u64,
}

/// A tree that can be serialized into an archive.
///
/// Walking does not expose symlink targets, so sources also answer
/// `read_link` for the symlink entries they yield.
pub trait ArchiveSource {
    /// The root as `.` (when the source has one), then every entry below
    /// it, depth-first, siblings sorted by name.
    fn entries(&self) -> io::Result<Vec<SourceEntry>>;

    /// Literal target of the symlink at `path`.
    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;

    /// Open the regular file at `path` for streaming.
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + '_>>;
}

/// A directory on disk.
#[derive(Debug, Clone)]
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ArchiveSource for DirSource {
    fn entries(&self) -> io::Result<Vec<SourceEntry>> {
        let mut entries = Vec::new();

        for ent in WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
        {
            let ent = ent?;
            let rel = ent
                .path()
                .strip_prefix(&self.root)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            // The root carries the permissions of `/` in the image.
            let rel = if rel.as_os_str().is_empty() {
                PathBuf::from(".")
            } else {
                rel.to_path_buf()
            };

            let file_type = ent.file_type();
            let kind = if file_type.is_symlink() {
                EntryKind::Symlink
            } else if file_type.is_dir() {
                EntryKind::Directory
            } else if file_type.is_file() {
                EntryKind::File
            } else {
                tracing::debug!(path = %rel.display(), "skipping special file");
                continue;
            };

            let md = ent.metadata()?;
            entries.push(SourceEntry {
                path: rel,
                kind,
                mode: md.mode() & 0o7777,
                uid: u64::from(md.uid()),
                gid: u64::from(md.gid()),
                size: if kind == EntryKind::File { md.len() } else { 0 },
            });
        }

        Ok(entries)
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        fs::read_link(self.root.join(path))
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(File::open(self.root.join(path))?))
    }
}

#[derive(Debug, Clone)]
enum Node {
    Directory,
    File(Vec<u8>),
    Symlink(PathBuf),
}

/// An in-memory tree, for tests and for callers assembling small layers.
///
/// Entries are owned by root (uid/gid 0). Parent directories are not
/// implied; add them explicitly.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    nodes: BTreeMap<PathBuf, (Node, u32)>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dir(mut self, path: impl Into<PathBuf>, mode: u32) -> Self {
        self.nodes.insert(path.into(), (Node::Directory, mode));
        self
    }

    pub fn file(mut self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>, mode: u32) -> Self {
        self.nodes
            .insert(path.into(), (Node::File(contents.into()), mode));
        self
    }

    pub fn symlink(mut self, path: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        self.nodes
            .insert(path.into(), (Node::Symlink(target.into()), 0o777));
        self
    }

    fn node(&self, path: &Path) -> io::Result<&Node> {
        self.nodes.get(path).map(|(node, _)| node).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not in tree", path.display()),
            )
        })
    }
}

impl ArchiveSource for MemorySource {
    fn entries(&self) -> io::Result<Vec<SourceEntry>> {
        // Path ordering compares component by component, which is the
        // depth-first sibling-sorted order.
        Ok(self
            .nodes
            .iter()
            .map(|(path, (node, mode))| {
                let (kind, size) = match node {
                    Node::Directory => (EntryKind::Directory, 0),
                    Node::File(data) => (EntryKind::File, data.len() as u64),
                    Node::Symlink(_) => (EntryKind::Symlink, 0),
                };
                SourceEntry {
                    path: path.clone(),
                    kind,
                    mode: *mode,
                    uid: 0,
                    gid: 0,
                    size,
                }
            })
            .collect())
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        match self.node(path)? {
            Node::Symlink(target) => Ok(target.clone()),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a symlink", path.display()),
            )),
        }
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + '_>> {
        match self.node(path)? {
            Node::File(data) => Ok(Box::new(data.as_slice())),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            )),
        }
    }
}
