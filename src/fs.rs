//! Filesystem collaborator.
//!
//! The engine never touches `std::fs` directly; every file read goes through
//! the [`FileSystem`] trait so tests can swap in an in-memory tree. The
//! default implementation reads from the host filesystem.

use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashMap;
use std::io;

/// Read access to blueprint files.
pub trait FileSystem: Send + Sync {
    /// Read the entire contents of `path`.
    fn read_file(&self, path: &Utf8Path) -> io::Result<Vec<u8>>;

    /// Report whether `path` exists.
    fn exists(&self, path: &Utf8Path) -> bool;
}

/// Host filesystem implementation.
#[derive(Debug, Default)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn read_file(&self, path: &Utf8Path) -> io::Result<Vec<u8>> {
        std::fs::read(path.as_std_path())
    }

    fn exists(&self, path: &Utf8Path) -> bool {
        path.as_std_path().exists()
    }
}

/// In-memory filesystem keyed by path, used by tests.
///
/// # Examples
///
/// ```
/// use blueprint::fs::{FileSystem, MockFileSystem};
/// use camino::Utf8Path;
///
/// let fs = MockFileSystem::new([("Blueprints", "foo_module { name: \"a\" }")]);
/// assert!(fs.exists(Utf8Path::new("Blueprints")));
/// ```
#[derive(Debug, Default)]
pub struct MockFileSystem {
    files: HashMap<Utf8PathBuf, Vec<u8>>,
}

impl MockFileSystem {
    /// Build a mock tree from `(path, contents)` pairs.
    pub fn new<P, C>(files: impl IntoIterator<Item = (P, C)>) -> Self
    where
        P: Into<Utf8PathBuf>,
        C: Into<Vec<u8>>,
    {
        Self {
            files: files
                .into_iter()
                .map(|(path, contents)| (path.into(), contents.into()))
                .collect(),
        }
    }
}

impl FileSystem for MockFileSystem {
    fn read_file(&self, path: &Utf8Path) -> io::Result<Vec<u8>> {
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("{path}: no such file"))
        })
    }

    fn exists(&self, path: &Utf8Path) -> bool {
        self.files.contains_key(path)
    }
}
