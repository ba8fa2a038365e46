//! Filesystem abstraction.
//!
//! # Data Flow
//! ```text
//! drivers (existence predicates)  ─┐
//! sites   (links, parked roots,    ├──▶ dyn FileSystem ──▶ RealFs   (std::fs)
//!          registry document)      │                   └─▶ MemoryFs (in-memory fixtures)
//! dispatch (canonical site paths) ─┘
//! ```
//!
//! # Design Decisions
//! - Every lookup returns `io::Result`: "does not exist" is `Ok(None)` / `Ok(false)`,
//!   anything else (permission denied, I/O failure) is an `Err` the caller can contain
//! - Metadata queries follow symlinks; `is_symlink` and `read_link` do not
//! - Writes of documents go through `write_atomic` (write-new-then-rename)

pub mod memory;
pub mod real;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

pub use memory::MemoryFs;
pub use real::RealFs;

/// Kind of an existing filesystem entry (after following symlinks).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

/// A single entry returned by [`FileSystem::read_dir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// File name of the entry (not the full path).
    pub name: String,
    /// Kind of the entry's target, `None` for a dangling symlink.
    pub kind: Option<EntryKind>,
    /// Whether the entry itself is a symlink.
    pub is_symlink: bool,
}

/// Filesystem operations used by the binding store, the drivers and the dispatcher.
pub trait FileSystem: Send + Sync + fmt::Debug {
    /// Kind of the entry at `path`, following symlinks. `Ok(None)` if it does not exist.
    fn entry_kind(&self, path: &Path) -> io::Result<Option<EntryKind>>;

    /// Whether `path` itself is a symlink (not followed).
    fn is_symlink(&self, path: &Path) -> io::Result<bool>;

    /// Entries of the directory at `path`, sorted by name.
    ///
    /// An entry whose target cannot be inspected (a symlink loop, a denied target) is
    /// left out; it never fails the whole listing.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;

    /// Absolute path with every symlink resolved.
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;

    /// Target of the symlink at `path`.
    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;

    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Replace the file at `path` so readers observe either the old or the new contents.
    fn write_atomic(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Create a symlink at `link` pointing to `target`.
    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()>;

    /// Remove a file or symlink (never a directory).
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    fn is_file(&self, path: &Path) -> io::Result<bool> {
        Ok(self.entry_kind(path)? == Some(EntryKind::File))
    }

    fn is_dir(&self, path: &Path) -> io::Result<bool> {
        Ok(self.entry_kind(path)? == Some(EntryKind::Dir))
    }

    fn exists(&self, path: &Path) -> io::Result<bool> {
        Ok(self.entry_kind(path)?.is_some())
    }
}

/// Errors that mean "nothing is there" rather than "something went wrong".
pub(crate) fn is_absent(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}
