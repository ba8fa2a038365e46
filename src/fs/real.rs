//! `std::fs` backed implementation.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::fs::{is_absent, DirEntry, EntryKind, FileSystem};

/// The host filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

fn kind_of(metadata: &fs::Metadata) -> EntryKind {
    if metadata.is_dir() {
        EntryKind::Dir
    } else {
        EntryKind::File
    }
}

impl FileSystem for RealFs {
    fn entry_kind(&self, path: &Path) -> io::Result<Option<EntryKind>> {
        match fs::metadata(path) {
            Ok(metadata) => Ok(Some(kind_of(&metadata))),
            Err(e) if is_absent(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn is_symlink(&self, path: &Path) -> io::Result<bool> {
        match fs::symlink_metadata(path) {
            Ok(metadata) => Ok(metadata.file_type().is_symlink()),
            Err(e) if is_absent(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(dir = ?path, error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            let Ok(name) = entry.file_name().into_string() else {
                tracing::debug!(dir = ?path, "Skipping entry with non UTF-8 name");
                continue;
            };
            let is_symlink = match entry.file_type() {
                Ok(file_type) => file_type.is_symlink(),
                Err(e) => {
                    tracing::warn!(entry = ?entry.path(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            // A looping or inaccessible target hides only this entry.
            let kind = match fs::metadata(entry.path()) {
                Ok(metadata) => Some(kind_of(&metadata)),
                Err(e) if is_absent(&e) => None,
                Err(e) => {
                    tracing::warn!(entry = ?entry.path(), error = %e, "Skipping entry with unreadable target");
                    continue;
                }
            };
            entries.push(DirEntry {
                name,
                kind,
                is_symlink,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        fs::canonicalize(path)
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        fs::read_link(path)
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn write_atomic(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let file_name = path
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
        let mut tmp_name = std::ffi::OsString::from(".");
        tmp_name.push(file_name);
        tmp_name.push(format!(".{}.tmp", std::process::id()));
        let tmp_path = path.with_file_name(tmp_name);

        let result = (|| {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(contents)?;
            file.sync_all()?;
            fs::rename(&tmp_path, path)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        result
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    #[cfg(unix)]
    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        std::os::unix::fs::symlink(target, link)
    }

    #[cfg(windows)]
    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        std::os::windows::fs::symlink_dir(target, link)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}
