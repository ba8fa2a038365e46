//! In-memory filesystem used for fixtures.
//!
//! Paths are absolute; relative paths are taken relative to `/`. Symlinks are resolved the
//! way the host resolves them, including relative targets and chains.

use std::collections::{BTreeMap, VecDeque};
use std::ffi::OsString;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use crate::fs::{DirEntry, EntryKind, FileSystem};

const MAX_SYMLINK_HOPS: usize = 40;

#[derive(Debug, Clone)]
enum Node {
    File(String),
    Dir,
    Symlink(PathBuf),
}

type Nodes = BTreeMap<PathBuf, Node>;

enum Step {
    Root,
    Up,
    Name(OsString),
}

fn steps(path: &Path) -> VecDeque<Step> {
    path.components()
        .filter_map(|c| match c {
            Component::Prefix(_) | Component::RootDir => Some(Step::Root),
            Component::CurDir => None,
            Component::ParentDir => Some(Step::Up),
            Component::Normal(name) => Some(Step::Name(name.to_os_string())),
        })
        .collect()
}

/// Lexical absolute form of `path` (no symlink resolution).
fn absolute(path: &Path) -> PathBuf {
    let mut out = PathBuf::from("/");
    for step in steps(path) {
        match step {
            Step::Root => out = PathBuf::from("/"),
            Step::Up => {
                out.pop();
            }
            Step::Name(name) => out.push(name),
        }
    }
    out
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path.display()))
}

/// An in-memory tree of files, directories and symlinks.
#[derive(Debug, Default)]
pub struct MemoryFs {
    nodes: RwLock<Nodes>,
    denied: RwLock<Vec<PathBuf>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file (creating parent directories).
    pub fn with_file(self, path: impl AsRef<Path>, contents: impl Into<String>) -> Self {
        self.add_file(path, contents);
        self
    }

    /// Add a directory (creating parent directories).
    pub fn with_dir(self, path: impl AsRef<Path>) -> Self {
        self.add_dir(path);
        self
    }

    /// Add a symlink at `link` pointing to `target` (creating parent directories of `link`).
    pub fn with_symlink(self, link: impl AsRef<Path>, target: impl AsRef<Path>) -> Self {
        let link = absolute(link.as_ref());
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = link.parent() {
            insert_dirs(&mut nodes, parent);
        }
        nodes.insert(link, Node::Symlink(target.as_ref().to_path_buf()));
        drop(nodes);
        self
    }

    /// Make everything below `path` fail with `PermissionDenied`. `path` itself stays visible.
    pub fn with_denied(self, path: impl AsRef<Path>) -> Self {
        self.denied
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(absolute(path.as_ref()));
        self
    }

    pub fn add_file(&self, path: impl AsRef<Path>, contents: impl Into<String>) {
        let path = absolute(path.as_ref());
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = path.parent() {
            insert_dirs(&mut nodes, parent);
        }
        nodes.insert(path, Node::File(contents.into()));
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = absolute(path.as_ref());
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        insert_dirs(&mut nodes, &path);
    }

    /// Remove `path` and everything below it.
    pub fn remove_tree(&self, path: impl AsRef<Path>) {
        let path = absolute(path.as_ref());
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        nodes.retain(|key, _| !key.starts_with(&path));
    }

    fn check_access(&self, candidate: &Path) -> io::Result<()> {
        let denied = self.denied.read().unwrap_or_else(PoisonError::into_inner);
        if denied
            .iter()
            .any(|root| candidate != root && candidate.starts_with(root))
        {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("permission denied: {}", candidate.display()),
            ));
        }
        Ok(())
    }

    /// Resolve `path` to the location of the node it names. `Ok(None)` when missing.
    fn resolve(&self, nodes: &Nodes, path: &Path, follow_last: bool) -> io::Result<Option<PathBuf>> {
        let mut pending = steps(path);
        let mut current = PathBuf::from("/");
        let mut hops = 0;

        while let Some(step) = pending.pop_front() {
            match step {
                Step::Root => current = PathBuf::from("/"),
                Step::Up => {
                    current.pop();
                }
                Step::Name(name) => {
                    let candidate = current.join(&name);
                    self.check_access(&candidate)?;
                    match nodes.get(&candidate) {
                        None => return Ok(None),
                        Some(Node::Symlink(target)) if follow_last || !pending.is_empty() => {
                            hops += 1;
                            if hops > MAX_SYMLINK_HOPS {
                                return Err(io::Error::other("too many levels of symbolic links"));
                            }
                            let mut expanded = steps(target);
                            expanded.extend(pending.drain(..));
                            pending = expanded;
                        }
                        Some(Node::File(_)) if !pending.is_empty() => return Ok(None),
                        Some(_) => current = candidate,
                    }
                }
            }
        }
        Ok(Some(current))
    }

    fn kind_at(&self, nodes: &Nodes, path: &Path) -> io::Result<Option<EntryKind>> {
        let Some(resolved) = self.resolve(nodes, path, true)? else {
            return Ok(None);
        };
        if resolved == Path::new("/") {
            return Ok(Some(EntryKind::Dir));
        }
        Ok(match nodes.get(&resolved) {
            Some(Node::File(_)) => Some(EntryKind::File),
            Some(Node::Dir) => Some(EntryKind::Dir),
            Some(Node::Symlink(_)) | None => None,
        })
    }
}

fn insert_dirs(nodes: &mut Nodes, path: &Path) {
    for ancestor in path.ancestors() {
        if ancestor == Path::new("/") || ancestor.as_os_str().is_empty() {
            continue;
        }
        nodes.entry(ancestor.to_path_buf()).or_insert(Node::Dir);
    }
}

impl FileSystem for MemoryFs {
    fn entry_kind(&self, path: &Path) -> io::Result<Option<EntryKind>> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        self.kind_at(&nodes, path)
    }

    fn is_symlink(&self, path: &Path) -> io::Result<bool> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        Ok(match self.resolve(&nodes, path, false)? {
            Some(resolved) => matches!(nodes.get(&resolved), Some(Node::Symlink(_))),
            None => false,
        })
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        let dir = self
            .resolve(&nodes, path, true)?
            .ok_or_else(|| not_found(path))?;
        if dir != Path::new("/") && !matches!(nodes.get(&dir), Some(Node::Dir)) {
            return Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("{} is not a directory", path.display()),
            ));
        }

        let mut entries = Vec::new();
        for (key, node) in nodes.iter() {
            if key.parent() != Some(dir.as_path()) {
                continue;
            }
            let Some(name) = key.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            self.check_access(key)?;
            let kind = match self.kind_at(&nodes, key) {
                Ok(kind) => kind,
                Err(e) => {
                    tracing::warn!(entry = ?key, error = %e, "Skipping entry with unreadable target");
                    continue;
                }
            };
            entries.push(DirEntry {
                name: name.to_string(),
                kind,
                is_symlink: matches!(node, Node::Symlink(_)),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        self.resolve(&nodes, path, true)?
            .ok_or_else(|| not_found(path))
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        let resolved = self
            .resolve(&nodes, path, false)?
            .ok_or_else(|| not_found(path))?;
        match nodes.get(&resolved) {
            Some(Node::Symlink(target)) => Ok(target.clone()),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a symlink", path.display()),
            )),
        }
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        let resolved = self
            .resolve(&nodes, path, true)?
            .ok_or_else(|| not_found(path))?;
        match nodes.get(&resolved) {
            Some(Node::File(contents)) => Ok(contents.clone()),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a file", path.display()),
            )),
        }
    }

    fn write_atomic(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let contents = String::from_utf8(contents.to_vec())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        let name = path.file_name().ok_or_else(|| not_found(path))?;
        let parent = path.parent().unwrap_or(Path::new("/"));
        let parent = self
            .resolve(&nodes, parent, true)?
            .ok_or_else(|| not_found(parent))?;
        if parent != Path::new("/") && !matches!(nodes.get(&parent), Some(Node::Dir)) {
            return Err(not_found(path));
        }
        nodes.insert(parent.join(name), Node::File(contents));
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        if self.kind_at(&nodes, path)? == Some(EntryKind::Dir) {
            return Ok(());
        }
        let path = absolute(path);
        if let Some(Node::File(_)) = nodes.get(&path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} exists and is a file", path.display()),
            ));
        }
        insert_dirs(&mut nodes, &path);
        Ok(())
    }

    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        let name = link.file_name().ok_or_else(|| not_found(link))?;
        let parent = link.parent().unwrap_or(Path::new("/"));
        let parent = self
            .resolve(&nodes, parent, true)?
            .ok_or_else(|| not_found(parent))?;
        let link = parent.join(name);
        if nodes.contains_key(&link) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", link.display()),
            ));
        }
        nodes.insert(link, Node::Symlink(target.to_path_buf()));
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        let resolved = self
            .resolve(&nodes, path, false)?
            .ok_or_else(|| not_found(path))?;
        match nodes.get(&resolved) {
            Some(Node::File(_)) | Some(Node::Symlink(_)) => {
                nodes.remove(&resolved);
                Ok(())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is a directory", path.display()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_create_parent_directories() {
        let fs = MemoryFs::new().with_file("/code/blog/artisan", "");

        assert_eq!(fs.entry_kind(Path::new("/code")).unwrap(), Some(EntryKind::Dir));
        assert!(fs.is_file(Path::new("/code/blog/artisan")).unwrap());
        assert!(!fs.exists(Path::new("/code/blog/missing")).unwrap());
    }

    #[test]
    fn symlinks_resolve_relative_and_absolute_targets() {
        let fs = MemoryFs::new()
            .with_file("/code/blog/public/index.php", "")
            .with_symlink("/home/Sites/blog", "/code/blog")
            .with_symlink("/home/Sites/alias", "blog");

        assert_eq!(
            fs.canonicalize(Path::new("/home/Sites/alias/public")).unwrap(),
            PathBuf::from("/code/blog/public")
        );
        assert!(fs.is_symlink(Path::new("/home/Sites/blog")).unwrap());
        assert!(fs.is_file(Path::new("/home/Sites/blog/public/index.php")).unwrap());
    }

    #[test]
    fn symlink_loops_are_errors() {
        let fs = MemoryFs::new()
            .with_symlink("/a", "/b")
            .with_symlink("/b", "/a");

        assert!(fs.entry_kind(Path::new("/a")).is_err());
        let names: Vec<_> = fs
            .read_dir(Path::new("/"))
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert!(names.is_empty());
    }

    #[test]
    fn denied_paths_fail_below_the_root_only() {
        let fs = MemoryFs::new()
            .with_file("/code/locked/artisan", "")
            .with_denied("/code/locked");

        assert!(fs.is_dir(Path::new("/code/locked")).unwrap());
        let err = fs.is_file(Path::new("/code/locked/artisan")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }

    #[test]
    fn read_dir_lists_children_in_name_order() {
        let fs = MemoryFs::new()
            .with_dir("/code/zeta")
            .with_file("/code/alpha.txt", "")
            .with_symlink("/code/dangling", "/nowhere");

        let entries = fs.read_dir(Path::new("/code")).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alpha.txt", "dangling", "zeta"]);
        assert_eq!(entries[1].kind, None);
        assert!(entries[1].is_symlink);
    }

    #[test]
    fn remove_tree_drops_descendants() {
        let fs = MemoryFs::new().with_file("/code/blog/index.php", "");
        fs.remove_tree("/code/blog");

        assert!(!fs.exists(Path::new("/code/blog")).unwrap());
        assert!(fs.is_dir(Path::new("/code")).unwrap());
    }
}
