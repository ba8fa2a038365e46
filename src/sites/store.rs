//! Binding store: resolution and administration of site bindings.
//!
//! # Responsibilities
//! - Resolve a site name to a proxy target, a link or a parked directory
//! - Create and remove links (symlinks in `<home>/Sites`)
//! - Maintain parked roots, proxies and per-site overrides in the registry
//!
//! # Design Decisions
//! - The registry is read from disk on every call; nothing is cached in-process
//! - Mutations are read-modify-write with an atomic replace of the document
//! - Filesystem failures while scanning a link or a parked root skip that candidate;
//!   only an unreadable or unparsable registry is an error

use std::collections::BTreeMap;
use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::fs::{EntryKind, FileSystem};
use crate::sites::binding::{Link, ParkedSite, SiteBinding};
use crate::sites::registry::{ProxyTarget, Registry, SiteOverrides, Toggle};

const REGISTRY_FILE: &str = "config.json";
const SITES_DIR: &str = "Sites";
const DRIVERS_DIR: &str = "Drivers";

/// Errors raised by the binding store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("registry {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid site name {0:?}")]
    InvalidSiteName(String),

    #[error("{url:?} is not a valid proxy URL: {reason}")]
    InvalidProxyUrl { url: String, reason: String },

    #[error("{0:?} is not a valid loopback address")]
    InvalidLoopback(String),

    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("{0} exists and is not a link")]
    NotALink(PathBuf),

    #[error("{0} holds the site links and cannot be forgotten")]
    ProtectedPath(PathBuf),
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Persistent registry of site bindings rooted at a home directory.
#[derive(Debug, Clone)]
pub struct BindingStore {
    fs: Arc<dyn FileSystem>,
    home: PathBuf,
}

impl BindingStore {
    pub fn new(fs: Arc<dyn FileSystem>, home: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            home: home.into(),
        }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn registry_path(&self) -> PathBuf {
        self.home.join(REGISTRY_FILE)
    }

    /// Directory holding link symlinks.
    pub fn sites_dir(&self) -> PathBuf {
        self.home.join(SITES_DIR)
    }

    /// Directory scanned for custom driver definitions.
    pub fn drivers_dir(&self) -> PathBuf {
        self.home.join(DRIVERS_DIR)
    }

    pub fn filesystem(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// Read the registry. A missing file yields the default registry.
    pub fn read(&self) -> Result<Registry, StoreError> {
        let path = self.registry_path();
        let content = match self.fs.read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Registry::default()),
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        Registry::from_json(&content).map_err(|source| StoreError::Corrupt { path, source })
    }

    fn write(&self, registry: &Registry) -> Result<(), StoreError> {
        let path = self.registry_path();
        let json = registry
            .to_json()
            .map_err(|source| StoreError::Corrupt {
                path: path.clone(),
                source,
            })?;
        self.fs
            .create_dir_all(&self.home)
            .map_err(|e| StoreError::io(&self.home, e))?;
        self.fs
            .write_atomic(&path, json.as_bytes())
            .map_err(|e| StoreError::io(&path, e))
    }

    /// Read-modify-write. The document is only written when `apply` changed it.
    fn update<T>(&self, apply: impl FnOnce(&mut Registry) -> T) -> Result<T, StoreError> {
        let mut registry = self.read()?;
        let before = registry.clone();
        let out = apply(&mut registry);
        if registry != before {
            self.write(&registry)?;
        }
        Ok(out)
    }

    /// Create the home layout and a base registry if none exists.
    ///
    /// Returns `true` when a new registry was written.
    pub fn ensure_base(&self) -> Result<bool, StoreError> {
        for dir in [self.home.clone(), self.sites_dir(), self.drivers_dir()] {
            self.fs
                .create_dir_all(&dir)
                .map_err(|e| StoreError::io(&dir, e))?;
        }
        let path = self.registry_path();
        if self.fs.exists(&path).map_err(|e| StoreError::io(&path, e))? {
            return Ok(false);
        }
        let registry = Registry {
            paths: vec![self.sites_dir()],
            ..Registry::default()
        };
        self.write(&registry)?;
        tracing::info!(path = ?path, "Wrote base registry");
        Ok(true)
    }

    // ---------------------------------------------------------------------
    // Resolution
    // ---------------------------------------------------------------------

    /// Resolve `site_name` against a freshly read registry.
    pub fn resolve_site_path(&self, site_name: &str) -> Result<Option<SiteBinding>, StoreError> {
        let registry = self.read()?;
        Ok(self.resolve_in(&registry, site_name))
    }

    /// Resolve `site_name` against an already loaded registry.
    ///
    /// Proxies match on the exact name. Otherwise each candidate name (the full name,
    /// then its last label for subdomains) is tried as a link and then in each parked
    /// root, in registry order.
    pub fn resolve_in(&self, registry: &Registry, site_name: &str) -> Option<SiteBinding> {
        let site_name = site_name.to_ascii_lowercase();

        if let Some(target) = registry.proxies.get(&site_name) {
            return Some(SiteBinding::Proxy {
                name: site_name,
                target: target.clone(),
            });
        }

        for candidate in candidate_names(&site_name) {
            if let Some(link) = self.find_link(candidate) {
                return Some(SiteBinding::Link {
                    name: candidate.to_string(),
                    link,
                });
            }
            for root in &registry.paths {
                if let Some(path) = self.find_in_root(root, candidate) {
                    return Some(SiteBinding::Parked {
                        name: candidate.to_string(),
                        root: root.clone(),
                        path,
                    });
                }
            }
        }
        None
    }

    fn find_link(&self, name: &str) -> Option<PathBuf> {
        let sites = self.sites_dir();
        let entries = match self.fs.read_dir(&sites) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(dir = ?sites, error = %e, "Links directory not readable");
                return None;
            }
        };
        entries
            .into_iter()
            .find(|entry| entry.is_symlink && entry.name.eq_ignore_ascii_case(name))
            .and_then(|entry| {
                if entry.kind == Some(EntryKind::Dir) {
                    Some(sites.join(entry.name))
                } else {
                    tracing::debug!(link = %entry.name, "Skipping dead link");
                    None
                }
            })
    }

    fn find_in_root(&self, root: &Path, name: &str) -> Option<PathBuf> {
        let entries = match self.fs.read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(root = ?root, error = %e, "Parked root not readable");
                return None;
            }
        };
        entries
            .into_iter()
            .find(|entry| entry.kind == Some(EntryKind::Dir) && entry.name.eq_ignore_ascii_case(name))
            .map(|entry| root.join(entry.name))
    }

    /// The configured default site path, if it exists.
    pub fn default_site_path(&self, registry: &Registry) -> Option<PathBuf> {
        let path = registry.default.as_ref()?;
        match self.fs.is_dir(path) {
            Ok(true) => Some(path.clone()),
            Ok(false) => {
                tracing::debug!(path = ?path, "Default site path does not exist");
                None
            }
            Err(e) => {
                tracing::warn!(path = ?path, error = %e, "Default site path not readable");
                None
            }
        }
    }

    // ---------------------------------------------------------------------
    // Links
    // ---------------------------------------------------------------------

    /// Link `target` as `name`. An existing link of the same name is replaced.
    pub fn add_link(&self, name: &str, target: &Path) -> Result<PathBuf, StoreError> {
        let registry = self.read()?;
        let name = normalize_site_name(name, &registry.tld)?;

        let target = self
            .fs
            .canonicalize(target)
            .map_err(|e| StoreError::io(target, e))?;
        if !self.fs.is_dir(&target).map_err(|e| StoreError::io(&target, e))? {
            return Err(StoreError::NotADirectory(target));
        }

        let sites = self.sites_dir();
        self.fs
            .create_dir_all(&sites)
            .map_err(|e| StoreError::io(&sites, e))?;

        let link = sites.join(&name);
        if self.fs.is_symlink(&link).map_err(|e| StoreError::io(&link, e))? {
            self.fs
                .remove_file(&link)
                .map_err(|e| StoreError::io(&link, e))?;
        } else if self.fs.exists(&link).map_err(|e| StoreError::io(&link, e))? {
            return Err(StoreError::NotALink(link));
        }

        self.fs
            .symlink(&target, &link)
            .map_err(|e| StoreError::io(&link, e))?;
        tracing::info!(site = %name, target = ?target, "Link created");
        Ok(link)
    }

    /// Remove the link `name` and its overrides. Returns `false` if there was no such link.
    pub fn remove_link(&self, name: &str) -> Result<bool, StoreError> {
        let registry = self.read()?;
        let name = normalize_site_name(name, &registry.tld)?;
        let link = self.sites_dir().join(&name);

        if !self.fs.is_symlink(&link).map_err(|e| StoreError::io(&link, e))? {
            return Ok(false);
        }
        self.fs
            .remove_file(&link)
            .map_err(|e| StoreError::io(&link, e))?;
        self.update(|registry| {
            registry.sites.remove(&name);
        })?;
        tracing::info!(site = %name, "Link removed");
        Ok(true)
    }

    /// All links, including dead ones (with no target).
    pub fn links(&self) -> Result<Vec<Link>, StoreError> {
        let registry = self.read()?;
        let sites = self.sites_dir();
        let entries = match self.fs.read_dir(&sites) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&sites, e)),
        };

        let mut links = Vec::new();
        for entry in entries.into_iter().filter(|e| e.is_symlink) {
            let link = sites.join(&entry.name);
            let target = match entry.kind {
                Some(_) => self.fs.canonicalize(&link).ok(),
                None => None,
            };
            links.push(Link {
                overrides: registry.overrides(&entry.name).cloned().unwrap_or_default(),
                name: entry.name,
                link,
                target,
            });
        }
        Ok(links)
    }

    /// Remove every link whose target no longer exists. Returns the removed names.
    pub fn prune_dead_links(&self) -> Result<Vec<String>, StoreError> {
        let mut removed = Vec::new();
        for link in self.links()? {
            if link.target.is_some() {
                continue;
            }
            if let Err(e) = self.fs.remove_file(&link.link) {
                tracing::warn!(site = %link.name, error = %e, "Cannot remove dead link");
                continue;
            }
            tracing::info!(site = %link.name, "Pruned dead link");
            removed.push(link.name);
        }
        Ok(removed)
    }

    // ---------------------------------------------------------------------
    // Parked roots
    // ---------------------------------------------------------------------

    /// Append `path` to the parked roots (no-op if already present).
    pub fn add_parked_root(&self, path: &Path) -> Result<PathBuf, StoreError> {
        self.insert_parked_root(path, false)
    }

    /// Insert `path` at the front of the parked roots, moving it if already present.
    pub fn prepend_parked_root(&self, path: &Path) -> Result<PathBuf, StoreError> {
        self.insert_parked_root(path, true)
    }

    fn insert_parked_root(&self, path: &Path, prepend: bool) -> Result<PathBuf, StoreError> {
        let path = self
            .fs
            .canonicalize(path)
            .map_err(|e| StoreError::io(path, e))?;
        if !self.fs.is_dir(&path).map_err(|e| StoreError::io(&path, e))? {
            return Err(StoreError::NotADirectory(path));
        }
        self.update(|registry| {
            if prepend {
                registry.paths.retain(|p| p != &path);
                registry.paths.insert(0, path.clone());
            } else if !registry.paths.contains(&path) {
                registry.paths.push(path.clone());
            }
        })?;
        tracing::info!(root = ?path, "Parked root registered");
        Ok(path)
    }

    /// Remove `path` from the parked roots. Returns `false` if it was not registered.
    ///
    /// Roots are stored canonicalized, so `path` is canonicalized too; a root that no
    /// longer exists is matched as given.
    pub fn remove_parked_root(&self, path: &Path) -> Result<bool, StoreError> {
        let path = match self.fs.canonicalize(path) {
            Ok(canonical) => canonical,
            Err(e) => {
                tracing::debug!(root = ?path, error = %e, "Cannot canonicalize parked root");
                path.to_path_buf()
            }
        };
        let sites = self.sites_dir();
        let canonical_sites = self.fs.canonicalize(&sites).unwrap_or_else(|_| sites.clone());
        if path == sites || path == canonical_sites {
            return Err(StoreError::ProtectedPath(path));
        }
        let removed = self.update(|registry| {
            let before = registry.paths.len();
            registry.paths.retain(|p| *p != path);
            registry.paths.len() != before
        })?;
        if removed {
            tracing::info!(root = ?path, "Parked root forgotten");
        }
        Ok(removed)
    }

    /// Drop parked roots that are no longer directories. Returns the removed roots.
    pub fn prune_parked_roots(&self) -> Result<Vec<PathBuf>, StoreError> {
        let fs = Arc::clone(&self.fs);
        self.update(|registry| {
            let (kept, removed): (Vec<_>, Vec<_>) = registry
                .paths
                .drain(..)
                .partition(|p| fs.is_dir(p).unwrap_or(true));
            registry.paths = kept;
            removed
        })
    }

    /// Every project directory found under the parked roots (the links directory excluded).
    pub fn parked_sites(&self) -> Result<Vec<ParkedSite>, StoreError> {
        let registry = self.read()?;
        let sites = self.sites_dir();
        let mut parked = Vec::new();
        for root in registry.paths.iter().filter(|root| **root != sites) {
            let entries = match self.fs.read_dir(root) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(root = ?root, error = %e, "Skipping unreadable parked root");
                    continue;
                }
            };
            for entry in entries.into_iter().filter(|e| e.kind == Some(EntryKind::Dir)) {
                parked.push(ParkedSite {
                    name: entry.name.to_ascii_lowercase(),
                    path: root.join(&entry.name),
                    root: root.clone(),
                });
            }
        }
        Ok(parked)
    }

    // ---------------------------------------------------------------------
    // Proxies
    // ---------------------------------------------------------------------

    pub fn add_proxy(&self, name: &str, url: &str, secure: bool) -> Result<String, StoreError> {
        let url = validate_proxy_url(url)?;
        let name = self.update_with_name(name, |registry, name| {
            registry
                .proxies
                .insert(name.to_string(), ProxyTarget::new(url.clone(), secure));
        })?;
        tracing::info!(site = %name, upstream = %url, secure, "Proxy registered");
        Ok(name)
    }

    /// Returns `false` if no proxy of that name existed.
    pub fn remove_proxy(&self, name: &str) -> Result<bool, StoreError> {
        let mut removed = false;
        let name = self.update_with_name(name, |registry, name| {
            removed = registry.proxies.remove(name).is_some();
        })?;
        if removed {
            tracing::info!(site = %name, "Proxy removed");
        }
        Ok(removed)
    }

    pub fn proxies(&self) -> Result<BTreeMap<String, ProxyTarget>, StoreError> {
        Ok(self.read()?.proxies)
    }

    // ---------------------------------------------------------------------
    // Overrides and settings
    // ---------------------------------------------------------------------

    /// Pin (or with `None` unpin) the runtime version of a site.
    pub fn set_runtime(&self, name: &str, version: Option<&str>) -> Result<String, StoreError> {
        self.update_overrides(name, |overrides| {
            overrides.runtime = version.map(str::to_string);
        })
    }

    pub fn set_secure(&self, name: &str, secure: bool) -> Result<String, StoreError> {
        self.update_overrides(name, |overrides| overrides.secure = secure)
    }

    fn update_overrides(
        &self,
        name: &str,
        apply: impl FnOnce(&mut SiteOverrides),
    ) -> Result<String, StoreError> {
        self.update_with_name(name, |registry, name| {
            let entry = registry.sites.entry(name.to_string()).or_default();
            apply(entry);
            if entry.is_empty() {
                registry.sites.remove(name);
            }
        })
    }

    fn update_with_name(
        &self,
        name: &str,
        apply: impl FnOnce(&mut Registry, &str),
    ) -> Result<String, StoreError> {
        let mut registry = self.read()?;
        let name = normalize_site_name(name, &registry.tld)?;
        let before = registry.clone();
        apply(&mut registry, &name);
        if registry != before {
            self.write(&registry)?;
        }
        Ok(name)
    }

    pub fn set_directory_listing(&self, enabled: bool) -> Result<(), StoreError> {
        self.update(|registry| registry.directory_listing = Some(Toggle::from(enabled)))
    }

    /// Set (or with `None` clear) the fallback site path.
    pub fn set_default_site(&self, path: Option<&Path>) -> Result<(), StoreError> {
        let path = match path {
            Some(path) => {
                let path = self
                    .fs
                    .canonicalize(path)
                    .map_err(|e| StoreError::io(path, e))?;
                if !self.fs.is_dir(&path).map_err(|e| StoreError::io(&path, e))? {
                    return Err(StoreError::NotADirectory(path));
                }
                Some(path)
            }
            None => None,
        };
        self.update(|registry| registry.default = path)
    }

    pub fn set_tld(&self, tld: &str) -> Result<String, StoreError> {
        let tld = tld.trim().trim_start_matches('.').to_ascii_lowercase();
        if tld.is_empty() || !tld.chars().all(is_label_char) {
            return Err(StoreError::InvalidSiteName(tld));
        }
        self.update(|registry| registry.tld = tld.clone())?;
        Ok(tld)
    }

    pub fn set_loopback(&self, loopback: &str) -> Result<(), StoreError> {
        let address: IpAddr = loopback
            .trim()
            .parse()
            .map_err(|_| StoreError::InvalidLoopback(loopback.to_string()))?;
        self.update(|registry| registry.loopback = address.to_string())
    }
}

/// Names to try for a site, most specific first.
fn candidate_names(site_name: &str) -> Vec<&str> {
    let mut names = vec![site_name];
    if let Some((_, last)) = site_name.rsplit_once('.') {
        if !last.is_empty() {
            names.push(last);
        }
    }
    names
}

fn is_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Lowercase `name`, drop a trailing `.<tld>` and check it is a usable host label sequence.
pub fn normalize_site_name(name: &str, tld: &str) -> Result<String, StoreError> {
    let lowered = name.trim().to_ascii_lowercase();
    let suffix = format!(".{}", tld.to_ascii_lowercase());
    let stripped = lowered.strip_suffix(&suffix).unwrap_or(&lowered);

    let valid = !stripped.is_empty()
        && stripped
            .split('.')
            .all(|label| !label.is_empty() && label.chars().all(is_label_char));
    if !valid {
        return Err(StoreError::InvalidSiteName(name.to_string()));
    }
    Ok(stripped.to_string())
}

fn validate_proxy_url(raw: &str) -> Result<String, StoreError> {
    let raw = raw.trim();
    let invalid = |reason: &str| StoreError::InvalidProxyUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };
    let url = url::Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
    if url.scheme() != "http" {
        return Err(invalid("only http:// upstreams can be proxied"));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host"));
    }
    Ok(raw.to_string())
}
