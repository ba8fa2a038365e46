//! Drivers: per-framework strategies for serving a project directory.
//!
//! # Data Flow
//! ```text
//! resolved site path
//!     → registry.rs (custom drivers, then built-ins, first `serves` wins)
//!     → selected Driver
//!         → mutate_uri          (e.g. prefix a build output directory)
//!         → is_static_file      (existing asset under the site?)
//!         → before_dispatch     (env.rs: per-site environment variables)
//!         → front_controller_path
//! ```
//!
//! # Design Decisions
//! - Built-in drivers are a closed enum held in one explicit, stable order
//! - Custom drivers are declarative files loaded once at startup, consulted first
//! - `serves` only checks existence, never reads file contents
//! - A driver that fails on the filesystem is reported and treated as not serving

pub mod builtin;
pub mod custom;
pub mod env;
pub mod registry;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::fs::{EntryKind, FileSystem};

pub use builtin::BuiltinDriver;
pub use custom::CustomDriver;
pub use env::RequestEnv;
pub use registry::DriverRegistry;

/// Errors raised by driver checks and custom driver definitions.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to inspect {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid driver definition {path}: {reason}")]
    Definition { path: PathBuf, reason: String },
}

/// Priority class of a driver. Classes are consulted in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DriverClass {
    Custom,
    Specific,
    Basic,
}

impl DriverClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverClass::Custom => "custom",
            DriverClass::Specific => "specific",
            DriverClass::Basic => "basic",
        }
    }
}

/// The project a driver is asked about.
#[derive(Clone, Copy)]
pub struct Site<'a> {
    pub fs: &'a dyn FileSystem,
    /// Canonical site directory.
    pub path: &'a Path,
    /// Site name as requested (without the TLD).
    pub name: &'a str,
}

impl fmt::Debug for Site<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Site")
            .field("path", &self.path)
            .field("name", &self.name)
            .finish()
    }
}

impl<'a> Site<'a> {
    pub fn new(fs: &'a dyn FileSystem, path: &'a Path, name: &'a str) -> Self {
        Self { fs, path, name }
    }

    /// `rel` (a site-relative path or URI) under the site directory.
    pub fn join(&self, rel: &str) -> PathBuf {
        let rel = rel.trim_start_matches('/');
        if rel.is_empty() {
            self.path.to_path_buf()
        } else {
            self.path.join(rel)
        }
    }

    fn kind(&self, rel: &str) -> Result<Option<EntryKind>, DriverError> {
        let path = self.join(rel);
        self.fs
            .entry_kind(&path)
            .map_err(|source| DriverError::Io { path, source })
    }

    pub fn exists(&self, rel: &str) -> Result<bool, DriverError> {
        Ok(self.kind(rel)?.is_some())
    }

    pub fn is_file(&self, rel: &str) -> Result<bool, DriverError> {
        Ok(self.kind(rel)? == Some(EntryKind::File))
    }

    pub fn is_dir(&self, rel: &str) -> Result<bool, DriverError> {
        Ok(self.kind(rel)? == Some(EntryKind::Dir))
    }

    /// The path of `rel` if it is an existing regular file.
    pub fn file_at(&self, rel: &str) -> Result<Option<PathBuf>, DriverError> {
        Ok(self.is_file(rel)?.then(|| self.join(rel)))
    }

    /// The first of `candidates` that is an existing regular file.
    pub fn first_file<'c>(
        &self,
        candidates: impl IntoIterator<Item = &'c str>,
    ) -> Result<Option<PathBuf>, DriverError> {
        for candidate in candidates {
            if let Some(path) = self.file_at(candidate)? {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }
}

/// The five operations every driver provides.
pub trait Driver: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn class(&self) -> DriverClass;

    /// Whether this driver handles the site. Existence checks only.
    fn serves(&self, site: &Site<'_>, uri: &str) -> Result<bool, DriverError>;

    /// Rewrite the URI before static and front controller resolution.
    fn mutate_uri(&self, uri: &str) -> String {
        uri.to_string()
    }

    /// Absolute path of an existing static asset for `uri`.
    fn is_static_file(&self, site: &Site<'_>, uri: &str) -> Result<Option<PathBuf>, DriverError>;

    /// Absolute path of the dynamic entry point, `None` if the site has none for `uri`.
    fn front_controller_path(
        &self,
        site: &Site<'_>,
        uri: &str,
    ) -> Result<Option<PathBuf>, DriverError>;

    /// Collect request metadata for the front controller. Must not change any path.
    fn before_dispatch(&self, site: &Site<'_>, _uri: &str, env: &mut RequestEnv) {
        env::load_site_env(site, env);
    }
}
