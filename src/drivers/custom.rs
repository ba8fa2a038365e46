//! User-defined drivers.
//!
//! A custom driver is a TOML file named `<Name>Driver.toml` in the drivers directory:
//!
//! ```toml
//! # All markers must exist; a trailing slash requires a directory.
//! markers = ["hugo.toml", "content/"]
//! # Prefixed to every URI before resolution.
//! uri_prefix = "/public"
//! # Directory static files and the default front controller live in.
//! public_dir = "public"
//! # Entry point, relative to the site.
//! front_controller = "public/index.php"
//! ```
//!
//! Files are loaded once at startup in file-name order. A file that cannot be read or
//! parsed is logged and skipped.

use std::io;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

use crate::drivers::{Driver, DriverClass, DriverError, Site};
use crate::fs::{EntryKind, FileSystem};

pub const DRIVER_FILE_SUFFIX: &str = "Driver.toml";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Definition {
    markers: Vec<String>,
    #[serde(default)]
    match_any: bool,
    #[serde(default)]
    uri_prefix: Option<String>,
    #[serde(default)]
    public_dir: Option<String>,
    #[serde(default)]
    front_controller: Option<String>,
}

/// A driver described by a definition file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomDriver {
    name: String,
    markers: Vec<String>,
    match_any: bool,
    uri_prefix: Option<String>,
    /// Site-relative, leading slash, empty for the site root.
    public_dir: String,
    front_controller: Option<String>,
}

fn is_contained(rel: &str) -> bool {
    let path = Path::new(rel.trim_end_matches('/'));
    !rel.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

impl CustomDriver {
    /// Parse a definition. `path` only labels errors.
    pub fn from_toml(name: &str, path: &Path, content: &str) -> Result<Self, DriverError> {
        let invalid = |reason: String| DriverError::Definition {
            path: path.to_path_buf(),
            reason,
        };
        let definition: Definition = toml::from_str(content).map_err(|e| invalid(e.to_string()))?;

        if definition.markers.is_empty() {
            return Err(invalid("at least one marker is required".to_string()));
        }
        let relative = definition
            .markers
            .iter()
            .chain(definition.public_dir.iter())
            .chain(definition.front_controller.iter());
        for rel in relative {
            if !is_contained(rel) {
                return Err(invalid(format!("{rel:?} must be a relative path inside the site")));
            }
        }
        if let Some(prefix) = &definition.uri_prefix {
            if !prefix.starts_with('/') || prefix.contains("..") {
                return Err(invalid(format!("uri_prefix {prefix:?} must start with '/'")));
            }
        }

        let public_dir = match definition.public_dir.as_deref().map(|d| d.trim_matches('/')) {
            None | Some("") | Some(".") => String::new(),
            Some(dir) => format!("/{dir}"),
        };

        Ok(Self {
            name: name.to_string(),
            markers: definition.markers,
            match_any: definition.match_any,
            uri_prefix: definition
                .uri_prefix
                .map(|p| p.trim_end_matches('/').to_string()),
            public_dir,
            front_controller: definition.front_controller,
        })
    }

    fn marker_present(&self, site: &Site<'_>, marker: &str) -> Result<bool, DriverError> {
        match marker.strip_suffix('/') {
            Some(dir) => site.is_dir(dir),
            None => site.exists(marker),
        }
    }
}

impl Driver for CustomDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn class(&self) -> DriverClass {
        DriverClass::Custom
    }

    fn serves(&self, site: &Site<'_>, _uri: &str) -> Result<bool, DriverError> {
        for marker in &self.markers {
            let present = self.marker_present(site, marker)?;
            if present == self.match_any {
                return Ok(present);
            }
        }
        Ok(!self.match_any)
    }

    fn mutate_uri(&self, uri: &str) -> String {
        match &self.uri_prefix {
            Some(prefix) => format!("{prefix}{uri}").trim_end_matches('/').to_string(),
            None => uri.to_string(),
        }
    }

    fn is_static_file(&self, site: &Site<'_>, uri: &str) -> Result<Option<PathBuf>, DriverError> {
        site.file_at(&format!("{}{uri}", self.public_dir))
    }

    fn front_controller_path(
        &self,
        site: &Site<'_>,
        _uri: &str,
    ) -> Result<Option<PathBuf>, DriverError> {
        match &self.front_controller {
            Some(script) => site.file_at(script),
            None => site.first_file([
                format!("{}/index.php", self.public_dir).as_str(),
                format!("{}/index.html", self.public_dir).as_str(),
            ]),
        }
    }
}

/// Load every `*Driver.toml` in `dir`, in file-name order.
pub fn load_custom_drivers(fs: &dyn FileSystem, dir: &Path) -> Vec<CustomDriver> {
    let entries = match fs.read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(dir = ?dir, "No custom drivers directory");
            return Vec::new();
        }
        Err(e) => {
            tracing::warn!(dir = ?dir, error = %e, "Cannot read custom drivers directory");
            return Vec::new();
        }
    };

    let mut drivers = Vec::new();
    for entry in entries {
        let Some(name) = entry.name.strip_suffix(DRIVER_FILE_SUFFIX) else {
            continue;
        };
        if name.is_empty() || entry.kind != Some(EntryKind::File) {
            continue;
        }
        let path = dir.join(&entry.name);
        let loaded = fs
            .read_to_string(&path)
            .map_err(|source| DriverError::Io {
                path: path.clone(),
                source,
            })
            .and_then(|content| CustomDriver::from_toml(name, &path, &content));
        match loaded {
            Ok(driver) => {
                tracing::info!(driver = %name, path = ?path, "Loaded custom driver");
                drivers.push(driver);
            }
            Err(e) => tracing::warn!(path = ?path, error = %e, "Skipping custom driver"),
        }
    }
    drivers
}
