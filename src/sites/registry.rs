//! The persisted binding registry document.
//!
//! # Responsibilities
//! - Define the JSON shape of `<home>/config.json`
//! - Preserve keys this crate does not know about on read-modify-write
//!
//! # Design Decisions
//! - Every known key is defaulted so a hand-written `{}` is a valid registry
//! - Unknown keys live in a flattened map at each level and are written back untouched
//! - Maps are ordered so the written document is stable between runs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_TLD: &str = "test";
pub const DEFAULT_LOOPBACK: &str = "127.0.0.1";

/// Root of the binding registry.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Registry {
    /// Top-level domain suffix (without the dot).
    #[serde(default = "default_tld")]
    pub tld: String,

    /// Loopback address the DNS resolver points site names at.
    #[serde(default = "default_loopback")]
    pub loopback: String,

    /// Parked roots, scanned in order.
    #[serde(default)]
    pub paths: Vec<PathBuf>,

    /// Site path used when no binding matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<PathBuf>,

    /// Directory listing instead of 404 when no front controller exists.
    #[serde(
        rename = "directory-listing",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub directory_listing: Option<Toggle>,

    /// Proxy bindings keyed by site name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub proxies: BTreeMap<String, ProxyTarget>,

    /// Per-site overrides keyed by site name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sites: BTreeMap<String, SiteOverrides>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_tld() -> String {
    DEFAULT_TLD.to_string()
}

fn default_loopback() -> String {
    DEFAULT_LOOPBACK.to_string()
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            tld: default_tld(),
            loopback: default_loopback(),
            paths: Vec::new(),
            default: None,
            directory_listing: None,
            proxies: BTreeMap::new(),
            sites: BTreeMap::new(),
            extra: Map::new(),
        }
    }
}

impl Registry {
    pub fn directory_listing_enabled(&self) -> bool {
        self.directory_listing == Some(Toggle::On)
    }

    pub fn overrides(&self, site_name: &str) -> Option<&SiteOverrides> {
        self.sites.get(site_name)
    }

    /// Parse a registry document.
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(content)
    }

    /// Render the registry as pretty JSON with a trailing newline.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }
}

/// `"on"` / `"off"` switch as stored in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Toggle {
    On,
    Off,
}

impl From<bool> for Toggle {
    fn from(on: bool) -> Self {
        if on {
            Toggle::On
        } else {
            Toggle::Off
        }
    }
}

/// Upstream of a proxy binding.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProxyTarget {
    pub url: String,

    #[serde(default)]
    pub secure: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProxyTarget {
    pub fn new(url: impl Into<String>, secure: bool) -> Self {
        Self {
            url: url.into(),
            secure,
            extra: Map::new(),
        }
    }
}

/// Overrides attached to a site name.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SiteOverrides {
    /// Pinned language-runtime version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,

    /// Served over TLS.
    #[serde(default)]
    pub secure: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SiteOverrides {
    /// True when the entry carries nothing worth persisting.
    pub fn is_empty(&self) -> bool {
        self.runtime.is_none() && !self.secure && self.extra.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gets_defaults() {
        let registry = Registry::from_json("{}").unwrap();
        assert_eq!(registry.tld, "test");
        assert_eq!(registry.loopback, "127.0.0.1");
        assert!(registry.paths.is_empty());
        assert!(!registry.directory_listing_enabled());

        assert_eq!(Registry::from_json("  \n").unwrap(), Registry::default());
    }

    #[test]
    fn unknown_keys_survive_a_round_trip() {
        let source = r#"{
            "tld": "localhost",
            "loopback": "127.0.0.1",
            "paths": ["/code"],
            "share-tool": "ngrok",
            "proxies": {"mail": {"url": "http://localhost:8025", "secure": false, "note": "mailpit"}},
            "sites": {"blog": {"runtime": "8.2", "secure": true, "color": "blue"}}
        }"#;

        let registry = Registry::from_json(source).unwrap();
        assert_eq!(registry.extra.get("share-tool"), Some(&Value::from("ngrok")));

        let reparsed = Registry::from_json(&registry.to_json().unwrap()).unwrap();
        assert_eq!(reparsed, registry);
        assert_eq!(
            reparsed.proxies["mail"].extra.get("note"),
            Some(&Value::from("mailpit"))
        );
        assert_eq!(
            reparsed.sites["blog"].extra.get("color"),
            Some(&Value::from("blue"))
        );
    }

    #[test]
    fn directory_listing_uses_on_off_strings() {
        let registry = Registry::from_json(r#"{"directory-listing": "on"}"#).unwrap();
        assert!(registry.directory_listing_enabled());

        let json = registry.to_json().unwrap();
        assert!(json.contains("\"directory-listing\": \"on\""));

        assert!(Registry::from_json(r#"{"directory-listing": true}"#).is_err());
    }

    #[test]
    fn corrupt_documents_are_errors() {
        assert!(Registry::from_json("{\"tld\": ").is_err());
        assert!(Registry::from_json("[]").is_err());
    }
}
