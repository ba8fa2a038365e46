//! Result types of site resolution and administration.

use std::path::{Path, PathBuf};

use crate::sites::registry::{ProxyTarget, SiteOverrides};

/// What a site name is bound to.
#[derive(Debug, Clone, PartialEq)]
pub enum SiteBinding {
    /// Requests are forwarded to an upstream URL.
    Proxy { name: String, target: ProxyTarget },

    /// An explicit link in the links directory. `link` is the symlink path, not its target.
    Link { name: String, link: PathBuf },

    /// A directory found under a parked root.
    Parked {
        name: String,
        root: PathBuf,
        path: PathBuf,
    },
}

impl SiteBinding {
    /// Name the binding was found under (for subdomains, the matched label).
    pub fn name(&self) -> &str {
        match self {
            SiteBinding::Proxy { name, .. }
            | SiteBinding::Link { name, .. }
            | SiteBinding::Parked { name, .. } => name,
        }
    }

    /// Directory serving the site. `None` for proxies.
    pub fn path(&self) -> Option<&Path> {
        match self {
            SiteBinding::Proxy { .. } => None,
            SiteBinding::Link { link, .. } => Some(link),
            SiteBinding::Parked { path, .. } => Some(path),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SiteBinding::Proxy { .. } => "proxy",
            SiteBinding::Link { .. } => "link",
            SiteBinding::Parked { .. } => "parked",
        }
    }
}

/// A link as listed by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub name: String,
    /// Location of the symlink.
    pub link: PathBuf,
    /// Canonical target, `None` when the link is dead.
    pub target: Option<PathBuf>,
    pub overrides: SiteOverrides,
}

/// A project directory under a parked root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParkedSite {
    pub name: String,
    pub path: PathBuf,
    pub root: PathBuf,
}
