//! Terminal outcomes of a dispatch.

use std::path::{Path, PathBuf};

use crate::drivers::RequestEnv;
use crate::sites::{ProxyTarget, SiteOverrides};

/// What to do with a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Stream an existing file.
    ServeStatic(PathBuf),

    /// Execute (or, for non-script files, send) the front controller.
    Dispatch { front_controller: PathBuf },

    /// Forward verbatim to an upstream.
    ProxyTo(ProxyTarget),

    /// Render the contents of this directory.
    DirectoryListing(PathBuf),

    NotFound,
}

impl Action {
    /// Label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Action::ServeStatic(_) => "static",
            Action::Dispatch { .. } => "dispatch",
            Action::ProxyTo(_) => "proxy",
            Action::DirectoryListing(_) => "listing",
            Action::NotFound => "not_found",
        }
    }
}

/// Everything the HTTP layer needs to carry out one request.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRequest {
    /// Site name derived from the (effective) host.
    pub site_name: String,

    /// Effective host: the request's host, or `<site>.<tld>` recovered from an IP request.
    pub host: String,

    /// Effective request URI (path and query) after IP rewriting, before any mutation.
    pub request_uri: String,

    /// Canonical site directory, when one was resolved.
    pub site_path: Option<PathBuf>,

    /// Normalized URI after the driver's mutation.
    pub uri: String,

    /// Name of the selected driver.
    pub driver: Option<String>,

    /// Overrides registered for the site (pinned runtime, TLS).
    pub overrides: SiteOverrides,

    /// Variables collected by the driver for the front controller.
    pub env: RequestEnv,

    pub action: Action,
}

impl ResolvedRequest {
    pub(crate) fn new(site_name: String, host: String, request_uri: String, uri: String) -> Self {
        Self {
            site_name,
            host,
            request_uri,
            site_path: None,
            uri,
            driver: None,
            overrides: SiteOverrides::default(),
            env: RequestEnv::new(),
            action: Action::NotFound,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.action == Action::NotFound
    }

    /// Whether the site should only be served over TLS.
    pub fn is_secure(&self) -> bool {
        match &self.action {
            Action::ProxyTo(target) => target.secure,
            _ => self.overrides.secure,
        }
    }

    pub fn site_path(&self) -> Option<&Path> {
        self.site_path.as_deref()
    }
}
