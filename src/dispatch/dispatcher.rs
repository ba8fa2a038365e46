//! The per-request state machine.
//!
//! ```text
//! ParseHost → ResolveSite → SelectDriver → MutateUri → ClassifyRequest → Terminal
//! ```
//!
//! Every branch that cannot resolve a path ends in `Action::NotFound`. The only error is
//! an unusable registry.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::dispatch::action::{Action, ResolvedRequest};
use crate::dispatch::host::{
    is_ip_host, is_php, normalize_uri, site_name_from_host, split_first_segment,
};
use crate::drivers::{Driver, DriverRegistry, RequestEnv, Site};
use crate::observability::metrics;
use crate::sites::{BindingStore, Registry, SiteBinding, StoreError};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The registry cannot be read or parsed; nothing can be served until it is fixed.
    #[error("site registry {path} is unusable: {source}")]
    ConfigurationCorrupt {
        path: PathBuf,
        #[source]
        source: StoreError,
    },
}

/// Resolves requests against the binding store and the driver registry.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    store: BindingStore,
    drivers: Arc<DriverRegistry>,
}

impl Dispatcher {
    pub fn new(store: BindingStore, drivers: Arc<DriverRegistry>) -> Self {
        Self { store, drivers }
    }

    pub fn store(&self) -> &BindingStore {
        &self.store
    }

    pub fn drivers(&self) -> &DriverRegistry {
        &self.drivers
    }

    /// Resolve one request. The registry is re-read on every call.
    pub fn dispatch(&self, host: &str, request_uri: &str) -> Result<ResolvedRequest, DispatchError> {
        let registry = self
            .store
            .read()
            .map_err(|source| DispatchError::ConfigurationCorrupt {
                path: self.store.registry_path(),
                source,
            })?;

        // ParseHost
        let (host, request_uri) = self.effective_host(&registry, host, request_uri);
        let site_name = site_name_from_host(&host, &registry.tld);
        let uri = normalize_uri(&request_uri);
        let mut resolved = ResolvedRequest::new(site_name, host, request_uri, uri);

        // ResolveSite
        let site_dir = match self.store.resolve_in(&registry, &resolved.site_name) {
            Some(SiteBinding::Proxy { target, .. }) => {
                resolved.action = Action::ProxyTo(target);
                return Ok(resolved);
            }
            Some(binding) => {
                resolved.overrides = registry
                    .overrides(binding.name())
                    .cloned()
                    .unwrap_or_default();
                binding.path().map(PathBuf::from)
            }
            None => self.store.default_site_path(&registry),
        };
        let Some(site_dir) = site_dir else {
            tracing::debug!(site = %resolved.site_name, "No binding and no default site");
            return Ok(resolved);
        };

        let fs = &**self.store.filesystem();
        let site_path = match fs.canonicalize(&site_dir) {
            Ok(path) => path,
            Err(e) => {
                tracing::debug!(site = %resolved.site_name, path = ?site_dir, error = %e, "Site path does not resolve");
                return Ok(resolved);
            }
        };
        let site = Site::new(fs, &site_path, &resolved.site_name);

        // SelectDriver
        let Some(driver) = self.drivers.select(&site, &resolved.uri) else {
            tracing::debug!(site = %resolved.site_name, "No driver serves the site");
            return Ok(resolved);
        };

        // MutateUri
        let uri = driver.mutate_uri(&resolved.uri);

        // ClassifyRequest
        let (action, env) = classify(driver, &site, &uri, registry.directory_listing_enabled());

        resolved.driver = Some(driver.name().to_string());
        resolved.site_path = Some(site_path);
        resolved.uri = uri;
        resolved.env = env;
        resolved.action = action;
        Ok(resolved)
    }

    /// For IP-literal hosts, recover `<site>.<tld>` from the first URI segment.
    fn effective_host(&self, registry: &Registry, host: &str, request_uri: &str) -> (String, String) {
        if !is_ip_host(host) {
            return (host.to_string(), request_uri.to_string());
        }
        let Some((segment, rest)) = split_first_segment(request_uri) else {
            return (host.to_string(), request_uri.to_string());
        };

        let segment = segment.to_ascii_lowercase();
        let suffix = format!(".{}", registry.tld);
        let site = match segment.strip_suffix(&suffix) {
            Some(name) if !name.is_empty() => Some(name.to_string()),
            _ if self.store.resolve_in(registry, &segment).is_some() => Some(segment.clone()),
            _ => None,
        };

        match site {
            Some(name) => {
                let effective = format!("{name}{suffix}");
                tracing::debug!(ip = %host, host = %effective, uri = %rest, "Recovered site from IP request");
                (effective, rest)
            }
            None => (host.to_string(), request_uri.to_string()),
        }
    }
}

/// Decide between a static file, the front controller, a listing and 404.
fn classify(
    driver: &dyn Driver,
    site: &Site<'_>,
    uri: &str,
    directory_listing: bool,
) -> (Action, RequestEnv) {
    let mut env = RequestEnv::new();

    if uri != "/" && !is_php(uri) {
        match driver.is_static_file(site, uri) {
            Ok(Some(path)) => return (Action::ServeStatic(path), env),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(site = %site.name, driver = %driver.name(), error = %e, "Static file check failed");
                metrics::record_driver_fault(driver.name());
            }
        }
    }

    driver.before_dispatch(site, uri, &mut env);

    match driver.front_controller_path(site, uri) {
        Ok(Some(front_controller)) => return (Action::Dispatch { front_controller }, env),
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(site = %site.name, driver = %driver.name(), error = %e, "Front controller lookup failed");
            metrics::record_driver_fault(driver.name());
        }
    }

    if directory_listing {
        let dir = site.join(uri);
        match site.fs.is_dir(&dir) {
            Ok(true) => return (Action::DirectoryListing(dir), env),
            Ok(false) => {}
            Err(e) => tracing::warn!(site = %site.name, path = ?dir, error = %e, "Cannot list directory"),
        }
    }
    (Action::NotFound, env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFs;
    use std::path::Path;

    const HOME: &str = "/home/dev/.config/devhost";

    fn dispatcher(fs: MemoryFs, registry: &str) -> Dispatcher {
        let fs = fs
            .with_dir(format!("{HOME}/Sites"))
            .with_file(format!("{HOME}/config.json"), registry);
        Dispatcher::new(
            BindingStore::new(Arc::new(fs), HOME),
            Arc::new(DriverRegistry::builtin()),
        )
    }

    fn laravel_blog() -> MemoryFs {
        MemoryFs::new()
            .with_file("/code/blog/artisan", "")
            .with_file("/code/blog/public/index.php", "")
            .with_file("/code/blog/public/style.css", "")
    }

    #[test]
    fn root_request_dispatches_to_front_controller() {
        let d = dispatcher(laravel_blog(), r#"{"paths": ["/code"]}"#);
        let resolved = d.dispatch("blog.test", "/").unwrap();

        assert_eq!(resolved.driver.as_deref(), Some("Laravel"));
        assert_eq!(resolved.site_path(), Some(Path::new("/code/blog")));
        assert_eq!(
            resolved.action,
            Action::Dispatch {
                front_controller: PathBuf::from("/code/blog/public/index.php")
            }
        );
    }

    #[test]
    fn existing_assets_are_served_statically() {
        let d = dispatcher(laravel_blog(), r#"{"paths": ["/code"]}"#);
        let resolved = d.dispatch("blog.test:8080", "/style.css?v=2").unwrap();

        assert_eq!(
            resolved.action,
            Action::ServeStatic(PathBuf::from("/code/blog/public/style.css"))
        );

        let missing = d.dispatch("blog.test", "/missing.css").unwrap();
        assert!(matches!(missing.action, Action::Dispatch { .. }));
    }

    #[test]
    fn php_uris_skip_the_static_check() {
        let fs = MemoryFs::new()
            .with_file("/code/legacy/index.php", "")
            .with_file("/code/legacy/info.php", "");
        let d = dispatcher(fs, r#"{"paths": ["/code"]}"#);

        let resolved = d.dispatch("legacy.test", "/info.php").unwrap();
        assert_eq!(
            resolved.action,
            Action::Dispatch {
                front_controller: PathBuf::from("/code/legacy/info.php")
            }
        );
    }

    #[test]
    fn ip_requests_recover_the_site_from_the_path() {
        let d = dispatcher(laravel_blog(), r#"{"paths": ["/code"]}"#);

        let resolved = d.dispatch("192.168.1.5", "/blog/api/users").unwrap();
        assert_eq!(resolved.host, "blog.test");
        assert_eq!(resolved.request_uri, "/api/users");
        assert_eq!(resolved.site_name, "blog");
        assert!(matches!(resolved.action, Action::Dispatch { .. }));

        let with_tld = d.dispatch("192.168.1.5:80", "/blog.test/style.css").unwrap();
        assert_eq!(with_tld.host, "blog.test");
        assert!(matches!(with_tld.action, Action::ServeStatic(_)));

        let unknown = d.dispatch("192.168.1.5", "/nothing/here").unwrap();
        assert_eq!(unknown.host, "192.168.1.5");
        assert_eq!(unknown.action, Action::NotFound);
    }

    #[test]
    fn unresolved_sites_are_not_found() {
        let d = dispatcher(laravel_blog(), r#"{"paths": ["/code"]}"#);
        let resolved = d.dispatch("shop.test", "/").unwrap();

        assert!(resolved.is_not_found());
        assert_eq!(resolved.driver, None);
    }

    #[test]
    fn default_site_catches_unresolved_names() {
        let fs = laravel_blog().with_file("/srv/welcome/index.html", "");
        let d = dispatcher(fs, r#"{"paths": ["/code"], "default": "/srv/welcome"}"#);

        let resolved = d.dispatch("unknown.test", "/").unwrap();
        assert_eq!(resolved.driver.as_deref(), Some("Basic"));
        assert_eq!(
            resolved.action,
            Action::Dispatch {
                front_controller: PathBuf::from("/srv/welcome/index.html")
            }
        );
    }

    #[test]
    fn proxies_short_circuit_drivers() {
        let fs = laravel_blog().with_file("/code/mail/index.php", "");
        let d = dispatcher(
            fs,
            r#"{"paths": ["/code"], "proxies": {"mail": {"url": "http://localhost:8025", "secure": true}}}"#,
        );

        let resolved = d.dispatch("mail.test", "/inbox").unwrap();
        assert!(matches!(&resolved.action, Action::ProxyTo(t) if t.url == "http://localhost:8025"));
        assert_eq!(resolved.driver, None);
        assert!(resolved.is_secure());
    }

    #[test]
    fn directory_listing_when_enabled() {
        let fs = MemoryFs::new().with_file("/code/files/docs/readme.txt", "");
        let off = dispatcher(MemoryFs::new().with_file("/code/files/docs/readme.txt", ""), r#"{"paths": ["/code"]}"#);
        let on = dispatcher(fs, r#"{"paths": ["/code"], "directory-listing": "on"}"#);

        assert!(off.dispatch("files.test", "/docs/").unwrap().is_not_found());
        assert_eq!(
            on.dispatch("files.test", "/docs/").unwrap().action,
            Action::DirectoryListing(PathBuf::from("/code/files/docs"))
        );
        assert!(on.dispatch("files.test", "/nope/").unwrap().is_not_found());
    }

    #[test]
    fn overrides_and_env_travel_with_the_request() {
        let fs = laravel_blog().with_file(
            "/code/blog/.devhost-env.json",
            r#"{"*": {"APP_ENV": "local"}}"#,
        );
        let d = dispatcher(
            fs,
            r#"{"paths": ["/code"], "sites": {"blog": {"runtime": "8.2", "secure": true}}}"#,
        );

        let resolved = d.dispatch("blog.test", "/").unwrap();
        assert_eq!(resolved.overrides.runtime.as_deref(), Some("8.2"));
        assert!(resolved.is_secure());
        assert_eq!(resolved.env.get("APP_ENV"), Some("local"));
    }

    #[test]
    fn classification_is_repeatable() {
        let fs = MemoryFs::new()
            .with_file("/code/docs/build_local/index.html", "")
            .with_file("/code/docs/build_local/about/index.html", "");
        let d = dispatcher(fs, r#"{"paths": ["/code"]}"#);

        let first = d.dispatch("docs.test", "/about").unwrap();
        let second = d.dispatch("docs.test", "/about").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.uri, "/build_local/about");
        assert_eq!(
            first.action,
            Action::ServeStatic(PathBuf::from("/code/docs/build_local/about/index.html"))
        );
    }

    #[test]
    fn corrupt_registry_is_fatal() {
        let d = dispatcher(laravel_blog(), "{ broken");
        assert!(matches!(
            d.dispatch("blog.test", "/"),
            Err(DispatchError::ConfigurationCorrupt { .. })
        ));
    }
}
