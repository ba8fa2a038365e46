//! Startup orchestration.
//!
//! # Responsibilities
//! - Create the home layout and the base registry on first run
//! - Drop links whose targets have disappeared
//! - Scan custom drivers and build the driver registry
//!
//! # Design Decisions
//! - Fail fast: an unusable home directory is fatal
//! - A corrupt registry is not fatal; requests report it until it is fixed

use crate::drivers::DriverRegistry;
use crate::sites::{BindingStore, StoreError};

/// What startup changed, for logging.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct StartupReport {
    /// The base registry was written.
    pub initialized: bool,
    /// Names of links removed because their target is gone.
    pub pruned_links: Vec<String>,
}

/// Prepare `store`'s home and build the driver registry from its `Drivers` directory.
pub fn prepare(store: &BindingStore) -> Result<(DriverRegistry, StartupReport), StoreError> {
    let mut report = StartupReport {
        initialized: store.ensure_base()?,
        ..StartupReport::default()
    };
    if report.initialized {
        tracing::info!(home = ?store.home(), "Initialized home directory");
    }

    match store.prune_dead_links() {
        Ok(pruned) => report.pruned_links = pruned,
        Err(StoreError::Corrupt { path, source }) => {
            tracing::error!(path = ?path, error = %source, "Site registry is corrupt; requests will fail until it is fixed");
        }
        Err(e) => tracing::warn!(error = %e, "Cannot prune dead links"),
    }

    let drivers = DriverRegistry::load(&**store.filesystem(), &store.drivers_dir());
    Ok((drivers, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FileSystem, MemoryFs};
    use std::path::Path;
    use std::sync::Arc;

    const HOME: &str = "/home/dev/.config/devhost";

    #[test]
    fn first_run_creates_layout_and_loads_drivers() {
        let fs = Arc::new(MemoryFs::new().with_dir(HOME));
        let store = BindingStore::new(fs.clone(), HOME);

        let (drivers, report) = prepare(&store).unwrap();

        assert!(report.initialized);
        assert!(report.pruned_links.is_empty());
        assert!(fs.is_dir(&store.sites_dir()).unwrap());
        assert!(fs.is_dir(&store.drivers_dir()).unwrap());
        assert_eq!(drivers.len(), DriverRegistry::builtin().len());

        let (_, again) = prepare(&store).unwrap();
        assert!(!again.initialized);
    }

    #[test]
    fn dead_links_are_pruned() {
        let fs = Arc::new(
            MemoryFs::new()
                .with_dir(HOME)
                .with_dir("/code/blog")
                .with_symlink(format!("{HOME}/Sites/blog"), "/code/blog")
                .with_symlink(format!("{HOME}/Sites/gone"), "/code/gone"),
        );
        let store = BindingStore::new(fs.clone(), HOME);

        let (_, report) = prepare(&store).unwrap();

        assert_eq!(report.pruned_links, vec!["gone".to_string()]);
        assert!(!fs.exists(Path::new(&format!("{HOME}/Sites/gone"))).unwrap());
        assert!(fs.is_symlink(Path::new(&format!("{HOME}/Sites/blog"))).unwrap());
    }

    #[test]
    fn looping_and_unreadable_links_do_not_stop_startup() {
        let fs = Arc::new(
            MemoryFs::new()
                .with_dir(HOME)
                .with_dir("/code/blog")
                .with_symlink(format!("{HOME}/Sites/blog"), "/code/blog")
                .with_symlink(format!("{HOME}/Sites/loop"), format!("{HOME}/Sites/loop")),
        );
        let store = BindingStore::new(fs.clone(), HOME);

        let (_, report) = prepare(&store).unwrap();
        assert!(report.pruned_links.is_empty());

        let denied = Arc::new(
            MemoryFs::new()
                .with_dir(HOME)
                .with_symlink(format!("{HOME}/Sites/blog"), "/code/blog")
                .with_denied(format!("{HOME}/Sites")),
        );
        let (_, report) = prepare(&BindingStore::new(denied, HOME)).unwrap();
        assert!(report.pruned_links.is_empty());
    }

    #[test]
    fn corrupt_registry_does_not_stop_startup() {
        let fs = Arc::new(
            MemoryFs::new()
                .with_dir(format!("{HOME}/Sites"))
                .with_dir(format!("{HOME}/Drivers"))
                .with_file(format!("{HOME}/config.json"), "{ not json"),
        );
        let store = BindingStore::new(fs, HOME);

        let (drivers, report) = prepare(&store).unwrap();
        assert!(!report.initialized);
        assert!(!drivers.is_empty());
    }
}
