//! Ordered driver catalog and driver selection.

use std::path::Path;

use crate::drivers::builtin::BuiltinDriver;
use crate::drivers::custom::{load_custom_drivers, CustomDriver};
use crate::drivers::{Driver, Site};
use crate::fs::FileSystem;
use crate::observability::metrics;

/// Drivers in selection order: custom, then specific, then basic.
#[derive(Debug)]
pub struct DriverRegistry {
    drivers: Vec<Box<dyn Driver>>,
}

impl DriverRegistry {
    /// Only the built-in drivers.
    pub fn builtin() -> Self {
        Self::with_custom(Vec::new())
    }

    /// `custom` (in the given order) ahead of the built-in drivers.
    pub fn with_custom(custom: Vec<CustomDriver>) -> Self {
        let mut drivers: Vec<Box<dyn Driver>> = Vec::with_capacity(custom.len() + BuiltinDriver::ALL.len());
        for driver in custom {
            drivers.push(Box::new(driver));
        }
        for driver in BuiltinDriver::ALL {
            drivers.push(Box::new(driver));
        }
        Self { drivers }
    }

    /// Built-in drivers plus the custom drivers defined in `dir`.
    pub fn load(fs: &dyn FileSystem, dir: &Path) -> Self {
        let custom = load_custom_drivers(fs, dir);
        tracing::info!(
            custom = custom.len(),
            builtin = BuiltinDriver::ALL.len(),
            "Driver registry ready"
        );
        Self::with_custom(custom)
    }

    pub fn drivers(&self) -> impl Iterator<Item = &dyn Driver> {
        self.drivers.iter().map(|d| d.as_ref())
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    /// The first driver that serves `site`.
    ///
    /// A driver whose check fails is logged, counted and treated as not serving.
    pub fn select(&self, site: &Site<'_>, uri: &str) -> Option<&dyn Driver> {
        for driver in self.drivers() {
            match driver.serves(site, uri) {
                Ok(true) => {
                    tracing::debug!(
                        site = %site.name,
                        driver = %driver.name(),
                        class = driver.class().as_str(),
                        "Driver selected"
                    );
                    return Some(driver);
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        site = %site.name,
                        driver = %driver.name(),
                        error = %e,
                        "Driver check failed, skipping"
                    );
                    metrics::record_driver_fault(driver.name());
                }
            }
        }
        None
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::DriverClass;
    use crate::fs::MemoryFs;

    fn select_name(registry: &DriverRegistry, fs: &MemoryFs, path: &str) -> Option<String> {
        let site = Site::new(fs, Path::new(path), "my-site");
        registry.select(&site, "/").map(|d| d.name().to_string())
    }

    #[test]
    fn classes_are_in_priority_order() {
        let custom = CustomDriver::from_toml("Mine", Path::new("MineDriver.toml"), "markers = [\"x\"]").unwrap();
        let registry = DriverRegistry::with_custom(vec![custom]);

        let classes: Vec<_> = registry.drivers().map(|d| d.class()).collect();
        let mut sorted = classes.clone();
        sorted.sort();
        assert_eq!(classes, sorted);
        assert_eq!(classes[0], DriverClass::Custom);
        assert_eq!(registry.len(), 23);
    }

    #[test]
    fn specific_drivers_win_over_basic_layouts() {
        let fs = MemoryFs::new()
            .with_file("/code/laravel/artisan", "")
            .with_file("/code/laravel/public/index.php", "")
            .with_file("/code/statamic/artisan", "")
            .with_file("/code/statamic/public/index.php", "")
            .with_dir("/code/statamic/vendor/statamic/cms")
            .with_file("/code/plain/public/index.php", "")
            .with_file("/code/bare/index.html", "");
        let registry = DriverRegistry::builtin();

        assert_eq!(select_name(&registry, &fs, "/code/laravel").as_deref(), Some("Laravel"));
        assert_eq!(select_name(&registry, &fs, "/code/statamic").as_deref(), Some("Statamic"));
        assert_eq!(select_name(&registry, &fs, "/code/plain").as_deref(), Some("BasicWithPublic"));
        assert_eq!(select_name(&registry, &fs, "/code/bare").as_deref(), Some("Basic"));
    }

    #[test]
    fn custom_drivers_are_consulted_first() {
        let fs = MemoryFs::new()
            .with_file("/code/app/artisan", "")
            .with_file("/code/app/public/index.php", "")
            .with_file("/code/app/.custom-marker", "");
        let custom = CustomDriver::from_toml(
            "Marked",
            Path::new("MarkedDriver.toml"),
            "markers = [\".custom-marker\"]",
        )
        .unwrap();

        let registry = DriverRegistry::with_custom(vec![custom]);
        assert_eq!(select_name(&registry, &fs, "/code/app").as_deref(), Some("Marked"));
    }

    #[test]
    fn faulting_drivers_are_skipped() {
        let fs = MemoryFs::new()
            .with_file("/code/app/artisan", "")
            .with_file("/code/app/public/index.php", "")
            .with_dir("/code/app/web")
            .with_denied("/code/app/web");

        let registry = DriverRegistry::builtin();
        assert_eq!(select_name(&registry, &fs, "/code/app").as_deref(), Some("Laravel"));
    }

    #[test]
    fn selection_is_repeatable() {
        let fs = MemoryFs::new()
            .with_file("/code/wp/wp-config.php", "")
            .with_file("/code/wp/index.php", "");
        let registry = DriverRegistry::builtin();

        let first = select_name(&registry, &fs, "/code/wp");
        for _ in 0..5 {
            assert_eq!(select_name(&registry, &fs, "/code/wp"), first);
        }
        assert_eq!(first.as_deref(), Some("WordPress"));
    }

    #[test]
    fn loads_custom_drivers_from_directory() {
        let fs = MemoryFs::new().with_file("/home/Drivers/HugoDriver.toml", "markers = [\"hugo.toml\"]");
        let registry = DriverRegistry::load(&fs, Path::new("/home/Drivers"));

        assert_eq!(registry.len(), BuiltinDriver::ALL.len() + 1);
        assert_eq!(registry.drivers().next().map(|d| d.name().to_string()).as_deref(), Some("Hugo"));
    }
}
