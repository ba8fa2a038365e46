//! Per-site environment variables handed to the front controller.
//!
//! A site may carry a `.devhost-env.json` file:
//!
//! ```json
//! { "*": { "APP_ENV": "local" }, "blog": { "APP_DEBUG": "true" } }
//! ```
//!
//! Entries under `*` apply to every site served from the directory; entries under the
//! requested site name override them.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::drivers::Site;

pub const SITE_ENV_FILE: &str = ".devhost-env.json";

/// Variables collected for a single request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestEnv {
    vars: BTreeMap<String, String>,
}

impl RequestEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

type EnvFile = BTreeMap<String, BTreeMap<String, Value>>;

/// Merge the site's environment file into `env`. A missing file is silent; an
/// unreadable or malformed one is logged and ignored.
pub fn load_site_env(site: &Site<'_>, env: &mut RequestEnv) {
    let path = site.join(SITE_ENV_FILE);
    match site.fs.is_file(&path) {
        Ok(true) => {}
        Ok(false) => return,
        Err(e) => {
            tracing::warn!(site = %site.name, path = ?path, error = %e, "Cannot inspect site environment file");
            return;
        }
    }

    let parsed = site
        .fs
        .read_to_string(&path)
        .map_err(|e| e.to_string())
        .and_then(|content| serde_json::from_str::<EnvFile>(&content).map_err(|e| e.to_string()));
    let mut file = match parsed {
        Ok(file) => file,
        Err(e) => {
            tracing::warn!(site = %site.name, path = ?path, error = %e, "Ignoring site environment file");
            return;
        }
    };

    for section in ["*", site.name] {
        if let Some(vars) = file.remove(section) {
            for (key, value) in vars {
                env.set(key, render(value));
            }
        }
    }
}

fn render(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFs;
    use std::path::Path;

    #[test]
    fn site_entries_override_wildcard_entries() {
        let fs = MemoryFs::new().with_file(
            "/code/blog/.devhost-env.json",
            r#"{"*": {"APP_ENV": "local", "PORT": 8000}, "blog": {"APP_ENV": "testing"}, "shop": {"X": "y"}}"#,
        );
        let site = Site::new(&fs, Path::new("/code/blog"), "blog");
        let mut env = RequestEnv::new();

        load_site_env(&site, &mut env);

        assert_eq!(env.get("APP_ENV"), Some("testing"));
        assert_eq!(env.get("PORT"), Some("8000"));
        assert_eq!(env.get("X"), None);
    }

    #[test]
    fn missing_or_malformed_files_leave_env_untouched() {
        let fs = MemoryFs::new()
            .with_dir("/code/plain")
            .with_file("/code/broken/.devhost-env.json", "{ nope");
        let mut env = RequestEnv::new();

        load_site_env(&Site::new(&fs, Path::new("/code/plain"), "plain"), &mut env);
        load_site_env(&Site::new(&fs, Path::new("/code/broken"), "broken"), &mut env);

        assert!(env.is_empty());
    }
}
