//! Provider catalog for discovery and lookup.
//!
//! Providers come from two places: entries configured under
//! `[plugins.providers.<id>]`, and `*.js` files found in the plugin
//! directory (id = file stem). Configured entries win on id clashes.

use crate::config::PluginsConfig;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Entry for a known provider script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEntry {
    pub id: String,
    /// Resolved script path
    pub script_path: PathBuf,
    /// Whether this provider may be loaded
    pub enabled: bool,
    /// `true` when declared in config rather than discovered on disk
    pub configured: bool,
}

/// Catalog of provider scripts.
pub struct ProviderCatalog {
    entries: RwLock<BTreeMap<String, ProviderEntry>>,
    plugins_dir: PathBuf,
    enabled: bool,
}

impl ProviderCatalog {
    /// Build a catalog from configuration.
    ///
    /// # Arguments
    ///
    /// * `config` - Plugin configuration section
    /// * `base_dir` - Directory relative plugin paths are anchored at
    ///   (normally the one holding the config file)
    pub fn new(config: &PluginsConfig, base_dir: &Path) -> Self {
        let catalog = Self {
            entries: RwLock::new(BTreeMap::new()),
            plugins_dir: config.resolve_dir(base_dir),
            enabled: config.enabled,
        };

        if config.enabled {
            catalog.register_configured(config);
            catalog.rescan();
        }

        catalog
    }

    fn register_configured(&self, config: &PluginsConfig) {
        let mut entries = self.entries.write();
        for (id, provider) in &config.providers {
            let script_path = self.resolve_script(&provider.script);
            if !provider.enabled {
                tracing::debug!(plugin_id = %id, "Provider is disabled in config");
            }
            tracing::info!(
                plugin_id = %id,
                script_path = %script_path.display(),
                "Registered configured provider"
            );
            entries.insert(
                id.clone(),
                ProviderEntry {
                    id: id.clone(),
                    script_path,
                    enabled: provider.enabled,
                    configured: true,
                },
            );
        }
    }

    fn resolve_script(&self, script: &str) -> PathBuf {
        let expanded = PathBuf::from(shellexpand::tilde(script).as_ref());
        if expanded.is_absolute() {
            expanded
        } else {
            self.plugins_dir.join(expanded)
        }
    }

    /// Scan the plugin directory for `*.js` files. Returns the number of
    /// newly discovered providers.
    pub fn rescan(&self) -> usize {
        if !self.enabled {
            return 0;
        }
        let read_dir = match std::fs::read_dir(&self.plugins_dir) {
            Ok(read_dir) => read_dir,
            Err(err) => {
                tracing::debug!(
                    plugins_dir = %self.plugins_dir.display(),
                    error = %err,
                    "Plugin directory not readable, skipping scan"
                );
                return 0;
            }
        };

        let mut discovered = 0;
        let mut entries = self.entries.write();
        for dir_entry in read_dir.flatten() {
            let path = dir_entry.path();
            if !path.is_file() || path.extension().and_then(|ext| ext.to_str()) != Some("js") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if entries.contains_key(id) {
                continue;
            }
            tracing::debug!(plugin_id = %id, script_path = %path.display(), "Discovered provider script");
            entries.insert(
                id.to_string(),
                ProviderEntry {
                    id: id.to_string(),
                    script_path: path.clone(),
                    enabled: true,
                    configured: false,
                },
            );
            discovered += 1;
        }
        discovered
    }

    /// Get a provider entry by id.
    pub fn get(&self, id: &str) -> Option<ProviderEntry> {
        self.entries.read().get(id).cloned()
    }

    /// Check if provider loading is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Get the plugin directory.
    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    /// List all known provider ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// All entries, sorted by id.
    pub fn entries(&self) -> Vec<ProviderEntry> {
        self.entries.read().values().cloned().collect()
    }
}

impl std::fmt::Debug for ProviderCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCatalog")
            .field("enabled", &self.enabled)
            .field("plugins_dir", &self.plugins_dir)
            .field("provider_count", &self.entries.read().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderPluginConfig;

    fn make_config(dir: &Path) -> PluginsConfig {
        PluginsConfig {
            enabled: true,
            dir: dir.display().to_string(),
            providers: BTreeMap::from([
                (
                    "qq".to_string(),
                    ProviderPluginConfig {
                        script: "custom/qq.js".into(),
                        enabled: true,
                    },
                ),
                (
                    "old".to_string(),
                    ProviderPluginConfig {
                        script: "old.js".into(),
                        enabled: false,
                    },
                ),
            ]),
        }
    }

    #[test]
    fn catalog_registers_configured_providers() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = ProviderCatalog::new(&make_config(dir.path()), Path::new("/unused"));
        let qq = catalog.get("qq").unwrap();
        assert!(qq.configured);
        assert_eq!(qq.script_path, dir.path().join("custom/qq.js"));
        assert!(!catalog.get("old").unwrap().enabled);
    }

    #[test]
    fn catalog_discovers_scripts_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("kuwo.js"), "module.exports = {};").unwrap();
        std::fs::write(dir.path().join("old.js"), "module.exports = {};").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let catalog = ProviderCatalog::new(&make_config(dir.path()), Path::new("/unused"));
        assert_eq!(catalog.ids(), vec!["kuwo", "old", "qq"]);
        assert!(!catalog.get("kuwo").unwrap().configured);
        // Config wins over discovery.
        assert!(!catalog.get("old").unwrap().enabled);

        std::fs::write(dir.path().join("migu.js"), "").unwrap();
        assert_eq!(catalog.rescan(), 1);
        assert!(catalog.get("migu").is_some());
    }

    #[test]
    fn relative_dir_is_anchored_at_base() {
        let config = PluginsConfig::default();
        let catalog = ProviderCatalog::new(&config, Path::new("/etc/tunehost"));
        assert_eq!(catalog.plugins_dir(), Path::new("/etc/tunehost/plugins"));
    }

    #[test]
    fn catalog_is_empty_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("kuwo.js"), "").unwrap();
        let mut config = make_config(dir.path());
        config.enabled = false;
        let catalog = ProviderCatalog::new(&config, Path::new("/unused"));
        assert!(!catalog.is_enabled());
        assert!(catalog.ids().is_empty());
        assert_eq!(catalog.rescan(), 0);
    }
}
