//! Loading catalog providers by id.

use std::sync::Arc;

use super::host::{PluginHost, ProviderSource};
use super::loader::ScriptLoader;
use super::registry::ProviderCatalog;

/// Load the provider registered under `id`.
///
/// # Fallback Behavior
///
/// - Catalog missing or disabled: fallback with warning
/// - Id not found: fallback with error log
/// - Entry disabled: fallback with warning
/// - Script unreadable or not UTF-8: fallback with error log
/// - Script fails to load: fallback (logged by the host)
pub async fn load_configured_provider(
    catalog: Option<&ProviderCatalog>,
    loader: Arc<ScriptLoader>,
    id: &str,
) -> PluginHost {
    let Some(catalog) = catalog else {
        tracing::warn!(
            plugin_id = %id,
            "Provider requested but no catalog is available, using fallback"
        );
        return PluginHost::unavailable(loader, id, "no provider catalog".into());
    };

    if !catalog.is_enabled() {
        tracing::warn!(
            plugin_id = %id,
            "Provider requested but plugins are disabled, using fallback"
        );
        return PluginHost::unavailable(loader, id, "plugins disabled".into());
    }

    let Some(entry) = catalog.get(id) else {
        tracing::error!(
            plugin_id = %id,
            plugins_dir = %catalog.plugins_dir().display(),
            "Provider '{}' not found in catalog, using fallback",
            id
        );
        return PluginHost::unavailable(loader, id, format!("unknown provider '{id}'"));
    };

    let path = entry.script_path.display().to_string();
    if !entry.enabled {
        tracing::warn!(
            plugin_id = %id,
            "Provider '{}' is disabled, using fallback",
            id
        );
        return PluginHost::unavailable(loader, path, format!("provider '{id}' is disabled"));
    }

    let bytes = match tokio::fs::read(&entry.script_path).await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::error!(
                plugin_id = %id,
                script_path = %path,
                error = %err,
                "Provider script not readable, using fallback"
            );
            return PluginHost::unavailable(loader, path, format!("unreadable script: {err}"));
        }
    };

    tracing::info!(plugin_id = %id, script_path = %path, "Loading provider");
    PluginHost::load(loader, ProviderSource::from_bytes(bytes), path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PluginsConfig;
    use crate::deps::DependencyRegistry;
    use crate::plugins::loader::HostEnvironment;
    use std::path::Path;

    fn loader() -> Arc<ScriptLoader> {
        Arc::new(ScriptLoader::new(
            Arc::new(DependencyRegistry::empty()),
            HostEnvironment::default(),
        ))
    }

    fn catalog(dir: &Path) -> ProviderCatalog {
        let config = PluginsConfig {
            dir: dir.display().to_string(),
            ..PluginsConfig::default()
        };
        ProviderCatalog::new(&config, Path::new("/unused"))
    }

    #[tokio::test]
    async fn loads_discovered_script() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("kw.js"), "module.exports = { platform: 'kw', search() {} };").unwrap();
        let host = load_configured_provider(Some(&catalog(dir.path())), loader(), "kw").await;
        assert!(!host.provider().is_fallback());
        assert_eq!(host.provider().platform(), "kw");
    }

    #[tokio::test]
    async fn missing_catalog_or_id_falls_back() {
        let host = load_configured_provider(None, loader(), "kw").await;
        assert!(host.provider().is_fallback());

        let dir = tempfile::tempdir().unwrap();
        let host = load_configured_provider(Some(&catalog(dir.path())), loader(), "nope").await;
        assert!(host.provider().is_fallback());
    }

    #[tokio::test]
    async fn non_utf8_script_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bin.js"), [0xffu8, 0x00, 0xfe]).unwrap();
        let host = load_configured_provider(Some(&catalog(dir.path())), loader(), "bin").await;
        assert!(host.provider().is_fallback());
        assert!(matches!(host.source(), ProviderSource::Invalid(_)));
    }
}
