//
// config.rs
//
// Settings for signature help, the editor tree and the package index,
// parsed from a JSON settings object with camelCase keys.
//

use std::path::{Path, PathBuf};

use anyhow::Context;

/// Argument-name matching policy for the resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureConfig {
    /// Let a named argument bind to the single parameter its tag is a prefix of.
    pub partial_argument_name_match: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeConfig {
    /// Dispatch a background rebuild after every edit. When false, rebuilds
    /// happen only in `ensure_ready`.
    pub rebuild_on_edit: bool,
    /// Re-lex only the edited region instead of the whole text.
    pub incremental_relex: bool,
    /// How long `ensure_ready` waits for the worker before building itself.
    pub ready_timeout_ms: u64,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            rebuild_on_edit: true,
            incremental_relex: true,
            ready_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagesConfig {
    pub enabled: bool,
    /// Library roots searched before the environment and platform defaults.
    pub library_paths: Vec<PathBuf>,
    /// Also search `R_LIBS`, `R_LIBS_USER` and the platform fallback roots.
    pub use_default_library_paths: bool,
    /// Capacity of the per-name lookup cache.
    pub lookup_cache_size: usize,
}

impl Default for PackagesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            library_paths: Vec::new(),
            use_default_library_paths: true,
            lookup_cache_size: 512,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KestrelConfig {
    pub signature: SignatureConfig,
    pub tree: TreeConfig,
    pub packages: PackagesConfig,
}

impl KestrelConfig {
    /// Read a JSON settings file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let settings: serde_json::Value = serde_json::from_str(&content)
            .with_context(|| format!("invalid JSON in config file {}", path.display()))?;
        Ok(parse_config(&settings))
    }
}

/// Build a configuration from a settings object. Missing or mistyped keys
/// keep their defaults.
pub fn parse_config(settings: &serde_json::Value) -> KestrelConfig {
    let mut config = KestrelConfig::default();

    if let Some(signature) = settings.get("signature") {
        if let Some(v) = signature
            .get("partialArgumentNameMatch")
            .and_then(|v| v.as_bool())
        {
            config.signature.partial_argument_name_match = v;
        }
    }

    if let Some(tree) = settings.get("tree") {
        if let Some(v) = tree.get("rebuildOnEdit").and_then(|v| v.as_bool()) {
            config.tree.rebuild_on_edit = v;
        }
        if let Some(v) = tree.get("incrementalRelex").and_then(|v| v.as_bool()) {
            config.tree.incremental_relex = v;
        }
        if let Some(v) = tree.get("readyTimeoutMs").and_then(|v| v.as_u64()) {
            config.tree.ready_timeout_ms = v;
        }
    }

    if let Some(packages) = settings.get("packages") {
        if let Some(v) = packages.get("enabled").and_then(|v| v.as_bool()) {
            config.packages.enabled = v;
        }
        if let Some(paths) = packages.get("libraryPaths").and_then(|v| v.as_array()) {
            config.packages.library_paths = paths
                .iter()
                .filter_map(|p| p.as_str())
                .filter(|s| !s.is_empty() && !s.contains('\0'))
                .map(PathBuf::from)
                .collect();
        }
        if let Some(v) = packages
            .get("useDefaultLibraryPaths")
            .and_then(|v| v.as_bool())
        {
            config.packages.use_default_library_paths = v;
        }
        if let Some(v) = packages.get("lookupCacheSize").and_then(|v| v.as_u64()) {
            config.packages.lookup_cache_size = (v as usize).max(1);
        }
    }

    log::info!("Kestrel configuration:");
    log::info!(
        "  partial_argument_name_match: {}",
        config.signature.partial_argument_name_match
    );
    log::info!("  Tree:");
    log::info!("    rebuild_on_edit: {}", config.tree.rebuild_on_edit);
    log::info!("    incremental_relex: {}", config.tree.incremental_relex);
    log::info!("    ready_timeout_ms: {}", config.tree.ready_timeout_ms);
    log::info!("  Packages:");
    log::info!("    enabled: {}", config.packages.enabled);
    log::info!("    library_paths: {:?}", config.packages.library_paths);
    log::info!(
        "    use_default_library_paths: {}",
        config.packages.use_default_library_paths
    );
    log::info!("    lookup_cache_size: {}", config.packages.lookup_cache_size);

    config
}
