// cli/mod.rs - `kestrel` subcommands
//
// Each subcommand parses its own arguments into a struct (errors are plain
// strings for the usage message) and runs against the library API.

pub mod analysis_stats;
pub mod packages;
pub mod signature;
pub mod tokens;

use std::path::{Path, PathBuf};

use crate::config::KestrelConfig;
use crate::package_index::PackageIndex;

/// Configuration from `--config`, or defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<KestrelConfig> {
    match path {
        Some(path) => KestrelConfig::from_file(path),
        None => Ok(KestrelConfig::default()),
    }
}

/// Package index for a command: `--lib-path` roots are searched before the
/// configured and default ones.
pub fn build_index(config: &KestrelConfig, lib_paths: &[PathBuf]) -> PackageIndex {
    let mut packages = config.packages.clone();
    packages.library_paths = lib_paths
        .iter()
        .chain(&config.packages.library_paths)
        .cloned()
        .collect();
    PackageIndex::from_config(&packages)
}

/// Value of a flag that takes an argument.
fn flag_value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    args.next()
        .ok_or_else(|| format!("{} requires a value", flag))
}
