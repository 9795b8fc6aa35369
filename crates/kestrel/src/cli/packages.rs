// cli/packages.rs - `kestrel packages` subcommand
//
// Lists the packages discovered under the library roots, optionally with the
// signatures of their exported functions.

use std::path::PathBuf;

use super::{build_index, flag_value, load_config};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PackagesArgs {
    pub lib_paths: Vec<PathBuf>,
    pub functions: bool,
    pub config: Option<PathBuf>,
}

/// Expected usage: `kestrel packages [--lib-path <dir>]... [--functions] [--config <file>]`
pub fn parse_args(args: &mut impl Iterator<Item = String>) -> Result<PackagesArgs, String> {
    let mut parsed = PackagesArgs::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--lib-path" => parsed
                .lib_paths
                .push(PathBuf::from(flag_value(args, "--lib-path")?)),
            "--config" => parsed.config = Some(PathBuf::from(flag_value(args, "--config")?)),
            "--functions" => parsed.functions = true,
            other => return Err(format!("Unknown argument: '{}'", other)),
        }
    }
    Ok(parsed)
}

pub async fn run(args: &PackagesArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    let index = build_index(&config, &args.lib_paths);
    let count = index.scan().await;
    println!("{} packages in {} library paths", count, index.lib_paths().len());

    for name in index.search_order().await {
        let Some(info) = index.package(&name).await else {
            continue;
        };
        println!("{:<24} {}", info.name, info.install_path.display());
        if !args.functions {
            continue;
        }
        if let Some(metadata) = index.get_metadata(&name).await {
            let mut exported: Vec<_> = metadata
                .functions
                .values()
                .filter(|s| metadata.is_exported(&s.name))
                .collect();
            exported.sort_by(|a, b| a.name.cmp(&b.name));
            for signature in exported {
                println!("    {}", signature);
            }
        }
    }
    Ok(())
}
