// cli/signature.rs - `kestrel signature` subcommand
//
// Prints the candidate signatures and active parameter for a caret offset in
// an R file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use super::{build_index, flag_value, load_config};
use crate::editor_tree::ParsedDocument;
use crate::signature_help::{SignatureHelp, SignatureHelpEngine};

#[derive(Debug, PartialEq, Eq)]
pub struct SignatureArgs {
    pub file: PathBuf,
    pub offset: usize,
    pub lib_paths: Vec<PathBuf>,
    pub partial_match: bool,
    pub json: bool,
    pub config: Option<PathBuf>,
}

/// Expected usage: `kestrel signature <file> --offset <n> [--lib-path <dir>]...
/// [--partial-match] [--json] [--config <file>]`
pub fn parse_args(args: &mut impl Iterator<Item = String>) -> Result<SignatureArgs, String> {
    let mut file: Option<PathBuf> = None;
    let mut offset: Option<usize> = None;
    let mut lib_paths = Vec::new();
    let mut partial_match = false;
    let mut json = false;
    let mut config = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--offset" => {
                let value = flag_value(args, "--offset")?;
                offset = Some(
                    value
                        .parse()
                        .map_err(|_| format!("Invalid offset '{}'", value))?,
                );
            }
            "--lib-path" => lib_paths.push(PathBuf::from(flag_value(args, "--lib-path")?)),
            "--config" => config = Some(PathBuf::from(flag_value(args, "--config")?)),
            "--partial-match" => partial_match = true,
            "--json" => json = true,
            other if other.starts_with('-') => {
                return Err(format!("Unknown flag: '{}'", other));
            }
            _ => {
                if file.is_some() {
                    return Err("Multiple files provided; expected exactly one".to_string());
                }
                file = Some(PathBuf::from(arg));
            }
        }
    }

    Ok(SignatureArgs {
        file: file.ok_or_else(|| "Missing required <file> argument".to_string())?,
        offset: offset.ok_or_else(|| "Missing required --offset".to_string())?,
        lib_paths,
        partial_match,
        json,
        config,
    })
}

pub async fn run(args: &SignatureArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if args.partial_match {
        config.signature.partial_argument_name_match = true;
    }
    let text = std::fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;

    let index = build_index(&config, &args.lib_paths);
    index.scan().await;
    let engine = SignatureHelpEngine::new(Arc::new(index), config.signature);
    let document = ParsedDocument::parse(0, Arc::from(text));
    let help = engine.signature_help(&document, args.offset).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&help)?);
    } else {
        print!("{}", format_help(help.as_ref()));
    }
    Ok(())
}

/// Human-readable rendering, one signature per line with the active one
/// marked.
pub fn format_help(help: Option<&SignatureHelp>) -> String {
    let Some(help) = help else {
        return "No signature help at this position\n".to_string();
    };
    let mut out = String::new();
    for (i, signature) in help.signatures.iter().enumerate() {
        let marker = if i == help.active_signature { '*' } else { ' ' };
        let package = signature
            .package
            .as_deref()
            .map(|p| format!("  [{}]", p))
            .unwrap_or_default();
        out.push_str(&format!("{} {}{}\n", marker, signature.label(), package));
    }
    if let Some(parameter) = help
        .signatures
        .get(help.active_signature)
        .and_then(|s| s.parameters.get(help.active_parameter))
    {
        out.push_str(&format!(
            "active parameter: {} ({})\n",
            parameter.name, help.active_parameter
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::FunctionSignature;
    use crate::test_utils::fixture_library::FixtureLibrary;

    fn strings(values: &[&str]) -> std::vec::IntoIter<String> {
        values
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn test_parse_args() {
        let args = parse_args(&mut strings(&[
            "script.R",
            "--offset",
            "12",
            "--lib-path",
            "/lib",
            "--partial-match",
            "--json",
        ]))
        .unwrap();
        assert_eq!(args.file, PathBuf::from("script.R"));
        assert_eq!(args.offset, 12);
        assert_eq!(args.lib_paths, vec![PathBuf::from("/lib")]);
        assert!(args.partial_match);
        assert!(args.json);
        assert!(args.config.is_none());
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(parse_args(&mut strings(&["--offset", "1"]))
            .unwrap_err()
            .contains("<file>"));
        assert!(parse_args(&mut strings(&["a.R"]))
            .unwrap_err()
            .contains("--offset"));
        assert!(parse_args(&mut strings(&["a.R", "--offset", "x"]))
            .unwrap_err()
            .contains("Invalid offset"));
        assert!(parse_args(&mut strings(&["a.R", "--offset"]))
            .unwrap_err()
            .contains("requires a value"));
    }

    #[test]
    fn test_format_help() {
        let help = SignatureHelp {
            function_name: "aov".to_string(),
            signatures: vec![FunctionSignature::from_formals("aov", "(formula, data = NULL)")
                .with_package("stats")],
            active_signature: 0,
            active_parameter: 1,
        };
        assert_eq!(
            format_help(Some(&help)),
            "* aov(formula, data = NULL)  [stats]\nactive parameter: data (1)\n"
        );
        assert_eq!(format_help(None), "No signature help at this position\n");
    }

    #[tokio::test]
    async fn test_run_against_fixture_library() {
        let library = FixtureLibrary::with_standard_packages();
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("script.R");
        std::fs::write(&file, "aov(y ~ x, ").unwrap();
        let args = SignatureArgs {
            file,
            offset: 11,
            lib_paths: vec![library.path().to_path_buf()],
            partial_match: false,
            json: true,
            config: None,
        };
        run(&args).await.unwrap();

        let missing = SignatureArgs {
            file: dir.path().join("missing.R"),
            ..args
        };
        assert!(run(&missing).await.is_err());
    }
}
