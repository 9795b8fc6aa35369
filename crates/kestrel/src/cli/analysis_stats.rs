// cli/analysis_stats.rs - `kestrel analysis-stats` subcommand
//
// Loads a directory of R scripts and reports timing metrics for each phase of
// the signature help pipeline.
//
// Phases measured:
//   1. scan: discovering R files
//   2. tokenize: lexing every file
//   3. parse: building the syntax tree of every file
//   4. packages: scanning library roots and looking up every called name
//   5. resolve: computing the active parameter at every call

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use walkdir::WalkDir;

use crate::ast::{Ast, NodeKind};
use crate::ast_builder;
use crate::config::SignatureConfig;
use crate::package_index::PackageIndex;
use crate::parameter_resolver::compute_active_parameter;
use crate::perf::{self, TimingGuard};
use crate::signature::FunctionSignature;
use crate::tokenizer::{tokenize_all, Token};

#[derive(Debug)]
pub struct AnalysisStatsArgs {
    pub path: PathBuf,
    pub csv: bool,
    pub only: Option<String>,
    pub lib_paths: Vec<PathBuf>,
}

pub struct PhaseResult {
    pub name: String,
    pub duration: Duration,
    pub peak_rss_bytes: Option<u64>,
    pub detail: String,
}

const VALID_PHASES: &[&str] = &["scan", "tokenize", "parse", "packages", "resolve"];

/// Parse `analysis-stats` arguments.
///
/// Expected usage: `kestrel analysis-stats <path> [--csv] [--only <phase>] [--lib-path <dir>]...`
pub fn parse_args(args: &mut impl Iterator<Item = String>) -> Result<AnalysisStatsArgs, String> {
    let mut path: Option<PathBuf> = None;
    let mut csv = false;
    let mut only: Option<String> = None;
    let mut lib_paths = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--csv" => csv = true,
            "--only" => {
                let phase = args
                    .next()
                    .ok_or_else(|| "--only requires a phase name".to_string())?;
                if !VALID_PHASES.contains(&phase.as_str()) {
                    return Err(format!(
                        "Unknown phase '{}'. Valid phases: {}",
                        phase,
                        VALID_PHASES.join(", ")
                    ));
                }
                only = Some(phase);
            }
            "--lib-path" => {
                let dir = args
                    .next()
                    .ok_or_else(|| "--lib-path requires a directory".to_string())?;
                lib_paths.push(PathBuf::from(dir));
            }
            other if other.starts_with('-') => {
                return Err(format!("Unknown flag: '{}'", other));
            }
            _ => {
                if path.is_some() {
                    return Err("Multiple paths provided; expected exactly one".to_string());
                }
                path = Some(PathBuf::from(arg));
            }
        }
    }

    let path = path.ok_or_else(|| "Missing required <path> argument".to_string())?;
    if !path.exists() {
        return Err(format!("Path does not exist: {}", path.display()));
    }

    Ok(AnalysisStatsArgs {
        path,
        csv,
        only,
        lib_paths,
    })
}

struct ParsedFile {
    content: String,
    tokens: Vec<Token>,
    ast: Option<Ast>,
}

/// Run the analysis-stats command and return phase results. Phases skipped
/// by `--only` still run untimed when a later phase needs their output.
pub async fn run_analysis_stats(args: &AnalysisStatsArgs) -> Vec<PhaseResult> {
    let mut results = Vec::new();
    let should_run =
        |phase: &str| -> bool { args.only.as_ref().map_or(true, |only| only == phase) };
    let mut timed = |name: &str, start: Instant, detail: String| {
        results.push(PhaseResult {
            name: name.to_string(),
            duration: start.elapsed(),
            peak_rss_bytes: perf::peak_rss_bytes(),
            detail,
        });
    };

    // Phase 1: Scan
    let start = Instant::now();
    let files = {
        let _guard = TimingGuard::new("analysis-stats:scan");
        discover_r_files(&args.path)
    };
    if should_run("scan") {
        timed("scan", start, format!("{} files", files.len()));
    }

    // Phase 2: Tokenize
    let start = Instant::now();
    let mut parsed: Vec<ParsedFile> = {
        let _guard = TimingGuard::new("analysis-stats:tokenize");
        files
            .into_iter()
            .map(|(_, content)| ParsedFile {
                tokens: tokenize_all(&content),
                content,
                ast: None,
            })
            .collect()
    };
    if should_run("tokenize") {
        let token_count: usize = parsed.iter().map(|f| f.tokens.len()).sum();
        timed(
            "tokenize",
            start,
            format!("{} files, {} tokens", parsed.len(), token_count),
        );
    }

    // Phase 3: Parse
    let start = Instant::now();
    {
        let _guard = TimingGuard::new("analysis-stats:parse");
        for file in &mut parsed {
            file.ast = Some(ast_builder::build(&file.content, &file.tokens));
        }
    }
    if should_run("parse") {
        let with_errors = parsed
            .iter()
            .filter(|f| f.ast.as_ref().is_some_and(|ast| ast.has_errors()))
            .count();
        timed(
            "parse",
            start,
            format!("{} files parsed ({} with syntax errors)", parsed.len(), with_errors),
        );
    }

    if !should_run("packages") && !should_run("resolve") {
        return results;
    }

    // Phase 4: Packages
    let start = Instant::now();
    let callees: BTreeSet<String> = parsed
        .iter()
        .filter_map(|f| f.ast.as_ref().map(|ast| (ast, f.content.as_str())))
        .flat_map(|(ast, content)| call_names(ast, content))
        .collect();
    let index = PackageIndex::new(args.lib_paths.clone());
    let mut signatures: HashMap<String, Vec<FunctionSignature>> = HashMap::new();
    let package_count = {
        let _guard = TimingGuard::new("analysis-stats:packages");
        let count = index.scan().await;
        for name in &callees {
            let found = index.lookup_signatures(name).await;
            if !found.is_empty() {
                signatures.insert(name.clone(), found);
            }
        }
        count
    };
    if should_run("packages") {
        timed(
            "packages",
            start,
            format!(
                "{} packages, {} called names, {} with signatures",
                package_count,
                callees.len(),
                signatures.len()
            ),
        );
    }

    // Phase 5: Resolve
    if should_run("resolve") {
        let start = Instant::now();
        let config = SignatureConfig::default();
        let mut calls = 0usize;
        let mut resolved = 0usize;
        {
            let _guard = TimingGuard::new("analysis-stats:resolve");
            for file in &parsed {
                let Some(ast) = file.ast.as_ref() else {
                    continue;
                };
                for call in ast.iter().filter(|&id| ast.kind(id) == NodeKind::CallExpression) {
                    let Some((_, list)) = ast.call_parts(call) else {
                        continue;
                    };
                    let Some(candidates) = ast
                        .callee_name(call, &file.content)
                        .and_then(|name| signatures.get(&name))
                    else {
                        continue;
                    };
                    calls += 1;
                    let caret = ast.range(list).start + 1;
                    if compute_active_parameter(ast, &file.content, caret, candidates, &config)
                        .is_some()
                    {
                        resolved += 1;
                    }
                }
            }
        }
        timed(
            "resolve",
            start,
            format!("{} calls with signatures, {} resolved", calls, resolved),
        );
    }

    results
}

/// Callee names of every call in `ast`.
fn call_names<'a>(ast: &'a Ast, content: &'a str) -> impl Iterator<Item = String> + 'a {
    ast.iter()
        .filter(move |&id| ast.kind(id) == NodeKind::CallExpression)
        .filter_map(move |call| ast.callee_name(call, content))
}

/// Print phase results in human-readable format.
pub fn print_results(results: &[PhaseResult]) {
    println!("=== Kestrel Analysis Stats ===\n");
    for result in results {
        let rss_str = match result.peak_rss_bytes {
            Some(bytes) => format_bytes(bytes),
            None => "N/A".to_string(),
        };
        println!(
            "  {:<12} {:>10.2?}   RSS: {:<10}  ({})",
            result.name, result.duration, rss_str, result.detail
        );
    }

    if results.len() > 1 {
        let total: Duration = results.iter().map(|r| r.duration).sum();
        println!("\n  {:<12} {:>10.2?}", "TOTAL", total);
    }
    println!();
}

/// Print phase results in CSV format.
pub fn print_results_csv(results: &[PhaseResult]) {
    println!("phase,duration_ms,peak_rss_bytes,detail");
    for result in results {
        let rss = result
            .peak_rss_bytes
            .map_or(String::new(), |b| b.to_string());
        println!(
            "{},{:.3},{},\"{}\"",
            result.name,
            result.duration.as_secs_f64() * 1000.0,
            rss,
            result.detail.replace('"', "\"\"")
        );
    }
}

/// All `.R` files under `root` with their contents, sorted by path.
fn discover_r_files(root: &Path) -> Vec<(PathBuf, String)> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || entry
                    .file_name()
                    .to_str()
                    .map_or(true, |name| !should_skip_directory(name))
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("r"))
        })
        .filter_map(|entry| {
            let content = std::fs::read_to_string(entry.path()).ok()?;
            Some((entry.into_path(), content))
        })
        .collect()
}

/// Format a byte count as a human-readable string (e.g., "12.3 MB").
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

fn should_skip_directory(name: &str) -> bool {
    matches!(
        name,
        ".git"
            | ".svn"
            | ".hg"
            | "node_modules"
            | ".Rproj.user"
            | "renv"
            | "packrat"
            | ".vscode"
            | ".idea"
            | "target"
    )
}
