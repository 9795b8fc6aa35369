//! Time-budget regression tests for kestrel.
//!
//! These tests assert that the editing hot paths complete within wall-clock
//! thresholds. They are gated behind `#[cfg(not(debug_assertions))]` because
//! debug-mode timings are not meaningful.
//!
//! Run with: `cargo test --release -p kestrel --features test-support --test performance_budgets`
//!
//! CI adaptation: when the `CI` environment variable is set, thresholds are
//! multiplied by a relaxation factor (default 3×, configurable via
//! `KESTREL_PERF_CI_FACTOR`).

#![cfg(not(debug_assertions))]

use std::fmt::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use kestrel::ast_builder;
use kestrel::config::{SignatureConfig, TreeConfig};
use kestrel::parameter_resolver::compute_active_parameter;
use kestrel::test_utils::fixture_library::{FixtureLibrary, LEGEND_FORMALS};
use kestrel::tokenizer::{relex, tokenize_all, DirtyRange};
use kestrel::{EditorTree, FunctionSignature, PackageIndex};

// ---------------------------------------------------------------------------
// Harness helpers
// ---------------------------------------------------------------------------

/// Run `f` three times and return the median duration.
fn median_of_3<F: FnMut()>(mut f: F) -> Duration {
    let mut times = [Duration::ZERO; 3];
    for t in &mut times {
        let start = Instant::now();
        f();
        *t = start.elapsed();
    }
    times.sort();
    times[1]
}

/// Relaxation factor: the parsed `factor` (default 3.0, at least 1.0) when
/// `ci` is non-empty, 1.0 otherwise.
fn ci_factor_from(ci: Option<&str>, factor: Option<&str>) -> f64 {
    let is_ci = ci.map(|v| !v.is_empty()).unwrap_or(false);

    if is_ci {
        factor
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|&f| f >= 1.0)
            .unwrap_or(3.0)
    } else {
        1.0
    }
}

fn ci_factor() -> f64 {
    ci_factor_from(
        std::env::var("CI").ok().as_deref(),
        std::env::var("KESTREL_PERF_CI_FACTOR").ok().as_deref(),
    )
}

fn assert_within_budget(label: &str, measured: Duration, budget_ms: u64) {
    let factor = ci_factor();
    let threshold = Duration::from_secs_f64(budget_ms as f64 * factor / 1000.0);
    let ci_note = if factor > 1.0 {
        format!(" (CI relaxation {factor:.1}× applied)")
    } else {
        String::new()
    };

    assert!(
        measured <= threshold,
        "Time budget exceeded for '{label}': \
         measured {measured:.1?}, threshold {threshold:.1?} \
         (base {budget_ms}ms × {factor:.1}){ci_note}",
    );
}

/// Synthetic R source of roughly `target_bytes`, cut at a line boundary.
fn generate_r_code_of_size(target_bytes: usize) -> String {
    let mut content = String::new();
    let mut func_idx = 0;

    while content.len() < target_bytes {
        writeln!(
            content,
            r#"func_{} <- function(x, y = {}, ...) {{
    result <- paste(x, y * {}, sep = "-")
    if (is.na(result)) {{
        return(NULL)
    }}
    legend("top", bty = "n", lty = 1)
}}
"#,
            func_idx,
            func_idx + 1,
            func_idx + 1
        )
        .unwrap();
        func_idx += 1;
    }

    if let Some(pos) = content[..target_bytes].rfind('\n') {
        content.truncate(pos + 1);
    }
    content
}

// ---------------------------------------------------------------------------
// Harness self-tests
// ---------------------------------------------------------------------------

#[test]
fn median_of_3_calls_f_exactly_3_times() {
    let mut count = 0u32;
    let _ = median_of_3(|| {
        count += 1;
    });
    assert_eq!(count, 3);
}

#[test]
fn ci_factor_defaults_and_overrides() {
    assert!((ci_factor_from(None, None) - 1.0).abs() < f64::EPSILON);
    assert!((ci_factor_from(Some("true"), None) - 3.0).abs() < f64::EPSILON);
    assert!((ci_factor_from(Some("true"), Some("5.0")) - 5.0).abs() < f64::EPSILON);
    assert!((ci_factor_from(Some("true"), Some("bogus")) - 3.0).abs() < f64::EPSILON);
    assert!((ci_factor_from(Some("true"), Some("0.5")) - 3.0).abs() < f64::EPSILON);
}

#[test]
#[should_panic(expected = "Time budget exceeded")]
fn assert_within_budget_panics_for_slow_op() {
    assert_within_budget("slow_op", Duration::from_secs(1), 5);
}

// ---------------------------------------------------------------------------
// Tokenize and parse: 1KB < 1ms, 100KB < 40ms
// ---------------------------------------------------------------------------

#[test]
fn budget_tokenize_and_parse_1kb() {
    let code = generate_r_code_of_size(1_024);
    let _ = ast_builder::parse(&code);

    let elapsed = median_of_3(|| {
        let _ = ast_builder::parse(&code);
    });
    assert_within_budget("parse_1kb", elapsed, 1);
}

#[test]
fn budget_tokenize_and_parse_100kb() {
    let code = generate_r_code_of_size(102_400);
    assert!(code.len() >= 90_000, "got {} bytes", code.len());
    let _ = tokenize_all(&code);

    let tokenize = median_of_3(|| {
        let _ = tokenize_all(&code);
    });
    assert_within_budget("tokenize_100kb", tokenize, 15);

    let parse = median_of_3(|| {
        let _ = ast_builder::parse(&code);
    });
    assert_within_budget("parse_100kb", parse, 40);
}

// ---------------------------------------------------------------------------
// Incremental work: one-character edit in 100KB < 5ms
// ---------------------------------------------------------------------------

#[test]
fn budget_relex_one_char_edit_100kb() {
    let before = generate_r_code_of_size(102_400);
    let tokens = tokenize_all(&before);
    let at = before.len() / 2;
    let mut after = before.clone();
    after.insert(at, 'z');
    let dirty = DirtyRange::from_edit(at, 0, 1);

    let elapsed = median_of_3(|| {
        let _ = relex(&tokens, &after, dirty);
    });
    assert_within_budget("relex_one_char_100kb", elapsed, 5);
}

#[test]
fn budget_edit_to_ready_100kb() {
    let code = generate_r_code_of_size(102_400);
    let mut tree = EditorTree::with_config(
        &code,
        TreeConfig {
            rebuild_on_edit: false,
            ..TreeConfig::default()
        },
    );
    let at = code.len() / 2;

    let elapsed = median_of_3(|| {
        tree.apply_edit(at, 0, "x");
        let _ = tree.ensure_ready();
        tree.apply_edit(at, 1, "");
    });
    assert_within_budget("edit_to_ready_100kb", elapsed, 80);
}

// ---------------------------------------------------------------------------
// Resolution: a call with many arguments < 1ms
// ---------------------------------------------------------------------------

#[test]
fn budget_resolve_legend_partial() {
    let signatures = [FunctionSignature::from_formals(
        "legend",
        &format!("({LEGEND_FORMALS})"),
    )];
    let source = "legend(\"top\", bty = \"n\", lt = 1, pt.c = 2, text.c = 3, ";
    let ast = ast_builder::parse(source);
    let config = SignatureConfig {
        partial_argument_name_match: true,
    };

    let elapsed = median_of_3(|| {
        for _ in 0..100 {
            let _ = compute_active_parameter(&ast, source, source.len(), &signatures, &config);
        }
    });
    assert_within_budget("resolve_legend_x100", elapsed, 10);
}

// ---------------------------------------------------------------------------
// Package index: scan and load a small library < 50ms
// ---------------------------------------------------------------------------

#[tokio::test]
async fn budget_package_index_scan_and_populate() {
    let library = FixtureLibrary::with_standard_packages();

    let start = Instant::now();
    let index = Arc::new(PackageIndex::new(vec![library.path().to_path_buf()]));
    index.scan().await;
    index.populate_all().await;
    let elapsed = start.elapsed();

    assert_eq!(index.package_count().await, 4);
    assert_within_budget("package_index_scan_and_populate", elapsed, 50);
}
