//! Deterministic R script generator for benchmarks and tests.
//!
//! Generates directories of `.R` files with a controlled number of function
//! definitions, calls into the standard fixture packages and filler lines.
//! No randomness, so benchmarks are reproducible.

use std::fmt::Write;
use std::path::Path;
use tempfile::TempDir;

#[derive(Debug, Clone)]
pub struct FixtureConfig {
    pub file_count: usize,
    pub functions_per_file: usize,
    pub calls_per_file: usize,
    pub extra_lines_per_file: usize,
}

/// Calls cycled through in generated scripts, all resolvable against
/// `FixtureLibrary::with_standard_packages`.
const CALLS: &[&str] = &[
    "aov(y ~ x, data = df, qr = TRUE)",
    "legend(\"topright\", legend = labels, bty = \"n\", lty = 1)",
    "paste(\"a\", \"b\", sep = \"-\")",
    "stats::lm(y ~ x, df)",
    "head(df, 10)",
];

impl FixtureConfig {
    pub fn small() -> Self {
        Self {
            file_count: 10,
            functions_per_file: 5,
            calls_per_file: 5,
            extra_lines_per_file: 5,
        }
    }

    pub fn medium() -> Self {
        Self {
            file_count: 50,
            functions_per_file: 10,
            calls_per_file: 10,
            extra_lines_per_file: 10,
        }
    }

    pub fn large() -> Self {
        Self {
            file_count: 200,
            functions_per_file: 20,
            calls_per_file: 20,
            extra_lines_per_file: 20,
        }
    }
}

/// Content of script `index`.
pub fn generate_script(index: usize, config: &FixtureConfig) -> String {
    let mut content = String::new();

    for func_i in 0..config.functions_per_file {
        writeln!(
            content,
            "func_{}_{} <- function(x, y = {}, ...) {{",
            index,
            func_i,
            func_i + 1
        )
        .unwrap();
        writeln!(content, "    result <- x + y * {}", func_i + 1).unwrap();
        writeln!(content, "    if (is.na(result)) {{").unwrap();
        writeln!(content, "        return(NULL)").unwrap();
        writeln!(content, "    }}").unwrap();
        writeln!(content, "    result").unwrap();
        writeln!(content, "}}").unwrap();
        content.push('\n');
    }

    for call_i in 0..config.calls_per_file {
        let call = CALLS[(index + call_i) % CALLS.len()];
        writeln!(content, "res_{}_{} <- {}", index, call_i, call).unwrap();
    }

    for line_i in 0..config.extra_lines_per_file {
        writeln!(content, "var_{}_{} <- c({}, {})", index, line_i, line_i, line_i + 1).unwrap();
    }

    content
}

/// Create a temporary directory of generated scripts, removed on drop.
pub fn create_fixture_workspace(config: &FixtureConfig) -> TempDir {
    let temp_dir = TempDir::new().expect("Failed to create temp directory for fixture workspace");
    write_fixture_workspace(temp_dir.path(), config);
    temp_dir
}

pub fn write_fixture_workspace(dir: &Path, config: &FixtureConfig) {
    for i in 0..config.file_count {
        let filename = format!("script_{}.R", i);
        std::fs::write(dir.join(&filename), generate_script(i, config))
            .unwrap_or_else(|e| panic!("Failed to write fixture file {}: {}", filename, e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast_builder::parse;

    #[test]
    fn test_file_count_matches_config() {
        let config = FixtureConfig::small();
        let workspace = create_fixture_workspace(&config);
        let count = std::fs::read_dir(workspace.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "R"))
            .count();
        assert_eq!(count, config.file_count);
    }

    #[test]
    fn test_deterministic_output() {
        let config = FixtureConfig::small();
        assert_eq!(generate_script(3, &config), generate_script(3, &config));
    }

    #[test]
    fn test_generated_scripts_parse_cleanly() {
        let config = FixtureConfig::small();
        for i in 0..config.file_count {
            let script = generate_script(i, &config);
            let ast = parse(&script);
            assert!(!ast.has_errors(), "script {} has syntax errors:\n{}", i, script);
        }
    }
}
