// namespace_parser.rs - NAMESPACE and DESCRIPTION parsing for package metadata
//
// NAMESPACE files are R code, so they are parsed with the crate's own
// tokenizer and builder; every `export`, `exportPattern` and `S3method` call
// is collected, including those nested under `if (...)`. DESCRIPTION files
// are Debian control format and are read field by field.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use regex::Regex;

use crate::ast::{unquote, Ast, NodeId, NodeKind};
use crate::ast_builder;

/// Directives of interest from a NAMESPACE file, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceDirectives {
    /// Names from `export(...)`.
    pub exports: Vec<String>,
    /// Regular expressions from `exportPattern(...)`.
    pub export_patterns: Vec<String>,
    /// `generic.class` names from `S3method(generic, class[, method])`.
    pub s3_methods: Vec<String>,
}

impl NamespaceDirectives {
    /// Compile `export_patterns`. Patterns the regex engine rejects are
    /// logged and skipped.
    pub fn compiled_patterns(&self) -> Vec<Regex> {
        self.export_patterns
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    log::trace!("Skipping invalid exportPattern {:?}: {}", pattern, e);
                    None
                }
            })
            .collect()
    }

    /// Whether `name` is exported by an explicit directive or a pattern.
    pub fn is_exported(&self, name: &str, patterns: &[Regex]) -> bool {
        self.exports.iter().any(|e| e == name)
            || self.s3_methods.iter().any(|m| m == name)
            || patterns.iter().any(|p| p.is_match(name))
    }
}

/// Read and parse a NAMESPACE file.
pub fn read_namespace(path: &Path) -> Result<NamespaceDirectives> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read NAMESPACE file {:?}", path))?;
    Ok(parse_namespace(&content))
}

/// Parse NAMESPACE content. Unknown directives are ignored.
pub fn parse_namespace(content: &str) -> NamespaceDirectives {
    let ast = ast_builder::parse(content);
    let mut directives = NamespaceDirectives::default();

    for call in ast
        .iter()
        .filter(|&id| ast.kind(id) == NodeKind::CallExpression)
    {
        let Some(directive) = ast.callee_name(call, content) else {
            continue;
        };
        let args = directive_args(&ast, call, content);
        match directive.as_str() {
            "export" => directives.exports.extend(args),
            "exportPattern" => directives.export_patterns.extend(args),
            "S3method" => {
                if let [generic, class, ..] = args.as_slice() {
                    directives.s3_methods.push(format!("{generic}.{class}"));
                }
            }
            _ => {}
        }
    }
    directives
}

/// Symbol or string arguments of a directive call, unquoted and unescaped.
fn directive_args(ast: &Ast, call: NodeId, source: &str) -> Vec<String> {
    let Some((_, list)) = ast.call_parts(call) else {
        return Vec::new();
    };
    ast.arguments(list)
        .iter()
        .filter(|&&arg| ast.argument_name(arg, source).is_none())
        .filter_map(|&arg| ast.argument_value(arg))
        .filter_map(|value| {
            let text = ast.text(value, source);
            match ast.kind(value) {
                NodeKind::Identifier => Some(unquote(text).to_string()),
                NodeKind::Literal if text.starts_with(['"', '\'']) => {
                    Some(unescape_string(unquote(text)))
                }
                _ => None,
            }
        })
        .filter(|name| !name.is_empty())
        .collect()
}

/// Resolve the backslash escapes R allows in a string literal body.
fn unescape_string(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Fields of a DESCRIPTION file, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Description {
    fields: IndexMap<String, String>,
}

impl Description {
    /// Parse DCF content: `Field: value` lines with indented continuation
    /// lines. Continuations are joined with single spaces.
    pub fn parse(content: &str) -> Self {
        let mut fields: IndexMap<String, String> = IndexMap::new();
        let mut current: Option<String> = None;

        for line in content.lines() {
            if line.starts_with([' ', '\t']) {
                if let Some(value) = current.as_ref().and_then(|field| fields.get_mut(field)) {
                    let continuation = line.trim();
                    if !continuation.is_empty() {
                        if !value.is_empty() {
                            value.push(' ');
                        }
                        value.push_str(continuation);
                    }
                }
                continue;
            }
            current = match line.split_once(':') {
                Some((name, value)) if !name.is_empty() && !name.contains(' ') => {
                    fields.insert(name.to_string(), value.trim().to_string());
                    Some(name.to_string())
                }
                _ => None,
            };
        }
        Self { fields }
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    /// The `Description` field, falling back to `Title`.
    pub fn summary(&self) -> Option<&str> {
        self.get("Description")
            .or_else(|| self.get("Title"))
            .filter(|s| !s.is_empty())
    }

    /// Package names from `Depends`, without version constraints or `R`.
    pub fn depends(&self) -> Vec<String> {
        self.get("Depends")
            .map(parse_depends_value)
            .unwrap_or_default()
    }
}

/// Read and parse a DESCRIPTION file.
pub fn read_description(path: &Path) -> Result<Description> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read DESCRIPTION file {:?}", path))?;
    Ok(Description::parse(&content))
}

/// `"R (>= 3.5), dplyr (>= 1.0), ggplot2"` -> `["dplyr", "ggplot2"]`.
fn parse_depends_value(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| {
            let s = s.trim();
            s.find('(').map_or(s, |paren| s[..paren].trim())
        })
        .filter(|s| !s.is_empty() && *s != "R")
        .map(String::from)
        .collect()
}
