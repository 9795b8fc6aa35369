//
// signature.rs
//
// Function signatures and their extraction from R function definitions.
//

use std::fmt;

use serde::Serialize;

use crate::ast::{unquote, Ast, NodeId, NodeKind};
use crate::ast_builder;

/// R's catch-all formal.
pub const VARIADIC: &str = "...";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Parameter {
    pub name: String,
    /// Source text of the default expression, if any.
    pub default_value: Option<String>,
    pub is_variadic: bool,
}

impl Parameter {
    /// A parameter without a default. `...` is recognised as variadic.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let is_variadic = name == VARIADIC;
        Self {
            name,
            default_value: None,
            is_variadic,
        }
    }

    pub fn with_default(name: impl Into<String>, default_value: impl Into<String>) -> Self {
        Self {
            default_value: Some(default_value.into()),
            ..Self::new(name)
        }
    }

    pub fn variadic() -> Self {
        Self::new(VARIADIC)
    }

    pub fn has_default(&self) -> bool {
        self.default_value.is_some()
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.default_value {
            Some(default) => write!(f, "{} = {}", self.name, default),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FunctionSignature {
    pub name: String,
    pub parameters: Vec<Parameter>,
    /// Package the function was found in, when it came from the index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
}

impl FunctionSignature {
    pub fn new(name: impl Into<String>, parameters: Vec<Parameter>) -> Self {
        Self {
            name: name.into(),
            parameters,
            package: None,
        }
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    /// Parse a formals list such as `(formula, data = NULL, ...)`; the
    /// surrounding parentheses are optional.
    pub fn from_formals(name: impl Into<String>, formals: &str) -> Self {
        let formals = formals.trim();
        let inner = formals
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .unwrap_or(formals);
        let source = format!("function({inner}) NULL");
        let ast = ast_builder::parse(&source);
        let parameters = ast
            .iter()
            .find(|&id| ast.kind(id) == NodeKind::FunctionDefinition)
            .map(|function| formals_from_ast(&ast, function, &source))
            .unwrap_or_default();
        Self::new(name, parameters)
    }

    pub fn variadic_index(&self) -> Option<usize> {
        self.parameters.iter().position(|p| p.is_variadic)
    }

    pub fn parameter_index(&self, name: &str) -> Option<usize> {
        self.parameters.iter().position(|p| p.name == name)
    }

    /// `name(p1, p2 = default, ...)`.
    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, parameter) in self.parameters.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{parameter}")?;
        }
        f.write_str(")")
    }
}

/// Parameters declared by a `FunctionDefinition` node.
pub fn formals_from_ast(ast: &Ast, function: NodeId, source: &str) -> Vec<Parameter> {
    let Some(&formals) = ast
        .children(function)
        .first()
        .filter(|&&first| matches!(ast.kind(first), NodeKind::ArgumentList { .. }))
    else {
        return Vec::new();
    };

    ast.arguments(formals)
        .iter()
        .filter_map(|&argument| {
            if let Some(name) = ast.argument_name(argument, source) {
                let default = ast
                    .argument_value(argument)
                    .map(|value| ast.text(value, source).trim().to_string());
                return Some(Parameter {
                    default_value: default,
                    ..Parameter::new(name)
                });
            }
            let value = ast.argument_value(argument)?;
            (ast.kind(value) == NodeKind::Identifier)
                .then(|| Parameter::new(unquote(ast.text(value, source))))
        })
        .collect()
}

/// Top-level function definitions in `source`: `f <- function(...)`,
/// `f = function(...)`, `f <<- function(...)` and `(function(...) body) -> f`.
pub fn extract_signatures(source: &str) -> Vec<FunctionSignature> {
    let ast = ast_builder::parse(source);
    let mut signatures = Vec::new();
    for &statement in ast.children(ast.root()) {
        if ast.kind(statement) != NodeKind::ExpressionStatement {
            continue;
        }
        if let Some(&expression) = ast.children(statement).first() {
            collect_definitions(&ast, expression, source, &mut Vec::new(), &mut signatures);
        }
    }
    signatures
}

/// Walk an assignment chain such as `f <- g <- function(x) x`, collecting
/// the names bound on the way to a function definition.
fn collect_definitions(
    ast: &Ast,
    node: NodeId,
    source: &str,
    names: &mut Vec<String>,
    out: &mut Vec<FunctionSignature>,
) {
    match ast.kind(node) {
        NodeKind::FunctionDefinition => {
            let parameters = formals_from_ast(ast, node, source);
            out.extend(
                names
                    .drain(..)
                    .map(|name| FunctionSignature::new(name, parameters.clone())),
            );
        }
        NodeKind::BinaryExpression { operator } => {
            let [lhs, rhs] = ast.children(node) else {
                return;
            };
            let (target, value) = match &source[operator.start..operator.end] {
                "<-" | "<<-" | "=" => (*lhs, *rhs),
                "->" | "->>" => (*rhs, *lhs),
                _ => return,
            };
            if !matches!(ast.kind(target), NodeKind::Identifier | NodeKind::Literal) {
                return;
            }
            names.push(unquote(ast.text(target, source)).to_string());
            collect_definitions(ast, value, source, names, out);
        }
        NodeKind::Parenthesized => {
            if let Some(&inner) = ast.children(node).first() {
                collect_definitions(ast, inner, source, names, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_formals() {
        let aov = FunctionSignature::from_formals(
            "aov",
            "(formula, data = NULL, projections = FALSE, qr = TRUE, contrasts = NULL, ...)",
        );
        let names: Vec<&str> = aov.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["formula", "data", "projections", "qr", "contrasts", "..."]
        );
        assert!(!aov.parameters[0].has_default());
        assert_eq!(aov.parameters[1].default_value.as_deref(), Some("NULL"));
        assert_eq!(aov.variadic_index(), Some(5));
        assert_eq!(aov.parameter_index("qr"), Some(3));
    }

    #[test]
    fn test_from_formals_without_parens() {
        let sig = FunctionSignature::from_formals("f", "x, y = c(1, 2)");
        assert_eq!(sig.parameters.len(), 2);
        assert_eq!(sig.parameters[1].default_value.as_deref(), Some("c(1, 2)"));
        assert_eq!(sig.variadic_index(), None);
    }

    #[test]
    fn test_label() {
        let sig = FunctionSignature::new(
            "aov",
            vec![
                Parameter::new("formula"),
                Parameter::with_default("data", "NULL"),
                Parameter::variadic(),
            ],
        );
        assert_eq!(sig.label(), "aov(formula, data = NULL, ...)");
        assert!(sig.parameters[2].is_variadic);
    }

    #[test]
    fn test_extract_signatures() {
        let source = "\
#' Fit things
fit <- function(x, y = 2, ...) {
  x + y
}
helper = function() NULL
(function(a) a) -> backwards
`odd name` <- function(z) z
a <- b <- function(k) k
not_a_function <- 42
if (TRUE) inner <- function(q) q
";
        let signatures = extract_signatures(source);
        let labels: Vec<String> = signatures.iter().map(|s| s.label()).collect();
        assert_eq!(
            labels,
            vec![
                "fit(x, y = 2, ...)",
                "helper()",
                "backwards(a)",
                "odd name(z)",
                "a(k)",
                "b(k)",
            ]
        );
    }

    #[test]
    fn test_extract_signatures_tolerates_broken_source() {
        let signatures = extract_signatures("ok <- function(a, b) {\nbroken <- function(x,");
        assert_eq!(signatures.len(), 1);
        assert_eq!(signatures[0].name, "ok");
        assert_eq!(signatures[0].parameters.len(), 2);
    }
}
