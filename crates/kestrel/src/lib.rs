// lib.rs - Library crate for kestrel.
//
// The binary in main.rs is a thin command-line wrapper; editors, benches and
// integration tests use these modules directly.

pub mod ast;
pub mod ast_builder;
pub mod cli;
pub mod config;
pub mod editor_tree;
pub mod namespace_parser;
pub mod package_index;
pub mod parameter_resolver;
pub mod perf;
pub mod signature;
pub mod signature_help;
pub mod tokenizer;
// test_utils is available in test builds and when the `test-support` feature is enabled.
#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;

pub use editor_tree::{EditorTree, ParsedDocument, TreeReader};
pub use package_index::PackageIndex;
pub use parameter_resolver::{compute_active_parameter, ActiveParameter};
pub use signature::{FunctionSignature, Parameter};
pub use signature_help::{SignatureHelp, SignatureHelpEngine};
