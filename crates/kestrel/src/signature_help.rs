//
// signature_help.rs
//
// Signature help queries: find the call under the caret in a parsed document,
// fetch candidate signatures for its callee and resolve the active parameter.
//

use std::sync::Arc;

use serde::Serialize;

use crate::config::SignatureConfig;
use crate::editor_tree::ParsedDocument;
use crate::package_index::PackageIndex;
use crate::parameter_resolver::{active_parameter_at, find_call_at};
use crate::perf::TimingGuard;
use crate::signature::{extract_signatures, FunctionSignature};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureHelp {
    /// Callee as written, e.g. `aov` or `stats::aov`.
    pub function_name: String,
    pub signatures: Vec<FunctionSignature>,
    pub active_signature: usize,
    pub active_parameter: usize,
}

pub struct SignatureHelpEngine {
    index: Arc<PackageIndex>,
    config: SignatureConfig,
}

impl SignatureHelpEngine {
    pub fn new(index: Arc<PackageIndex>, config: SignatureConfig) -> Self {
        Self { index, config }
    }

    pub fn index(&self) -> &Arc<PackageIndex> {
        &self.index
    }

    pub fn config(&self) -> &SignatureConfig {
        &self.config
    }

    /// Signature help for `caret` in `document`, or `None` when the caret is
    /// not inside a call to a known function.
    ///
    /// Functions defined at top level in the document itself are offered
    /// ahead of package functions with the same name.
    pub async fn signature_help(
        &self,
        document: &ParsedDocument,
        caret: usize,
    ) -> Option<SignatureHelp> {
        let _guard = TimingGuard::with_threshold("signature_help", 20);
        let source: &str = &document.text;
        let site = find_call_at(&document.ast, caret)?;
        let function_name = document.ast.callee_name(site.call, source)?;

        let mut signatures: Vec<FunctionSignature> = if function_name.contains("::") {
            Vec::new()
        } else {
            extract_signatures(source)
                .into_iter()
                .filter(|s| s.name == function_name)
                .collect()
        };
        signatures.extend(self.index.lookup_signatures(&function_name).await);
        if signatures.is_empty() {
            log::trace!("No signatures for '{}'", function_name);
            return None;
        }

        let active = active_parameter_at(
            &document.ast,
            source,
            site,
            caret,
            &signatures,
            &self.config,
        )?;
        Some(SignatureHelp {
            function_name,
            signatures,
            active_signature: active.signature,
            active_parameter: active.parameter,
        })
    }
}

impl std::fmt::Debug for SignatureHelpEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureHelpEngine")
            .field("index", &self.index)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package_index::PackageMetadata;

    async fn engine(partial: bool) -> SignatureHelpEngine {
        let index = PackageIndex::empty();
        index
            .register_package(PackageMetadata::new("stats").with_function(
                FunctionSignature::from_formals(
                    "aov",
                    "(formula, data = NULL, projections = FALSE, qr = TRUE, contrasts = NULL, ...)",
                ),
            ))
            .await;
        SignatureHelpEngine::new(
            Arc::new(index),
            SignatureConfig {
                partial_argument_name_match: partial,
            },
        )
    }

    fn document(text: &str) -> ParsedDocument {
        ParsedDocument::parse(1, Arc::from(text))
    }

    #[tokio::test]
    async fn test_signature_help_for_package_function() {
        let engine = engine(false).await;
        let help = engine
            .signature_help(&document("fit <- aov(y ~ x, "), 18)
            .await
            .unwrap();
        assert_eq!(help.function_name, "aov");
        assert_eq!(help.signatures.len(), 1);
        assert_eq!(help.signatures[0].package.as_deref(), Some("stats"));
        assert_eq!(help.active_signature, 0);
        assert_eq!(help.active_parameter, 1);
    }

    #[tokio::test]
    async fn test_qualified_callee() {
        let engine = engine(true).await;
        let help = engine
            .signature_help(&document("stats::aov(q"), 12)
            .await
            .unwrap();
        assert_eq!(help.function_name, "stats::aov");
        assert_eq!(help.active_parameter, 0);
    }

    #[tokio::test]
    async fn test_local_definition_comes_first() {
        let engine = engine(false).await;
        let text = "aov <- function(model, ...) NULL\naov(m, ";
        let help = engine
            .signature_help(&document(text), text.len())
            .await
            .unwrap();
        assert_eq!(help.signatures.len(), 2);
        assert_eq!(help.signatures[0].package, None);
        assert_eq!(help.active_signature, 0);
        assert_eq!(help.active_parameter, 1);
    }

    #[tokio::test]
    async fn test_unknown_function_or_no_call() {
        let engine = engine(false).await;
        assert!(engine.signature_help(&document("nope(1, "), 8).await.is_none());
        assert!(engine.signature_help(&document("x <- 1"), 3).await.is_none());
        assert!(engine.signature_help(&document("f()(1"), 5).await.is_none());
    }

    #[tokio::test]
    async fn test_serializes_camel_case() {
        let engine = engine(false).await;
        let help = engine.signature_help(&document("aov("), 4).await.unwrap();
        let json = serde_json::to_value(&help).unwrap();
        assert_eq!(json["functionName"], "aov");
        assert_eq!(json["activeParameter"], 0);
        assert_eq!(json["signatures"][0]["parameters"][0]["name"], "formula");
    }
}
