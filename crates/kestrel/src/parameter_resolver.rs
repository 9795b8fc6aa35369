//
// parameter_resolver.rs
//
// Maps a caret offset inside a call expression to the active parameter of the
// best-fitting candidate signature, following R's argument matching rules:
// exact names, then unique partial names, then positions.
//

use std::cmp::Ordering;

use crate::ast::{Ast, NodeId, NodeKind, TextRange};
use crate::config::SignatureConfig;
use crate::signature::FunctionSignature;

// ---------------------------------------------------------------------------
// Call sites
// ---------------------------------------------------------------------------

/// The call expression enclosing a caret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    pub call: NodeId,
    pub callee: NodeId,
    pub arguments: NodeId,
}

/// Innermost call whose argument list contains `caret`. The caret must be
/// after the opening parenthesis and, for a closed list, before the closing
/// one; an unclosed list extends to end of input.
pub fn find_call_at(ast: &Ast, caret: usize) -> Option<CallSite> {
    let root_range = ast.range(ast.root());
    if caret > root_range.end {
        return None;
    }
    let innermost = ast.node_at(caret);
    std::iter::once(innermost)
        .chain(ast.ancestors(innermost))
        .filter(|&id| ast.kind(id) == NodeKind::CallExpression)
        .find_map(|call| {
            let (callee, arguments) = ast.call_parts(call)?;
            let range = ast.range(arguments);
            let inside = match ast.kind(arguments) {
                NodeKind::ArgumentList { closed: true } => range.start < caret && caret < range.end,
                _ => range.start < caret && caret <= range.end,
            };
            inside.then_some(CallSite {
                call,
                callee,
                arguments,
            })
        })
}

// ---------------------------------------------------------------------------
// Argument binding
// ---------------------------------------------------------------------------

/// One written (or, at the caret, implied) argument of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CallArgument {
    /// Comma-delimited slot the argument occupies.
    slot: usize,
    name: Option<String>,
    range: TextRange,
}

/// Where an argument ended up for one signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Parameter(usize),
    Unmatched,
    /// Named argument whose tag prefixes more than one parameter.
    Ambiguous,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BindResult {
    bindings: Vec<Binding>,
    filled: Vec<bool>,
    ambiguous: usize,
    unmatched: usize,
    unfilled_required: usize,
}

impl BindResult {
    /// Lower is better: ambiguity ranks worst, then unmatched arguments,
    /// then required parameters left without a value.
    fn score(&self) -> (usize, usize, usize) {
        (self.ambiguous, self.unmatched, self.unfilled_required)
    }
}

/// Bind `arguments` to `signature`'s parameters.
///
/// Named arguments bind by exact name first. With `partial` they may then
/// bind to the only unfilled parameter their tag prefixes; partial matching
/// stops at `...` as in R. Named arguments that still do not bind go to `...`
/// when the signature has one. Positional arguments fill the parameters
/// before `...` left to right and the variadic takes the surplus. A repeated
/// name binds only its first occurrence.
fn bind_arguments(
    signature: &FunctionSignature,
    arguments: &[CallArgument],
    partial: bool,
) -> BindResult {
    let parameters = &signature.parameters;
    let variadic = signature.variadic_index();
    // Formals after `...` can only be matched by their exact name.
    let positional_limit = variadic.unwrap_or(parameters.len());

    let mut bindings = vec![Binding::Unmatched; arguments.len()];
    let mut filled = vec![false; parameters.len()];
    let mut settled = vec![false; arguments.len()];

    for (i, argument) in arguments.iter().enumerate() {
        let Some(name) = argument.name.as_deref() else {
            continue;
        };
        if let Some(index) = parameters
            .iter()
            .position(|p| !p.is_variadic && p.name == name)
        {
            settled[i] = true;
            if !filled[index] {
                filled[index] = true;
                bindings[i] = Binding::Parameter(index);
            }
        }
    }

    if partial {
        for (i, argument) in arguments.iter().enumerate() {
            let Some(name) = argument.name.as_deref() else {
                continue;
            };
            if settled[i] {
                continue;
            }
            let mut candidates = (0..positional_limit)
                .filter(|&index| !filled[index] && parameters[index].name.starts_with(name));
            match (candidates.next(), candidates.next()) {
                (Some(index), None) => {
                    filled[index] = true;
                    bindings[i] = Binding::Parameter(index);
                    settled[i] = true;
                }
                (Some(_), Some(_)) => {
                    bindings[i] = Binding::Ambiguous;
                    settled[i] = true;
                }
                _ => {}
            }
        }
    }

    if let Some(variadic) = variadic {
        for (i, argument) in arguments.iter().enumerate() {
            if argument.name.is_some() && !settled[i] {
                bindings[i] = Binding::Parameter(variadic);
                filled[variadic] = true;
            }
        }
    }

    let mut next = 0;
    for (i, argument) in arguments.iter().enumerate() {
        if argument.name.is_some() {
            continue;
        }
        while next < positional_limit && filled[next] {
            next += 1;
        }
        if next < positional_limit {
            filled[next] = true;
            bindings[i] = Binding::Parameter(next);
        } else if let Some(variadic) = variadic {
            filled[variadic] = true;
            bindings[i] = Binding::Parameter(variadic);
        }
    }

    let ambiguous = bindings
        .iter()
        .filter(|&&b| b == Binding::Ambiguous)
        .count();
    let unmatched = bindings
        .iter()
        .filter(|&&b| b != Binding::Ambiguous && !matches!(b, Binding::Parameter(_)))
        .count();
    let unfilled_required = parameters
        .iter()
        .zip(&filled)
        .filter(|(p, &f)| !f && !p.is_variadic && !p.has_default())
        .count();

    BindResult {
        bindings,
        filled,
        ambiguous,
        unmatched,
        unfilled_required,
    }
}

/// Parameter a caret in an argument that bound to nothing is attributed to:
/// the first unfilled parameter a positional argument could take, else `...`.
fn next_unfilled(signature: &FunctionSignature, result: &BindResult) -> Option<usize> {
    let limit = signature
        .variadic_index()
        .unwrap_or(signature.parameters.len());
    (0..limit)
        .find(|&index| !result.filled[index])
        .or_else(|| signature.variadic_index())
}

// ---------------------------------------------------------------------------
// Active parameter
// ---------------------------------------------------------------------------

/// Winning signature and the parameter the caret is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ActiveParameter {
    pub signature: usize,
    pub parameter: usize,
}

/// Resolve the active parameter for `caret` in `source`.
///
/// Returns `None` when the caret is not inside a call's argument list, when
/// there are no candidate signatures, or when the winning signature has no
/// parameter for the caret position.
pub fn compute_active_parameter(
    ast: &Ast,
    source: &str,
    caret: usize,
    signatures: &[FunctionSignature],
    config: &SignatureConfig,
) -> Option<ActiveParameter> {
    let site = find_call_at(ast, caret)?;
    active_parameter_at(ast, source, site, caret, signatures, config)
}

/// Like [`compute_active_parameter`] for an already located call.
pub fn active_parameter_at(
    ast: &Ast,
    source: &str,
    site: CallSite,
    caret: usize,
    signatures: &[FunctionSignature],
    config: &SignatureConfig,
) -> Option<ActiveParameter> {
    if signatures.is_empty() {
        return None;
    }

    let separators = &ast.node(site.arguments).separators;
    let caret_slot = separators.iter().filter(|&&comma| comma < caret).count();
    let mut arguments = collect_arguments(ast, source, site.arguments);

    let caret_argument = match arguments.iter().position(|a| a.slot == caret_slot) {
        Some(index) => index,
        None => {
            // Nothing written in this slot yet; it will be a positional.
            arguments.push(CallArgument {
                slot: caret_slot,
                name: None,
                range: TextRange::new(caret, caret),
            });
            arguments.len() - 1
        }
    };

    let partial = config.partial_argument_name_match;
    let (best, result) = signatures
        .iter()
        .enumerate()
        .map(|(index, signature)| (index, bind_arguments(signature, &arguments, partial)))
        .reduce(|best, candidate| match candidate.1.score().cmp(&best.1.score()) {
            Ordering::Less => candidate,
            _ => best,
        })?;
    let signature = &signatures[best];
    if signature.parameters.is_empty() {
        return None;
    }

    let before_first = caret_slot == 0 && caret < arguments[caret_argument].range.start;
    let parameter = if before_first {
        0
    } else {
        match result.bindings[caret_argument] {
            Binding::Parameter(index) => index,
            Binding::Ambiguous => next_unfilled(signature, &result)?,
            Binding::Unmatched if arguments[caret_argument].name.is_some() => {
                next_unfilled(signature, &result)?
            }
            Binding::Unmatched => return None,
        }
    };

    log::trace!(
        "Active parameter for caret {}: signature {} ({}), parameter {}",
        caret,
        best,
        signature.name,
        parameter
    );
    Some(ActiveParameter {
        signature: best,
        parameter,
    })
}

/// Arguments of `list` in source order, with the slot each occupies.
fn collect_arguments(ast: &Ast, source: &str, list: NodeId) -> Vec<CallArgument> {
    let separators = &ast.node(list).separators;
    ast.arguments(list)
        .iter()
        .map(|&argument| {
            let range = ast.range(argument);
            CallArgument {
                slot: separators.iter().filter(|&&comma| comma < range.start).count(),
                name: ast.argument_name(argument, source).map(String::from),
                range,
            }
        })
        .collect()
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::ast_builder::parse;
    use proptest::prelude::*;

    fn signature() -> FunctionSignature {
        FunctionSignature::from_formals("f", "(alpha, beta = 1, gamma = 2, ...)")
    }

    fn argument() -> impl Strategy<Value = String> {
        prop_oneof![
            prop::sample::select(vec!["x", "df", "n", "obs"]).prop_map(String::from),
            "[0-9]{1,2}",
            Just(String::new()),
            prop::sample::select(vec!["alpha", "be", "g", "zeta"])
                .prop_map(|name| format!("{name} = 1")),
        ]
    }

    proptest! {
        #[test]
        fn prop_active_parameter_in_range(
            args in prop::collection::vec(argument(), 0..6),
            caret_pick in 0usize..64,
            partial in any::<bool>(),
        ) {
            let source = format!("f({}", args.join(", "));
            let caret = 2 + caret_pick % (source.len() - 1);
            let ast = parse(&source);
            let config = SignatureConfig { partial_argument_name_match: partial };
            let sigs = [signature()];
            let first = compute_active_parameter(&ast, &source, caret, &sigs, &config);
            let second = compute_active_parameter(&ast, &source, caret, &sigs, &config);
            prop_assert_eq!(first, second);
            // Every slot either binds or overflows into `...`, so there is always an answer.
            let active = first.unwrap();
            prop_assert_eq!(active.signature, 0);
            prop_assert!(active.parameter < sigs[0].parameters.len());
        }
    }
}
