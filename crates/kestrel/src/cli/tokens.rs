// cli/tokens.rs - `kestrel tokens` subcommand
//
// Dumps the token stream of an R file, optionally followed by its syntax tree.

use std::fmt::Write;
use std::path::PathBuf;

use anyhow::Context;

use crate::ast_builder;
use crate::tokenizer::{tokenize_all, TokenKind};

#[derive(Debug, PartialEq, Eq)]
pub struct TokensArgs {
    pub file: PathBuf,
    pub trivia: bool,
    pub ast: bool,
}

/// Expected usage: `kestrel tokens <file> [--trivia] [--ast]`
pub fn parse_args(args: &mut impl Iterator<Item = String>) -> Result<TokensArgs, String> {
    let mut file: Option<PathBuf> = None;
    let mut trivia = false;
    let mut ast = false;

    for arg in args {
        match arg.as_str() {
            "--trivia" => trivia = true,
            "--ast" => ast = true,
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

    Ok(TokensArgs {
        file: file.ok_or_else(|| "Missing required <file> argument".to_string())?,
        trivia,
        ast,
    })
}

pub fn run(args: &TokensArgs) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    print!("{}", render(&text, args.trivia, args.ast));
    Ok(())
}

/// One line per token: `start..end Kind "text"`. Whitespace and comments are
/// included only with `trivia`.
pub fn render(text: &str, trivia: bool, ast: bool) -> String {
    let mut out = String::new();
    for token in tokenize_all(text) {
        if token.kind.is_trivia() && !trivia {
            continue;
        }
        let _ = writeln!(
            out,
            "{}..{} {:?} {:?}",
            token.start,
            token.end(),
            token.kind,
            token.text(text)
        );
        if token.kind == TokenKind::EndOfStream {
            break;
        }
    }
    if ast {
        out.push('\n');
        out.push_str(&ast_builder::parse(text).dump(text));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let mut args = vec!["a.R".to_string(), "--ast".to_string()].into_iter();
        let parsed = parse_args(&mut args).unwrap();
        assert_eq!(
            parsed,
            TokensArgs {
                file: PathBuf::from("a.R"),
                trivia: false,
                ast: true
            }
        );
        assert!(parse_args(&mut Vec::<String>::new().into_iter()).is_err());
        assert!(parse_args(&mut vec!["--bogus".to_string()].into_iter()).is_err());
    }

    #[test]
    fn test_render_skips_trivia_by_default() {
        let out = render("f(x) # note", false, false);
        assert_eq!(
            out,
            "0..1 Identifier \"f\"\n1..2 OpenParen \"(\"\n2..3 Identifier \"x\"\n3..4 CloseParen \")\"\n11..11 EndOfStream \"\"\n"
        );
        let with_trivia = render("f(x) # note", true, false);
        assert!(with_trivia.contains("Comment \"# note\""));
    }

    #[test]
    fn test_render_with_ast() {
        let out = render("x <- 1", false, true);
        assert!(out.contains("Program"));
        assert!(out.contains("BinaryExpression"));
    }
}
