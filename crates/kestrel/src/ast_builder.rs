//
// ast_builder.rs
//
// Recursive-descent parser for R with Pratt-style operator precedence.
// Always produces a total tree: unexpected tokens are folded into `Error`
// nodes and parsing resumes at the next statement or argument boundary.
//

use crate::ast::{Ast, Node, NodeId, NodeKind, TextRange};
use crate::tokenizer::{tokenize_all, Token, TokenKind};

/// Deeper nesting than this is swallowed into a single open `Error` node so
/// that pathological input cannot exhaust the stack.
const MAX_NESTING: usize = 100;

/// Arguments stop before `=` and `?` so that `name = value` stays an argument.
const ARG_BP: u8 = 5;
/// Bodies of `function`, `if`, `for`, `while` and `repeat` take assignments.
const BODY_BP: u8 = 3;
/// Calls and indexing bind tighter than everything except `$`, `@` and `::`.
const POSTFIX_BP: u8 = 40;

/// Tokenize and parse `text`.
pub fn parse(text: &str) -> Ast {
    build(text, &tokenize_all(text))
}

/// Build a syntax tree for `text` from its token sequence.
pub fn build(text: &str, tokens: &[Token]) -> Ast {
    Builder::new(text, tokens).run()
}

/// `(left, right)` binding powers of binary operators. Right-associative
/// operators have `right < left`.
fn infix_binding_power(op: &str) -> Option<(u8, u8)> {
    let bp = match op {
        "?" => (1, 2),
        "=" => (4, 3),
        "<-" | "<<-" => (6, 5),
        "->" | "->>" => (7, 8),
        "~" => (9, 10),
        "||" | "|" => (11, 12),
        "&&" | "&" => (13, 14),
        "==" | "!=" | "<" | ">" | "<=" | ">=" => (17, 18),
        "+" | "-" => (19, 20),
        "*" | "/" => (21, 22),
        "|>" => (23, 24),
        op if op.len() >= 2 && op.starts_with('%') && op.ends_with('%') => (23, 24),
        ":" => (25, 26),
        "^" | "**" => (30, 29),
        "$" | "@" => (41, 42),
        "::" | ":::" => (43, 44),
        _ => return None,
    };
    Some(bp)
}

fn prefix_binding_power(op: &str) -> Option<u8> {
    match op {
        "-" | "+" => Some(27),
        "!" => Some(15),
        "~" => Some(10),
        "?" => Some(2),
        _ => None,
    }
}

/// A significant token plus whether a line break preceded it.
#[derive(Debug, Clone, Copy)]
struct Lexeme {
    token: Token,
    newline_before: bool,
}

struct Builder<'a> {
    text: &'a str,
    lexemes: Vec<Lexeme>,
    pos: usize,
    nodes: Vec<Node>,
    /// Newline significance per open bracket: true for `{`, false for `(`/`[`.
    /// Empty at top level, where newlines are significant.
    contexts: Vec<bool>,
    nesting: usize,
}

impl<'a> Builder<'a> {
    fn new(text: &'a str, tokens: &[Token]) -> Self {
        let mut lexemes = Vec::with_capacity(tokens.len() / 2 + 1);
        let mut newline_before = false;
        for &token in tokens {
            if token.end() > text.len() {
                break;
            }
            match token.kind {
                TokenKind::Newline => newline_before = true,
                TokenKind::Whitespace | TokenKind::Comment | TokenKind::EndOfStream => {}
                _ => {
                    lexemes.push(Lexeme {
                        token,
                        newline_before,
                    });
                    newline_before = false;
                }
            }
        }
        lexemes.push(Lexeme {
            token: Token::new(TokenKind::EndOfStream, text.len(), 0),
            newline_before,
        });

        Self {
            text,
            lexemes,
            pos: 0,
            nodes: Vec::new(),
            contexts: Vec::new(),
            nesting: 0,
        }
    }

    fn run(mut self) -> Ast {
        let statements = self.statements(None);
        let root = self.alloc(
            NodeKind::Program,
            TextRange::new(0, self.text.len()),
            statements,
        );
        Ast {
            nodes: self.nodes,
            root,
        }
    }

    // ------------------------------------------------------------------
    // Cursor helpers
    // ------------------------------------------------------------------

    fn peek(&self) -> Lexeme {
        self.lexemes[self.pos]
    }

    fn peek_nth(&self, n: usize) -> Lexeme {
        self.lexemes[(self.pos + n).min(self.lexemes.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().token.kind
    }

    /// Consume the current token. The end-of-stream sentinel is never consumed.
    fn bump(&mut self) -> Token {
        let token = self.lexemes[self.pos].token;
        if token.kind != TokenKind::EndOfStream {
            self.pos += 1;
        }
        token
    }

    fn last_end(&self) -> usize {
        match self.pos {
            0 => 0,
            pos => self.lexemes[pos - 1].token.end(),
        }
    }

    fn token_text(&self, token: Token) -> &'a str {
        token.text(self.text)
    }

    fn is_operator(&self, lexeme: Lexeme, op: &str) -> bool {
        lexeme.token.kind == TokenKind::Operator && self.token_text(lexeme.token) == op
    }

    fn is_keyword(&self, lexeme: Lexeme, keyword: &str) -> bool {
        lexeme.token.kind == TokenKind::Keyword && self.token_text(lexeme.token) == keyword
    }

    fn newline_significant(&self) -> bool {
        self.contexts.last().copied().unwrap_or(true)
    }

    // ------------------------------------------------------------------
    // Node allocation
    // ------------------------------------------------------------------

    fn alloc(&mut self, kind: NodeKind, range: TextRange, children: Vec<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        for child in &children {
            self.nodes[child.0].parent = Some(id);
        }
        self.nodes.push(Node {
            kind,
            range,
            parent: None,
            children,
            separators: Vec::new(),
        });
        id
    }

    fn leaf(&mut self, kind: NodeKind, token: Token) -> NodeId {
        self.alloc(kind, token_range(token), Vec::new())
    }

    fn range(&self, id: NodeId) -> TextRange {
        self.nodes[id.0].range
    }

    /// Append `child` to `parent`, widening the parent's range to cover it.
    fn adopt(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child.0].parent = Some(parent);
        let end = self.nodes[child.0].range.end;
        let node = &mut self.nodes[parent.0];
        node.children.push(child);
        node.range.end = node.range.end.max(end);
    }

    /// Node spanning from `start` to the end of the last consumed token, or an
    /// open error to end of input when `closed` is false.
    fn finish(
        &mut self,
        kind: NodeKind,
        start: usize,
        closed: bool,
        children: Vec<NodeId>,
    ) -> NodeId {
        if closed {
            let last_child_end = children.last().map_or(start, |&child| self.range(child).end);
            let end = self.last_end().max(last_child_end).max(start);
            self.alloc(kind, TextRange::new(start, end), children)
        } else {
            self.alloc(
                NodeKind::Error { open: true },
                TextRange::new(start, self.text.len()),
                children,
            )
        }
    }

    // ------------------------------------------------------------------
    // Statements and recovery
    // ------------------------------------------------------------------

    /// Statements up to `closer` (not consumed) or end of input.
    fn statements(&mut self, closer: Option<TokenKind>) -> Vec<NodeId> {
        let mut statements = Vec::new();
        loop {
            let next = self.peek();
            let kind = next.token.kind;
            if kind == TokenKind::EndOfStream || Some(kind) == closer {
                break;
            }
            if self.is_operator(next, ";") {
                self.bump();
                continue;
            }
            if kind.is_closer() {
                let stray = self.bump();
                statements.push(self.leaf(NodeKind::Error { open: false }, stray));
                continue;
            }

            match self.expression(0) {
                Some(expression) => {
                    let range = self.range(expression);
                    statements.push(self.alloc(
                        NodeKind::ExpressionStatement,
                        range,
                        vec![expression],
                    ));
                    let after = self.peek();
                    let terminated = after.token.kind == TokenKind::EndOfStream
                        || after.newline_before
                        || self.is_operator(after, ";")
                        || Some(after.token.kind) == closer;
                    if !terminated {
                        statements.push(self.recover_statement(closer));
                    }
                }
                None => statements.push(self.recover_statement(closer)),
            }
        }
        statements
    }

    /// Skip to the end of the current statement: a line break, `;` or the
    /// enclosing closer at bracket depth zero.
    fn recover_statement(&mut self, closer: Option<TokenKind>) -> NodeId {
        let first = self.bump();
        let mut depth = usize::from(first.kind.is_opener());
        let mut end = first.end();
        loop {
            let next = self.peek();
            let kind = next.token.kind;
            if kind == TokenKind::EndOfStream {
                break;
            }
            if depth == 0
                && (next.newline_before || self.is_operator(next, ";") || Some(kind) == closer)
            {
                break;
            }
            if kind.is_opener() {
                depth += 1;
            } else if kind.is_closer() && depth > 0 {
                depth -= 1;
            }
            end = self.bump().end();
        }
        self.error_node(first.start, end, depth > 0)
    }

    /// Skip to the next token in `stops` at bracket depth zero. Consumes at
    /// least one token.
    fn skip_to(&mut self, stops: &[TokenKind]) -> NodeId {
        let first = self.bump();
        let mut depth = usize::from(first.kind.is_opener());
        let mut end = first.end();
        loop {
            let kind = self.peek_kind();
            if kind == TokenKind::EndOfStream || (depth == 0 && stops.contains(&kind)) {
                break;
            }
            if kind.is_opener() {
                depth += 1;
            } else if kind.is_closer() && depth > 0 {
                depth -= 1;
            }
            end = self.bump().end();
        }
        self.error_node(first.start, end, depth > 0)
    }

    fn error_node(&mut self, start: usize, end: usize, open: bool) -> NodeId {
        let end = if open { self.text.len() } else { end };
        self.alloc(NodeKind::Error { open }, TextRange::new(start, end), Vec::new())
    }

    /// Consume `closer`, folding any unexpected tokens before it into `Error`
    /// children. Returns false if end of input came first.
    fn expect_closer(&mut self, closer: TokenKind, children: &mut Vec<NodeId>) -> bool {
        loop {
            match self.peek_kind() {
                kind if kind == closer => {
                    self.bump();
                    return true;
                }
                TokenKind::EndOfStream => return false,
                _ => children.push(self.skip_to(&[closer])),
            }
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn expression(&mut self, min_bp: u8) -> Option<NodeId> {
        if self.nesting >= MAX_NESTING {
            return self.bail_out();
        }
        self.nesting += 1;
        let result = self.expression_inner(min_bp);
        self.nesting -= 1;
        result
    }

    fn bail_out(&mut self) -> Option<NodeId> {
        let first = self.peek().token;
        if first.kind == TokenKind::EndOfStream {
            return None;
        }
        log::trace!("nesting limit reached at offset {}", first.start);
        while self.peek_kind() != TokenKind::EndOfStream {
            self.bump();
        }
        Some(self.error_node(first.start, self.text.len(), true))
    }

    fn expression_inner(&mut self, min_bp: u8) -> Option<NodeId> {
        let mut lhs = self.prefix()?;
        loop {
            let next = self.peek();
            if next.newline_before && self.newline_significant() {
                break;
            }
            match next.token.kind {
                TokenKind::OpenParen if POSTFIX_BP >= min_bp => {
                    let list = self.argument_list(TokenKind::CloseParen);
                    let range = self.range(lhs).cover(self.range(list));
                    lhs = self.alloc(NodeKind::CallExpression, range, vec![lhs, list]);
                }
                TokenKind::OpenBracket if POSTFIX_BP >= min_bp => {
                    lhs = self.index(lhs);
                }
                TokenKind::Operator => {
                    let Some((left_bp, right_bp)) =
                        infix_binding_power(self.token_text(next.token))
                    else {
                        break;
                    };
                    if left_bp < min_bp {
                        break;
                    }
                    let op = self.bump();
                    let rhs = self.expression(right_bp);
                    let start = self.range(lhs).start;
                    let end = rhs.map_or(op.end(), |rhs| self.range(rhs).end);
                    let mut children = vec![lhs];
                    children.extend(rhs);
                    lhs = self.alloc(
                        NodeKind::BinaryExpression {
                            operator: token_range(op),
                        },
                        TextRange::new(start, end),
                        children,
                    );
                }
                _ => break,
            }
        }
        Some(lhs)
    }

    fn prefix(&mut self) -> Option<NodeId> {
        let token = self.peek().token;
        match token.kind {
            TokenKind::Identifier => {
                self.bump();
                Some(self.leaf(NodeKind::Identifier, token))
            }
            TokenKind::Number | TokenKind::String => {
                self.bump();
                Some(self.leaf(NodeKind::Literal, token))
            }
            TokenKind::Keyword => match self.token_text(token) {
                "function" => Some(self.function_definition()),
                "if" => Some(self.if_expression()),
                "for" => Some(self.for_loop()),
                "while" => Some(self.while_loop()),
                "repeat" => Some(self.repeat_loop()),
                "else" | "in" => None,
                "next" | "break" => {
                    self.bump();
                    Some(self.leaf(NodeKind::Identifier, token))
                }
                _ => {
                    self.bump();
                    Some(self.leaf(NodeKind::Literal, token))
                }
            },
            TokenKind::OpenParen => Some(self.parenthesized()),
            TokenKind::OpenBrace => Some(self.block()),
            TokenKind::Operator => {
                let op = self.token_text(token);
                if op == "\\" {
                    return Some(self.function_definition());
                }
                let bp = prefix_binding_power(op)?;
                self.bump();
                let operand = self.expression(bp);
                let end = operand.map_or(token.end(), |operand| self.range(operand).end);
                Some(self.alloc(
                    NodeKind::UnaryExpression {
                        operator: token_range(token),
                    },
                    TextRange::new(token.start, end),
                    operand.into_iter().collect(),
                ))
            }
            _ => None,
        }
    }

    fn parenthesized(&mut self) -> NodeId {
        let open = self.bump();
        self.contexts.push(false);
        let mut children: Vec<NodeId> = self.expression(0).into_iter().collect();
        let closed = self.expect_closer(TokenKind::CloseParen, &mut children);
        self.contexts.pop();
        self.finish(NodeKind::Parenthesized, open.start, closed, children)
    }

    fn block(&mut self) -> NodeId {
        let open = self.bump();
        self.contexts.push(true);
        let children = self.statements(Some(TokenKind::CloseBrace));
        self.contexts.pop();
        let closed = self.peek_kind() == TokenKind::CloseBrace;
        if closed {
            self.bump();
        }
        self.finish(NodeKind::Block, open.start, closed, children)
    }

    /// `function(formals) body` or `\(formals) body`.
    fn function_definition(&mut self) -> NodeId {
        let keyword = self.bump();
        let mut children = Vec::new();
        if self.peek_kind() == TokenKind::OpenParen {
            let formals = self.argument_list(TokenKind::CloseParen);
            children.push(formals);
            if matches!(self.nodes[formals.0].kind, NodeKind::ArgumentList { closed: true }) {
                children.extend(self.expression(BODY_BP));
            }
        }
        let end = children
            .last()
            .map_or(keyword.end(), |&last| self.range(last).end);
        self.alloc(
            NodeKind::FunctionDefinition,
            TextRange::new(keyword.start, end),
            children,
        )
    }

    /// Parenthesized condition of `if`/`while`. Returns false if end of input
    /// was reached before `)`.
    fn condition(&mut self, children: &mut Vec<NodeId>) -> bool {
        if self.peek_kind() != TokenKind::OpenParen {
            return true;
        }
        self.bump();
        self.contexts.push(false);
        children.extend(self.expression(0));
        let closed = self.expect_closer(TokenKind::CloseParen, children);
        self.contexts.pop();
        closed
    }

    fn if_expression(&mut self) -> NodeId {
        let keyword = self.bump();
        let mut children = Vec::new();
        if !self.condition(&mut children) {
            return self.finish(NodeKind::IfExpression, keyword.start, false, children);
        }
        if let Some(consequence) = self.expression(BODY_BP) {
            children.push(consequence);
            // At top level a line break ends the `if`; inside brackets `else`
            // may start the next line.
            let next = self.peek();
            if self.is_keyword(next, "else") && (!next.newline_before || !self.contexts.is_empty())
            {
                self.bump();
                children.extend(self.expression(BODY_BP));
            }
        }
        self.finish(NodeKind::IfExpression, keyword.start, true, children)
    }

    fn for_loop(&mut self) -> NodeId {
        let keyword = self.bump();
        let mut children = Vec::new();
        if self.peek_kind() == TokenKind::OpenParen {
            self.bump();
            self.contexts.push(false);
            if self.peek_kind() == TokenKind::Identifier {
                let variable = self.bump();
                children.push(self.leaf(NodeKind::Identifier, variable));
            }
            if self.is_keyword(self.peek(), "in") {
                self.bump();
            }
            children.extend(self.expression(0));
            let closed = self.expect_closer(TokenKind::CloseParen, &mut children);
            self.contexts.pop();
            if !closed {
                return self.finish(NodeKind::LoopExpression, keyword.start, false, children);
            }
            children.extend(self.expression(BODY_BP));
        }
        self.finish(NodeKind::LoopExpression, keyword.start, true, children)
    }

    fn while_loop(&mut self) -> NodeId {
        let keyword = self.bump();
        let mut children = Vec::new();
        if !self.condition(&mut children) {
            return self.finish(NodeKind::LoopExpression, keyword.start, false, children);
        }
        children.extend(self.expression(BODY_BP));
        self.finish(NodeKind::LoopExpression, keyword.start, true, children)
    }

    fn repeat_loop(&mut self) -> NodeId {
        let keyword = self.bump();
        let children: Vec<NodeId> = self.expression(BODY_BP).into_iter().collect();
        self.finish(NodeKind::LoopExpression, keyword.start, true, children)
    }

    /// `x[i]` or `x[[i]]`.
    fn index(&mut self, object: NodeId) -> NodeId {
        let open = self.peek().token;
        let second = self.peek_nth(1).token;
        let double = second.kind == TokenKind::OpenBracket && second.start == open.end();
        if double {
            self.bump();
        }
        let list = self.argument_list(TokenKind::CloseBracket);
        let closed = matches!(self.nodes[list.0].kind, NodeKind::ArgumentList { closed: true });
        if double && closed {
            let next = self.peek().token;
            if next.kind == TokenKind::CloseBracket && next.start == self.last_end() {
                self.bump();
            }
        }
        let start = self.range(object).start;
        let end = if closed {
            self.last_end()
        } else {
            self.text.len()
        };
        self.alloc(
            NodeKind::IndexExpression { double },
            TextRange::new(start, end),
            vec![object, list],
        )
    }

    /// Bracketed, comma-separated arguments. The opener is the current token.
    fn argument_list(&mut self, closer: TokenKind) -> NodeId {
        let open = self.bump();
        self.contexts.push(false);

        let mut arguments: Vec<NodeId> = Vec::new();
        let mut separators = Vec::new();
        let mut slot_start = open.end();
        let mut slot_filled = false;

        let closed = loop {
            let kind = self.peek_kind();
            if kind == closer {
                self.bump();
                break true;
            }
            if kind == TokenKind::EndOfStream {
                break false;
            }
            if kind == TokenKind::Comma {
                let comma = self.bump();
                if !slot_filled {
                    // `f(a,,b)`: R passes the empty slot as a missing argument.
                    let empty = self.alloc(
                        NodeKind::Argument { named: false },
                        TextRange::new(slot_start, comma.start),
                        Vec::new(),
                    );
                    arguments.push(empty);
                }
                separators.push(comma.start);
                slot_start = comma.end();
                slot_filled = false;
                continue;
            }

            match arguments.last().copied() {
                Some(current) if slot_filled => {
                    let error = self.skip_to(&[TokenKind::Comma, closer]);
                    self.adopt(current, error);
                }
                _ => {
                    let argument = match self.argument() {
                        Some(argument) => argument,
                        None => {
                            let error = self.skip_to(&[TokenKind::Comma, closer]);
                            let range = self.range(error);
                            self.alloc(NodeKind::Argument { named: false }, range, vec![error])
                        }
                    };
                    arguments.push(argument);
                    slot_filled = true;
                }
            }
        };
        self.contexts.pop();

        let end = if closed {
            self.last_end()
        } else {
            self.text.len()
        };
        let list = self.alloc(
            NodeKind::ArgumentList { closed },
            TextRange::new(open.start, end),
            arguments,
        );
        self.nodes[list.0].separators = separators;
        list
    }

    /// `name = value`, `name =`, or a positional value.
    fn argument(&mut self) -> Option<NodeId> {
        let next = self.peek();
        let nameable = matches!(
            next.token.kind,
            TokenKind::Identifier | TokenKind::String
        ) || self.is_keyword(next, "NULL");

        if nameable && self.is_operator(self.peek_nth(1), "=") {
            let name_token = self.bump();
            let name_kind = if name_token.kind == TokenKind::Identifier {
                NodeKind::Identifier
            } else {
                NodeKind::Literal
            };
            let name = self.leaf(name_kind, name_token);
            let equals = self.bump();
            let value = self.expression(ARG_BP);
            let end = value.map_or(equals.end(), |value| self.range(value).end);
            let mut children = vec![name];
            children.extend(value);
            return Some(self.alloc(
                NodeKind::Argument { named: true },
                TextRange::new(name_token.start, end),
                children,
            ));
        }

        let value = self.expression(ARG_BP)?;
        let range = self.range(value);
        Some(self.alloc(NodeKind::Argument { named: false }, range, vec![value]))
    }
}

fn token_range(token: Token) -> TextRange {
    TextRange::new(token.start, token.end())
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn r_fragment() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-z]{1,3}",
            "[0-9]{1,2}",
            Just("function".to_string()),
            Just("if".to_string()),
            Just("else".to_string()),
            Just("for".to_string()),
            Just("in".to_string()),
            Just("\"s\"".to_string()),
            Just("\n".to_string()),
            Just(" ".to_string()),
            Just("<-".to_string()),
            Just("=".to_string()),
            Just("::".to_string()),
            Just("[[".to_string()),
            "[-+*/^<>!&|~?:$@;,(){}\\[\\]\\\\%]",
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(512))]

        /// Every tree is total and well-nested, whatever the input.
        #[test]
        fn prop_tree_structure_holds(parts in prop::collection::vec(r_fragment(), 0..40)) {
            let text = parts.concat();
            let ast = parse(&text);
            prop_assert!(
                ast.check_structure(text.len()).is_ok(),
                "{:?}\n{}",
                ast.check_structure(text.len()),
                ast.dump(&text)
            );
        }

        /// Argument lists record one separator per top-level comma and never
        /// more arguments than slots.
        #[test]
        fn prop_argument_slots(args in prop::collection::vec("[a-z]{0,2}", 1..8)) {
            let text = format!("f({})", args.join(","));
            let ast = parse(&text);
            let call = ast.iter().find(|&id| ast.kind(id) == NodeKind::CallExpression).unwrap();
            let (_, list) = ast.call_parts(call).unwrap();
            prop_assert_eq!(ast.node(list).separators.len(), args.len() - 1);
            prop_assert!(ast.arguments(list).len() <= args.len());
        }
    }
}
