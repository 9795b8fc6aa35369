//
// tokenizer.rs
//
// Context-free R tokenizer producing classified, gap-free token spans,
// plus incremental re-lexing of an edited range.
//

use std::iter::FusedIterator;

/// Classification of a lexical unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Identifier,
    Keyword,
    Number,
    String,
    Operator,
    OpenParen,
    CloseParen,
    OpenBrace,
    CloseBrace,
    OpenBracket,
    CloseBracket,
    Comma,
    Comment,
    Whitespace,
    /// A single `\n` or `\r\n`. R statements are newline-terminated, so line
    /// breaks are kept apart from other whitespace.
    Newline,
    /// Catch-all for characters that start no valid token.
    Unknown,
    /// Zero-length sentinel emitted once after the covered range.
    EndOfStream,
}

impl TokenKind {
    /// Whitespace, newlines and comments.
    pub fn is_trivia(self) -> bool {
        matches!(
            self,
            TokenKind::Whitespace | TokenKind::Newline | TokenKind::Comment
        )
    }

    pub fn is_opener(self) -> bool {
        matches!(
            self,
            TokenKind::OpenParen | TokenKind::OpenBrace | TokenKind::OpenBracket
        )
    }

    pub fn is_closer(self) -> bool {
        matches!(
            self,
            TokenKind::CloseParen | TokenKind::CloseBrace | TokenKind::CloseBracket
        )
    }
}

/// A classified span of source text. Offsets are byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub length: usize,
}

impl Token {
    pub fn new(kind: TokenKind, start: usize, length: usize) -> Self {
        Self {
            kind,
            start,
            length,
        }
    }

    pub fn end(&self) -> usize {
        self.start + self.length
    }

    /// Source text covered by this token, or `""` if the token lies outside `text`.
    pub fn text<'a>(&self, text: &'a str) -> &'a str {
        text.get(self.start..self.end()).unwrap_or("")
    }

    fn shifted(self, delta: isize) -> Self {
        Self {
            start: (self.start as isize + delta) as usize,
            ..self
        }
    }
}

/// R reserved words. These are classified as [`TokenKind::Keyword`].
pub const KEYWORDS: &[&str] = &[
    "if",
    "else",
    "repeat",
    "while",
    "function",
    "for",
    "in",
    "next",
    "break",
    "TRUE",
    "FALSE",
    "NULL",
    "Inf",
    "NaN",
    "NA",
    "NA_integer_",
    "NA_real_",
    "NA_complex_",
    "NA_character_",
];

pub fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

/// Multi-character operators first so that matching is longest-first.
const OPERATORS: &[&str] = &[
    "<<-", "->>", ":::", "<-", "->", "|>", "::", "<=", ">=", "==", "!=", "&&", "||", "**", "+",
    "-", "*", "/", "^", "<", ">", "!", "&", "|", "~", "?", ":", "$", "@", "=", ";", "\\",
];

/// Tokenize `text[start..start + length]`.
///
/// The returned iterator is lazy and finite: it yields tokens covering the
/// range exactly, followed by a single [`TokenKind::EndOfStream`] token.
/// Out-of-range bounds are clamped; malformed input degrades to
/// [`TokenKind::Unknown`] tokens or to strings/comments running to the end of
/// the range, never to a failure.
pub fn tokenize(text: &str, start: usize, length: usize) -> Tokenizer<'_> {
    Tokenizer::new(text, start, length)
}

/// Tokenize the whole of `text`, including the trailing end-of-stream token.
pub fn tokenize_all(text: &str) -> Vec<Token> {
    tokenize(text, 0, text.len()).collect()
}

/// Lazy tokenizer over a sub-range of a source string.
#[derive(Debug, Clone)]
pub struct Tokenizer<'a> {
    text: &'a str,
    pos: usize,
    end: usize,
    depth: i32,
    finished: bool,
}

impl<'a> Tokenizer<'a> {
    pub fn new(text: &'a str, start: usize, length: usize) -> Self {
        let end = floor_char_boundary(text, start.saturating_add(length).min(text.len()));
        let pos = floor_char_boundary(text, start.min(end));
        Self {
            text,
            pos,
            end,
            depth: 0,
            finished: false,
        }
    }

    /// Restart lexing at `offset` (clamped to the covered range).
    pub fn restart(&mut self, offset: usize) {
        self.pos = floor_char_boundary(self.text, offset.min(self.end));
        self.depth = 0;
        self.finished = false;
    }

    /// Current byte position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Running bracket nesting depth. Informational only: balance is not
    /// validated here, so the value may go negative on stray closers.
    pub fn depth(&self) -> i32 {
        self.depth
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..self.end]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn bump_while(&mut self, predicate: impl Fn(char) -> bool) {
        while self.peek().is_some_and(&predicate) {
            self.bump();
        }
    }

    fn next_token(&mut self) -> Token {
        let start = self.pos;
        let kind = self.lex_kind();
        debug_assert!(self.pos > start, "tokenizer must always make progress");
        Token::new(kind, start, self.pos - start)
    }

    fn lex_kind(&mut self) -> TokenKind {
        let Some(c) = self.peek() else {
            return TokenKind::EndOfStream;
        };

        match c {
            '\n' => {
                self.bump();
                TokenKind::Newline
            }
            '\r' => {
                self.bump();
                if self.peek() == Some('\n') {
                    self.bump();
                    TokenKind::Newline
                } else {
                    self.bump_while(is_inline_whitespace);
                    TokenKind::Whitespace
                }
            }
            c if is_inline_whitespace(c) => {
                self.bump_while(is_inline_whitespace);
                TokenKind::Whitespace
            }
            '#' => {
                self.bump_while(|c| c != '\n' && c != '\r');
                TokenKind::Comment
            }
            '"' | '\'' => {
                self.bump();
                self.lex_quoted(c);
                TokenKind::String
            }
            '`' => {
                self.bump();
                self.lex_quoted('`');
                TokenKind::Identifier
            }
            'r' | 'R' if self.lex_raw_string() => TokenKind::String,
            c if c.is_ascii_digit() => {
                self.bump();
                self.lex_number(c);
                TokenKind::Number
            }
            '.' if self.peek_nth(1).is_some_and(|c| c.is_ascii_digit()) => {
                self.bump();
                self.lex_number('.');
                TokenKind::Number
            }
            c if is_identifier_start(c) => {
                let start = self.pos;
                self.bump();
                self.bump_while(is_identifier_continue);
                if is_keyword(&self.text[start..self.pos]) {
                    TokenKind::Keyword
                } else {
                    TokenKind::Identifier
                }
            }
            '(' | '{' | '[' => {
                self.bump();
                self.depth += 1;
                match c {
                    '(' => TokenKind::OpenParen,
                    '{' => TokenKind::OpenBrace,
                    _ => TokenKind::OpenBracket,
                }
            }
            ')' | '}' | ']' => {
                self.bump();
                self.depth -= 1;
                match c {
                    ')' => TokenKind::CloseParen,
                    '}' => TokenKind::CloseBrace,
                    _ => TokenKind::CloseBracket,
                }
            }
            ',' => {
                self.bump();
                TokenKind::Comma
            }
            '%' => self.lex_special_operator(),
            _ => {
                let rest = self.rest();
                if let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) {
                    self.pos += op.len();
                    TokenKind::Operator
                } else {
                    self.bump();
                    TokenKind::Unknown
                }
            }
        }
    }

    /// Consume the body of a quoted string or name; the opening quote has
    /// already been consumed. Unterminated input runs to the end of the range.
    fn lex_quoted(&mut self, quote: char) {
        while let Some(c) = self.bump() {
            if c == '\\' {
                self.bump();
            } else if c == quote {
                return;
            }
        }
    }

    /// `r"(...)"`, `R'[...]'`, `r"---{...}---"`. Returns false, consuming
    /// nothing, when the text at the cursor is not a raw string opener.
    fn lex_raw_string(&mut self) -> bool {
        let rest = self.rest().as_bytes();
        if rest.len() < 3 || !matches!(rest[1], b'"' | b'\'') {
            return false;
        }
        let quote = rest[1];
        let mut i = 2;
        while rest.get(i) == Some(&b'-') {
            i += 1;
        }
        let dashes = i - 2;
        let close = match rest.get(i) {
            Some(b'(') => b')',
            Some(b'[') => b']',
            Some(b'{') => b'}',
            _ => return false,
        };
        i += 1;

        let mut terminator = Vec::with_capacity(dashes + 2);
        terminator.push(close);
        terminator.extend(std::iter::repeat(b'-').take(dashes));
        terminator.push(quote);

        let body = &rest[i..];
        self.pos = match body
            .windows(terminator.len())
            .position(|window| window == terminator.as_slice())
        {
            Some(found) => self.pos + i + found + terminator.len(),
            None => self.end,
        };
        true
    }

    /// The first character has already been consumed.
    fn lex_number(&mut self, first: char) {
        if first == '0' && matches!(self.peek(), Some('x' | 'X')) {
            self.bump();
            self.bump_while(|c| c.is_ascii_hexdigit());
            if matches!(self.peek(), Some('p' | 'P')) {
                self.bump();
                if matches!(self.peek(), Some('+' | '-')) {
                    self.bump();
                }
                self.bump_while(|c| c.is_ascii_digit());
            }
        } else {
            self.bump_while(|c| c.is_ascii_digit());
            if first != '.' && self.peek() == Some('.') {
                self.bump();
                self.bump_while(|c| c.is_ascii_digit());
            }
            if matches!(self.peek(), Some('e' | 'E')) {
                let signed = matches!(self.peek_nth(1), Some('+' | '-'));
                let digit_at = if signed { 2 } else { 1 };
                if self.peek_nth(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                    if signed {
                        self.bump();
                    }
                    self.bump_while(|c| c.is_ascii_digit());
                }
            }
        }
        if matches!(self.peek(), Some('L' | 'i')) {
            self.bump();
        }
    }

    /// `%in%`, `%>%`, `%%` and friends. A `%` with no closing `%` on the same
    /// line is a lone unknown character.
    fn lex_special_operator(&mut self) -> TokenKind {
        let rest = self.rest();
        match rest[1..].find(['%', '\n']) {
            Some(i) if rest[1 + i..].starts_with('%') => {
                self.pos += i + 2;
                TokenKind::Operator
            }
            _ => {
                self.bump();
                TokenKind::Unknown
            }
        }
    }
}

impl Iterator for Tokenizer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.finished {
            return None;
        }
        if self.pos >= self.end {
            self.finished = true;
            return Some(Token::new(TokenKind::EndOfStream, self.end, 0));
        }
        Some(self.next_token())
    }
}

impl FusedIterator for Tokenizer<'_> {}

fn is_inline_whitespace(c: char) -> bool {
    c != '\n' && c != '\r' && c.is_whitespace()
}

fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '.' || c == '_'
}

fn is_identifier_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '.' || c == '_'
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

// ============================================================================
// Incremental re-lex
// ============================================================================

/// A changed region, mapping `base[start..old_end]` onto `current[start..new_end]`.
///
/// Successive edits fold into one conservative range via [`DirtyRange::merge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyRange {
    pub start: usize,
    pub old_end: usize,
    pub new_end: usize,
}

impl DirtyRange {
    /// Range for a single edit replacing `old_len` bytes at `start` with `new_len` bytes.
    pub fn from_edit(start: usize, old_len: usize, new_len: usize) -> Self {
        Self {
            start,
            old_end: start + old_len,
            new_end: start + new_len,
        }
    }

    /// Byte length change between base and current text.
    pub fn delta(&self) -> isize {
        self.new_end as isize - self.old_end as isize
    }

    /// Fold a further edit, expressed in current-text coordinates, into this range.
    pub fn merge(self, start: usize, old_len: usize, new_len: usize) -> Self {
        let edit_old_end = start + old_len;
        let edit_new_end = start + new_len;

        let old_end = if edit_old_end > self.new_end {
            edit_old_end - self.new_end + self.old_end
        } else {
            self.old_end
        };

        let mapped_new_end = if self.new_end <= start {
            self.new_end
        } else if self.new_end >= edit_old_end {
            self.new_end - old_len + new_len
        } else {
            edit_new_end
        };

        Self {
            start: self.start.min(start),
            old_end,
            new_end: mapped_new_end.max(edit_new_end),
        }
    }
}

/// Re-tokenize `text` after the edit described by `dirty`, reusing `previous`
/// (the token sequence of the pre-edit text) outside the affected lines.
///
/// Lexing restarts at the first token of the line containing the edit and
/// stops as soon as a token boundary past the edit lines up with a boundary
/// of the previous sequence; the remainder is spliced in shifted. The result
/// equals `tokenize_all(text)`. Inconsistent inputs fall back to a full
/// tokenize.
pub fn relex(previous: &[Token], text: &str, dirty: DirtyRange) -> Vec<Token> {
    let previous = match previous.last() {
        Some(last) if last.kind == TokenKind::EndOfStream => &previous[..previous.len() - 1],
        _ => previous,
    };

    let delta = dirty.delta();
    let previous_len = previous.last().map_or(0, Token::end);
    let consistent = dirty.start <= dirty.old_end
        && dirty.start <= dirty.new_end
        && dirty.new_end <= text.len()
        && dirty.old_end <= previous_len
        && previous_len as isize + delta == text.len() as isize;
    if !consistent {
        log::trace!(
            "relex: inconsistent dirty range {:?} (previous len {}, text len {}), full tokenize",
            dirty,
            previous_len,
            text.len()
        );
        return tokenize_all(text);
    }

    // Tokens never look past a line break, so the start of the edited line
    // is a boundary shared by the old and new token sequences.
    let before = previous.partition_point(|t| t.end() <= dirty.start);
    let restart_index = previous[..before]
        .iter()
        .rposition(|t| t.kind == TokenKind::Newline)
        .map_or(0, |i| i + 1);
    let restart_offset = if restart_index == 0 {
        0
    } else {
        previous[restart_index - 1].end()
    };

    let mut tokens: Vec<Token> = previous[..restart_index].to_vec();
    for token in tokenize(text, restart_offset, text.len() - restart_offset) {
        if token.kind == TokenKind::EndOfStream {
            tokens.push(token);
            return tokens;
        }
        if token.start >= dirty.new_end {
            let old_start = (token.start as isize - delta) as usize;
            if let Ok(index) = previous.binary_search_by_key(&old_start, |t| t.start) {
                tokens.extend(previous[index..].iter().map(|t| t.shifted(delta)));
                tokens.push(Token::new(TokenKind::EndOfStream, text.len(), 0));
                return tokens;
            }
        }
        tokens.push(token);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<TokenKind> {
        tokenize_all(text).into_iter().map(|t| t.kind).collect()
    }

    fn significant(text: &str) -> Vec<(TokenKind, &str)> {
        tokenize_all(text)
            .into_iter()
            .filter(|t| !t.kind.is_trivia() && t.kind != TokenKind::EndOfStream)
            .map(|t| (t.kind, t.text(text)))
            .collect()
    }

    #[test]
    fn test_empty_text_yields_end_of_stream() {
        let tokens = tokenize_all("");
        assert_eq!(tokens, vec![Token::new(TokenKind::EndOfStream, 0, 0)]);
    }

    #[test]
    fn test_simple_call() {
        assert_eq!(
            significant("aov(formula, data = df)"),
            vec![
                (TokenKind::Identifier, "aov"),
                (TokenKind::OpenParen, "("),
                (TokenKind::Identifier, "formula"),
                (TokenKind::Comma, ","),
                (TokenKind::Identifier, "data"),
                (TokenKind::Operator, "="),
                (TokenKind::Identifier, "df"),
                (TokenKind::CloseParen, ")"),
            ]
        );
    }

    #[test]
    fn test_keywords_and_dotted_identifiers() {
        assert_eq!(
            significant("if (is.na(x)) NULL else ..."),
            vec![
                (TokenKind::Keyword, "if"),
                (TokenKind::OpenParen, "("),
                (TokenKind::Identifier, "is.na"),
                (TokenKind::OpenParen, "("),
                (TokenKind::Identifier, "x"),
                (TokenKind::CloseParen, ")"),
                (TokenKind::CloseParen, ")"),
                (TokenKind::Keyword, "NULL"),
                (TokenKind::Keyword, "else"),
                (TokenKind::Identifier, "..."),
            ]
        );
    }

    #[test]
    fn test_numbers() {
        let text = "1 2.5 .5 1e10 3e-2 0xFF 10L 2i 1e";
        let numbers: Vec<&str> = significant(text)
            .into_iter()
            .filter(|(k, _)| *k == TokenKind::Number)
            .map(|(_, s)| s)
            .collect();
        assert_eq!(
            numbers,
            vec!["1", "2.5", ".5", "1e10", "3e-2", "0xFF", "10L", "2i", "1"]
        );
    }

    #[test]
    fn test_operators_longest_match() {
        let ops: Vec<&str> = significant("a <<- b -> c |> d %in% e :: f <= g ** h")
            .into_iter()
            .filter(|(k, _)| *k == TokenKind::Operator)
            .map(|(_, s)| s)
            .collect();
        assert_eq!(ops, vec!["<<-", "->", "|>", "%in%", "::", "<=", "**"]);
    }

    #[test]
    fn test_string_with_escapes() {
        let text = r#"x <- "a \" b" + 'c'"#;
        let strings: Vec<&str> = significant(text)
            .into_iter()
            .filter(|(k, _)| *k == TokenKind::String)
            .map(|(_, s)| s)
            .collect();
        assert_eq!(strings, vec![r#""a \" b""#, "'c'"]);
    }

    #[test]
    fn test_unterminated_string_runs_to_end() {
        let text = "f(\"abc\n def";
        let tokens = tokenize_all(text);
        let string = tokens
            .iter()
            .find(|t| t.kind == TokenKind::String)
            .unwrap();
        assert_eq!(string.end(), text.len());
    }

    #[test]
    fn test_raw_strings() {
        let text = r#"r"(a "quoted" )" R"--[x]--" r"-(unterminated"#;
        let strings: Vec<&str> = significant(text)
            .into_iter()
            .filter(|(k, _)| *k == TokenKind::String)
            .map(|(_, s)| s)
            .collect();
        assert_eq!(
            strings,
            vec![r#"r"(a "quoted" )""#, r#"R"--[x]--""#, r#"r"-(unterminated"#]
        );
    }

    #[test]
    fn test_r_identifier_not_raw_string() {
        assert_eq!(
            significant("r + r\"x\""),
            vec![
                (TokenKind::Identifier, "r"),
                (TokenKind::Operator, "+"),
                (TokenKind::Identifier, "r"),
                (TokenKind::String, "\"x\""),
            ]
        );
    }

    #[test]
    fn test_backtick_names() {
        assert_eq!(
            significant("`my var` <- 1"),
            vec![
                (TokenKind::Identifier, "`my var`"),
                (TokenKind::Operator, "<-"),
                (TokenKind::Number, "1"),
            ]
        );
    }

    #[test]
    fn test_comments_and_newlines() {
        assert_eq!(
            kinds("x # note\r\ny"),
            vec![
                TokenKind::Identifier,
                TokenKind::Whitespace,
                TokenKind::Comment,
                TokenKind::Newline,
                TokenKind::Identifier,
                TokenKind::EndOfStream,
            ]
        );
    }

    #[test]
    fn test_lone_percent_is_unknown() {
        assert_eq!(
            significant("a % b\nc"),
            vec![
                (TokenKind::Identifier, "a"),
                (TokenKind::Unknown, "%"),
                (TokenKind::Identifier, "b"),
                (TokenKind::Identifier, "c"),
            ]
        );
    }

    #[test]
    fn test_sub_range_covers_exactly() {
        let text = "foo(bar, baz)";
        let tokens: Vec<Token> = tokenize(text, 4, 3).collect();
        assert_eq!(tokens[0], Token::new(TokenKind::Identifier, 4, 3));
        assert_eq!(tokens[1], Token::new(TokenKind::EndOfStream, 7, 0));
    }

    #[test]
    fn test_out_of_range_is_clamped() {
        let text = "abc";
        let tokens: Vec<Token> = tokenize(text, 10, 5).collect();
        assert_eq!(tokens, vec![Token::new(TokenKind::EndOfStream, 3, 0)]);
    }

    #[test]
    fn test_restart() {
        let text = "a + b";
        let mut lexer = tokenize(text, 0, text.len());
        let first = lexer.next().unwrap();
        assert_eq!(first.text(text), "a");
        lexer.restart(4);
        assert_eq!(lexer.next().unwrap().text(text), "b");
        assert_eq!(lexer.next().unwrap().kind, TokenKind::EndOfStream);
        assert_eq!(lexer.next(), None);
    }

    #[test]
    fn test_depth_counter_does_not_validate() {
        let mut lexer = tokenize("(()]]", 0, 5);
        for _ in lexer.by_ref() {}
        assert_eq!(lexer.depth(), -1);
    }

    #[test]
    fn test_multibyte_identifiers() {
        assert_eq!(
            significant("größe <- 1"),
            vec![
                (TokenKind::Identifier, "größe"),
                (TokenKind::Operator, "<-"),
                (TokenKind::Number, "1"),
            ]
        );
    }

    #[test]
    fn test_dirty_range_merge_adjacent_typing() {
        // "aov(" -> insert "a" at 4 -> insert "," at 5
        let dirty = DirtyRange::from_edit(4, 0, 1).merge(5, 0, 1);
        assert_eq!(
            dirty,
            DirtyRange {
                start: 4,
                old_end: 4,
                new_end: 6
            }
        );
    }

    #[test]
    fn test_dirty_range_merge_edit_before() {
        // replace [10, 12) with 5 bytes, then delete [0, 2)
        let dirty = DirtyRange::from_edit(10, 2, 5).merge(0, 2, 0);
        assert_eq!(
            dirty,
            DirtyRange {
                start: 0,
                old_end: 12,
                new_end: 13
            }
        );
        assert_eq!(dirty.delta(), 1);
    }

    #[test]
    fn test_relex_matches_full_tokenize() {
        let before = "x <- 1\nlegend(bty=1, lt=3)\ny <- 2\n";
        let previous = tokenize_all(before);
        // Rename `lt` to `lty`.
        let after = "x <- 1\nlegend(bty=1, lty=3)\ny <- 2\n";
        let dirty = DirtyRange::from_edit(23, 0, 1);
        assert_eq!(relex(&previous, after, dirty), tokenize_all(after));
    }

    #[test]
    fn test_relex_opening_string_retokenizes_rest() {
        let before = "a <- 1\nb <- 2\n";
        let previous = tokenize_all(before);
        let after = "a <- \"1\nb <- 2\n";
        let dirty = DirtyRange::from_edit(5, 0, 1);
        assert_eq!(relex(&previous, after, dirty), tokenize_all(after));
    }

    #[test]
    fn test_relex_inconsistent_range_falls_back() {
        let previous = tokenize_all("abc");
        let after = "abcdef";
        let dirty = DirtyRange::from_edit(0, 0, 1);
        assert_eq!(relex(&previous, after, dirty), tokenize_all(after));
    }
}
