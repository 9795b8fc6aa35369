//
// ast.rs
//
// Arena-allocated syntax tree for R source. Nodes refer to each other by
// index; parent links are plain indices used only for upward traversal.
//

use std::fmt;

/// Index of a node within its [`Ast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Half-open byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextRange {
    pub start: usize,
    pub end: usize,
}

impl TextRange {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "inverted range {start}..{end}");
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains_range(&self, other: TextRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn cover(self, other: TextRange) -> TextRange {
        TextRange::new(self.start.min(other.start), self.end.max(other.end))
    }
}

impl fmt::Display for TextRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Node variants.
///
/// Child layout per variant:
/// - `Program`, `Block`: statements (`ExpressionStatement` or `Error`)
/// - `ExpressionStatement`, `Parenthesized`: one expression
/// - `CallExpression`, `IndexExpression`: callee/object, then `ArgumentList`
/// - `ArgumentList`: `Argument`s
/// - `Argument`: named => `[name, value?]`, positional => `[value?]`, plus an
///   optional trailing `Error` from recovery
/// - `BinaryExpression`: `[lhs, rhs?]`; `UnaryExpression`: `[operand?]`
/// - `FunctionDefinition`: `[formals: ArgumentList?, body?]`
/// - `IfExpression`: `[condition?, consequence?, alternative?]`
/// - `LoopExpression`: `for` => `[variable?, sequence?, body?]`,
///   `while` => `[condition?, body?]`, `repeat` => `[body?]`
/// - `Error`: whatever was parsed before recovery gave up (may be empty)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Program,
    ExpressionStatement,
    CallExpression,
    /// `closed` is false when end of input was reached before the closer.
    ArgumentList { closed: bool },
    Argument { named: bool },
    Identifier,
    Literal,
    BinaryExpression { operator: TextRange },
    UnaryExpression { operator: TextRange },
    Block,
    FunctionDefinition,
    IndexExpression { double: bool },
    Parenthesized,
    IfExpression,
    LoopExpression,
    /// A recovered syntax failure. `open` marks an unmatched opener that
    /// consumed everything up to end of input.
    Error { open: bool },
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub range: TextRange,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Start offsets of top-level commas. Only populated for `ArgumentList`.
    pub separators: Vec<usize>,
}

/// An immutable syntax tree. Built by [`crate::ast_builder::build`].
#[derive(Debug, Clone)]
pub struct Ast {
    pub(crate) nodes: Vec<Node>,
    pub(crate) root: NodeId,
}

impl Ast {
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.nodes[id.0].kind
    }

    pub fn range(&self, id: NodeId) -> TextRange {
        self.nodes[id.0].range
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn text<'a>(&self, id: NodeId, source: &'a str) -> &'a str {
        let range = self.range(id);
        source.get(range.start..range.end).unwrap_or("")
    }

    /// Proper ancestors of `id`, innermost first.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |&current| self.parent(current))
    }

    /// `id` and all nodes below it, in pre-order.
    pub fn descendants(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut stack = vec![id];
        std::iter::from_fn(move || {
            let next = stack.pop()?;
            stack.extend(self.children(next).iter().rev());
            Some(next)
        })
    }

    /// All nodes in pre-order from the root.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.descendants(self.root)
    }

    pub fn errors(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.iter()
            .filter(move |&id| matches!(self.kind(id), NodeKind::Error { .. }))
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    /// `(callee, argument list)` of a call or index expression.
    pub fn call_parts(&self, id: NodeId) -> Option<(NodeId, NodeId)> {
        match self.kind(id) {
            NodeKind::CallExpression | NodeKind::IndexExpression { .. } => {
                let children = self.children(id);
                match children {
                    [callee, list, ..]
                        if matches!(self.kind(*list), NodeKind::ArgumentList { .. }) =>
                    {
                        Some((*callee, *list))
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Name a call's callee refers to: `f`, `` `f` ``, `"f"` or `pkg::f`.
    /// Returns `None` for computed callees like `f()()` or `x$f()`.
    pub fn callee_name(&self, call: NodeId, source: &str) -> Option<String> {
        let (callee, _) = self.call_parts(call)?;
        match self.kind(callee) {
            NodeKind::Identifier | NodeKind::Literal => {
                Some(unquote(self.text(callee, source)).to_string())
            }
            NodeKind::BinaryExpression { operator } => {
                let op = source.get(operator.start..operator.end)?;
                if op != "::" && op != ":::" {
                    return None;
                }
                match self.children(callee) {
                    [pkg, fun]
                        if self.kind(*pkg) == NodeKind::Identifier
                            && matches!(self.kind(*fun), NodeKind::Identifier | NodeKind::Literal) =>
                    {
                        Some(format!(
                            "{}{}{}",
                            unquote(self.text(*pkg, source)),
                            op,
                            unquote(self.text(*fun, source))
                        ))
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    pub fn arguments(&self, list: NodeId) -> &[NodeId] {
        match self.kind(list) {
            NodeKind::ArgumentList { .. } => self.children(list),
            _ => &[],
        }
    }

    /// Tag of a named argument with surrounding quotes or backticks removed.
    pub fn argument_name<'a>(&self, argument: NodeId, source: &'a str) -> Option<&'a str> {
        match self.kind(argument) {
            NodeKind::Argument { named: true } => self
                .children(argument)
                .first()
                .map(|&name| unquote(self.text(name, source))),
            _ => None,
        }
    }

    /// The value expression of an argument, if one was written.
    pub fn argument_value(&self, argument: NodeId) -> Option<NodeId> {
        let children = self.children(argument);
        let value = match self.kind(argument) {
            NodeKind::Argument { named: true } => children.get(1),
            NodeKind::Argument { named: false } => children.first(),
            _ => None,
        }?;
        match self.kind(*value) {
            NodeKind::Error { .. } => None,
            _ => Some(*value),
        }
    }

    /// Innermost node whose range contains `offset` (end-inclusive).
    pub fn node_at(&self, offset: usize) -> NodeId {
        let mut current = self.root;
        'descend: loop {
            for &child in self.children(current) {
                let range = self.range(child);
                if range.start <= offset && offset <= range.end {
                    current = child;
                    continue 'descend;
                }
            }
            return current;
        }
    }

    /// Check the structural invariants: parent links agree with child lists,
    /// children nest inside their parent, siblings are ordered and disjoint,
    /// and the root spans `[0, source_len)`.
    pub fn check_structure(&self, source_len: usize) -> Result<(), String> {
        let root = self.range(self.root);
        if root != TextRange::new(0, source_len) {
            return Err(format!("root covers {root}, expected 0..{source_len}"));
        }
        if self.parent(self.root).is_some() {
            return Err("root has a parent".to_string());
        }
        let mut seen = 0;
        for id in self.iter() {
            seen += 1;
            let range = self.range(id);
            let mut previous_end = range.start;
            for &child in self.children(id) {
                if self.parent(child) != Some(id) {
                    return Err(format!("node {child:?} has wrong parent"));
                }
                let child_range = self.range(child);
                if !range.contains_range(child_range) {
                    return Err(format!(
                        "{:?} {child_range} escapes parent {:?} {range}",
                        self.kind(child),
                        self.kind(id)
                    ));
                }
                if child_range.start < previous_end {
                    return Err(format!(
                        "{:?} {child_range} overlaps previous sibling ending at {previous_end}",
                        self.kind(child)
                    ));
                }
                previous_end = child_range.end;
            }
        }
        if seen != self.nodes.len() {
            return Err(format!(
                "{} nodes unreachable from root",
                self.nodes.len() - seen
            ));
        }
        Ok(())
    }

    /// Indented outline of the tree, one node per line.
    pub fn dump(&self, source: &str) -> String {
        let mut out = String::new();
        for id in self.iter() {
            let depth = self.ancestors(id).count();
            let node = self.node(id);
            out.push_str(&"  ".repeat(depth));
            out.push_str(&format!("{:?} {}", node.kind, node.range));
            if node.children.is_empty() && !node.range.is_empty() {
                out.push_str(&format!(" {:?}", self.text(id, source)));
            }
            out.push('\n');
        }
        out
    }
}

/// Strip one layer of matching `"`, `'` or backtick quotes.
pub fn unquote(name: &str) -> &str {
    for quote in ['`', '"', '\''] {
        if let Some(inner) = name.strip_prefix(quote) {
            return inner.strip_suffix(quote).unwrap_or(inner);
        }
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("`my var`"), "my var");
        assert_eq!(unquote("\"x\""), "x");
        assert_eq!(unquote("'x'"), "x");
        assert_eq!(unquote("`open"), "open");
        assert_eq!(unquote("plain"), "plain");
    }

    #[test]
    fn test_text_range() {
        let outer = TextRange::new(2, 10);
        assert!(outer.contains_range(TextRange::new(2, 10)));
        assert!(outer.contains_range(TextRange::new(5, 5)));
        assert!(!outer.contains_range(TextRange::new(1, 4)));
        assert_eq!(outer.len(), 8);
        assert_eq!(
            TextRange::new(4, 6).cover(TextRange::new(1, 5)),
            TextRange::new(1, 6)
        );
    }

    #[test]
    fn test_check_structure_rejects_overlap() {
        let ast = Ast {
            nodes: vec![
                Node {
                    kind: NodeKind::Identifier,
                    range: TextRange::new(0, 3),
                    parent: Some(NodeId(2)),
                    children: vec![],
                    separators: vec![],
                },
                Node {
                    kind: NodeKind::Identifier,
                    range: TextRange::new(2, 4),
                    parent: Some(NodeId(2)),
                    children: vec![],
                    separators: vec![],
                },
                Node {
                    kind: NodeKind::Program,
                    range: TextRange::new(0, 4),
                    parent: None,
                    children: vec![NodeId(0), NodeId(1)],
                    separators: vec![],
                },
            ],
            root: NodeId(2),
        };
        assert!(ast.check_structure(4).is_err());
    }
}
