//! Logic-concept trees: the document as it crosses the thread boundary.
//!
//! A [`Node`] is a symbol, an application of a head to arguments, or an
//! environment that groups other nodes. Environments mirror the nesting of
//! containers in the source document. Nodes carry an optional correlation ID,
//! a given flag, and free-form attributes that the engine reads and writes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::correlation::CorrelationId;

/// Scope errors attached by the engine: `{"redeclared": [...], "undeclared": [...]}`.
pub const SCOPE_ERRORS: &str = "scope errors";
/// Primary propositional validation result attached by the engine.
pub const VALIDATION_RESULT: &str = "validation result";
/// Other validators' results, keyed by validator name.
pub const VALIDATION_RESULTS: &str = "validation results";
/// Source text an atom was converted from.
pub const NOTATION: &str = "notation";
/// Language the notation is written in.
pub const LANGUAGE: &str = "language";
/// Structural role set by a container's finalize hook.
pub const ROLE: &str = "role";

/// Deepest tree, counted in node levels, that may cross the thread boundary.
///
/// Parsers, the serializer and the worker's decoder all refuse anything
/// deeper, so every recursive walk over a document stays shallow.
pub const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Symbol,
    Application,
    Environment,
}

/// One node of a serialized document tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CorrelationId>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub given: bool,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Node {
    fn with_kind(kind: NodeKind, text: String, children: Vec<Node>) -> Self {
        Self {
            kind,
            text,
            children,
            id: None,
            given: false,
            attributes: Map::new(),
        }
    }

    pub fn symbol(text: impl Into<String>) -> Self {
        Self::with_kind(NodeKind::Symbol, text.into(), Vec::new())
    }

    /// Apply `head` to `args`; the head is stored as the first child.
    pub fn application(head: Node, args: impl IntoIterator<Item = Node>) -> Self {
        let mut children = vec![head];
        children.extend(args);
        Self::with_kind(NodeKind::Application, String::new(), children)
    }

    pub fn environment(children: impl IntoIterator<Item = Node>) -> Self {
        Self::with_kind(NodeKind::Environment, String::new(), children.into_iter().collect())
    }

    pub fn is_environment(&self) -> bool {
        self.kind == NodeKind::Environment
    }

    pub fn as_given(mut self) -> Self {
        self.given = true;
        self
    }

    pub fn with_id(mut self, id: CorrelationId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: Value) {
        self.attributes.insert(key.into(), value);
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn push_child(&mut self, child: Node) {
        self.children.push(child);
    }

    /// Number of nodes in this subtree, including self.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(Node::size).sum::<usize>()
    }

    /// Number of node levels in this subtree; a lone node has depth 1.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(self, 1)];
        while let Some((node, level)) = stack.pop() {
            deepest = deepest.max(level);
            stack.extend(node.children.iter().map(|c| (c, level + 1)));
        }
        deepest
    }

    /// Visit this subtree in pre-order.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Node)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    /// Collect every correlation ID in this subtree, in pre-order.
    pub fn ids(&self) -> Vec<CorrelationId> {
        let mut ids = Vec::new();
        self.walk(&mut |node| ids.extend(node.id));
        ids
    }

    /// Find the first node in this subtree carrying `id`.
    pub fn find(&self, id: CorrelationId) -> Option<&Node> {
        if self.id == Some(id) {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    pub fn find_mut(&mut self, id: CorrelationId) -> Option<&mut Node> {
        if self.id == Some(id) {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_mut(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(raw: u64) -> CorrelationId {
        CorrelationId::new(raw).unwrap()
    }

    #[test]
    fn json_omits_empty_fields() {
        let node = Node::symbol("x");
        assert_eq!(
            serde_json::to_value(&node).unwrap(),
            json!({"kind": "symbol", "text": "x"})
        );
    }

    #[test]
    fn json_round_trip_keeps_ids_and_givens() {
        let tree = Node::environment([
            Node::symbol("P").as_given().with_id(id(2)),
            Node::application(Node::symbol("f"), [Node::symbol("x")]).with_id(id(3)),
        ])
        .with_id(id(1));
        let json = serde_json::to_string(&tree).unwrap();
        let back: Node = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tree);
        assert_eq!(back.ids(), vec![id(1), id(2), id(3)]);
    }

    #[test]
    fn find_locates_nested_nodes() {
        let mut tree = Node::environment([Node::environment([Node::symbol("y").with_id(id(5))])]);
        assert_eq!(tree.find(id(5)).map(|n| n.text.as_str()), Some("y"));
        tree.find_mut(id(5))
            .unwrap()
            .set_attribute(VALIDATION_RESULT, json!({"result": "valid"}));
        assert!(tree.find(id(5)).unwrap().attribute(VALIDATION_RESULT).is_some());
        assert_eq!(tree.size(), 3);
        assert_eq!(tree.depth(), 3);
    }

    #[test]
    fn depth_of_a_long_chain() {
        let mut chain = Node::symbol("x");
        for _ in 0..999 {
            chain = Node::application(Node::symbol("f"), [chain]);
        }
        assert_eq!(chain.depth(), 1000);
        assert_eq!(Node::symbol("y").depth(), 1);
    }
}
