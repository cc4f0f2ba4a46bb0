//! Document serializer: ordered elements in, one `document` message out.
//!
//! Elements are consumed head-first. Atoms convert to zero or more nodes
//! appended to the current container. A shell partitions the remaining
//! elements into those it contains and those after it, converts to exactly one
//! environment, takes its contents recursively, and gets finalized before
//! being appended. Every produced node gets a fresh correlation ID.
//!
//! Node-local failures never abort the run. A failing atom or a malformed
//! shell is reported through a deferred message tagged with a fresh ID, and
//! serialization continues with its siblings. The same holds for content that
//! would push the tree past [`lc::MAX_DEPTH`] levels.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::correlation::{CorrelationId, CorrelationTable, Origin, RunContext};
use crate::element::DocumentElement;
use crate::error::{NotationError, NotationResult, SerializeError, SerializeResult};
use crate::feedback::FeedbackItem;
use crate::lc::{self, Node};
use crate::message::Message;
use crate::putdown;

/// Wire encoding for serialized documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Json,
    #[default]
    Putdown,
}

impl Encoding {
    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Json => "json",
            Encoding::Putdown => "putdown",
        }
    }

    /// Write a tree in this encoding.
    pub fn encode(self, root: &Node) -> SerializeResult<String> {
        match self {
            Encoding::Json => serde_json::to_string(root).map_err(|e| SerializeError::Encode {
                encoding: self.as_str().into(),
                message: e.to_string(),
            }),
            Encoding::Putdown => Ok(putdown::write(root)?),
        }
    }
}

impl FromStr for Encoding {
    type Err = SerializeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Encoding::Json),
            "putdown" => Ok(Encoding::Putdown),
            other => Err(SerializeError::UnsupportedEncoding {
                encoding: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything one serialization run produces.
#[derive(Debug, Clone)]
pub struct SerializedDocument {
    /// The `document` message for the worker.
    pub message: Message,
    /// This run's context, its table populated.
    pub context: RunContext,
    /// Node-local diagnostics to deliver after the document message.
    pub deferred: Vec<Message>,
    /// The tree that was encoded.
    pub root: Node,
}

/// Serialize `elements` (in source order) into a `document` message.
///
/// `context` is consumed and returned populated; its table must be empty.
pub fn serialize<E: DocumentElement>(
    elements: &[E],
    encoding: Encoding,
    mut context: RunContext,
) -> SerializeResult<SerializedDocument> {
    let _span = tracing::info_span!("serialize", run = %context.run).entered();

    let mut builder = Builder {
        elements,
        table: &mut context.table,
        deferred: Vec::new(),
    };

    let mut root = Node::environment([]);
    root.id = Some(builder.table.assign(Origin::Document));
    let all: Vec<usize> = (0..elements.len()).collect();
    builder.fill(&mut root, &all, 1);

    let deferred = builder.deferred;
    let code = encoding.encode(&root)?;
    tracing::info!(
        elements = elements.len(),
        nodes = root.size(),
        ids = context.table.len(),
        deferred = deferred.len(),
        %encoding,
        "document serialized"
    );

    Ok(SerializedDocument {
        message: Message::document(encoding.as_str(), code),
        context,
        deferred,
        root,
    })
}

struct Builder<'a, E> {
    elements: &'a [E],
    table: &'a mut CorrelationTable,
    deferred: Vec<Message>,
}

impl<E: DocumentElement> Builder<'_, E> {
    /// Append the nodes for `list` (indices into `elements`) to `container`,
    /// which sits `level` levels below the top of the tree (the root is 1).
    fn fill(&mut self, container: &mut Node, list: &[usize], level: usize) {
        let elements = self.elements;
        let mut rest = list.to_vec();
        let mut start = 0;

        while let Some(&head) = rest.get(start) {
            let element = &elements[head];
            if !element.is_container() {
                self.leaf(container, head, level);
                start += 1;
                continue;
            }

            let (inner, after): (Vec<usize>, Vec<usize>) = rest[start + 1..]
                .iter()
                .partition(|&&i| element.contains(&elements[i]));
            if let Some(node) = self.shell(head, &inner, level) {
                container.push_child(node);
            }
            rest = after;
            start = 0;
        }
    }

    fn leaf(&mut self, container: &mut Node, index: usize, level: usize) {
        let elements = self.elements;
        let element = &elements[index];
        match element.to_nodes().and_then(|nodes| fits_below(nodes, level)) {
            Ok(nodes) => {
                for mut node in nodes {
                    node.id = Some(self.table.assign(Origin::Element(index)));
                    if let Some((language, source)) = element.notation() {
                        node.set_attribute(lc::NOTATION, Value::from(source));
                        node.set_attribute(lc::LANGUAGE, Value::from(language));
                    }
                    container.push_child(node);
                }
            }
            Err(e) => {
                let id = self.placeholder(index);
                tracing::debug!(%id, element = index, error = %e, "atom failed to convert");
                self.deferred.push(Message::feedback(
                    Some(id),
                    Some(id),
                    vec![FeedbackItem::parse_error(e.to_string())],
                ));
            }
        }
    }

    fn shell(&mut self, index: usize, inner: &[usize], level: usize) -> Option<Node> {
        let elements = self.elements;
        let element = &elements[index];
        let converted = element.to_nodes().and_then(|nodes| fits_below(nodes, level));
        let mut node = match single_node(converted) {
            Ok(node) => node,
            Err(text) => {
                let id = self.placeholder(index);
                tracing::debug!(%id, element = index, skipped = inner.len(), "{text}");
                let mut extra = Map::new();
                extra.insert("id".into(), Value::from(id.get()));
                self.deferred.push(Message::error(text, extra));
                return None;
            }
        };

        node.id = Some(self.table.assign(Origin::Element(index)));
        self.fill(&mut node, inner, level + 1);
        element.finalize(&mut node);
        Some(node)
    }

    /// A fresh ID standing in for an element that produced no node.
    fn placeholder(&mut self, index: usize) -> CorrelationId {
        self.table.assign(Origin::Element(index))
    }
}

/// Refuse nodes that would end up deeper than [`lc::MAX_DEPTH`] once appended
/// to a container at `level`.
fn fits_below(nodes: Vec<Node>, level: usize) -> NotationResult<Vec<Node>> {
    let deepest = nodes.iter().map(Node::depth).max().unwrap_or(0);
    if level + deepest > lc::MAX_DEPTH {
        return Err(NotationError::TooDeep {
            offset: 0,
            limit: lc::MAX_DEPTH,
        });
    }
    Ok(nodes)
}

fn single_node(converted: NotationResult<Vec<Node>>) -> Result<Node, String> {
    match converted {
        Ok(mut nodes) if nodes.len() == 1 => Ok(nodes.remove(0)),
        Ok(nodes) => Err(format!(
            "container must convert to exactly one node, got {}",
            nodes.len()
        )),
        Err(e) => Err(format!("container failed to convert: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Element, Language, ShellKind, Span};
    use crate::error::NotationError;
    use crate::message::Payload;

    fn infix(start: usize, end: usize, src: &str) -> Element {
        Element::expression(Span::new(start, end), Language::Infix, src)
    }

    fn shell(start: usize, end: usize, kind: ShellKind) -> Element {
        Element::shell(Span::new(start, end), kind)
    }

    #[test]
    fn unknown_encoding_fails_fast() {
        let err = "xml".parse::<Encoding>().unwrap_err();
        assert!(matches!(err, SerializeError::UnsupportedEncoding { encoding } if encoding == "xml"));
    }

    #[test]
    fn empty_document_is_an_identified_root() {
        let doc = serialize::<Element>(&[], Encoding::Json, RunContext::first()).unwrap();
        assert!(doc.root.is_environment());
        assert!(doc.root.children.is_empty());
        assert_eq!(doc.root.id.map(|id| id.get()), Some(1));
        assert_eq!(doc.context.table.len(), 1);
        assert!(doc.message.is("document"));
        assert_eq!(doc.message.get_str("encoding"), Some("json"));
    }

    #[test]
    fn nesting_follows_containment() {
        let elements = vec![
            shell(0, 20, ShellKind::Theorem),
            infix(1, 5, "x = 1"),
            shell(6, 15, ShellKind::Proof),
            infix(7, 10, "y = 2"),
            infix(21, 25, "z = 3"),
        ];
        let doc = serialize(&elements, Encoding::Putdown, RunContext::first()).unwrap();
        let root = &doc.root;
        assert_eq!(root.children.len(), 2);
        let theorem = &root.children[0];
        assert_eq!(theorem.attribute(lc::ROLE), Some(&Value::from("theorem")));
        assert_eq!(theorem.children.len(), 2);
        assert_eq!(theorem.children[1].children.len(), 1);
        assert_eq!(root.children[1].attribute(lc::NOTATION), Some(&Value::from("z = 3")));
    }

    #[test]
    fn every_id_resolves_to_its_element() {
        let elements = vec![
            shell(0, 20, ShellKind::Environment),
            infix(1, 5, "a, b"),
            infix(21, 25, "c"),
        ];
        let doc = serialize(&elements, Encoding::Json, RunContext::first()).unwrap();
        let ids = doc.root.ids();
        assert_eq!(ids.len(), 5);
        assert_eq!(doc.context.table.get(ids[0]), Some(Origin::Document));
        assert_eq!(doc.context.table.get(ids[1]), Some(Origin::Element(0)));
        assert_eq!(doc.context.table.ids_for(1), vec![ids[2], ids[3]]);
        assert_eq!(doc.context.table.get(ids[4]), Some(Origin::Element(2)));
    }

    #[test]
    fn parse_errors_defer_feedback_and_continue() {
        let elements = vec![infix(0, 3, "2 +"), infix(4, 8, "2+2=4")];
        let doc = serialize(&elements, Encoding::Putdown, RunContext::first()).unwrap();
        assert_eq!(doc.root.children.len(), 1);
        assert_eq!(doc.deferred.len(), 1);

        let bad_id = doc.context.table.ids_for(0);
        assert_eq!(bad_id.len(), 1);
        match doc.deferred[0].payload().unwrap() {
            Payload::Feedback { id, results, .. } => {
                assert_eq!(id, Some(bad_id[0]));
                assert_eq!(results[0].reason.as_deref(), Some("parse error"));
            }
            other => panic!("expected feedback, got {other:?}"),
        }
        assert!(doc.root.find(bad_id[0]).is_none());
    }

    struct Broken {
        span: Span,
        yields: usize,
    }

    impl DocumentElement for Broken {
        fn span(&self) -> Span {
            self.span
        }
        fn is_container(&self) -> bool {
            true
        }
        fn to_nodes(&self) -> NotationResult<Vec<Node>> {
            if self.yields == usize::MAX {
                return Err(NotationError::Empty);
            }
            Ok((0..self.yields).map(|_| Node::environment([])).collect())
        }
        fn is_given(&self) -> bool {
            false
        }
    }

    #[test]
    fn malformed_container_abandons_only_its_subtree() {
        let elements = vec![
            Broken { span: Span::new(0, 10), yields: 2 },
            Broken { span: Span::new(2, 5), yields: 1 },
            Broken { span: Span::new(11, 20), yields: 1 },
            Broken { span: Span::new(21, 30), yields: usize::MAX },
        ];
        let doc = serialize(&elements, Encoding::Json, RunContext::first()).unwrap();
        assert_eq!(doc.root.children.len(), 1);
        assert!(doc.context.table.ids_for(1).is_empty());
        assert_eq!(doc.deferred.len(), 2);
        for msg in &doc.deferred {
            assert!(msg.is("error"));
            assert!(msg.get("id").is_some());
        }
    }

    #[test]
    fn runaway_brackets_become_a_parse_error() {
        let deep = format!("{}x{}", "(".repeat(200_000), ")".repeat(200_000));
        let elements = vec![infix(0, 3, "1+1"), infix(4, 8, &deep), infix(9, 12, "P")];
        let doc = serialize(&elements, Encoding::Putdown, RunContext::first()).unwrap();
        assert_eq!(doc.root.children.len(), 2);
        assert_eq!(doc.deferred.len(), 1);
        match doc.deferred[0].payload().unwrap() {
            Payload::Feedback { results, .. } => {
                assert_eq!(results[0].reason.as_deref(), Some("parse error"));
            }
            other => panic!("expected feedback, got {other:?}"),
        }
    }

    #[test]
    fn shells_nested_past_the_limit_are_reported_not_recursed() {
        let depth = lc::MAX_DEPTH + 50;
        let mut elements: Vec<Element> = (0..depth)
            .map(|i| shell(i, 2 * depth - i, ShellKind::Environment))
            .collect();
        elements.push(infix(depth, depth, "x"));
        let doc = serialize(&elements, Encoding::Putdown, RunContext::first()).unwrap();
        assert!(doc.root.depth() <= lc::MAX_DEPTH);
        assert_eq!(doc.deferred.len(), 1);
        assert!(doc.deferred[0].is("error"));
        assert!(doc.deferred[0].get("id").is_some());
    }

    #[test]
    fn leaves_that_overflow_their_container_are_reported() {
        let depth = lc::MAX_DEPTH - 2;
        let mut elements: Vec<Element> = (0..depth)
            .map(|i| shell(i, 2 * depth + 10 - i, ShellKind::Environment))
            .collect();
        elements.push(infix(depth, depth + 1, "x"));
        elements.push(infix(depth + 2, depth + 3, "f(y)"));
        let doc = serialize(&elements, Encoding::Putdown, RunContext::first()).unwrap();
        assert_eq!(doc.root.depth(), lc::MAX_DEPTH);
        assert_eq!(doc.deferred.len(), 1);
        match doc.deferred[0].payload().unwrap() {
            Payload::Feedback { id: Some(id), .. } => {
                assert_eq!(doc.context.table.get(id), Some(Origin::Element(depth + 1)));
            }
            other => panic!("expected feedback, got {other:?}"),
        }
    }

    #[test]
    fn encodings_agree_on_the_tree() {
        let elements = vec![shell(0, 9, ShellKind::Rule), infix(1, 8, "P => Q")];
        let json = serialize(&elements, Encoding::Json, RunContext::first()).unwrap();
        let text = serialize(&elements, Encoding::Putdown, RunContext::first()).unwrap();
        let code = text.message.get_str("code").unwrap();
        assert_eq!(putdown::parse_one(code).unwrap(), json.root);
        let from_json: Node =
            serde_json::from_str(json.message.get_str("code").unwrap()).unwrap();
        assert_eq!(from_json, json.root);
    }
}
