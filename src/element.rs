//! Document elements: the atoms and shells the serializer walks.
//!
//! [`DocumentElement`] is the seam to whatever hosts the document. Elements
//! are compared by [`Span`] containment, convert themselves to tree nodes,
//! and containers get a finalize hook once their contents are in place.
//!
//! [`Element`] is the built-in closed set of element kinds: expression atoms
//! written in putdown or infix notation, and shells of a fixed set of kinds.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{NotationResult, SerializeError, SerializeResult};
use crate::infix;
use crate::lc::{self, Node};
use crate::putdown;

/// Half-open byte range an element occupies in the source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// True when `other` lies inside this span and is not the same span.
    pub fn contains(&self, other: &Span) -> bool {
        self != other && self.start <= other.start && other.end <= self.end
    }

    fn shifted(self, by: usize) -> SerializeResult<Self> {
        match (self.start.checked_add(by), self.end.checked_add(by)) {
            (Some(start), Some(end)) => Ok(Self::new(start, end)),
            _ => Err(SerializeError::SpanOverflow {
                start: self.start,
                end: self.end,
                shift: by,
            }),
        }
    }
}

/// What the serializer needs from a document element.
pub trait DocumentElement {
    /// Position in the source document.
    fn span(&self) -> Span;

    /// Shells are containers; atoms are leaves.
    fn is_container(&self) -> bool;

    /// Convert this element to tree nodes. Leaves may yield any number of
    /// nodes; containers must yield exactly one.
    fn to_nodes(&self) -> NotationResult<Vec<Node>>;

    /// Adjust a container's node once its children are in place.
    fn finalize(&self, _node: &mut Node) {}

    /// Whether this element is an assumption rather than a claim.
    fn is_given(&self) -> bool;

    /// The `(language, source)` an atom was written in, if any.
    fn notation(&self) -> Option<(&str, &str)> {
        None
    }

    /// DOM-style containment: `other` is nested inside `self`.
    fn contains(&self, other: &Self) -> bool
    where
        Self: Sized,
    {
        self.span().contains(&other.span())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Putdown,
    #[default]
    Infix,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Putdown => "putdown",
            Language::Infix => "infix",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellKind {
    #[default]
    Environment,
    Proof,
    Theorem,
    Rule,
    Declaration,
}

impl ShellKind {
    fn role(self) -> Option<&'static str> {
        match self {
            ShellKind::Environment => None,
            ShellKind::Proof => Some("proof"),
            ShellKind::Theorem => Some("theorem"),
            ShellKind::Rule => Some("rule"),
            ShellKind::Declaration => Some("declaration"),
        }
    }

    /// Rules and declarations are always assumptions.
    fn forces_given(self) -> bool {
        matches!(self, ShellKind::Rule | ShellKind::Declaration)
    }
}

/// The built-in element kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Element {
    /// An atom holding one piece of meaning.
    Expression {
        span: Span,
        #[serde(default)]
        language: Language,
        source: String,
        #[serde(default)]
        given: bool,
    },
    /// A container grouping other elements.
    Shell {
        span: Span,
        #[serde(default)]
        shell: ShellKind,
        #[serde(default)]
        given: bool,
    },
}

impl Element {
    pub fn expression(span: Span, language: Language, source: impl Into<String>) -> Self {
        Element::Expression {
            span,
            language,
            source: source.into(),
            given: false,
        }
    }

    pub fn shell(span: Span, shell: ShellKind) -> Self {
        Element::Shell {
            span,
            shell,
            given: false,
        }
    }

    pub fn into_given(mut self) -> Self {
        match &mut self {
            Element::Expression { given, .. } | Element::Shell { given, .. } => *given = true,
        }
        self
    }

    fn with_span(mut self, new_span: Span) -> Self {
        match &mut self {
            Element::Expression { span, .. } | Element::Shell { span, .. } => *span = new_span,
        }
        self
    }
}

impl DocumentElement for Element {
    fn span(&self) -> Span {
        match self {
            Element::Expression { span, .. } | Element::Shell { span, .. } => *span,
        }
    }

    fn is_container(&self) -> bool {
        matches!(self, Element::Shell { .. })
    }

    fn to_nodes(&self) -> NotationResult<Vec<Node>> {
        match self {
            Element::Expression {
                language,
                source,
                given,
                ..
            } => {
                let mut nodes = match language {
                    Language::Putdown => putdown::parse(source)?,
                    Language::Infix => infix::parse(source)?,
                };
                for node in &mut nodes {
                    node.given |= *given;
                }
                Ok(nodes)
            }
            Element::Shell { .. } => Ok(vec![Node::environment([])]),
        }
    }

    fn finalize(&self, node: &mut Node) {
        if let Element::Shell { shell, given, .. } = self {
            if let Some(role) = shell.role() {
                node.set_attribute(lc::ROLE, Value::from(role));
            }
            node.given |= *given || shell.forces_given();
        }
    }

    fn is_given(&self) -> bool {
        match self {
            Element::Expression { given, .. } => *given,
            Element::Shell { shell, given, .. } => *given || shell.forces_given(),
        }
    }

    fn notation(&self) -> Option<(&str, &str)> {
        match self {
            Element::Expression {
                language, source, ..
            } => Some((language.as_str(), source.as_str())),
            Element::Shell { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Document descriptions
// ---------------------------------------------------------------------------

/// A document as handed over by the host: an optional header region that is
/// logically prepended, then the body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentDescription {
    #[serde(default)]
    pub header: Vec<Element>,
    #[serde(default)]
    pub body: Vec<Element>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DocumentFile {
    Full(DocumentDescription),
    Body(Vec<Element>),
}

impl DocumentDescription {
    /// Parse a description from JSON: either `{"header": [...], "body": [...]}`
    /// or a bare array of body elements.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        Ok(match serde_json::from_str::<DocumentFile>(text)? {
            DocumentFile::Full(doc) => doc,
            DocumentFile::Body(body) => Self {
                header: Vec::new(),
                body,
            },
        })
    }

    pub fn load(path: &Path) -> SerializeResult<Self> {
        let read_err = |message: String| SerializeError::DocumentRead {
            path: path.display().to_string(),
            message,
        };
        let text = std::fs::read_to_string(path).map_err(|e| read_err(e.to_string()))?;
        Self::from_json(&text).map_err(|e| read_err(e.to_string()))
    }

    /// All elements in source order, header first.
    ///
    /// Body spans are shifted strictly past the header so that no body
    /// element, not even an empty one at offset 0, can be mistaken for a
    /// header element's descendant or ancestor.
    pub fn ordered_elements(&self) -> SerializeResult<Vec<Element>> {
        let shift = match self.header.iter().map(|e| e.span().end).max() {
            Some(end) => end.checked_add(1).ok_or(SerializeError::SpanOverflow {
                start: 0,
                end: 0,
                shift: end,
            })?,
            None => 0,
        };
        let mut header = self.header.clone();
        let mut body = self
            .body
            .iter()
            .map(|e| Ok(e.clone().with_span(e.span().shifted(shift)?)))
            .collect::<SerializeResult<Vec<Element>>>()?;
        sort_in_source_order(&mut header);
        sort_in_source_order(&mut body);
        header.extend(body);
        Ok(header)
    }
}

/// Order by start; an enclosing element precedes what it contains.
fn sort_in_source_order(elements: &mut [Element]) {
    elements.sort_by_key(|e| {
        let span = e.span();
        (span.start, std::cmp::Reverse(span.end))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn containment_is_strict() {
        let outer = Span::new(0, 10);
        assert!(outer.contains(&Span::new(2, 5)));
        assert!(outer.contains(&Span::new(0, 4)));
        assert!(!outer.contains(&outer));
        assert!(!outer.contains(&Span::new(8, 12)));
    }

    #[test]
    fn infix_atom_converts_and_marks_givens() {
        let atom = Element::expression(Span::new(0, 5), Language::Infix, "x = 1").into_given();
        let nodes = atom.to_nodes().unwrap();
        assert_eq!(nodes.len(), 1);
        assert!(nodes[0].given);
        assert_eq!(atom.notation(), Some(("infix", "x = 1")));
    }

    #[test]
    fn rule_finalize_sets_role_and_given() {
        let rule = Element::shell(Span::new(0, 20), ShellKind::Rule);
        let mut node = rule.to_nodes().unwrap().remove(0);
        rule.finalize(&mut node);
        assert!(node.given);
        assert_eq!(node.attribute(lc::ROLE), Some(&json!("rule")));
        assert!(rule.is_given());
    }

    #[test]
    fn plain_environment_finalize_is_inert() {
        let env = Element::shell(Span::new(0, 20), ShellKind::Environment);
        let mut node = env.to_nodes().unwrap().remove(0);
        env.finalize(&mut node);
        assert!(!node.given);
        assert!(node.attributes.is_empty());
    }

    #[test]
    fn description_parses_both_shapes() {
        let bare = r#"[{"kind": "expression", "span": {"start": 0, "end": 3}, "source": "2+2=4"}]"#;
        let doc = DocumentDescription::from_json(bare).unwrap();
        assert_eq!(doc.body.len(), 1);

        let full = json!({
            "header": [{"kind": "shell", "shell": "rule", "span": {"start": 0, "end": 9}}],
            "body": [{"kind": "expression", "language": "putdown", "span": {"start": 0, "end": 3}, "source": "P"}]
        });
        let doc = DocumentDescription::from_json(&full.to_string()).unwrap();
        let ordered = doc.ordered_elements().unwrap();
        assert_eq!(ordered.len(), 2);
        assert!(ordered[0].is_container());
        assert!(!ordered[0].contains(&ordered[1]));
        assert_eq!(ordered[1].span(), Span::new(10, 13));
    }

    #[test]
    fn empty_body_element_stays_outside_the_header() {
        let doc = DocumentDescription {
            header: vec![Element::shell(Span::new(0, 9), ShellKind::Rule)],
            body: vec![Element::expression(Span::new(0, 0), Language::Infix, "P")],
        };
        let ordered = doc.ordered_elements().unwrap();
        assert!(!ordered[0].contains(&ordered[1]));
        assert_eq!(ordered[1].span(), Span::new(10, 10));
    }

    #[test]
    fn spans_too_large_to_shift_are_rejected() {
        let doc = DocumentDescription {
            header: vec![Element::shell(Span::new(0, 9), ShellKind::Rule)],
            body: vec![Element::expression(
                Span::new(usize::MAX - 3, usize::MAX),
                Language::Infix,
                "P",
            )],
        };
        assert!(matches!(
            doc.ordered_elements(),
            Err(SerializeError::SpanOverflow { shift: 10, .. })
        ));

        let header_at_the_end = DocumentDescription {
            header: vec![Element::shell(Span::new(0, usize::MAX), ShellKind::Rule)],
            body: Vec::new(),
        };
        assert!(header_at_the_end.ordered_elements().is_err());
    }

    #[test]
    fn ordering_puts_containers_first() {
        let doc = DocumentDescription {
            header: Vec::new(),
            body: vec![
                Element::expression(Span::new(2, 4), Language::Infix, "x"),
                Element::shell(Span::new(0, 10), ShellKind::Proof),
            ],
        };
        let ordered = doc.ordered_elements().unwrap();
        assert!(ordered[0].is_container());
    }
}
