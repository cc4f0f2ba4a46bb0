//! Putdown notation: a line-oriented text form of logic-concept trees.
//!
//! ```text
//! {
//!   :{ :(= x 1) +{"id":3} }
//!   (= (+ 2 2) 4) +{"id":4,"notation":"2+2=4"}
//! } +{"id":1}
//! ```
//!
//! - symbols are bare words, or JSON-quoted strings when they need escaping
//! - `(head arg ...)` is an application, `{ ... }` an environment
//! - a leading `:` marks a given
//! - `+{...}` after a node attaches a JSON object of attributes; the node's
//!   correlation ID travels as the `"id"` key, so no other attribute may
//!   use that name
//! - nesting is limited to [`MAX_DEPTH`] levels
//! - `//` starts a comment running to end of line

use serde_json::{Map, Value};

use crate::correlation::CorrelationId;
use crate::error::{NotationError, NotationResult};
use crate::lc::{MAX_DEPTH, Node, NodeKind};

const ID_KEY: &str = "id";

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Write a tree as putdown, one environment child per line.
///
/// Fails for trees the notation cannot carry back unchanged: an application
/// without a head, an attribute named `"id"`, or nesting beyond [`MAX_DEPTH`].
pub fn write(node: &Node) -> NotationResult<String> {
    if node.depth() > MAX_DEPTH {
        return Err(NotationError::TooDeep {
            offset: 0,
            limit: MAX_DEPTH,
        });
    }
    check_representable(node)?;
    let mut out = String::new();
    write_node(node, 0, &mut out);
    Ok(out)
}

fn check_representable(root: &Node) -> NotationResult<()> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.kind == NodeKind::Application && node.children.is_empty() {
            return Err(NotationError::Unrepresentable {
                reason: "an application needs at least a head".into(),
            });
        }
        if node.attributes.contains_key(ID_KEY) {
            return Err(NotationError::Unrepresentable {
                reason: format!("attribute {ID_KEY:?} collides with the correlation ID"),
            });
        }
        stack.extend(&node.children);
    }
    Ok(())
}

fn write_node(node: &Node, depth: usize, out: &mut String) {
    if node.given {
        out.push(':');
    }
    match node.kind {
        NodeKind::Symbol => out.push_str(&quote_symbol(&node.text)),
        NodeKind::Application => {
            out.push('(');
            for (i, child) in node.children.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                write_node(child, depth, out);
            }
            out.push(')');
        }
        NodeKind::Environment if node.children.is_empty() => out.push_str("{ }"),
        NodeKind::Environment => {
            out.push_str("{\n");
            for child in &node.children {
                push_indent(depth + 1, out);
                write_node(child, depth + 1, out);
                out.push('\n');
            }
            push_indent(depth, out);
            out.push('}');
        }
    }
    if let Some(attrs) = attribute_block(node) {
        out.push_str(" +");
        out.push_str(&attrs);
    }
}

fn push_indent(depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn attribute_block(node: &Node) -> Option<String> {
    if node.id.is_none() && node.attributes.is_empty() {
        return None;
    }
    let mut attrs = node.attributes.clone();
    if let Some(id) = node.id {
        attrs.insert(ID_KEY.into(), Value::from(id.get()));
    }
    serde_json::to_string(&Value::Object(attrs)).ok()
}

fn quote_symbol(text: &str) -> String {
    let needs_quotes = text.is_empty()
        || text.starts_with(':')
        || text.contains("+{")
        || text.contains("//")
        || text.chars().any(|c| c.is_whitespace() || is_delimiter(c));
    if needs_quotes {
        serde_json::to_string(text).unwrap_or_else(|_| format!("\"{text}\""))
    } else {
        text.to_string()
    }
}

fn is_delimiter(c: char) -> bool {
    matches!(c, '(' | ')' | '{' | '}' | '"')
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse every top-level node in `src`.
pub fn parse(src: &str) -> NotationResult<Vec<Node>> {
    let mut parser = Parser {
        src,
        pos: 0,
        depth: 0,
    };
    let mut nodes = Vec::new();
    loop {
        parser.skip_trivia();
        if parser.at_end() {
            return Ok(nodes);
        }
        let node = parser.node()?;
        if node.depth() > MAX_DEPTH {
            return Err(NotationError::TooDeep {
                offset: parser.pos,
                limit: MAX_DEPTH,
            });
        }
        nodes.push(node);
    }
}

/// Parse `src`, requiring exactly one top-level node.
pub fn parse_one(src: &str) -> NotationResult<Node> {
    let mut nodes = parse(src)?;
    match nodes.len() {
        0 => Err(NotationError::Empty),
        1 => Ok(nodes.remove(0)),
        _ => Err(NotationError::Unexpected {
            found: "a second top-level expression".into(),
            offset: 0,
        }),
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    /// Open brackets around the current position.
    depth: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self, c: char) {
        self.pos += c.len_utf8();
    }

    fn skip_trivia(&mut self) {
        loop {
            let rest = self.rest();
            let trimmed = rest.trim_start();
            self.pos += rest.len() - trimmed.len();
            if trimmed.starts_with("//") {
                let line_len = trimmed.find('\n').unwrap_or(trimmed.len());
                self.pos += line_len;
            } else {
                return;
            }
        }
    }

    fn node(&mut self) -> NotationResult<Node> {
        let given = if self.peek() == Some(':') {
            self.bump(':');
            true
        } else {
            false
        };

        let start = self.pos;
        let mut node = match self.peek() {
            None => {
                return Err(NotationError::UnexpectedEnd {
                    expected: "an expression".into(),
                });
            }
            Some('(') => {
                self.bump('(');
                let children = self.nested(start, ')')?;
                let mut children = children.into_iter();
                let Some(head) = children.next() else {
                    return Err(NotationError::Unexpected {
                        found: "empty application".into(),
                        offset: start,
                    });
                };
                Node::application(head, children)
            }
            Some('{') => {
                self.bump('{');
                Node::environment(self.nested(start, '}')?)
            }
            Some('"') => Node::symbol(self.quoted()?),
            Some(c @ (')' | '}')) => {
                return Err(NotationError::Unexpected {
                    found: format!("'{c}'"),
                    offset: start,
                });
            }
            Some(c) => {
                let text = self.bare_symbol();
                if text.is_empty() {
                    return Err(NotationError::Unexpected {
                        found: format!("'{c}'"),
                        offset: start,
                    });
                }
                Node::symbol(text)
            }
        };
        node.given = given;
        self.attributes(&mut node)?;
        Ok(node)
    }

    fn nested(&mut self, open: usize, close: char) -> NotationResult<Vec<Node>> {
        if self.depth >= MAX_DEPTH {
            return Err(NotationError::TooDeep {
                offset: open,
                limit: MAX_DEPTH,
            });
        }
        self.depth += 1;
        let children = self.sequence(close);
        self.depth -= 1;
        children
    }

    fn sequence(&mut self, close: char) -> NotationResult<Vec<Node>> {
        let mut children = Vec::new();
        loop {
            self.skip_trivia();
            match self.peek() {
                None => {
                    return Err(NotationError::UnexpectedEnd {
                        expected: format!("'{close}'"),
                    });
                }
                Some(c) if c == close => {
                    self.bump(c);
                    return Ok(children);
                }
                Some(_) => children.push(self.node()?),
            }
        }
    }

    fn quoted(&mut self) -> NotationResult<String> {
        let offset = self.pos;
        let mut stream = serde_json::Deserializer::from_str(self.rest()).into_iter::<String>();
        match stream.next() {
            Some(Ok(text)) => {
                self.pos += stream.byte_offset();
                Ok(text)
            }
            _ => Err(NotationError::Quoted { offset }),
        }
    }

    fn bare_symbol(&mut self) -> String {
        let rest = self.rest();
        let mut end = 0;
        for (i, c) in rest.char_indices() {
            if c.is_whitespace() || is_delimiter(c) || rest[i..].starts_with("+{") {
                break;
            }
            end = i + c.len_utf8();
        }
        self.pos += end;
        rest[..end].to_string()
    }

    fn attributes(&mut self, node: &mut Node) -> NotationResult<()> {
        loop {
            let before = self.pos;
            self.skip_trivia();
            if !self.rest().starts_with("+{") {
                self.pos = before;
                return Ok(());
            }
            self.bump('+');
            let offset = self.pos;
            let mut stream =
                serde_json::Deserializer::from_str(self.rest()).into_iter::<Map<String, Value>>();
            let mut attrs = match stream.next() {
                Some(Ok(attrs)) => attrs,
                Some(Err(e)) => {
                    return Err(NotationError::Attributes {
                        offset,
                        message: e.to_string(),
                    });
                }
                None => {
                    return Err(NotationError::UnexpectedEnd {
                        expected: "an attribute object".into(),
                    });
                }
            };
            self.pos += stream.byte_offset();

            if let Some(raw) = attrs.remove(ID_KEY) {
                node.id = raw.as_u64().and_then(CorrelationId::new);
                if node.id.is_none() {
                    return Err(NotationError::Attributes {
                        offset,
                        message: format!("\"id\" must be a positive integer, got {raw}"),
                    });
                }
            }
            node.attributes.extend(attrs);
        }
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
    fn parses_nested_forms() {
        let nodes = parse("{ :(= x 1) { P (=> P Q) } }").unwrap();
        assert_eq!(nodes.len(), 1);
        let root = &nodes[0];
        assert!(root.is_environment());
        assert!(root.children[0].given);
        assert_eq!(root.children[0].kind, NodeKind::Application);
        assert_eq!(root.children[1].children[1].children[0].text, "=>");
    }

    #[test]
    fn attributes_attach_to_preceding_node() {
        let node = parse_one(r#"(+ 2 2) +{"id": 7, "notation": "2+2"}"#).unwrap();
        assert_eq!(node.id, Some(id(7)));
        assert_eq!(node.attribute("notation"), Some(&json!("2+2")));
        assert!(node.attribute("id").is_none());
    }

    #[test]
    fn plus_is_an_ordinary_symbol() {
        let node = parse_one("(+ a b)").unwrap();
        assert_eq!(node.children[0].text, "+");
    }

    #[test]
    fn comments_are_skipped() {
        let nodes = parse("// header\nx // trailing\ny").unwrap();
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn quoted_symbols_round_trip() {
        let node = Node::symbol("a b(c)");
        let text = write(&node).unwrap();
        assert_eq!(text, r#""a b(c)""#);
        assert_eq!(parse_one(&text).unwrap(), node);
    }

    #[test]
    fn written_tree_parses_back() {
        let tree = Node::environment([
            Node::environment([Node::symbol("P").with_id(id(3))])
                .as_given()
                .with_id(id(2))
                .with_attribute("role", json!("rule")),
            Node::application(Node::symbol("="), [Node::symbol("x"), Node::symbol("1")])
                .with_id(id(4)),
            Node::environment([]).with_id(id(5)),
        ])
        .with_id(id(1));
        let text = write(&tree).unwrap();
        assert!(text.lines().count() > 3);
        assert_eq!(parse_one(&text).unwrap(), tree);
    }

    #[test]
    fn unbalanced_input_is_rejected() {
        assert!(matches!(
            parse("(f x"),
            Err(NotationError::UnexpectedEnd { .. })
        ));
        assert!(matches!(
            parse("x )"),
            Err(NotationError::Unexpected { offset: 2, .. })
        ));
        assert!(matches!(parse("()"), Err(NotationError::Unexpected { .. })));
    }

    #[test]
    fn bad_id_attribute_is_rejected() {
        assert!(matches!(
            parse(r#"x +{"id": 0}"#),
            Err(NotationError::Attributes { .. })
        ));
        assert!(matches!(
            parse(r#"x +{"id": 1"#),
            Err(NotationError::Attributes { .. })
        ));
    }

    #[test]
    fn deep_brackets_are_an_error_not_a_crash() {
        let src = "(".repeat(200_000);
        assert!(matches!(parse(&src), Err(NotationError::TooDeep { .. })));
        let src = format!("{}x{}", "{".repeat(MAX_DEPTH + 1), "}".repeat(MAX_DEPTH + 1));
        assert!(matches!(
            parse(&src),
            Err(NotationError::TooDeep { offset, .. }) if offset == MAX_DEPTH
        ));
    }

    #[test]
    fn nesting_up_to_the_limit_parses() {
        let src = format!("{}x{}", "{".repeat(MAX_DEPTH - 1), "}".repeat(MAX_DEPTH - 1));
        let root = parse_one(&src).unwrap();
        assert_eq!(root.depth(), MAX_DEPTH);
        assert_eq!(parse_one(&write(&root).unwrap()).unwrap(), root);

        let over = format!("{}x{}", "{".repeat(MAX_DEPTH), "}".repeat(MAX_DEPTH));
        assert!(matches!(parse(&over), Err(NotationError::TooDeep { .. })));
    }

    #[test]
    fn id_named_attribute_cannot_be_written() {
        let node = Node::symbol("x").with_attribute("id", json!("mine"));
        assert!(matches!(
            write(&node),
            Err(NotationError::Unrepresentable { .. })
        ));
        let nested = Node::environment([Node::symbol("y").with_attribute("id", json!(3))]);
        assert!(write(&nested).is_err());
    }

    #[test]
    fn headless_application_cannot_be_written() {
        let mut app = Node::application(Node::symbol("f"), []);
        app.children.clear();
        assert!(matches!(
            write(&app),
            Err(NotationError::Unrepresentable { .. })
        ));
    }

    #[test]
    fn parse_one_rejects_empty_and_multiple() {
        assert!(matches!(parse_one("  "), Err(NotationError::Empty)));
        assert!(parse_one("a b").is_err());
    }
}
