//! Infix notation for expression atoms, e.g. `2+2=4` or `x > 0 and f(x) = 1`.
//!
//! Each operator becomes an application whose head is the operator symbol:
//! `2+2=4` converts to `(= (+ 2 2) 4)`. Comma-separated expressions at the top
//! level convert to several nodes.
//!
//! Binding, loosest first: `=>` (right), `or`, `and`, `not`, relations
//! (`= != < <= > >=`), `+ -`, `* /`, unary `-`, `^` (right).

use crate::error::{NotationError, NotationResult};
use crate::lc::{MAX_DEPTH, Node};

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Number(String),
    Ident(String),
    Op(&'static str),
    Open,
    Close,
    Comma,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    offset: usize,
}

/// Parse an atom's infix source into zero or more expression nodes.
pub fn parse(src: &str) -> NotationResult<Vec<Node>> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Ok(Vec::new());
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let mut nodes = vec![parser.expr(0)?];
    while let Some(token) = parser.next() {
        match token.tok {
            Tok::Comma => nodes.push(parser.expr(0)?),
            other => {
                return Err(NotationError::Unexpected {
                    found: describe(&other),
                    offset: token.offset,
                });
            }
        }
    }
    // Left-associative chains grow the tree without growing the recursion.
    if nodes.iter().any(|n| n.depth() > MAX_DEPTH) {
        return Err(NotationError::TooDeep {
            offset: 0,
            limit: MAX_DEPTH,
        });
    }
    Ok(nodes)
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

const OPERATORS: &[(&str, &str)] = &[
    ("=>", "=>"),
    ("⇒", "=>"),
    ("!=", "!="),
    ("≠", "!="),
    ("<=", "<="),
    ("≤", "<="),
    (">=", ">="),
    ("≥", ">="),
    ("=", "="),
    ("<", "<"),
    (">", ">"),
    ("+", "+"),
    ("-", "-"),
    ("−", "-"),
    ("*", "*"),
    ("·", "*"),
    ("×", "*"),
    ("/", "/"),
    ("^", "^"),
    ("∧", "and"),
    ("∨", "or"),
    ("¬", "not"),
];

fn tokenize(src: &str) -> NotationResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut pos = 0;
    while pos < src.len() {
        let rest = &src[pos..];
        let Some(c) = rest.chars().next() else { break };

        if c.is_whitespace() {
            pos += c.len_utf8();
            continue;
        }

        let (tok, len) = if c.is_ascii_digit() {
            let len = rest
                .char_indices()
                .find(|&(i, ch)| !(ch.is_ascii_digit() || (ch == '.' && i > 0)))
                .map_or(rest.len(), |(i, _)| i);
            (Tok::Number(rest[..len].to_string()), len)
        } else if c.is_alphabetic() || c == '_' {
            let len = rest
                .char_indices()
                .find(|&(_, ch)| !(ch.is_alphanumeric() || ch == '_'))
                .map_or(rest.len(), |(i, _)| i);
            let word = &rest[..len];
            let tok = match word {
                "and" => Tok::Op("and"),
                "or" => Tok::Op("or"),
                "not" => Tok::Op("not"),
                _ => Tok::Ident(word.to_string()),
            };
            (tok, len)
        } else if c == '(' {
            (Tok::Open, 1)
        } else if c == ')' {
            (Tok::Close, 1)
        } else if c == ',' {
            (Tok::Comma, 1)
        } else if let Some((surface, canonical)) =
            OPERATORS.iter().find(|(surface, _)| rest.starts_with(surface))
        {
            (Tok::Op(*canonical), surface.len())
        } else {
            return Err(NotationError::Unexpected {
                found: format!("'{c}'"),
                offset: pos,
            });
        };

        tokens.push(Token { tok, offset: pos });
        pos += len;
    }
    Ok(tokens)
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Number(n) => format!("number {n}"),
        Tok::Ident(name) => format!("identifier {name}"),
        Tok::Op(op) => format!("operator '{op}'"),
        Tok::Open => "'('".into(),
        Tok::Close => "')'".into(),
        Tok::Comma => "','".into(),
    }
}

// ---------------------------------------------------------------------------
// Pratt parser
// ---------------------------------------------------------------------------

fn infix_binding(op: &str) -> Option<(u8, u8)> {
    Some(match op {
        "=>" => (2, 1),
        "or" => (3, 4),
        "and" => (5, 6),
        "=" | "!=" | "<" | "<=" | ">" | ">=" => (9, 10),
        "+" | "-" => (11, 12),
        "*" | "/" => (13, 14),
        "^" => (18, 17),
        _ => return None,
    })
}

fn prefix_binding(op: &str) -> Option<u8> {
    match op {
        "not" => Some(7),
        "-" => Some(15),
        _ => None,
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Nesting of `expr` calls.
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_close(&mut self) -> NotationResult<()> {
        match self.next() {
            Some(Token { tok: Tok::Close, .. }) => Ok(()),
            Some(token) => Err(NotationError::Unexpected {
                found: describe(&token.tok),
                offset: token.offset,
            }),
            None => Err(NotationError::UnexpectedEnd {
                expected: "')'".into(),
            }),
        }
    }

    fn expr(&mut self, min_bp: u8) -> NotationResult<Node> {
        if self.depth >= MAX_DEPTH {
            return Err(NotationError::TooDeep {
                offset: self.peek().map_or(0, |t| t.offset),
                limit: MAX_DEPTH,
            });
        }
        self.depth += 1;
        let result = self.binary(min_bp);
        self.depth -= 1;
        result
    }

    fn binary(&mut self, min_bp: u8) -> NotationResult<Node> {
        let mut lhs = self.primary()?;

        loop {
            let op = match self.peek() {
                Some(Token { tok: Tok::Op(op), .. }) => *op,
                _ => break,
            };
            let Some((l_bp, r_bp)) = infix_binding(op) else {
                break;
            };
            if l_bp < min_bp {
                break;
            }
            self.pos += 1;
            let rhs = self.expr(r_bp)?;
            lhs = Node::application(Node::symbol(op), [lhs, rhs]);
        }

        Ok(lhs)
    }

    fn primary(&mut self) -> NotationResult<Node> {
        let Some(token) = self.next() else {
            return Err(NotationError::UnexpectedEnd {
                expected: "an operand".into(),
            });
        };
        match token.tok {
            Tok::Number(n) => Ok(Node::symbol(n)),
            Tok::Ident(name) => {
                if matches!(self.peek(), Some(Token { tok: Tok::Open, .. })) {
                    self.pos += 1;
                    let args = self.arguments()?;
                    Ok(Node::application(Node::symbol(name), args))
                } else {
                    Ok(Node::symbol(name))
                }
            }
            Tok::Open => {
                let inner = self.expr(0)?;
                self.expect_close()?;
                Ok(inner)
            }
            Tok::Op(op) => match prefix_binding(op) {
                Some(bp) => {
                    let operand = self.expr(bp)?;
                    Ok(Node::application(Node::symbol(op), [operand]))
                }
                None => Err(NotationError::Unexpected {
                    found: describe(&Tok::Op(op)),
                    offset: token.offset,
                }),
            },
            other => Err(NotationError::Unexpected {
                found: describe(&other),
                offset: token.offset,
            }),
        }
    }

    fn arguments(&mut self) -> NotationResult<Vec<Node>> {
        let mut args = Vec::new();
        if matches!(self.peek(), Some(Token { tok: Tok::Close, .. })) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expr(0)?);
            match self.next() {
                Some(Token { tok: Tok::Comma, .. }) => continue,
                Some(Token { tok: Tok::Close, .. }) => return Ok(args),
                Some(token) => {
                    return Err(NotationError::Unexpected {
                        found: describe(&token.tok),
                        offset: token.offset,
                    });
                }
                None => {
                    return Err(NotationError::UnexpectedEnd {
                        expected: "')'".into(),
                    });
                }
            }
        }
    }
}
