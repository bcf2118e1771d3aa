//! Boolean filter expressions for the in-memory store.
//!
//! Supports the subset of the Milvus expression language the pipeline uses:
//!
//! ```text
//! id in [7, 8]
//! id not in [1]
//! lines >= 10 and extension == ".rs"
//! ```
//!
//! Clauses are joined with `and` (or `&&`). Literals are integers, floats,
//! quoted strings and `true`/`false`. The field `id` refers to the primary
//! key; any other name is looked up in the row payload.

use std::cmp::Ordering;

use super::JsonMap;
use crate::error::{VectorDbError, VectorDbResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// Integers compare exactly, so 63-bit primary keys stay distinct.
    Int(i64),
    Num(f64),
    Str(String),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    In {
        field: String,
        values: Vec<Literal>,
        negated: bool,
    },
    Cmp {
        field: String,
        op: CmpOp,
        value: Literal,
    },
}

/// A parsed conjunction of clauses.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub clauses: Vec<Clause>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Lit(Literal),
    Op(CmpOp),
    LBracket,
    RBracket,
    Comma,
    And,
    In,
    Not,
}

fn invalid(expr: &str, why: &str) -> VectorDbError {
    VectorDbError::invalid_argument(format!("cannot parse filter `{}`: {}", expr, why))
}

fn tokenize(expr: &str) -> VectorDbResult<Vec<Token>> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '"' | '\'' => {
                let quote = c;
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != quote {
                    end += 1;
                }
                if end >= chars.len() {
                    return Err(invalid(expr, "unterminated string"));
                }
                tokens.push(Token::Lit(Literal::Str(chars[start..end].iter().collect())));
                i = end + 1;
            }
            '=' | '!' | '>' | '<' | '&' => {
                let next = chars.get(i + 1).copied();
                let (token, width) = match (c, next) {
                    ('=', Some('=')) => (Token::Op(CmpOp::Eq), 2),
                    ('!', Some('=')) => (Token::Op(CmpOp::Ne), 2),
                    ('>', Some('=')) => (Token::Op(CmpOp::Ge), 2),
                    ('<', Some('=')) => (Token::Op(CmpOp::Le), 2),
                    ('>', _) => (Token::Op(CmpOp::Gt), 1),
                    ('<', _) => (Token::Op(CmpOp::Lt), 1),
                    ('&', Some('&')) => (Token::And, 2),
                    _ => return Err(invalid(expr, "unknown operator")),
                };
                tokens.push(token);
                i += width;
            }
            c if c.is_ascii_digit() || c == '-' || c == '.' => {
                let start = i;
                i += 1;
                while i < chars.len()
                    && (chars[i].is_ascii_digit() || matches!(chars[i], '.' | 'e' | 'E'))
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let literal = match text.parse::<i64>() {
                    Ok(int) => Literal::Int(int),
                    Err(_) => Literal::Num(
                        text.parse::<f64>()
                            .map_err(|_| invalid(expr, "bad number"))?,
                    ),
                };
                tokens.push(Token::Lit(literal));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.to_ascii_lowercase().as_str() {
                    "and" => Token::And,
                    "in" => Token::In,
                    "not" => Token::Not,
                    "true" => Token::Lit(Literal::Bool(true)),
                    "false" => Token::Lit(Literal::Bool(false)),
                    _ => Token::Ident(word),
                });
            }
            _ => return Err(invalid(expr, "unexpected character")),
        }
    }
    Ok(tokens)
}

impl Filter {
    pub fn parse(expr: &str) -> VectorDbResult<Self> {
        let tokens = tokenize(expr)?;
        let mut pos = 0;
        let mut clauses = Vec::new();

        loop {
            let Some(Token::Ident(field)) = tokens.get(pos).cloned() else {
                return Err(invalid(expr, "expected field name"));
            };
            pos += 1;

            let clause = match tokens.get(pos) {
                Some(Token::Op(op)) => {
                    let op = *op;
                    let Some(Token::Lit(value)) = tokens.get(pos + 1).cloned() else {
                        return Err(invalid(expr, "expected literal"));
                    };
                    pos += 2;
                    Clause::Cmp { field, op, value }
                }
                Some(Token::In) | Some(Token::Not) => {
                    let negated = tokens.get(pos) == Some(&Token::Not);
                    if negated {
                        pos += 1;
                        if tokens.get(pos) != Some(&Token::In) {
                            return Err(invalid(expr, "expected `in` after `not`"));
                        }
                    }
                    pos += 1;
                    if tokens.get(pos) != Some(&Token::LBracket) {
                        return Err(invalid(expr, "expected `[`"));
                    }
                    pos += 1;
                    let mut values = Vec::new();
                    loop {
                        match tokens.get(pos) {
                            Some(Token::RBracket) => {
                                pos += 1;
                                break;
                            }
                            Some(Token::Lit(value)) => {
                                values.push(value.clone());
                                pos += 1;
                                match tokens.get(pos) {
                                    Some(Token::Comma) => pos += 1,
                                    Some(Token::RBracket) => {}
                                    _ => return Err(invalid(expr, "expected `,` or `]`")),
                                }
                            }
                            _ => return Err(invalid(expr, "expected literal in list")),
                        }
                    }
                    Clause::In {
                        field,
                        values,
                        negated,
                    }
                }
                _ => return Err(invalid(expr, "expected operator")),
            };
            clauses.push(clause);

            match tokens.get(pos) {
                None => break,
                Some(Token::And) => pos += 1,
                Some(_) => return Err(invalid(expr, "expected `and`")),
            }
        }

        Ok(Self { clauses })
    }

    /// Whether a row with primary key `id` and `payload` satisfies every clause.
    pub fn matches(&self, id: i64, payload: &JsonMap) -> bool {
        self.clauses.iter().all(|clause| match clause {
            Clause::In {
                field,
                values,
                negated,
            } => {
                let found = lookup(field, id, payload)
                    .map(|v| values.iter().any(|lit| compare(&v, lit) == Some(Ordering::Equal)))
                    .unwrap_or(false);
                found != *negated
            }
            Clause::Cmp { field, op, value } => {
                let Some(actual) = lookup(field, id, payload) else {
                    return false;
                };
                let ord = compare(&actual, value);
                match op {
                    CmpOp::Eq => ord == Some(Ordering::Equal),
                    CmpOp::Ne => ord != Some(Ordering::Equal),
                    CmpOp::Gt => ord == Some(Ordering::Greater),
                    CmpOp::Ge => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
                    CmpOp::Lt => ord == Some(Ordering::Less),
                    CmpOp::Le => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
                }
            }
        })
    }
}

fn lookup(field: &str, id: i64, payload: &JsonMap) -> Option<serde_json::Value> {
    if field == "id" {
        return Some(serde_json::Value::from(id));
    }
    payload.get(field).cloned()
}

fn compare(actual: &serde_json::Value, literal: &Literal) -> Option<Ordering> {
    match (actual, literal) {
        (serde_json::Value::Number(n), Literal::Int(x)) => match (n.as_i64(), n.as_u64()) {
            (Some(v), _) => Some(v.cmp(x)),
            (None, Some(_)) => Some(Ordering::Greater),
            (None, None) => n.as_f64()?.partial_cmp(&(*x as f64)),
        },
        (serde_json::Value::Number(n), Literal::Num(x)) => n.as_f64()?.partial_cmp(x),
        (serde_json::Value::String(s), Literal::Str(x)) => Some(s.as_str().cmp(x.as_str())),
        (serde_json::Value::Bool(b), Literal::Bool(x)) => Some(b.cmp(x)),
        _ => None,
    }
}
