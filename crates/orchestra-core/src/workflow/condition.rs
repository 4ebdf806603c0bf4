//! Boolean expression parser for compound step conditions.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! or         := and ("or" and)*
//! and        := not ("and" not)*
//! not        := "not" not | comparison
//! comparison := operand (op operand)?
//! operand    := "(" or ")" | quoted-string | word
//! op         := == | != | < | > | <= | >= | in | contains
//! ```
//!
//! Words (identifiers, numbers, `True`/`False`) are resolved through the
//! mapping rules of [`ExpressionResolver`]. Any other character is rejected.

use orchestra_types::workflow::Context;
use serde_json::Value;

use super::expression::{ExpressionError, ExpressionResolver};

// ---------------------------------------------------------------------------
// Comparison operators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    /// `left in right`
    In,
    /// `left contains right`
    Contains,
}

impl CompareOp {
    pub fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "==" => CompareOp::Eq,
            "!=" => CompareOp::Ne,
            ">" => CompareOp::Gt,
            "<" => CompareOp::Lt,
            ">=" => CompareOp::Ge,
            "<=" => CompareOp::Le,
            "in" => CompareOp::In,
            "contains" => CompareOp::Contains,
            _ => return None,
        })
    }

    /// Apply the operator. Ordering operators compare as `f64`.
    pub fn apply(self, left: &Value, right: &Value) -> Result<bool, ExpressionError> {
        Ok(match self {
            CompareOp::Eq => loose_eq(left, right),
            CompareOp::Ne => !loose_eq(left, right),
            CompareOp::Gt => as_number(left)? > as_number(right)?,
            CompareOp::Lt => as_number(left)? < as_number(right)?,
            CompareOp::Ge => as_number(left)? >= as_number(right)?,
            CompareOp::Le => as_number(left)? <= as_number(right)?,
            CompareOp::In => is_member(left, right)?,
            CompareOp::Contains => is_member(right, left)?,
        })
    }
}

/// Equality that treats `5` and `5.0` as the same number.
fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn as_number(value: &Value) -> Result<f64, ExpressionError> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    n.ok_or_else(|| ExpressionError::NotNumeric(value.clone()))
}

fn is_member(needle: &Value, haystack: &Value) -> Result<bool, ExpressionError> {
    match haystack {
        Value::String(s) => match needle {
            Value::String(n) => Ok(s.contains(n.as_str())),
            other => Err(ExpressionError::NotContainer(other.clone())),
        },
        Value::Array(items) => Ok(items.iter().any(|item| loose_eq(item, needle))),
        Value::Object(map) => Ok(needle.as_str().is_some_and(|k| map.contains_key(k))),
        other => Err(ExpressionError::NotContainer(other.clone())),
    }
}

pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Op(CompareOp),
    Quoted(String),
    Word(String),
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '-' | '+')
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            '=' | '!' => match chars.next_if(|&(_, next)| next == '=') {
                Some(_) if c == '=' => tokens.push(Token::Op(CompareOp::Eq)),
                Some(_) => tokens.push(Token::Op(CompareOp::Ne)),
                None => return Err(ExpressionError::UnexpectedToken(c.to_string())),
            },
            '<' | '>' => {
                let or_equal = chars.next_if(|&(_, next)| next == '=').is_some();
                tokens.push(Token::Op(match (c, or_equal) {
                    ('<', false) => CompareOp::Lt,
                    ('<', true) => CompareOp::Le,
                    (_, false) => CompareOp::Gt,
                    (_, true) => CompareOp::Ge,
                }));
            }
            '"' | '\'' => {
                let mut literal = String::new();
                let mut closed = false;
                for (_, next) in chars.by_ref() {
                    if next == c {
                        closed = true;
                        break;
                    }
                    literal.push(next);
                }
                if !closed {
                    return Err(ExpressionError::UnterminatedString);
                }
                tokens.push(Token::Quoted(literal));
            }
            c if is_word_char(c) => {
                let mut end = start + c.len_utf8();
                while let Some((i, next)) = chars.next_if(|&(_, next)| is_word_char(next)) {
                    end = i + next.len_utf8();
                }
                let word = &input[start..end];
                tokens.push(match word {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "in" => Token::Op(CompareOp::In),
                    "contains" => Token::Op(CompareOp::Contains),
                    _ => Token::Word(word.to_string()),
                });
            }
            other => return Err(ExpressionError::UnexpectedToken(other.to_string())),
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    /// Resolved against the context at evaluation time.
    Word(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare {
        left: Box<Expr>,
        op: CompareOp,
        right: Box<Expr>,
    },
}

impl Expr {
    fn eval(&self, resolver: &ExpressionResolver, context: &Context) -> Result<Value, ExpressionError> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Word(word) => resolver.resolve_operand(word, context),
            Expr::Not(inner) => Ok(Value::Bool(!truthy(&inner.eval(resolver, context)?))),
            Expr::And(left, right) => {
                if !truthy(&left.eval(resolver, context)?) {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(truthy(&right.eval(resolver, context)?)))
            }
            Expr::Or(left, right) => {
                if truthy(&left.eval(resolver, context)?) {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(truthy(&right.eval(resolver, context)?)))
            }
            Expr::Compare { left, op, right } => {
                let left = left.eval(resolver, context)?;
                let right = right.eval(resolver, context)?;
                Ok(Value::Bool(op.apply(&left, &right)?))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::Or) {
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_not()?;
        while self.eat(&Token::And) {
            let rhs = self.parse_not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, ExpressionError> {
        if self.eat(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExpressionError> {
        let left = self.parse_operand()?;
        let Some(&Token::Op(op)) = self.peek() else {
            return Ok(left);
        };
        self.pos += 1;
        let right = self.parse_operand()?;
        Ok(Expr::Compare {
            left: Box::new(left),
            op,
            right: Box::new(right),
        })
    }

    fn parse_operand(&mut self) -> Result<Expr, ExpressionError> {
        match self.advance() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                if !self.eat(&Token::RParen) {
                    return Err(match self.peek() {
                        Some(token) => ExpressionError::UnexpectedToken(format!("{token:?}")),
                        None => ExpressionError::UnexpectedEnd,
                    });
                }
                Ok(inner)
            }
            Some(Token::Quoted(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Word(w)) => Ok(Expr::Word(w)),
            Some(token) => Err(ExpressionError::UnexpectedToken(format!("{token:?}"))),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }
}

fn parse(input: &str) -> Result<Expr, ExpressionError> {
    let mut parser = Parser {
        tokens: tokenize(input)?,
        pos: 0,
    };
    let expr = parser.parse_or()?;
    if let Some(token) = parser.peek() {
        return Err(ExpressionError::UnexpectedToken(format!("{token:?}")));
    }
    Ok(expr)
}

/// Parse and evaluate a compound condition, coercing the result by truthiness.
pub(crate) fn evaluate(
    input: &str,
    resolver: &ExpressionResolver,
    context: &Context,
) -> Result<bool, ExpressionError> {
    let expr = parse(input)?;
    Ok(truthy(&expr.eval(resolver, context)?))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
