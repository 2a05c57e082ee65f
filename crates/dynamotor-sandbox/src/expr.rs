//! Parser and evaluator for the store-native expression subset the access
//! layer emits: condition expressions, key conditions, and `SET`/`REMOVE`
//! update expressions.
//!
//! `#name` and `:value` placeholders are resolved against the request's
//! substitution maps at parse time, so evaluation works on plain attribute
//! names and concrete values.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::Value;

use dynamotor_core::types::Item;

/// A malformed or unresolvable expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExprError(pub String);

impl std::fmt::Display for ExprError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid expression: {}", self.0)
    }
}

impl std::error::Error for ExprError {}

/// A parsed condition or key-condition expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Eq(String, Value),
    Ne(String, Value),
    Lt(String, Value),
    Le(String, Value),
    Gt(String, Value),
    Ge(String, Value),
    Between(String, Value, Value),
    BeginsWith(String, Value),
    AttributeExists(String),
    AttributeNotExists(String),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    /// Evaluate against a document. Absent attributes never satisfy a
    /// comparison; `attribute_not_exists` passes for them.
    pub fn eval(&self, doc: &Item) -> bool {
        match self {
            Expr::Eq(attr, value) => compare(doc, attr, value) == Some(Ordering::Equal),
            Expr::Ne(attr, value) => {
                matches!(compare(doc, attr, value), Some(ord) if ord != Ordering::Equal)
            }
            Expr::Lt(attr, value) => compare(doc, attr, value) == Some(Ordering::Less),
            Expr::Le(attr, value) => matches!(
                compare(doc, attr, value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Expr::Gt(attr, value) => compare(doc, attr, value) == Some(Ordering::Greater),
            Expr::Ge(attr, value) => matches!(
                compare(doc, attr, value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Expr::Between(attr, low, high) => {
                matches!(
                    compare(doc, attr, low),
                    Some(Ordering::Greater | Ordering::Equal)
                ) && matches!(
                    compare(doc, attr, high),
                    Some(Ordering::Less | Ordering::Equal)
                )
            }
            Expr::BeginsWith(attr, prefix) => match (doc.get(attr), prefix) {
                (Some(Value::String(s)), Value::String(p)) => s.starts_with(p.as_str()),
                _ => false,
            },
            Expr::AttributeExists(attr) => doc.contains_key(attr),
            Expr::AttributeNotExists(attr) => !doc.contains_key(attr),
            Expr::And(members) => members.iter().all(|m| m.eval(doc)),
            Expr::Or(members) => members.iter().any(|m| m.eval(doc)),
            Expr::Not(inner) => !inner.eval(doc),
        }
    }
}

/// Compare a document attribute against a literal value.
fn compare(doc: &Item, attr: &str, value: &Value) -> Option<Ordering> {
    let actual = doc.get(attr)?;
    compare_values(actual, value)
}

/// Total-order comparison where one exists: numbers numerically, strings and
/// booleans naturally; otherwise only equality is observable.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ if a == b => Some(Ordering::Equal),
        _ => None,
    }
}

/// One action of an update expression.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateAction {
    Set(String, Value),
    Remove(String),
}

/// Apply parsed update actions to a document, in order.
pub fn apply_update(doc: &mut Item, actions: &[UpdateAction]) {
    for action in actions {
        match action {
            UpdateAction::Set(attr, value) => {
                doc.insert(attr.clone(), value.clone());
            }
            UpdateAction::Remove(attr) => {
                doc.remove(attr);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Name(String),
    Placeholder(String),
    LParen,
    RParen,
    Comma,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Eq);
            }
            '<' => {
                chars.next();
                match chars.peek() {
                    Some('>') => {
                        chars.next();
                        tokens.push(Token::Ne);
                    }
                    Some('=') => {
                        chars.next();
                        tokens.push(Token::Le);
                    }
                    _ => tokens.push(Token::Lt),
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '#' | ':' => {
                let sigil = c;
                chars.next();
                let word = take_word(&mut chars);
                if word.is_empty() {
                    return Err(ExprError(format!("dangling '{sigil}'")));
                }
                if sigil == '#' {
                    tokens.push(Token::Name(format!("#{word}")));
                } else {
                    tokens.push(Token::Placeholder(format!(":{word}")));
                }
            }
            c if is_word_char(c) => {
                let word = take_word(&mut chars);
                tokens.push(Token::Ident(word));
            }
            other => return Err(ExprError(format!("unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

fn take_word(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut word = String::new();
    while let Some(&c) = chars.peek()
        && is_word_char(c)
    {
        word.push(c);
        chars.next();
    }
    word
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    names: &'a HashMap<String, String>,
    values: &'a Item,
}

impl<'a> Parser<'a> {
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

    fn expect(&mut self, expected: &Token) -> Result<(), ExprError> {
        match self.next() {
            Some(ref token) if token == expected => Ok(()),
            other => Err(ExprError(format!("expected {expected:?}, got {other:?}"))),
        }
    }

    fn keyword(&self, token: &Token, word: &str) -> bool {
        matches!(token, Token::Ident(ident) if ident.eq_ignore_ascii_case(word))
    }

    fn at_keyword(&self, word: &str) -> bool {
        self.peek().is_some_and(|t| self.keyword(t, word))
    }

    /// Resolve an attribute path token (`name` or `#name`).
    fn path(&mut self) -> Result<String, ExprError> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(name),
            Some(Token::Name(placeholder)) => self
                .names
                .get(&placeholder)
                .cloned()
                .ok_or_else(|| ExprError(format!("unresolved name {placeholder}"))),
            other => Err(ExprError(format!("expected attribute name, got {other:?}"))),
        }
    }

    /// Resolve a `:value` placeholder.
    fn value(&mut self) -> Result<Value, ExprError> {
        match self.next() {
            Some(Token::Placeholder(placeholder)) => self
                .values
                .get(&placeholder)
                .cloned()
                .ok_or_else(|| ExprError(format!("unresolved value {placeholder}"))),
            other => Err(ExprError(format!("expected value placeholder, got {other:?}"))),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut members = vec![self.parse_and()?];
        while self.at_keyword("OR") {
            self.next();
            members.push(self.parse_and()?);
        }
        if members.len() == 1 {
            Ok(members.swap_remove(0))
        } else {
            Ok(Expr::Or(members))
        }
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut members = vec![self.parse_not()?];
        while self.at_keyword("AND") {
            self.next();
            members.push(self.parse_not()?);
        }
        if members.len() == 1 {
            Ok(members.swap_remove(0))
        } else {
            Ok(Expr::And(members))
        }
    }

    fn parse_not(&mut self) -> Result<Expr, ExprError> {
        if self.at_keyword("NOT") {
            self.next();
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        match self.peek() {
            Some(Token::LParen) => {
                self.next();
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(ident)) if is_function(ident) => {
                let function = ident.clone();
                self.next();
                self.expect(&Token::LParen)?;
                let attr = self.path()?;
                let expr = match function.as_str() {
                    "attribute_exists" => Expr::AttributeExists(attr),
                    "attribute_not_exists" => Expr::AttributeNotExists(attr),
                    "begins_with" => {
                        self.expect(&Token::Comma)?;
                        Expr::BeginsWith(attr, self.value()?)
                    }
                    other => return Err(ExprError(format!("unknown function {other}"))),
                };
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            _ => {
                let attr = self.path()?;
                if self.at_keyword("BETWEEN") {
                    self.next();
                    let low = self.value()?;
                    if !self.at_keyword("AND") {
                        return Err(ExprError("BETWEEN requires AND".to_string()));
                    }
                    self.next();
                    let high = self.value()?;
                    return Ok(Expr::Between(attr, low, high));
                }
                let expr = match self.next() {
                    Some(Token::Eq) => Expr::Eq(attr, self.value()?),
                    Some(Token::Ne) => Expr::Ne(attr, self.value()?),
                    Some(Token::Lt) => Expr::Lt(attr, self.value()?),
                    Some(Token::Le) => Expr::Le(attr, self.value()?),
                    Some(Token::Gt) => Expr::Gt(attr, self.value()?),
                    Some(Token::Ge) => Expr::Ge(attr, self.value()?),
                    other => {
                        return Err(ExprError(format!("expected comparator, got {other:?}")));
                    }
                };
                Ok(expr)
            }
        }
    }
}

fn is_function(ident: &str) -> bool {
    matches!(
        ident,
        "attribute_exists" | "attribute_not_exists" | "begins_with"
    )
}

/// Parse a condition or key-condition expression, resolving placeholders.
pub fn parse(
    expression: &str,
    names: &HashMap<String, String>,
    values: &Item,
) -> Result<Expr, ExprError> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        names,
        values,
    };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(ExprError("trailing tokens".to_string()));
    }
    Ok(expr)
}

/// Parse a `SET`/`REMOVE` update expression, resolving placeholders.
pub fn parse_update(
    expression: &str,
    names: &HashMap<String, String>,
    values: &Item,
) -> Result<Vec<UpdateAction>, ExprError> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        names,
        values,
    };
    let mut actions = Vec::new();

    while let Some(token) = parser.peek() {
        if parser.keyword(token, "SET") {
            parser.next();
            loop {
                let attr = parser.path()?;
                parser.expect(&Token::Eq)?;
                let value = parser.value()?;
                actions.push(UpdateAction::Set(attr, value));
                if parser.peek() == Some(&Token::Comma) {
                    parser.next();
                } else {
                    break;
                }
            }
        } else if parser.keyword(token, "REMOVE") {
            parser.next();
            loop {
                actions.push(UpdateAction::Remove(parser.path()?));
                if parser.peek() == Some(&Token::Comma) {
                    parser.next();
                } else {
                    break;
                }
            }
        } else {
            return Err(ExprError(format!("unexpected clause at {token:?}")));
        }
    }
    Ok(actions)
}
