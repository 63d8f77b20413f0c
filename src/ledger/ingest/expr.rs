//! Typed expressions for derived columns.
//!
//! Grammar:
//!
//! ```text
//! expr    := term (('+' | '-' | '&') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := '-' unary | primary
//! primary := number | 'text' | [COLUMN NAME] | ident '(' args ')' | '(' expr ')'
//! ```
//!
//! Expressions are parsed once when the catalog loads and type-checked against
//! the record set they are applied to before any row is evaluated.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::ledger::ingest::error::{IngestError, Result};
use crate::ledger::ingest::model::{ColumnType, RecordSet, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Concat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Abs,
    Min,
    Max,
    Round,
    Coalesce,
    Upper,
    SplitPart,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "abs" => Function::Abs,
            "min" => Function::Min,
            "max" => Function::Max,
            "round" => Function::Round,
            "coalesce" => Function::Coalesce,
            "upper" => Function::Upper,
            "split_part" => Function::SplitPart,
            _ => return None,
        })
    }

    fn arity(self) -> (usize, Option<usize>) {
        match self {
            Function::Abs | Function::Upper => (1, Some(1)),
            Function::Round => (2, Some(2)),
            Function::SplitPart => (3, Some(3)),
            Function::Min | Function::Max | Function::Coalesce => (1, None),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Function::Abs => "abs",
            Function::Min => "min",
            Function::Max => "max",
            Function::Round => "round",
            Function::Coalesce => "coalesce",
            Function::Upper => "upper",
            Function::SplitPart => "split_part",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(String),
    Number(f64),
    Text(String),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        func: Function,
        args: Vec<Expr>,
    },
}

/// A parsed expression together with the text it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    pub source: String,
    pub expr: Expr,
}

impl Formula {
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = tokenize(source).map_err(|message| error(source, message))?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.expr().map_err(|message| error(source, message))?;
        if parser.pos != parser.tokens.len() {
            return Err(error(source, "unexpected trailing input"));
        }
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    /// Infers the result type, rejecting unknown columns and ill-typed operands.
    pub fn check(&self, schema: &HashMap<String, ColumnType>) -> Result<ColumnType> {
        self.expr
            .check(schema)
            .map_err(|message| error(&self.source, message))
    }

    pub fn eval(&self, set: &RecordSet, row: usize) -> Value {
        self.expr.eval(set, row)
    }
}

fn error(source: &str, message: impl Into<String>) -> IngestError {
    IngestError::Expression {
        source_text: source.to_string(),
        message: message.into(),
    }
}

impl Expr {
    /// Column names referenced anywhere in the expression.
    pub fn columns(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Expr::Column(name) => {
                out.insert(name.as_str());
            }
            Expr::Number(_) | Expr::Text(_) => {}
            Expr::Neg(inner) => inner.collect_columns(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_columns(out);
                rhs.collect_columns(out);
            }
            Expr::Call { args, .. } => args.iter().for_each(|arg| arg.collect_columns(out)),
        }
    }

    fn check(&self, schema: &HashMap<String, ColumnType>) -> std::result::Result<ColumnType, String> {
        match self {
            Expr::Column(name) => schema
                .get(name)
                .copied()
                .ok_or_else(|| format!("unknown column [{name}]")),
            Expr::Number(_) => Ok(ColumnType::Float),
            Expr::Text(_) => Ok(ColumnType::Text),
            Expr::Neg(inner) => match inner.check(schema)? {
                ColumnType::Float => Ok(ColumnType::Float),
                other => Err(format!("cannot negate a {other:?} operand")),
            },
            Expr::Binary { op, lhs, rhs } => {
                let (left, right) = (lhs.check(schema)?, rhs.check(schema)?);
                match op {
                    BinaryOp::Concat => Ok(ColumnType::Text),
                    _ if left == ColumnType::Float && right == ColumnType::Float => {
                        Ok(ColumnType::Float)
                    }
                    _ => Err(format!(
                        "arithmetic needs numeric operands, found {left:?} and {right:?}"
                    )),
                }
            }
            Expr::Call { func, args } => {
                let types = args
                    .iter()
                    .map(|arg| arg.check(schema))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                match func {
                    Function::Abs | Function::Min | Function::Max | Function::Round => {
                        if types.iter().all(|t| *t == ColumnType::Float) {
                            Ok(ColumnType::Float)
                        } else {
                            Err(format!("{func} needs numeric arguments"))
                        }
                    }
                    Function::Coalesce => {
                        let first = types[0];
                        if types.iter().all(|t| *t == first) {
                            Ok(first)
                        } else {
                            Err("coalesce arguments must share one type".to_string())
                        }
                    }
                    Function::Upper => Ok(ColumnType::Text),
                    Function::SplitPart => {
                        if types[1] == ColumnType::Text && types[2] == ColumnType::Float {
                            Ok(ColumnType::Text)
                        } else {
                            Err("split_part expects (value, 'separator', index)".to_string())
                        }
                    }
                }
            }
        }
    }

    fn eval(&self, set: &RecordSet, row: usize) -> Value {
        match self {
            Expr::Column(name) => set.get(row, name).cloned().unwrap_or(Value::Null),
            Expr::Number(value) => Value::Float(*value),
            Expr::Text(value) => Value::Text(value.clone()),
            Expr::Neg(inner) => match inner.eval(set, row).as_f64() {
                Some(value) => Value::Float(-value),
                None => Value::Null,
            },
            Expr::Binary { op, lhs, rhs } => {
                let (left, right) = (lhs.eval(set, row), rhs.eval(set, row));
                if *op == BinaryOp::Concat {
                    return Value::Text(format!("{}{}", left.render(), right.render()));
                }
                let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
                    return Value::Null;
                };
                match op {
                    BinaryOp::Add => Value::Float(a + b),
                    BinaryOp::Sub => Value::Float(a - b),
                    BinaryOp::Mul => Value::Float(a * b),
                    BinaryOp::Div if b == 0.0 => Value::Null,
                    BinaryOp::Div => Value::Float(a / b),
                    BinaryOp::Concat => unreachable!("handled above"),
                }
            }
            Expr::Call { func, args } => {
                let values: Vec<Value> = args.iter().map(|arg| arg.eval(set, row)).collect();
                call(*func, values)
            }
        }
    }
}

fn call(func: Function, values: Vec<Value>) -> Value {
    let numbers = || values.iter().filter_map(Value::as_f64);
    match func {
        Function::Abs => values[0].as_f64().map_or(Value::Null, |v| Value::Float(v.abs())),
        Function::Min => numbers().reduce(f64::min).map_or(Value::Null, Value::Float),
        Function::Max => numbers().reduce(f64::max).map_or(Value::Null, Value::Float),
        Function::Round => match (values[0].as_f64(), values[1].as_f64()) {
            (Some(value), Some(digits)) => {
                let factor = 10f64.powi(digits as i32);
                Value::Float((value * factor).round() / factor)
            }
            _ => Value::Null,
        },
        Function::Coalesce => values
            .into_iter()
            .find(|value| !value.is_blank())
            .unwrap_or(Value::Null),
        Function::Upper => match &values[0] {
            Value::Null => Value::Null,
            other => Value::Text(other.render().to_uppercase()),
        },
        Function::SplitPart => {
            let (Some(separator), Some(index)) = (values[1].as_text(), values[2].as_f64()) else {
                return Value::Null;
            };
            if values[0].is_null() || index < 0.0 {
                return Value::Null;
            }
            values[0]
                .render()
                .split(separator)
                .nth(index as usize)
                .map_or(Value::Null, |part| Value::Text(part.trim().to_string()))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Text(String),
    Column(String),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
    Amp,
}

fn tokenize(source: &str) -> std::result::Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            _ if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '&' => {
                tokens.push(Token::Amp);
                i += 1;
            }
            '[' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == ']')
                    .ok_or("unterminated column reference")?;
                let name: String = chars[i + 1..i + 1 + end].iter().collect();
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err("empty column reference".into());
                }
                tokens.push(Token::Column(name));
                i += end + 2;
            }
            '\'' => {
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated string literal".into()),
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            text.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            text.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Text(text));
            }
            _ if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{literal}'"))?;
                tokens.push(Token::Number(value));
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

/// Deepest expression tree the parser builds.
const MAX_NESTING: usize = 256;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

type ParseResult = std::result::Result<Expr, String>;

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> std::result::Result<(), String> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(format!("expected {expected:?}, found {token:?}")),
            None => Err(format!("expected {expected:?}, found end of input")),
        }
    }

    /// Counts one more level of the tree being built.
    fn descend(&mut self) -> std::result::Result<(), String> {
        if self.depth >= MAX_NESTING {
            return Err(format!("expression nested deeper than {MAX_NESTING} levels"));
        }
        self.depth += 1;
        Ok(())
    }

    fn expr(&mut self) -> ParseResult {
        let depth = self.depth;
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                Some(Token::Amp) => BinaryOp::Concat,
                _ => {
                    self.depth = depth;
                    return Ok(lhs);
                }
            };
            self.pos += 1;
            self.descend()?;
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn term(&mut self) -> ParseResult {
        let depth = self.depth;
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => {
                    self.depth = depth;
                    return Ok(lhs);
                }
            };
            self.pos += 1;
            self.descend()?;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn unary(&mut self) -> ParseResult {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            self.descend()?;
            let operand = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Neg(Box::new(operand)));
        }
        self.primary()
    }

    fn primary(&mut self) -> ParseResult {
        match self.next() {
            Some(Token::Number(value)) => Ok(Expr::Number(value)),
            Some(Token::Text(value)) => Ok(Expr::Text(value)),
            Some(Token::Column(name)) => Ok(Expr::Column(name)),
            Some(Token::LParen) => {
                self.descend()?;
                let inner = self.expr()?;
                self.depth -= 1;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                let func =
                    Function::lookup(&name).ok_or_else(|| format!("unknown function '{name}'"))?;
                self.expect(Token::LParen)?;
                let mut args = Vec::new();
                self.descend()?;
                if self.peek() != Some(&Token::RParen) {
                    loop {
                        args.push(self.expr()?);
                        if self.peek() == Some(&Token::Comma) {
                            self.pos += 1;
                        } else {
                            break;
                        }
                    }
                }
                self.depth -= 1;
                self.expect(Token::RParen)?;
                let (min, max) = func.arity();
                if args.len() < min || max.is_some_and(|max| args.len() > max) {
                    return Err(format!("{func} takes {min} argument(s), got {}", args.len()));
                }
                Ok(Expr::Call { func, args })
            }
            Some(token) => Err(format!("unexpected token {token:?}")),
            None => Err("unexpected end of input".to_string()),
        }
    }
}
