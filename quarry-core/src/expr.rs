//! A small SQL-like expression language used by the `filter` and `withColumn`
//! functions.
//!
//! Supported syntax:
//! - literals: integers, decimals, `'strings'` (or `"strings"`), `true`, `false`, `null`
//! - columns: bare identifiers or `` `quoted identifiers` ``
//! - arithmetic `+ - * / %`, comparisons `= == != <> < <= > >=`
//! - boolean `AND`, `OR`, `NOT`, and `IS [NOT] NULL`
//! - `CAST(expr AS type)` and the functions `concat`, `concat_ws`, `upper`, `lower`,
//!   `trim`, `length`, `abs`, `round`, `coalesce`, `substring`, `year`, `month`, `day`
//!
//! Evaluation follows non-ANSI SQL rules: nulls propagate, division by zero
//! yields null, and integer arithmetic wraps.

use crate::error::FrameError;
use crate::frame::Frame;
use crate::schema::{DataType, Schema};
use chrono::{Datelike, NaiveDate};
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::fmt;

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinaryOp {
    fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod
        )
    }

    fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::LtEq
                | BinaryOp::Gt
                | BinaryOp::GtEq
        )
    }

    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(String),
    Literal(Value),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Cast {
        expr: Box<Expr>,
        to: DataType,
    },
}

impl Expr {
    pub fn column(name: impl Into<String>) -> Self {
        Expr::Column(name.into())
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Parse expression text.
    pub fn parse(text: &str) -> Result<Expr, FrameError> {
        let tokens = tokenize(text)?;
        if tokens.is_empty() {
            return Err(FrameError::expression("empty expression"));
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        match parser.peek() {
            None => Ok(expr),
            Some(tok) => Err(FrameError::expression(format!(
                "unexpected {tok} in '{text}'"
            ))),
        }
    }

    /// Static result type against a schema. Also validates column references,
    /// function names and arities.
    pub fn data_type(&self, schema: &Schema) -> Result<DataType, FrameError> {
        match self {
            Expr::Column(name) => Ok(schema.fields()[resolve(schema, name)?].data_type),
            Expr::Literal(value) => Ok(literal_type(value)),
            Expr::Unary { op, expr } => {
                let inner = expr.data_type(schema)?;
                match op {
                    UnaryOp::Not if inner == DataType::Boolean => Ok(DataType::Boolean),
                    UnaryOp::Not => Err(FrameError::expression(format!(
                        "NOT requires a boolean operand, found {inner}"
                    ))),
                    UnaryOp::Neg if inner.is_numeric() => Ok(inner),
                    UnaryOp::Neg if inner == DataType::String => Ok(DataType::Double),
                    UnaryOp::Neg => Err(FrameError::expression(format!(
                        "cannot negate a {inner} value"
                    ))),
                }
            }
            Expr::Binary { op, left, right } => {
                let l = left.data_type(schema)?;
                let r = right.data_type(schema)?;
                if op.is_arithmetic() {
                    arithmetic_type(*op, l, r)
                } else if op.is_comparison() {
                    Ok(DataType::Boolean)
                } else if l == DataType::Boolean && r == DataType::Boolean {
                    Ok(DataType::Boolean)
                } else {
                    Err(FrameError::expression(format!(
                        "{} requires boolean operands, found {l} and {r}",
                        op.symbol()
                    )))
                }
            }
            Expr::IsNull { expr, .. } => {
                expr.data_type(schema)?;
                Ok(DataType::Boolean)
            }
            Expr::Cast { expr, to } => {
                expr.data_type(schema)?;
                Ok(*to)
            }
            Expr::Call { name, args } => call_type(name, args, schema),
        }
    }

    /// Evaluate against a single row laid out according to `schema`.
    pub fn eval(&self, row: &[Value], schema: &Schema) -> Result<Value, FrameError> {
        match self {
            Expr::Column(name) => Ok(row[resolve(schema, name)?].clone()),
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Unary { op, expr } => {
                let v = expr.eval(row, schema)?;
                Ok(match op {
                    UnaryOp::Not => match truth(&v)? {
                        Some(b) => Value::Bool(!b),
                        None => Value::Null,
                    },
                    UnaryOp::Neg => match numeric(&v) {
                        Some(Num::Int(i)) => Value::from(i.wrapping_neg()),
                        Some(Num::Float(f)) => float_value(-f),
                        None => Value::Null,
                    },
                })
            }
            Expr::Binary { op, left, right } => match op {
                BinaryOp::And => {
                    let l = truth(&left.eval(row, schema)?)?;
                    if l == Some(false) {
                        return Ok(Value::Bool(false));
                    }
                    let r = truth(&right.eval(row, schema)?)?;
                    Ok(match (l, r) {
                        (_, Some(false)) => Value::Bool(false),
                        (Some(true), Some(true)) => Value::Bool(true),
                        _ => Value::Null,
                    })
                }
                BinaryOp::Or => {
                    let l = truth(&left.eval(row, schema)?)?;
                    if l == Some(true) {
                        return Ok(Value::Bool(true));
                    }
                    let r = truth(&right.eval(row, schema)?)?;
                    Ok(match (l, r) {
                        (_, Some(true)) => Value::Bool(true),
                        (Some(false), Some(false)) => Value::Bool(false),
                        _ => Value::Null,
                    })
                }
                op => {
                    let l = left.eval(row, schema)?;
                    let r = right.eval(row, schema)?;
                    if l.is_null() || r.is_null() {
                        return Ok(Value::Null);
                    }
                    if op.is_arithmetic() {
                        Ok(arithmetic(*op, &l, &r))
                    } else {
                        let ord = compare(&l, &r);
                        Ok(Value::Bool(match op {
                            BinaryOp::Eq => ord == Ordering::Equal,
                            BinaryOp::NotEq => ord != Ordering::Equal,
                            BinaryOp::Lt => ord == Ordering::Less,
                            BinaryOp::LtEq => ord != Ordering::Greater,
                            BinaryOp::Gt => ord == Ordering::Greater,
                            _ => ord != Ordering::Less,
                        }))
                    }
                }
            },
            Expr::IsNull { expr, negated } => {
                let is_null = expr.eval(row, schema)?.is_null();
                Ok(Value::Bool(is_null != *negated))
            }
            Expr::Cast { expr, to } => Ok(to.cast(&expr.eval(row, schema)?)),
            Expr::Call { name, args } => {
                let values = args
                    .iter()
                    .map(|a| a.eval(row, schema))
                    .collect::<Result<Vec<_>, _>>()?;
                call(name, &values)
            }
        }
    }

    /// Evaluate against every row of a frame.
    pub fn evaluate(&self, frame: &Frame) -> Result<(DataType, Vec<Value>), FrameError> {
        let data_type = self.data_type(frame.schema())?;
        let values = frame
            .rows()
            .iter()
            .map(|row| self.eval(row, frame.schema()).map(|v| fit(data_type, v)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((data_type, values))
    }

    /// Add (or replace) a column holding this expression's value.
    pub fn project_into(&self, frame: &Frame, column: &str) -> Result<Frame, FrameError> {
        let (data_type, values) = self.evaluate(frame)?;
        frame.with_column(column, data_type, values)
    }

    /// Keep the rows for which this predicate is true. Null counts as false.
    pub fn filter(&self, frame: &Frame) -> Result<Frame, FrameError> {
        let data_type = self.data_type(frame.schema())?;
        if data_type != DataType::Boolean {
            return Err(FrameError::expression(format!(
                "filter condition must be boolean, found {data_type}"
            )));
        }
        let mask = frame
            .rows()
            .iter()
            .map(|row| Ok(self.eval(row, frame.schema())? == Value::Bool(true)))
            .collect::<Result<Vec<_>, FrameError>>()?;
        frame.retain_mask(&mask)
    }
}

fn resolve(schema: &Schema, name: &str) -> Result<usize, FrameError> {
    match schema.positions(name).as_slice() {
        [index] => Ok(*index),
        [] => Err(FrameError::ColumnNotFound {
            column: name.to_string(),
            available: schema.field_names(),
        }),
        _ => Err(FrameError::AmbiguousColumn {
            column: name.to_string(),
        }),
    }
}

fn literal_type(value: &Value) -> DataType {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) if i32::try_from(i).is_ok() => DataType::Integer,
            Some(_) => DataType::Long,
            None => DataType::Double,
        },
        Value::Bool(_) => DataType::Boolean,
        _ => DataType::String,
    }
}

fn arithmetic_type(op: BinaryOp, l: DataType, r: DataType) -> Result<DataType, FrameError> {
    for t in [l, r] {
        if !t.is_numeric() && t != DataType::String {
            return Err(FrameError::expression(format!(
                "cannot apply '{}' to a {t} value",
                op.symbol()
            )));
        }
    }
    Ok(if op == BinaryOp::Div || !l.is_integral() || !r.is_integral() {
        DataType::Double
    } else if l == DataType::Long || r == DataType::Long {
        DataType::Long
    } else {
        DataType::Integer
    })
}

fn call_type(name: &str, args: &[Expr], schema: &Schema) -> Result<DataType, FrameError> {
    let types = args
        .iter()
        .map(|a| a.data_type(schema))
        .collect::<Result<Vec<_>, _>>()?;
    let lower = name.to_ascii_lowercase();
    let (min, max) = match lower.as_str() {
        "concat" | "coalesce" => (1, usize::MAX),
        "concat_ws" => (2, usize::MAX),
        "upper" | "lower" | "trim" | "length" | "abs" | "year" | "month" | "day" => (1, 1),
        "round" => (1, 2),
        "substring" | "substr" => (2, 3),
        _ => {
            return Err(FrameError::expression(format!(
                "unknown function '{name}'"
            )));
        }
    };
    if args.len() < min || args.len() > max {
        return Err(FrameError::expression(format!(
            "function '{name}' called with {} argument(s)",
            args.len()
        )));
    }
    Ok(match lower.as_str() {
        "length" | "year" | "month" | "day" => DataType::Integer,
        "abs" if types[0].is_numeric() => types[0],
        "abs" => DataType::Double,
        "round" if types[0].is_integral() => types[0],
        "round" => DataType::Double,
        "coalesce" => args
            .iter()
            .zip(&types)
            .find(|(a, _)| !matches!(a, Expr::Literal(Value::Null)))
            .map(|(_, t)| *t)
            .unwrap_or(DataType::String),
        _ => DataType::String,
    })
}

// ---------------------------------------------------------------------------
// Evaluation helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

fn numeric(value: &Value) -> Option<Num> {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(Num::Int(i)),
            None => n.as_f64().map(Num::Float),
        },
        Value::String(s) => s.trim().parse::<f64>().ok().map(Num::Float),
        _ => None,
    }
}

fn float_value(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> Value {
    let (Some(a), Some(b)) = (numeric(l), numeric(r)) else {
        return Value::Null;
    };
    match (op, a, b) {
        (BinaryOp::Div, _, _) => {
            let d = b.as_f64();
            if d == 0.0 {
                Value::Null
            } else {
                float_value(a.as_f64() / d)
            }
        }
        (_, Num::Int(x), Num::Int(y)) => match op {
            BinaryOp::Add => Value::from(x.wrapping_add(y)),
            BinaryOp::Sub => Value::from(x.wrapping_sub(y)),
            BinaryOp::Mul => Value::from(x.wrapping_mul(y)),
            _ if y == 0 => Value::Null,
            _ => Value::from(x.wrapping_rem(y)),
        },
        _ => {
            let (x, y) = (a.as_f64(), b.as_f64());
            match op {
                BinaryOp::Add => float_value(x + y),
                BinaryOp::Sub => float_value(x - y),
                BinaryOp::Mul => float_value(x * y),
                _ if y == 0.0 => Value::Null,
                _ => float_value(x % y),
            }
        }
    }
}

fn compare(l: &Value, r: &Value) -> Ordering {
    match (l, r) {
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ => match (numeric(l), numeric(r)) {
            (Some(Num::Int(a)), Some(Num::Int(b))) => a.cmp(&b),
            (Some(a), Some(b)) => a.as_f64().total_cmp(&b.as_f64()),
            _ => text(l).cmp(&text(r)),
        },
    }
}

fn truth(value: &Value) -> Result<Option<bool>, FrameError> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        other => Err(FrameError::expression(format!(
            "expected a boolean, found {other}"
        ))),
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Narrow integer results to the width of their static type.
fn fit(data_type: DataType, value: Value) -> Value {
    let Some(i) = value.as_i64() else {
        return value;
    };
    match data_type {
        DataType::Integer => Value::from(i as i32),
        DataType::Short => Value::from(i as i16),
        DataType::Byte => Value::from(i as i8),
        DataType::Double | DataType::Float => float_value(i as f64),
        _ => value,
    }
}

fn call(name: &str, args: &[Value]) -> Result<Value, FrameError> {
    let lower = name.to_ascii_lowercase();
    let first = args.first().unwrap_or(&Value::Null);
    let value = match lower.as_str() {
        "coalesce" => args
            .iter()
            .find(|v| !v.is_null())
            .cloned()
            .unwrap_or(Value::Null),
        "concat" => {
            if args.iter().any(Value::is_null) {
                Value::Null
            } else {
                Value::String(args.iter().map(text).collect())
            }
        }
        "concat_ws" => {
            if first.is_null() {
                Value::Null
            } else {
                let parts: Vec<String> = args[1..]
                    .iter()
                    .filter(|v| !v.is_null())
                    .map(text)
                    .collect();
                Value::String(parts.join(&text(first)))
            }
        }
        _ if first.is_null() => Value::Null,
        "upper" => Value::String(text(first).to_uppercase()),
        "lower" => Value::String(text(first).to_lowercase()),
        "trim" => Value::String(text(first).trim().to_string()),
        "length" => Value::from(text(first).chars().count() as i64),
        "abs" => match numeric(first) {
            Some(Num::Int(i)) => Value::from(i.wrapping_abs()),
            Some(Num::Float(f)) => float_value(f.abs()),
            None => Value::Null,
        },
        "round" => {
            let scale = match args.get(1) {
                None => 0,
                Some(v) => v.as_i64().ok_or_else(|| {
                    FrameError::expression("round scale must be an integer")
                })?,
            };
            match numeric(first) {
                Some(Num::Int(i)) if scale >= 0 => Value::from(i),
                Some(n) => {
                    let factor = 10f64.powi(scale as i32);
                    float_value((n.as_f64() * factor).round() / factor)
                }
                None => Value::Null,
            }
        }
        "substring" | "substr" => {
            let chars: Vec<char> = text(first).chars().collect();
            let pos = args.get(1).and_then(Value::as_i64).unwrap_or(1);
            let len = args.get(2).map(|v| v.as_i64().unwrap_or(0));
            let start = match pos {
                p if p > 0 => (p - 1) as usize,
                0 => 0,
                p => chars.len().saturating_sub(p.unsigned_abs() as usize),
            };
            let end = match len {
                Some(l) if l <= 0 => start,
                Some(l) => start.saturating_add(l as usize),
                None => chars.len(),
            };
            let start = start.min(chars.len());
            let end = end.clamp(start, chars.len());
            Value::String(chars[start..end].iter().collect())
        }
        "year" | "month" | "day" => {
            let date = DataType::Date.cast(first);
            match date
                .as_str()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            {
                Some(d) => Value::from(match lower.as_str() {
                    "year" => d.year() as i64,
                    "month" => d.month() as i64,
                    _ => d.day() as i64,
                }),
                None => Value::Null,
            }
        }
        _ => {
            return Err(FrameError::expression(format!(
                "unknown function '{name}'"
            )));
        }
    };
    Ok(value)
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Quoted(String),
    Str(String),
    Int(i64),
    Float(f64),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "identifier '{s}'"),
            Token::Quoted(s) => write!(f, "identifier `{s}`"),
            Token::Str(s) => write!(f, "string '{s}'"),
            Token::Int(i) => write!(f, "number {i}"),
            Token::Float(x) => write!(f, "number {x}"),
            Token::Op(op) => write!(f, "'{op}'"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::Comma => f.write_str("','"),
        }
    }
}

const OPERATORS: [&str; 14] = [
    "<=", ">=", "<>", "!=", "==", "=", "<", ">", "+", "-", "*", "/", "%", "!",
];

fn tokenize(input: &str) -> Result<Vec<Token>, FrameError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            ',' => tokens.push(Token::Comma),
            '\'' | '"' | '`' => {
                let (content, next) = read_quoted(&chars, i)?;
                tokens.push(if c == '`' {
                    Token::Quoted(content)
                } else {
                    Token::Str(content)
                });
                i = next;
                continue;
            }
            c if c.is_ascii_digit()
                || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) =>
            {
                let (token, next) = read_number(&chars, i)?;
                tokens.push(token);
                i = next;
                continue;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
                continue;
            }
            _ => {
                let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
                let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) else {
                    return Err(FrameError::expression(format!(
                        "unexpected character '{c}' at position {i}"
                    )));
                };
                tokens.push(Token::Op(*op));
                i += op.len();
                continue;
            }
        }
        i += 1;
    }
    Ok(tokens)
}

/// Read a quoted run starting at `start`; a doubled quote character escapes itself.
fn read_quoted(chars: &[char], start: usize) -> Result<(String, usize), FrameError> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                out.push(quote);
                i += 2;
                continue;
            }
            return Ok((out, i + 1));
        }
        out.push(chars[i]);
        i += 1;
    }
    Err(FrameError::expression(format!(
        "unterminated {quote} quote starting at position {start}"
    )))
}

fn read_number(chars: &[char], start: usize) -> Result<(Token, usize), FrameError> {
    let mut i = start;
    let mut is_float = false;
    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_digit() {
            i += 1;
        } else if c == '.' && !is_float {
            is_float = true;
            i += 1;
        } else if (c == 'e' || c == 'E')
            && chars
                .get(i + 1)
                .is_some_and(|n| n.is_ascii_digit() || *n == '-' || *n == '+')
        {
            is_float = true;
            i += 2;
        } else {
            break;
        }
    }
    let literal: String = chars[start..i].iter().collect();
    let token = if is_float {
        literal.parse::<f64>().ok().map(Token::Float)
    } else {
        literal
            .parse::<i64>()
            .ok()
            .map(Token::Int)
            .or_else(|| literal.parse::<f64>().ok().map(Token::Float))
    };
    token
        .map(|t| (t, i))
        .ok_or_else(|| FrameError::expression(format!("invalid number '{literal}'")))
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

const RESERVED: [&str; 9] = ["and", "or", "not", "is", "null", "true", "false", "cast", "as"];

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let found = self.peek_keyword(keyword);
        if found {
            self.pos += 1;
        }
        found
    }

    fn eat_op(&mut self, ops: &[&str]) -> Option<&'static str> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), FrameError> {
        match self.advance() {
            Some(tok) if tok == expected => Ok(()),
            Some(tok) => Err(FrameError::expression(format!(
                "expected {expected}, found {tok}"
            ))),
            None => Err(FrameError::expression(format!(
                "expected {expected}, found end of input"
            ))),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, FrameError> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("or") {
            let right = self.parse_and()?;
            left = Expr::binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, FrameError> {
        let mut left = self.parse_not()?;
        while self.eat_keyword("and") {
            let right = self.parse_not()?;
            left = Expr::binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, FrameError> {
        if self.eat_keyword("not") || self.eat_op(&["!"]).is_some() {
            let expr = self.parse_not()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(expr),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, FrameError> {
        let left = self.parse_is_null()?;
        let Some(symbol) = self.eat_op(&["=", "==", "!=", "<>", "<", "<=", ">", ">="]) else {
            return Ok(left);
        };
        let op = match symbol {
            "=" | "==" => BinaryOp::Eq,
            "!=" | "<>" => BinaryOp::NotEq,
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::LtEq,
            ">" => BinaryOp::Gt,
            _ => BinaryOp::GtEq,
        };
        let right = self.parse_is_null()?;
        Ok(Expr::binary(op, left, right))
    }

    fn parse_is_null(&mut self) -> Result<Expr, FrameError> {
        let expr = self.parse_additive()?;
        if !self.eat_keyword("is") {
            return Ok(expr);
        }
        let negated = self.eat_keyword("not");
        if !self.eat_keyword("null") {
            return Err(FrameError::expression("expected NULL after IS"));
        }
        Ok(Expr::IsNull {
            expr: Box::new(expr),
            negated,
        })
    }

    fn parse_additive(&mut self) -> Result<Expr, FrameError> {
        let mut left = self.parse_multiplicative()?;
        while let Some(symbol) = self.eat_op(&["+", "-"]) {
            let op = if symbol == "+" {
                BinaryOp::Add
            } else {
                BinaryOp::Sub
            };
            let right = self.parse_multiplicative()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, FrameError> {
        let mut left = self.parse_unary()?;
        while let Some(symbol) = self.eat_op(&["*", "/", "%"]) {
            let op = match symbol {
                "*" => BinaryOp::Mul,
                "/" => BinaryOp::Div,
                _ => BinaryOp::Mod,
            };
            let right = self.parse_unary()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, FrameError> {
        match self.eat_op(&["-", "+"]) {
            Some("-") => {
                let expr = self.parse_unary()?;
                Ok(match expr {
                    Expr::Literal(Value::Number(n)) if n.as_i64().is_some() => {
                        Expr::Literal(Value::from(n.as_i64().unwrap_or_default().wrapping_neg()))
                    }
                    other => Expr::Unary {
                        op: UnaryOp::Neg,
                        expr: Box::new(other),
                    },
                })
            }
            Some(_) => self.parse_unary(),
            None => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, FrameError> {
        let Some(token) = self.advance() else {
            return Err(FrameError::expression("unexpected end of expression"));
        };
        match token {
            Token::Int(i) => Ok(Expr::Literal(Value::from(i))),
            Token::Float(f) => Ok(Expr::Literal(float_value(f))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Quoted(name) => Ok(Expr::Column(name)),
            Token::LParen => {
                let expr = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Token::Ident(ident) => self.parse_identifier(ident),
            other => Err(FrameError::expression(format!("unexpected {other}"))),
        }
    }

    fn parse_identifier(&mut self, ident: String) -> Result<Expr, FrameError> {
        let lower = ident.to_ascii_lowercase();
        match lower.as_str() {
            "true" => return Ok(Expr::Literal(Value::Bool(true))),
            "false" => return Ok(Expr::Literal(Value::Bool(false))),
            "null" => return Ok(Expr::Literal(Value::Null)),
            "cast" => {
                self.expect(Token::LParen)?;
                let expr = self.parse_or()?;
                if !self.eat_keyword("as") {
                    return Err(FrameError::expression("expected AS in CAST"));
                }
                let type_name = match self.advance() {
                    Some(Token::Ident(name)) => name,
                    _ => return Err(FrameError::expression("expected a type name in CAST")),
                };
                let to = type_name
                    .parse::<DataType>()
                    .map_err(|e| FrameError::expression(e.to_string()))?;
                self.expect(Token::RParen)?;
                return Ok(Expr::Cast {
                    expr: Box::new(expr),
                    to,
                });
            }
            _ if RESERVED.contains(&lower.as_str()) => {
                return Err(FrameError::expression(format!(
                    "unexpected keyword '{ident}'"
                )));
            }
            _ => {}
        }

        if self.peek() != Some(&Token::LParen) {
            return Ok(Expr::Column(ident));
        }
        self.pos += 1;
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
        } else {
            loop {
                args.push(self.parse_or()?);
                match self.advance() {
                    Some(Token::Comma) => continue,
                    Some(Token::RParen) => break,
                    Some(tok) => {
                        return Err(FrameError::expression(format!(
                            "expected ',' or ')' in call to '{ident}', found {tok}"
                        )));
                    }
                    None => {
                        return Err(FrameError::expression(format!(
                            "unclosed call to '{ident}'"
                        )));
                    }
                }
            }
        }
        Ok(Expr::Call { name: ident, args })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn frame() -> Frame {
        Frame::new(
            Schema::of(&[
                ("name", DataType::String),
                ("age", DataType::Integer),
                ("salary", DataType::Double),
                ("city", DataType::String),
            ]),
            vec![
                vec![json!("Alice"), json!(30), json!(5000.0), json!("Paris")],
                vec![json!("Bob"), json!(17), json!(1200.5), Value::Null],
                vec![json!("Carol"), Value::Null, json!(0.0), json!("Rome")],
            ],
        )
        .unwrap()
    }

    fn eval_first(text: &str) -> Value {
        let f = frame();
        Expr::parse(text).unwrap().eval(&f.rows()[0], f.schema()).unwrap()
    }

    #[test]
    fn test_parse_precedence() {
        let expr = Expr::parse("a + b * 2 > 10 AND NOT c").unwrap();
        let expected = Expr::binary(
            BinaryOp::And,
            Expr::binary(
                BinaryOp::Gt,
                Expr::binary(
                    BinaryOp::Add,
                    Expr::column("a"),
                    Expr::binary(BinaryOp::Mul, Expr::column("b"), Expr::literal(2)),
                ),
                Expr::literal(10),
            ),
            Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(Expr::column("c")),
            },
        );
        assert_eq!(expr, expected);
    }

    #[test]
    fn test_parse_errors() {
        assert!(Expr::parse("").is_err());
        assert!(Expr::parse("age >").is_err());
        assert!(Expr::parse("(age > 1").is_err());
        assert!(Expr::parse("name = 'open").is_err());
        assert!(Expr::parse("age > 1 1").is_err());
        assert!(Expr::parse("CAST(age AS decimal)").is_err());
        assert!(Expr::parse("age # 2").is_err());
    }

    #[test]
    fn test_arithmetic_and_types() {
        let f = frame();
        let expr = Expr::parse("2024 - age").unwrap();
        assert_eq!(expr.data_type(f.schema()).unwrap(), DataType::Integer);
        assert_eq!(eval_first("2024 - age"), json!(1994));
        assert_eq!(eval_first("age / 4"), json!(7.5));
        assert_eq!(eval_first("age % 7"), json!(2));
        assert_eq!(eval_first("age / 0"), Value::Null);
        assert_eq!(eval_first("salary * 2"), json!(10000.0));
        assert_eq!(eval_first("-age"), json!(-30));
        assert_eq!(eval_first("'5' + 1"), json!(6.0));
    }

    #[test]
    fn test_comparisons_and_logic() {
        assert_eq!(eval_first("age >= 30 AND city = 'Paris'"), json!(true));
        assert_eq!(eval_first("age <> 30 OR name == 'Alice'"), json!(true));
        assert_eq!(eval_first("NOT (age < 18)"), json!(true));
        assert_eq!(eval_first("age > 1.5"), json!(true));
        assert_eq!(eval_first("null = null"), Value::Null);
        assert_eq!(eval_first("null AND false"), json!(false));
        assert_eq!(eval_first("null OR true"), json!(true));
        assert_eq!(eval_first("city IS NOT NULL"), json!(true));
    }

    #[test]
    fn test_functions() {
        assert_eq!(eval_first("concat(name, '-', age)"), json!("Alice-30"));
        assert_eq!(eval_first("concat(name, null)"), Value::Null);
        assert_eq!(eval_first("concat_ws('/', name, null, city)"), json!("Alice/Paris"));
        assert_eq!(eval_first("upper(name)"), json!("ALICE"));
        assert_eq!(eval_first("length(trim('  ab '))"), json!(2));
        assert_eq!(eval_first("round(1234.5678, 2)"), json!(1234.57));
        assert_eq!(eval_first("round(2.5)"), json!(3.0));
        assert_eq!(eval_first("abs(-4)"), json!(4));
        assert_eq!(eval_first("coalesce(null, city, 'x')"), json!("Paris"));
        assert_eq!(eval_first("substring(name, 2, 3)"), json!("lic"));
        assert_eq!(eval_first("substring(name, -2)"), json!("ce"));
        assert_eq!(eval_first("year('1990-05-17')"), json!(1990));
        assert_eq!(eval_first("CAST(age AS string)"), json!("30"));
        assert_eq!(eval_first("`salary` > 100"), json!(true));
    }

    #[test]
    fn test_type_errors() {
        let schema = frame().schema().clone();
        let unknown = Expr::parse("nope + 1").unwrap().data_type(&schema);
        assert!(matches!(unknown, Err(FrameError::ColumnNotFound { .. })));
        assert!(Expr::parse("frobnicate(age)").unwrap().data_type(&schema).is_err());
        assert!(Expr::parse("upper(name, city)").unwrap().data_type(&schema).is_err());
        assert!(Expr::parse("age AND true").unwrap().data_type(&schema).is_err());
        assert!(Expr::parse("true + 1").unwrap().data_type(&schema).is_err());
    }

    #[test]
    fn test_filter_treats_null_as_false() {
        let filtered = Expr::parse("age > 18").unwrap().filter(&frame()).unwrap();
        assert_eq!(filtered.num_rows(), 1);
        assert_eq!(filtered.rows()[0][0], json!("Alice"));

        let err = Expr::parse("age + 1").unwrap().filter(&frame()).unwrap_err();
        assert!(err.to_string().contains("boolean"));
    }

    #[test]
    fn test_project_into_adds_typed_column() {
        let out = Expr::parse("2024 - age")
            .unwrap()
            .project_into(&frame(), "birth_year")
            .unwrap();
        assert_eq!(out.schema().field("birth_year").unwrap().data_type, DataType::Integer);
        assert_eq!(
            out.column("birth_year").unwrap(),
            vec![&json!(1994), &json!(2007), &Value::Null]
        );
    }
}
