//! Expression evaluation over variable bindings
//!
//! The engine never hard-codes an expression language: guards, condition
//! nodes, loop guards, wait predicates, breakpoint conditions and script
//! statements all go through an [`ExpressionEvaluator`]. [`DefaultEvaluator`]
//! implements a small side-effect-free language:
//!
//! - literals: numbers, `'single'` / `"double"` quoted strings, `true`, `false`, `null`
//! - variables with dot paths (`user.name`, `items.0`) and `$`-prefixed reserved names
//! - `!` and unary `-`, `* / %`, `+ -` (`+` concatenates when either side is a string)
//! - `< <= > >=`, `== !=`, short-circuit `&& ||`, parentheses
//! - `contains(a, b)`, `startsWith(a, b)`, `endsWith(a, b)`, `len(a)`
//!
//! Unknown variables evaluate to `null`.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::Value;

use crate::error::ExpressionError;

type EvalResult<T> = std::result::Result<T, ExpressionError>;

/// Pluggable evaluator for guard and script expressions
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluate an expression to a JSON value
    fn evaluate(&self, expression: &str, bindings: &HashMap<String, Value>) -> EvalResult<Value>;

    /// Evaluate an expression and reduce it to its truthiness
    fn evaluate_bool(&self, expression: &str, bindings: &HashMap<String, Value>) -> EvalResult<bool> {
        self.evaluate(expression, bindings).map(|v| is_truthy(&v))
    }
}

/// The built-in expression language
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEvaluator;

impl ExpressionEvaluator for DefaultEvaluator {
    fn evaluate(&self, expression: &str, bindings: &HashMap<String, Value>) -> EvalResult<Value> {
        let normalized = normalize_expression(expression);
        let ast = Parser::new(tokenize(&normalized)?).parse()?;
        eval(&ast, bindings)
    }
}

/// Truthiness shared by guards, conditions and breakpoints
///
/// `null`, `false`, `0`, `""`, `"false"`, `"0"`, `[]` and `{}` are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "false" && s != "0",
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Resolve a variable reference
///
/// An exact key match wins; otherwise the path is split on `.` and walked
/// through objects and array indices.
pub fn lookup<'a>(path: &str, bindings: &'a HashMap<String, Value>) -> Option<&'a Value> {
    if let Some(value) = bindings.get(path) {
        return Some(value);
    }

    let mut parts = path.split('.');
    let mut current = bindings.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Replace smart quotes and exotic spaces picked up from copy-paste
fn normalize_expression(expr: &str) -> String {
    expr.replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{00A0}', '\u{2009}', '\u{202F}'], " ")
}

// ---------------------------------------------------------------------------
// Tokenizer

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

const TWO_CHAR_OPS: [&str; 6] = ["==", "!=", "<=", ">=", "&&", "||"];
const ONE_CHAR_OPS: [&str; 8] = ["<", ">", "!", "+", "-", "*", "/", "%"];

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$' || c == '.'
}

fn tokenize(input: &str) -> EvalResult<Vec<(usize, Token)>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let n = text
                .parse::<f64>()
                .map_err(|_| ExpressionError::parse(start, format!("invalid number '{}'", text)))?;
            tokens.push((start, Token::Number(n)));
            continue;
        }

        if c == '"' || c == '\'' {
            let quote = c;
            let mut text = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err(ExpressionError::parse(start, "unterminated string")),
                    Some(&ch) if ch == quote => {
                        i += 1;
                        break;
                    }
                    Some(&'\\') => {
                        let escaped = *chars
                            .get(i + 1)
                            .ok_or_else(|| ExpressionError::parse(i, "dangling escape"))?;
                        text.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                        i += 2;
                    }
                    Some(&ch) => {
                        text.push(ch);
                        i += 1;
                    }
                }
            }
            tokens.push((start, Token::Str(text)));
            continue;
        }

        if is_ident_start(c) {
            while i < chars.len() && is_ident_char(chars[i]) {
                i += 1;
            }
            let name: String = chars[start..i].iter().collect();
            tokens.push((start, Token::Ident(name)));
            continue;
        }

        match c {
            '(' => tokens.push((start, Token::LParen)),
            ')' => tokens.push((start, Token::RParen)),
            ',' => tokens.push((start, Token::Comma)),
            _ => {
                let pair: String = chars[i..chars.len().min(i + 2)].iter().collect();
                if let Some(op) = TWO_CHAR_OPS.iter().find(|op| **op == pair) {
                    tokens.push((start, Token::Op(*op)));
                    i += 2;
                    continue;
                }
                let single = c.to_string();
                match ONE_CHAR_OPS.iter().find(|op| **op == single) {
                    Some(op) => tokens.push((start, Token::Op(*op))),
                    None => {
                        return Err(ExpressionError::parse(
                            start,
                            format!("unexpected character '{}'", c),
                        ))
                    }
                }
            }
        }
        i += 1;
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser

#[derive(Debug, Clone, Copy, PartialEq)]
enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "%" => BinaryOp::Rem,
            "==" => BinaryOp::Eq,
            "!=" => BinaryOp::Ne,
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::Le,
            ">" => BinaryOp::Gt,
            ">=" => BinaryOp::Ge,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Var(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<(usize, Token)>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn parse(mut self) -> EvalResult<Expr> {
        if self.tokens.is_empty() {
            return Err(ExpressionError::parse(0, "empty expression"));
        }
        let expr = self.parse_or()?;
        if let Some((position, token)) = self.tokens.get(self.pos) {
            return Err(ExpressionError::parse(
                *position,
                format!("unexpected token {:?}", token),
            ));
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(0, |(p, _)| *p)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        token
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

    fn expect(&mut self, expected: Token) -> EvalResult<()> {
        let position = self.position();
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(ExpressionError::parse(
                position,
                format!("expected {:?}, found {:?}", expected, token),
            )),
            None => Err(ExpressionError::parse(
                position,
                format!("expected {:?}, found end of expression", expected),
            )),
        }
    }

    fn parse_or(&mut self) -> EvalResult<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_op(&["||"]).is_some() {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> EvalResult<Expr> {
        let mut left = self.parse_binary_level(0)?;
        while self.eat_op(&["&&"]).is_some() {
            let right = self.parse_binary_level(0)?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    /// Left-associative binary levels, loosest first
    fn parse_binary_level(&mut self, level: usize) -> EvalResult<Expr> {
        const LEVELS: [&[&str]; 4] = [
            &["==", "!="],
            &["<", "<=", ">", ">="],
            &["+", "-"],
            &["*", "/", "%"],
        ];

        if level == LEVELS.len() {
            return self.parse_unary();
        }

        let mut left = self.parse_binary_level(level + 1)?;
        while let Some(symbol) = self.eat_op(LEVELS[level]) {
            let right = self.parse_binary_level(level + 1)?;
            let op = BinaryOp::from_symbol(symbol)
                .ok_or_else(|| ExpressionError::parse(self.position(), "unknown operator"))?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> EvalResult<Expr> {
        if self.eat_op(&["!"]).is_some() {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_unary()?)));
        }
        if self.eat_op(&["-"]).is_some() {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> EvalResult<Expr> {
        let position = self.position();
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Literal(number(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ if self.peek() == Some(&Token::LParen) => {
                    self.pos += 1;
                    let args = self.parse_args()?;
                    Ok(Expr::Call(name, args))
                }
                _ => Ok(Expr::Var(name)),
            },
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(token) => Err(ExpressionError::parse(
                position,
                format!("unexpected token {:?}", token),
            )),
            None => Err(ExpressionError::parse(position, "unexpected end of expression")),
        }
    }

    fn parse_args(&mut self) -> EvalResult<Vec<Expr>> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.parse_or()?);
            match self.peek() {
                Some(Token::Comma) => self.pos += 1,
                _ => break,
            }
        }
        self.expect(Token::RParen)?;
        Ok(args)
    }
}

// ---------------------------------------------------------------------------
// Evaluation

fn eval(expr: &Expr, bindings: &HashMap<String, Value>) -> EvalResult<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Var(path) => Ok(lookup(path, bindings).cloned().unwrap_or(Value::Null)),
        Expr::Unary(UnaryOp::Not, inner) => Ok(Value::Bool(!is_truthy(&eval(inner, bindings)?))),
        Expr::Unary(UnaryOp::Neg, inner) => {
            let value = eval(inner, bindings)?;
            let n = value
                .as_f64()
                .ok_or_else(|| ExpressionError::eval(format!("cannot negate {}", value)))?;
            Ok(number(-n))
        }
        Expr::And(left, right) => {
            if !is_truthy(&eval(left, bindings)?) {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(is_truthy(&eval(right, bindings)?)))
        }
        Expr::Or(left, right) => {
            if is_truthy(&eval(left, bindings)?) {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(is_truthy(&eval(right, bindings)?)))
        }
        Expr::Binary(op, left, right) => {
            binary(*op, eval(left, bindings)?, eval(right, bindings)?)
        }
        Expr::Call(name, args) => {
            let values = args
                .iter()
                .map(|arg| eval(arg, bindings))
                .collect::<EvalResult<Vec<_>>>()?;
            call(name, &values)
        }
    }
}

/// Integral results stay integers so `1 + 1 == json!(2)`
fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) if left.is_number() && right.is_number() => a == b,
        _ => left == right,
    }
}

fn numeric(op: BinaryOp, left: &Value, right: &Value) -> EvalResult<(f64, f64)> {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(ExpressionError::eval(format!(
            "operator {:?} needs numbers, got {} and {}",
            op, left, right
        ))),
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> EvalResult<Value> {
    match op {
        BinaryOp::Add if left.is_string() || right.is_string() => {
            Ok(Value::String(format!("{}{}", display(&left), display(&right))))
        }
        BinaryOp::Add => numeric(op, &left, &right).map(|(a, b)| number(a + b)),
        BinaryOp::Sub => numeric(op, &left, &right).map(|(a, b)| number(a - b)),
        BinaryOp::Mul => numeric(op, &left, &right).map(|(a, b)| number(a * b)),
        BinaryOp::Div | BinaryOp::Rem => {
            let (a, b) = numeric(op, &left, &right)?;
            if b == 0.0 {
                return Err(ExpressionError::eval("division by zero"));
            }
            Ok(number(if op == BinaryOp::Div { a / b } else { a % b }))
        }
        BinaryOp::Eq => Ok(Value::Bool(loosely_equal(&left, &right))),
        BinaryOp::Ne => Ok(Value::Bool(!loosely_equal(&left, &right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(&left, &right)?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
    }
}

fn compare(left: &Value, right: &Value) -> EvalResult<Ordering> {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => {
            let (a, b) = numeric(BinaryOp::Lt, left, right)?;
            a.partial_cmp(&b)
                .ok_or_else(|| ExpressionError::eval("cannot compare NaN"))
        }
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(ExpressionError::eval(format!(
            "cannot compare {} with {}",
            left, right
        ))),
    }
}

fn call(name: &str, args: &[Value]) -> EvalResult<Value> {
    let arity = |expected: usize| {
        if args.len() == expected {
            Ok(())
        } else {
            Err(ExpressionError::eval(format!(
                "{}() takes {} argument(s), got {}",
                name,
                expected,
                args.len()
            )))
        }
    };

    match name {
        "contains" => {
            arity(2)?;
            let found = match (&args[0], &args[1]) {
                (Value::Null, _) => false,
                (Value::String(haystack), needle) => haystack.contains(&display(needle)),
                (Value::Array(items), needle) => items.iter().any(|item| loosely_equal(item, needle)),
                (Value::Object(map), Value::String(key)) => map.contains_key(key),
                (other, _) => {
                    return Err(ExpressionError::eval(format!("contains() cannot search {}", other)))
                }
            };
            Ok(Value::Bool(found))
        }
        "startsWith" | "endsWith" => {
            arity(2)?;
            match (&args[0], &args[1]) {
                (Value::Null, _) => Ok(Value::Bool(false)),
                (Value::String(s), affix) => {
                    let affix = display(affix);
                    Ok(Value::Bool(if name == "startsWith" {
                        s.starts_with(&affix)
                    } else {
                        s.ends_with(&affix)
                    }))
                }
                (other, _) => Err(ExpressionError::eval(format!(
                    "{}() needs a string, got {}",
                    name, other
                ))),
            }
        }
        "len" => {
            arity(1)?;
            let len = match &args[0] {
                Value::Null => 0,
                Value::String(s) => s.chars().count(),
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                other => return Err(ExpressionError::eval(format!("len() of {}", other))),
            };
            Ok(Value::from(len))
        }
        _ => Err(ExpressionError::eval(format!("unknown function '{}'", name))),
    }
}
