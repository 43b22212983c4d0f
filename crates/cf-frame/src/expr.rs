//! Expression engine for derived columns and filter predicates.
//!
//! Supports arithmetic (+, -, *, /), comparisons (==, !=, <, <=, >, >=),
//! short-circuit boolean operators (&&, ||, !), the ternary `c ? a : b`,
//! sequence indexing (`muons_q[0]`) and built-in functions (abs, sqrt, log,
//! exp, pow, min, max, sin, cos, tan, asin, acos, atan, atan2, size, sum).
//!
//! Boolean results are `1.0` / `0.0`; a value is true when `> 0`.

use cf_core::{EvalError, EvalResult, Value};

use crate::row::Columns;

/// Compile-time failure (syntax, unknown function, arity).
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError(pub String);

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ParseError {}

type ParseResult<T> = std::result::Result<T, ParseError>;

// ── AST ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Expr {
    Number(f64),
    Var(usize), // index into required_columns
    Index(usize, Box<Expr>),
    Size(usize),
    Sum(usize),
    UnaryNeg(Box<Expr>),
    UnaryNot(Box<Expr>),
    BinOp(BinOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

#[derive(Debug, Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy)]
enum Func {
    Abs,
    Sqrt,
    Log,
    Exp,
    Pow,
    Min,
    Max,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
}

impl Func {
    fn lookup(name: &str) -> Option<(Func, usize)> {
        let f = match name {
            "abs" => (Func::Abs, 1),
            "sqrt" => (Func::Sqrt, 1),
            "log" => (Func::Log, 1),
            "exp" => (Func::Exp, 1),
            "pow" => (Func::Pow, 2),
            "min" => (Func::Min, 2),
            "max" => (Func::Max, 2),
            "sin" => (Func::Sin, 1),
            "cos" => (Func::Cos, 1),
            "tan" => (Func::Tan, 1),
            "asin" => (Func::Asin, 1),
            "acos" => (Func::Acos, 1),
            "atan" => (Func::Atan, 1),
            "atan2" => (Func::Atan2, 2),
            _ => return None,
        };
        Some(f)
    }
}

// ── Compiled expression ────────────────────────────────────────

/// A compiled expression ready for per-event evaluation.
///
/// Identifiers are column names, resolved against the row at evaluation time.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    ast: Expr,
    source: String,
    /// Column names referenced by this expression (ordered by first occurrence).
    pub required_columns: Vec<String>,
}

impl CompiledExpr {
    /// Parse and compile an expression string.
    pub fn compile(input: &str) -> ParseResult<Self> {
        let tokens = tokenize(input)?;
        let mut parser = Parser::new(&tokens);
        let ast = parser.parse_ternary()?;
        if parser.pos < parser.tokens.len() {
            return Err(ParseError(format!(
                "unexpected token after expression: {:?}",
                parser.tokens[parser.pos]
            )));
        }
        let columns = std::mem::take(&mut parser.columns);
        Ok(CompiledExpr { ast, source: input.to_string(), required_columns: columns })
    }

    /// The original expression text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against the given columns.
    pub fn eval(&self, cols: &dyn Columns) -> EvalResult<f64> {
        Eval { cols, names: &self.required_columns }.eval(&self.ast)
    }

    /// Evaluate as a predicate (`> 0` is true).
    pub fn eval_bool(&self, cols: &dyn Columns) -> EvalResult<bool> {
        Ok(self.eval(cols)? > 0.0)
    }
}

// ── Evaluation ─────────────────────────────────────────────────

struct Eval<'a> {
    cols: &'a dyn Columns,
    names: &'a [String],
}

#[inline]
fn truth(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

impl Eval<'_> {
    fn column(&self, i: usize) -> EvalResult<&Value> {
        self.cols.column(&self.names[i])
    }

    fn eval(&self, e: &Expr) -> EvalResult<f64> {
        Ok(match e {
            Expr::Number(n) => *n,
            Expr::Var(i) => match self.column(*i)? {
                Value::Scalar(x) => *x,
                other => {
                    return Err(EvalError::TypeMismatch {
                        column: self.names[*i].clone(),
                        expected: "scalar",
                        found: other.kind(),
                    });
                }
            },
            Expr::Index(i, idx) => {
                let raw = self.eval(idx)?;
                let name = &self.names[*i];
                if !raw.is_finite() || raw < 0.0 || raw.fract() != 0.0 {
                    return Err(EvalError::InvalidIndex { column: name.clone(), index: raw });
                }
                let k = raw as usize;
                let col = self.column(*i)?;
                match col.numeric_element(k) {
                    Some(Some(x)) => x,
                    Some(None) => {
                        return Err(EvalError::IndexOutOfRange {
                            column: name.clone(),
                            index: k,
                            len: col.len().unwrap_or(0),
                        });
                    }
                    None => {
                        return Err(EvalError::TypeMismatch {
                            column: name.clone(),
                            expected: "values",
                            found: col.kind(),
                        });
                    }
                }
            }
            Expr::Size(i) => match self.column(*i)?.len() {
                Some(n) => n as f64,
                None => {
                    return Err(EvalError::TypeMismatch {
                        column: self.names[*i].clone(),
                        expected: "sequence",
                        found: "scalar",
                    });
                }
            },
            Expr::Sum(i) => {
                let col = self.column(*i)?;
                match col.numbers() {
                    Some(xs) if !matches!(col, Value::Scalar(_)) => xs.iter().sum(),
                    _ => {
                        return Err(EvalError::TypeMismatch {
                            column: self.names[*i].clone(),
                            expected: "values",
                            found: col.kind(),
                        });
                    }
                }
            }
            Expr::UnaryNeg(a) => -self.eval(a)?,
            Expr::UnaryNot(a) => truth(self.eval(a)? <= 0.0),
            Expr::Ternary(c, a, b) => {
                if self.eval(c)? > 0.0 {
                    self.eval(a)?
                } else {
                    self.eval(b)?
                }
            }
            // Short-circuit so a size guard can protect an index on its right.
            Expr::BinOp(BinOp::And, a, b) => truth(self.eval(a)? > 0.0 && self.eval(b)? > 0.0),
            Expr::BinOp(BinOp::Or, a, b) => truth(self.eval(a)? > 0.0 || self.eval(b)? > 0.0),
            Expr::BinOp(op, a, b) => {
                let lhs = self.eval(a)?;
                let rhs = self.eval(b)?;
                match op {
                    BinOp::Add => lhs + rhs,
                    BinOp::Sub => lhs - rhs,
                    BinOp::Mul => lhs * rhs,
                    BinOp::Div => lhs / rhs,
                    BinOp::Eq => truth((lhs - rhs).abs() < f64::EPSILON),
                    BinOp::Ne => truth((lhs - rhs).abs() >= f64::EPSILON),
                    BinOp::Lt => truth(lhs < rhs),
                    BinOp::Le => truth(lhs <= rhs),
                    BinOp::Gt => truth(lhs > rhs),
                    BinOp::Ge => truth(lhs >= rhs),
                    BinOp::And | BinOp::Or => unreachable!("handled above"),
                }
            }
            Expr::Call(f, args) => {
                let a0 = self.eval(&args[0])?;
                match f {
                    Func::Abs => a0.abs(),
                    Func::Sqrt => a0.sqrt(),
                    Func::Log => a0.ln(),
                    Func::Exp => a0.exp(),
                    Func::Sin => a0.sin(),
                    Func::Cos => a0.cos(),
                    Func::Tan => a0.tan(),
                    Func::Asin => a0.asin(),
                    Func::Acos => a0.acos(),
                    Func::Atan => a0.atan(),
                    Func::Pow => a0.powf(self.eval(&args[1])?),
                    Func::Min => a0.min(self.eval(&args[1])?),
                    Func::Max => a0.max(self.eval(&args[1])?),
                    Func::Atan2 => a0.atan2(self.eval(&args[1])?),
                }
            }
        })
    }
}

// ── Tokenizer ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Question,
    Colon,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
}

fn tokenize(input: &str) -> ParseResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // Two-character operators
        if i + 1 < chars.len() {
            let two: String = chars[i..i + 2].iter().collect();
            let tok = match two.as_str() {
                "&&" => Some(Token::And),
                "||" => Some(Token::Or),
                "==" => Some(Token::Eq),
                "!=" => Some(Token::Ne),
                "<=" => Some(Token::Le),
                ">=" => Some(Token::Ge),
                _ => None,
            };
            if let Some(t) = tok {
                tokens.push(t);
                i += 2;
                continue;
            }
        }

        let single = match c {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            ',' => Some(Token::Comma),
            '?' => Some(Token::Question),
            ':' => Some(Token::Colon),
            '<' => Some(Token::Lt),
            '>' => Some(Token::Gt),
            '!' => Some(Token::Not),
            _ => None,
        };
        if let Some(t) = single {
            tokens.push(t);
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_ascii_digit()
                    || chars[i] == '.'
                    || chars[i] == 'e'
                    || chars[i] == 'E'
                    || ((chars[i] == '+' || chars[i] == '-')
                        && i > start
                        && (chars[i - 1] == 'e' || chars[i - 1] == 'E')))
            {
                i += 1;
            }
            let s: String = chars[start..i].iter().collect();
            let n: f64 =
                s.parse().map_err(|_| ParseError(format!("invalid number: '{}'", s)))?;
            tokens.push(Token::Num(n));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            // '#' and '.' allow raw input names such as `Muon#0.index`.
            while i < chars.len()
                && (chars[i].is_ascii_alphanumeric()
                    || chars[i] == '_'
                    || chars[i] == '#'
                    || chars[i] == '.')
            {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            return Err(ParseError(format!("unexpected character: '{}'", c)));
        }
    }

    Ok(tokens)
}

// ── Parser (recursive descent) ─────────────────────────────────

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    columns: Vec<String>,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0, columns: Vec::new() }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: &Token) -> ParseResult<()> {
        match self.advance() {
            Some(t) if t == expected => Ok(()),
            other => Err(ParseError(format!("expected {:?}, got {:?}", expected, other))),
        }
    }

    fn resolve_var(&mut self, name: &str) -> usize {
        if let Some(i) = self.columns.iter().position(|b| b == name) {
            i
        } else {
            self.columns.push(name.to_string());
            self.columns.len() - 1
        }
    }

    // ── Grammar rules ──────────────────────────────────────────

    fn parse_ternary(&mut self) -> ParseResult<Expr> {
        let cond = self.parse_or()?;
        if !matches!(self.peek(), Some(Token::Question)) {
            return Ok(cond);
        }
        self.advance();
        let then = self.parse_ternary()?;
        self.expect(&Token::Colon)?;
        let otherwise = self.parse_ternary()?;
        Ok(Expr::Ternary(Box::new(cond), Box::new(then), Box::new(otherwise)))
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::BinOp(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_cmp()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            let rhs = self.parse_cmp()?;
            lhs = Expr::BinOp(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> ParseResult<Expr> {
        let lhs = self.parse_add()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_add()?;
        Ok(Expr::BinOp(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_add(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_mul()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                let e = self.parse_unary()?;
                Ok(Expr::UnaryNeg(Box::new(e)))
            }
            Some(Token::Not) => {
                self.advance();
                let e = self.parse_unary()?;
                Ok(Expr::UnaryNot(Box::new(e)))
            }
            _ => self.parse_atom(),
        }
    }

    fn parse_column_arg(&mut self, func: &str) -> ParseResult<usize> {
        match self.advance().cloned() {
            Some(Token::Ident(name)) => {
                self.expect(&Token::RParen)?;
                Ok(self.resolve_var(&name))
            }
            other => Err(ParseError(format!("{func}() takes a column name, got {:?}", other))),
        }
    }

    fn parse_atom(&mut self) -> ParseResult<Expr> {
        match self.advance().cloned() {
            Some(Token::Num(n)) => Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let e = self.parse_ternary()?;
                self.expect(&Token::RParen)?;
                Ok(e)
            }
            Some(Token::Ident(name)) => match self.peek() {
                Some(Token::LParen) => {
                    self.advance(); // consume '('
                    match name.as_str() {
                        "size" => return Ok(Expr::Size(self.parse_column_arg("size")?)),
                        "sum" => return Ok(Expr::Sum(self.parse_column_arg("sum")?)),
                        _ => {}
                    }
                    let (func, arity) = Func::lookup(&name)
                        .ok_or_else(|| ParseError(format!("unknown function: '{}'", name)))?;
                    let mut args = vec![self.parse_ternary()?];
                    while matches!(self.peek(), Some(Token::Comma)) {
                        self.advance();
                        args.push(self.parse_ternary()?);
                    }
                    self.expect(&Token::RParen)?;
                    if args.len() != arity {
                        return Err(ParseError(format!(
                            "{}() takes {} argument(s), got {}",
                            name,
                            arity,
                            args.len()
                        )));
                    }
                    Ok(Expr::Call(func, args))
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let idx = self.parse_ternary()?;
                    self.expect(&Token::RBracket)?;
                    Ok(Expr::Index(self.resolve_var(&name), Box::new(idx)))
                }
                _ => Ok(Expr::Var(self.resolve_var(&name))),
            },
            other => Err(ParseError(format!(
                "expected number, identifier, or '(', got {:?}",
                other
            ))),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────
