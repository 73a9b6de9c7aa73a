//! Embedded jq-dialect expression engine
//!
//! A small expression language evaluated against a [`Value`]: identity and
//! field/index navigation, pipes, `//`, `+`/`-`, `==`/`!=`, array and object
//! construction, `def` definitions, `import`ed modules, and custom functions
//! supplied by the host. The surface mirrors jq where it overlaps; there are
//! no streams, so every expression produces exactly one result.
//!
//! The engine is used through a three-step contract:
//! [`parse`] → [`Query`], [`Compiler::compile`] → [`Code`],
//! [`Code::run`] → one-item result iterator.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::value::Value;

/// Maximum depth of nested `def` calls before evaluation is aborted
const MAX_CALL_DEPTH: usize = 200;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Failures raised by the expression engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The expression text could not be parsed
    Parse(String),
    /// The parsed query references something unknown
    Compile(String),
    /// Evaluation failed
    Run(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Parse(m) => write!(f, "parse error: {}", m),
            EngineError::Compile(m) => write!(f, "compile error: {}", m),
            EngineError::Run(m) => write!(f, "run error: {}", m),
        }
    }
}

impl std::error::Error for EngineError {}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Identity,
    Literal(Value),
    Variable(String),
    Field(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Pipe(Box<Expr>, Box<Expr>),
    Alt(Box<Expr>, Box<Expr>),
    BinOp(Box<Expr>, BinOp, Box<Expr>),
    Neg(Box<Expr>),
    Array(Vec<Expr>),
    Object(Vec<(String, Option<Expr>)>),
    Call {
        module: Option<String>,
        name: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Eq,
    Ne,
}

/// A named definition (`def name: body;` / `def name(a; b): body;`)
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Def {
    name: String,
    params: Vec<String>,
    body: Expr,
}

/// A parsed program: imports, definitions, and one expression
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    imports: Vec<Import>,
    defs: Vec<Def>,
    body: Expr,
}

#[derive(Debug, Clone, PartialEq)]
struct Import {
    module: String,
    alias: String,
}

/// A named bundle of definitions, importable from expressions
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    name: String,
    defs: Vec<Def>,
}

impl Module {
    /// Parse module source (definitions only) under the given name
    pub fn parse(name: impl Into<String>, source: &str) -> EngineResult<Module> {
        let tokens = lex(source)?;
        let mut parser = Parser::new(tokens);
        let mut defs = Vec::new();
        while !parser.at_eof() {
            defs.push(parser.parse_def()?);
        }
        Ok(Module {
            name: name.into(),
            defs,
        })
    }

    /// The module's import name
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A custom function made available to expressions
#[derive(Clone)]
pub struct NativeFn {
    pub name: String,
    pub min_arity: usize,
    pub max_arity: usize,
    pub f: Arc<dyn Fn(&Value, &[Value]) -> std::result::Result<Value, String> + Send + Sync>,
}

impl NativeFn {
    pub fn new<F>(name: impl Into<String>, min_arity: usize, max_arity: usize, f: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            min_arity,
            max_arity,
            f: Arc::new(f),
        }
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NativeFn({}/{}..{})",
            self.name, self.min_arity, self.max_arity
        )
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Dot,
    LBrack,
    RBrack,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Pipe,
    Comma,
    Semi,
    Colon,
    DColon,
    Plus,
    Minus,
    EqEq,
    NotEq,
    AltOp,
    Def,
    ImportKw,
    AsKw,
    True,
    False,
    NullKw,
    Ident(String),
    Var(String),
    Int(i64),
    Float(f64),
    Str(String),
}

fn lex(source: &str) -> EngineResult<Vec<Tok>> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\r' | '\n' => {
                chars.next();
            }
            '#' => {
                while matches!(chars.peek(), Some(&c) if c != '\n') {
                    chars.next();
                }
            }
            '.' => {
                chars.next();
                tokens.push(Tok::Dot);
            }
            '[' => {
                chars.next();
                tokens.push(Tok::LBrack);
            }
            ']' => {
                chars.next();
                tokens.push(Tok::RBrack);
            }
            '{' => {
                chars.next();
                tokens.push(Tok::LBrace);
            }
            '}' => {
                chars.next();
                tokens.push(Tok::RBrace);
            }
            '(' => {
                chars.next();
                tokens.push(Tok::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Tok::RParen);
            }
            '|' => {
                chars.next();
                tokens.push(Tok::Pipe);
            }
            ',' => {
                chars.next();
                tokens.push(Tok::Comma);
            }
            ';' => {
                chars.next();
                tokens.push(Tok::Semi);
            }
            '+' => {
                chars.next();
                tokens.push(Tok::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Tok::Minus);
            }
            ':' => {
                chars.next();
                if chars.peek() == Some(&':') {
                    chars.next();
                    tokens.push(Tok::DColon);
                } else {
                    tokens.push(Tok::Colon);
                }
            }
            '/' => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    chars.next();
                    tokens.push(Tok::AltOp);
                } else {
                    return Err(EngineError::Parse("unexpected character '/'".into()));
                }
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Tok::EqEq);
                } else {
                    return Err(EngineError::Parse("unexpected character '='".into()));
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Tok::NotEq);
                } else {
                    return Err(EngineError::Parse("unexpected character '!'".into()));
                }
            }
            '$' => {
                chars.next();
                let name = lex_ident(&mut chars);
                if name.is_empty() {
                    return Err(EngineError::Parse("expected a variable name after '$'".into()));
                }
                tokens.push(Tok::Var(format!("${}", name)));
            }
            '"' => {
                chars.next();
                tokens.push(Tok::Str(lex_string(&mut chars)?));
            }
            c if c.is_ascii_digit() => {
                tokens.push(lex_number(&mut chars)?);
            }
            c if c == '_' || c.is_ascii_alphabetic() => {
                let ident = lex_ident(&mut chars);
                tokens.push(match ident.as_str() {
                    "def" => Tok::Def,
                    "import" => Tok::ImportKw,
                    "as" => Tok::AsKw,
                    "true" => Tok::True,
                    "false" => Tok::False,
                    "null" => Tok::NullKw,
                    _ => Tok::Ident(ident),
                });
            }
            other => {
                return Err(EngineError::Parse(format!(
                    "unexpected character '{}'",
                    other
                )))
            }
        }
    }

    Ok(tokens)
}

fn lex_ident(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut ident = String::new();
    while matches!(chars.peek(), Some(&c) if c == '_' || c.is_ascii_alphanumeric()) {
        ident.push(chars.next().unwrap());
    }
    ident
}

fn lex_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> EngineResult<Tok> {
    let mut text = String::new();
    let mut is_float = false;
    while matches!(chars.peek(), Some(&c) if c.is_ascii_digit()) {
        text.push(chars.next().unwrap());
    }
    if chars.peek() == Some(&'.') {
        // Only a fraction if a digit follows; `.foo` after a number is navigation
        let mut lookahead = chars.clone();
        lookahead.next();
        if matches!(lookahead.peek(), Some(c) if c.is_ascii_digit()) {
            is_float = true;
            text.push(chars.next().unwrap());
            while matches!(chars.peek(), Some(&c) if c.is_ascii_digit()) {
                text.push(chars.next().unwrap());
            }
        }
    }
    if matches!(chars.peek(), Some(&'e') | Some(&'E')) {
        is_float = true;
        text.push(chars.next().unwrap());
        if matches!(chars.peek(), Some(&'+') | Some(&'-')) {
            text.push(chars.next().unwrap());
        }
        if !matches!(chars.peek(), Some(c) if c.is_ascii_digit()) {
            return Err(EngineError::Parse(format!("malformed number: {}", text)));
        }
        while matches!(chars.peek(), Some(&c) if c.is_ascii_digit()) {
            text.push(chars.next().unwrap());
        }
    }
    if is_float {
        text.parse::<f64>()
            .map(Tok::Float)
            .map_err(|_| EngineError::Parse(format!("malformed number: {}", text)))
    } else {
        match text.parse::<i64>() {
            Ok(i) => Ok(Tok::Int(i)),
            Err(_) => text
                .parse::<f64>()
                .map(Tok::Float)
                .map_err(|_| EngineError::Parse(format!("malformed number: {}", text))),
        }
    }
}

fn lex_string(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> EngineResult<String> {
    let mut out = String::new();
    loop {
        match chars.next() {
            None => return Err(EngineError::Parse("unterminated string".into())),
            Some('"') => return Ok(out),
            Some('\\') => match chars.next() {
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some('/') => out.push('/'),
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('b') => out.push('\u{0008}'),
                Some('f') => out.push('\u{000C}'),
                Some('u') => {
                    let hi = lex_hex4(chars)?;
                    if (0xD800..0xDC00).contains(&hi) {
                        // Surrogate pair
                        if chars.next() != Some('\\') || chars.next() != Some('u') {
                            return Err(EngineError::Parse("lone surrogate in string".into()));
                        }
                        let lo = lex_hex4(chars)?;
                        if !(0xDC00..0xE000).contains(&lo) {
                            return Err(EngineError::Parse("invalid surrogate pair".into()));
                        }
                        let cp = 0x10000 + ((hi - 0xD800) << 10) + (lo - 0xDC00);
                        out.push(
                            char::from_u32(cp)
                                .ok_or_else(|| EngineError::Parse("invalid code point".into()))?,
                        );
                    } else {
                        out.push(
                            char::from_u32(hi)
                                .ok_or_else(|| EngineError::Parse("invalid code point".into()))?,
                        );
                    }
                }
                other => {
                    return Err(EngineError::Parse(format!(
                        "unsupported escape: \\{}",
                        other.map(String::from).unwrap_or_default()
                    )))
                }
            },
            Some(c) => out.push(c),
        }
    }
}

fn lex_hex4(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> EngineResult<u32> {
    let mut v = 0u32;
    for _ in 0..4 {
        let c = chars
            .next()
            .ok_or_else(|| EngineError::Parse("truncated \\u escape".into()))?;
        let d = c
            .to_digit(16)
            .ok_or_else(|| EngineError::Parse(format!("bad hex digit '{}'", c)))?;
        v = v * 16 + d;
    }
    Ok(v)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse a full program: `import` headers, `def`s, then one expression
pub fn parse(source: &str) -> EngineResult<Query> {
    let tokens = lex(source)?;
    let mut parser = Parser::new(tokens);

    let mut imports = Vec::new();
    while parser.peek() == Some(&Tok::ImportKw) {
        imports.push(parser.parse_import()?);
    }
    let mut defs = Vec::new();
    while parser.peek() == Some(&Tok::Def) {
        defs.push(parser.parse_def()?);
    }
    let body = parser.parse_pipe()?;
    if !parser.at_eof() {
        return Err(EngineError::Parse(format!(
            "unexpected trailing input near {:?}",
            parser.peek().unwrap()
        )));
    }
    Ok(Query {
        imports,
        defs,
        body,
    })
}

struct Parser {
    tokens: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Tok>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn peek2(&self) -> Option<&Tok> {
        self.tokens.get(self.pos + 1)
    }

    fn next(&mut self) -> Option<Tok> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn at_eof(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn expect(&mut self, tok: Tok, what: &str) -> EngineResult<()> {
        match self.next() {
            Some(t) if t == tok => Ok(()),
            other => Err(EngineError::Parse(format!(
                "expected {}, found {:?}",
                what, other
            ))),
        }
    }

    fn expect_ident(&mut self, what: &str) -> EngineResult<String> {
        match self.next() {
            Some(Tok::Ident(name)) => Ok(name),
            other => Err(EngineError::Parse(format!(
                "expected {}, found {:?}",
                what, other
            ))),
        }
    }

    fn parse_import(&mut self) -> EngineResult<Import> {
        self.expect(Tok::ImportKw, "'import'")?;
        let module = match self.next() {
            Some(Tok::Str(s)) => s,
            other => {
                return Err(EngineError::Parse(format!(
                    "expected a module name string, found {:?}",
                    other
                )))
            }
        };
        self.expect(Tok::AsKw, "'as'")?;
        let alias = self.expect_ident("a module alias")?;
        self.expect(Tok::Semi, "';'")?;
        Ok(Import { module, alias })
    }

    fn parse_def(&mut self) -> EngineResult<Def> {
        self.expect(Tok::Def, "'def'")?;
        let name = self.expect_ident("a definition name")?;
        let mut params = Vec::new();
        if self.peek() == Some(&Tok::LParen) {
            self.next();
            loop {
                match self.next() {
                    Some(Tok::Ident(p)) => params.push(p),
                    // Parameters are filter-style bare names; $-bound value
                    // parameters are not part of the dialect
                    Some(Tok::Var(p)) => {
                        return Err(EngineError::Parse(format!(
                            "value parameter {} is not supported; use a bare name",
                            p
                        )))
                    }
                    other => {
                        return Err(EngineError::Parse(format!(
                            "expected a parameter name, found {:?}",
                            other
                        )))
                    }
                }
                match self.next() {
                    Some(Tok::Semi) => continue,
                    Some(Tok::RParen) => break,
                    other => {
                        return Err(EngineError::Parse(format!(
                            "expected ';' or ')', found {:?}",
                            other
                        )))
                    }
                }
            }
        }
        self.expect(Tok::Colon, "':'")?;
        let body = self.parse_pipe()?;
        self.expect(Tok::Semi, "';' after definition body")?;
        Ok(Def { name, params, body })
    }

    fn parse_pipe(&mut self) -> EngineResult<Expr> {
        let mut lhs = self.parse_alt()?;
        while self.peek() == Some(&Tok::Pipe) {
            self.next();
            let rhs = self.parse_alt()?;
            lhs = Expr::Pipe(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_alt(&mut self) -> EngineResult<Expr> {
        let mut lhs = self.parse_compare()?;
        while self.peek() == Some(&Tok::AltOp) {
            self.next();
            let rhs = self.parse_compare()?;
            lhs = Expr::Alt(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_compare(&mut self) -> EngineResult<Expr> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Tok::EqEq) => BinOp::Eq,
                Some(Tok::NotEq) => BinOp::Ne,
                _ => break,
            };
            self.next();
            let rhs = self.parse_additive()?;
            lhs = Expr::BinOp(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> EngineResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => BinOp::Add,
                Some(Tok::Minus) => BinOp::Sub,
                _ => break,
            };
            self.next();
            let rhs = self.parse_unary()?;
            lhs = Expr::BinOp(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> EngineResult<Expr> {
        if self.peek() == Some(&Tok::Minus) {
            self.next();
            let inner = self.parse_postfix()?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> EngineResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Tok::Dot) => {
                    match self.peek2() {
                        Some(Tok::Ident(_)) | Some(Tok::Str(_)) => {
                            self.next();
                            expr = Expr::Field(Box::new(expr), self.parse_field_name()?);
                        }
                        // A bare trailing dot is only valid as the primary
                        _ => break,
                    }
                }
                Some(Tok::LBrack) => {
                    self.next();
                    let idx = self.parse_pipe()?;
                    self.expect(Tok::RBrack, "']'")?;
                    expr = Expr::Index(Box::new(expr), Box::new(idx));
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_field_name(&mut self) -> EngineResult<String> {
        match self.next() {
            Some(Tok::Ident(name)) => Ok(name),
            Some(Tok::Str(name)) => Ok(name),
            other => Err(EngineError::Parse(format!(
                "expected a field name, found {:?}",
                other
            ))),
        }
    }

    fn parse_primary(&mut self) -> EngineResult<Expr> {
        match self.next() {
            Some(Tok::Dot) => match self.peek() {
                Some(Tok::Ident(_)) | Some(Tok::Str(_)) => {
                    Ok(Expr::Field(Box::new(Expr::Identity), self.parse_field_name()?))
                }
                _ => Ok(Expr::Identity),
            },
            Some(Tok::Var(name)) => Ok(Expr::Variable(name)),
            Some(Tok::Int(i)) => Ok(Expr::Literal(Value::Integer(i))),
            Some(Tok::Float(f)) => Ok(Expr::Literal(Value::Float(f))),
            Some(Tok::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Tok::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Tok::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Tok::NullKw) => Ok(Expr::Literal(Value::Null)),
            Some(Tok::LParen) => {
                let inner = self.parse_pipe()?;
                self.expect(Tok::RParen, "')'")?;
                Ok(inner)
            }
            Some(Tok::LBrack) => {
                let mut items = Vec::new();
                if self.peek() == Some(&Tok::RBrack) {
                    self.next();
                    return Ok(Expr::Array(items));
                }
                loop {
                    items.push(self.parse_pipe()?);
                    match self.next() {
                        Some(Tok::Comma) => continue,
                        Some(Tok::RBrack) => break,
                        other => {
                            return Err(EngineError::Parse(format!(
                                "expected ',' or ']', found {:?}",
                                other
                            )))
                        }
                    }
                }
                Ok(Expr::Array(items))
            }
            Some(Tok::LBrace) => {
                let mut entries = Vec::new();
                if self.peek() == Some(&Tok::RBrace) {
                    self.next();
                    return Ok(Expr::Object(entries));
                }
                loop {
                    let key = match self.next() {
                        Some(Tok::Ident(k)) => k,
                        Some(Tok::Str(k)) => k,
                        other => {
                            return Err(EngineError::Parse(format!(
                                "expected an object key, found {:?}",
                                other
                            )))
                        }
                    };
                    let value = if self.peek() == Some(&Tok::Colon) {
                        self.next();
                        Some(self.parse_alt()?)
                    } else {
                        None
                    };
                    entries.push((key, value));
                    match self.next() {
                        Some(Tok::Comma) => continue,
                        Some(Tok::RBrace) => break,
                        other => {
                            return Err(EngineError::Parse(format!(
                                "expected ',' or '}}', found {:?}",
                                other
                            )))
                        }
                    }
                }
                Ok(Expr::Object(entries))
            }
            Some(Tok::Ident(name)) => {
                let (module, name) = if self.peek() == Some(&Tok::DColon) {
                    self.next();
                    (Some(name), self.expect_ident("a function name")?)
                } else {
                    (None, name)
                };
                let mut args = Vec::new();
                if self.peek() == Some(&Tok::LParen) {
                    self.next();
                    loop {
                        args.push(self.parse_pipe()?);
                        match self.next() {
                            Some(Tok::Semi) => continue,
                            Some(Tok::RParen) => break,
                            other => {
                                return Err(EngineError::Parse(format!(
                                    "expected ';' or ')', found {:?}",
                                    other
                                )))
                            }
                        }
                    }
                }
                Ok(Expr::Call { module, name, args })
            }
            other => Err(EngineError::Parse(format!(
                "unexpected token {:?}",
                other
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Compiler
// ---------------------------------------------------------------------------

/// Compiles a [`Query`] together with custom functions, modules, and
/// variable names into runnable [`Code`]
#[derive(Default)]
pub struct Compiler {
    functions: Vec<NativeFn>,
    modules: Vec<Module>,
    variables: Vec<String>,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom function
    pub fn with_function(mut self, f: NativeFn) -> Self {
        self.functions.push(f);
        self
    }

    /// Register a module for `import`
    pub fn with_module(mut self, m: Module) -> Self {
        self.modules.push(m);
        self
    }

    /// Declare the variable names available to the query, in the order
    /// their values will be passed to [`Code::run`]
    pub fn with_variables(mut self, names: Vec<String>) -> Self {
        self.variables = names;
        self
    }

    /// Resolve imports and validate every reference in the query
    pub fn compile(self, query: Query) -> EngineResult<Code> {
        let mut modules = HashMap::new();
        for import in &query.imports {
            let module = self
                .modules
                .iter()
                .find(|m| m.name == import.module)
                .ok_or_else(|| {
                    EngineError::Compile(format!("module not found: {}", import.module))
                })?;
            modules.insert(import.alias.clone(), module.clone());
        }

        let code = Code {
            defs: query.defs,
            modules,
            natives: self.functions,
            variables: self.variables,
            body: query.body,
        };

        for def in &code.defs {
            code.check(&def.body, &def.params, None)?;
        }
        for module in code.modules.values() {
            for def in &module.defs {
                code.check(&def.body, &def.params, Some(module))?;
            }
        }
        code.check(&code.body, &[], None)?;

        Ok(code)
    }
}

/// A compiled, validated query
#[derive(Debug)]
pub struct Code {
    defs: Vec<Def>,
    modules: HashMap<String, Module>,
    natives: Vec<NativeFn>,
    variables: Vec<String>,
    body: Expr,
}

const STD_FUNCTIONS: &[(&str, usize, usize)] = &[
    ("length", 0, 0),
    ("keys", 0, 0),
    ("type", 0, 0),
    ("tostring", 0, 0),
    ("tonumber", 0, 0),
    ("not", 0, 0),
    ("error", 0, 1),
];

impl Code {
    /// Run the query against `input`, binding declared variables to
    /// `var_values` positionally. Yields exactly one result.
    pub fn run(&self, input: &Value, var_values: &[Value]) -> Outputs {
        let item = if var_values.len() != self.variables.len() {
            Err(EngineError::Run(format!(
                "expected {} variable values, got {}",
                self.variables.len(),
                var_values.len()
            )))
        } else {
            let vars: HashMap<String, Value> = self
                .variables
                .iter()
                .cloned()
                .zip(var_values.iter().cloned())
                .collect();
            let interp = Interp { code: self, vars };
            interp.eval(&self.body, input, &Scope::top(), 0)
        };
        Outputs { item: Some(item) }
    }

    /// Validate one expression: every variable must be declared and every
    /// call must resolve to a definition, custom function, or standard
    /// function with a matching arity.
    fn check(&self, expr: &Expr, params: &[String], module: Option<&Module>) -> EngineResult<()> {
        match expr {
            Expr::Identity | Expr::Literal(_) => Ok(()),
            Expr::Variable(name) => {
                if self.variables.iter().any(|v| v == name) {
                    Ok(())
                } else {
                    Err(EngineError::Compile(format!(
                        "variable not defined: {}",
                        name
                    )))
                }
            }
            Expr::Field(inner, _) | Expr::Neg(inner) => self.check(inner, params, module),
            Expr::Index(inner, idx) => {
                self.check(inner, params, module)?;
                self.check(idx, params, module)
            }
            Expr::Pipe(a, b) | Expr::Alt(a, b) | Expr::BinOp(a, _, b) => {
                self.check(a, params, module)?;
                self.check(b, params, module)
            }
            Expr::Array(items) => {
                for item in items {
                    self.check(item, params, module)?;
                }
                Ok(())
            }
            Expr::Object(entries) => {
                for (_, value) in entries {
                    if let Some(value) = value {
                        self.check(value, params, module)?;
                    }
                }
                Ok(())
            }
            Expr::Call {
                module: qualifier,
                name,
                args,
            } => {
                for arg in args {
                    self.check(arg, params, module)?;
                }
                if let Some(alias) = qualifier {
                    let target = self.modules.get(alias).ok_or_else(|| {
                        EngineError::Compile(format!("module not imported: {}", alias))
                    })?;
                    if target
                        .defs
                        .iter()
                        .any(|d| d.name == *name && d.params.len() == args.len())
                    {
                        return Ok(());
                    }
                    return Err(EngineError::Compile(format!(
                        "function not defined: {}::{}/{}",
                        alias,
                        name,
                        args.len()
                    )));
                }
                if args.is_empty() && params.contains(name) {
                    return Ok(());
                }
                let local_defs = module.map(|m| &m.defs).unwrap_or(&self.defs);
                if local_defs
                    .iter()
                    .any(|d| d.name == *name && d.params.len() == args.len())
                {
                    return Ok(());
                }
                if self
                    .natives
                    .iter()
                    .any(|f| f.name == *name && f.min_arity <= args.len() && args.len() <= f.max_arity)
                {
                    return Ok(());
                }
                if STD_FUNCTIONS
                    .iter()
                    .any(|(n, min, max)| *n == name.as_str() && *min <= args.len() && args.len() <= *max)
                {
                    return Ok(());
                }
                Err(EngineError::Compile(format!(
                    "function not defined: {}/{}",
                    name,
                    args.len()
                )))
            }
        }
    }
}

/// Iterator over query results; holds the single produced item
pub struct Outputs {
    item: Option<EngineResult<Value>>,
}

impl Iterator for Outputs {
    type Item = EngineResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        self.item.take()
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

struct Scope<'a> {
    bindings: HashMap<String, Value>,
    module: Option<&'a Module>,
}

impl<'a> Scope<'a> {
    fn top() -> Scope<'a> {
        Scope {
            bindings: HashMap::new(),
            module: None,
        }
    }
}

struct Interp<'a> {
    code: &'a Code,
    vars: HashMap<String, Value>,
}

impl<'a> Interp<'a> {
    fn eval(
        &self,
        expr: &Expr,
        input: &Value,
        scope: &Scope<'_>,
        depth: usize,
    ) -> EngineResult<Value> {
        match expr {
            Expr::Identity => Ok(input.clone()),
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Variable(name) => self
                .vars
                .get(name)
                .cloned()
                .ok_or_else(|| EngineError::Run(format!("variable not defined: {}", name))),
            Expr::Field(inner, name) => {
                let v = self.eval(inner, input, scope, depth)?;
                field(&v, name)
            }
            Expr::Index(inner, idx) => {
                let v = self.eval(inner, input, scope, depth)?;
                let i = self.eval(idx, input, scope, depth)?;
                index(&v, &i)
            }
            Expr::Pipe(a, b) => {
                let mid = self.eval(a, input, scope, depth)?;
                self.eval(b, &mid, scope, depth)
            }
            Expr::Alt(a, b) => match self.eval(a, input, scope, depth) {
                Ok(Value::Null) | Ok(Value::Bool(false)) | Err(_) => {
                    self.eval(b, input, scope, depth)
                }
                Ok(v) => Ok(v),
            },
            Expr::BinOp(a, op, b) => {
                let left = self.eval(a, input, scope, depth)?;
                let right = self.eval(b, input, scope, depth)?;
                binop(&left, *op, &right)
            }
            Expr::Neg(inner) => match self.eval(inner, input, scope, depth)? {
                Value::Integer(i) => Ok(Value::Integer(-i)),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(EngineError::Run(format!(
                    "cannot negate {}",
                    jq_type(&other)
                ))),
            },
            Expr::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item, input, scope, depth)?);
                }
                Ok(Value::Sequence(out))
            }
            Expr::Object(entries) => {
                let mut out = IndexMap::with_capacity(entries.len());
                for (key, value) in entries {
                    let v = match value {
                        Some(value) => self.eval(value, input, scope, depth)?,
                        None => field(input, key)?,
                    };
                    out.insert(key.clone(), v);
                }
                Ok(Value::Mapping(out))
            }
            Expr::Call { module, name, args } => self.call(module.as_deref(), name, args, input, scope, depth),
        }
    }

    fn call(
        &self,
        qualifier: Option<&str>,
        name: &str,
        args: &[Expr],
        input: &Value,
        scope: &Scope<'_>,
        depth: usize,
    ) -> EngineResult<Value> {
        if let Some(alias) = qualifier {
            let module = self
                .code
                .modules
                .get(alias)
                .ok_or_else(|| EngineError::Run(format!("module not imported: {}", alias)))?;
            let def = module
                .defs
                .iter()
                .find(|d| d.name == name && d.params.len() == args.len())
                .ok_or_else(|| {
                    EngineError::Run(format!("function not defined: {}::{}", alias, name))
                })?;
            return self.call_def(def, args, input, scope, Some(module), depth);
        }

        if args.is_empty() {
            if let Some(v) = scope.bindings.get(name) {
                return Ok(v.clone());
            }
        }

        let local_defs = scope.module.map(|m| &m.defs).unwrap_or(&self.code.defs);
        if let Some(def) = local_defs
            .iter()
            .find(|d| d.name == name && d.params.len() == args.len())
        {
            return self.call_def(def, args, input, scope, scope.module, depth);
        }

        if let Some(native) = self
            .code
            .natives
            .iter()
            .find(|f| f.name == name && f.min_arity <= args.len() && args.len() <= f.max_arity)
        {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(self.eval(arg, input, scope, depth)?);
            }
            return (native.f)(input, &values).map_err(EngineError::Run);
        }

        self.call_std(name, args, input, scope, depth)
    }

    fn call_def(
        &self,
        def: &Def,
        args: &[Expr],
        input: &Value,
        scope: &Scope<'_>,
        module: Option<&Module>,
        depth: usize,
    ) -> EngineResult<Value> {
        if depth >= MAX_CALL_DEPTH {
            return Err(EngineError::Run(format!(
                "recursion limit exceeded in {}",
                def.name
            )));
        }
        let mut bindings = HashMap::with_capacity(def.params.len());
        for (param, arg) in def.params.iter().zip(args) {
            bindings.insert(param.clone(), self.eval(arg, input, scope, depth)?);
        }
        let inner = Scope { bindings, module };
        self.eval(&def.body, input, &inner, depth + 1)
    }

    fn call_std(
        &self,
        name: &str,
        args: &[Expr],
        input: &Value,
        scope: &Scope<'_>,
        depth: usize,
    ) -> EngineResult<Value> {
        match (name, args.len()) {
            ("length", 0) => match input {
                Value::Null => Ok(Value::Integer(0)),
                Value::Integer(i) => Ok(Value::Integer(i.abs())),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                Value::String(s) => Ok(Value::Integer(s.chars().count() as i64)),
                Value::Sequence(s) => Ok(Value::Integer(s.len() as i64)),
                Value::Mapping(m) => Ok(Value::Integer(m.len() as i64)),
                Value::Bool(_) => Err(EngineError::Run("boolean has no length".into())),
            },
            ("keys", 0) => match input {
                Value::Mapping(m) => {
                    let mut keys: Vec<&String> = m.keys().collect();
                    keys.sort();
                    Ok(Value::Sequence(
                        keys.into_iter().map(|k| Value::String(k.clone())).collect(),
                    ))
                }
                Value::Sequence(s) => Ok(Value::Sequence(
                    (0..s.len() as i64).map(Value::Integer).collect(),
                )),
                other => Err(EngineError::Run(format!(
                    "{} has no keys",
                    jq_type(other)
                ))),
            },
            ("type", 0) => Ok(Value::String(jq_type(input).to_string())),
            ("tostring", 0) => match input {
                Value::String(s) => Ok(Value::String(s.clone())),
                other => serde_json::to_string(other)
                    .map(Value::String)
                    .map_err(|e| EngineError::Run(e.to_string())),
            },
            ("tonumber", 0) => match input {
                Value::Integer(_) | Value::Float(_) => Ok(input.clone()),
                Value::String(s) => {
                    if let Ok(i) = s.parse::<i64>() {
                        Ok(Value::Integer(i))
                    } else {
                        s.parse::<f64>()
                            .map(Value::Float)
                            .map_err(|_| EngineError::Run(format!("cannot parse '{}' as number", s)))
                    }
                }
                other => Err(EngineError::Run(format!(
                    "cannot convert {} to number",
                    jq_type(other)
                ))),
            },
            ("not", 0) => Ok(Value::Bool(matches!(
                input,
                Value::Null | Value::Bool(false)
            ))),
            ("error", 0) => Err(EngineError::Run(match input {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })),
            ("error", 1) => {
                let msg = self.eval(&args[0], input, scope, depth)?;
                Err(EngineError::Run(match msg {
                    Value::String(s) => s,
                    other => other.to_string(),
                }))
            }
            _ => Err(EngineError::Run(format!(
                "function not defined: {}/{}",
                name,
                args.len()
            ))),
        }
    }
}

fn field(v: &Value, name: &str) -> EngineResult<Value> {
    match v {
        Value::Mapping(m) => Ok(m.get(name).cloned().unwrap_or(Value::Null)),
        Value::Null => Ok(Value::Null),
        other => Err(EngineError::Run(format!(
            "cannot index {} with \"{}\"",
            jq_type(other),
            name
        ))),
    }
}

fn index(v: &Value, idx: &Value) -> EngineResult<Value> {
    match (v, idx) {
        (Value::Null, _) => Ok(Value::Null),
        (Value::Mapping(_), Value::String(k)) => field(v, k),
        (Value::Sequence(s), _) => {
            let i = match idx {
                Value::Integer(i) => *i,
                Value::Float(f) if f.fract() == 0.0 => *f as i64,
                other => {
                    return Err(EngineError::Run(format!(
                        "cannot index array with {}",
                        jq_type(other)
                    )))
                }
            };
            let i = if i < 0 { i + s.len() as i64 } else { i };
            if i < 0 || i as usize >= s.len() {
                Ok(Value::Null)
            } else {
                Ok(s[i as usize].clone())
            }
        }
        (other, idx) => Err(EngineError::Run(format!(
            "cannot index {} with {}",
            jq_type(other),
            jq_type(idx)
        ))),
    }
}

fn binop(left: &Value, op: BinOp, right: &Value) -> EngineResult<Value> {
    match op {
        BinOp::Eq => Ok(Value::Bool(values_equal(left, right))),
        BinOp::Ne => Ok(Value::Bool(!values_equal(left, right))),
        BinOp::Add => add(left, right),
        BinOp::Sub => sub(left, right),
    }
}

fn add(left: &Value, right: &Value) -> EngineResult<Value> {
    match (left, right) {
        (Value::Null, v) | (v, Value::Null) => Ok(v.clone()),
        (Value::Integer(a), Value::Integer(b)) => match a.checked_add(*b) {
            Some(sum) => Ok(Value::Integer(sum)),
            None => Ok(Value::Float(*a as f64 + *b as f64)),
        },
        (a, b) if a.is_number() && b.is_number() => {
            Ok(Value::Float(a.as_f64().unwrap() + b.as_f64().unwrap()))
        }
        (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
        (Value::Sequence(a), Value::Sequence(b)) => {
            let mut out = a.clone();
            out.extend(b.iter().cloned());
            Ok(Value::Sequence(out))
        }
        (Value::Mapping(a), Value::Mapping(b)) => {
            let mut out = a.clone();
            for (k, v) in b {
                out.insert(k.clone(), v.clone());
            }
            Ok(Value::Mapping(out))
        }
        (a, b) => Err(EngineError::Run(format!(
            "cannot add {} and {}",
            jq_type(a),
            jq_type(b)
        ))),
    }
}

fn sub(left: &Value, right: &Value) -> EngineResult<Value> {
    match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => match a.checked_sub(*b) {
            Some(diff) => Ok(Value::Integer(diff)),
            None => Ok(Value::Float(*a as f64 - *b as f64)),
        },
        (a, b) if a.is_number() && b.is_number() => {
            Ok(Value::Float(a.as_f64().unwrap() - b.as_f64().unwrap()))
        }
        (Value::Sequence(a), Value::Sequence(b)) => Ok(Value::Sequence(
            a.iter()
                .filter(|v| !b.iter().any(|w| values_equal(v, w)))
                .cloned()
                .collect(),
        )),
        (a, b) => Err(EngineError::Run(format!(
            "cannot subtract {} from {}",
            jq_type(b),
            jq_type(a)
        ))),
    }
}

/// Deep equality; integer and float representations of the same number
/// compare equal.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Integer(x), Value::Float(y)) | (Value::Float(y), Value::Integer(x)) => {
            *x as f64 == *y
        }
        (Value::Sequence(x), Value::Sequence(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(v, w)| values_equal(v, w))
        }
        (Value::Mapping(x), Value::Mapping(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| values_equal(v, w)))
        }
        _ => a == b,
    }
}

/// The jq-level type name of a value
fn jq_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Integer(_) | Value::Float(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "array",
        Value::Mapping(_) => "object",
    }
}
