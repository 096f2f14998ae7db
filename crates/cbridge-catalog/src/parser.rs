//! Recursive-descent parser for C declarations.
//!
//! Consumes the preprocessed token stream and produces catalog symbols in
//! declaration order. Function bodies (`static inline` helpers), attributes,
//! and `extern "C"` wrappers are skipped.

use std::collections::HashMap;

use crate::catalog::{ConstantDecl, Declaration, EnumDecl, Enumerator, Field, Location, NativeSymbol, StructDecl};
use crate::ctype::{CParam, CSignature, CType, FnType};
use crate::error::{HeaderError, Result};
use crate::expr::{self, Scope};
use crate::lexer::{self, DefineDirective, Punct, Token, TokenKind};
use crate::preprocess::SourceFile;

/// Parse a preprocessed token stream into symbols.
pub(crate) fn parse(tokens: &[Token], files: &[SourceFile]) -> Result<Vec<NativeSymbol>> {
    let mut code = Vec::with_capacity(tokens.len());
    let mut defines = Vec::new();
    for tok in tokens {
        match &tok.kind {
            TokenKind::Define(d) => defines.push((code.len(), (**d).clone(), tok.file, tok.line)),
            _ => code.push(tok.clone()),
        }
    }
    Parser::new(&code, files).run(defines)
}

/// Parse a single prototype such as `int f(int x);`.
pub(crate) fn parse_prototype(text: &str) -> Result<CSignature> {
    let invalid = |detail: String| HeaderError::InvalidSignature { detail };
    let mut tokens = lexer::tokenize(text, 0, 1).map_err(invalid)?;
    if !tokens.last().is_some_and(|t| t.is_punct(Punct::Semi)) {
        tokens.push(Token {
            kind: TokenKind::Punct(Punct::Semi),
            file: 0,
            line: 1,
        });
    }
    let files = [SourceFile {
        path: None,
        name: "<signature>".to_string(),
        contents: text.to_string(),
    }];
    let symbols = Parser::new(&tokens, &files)
        .run(Vec::new())
        .map_err(|e| invalid(e.to_string()))?;
    symbols
        .into_iter()
        .find_map(|s| match s.decl {
            Declaration::Function(sig) => Some(sig),
            _ => None,
        })
        .ok_or_else(|| invalid(format!("'{text}' is not a function prototype")))
}

#[derive(Debug, Default, Clone, Copy)]
struct Storage {
    typedef: bool,
    is_static: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AggregateKind {
    Struct,
    Union,
    Enum,
}

/// A `struct`/`union`/`enum` specifier whose name depends on the declarator
/// that follows it. The body is kept as a token range and parsed once the
/// name is known.
#[derive(Debug)]
struct PendingAggregate {
    kind: AggregateKind,
    tag: Option<String>,
    body: Option<(usize, usize)>,
    file: u32,
    line: u32,
}

#[derive(Debug)]
struct Specifiers {
    storage: Storage,
    base: CType,
    is_const: bool,
    aggregate: Option<PendingAggregate>,
}

#[derive(Debug)]
enum Derived {
    Pointer,
    Array(Option<u64>),
    Function(Vec<CParam>, bool),
}

#[derive(Debug)]
struct Declarator {
    name: Option<String>,
    derived: Vec<Derived>,
    file: u32,
    line: u32,
}

#[derive(Debug, Clone, Copy)]
enum Context<'c> {
    /// File scope; `alias` is the typedef name when the first declarator
    /// is a plain name.
    TopLevel { alias: Option<&'c str> },
    /// Inside a struct body; nested anonymous aggregates are hoisted as
    /// `<outer>__<field>`.
    Member { outer: &'c str, field: &'c str },
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    files: &'a [SourceFile],
    symbols: Vec<NativeSymbol>,
    index: HashMap<String, usize>,
    tags: HashMap<String, String>,
    enumerators: HashMap<String, i128>,
    anon: usize,
}

const QUALIFIERS: &[&str] = &[
    "const",
    "__const",
    "volatile",
    "__volatile__",
    "restrict",
    "__restrict",
    "__restrict__",
    "_Atomic",
    "_Nonnull",
    "_Nullable",
    "__cdecl",
    "__stdcall",
    "__fastcall",
];

const ATTRIBUTES: &[&str] = &["__attribute__", "__attribute", "__declspec", "__asm__", "__asm", "asm"];

const TYPE_KEYWORDS: &[&str] = &[
    "void", "char", "short", "int", "long", "float", "double", "signed", "unsigned", "_Bool",
];

fn apply(mut ty: CType, derived: Vec<Derived>) -> CType {
    for d in derived {
        ty = match d {
            Derived::Pointer | Derived::Array(None) => CType::Pointer(Box::new(ty)),
            Derived::Array(Some(len)) => CType::Array(Box::new(ty), len),
            Derived::Function(parameters, is_variadic) => CType::Function(Box::new(FnType {
                return_type: ty,
                parameters,
                is_variadic,
            })),
        };
    }
    ty
}

fn keyword_type(words: &[&str]) -> Option<CType> {
    let ty = match words {
        ["void"] => CType::Void,
        ["float"] => CType::Float,
        ["double"] => CType::Double,
        ["long", "double"] | ["double", "long"] => CType::LongDouble,
        ["_Bool"] => CType::Bool,
        _ => expr::builtin_keywords(words)?,
    };
    Some(ty)
}

impl Scope for Parser<'_> {
    fn value_of(&self, name: &str) -> Option<i128> {
        if let Some(v) = self.enumerators.get(name) {
            return Some(*v);
        }
        match self.lookup(name) {
            Some(Declaration::Constant(c)) => Some(c.value),
            _ => None,
        }
    }

    fn integer_type(&self, name: &str) -> Option<CType> {
        if let Some(builtin) = CType::builtin_typedef(name) {
            return builtin.is_integer().then_some(builtin);
        }
        let mut current = name.to_string();
        for _ in 0..64 {
            match self.lookup(&current) {
                Some(Declaration::Typedef(CType::Named(next))) => current = next.clone(),
                Some(Declaration::Typedef(ty)) => {
                    let ty = ty.strip_const();
                    return ty.is_integer().then(|| ty.clone());
                }
                _ => return None,
            }
        }
        None
    }
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token], files: &'a [SourceFile]) -> Self {
        Self {
            tokens,
            pos: 0,
            files,
            symbols: Vec::new(),
            index: HashMap::new(),
            tags: HashMap::new(),
            enumerators: HashMap::new(),
            anon: 0,
        }
    }

    fn run(mut self, defines: Vec<(usize, DefineDirective, u32, u32)>) -> Result<Vec<NativeSymbol>> {
        let mut defines = defines.into_iter().peekable();
        let mut extern_blocks = 0usize;
        loop {
            while let Some((at, ..)) = defines.peek() {
                if *at > self.pos {
                    break;
                }
                if let Some((_, d, file, line)) = defines.next() {
                    self.define(&d, file, line)?;
                }
            }
            let Some(tok) = self.peek() else { break };

            if tok.is_punct(Punct::Semi) {
                self.pos += 1;
            } else if tok.is_punct(Punct::RBrace) && extern_blocks > 0 {
                extern_blocks -= 1;
                self.pos += 1;
            } else if tok.is_ident("extern")
                && matches!(self.peek_at(1).map(|t| &t.kind), Some(TokenKind::Str(s)) if s == "C")
            {
                if self.peek_at(2).is_some_and(|t| t.is_punct(Punct::LBrace)) {
                    extern_blocks += 1;
                    self.pos += 3;
                } else {
                    self.pos += 2;
                }
            } else if tok.is_ident("_Static_assert") || tok.is_ident("static_assert") {
                self.pos += 1;
                self.skip_group(Punct::LParen)?;
                self.expect(Punct::Semi)?;
            } else {
                self.external_declaration()?;
            }
        }
        if extern_blocks > 0 {
            return Err(self.error("unterminated extern \"C\" block"));
        }
        Ok(self.symbols)
    }

    // ---- token helpers ----

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, n: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + n)
    }

    fn peek_punct(&self, p: Punct) -> bool {
        self.peek().is_some_and(|t| t.is_punct(p))
    }

    fn eat(&mut self, p: Punct) -> bool {
        if self.peek_punct(p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, p: Punct) -> Result<()> {
        if self.eat(p) {
            return Ok(());
        }
        let found = match self.peek() {
            Some(t) => format!("'{}'", t.kind),
            None => "end of input".to_string(),
        };
        Err(self.error(format!("expected '{p}', found {found}")))
    }

    fn error(&self, detail: impl Into<String>) -> HeaderError {
        let tok = self.peek().or_else(|| self.tokens.last());
        let (file, line) = tok.map_or((0, 0), |t| (t.file, t.line));
        HeaderError::Syntax {
            file: self.file_name(file),
            line,
            detail: detail.into(),
        }
    }

    fn file_name(&self, file: u32) -> String {
        self.files
            .get(file as usize)
            .map(|f| f.name.clone())
            .unwrap_or_default()
    }

    fn location(&self, file: u32, line: u32) -> Location {
        Location {
            file: self.file_name(file),
            line,
        }
    }

    fn here(&self) -> (u32, u32) {
        self.peek()
            .or_else(|| self.tokens.last())
            .map_or((0, 0), |t| (t.file, t.line))
    }

    /// Index of the token closing the group opened at `open`.
    fn matching(&self, open: usize) -> Result<usize> {
        let (open_p, close_p) = match self.tokens.get(open).map(|t| &t.kind) {
            Some(TokenKind::Punct(Punct::LParen)) => (Punct::LParen, Punct::RParen),
            Some(TokenKind::Punct(Punct::LBrace)) => (Punct::LBrace, Punct::RBrace),
            Some(TokenKind::Punct(Punct::LBracket)) => (Punct::LBracket, Punct::RBracket),
            _ => return Err(self.error("expected an opening bracket")),
        };
        let mut depth = 0usize;
        for (i, tok) in self.tokens.iter().enumerate().skip(open) {
            if tok.is_punct(open_p) {
                depth += 1;
            } else if tok.is_punct(close_p) {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
        }
        Err(self.error(format!("unbalanced '{open_p}'")))
    }

    /// Skip a bracketed group starting at the current token.
    fn skip_group(&mut self, open: Punct) -> Result<()> {
        if !self.peek_punct(open) {
            return Err(self.error(format!("expected '{open}'")));
        }
        self.pos = self.matching(self.pos)? + 1;
        Ok(())
    }

    fn skip_attributes(&mut self) -> Result<()> {
        while let Some(word) = self.peek().and_then(Token::ident) {
            if ATTRIBUTES.contains(&word) {
                self.pos += 1;
                if self.peek_punct(Punct::LParen) {
                    self.skip_group(Punct::LParen)?;
                }
            } else {
                break;
            }
        }
        Ok(())
    }

    /// Tokens of an expression ending before a top-level `stops` token.
    fn scan_expression(&mut self, stops: &[Punct]) -> &'a [Token] {
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(tok) = self.peek() {
            if let TokenKind::Punct(p) = tok.kind {
                if depth == 0 && (stops.contains(&p) || matches!(p, Punct::RBrace | Punct::RBracket | Punct::RParen)) {
                    break;
                }
                match p {
                    Punct::LParen | Punct::LBracket => depth += 1,
                    Punct::RParen | Punct::RBracket => depth -= 1,
                    _ => {}
                }
            }
            self.pos += 1;
        }
        &self.tokens[start..self.pos]
    }

    fn constant(&self, tokens: &[Token], what: &str) -> Result<i128> {
        expr::evaluate(tokens, self)
            .map(|v| v.value)
            .map_err(|d| self.error(format!("{what} is not an integer constant: {d}")))
    }

    // ---- symbol table ----

    fn lookup(&self, name: &str) -> Option<&Declaration> {
        self.index.get(name).map(|&i| &self.symbols[i].decl)
    }

    fn declare(&mut self, name: &str, decl: Declaration, location: Location) -> Result<()> {
        if let Some(&i) = self.index.get(name) {
            let existing = &mut self.symbols[i];
            if !existing.decl.compatible(&decl) {
                return Err(HeaderError::Conflict {
                    file: location.file,
                    line: location.line,
                    name: name.to_string(),
                });
            }
            if matches!(existing.decl, Declaration::Opaque) && matches!(decl, Declaration::Struct(_)) {
                existing.decl = decl;
            }
            return Ok(());
        }
        self.index.insert(name.to_string(), self.symbols.len());
        self.symbols.push(NativeSymbol::new(name, decl, location));
        Ok(())
    }

    fn define(&mut self, d: &DefineDirective, file: u32, line: u32) -> Result<()> {
        match expr::evaluate(&d.body, self) {
            Ok(v) => {
                let decl = Declaration::Constant(ConstantDecl {
                    value: v.value,
                    ty: v.cast,
                    expr: lexer::render(&d.body),
                });
                let location = self.location(file, line);
                self.declare(&d.name, decl, location)
            }
            Err(reason) => {
                tracing::trace!(name = %d.name, %reason, "macro is not an integer constant");
                Ok(())
            }
        }
    }

    // ---- declarations ----

    fn external_declaration(&mut self) -> Result<()> {
        let mut specs = self.specifiers()?;
        if self.eat(Punct::Semi) {
            self.bind_aggregate(&mut specs, Context::TopLevel { alias: None })?;
            return Ok(());
        }

        let first = self.declarator()?;
        let alias = if specs.storage.typedef && first.derived.is_empty() {
            first.name.clone()
        } else {
            None
        };
        let (base, bound) = self.bind_aggregate(&mut specs, Context::TopLevel { alias: alias.as_deref() })?;

        let mut declarators = vec![first];
        loop {
            self.skip_attributes()?;
            if self.eat(Punct::Eq) {
                self.scan_expression(&[Punct::Comma, Punct::Semi]);
            }
            if self.eat(Punct::Comma) {
                declarators.push(self.declarator()?);
                continue;
            }
            break;
        }

        if self.peek_punct(Punct::LBrace) {
            // Function definition, e.g. a static inline helper.
            self.skip_group(Punct::LBrace)?;
            return Ok(());
        }
        self.expect(Punct::Semi)?;

        for d in declarators {
            self.declare_declarator(specs.storage, &base, d, bound.as_deref())?;
        }
        Ok(())
    }

    fn declare_declarator(&mut self, storage: Storage, base: &CType, d: Declarator, bound: Option<&str>) -> Result<()> {
        let name = d
            .name
            .ok_or_else(|| self.error("declaration does not declare a name"))?;
        let location = self.location(d.file, d.line);
        let ty = apply(base.clone(), d.derived);

        if storage.typedef {
            if bound == Some(name.as_str()) || ty.named() == Some(name.as_str()) {
                return Ok(());
            }
            return self.declare(&name, Declaration::Typedef(ty), location);
        }
        if storage.is_static {
            return Ok(());
        }
        let decl = match ty {
            CType::Function(func) => Declaration::Function(CSignature {
                return_type: func.return_type,
                name: name.clone(),
                parameters: func.parameters,
                is_variadic: func.is_variadic,
            }),
            other => Declaration::Variable(other),
        };
        self.declare(&name, decl, location)
    }

    fn specifiers(&mut self) -> Result<Specifiers> {
        let mut storage = Storage::default();
        let mut is_const = false;
        let mut words: Vec<&'a str> = Vec::new();
        let mut named: Option<CType> = None;
        let mut aggregate = None;

        while let Some(tok) = self.peek() {
            let Some(word) = tok.ident() else { break };
            match word {
                "typedef" => storage.typedef = true,
                "static" => storage.is_static = true,
                "extern" | "inline" | "__inline" | "__inline__" | "_Noreturn" | "__extension__" | "register"
                | "auto" | "_Thread_local" | "__thread" => {}
                "const" | "__const" => is_const = true,
                w if QUALIFIERS.contains(&w) => {}
                w if ATTRIBUTES.contains(&w) => {
                    self.skip_attributes()?;
                    continue;
                }
                "struct" | "union" | "enum" => {
                    if named.is_some() || !words.is_empty() || aggregate.is_some() {
                        return Err(self.error(format!("unexpected '{word}' in declaration")));
                    }
                    aggregate = Some(self.aggregate_specifier()?);
                    continue;
                }
                w if TYPE_KEYWORDS.contains(&w) => {
                    if named.is_some() || aggregate.is_some() {
                        return Err(self.error(format!("unexpected type specifier '{w}'")));
                    }
                    words.push(w);
                }
                w => {
                    if named.is_some() || aggregate.is_some() || !words.is_empty() {
                        break;
                    }
                    named = Some(CType::builtin_typedef(w).unwrap_or_else(|| CType::Named(w.to_string())));
                }
            }
            self.pos += 1;
        }

        let base = match (named, words.is_empty(), &aggregate) {
            (_, _, Some(_)) => CType::Void,
            (Some(ty), _, None) => ty,
            (None, false, None) => keyword_type(&words)
                .ok_or_else(|| self.error(format!("unsupported type '{}'", words.join(" "))))?,
            (None, true, None) => return Err(self.error("expected a type")),
        };
        Ok(Specifiers {
            storage,
            base,
            is_const,
            aggregate,
        })
    }

    fn aggregate_specifier(&mut self) -> Result<PendingAggregate> {
        let (file, line) = self.here();
        let kind = match self.peek().and_then(Token::ident) {
            Some("struct") => AggregateKind::Struct,
            Some("union") => AggregateKind::Union,
            _ => AggregateKind::Enum,
        };
        self.pos += 1;
        self.skip_attributes()?;

        let tag = match self.peek().and_then(Token::ident) {
            Some(name) => {
                self.pos += 1;
                Some(name.to_string())
            }
            None => None,
        };
        self.skip_attributes()?;
        if kind == AggregateKind::Enum && self.eat(Punct::Colon) {
            // Fixed underlying type.
            while self.peek().and_then(Token::ident).is_some() {
                self.pos += 1;
            }
        }

        let body = if self.peek_punct(Punct::LBrace) {
            let close = self.matching(self.pos)?;
            let range = (self.pos + 1, close);
            self.pos = close + 1;
            self.skip_attributes()?;
            Some(range)
        } else {
            None
        };
        if tag.is_none() && body.is_none() {
            return Err(self.error("expected a tag name or a body"));
        }
        Ok(PendingAggregate {
            kind,
            tag,
            body,
            file,
            line,
        })
    }

    /// Register the aggregate of `specs` (if any) and return the base type of
    /// its declarators, plus the typedef name the aggregate was registered
    /// under, if any.
    fn bind_aggregate(&mut self, specs: &mut Specifiers, ctx: Context<'_>) -> Result<(CType, Option<String>)> {
        let wrap = |ty: CType, is_const: bool| if is_const { CType::Const(Box::new(ty)) } else { ty };
        let Some(agg) = specs.aggregate.take() else {
            return Ok((wrap(specs.base.clone(), specs.is_const), None));
        };
        let location = self.location(agg.file, agg.line);

        let Some((start, end)) = agg.body else {
            let tag = agg.tag.unwrap_or_default();
            if let Some(canonical) = self.tags.get(&tag) {
                return Ok((wrap(CType::Named(canonical.clone()), specs.is_const), None));
            }
            let (name, bound) = match ctx {
                Context::TopLevel { alias: Some(alias) } if agg.kind != AggregateKind::Enum => {
                    (alias.to_string(), Some(alias.to_string()))
                }
                _ => (tag.clone(), None),
            };
            self.declare(&name, Declaration::Opaque, location)?;
            self.tags.insert(tag, name.clone());
            return Ok((wrap(CType::Named(name), specs.is_const), bound));
        };

        let known = agg.tag.as_ref().and_then(|t| self.tags.get(t)).cloned();
        let (name, bound) = match (known, ctx, &agg.tag) {
            (Some(canonical), _, _) => (Some(canonical), None),
            (None, Context::TopLevel { alias: Some(alias) }, _) => (Some(alias.to_string()), Some(alias.to_string())),
            (None, _, Some(tag)) => (Some(tag.clone()), None),
            (None, Context::Member { outer, field }, None) => (Some(format!("{outer}__{field}")), None),
            (None, Context::TopLevel { alias: None }, None) => (None, None),
        };

        let Some(name) = name else {
            if agg.kind == AggregateKind::Enum {
                let decl = self.with_range(start, end, |p| p.enum_body(end))?;
                for e in decl.enumerators {
                    let constant = Declaration::Constant(ConstantDecl {
                        value: e.value,
                        ty: None,
                        expr: e.value.to_string(),
                    });
                    self.declare(&e.name, constant, location.clone())?;
                }
                return Ok((wrap(CType::Int, specs.is_const), None));
            }
            let name = format!("anon{}", self.anon);
            self.anon += 1;
            let decl = self.aggregate_decl(&agg.kind, start, end, &name)?;
            self.declare(&name, decl, location)?;
            return Ok((wrap(CType::Named(name), specs.is_const), None));
        };

        if let Some(tag) = &agg.tag {
            self.tags.entry(tag.clone()).or_insert_with(|| name.clone());
        }
        let decl = self.aggregate_decl(&agg.kind, start, end, &name)?;
        self.declare(&name, decl, location)?;
        Ok((wrap(CType::Named(name), specs.is_const), bound))
    }

    fn aggregate_decl(&mut self, kind: &AggregateKind, start: usize, end: usize, name: &str) -> Result<Declaration> {
        match kind {
            AggregateKind::Enum => Ok(Declaration::Enum(self.with_range(start, end, |p| p.enum_body(end))?)),
            AggregateKind::Struct | AggregateKind::Union => {
                let is_union = *kind == AggregateKind::Union;
                let fields = self.with_range(start, end, |p| p.struct_body(end, name))?;
                Ok(Declaration::Struct(StructDecl { is_union, fields }))
            }
        }
    }

    /// Run `f` with the cursor at `start`, restoring it afterwards.
    fn with_range<T>(&mut self, start: usize, end: usize, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let saved = self.pos;
        self.pos = start;
        let result = f(self);
        let finished = self.pos;
        self.pos = saved;
        let value = result?;
        if finished != end {
            self.pos = finished;
            let err = self.error("unexpected token in body");
            self.pos = saved;
            return Err(err);
        }
        Ok(value)
    }

    fn enum_body(&mut self, end: usize) -> Result<EnumDecl> {
        let mut enumerators = Vec::new();
        let mut next = 0i128;
        while self.pos < end {
            let name = self
                .peek()
                .and_then(Token::ident)
                .ok_or_else(|| self.error("expected an enumerator name"))?
                .to_string();
            self.pos += 1;
            self.skip_attributes()?;
            let value = if self.eat(Punct::Eq) {
                let tokens = self.scan_expression(&[Punct::Comma]);
                self.constant(tokens, &format!("value of {name}"))?
            } else {
                next
            };
            self.enumerators.insert(name.clone(), value);
            enumerators.push(Enumerator { name, value });
            next = value + 1;
            if !self.eat(Punct::Comma) && self.pos < end {
                return Err(self.error("expected ',' between enumerators"));
            }
        }
        Ok(EnumDecl { enumerators })
    }

    fn struct_body(&mut self, end: usize, outer: &str) -> Result<Vec<Field>> {
        let mut fields = Vec::new();
        let mut anon = 0usize;
        while self.pos < end {
            if self.eat(Punct::Semi) {
                continue;
            }
            let mut specs = self.specifiers()?;

            if self.peek_punct(Punct::Semi) {
                // Anonymous member aggregate.
                if specs.aggregate.is_some() {
                    let field = format!("anon{anon}");
                    anon += 1;
                    let (ty, _) = self.bind_aggregate(&mut specs, Context::Member { outer, field: &field })?;
                    fields.push(Field {
                        name: field,
                        ty,
                        bit_width: None,
                    });
                }
                self.pos += 1;
                continue;
            }

            let mut members = Vec::new();
            loop {
                let d = self.declarator()?;
                let width = if self.eat(Punct::Colon) {
                    let tokens = self.scan_expression(&[Punct::Comma, Punct::Semi]);
                    let w = self.constant(tokens, "bit-field width")?;
                    Some(u32::try_from(w).map_err(|_| self.error(format!("invalid bit-field width {w}")))?)
                } else {
                    None
                };
                self.skip_attributes()?;
                members.push((d, width));
                if !self.eat(Punct::Comma) {
                    break;
                }
            }
            self.expect(Punct::Semi)?;

            let first_name = members
                .first()
                .and_then(|(d, _)| d.name.clone())
                .unwrap_or_else(|| format!("anon{anon}"));
            let (base, _) = self.bind_aggregate(&mut specs, Context::Member { outer, field: &first_name })?;
            for (d, bit_width) in members {
                fields.push(Field {
                    name: d.name.unwrap_or_default(),
                    ty: apply(base.clone(), d.derived),
                    bit_width,
                });
            }
        }
        Ok(fields)
    }

    fn declarator(&mut self) -> Result<Declarator> {
        let (file, line) = self.here();
        let mut pointers = 0usize;
        loop {
            if self.eat(Punct::Star) {
                pointers += 1;
                continue;
            }
            match self.peek().and_then(Token::ident) {
                Some(w) if QUALIFIERS.contains(&w) => self.pos += 1,
                Some(w) if ATTRIBUTES.contains(&w) => self.skip_attributes()?,
                _ => break,
            }
        }

        let mut name = None;
        let mut inner = None;
        let nested = self.peek_punct(Punct::LParen)
            && self
                .peek_at(1)
                .is_some_and(|t| t.is_punct(Punct::Star) || t.is_punct(Punct::LParen) || t.is_punct(Punct::Caret));
        if nested {
            self.pos += 1;
            inner = Some(self.declarator()?);
            self.expect(Punct::RParen)?;
        } else if let Some(word) = self.peek().and_then(Token::ident) {
            if !TYPE_KEYWORDS.contains(&word) && !ATTRIBUTES.contains(&word) {
                name = Some(word.to_string());
                self.pos += 1;
            }
        }

        let mut suffixes = Vec::new();
        loop {
            if self.eat(Punct::LBracket) {
                let tokens = self.scan_expression(&[Punct::RBracket]);
                let size = if tokens.is_empty() {
                    None
                } else {
                    let n = self.constant(tokens, "array length")?;
                    Some(u64::try_from(n).map_err(|_| self.error(format!("invalid array length {n}")))?)
                };
                self.expect(Punct::RBracket)?;
                suffixes.push(Derived::Array(size));
            } else if self.eat(Punct::LParen) {
                let (params, variadic) = self.parameters()?;
                suffixes.push(Derived::Function(params, variadic));
            } else {
                break;
            }
        }

        let mut derived: Vec<Derived> = (0..pointers).map(|_| Derived::Pointer).collect();
        derived.extend(suffixes.into_iter().rev());
        if let Some(inner) = inner {
            name = inner.name;
            derived.extend(inner.derived);
        }
        Ok(Declarator {
            name,
            derived,
            file,
            line,
        })
    }

    /// Parameter list after the opening `(`.
    fn parameters(&mut self) -> Result<(Vec<CParam>, bool)> {
        let mut params = Vec::new();
        if self.eat(Punct::RParen) {
            return Ok((params, false));
        }
        if self.peek().is_some_and(|t| t.is_ident("void")) && self.peek_at(1).is_some_and(|t| t.is_punct(Punct::RParen)) {
            self.pos += 2;
            return Ok((params, false));
        }
        loop {
            if self.eat(Punct::Ellipsis) {
                self.expect(Punct::RParen)?;
                return Ok((params, true));
            }
            let mut specs = self.specifiers()?;
            let d = self.declarator()?;
            let (base, _) = self.bind_aggregate(&mut specs, Context::TopLevel { alias: None })?;
            let param_type = match apply(base, d.derived) {
                CType::Array(inner, _) => CType::Pointer(inner),
                CType::Function(func) => CType::Pointer(Box::new(CType::Function(func))),
                other => other,
            };
            params.push(CParam {
                param_type,
                name: d.name.unwrap_or_default(),
            });
            self.skip_attributes()?;
            if self.eat(Punct::Comma) {
                continue;
            }
            self.expect(Punct::RParen)?;
            return Ok((params, false));
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::catalog::{Catalog, Declaration, SymbolKind};
    use crate::ctype::CType;
    use crate::error::HeaderError;
    use crate::preprocess::HeaderOptions;

    fn parse(text: &str) -> Catalog {
        Catalog::parse_str("dpi.h", text, &HeaderOptions::new()).unwrap()
    }

    fn ptr(t: CType) -> CType {
        CType::Pointer(Box::new(t))
    }

    fn named(n: &str) -> CType {
        CType::Named(n.into())
    }

    #[test]
    fn opaque_typedef_then_definition() {
        let cat = parse(
            "typedef struct dpiErrorInfo dpiErrorInfo;\n\
             struct dpiErrorInfo { int32_t code; const char *message; uint32_t messageLength; };",
        );
        let sym = cat.get("dpiErrorInfo").unwrap();
        match &sym.decl {
            Declaration::Struct(s) => {
                assert_eq!(s.fields.len(), 3);
                assert_eq!(s.fields[1].ty, ptr(CType::Const(Box::new(CType::Char))));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(sym.location.line, 1);
        assert_eq!(cat.len(), 1);
    }

    #[test]
    fn typedef_struct_with_body_uses_typedef_name() {
        let cat = parse("typedef struct dpiVersionInfo_s { int versionNum; } dpiVersionInfo;");
        assert!(matches!(cat.get("dpiVersionInfo").unwrap().decl, Declaration::Struct(_)));
        assert!(cat.get("dpiVersionInfo_s").is_none());
    }

    #[test]
    fn self_referential_struct() {
        let cat = parse("typedef struct node { struct node *next; int v; } node_t;");
        match &cat.get("node_t").unwrap().decl {
            Declaration::Struct(s) => assert_eq!(s.fields[0].ty, ptr(named("node_t"))),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn implicit_opaque_from_pointer_use() {
        let cat = parse("int dpiPool_acquire(struct dpiPool *pool);");
        assert!(matches!(cat.get("dpiPool").unwrap().decl, Declaration::Opaque));
        let names: Vec<_> = cat.symbols().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["dpiPool", "dpiPool_acquire"]);
    }

    #[test]
    fn enums_implicit_and_explicit_values() {
        let cat = parse("typedef enum { DPI_A, DPI_B = 5, DPI_C, DPI_D = DPI_A | 8 } dpiKind;");
        match &cat.get("dpiKind").unwrap().decl {
            Declaration::Enum(e) => {
                let values: Vec<_> = e.enumerators.iter().map(|e| e.value).collect();
                assert_eq!(values, vec![0, 5, 6, 8]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn anonymous_enum_yields_constants() {
        let cat = parse("enum { DPI_SUCCESS = 0, DPI_FAILURE = -1 };");
        let sym = cat.get("DPI_FAILURE").unwrap();
        assert_eq!(sym.kind, SymbolKind::Constant);
        assert!(matches!(&sym.decl, Declaration::Constant(c) if c.value == -1));
    }

    #[test]
    fn defines_become_constants() {
        let cat = parse(
            "#define DPI_MODE_READ 1\n#define DPI_MODE_WRITE 2\n\
             #define DPI_MODE_READWRITE (DPI_MODE_READ | DPI_MODE_WRITE)\n\
             #define DPI_NAME \"odpi\"\n#define DPI_CALL(x) x\n",
        );
        assert!(matches!(&cat.get("DPI_MODE_READWRITE").unwrap().decl, Declaration::Constant(c) if c.value == 3));
        assert!(cat.get("DPI_NAME").is_none());
        assert!(cat.get("DPI_CALL").is_none());
    }

    #[test]
    fn nested_anonymous_aggregates_hoisted() {
        let cat = parse(
            "typedef struct { int kind; union { int64_t asInt; double asDouble; } value; struct { int a; }; } dpiData;",
        );
        match &cat.get("dpiData").unwrap().decl {
            Declaration::Struct(s) => {
                assert_eq!(s.fields[1].name, "value");
                assert_eq!(s.fields[1].ty, named("dpiData__value"));
                assert_eq!(s.fields[2].name, "anon0");
                assert_eq!(s.fields[2].ty, named("dpiData__anon0"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(&cat.get("dpiData__value").unwrap().decl, Declaration::Struct(s) if s.is_union));
    }

    #[test]
    fn arrays_bitfields_and_fn_pointer_fields() {
        let cat = parse(
            "#define DPI_LEN 4\n\
             typedef struct { char name[DPI_LEN * 2]; unsigned flag : 1; void (*callback)(void *ctx); } dpiMisc;",
        );
        match &cat.get("dpiMisc").unwrap().decl {
            Declaration::Struct(s) => {
                assert_eq!(s.fields[0].ty, CType::Array(Box::new(CType::Char), 8));
                assert_eq!(s.fields[1].bit_width, Some(1));
                assert!(s.has_bit_fields());
                assert!(s.has_fn_pointers());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn function_pointer_typedef() {
        let cat = parse("typedef int (*dpiAccessTokenCallback)(void *context, int flags);");
        match &cat.get("dpiAccessTokenCallback").unwrap().decl {
            Declaration::Typedef(t) => assert!(t.is_fn_pointer()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn skips_wrappers_and_inline_bodies() {
        let cat = parse(
            "#ifdef __cplusplus\nextern \"C\" {\n#endif\n\
             extern \"C\" int dpiA(void);\n\
             static inline int dpiHelper(int x) { if (x) { return 1; } return 0; }\n\
             int dpiB(void) __attribute__((deprecated(\"use dpiA\")));\n\
             __attribute__((visibility(\"default\"))) int dpiC(void);\n\
             #ifdef __cplusplus\n}\n#endif\n",
        );
        let names: Vec<_> = cat.symbols().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["dpiA", "dpiB", "dpiC"]);
    }

    #[test]
    fn variadic_and_extern_variables() {
        let cat = parse("int dpiLog(const char *fmt, ...);\nextern const char *dpiVersionString;");
        match &cat.get("dpiLog").unwrap().decl {
            Declaration::Function(f) => assert!(f.is_variadic),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(cat.get("dpiVersionString").unwrap().kind, SymbolKind::Variable);
    }

    #[test]
    fn identical_redeclaration_accepted() {
        let cat = parse("int dpiConn_close(dpiConn *conn);\nint dpiConn_close(dpiConn *c);\n#define X 1\n#define X 1\n");
        assert_eq!(cat.len(), 2);
    }

    #[test]
    fn conflicting_redeclaration_rejected() {
        let err = Catalog::parse_str(
            "dpi.h",
            "int dpiConn_close(dpiConn *conn);\nvoid dpiConn_close(dpiConn *conn);",
            &HeaderOptions::new(),
        )
        .unwrap_err();
        assert!(matches!(err, HeaderError::Conflict { line: 2, ref name, .. } if name == "dpiConn_close"));
    }

    #[test]
    fn syntax_errors_carry_location() {
        let err = Catalog::parse_str("dpi.h", "int ok(void);\nint broken(int;", &HeaderOptions::new()).unwrap_err();
        match err {
            HeaderError::Syntax { file, line, .. } => {
                assert_eq!(file, "dpi.h");
                assert_eq!(line, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn multiple_declarators() {
        let cat = parse("typedef struct dpiConn dpiConn, *dpiConnPtr;");
        assert!(matches!(cat.get("dpiConn").unwrap().decl, Declaration::Opaque));
        assert!(matches!(&cat.get("dpiConnPtr").unwrap().decl, Declaration::Typedef(t) if *t == ptr(named("dpiConn"))));
    }
}
