//! A small C preprocessor.
//!
//! Resolves quoted includes, evaluates conditionals, expands macros in
//! declaration text, and hands object-like `#define`s to the parser as
//! [`TokenKind::Define`] tokens so integer constants become catalog symbols.
//! System (`<...>`) includes are skipped; the standard integer types are
//! builtin.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::ctype::CType;
use crate::error::{HeaderError, Result};
use crate::expr::{self, Scope};
use crate::lexer::{self, DefineDirective, Punct, Token, TokenKind};

const MAX_INCLUDE_DEPTH: usize = 64;

/// Include search paths and predefined macros.
#[derive(Debug, Clone, Default)]
pub struct HeaderOptions {
    /// Directories searched for quoted includes, after the including file's directory.
    pub include_paths: Vec<PathBuf>,
    /// Predefined object-like macros as `(name, value)`.
    pub defines: Vec<(String, String)>,
}

impl HeaderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_paths.push(dir.into());
        self
    }

    pub fn define(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defines.push((name.into(), value.into()));
        self
    }

    /// Add a define written as `NAME` or `NAME=VALUE` (command line form).
    pub fn define_spec(self, spec: &str) -> Self {
        match spec.split_once('=') {
            Some((name, value)) => self.define(name.trim(), value.trim()),
            None => self.define(spec.trim(), "1"),
        }
    }
}

/// One file read while building a catalog.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path on disk, `None` for in-memory input.
    pub path: Option<PathBuf>,
    /// Name used in diagnostics.
    pub name: String,
    pub contents: String,
}

/// Preprocessor output.
#[derive(Debug)]
pub struct Preprocessed {
    pub tokens: Vec<Token>,
    pub files: Vec<SourceFile>,
}

#[derive(Debug, Clone)]
enum Macro {
    Object(Vec<Token>),
    Function {
        params: Vec<String>,
        variadic: bool,
        body: Vec<Token>,
    },
}

#[derive(Debug)]
struct Cond {
    parent: bool,
    active: bool,
    taken: bool,
    seen_else: bool,
}

/// Preprocess the header at `path`.
pub fn preprocess_file(path: &Path, options: &HeaderOptions) -> Result<Preprocessed> {
    let contents = std::fs::read_to_string(path).map_err(|source| HeaderError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut pp = Preprocessor::new(options)?;
    pp.seen.insert(canonical(path));
    pp.process(Some(path.to_path_buf()), path.display().to_string(), contents, 0)?;
    Ok(pp.finish())
}

/// Preprocess in-memory header text; quoted includes resolve against the
/// include search paths only.
pub fn preprocess_str(name: &str, text: &str, options: &HeaderOptions) -> Result<Preprocessed> {
    let mut pp = Preprocessor::new(options)?;
    pp.process(None, name.to_string(), text.to_string(), 0)?;
    Ok(pp.finish())
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

struct Preprocessor<'a> {
    options: &'a HeaderOptions,
    macros: HashMap<String, Macro>,
    files: Vec<SourceFile>,
    seen: HashSet<PathBuf>,
    out: Vec<Token>,
}

/// `#if` scope: every identifier left after expansion is zero.
struct ConditionScope;

impl Scope for ConditionScope {
    fn value_of(&self, _name: &str) -> Option<i128> {
        Some(0)
    }

    fn integer_type(&self, _name: &str) -> Option<CType> {
        None
    }
}

impl<'a> Preprocessor<'a> {
    fn new(options: &'a HeaderOptions) -> Result<Self> {
        let mut macros = HashMap::new();
        for (name, value) in &options.defines {
            let body = lexer::tokenize(value, 0, 0).map_err(|detail| HeaderError::Syntax {
                file: "<command line>".to_string(),
                line: 0,
                detail: format!("-D{name}={value}: {detail}"),
            })?;
            macros.insert(name.clone(), Macro::Object(body));
        }
        Ok(Self {
            options,
            macros,
            files: Vec::new(),
            seen: HashSet::new(),
            out: Vec::new(),
        })
    }

    fn finish(self) -> Preprocessed {
        Preprocessed {
            tokens: self.out,
            files: self.files,
        }
    }

    fn syntax(&self, file: u32, line: u32, detail: impl Into<String>) -> HeaderError {
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

    fn process(&mut self, path: Option<PathBuf>, name: String, contents: String, depth: usize) -> Result<()> {
        if depth > MAX_INCLUDE_DEPTH {
            return Err(HeaderError::Syntax {
                file: name,
                line: 0,
                detail: "includes nested too deeply".to_string(),
            });
        }
        let file = self.files.len() as u32;
        let dir = path.as_deref().and_then(Path::parent).map(Path::to_path_buf);
        let lines = logical_lines(&contents).map_err(|(line, detail)| HeaderError::Syntax {
            file: name.clone(),
            line,
            detail,
        })?;
        tracing::debug!(file = %name, "preprocessing");
        self.files.push(SourceFile { path, name, contents });

        let mut conds: Vec<Cond> = Vec::new();
        let mut pending: Vec<Token> = Vec::new();
        let mut last_line = 0;

        for (line, text) in lines {
            last_line = line;
            let active = conds.last().map_or(true, |c| c.active);
            if let Some(rest) = text.trim_start().strip_prefix('#') {
                if active {
                    self.flush(&mut pending)?;
                }
                self.directive(file, line, rest, &mut conds, dir.as_deref(), depth)?;
            } else if active {
                let tokens = lexer::tokenize(&text, file, line).map_err(|d| self.syntax(file, line, d))?;
                pending.extend(tokens);
            }
        }

        if !conds.is_empty() {
            return Err(self.syntax(file, last_line, "unterminated conditional directive"));
        }
        self.flush(&mut pending)
    }

    fn flush(&mut self, pending: &mut Vec<Token>) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }
        let tokens = std::mem::take(pending);
        let (file, line) = (tokens[0].file, tokens[0].line);
        let expanded = self
            .expand(tokens, &mut Vec::new())
            .map_err(|d| self.syntax(file, line, d))?;
        self.out.extend(expanded);
        Ok(())
    }

    fn directive(
        &mut self,
        file: u32,
        line: u32,
        rest: &str,
        conds: &mut Vec<Cond>,
        dir: Option<&Path>,
        depth: usize,
    ) -> Result<()> {
        let rest = rest.trim_start();
        let name_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        let (name, args) = rest.split_at(name_len);
        let args = args.trim();
        let active = conds.last().map_or(true, |c| c.active);

        match name {
            "if" | "ifdef" | "ifndef" => {
                let value = if active {
                    match name {
                        "if" => self.condition(file, line, args)?,
                        "ifdef" => self.macros.contains_key(first_word(args)),
                        _ => !self.macros.contains_key(first_word(args)),
                    }
                } else {
                    false
                };
                conds.push(Cond {
                    parent: active,
                    active: active && value,
                    taken: active && value,
                    seen_else: false,
                });
            }
            "elif" => {
                let (parent, taken, seen_else) = match conds.last() {
                    Some(c) => (c.parent, c.taken, c.seen_else),
                    None => return Err(self.syntax(file, line, "#elif without #if")),
                };
                if seen_else {
                    return Err(self.syntax(file, line, "#elif after #else"));
                }
                let value = parent && !taken && self.condition(file, line, args)?;
                if let Some(c) = conds.last_mut() {
                    c.active = value;
                    c.taken |= value;
                }
            }
            "else" => {
                let c = match conds.last_mut() {
                    Some(c) => c,
                    None => return Err(self.syntax(file, line, "#else without #if")),
                };
                if c.seen_else {
                    return Err(self.syntax(file, line, "duplicate #else"));
                }
                c.seen_else = true;
                c.active = c.parent && !c.taken;
                c.taken = true;
            }
            "endif" => {
                if conds.pop().is_none() {
                    return Err(self.syntax(file, line, "#endif without #if"));
                }
            }
            _ if !active => {}
            "" | "pragma" | "line" | "ident" => {}
            "define" => self.define(file, line, args)?,
            "undef" => {
                self.macros.remove(first_word(args));
            }
            "include" => self.include(file, line, args, dir, depth)?,
            "error" => {
                return Err(HeaderError::ErrorDirective {
                    file: self.file_name(file),
                    line,
                    message: args.to_string(),
                });
            }
            "warning" => {
                tracing::warn!(file = %self.file_name(file), line, "#warning {args}");
            }
            other => {
                return Err(self.syntax(file, line, format!("unknown directive #{other}")));
            }
        }
        Ok(())
    }

    fn condition(&self, file: u32, line: u32, args: &str) -> Result<bool> {
        let tokens = lexer::tokenize(args, file, line).map_err(|d| self.syntax(file, line, d))?;
        let mut resolved = Vec::with_capacity(tokens.len());
        let mut i = 0;
        while i < tokens.len() {
            if tokens[i].is_ident("defined") {
                let (name, next) = match (tokens.get(i + 1), tokens.get(i + 2), tokens.get(i + 3)) {
                    (Some(open), Some(id), Some(close))
                        if open.is_punct(Punct::LParen) && close.is_punct(Punct::RParen) =>
                    {
                        (id.ident(), i + 4)
                    }
                    (Some(id), _, _) => (id.ident(), i + 2),
                    _ => (None, i + 1),
                };
                let name = name.ok_or_else(|| self.syntax(file, line, "malformed defined()"))?;
                let value = self.macros.contains_key(name) as i128;
                resolved.push(Token {
                    kind: TokenKind::Int(value),
                    file,
                    line,
                });
                i = next;
            } else {
                resolved.push(tokens[i].clone());
                i += 1;
            }
        }
        let expanded = self
            .expand(resolved, &mut Vec::new())
            .map_err(|d| self.syntax(file, line, d))?;
        let value = expr::evaluate(&expanded, &ConditionScope)
            .map_err(|d| self.syntax(file, line, format!("in #if: {d}")))?;
        Ok(value.value != 0)
    }

    fn define(&mut self, file: u32, line: u32, args: &str) -> Result<()> {
        let name_len = args
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(args.len());
        let (name, rest) = args.split_at(name_len);
        if name.is_empty() {
            return Err(self.syntax(file, line, "#define without a name"));
        }

        if let Some(params_text) = rest.strip_prefix('(') {
            let close = params_text
                .find(')')
                .ok_or_else(|| self.syntax(file, line, format!("unterminated parameter list in macro {name}")))?;
            let mut params = Vec::new();
            let mut variadic = false;
            for p in params_text[..close].split(',').map(str::trim).filter(|p| !p.is_empty()) {
                if p == "..." {
                    variadic = true;
                } else {
                    params.push(p.to_string());
                }
            }
            let body = lexer::tokenize(&params_text[close + 1..], file, line)
                .map_err(|d| self.syntax(file, line, d))?;
            self.macros.insert(
                name.to_string(),
                Macro::Function {
                    params,
                    variadic,
                    body,
                },
            );
            return Ok(());
        }

        let body = lexer::tokenize(rest, file, line).map_err(|d| self.syntax(file, line, d))?;
        if !body.is_empty() {
            self.out.push(Token {
                kind: TokenKind::Define(Box::new(DefineDirective {
                    name: name.to_string(),
                    body: body.clone(),
                })),
                file,
                line,
            });
        }
        self.macros.insert(name.to_string(), Macro::Object(body));
        Ok(())
    }

    fn include(&mut self, file: u32, line: u32, args: &str, dir: Option<&Path>, depth: usize) -> Result<()> {
        if args.starts_with('<') {
            tracing::trace!(include = args, "skipping system include");
            return Ok(());
        }
        let target = args
            .strip_prefix('"')
            .and_then(|s| s.split_once('"'))
            .map(|(target, _)| target)
            .ok_or_else(|| self.syntax(file, line, format!("unsupported #include {args}")))?;

        let candidates = dir
            .map(|d| d.join(target))
            .into_iter()
            .chain(self.options.include_paths.iter().map(|p| p.join(target)));
        let mut found = None;
        for candidate in candidates {
            if candidate.is_file() {
                found = Some(candidate);
                break;
            }
        }
        let path = found.ok_or_else(|| HeaderError::UnresolvedInclude {
            file: self.file_name(file),
            line,
            include: target.to_string(),
        })?;

        if !self.seen.insert(canonical(&path)) {
            return Ok(());
        }
        let contents = std::fs::read_to_string(&path).map_err(|source| HeaderError::Io {
            path: path.clone(),
            source,
        })?;
        let name = path.display().to_string();
        self.process(Some(path), name, contents, depth + 1)
    }

    /// Expand macros in `tokens`. Names in `hide` are being expanded and
    /// are left alone.
    fn expand(&self, tokens: Vec<Token>, hide: &mut Vec<String>) -> std::result::Result<Vec<Token>, String> {
        let mut out = Vec::with_capacity(tokens.len());
        let mut i = 0;
        while i < tokens.len() {
            let tok = &tokens[i];
            if let TokenKind::Ident(name) = &tok.kind {
                if !hide.contains(name) {
                    match self.macros.get(name) {
                        Some(Macro::Object(body)) => {
                            let body = relocate(body, tok);
                            hide.push(name.clone());
                            let expanded = self.expand(body, hide);
                            hide.pop();
                            out.extend(expanded?);
                            i += 1;
                            continue;
                        }
                        Some(Macro::Function {
                            params,
                            variadic,
                            body,
                        }) if tokens.get(i + 1).is_some_and(|t| t.is_punct(Punct::LParen)) => {
                            let (args, next) = collect_args(&tokens, i + 1)?;
                            let mut expanded_args = Vec::with_capacity(args.len());
                            for arg in &args {
                                expanded_args.push(self.expand(arg.clone(), hide)?);
                            }
                            let body = substitute(name, params, *variadic, body, &args, &expanded_args, tok)?;
                            hide.push(name.clone());
                            let expanded = self.expand(body, hide);
                            hide.pop();
                            out.extend(expanded?);
                            i = next;
                            continue;
                        }
                        _ => {}
                    }
                }
            }
            out.push(tok.clone());
            i += 1;
        }
        Ok(out)
    }
}

fn first_word(args: &str) -> &str {
    args.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .next()
        .unwrap_or("")
}

fn relocate(body: &[Token], at: &Token) -> Vec<Token> {
    body.iter()
        .map(|t| Token {
            kind: t.kind.clone(),
            file: at.file,
            line: at.line,
        })
        .collect()
}

/// Split a macro invocation's arguments starting at the `(` at `open`.
/// Returns the arguments and the index after the closing `)`.
fn collect_args(tokens: &[Token], open: usize) -> std::result::Result<(Vec<Vec<Token>>, usize), String> {
    let mut args = vec![Vec::new()];
    let mut depth = 0usize;
    for (i, tok) in tokens.iter().enumerate().skip(open + 1) {
        match &tok.kind {
            TokenKind::Punct(Punct::LParen) => depth += 1,
            TokenKind::Punct(Punct::RParen) if depth == 0 => return Ok((args, i + 1)),
            TokenKind::Punct(Punct::RParen) => depth -= 1,
            TokenKind::Punct(Punct::Comma) if depth == 0 => {
                args.push(Vec::new());
                continue;
            }
            _ => {}
        }
        if let Some(last) = args.last_mut() {
            last.push(tok.clone());
        }
    }
    Err("unterminated macro invocation".to_string())
}

fn substitute(
    name: &str,
    params: &[String],
    variadic: bool,
    body: &[Token],
    raw_args: &[Vec<Token>],
    args: &[Vec<Token>],
    at: &Token,
) -> std::result::Result<Vec<Token>, String> {
    let no_args = params.is_empty() && !variadic && raw_args.len() == 1 && raw_args[0].is_empty();
    let arg_count = if no_args { 0 } else { raw_args.len() };
    if arg_count < params.len() || (arg_count > params.len() && !variadic) {
        return Err(format!(
            "macro {name} expects {} arguments, got {arg_count}",
            params.len()
        ));
    }

    let lookup = |ident: &str, raw: bool| -> Option<Vec<Token>> {
        let source = if raw { raw_args } else { args };
        if let Some(idx) = params.iter().position(|p| p == ident) {
            return source.get(idx).cloned();
        }
        if variadic && ident == "__VA_ARGS__" {
            let mut joined = Vec::new();
            for (k, arg) in source.iter().enumerate().skip(params.len()) {
                if k > params.len() {
                    joined.push(Token {
                        kind: TokenKind::Punct(Punct::Comma),
                        file: at.file,
                        line: at.line,
                    });
                }
                joined.extend(arg.iter().cloned());
            }
            return Some(joined);
        }
        None
    };

    let mut out: Vec<Token> = Vec::new();
    let mut paste = false;
    let mut i = 0;
    while i < body.len() {
        let tok = &body[i];
        if tok.is_punct(Punct::Hash) {
            if let Some(arg) = body.get(i + 1).and_then(|t| t.ident()).and_then(|id| lookup(id, true)) {
                out.push(Token {
                    kind: TokenKind::Str(lexer::render(&arg)),
                    file: at.file,
                    line: at.line,
                });
                i += 2;
                continue;
            }
        }
        if tok.is_punct(Punct::HashHash) {
            paste = true;
            i += 1;
            continue;
        }

        let piece = match tok.ident().and_then(|id| lookup(id, paste || next_is_paste(body, i))) {
            Some(arg) => arg,
            None => vec![tok.clone()],
        };
        let mut piece = relocate(&piece, at);
        if paste && !piece.is_empty() {
            if let Some(left) = out.pop() {
                let right = piece.remove(0);
                let glued = format!("{}{}", lexer::render(&[left]), lexer::render(&[right]));
                out.extend(lexer::tokenize(&glued, at.file, at.line)?);
            }
        }
        paste = false;
        out.extend(piece);
        i += 1;
    }
    Ok(out)
}

fn next_is_paste(body: &[Token], i: usize) -> bool {
    body.get(i + 1).is_some_and(|t| t.is_punct(Punct::HashHash))
}

/// Strip comments and join backslash continuations. Returns logical lines
/// tagged with the physical line they start on.
fn logical_lines(text: &str) -> std::result::Result<Vec<(u32, String)>, (u32, String)> {
    #[derive(PartialEq)]
    enum State {
        Code,
        Quote(char),
        LineComment,
        BlockComment(u32),
    }

    let mut stripped = String::with_capacity(text.len());
    let mut state = State::Code;
    let mut line = 1u32;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\n' {
            line += 1;
            if matches!(state, State::LineComment | State::Quote(_)) {
                state = State::Code;
            }
            stripped.push('\n');
            continue;
        }
        match state {
            State::Code => match (c, chars.peek()) {
                ('/', Some('/')) => {
                    chars.next();
                    state = State::LineComment;
                }
                ('/', Some('*')) => {
                    chars.next();
                    stripped.push(' ');
                    state = State::BlockComment(line);
                }
                ('"', _) | ('\'', _) => {
                    stripped.push(c);
                    state = State::Quote(c);
                }
                _ => stripped.push(c),
            },
            State::Quote(q) => {
                stripped.push(c);
                if c == '\\' {
                    if let Some(&next) = chars.peek() {
                        if next != '\n' {
                            stripped.push(next);
                            chars.next();
                        }
                    }
                } else if c == q {
                    state = State::Code;
                }
            }
            State::LineComment => {}
            State::BlockComment(_) => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = State::Code;
                }
            }
        }
    }
    if let State::BlockComment(start) = state {
        return Err((start, "unterminated comment".to_string()));
    }

    let mut lines = Vec::new();
    let mut current = String::new();
    let mut start = 0u32;
    for (idx, raw) in stripped.split('\n').enumerate() {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        if current.is_empty() {
            start = idx as u32 + 1;
        }
        match raw.strip_suffix('\\') {
            Some(joined) => {
                current.push_str(joined);
                current.push(' ');
            }
            None => {
                current.push_str(raw);
                lines.push((start, std::mem::take(&mut current)));
            }
        }
    }
    if !current.is_empty() {
        lines.push((start, current));
    }
    Ok(lines)
}
