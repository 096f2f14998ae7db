//! Hand-written C tokenizer.
//!
//! Works on one logical line at a time (the preprocessor has already removed
//! comments and joined continuation lines). Handles identifiers, integer and
//! character literals, string literals, and C punctuation. Floating-point
//! literals are recognized but their value is discarded.

/// Punctuation tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semi,
    Comma,
    Colon,
    Question,
    Dot,
    Arrow,
    Ellipsis,
    Hash,
    HashHash,
    Star,
    Slash,
    Percent,
    Plus,
    Minus,
    Tilde,
    Bang,
    Amp,
    Pipe,
    Caret,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    EqEq,
    Ne,
    AndAnd,
    OrOr,
}

impl Punct {
    fn as_str(self) -> &'static str {
        match self {
            Punct::LParen => "(",
            Punct::RParen => ")",
            Punct::LBrace => "{",
            Punct::RBrace => "}",
            Punct::LBracket => "[",
            Punct::RBracket => "]",
            Punct::Semi => ";",
            Punct::Comma => ",",
            Punct::Colon => ":",
            Punct::Question => "?",
            Punct::Dot => ".",
            Punct::Arrow => "->",
            Punct::Ellipsis => "...",
            Punct::Hash => "#",
            Punct::HashHash => "##",
            Punct::Star => "*",
            Punct::Slash => "/",
            Punct::Percent => "%",
            Punct::Plus => "+",
            Punct::Minus => "-",
            Punct::Tilde => "~",
            Punct::Bang => "!",
            Punct::Amp => "&",
            Punct::Pipe => "|",
            Punct::Caret => "^",
            Punct::Shl => "<<",
            Punct::Shr => ">>",
            Punct::Lt => "<",
            Punct::Gt => ">",
            Punct::Le => "<=",
            Punct::Ge => ">=",
            Punct::Eq => "=",
            Punct::EqEq => "==",
            Punct::Ne => "!=",
            Punct::AndAnd => "&&",
            Punct::OrOr => "||",
        }
    }
}

impl std::fmt::Display for Punct {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `#define NAME body` directive handed from the preprocessor to the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefineDirective {
    pub name: String,
    pub body: Vec<Token>,
}

/// Token payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Ident(String),
    Int(i128),
    Float,
    Str(String),
    Punct(Punct),
    /// Object-like macro definition, evaluated as a constant by the parser.
    Define(Box<DefineDirective>),
}

/// A token with its source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Index into the list of processed source files.
    pub file: u32,
    pub line: u32,
}

impl Token {
    pub fn is_punct(&self, p: Punct) -> bool {
        matches!(self.kind, TokenKind::Punct(q) if q == p)
    }

    pub fn is_ident(&self, name: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(s) if s == name)
    }

    pub fn ident(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Ident(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::Ident(s) => write!(f, "{s}"),
            TokenKind::Int(v) => write!(f, "{v}"),
            TokenKind::Float => write!(f, "<float>"),
            TokenKind::Str(s) => write!(f, "\"{s}\""),
            TokenKind::Punct(p) => write!(f, "{p}"),
            TokenKind::Define(d) => write!(f, "#define {}", d.name),
        }
    }
}

/// Render a token sequence back to compact C text.
pub fn render(tokens: &[Token]) -> String {
    let mut out = String::new();
    for (i, tok) in tokens.iter().enumerate() {
        if i > 0 {
            let prev_word = matches!(
                tokens[i - 1].kind,
                TokenKind::Ident(_) | TokenKind::Int(_) | TokenKind::Float
            );
            let this_word = matches!(
                tok.kind,
                TokenKind::Ident(_) | TokenKind::Int(_) | TokenKind::Float
            );
            if prev_word && this_word {
                out.push(' ');
            }
        }
        out.push_str(&tok.kind.to_string());
    }
    out
}

/// Tokenize one logical source line.
///
/// Errors carry a human-readable detail; the caller attaches the location.
pub fn tokenize(text: &str, file: u32, line: u32) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let push = |tokens: &mut Vec<Token>, kind: TokenKind| tokens.push(Token { kind, file, line });

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // Comments that survived line joining
        if c == '/' && chars.get(i + 1) == Some(&'/') {
            break;
        }
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            let mut j = i + 2;
            while j + 1 < chars.len() && !(chars[j] == '*' && chars[j + 1] == '/') {
                j += 1;
            }
            if j + 1 >= chars.len() {
                return Err("unterminated comment".to_string());
            }
            i = j + 2;
            continue;
        }

        // String and char literals, with optional encoding prefix
        let prefix_len = string_prefix_len(&chars, i);
        if let Some(q) = chars.get(i + prefix_len).copied() {
            if (q == '"' || q == '\'') && (prefix_len > 0 || c == q) {
                let (body, next) = read_quoted(&chars, i + prefix_len, q)?;
                if q == '"' {
                    push(&mut tokens, TokenKind::Str(body));
                } else {
                    push(&mut tokens, TokenKind::Int(char_value(&body)?));
                }
                i = next;
                continue;
            }
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            push(&mut tokens, TokenKind::Ident(chars[start..i].iter().collect()));
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            let (kind, next) = read_number(&chars, i)?;
            push(&mut tokens, kind);
            i = next;
            continue;
        }

        let (punct, len) = read_punct(&chars, i).ok_or_else(|| format!("unexpected character '{c}'"))?;
        push(&mut tokens, TokenKind::Punct(punct));
        i += len;
    }

    Ok(tokens)
}

fn string_prefix_len(chars: &[char], i: usize) -> usize {
    let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
    if rest.starts_with("u8\"") {
        2
    } else if (rest.starts_with('L') || rest.starts_with('u') || rest.starts_with('U'))
        && matches!(chars.get(i + 1), Some('"') | Some('\''))
    {
        1
    } else {
        0
    }
}

fn read_quoted(chars: &[char], start: usize, quote: char) -> Result<(String, usize), String> {
    let mut body = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                if i + 1 >= chars.len() {
                    break;
                }
                body.push('\\');
                body.push(chars[i + 1]);
                i += 2;
            }
            c if c == quote => return Ok((body, i + 1)),
            c => {
                body.push(c);
                i += 1;
            }
        }
    }
    Err(format!("unterminated {} literal", if quote == '"' { "string" } else { "character" }))
}

fn char_value(body: &str) -> Result<i128, String> {
    let mut chars = body.chars();
    let value = match (chars.next(), chars.next()) {
        (Some('\\'), Some(esc)) => match esc {
            'n' => 10,
            't' => 9,
            'r' => 13,
            '0' if body.len() == 2 => 0,
            '\\' => 92,
            '\'' => 39,
            '"' => 34,
            'a' => 7,
            'b' => 8,
            'f' => 12,
            'v' => 11,
            'x' => i128::from_str_radix(&body[2..], 16)
                .map_err(|_| format!("invalid hex escape '{body}'"))?,
            d if d.is_digit(8) => i128::from_str_radix(&body[1..], 8)
                .map_err(|_| format!("invalid octal escape '{body}'"))?,
            other => other as i128,
        },
        (Some(c), None) => c as i128,
        _ => return Err(format!("unsupported character literal '{body}'")),
    };
    Ok(value)
}

fn read_number(chars: &[char], start: usize) -> Result<(TokenKind, usize), String> {
    let mut i = start;
    let is_hex = chars[i] == '0' && matches!(chars.get(i + 1), Some('x') | Some('X'));
    if is_hex {
        i += 2;
    }
    let digits_start = i;
    while i < chars.len() && (chars[i].is_ascii_hexdigit() && (is_hex || chars[i].is_ascii_digit())) {
        i += 1;
    }

    // Anything that continues like a float is consumed and discarded.
    let floaty = match chars.get(i) {
        Some('.') => true,
        Some('e') | Some('E') => !is_hex,
        Some('p') | Some('P') => is_hex,
        _ => false,
    };
    if floaty {
        while i < chars.len() {
            let c = chars[i];
            let exp_sign = (c == '+' || c == '-')
                && matches!(chars.get(i.wrapping_sub(1)), Some('e') | Some('E') | Some('p') | Some('P'));
            if c.is_ascii_alphanumeric() || c == '.' || exp_sign {
                i += 1;
            } else {
                break;
            }
        }
        return Ok((TokenKind::Float, i));
    }

    let digits: String = chars[digits_start..i].iter().collect();
    while i < chars.len() && matches!(chars[i], 'u' | 'U' | 'l' | 'L') {
        i += 1;
    }
    if i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
        let text: String = chars[start..=i].iter().collect();
        return Err(format!("invalid numeric literal '{text}'"));
    }

    let (radix, digits) = if is_hex {
        (16, digits.as_str())
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits.as_str())
    };
    if digits.is_empty() {
        return Err("numeric literal has no digits".to_string());
    }
    let value = u64::from_str_radix(digits, radix)
        .map_err(|_| format!("integer literal '{digits}' does not fit in 64 bits"))?;
    Ok((TokenKind::Int(value as i128), i))
}

fn read_punct(chars: &[char], i: usize) -> Option<(Punct, usize)> {
    let next = chars.get(i + 1).copied();
    let three = (chars.get(i).copied(), next, chars.get(i + 2).copied());
    if three == (Some('.'), Some('.'), Some('.')) {
        return Some((Punct::Ellipsis, 3));
    }
    let two = match (chars[i], next) {
        ('<', Some('<')) => Some(Punct::Shl),
        ('>', Some('>')) => Some(Punct::Shr),
        ('<', Some('=')) => Some(Punct::Le),
        ('>', Some('=')) => Some(Punct::Ge),
        ('=', Some('=')) => Some(Punct::EqEq),
        ('!', Some('=')) => Some(Punct::Ne),
        ('&', Some('&')) => Some(Punct::AndAnd),
        ('|', Some('|')) => Some(Punct::OrOr),
        ('-', Some('>')) => Some(Punct::Arrow),
        ('#', Some('#')) => Some(Punct::HashHash),
        _ => None,
    };
    if let Some(p) = two {
        return Some((p, 2));
    }
    let one = match chars[i] {
        '(' => Punct::LParen,
        ')' => Punct::RParen,
        '{' => Punct::LBrace,
        '}' => Punct::RBrace,
        '[' => Punct::LBracket,
        ']' => Punct::RBracket,
        ';' => Punct::Semi,
        ',' => Punct::Comma,
        ':' => Punct::Colon,
        '?' => Punct::Question,
        '.' => Punct::Dot,
        '#' => Punct::Hash,
        '*' => Punct::Star,
        '/' => Punct::Slash,
        '%' => Punct::Percent,
        '+' => Punct::Plus,
        '-' => Punct::Minus,
        '~' => Punct::Tilde,
        '!' => Punct::Bang,
        '&' => Punct::Amp,
        '|' => Punct::Pipe,
        '^' => Punct::Caret,
        '<' => Punct::Lt,
        '>' => Punct::Gt,
        '=' => Punct::Eq,
        _ => return None,
    };
    Some((one, 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<TokenKind> {
        tokenize(text, 0, 1).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn tokenize_prototype() {
        let k = kinds("int dpiConn_ping(dpiConn *conn);");
        assert_eq!(k[0], TokenKind::Ident("int".into()));
        assert_eq!(k[2], TokenKind::Punct(Punct::LParen));
        assert_eq!(k[4], TokenKind::Punct(Punct::Star));
        assert_eq!(k.last(), Some(&TokenKind::Punct(Punct::Semi)));
    }

    #[test]
    fn integer_literals() {
        assert_eq!(kinds("0x10"), vec![TokenKind::Int(16)]);
        assert_eq!(kinds("010"), vec![TokenKind::Int(8)]);
        assert_eq!(kinds("42u"), vec![TokenKind::Int(42)]);
        assert_eq!(kinds("0xFFFFFFFFUL"), vec![TokenKind::Int(0xFFFF_FFFF)]);
        assert_eq!(kinds("0"), vec![TokenKind::Int(0)]);
    }

    #[test]
    fn float_literals_are_opaque() {
        assert_eq!(kinds("1.5e-3f"), vec![TokenKind::Float]);
        assert_eq!(kinds(".5"), vec![TokenKind::Float]);
    }

    #[test]
    fn char_and_string_literals() {
        assert_eq!(kinds("'A'"), vec![TokenKind::Int(65)]);
        assert_eq!(kinds("'\\n'"), vec![TokenKind::Int(10)]);
        assert_eq!(kinds("\"C\""), vec![TokenKind::Str("C".into())]);
    }

    #[test]
    fn multi_char_punctuation() {
        assert_eq!(
            kinds("(1 << 3) ... >= !="),
            vec![
                TokenKind::Punct(Punct::LParen),
                TokenKind::Int(1),
                TokenKind::Punct(Punct::Shl),
                TokenKind::Int(3),
                TokenKind::Punct(Punct::RParen),
                TokenKind::Punct(Punct::Ellipsis),
                TokenKind::Punct(Punct::Ge),
                TokenKind::Punct(Punct::Ne),
            ]
        );
    }

    #[test]
    fn trailing_comment_ignored() {
        assert_eq!(kinds("int x; // trailing").len(), 3);
        assert_eq!(kinds("int /* inline */ x;").len(), 3);
    }

    #[test]
    fn invalid_character() {
        assert!(tokenize("int @x;", 0, 1).is_err());
    }

    #[test]
    fn render_round_trip_text() {
        let toks = tokenize("( (uint32_t) 1 << 4 )", 0, 1).unwrap();
        assert_eq!(render(&toks), "((uint32_t)1<<4)");
    }
}
