//! Integer constant expression evaluator.
//!
//! Used for `#if` conditions, `#define` constants, enumerator values,
//! array lengths, and bit-field widths.

use crate::ctype::CType;
use crate::lexer::{Punct, Token, TokenKind};

/// Name lookups available to an expression.
pub trait Scope {
    /// Value of a named integer constant or enumerator.
    fn value_of(&self, name: &str) -> Option<i128>;

    /// Builtin integer type a type name resolves to, for casts.
    fn integer_type(&self, name: &str) -> Option<CType>;
}

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluated {
    pub value: i128,
    /// Set when the whole expression is a cast, e.g. `((uint32_t) 4)`.
    pub cast: Option<CType>,
}

/// Evaluate `tokens` as a C integer constant expression.
pub fn evaluate(tokens: &[Token], scope: &dyn Scope) -> Result<Evaluated, String> {
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }
    let mut eval = Evaluator { tokens, pos: 0, scope };
    let result = eval.conditional()?;
    if let Some(tok) = tokens.get(eval.pos) {
        return Err(format!("unexpected '{}' in expression", tok.kind));
    }
    Ok(result)
}

struct Evaluator<'a> {
    tokens: &'a [Token],
    pos: usize,
    scope: &'a dyn Scope,
}

fn plain(value: i128) -> Evaluated {
    Evaluated { value, cast: None }
}

impl Evaluator<'_> {
    fn peek_punct(&self) -> Option<Punct> {
        match self.tokens.get(self.pos).map(|t| &t.kind) {
            Some(TokenKind::Punct(p)) => Some(*p),
            _ => None,
        }
    }

    fn eat(&mut self, p: Punct) -> bool {
        if self.peek_punct() == Some(p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, p: Punct) -> Result<(), String> {
        if self.eat(p) {
            Ok(())
        } else {
            Err(format!("expected '{p}' in expression"))
        }
    }

    fn conditional(&mut self) -> Result<Evaluated, String> {
        let cond = self.binary(0)?;
        if self.eat(Punct::Question) {
            let then = self.conditional()?;
            self.expect(Punct::Colon)?;
            let otherwise = self.conditional()?;
            return Ok(plain(if cond.value != 0 { then.value } else { otherwise.value }));
        }
        Ok(cond)
    }

    fn binary(&mut self, min_prec: u8) -> Result<Evaluated, String> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.peek_punct() {
            let Some(prec) = precedence(op) else { break };
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let rhs = self.binary(prec + 1)?;
            lhs = plain(apply(op, lhs.value, rhs.value)?);
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Evaluated, String> {
        match self.peek_punct() {
            Some(Punct::Minus) => {
                self.pos += 1;
                let v = self.unary()?;
                Ok(plain(v.value.checked_neg().ok_or("overflow in negation")?))
            }
            Some(Punct::Plus) => {
                self.pos += 1;
                Ok(plain(self.unary()?.value))
            }
            Some(Punct::Tilde) => {
                self.pos += 1;
                Ok(plain(!self.unary()?.value))
            }
            Some(Punct::Bang) => {
                self.pos += 1;
                Ok(plain((self.unary()?.value == 0) as i128))
            }
            Some(Punct::LParen) => {
                if let Some((written, resolved, after)) = self.cast_at(self.pos) {
                    self.pos = after;
                    let v = self.unary()?;
                    return Ok(Evaluated {
                        value: resolved.truncate(v.value),
                        cast: Some(written),
                    });
                }
                self.pos += 1;
                let inner = self.conditional()?;
                self.expect(Punct::RParen)?;
                Ok(inner)
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Evaluated, String> {
        let tok = self
            .tokens
            .get(self.pos)
            .ok_or_else(|| "unexpected end of expression".to_string())?;
        self.pos += 1;
        match &tok.kind {
            TokenKind::Int(v) => Ok(plain(*v)),
            TokenKind::Ident(name) => self
                .scope
                .value_of(name)
                .map(plain)
                .ok_or_else(|| format!("'{name}' is not an integer constant")),
            TokenKind::Float => Err("floating point value in integer expression".to_string()),
            other => Err(format!("unexpected '{other}' in expression")),
        }
    }

    /// Recognize `( type-name )` starting at `start`, returning the type as
    /// written, the integer type it resolves to, and the position after the
    /// closing parenthesis.
    fn cast_at(&self, start: usize) -> Option<(CType, CType, usize)> {
        let mut words = Vec::new();
        let mut i = start + 1;
        loop {
            match self.tokens.get(i).map(|t| &t.kind) {
                Some(TokenKind::Ident(w)) => {
                    words.push(w.as_str());
                    i += 1;
                }
                Some(TokenKind::Punct(Punct::RParen)) => break,
                _ => return None,
            }
        }
        let words: Vec<&str> = words.into_iter().filter(|w| *w != "const").collect();
        let (written, resolved) = match words.as_slice() {
            [] => return None,
            [single] => match builtin_keywords(&[single]) {
                Some(ty) => (ty.clone(), ty),
                None => (CType::Named(single.to_string()), self.scope.integer_type(single)?),
            },
            many => {
                let ty = builtin_keywords(many)?;
                (ty.clone(), ty)
            }
        };
        // A parenthesized cast must be followed by an operand.
        self.tokens.get(i + 1)?;
        Some((written, resolved, i + 1))
    }
}

/// Integer type spelled with builtin keywords, e.g. `unsigned long long`.
pub fn builtin_keywords(words: &[&str]) -> Option<CType> {
    if let [single] = words {
        if let Some(ct) = CType::builtin_typedef(single) {
            return ct.is_integer().then_some(ct);
        }
    }
    let mut unsigned = false;
    let mut signed = false;
    let mut longs = 0;
    let mut base = None;
    for w in words {
        match *w {
            "unsigned" => unsigned = true,
            "signed" => signed = true,
            "long" => longs += 1,
            "short" | "char" | "int" => {
                if base.replace(*w).is_some() {
                    return None;
                }
            }
            _ => return None,
        }
    }
    let ty = match (base, longs) {
        (Some("char"), 0) if unsigned => CType::UnsignedChar,
        (Some("char"), 0) if signed => CType::SignedChar,
        (Some("char"), 0) => CType::Char,
        (Some("short"), 0) => {
            if unsigned {
                CType::UnsignedShort
            } else {
                CType::Short
            }
        }
        (Some("int") | None, 0) if unsigned || signed || base.is_some() => {
            if unsigned {
                CType::UnsignedInt
            } else {
                CType::Int
            }
        }
        (Some("int") | None, 1) => {
            if unsigned {
                CType::UnsignedLong
            } else {
                CType::Long
            }
        }
        (Some("int") | None, 2) => {
            if unsigned {
                CType::UnsignedLongLong
            } else {
                CType::LongLong
            }
        }
        _ => return None,
    };
    Some(ty)
}

fn precedence(op: Punct) -> Option<u8> {
    let prec = match op {
        Punct::OrOr => 1,
        Punct::AndAnd => 2,
        Punct::Pipe => 3,
        Punct::Caret => 4,
        Punct::Amp => 5,
        Punct::EqEq | Punct::Ne => 6,
        Punct::Lt | Punct::Gt | Punct::Le | Punct::Ge => 7,
        Punct::Shl | Punct::Shr => 8,
        Punct::Plus | Punct::Minus => 9,
        Punct::Star | Punct::Slash | Punct::Percent => 10,
        _ => return None,
    };
    Some(prec)
}

fn apply(op: Punct, a: i128, b: i128) -> Result<i128, String> {
    let overflow = || format!("overflow evaluating '{op}'");
    let shift = |b: i128| -> Result<u32, String> {
        u32::try_from(b)
            .ok()
            .filter(|s| *s < 127)
            .ok_or_else(|| format!("invalid shift amount {b}"))
    };
    let v = match op {
        Punct::OrOr => (a != 0 || b != 0) as i128,
        Punct::AndAnd => (a != 0 && b != 0) as i128,
        Punct::Pipe => a | b,
        Punct::Caret => a ^ b,
        Punct::Amp => a & b,
        Punct::EqEq => (a == b) as i128,
        Punct::Ne => (a != b) as i128,
        Punct::Lt => (a < b) as i128,
        Punct::Gt => (a > b) as i128,
        Punct::Le => (a <= b) as i128,
        Punct::Ge => (a >= b) as i128,
        Punct::Shl => a.checked_shl(shift(b)?).ok_or_else(overflow)?,
        Punct::Shr => a >> shift(b)?,
        Punct::Plus => a.checked_add(b).ok_or_else(overflow)?,
        Punct::Minus => a.checked_sub(b).ok_or_else(overflow)?,
        Punct::Star => a.checked_mul(b).ok_or_else(overflow)?,
        Punct::Slash | Punct::Percent if b == 0 => return Err("division by zero".to_string()),
        Punct::Slash => a / b,
        Punct::Percent => a % b,
        _ => return Err(format!("unsupported operator '{op}'")),
    };
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use std::collections::HashMap;

    struct MapScope(HashMap<&'static str, i128>);

    impl Scope for MapScope {
        fn value_of(&self, name: &str) -> Option<i128> {
            self.0.get(name).copied()
        }

        fn integer_type(&self, name: &str) -> Option<CType> {
            (name == "dpiCreateMode").then_some(CType::UInt32)
        }
    }

    fn eval(text: &str) -> Result<Evaluated, String> {
        let scope = MapScope(HashMap::from([("DPI_MODE_READ", 1), ("DPI_MODE_WRITE", 2)]));
        evaluate(&tokenize(text, 0, 1).unwrap(), &scope)
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(eval("1 + 2 * 3").unwrap().value, 7);
        assert_eq!(eval("(1 + 2) * 3").unwrap().value, 9);
        assert_eq!(eval("1 << 4 | 1").unwrap().value, 17);
        assert_eq!(eval("-8 / 2").unwrap().value, -4);
        assert_eq!(eval("~0 & 0xff").unwrap().value, 0xff);
        assert_eq!(eval("!0 && 3 > 2").unwrap().value, 1);
        assert_eq!(eval("1 ? 10 : 20").unwrap().value, 10);
    }

    #[test]
    fn names_resolve_through_scope() {
        assert_eq!(eval("DPI_MODE_READ | DPI_MODE_WRITE").unwrap().value, 3);
        assert!(eval("UNKNOWN + 1").is_err());
    }

    #[test]
    fn leading_cast_sets_type() {
        let v = eval("((uint32_t) 4)").unwrap();
        assert_eq!(v.value, 4);
        assert_eq!(v.cast, Some(CType::UInt32));

        let v = eval("(dpiCreateMode) 0x10").unwrap();
        assert_eq!(v.cast, Some(CType::Named("dpiCreateMode".into())));

        let v = eval("(unsigned char) 0x1ff").unwrap();
        assert_eq!(v.value, 0xff);
        assert_eq!(v.cast, Some(CType::UnsignedChar));

        assert_eq!(eval("(int) 1 + 1").unwrap().cast, None);
    }

    #[test]
    fn rejects_non_integer() {
        assert!(eval("1.5").is_err());
        assert!(eval("\"text\"").is_err());
        assert!(eval("1 / 0").is_err());
        assert!(eval("1 +").is_err());
        assert!(eval("1 2").is_err());
    }

    #[test]
    fn keyword_types() {
        assert_eq!(builtin_keywords(&["unsigned", "long", "long"]), Some(CType::UnsignedLongLong));
        assert_eq!(builtin_keywords(&["unsigned"]), Some(CType::UnsignedInt));
        assert_eq!(builtin_keywords(&["long", "int"]), Some(CType::Long));
        assert_eq!(builtin_keywords(&["float"]), None);
    }
}
