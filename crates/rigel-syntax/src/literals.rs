//! Literal decoding with Java semantics.
//!
//! Tokens keep their raw text; these helpers turn that text into values.
//! Integer literals follow Java's two's-complement rules: decimal literals
//! are limited to the signed maximum while hex, octal and binary literals
//! may use the full unsigned bit pattern (`0xFFFF_FFFF` is `-1`).

use std::ops::Range;

use crate::ast::LiteralKind;

#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Char(char),
    Str(String),
    Null,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct LiteralError {
    pub message: String,
    /// Byte range within the literal text, not file offsets.
    pub span: Range<usize>,
}

fn err(message: impl Into<String>, span: Range<usize>) -> LiteralError {
    LiteralError {
        message: message.into(),
        span,
    }
}

/// Decodes a literal of the given kind.
pub fn decode(kind: LiteralKind, text: &str) -> Result<LiteralValue, LiteralError> {
    match kind {
        LiteralKind::Int => Ok(LiteralValue::Int(parse_int_literal(text)?)),
        LiteralKind::Long => Ok(LiteralValue::Long(parse_long_literal(text)?)),
        LiteralKind::Float => Ok(LiteralValue::Float(parse_float_literal(text)?)),
        LiteralKind::Double => Ok(LiteralValue::Double(parse_double_literal(text)?)),
        LiteralKind::Char => Ok(LiteralValue::Char(unescape_char_literal(text)?)),
        LiteralKind::Str => Ok(LiteralValue::Str(unescape_string_literal(text)?)),
        LiteralKind::Bool => match text {
            "true" => Ok(LiteralValue::Bool(true)),
            "false" => Ok(LiteralValue::Bool(false)),
            _ => Err(err(
                format!("invalid boolean literal `{text}`"),
                0..text.len(),
            )),
        },
        LiteralKind::Null => Ok(LiteralValue::Null),
    }
}

pub fn parse_int_literal(text: &str) -> Result<i32, LiteralError> {
    let (digits, base) = split_radix(text)?;
    if matches!(text.as_bytes().last(), Some(b'l' | b'L')) {
        return Err(err(
            "int literal must not carry an `L` suffix",
            text.len() - 1..text.len(),
        ));
    }
    // Decimal literals are bounded by i32::MAX; other radixes may fill all
    // 32 bits and reinterpret as negative.
    let limit = if base == 10 {
        i32::MAX as u64
    } else {
        u32::MAX as u64
    };
    let value = accumulate(digits, base, limit, text.len())?;
    Ok(value as u32 as i32)
}

pub fn parse_long_literal(text: &str) -> Result<i64, LiteralError> {
    let without_suffix = match text.as_bytes().last() {
        Some(b'l' | b'L') => &text[..text.len() - 1],
        _ => {
            return Err(err(
                "long literal is missing its `L` suffix",
                text.len().saturating_sub(1)..text.len(),
            ))
        }
    };
    let (digits, base) = split_radix(without_suffix)?;
    let limit = if base == 10 { i64::MAX as u64 } else { u64::MAX };
    let value = accumulate(digits, base, limit, text.len())?;
    Ok(value as i64)
}

fn split_radix(text: &str) -> Result<(&str, u32), LiteralError> {
    let bytes = text.as_bytes();
    if bytes.is_empty() {
        return Err(err("empty integer literal", 0..0));
    }
    if bytes[0] != b'0' || bytes.len() == 1 {
        return Ok((text, 10));
    }
    match bytes[1] {
        b'x' | b'X' => Ok((&text[2..], 16)),
        b'b' | b'B' => Ok((&text[2..], 2)),
        // Leading zero with more digits is octal.
        _ => Ok((&text[1..], 8)),
    }
}

fn accumulate(digits: &str, base: u32, limit: u64, full_len: usize) -> Result<u64, LiteralError> {
    if digits.is_empty() || digits.bytes().all(|b| b == b'_') {
        return Err(err("integer literal has no digits", 0..full_len));
    }
    if digits.starts_with('_') || digits.ends_with('_') {
        return Err(err(
            "underscores must sit between digits",
            0..full_len,
        ));
    }

    let mut value: u64 = 0;
    for (idx, c) in digits.char_indices() {
        if c == '_' {
            continue;
        }
        let digit = c
            .to_digit(base)
            .ok_or_else(|| err(format!("invalid digit `{c}` for base {base}"), idx..idx + 1))?;
        value = value
            .checked_mul(base as u64)
            .and_then(|v| v.checked_add(digit as u64))
            .filter(|v| *v <= limit)
            .ok_or_else(|| err("integer literal out of range", 0..full_len))?;
    }
    Ok(value)
}

pub fn parse_float_literal(text: &str) -> Result<f32, LiteralError> {
    Ok(parse_floating(text, &['f', 'F'], &[])? as f32)
}

pub fn parse_double_literal(text: &str) -> Result<f64, LiteralError> {
    parse_floating(text, &['d', 'D'], &['f', 'F'])
}

fn parse_floating(
    text: &str,
    suffixes: &[char],
    rejected: &[char],
) -> Result<f64, LiteralError> {
    let last = text
        .chars()
        .last()
        .ok_or_else(|| err("empty floating literal", 0..0))?;
    if rejected.contains(&last) {
        return Err(err(
            format!("unexpected `{last}` suffix"),
            text.len() - 1..text.len(),
        ));
    }
    let main = if suffixes.contains(&last) {
        &text[..text.len() - last.len_utf8()]
    } else {
        text
    };
    if main.is_empty() {
        return Err(err("floating literal has no digits", 0..text.len()));
    }
    if main.starts_with('_') || main.ends_with('_') {
        return Err(err("underscores must sit between digits", 0..text.len()));
    }

    let sanitized: String = main.chars().filter(|&c| c != '_').collect();
    if let Some(rest) = sanitized
        .strip_prefix("0x")
        .or_else(|| sanitized.strip_prefix("0X"))
    {
        return parse_hex_floating(rest, text.len());
    }
    sanitized
        .parse::<f64>()
        .map_err(|_| err("invalid floating literal", 0..text.len()))
}

/// `0x<mantissa>p<exp>`: mantissa is hex with an optional fraction, the
/// binary exponent is decimal.
fn parse_hex_floating(rest: &str, full_len: usize) -> Result<f64, LiteralError> {
    let bad = || err("invalid hexadecimal floating literal", 0..full_len);
    let exp_at = rest.find(['p', 'P']).ok_or_else(bad)?;
    let (mantissa, exp_text) = (&rest[..exp_at], &rest[exp_at + 1..]);
    let exponent: i32 = exp_text.parse().map_err(|_| bad())?;

    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, f),
        None => (mantissa, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(bad());
    }

    let mut value: f64 = 0.0;
    for c in int_part.chars() {
        let digit = c.to_digit(16).ok_or_else(bad)?;
        value = value * 16.0 + f64::from(digit);
    }
    let mut scale = 1.0 / 16.0;
    for c in frac_part.chars() {
        let digit = c.to_digit(16).ok_or_else(bad)?;
        value += f64::from(digit) * scale;
        scale /= 16.0;
    }
    Ok(value * 2f64.powi(exponent))
}

pub fn unescape_char_literal(text: &str) -> Result<char, LiteralError> {
    if text.len() < 2 || !text.starts_with('\'') || !text.ends_with('\'') {
        return Err(err("unterminated character literal", 0..text.len()));
    }
    let decoded = unescape_body(&text[1..text.len() - 1], 1)?;
    let mut units = decoded.encode_utf16();
    let first = units.next();
    if first.is_none() || units.next().is_some() {
        return Err(err(
            "character literal must contain exactly one character",
            0..text.len(),
        ));
    }
    // Exactly one UTF-16 unit, so the char round trip is lossless.
    decoded
        .chars()
        .next()
        .ok_or_else(|| err("empty character literal", 0..text.len()))
}

pub fn unescape_string_literal(text: &str) -> Result<String, LiteralError> {
    if text.len() < 2 || !text.starts_with('"') || !text.ends_with('"') {
        return Err(err("unterminated string literal", 0..text.len()));
    }
    unescape_body(&text[1..text.len() - 1], 1)
}

fn unescape_body(body: &str, base: usize) -> Result<String, LiteralError> {
    let mut out = String::with_capacity(body.len());
    let bytes = body.as_bytes();
    let mut idx = 0;
    while idx < body.len() {
        let c = body[idx..].chars().next().unwrap_or('\u{FFFD}');
        if c == '\n' || c == '\r' {
            return Err(err(
                "line terminator inside literal",
                base + idx..base + idx + 1,
            ));
        }
        if c != '\\' {
            out.push(c);
            idx += c.len_utf8();
            continue;
        }

        let span_start = base + idx;
        idx += 1;
        let escape = *bytes
            .get(idx)
            .ok_or_else(|| err("unterminated escape sequence", span_start..base + idx))?;
        idx += 1;
        match escape {
            b'b' => out.push('\u{0008}'),
            b't' => out.push('\t'),
            b'n' => out.push('\n'),
            b'f' => out.push('\u{000C}'),
            b'r' => out.push('\r'),
            b's' => out.push(' '),
            b'"' => out.push('"'),
            b'\'' => out.push('\''),
            b'\\' => out.push('\\'),
            b'u' => {
                // Java allows `\uuuu0041`; extra `u`s are part of the escape.
                while bytes.get(idx) == Some(&b'u') {
                    idx += 1;
                }
                let hex = body
                    .get(idx..idx + 4)
                    .ok_or_else(|| err("incomplete unicode escape", span_start..base + body.len()))?;
                let code = u32::from_str_radix(hex, 16).map_err(|_| {
                    err("invalid unicode escape", span_start..base + idx + 4)
                })?;
                let ch = char::from_u32(code).ok_or_else(|| {
                    err("unicode escape is not a scalar value", span_start..base + idx + 4)
                })?;
                out.push(ch);
                idx += 4;
            }
            b'0'..=b'7' => {
                let max_digits = if escape <= b'3' { 3 } else { 2 };
                let mut value = u32::from(escape - b'0');
                let mut taken = 1;
                while taken < max_digits {
                    match bytes.get(idx) {
                        Some(&b @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(b - b'0');
                            idx += 1;
                            taken += 1;
                        }
                        _ => break,
                    }
                }
                let ch = char::from_u32(value)
                    .ok_or_else(|| err("invalid octal escape", span_start..base + idx))?;
                out.push(ch);
            }
            other => {
                return Err(err(
                    format!("unknown escape sequence `\\{}`", other as char),
                    span_start..base + idx,
                ))
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_literals_follow_twos_complement() {
        assert_eq!(parse_int_literal("2147483647").unwrap(), i32::MAX);
        assert!(parse_int_literal("2147483648").is_err());
        assert_eq!(parse_int_literal("0xFFFF_FFFF").unwrap(), -1);
        assert_eq!(parse_int_literal("0x8000_0000").unwrap(), i32::MIN);
        assert_eq!(parse_int_literal("010").unwrap(), 8);
        assert_eq!(parse_int_literal("0b101").unwrap(), 5);
        assert_eq!(parse_int_literal("0").unwrap(), 0);
    }

    #[test]
    fn long_literals_require_suffix() {
        assert_eq!(parse_long_literal("9223372036854775807L").unwrap(), i64::MAX);
        assert!(parse_long_literal("9223372036854775808L").is_err());
        assert_eq!(parse_long_literal("0xFFFF_FFFF_FFFF_FFFFL").unwrap(), -1);
        assert!(parse_long_literal("42").is_err());
    }

    #[test]
    fn underscore_placement() {
        assert_eq!(parse_int_literal("1_000_000").unwrap(), 1_000_000);
        assert!(parse_int_literal("_1").is_err());
        assert!(parse_int_literal("1_").is_err());
    }

    #[test]
    fn floating_literals() {
        assert_eq!(parse_float_literal("1f").unwrap(), 1.0f32);
        assert_eq!(parse_double_literal("1.").unwrap(), 1.0);
        assert_eq!(parse_double_literal(".5").unwrap(), 0.5);
        assert_eq!(parse_double_literal("1e3").unwrap(), 1000.0);
        assert_eq!(parse_double_literal("0x1p1").unwrap(), 2.0);
        assert_eq!(parse_double_literal("0x1.8p1").unwrap(), 3.0);
        assert!(parse_double_literal("1.0f").is_err());
    }

    #[test]
    fn string_and_char_escapes() {
        assert_eq!(unescape_string_literal("\"a\\tb\"").unwrap(), "a\tb");
        assert_eq!(unescape_string_literal("\"\\u0041\"").unwrap(), "A");
        assert_eq!(unescape_string_literal("\"\\141\"").unwrap(), "a");
        assert_eq!(unescape_string_literal("\"\\s\"").unwrap(), " ");
        assert_eq!(unescape_char_literal("'\\n'").unwrap(), '\n');
        assert_eq!(unescape_char_literal("'x'").unwrap(), 'x');
        assert!(unescape_char_literal("'xy'").is_err());
        assert!(unescape_string_literal("\"open").is_err());
    }

    #[test]
    fn decode_dispatches_on_kind() {
        assert_eq!(
            decode(LiteralKind::Bool, "true").unwrap(),
            LiteralValue::Bool(true)
        );
        assert_eq!(decode(LiteralKind::Null, "null").unwrap(), LiteralValue::Null);
        assert_eq!(
            decode(LiteralKind::Long, "7L").unwrap(),
            LiteralValue::Long(7)
        );
    }
}
