//! Hand-written token scanner.
//!
//! `<<`, `>>` and `>>>` are deliberately not lexed as single tokens: angle
//! brackets must stay balanced inside generic type arguments
//! (`Map<String, List<Integer>>`), so the parser reassembles shift operators
//! from adjacent `<`/`>` tokens instead.

use crate::ast::Span;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub range: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    IntLiteral,
    LongLiteral,
    FloatLiteral,
    DoubleLiteral,
    CharLiteral,
    StringLiteral,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semi,
    Comma,
    Dot,
    At,
    Question,
    Colon,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    AmpAmp,
    Pipe,
    PipePipe,
    Caret,
    Bang,
    Tilde,
    Eq,
    EqEq,
    BangEq,
    Lt,
    Gt,
    Le,
    Ge,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    AmpEq,
    PipeEq,
    CaretEq,
    Unknown,
}

pub struct Lexer<'a> {
    text: &'a str,
    offset: usize,
    pos: usize,
}

impl<'a> Lexer<'a> {
    /// `offset` is added to every token range so spans stay file-relative
    /// when lexing a slice spliced into a larger unit.
    pub fn new(text: &'a str, offset: usize) -> Self {
        Lexer {
            text,
            offset,
            pos: 0,
        }
    }

    fn remaining(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn peek_char(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn peek_char2(&self) -> Option<char> {
        let mut chars = self.remaining().chars();
        chars.next();
        chars.next()
    }

    fn bump_char(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek_char() == Some(expected) {
            self.bump_char();
            true
        } else {
            false
        }
    }

    fn current_offset(&self) -> usize {
        self.offset + self.pos
    }

    fn make_range(&self, start: usize) -> Span {
        Span::new(start, self.offset + self.pos)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while matches!(self.peek_char(), Some(c) if c.is_whitespace()) {
                self.bump_char();
            }

            let rem = self.remaining();
            if rem.starts_with("//") {
                while let Some(c) = self.bump_char() {
                    if c == '\n' {
                        break;
                    }
                }
                continue;
            }

            if rem.starts_with("/*") {
                self.bump_char();
                self.bump_char();
                while !self.remaining().is_empty() && !self.remaining().starts_with("*/") {
                    self.bump_char();
                }
                if self.remaining().starts_with("*/") {
                    self.bump_char();
                    self.bump_char();
                }
                continue;
            }

            break;
        }
    }

    fn lex_identifier(&mut self, first: char) -> String {
        let mut out = String::new();
        out.push(first);
        while let Some(c) = self.peek_char() {
            if unicode_ident::is_xid_continue(c) || c == '$' {
                out.push(c);
                self.bump_char();
            } else {
                break;
            }
        }
        out
    }

    /// Scans the raw text of a numeric literal and classifies it by shape
    /// and suffix. Digit validity is checked later by [`crate::literals`].
    fn lex_number(&mut self, first: char) -> (TokenKind, String) {
        let mut out = String::new();
        out.push(first);

        let hex = first == '0' && matches!(self.peek_char(), Some('x' | 'X'));
        let binary = first == '0' && matches!(self.peek_char(), Some('b' | 'B'));
        if hex || binary {
            out.push(self.bump_char().unwrap_or_default());
        }

        let digits = |c: char| {
            if hex {
                c.is_ascii_hexdigit() || c == '_'
            } else {
                c.is_ascii_digit() || c == '_'
            }
        };

        let mut is_float = first == '.';
        while let Some(c) = self.peek_char() {
            if digits(c) {
                out.push(c);
                self.bump_char();
            } else {
                break;
            }
        }

        // Fraction part. `1.foo()` must stay an int followed by a member
        // access, so the dot is only consumed when a digit follows.
        if !binary
            && !is_float
            && self.peek_char() == Some('.')
            && self.peek_char2().is_some_and(|c| {
                if hex {
                    c.is_ascii_hexdigit()
                } else {
                    c.is_ascii_digit()
                }
            })
        {
            is_float = true;
            out.push(self.bump_char().unwrap_or_default());
            while let Some(c) = self.peek_char() {
                if digits(c) {
                    out.push(c);
                    self.bump_char();
                } else {
                    break;
                }
            }
        }
        // Trailing dot (`1.`) still makes a double, unless a member access
        // follows (`1.toString()` is not valid Java anyway).
        if !binary && !hex && !is_float && self.peek_char() == Some('.') {
            let after = self.peek_char2();
            if !after.is_some_and(|c| unicode_ident::is_xid_start(c) || c == '_' || c == '$') {
                is_float = true;
                out.push(self.bump_char().unwrap_or_default());
            }
        }

        // Exponent: `e`/`E` for decimal, `p`/`P` for hexadecimal floats.
        let exp_char = if hex { ['p', 'P'] } else { ['e', 'E'] };
        if !binary && matches!(self.peek_char(), Some(c) if exp_char.contains(&c)) {
            let after_sign = match self.peek_char2() {
                Some('+' | '-') => {
                    let mut chars = self.remaining().chars();
                    chars.next();
                    chars.next();
                    chars.next()
                }
                other => other,
            };
            if after_sign.is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                out.push(self.bump_char().unwrap_or_default());
                if matches!(self.peek_char(), Some('+' | '-')) {
                    out.push(self.bump_char().unwrap_or_default());
                }
                while let Some(c) = self.peek_char() {
                    if c.is_ascii_digit() || c == '_' {
                        out.push(c);
                        self.bump_char();
                    } else {
                        break;
                    }
                }
            }
        }

        let kind = match self.peek_char() {
            Some('l' | 'L') => {
                out.push(self.bump_char().unwrap_or_default());
                TokenKind::LongLiteral
            }
            Some('f' | 'F') if !hex || is_float => {
                out.push(self.bump_char().unwrap_or_default());
                TokenKind::FloatLiteral
            }
            Some('d' | 'D') if !hex || is_float => {
                out.push(self.bump_char().unwrap_or_default());
                TokenKind::DoubleLiteral
            }
            _ if is_float => TokenKind::DoubleLiteral,
            _ => TokenKind::IntLiteral,
        };
        (kind, out)
    }

    fn lex_string_literal(&mut self) -> String {
        let mut out = String::new();
        // opening quote already consumed
        out.push('"');
        while let Some(c) = self.bump_char() {
            out.push(c);
            match c {
                '"' => break,
                '\\' => {
                    if let Some(escaped) = self.bump_char() {
                        out.push(escaped);
                    }
                }
                _ => {}
            }
        }
        out
    }

    fn lex_char_literal(&mut self) -> String {
        let mut out = String::new();
        out.push('\'');
        while let Some(c) = self.bump_char() {
            out.push(c);
            match c {
                '\'' => break,
                '\\' => {
                    if let Some(escaped) = self.bump_char() {
                        out.push(escaped);
                    }
                }
                '\n' => break,
                _ => {}
            }
        }
        out
    }

    fn next_token(&mut self) -> Option<Token> {
        self.skip_whitespace_and_comments();
        if self.remaining().is_empty() {
            return None;
        }

        let start = self.current_offset();
        let ch = self.bump_char()?;

        let (kind, text) = match ch {
            '{' => (TokenKind::LBrace, "{".to_string()),
            '}' => (TokenKind::RBrace, "}".to_string()),
            '(' => (TokenKind::LParen, "(".to_string()),
            ')' => (TokenKind::RParen, ")".to_string()),
            '[' => (TokenKind::LBracket, "[".to_string()),
            ']' => (TokenKind::RBracket, "]".to_string()),
            ';' => (TokenKind::Semi, ";".to_string()),
            ',' => (TokenKind::Comma, ",".to_string()),
            '@' => (TokenKind::At, "@".to_string()),
            '?' => (TokenKind::Question, "?".to_string()),
            ':' => (TokenKind::Colon, ":".to_string()),
            '~' => (TokenKind::Tilde, "~".to_string()),
            '.' => {
                if self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                    self.lex_number('.')
                } else {
                    (TokenKind::Dot, ".".to_string())
                }
            }
            '+' => {
                if self.eat('=') {
                    (TokenKind::PlusEq, "+=".to_string())
                } else {
                    (TokenKind::Plus, "+".to_string())
                }
            }
            '-' => {
                if self.eat('=') {
                    (TokenKind::MinusEq, "-=".to_string())
                } else {
                    (TokenKind::Minus, "-".to_string())
                }
            }
            '*' => {
                if self.eat('=') {
                    (TokenKind::StarEq, "*=".to_string())
                } else {
                    (TokenKind::Star, "*".to_string())
                }
            }
            '/' => {
                if self.eat('=') {
                    (TokenKind::SlashEq, "/=".to_string())
                } else {
                    (TokenKind::Slash, "/".to_string())
                }
            }
            '%' => {
                if self.eat('=') {
                    (TokenKind::PercentEq, "%=".to_string())
                } else {
                    (TokenKind::Percent, "%".to_string())
                }
            }
            '&' => {
                if self.eat('&') {
                    (TokenKind::AmpAmp, "&&".to_string())
                } else if self.eat('=') {
                    (TokenKind::AmpEq, "&=".to_string())
                } else {
                    (TokenKind::Amp, "&".to_string())
                }
            }
            '|' => {
                if self.eat('|') {
                    (TokenKind::PipePipe, "||".to_string())
                } else if self.eat('=') {
                    (TokenKind::PipeEq, "|=".to_string())
                } else {
                    (TokenKind::Pipe, "|".to_string())
                }
            }
            '^' => {
                if self.eat('=') {
                    (TokenKind::CaretEq, "^=".to_string())
                } else {
                    (TokenKind::Caret, "^".to_string())
                }
            }
            '!' => {
                if self.eat('=') {
                    (TokenKind::BangEq, "!=".to_string())
                } else {
                    (TokenKind::Bang, "!".to_string())
                }
            }
            '=' => {
                if self.eat('=') {
                    (TokenKind::EqEq, "==".to_string())
                } else {
                    (TokenKind::Eq, "=".to_string())
                }
            }
            '<' => {
                // `<<` stays two tokens, see module docs.
                if self.peek_char() == Some('=') && self.peek_char2() != Some('=') {
                    self.bump_char();
                    (TokenKind::Le, "<=".to_string())
                } else {
                    (TokenKind::Lt, "<".to_string())
                }
            }
            '>' => {
                if self.peek_char() == Some('=') && self.peek_char2() != Some('=') {
                    self.bump_char();
                    (TokenKind::Ge, ">=".to_string())
                } else {
                    (TokenKind::Gt, ">".to_string())
                }
            }
            '"' => {
                let lit = self.lex_string_literal();
                (TokenKind::StringLiteral, lit)
            }
            '\'' => {
                let lit = self.lex_char_literal();
                (TokenKind::CharLiteral, lit)
            }
            c if c.is_ascii_digit() => self.lex_number(c),
            c if unicode_ident::is_xid_start(c) || c == '_' || c == '$' => {
                let ident = self.lex_identifier(c);
                (TokenKind::Ident, ident)
            }
            other => (TokenKind::Unknown, other.to_string()),
        };

        let range = self.make_range(start);
        Some(Token { kind, text, range })
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input, 0).map(|t| t.kind).collect()
    }

    fn texts(input: &str) -> Vec<String> {
        Lexer::new(input, 0).map(|t| t.text).collect()
    }

    #[test]
    fn numeric_literal_shapes() {
        use TokenKind::*;
        assert_eq!(kinds("1 10L 0xFF 0b1010 1_000"), vec![
            IntLiteral,
            LongLiteral,
            IntLiteral,
            IntLiteral,
            IntLiteral
        ]);
        assert_eq!(kinds("1.5 2f 3.0d 1e3 .5 1. 0x1p1"), vec![
            DoubleLiteral,
            FloatLiteral,
            DoubleLiteral,
            DoubleLiteral,
            DoubleLiteral,
            DoubleLiteral,
            DoubleLiteral
        ]);
        assert_eq!(texts("1.5 .5 1e-3 0xFFL"), vec!["1.5", ".5", "1e-3", "0xFFL"]);
    }

    #[test]
    fn int_dot_member_is_not_a_float() {
        use TokenKind::*;
        assert_eq!(kinds("counts.length"), vec![Ident, Dot, Ident]);
        assert_eq!(kinds("1.max(2)"), vec![
            IntLiteral,
            Dot,
            Ident,
            LParen,
            IntLiteral,
            RParen
        ]);
    }

    #[test]
    fn angle_brackets_stay_single_tokens() {
        use TokenKind::*;
        assert_eq!(kinds("a << b"), vec![Ident, Lt, Lt, Ident]);
        assert_eq!(kinds("a >>> b"), vec![Ident, Gt, Gt, Gt, Ident]);
        assert_eq!(kinds("a <<= b"), vec![Ident, Lt, Le, Ident]);
        assert_eq!(kinds("a >>= b"), vec![Ident, Gt, Ge, Ident]);
        assert_eq!(kinds("Map<String, List<Integer>>"), vec![
            Ident, Lt, Ident, Comma, Ident, Lt, Ident, Gt, Gt
        ]);
    }

    #[test]
    fn compound_operators() {
        use TokenKind::*;
        assert_eq!(kinds("a += b -= c == d != e && f || g"), vec![
            Ident, PlusEq, Ident, MinusEq, Ident, EqEq, Ident, BangEq, Ident, AmpAmp, Ident,
            PipePipe, Ident
        ]);
    }

    #[test]
    fn string_and_char_literals_capture_escapes() {
        let tokens: Vec<Token> = Lexer::new(r#" "a\"b" '\n' "#, 0).collect();
        assert_eq!(tokens[0].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[0].text, r#""a\"b""#);
        assert_eq!(tokens[1].kind, TokenKind::CharLiteral);
        assert_eq!(tokens[1].text, r"'\n'");
    }

    #[test]
    fn comments_are_skipped_and_offsets_apply() {
        let tokens: Vec<Token> = Lexer::new("x /* skip */ + y // end", 10).collect();
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].range, Span::new(10, 11));
        assert_eq!(tokens[1].range, Span::new(23, 24));
        assert_eq!(tokens[2].range, Span::new(25, 26));
    }
}
