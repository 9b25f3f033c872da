//! Byte-level tokenizer.
//!
//! Per §1/§6 of the spec the raw lexer is an external collaborator — the
//! compiler core treats it as "a lazy sequence of typed tokens with attached
//! source spans and literal payloads". This module is a small, deliberately
//! unambitious implementation of that contract so the pipeline can be
//! exercised end-to-end in tests; it is not the grounding focus of this
//! crate the way the parser and IR builder are.

use crate::intern::{StringId, StringTable};
use crate::span::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Eof,
    Ident,
    Int,
    Float,

    KwVar,
    KwConst,
    KwFunc,
    KwIf,
    KwElse,
    KwWhile,
    KwFor,
    KwReturn,
    KwBreak,
    KwContinue,
    KwAssert,
    KwNull,
    KwTrue,
    KwFalse,
    KwImport,
    KwRecord,

    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Semi,
    Colon,
    Dot,
    QDot,
    QLBracket,
    QLParen,

    Eq,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    StarStarEq,

    OrOr,
    AndAnd,
    QQ,

    Pipe,
    Caret,
    Amp,

    EqEq,
    BangEq,
    Lt,
    Le,
    Gt,
    Ge,

    Shl,
    Shr,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    StarStar,

    Bang,
    Tilde,

    /// A bare integer used as a tuple-member selector: `t.0`. Only produced
    /// while the lexer is in [`LexerMode::Member`].
    NumericMember,

    /// Literal text between interpolation fragments inside a string.
    StringContent,
    /// `$ident` shorthand interpolation.
    DollarIdent,
    /// `${` opening a `${ expr }` interpolation; the parser pushes
    /// `LexerMode::Normal` to lex the expression and pops back on `}`.
    InterpStart,
    /// Opening quote of a string literal.
    StringQuoteStart,
    /// Closing quote of a string literal.
    StringQuoteEnd,

    Error,
}

#[derive(Debug, Clone, Copy)]
pub enum TokenPayload {
    None,
    Int(i64),
    Float(f64),
    Str(StringId),
}

#[derive(Debug, Clone, Copy)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub payload: TokenPayload,
}

impl Token {
    fn new(kind: TokenKind, span: Span) -> Self {
        Self {
            kind,
            span,
            payload: TokenPayload::None,
        }
    }
}

/// Lexer mode. The parser switches modes via [`Lexer::push_mode`], which
/// returns a guard that restores the previous mode on drop (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexerMode {
    Normal,
    /// After `.`: recognizes `NumericMember` tokens for tuple-index access.
    Member,
    StringSingleQuote,
    StringDoubleQuote,
}

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    modes: Vec<LexerMode>,
    strings: &'a mut StringTable,
}

/// RAII guard restoring the previous lexer mode when dropped.
pub struct ModeGuard<'lexer, 'a> {
    lexer: &'lexer mut Lexer<'a>,
}

impl Drop for ModeGuard<'_, '_> {
    fn drop(&mut self) {
        self.lexer.modes.pop();
    }
}

impl<'lexer, 'a> std::ops::Deref for ModeGuard<'lexer, 'a> {
    type Target = Lexer<'a>;
    fn deref(&self) -> &Lexer<'a> {
        self.lexer
    }
}

impl<'lexer, 'a> std::ops::DerefMut for ModeGuard<'lexer, 'a> {
    fn deref_mut(&mut self) -> &mut Lexer<'a> {
        self.lexer
    }
}

impl<'a> Lexer<'a> {
    #[must_use]
    pub fn new(src: &'a str, strings: &'a mut StringTable) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
            modes: vec![LexerMode::Normal],
            strings,
        }
    }

    #[must_use]
    pub fn mode(&self) -> LexerMode {
        *self.modes.last().expect("mode stack is never empty")
    }

    pub fn push_mode(&mut self, mode: LexerMode) -> ModeGuard<'_, 'a> {
        self.modes.push(mode);
        ModeGuard { lexer: self }
    }

    #[must_use]
    pub fn pos(&self) -> u32 {
        self.pos as u32
    }

    pub fn strings_mut(&mut self) -> &mut StringTable {
        self.strings
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r' | b'\n') => {
                    self.pos += 1;
                }
                Some(b'#') => {
                    while let Some(b) = self.peek() {
                        if b == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
    }

    /// Produces the next token according to the current mode.
    ///
    /// In `StringSingleQuote`/`StringDoubleQuote` mode, use
    /// [`Lexer::next_string_piece`] instead — the parser is responsible for
    /// calling the right method based on what it is expecting.
    pub fn next(&mut self) -> Token {
        match self.mode() {
            LexerMode::StringSingleQuote | LexerMode::StringDoubleQuote => self.next_string_piece(),
            LexerMode::Member => self.next_member(),
            LexerMode::Normal => self.next_normal(),
        }
    }

    fn next_member(&mut self) -> Token {
        self.skip_trivia();
        let start = self.pos;
        if let Some(b) = self.peek() {
            if b.is_ascii_digit() {
                while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                    self.pos += 1;
                }
                let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
                let value: i64 = text.parse().unwrap_or(0);
                let mut tok = Token::new(TokenKind::NumericMember, Span::new(start as u32, self.pos as u32));
                tok.payload = TokenPayload::Int(value);
                return tok;
            }
        }
        self.next_normal()
    }

    fn next_normal(&mut self) -> Token {
        self.skip_trivia();
        let start = self.pos;
        let Some(b) = self.peek() else {
            return Token::new(TokenKind::Eof, Span::empty_at(start as u32));
        };

        if b.is_ascii_alphabetic() || b == b'_' {
            return self.lex_ident_or_keyword(start);
        }
        if b.is_ascii_digit() {
            return self.lex_number(start);
        }
        if b == b'\'' || b == b'"' {
            self.pos += 1;
            let mut tok = Token::new(TokenKind::StringQuoteStart, Span::new(start as u32, self.pos as u32));
            tok.payload = TokenPayload::Int(i64::from(b));
            return tok;
        }

        self.lex_operator(start)
    }

    fn lex_ident_or_keyword(&mut self, start: usize) -> Token {
        while matches!(self.peek(), Some(b) if b.is_ascii_alphanumeric() || b == b'_') {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        let span = Span::new(start as u32, self.pos as u32);
        let kind = match text {
            "var" => TokenKind::KwVar,
            "const" => TokenKind::KwConst,
            "func" => TokenKind::KwFunc,
            "if" => TokenKind::KwIf,
            "else" => TokenKind::KwElse,
            "while" => TokenKind::KwWhile,
            "for" => TokenKind::KwFor,
            "return" => TokenKind::KwReturn,
            "break" => TokenKind::KwBreak,
            "continue" => TokenKind::KwContinue,
            "assert" => TokenKind::KwAssert,
            "null" => TokenKind::KwNull,
            "true" => TokenKind::KwTrue,
            "false" => TokenKind::KwFalse,
            "import" => TokenKind::KwImport,
            "record" => TokenKind::KwRecord,
            _ => {
                let id = self.strings.intern(text);
                let mut tok = Token::new(TokenKind::Ident, span);
                tok.payload = TokenPayload::Str(id);
                return tok;
            }
        };
        Token::new(kind, span)
    }

    fn lex_number(&mut self, start: usize) -> Token {
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.pos += 1;
        }
        let mut is_float = false;
        if self.peek() == Some(b'.') && matches!(self.peek_at(1), Some(b) if b.is_ascii_digit()) {
            is_float = true;
            self.pos += 1;
            while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            is_float = true;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        let span = Span::new(start as u32, self.pos as u32);
        if is_float {
            let mut tok = Token::new(TokenKind::Float, span);
            tok.payload = TokenPayload::Float(text.parse().unwrap_or(0.0));
            tok
        } else {
            let mut tok = Token::new(TokenKind::Int, span);
            tok.payload = TokenPayload::Int(text.parse().unwrap_or(0));
            tok
        }
    }

    fn lex_operator(&mut self, start: usize) -> Token {
        macro_rules! two {
            ($second:expr, $both:expr, $single:expr) => {{
                self.pos += 1;
                if self.peek() == Some($second) {
                    self.pos += 1;
                    $both
                } else {
                    $single
                }
            }};
        }

        let b = self.bump().expect("checked by caller");
        let kind = match b {
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b',' => TokenKind::Comma,
            b';' => TokenKind::Semi,
            b':' => TokenKind::Colon,
            b'~' => TokenKind::Tilde,
            b'.' => TokenKind::Dot,
            b'?' => match self.peek() {
                Some(b'.') => {
                    self.pos += 1;
                    TokenKind::QDot
                }
                Some(b'[') => {
                    self.pos += 1;
                    TokenKind::QLBracket
                }
                Some(b'(') => {
                    self.pos += 1;
                    TokenKind::QLParen
                }
                Some(b'?') => {
                    self.pos += 1;
                    TokenKind::QQ
                }
                _ => TokenKind::Error,
            },
            b'+' => {
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                    TokenKind::PlusEq
                } else {
                    TokenKind::Plus
                }
            }
            b'-' => {
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                    TokenKind::MinusEq
                } else {
                    TokenKind::Minus
                }
            }
            b'*' => match self.peek() {
                Some(b'*') => {
                    self.pos += 1;
                    if self.peek() == Some(b'=') {
                        self.pos += 1;
                        TokenKind::StarStarEq
                    } else {
                        TokenKind::StarStar
                    }
                }
                Some(b'=') => {
                    self.pos += 1;
                    TokenKind::StarEq
                }
                _ => TokenKind::Star,
            },
            b'/' => {
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                    TokenKind::SlashEq
                } else {
                    TokenKind::Slash
                }
            }
            b'%' => {
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                    TokenKind::PercentEq
                } else {
                    TokenKind::Percent
                }
            }
            b'=' => {
                self.pos -= 1;
                return Token::new(two!(b'=', TokenKind::EqEq, TokenKind::Eq), Span::new(start as u32, self.pos as u32));
            }
            b'!' => {
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                    TokenKind::BangEq
                } else {
                    TokenKind::Bang
                }
            }
            b'<' => match self.peek() {
                Some(b'=') => {
                    self.pos += 1;
                    TokenKind::Le
                }
                Some(b'<') => {
                    self.pos += 1;
                    TokenKind::Shl
                }
                _ => TokenKind::Lt,
            },
            b'>' => match self.peek() {
                Some(b'=') => {
                    self.pos += 1;
                    TokenKind::Ge
                }
                Some(b'>') => {
                    self.pos += 1;
                    TokenKind::Shr
                }
                _ => TokenKind::Gt,
            },
            b'&' => {
                if self.peek() == Some(b'&') {
                    self.pos += 1;
                    TokenKind::AndAnd
                } else {
                    TokenKind::Amp
                }
            }
            b'|' => {
                if self.peek() == Some(b'|') {
                    self.pos += 1;
                    TokenKind::OrOr
                } else {
                    TokenKind::Pipe
                }
            }
            b'^' => TokenKind::Caret,
            _ => TokenKind::Error,
        };
        Token::new(kind, Span::new(start as u32, self.pos as u32))
    }

    /// Scans one piece of a string literal: either a run of literal text, a
    /// `$ident`/`${` interpolation start, or the closing quote.
    fn next_string_piece(&mut self) -> Token {
        let quote = match self.mode() {
            LexerMode::StringSingleQuote => b'\'',
            LexerMode::StringDoubleQuote => b'"',
            _ => unreachable!("next_string_piece called outside string mode"),
        };
        let start = self.pos;

        match self.peek() {
            None => Token::new(TokenKind::Error, Span::empty_at(start as u32)),
            Some(b) if b == quote => {
                self.pos += 1;
                Token::new(TokenKind::StringQuoteEnd, Span::new(start as u32, self.pos as u32))
            }
            Some(b'$') if self.peek_at(1) == Some(b'{') => {
                self.pos += 2;
                Token::new(TokenKind::InterpStart, Span::new(start as u32, self.pos as u32))
            }
            Some(b'$') if matches!(self.peek_at(1), Some(b) if b.is_ascii_alphabetic() || b == b'_') => {
                self.pos += 1;
                let ident_start = self.pos;
                while matches!(self.peek(), Some(b) if b.is_ascii_alphanumeric() || b == b'_') {
                    self.pos += 1;
                }
                let text = std::str::from_utf8(&self.src[ident_start..self.pos]).unwrap();
                let id = self.strings.intern(text);
                let mut tok = Token::new(TokenKind::DollarIdent, Span::new(start as u32, self.pos as u32));
                tok.payload = TokenPayload::Str(id);
                tok
            }
            _ => self.lex_string_content(quote, start),
        }
    }

    fn lex_string_content(&mut self, quote: u8, start: usize) -> Token {
        let mut text = String::new();
        loop {
            match self.peek() {
                None => break,
                Some(b) if b == quote => break,
                Some(b'$') if matches!(self.peek_at(1), Some(b'{') | Some(b) if b == b'{' || b.is_ascii_alphabetic() || b == b'_') =>
                {
                    break
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.bump() {
                        Some(b'n') => text.push('\n'),
                        Some(b'r') => text.push('\r'),
                        Some(b't') => text.push('\t'),
                        Some(b'\\') => text.push('\\'),
                        Some(b'\'') => text.push('\''),
                        Some(b'"') => text.push('"'),
                        Some(b'$') => text.push('$'),
                        Some(_) | None => {
                            // Unrecognized escape: recorded as text, the parser
                            // reports the diagnostic since it has `strings`/span context.
                            text.push('\\');
                        }
                    }
                }
                Some(_) => {
                    // decode one UTF-8 scalar
                    let rest = std::str::from_utf8(&self.src[self.pos..]).unwrap_or("");
                    let ch = rest.chars().next().expect("non-empty, checked above");
                    text.push(ch);
                    self.pos += ch.len_utf8();
                }
            }
        }
        let id = self.strings.intern(&text);
        let mut tok = Token::new(TokenKind::StringContent, Span::new(start as u32, self.pos as u32));
        tok.payload = TokenPayload::Str(id);
        tok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut strings = StringTable::new();
        let mut lexer = Lexer::new(src, &mut strings);
        let mut out = Vec::new();
        loop {
            let tok = lexer.next();
            let done = tok.kind == TokenKind::Eof;
            out.push(tok.kind);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn lexes_arithmetic() {
        assert_eq!(
            kinds("-4**2 + 1234"),
            vec![
                TokenKind::Minus,
                TokenKind::Int,
                TokenKind::StarStar,
                TokenKind::Int,
                TokenKind::Plus,
                TokenKind::Int,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_optional_chain_tokens() {
        assert_eq!(
            kinds("a?.b?[0]"),
            vec![
                TokenKind::Ident,
                TokenKind::QDot,
                TokenKind::Ident,
                TokenKind::QLBracket,
                TokenKind::Int,
                TokenKind::RBracket,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn null_coalesce_is_one_token() {
        assert_eq!(
            kinds("a ?? b"),
            vec![TokenKind::Ident, TokenKind::QQ, TokenKind::Ident, TokenKind::Eof]
        );
    }
}
