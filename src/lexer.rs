//! Lexer for the Akkado language
//!
//! Produces the full token stream in one pass. Whitespace and `//` line
//! comments are skipped; newlines do not terminate expressions. Errors do
//! not halt lexing: an `Error` token is emitted, a diagnostic is pushed,
//! and scanning continues.

use crate::diagnostics::{has_errors, Diagnostic, SourceLocation};
use crate::music_theory::lookup_chord;
use crate::token::{keyword_kind, Token, TokenKind, TokenValue};

pub struct Lexer<'a> {
    source: &'a str,
    filename: String,
    current: usize,
    start: usize,
    line: u32,
    column: u32,
    token_line: u32,
    token_column: u32,
    prev_kind: TokenKind,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, filename: &str) -> Self {
        Self {
            source,
            filename: filename.to_string(),
            current: 0,
            start: 0,
            line: 1,
            column: 1,
            token_line: 1,
            token_column: 1,
            prev_kind: TokenKind::Eof,
            diagnostics: Vec::new(),
        }
    }

    pub fn lex_all(mut self) -> (Vec<Token>, Vec<Diagnostic>) {
        let mut tokens = Vec::with_capacity(self.source.len() / 4);
        loop {
            let tok = self.lex_token();
            let done = tok.is_eof();
            self.prev_kind = tok.kind;
            tokens.push(tok);
            if done {
                break;
            }
        }
        (tokens, self.diagnostics)
    }

    pub fn has_errors(&self) -> bool {
        has_errors(&self.diagnostics)
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn peek(&self) -> char {
        self.source[self.current..].chars().next().unwrap_or('\0')
    }

    fn peek_next(&self) -> char {
        let mut chars = self.source[self.current..].chars();
        chars.next();
        chars.next().unwrap_or('\0')
    }

    fn advance(&mut self) -> char {
        let c = self.peek();
        self.current += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        c
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == expected {
            self.advance();
            true
        } else {
            false
        }
    }

    fn lexeme(&self) -> &str {
        &self.source[self.start..self.current]
    }

    fn token_location(&self) -> SourceLocation {
        SourceLocation::new(
            self.token_line,
            self.token_column,
            self.start as u32,
            (self.current - self.start) as u32,
        )
    }

    fn make_token(&self, kind: TokenKind) -> Token {
        Token {
            kind,
            location: self.token_location(),
            lexeme: self.lexeme().to_string(),
            value: TokenValue::None,
        }
    }

    fn make_value_token(&self, kind: TokenKind, value: TokenValue) -> Token {
        let mut tok = self.make_token(kind);
        tok.value = value;
        tok
    }

    fn make_error_token(&mut self, message: &str) -> Token {
        self.diagnostics.push(Diagnostic::error(
            "L001",
            message,
            &self.filename,
            self.token_location(),
        ));
        self.make_value_token(TokenKind::Error, TokenValue::Str(message.to_string()))
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                ' ' | '\t' | '\r' | '\n' => {
                    self.advance();
                }
                '/' if self.peek_next() == '/' => {
                    while !self.is_at_end() && self.peek() != '\n' {
                        self.advance();
                    }
                }
                _ => return,
            }
        }
    }

    /// True when the previous token can end an expression, which makes a
    /// following `-` a binary operator rather than a negative literal.
    fn prev_ends_expression(&self) -> bool {
        matches!(
            self.prev_kind,
            TokenKind::Number
                | TokenKind::Str
                | TokenKind::Identifier
                | TokenKind::PitchLit
                | TokenKind::ChordLit
                | TokenKind::True
                | TokenKind::False
                | TokenKind::Hole
                | TokenKind::RParen
                | TokenKind::RBracket
        )
    }

    fn lex_token(&mut self) -> Token {
        self.skip_whitespace();

        self.start = self.current;
        self.token_line = self.line;
        self.token_column = self.column;

        if self.is_at_end() {
            return self.make_token(TokenKind::Eof);
        }

        let c = self.advance();

        if c.is_ascii_alphabetic() || c == '_' {
            if c == '_' && !is_ident_char(self.peek()) {
                return self.make_token(TokenKind::Underscore);
            }
            return self.lex_identifier();
        }

        if c.is_ascii_digit() {
            return self.lex_number();
        }
        if c == '.' && self.peek().is_ascii_digit() {
            return self.lex_number();
        }

        match c {
            '(' => self.make_token(TokenKind::LParen),
            ')' => self.make_token(TokenKind::RParen),
            '[' => self.make_token(TokenKind::LBracket),
            ']' => self.make_token(TokenKind::RBracket),
            '{' => self.make_token(TokenKind::LBrace),
            '}' => self.make_token(TokenKind::RBrace),
            ',' => self.make_token(TokenKind::Comma),
            ':' => self.make_token(TokenKind::Colon),
            ';' => self.make_token(TokenKind::Semicolon),
            '%' => self.make_token(TokenKind::Hole),
            '@' => self.make_token(TokenKind::At),
            '~' => self.make_token(TokenKind::Tilde),
            '^' => self.make_token(TokenKind::Caret),
            '.' => self.make_token(TokenKind::Dot),
            '+' => self.make_token(TokenKind::Plus),
            '*' => self.make_token(TokenKind::Star),
            '/' => self.make_token(TokenKind::Slash),

            '-' => {
                if self.match_char('>') {
                    return self.make_token(TokenKind::Arrow);
                }
                if self.peek().is_ascii_digit() && !self.prev_ends_expression() {
                    return self.lex_number();
                }
                self.make_token(TokenKind::Minus)
            }

            '|' => {
                if self.match_char('>') {
                    return self.make_token(TokenKind::Pipe);
                }
                if self.match_char('|') {
                    return self.make_token(TokenKind::OrOr);
                }
                self.make_error_token("Expected '>' after '|' for pipe operator")
            }

            '&' => {
                if self.match_char('&') {
                    return self.make_token(TokenKind::AndAnd);
                }
                self.make_error_token("Expected '&' after '&'")
            }

            '=' => {
                if self.match_char('=') {
                    return self.make_token(TokenKind::EqualEqual);
                }
                self.make_token(TokenKind::Equals)
            }

            '!' => {
                if self.match_char('=') {
                    return self.make_token(TokenKind::BangEqual);
                }
                self.make_token(TokenKind::Bang)
            }

            '?' => self.make_token(TokenKind::Question),

            '<' => {
                if self.match_char('=') {
                    return self.make_token(TokenKind::LessEqual);
                }
                self.make_token(TokenKind::Less)
            }

            '>' => {
                if self.match_char('=') {
                    return self.make_token(TokenKind::GreaterEqual);
                }
                self.make_token(TokenKind::Greater)
            }

            '"' | '\'' | '`' => self.lex_string(c),

            _ => self.make_error_token("Unexpected character"),
        }
    }

    fn lex_number(&mut self) -> Token {
        let mut has_dot = self.source.as_bytes()[self.start] == b'.';
        let mut has_exp = false;

        while self.peek().is_ascii_digit() {
            self.advance();
        }

        if !has_dot && self.peek() == '.' && self.peek_next().is_ascii_digit() {
            has_dot = true;
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        // Scientific notation: 1e3, 2.5e-2
        if self.peek() == 'e' || self.peek() == 'E' {
            let next = self.peek_next();
            if next.is_ascii_digit()
                || ((next == '+' || next == '-')
                    && self.source[self.current..].chars().nth(2).is_some_and(|c| c.is_ascii_digit()))
            {
                has_exp = true;
                self.advance();
                if self.peek() == '+' || self.peek() == '-' {
                    self.advance();
                }
                while self.peek().is_ascii_digit() {
                    self.advance();
                }
            }
        }

        match self.lexeme().parse::<f64>() {
            Ok(value) => self.make_value_token(
                TokenKind::Number,
                TokenValue::Number {
                    value,
                    is_integer: !has_dot && !has_exp,
                },
            ),
            Err(_) => self.make_error_token("Invalid number"),
        }
    }

    fn lex_string(&mut self, quote: char) -> Token {
        let mut value = String::with_capacity(32);

        while !self.is_at_end() && self.peek() != quote {
            let c = self.peek();

            if c == '\\' {
                self.advance();
                if self.is_at_end() {
                    return self.make_error_token("Unterminated string escape");
                }
                let escaped = self.advance();
                match escaped {
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    'r' => value.push('\r'),
                    '\\' => value.push('\\'),
                    '"' => value.push('"'),
                    '\'' => value.push('\''),
                    '`' => value.push('`'),
                    _ => return self.make_error_token("Invalid escape sequence"),
                }
            } else {
                // Multi-line strings are allowed (mini-notation spans lines)
                value.push(self.advance());
            }
        }

        if self.is_at_end() {
            return self.make_error_token("Unterminated string");
        }

        self.advance(); // closing quote

        // Single-quoted content is additionally tried as a pitch or chord
        // literal: 'c4', 'F#3', 'Bb5', 'c4:maj7'. Falls back to a string.
        if quote == '\'' {
            if let Some(tok) = self.try_pitch_or_chord(&value) {
                return tok;
            }
        }

        self.make_value_token(TokenKind::Str, TokenValue::Str(value))
    }

    fn try_pitch_or_chord(&self, content: &str) -> Option<Token> {
        if let Some((pitch_part, quality)) = content.split_once(':') {
            let midi = parse_pitch_name(pitch_part)?;
            let intervals = lookup_chord(quality)
                .cloned()
                .unwrap_or_else(|| vec![0, 4, 7]);
            return Some(self.make_value_token(
                TokenKind::ChordLit,
                TokenValue::Chord {
                    root_midi: midi,
                    intervals,
                },
            ));
        }

        let midi = parse_pitch_name(content)?;
        Some(self.make_value_token(TokenKind::PitchLit, TokenValue::Pitch { midi_note: midi }))
    }

    fn lex_identifier(&mut self) -> Token {
        while is_ident_char(self.peek()) {
            self.advance();
        }

        let text = self.lexeme();
        match keyword_kind(text) {
            Some(kind) => self.make_token(kind),
            None => {
                let name = text.to_string();
                self.make_value_token(TokenKind::Identifier, TokenValue::Str(name))
            }
        }
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Parse a pitch name like `c4`, `F#3`, `Bb5`. Octave defaults to 4,
/// accepts one or two digits. Returns the MIDI note clamped to 0..=127.
pub fn parse_pitch_name(text: &str) -> Option<u8> {
    let bytes = text.as_bytes();
    if bytes.is_empty() {
        return None;
    }

    let letter = bytes[0].to_ascii_lowercase();
    if !(b'a'..=b'g').contains(&letter) {
        return None;
    }
    // Letter semitones: a=9 b=11 c=0 d=2 e=4 f=5 g=7
    const SEMITONES: [i32; 7] = [9, 11, 0, 2, 4, 5, 7];
    let semitone = SEMITONES[(letter - b'a') as usize];

    let mut pos = 1;
    let mut accidental = 0i32;
    if pos < bytes.len() {
        match bytes[pos] {
            b'#' => {
                accidental = 1;
                pos += 1;
            }
            b'b' => {
                accidental = -1;
                pos += 1;
            }
            _ => {}
        }
    }

    let mut octave = 4i32;
    if pos < bytes.len() && bytes[pos].is_ascii_digit() {
        octave = (bytes[pos] - b'0') as i32;
        pos += 1;
        if pos < bytes.len() && bytes[pos].is_ascii_digit() {
            octave = octave * 10 + (bytes[pos] - b'0') as i32;
            pos += 1;
        }
    }

    if pos != bytes.len() {
        return None;
    }

    let midi = (octave + 1) * 12 + semitone + accidental;
    Some(midi.clamp(0, 127) as u8)
}

/// Lex a whole source string
pub fn lex(source: &str, filename: &str) -> (Vec<Token>, Vec<Diagnostic>) {
    Lexer::new(source, filename).lex_all()
}
