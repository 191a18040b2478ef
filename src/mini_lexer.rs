//! Lexer for the mini-notation pattern sublanguage
//!
//! Enters with the content of a pattern string and a base source location;
//! all reported locations are relative to that base so diagnostics point
//! into the enclosing file. Identifiers are tested against a pitch shape
//! (`[a-gA-G][#b]?[0-9]{0,2}`); anything else is a sample name with an
//! optional `:n` variant suffix. In `sample_only` mode pitch detection is
//! suppressed entirely.

use crate::diagnostics::{Diagnostic, SourceLocation};
use crate::mini_token::{MiniToken, MiniTokenKind, MiniTokenValue};

pub struct MiniLexer<'a> {
    pattern: &'a str,
    base: SourceLocation,
    current: usize,
    start: usize,
    sample_only: bool,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> MiniLexer<'a> {
    pub fn new(pattern: &'a str, base: SourceLocation, sample_only: bool) -> Self {
        Self {
            pattern,
            base,
            current: 0,
            start: 0,
            sample_only,
            diagnostics: Vec::new(),
        }
    }

    pub fn lex_all(mut self) -> (Vec<MiniToken>, Vec<Diagnostic>) {
        let mut tokens = Vec::with_capacity(self.pattern.len() / 2);
        loop {
            let tok = self.lex_token();
            let done = tok.is_eof();
            tokens.push(tok);
            if done {
                break;
            }
        }
        (tokens, self.diagnostics)
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.pattern.len()
    }

    fn byte(&self, pos: usize) -> u8 {
        if pos < self.pattern.len() {
            self.pattern.as_bytes()[pos]
        } else {
            0
        }
    }

    fn peek(&self) -> u8 {
        self.byte(self.current)
    }

    fn peek_next(&self) -> u8 {
        self.byte(self.current + 1)
    }

    fn advance(&mut self) -> u8 {
        let c = self.peek();
        self.current += 1;
        c
    }

    fn lexeme(&self) -> &str {
        &self.pattern[self.start..self.current]
    }

    fn current_location(&self) -> SourceLocation {
        SourceLocation::new(
            self.base.line,
            self.base.column + self.start as u32,
            self.base.offset + self.start as u32,
            (self.current - self.start) as u32,
        )
    }

    fn make_token(&self, kind: MiniTokenKind) -> MiniToken {
        MiniToken {
            kind,
            location: self.current_location(),
            lexeme: self.lexeme().to_string(),
            value: MiniTokenValue::None,
        }
    }

    fn make_value_token(&self, kind: MiniTokenKind, value: MiniTokenValue) -> MiniToken {
        let mut tok = self.make_token(kind);
        tok.value = value;
        tok
    }

    fn make_error_token(&mut self, message: &str) -> MiniToken {
        self.diagnostics.push(Diagnostic::error(
            "M001",
            message,
            "<pattern>",
            self.current_location(),
        ));
        self.make_value_token(MiniTokenKind::Error, MiniTokenValue::Error(message.to_string()))
    }

    fn skip_whitespace(&mut self) {
        while !self.is_at_end() && self.peek().is_ascii_whitespace() {
            self.advance();
        }
    }

    /// Pitch shape check at the current position: `[a-gA-G][#b]?[0-9]*`
    /// followed by a pattern delimiter, a modifier, or end of input.
    fn looks_like_pitch(&self) -> bool {
        if self.sample_only || !is_pitch_letter(self.peek()) {
            return false;
        }

        let mut pos = self.current + 1;
        if is_accidental(self.byte(pos)) {
            pos += 1;
        }
        while self.byte(pos).is_ascii_digit() {
            pos += 1;
        }

        if pos >= self.pattern.len() {
            return true;
        }
        matches!(
            self.byte(pos),
            b' ' | b'\t' | b'\r' | b'\n'
                | b'*' | b'/' | b'@' | b'!' | b'?' | b'%'
                | b'[' | b']' | b'<' | b'>'
                | b'(' | b')' | b'{' | b'}'
                | b',' | b'|' | b':'
        )
    }

    fn lex_token(&mut self) -> MiniToken {
        self.skip_whitespace();
        self.start = self.current;

        if self.is_at_end() {
            return self.make_token(MiniTokenKind::Eof);
        }

        let c = self.peek();

        // '_' is a rest, checked before the identifier path
        if c == b'_' {
            self.advance();
            return self.make_token(MiniTokenKind::Rest);
        }

        if self.looks_like_pitch() {
            return self.lex_pitch_or_sample();
        }

        if c.is_ascii_alphabetic() {
            return self.lex_pitch_or_sample();
        }

        if c.is_ascii_digit() || (c == b'.' && self.peek_next().is_ascii_digit()) {
            return self.lex_number();
        }

        self.advance();
        match c {
            b'~' => self.make_token(MiniTokenKind::Rest),

            b'[' => self.make_token(MiniTokenKind::LBracket),
            b']' => self.make_token(MiniTokenKind::RBracket),
            b'<' => self.make_token(MiniTokenKind::LAngle),
            b'>' => self.make_token(MiniTokenKind::RAngle),
            b'(' => self.make_token(MiniTokenKind::LParen),
            b')' => self.make_token(MiniTokenKind::RParen),
            b'{' => self.make_token(MiniTokenKind::LBrace),
            b'}' => self.make_token(MiniTokenKind::RBrace),
            b',' => self.make_token(MiniTokenKind::Comma),

            b'*' => self.make_token(MiniTokenKind::Star),
            b'/' => self.make_token(MiniTokenKind::Slash),
            b':' => self.make_token(MiniTokenKind::Colon),
            b'@' => self.make_token(MiniTokenKind::At),
            b'!' => self.make_token(MiniTokenKind::Bang),
            b'?' => self.make_token(MiniTokenKind::Question),
            b'%' => self.make_token(MiniTokenKind::Percent),

            b'|' => self.make_token(MiniTokenKind::Pipe),

            _ => self.make_error_token("Unexpected character in pattern"),
        }
    }

    fn lex_number(&mut self) -> MiniToken {
        let mut has_dot = false;

        if self.peek() == b'.' {
            has_dot = true;
            self.advance();
        }

        while self.peek().is_ascii_digit() {
            self.advance();
        }

        if !has_dot && self.peek() == b'.' && self.peek_next().is_ascii_digit() {
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        match self.lexeme().parse::<f64>() {
            Ok(value) => self.make_value_token(MiniTokenKind::Number, MiniTokenValue::Number(value)),
            Err(_) => self.make_error_token("Invalid number in pattern"),
        }
    }

    fn lex_pitch_or_sample(&mut self) -> MiniToken {
        while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' || self.peek() == b'#' {
            self.advance();
        }

        let text = self.lexeme().to_string();
        let bytes = text.as_bytes();

        // Try the pitch shape; in sample_only mode every identifier is a sample
        if !self.sample_only && !bytes.is_empty() && is_pitch_letter(bytes[0]) {
            let mut pos = 1;
            let mut accidental = 0i32;
            let mut octave = 4i32; // default octave for mini-notation
            let mut has_octave = false;

            if pos < bytes.len() {
                if bytes[pos] == b'#' {
                    accidental = 1;
                    pos += 1;
                } else if bytes[pos] == b'b'
                    && (pos + 1 >= bytes.len() || !bytes[pos + 1].is_ascii_alphabetic())
                {
                    // 'b' is a flat only when not followed by more letters,
                    // so sample names like "bd" stay samples
                    accidental = -1;
                    pos += 1;
                }
            }

            if pos < bytes.len() && bytes[pos].is_ascii_digit() {
                has_octave = true;
                octave = (bytes[pos] - b'0') as i32;
                pos += 1;
                if pos < bytes.len() && bytes[pos].is_ascii_digit() {
                    octave = octave * 10 + (bytes[pos] - b'0') as i32;
                    pos += 1;
                }
            }

            if pos == bytes.len() {
                let midi = pitch_to_midi(bytes[0], accidental, octave);
                return self.make_value_token(
                    MiniTokenKind::Pitch,
                    MiniTokenValue::Pitch {
                        midi_note: midi,
                        has_octave,
                    },
                );
            }
        }

        // Sample token, with optional variant suffix (e.g. bd:2)
        let mut variant = 0u8;
        if self.peek() == b':' && self.peek_next().is_ascii_digit() {
            self.advance();
            let var_start = self.current;
            while self.peek().is_ascii_digit() {
                self.advance();
            }
            variant = self.pattern[var_start..self.current]
                .parse::<u32>()
                .unwrap_or(0)
                .min(255) as u8;
        }

        self.make_value_token(
            MiniTokenKind::Sample,
            MiniTokenValue::Sample {
                name: text,
                variant,
            },
        )
    }
}

fn is_pitch_letter(c: u8) -> bool {
    matches!(c, b'a'..=b'g' | b'A'..=b'G')
}

fn is_accidental(c: u8) -> bool {
    c == b'#' || c == b'b'
}

fn pitch_to_midi(letter: u8, accidental: i32, octave: i32) -> u8 {
    // Letter semitones: a=9 b=11 c=0 d=2 e=4 f=5 g=7
    const SEMITONES: [i32; 7] = [9, 11, 0, 2, 4, 5, 7];
    let semitone = SEMITONES[(letter.to_ascii_lowercase() - b'a') as usize];
    let midi = (octave + 1) * 12 + semitone + accidental;
    midi.clamp(0, 127) as u8
}

/// Lex a pattern string relative to a base location
pub fn lex_mini(
    pattern: &str,
    base: SourceLocation,
    sample_only: bool,
) -> (Vec<MiniToken>, Vec<Diagnostic>) {
    MiniLexer::new(pattern, base, sample_only).lex_all()
}
