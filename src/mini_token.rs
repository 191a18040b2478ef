//! Token types for mini-notation patterns
//!
//! Distinct from the main-language tokens; the rhythmic grammar has its own
//! rules (pitch-shape detection, sample variants, modifier operators).

use crate::diagnostics::SourceLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiniTokenKind {
    Eof,

    // Atoms
    Pitch,  // c4, f#3, Bb5 (octave defaults to 4)
    Sample, // bd, sd, hh, cp:2
    Rest,   // ~ or _
    Number, // 0.5, 3, .25

    // Groupings
    LBracket,
    RBracket,
    LAngle,
    RAngle,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,

    // Modifiers
    Star,     // *n speed
    Slash,    // /n slow
    Colon,    // :n duration
    At,       // @n weight
    Bang,     // !n repeat
    Question, // ?n chance
    Percent,  // %n polymeter step count

    // Choice
    Pipe, // |

    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MiniTokenValue {
    None,
    Number(f64),
    Pitch { midi_note: u8, has_octave: bool },
    Sample { name: String, variant: u8 },
    Error(String),
}

#[derive(Debug, Clone)]
pub struct MiniToken {
    pub kind: MiniTokenKind,
    pub location: SourceLocation,
    pub lexeme: String,
    pub value: MiniTokenValue,
}

impl MiniToken {
    pub fn is_eof(&self) -> bool {
        self.kind == MiniTokenKind::Eof
    }

    pub fn number(&self) -> Option<f64> {
        match self.value {
            MiniTokenValue::Number(n) => Some(n),
            _ => None,
        }
    }
}
