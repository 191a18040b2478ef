//! Chord quality tables shared by the lexer, the mini-notation lexer and
//! the `chord()` special form.

use lazy_static::lazy_static;
use std::collections::HashMap;

lazy_static! {
    /// Chord quality -> semitone intervals from root
    pub static ref CHORD_INTERVALS: HashMap<&'static str, Vec<i8>> = {
        let mut m = HashMap::new();
        // Triads
        m.insert("", vec![0, 4, 7]);
        m.insert("maj", vec![0, 4, 7]);
        m.insert("M", vec![0, 4, 7]);
        m.insert("m", vec![0, 3, 7]);
        m.insert("min", vec![0, 3, 7]);
        m.insert("-", vec![0, 3, 7]);
        m.insert("dim", vec![0, 3, 6]);
        m.insert("o", vec![0, 3, 6]);
        m.insert("aug", vec![0, 4, 8]);
        m.insert("+", vec![0, 4, 8]);
        m.insert("sus2", vec![0, 2, 7]);
        m.insert("sus4", vec![0, 5, 7]);
        m.insert("sus", vec![0, 5, 7]);

        // Seventh chords
        m.insert("7", vec![0, 4, 7, 10]);
        m.insert("dom7", vec![0, 4, 7, 10]);
        m.insert("M7", vec![0, 4, 7, 11]);
        m.insert("maj7", vec![0, 4, 7, 11]);
        m.insert("^", vec![0, 4, 7, 11]); // Strudel-style major 7th
        m.insert("^7", vec![0, 4, 7, 11]);
        m.insert("m7", vec![0, 3, 7, 10]);
        m.insert("min7", vec![0, 3, 7, 10]);
        m.insert("-7", vec![0, 3, 7, 10]);
        m.insert("dim7", vec![0, 3, 6, 9]);
        m.insert("o7", vec![0, 3, 6, 9]);
        m.insert("m7b5", vec![0, 3, 6, 10]);
        m.insert("0", vec![0, 3, 6, 10]); // half-diminished shorthand
        m.insert("aug7", vec![0, 4, 8, 10]);
        m.insert("+7", vec![0, 4, 8, 10]);
        m.insert("mM7", vec![0, 3, 7, 11]);
        m.insert("m^7", vec![0, 3, 7, 11]);
        m.insert("minmaj7", vec![0, 3, 7, 11]);

        // Sixths and extensions
        m.insert("6", vec![0, 4, 7, 9]);
        m.insert("m6", vec![0, 3, 7, 9]);
        m.insert("min6", vec![0, 3, 7, 9]);
        m.insert("9", vec![0, 4, 7, 10, 14]);
        m.insert("maj9", vec![0, 4, 7, 11, 14]);
        m.insert("M9", vec![0, 4, 7, 11, 14]);
        m.insert("m9", vec![0, 3, 7, 10, 14]);
        m.insert("min9", vec![0, 3, 7, 10, 14]);
        m.insert("add9", vec![0, 4, 7, 14]);
        m.insert("add2", vec![0, 2, 4, 7]);
        m.insert("11", vec![0, 4, 7, 10, 14, 17]);
        m.insert("m11", vec![0, 3, 7, 10, 14, 17]);
        m.insert("13", vec![0, 4, 7, 10, 14, 21]);

        // Power chord
        m.insert("5", vec![0, 7]);
        m
    };
}

/// Look up chord intervals by quality name
pub fn lookup_chord(name: &str) -> Option<&'static Vec<i8>> {
    CHORD_INTERVALS.get(name)
}

/// Semitone offset of a note letter relative to C, or None
pub fn note_semitone(letter: char) -> Option<i32> {
    match letter.to_ascii_uppercase() {
        'C' => Some(0),
        'D' => Some(2),
        'E' => Some(4),
        'F' => Some(5),
        'G' => Some(7),
        'A' => Some(9),
        'B' => Some(11),
        _ => None,
    }
}
