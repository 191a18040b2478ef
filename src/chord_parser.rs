//! Chord symbol parsing for `chord("Am")` and chord progressions
//!
//! A chord symbol is a root name (`A`, `C#`, `Bb`), then a quality suffix
//! resolved against the quality table. Unknown qualities fall back to a
//! major triad without an error.

use crate::music_theory::{lookup_chord, note_semitone};

#[derive(Debug, Clone, PartialEq)]
pub struct ChordInfo {
    pub root: String,
    pub quality: String,
    pub root_midi: u8,
    pub intervals: Vec<i8>,
}

/// MIDI note for a root name like "C", "F#", "Bb" at the given octave
pub fn root_name_to_midi(root_name: &str, octave: i32) -> Option<u8> {
    let mut chars = root_name.chars();
    let letter = chars.next()?;
    let semitone = note_semitone(letter)?;

    let mut accidental = 0i32;
    for c in chars {
        match c {
            '#' => accidental += 1,
            'b' => accidental -= 1,
            _ => return None,
        }
    }

    let midi = (octave + 1) * 12 + semitone + accidental;
    Some(midi.clamp(0, 127) as u8)
}

/// Parse a single chord symbol like "Am", "C7", "Fmaj7", "G"
pub fn parse_chord_symbol(symbol: &str) -> Option<ChordInfo> {
    if symbol.is_empty() {
        return None;
    }

    let bytes = symbol.as_bytes();
    if !bytes[0].is_ascii_alphabetic() {
        return None;
    }

    let mut root = String::new();
    root.push(bytes[0].to_ascii_uppercase() as char);

    let mut pos = 1;
    while pos < bytes.len() && (bytes[pos] == b'#' || bytes[pos] == b'b') {
        root.push(bytes[pos] as char);
        pos += 1;
    }

    let mut quality = symbol[pos..].to_string();
    let intervals = match lookup_chord(&quality) {
        Some(iv) => iv.clone(),
        None => {
            // Unknown quality: fall back to a major triad
            quality = String::new();
            vec![0, 4, 7]
        }
    };

    let root_midi = root_name_to_midi(&root, 4)?;

    Some(ChordInfo {
        root,
        quality,
        root_midi,
        intervals,
    })
}

/// Expand a chord into MIDI notes at the given octave
pub fn expand_chord(chord: &ChordInfo, octave: i32) -> Vec<i32> {
    let Some(base) = root_name_to_midi(&chord.root, octave) else {
        return Vec::new();
    };

    chord
        .intervals
        .iter()
        .map(|interval| base as i32 + *interval as i32)
        .filter(|note| (0..=127).contains(note))
        .collect()
}

/// Parse a whitespace-separated chord progression like "Am F C G"
pub fn parse_chord_pattern(pattern: &str) -> Vec<ChordInfo> {
    pattern
        .split_whitespace()
        .filter_map(parse_chord_symbol)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minor_triad() {
        let chord = parse_chord_symbol("Am").unwrap();
        assert_eq!(chord.root, "A");
        assert_eq!(chord.intervals, vec![0, 3, 7]);
        assert_eq!(expand_chord(&chord, 4), vec![69, 72, 76]);
    }

    #[test]
    fn test_unknown_quality_falls_back_to_major() {
        let chord = parse_chord_symbol("Cxyz").unwrap();
        assert_eq!(chord.intervals, vec![0, 4, 7]);
    }

    #[test]
    fn test_shorthand_qualities() {
        // Strudel-style major 7th
        assert_eq!(parse_chord_symbol("C^").unwrap().intervals, vec![0, 4, 7, 11]);
        assert_eq!(parse_chord_symbol("C^7").unwrap().intervals, vec![0, 4, 7, 11]);
        // Half-diminished shorthand
        assert_eq!(parse_chord_symbol("B0").unwrap().intervals, vec![0, 3, 6, 10]);
        // Minor-major 7th spellings
        assert_eq!(parse_chord_symbol("Am^7").unwrap().intervals, vec![0, 3, 7, 11]);
        assert_eq!(parse_chord_symbol("AmM7").unwrap().intervals, vec![0, 3, 7, 11]);
        assert_eq!(parse_chord_symbol("Cadd2").unwrap().intervals, vec![0, 2, 4, 7]);
    }

    #[test]
    fn test_accidentals() {
        assert_eq!(root_name_to_midi("C#", 4), Some(61));
        assert_eq!(root_name_to_midi("Bb", 3), Some(58));
        assert_eq!(root_name_to_midi("H", 4), None);
    }

    #[test]
    fn test_progression() {
        let chords = parse_chord_pattern("Am F C G7");
        assert_eq!(chords.len(), 4);
        assert_eq!(chords[3].intervals.len(), 4);
    }
}
