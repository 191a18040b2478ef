//! Lexer tests: token kinds, literal payloads, span exactness

use akkado::lexer::{lex, parse_pitch_name};
use akkado::token::{TokenKind, TokenValue};

fn kinds(source: &str) -> Vec<TokenKind> {
    let (tokens, _) = lex(source, "<test>");
    tokens.iter().map(|t| t.kind).collect()
}

#[test]
fn test_simple_expression() {
    assert_eq!(
        kinds("saw(440)"),
        vec![
            TokenKind::Identifier,
            TokenKind::LParen,
            TokenKind::Number,
            TokenKind::RParen,
            TokenKind::Eof
        ]
    );
}

#[test]
fn test_number_forms() {
    let (tokens, diags) = lex("42 3.14 .5 1e3 2.5e-2", "<test>");
    assert!(diags.is_empty());

    let values: Vec<(f64, bool)> = tokens
        .iter()
        .filter_map(|t| match t.value {
            TokenValue::Number { value, is_integer } => Some((value, is_integer)),
            _ => None,
        })
        .collect();

    assert_eq!(values.len(), 5);
    assert_eq!(values[0], (42.0, true));
    assert_eq!(values[1], (3.14, false));
    assert_eq!(values[2], (0.5, false));
    assert_eq!(values[3], (1000.0, false));
    assert!((values[4].0 - 0.025).abs() < 1e-12);
}

#[test]
fn test_negative_number_vs_subtraction() {
    // After '(' a minus followed by a digit is a negative literal
    let (tokens, _) = lex("dc(x, -5)", "<test>");
    let negative = tokens.iter().find(|t| t.kind == TokenKind::Number).unwrap();
    assert_eq!(negative.number(), Some(-5.0));

    // After an identifier it is binary subtraction
    let ks = kinds("a -5");
    assert_eq!(
        ks,
        vec![
            TokenKind::Identifier,
            TokenKind::Minus,
            TokenKind::Number,
            TokenKind::Eof
        ]
    );

    let ks = kinds("1 - 2");
    assert!(ks.contains(&TokenKind::Minus));
}

#[test]
fn test_string_quoting_and_escapes() {
    let (tokens, diags) = lex(r#""hello\nworld" `tick` "tab\there""#, "<test>");
    assert!(diags.is_empty());
    assert_eq!(tokens[0].string(), Some("hello\nworld"));
    assert_eq!(tokens[1].string(), Some("tick"));
    assert_eq!(tokens[2].string(), Some("tab\there"));
}

#[test]
fn test_bad_escape_is_error() {
    let (tokens, diags) = lex(r#""oops\q""#, "<test>");
    assert_eq!(tokens[0].kind, TokenKind::Error);
    assert!(!diags.is_empty());
}

#[test]
fn test_unterminated_string() {
    let (tokens, diags) = lex("\"never ends", "<test>");
    assert_eq!(tokens[0].kind, TokenKind::Error);
    assert_eq!(diags.len(), 1);
}

#[test]
fn test_pitch_literals() {
    let (tokens, _) = lex("'c4' 'F#3' 'Bb5' 'a'", "<test>");
    let pitches: Vec<u8> = tokens
        .iter()
        .filter_map(|t| match t.value {
            TokenValue::Pitch { midi_note } => Some(midi_note),
            _ => None,
        })
        .collect();
    // c4=60, f#3=54, bb5=82, a defaults to octave 4 = 69
    assert_eq!(pitches, vec![60, 54, 82, 69]);
}

#[test]
fn test_chord_literal() {
    let (tokens, _) = lex("'c4:maj7'", "<test>");
    match &tokens[0].value {
        TokenValue::Chord {
            root_midi,
            intervals,
        } => {
            assert_eq!(*root_midi, 60);
            assert_eq!(intervals, &vec![0, 4, 7, 11]);
        }
        other => panic!("expected chord, got {:?}", other),
    }
}

#[test]
fn test_chord_literal_unknown_quality_defaults_to_major() {
    let (tokens, diags) = lex("'c4:blorp'", "<test>");
    assert!(diags.is_empty());
    match &tokens[0].value {
        TokenValue::Chord { intervals, .. } => assert_eq!(intervals, &vec![0, 4, 7]),
        other => panic!("expected chord, got {:?}", other),
    }
}

#[test]
fn test_single_quoted_non_pitch_falls_back_to_string() {
    let (tokens, _) = lex("'hello'", "<test>");
    assert_eq!(tokens[0].kind, TokenKind::Str);
    assert_eq!(tokens[0].string(), Some("hello"));
}

#[test]
fn test_operators() {
    assert_eq!(
        kinds("a |> b"),
        vec![
            TokenKind::Identifier,
            TokenKind::Pipe,
            TokenKind::Identifier,
            TokenKind::Eof
        ]
    );
    assert_eq!(
        kinds("== != <= >= && || -> ="),
        vec![
            TokenKind::EqualEqual,
            TokenKind::BangEqual,
            TokenKind::LessEqual,
            TokenKind::GreaterEqual,
            TokenKind::AndAnd,
            TokenKind::OrOr,
            TokenKind::Arrow,
            TokenKind::Equals,
            TokenKind::Eof
        ]
    );
}

#[test]
fn test_bare_pipe_is_error() {
    let (tokens, diags) = lex("a | b", "<test>");
    assert!(tokens.iter().any(|t| t.kind == TokenKind::Error));
    assert_eq!(diags.len(), 1);
}

#[test]
fn test_keywords_are_case_sensitive() {
    assert_eq!(kinds("pat")[0], TokenKind::Pat);
    assert_eq!(kinds("Pat")[0], TokenKind::Identifier);
    assert_eq!(
        kinds("true false post match fn seq timeline note"),
        vec![
            TokenKind::True,
            TokenKind::False,
            TokenKind::Post,
            TokenKind::Match,
            TokenKind::Fn,
            TokenKind::Seq,
            TokenKind::Timeline,
            TokenKind::Note,
            TokenKind::Eof
        ]
    );
}

#[test]
fn test_underscore_handling() {
    // Standalone underscore is its own token; inside identifiers it is not
    assert_eq!(kinds("_")[0], TokenKind::Underscore);
    assert_eq!(kinds("foo_bar")[0], TokenKind::Identifier);
}

#[test]
fn test_comments_and_newlines_skipped() {
    let ks = kinds("saw(440) // a comment\n+ 1");
    assert_eq!(
        ks,
        vec![
            TokenKind::Identifier,
            TokenKind::LParen,
            TokenKind::Number,
            TokenKind::RParen,
            TokenKind::Plus,
            TokenKind::Number,
            TokenKind::Eof
        ]
    );
}

#[test]
fn test_lexeme_spans_match_source() {
    let source = "freq = mtof('a4') + 0.5";
    let (tokens, _) = lex(source, "<test>");

    for token in &tokens {
        if token.kind == TokenKind::Eof {
            continue;
        }
        let start = token.location.offset as usize;
        let end = start + token.location.length as usize;
        assert_eq!(
            &source[start..end],
            token.lexeme,
            "span mismatch for {:?}",
            token.kind
        );
    }
}

#[test]
fn test_error_does_not_halt_lexing() {
    let (tokens, diags) = lex("a $ b", "<test>");
    assert!(!diags.is_empty());
    // Lexing continued past the bad character
    assert_eq!(
        tokens.last().map(|t| t.kind),
        Some(TokenKind::Eof)
    );
    assert_eq!(
        tokens.iter().filter(|t| t.kind == TokenKind::Identifier).count(),
        2
    );
}

#[test]
fn test_parse_pitch_name_bounds() {
    assert_eq!(parse_pitch_name("c4"), Some(60));
    assert_eq!(parse_pitch_name("a0"), Some(21));
    assert_eq!(parse_pitch_name("g10"), Some(127)); // clamped
    assert_eq!(parse_pitch_name("h4"), None);
    assert_eq!(parse_pitch_name("c4x"), None);
}
