//! Mini-notation tests: lexing, parsing, and pattern expansion

use akkado::ast::{AstArena, MiniAtomKind, NodeData, NodeKind};
use akkado::diagnostics::SourceLocation;
use akkado::mini_lexer::lex_mini;
use akkado::mini_parser::parse_mini;
use akkado::mini_token::{MiniTokenKind, MiniTokenValue};
use akkado::pattern_event::{PatternEventStream, PatternEventType};
use akkado::pattern_eval::PatternEvaluator;

fn eval(pattern: &str, cycle: u32) -> PatternEventStream {
    let mut arena = AstArena::new();
    let (root, diags) = parse_mini(pattern, &mut arena, SourceLocation::default(), false);
    assert!(diags.is_empty(), "pattern errors: {:?}", diags);
    PatternEvaluator::with_seed(&arena, 1).evaluate(root, cycle)
}

// ---------------------------------------------------------------------
// Lexing
// ---------------------------------------------------------------------

#[test]
fn test_pitch_vs_sample_disambiguation() {
    let (tokens, _) = lex_mini("c4 bd e hh27 bb", SourceLocation::default(), false);

    assert_eq!(tokens[0].kind, MiniTokenKind::Pitch);
    assert_eq!(tokens[1].kind, MiniTokenKind::Sample); // 'd' breaks the pitch shape
    assert_eq!(tokens[2].kind, MiniTokenKind::Pitch); // bare letter, default octave
    assert_eq!(tokens[3].kind, MiniTokenKind::Sample); // not a pitch shape
    assert_eq!(tokens[4].kind, MiniTokenKind::Pitch); // b-flat, not a sample
}

#[test]
fn test_sample_only_mode_suppresses_pitch() {
    let (tokens, _) = lex_mini("c4 e4", SourceLocation::default(), true);
    assert_eq!(tokens[0].kind, MiniTokenKind::Sample);
    assert_eq!(tokens[1].kind, MiniTokenKind::Sample);
}

#[test]
fn test_sample_variant_suffix() {
    let (tokens, _) = lex_mini("bd:2 sn", SourceLocation::default(), false);
    match &tokens[0].value {
        MiniTokenValue::Sample { name, variant } => {
            assert_eq!(name, "bd");
            assert_eq!(*variant, 2);
        }
        other => panic!("expected sample, got {:?}", other),
    }
}

#[test]
fn test_rests_and_groupings() {
    let (tokens, _) = lex_mini("~ _ [ ] < > { } ( ) ,", SourceLocation::default(), false);
    let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
    assert_eq!(
        kinds,
        vec![
            MiniTokenKind::Rest,
            MiniTokenKind::Rest,
            MiniTokenKind::LBracket,
            MiniTokenKind::RBracket,
            MiniTokenKind::LAngle,
            MiniTokenKind::RAngle,
            MiniTokenKind::LBrace,
            MiniTokenKind::RBrace,
            MiniTokenKind::LParen,
            MiniTokenKind::RParen,
            MiniTokenKind::Comma,
            MiniTokenKind::Eof
        ]
    );
}

#[test]
fn test_mini_locations_are_relative_to_base() {
    let base = SourceLocation::new(3, 10, 100, 0);
    let (tokens, _) = lex_mini("bd sn", base, false);
    assert_eq!(tokens[0].location.offset, 100);
    assert_eq!(tokens[1].location.offset, 103);
    assert_eq!(tokens[1].location.column, 13);
}

// ---------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------

#[test]
fn test_group_vs_polyrhythm() {
    let mut arena = AstArena::new();
    let (root, _) = parse_mini("[a b] [a, b]", &mut arena, SourceLocation::default(), false);

    let group = arena.child_at(root, 0);
    let poly = arena.child_at(root, 1);
    assert_eq!(arena[group].kind, NodeKind::MiniGroup);
    assert_eq!(arena[poly].kind, NodeKind::MiniPolyrhythm);
}

#[test]
fn test_modifier_defaults() {
    let mut arena = AstArena::new();
    let (root, diags) = parse_mini("bd! sn?", &mut arena, SourceLocation::default(), false);
    assert!(diags.is_empty());

    // ! without a number means 2 repeats; ? without a number means 0.5
    let repeat = arena.child_at(root, 0);
    match arena[repeat].data {
        NodeData::MiniModifier { value, .. } => assert_eq!(value, 2.0),
        _ => panic!("expected modifier"),
    }
    let chance = arena.child_at(root, 1);
    match arena[chance].data {
        NodeData::MiniModifier { value, .. } => assert_eq!(value, 0.5),
        _ => panic!("expected modifier"),
    }
}

#[test]
fn test_polymeter_step_count() {
    let mut arena = AstArena::new();
    let (root, _) = parse_mini("{a b c}%8", &mut arena, SourceLocation::default(), false);
    let poly = arena.child_at(root, 0);
    match arena[poly].data {
        NodeData::MiniPolymeter { step_count } => assert_eq!(step_count, 8),
        _ => panic!("expected polymeter"),
    }
}

#[test]
fn test_euclidean_node() {
    let mut arena = AstArena::new();
    let (root, _) = parse_mini("bd(3,8,2)", &mut arena, SourceLocation::default(), false);
    let euclid = arena.child_at(root, 0);
    match arena[euclid].data {
        NodeData::MiniEuclidean {
            hits,
            steps,
            rotation,
        } => {
            assert_eq!((hits, steps, rotation), (3, 8, 2));
        }
        _ => panic!("expected euclidean"),
    }
    // The atom is the euclidean node's child
    let atom = arena[euclid].first_child;
    assert!(matches!(
        arena[atom].data,
        NodeData::MiniAtom {
            kind: MiniAtomKind::Sample,
            ..
        }
    ));
}

#[test]
fn test_mismatched_bracket_reports_error() {
    let mut arena = AstArena::new();
    let (_, diags) = parse_mini("[bd sn", &mut arena, SourceLocation::default(), false);
    assert!(!diags.is_empty());
}

// ---------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------

#[test]
fn test_single_atom_fills_cycle() {
    let events = eval("c4", 0);
    assert_eq!(events.len(), 1);
    assert_eq!(events.events[0].time, 0.0);
    assert_eq!(events.events[0].duration, 1.0);
    assert_eq!(events.events[0].midi_note, 60);
}

#[test]
fn test_sequence_subdivides_evenly() {
    let events = eval("c4 e4 g4 b4", 0);
    assert_eq!(events.len(), 4);
    let times: Vec<f32> = events.events.iter().map(|e| e.time).collect();
    assert_eq!(times, vec![0.0, 0.25, 0.5, 0.75]);
    assert!(events.events.iter().all(|e| e.duration == 0.25));
}

#[test]
fn test_group_shares_parent_span() {
    let events = eval("bd [sn sn]", 0);
    assert_eq!(events.len(), 3);
    assert_eq!(events.events[0].time, 0.0);
    assert_eq!(events.events[0].duration, 0.5);
    assert_eq!(events.events[1].time, 0.5);
    assert_eq!(events.events[1].duration, 0.25);
    assert_eq!(events.events[2].time, 0.75);
}

#[test]
fn test_rests_emit_rest_events() {
    let events = eval("bd ~ sn ~", 0);
    assert_eq!(events.len(), 4);
    assert_eq!(events.events[0].event_type, PatternEventType::Sample);
    assert_eq!(events.events[1].event_type, PatternEventType::Rest);
}

#[test]
fn test_alternation_rotates_per_cycle() {
    assert_eq!(eval("<c4 e4 g4>", 0).events[0].midi_note, 60);
    assert_eq!(eval("<c4 e4 g4>", 1).events[0].midi_note, 64);
    assert_eq!(eval("<c4 e4 g4>", 2).events[0].midi_note, 67);
    assert_eq!(eval("<c4 e4 g4>", 3).events[0].midi_note, 60);
}

#[test]
fn test_polyrhythm_children_fire_in_parallel() {
    let events = eval("[bd*2, sn*3]", 0);
    // Both voices start at time zero inside the shared span
    assert_eq!(events.events[0].time, 0.0);
    assert_eq!(events.events[1].time, 0.0);
}

#[test]
fn test_repeat_modifier_clones_across_span() {
    let events = eval("bd!3", 0);
    assert_eq!(events.len(), 3);
    let times: Vec<f32> = events.events.iter().map(|e| e.time).collect();
    assert!((times[1] - 1.0 / 3.0).abs() < 1e-6);
    assert!((times[2] - 2.0 / 3.0).abs() < 1e-6);
}

#[test]
fn test_weight_and_chance_modifiers() {
    let events = eval("c4@0.5 e4?0.25", 0);
    assert_eq!(events.events[0].velocity, 0.5);
    assert_eq!(events.events[1].chance, 0.25);
}

#[test]
fn test_euclidean_tresillo_times() {
    let events = eval("bd(3,8)", 0);
    assert_eq!(events.len(), 3);
    let times: Vec<f32> = events.events.iter().map(|e| e.time).collect();
    assert_eq!(times, vec![0.0, 3.0 / 8.0, 6.0 / 8.0]);
}

#[test]
fn test_euclidean_saturated_and_empty() {
    assert_eq!(eval("bd(8,8)", 0).len(), 8);
    assert_eq!(eval("bd(0,4)", 0).len(), 0);
}

#[test]
fn test_polymeter_rotates_with_cycle() {
    // {c4 e4 g4}%4: four steps per cycle stepping through three notes
    let cycle0 = eval("{c4 e4 g4}%4", 0);
    assert_eq!(cycle0.len(), 4);
    let notes: Vec<u8> = cycle0.events.iter().map(|e| e.midi_note).collect();
    assert_eq!(notes, vec![60, 64, 67, 60]);

    let cycle1 = eval("{c4 e4 g4}%4", 1);
    let notes: Vec<u8> = cycle1.events.iter().map(|e| e.midi_note).collect();
    assert_eq!(notes, vec![64, 67, 60, 64]);
}

#[test]
fn test_choice_is_deterministic_for_fixed_evaluator() {
    let mut arena = AstArena::new();
    let (root, _) = parse_mini("c4 | e4 | g4", &mut arena, SourceLocation::default(), false);

    let a = PatternEvaluator::with_seed(&arena, 42).evaluate(root, 0);
    let b = PatternEvaluator::with_seed(&arena, 42).evaluate(root, 0);
    assert_eq!(a.events[0].midi_note, b.events[0].midi_note);
}

#[test]
fn test_events_sorted_by_time() {
    let events = eval("[bd*3, sn*4] hh", 0);
    let times: Vec<f32> = events.events.iter().map(|e| e.time).collect();
    let mut sorted = times.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(times, sorted);
}

#[test]
fn test_empty_pattern_is_empty_stream() {
    let events = eval("", 0);
    assert!(events.is_empty());
}
