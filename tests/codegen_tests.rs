//! Code generation tests: instruction shapes, state identity, FM upgrade,
//! multi-buffer combinators, compile-time match, resource bounds

use akkado::compile;
use akkado::instruction::{fnv1a_hash, Instruction, Opcode, BUFFER_UNUSED};

fn compile_ok(source: &str) -> Vec<Instruction> {
    let result = compile(source, "<test>");
    assert!(result.success, "diagnostics: {:?}", result.diagnostics);
    result.instructions
}

fn count_opcode(instructions: &[Instruction], opcode: Opcode) -> usize {
    instructions.iter().filter(|i| i.opcode == opcode).count()
}

#[test]
fn test_saw_constant() {
    // saw(440) -> PUSH_CONST then OSC_SAW keyed by its semantic path
    let instructions = compile_ok("saw(440)");
    assert_eq!(instructions.len(), 2);

    assert_eq!(instructions[0].opcode, Opcode::PushConst);
    assert_eq!(instructions[0].const_value(), 440.0);
    let const_buf = instructions[0].out_buffer;

    assert_eq!(instructions[1].opcode, Opcode::OscSaw);
    assert_eq!(instructions[1].inputs[0], const_buf);
    assert_eq!(instructions[1].state_id, fnv1a_hash("main/saw#0"));
}

#[test]
fn test_saw_pitch_literal() {
    // saw('a4') -> PUSH_CONST(69), MTOF, OSC_SAW fed by the MTOF output
    let instructions = compile_ok("saw('a4')");
    assert_eq!(instructions.len(), 3);

    assert_eq!(instructions[0].opcode, Opcode::PushConst);
    assert_eq!(instructions[0].const_value(), 69.0);

    assert_eq!(instructions[1].opcode, Opcode::Mtof);
    assert_eq!(instructions[1].inputs[0], instructions[0].out_buffer);

    assert_eq!(instructions[2].opcode, Opcode::OscSaw);
    assert_eq!(instructions[2].inputs[0], instructions[1].out_buffer);
    assert_eq!(instructions[2].state_id, fnv1a_hash("main/saw#0"));
}

#[test]
fn test_fm_detection_upgrades_both_oscillators() {
    // Audio-rate frequency input: both the carrier and the modulator are
    // rewritten to their 4x variants; no basic oscillator remains
    let instructions = compile_ok("saw(sin(100) * 1000 + 440)");

    assert_eq!(count_opcode(&instructions, Opcode::OscSin4x), 1);
    assert_eq!(count_opcode(&instructions, Opcode::OscSin), 0);
    assert_eq!(count_opcode(&instructions, Opcode::OscSaw4x), 1);
    assert_eq!(count_opcode(&instructions, Opcode::OscSaw), 0);
}

#[test]
fn test_constant_frequency_oscillators_stay_basic() {
    let instructions = compile_ok("sin(440) + saw(220)");
    assert_eq!(count_opcode(&instructions, Opcode::OscSin), 1);
    assert_eq!(count_opcode(&instructions, Opcode::OscSaw), 1);
    assert_eq!(count_opcode(&instructions, Opcode::OscSin4x), 0);
}

#[test]
fn test_pipe_filter_out_chain() {
    // 6 instructions ending in OUTPUT with both stereo inputs equal to
    // the filter output
    let instructions = compile_ok("saw(440) |> lp(%, 1000, 0.7) |> out(%, %)");
    assert_eq!(instructions.len(), 6);

    let filter = instructions
        .iter()
        .find(|i| i.opcode == Opcode::FilterSvfLp)
        .expect("no filter emitted");

    let output = instructions.last().unwrap();
    assert_eq!(output.opcode, Opcode::Output);
    assert_eq!(output.inputs[0], filter.out_buffer);
    assert_eq!(output.inputs[1], filter.out_buffer);
}

#[test]
fn test_chord_map_sum_pipeline() {
    // chord("Am") expands to three voices, each mapped through sin, then
    // summed and sent to both channels
    let instructions =
        compile_ok(r#"chord("Am") |> mtof(%) |> map(%, (f) -> sin(f)) |> sum(%) |> out(%, %)"#);

    assert_eq!(count_opcode(&instructions, Opcode::PushConst), 3);
    assert_eq!(count_opcode(&instructions, Opcode::Mtof), 3);
    assert_eq!(count_opcode(&instructions, Opcode::OscSin), 3);
    assert_eq!(count_opcode(&instructions, Opcode::Add), 2);
    assert_eq!(count_opcode(&instructions, Opcode::Output), 1);

    // Three distinct oscillator states, one per voice
    let sin_states: std::collections::HashSet<u32> = instructions
        .iter()
        .filter(|i| i.opcode == Opcode::OscSin)
        .map(|i| i.state_id)
        .collect();
    assert_eq!(sin_states.len(), 3);
}

#[test]
fn test_unknown_function_fails_with_e004() {
    let result = compile("unknown_fn(1)", "<test>");
    assert!(!result.success);
    assert!(result.diagnostics.iter().any(|d| d.code == "E004"));
    assert!(result.instructions.is_empty());
}

#[test]
fn test_compilation_is_deterministic() {
    let source = r#"
        lead = chord("Am F") |> mtof(%) |> map(%, (f) -> saw(f)) |> sum(%)
        bass = sin(55)
        lead + bass |> lp(%, 1200, 0.8) |> out(%, %)
    "#;
    let a = compile(source, "<test>");
    let b = compile(source, "<test>");
    assert!(a.success, "diagnostics: {:?}", a.diagnostics);

    // Byte-identical instruction streams on every compile
    let bytes_a: Vec<u8> = a.instructions.iter().flat_map(|i| i.to_bytes()).collect();
    let bytes_b: Vec<u8> = b.instructions.iter().flat_map(|i| i.to_bytes()).collect();
    assert_eq!(bytes_a, bytes_b);
}

#[test]
fn test_state_ids_stable_across_unrelated_edits() {
    // Adding an unrelated statement preserves the saw's semantic path
    let a = compile_ok("x = saw(110)\nx |> out(%)");
    let b = compile_ok("x = saw(110)\ny = 42\nx |> out(%)");

    let id_a = a.iter().find(|i| i.opcode == Opcode::OscSaw).unwrap().state_id;
    let id_b = b.iter().find(|i| i.opcode == Opcode::OscSaw).unwrap().state_id;
    assert_eq!(id_a, id_b);
    assert_eq!(id_a, fnv1a_hash("main/x/saw#0"));
}

#[test]
fn test_repeated_stateful_calls_get_distinct_ids() {
    let instructions = compile_ok("sin(440) + sin(441)");
    let ids: Vec<u32> = instructions
        .iter()
        .filter(|i| i.opcode == Opcode::OscSin)
        .map(|i| i.state_id)
        .collect();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
    assert_eq!(ids[0], fnv1a_hash("main/sin#0"));
    assert_eq!(ids[1], fnv1a_hash("main/sin#1"));
}

#[test]
fn test_out_mono_duplicates_to_stereo() {
    let instructions = compile_ok("out(sin(330))");
    let output = instructions.last().unwrap();
    assert_eq!(output.opcode, Opcode::Output);
    assert_eq!(output.inputs[0], output.inputs[1]);
}

#[test]
fn test_array_sum_chains_adds() {
    let instructions = compile_ok("sum([sin(100), sin(200), sin(300), sin(400)])");
    assert_eq!(count_opcode(&instructions, Opcode::Add), 3);
}

#[test]
fn test_zip_with_combines_pairwise() {
    let instructions =
        compile_ok("sum(zipWith([100, 200], [1, 2], (a, b) -> a * b)) |> out(%)");
    // Two MULs from zipWith, one ADD from sum
    assert_eq!(count_opcode(&instructions, Opcode::Mul), 2);
    assert_eq!(count_opcode(&instructions, Opcode::Add), 1);
}

#[test]
fn test_range_and_len() {
    let instructions = compile_ok("len(range(0, 5))");
    // Five range constants plus the length constant
    let consts: Vec<f32> = instructions
        .iter()
        .filter(|i| i.opcode == Opcode::PushConst)
        .map(|i| i.const_value())
        .collect();
    assert_eq!(consts.len(), 6);
    assert_eq!(consts[5], 5.0);
}

#[test]
fn test_buffer_pool_exhaustion_is_a_diagnostic() {
    // range(0, 300) wants more than MAX_BUFFERS registers
    let result = compile("x = range(0, 300)", "<test>");
    assert!(!result.success);
    assert!(result.diagnostics.iter().any(|d| d.code == "E101"));
}

#[test]
fn test_no_instruction_references_out_of_range_buffer() {
    let result = compile("x = range(0, 300)", "<test>");
    // Even the failed compile never emits an out-of-range register
    for inst in &result.instructions {
        assert!(inst.out_buffer < 256 || inst.out_buffer == BUFFER_UNUSED);
    }
}

#[test]
fn test_user_function_inlines_per_call_site() {
    let instructions = compile_ok("fn voice(f) -> saw(f)\nvoice(110) + voice(220) |> out(%)");
    // The body is expanded twice with distinct oscillator states
    let ids: std::collections::HashSet<u32> = instructions
        .iter()
        .filter(|i| i.opcode == Opcode::OscSaw)
        .map(|i| i.state_id)
        .collect();
    assert_eq!(ids.len(), 2);
}

#[test]
fn test_lambda_bound_to_variable_expands_at_call() {
    let instructions = compile_ok("voice = (f) -> saw(f) * 0.5\nvoice(110) |> out(%)");
    assert_eq!(count_opcode(&instructions, Opcode::OscSaw), 1);
    assert_eq!(count_opcode(&instructions, Opcode::Mul), 1);
}

#[test]
fn test_user_function_default_parameter() {
    let instructions = compile_ok("fn voice(f, gain = 0.25) -> saw(f) * gain\nvoice(110) |> out(%)");
    assert!(instructions
        .iter()
        .any(|i| i.opcode == Opcode::PushConst && i.const_value() == 0.25));
}

#[test]
fn test_match_emits_only_selected_arm() {
    let source = r#"
        fn pick(kind) -> match(kind) { "saw": saw(220), "sin": sin(220), _: tri(220) }
        pick("sin") |> out(%)
    "#;
    let instructions = compile_ok(source);
    assert_eq!(count_opcode(&instructions, Opcode::OscSin), 1);
    assert_eq!(count_opcode(&instructions, Opcode::OscSaw), 0);
    assert_eq!(count_opcode(&instructions, Opcode::OscTri), 0);
}

#[test]
fn test_match_wildcard_fallback() {
    let source = r#"
        fn pick(kind) -> match(kind) { "saw": saw(220), _: tri(220) }
        pick("other") |> out(%)
    "#;
    let instructions = compile_ok(source);
    assert_eq!(count_opcode(&instructions, Opcode::OscTri), 1);
    assert_eq!(count_opcode(&instructions, Opcode::OscSaw), 0);
}

#[test]
fn test_pattern_lowers_to_seq_step() {
    let result = compile(r#"pat("c4 e4 g4") |> sin(%) |> out(%)"#, "<test>");
    assert!(result.success, "diagnostics: {:?}", result.diagnostics);

    let seq = result
        .instructions
        .iter()
        .find(|i| i.opcode == Opcode::SeqStep)
        .expect("no sequencer emitted");

    // One descriptor, frequencies baked from the MIDI notes
    assert_eq!(result.state_inits.len(), 1);
    let init = &result.state_inits[0];
    assert_eq!(init.state_id, seq.state_id);
    assert_eq!(init.cycle_length, 4.0);
    assert_eq!(init.times.len(), 3);
    assert!((init.values[0] - 261.63).abs() < 0.1); // c4
}

#[test]
fn test_sample_pattern_emits_sample_play() {
    let result = compile(r#"pat("bd ~ sn ~") |> out(%)"#, "<test>");
    assert!(result.success, "diagnostics: {:?}", result.diagnostics);

    assert_eq!(
        count_opcode(&result.instructions, Opcode::SamplePlay),
        1
    );
    assert_eq!(result.required_samples, vec!["bd".to_string(), "sn".to_string()]);

    let init = &result.state_inits[0];
    assert_eq!(init.sample_names.len(), 4);
    assert_eq!(init.sample_names[0], "bd");
    assert_eq!(init.sample_names[1], "");
}

#[test]
fn test_timeline_pattern_emits_timeline() {
    let result = compile(r#"timeline("c4 g4") |> out(%)"#, "<test>");
    assert!(result.success, "diagnostics: {:?}", result.diagnostics);
    assert_eq!(count_opcode(&result.instructions, Opcode::Timeline), 1);
    assert!(matches!(
        result.state_inits[0].kind,
        akkado::codegen::StateInitKind::Timeline
    ));
}

#[test]
fn test_chord_progression_voices() {
    let result = compile(r#"chord("Am F C G") |> out(%)"#, "<test>");
    assert!(result.success, "diagnostics: {:?}", result.diagnostics);

    // One sequencer voice per chord note, each with four steps
    assert_eq!(count_opcode(&result.instructions, Opcode::SeqStep), 3);
    assert_eq!(result.state_inits.len(), 3);
    assert_eq!(result.state_inits[0].times.len(), 4);

    // Voice state IDs are scoped under chord#0/voiceN
    assert_eq!(
        result.state_inits[0].state_id,
        fnv1a_hash("main/chord#0/voice0")
    );
}

#[test]
fn test_param_exposes_declaration_and_env_get() {
    let result = compile(r#"sin(param("freq", 440, 20, 2000)) |> out(%)"#, "<test>");
    assert!(result.success, "diagnostics: {:?}", result.diagnostics);

    let env_get = result
        .instructions
        .iter()
        .find(|i| i.opcode == Opcode::EnvGet)
        .expect("no ENV_GET emitted");
    assert_eq!(env_get.state_id, fnv1a_hash("freq"));

    assert_eq!(result.param_decls.len(), 1);
    let decl = &result.param_decls[0];
    assert_eq!(decl.name, "freq");
    assert_eq!(decl.default, 440.0);
    assert_eq!(decl.min, 20.0);
    assert_eq!(decl.max, 2000.0);
}

#[test]
fn test_adsr_packs_release_into_rate() {
    let instructions =
        compile_ok("adsr(trigger(1), 0.01, 0.1, 0.7, 1.5) |> out(%)");
    let adsr = instructions
        .iter()
        .find(|i| i.opcode == Opcode::EnvAdsr)
        .expect("no ADSR emitted");
    // 1.5 s release in tenths of seconds
    assert_eq!(adsr.rate, 15);
}

#[test]
fn test_dc_packs_offset_into_state_id() {
    let instructions = compile_ok("dc(sin(2), 1.0) |> out(%)");
    let dc = instructions
        .iter()
        .find(|i| i.opcode == Opcode::Dc)
        .expect("no DC emitted");
    assert_eq!(dc.const_value(), 1.0);
}

#[test]
fn test_pipe_sugar_equals_direct_call() {
    // Pipe rewriting preserves semantics: same bytecode either way
    let piped = compile_ok("440 |> saw(%) |> out(%)");
    let direct = compile_ok("out(saw(440))");
    assert_eq!(piped, direct);
}

#[test]
fn test_empty_source_fails() {
    let result = compile("", "<test>");
    assert!(!result.success);
    assert_eq!(result.diagnostics.len(), 1);
    assert!(result.diagnostics[0].message.contains("empty source"));
}
