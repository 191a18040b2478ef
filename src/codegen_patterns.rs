//! Pattern and chord code generation
//!
//! A mini-notation literal expands to one cycle of events, baked into a
//! `SEQ_STEP` sequencer (frequency stream for pitch patterns, sample-ID
//! stream plus `SAMPLE_PLAY` for sample patterns) or a `TIMELINE`
//! breakpoint automation. The evaluation PRNG is seeded from the state ID
//! so recompiles are reproducible.

use crate::ast::{Node, NodeData, NodeIndex, NodeKind, PatternKind, NULL_NODE};
use crate::chord_parser::{expand_chord, parse_chord_pattern, ChordInfo};
use crate::codegen::{CodeGenerator, StateInitData, StateInitKind};
use crate::diagnostics::SourceLocation;
use crate::instruction::{Instruction, Opcode, BUFFER_UNUSED};
use crate::pattern_event::{PatternEventStream, PatternEventType};
use crate::pattern_eval::PatternEvaluator;

/// One pattern cycle spans 4 beats
const CYCLE_LENGTH: f32 = 4.0;

fn midi_to_freq(midi: f32) -> f32 {
    440.0 * 2.0_f32.powf((midi - 69.0) / 12.0)
}

impl<'a> CodeGenerator<'a> {
    fn evaluate_events(&self, pattern_node: NodeIndex, seed: u32) -> PatternEventStream {
        PatternEvaluator::with_seed(&self.ast.arena, seed as u64).evaluate(pattern_node, 0)
    }

    pub(crate) fn handle_mini_literal(&mut self, node: NodeIndex, n: &'a Node) -> u16 {
        let pattern_kind = match n.data {
            NodeData::Pattern(kind) => kind,
            _ => PatternKind::Pat,
        };

        let pattern_node = n.first_child;
        if pattern_node == NULL_NODE {
            self.error("E114", "Pattern has no parsed content", n.location);
            return BUFFER_UNUSED;
        }
        let closure_node = self.node(pattern_node).next_sibling;

        let pat_count = self.next_call_count("pat");
        self.push_path(&format!("pat#{}", pat_count));
        let state_id = self.compute_state_id();

        let events = self.evaluate_events(pattern_node, state_id);

        if events.is_empty() {
            let out = self.emit_const(0.0, n.location);
            self.pop_path();
            self.node_buffers.insert(node, out);
            return out;
        }

        let result = if pattern_kind == PatternKind::Timeline {
            self.emit_timeline(n.location, &events, state_id)
        } else if events.has_sample_events() {
            self.emit_sample_pattern(n.location, &events, state_id)
        } else {
            self.emit_pitch_pattern(n.location, &events, state_id, closure_node)
        };

        self.pop_path();
        self.node_buffers.insert(node, result);
        result
    }

    /// TIMELINE: breakpoint automation, linearly interpolated per cycle
    fn emit_timeline(
        &mut self,
        location: SourceLocation,
        events: &PatternEventStream,
        state_id: u32,
    ) -> u16 {
        let out = self.buffers.allocate();
        if out == BUFFER_UNUSED {
            self.error("E101", "Buffer pool exhausted", location);
            return BUFFER_UNUSED;
        }

        let mut inst = Instruction::new(Opcode::Timeline, out);
        inst.state_id = state_id;
        self.emit(inst);

        let mut init = StateInitData {
            state_id,
            kind: StateInitKind::Timeline,
            cycle_length: CYCLE_LENGTH,
            times: Vec::with_capacity(events.len()),
            values: Vec::with_capacity(events.len()),
            velocities: Vec::with_capacity(events.len()),
            sample_names: Vec::with_capacity(events.len()),
        };

        for event in &events.events {
            init.times.push(event.time * CYCLE_LENGTH);
            let value = match event.event_type {
                PatternEventType::Pitch => midi_to_freq(event.midi_note as f32),
                _ => 0.0,
            };
            init.values.push(value);
            init.velocities.push(event.velocity);
            init.sample_names.push(String::new());
        }
        self.state_inits.push(init);

        out
    }

    /// Sample pattern: SEQ_STEP drives a sample-ID stream, SAMPLE_PLAY
    /// fires on the trigger bus.
    fn emit_sample_pattern(
        &mut self,
        location: SourceLocation,
        events: &PatternEventStream,
        state_id: u32,
    ) -> u16 {
        let sample_id_buf = self.buffers.allocate();
        let velocity_buf = self.buffers.allocate();
        let trigger_buf = self.buffers.allocate();
        let pitch_buf = self.buffers.allocate();
        let output_buf = self.buffers.allocate();

        if [sample_id_buf, velocity_buf, trigger_buf, pitch_buf, output_buf]
            .contains(&BUFFER_UNUSED)
        {
            self.error("E101", "Buffer pool exhausted", location);
            return BUFFER_UNUSED;
        }

        let mut seq_inst = Instruction::binary(Opcode::SeqStep, sample_id_buf, velocity_buf, trigger_buf);
        seq_inst.state_id = state_id;
        self.emit(seq_inst);

        let init = self.sample_init(events, state_id);
        self.state_inits.push(init);
        for event in &events.events {
            if event.is_sample() && !event.sample_name.is_empty() {
                self.required_samples.insert(event.sample_name.clone());
            }
        }

        // Unity playback rate
        self.emit(Instruction::push_const(pitch_buf, 1.0));

        let mut play_inst =
            Instruction::ternary(Opcode::SamplePlay, output_buf, trigger_buf, pitch_buf, sample_id_buf);
        play_inst.state_id = state_id.wrapping_add(1);
        self.emit(play_inst);

        output_buf
    }

    fn sample_init(&self, events: &PatternEventStream, state_id: u32) -> StateInitData {
        let mut init = StateInitData {
            state_id,
            kind: StateInitKind::SeqStep,
            cycle_length: CYCLE_LENGTH,
            times: Vec::with_capacity(events.len()),
            values: Vec::with_capacity(events.len()),
            velocities: Vec::with_capacity(events.len()),
            sample_names: Vec::with_capacity(events.len()),
        };

        for event in &events.events {
            init.times.push(event.time * CYCLE_LENGTH);
            if event.is_sample() {
                init.sample_names.push(event.sample_name.clone());
                let sample_id = self
                    .sample_registry
                    .map(|reg| reg.get_id(&event.sample_name))
                    .unwrap_or(0);
                init.values.push(sample_id as f32);
            } else {
                init.sample_names.push(String::new());
                init.values.push(0.0);
            }
            init.velocities.push(event.velocity);
        }

        init
    }

    /// Pitch pattern: SEQ_STEP produces a frequency stream; an optional
    /// closure gets (trigger, velocity, pitch) bound to the sequencer
    /// outputs and its body becomes the result.
    fn emit_pitch_pattern(
        &mut self,
        location: SourceLocation,
        events: &PatternEventStream,
        state_id: u32,
        closure_node: NodeIndex,
    ) -> u16 {
        let pitch_buf = self.buffers.allocate();
        let velocity_buf = self.buffers.allocate();
        let trigger_buf = self.buffers.allocate();

        if [pitch_buf, velocity_buf, trigger_buf].contains(&BUFFER_UNUSED) {
            self.error("E101", "Buffer pool exhausted", location);
            return BUFFER_UNUSED;
        }

        let mut seq_inst = Instruction::binary(Opcode::SeqStep, pitch_buf, velocity_buf, trigger_buf);
        seq_inst.state_id = state_id;
        self.emit(seq_inst);

        self.state_inits.push(pitch_init(events, state_id));

        let mut result_buf = pitch_buf;

        if closure_node != NULL_NODE && self.node(closure_node).kind == NodeKind::Closure {
            let (param_names, body) = self.closure_parts(closure_node);

            if let Some(name) = param_names.first() {
                self.symbols.define_variable(name, trigger_buf);
            }
            if let Some(name) = param_names.get(1) {
                self.symbols.define_variable(name, velocity_buf);
            }
            if let Some(name) = param_names.get(2) {
                self.symbols.define_variable(name, pitch_buf);
            }

            if body != NULL_NODE {
                result_buf = self.visit(body);
            }
        }

        result_buf
    }

    /// Reference to a pattern variable: its own sequencer, keyed by the
    /// variable name so every reference shares state.
    pub(crate) fn handle_pattern_reference(
        &mut self,
        name: &str,
        pattern_node: NodeIndex,
        location: SourceLocation,
    ) -> u16 {
        if pattern_node == NULL_NODE {
            self.error(
                "E123",
                &format!("Pattern variable '{}' has an invalid pattern node", name),
                location,
            );
            return BUFFER_UNUSED;
        }

        let pattern_n = self.node(pattern_node);
        if pattern_n.kind != NodeKind::MiniLiteral {
            self.error(
                "E124",
                &format!("Pattern variable '{}' does not refer to a pattern", name),
                location,
            );
            return BUFFER_UNUSED;
        }

        self.push_path(name);
        let state_id = self.compute_state_id();

        let mini_pattern = pattern_n.first_child;
        if mini_pattern == NULL_NODE {
            self.error("E114", "Pattern has no parsed content", location);
            self.pop_path();
            return BUFFER_UNUSED;
        }

        let events = self.evaluate_events(mini_pattern, state_id);

        if events.is_empty() {
            let out = self.emit_const(0.0, location);
            self.pop_path();
            return out;
        }

        let out = if events.has_sample_events() {
            let sample_id_buf = self.buffers.allocate();
            let velocity_buf = self.buffers.allocate();
            let trigger_buf = self.buffers.allocate();

            if [sample_id_buf, velocity_buf, trigger_buf].contains(&BUFFER_UNUSED) {
                self.error("E101", "Buffer pool exhausted", location);
                self.pop_path();
                return BUFFER_UNUSED;
            }

            let mut seq_inst =
                Instruction::binary(Opcode::SeqStep, sample_id_buf, velocity_buf, trigger_buf);
            seq_inst.state_id = state_id;
            self.emit(seq_inst);

            let init = self.sample_init(&events, state_id);
            self.state_inits.push(init);
            for event in &events.events {
                if event.is_sample() && !event.sample_name.is_empty() {
                    self.required_samples.insert(event.sample_name.clone());
                }
            }

            sample_id_buf
        } else {
            let pitch_buf = self.buffers.allocate();
            let velocity_buf = self.buffers.allocate();
            let trigger_buf = self.buffers.allocate();

            if [pitch_buf, velocity_buf, trigger_buf].contains(&BUFFER_UNUSED) {
                self.error("E101", "Buffer pool exhausted", location);
                self.pop_path();
                return BUFFER_UNUSED;
            }

            let mut seq_inst =
                Instruction::binary(Opcode::SeqStep, pitch_buf, velocity_buf, trigger_buf);
            seq_inst.state_id = state_id;
            self.emit(seq_inst);

            self.state_inits.push(pitch_init(&events, state_id));
            pitch_buf
        };

        self.pop_path();
        out
    }

    /// chord("Am") and chord progressions like chord("Am F C G")
    pub(crate) fn handle_chord_call(&mut self, node: NodeIndex, n: &'a Node) -> u16 {
        let args = self.call_arg_values(node);
        let Some(str_node) = args.first().copied().filter(|a| *a != NULL_NODE) else {
            self.error("E125", "chord() requires exactly 1 argument", n.location);
            return BUFFER_UNUSED;
        };

        let str_n = self.node(str_node);
        let NodeData::Str(chord_str) = &str_n.data else {
            self.error(
                "E126",
                "chord() argument must be a string literal (e.g. \"Am\", \"C7 F G\")",
                str_n.location,
            );
            return BUFFER_UNUSED;
        };

        let chords = parse_chord_pattern(chord_str);
        if chords.is_empty() {
            self.error(
                "E127",
                &format!("Invalid chord symbol: \"{}\"", chord_str),
                str_n.location,
            );
            return BUFFER_UNUSED;
        }

        if chords.len() == 1 {
            self.emit_single_chord(node, n.location, &chords[0], chord_str)
        } else {
            self.emit_chord_progression(node, n.location, &chords)
        }
    }

    /// A single chord: one PUSH_CONST per note, registered as a
    /// multi-buffer of MIDI values.
    fn emit_single_chord(
        &mut self,
        node: NodeIndex,
        location: SourceLocation,
        chord: &ChordInfo,
        chord_str: &str,
    ) -> u16 {
        let notes = expand_chord(chord, 4);
        if notes.is_empty() {
            self.error(
                "E128",
                &format!("Chord expansion failed for: \"{}\"", chord_str),
                location,
            );
            return BUFFER_UNUSED;
        }

        let mut note_buffers = Vec::with_capacity(notes.len());
        for midi in notes {
            let buf = self.emit_const(midi as f32, location);
            if buf == BUFFER_UNUSED {
                return BUFFER_UNUSED;
            }
            note_buffers.push(buf);
        }

        let first = if note_buffers.len() > 1 {
            self.register_multi_buffer(node, note_buffers)
        } else {
            note_buffers[0]
        };
        self.node_buffers.insert(node, first);
        first
    }

    /// A progression: one SEQ_STEP voice per maximum chord size, each
    /// voice stepping through its note of every chord. Voice state IDs
    /// live under `chord#N/voiceI`.
    fn emit_chord_progression(
        &mut self,
        node: NodeIndex,
        location: SourceLocation,
        chords: &[ChordInfo],
    ) -> u16 {
        let expansions: Vec<Vec<i32>> = chords.iter().map(|c| expand_chord(c, 4)).collect();
        let max_voices = expansions.iter().map(|n| n.len()).max().unwrap_or(0);

        if max_voices == 0 {
            self.error("E128", "Chord expansion failed", location);
            return BUFFER_UNUSED;
        }

        let chord_count = self.next_call_count("chord");
        self.push_path(&format!("chord#{}", chord_count));

        let step = CYCLE_LENGTH / chords.len() as f32;
        let mut voice_buffers = Vec::with_capacity(max_voices);

        for voice in 0..max_voices {
            self.push_path(&format!("voice{}", voice));
            let state_id = self.compute_state_id();

            let pitch_buf = self.buffers.allocate();
            let velocity_buf = self.buffers.allocate();
            let trigger_buf = self.buffers.allocate();

            if [pitch_buf, velocity_buf, trigger_buf].contains(&BUFFER_UNUSED) {
                self.error("E101", "Buffer pool exhausted", location);
                self.pop_path();
                self.pop_path();
                return BUFFER_UNUSED;
            }

            let mut seq_inst =
                Instruction::binary(Opcode::SeqStep, pitch_buf, velocity_buf, trigger_buf);
            seq_inst.state_id = state_id;
            self.emit(seq_inst);

            let mut init = StateInitData {
                state_id,
                kind: StateInitKind::SeqStep,
                cycle_length: CYCLE_LENGTH,
                times: Vec::with_capacity(chords.len()),
                values: Vec::with_capacity(chords.len()),
                velocities: Vec::with_capacity(chords.len()),
                sample_names: Vec::with_capacity(chords.len()),
            };

            for (i, notes) in expansions.iter().enumerate() {
                init.times.push(step * i as f32);
                let midi = notes
                    .get(voice)
                    .or_else(|| notes.first())
                    .copied()
                    .unwrap_or(0);
                init.values.push(midi as f32);
                init.velocities.push(1.0);
                init.sample_names.push(String::new());
            }
            self.state_inits.push(init);

            voice_buffers.push(pitch_buf);
            self.pop_path();
        }

        self.pop_path();

        let first = self.register_multi_buffer(node, voice_buffers);
        self.node_buffers.insert(node, first);
        first
    }
}

fn pitch_init(events: &PatternEventStream, state_id: u32) -> StateInitData {
    let mut init = StateInitData {
        state_id,
        kind: StateInitKind::SeqStep,
        cycle_length: CYCLE_LENGTH,
        times: Vec::with_capacity(events.len()),
        values: Vec::with_capacity(events.len()),
        velocities: Vec::with_capacity(events.len()),
        sample_names: Vec::with_capacity(events.len()),
    };

    for event in &events.events {
        init.times.push(event.time * CYCLE_LENGTH);
        let value = match event.event_type {
            PatternEventType::Pitch => midi_to_freq(event.midi_note as f32),
            _ => 0.0,
        };
        init.values.push(value);
        init.velocities.push(event.velocity);
        init.sample_names.push(String::new());
    }

    init
}
