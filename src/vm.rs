//! Cedar virtual machine
//!
//! A straight-line, block-based interpreter over the 20-byte instruction
//! stream. Each opcode dispatches through one dense `match` to an inlined
//! kernel that reads its input buffers, consults its state through the
//! semantic hash, and writes one block to its output buffer. The VM owns
//! the buffer pool, state pool and audio arena; nothing on the execution
//! path takes a lock.

use crate::audio_arena::AudioArena;
use crate::buffer_pool::{Block, BufferPool, BLOCK_SIZE};
use crate::codegen::{StateInitData, StateInitKind};
use crate::dsp_state::*;
use crate::env_map::EnvMap;
use crate::instruction::{Instruction, Opcode, BUFFER_UNUSED};
use crate::sample_bank::SampleBank;
use crate::state_pool::StatePool;
use std::sync::Arc;

pub const DEFAULT_SAMPLE_RATE: f32 = 48000.0;
pub const DEFAULT_BPM: f32 = 120.0;
/// Beats per pattern cycle
pub const CYCLE_BEATS: f64 = 4.0;
/// Audio arena capacity in floats (delay lines)
const ARENA_FLOATS: usize = 1 << 21;

const TAU: f32 = std::f32::consts::TAU;
static ZERO_BLOCK: Block = [0.0; BLOCK_SIZE];

pub struct Vm {
    pub buffers: BufferPool,
    pub states: StatePool,
    pub arena: AudioArena,
    pub env: Arc<EnvMap>,
    pub sample_bank: Option<SampleBank>,

    sample_rate: f32,
    inv_sample_rate: f32,
    bpm: f32,
    sample_counter: u64,
    block_counter: u64,
    beat_phase: f32,
    bar_phase: f32,
}

impl Vm {
    pub fn new(sample_rate: f32, env: Arc<EnvMap>) -> Self {
        env.set_sample_rate(sample_rate);
        Self {
            buffers: BufferPool::new(),
            states: StatePool::new(),
            arena: AudioArena::new(ARENA_FLOATS),
            env,
            sample_bank: None,
            sample_rate,
            inv_sample_rate: 1.0 / sample_rate,
            bpm: DEFAULT_BPM,
            sample_counter: 0,
            block_counter: 0,
            beat_phase: 0.0,
            bar_phase: 0.0,
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn set_bpm(&mut self, bpm: f32) {
        self.bpm = bpm.clamp(20.0, 999.0);
    }

    pub fn bpm(&self) -> f32 {
        self.bpm
    }

    pub fn block_counter(&self) -> u64 {
        self.block_counter
    }

    pub fn beat_phase(&self) -> f32 {
        self.beat_phase
    }

    pub fn bar_phase(&self) -> f32 {
        self.bar_phase
    }

    fn beats_per_sample(&self) -> f64 {
        self.bpm as f64 / 60.0 / self.sample_rate as f64
    }

    /// Beat position at the start of the current block
    fn base_beat(&self) -> f64 {
        self.sample_counter as f64 * self.beats_per_sample()
    }

    /// Apply sequencer/timeline init tables. Surviving state IDs keep
    /// their playheads; only the baked tables are refreshed.
    pub fn apply_state_inits(&mut self, inits: &[StateInitData]) {
        for init in inits {
            match init.kind {
                StateInitKind::SeqStep => {
                    let state = self
                        .states
                        .get_or_create_with(init.state_id, || DspState::Seq(SeqState::default()));
                    if !matches!(state, DspState::Seq(_)) {
                        *state = DspState::Seq(SeqState::default());
                    }
                    if let DspState::Seq(seq) = state {
                        seq.times = init.times.clone();
                        seq.values = init.values.clone();
                        seq.velocities = init.velocities.clone();
                        seq.cycle_length = init.cycle_length;
                    }
                }
                StateInitKind::Timeline => {
                    let state = self.states.get_or_create_with(init.state_id, || {
                        DspState::Timeline(TimelineState::default())
                    });
                    if !matches!(state, DspState::Timeline(_)) {
                        *state = DspState::Timeline(TimelineState::default());
                    }
                    if let DspState::Timeline(tl) = state {
                        tl.times = init.times.clone();
                        tl.values = init.values.clone();
                        tl.cycle_length = init.cycle_length;
                    }
                }
            }
        }
    }

    /// Run one program for the current block, accumulating into the
    /// stereo outputs. Does not advance time; callers may run two
    /// programs per block during a crossfade, then call `advance_block`.
    pub fn execute_program(&mut self, program: &[Instruction], out_l: &mut Block, out_r: &mut Block) {
        for inst in program {
            self.execute(inst, out_l, out_r);
        }
    }

    /// Advance the transport by one block
    pub fn advance_block(&mut self) {
        self.sample_counter += BLOCK_SIZE as u64;
        self.block_counter += 1;

        let beat = self.base_beat();
        self.beat_phase = beat.fract() as f32;
        self.bar_phase = (beat / 4.0).fract() as f32;
    }

    /// Full reset: clears every pool; used on program change, not hot-swap
    pub fn reset(&mut self) {
        self.buffers.clear_all();
        self.states.reset();
        self.arena.reset();
        self.sample_counter = 0;
        self.block_counter = 0;
        self.beat_phase = 0.0;
        self.bar_phase = 0.0;
    }

    fn execute(&mut self, inst: &Instruction, out_l: &mut Block, out_r: &mut Block) {
        let inv_sr = self.inv_sample_rate;
        let sr = self.sample_rate;
        let bps = self.bpm as f64 / 60.0 / sr as f64;
        let base_beat = self.sample_counter as f64 * bps;

        // Split borrows: kernels need the pools independently
        let Vm {
            buffers,
            states,
            arena,
            env,
            sample_bank,
            ..
        } = self;

        // Out/input split. The code generator never emits an instruction
        // whose output index equals one of its inputs, so these borrows
        // cannot alias.
        macro_rules! out_buf {
            () => {{
                debug_assert!(!inst.inputs.contains(&inst.out_buffer));
                unsafe { &mut *buffers.block_ptr(inst.out_buffer) }
            }};
        }
        macro_rules! in_buf {
            ($i:expr) => {{
                let idx = inst.inputs[$i];
                if idx == BUFFER_UNUSED {
                    &ZERO_BLOCK
                } else {
                    unsafe { &*buffers.block_ptr(idx) }
                }
            }};
        }
        // Write access to an input-indexed buffer (sequencer side outputs)
        macro_rules! in_buf_mut {
            ($i:expr) => {{
                let idx = inst.inputs[$i];
                debug_assert_ne!(idx, inst.out_buffer);
                unsafe { &mut *buffers.block_ptr(idx) }
            }};
        }
        macro_rules! state_of {
            ($variant:ident, $t:ty) => {{
                let slot =
                    states.get_or_create_with(inst.state_id, || DspState::$variant(<$t>::default()));
                if !matches!(slot, DspState::$variant(_)) {
                    *slot = DspState::$variant(<$t>::default());
                }
                match slot {
                    DspState::$variant(s) => s,
                    _ => unreachable!(),
                }
            }};
        }

        match inst.opcode {
            Opcode::Nop | Opcode::Invalid => {}

            Opcode::PushConst => {
                out_buf!().fill(inst.const_value());
            }

            Opcode::Copy => {
                let input = in_buf!(0);
                out_buf!().copy_from_slice(input);
            }

            // Arithmetic
            Opcode::Add => binary_op(out_buf!(), in_buf!(0), in_buf!(1), |a, b| a + b),
            Opcode::Sub => binary_op(out_buf!(), in_buf!(0), in_buf!(1), |a, b| a - b),
            Opcode::Mul => binary_op(out_buf!(), in_buf!(0), in_buf!(1), |a, b| a * b),
            Opcode::Div => binary_op(out_buf!(), in_buf!(0), in_buf!(1), |a, b| {
                if b != 0.0 {
                    a / b
                } else {
                    0.0
                }
            }),
            Opcode::Pow => binary_op(out_buf!(), in_buf!(0), in_buf!(1), |a, b| a.powf(b)),
            Opcode::Neg => unary_op(out_buf!(), in_buf!(0), |a| -a),

            // Oscillators
            Opcode::OscSin => {
                let state = state_of!(Osc, OscState);
                run_osc(out_buf!(), in_buf!(0), None, state, inv_sr, 1, wave_sin)
            }
            Opcode::OscTri => {
                let state = state_of!(Osc, OscState);
                run_osc(out_buf!(), in_buf!(0), None, state, inv_sr, 1, wave_tri)
            }
            Opcode::OscSaw => {
                let state = state_of!(Osc, OscState);
                run_osc(out_buf!(), in_buf!(0), None, state, inv_sr, 1, wave_saw)
            }
            Opcode::OscSqr => {
                let state = state_of!(Osc, OscState);
                run_osc(out_buf!(), in_buf!(0), None, state, inv_sr, 1, wave_sqr)
            }
            Opcode::OscRamp => {
                let state = state_of!(Osc, OscState);
                run_osc(out_buf!(), in_buf!(0), None, state, inv_sr, 1, wave_ramp)
            }
            Opcode::OscPhasor => {
                let state = state_of!(Osc, OscState);
                run_osc(out_buf!(), in_buf!(0), None, state, inv_sr, 1, wave_phasor)
            }
            Opcode::OscSqrPwm => {
                let state = state_of!(Osc, OscState);
                run_osc(out_buf!(), in_buf!(0), Some(in_buf!(1)), state, inv_sr, 1, wave_pwm)
            }
            Opcode::OscSawPwm => {
                let state = state_of!(Osc, OscState);
                run_osc(out_buf!(), in_buf!(0), Some(in_buf!(1)), state, inv_sr, 1, wave_vsaw)
            }

            // Oversampled variants (FM targets)
            Opcode::OscSin2x => {
                let state = state_of!(Osc, OscState);
                run_osc(out_buf!(), in_buf!(0), None, state, inv_sr, 2, wave_sin)
            }
            Opcode::OscSin4x => {
                let state = state_of!(Osc, OscState);
                run_osc(out_buf!(), in_buf!(0), None, state, inv_sr, 4, wave_sin)
            }
            Opcode::OscSaw2x => {
                let state = state_of!(Osc, OscState);
                run_osc(out_buf!(), in_buf!(0), None, state, inv_sr, 2, wave_saw)
            }
            Opcode::OscSaw4x => {
                let state = state_of!(Osc, OscState);
                run_osc(out_buf!(), in_buf!(0), None, state, inv_sr, 4, wave_saw)
            }
            Opcode::OscSqr2x => {
                let state = state_of!(Osc, OscState);
                run_osc(out_buf!(), in_buf!(0), None, state, inv_sr, 2, wave_sqr)
            }
            Opcode::OscSqr4x => {
                let state = state_of!(Osc, OscState);
                run_osc(out_buf!(), in_buf!(0), None, state, inv_sr, 4, wave_sqr)
            }
            Opcode::OscTri2x => {
                let state = state_of!(Osc, OscState);
                run_osc(out_buf!(), in_buf!(0), None, state, inv_sr, 2, wave_tri)
            }
            Opcode::OscTri4x => {
                let state = state_of!(Osc, OscState);
                run_osc(out_buf!(), in_buf!(0), None, state, inv_sr, 4, wave_tri)
            }
            Opcode::OscSqrPwm4x => {
                let state = state_of!(Osc, OscState);
                run_osc(out_buf!(), in_buf!(0), Some(in_buf!(1)), state, inv_sr, 4, wave_pwm)
            }
            Opcode::OscSawPwm4x => {
                let state = state_of!(Osc, OscState);
                run_osc(out_buf!(), in_buf!(0), Some(in_buf!(1)), state, inv_sr, 4, wave_vsaw)
            }

            // State-variable filters
            Opcode::FilterSvfLp => {
                let state = state_of!(Svf, SvfState);
                run_svf(out_buf!(), in_buf!(0), in_buf!(1), in_buf!(2), state, sr, SvfMode::Low)
            }
            Opcode::FilterSvfHp => {
                let state = state_of!(Svf, SvfState);
                run_svf(out_buf!(), in_buf!(0), in_buf!(1), in_buf!(2), state, sr, SvfMode::High)
            }
            Opcode::FilterSvfBp => {
                let state = state_of!(Svf, SvfState);
                run_svf(out_buf!(), in_buf!(0), in_buf!(1), in_buf!(2), state, sr, SvfMode::Band)
            }

            // Math
            Opcode::Abs => unary_op(out_buf!(), in_buf!(0), f32::abs),
            Opcode::Sqrt => unary_op(out_buf!(), in_buf!(0), |a| a.max(0.0).sqrt()),
            Opcode::Log => unary_op(out_buf!(), in_buf!(0), |a| a.max(1e-10).ln()),
            Opcode::Exp => unary_op(out_buf!(), in_buf!(0), f32::exp),
            Opcode::Floor => unary_op(out_buf!(), in_buf!(0), f32::floor),
            Opcode::Ceil => unary_op(out_buf!(), in_buf!(0), f32::ceil),
            Opcode::Min => binary_op(out_buf!(), in_buf!(0), in_buf!(1), f32::min),
            Opcode::Max => binary_op(out_buf!(), in_buf!(0), in_buf!(1), f32::max),
            Opcode::Clamp => {
                let (out, x, lo, hi) = (out_buf!(), in_buf!(0), in_buf!(1), in_buf!(2));
                for i in 0..BLOCK_SIZE {
                    out[i] = x[i].clamp(lo[i].min(hi[i]), hi[i].max(lo[i]));
                }
            }
            Opcode::Wrap => {
                let (out, x, lo, hi) = (out_buf!(), in_buf!(0), in_buf!(1), in_buf!(2));
                for i in 0..BLOCK_SIZE {
                    let span = hi[i] - lo[i];
                    out[i] = if span > 0.0 {
                        lo[i] + (x[i] - lo[i]).rem_euclid(span)
                    } else {
                        lo[i]
                    };
                }
            }

            // Output accumulates; several OUTPUTs in one program sum
            Opcode::Output => {
                let left = in_buf!(0);
                let right = if inst.inputs[1] != BUFFER_UNUSED {
                    in_buf!(1)
                } else {
                    left
                };
                for i in 0..BLOCK_SIZE {
                    out_l[i] += left[i];
                    out_r[i] += right[i];
                }
            }

            Opcode::Noise => {
                let state = state_of!(Noise, NoiseState);
                run_noise(out_buf!(), in_buf!(0), in_buf!(1), inst.inputs[2] != BUFFER_UNUSED,
                          in_buf!(2), state, sr)
            }

            Opcode::Mtof => unary_op(out_buf!(), in_buf!(0), |n| {
                440.0 * 2.0_f32.powf((n - 69.0) / 12.0)
            }),

            // Offset packed into the state_id field
            Opcode::Dc => {
                let offset = inst.const_value();
                unary_op(out_buf!(), in_buf!(0), |a| a + offset)
            }

            Opcode::Slew => {
                let state = state_of!(Slew, SlewState);
                let (out, target, rate) = (out_buf!(), in_buf!(0), in_buf!(1));
                if !state.initialized {
                    state.current = target[0];
                    state.initialized = true;
                }
                for i in 0..BLOCK_SIZE {
                    let max_delta = if rate[i] > 0.0 { rate[i] * inv_sr } else { f32::MAX };
                    let delta = target[i] - state.current;
                    if delta.abs() <= max_delta {
                        state.current = target[i];
                    } else if delta > 0.0 {
                        state.current += max_delta;
                    } else {
                        state.current -= max_delta;
                    }
                    out[i] = state.current;
                }
            }

            Opcode::Sah => {
                let state = state_of!(Sah, SahState);
                let (out, input, trigger) = (out_buf!(), in_buf!(0), in_buf!(1));
                for i in 0..BLOCK_SIZE {
                    if state.prev_trigger <= 0.0 && trigger[i] > 0.0 {
                        state.held_value = input[i];
                    }
                    state.prev_trigger = trigger[i];
                    out[i] = state.held_value;
                }
            }

            Opcode::EnvGet => {
                let fallback = if inst.inputs[0] != BUFFER_UNUSED {
                    in_buf!(0)[0]
                } else {
                    0.0
                };
                env.fill_block(inst.state_id, out_buf!(), fallback);
            }

            Opcode::EnvAdsr => {
                let state = state_of!(Adsr, AdsrState);
                let (out, gate) = (out_buf!(), in_buf!(0));
                let attack = in_buf!(1)[0].max(1e-4);
                let decay = in_buf!(2)[0].max(1e-4);
                let sustain = in_buf!(3)[0].clamp(0.0, 1.0);
                // Release comes packed in the rate field (tenths of
                // seconds); non-literal release falls back to the wired input
                let release = if inst.rate > 0 {
                    inst.rate as f32 * 0.1
                } else {
                    in_buf!(4)[0].max(1e-3)
                };
                run_adsr(out, gate, state, attack, decay, sustain, release, inv_sr)
            }

            Opcode::SamplePlay => {
                let state = state_of!(SamplePlay, SamplePlayState);
                let (out, trigger, rate, sample_id) =
                    (out_buf!(), in_buf!(0), in_buf!(1), in_buf!(2));
                run_sample_play(out, trigger, rate, sample_id, state, sample_bank.as_ref())
            }

            Opcode::Delay => {
                let state = state_of!(Delay, DelayState);
                let (out, input, time, feedback) =
                    (out_buf!(), in_buf!(0), in_buf!(1), in_buf!(2));

                if !state.allocated {
                    let length = (2.0 * sr) as usize;
                    if let Some(offset) = arena.alloc(length) {
                        state.arena_offset = offset;
                        state.length = length;
                        state.write_pos = 0;
                        state.allocated = true;
                    }
                }

                if state.allocated {
                    let line = arena.span_mut(state.arena_offset, state.length);
                    for i in 0..BLOCK_SIZE {
                        let delay_samples =
                            ((time[i] * sr) as usize).clamp(1, state.length - 1);
                        let read_pos =
                            (state.write_pos + state.length - delay_samples) % state.length;
                        let delayed = line[read_pos];
                        line[state.write_pos] = input[i] + delayed * feedback[i].clamp(-0.99, 0.99);
                        state.write_pos = (state.write_pos + 1) % state.length;
                        out[i] = delayed;
                    }
                } else {
                    // Arena exhausted: pass through rather than fail
                    out.copy_from_slice(input);
                }
            }

            Opcode::Clock => {
                let out = out_buf!();
                let mode = inst.rate;
                for i in 0..BLOCK_SIZE {
                    let beat = base_beat + i as f64 * bps;
                    out[i] = match mode {
                        0 => beat.fract() as f32,
                        _ => (beat / CYCLE_BEATS).fract() as f32,
                    };
                }
            }

            Opcode::Lfo => {
                let state = state_of!(Lfo, LfoState);
                let (out, rate) = (out_buf!(), in_buf!(0));
                let shape = inst.rate;
                for i in 0..BLOCK_SIZE {
                    out[i] = match shape {
                        1 => wave_tri(state.phase, 0.5),
                        2 => wave_saw(state.phase, 0.5),
                        3 => wave_ramp(state.phase, 0.5),
                        4 => wave_sqr(state.phase, 0.5),
                        _ => wave_sin(state.phase, 0.5),
                    };
                    state.phase += rate[i] * bps as f32;
                    state.phase -= state.phase.floor();
                }
            }

            Opcode::SeqStep => {
                let state = state_of!(Seq, SeqState);
                let out = out_buf!();
                let velocity_out = in_buf_mut!(0);
                let trigger_out = in_buf_mut!(1);
                run_seq_step(out, velocity_out, trigger_out, state, base_beat, bps)
            }

            Opcode::Euclid => {
                let state = state_of!(Euclid, EuclidState);
                let (out, hits, steps, rotation) =
                    (out_buf!(), in_buf!(0), in_buf!(1), in_buf!(2));
                run_euclid(out, hits[0], steps[0], rotation[0], state, base_beat, bps)
            }

            Opcode::Trigger => {
                let state = state_of!(Trigger, TriggerState);
                let (out, division) = (out_buf!(), in_buf!(0));
                for i in 0..BLOCK_SIZE {
                    let beat = base_beat + i as f64 * bps;
                    let div = division[i].max(0.0625) as f64;
                    let idx = (beat * div).floor() as i64;
                    if idx != state.last_division {
                        state.last_division = idx;
                        out[i] = 1.0;
                    } else {
                        out[i] = 0.0;
                    }
                }
            }

            Opcode::Timeline => {
                let state = state_of!(Timeline, TimelineState);
                let out = out_buf!();
                run_timeline(out, state, base_beat, bps)
            }
        }
    }
}

// ----------------------------------------------------------------------
// Kernels
// ----------------------------------------------------------------------

#[inline(always)]
fn unary_op(out: &mut Block, input: &Block, f: impl Fn(f32) -> f32) {
    for i in 0..BLOCK_SIZE {
        out[i] = f(input[i]);
    }
}

#[inline(always)]
fn binary_op(out: &mut Block, a: &Block, b: &Block, f: impl Fn(f32, f32) -> f32) {
    for i in 0..BLOCK_SIZE {
        out[i] = f(a[i], b[i]);
    }
}

fn wave_sin(phase: f32, _width: f32) -> f32 {
    (phase * TAU).sin()
}

fn wave_tri(phase: f32, _width: f32) -> f32 {
    4.0 * (phase - 0.5).abs() - 1.0
}

fn wave_saw(phase: f32, _width: f32) -> f32 {
    2.0 * phase - 1.0
}

fn wave_sqr(phase: f32, _width: f32) -> f32 {
    if phase < 0.5 {
        1.0
    } else {
        -1.0
    }
}

fn wave_ramp(phase: f32, _width: f32) -> f32 {
    1.0 - 2.0 * phase
}

fn wave_phasor(phase: f32, _width: f32) -> f32 {
    phase
}

fn wave_pwm(phase: f32, width: f32) -> f32 {
    if phase < width.clamp(0.01, 0.99) {
        1.0
    } else {
        -1.0
    }
}

/// Variable-slope saw: morphs saw -> tri -> ramp as width moves 0 -> 1
fn wave_vsaw(phase: f32, width: f32) -> f32 {
    let w = width.clamp(0.01, 0.99);
    if phase < w {
        2.0 * phase / w - 1.0
    } else {
        1.0 - 2.0 * (phase - w) / (1.0 - w)
    }
}

/// Phase accumulator oscillator; `oversample` substeps per sample are
/// evaluated and averaged (the 2x/4x variants used for FM).
#[inline(always)]
fn run_osc(
    out: &mut Block,
    freq: &Block,
    width: Option<&Block>,
    state: &mut OscState,
    inv_sr: f32,
    oversample: u32,
    wave: fn(f32, f32) -> f32,
) {
    let sub = oversample.max(1);
    let sub_scale = 1.0 / sub as f32;

    for i in 0..BLOCK_SIZE {
        let w = width.map(|b| b[i]).unwrap_or(0.5);
        let step = freq[i] * inv_sr * sub_scale;

        let mut acc = 0.0;
        for _ in 0..sub {
            acc += wave(state.phase, w);
            state.phase += step;
            if state.phase >= 1.0 {
                state.phase -= 1.0;
            } else if state.phase < 0.0 {
                state.phase += 1.0;
            }
        }
        out[i] = acc * sub_scale;
    }
}

enum SvfMode {
    Low,
    High,
    Band,
}

/// Cytomic-style state-variable filter; coefficients cached per block
fn run_svf(
    out: &mut Block,
    input: &Block,
    cutoff: &Block,
    q: &Block,
    state: &mut SvfState,
    sr: f32,
    mode: SvfMode,
) {
    let freq = cutoff[0].clamp(5.0, sr * 0.49);
    let res = q[0].max(0.05);

    if freq != state.last_freq || res != state.last_q {
        state.g = (std::f32::consts::PI * freq / sr).tan();
        state.k = 1.0 / res;
        state.a1 = 1.0 / (1.0 + state.g * (state.g + state.k));
        state.a2 = state.g * state.a1;
        state.a3 = state.g * state.a2;
        state.last_freq = freq;
        state.last_q = res;
    }

    for i in 0..BLOCK_SIZE {
        let v0 = input[i];
        let v3 = v0 - state.ic2;
        let v1 = state.a1 * state.ic1 + state.a2 * v3;
        let v2 = state.ic2 + state.a2 * state.ic1 + state.a3 * v3;
        state.ic1 = 2.0 * v1 - state.ic1;
        state.ic2 = 2.0 * v2 - state.ic2;

        out[i] = match mode {
            SvfMode::Low => v2,
            SvfMode::Band => v1,
            SvfMode::High => v0 - state.k * v1 - v2,
        };
    }
}

/// LCG noise: white at freq <= 0, sample-and-hold above; rising trigger
/// edge resets to the start seed.
fn run_noise(
    out: &mut Block,
    freq: &Block,
    trigger: &Block,
    has_seed: bool,
    seed_input: &Block,
    state: &mut NoiseState,
    sr: f32,
) {
    fn generate(state: &mut NoiseState) -> f32 {
        state.seed = state.seed.wrapping_mul(1103515245).wrapping_add(12345);
        state.seed as i32 as f32 / 2147483648.0
    }

    if !state.initialized {
        state.start_seed = if has_seed { seed_input[0] as u32 } else { 12345 };
        state.seed = state.start_seed;
        state.current_value = generate(state);
        state.initialized = true;
    }

    for i in 0..BLOCK_SIZE {
        if trigger[i] > 0.0 && state.prev_trigger <= 0.0 {
            state.seed = state.start_seed;
            state.phase = 0.0;
            state.current_value = generate(state);
        }
        state.prev_trigger = trigger[i];

        let f = freq[i];
        if f <= 0.0 {
            out[i] = generate(state);
        } else {
            state.phase += f / sr;
            if state.phase >= 1.0 {
                state.phase -= 1.0;
                state.current_value = generate(state);
            }
            out[i] = state.current_value;
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_adsr(
    out: &mut Block,
    gate: &Block,
    state: &mut AdsrState,
    attack: f32,
    decay: f32,
    sustain: f32,
    release: f32,
    inv_sr: f32,
) {
    for i in 0..BLOCK_SIZE {
        let g = gate[i];

        if g > 0.0 && state.prev_gate <= 0.0 {
            state.stage = 1;
        } else if g <= 0.0 && state.prev_gate > 0.0 && state.stage != 0 {
            state.stage = 4;
        }
        state.prev_gate = g;

        match state.stage {
            1 => {
                state.level += inv_sr / attack;
                if state.level >= 1.0 {
                    state.level = 1.0;
                    state.stage = 2;
                }
            }
            2 => {
                state.level -= inv_sr * (1.0 - sustain) / decay;
                if state.level <= sustain {
                    state.level = sustain;
                    state.stage = 3;
                }
            }
            3 => state.level = sustain,
            4 => {
                state.level -= inv_sr * sustain.max(1e-3) / release;
                if state.level <= 0.0 {
                    state.level = 0.0;
                    state.stage = 0;
                }
            }
            _ => state.level = 0.0,
        }

        out[i] = state.level;
    }
}

fn run_sample_play(
    out: &mut Block,
    trigger: &Block,
    rate: &Block,
    sample_id: &Block,
    state: &mut SamplePlayState,
    bank: Option<&SampleBank>,
) {
    for i in 0..BLOCK_SIZE {
        if trigger[i] > 0.0 && state.prev_trigger <= 0.0 {
            state.active = true;
            state.position = 0.0;
            state.sample_id = sample_id[i] as u32;
        }
        state.prev_trigger = trigger[i];

        out[i] = 0.0;
        if !state.active {
            continue;
        }

        let Some(sample) = bank.and_then(|b| b.get(state.sample_id)) else {
            state.active = false;
            continue;
        };

        let pos = state.position as usize;
        if pos + 1 >= sample.frames.len() {
            state.active = false;
            continue;
        }

        let frac = (state.position - pos as f64) as f32;
        out[i] = sample.frames[pos] * (1.0 - frac) + sample.frames[pos + 1] * frac;
        state.position += rate[i].max(0.01) as f64;
    }
}

/// Step sequencer: value stream on the output, velocity and trigger buses
/// on the first two input-indexed buffers.
fn run_seq_step(
    out: &mut Block,
    velocity_out: &mut Block,
    trigger_out: &mut Block,
    state: &mut SeqState,
    base_beat: f64,
    bps: f64,
) {
    let count = state.times.len();
    if count == 0 {
        out.fill(0.0);
        velocity_out.fill(0.0);
        trigger_out.fill(0.0);
        return;
    }

    let cycle_len = if state.cycle_length > 0.0 {
        state.cycle_length as f64
    } else {
        CYCLE_BEATS
    };

    for i in 0..BLOCK_SIZE {
        let beat = base_beat + i as f64 * bps;
        let mut cycle = (beat / cycle_len).floor() as i64;
        let pos = (beat - cycle as f64 * cycle_len) as f32;

        // Last event at or before the playhead; before the first event we
        // are still inside the previous cycle's final event
        let mut idx = None;
        for (e, t) in state.times.iter().enumerate() {
            if *t <= pos {
                idx = Some(e);
            } else {
                break;
            }
        }
        let idx = match idx {
            Some(e) => e,
            None => {
                cycle -= 1;
                count - 1
            }
        };

        let ordinal = cycle * count as i64 + idx as i64;
        if ordinal != state.last_ordinal {
            state.last_ordinal = ordinal;
            trigger_out[i] = 1.0;
        } else {
            trigger_out[i] = 0.0;
        }

        out[i] = state.values[idx];
        velocity_out[i] = state.velocities.get(idx).copied().unwrap_or(1.0);
    }
}

fn run_euclid(
    out: &mut Block,
    hits: f32,
    steps: f32,
    rotation: f32,
    state: &mut EuclidState,
    base_beat: f64,
    bps: f64,
) {
    let steps_n = (steps as usize).clamp(1, 64);
    let pattern =
        crate::pattern_eval::generate_euclidean(hits as u8, steps_n as u8, rotation as u8);
    let step_beats = CYCLE_BEATS / steps_n as f64;

    for i in 0..BLOCK_SIZE {
        let beat = base_beat + i as f64 * bps;
        let global_step = (beat / step_beats).floor() as i64;

        if global_step != state.last_step {
            state.last_step = global_step;
            let step_idx = (global_step.rem_euclid(steps_n as i64)) as usize;
            out[i] = if pattern[step_idx] { 1.0 } else { 0.0 };
        } else {
            out[i] = 0.0;
        }
    }
}

/// Breakpoint automation: linear interpolation between events, wrapping
/// from the last breakpoint back to the first at the cycle boundary.
fn run_timeline(out: &mut Block, state: &mut TimelineState, base_beat: f64, bps: f64) {
    let count = state.times.len();
    if count == 0 {
        out.fill(0.0);
        return;
    }

    let cycle_len = if state.cycle_length > 0.0 {
        state.cycle_length
    } else {
        CYCLE_BEATS as f32
    };

    for i in 0..BLOCK_SIZE {
        let beat = base_beat + i as f64 * bps;
        let pos = (beat % cycle_len as f64) as f32;

        if pos < state.times[0] {
            out[i] = state.values[0];
            continue;
        }

        let mut seg = count - 1;
        for e in 0..count {
            if state.times[e] <= pos {
                seg = e;
            } else {
                break;
            }
        }

        let (t0, v0) = (state.times[seg], state.values[seg]);
        let (t1, v1) = if seg + 1 < count {
            (state.times[seg + 1], state.values[seg + 1])
        } else {
            (cycle_len, state.values[0])
        };

        let span = (t1 - t0).max(1e-6);
        let frac = ((pos - t0) / span).clamp(0.0, 1.0);
        out[i] = v0 + (v1 - v0) * frac;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vm() -> Vm {
        Vm::new(48000.0, Arc::new(EnvMap::new(48000.0)))
    }

    fn run_one(vm: &mut Vm, program: &[Instruction]) -> (Block, Block) {
        let mut out_l = [0.0; BLOCK_SIZE];
        let mut out_r = [0.0; BLOCK_SIZE];
        vm.states.begin_frame();
        vm.execute_program(program, &mut out_l, &mut out_r);
        vm.advance_block();
        (out_l, out_r)
    }

    #[test]
    fn test_push_const_fills_buffer() {
        let mut vm = test_vm();
        run_one(&mut vm, &[Instruction::push_const(0, 440.0)]);
        assert!(vm.buffers.get(0).iter().all(|s| *s == 440.0));
    }

    #[test]
    fn test_mtof_concert_a() {
        let mut vm = test_vm();
        let program = [
            Instruction::push_const(0, 69.0),
            Instruction::unary(Opcode::Mtof, 1, 0),
        ];
        run_one(&mut vm, &program);
        assert!((vm.buffers.get(1)[0] - 440.0).abs() < 1e-3);
    }

    #[test]
    fn test_output_accumulates() {
        let mut vm = test_vm();
        let program = [
            Instruction::push_const(0, 0.25),
            Instruction::binary(Opcode::Output, BUFFER_UNUSED, 0, 0),
            Instruction::binary(Opcode::Output, BUFFER_UNUSED, 0, 0),
        ];
        let (out_l, out_r) = run_one(&mut vm, &program);
        assert!((out_l[0] - 0.5).abs() < 1e-6);
        assert!((out_r[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_oscillator_phase_persists_across_blocks() {
        let mut vm = test_vm();
        let mut inst = Instruction::unary(Opcode::OscSin, 1, 0);
        inst.state_id = 0xDEAD;
        let program = [Instruction::push_const(0, 1000.0), inst];

        run_one(&mut vm, &program);
        let phase_after_one = match vm.states.get(0xDEAD) {
            Some(DspState::Osc(osc)) => osc.phase,
            _ => panic!("oscillator state missing"),
        };
        assert!(phase_after_one > 0.0);

        run_one(&mut vm, &program);
        let phase_after_two = match vm.states.get(0xDEAD) {
            Some(DspState::Osc(osc)) => osc.phase,
            _ => panic!("oscillator state missing"),
        };
        assert_ne!(phase_after_one, phase_after_two);
    }

    #[test]
    fn test_noise_is_deterministic() {
        let mut vm_a = test_vm();
        let mut vm_b = test_vm();
        let mut inst = Instruction::new(Opcode::Noise, 0);
        inst.state_id = 7;

        let (a, _) = run_one(&mut vm_a, &[inst]);
        let (b, _) = run_one(&mut vm_b, &[inst]);
        // Same LCG seed, same stream
        assert_eq!(vm_a.buffers.get(0), vm_b.buffers.get(0));
        let _ = (a, b);
    }

    #[test]
    fn test_arithmetic_chain() {
        let mut vm = test_vm();
        let program = [
            Instruction::push_const(0, 3.0),
            Instruction::push_const(1, 4.0),
            Instruction::binary(Opcode::Mul, 2, 0, 1),
            Instruction::push_const(3, 2.0),
            Instruction::binary(Opcode::Add, 4, 2, 3),
        ];
        run_one(&mut vm, &program);
        assert!((vm.buffers.get(4)[0] - 14.0).abs() < 1e-6);
    }

    #[test]
    fn test_seq_step_triggers_first_event() {
        let mut vm = test_vm();
        vm.apply_state_inits(&[crate::codegen::StateInitData {
            state_id: 99,
            kind: StateInitKind::SeqStep,
            cycle_length: 4.0,
            times: vec![0.0, 2.0],
            values: vec![440.0, 220.0],
            velocities: vec![1.0, 0.5],
            sample_names: vec![String::new(), String::new()],
        }]);

        let mut seq = Instruction::binary(Opcode::SeqStep, 0, 1, 2);
        seq.state_id = 99;
        run_one(&mut vm, &[seq]);

        // First sample fires the first event
        assert_eq!(vm.buffers.get(0)[0], 440.0);
        assert_eq!(vm.buffers.get(2)[0], 1.0);
        // No retrigger within the same event
        assert_eq!(vm.buffers.get(2)[1], 0.0);
        assert_eq!(vm.buffers.get(1)[0], 1.0);
    }

    #[test]
    fn test_svf_lowpass_attenuates_input_dc_pass() {
        let mut vm = test_vm();
        let mut filt = Instruction::ternary(Opcode::FilterSvfLp, 3, 0, 1, 2);
        filt.state_id = 5;
        let program = [
            Instruction::push_const(0, 1.0),    // DC input
            Instruction::push_const(1, 2000.0), // cutoff
            Instruction::push_const(2, 0.7),    // q
            filt,
        ];
        // DC settles toward unity through a lowpass
        for _ in 0..50 {
            run_one(&mut vm, &program);
        }
        assert!((vm.buffers.get(3)[BLOCK_SIZE - 1] - 1.0).abs() < 0.05);
    }
}
