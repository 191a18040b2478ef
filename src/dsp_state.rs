//! Persistent DSP state variants
//!
//! Keyed in the state pool by the 32-bit semantic hash so hot-swapped
//! programs that preserve their semantic paths keep oscillator phases,
//! filter memories and sequencer playheads.

/// Oscillator phase in the unit interval
#[derive(Debug, Clone, Copy, Default)]
pub struct OscState {
    pub phase: f32,
}

/// State-variable filter memories plus cached coefficients
#[derive(Debug, Clone, Copy)]
pub struct SvfState {
    pub ic1: f32,
    pub ic2: f32,
    pub g: f32,
    pub k: f32,
    pub a1: f32,
    pub a2: f32,
    pub a3: f32,
    pub last_freq: f32,
    pub last_q: f32,
}

impl Default for SvfState {
    fn default() -> Self {
        Self {
            ic1: 0.0,
            ic2: 0.0,
            g: 0.0,
            k: 0.0,
            a1: 0.0,
            a2: 0.0,
            a3: 0.0,
            last_freq: -1.0,
            last_q: -1.0,
        }
    }
}

/// LCG noise generator
#[derive(Debug, Clone, Copy)]
pub struct NoiseState {
    pub seed: u32,
    pub start_seed: u32,
    pub phase: f32,
    pub current_value: f32,
    pub prev_trigger: f32,
    pub initialized: bool,
}

impl Default for NoiseState {
    fn default() -> Self {
        Self {
            seed: 12345,
            start_seed: 12345,
            phase: 0.0,
            current_value: 0.0,
            prev_trigger: 0.0,
            initialized: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SlewState {
    pub current: f32,
    pub initialized: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SahState {
    pub held_value: f32,
    pub prev_trigger: f32,
}

/// ADSR envelope stage machine
#[derive(Debug, Clone, Copy, Default)]
pub struct AdsrState {
    pub level: f32,
    /// 0=idle, 1=attack, 2=decay, 3=sustain, 4=release
    pub stage: u8,
    pub prev_gate: f32,
}

/// Delay line backed by a span of the audio arena
#[derive(Debug, Clone, Copy, Default)]
pub struct DelayState {
    pub arena_offset: usize,
    pub length: usize,
    pub write_pos: usize,
    pub allocated: bool,
}

/// Step sequencer playhead plus the baked event tables
#[derive(Debug, Clone)]
pub struct SeqState {
    pub times: Vec<f32>,
    pub values: Vec<f32>,
    pub velocities: Vec<f32>,
    pub cycle_length: f32,
    /// Last fired event ordinal (cycle * event_count + index)
    pub last_ordinal: i64,
}

impl Default for SeqState {
    fn default() -> Self {
        Self {
            times: Vec::new(),
            values: Vec::new(),
            velocities: Vec::new(),
            cycle_length: 0.0,
            last_ordinal: i64::MIN,
        }
    }
}

/// Breakpoint automation table
#[derive(Debug, Clone, Default)]
pub struct TimelineState {
    pub times: Vec<f32>,
    pub values: Vec<f32>,
    pub cycle_length: f32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LfoState {
    pub phase: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct TriggerState {
    pub last_division: i64,
}

impl Default for TriggerState {
    fn default() -> Self {
        Self { last_division: -1 }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EuclidState {
    pub last_step: i64,
}

impl Default for EuclidState {
    fn default() -> Self {
        Self { last_step: -1 }
    }
}

/// One-shot sample playback head
#[derive(Debug, Clone, Copy, Default)]
pub struct SamplePlayState {
    pub position: f64,
    pub sample_id: u32,
    pub active: bool,
    pub prev_trigger: f32,
}

/// All persistent DSP state shapes. Stateless operations never touch the
/// pool.
#[derive(Debug, Clone)]
pub enum DspState {
    Osc(OscState),
    Svf(SvfState),
    Noise(NoiseState),
    Slew(SlewState),
    Sah(SahState),
    Adsr(AdsrState),
    Delay(DelayState),
    Seq(SeqState),
    Timeline(TimelineState),
    Lfo(LfoState),
    Trigger(TriggerState),
    Euclid(EuclidState),
    SamplePlay(SamplePlayState),
}
