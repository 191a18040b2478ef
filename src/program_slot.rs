//! Program slots for the triple-buffered hot-swap protocol
//!
//! Each slot holds one complete compiled program (instructions, signature,
//! distinct state-ID list, sequencer init tables) behind an atomic
//! lifecycle state. The state machine is the ownership token: a slot's
//! payload is only ever written by the compiler thread while Loading, and
//! only read by the audio thread while Ready/Active/Fading. Storage is
//! reserved up front; loading never reallocates.

use crate::codegen::StateInitData;
use crate::instruction::{Instruction, Opcode};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// Upper bound on instructions per program
pub const MAX_PROGRAM_SIZE: usize = 4096;
/// Upper bound on distinct state IDs per program
pub const MAX_STATES: usize = 4096;

/// Slot lifecycle; transitions are CAS-driven
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    Empty = 0,
    Loading = 1,
    Ready = 2,
    Active = 3,
    Fading = 4,
}

impl SlotState {
    pub fn from_u8(v: u8) -> SlotState {
        match v {
            1 => SlotState::Loading,
            2 => SlotState::Ready,
            3 => SlotState::Active,
            4 => SlotState::Fading,
            _ => SlotState::Empty,
        }
    }
}

/// Does this opcode's state_id field name persistent state (as opposed to
/// packing a constant or being stateless)?
pub fn opcode_has_state(op: Opcode) -> bool {
    use Opcode::*;
    matches!(
        op,
        OscSin
            | OscTri
            | OscSaw
            | OscSqr
            | OscRamp
            | OscPhasor
            | OscSqrPwm
            | OscSawPwm
            | OscSin2x
            | OscSin4x
            | OscSaw2x
            | OscSaw4x
            | OscSqr2x
            | OscSqr4x
            | OscTri2x
            | OscTri4x
            | OscSqrPwm4x
            | OscSawPwm4x
            | FilterSvfLp
            | FilterSvfHp
            | FilterSvfBp
            | Noise
            | Slew
            | Sah
            | EnvGet
            | EnvAdsr
            | SamplePlay
            | Delay
            | Lfo
            | SeqStep
            | Euclid
            | Trigger
            | Timeline
    )
}

/// Packed program metadata for structural change detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgramSignature {
    /// FNV-1a over the state IDs in program order
    pub dag_hash: u32,
    pub instruction_count: u32,
    pub state_id_count: u32,
}

/// The mutable payload of a slot, owned per the lifecycle state
pub struct ProgramData {
    pub instructions: Vec<Instruction>,
    pub signature: ProgramSignature,
    /// Distinct state IDs in first-appearance order
    pub state_ids: Vec<u32>,
    pub seq_inits: Vec<StateInitData>,
}

impl ProgramData {
    fn new() -> Self {
        Self {
            instructions: Vec::with_capacity(MAX_PROGRAM_SIZE),
            signature: ProgramSignature::default(),
            state_ids: Vec::with_capacity(MAX_STATES),
            seq_inits: Vec::new(),
        }
    }

    fn clear(&mut self) {
        self.instructions.clear();
        self.state_ids.clear();
        self.seq_inits.clear();
        self.signature = ProgramSignature::default();
    }

    /// Copy a program in and recompute the signature. Fails when the
    /// program exceeds the slot capacity.
    pub fn load(&mut self, bytecode: &[Instruction], seq_inits: &[StateInitData]) -> bool {
        if bytecode.len() > MAX_PROGRAM_SIZE {
            return false;
        }

        self.clear();
        self.instructions.extend_from_slice(bytecode);
        self.seq_inits.extend_from_slice(seq_inits);
        self.compute_signature();
        true
    }

    fn compute_signature(&mut self) {
        let mut dag_hash: u32 = 2166136261;

        for inst in &self.instructions {
            if opcode_has_state(inst.opcode) && inst.state_id != 0 {
                dag_hash ^= inst.state_id;
                dag_hash = dag_hash.wrapping_mul(16777619);

                if !self.state_ids.contains(&inst.state_id) && self.state_ids.len() < MAX_STATES {
                    self.state_ids.push(inst.state_id);
                }
            }
        }

        self.signature = ProgramSignature {
            dag_hash,
            instruction_count: self.instructions.len() as u32,
            state_id_count: self.state_ids.len() as u32,
        };
    }

    pub fn has_state_id(&self, id: u32) -> bool {
        self.state_ids.contains(&id)
    }
}

/// One slot of the triple buffer
pub struct ProgramSlot {
    state: AtomicU8,
    generation: AtomicU32,
    data: UnsafeCell<ProgramData>,
}

// The lifecycle state machine grants exclusive payload access: Loading
// belongs to the compiler thread, Ready/Active/Fading to the audio thread.
unsafe impl Sync for ProgramSlot {}

impl Default for ProgramSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramSlot {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(SlotState::Empty as u8),
            generation: AtomicU32::new(0),
            data: UnsafeCell::new(ProgramData::new()),
        }
    }

    pub fn state(&self) -> SlotState {
        SlotState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn store_state(&self, state: SlotState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn transition(&self, from: SlotState, to: SlotState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Relaxed)
    }

    /// Shared payload access. Caller must hold read ownership per the
    /// state machine (audio thread on Ready/Active/Fading slots).
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn data(&self) -> &ProgramData {
        &*self.data.get()
    }

    /// Exclusive payload access. Caller must hold write ownership per the
    /// state machine (compiler thread on the slot it moved to Loading).
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn data_mut(&self) -> &mut ProgramData {
        &mut *self.data.get()
    }

    /// Clear the payload and return the slot to Empty
    pub fn clear(&self) {
        // Owned by the caller at this point (audio thread releasing a
        // fading slot, or compiler thread abandoning a load)
        unsafe {
            self.data_mut().clear();
        }
        self.generation.fetch_add(1, Ordering::Relaxed);
        self.store_state(SlotState::Empty);
    }
}
