//! Lock-free triple-buffer program publication
//!
//! Wait-free SPSC handoff between the compiler thread and the audio
//! thread. The compiler CAS-acquires an Empty slot (-> Loading), fills it,
//! submits (-> Ready) and raises the pending flag. The audio thread, at a
//! block boundary, moves the Active slot to Fading (publishing its index
//! as `previous`), promotes the Ready slot to Active with a single index
//! store, and clears the flag. A program published before block k is
//! either fully visible at block k or not until k+1, never partially.

use crate::codegen::StateInitData;
use crate::instruction::Instruction;
use crate::program_slot::{ProgramData, ProgramSlot, SlotState};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

pub struct SwapController {
    slots: [ProgramSlot; 3],
    current_idx: AtomicU8,
    previous_idx: AtomicU8,
    swap_pending: AtomicBool,
    swap_count: AtomicU32,
}

impl Default for SwapController {
    fn default() -> Self {
        Self::new()
    }
}

impl SwapController {
    pub fn new() -> Self {
        let controller = Self {
            slots: [ProgramSlot::new(), ProgramSlot::new(), ProgramSlot::new()],
            current_idx: AtomicU8::new(0),
            previous_idx: AtomicU8::new(1),
            swap_pending: AtomicBool::new(false),
            swap_count: AtomicU32::new(0),
        };
        // Slot 0 starts active (and empty) so there is always a current slot
        controller.slots[0].store_state(SlotState::Active);
        controller
    }

    // ------------------------------------------------------------------
    // Compiler thread API
    // ------------------------------------------------------------------

    /// CAS an Empty slot to Loading; None when all slots are busy (does
    /// not happen in the two-thread protocol).
    pub fn acquire_write_slot(&self) -> Option<usize> {
        (0..3).find(|i| self.slots[*i].transition(SlotState::Empty, SlotState::Loading))
    }

    /// Publish a Loading slot: Loading -> Ready plus the pending flag
    pub fn submit_ready(&self, slot_idx: usize) -> bool {
        if self.slots[slot_idx].transition(SlotState::Loading, SlotState::Ready) {
            self.swap_pending.store(true, Ordering::Release);
            return true;
        }
        false
    }

    /// Acquire + fill + submit in one step
    pub fn load_program(&self, bytecode: &[Instruction], seq_inits: &[StateInitData]) -> bool {
        let Some(slot_idx) = self.acquire_write_slot() else {
            return false;
        };

        // The CAS to Loading granted exclusive payload ownership
        let loaded = unsafe { self.slots[slot_idx].data_mut().load(bytecode, seq_inits) };
        if !loaded {
            self.slots[slot_idx].clear();
            return false;
        }

        self.submit_ready(slot_idx)
    }

    // ------------------------------------------------------------------
    // Audio thread API
    // ------------------------------------------------------------------

    pub fn has_pending_swap(&self) -> bool {
        self.swap_pending.load(Ordering::Acquire)
    }

    /// Execute a pending swap at a block boundary. Returns true when a
    /// new program became active.
    pub fn execute_swap(&self) -> bool {
        if !self.swap_pending.load(Ordering::Acquire) {
            return false;
        }

        let Some(ready_idx) = (0..3).find(|i| self.slots[*i].state() == SlotState::Ready) else {
            self.swap_pending.store(false, Ordering::Release);
            return false;
        };

        let curr_idx = self.current_idx.load(Ordering::Acquire);
        let curr_slot = &self.slots[curr_idx as usize];

        // Current becomes previous (crossfade source)
        curr_slot.store_state(SlotState::Fading);
        self.previous_idx.store(curr_idx, Ordering::Release);

        // Ready becomes current; this single index store is the
        // publication point
        self.slots[ready_idx].store_state(SlotState::Active);
        self.current_idx.store(ready_idx as u8, Ordering::Release);

        self.swap_pending.store(false, Ordering::Release);
        self.swap_count.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Active program payload. Audio thread only; the protocol keeps the
    /// compiler away from Active slots.
    pub fn current_program(&self) -> &ProgramData {
        let idx = self.current_idx.load(Ordering::Acquire) as usize;
        unsafe { self.slots[idx].data() }
    }

    /// Fading program payload for the crossfade source, if one exists
    pub fn previous_program(&self) -> Option<&ProgramData> {
        let idx = self.previous_idx.load(Ordering::Acquire) as usize;
        if self.slots[idx].state() == SlotState::Fading {
            Some(unsafe { self.slots[idx].data() })
        } else {
            None
        }
    }

    /// Release the fading slot once the crossfade completes
    pub fn release_previous(&self) {
        let idx = self.previous_idx.load(Ordering::Acquire) as usize;
        if self.slots[idx].state() == SlotState::Fading {
            self.slots[idx].clear();
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn has_program(&self) -> bool {
        !self.current_program().instructions.is_empty()
    }

    pub fn swap_count(&self) -> u32 {
        self.swap_count.load(Ordering::Relaxed)
    }

    pub fn slot_state(&self, idx: usize) -> SlotState {
        self.slots[idx].state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{Instruction, Opcode};

    #[test]
    fn test_publish_and_swap() {
        let controller = SwapController::new();
        assert!(!controller.has_program());

        let program = vec![Instruction::push_const(0, 1.0)];
        assert!(controller.load_program(&program, &[]));
        assert!(controller.has_pending_swap());

        assert!(controller.execute_swap());
        assert!(!controller.has_pending_swap());
        assert!(controller.has_program());
        assert_eq!(controller.current_program().instructions.len(), 1);
        assert_eq!(controller.swap_count(), 1);
    }

    #[test]
    fn test_previous_slot_fades_then_releases() {
        let controller = SwapController::new();

        let first = vec![Instruction::push_const(0, 1.0)];
        controller.load_program(&first, &[]);
        controller.execute_swap();

        let second = vec![Instruction::unary(Opcode::Mtof, 1, 0)];
        controller.load_program(&second, &[]);
        controller.execute_swap();

        // The first program is the crossfade source
        let previous = controller.previous_program().unwrap();
        assert_eq!(previous.instructions.len(), 1);
        assert_eq!(previous.instructions[0].opcode, Opcode::PushConst);

        controller.release_previous();
        assert!(controller.previous_program().is_none());
    }

    #[test]
    fn test_no_swap_without_pending() {
        let controller = SwapController::new();
        assert!(!controller.execute_swap());
    }
}
