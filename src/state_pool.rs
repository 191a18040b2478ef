//! Persistent DSP state pool with touched-set garbage collection
//!
//! States are keyed by the 32-bit FNV-1a semantic hash. Each block the
//! touched set is rebuilt by execution; after a hot-swap, states the new
//! program no longer reaches move into a fading pool whose gain decays to
//! zero over the crossfade length before the state is dropped.

use crate::dsp_state::DspState;
use std::collections::{HashMap, HashSet};

/// A state orphaned by a swap, fading out over a few blocks
#[derive(Debug)]
pub struct FadingState {
    pub state: DspState,
    pub blocks_remaining: u32,
    pub fade_gain: f32,
    pub fade_decrement: f32,
}

pub struct StatePool {
    states: HashMap<u32, DspState>,
    touched: HashSet<u32>,
    fading: HashMap<u32, FadingState>,
    fade_blocks: u32,
}

impl Default for StatePool {
    fn default() -> Self {
        Self::new()
    }
}

impl StatePool {
    pub fn new() -> Self {
        Self {
            states: HashMap::with_capacity(256),
            touched: HashSet::with_capacity(256),
            fading: HashMap::new(),
            fade_blocks: 3, // matches the default crossfade duration
        }
    }

    /// Fetch the state for `state_id`, inserting (or replacing a
    /// wrong-shaped entry) with `make()` when needed. Marks it touched.
    pub fn get_or_create_with<F>(&mut self, state_id: u32, make: F) -> &mut DspState
    where
        F: FnOnce() -> DspState,
    {
        self.touched.insert(state_id);
        self.states.entry(state_id).or_insert_with(make)
    }

    pub fn get(&self, state_id: u32) -> Option<&DspState> {
        self.states.get(&state_id)
    }

    pub fn get_mut(&mut self, state_id: u32) -> Option<&mut DspState> {
        self.touched.insert(state_id);
        self.states.get_mut(&state_id)
    }

    pub fn insert(&mut self, state_id: u32, state: DspState) {
        self.states.insert(state_id, state);
    }

    pub fn exists(&self, state_id: u32) -> bool {
        self.states.contains_key(&state_id)
    }

    pub fn touch(&mut self, state_id: u32) {
        self.touched.insert(state_id);
    }

    /// Clear the touched set; call at the start of each block
    pub fn begin_frame(&mut self) {
        self.touched.clear();
    }

    /// Move untouched states into the fading pool. Call after a swap so
    /// orphaned nodes decay instead of cutting off.
    pub fn gc_sweep(&mut self) {
        if self.fade_blocks == 0 {
            self.states.retain(|id, _| self.touched.contains(id));
            return;
        }

        let orphaned: Vec<u32> = self
            .states
            .keys()
            .filter(|id| !self.touched.contains(id))
            .copied()
            .collect();

        for id in orphaned {
            if let Some(state) = self.states.remove(&id) {
                self.fading.insert(
                    id,
                    FadingState {
                        state,
                        blocks_remaining: self.fade_blocks,
                        fade_gain: 1.0,
                        fade_decrement: 1.0 / self.fade_blocks as f32,
                    },
                );
            }
        }
    }

    /// Advance all fading states by one block
    pub fn advance_fading(&mut self) {
        for fs in self.fading.values_mut() {
            if fs.blocks_remaining > 0 {
                fs.blocks_remaining -= 1;
                fs.fade_gain = (fs.fade_gain - fs.fade_decrement).max(0.0);
            }
        }
    }

    /// Drop states that have finished fading
    pub fn gc_fading(&mut self) {
        self.fading.retain(|_, fs| fs.blocks_remaining > 0);
    }

    /// 1.0 for live states, the decayed gain for fading ones, else 0.0
    pub fn fade_gain(&self, state_id: u32) -> f32 {
        if self.states.contains_key(&state_id) {
            return 1.0;
        }
        self.fading
            .get(&state_id)
            .map(|fs| fs.fade_gain)
            .unwrap_or(0.0)
    }

    pub fn set_fade_blocks(&mut self, blocks: u32) {
        self.fade_blocks = blocks;
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn fading_count(&self) -> usize {
        self.fading.len()
    }

    /// Full reset (program change, not hot-swap)
    pub fn reset(&mut self) {
        self.states.clear();
        self.touched.clear();
        self.fading.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp_state::OscState;

    #[test]
    fn test_get_or_create_preserves() {
        let mut pool = StatePool::new();
        {
            let state = pool.get_or_create_with(42, || DspState::Osc(OscState::default()));
            if let DspState::Osc(osc) = state {
                osc.phase = 0.25;
            }
        }
        let state = pool.get_or_create_with(42, || DspState::Osc(OscState::default()));
        match state {
            DspState::Osc(osc) => assert_eq!(osc.phase, 0.25),
            _ => panic!("state shape changed"),
        }
    }

    #[test]
    fn test_gc_moves_untouched_to_fading() {
        let mut pool = StatePool::new();
        pool.get_or_create_with(1, || DspState::Osc(OscState::default()));
        pool.get_or_create_with(2, || DspState::Osc(OscState::default()));

        pool.begin_frame();
        pool.get_or_create_with(1, || DspState::Osc(OscState::default()));
        pool.gc_sweep();

        assert!(pool.exists(1));
        assert!(!pool.exists(2));
        assert_eq!(pool.fading_count(), 1);
        assert!(pool.fade_gain(2) > 0.0);

        for _ in 0..3 {
            pool.advance_fading();
        }
        pool.gc_fading();
        assert_eq!(pool.fading_count(), 0);
        assert_eq!(pool.fade_gain(2), 0.0);
    }
}
