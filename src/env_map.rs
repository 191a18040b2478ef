//! Lock-free environment parameter map
//!
//! Host threads write named control values; the audio thread reads them by
//! FNV-1a hash with per-sample interpolation toward the target. The table
//! is a fixed-capacity open-addressed hash map of atomic slots, so insert
//! and lookup run concurrently without locks. The interpolated `current`
//! is written only by the audio thread; it is stored as f32 bits in an
//! atomic so the sharing stays defined.

use crate::buffer_pool::BLOCK_SIZE;
use crate::instruction::fnv1a_hash;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};

pub const MAX_ENV_PARAMS: usize = 256;
const HASH_TABLE_SIZE: usize = 512; // power of two
const DEFAULT_SLEW_MS: f32 = 5.0;

struct EnvParam {
    /// Written by host threads, read by the audio thread
    target: AtomicU32,
    /// Interpolated value; audio thread is the only writer
    current: AtomicU32,
    /// Per-sample smoothing coefficient (f32 bits)
    slew_coeff: AtomicU32,
    active: AtomicBool,
}

impl EnvParam {
    const fn new() -> Self {
        Self {
            target: AtomicU32::new(0),
            current: AtomicU32::new(0),
            slew_coeff: AtomicU32::new(0),
            active: AtomicBool::new(false),
        }
    }
}

struct HashSlot {
    name_hash: AtomicU32,
    param_index: AtomicU16,
    occupied: AtomicBool,
}

impl HashSlot {
    const fn new() -> Self {
        Self {
            name_hash: AtomicU32::new(0),
            param_index: AtomicU16::new(0),
            occupied: AtomicBool::new(false),
        }
    }
}

pub struct EnvMap {
    params: [EnvParam; MAX_ENV_PARAMS],
    hash_table: [HashSlot; HASH_TABLE_SIZE],
    param_count: AtomicU16,
    sample_rate: AtomicU32,
}

impl Default for EnvMap {
    fn default() -> Self {
        Self::new(48000.0)
    }
}

impl EnvMap {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            params: [const { EnvParam::new() }; MAX_ENV_PARAMS],
            hash_table: [const { HashSlot::new() }; HASH_TABLE_SIZE],
            param_count: AtomicU16::new(0),
            sample_rate: AtomicU32::new(sample_rate.to_bits()),
        }
    }

    pub fn set_sample_rate(&self, rate: f32) {
        self.sample_rate.store(rate.to_bits(), Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // Host thread API
    // ------------------------------------------------------------------

    pub fn set_param(&self, name: &str, value: f32) -> bool {
        self.set_param_slewed(name, value, DEFAULT_SLEW_MS)
    }

    /// Set a parameter with an explicit slew time; 0 ms is instant
    pub fn set_param_slewed(&self, name: &str, value: f32, slew_ms: f32) -> bool {
        let hash = fnv1a_hash(name);

        let Some(index) = self.find_or_create_slot(hash) else {
            return false;
        };

        let param = &self.params[index];
        let was_active = param.active.load(Ordering::Acquire);

        param.target.store(value.to_bits(), Ordering::Relaxed);
        param
            .slew_coeff
            .store(self.calc_slew_coeff(slew_ms).to_bits(), Ordering::Relaxed);

        // First activation snaps current to target to avoid a ramp from zero
        if !was_active {
            param.current.store(value.to_bits(), Ordering::Relaxed);
        }

        param.active.store(true, Ordering::Release);
        true
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.has_param_hash(fnv1a_hash(name))
    }

    // ------------------------------------------------------------------
    // Audio thread API
    // ------------------------------------------------------------------

    pub fn has_param_hash(&self, name_hash: u32) -> bool {
        match self.find_slot(name_hash) {
            Some(slot_idx) => {
                let param_idx = self.hash_table[slot_idx].param_index.load(Ordering::Acquire);
                self.params[param_idx as usize].active.load(Ordering::Acquire)
            }
            None => false,
        }
    }

    /// Current (interpolated) value, or 0.0 when absent
    pub fn get(&self, name_hash: u32) -> f32 {
        match self.find_slot(name_hash) {
            Some(slot_idx) => {
                let param_idx = self.hash_table[slot_idx].param_index.load(Ordering::Acquire);
                let param = &self.params[param_idx as usize];
                if param.active.load(Ordering::Acquire) {
                    f32::from_bits(param.current.load(Ordering::Relaxed))
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }

    pub fn get_target(&self, name_hash: u32) -> f32 {
        match self.find_slot(name_hash) {
            Some(slot_idx) => {
                let param_idx = self.hash_table[slot_idx].param_index.load(Ordering::Acquire);
                f32::from_bits(self.params[param_idx as usize].target.load(Ordering::Relaxed))
            }
            None => 0.0,
        }
    }

    /// Fill one block with the per-sample interpolated parameter value,
    /// advancing `current` toward `target`. Returns false (and fills with
    /// `fallback`) when the parameter does not exist.
    pub fn fill_block(&self, name_hash: u32, out: &mut [f32; BLOCK_SIZE], fallback: f32) -> bool {
        let Some(slot_idx) = self.find_slot(name_hash) else {
            out.fill(fallback);
            return false;
        };

        let param_idx = self.hash_table[slot_idx].param_index.load(Ordering::Acquire);
        let param = &self.params[param_idx as usize];
        if !param.active.load(Ordering::Acquire) {
            out.fill(fallback);
            return false;
        }

        let target = f32::from_bits(param.target.load(Ordering::Relaxed));
        let coeff = f32::from_bits(param.slew_coeff.load(Ordering::Relaxed));
        let mut current = f32::from_bits(param.current.load(Ordering::Relaxed));

        for sample in out.iter_mut() {
            current += (target - current) * coeff;
            *sample = current;
        }

        param.current.store(current.to_bits(), Ordering::Relaxed);
        true
    }

    pub fn param_count(&self) -> usize {
        self.param_count.load(Ordering::Acquire) as usize
    }

    // ------------------------------------------------------------------

    fn find_slot(&self, name_hash: u32) -> Option<usize> {
        let start = name_hash as usize % HASH_TABLE_SIZE;

        for i in 0..HASH_TABLE_SIZE {
            let idx = (start + i) % HASH_TABLE_SIZE;
            let slot = &self.hash_table[idx];

            if !slot.occupied.load(Ordering::Acquire) {
                return None; // empty slot ends the probe chain
            }
            if slot.name_hash.load(Ordering::Acquire) == name_hash {
                return Some(idx);
            }
        }
        None
    }

    fn find_or_create_slot(&self, name_hash: u32) -> Option<usize> {
        let start = name_hash as usize % HASH_TABLE_SIZE;

        for i in 0..HASH_TABLE_SIZE {
            let idx = (start + i) % HASH_TABLE_SIZE;
            let slot = &self.hash_table[idx];

            if slot.occupied.load(Ordering::Acquire) {
                if slot.name_hash.load(Ordering::Acquire) == name_hash {
                    return Some(slot.param_index.load(Ordering::Acquire) as usize);
                }
                continue; // collision, probe onward
            }

            // Claim the empty slot
            if slot
                .occupied
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let param_idx = self.param_count.fetch_add(1, Ordering::AcqRel);
                if param_idx as usize >= MAX_ENV_PARAMS {
                    self.param_count.fetch_sub(1, Ordering::Relaxed);
                    slot.occupied.store(false, Ordering::Release);
                    return None;
                }

                slot.name_hash.store(name_hash, Ordering::Release);
                slot.param_index.store(param_idx, Ordering::Release);
                return Some(param_idx as usize);
            }

            // Another thread claimed it between the load and the CAS
            if slot.name_hash.load(Ordering::Acquire) == name_hash {
                return Some(slot.param_index.load(Ordering::Acquire) as usize);
            }
        }
        None
    }

    /// Coefficient reaching ~63% of target in `slew_ms`
    fn calc_slew_coeff(&self, slew_ms: f32) -> f32 {
        if slew_ms <= 0.0 {
            return 1.0;
        }
        let sample_rate = f32::from_bits(self.sample_rate.load(Ordering::Relaxed));
        let samples = slew_ms * sample_rate * 0.001;
        (1.0 / samples).clamp(1e-4, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_fill() {
        let env = EnvMap::new(48000.0);
        assert!(env.set_param_slewed("cutoff", 1000.0, 0.0));

        let hash = fnv1a_hash("cutoff");
        assert!(env.has_param_hash(hash));

        let mut block = [0.0f32; BLOCK_SIZE];
        assert!(env.fill_block(hash, &mut block, -1.0));
        assert!((block[0] - 1000.0).abs() < 1e-3);
    }

    #[test]
    fn test_missing_param_uses_fallback() {
        let env = EnvMap::new(48000.0);
        let mut block = [0.0f32; BLOCK_SIZE];
        assert!(!env.fill_block(fnv1a_hash("nope"), &mut block, 0.25));
        assert!(block.iter().all(|s| *s == 0.25));
    }

    #[test]
    fn test_first_activation_snaps_to_target() {
        let env = EnvMap::new(48000.0);
        env.set_param_slewed("gain", 0.8, 100.0);
        // Even with a long slew, the first set initializes current
        assert!((env.get(fnv1a_hash("gain")) - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_slew_approaches_target() {
        let env = EnvMap::new(48000.0);
        env.set_param_slewed("x", 0.0, 0.0);
        env.set_param_slewed("x", 1.0, 10.0);

        let hash = fnv1a_hash("x");
        let mut block = [0.0f32; BLOCK_SIZE];
        env.fill_block(hash, &mut block, 0.0);
        // Ramping upward, monotonically, without reaching the target yet
        assert!(block[0] > 0.0);
        assert!(block[BLOCK_SIZE - 1] > block[0]);
        assert!(block[BLOCK_SIZE - 1] < 1.0);
    }
}
