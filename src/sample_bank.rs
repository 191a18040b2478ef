//! Sample name registry and playback bank
//!
//! The compiler maps sample names to dense 32-bit IDs; the host loads PCM
//! data for those IDs into the bank before publishing a program (WAV
//! decoding itself happens outside this crate). The audio thread only
//! reads the bank.

use std::collections::HashMap;

/// Compiler-side mapping from sample name to ID
#[derive(Debug, Default)]
pub struct SampleRegistry {
    ids: std::cell::RefCell<HashMap<String, u32>>,
}

impl SampleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// ID for a sample name, assigning the next free ID on first sight
    pub fn get_id(&self, name: &str) -> u32 {
        let mut ids = self.ids.borrow_mut();
        let next = ids.len() as u32 + 1; // 0 is reserved for "no sample"
        *ids.entry(name.to_string()).or_insert(next)
    }

    pub fn lookup(&self, name: &str) -> Option<u32> {
        self.ids.borrow().get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.borrow().is_empty()
    }
}

/// One loaded sample: mono PCM at the engine rate
#[derive(Debug, Clone, Default)]
pub struct SampleData {
    pub frames: Vec<f32>,
}

/// Preloaded sample storage read by SAMPLE_PLAY
#[derive(Debug, Default)]
pub struct SampleBank {
    samples: HashMap<u32, SampleData>,
}

impl SampleBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register PCM frames under a sample ID (host side, before publish)
    pub fn insert(&mut self, sample_id: u32, frames: Vec<f32>) {
        self.samples.insert(sample_id, SampleData { frames });
    }

    pub fn get(&self, sample_id: u32) -> Option<&SampleData> {
        self.samples.get(&sample_id)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_assigns_stable_ids() {
        let registry = SampleRegistry::new();
        let bd = registry.get_id("bd");
        let sn = registry.get_id("sn");
        assert_ne!(bd, sn);
        assert_eq!(registry.get_id("bd"), bd);
        assert!(bd > 0);
    }
}
