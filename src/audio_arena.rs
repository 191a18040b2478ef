//! Bump allocator backing delay lines and other long buffers
//!
//! One contiguous float slab, carved out in 32-byte-aligned spans. The
//! slab itself is allocated once at engine startup; handing out spans on
//! the audio thread is a pointer bump.

const FLOATS_PER_ALIGN: usize = 8; // 32 bytes of f32

pub struct AudioArena {
    storage: Vec<f32>,
    used: usize,
}

impl AudioArena {
    /// Capacity in floats, rounded up to the alignment quantum
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.div_ceil(FLOATS_PER_ALIGN) * FLOATS_PER_ALIGN;
        Self {
            storage: vec![0.0; capacity],
            used: 0,
        }
    }

    /// Reserve a zeroed span; returns its offset, or None when exhausted
    pub fn alloc(&mut self, length: usize) -> Option<usize> {
        let length = length.div_ceil(FLOATS_PER_ALIGN) * FLOATS_PER_ALIGN;
        if self.used + length > self.storage.len() {
            return None;
        }
        let offset = self.used;
        self.used += length;
        self.storage[offset..offset + length].fill(0.0);
        Some(offset)
    }

    pub fn span_mut(&mut self, offset: usize, length: usize) -> &mut [f32] {
        &mut self.storage[offset..offset + length]
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Drop all spans (full reset only; states holding offsets must go too)
    pub fn reset(&mut self) {
        self.used = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_exhaustion() {
        let mut arena = AudioArena::new(64);
        let a = arena.alloc(10).unwrap();
        let b = arena.alloc(10).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 16); // rounded to the 8-float quantum
        assert!(arena.alloc(64).is_none());
    }

    #[test]
    fn test_spans_are_zeroed() {
        let mut arena = AudioArena::new(32);
        let offset = arena.alloc(8).unwrap();
        arena.span_mut(offset, 8).fill(1.0);
        arena.reset();
        let offset = arena.alloc(8).unwrap();
        assert!(arena.span_mut(offset, 8).iter().all(|s| *s == 0.0));
    }
}
