//! Flat, timed pattern events
//!
//! The pattern evaluator expands a mini-notation subtree into one cycle of
//! these events; the code generator then bakes them into sequencer state.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternEventType {
    Pitch,
    Sample,
    Rest,
}

/// A single event positioned within one cycle (time in [0, 1))
#[derive(Debug, Clone)]
pub struct PatternEvent {
    pub event_type: PatternEventType,
    pub time: f32,
    pub duration: f32,
    pub velocity: f32,
    pub chance: f32,
    pub midi_note: u8,
    pub sample_name: String,
    pub sample_variant: u8,
}

impl Default for PatternEvent {
    fn default() -> Self {
        Self {
            event_type: PatternEventType::Rest,
            time: 0.0,
            duration: 1.0,
            velocity: 1.0,
            chance: 1.0,
            midi_note: 60,
            sample_name: String::new(),
            sample_variant: 0,
        }
    }
}

impl PatternEvent {
    pub fn is_rest(&self) -> bool {
        self.event_type == PatternEventType::Rest
    }

    pub fn is_sample(&self) -> bool {
        self.event_type == PatternEventType::Sample
    }
}

/// One cycle of a pattern with all constructs resolved into events
#[derive(Debug, Clone, Default)]
pub struct PatternEventStream {
    pub events: Vec<PatternEvent>,
}

impl PatternEventStream {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn add(&mut self, event: PatternEvent) {
        self.events.push(event);
    }

    /// Stable ascending sort by start time
    pub fn sort_by_time(&mut self) {
        self.events
            .sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap_or(std::cmp::Ordering::Equal));
    }

    pub fn has_sample_events(&self) -> bool {
        self.events.iter().any(|e| e.is_sample())
    }
}

/// Time span and accumulated modifiers carried through traversal
#[derive(Debug, Clone, Copy)]
pub struct PatternEvalContext {
    pub start_time: f32,
    pub duration: f32,
    pub velocity: f32,
    pub chance: f32,
}

impl Default for PatternEvalContext {
    fn default() -> Self {
        Self {
            start_time: 0.0,
            duration: 1.0,
            velocity: 1.0,
            chance: 1.0,
        }
    }
}

impl PatternEvalContext {
    /// Child context for slot `child_index` of an even `child_count`-way
    /// subdivision of this span.
    pub fn subdivide(&self, child_index: usize, child_count: usize) -> Self {
        let child_duration = self.duration / child_count as f32;
        Self {
            start_time: self.start_time + child_duration * child_index as f32,
            duration: child_duration,
            ..*self
        }
    }

    /// Same span (polyrhythm children all fire in parallel)
    pub fn inherit(&self) -> Self {
        *self
    }

    pub fn with_speed(&self, factor: f32) -> Self {
        Self {
            duration: self.duration / factor,
            ..*self
        }
    }

    pub fn with_velocity(&self, velocity: f32) -> Self {
        Self {
            velocity: self.velocity * velocity,
            ..*self
        }
    }

    pub fn with_chance(&self, chance: f32) -> Self {
        Self {
            chance: self.chance * chance,
            ..*self
        }
    }
}
