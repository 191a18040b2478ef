//! Pattern evaluator
//!
//! Expands a mini-notation subtree into a flat, time-sorted event stream
//! for one cycle. The traversal context carries the current time span and
//! accumulated velocity/chance; `subdivide` hands children equal shares.
//!
//! `MiniChoice` draws from a PRNG owned by the evaluator: results are
//! deterministic for a fixed evaluator and fixed cycle, not across
//! evaluator instances (seed explicitly in tests).

use crate::ast::{AstArena, MiniAtomKind, MiniModifierKind, NodeData, NodeIndex, NodeKind, NULL_NODE};
use crate::pattern_event::{
    PatternEvalContext, PatternEvent, PatternEventStream, PatternEventType,
};

pub struct PatternEvaluator<'a> {
    arena: &'a AstArena,
    rng: fastrand::Rng,
    current_cycle: u32,
}

impl<'a> PatternEvaluator<'a> {
    pub fn new(arena: &'a AstArena) -> Self {
        Self {
            arena,
            rng: fastrand::Rng::new(),
            current_cycle: 0,
        }
    }

    /// Deterministic evaluator for tests and reproducible renders
    pub fn with_seed(arena: &'a AstArena, seed: u64) -> Self {
        Self {
            arena,
            rng: fastrand::Rng::with_seed(seed),
            current_cycle: 0,
        }
    }

    pub fn evaluate(&mut self, pattern_root: NodeIndex, cycle: u32) -> PatternEventStream {
        let mut stream = PatternEventStream::default();
        self.current_cycle = cycle;

        if pattern_root == NULL_NODE {
            return stream;
        }

        let ctx = PatternEvalContext::default();
        self.eval_node(pattern_root, &ctx, &mut stream);
        stream.sort_by_time();
        stream
    }

    fn eval_node(
        &mut self,
        node: NodeIndex,
        ctx: &PatternEvalContext,
        stream: &mut PatternEventStream,
    ) {
        if node == NULL_NODE {
            return;
        }

        match self.arena[node].kind {
            NodeKind::MiniPattern | NodeKind::MiniGroup => self.eval_subdivision(node, ctx, stream),
            NodeKind::MiniAtom => self.eval_atom(node, ctx, stream),
            NodeKind::MiniSequence => self.eval_sequence(node, ctx, stream),
            NodeKind::MiniPolyrhythm => self.eval_polyrhythm(node, ctx, stream),
            NodeKind::MiniPolymeter => self.eval_polymeter(node, ctx, stream),
            NodeKind::MiniChoice => self.eval_choice(node, ctx, stream),
            NodeKind::MiniEuclidean => self.eval_euclidean(node, ctx, stream),
            NodeKind::MiniModified => self.eval_modified(node, ctx, stream),
            _ => {}
        }
    }

    /// Children share the parent's span, subdivided evenly
    fn eval_subdivision(
        &mut self,
        node: NodeIndex,
        ctx: &PatternEvalContext,
        stream: &mut PatternEventStream,
    ) {
        let child_count = self.arena.child_count(node);
        if child_count == 0 {
            return;
        }

        let children: Vec<_> = self.arena.children(node).collect();
        for (idx, child) in children.into_iter().enumerate() {
            let child_ctx = ctx.subdivide(idx, child_count);
            self.eval_node(child, &child_ctx, stream);
        }
    }

    fn eval_atom(
        &mut self,
        node: NodeIndex,
        ctx: &PatternEvalContext,
        stream: &mut PatternEventStream,
    ) {
        let NodeData::MiniAtom {
            kind,
            midi_note,
            sample_name,
            sample_variant,
        } = &self.arena[node].data
        else {
            return;
        };

        let mut event = PatternEvent {
            time: ctx.start_time,
            duration: ctx.duration,
            velocity: ctx.velocity,
            chance: ctx.chance,
            ..Default::default()
        };

        match kind {
            MiniAtomKind::Pitch => {
                event.event_type = PatternEventType::Pitch;
                event.midi_note = *midi_note;
            }
            MiniAtomKind::Sample => {
                event.event_type = PatternEventType::Sample;
                event.sample_name = sample_name.clone();
                event.sample_variant = *sample_variant;
            }
            MiniAtomKind::Rest => {
                event.event_type = PatternEventType::Rest;
            }
        }

        stream.add(event);
    }

    /// One child per cycle, rotating
    fn eval_sequence(
        &mut self,
        node: NodeIndex,
        ctx: &PatternEvalContext,
        stream: &mut PatternEventStream,
    ) {
        let child_count = self.arena.child_count(node);
        if child_count == 0 {
            return;
        }

        let selected_idx = (self.current_cycle as usize) % child_count;
        let selected = self.arena.child_at(node, selected_idx);
        if selected != NULL_NODE {
            self.eval_node(selected, ctx, stream);
        }
    }

    /// All children fire in parallel over the same span
    fn eval_polyrhythm(
        &mut self,
        node: NodeIndex,
        ctx: &PatternEvalContext,
        stream: &mut PatternEventStream,
    ) {
        let children: Vec<_> = self.arena.children(node).collect();
        for child in children {
            let child_ctx = ctx.inherit();
            self.eval_node(child, &child_ctx, stream);
        }
    }

    /// `{a b c}` or `{a b}%n`: n steps per cycle, children rotating with
    /// the cycle so different-length voices realign at their LCM.
    fn eval_polymeter(
        &mut self,
        node: NodeIndex,
        ctx: &PatternEvalContext,
        stream: &mut PatternEventStream,
    ) {
        let child_count = self.arena.child_count(node);
        if child_count == 0 {
            return;
        }

        let step_count = match self.arena[node].data {
            NodeData::MiniPolymeter { step_count } if step_count > 0 => step_count as usize,
            _ => child_count,
        };

        for step in 0..step_count {
            let child_idx =
                (self.current_cycle as usize * step_count + step) % child_count;
            let child = self.arena.child_at(node, child_idx);
            if child != NULL_NODE {
                let step_ctx = ctx.subdivide(step, step_count);
                self.eval_node(child, &step_ctx, stream);
            }
        }
    }

    /// Uniform random child per evaluation
    fn eval_choice(
        &mut self,
        node: NodeIndex,
        ctx: &PatternEvalContext,
        stream: &mut PatternEventStream,
    ) {
        let child_count = self.arena.child_count(node);
        if child_count == 0 {
            return;
        }

        let selected_idx = self.rng.usize(0..child_count);
        let selected = self.arena.child_at(node, selected_idx);
        if selected != NULL_NODE {
            self.eval_node(selected, ctx, stream);
        }
    }

    fn eval_euclidean(
        &mut self,
        node: NodeIndex,
        ctx: &PatternEvalContext,
        stream: &mut PatternEventStream,
    ) {
        let NodeData::MiniEuclidean {
            hits,
            steps,
            rotation,
        } = self.arena[node].data
        else {
            return;
        };

        let atom = self.arena[node].first_child;
        if atom == NULL_NODE {
            return;
        }

        let pattern = generate_euclidean(hits, steps, rotation);
        let step_duration = ctx.duration / steps.max(1) as f32;

        for (i, on) in pattern.iter().enumerate() {
            if *on {
                let step_ctx = PatternEvalContext {
                    start_time: ctx.start_time + step_duration * i as f32,
                    duration: step_duration,
                    velocity: ctx.velocity,
                    chance: ctx.chance,
                };
                self.eval_node(atom, &step_ctx, stream);
            }
        }
    }

    fn eval_modified(
        &mut self,
        node: NodeIndex,
        ctx: &PatternEvalContext,
        stream: &mut PatternEventStream,
    ) {
        let NodeData::MiniModifier { kind, value } = self.arena[node].data else {
            return;
        };

        let child = self.arena[node].first_child;
        if child == NULL_NODE {
            return;
        }

        let new_ctx = match kind {
            MiniModifierKind::Speed => ctx.with_speed(value),
            MiniModifierKind::Slow => PatternEvalContext {
                duration: ctx.duration * value,
                ..*ctx
            },
            MiniModifierKind::Duration => PatternEvalContext {
                duration: ctx.duration * value,
                ..*ctx
            },
            MiniModifierKind::Weight => ctx.with_velocity(value),
            MiniModifierKind::Chance => ctx.with_chance(value),
            MiniModifierKind::Repeat => {
                let repeats = (value as usize).max(1);
                let repeat_duration = ctx.duration / repeats as f32;
                for i in 0..repeats {
                    let repeat_ctx = PatternEvalContext {
                        start_time: ctx.start_time + repeat_duration * i as f32,
                        duration: repeat_duration,
                        velocity: ctx.velocity,
                        chance: ctx.chance,
                    };
                    self.eval_node(child, &repeat_ctx, stream);
                }
                return;
            }
        };

        self.eval_node(child, &new_ctx, stream);
    }
}

/// Bjorklund distribution: spread `hits` across `steps` as evenly as
/// possible, then rotate left by `rotation`.
pub fn generate_euclidean(hits: u8, steps: u8, rotation: u8) -> Vec<bool> {
    let steps = steps as usize;
    let hits = hits as usize;

    if steps == 0 {
        return Vec::new();
    }
    if hits >= steps {
        return vec![true; steps];
    }
    if hits == 0 {
        return vec![false; steps];
    }

    let mut groups: Vec<Vec<bool>> = (0..steps).map(|i| vec![i < hits]).collect();

    let mut group1_end = hits;
    let mut group2_start = hits;

    while group2_start < groups.len() && groups.len() - group2_start > 1 {
        let num_to_distribute = group1_end.min(groups.len() - group2_start);

        for i in 0..num_to_distribute {
            let tail = groups[group2_start + i].clone();
            groups[i].extend(tail);
        }

        groups.drain(group2_start..group2_start + num_to_distribute);

        group1_end = num_to_distribute;
        group2_start = num_to_distribute;
    }

    let mut pattern: Vec<bool> = groups.into_iter().flatten().collect();

    let rotation = rotation as usize;
    if rotation > 0 && rotation < pattern.len() {
        pattern.rotate_left(rotation);
    }

    pattern
}

/// Evaluate a pattern subtree with a throwaway (entropy-seeded) evaluator
pub fn evaluate_pattern(
    pattern_root: NodeIndex,
    arena: &AstArena,
    cycle: u32,
) -> PatternEventStream {
    PatternEvaluator::new(arena).evaluate(pattern_root, cycle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_tresillo() {
        // E(3,8) is the tresillo: x..x..x.
        let pattern = generate_euclidean(3, 8, 0);
        assert_eq!(
            pattern,
            vec![true, false, false, true, false, false, true, false]
        );
    }

    #[test]
    fn test_euclidean_saturated() {
        assert_eq!(generate_euclidean(8, 8, 0), vec![true; 8]);
        assert_eq!(generate_euclidean(9, 4, 0), vec![true; 4]);
    }

    #[test]
    fn test_euclidean_empty() {
        assert_eq!(generate_euclidean(0, 4, 0), vec![false; 4]);
        assert!(generate_euclidean(3, 0, 0).is_empty());
    }

    #[test]
    fn test_euclidean_rotation() {
        let base = generate_euclidean(3, 8, 0);
        let rotated = generate_euclidean(3, 8, 3);
        let mut expected = base.clone();
        expected.rotate_left(3);
        assert_eq!(rotated, expected);
    }

    #[test]
    fn test_euclidean_five_sixteen() {
        let pattern = generate_euclidean(5, 16, 0);
        assert_eq!(pattern.len(), 16);
        assert_eq!(pattern.iter().filter(|b| **b).count(), 5);
    }
}
