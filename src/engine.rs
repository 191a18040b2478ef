//! Audio engine: block loop, hot-swap and crossfade orchestration
//!
//! Owns the VM on the audio thread and consumes programs from the shared
//! swap controller. At each block boundary a pending program is promoted;
//! while a crossfade runs, the outgoing and incoming programs both render
//! into scratch buffers and mix with equal-power gains. Orphaned DSP
//! states sweep into the fading pool once the crossfade has fully handed
//! over. A raised shutdown flag zero-fills and returns immediately.

use crate::buffer_pool::Block;
use crate::crossfade::{CrossfadeBuffers, CrossfadeConfig, CrossfadeState};
use crate::env_map::EnvMap;
use crate::sample_bank::SampleBank;
use crate::swap_controller::SwapController;
use crate::vm::Vm;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

pub struct AudioEngine {
    vm: Vm,
    swap: Arc<SwapController>,
    crossfade: CrossfadeState,
    crossfade_config: CrossfadeConfig,
    crossfade_buffers: CrossfadeBuffers,
    shutdown: Arc<AtomicBool>,
    /// A sweep is owed after the last swap's crossfade fully settles
    gc_pending: bool,
}

impl AudioEngine {
    pub fn new(
        sample_rate: f32,
        swap: Arc<SwapController>,
        env: Arc<EnvMap>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            vm: Vm::new(sample_rate, env),
            swap,
            crossfade: CrossfadeState::default(),
            crossfade_config: CrossfadeConfig::default(),
            crossfade_buffers: CrossfadeBuffers::default(),
            shutdown,
            gc_pending: false,
        }
    }

    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    pub fn vm_mut(&mut self) -> &mut Vm {
        &mut self.vm
    }

    pub fn set_bpm(&mut self, bpm: f32) {
        self.vm.set_bpm(bpm);
    }

    pub fn set_crossfade_blocks(&mut self, blocks: u32) {
        self.crossfade_config = CrossfadeConfig::new(blocks);
        self.vm
            .states
            .set_fade_blocks(self.crossfade_config.duration_blocks);
    }

    pub fn install_sample_bank(&mut self, bank: SampleBank) {
        self.vm.sample_bank = Some(bank);
    }

    pub fn is_crossfading(&self) -> bool {
        self.crossfade.is_active()
    }

    /// Render exactly one block into the stereo outputs
    pub fn process_block(&mut self, out_l: &mut Block, out_r: &mut Block) {
        if self.shutdown.load(Ordering::Acquire) {
            out_l.fill(0.0);
            out_r.fill(0.0);
            return;
        }

        out_l.fill(0.0);
        out_r.fill(0.0);
        self.vm.states.begin_frame();

        // Swaps happen only at block boundaries
        if self.swap.execute_swap() {
            debug!(swap = self.swap.swap_count(), "program swap at block boundary");
            let inits = self.swap.current_program().seq_inits.clone();
            self.vm.apply_state_inits(&inits);

            if self.swap.previous_program().is_some() {
                self.crossfade.begin(self.crossfade_config.duration_blocks);
            }
            self.gc_pending = true;
        }

        let mut ran_previous = false;

        if self.crossfade.is_active() {
            if let Some(previous) = self.swap.previous_program() {
                let instructions: &[_] = &previous.instructions;
                self.crossfade_buffers.clear();

                // Old program into its scratch pair
                let CrossfadeBuffers {
                    old_left,
                    old_right,
                    new_left,
                    new_right,
                } = &mut self.crossfade_buffers;
                self.vm.execute_program(instructions, old_left, old_right);

                // New program into the other pair
                let current = self.swap.current_program();
                self.vm
                    .execute_program(&current.instructions, new_left, new_right);

                self.crossfade_buffers
                    .mix_equal_power(out_l, out_r, self.crossfade.position());
                self.crossfade.advance();
                ran_previous = true;
            } else {
                // Fading slot vanished; fall back to the current program
                self.crossfade.complete();
                let current = self.swap.current_program();
                self.vm.execute_program(&current.instructions, out_l, out_r);
            }
        } else {
            let current = self.swap.current_program();
            self.vm.execute_program(&current.instructions, out_l, out_r);
        }

        if self.crossfade.is_completing() {
            self.swap.release_previous();
            self.crossfade.complete();
        }

        // Sweep orphans only once a block has run without the old program,
        // so its states are genuinely untouched when they move to fading
        if self.gc_pending && self.crossfade.is_idle() && !ran_previous {
            self.vm.states.gc_sweep();
            self.gc_pending = false;
        }

        self.vm.advance_block();
        self.vm.states.advance_fading();
        self.vm.states.gc_fading();
    }
}
