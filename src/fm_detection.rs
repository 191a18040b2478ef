//! FM detection rewrite
//!
//! A post-pass over the emitted instruction stream. Any upgradeable
//! oscillator whose frequency input traces back (through arithmetic) to an
//! audio-rate producer is rewritten to its 4x oversampled variant, and the
//! upgradeable oscillators inside the traced modulation chain are upgraded
//! with it, so an FM pair never mixes oversampled and basic phase
//! stepping. Upgrades are monotonic: the 4x variants are not themselves
//! upgrade candidates, so each oscillator is rewritten at most once.

use crate::instruction::{Instruction, Opcode, BUFFER_UNUSED};

/// Does this opcode produce an audio-rate signal (oscillators, noise)?
pub fn is_audio_rate_producer(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::OscSin
            | Opcode::OscSin2x
            | Opcode::OscSin4x
            | Opcode::OscTri
            | Opcode::OscTri2x
            | Opcode::OscTri4x
            | Opcode::OscSaw
            | Opcode::OscSaw2x
            | Opcode::OscSaw4x
            | Opcode::OscSqr
            | Opcode::OscSqr2x
            | Opcode::OscSqr4x
            | Opcode::OscRamp
            | Opcode::OscPhasor
            | Opcode::OscSqrPwm
            | Opcode::OscSawPwm
            | Opcode::OscSqrPwm4x
            | Opcode::OscSawPwm4x
            | Opcode::Noise
    )
}

/// Basic oscillators with a 4x oversampled variant
pub fn is_upgradeable_oscillator(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::OscSin
            | Opcode::OscTri
            | Opcode::OscSaw
            | Opcode::OscSqr
            | Opcode::OscSqrPwm
            | Opcode::OscSawPwm
    )
}

pub fn upgrade_for_fm(op: Opcode) -> Opcode {
    match op {
        Opcode::OscSin => Opcode::OscSin4x,
        Opcode::OscTri => Opcode::OscTri4x,
        Opcode::OscSaw => Opcode::OscSaw4x,
        Opcode::OscSqr => Opcode::OscSqr4x,
        Opcode::OscSqrPwm => Opcode::OscSqrPwm4x,
        Opcode::OscSawPwm => Opcode::OscSawPwm4x,
        _ => op,
    }
}

fn is_arithmetic(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Pow
    )
}

/// Find the instruction producing `buffer` (buffers are written once)
fn producer(instructions: &[Instruction], buffer: u16) -> Option<usize> {
    instructions.iter().position(|inst| inst.out_buffer == buffer)
}

/// Trace a frequency input back through arithmetic. Returns true when an
/// audio-rate producer is reachable; `chain` collects the indices of the
/// producers encountered on the audio-rate paths.
fn trace_modulators(
    instructions: &[Instruction],
    buffer: u16,
    chain: &mut Vec<usize>,
) -> bool {
    let Some(idx) = producer(instructions, buffer) else {
        return false;
    };

    let inst = &instructions[idx];

    if is_audio_rate_producer(inst.opcode) {
        chain.push(idx);
        return true;
    }

    if is_arithmetic(inst.opcode) {
        let mut found = false;
        for input in &inst.inputs[..2] {
            if *input != BUFFER_UNUSED && trace_modulators(instructions, *input, chain) {
                found = true;
            }
        }
        return found;
    }

    false
}

/// Rewrite FM-modulated oscillators (and their modulation chains) to the
/// oversampled variants.
pub fn apply_fm_rewrite(instructions: &mut [Instruction]) {
    for i in 0..instructions.len() {
        if !is_upgradeable_oscillator(instructions[i].opcode) {
            continue;
        }

        let freq_input = instructions[i].inputs[0];
        if freq_input == BUFFER_UNUSED {
            continue;
        }

        let mut chain = Vec::new();
        if trace_modulators(instructions, freq_input, &mut chain) {
            for idx in chain {
                let op = instructions[idx].opcode;
                if is_upgradeable_oscillator(op) {
                    instructions[idx].opcode = upgrade_for_fm(op);
                }
            }
            let op = instructions[i].opcode;
            instructions[i].opcode = upgrade_for_fm(op);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_carrier_and_modulator_upgrade() {
        // sin(100) * 1000 + 440 -> saw(...)
        let mut program = vec![
            Instruction::push_const(0, 100.0),
            Instruction::unary(Opcode::OscSin, 1, 0),
            Instruction::push_const(2, 1000.0),
            Instruction::binary(Opcode::Mul, 3, 1, 2),
            Instruction::push_const(4, 440.0),
            Instruction::binary(Opcode::Add, 5, 3, 4),
            Instruction::unary(Opcode::OscSaw, 6, 5),
        ];
        apply_fm_rewrite(&mut program);

        assert_eq!(program[1].opcode, Opcode::OscSin4x);
        assert_eq!(program[6].opcode, Opcode::OscSaw4x);
        assert!(!program.iter().any(|i| i.opcode == Opcode::OscSin));
        assert!(!program.iter().any(|i| i.opcode == Opcode::OscSaw));
    }

    #[test]
    fn test_constant_frequency_stays_basic() {
        let mut program = vec![
            Instruction::push_const(0, 440.0),
            Instruction::unary(Opcode::OscSaw, 1, 0),
        ];
        apply_fm_rewrite(&mut program);
        assert_eq!(program[1].opcode, Opcode::OscSaw);
    }

    #[test]
    fn test_upgrade_is_idempotent() {
        let mut program = vec![
            Instruction::push_const(0, 5.0),
            Instruction::unary(Opcode::OscSin, 1, 0),
            Instruction::unary(Opcode::OscSaw, 2, 1),
        ];
        apply_fm_rewrite(&mut program);
        let first = program.clone();
        apply_fm_rewrite(&mut program);
        assert_eq!(program, first);
    }
}
