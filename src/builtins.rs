//! Builtin registry: the canonical table of primitive operations
//!
//! Each entry maps an Akkado function name to a VM opcode plus arity
//! metadata (required inputs, optional inputs, default values for optional
//! slots) and whether the opcode needs persistent state. Special forms
//! (array combinators, `chord`, the UI parameter builtins) are registered
//! here too so the analyzer can arity-check them; code generation
//! dispatches them structurally instead of emitting their (placeholder)
//! opcode.

use crate::instruction::Opcode;
use lazy_static::lazy_static;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub struct BuiltinInfo {
    pub opcode: Opcode,
    pub input_count: u8,
    pub optional_count: u8,
    /// Default values for optional slots, in order. Shorter than
    /// `optional_count` means the remaining slots stay unwired.
    pub defaults: &'static [f32],
    pub requires_state: bool,
    /// Handled by a dedicated code generation path, not plain emission
    pub special: bool,
}

impl BuiltinInfo {
    const fn op(opcode: Opcode, input_count: u8, optional_count: u8, requires_state: bool) -> Self {
        Self {
            opcode,
            input_count,
            optional_count,
            defaults: &[],
            requires_state,
            special: false,
        }
    }

    const fn with_defaults(
        opcode: Opcode,
        input_count: u8,
        optional_count: u8,
        defaults: &'static [f32],
        requires_state: bool,
    ) -> Self {
        Self {
            opcode,
            input_count,
            optional_count,
            defaults,
            requires_state,
            special: false,
        }
    }

    const fn special_form(input_count: u8, optional_count: u8) -> Self {
        Self {
            opcode: Opcode::Nop,
            input_count,
            optional_count,
            defaults: &[],
            requires_state: false,
            special: true,
        }
    }

    pub fn total_params(&self) -> usize {
        (self.input_count + self.optional_count) as usize
    }

    /// Does parameter slot `index` (absolute, counting required slots)
    /// have a default value?
    pub fn has_default(&self, index: usize) -> bool {
        index >= self.input_count as usize
            && (index - self.input_count as usize) < self.defaults.len()
    }

    pub fn default_at(&self, index: usize) -> f32 {
        self.defaults[index - self.input_count as usize]
    }
}

lazy_static! {
    pub static ref BUILTIN_FUNCTIONS: HashMap<&'static str, BuiltinInfo> = {
        use Opcode::*;
        let mut m = HashMap::new();

        // Oscillators (frequency input, stateful for phase)
        m.insert("sin", BuiltinInfo::op(OscSin, 1, 0, true));
        m.insert("tri", BuiltinInfo::op(OscTri, 1, 0, true));
        m.insert("saw", BuiltinInfo::op(OscSaw, 1, 0, true));
        m.insert("sqr", BuiltinInfo::op(OscSqr, 1, 0, true));
        m.insert("ramp", BuiltinInfo::op(OscRamp, 1, 0, true));
        m.insert("phasor", BuiltinInfo::op(OscPhasor, 1, 0, true));
        m.insert(
            "pulse",
            BuiltinInfo::with_defaults(OscSqrPwm, 1, 1, &[0.5], true),
        );
        m.insert(
            "vsaw",
            BuiltinInfo::with_defaults(OscSawPwm, 1, 1, &[0.5], true),
        );

        // Filters (signal, cutoff, q; stateful for filter memory)
        m.insert("lp", BuiltinInfo::op(FilterSvfLp, 3, 0, true));
        m.insert("hp", BuiltinInfo::op(FilterSvfHp, 3, 0, true));
        m.insert("bp", BuiltinInfo::op(FilterSvfBp, 3, 0, true));

        // Arithmetic (binary operator desugaring lands here)
        m.insert("add", BuiltinInfo::op(Add, 2, 0, false));
        m.insert("sub", BuiltinInfo::op(Sub, 2, 0, false));
        m.insert("mul", BuiltinInfo::op(Mul, 2, 0, false));
        m.insert("div", BuiltinInfo::op(Div, 2, 0, false));
        m.insert("pow", BuiltinInfo::op(Pow, 2, 0, false));

        // Math unary
        m.insert("neg", BuiltinInfo::op(Neg, 1, 0, false));
        m.insert("abs", BuiltinInfo::op(Abs, 1, 0, false));
        m.insert("sqrt", BuiltinInfo::op(Sqrt, 1, 0, false));
        m.insert("log", BuiltinInfo::op(Log, 1, 0, false));
        m.insert("exp", BuiltinInfo::op(Exp, 1, 0, false));
        m.insert("floor", BuiltinInfo::op(Floor, 1, 0, false));
        m.insert("ceil", BuiltinInfo::op(Ceil, 1, 0, false));

        // Math binary / ternary
        m.insert("min", BuiltinInfo::op(Min, 2, 0, false));
        m.insert("max", BuiltinInfo::op(Max, 2, 0, false));
        m.insert("clamp", BuiltinInfo::op(Clamp, 3, 0, false));
        m.insert("wrap", BuiltinInfo::op(Wrap, 3, 0, false));

        // Utility
        m.insert("noise", BuiltinInfo::op(Noise, 0, 3, true));
        m.insert("mtof", BuiltinInfo::op(Mtof, 1, 0, false));
        m.insert("dc", BuiltinInfo::op(Dc, 1, 1, false));
        m.insert("slew", BuiltinInfo::op(Slew, 2, 0, true));
        m.insert("sah", BuiltinInfo::op(Sah, 2, 0, true));

        // Output: out(x) duplicates mono to stereo
        m.insert("out", BuiltinInfo::op(Output, 1, 1, false));

        // Envelopes: adsr(gate, a, d, s, r); release packed into rate
        m.insert(
            "adsr",
            BuiltinInfo::with_defaults(EnvAdsr, 1, 4, &[0.01, 0.1, 0.7, 0.2], true),
        );

        // Delay: delay(signal, time, feedback)
        m.insert(
            "delay",
            BuiltinInfo::with_defaults(Delay, 1, 2, &[0.25, 0.3], true),
        );

        // Timing / sequencing
        m.insert("clock", BuiltinInfo::op(Clock, 0, 1, false));
        m.insert("lfo", BuiltinInfo::op(Lfo, 1, 1, true));
        m.insert("trigger", BuiltinInfo::op(Trigger, 1, 0, true));
        m.insert("euclid", BuiltinInfo::op(Euclid, 2, 1, true));

        // Array / chord special forms (compile-time lowering)
        m.insert("map", BuiltinInfo::special_form(2, 0));
        m.insert("sum", BuiltinInfo::special_form(1, 0));
        m.insert("fold", BuiltinInfo::special_form(3, 0));
        m.insert("zipWith", BuiltinInfo::special_form(3, 0));
        m.insert("zip", BuiltinInfo::special_form(2, 0));
        m.insert("take", BuiltinInfo::special_form(2, 0));
        m.insert("drop", BuiltinInfo::special_form(2, 0));
        m.insert("reverse", BuiltinInfo::special_form(1, 0));
        m.insert("range", BuiltinInfo::special_form(2, 0));
        m.insert("repeat", BuiltinInfo::special_form(2, 0));
        m.insert("len", BuiltinInfo::special_form(1, 0));
        m.insert("chord", BuiltinInfo::special_form(1, 0));

        // UI parameter exposure
        m.insert("param", BuiltinInfo::special_form(1, 3));
        m.insert("button", BuiltinInfo::special_form(1, 1));
        m.insert("toggle", BuiltinInfo::special_form(1, 1));
        m.insert("dropdown", BuiltinInfo::special_form(1, 3));

        m
    };

    /// Alias -> canonical name mappings for convenience syntax
    pub static ref BUILTIN_ALIASES: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("sine", "sin");
        m.insert("triangle", "tri");
        m.insert("sawtooth", "saw");
        m.insert("square", "sqr");
        m.insert("lowpass", "lp");
        m.insert("highpass", "hp");
        m.insert("bandpass", "bp");
        m.insert("svflp", "lp");
        m.insert("svfhp", "hp");
        m.insert("svfbp", "bp");
        m.insert("output", "out");
        m
    };
}

/// Resolve aliases to the canonical builtin name
pub fn canonical_name(name: &str) -> &str {
    BUILTIN_ALIASES.get(name).copied().unwrap_or(name)
}

/// Look up a builtin by name, resolving aliases
pub fn lookup_builtin(name: &str) -> Option<&'static BuiltinInfo> {
    BUILTIN_FUNCTIONS.get(canonical_name(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_resolution() {
        let sine = lookup_builtin("sine").unwrap();
        assert_eq!(sine.opcode, Opcode::OscSin);
        assert!(sine.requires_state);
    }

    #[test]
    fn test_defaults() {
        let adsr = lookup_builtin("adsr").unwrap();
        assert_eq!(adsr.total_params(), 5);
        assert!(!adsr.has_default(0));
        assert!(adsr.has_default(4));
        assert_eq!(adsr.default_at(2), 0.1);
    }

    #[test]
    fn test_special_forms_have_arity() {
        let map = lookup_builtin("map").unwrap();
        assert!(map.special);
        assert_eq!(map.input_count, 2);
    }
}
