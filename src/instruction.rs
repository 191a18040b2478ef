//! Cedar instruction format
//!
//! 160-bit (20 byte) fixed-width instructions for fast decoding.
//! Layout: [opcode:8][rate:8][out:16][in0:16][in1:16][in2:16][in3:16][in4:16][state_id:32]
//! The rate field doubles as a packed parameter (LFO shape, ADSR release
//! tenths). The state_id field is the full 32-bit FNV-1a semantic hash;
//! for PUSH_CONST and DC it instead holds a packed IEEE-754 float.

/// Special buffer index meaning "unused input" / "no buffer"
pub const BUFFER_UNUSED: u16 = 0xFFFF;

/// Opcode numbering is part of the wire format; categories leave room
/// for extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // Stack/constants (0-9)
    Nop = 0,
    PushConst = 1,
    Copy = 2,

    // Arithmetic (10-19)
    Add = 10,
    Sub = 11,
    Mul = 12,
    Div = 13,
    Pow = 14,
    Neg = 15,

    // Oscillators (20-29)
    OscSin = 20,
    OscTri = 21,
    OscSaw = 22,
    OscSqr = 23,
    OscRamp = 24,
    OscPhasor = 25,
    OscSqrPwm = 27,
    OscSawPwm = 28,

    // Filters (30-39)
    FilterSvfLp = 33,
    FilterSvfHp = 34,
    FilterSvfBp = 35,

    // Math (40-49)
    Abs = 40,
    Sqrt = 41,
    Log = 42,
    Exp = 43,
    Min = 44,
    Max = 45,
    Clamp = 46,
    Wrap = 47,
    Floor = 48,
    Ceil = 49,

    // Utility (50-59)
    Output = 50,
    Noise = 51,
    Mtof = 52,
    Dc = 53,
    Slew = 54,
    Sah = 55,
    EnvGet = 56,

    // Envelopes (60-62)
    EnvAdsr = 60,

    // Samplers (63-69)
    SamplePlay = 63,

    // Delays (70-79)
    Delay = 70,

    // Sequencers & timing (90-95)
    Clock = 90,
    Lfo = 91,
    SeqStep = 92,
    Euclid = 93,
    Trigger = 94,
    Timeline = 95,

    // Oversampled oscillators (110-119), targets of the FM rewrite
    OscSin2x = 110,
    OscSin4x = 111,
    OscSaw2x = 112,
    OscSaw4x = 113,
    OscSqr2x = 114,
    OscSqr4x = 115,
    OscTri2x = 116,
    OscTri4x = 117,
    OscSqrPwm4x = 118,
    OscSawPwm4x = 119,

    Invalid = 255,
}

impl Opcode {
    /// Decode a wire byte; unknown values map to Invalid
    pub fn from_u8(byte: u8) -> Opcode {
        match byte {
            0 => Opcode::Nop,
            1 => Opcode::PushConst,
            2 => Opcode::Copy,
            10 => Opcode::Add,
            11 => Opcode::Sub,
            12 => Opcode::Mul,
            13 => Opcode::Div,
            14 => Opcode::Pow,
            15 => Opcode::Neg,
            20 => Opcode::OscSin,
            21 => Opcode::OscTri,
            22 => Opcode::OscSaw,
            23 => Opcode::OscSqr,
            24 => Opcode::OscRamp,
            25 => Opcode::OscPhasor,
            27 => Opcode::OscSqrPwm,
            28 => Opcode::OscSawPwm,
            33 => Opcode::FilterSvfLp,
            34 => Opcode::FilterSvfHp,
            35 => Opcode::FilterSvfBp,
            40 => Opcode::Abs,
            41 => Opcode::Sqrt,
            42 => Opcode::Log,
            43 => Opcode::Exp,
            44 => Opcode::Min,
            45 => Opcode::Max,
            46 => Opcode::Clamp,
            47 => Opcode::Wrap,
            48 => Opcode::Floor,
            49 => Opcode::Ceil,
            50 => Opcode::Output,
            51 => Opcode::Noise,
            52 => Opcode::Mtof,
            53 => Opcode::Dc,
            54 => Opcode::Slew,
            55 => Opcode::Sah,
            56 => Opcode::EnvGet,
            60 => Opcode::EnvAdsr,
            63 => Opcode::SamplePlay,
            70 => Opcode::Delay,
            90 => Opcode::Clock,
            91 => Opcode::Lfo,
            92 => Opcode::SeqStep,
            93 => Opcode::Euclid,
            94 => Opcode::Trigger,
            95 => Opcode::Timeline,
            110 => Opcode::OscSin2x,
            111 => Opcode::OscSin4x,
            112 => Opcode::OscSaw2x,
            113 => Opcode::OscSaw4x,
            114 => Opcode::OscSqr2x,
            115 => Opcode::OscSqr4x,
            116 => Opcode::OscTri2x,
            117 => Opcode::OscTri4x,
            118 => Opcode::OscSqrPwm4x,
            119 => Opcode::OscSawPwm4x,
            _ => Opcode::Invalid,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Opcode::Nop => "NOP",
            Opcode::PushConst => "PUSH_CONST",
            Opcode::Copy => "COPY",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Pow => "POW",
            Opcode::Neg => "NEG",
            Opcode::OscSin => "OSC_SIN",
            Opcode::OscTri => "OSC_TRI",
            Opcode::OscSaw => "OSC_SAW",
            Opcode::OscSqr => "OSC_SQR",
            Opcode::OscRamp => "OSC_RAMP",
            Opcode::OscPhasor => "OSC_PHASOR",
            Opcode::OscSqrPwm => "OSC_SQR_PWM",
            Opcode::OscSawPwm => "OSC_SAW_PWM",
            Opcode::FilterSvfLp => "FILTER_SVF_LP",
            Opcode::FilterSvfHp => "FILTER_SVF_HP",
            Opcode::FilterSvfBp => "FILTER_SVF_BP",
            Opcode::Abs => "ABS",
            Opcode::Sqrt => "SQRT",
            Opcode::Log => "LOG",
            Opcode::Exp => "EXP",
            Opcode::Min => "MIN",
            Opcode::Max => "MAX",
            Opcode::Clamp => "CLAMP",
            Opcode::Wrap => "WRAP",
            Opcode::Floor => "FLOOR",
            Opcode::Ceil => "CEIL",
            Opcode::Output => "OUTPUT",
            Opcode::Noise => "NOISE",
            Opcode::Mtof => "MTOF",
            Opcode::Dc => "DC",
            Opcode::Slew => "SLEW",
            Opcode::Sah => "SAH",
            Opcode::EnvGet => "ENV_GET",
            Opcode::EnvAdsr => "ENV_ADSR",
            Opcode::SamplePlay => "SAMPLE_PLAY",
            Opcode::Delay => "DELAY",
            Opcode::Clock => "CLOCK",
            Opcode::Lfo => "LFO",
            Opcode::SeqStep => "SEQ_STEP",
            Opcode::Euclid => "EUCLID",
            Opcode::Trigger => "TRIGGER",
            Opcode::Timeline => "TIMELINE",
            Opcode::OscSin2x => "OSC_SIN_2X",
            Opcode::OscSin4x => "OSC_SIN_4X",
            Opcode::OscSaw2x => "OSC_SAW_2X",
            Opcode::OscSaw4x => "OSC_SAW_4X",
            Opcode::OscSqr2x => "OSC_SQR_2X",
            Opcode::OscSqr4x => "OSC_SQR_4X",
            Opcode::OscTri2x => "OSC_TRI_2X",
            Opcode::OscTri4x => "OSC_TRI_4X",
            Opcode::OscSqrPwm4x => "OSC_SQR_PWM_4X",
            Opcode::OscSawPwm4x => "OSC_SAW_PWM_4X",
            Opcode::Invalid => "INVALID",
        }
    }
}

/// One VM instruction. 20 bytes, host-endian on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Instruction {
    pub opcode: Opcode,
    /// 0 = audio rate; also used for packed params (LFO shape, ADSR release)
    pub rate: u8,
    pub out_buffer: u16,
    pub inputs: [u16; 5],
    /// Semantic state hash, or a packed f32 for PUSH_CONST / DC
    pub state_id: u32,
}

const _: () = assert!(std::mem::size_of::<Instruction>() == 20);

impl Instruction {
    pub fn new(opcode: Opcode, out_buffer: u16) -> Self {
        Self {
            opcode,
            rate: 0,
            out_buffer,
            inputs: [BUFFER_UNUSED; 5],
            state_id: 0,
        }
    }

    pub fn unary(opcode: Opcode, out: u16, in0: u16) -> Self {
        let mut inst = Self::new(opcode, out);
        inst.inputs[0] = in0;
        inst
    }

    pub fn binary(opcode: Opcode, out: u16, in0: u16, in1: u16) -> Self {
        let mut inst = Self::new(opcode, out);
        inst.inputs[0] = in0;
        inst.inputs[1] = in1;
        inst
    }

    pub fn ternary(opcode: Opcode, out: u16, in0: u16, in1: u16, in2: u16) -> Self {
        let mut inst = Self::new(opcode, out);
        inst.inputs[0] = in0;
        inst.inputs[1] = in1;
        inst.inputs[2] = in2;
        inst
    }

    /// PUSH_CONST with the value packed into the state_id field
    pub fn push_const(out: u16, value: f32) -> Self {
        let mut inst = Self::new(Opcode::PushConst, out);
        inst.set_const_value(value);
        inst
    }

    pub fn set_const_value(&mut self, value: f32) {
        self.state_id = value.to_bits();
    }

    pub fn const_value(&self) -> f32 {
        f32::from_bits(self.state_id)
    }

    /// Serialize into the 20-byte wire layout (little-endian fields)
    pub fn to_bytes(&self) -> [u8; 20] {
        let mut bytes = [0u8; 20];
        bytes[0] = self.opcode as u8;
        bytes[1] = self.rate;
        bytes[2..4].copy_from_slice(&self.out_buffer.to_le_bytes());
        for (i, input) in self.inputs.iter().enumerate() {
            bytes[4 + i * 2..6 + i * 2].copy_from_slice(&input.to_le_bytes());
        }
        bytes[14..18].copy_from_slice(&self.state_id.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; 20]) -> Self {
        let mut inputs = [BUFFER_UNUSED; 5];
        for (i, input) in inputs.iter_mut().enumerate() {
            *input = u16::from_le_bytes([bytes[4 + i * 2], bytes[5 + i * 2]]);
        }
        Self {
            opcode: Opcode::from_u8(bytes[0]),
            rate: bytes[1],
            out_buffer: u16::from_le_bytes([bytes[2], bytes[3]]),
            inputs,
            state_id: u32::from_le_bytes([bytes[14], bytes[15], bytes[16], bytes[17]]),
        }
    }
}

/// FNV-1a 32-bit hash; the basis for semantic state IDs and parameter keys.
/// Part of the stable ABI: changing it invalidates state preservation.
pub fn fnv1a_hash(data: &str) -> u32 {
    let mut hash: u32 = 2166136261;
    for byte in data.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_is_20_bytes() {
        assert_eq!(std::mem::size_of::<Instruction>(), 20);
    }

    #[test]
    fn test_const_value_roundtrip() {
        let inst = Instruction::push_const(3, 440.0);
        assert_eq!(inst.const_value(), 440.0);
    }

    #[test]
    fn test_byte_roundtrip() {
        let mut inst = Instruction::binary(Opcode::FilterSvfLp, 7, 1, 2);
        inst.rate = 5;
        inst.state_id = fnv1a_hash("main/lp#0");
        let decoded = Instruction::from_bytes(&inst.to_bytes());
        assert_eq!(decoded, inst);
    }

    #[test]
    fn test_fnv1a_known_values() {
        // FNV-1a 32-bit offset basis for the empty string
        assert_eq!(fnv1a_hash(""), 2166136261);
        // Hashes must differ for path-sibling strings
        assert_ne!(fnv1a_hash("main/saw#0"), fnv1a_hash("main/saw#1"));
    }
}
