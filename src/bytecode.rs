//! `.cedar` bytecode container
//!
//! Instructions are the raw 20-byte records with no framing; the container
//! supplies the out-of-band lengths plus the state-init descriptors and
//! required-sample list the host needs. Writing then reading a container
//! is byte-exact.
//!
//! Layout (little-endian):
//!   magic "CEDR", version u16, instruction_count u32, state_init_count u32,
//!   required_sample_count u32, instructions (20 bytes each),
//!   state inits, sample names (length-prefixed UTF-8)

use crate::codegen::{StateInitData, StateInitKind};
use crate::instruction::Instruction;
use std::fmt::Write as _;

pub const CEDAR_MAGIC: [u8; 4] = *b"CEDR";
pub const CEDAR_VERSION: u16 = 1;

#[derive(Debug)]
pub enum BytecodeError {
    BadMagic,
    UnsupportedVersion(u16),
    Truncated,
    BadString,
}

impl std::fmt::Display for BytecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BytecodeError::BadMagic => write!(f, "not a cedar bytecode file"),
            BytecodeError::UnsupportedVersion(v) => write!(f, "unsupported bytecode version {}", v),
            BytecodeError::Truncated => write!(f, "bytecode file is truncated"),
            BytecodeError::BadString => write!(f, "bytecode contains an invalid string"),
        }
    }
}

impl std::error::Error for BytecodeError {}

#[derive(Debug, Default)]
pub struct BytecodeFile {
    pub instructions: Vec<Instruction>,
    pub state_inits: Vec<StateInitData>,
    pub required_samples: Vec<String>,
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], BytecodeError> {
        if self.pos + n > self.bytes.len() {
            return Err(BytecodeError::Truncated);
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16, BytecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, BytecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32(&mut self) -> Result<f32, BytecodeError> {
        Ok(f32::from_bits(self.u32()?))
    }

    fn string(&mut self) -> Result<String, BytecodeError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| BytecodeError::BadString)
    }

    fn f32_vec(&mut self, count: usize) -> Result<Vec<f32>, BytecodeError> {
        let mut v = Vec::with_capacity(count);
        for _ in 0..count {
            v.push(self.f32()?);
        }
        Ok(v)
    }
}

impl BytecodeFile {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.instructions.len() * 20);

        out.extend_from_slice(&CEDAR_MAGIC);
        out.extend_from_slice(&CEDAR_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.instructions.len() as u32).to_le_bytes());
        out.extend_from_slice(&(self.state_inits.len() as u32).to_le_bytes());
        out.extend_from_slice(&(self.required_samples.len() as u32).to_le_bytes());

        for inst in &self.instructions {
            out.extend_from_slice(&inst.to_bytes());
        }

        for init in &self.state_inits {
            out.extend_from_slice(&init.state_id.to_le_bytes());
            out.push(match init.kind {
                StateInitKind::SeqStep => 0,
                StateInitKind::Timeline => 1,
            });
            out.extend_from_slice(&init.cycle_length.to_bits().to_le_bytes());
            out.extend_from_slice(&(init.times.len() as u32).to_le_bytes());
            for t in &init.times {
                out.extend_from_slice(&t.to_bits().to_le_bytes());
            }
            for v in &init.values {
                out.extend_from_slice(&v.to_bits().to_le_bytes());
            }
            for v in &init.velocities {
                out.extend_from_slice(&v.to_bits().to_le_bytes());
            }
            for name in &init.sample_names {
                write_str(&mut out, name);
            }
        }

        for name in &self.required_samples {
            write_str(&mut out, name);
        }

        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BytecodeError> {
        let mut r = Reader { bytes, pos: 0 };

        if r.take(4)? != &CEDAR_MAGIC[..] {
            return Err(BytecodeError::BadMagic);
        }
        let version = r.u16()?;
        if version != CEDAR_VERSION {
            return Err(BytecodeError::UnsupportedVersion(version));
        }

        let instruction_count = r.u32()? as usize;
        let state_init_count = r.u32()? as usize;
        let sample_count = r.u32()? as usize;

        let mut instructions = Vec::with_capacity(instruction_count);
        for _ in 0..instruction_count {
            let raw: [u8; 20] = r.take(20)?.try_into().map_err(|_| BytecodeError::Truncated)?;
            instructions.push(Instruction::from_bytes(&raw));
        }

        let mut state_inits = Vec::with_capacity(state_init_count);
        for _ in 0..state_init_count {
            let state_id = r.u32()?;
            let kind = match r.take(1)?[0] {
                1 => StateInitKind::Timeline,
                _ => StateInitKind::SeqStep,
            };
            let cycle_length = r.f32()?;
            let event_count = r.u32()? as usize;
            let times = r.f32_vec(event_count)?;
            let values = r.f32_vec(event_count)?;
            let velocities = r.f32_vec(event_count)?;
            let mut sample_names = Vec::with_capacity(event_count);
            for _ in 0..event_count {
                sample_names.push(r.string()?);
            }

            state_inits.push(StateInitData {
                state_id,
                kind,
                cycle_length,
                times,
                values,
                velocities,
                sample_names,
            });
        }

        let mut required_samples = Vec::with_capacity(sample_count);
        for _ in 0..sample_count {
            required_samples.push(r.string()?);
        }

        Ok(Self {
            instructions,
            state_inits,
            required_samples,
        })
    }
}

/// Human-readable instruction listing for the `dump` command
pub fn dump_listing(file: &BytecodeFile) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "; {} instructions", file.instructions.len());

    for (i, inst) in file.instructions.iter().enumerate() {
        let _ = write!(out, "{:04}  {:<16}", i, inst.opcode.name());

        if inst.out_buffer != 0xFFFF {
            let _ = write!(out, " out=b{:<4}", inst.out_buffer);
        } else {
            let _ = write!(out, " out=--   ");
        }

        let inputs: Vec<String> = inst
            .inputs
            .iter()
            .filter(|b| **b != 0xFFFF)
            .map(|b| format!("b{}", b))
            .collect();
        let _ = write!(out, " in=[{}]", inputs.join(", "));

        match inst.opcode {
            crate::instruction::Opcode::PushConst | crate::instruction::Opcode::Dc => {
                let _ = write!(out, " value={}", inst.const_value());
            }
            _ => {
                if inst.state_id != 0 {
                    let _ = write!(out, " state=0x{:08X}", inst.state_id);
                }
            }
        }

        if inst.rate != 0 {
            let _ = write!(out, " rate={}", inst.rate);
        }

        let _ = writeln!(out);
    }

    if !file.state_inits.is_empty() {
        let _ = writeln!(out, "\n; {} state init(s)", file.state_inits.len());
        for init in &file.state_inits {
            let kind = match init.kind {
                StateInitKind::SeqStep => "seq",
                StateInitKind::Timeline => "timeline",
            };
            let _ = writeln!(
                out,
                ";  0x{:08X} {} events={} cycle={}",
                init.state_id,
                kind,
                init.times.len(),
                init.cycle_length
            );
        }
    }

    if !file.required_samples.is_empty() {
        let _ = writeln!(out, "\n; required samples: {}", file.required_samples.join(", "));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{fnv1a_hash, Opcode};

    #[test]
    fn test_container_roundtrip_is_byte_exact() {
        let mut osc = Instruction::unary(Opcode::OscSaw, 1, 0);
        osc.state_id = fnv1a_hash("main/saw#0");

        let file = BytecodeFile {
            instructions: vec![Instruction::push_const(0, 440.0), osc],
            state_inits: vec![StateInitData {
                state_id: 0x1234,
                kind: StateInitKind::SeqStep,
                cycle_length: 4.0,
                times: vec![0.0, 2.0],
                values: vec![220.0, 330.0],
                velocities: vec![1.0, 0.8],
                sample_names: vec![String::new(), "bd".to_string()],
            }],
            required_samples: vec!["bd".to_string()],
        };

        let bytes = file.encode();
        let decoded = BytecodeFile::decode(&bytes).unwrap();
        // Byte-exact: re-encoding reproduces the identical container
        assert_eq!(decoded.encode(), bytes);
        assert_eq!(decoded.instructions, file.instructions);
    }

    #[test]
    fn test_bad_magic_rejected() {
        assert!(matches!(
            BytecodeFile::decode(b"NOPE\x01\x00"),
            Err(BytecodeError::BadMagic)
        ));
    }
}
