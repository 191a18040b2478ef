//! # Akkado - Livecoding Compiler and Cedar VM
//!
//! Akkado is a livecoding language for algorithmic music. Source text
//! compiles to "Cedar" bytecode: fixed-width register instructions
//! executed block-by-block by an audio-rate virtual machine that supports
//! glitch-free program hot-swap with crossfade.
//!
//! ## Pipeline
//!
//! 1. [`lexer`] tokenizes the source (the [`mini_lexer`] handles pattern
//!    strings with their own rhythmic grammar)
//! 2. [`parser`] builds an arena AST, recursively invoking the
//!    [`mini_parser`] for `pat("...")` literals
//! 3. [`analyzer`] collects definitions, rewrites `|>` pipes by hole
//!    substitution, and validates calls into a fresh arena
//! 4. [`codegen`] emits the instruction stream, expanding chords and
//!    array combinators into parallel voices with deterministic state IDs
//! 5. [`vm`] executes blocks against pre-allocated pools; the
//!    [`swap_controller`] publishes new programs lock-free and the
//!    [`engine`] crossfades between them
//!
//! ## Quick start
//!
//! ```rust
//! let result = akkado::compile("saw(110) |> lp(%, 800, 0.7) |> out(%)", "<live>");
//! assert!(result.success);
//! assert!(!result.instructions.is_empty());
//! ```
//!
//! State identity is semantic: every stateful instruction carries a 32-bit
//! FNV-1a hash of its path (`main/voice/saw#0`), so edits that preserve
//! the structure keep oscillator phases and filter memories alive across
//! a hot-swap.

pub mod analyzer;
pub mod ast;
pub mod audio_arena;
pub mod buffer_pool;
pub mod builtins;
pub mod bytecode;
pub mod chord_parser;
pub mod codegen;
mod codegen_arrays;
mod codegen_functions;
mod codegen_params;
mod codegen_patterns;
pub mod crossfade;
pub mod diagnostics;
pub mod dsp_state;
pub mod engine;
pub mod env_map;
pub mod fm_detection;
pub mod instruction;
pub mod lexer;
pub mod mini_lexer;
pub mod mini_parser;
pub mod mini_token;
pub mod music_theory;
pub mod parser;
pub mod pattern_event;
pub mod pattern_eval;
pub mod program_slot;
pub mod sample_bank;
pub mod state_pool;
pub mod swap_controller;
pub mod symbol_table;
pub mod token;
pub mod vm;

use codegen::{ParamDecl, StateInitData};
use diagnostics::{has_errors, Diagnostic, SourceLocation};
use instruction::Instruction;
use sample_bank::SampleRegistry;
use tracing::debug;

/// Everything one compile produces
pub struct CompileResult {
    pub instructions: Vec<Instruction>,
    pub diagnostics: Vec<Diagnostic>,
    pub state_inits: Vec<StateInitData>,
    pub required_samples: Vec<String>,
    pub param_decls: Vec<ParamDecl>,
    pub success: bool,
}

impl CompileResult {
    fn failed(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            instructions: Vec::new(),
            diagnostics,
            state_inits: Vec::new(),
            required_samples: Vec::new(),
            param_decls: Vec::new(),
            success: false,
        }
    }
}

/// Compile Akkado source to Cedar bytecode
pub fn compile(source: &str, filename: &str) -> CompileResult {
    compile_with_registry(source, filename, None)
}

/// Compile with a sample registry so sample names resolve to stable IDs
pub fn compile_with_registry(
    source: &str,
    filename: &str,
    sample_registry: Option<&SampleRegistry>,
) -> CompileResult {
    if source.trim().is_empty() {
        return CompileResult::failed(vec![Diagnostic::error(
            "E001",
            "empty source file",
            filename,
            SourceLocation::default(),
        )]);
    }

    let (tokens, mut diagnostics) = lexer::lex(source, filename);
    debug!(tokens = tokens.len(), "lexed");

    let (ast, parse_diags) = parser::parse(tokens, filename);
    diagnostics.extend(parse_diags);
    debug!(nodes = ast.arena.len(), "parsed");

    let analysis = analyzer::analyze(&ast, filename);
    diagnostics.extend(analysis.diagnostics);

    if !analysis.success || has_errors(&diagnostics) {
        return CompileResult::failed(diagnostics);
    }

    let mut symbols = analysis.symbols;
    let generated = codegen::generate(&analysis.ast, &mut symbols, filename, sample_registry);
    diagnostics.extend(generated.diagnostics);

    let success = generated.success && !has_errors(&diagnostics);
    debug!(
        instructions = generated.instructions.len(),
        success, "compiled"
    );

    CompileResult {
        instructions: if success {
            generated.instructions
        } else {
            Vec::new()
        },
        diagnostics,
        state_inits: generated.state_inits,
        required_samples: generated.required_samples,
        param_decls: generated.param_decls,
        success,
    }
}

/// Compile a source file from disk
pub fn compile_file(path: &str) -> std::io::Result<CompileResult> {
    let source = std::fs::read_to_string(path)?;
    Ok(compile(&source, path))
}
