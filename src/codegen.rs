//! Code generator: analyzed AST -> Cedar bytecode
//!
//! Walks the transformed AST and emits a flat instruction vector against a
//! linearly-allocated pool of buffer indices. Stateful builtins get a
//! 32-bit state ID hashed from the semantic path (segments joined with
//! '/'), so edits that preserve the semantic structure preserve DSP state
//! across hot-swap. Per-builtin call counters disambiguate repeated calls
//! in the same scope.
//!
//! Array combinators, user-function inlining, pattern lowering and the UI
//! parameter builtins live in the sibling codegen_* modules; the FM
//! upgrade runs as a post-pass in fm_detection.

use crate::ast::{Ast, Node, NodeData, NodeIndex, NodeKind, NULL_NODE};
use crate::builtins::{canonical_name, lookup_builtin};
use crate::diagnostics::{has_errors, Diagnostic, SourceLocation};
use crate::fm_detection::apply_fm_rewrite;
use crate::instruction::{fnv1a_hash, Instruction, Opcode, BUFFER_UNUSED};
use crate::sample_bank::SampleRegistry;
use crate::symbol_table::{SymbolData, SymbolKind, SymbolTable};
use std::collections::{BTreeSet, HashMap};

/// Ceiling on allocatable buffer indices; matches the VM's pool size
pub const MAX_BUFFERS: u16 = 256;

/// Linear buffer index allocator (no reuse)
#[derive(Debug, Default)]
pub struct BufferAllocator {
    next: u16,
}

impl BufferAllocator {
    /// Returns BUFFER_UNUSED when the pool is exhausted
    pub fn allocate(&mut self) -> u16 {
        if self.next >= MAX_BUFFERS {
            return BUFFER_UNUSED;
        }
        let idx = self.next;
        self.next += 1;
        idx
    }

    pub fn count(&self) -> u16 {
        self.next
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateInitKind {
    SeqStep,
    Timeline,
}

/// Initialization payload for one sequencer / timeline state
#[derive(Debug, Clone)]
pub struct StateInitData {
    pub state_id: u32,
    pub kind: StateInitKind,
    pub cycle_length: f32,
    /// Event times in cycles
    pub times: Vec<f32>,
    /// Frequencies or sample IDs
    pub values: Vec<f32>,
    pub velocities: Vec<f32>,
    /// Empty for rests and pitch events
    pub sample_names: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamWidget {
    Slider,
    Button,
    Toggle,
    Dropdown,
}

/// Exposed parameter declaration for host UI auto-generation
#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub name: String,
    pub widget: ParamWidget,
    pub default: f32,
    pub min: f32,
    pub max: f32,
}

pub struct CodeGenResult {
    pub instructions: Vec<Instruction>,
    pub diagnostics: Vec<Diagnostic>,
    pub state_inits: Vec<StateInitData>,
    pub required_samples: Vec<String>,
    pub param_decls: Vec<ParamDecl>,
    pub success: bool,
}

pub struct CodeGenerator<'a> {
    pub(crate) ast: &'a Ast,
    pub(crate) symbols: &'a mut SymbolTable,
    pub(crate) sample_registry: Option<&'a SampleRegistry>,
    pub(crate) buffers: BufferAllocator,
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) diagnostics: Vec<Diagnostic>,
    pub(crate) state_inits: Vec<StateInitData>,
    pub(crate) required_samples: BTreeSet<String>,
    pub(crate) param_decls: Vec<ParamDecl>,
    pub(crate) filename: String,
    pub(crate) path_stack: Vec<String>,
    pub(crate) call_counters: HashMap<String, u32>,
    pub(crate) node_buffers: HashMap<NodeIndex, u16>,
    pub(crate) multi_buffers: HashMap<NodeIndex, Vec<u16>>,
    /// Parameter name hash -> literal argument node, for compile-time match
    pub(crate) param_literals: HashMap<u32, NodeIndex>,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(
        ast: &'a Ast,
        symbols: &'a mut SymbolTable,
        filename: &str,
        sample_registry: Option<&'a SampleRegistry>,
    ) -> Self {
        Self {
            ast,
            symbols,
            sample_registry,
            buffers: BufferAllocator::default(),
            instructions: Vec::new(),
            diagnostics: Vec::new(),
            state_inits: Vec::new(),
            required_samples: BTreeSet::new(),
            param_decls: Vec::new(),
            filename: filename.to_string(),
            path_stack: Vec::new(),
            call_counters: HashMap::new(),
            node_buffers: HashMap::new(),
            multi_buffers: HashMap::new(),
            param_literals: HashMap::new(),
        }
    }

    pub fn generate(mut self) -> CodeGenResult {
        self.push_path("main");

        if !self.ast.valid() {
            self.error("E100", "Invalid AST", SourceLocation::default());
            return CodeGenResult {
                instructions: Vec::new(),
                diagnostics: self.diagnostics,
                state_inits: Vec::new(),
                required_samples: Vec::new(),
                param_decls: Vec::new(),
                success: false,
            };
        }

        self.visit(self.ast.root);
        self.pop_path();

        // Upgrade FM-modulated oscillators to their oversampled variants
        apply_fm_rewrite(&mut self.instructions);

        let success = !has_errors(&self.diagnostics);
        CodeGenResult {
            instructions: self.instructions,
            diagnostics: self.diagnostics,
            state_inits: self.state_inits,
            required_samples: self.required_samples.into_iter().collect(),
            param_decls: self.param_decls,
            success,
        }
    }

    /// Borrow a node for the full AST lifetime, independent of &mut self
    pub(crate) fn node(&self, idx: NodeIndex) -> &'a Node {
        let ast: &'a Ast = self.ast;
        &ast.arena[idx]
    }

    pub(crate) fn visit(&mut self, node: NodeIndex) -> u16 {
        if node == NULL_NODE {
            return BUFFER_UNUSED;
        }

        if let Some(buf) = self.node_buffers.get(&node) {
            return *buf;
        }

        let n = self.node(node);

        match n.kind {
            NodeKind::Program | NodeKind::Block => {
                let mut last_buffer = BUFFER_UNUSED;
                let mut child = n.first_child;
                while child != NULL_NODE {
                    last_buffer = self.visit(child);
                    child = self.node(child).next_sibling;
                }
                if n.kind == NodeKind::Block {
                    self.node_buffers.insert(node, last_buffer);
                }
                last_buffer
            }

            NodeKind::StringLit => {
                // Compile-time only (match patterns, chord symbols, param names)
                self.node_buffers.insert(node, BUFFER_UNUSED);
                BUFFER_UNUSED
            }

            NodeKind::NumberLit => {
                let value = n.number().unwrap_or(0.0) as f32;
                let out = self.emit_const(value, n.location);
                self.node_buffers.insert(node, out);
                out
            }

            NodeKind::BoolLit => {
                let value = match n.data {
                    NodeData::Bool(true) => 1.0,
                    _ => 0.0,
                };
                let out = self.emit_const(value, n.location);
                self.node_buffers.insert(node, out);
                out
            }

            NodeKind::PitchLit => {
                let midi = match n.data {
                    NodeData::Pitch { midi_note } => midi_note as f32,
                    _ => 0.0,
                };
                let out = self.emit_midi_to_freq(midi, n.location);
                self.node_buffers.insert(node, out);
                out
            }

            NodeKind::ChordLit => {
                // Each chord note becomes a voice in the multi-buffer map
                let (root, intervals) = match &n.data {
                    NodeData::Chord {
                        root_midi,
                        intervals,
                    } => (*root_midi, intervals.clone()),
                    _ => (60, vec![0]),
                };

                let mut freq_buffers = Vec::with_capacity(intervals.len());
                for interval in &intervals {
                    let midi = (root as i32 + *interval as i32).clamp(0, 127) as f32;
                    let buf = self.emit_midi_to_freq(midi, n.location);
                    if buf == BUFFER_UNUSED {
                        return BUFFER_UNUSED;
                    }
                    freq_buffers.push(buf);
                }

                let out = if freq_buffers.len() > 1 {
                    self.register_multi_buffer(node, freq_buffers)
                } else {
                    freq_buffers.first().copied().unwrap_or(BUFFER_UNUSED)
                };
                self.node_buffers.insert(node, out);
                out
            }

            NodeKind::ArrayLit => {
                let first_elem = n.first_child;
                if first_elem == NULL_NODE {
                    let out = self.emit_const(0.0, n.location);
                    self.node_buffers.insert(node, out);
                    return out;
                }

                let mut element_buffers = Vec::new();
                let mut elem = first_elem;
                while elem != NULL_NODE {
                    element_buffers.push(self.visit(elem));
                    elem = self.node(elem).next_sibling;
                }

                let out = if element_buffers.len() == 1 {
                    element_buffers[0]
                } else {
                    self.register_multi_buffer(node, element_buffers)
                };
                self.node_buffers.insert(node, out);
                out
            }

            NodeKind::Identifier => self.visit_identifier(node, n),

            NodeKind::Assignment => self.visit_assignment(node, n),

            NodeKind::Call => self.visit_call(node, n),

            NodeKind::Closure => self.handle_closure(node, n),

            NodeKind::MiniLiteral => self.handle_mini_literal(node, n),

            NodeKind::MatchExpr => self.handle_match_expr(node, n),

            NodeKind::Hole => {
                self.error("E110", "Hole '%' in unexpected context", n.location);
                BUFFER_UNUSED
            }

            NodeKind::Pipe => {
                self.error("E111", "Pipe should have been rewritten", n.location);
                BUFFER_UNUSED
            }

            NodeKind::MethodCall => {
                self.error("E113", "Method calls are not supported", n.location);
                BUFFER_UNUSED
            }

            NodeKind::PostStmt => {
                self.error("E115", "Post statements are not supported", n.location);
                BUFFER_UNUSED
            }

            NodeKind::FunctionDef => {
                // Registered in the symbol table; expanded at call sites
                BUFFER_UNUSED
            }

            NodeKind::MatchArm => {
                self.error(
                    "E122",
                    "Match arm visited outside of match expression",
                    n.location,
                );
                BUFFER_UNUSED
            }

            _ => {
                self.error("E199", "Unsupported node kind", n.location);
                BUFFER_UNUSED
            }
        }
    }

    fn visit_identifier(&mut self, node: NodeIndex, n: &'a Node) -> u16 {
        let name = match &n.data {
            NodeData::Ident(name) => name.clone(),
            _ => return BUFFER_UNUSED,
        };

        let resolved = match self.symbols.lookup(&name) {
            None => None,
            Some(symbol) => Some((
                symbol.kind,
                symbol.buffer_index,
                match &symbol.data {
                    SymbolData::Pattern(info) => info.pattern_node,
                    SymbolData::Array(info) => info.source_node,
                    _ => NULL_NODE,
                },
            )),
        };

        let Some((kind, buffer_index, payload_node)) = resolved else {
            self.error(
                "E102",
                &format!("Undefined identifier: '{}'", name),
                n.location,
            );
            return BUFFER_UNUSED;
        };

        match kind {
            SymbolKind::Variable | SymbolKind::Parameter => buffer_index,

            SymbolKind::Pattern => self.handle_pattern_reference(&name, payload_node, n.location),

            SymbolKind::Array => {
                let first_buf = self.visit(payload_node);
                if self.is_multi_buffer(payload_node) {
                    let buffers = self.get_multi_buffers(payload_node);
                    self.register_multi_buffer(node, buffers);
                }
                self.node_buffers.insert(node, first_buf);
                first_buf
            }

            // Function names have no runtime value; the HOFs resolve them
            SymbolKind::UserFunction | SymbolKind::FunctionValue => BUFFER_UNUSED,

            SymbolKind::Builtin => {
                self.error(
                    "E103",
                    &format!("Cannot use builtin as value: '{}'", name),
                    n.location,
                );
                BUFFER_UNUSED
            }
        }
    }

    fn visit_assignment(&mut self, node: NodeIndex, n: &'a Node) -> u16 {
        let value_idx = n.first_child;
        if value_idx == NULL_NODE {
            self.error("E104", "Invalid assignment", n.location);
            return BUFFER_UNUSED;
        }

        let var_name = match &n.data {
            NodeData::Ident(name) => name.clone(),
            _ => return BUFFER_UNUSED,
        };

        let symbol_kind = self.symbols.lookup(&var_name).map(|s| s.kind);
        if matches!(
            symbol_kind,
            // Patterns compile where they are referenced; function values
            // expand at call sites. Neither emits code here.
            Some(SymbolKind::Pattern)
                | Some(SymbolKind::FunctionValue)
                | Some(SymbolKind::UserFunction)
        ) {
            self.node_buffers.insert(node, BUFFER_UNUSED);
            return BUFFER_UNUSED;
        }

        // The variable name scopes the state IDs of nested stateful nodes
        self.push_path(&var_name);
        let value_buffer = self.visit(value_idx);
        self.pop_path();

        if matches!(
            symbol_kind,
            Some(SymbolKind::Variable) | Some(SymbolKind::Parameter)
        ) {
            self.symbols.define_variable(&var_name, value_buffer);
        }

        self.node_buffers.insert(node, value_buffer);
        value_buffer
    }

    fn visit_call(&mut self, node: NodeIndex, n: &'a Node) -> u16 {
        let func_name = match &n.data {
            NodeData::Ident(name) => name.clone(),
            _ => return BUFFER_UNUSED,
        };

        // User-defined functions first, so they may shadow builtins
        let user_fn = self.symbols.lookup(&func_name).and_then(|s| match &s.data {
            SymbolData::UserFunction(info) => Some(info.clone()),
            _ => None,
        });
        if let Some(info) = user_fn {
            return self.handle_user_function_call(node, n, &info);
        }

        let func_val = self.symbols.lookup(&func_name).and_then(|s| match &s.data {
            SymbolData::FunctionValue(func_ref) => Some(func_ref.clone()),
            _ => None,
        });
        if let Some(func_ref) = func_val {
            return self.handle_function_ref_call(node, n, &func_ref);
        }

        // Special forms are compile-time lowerings, not opcode emissions
        match func_name.as_str() {
            "len" => return self.handle_len_call(node, n),
            "chord" => return self.handle_chord_call(node, n),
            "map" => return self.handle_map_call(node, n),
            "sum" => return self.handle_sum_call(node, n),
            "fold" => return self.handle_fold_call(node, n),
            "zipWith" => return self.handle_zip_with_call(node, n),
            "zip" => return self.handle_zip_call(node, n),
            "take" => return self.handle_take_call(node, n),
            "drop" => return self.handle_drop_call(node, n),
            "reverse" => return self.handle_reverse_call(node, n),
            "range" => return self.handle_range_call(node, n),
            "repeat" => return self.handle_repeat_call(node, n),
            "param" => return self.handle_param_call(node, n, ParamWidget::Slider),
            "button" => return self.handle_param_call(node, n, ParamWidget::Button),
            "toggle" => return self.handle_param_call(node, n, ParamWidget::Toggle),
            "dropdown" => return self.handle_param_call(node, n, ParamWidget::Dropdown),
            _ => {}
        }

        // mtof() propagates multi-buffer inputs one MTOF per voice
        if canonical_name(&func_name) == "mtof" {
            if let Some(out) = self.try_mtof_multi(node, n) {
                return out;
            }
        }

        // dc() packs its literal offset into the state_id field
        if canonical_name(&func_name) == "dc" {
            return self.handle_dc_call(node, n);
        }

        let Some(builtin) = lookup_builtin(&func_name) else {
            self.error(
                "E107",
                &format!("Unknown function: '{}'", func_name),
                n.location,
            );
            return BUFFER_UNUSED;
        };

        let canonical = canonical_name(&func_name).to_string();

        // Stateful calls push their path segment BEFORE visiting children
        // so nested stateful ops inherit this call's context
        let mut pushed_path = false;
        if builtin.requires_state {
            let count = self.next_call_count(&canonical);
            self.push_path(&format!("{}#{}", canonical, count));
            pushed_path = true;
        }

        let arg_nodes = self.call_arg_values(node);
        let mut arg_buffers: Vec<u16> = Vec::with_capacity(arg_nodes.len());
        for arg in &arg_nodes {
            arg_buffers.push(self.visit(*arg));
        }

        // out(x): duplicate mono to stereo
        if canonical == "out" && arg_buffers.len() == 1 {
            arg_buffers.push(arg_buffers[0]);
        }

        // Fill missing optional arguments from the builtin's defaults
        for i in arg_buffers.len()..builtin.total_params() {
            if builtin.has_default(i) {
                let default_buf = self.emit_const(builtin.default_at(i), n.location);
                if default_buf == BUFFER_UNUSED {
                    if pushed_path {
                        self.pop_path();
                    }
                    return BUFFER_UNUSED;
                }
                arg_buffers.push(default_buf);
            }
        }

        let out = self.buffers.allocate();
        if out == BUFFER_UNUSED {
            self.error("E101", "Buffer pool exhausted", n.location);
            if pushed_path {
                self.pop_path();
            }
            return BUFFER_UNUSED;
        }

        let mut inst = Instruction::new(builtin.opcode, out);
        for (i, buf) in arg_buffers.iter().take(5).enumerate() {
            inst.inputs[i] = *buf;
        }

        // Packed rate-field parameters
        match canonical.as_str() {
            // Release time in tenths of seconds, clamped to 25.5s
            "adsr" => {
                if let Some(release) = self.literal_arg(&arg_nodes, 4) {
                    inst.rate = ((release / 0.1).clamp(0.0, 255.0)) as u8;
                }
            }
            // LFO shape index
            "lfo" => {
                if let Some(shape) = self.literal_arg(&arg_nodes, 1) {
                    inst.rate = (shape.clamp(0.0, 6.0)) as u8;
                }
            }
            // Clock mode: 0=beat, 1=bar, 2=cycle
            "clock" => {
                if let Some(mode) = self.literal_arg(&arg_nodes, 0) {
                    inst.rate = (mode.clamp(0.0, 2.0)) as u8;
                }
            }
            _ => {}
        }

        if pushed_path {
            inst.state_id = self.compute_state_id();
            self.pop_path();
        }

        self.emit(inst);
        self.node_buffers.insert(node, out);
        out
    }

    fn handle_dc_call(&mut self, node: NodeIndex, n: &'a Node) -> u16 {
        let arg_nodes = self.call_arg_values(node);
        if arg_nodes.is_empty() {
            self.error("E136", "dc() requires a signal argument", n.location);
            return BUFFER_UNUSED;
        }

        let in_buf = self.visit(arg_nodes[0]);
        let offset = self.literal_arg(&arg_nodes, 1).unwrap_or(0.0);

        let out = self.buffers.allocate();
        if out == BUFFER_UNUSED {
            self.error("E101", "Buffer pool exhausted", n.location);
            return BUFFER_UNUSED;
        }

        let mut inst = Instruction::unary(Opcode::Dc, out, in_buf);
        inst.set_const_value(offset);
        self.emit(inst);
        self.node_buffers.insert(node, out);
        out
    }

    fn try_mtof_multi(&mut self, node: NodeIndex, n: &'a Node) -> Option<u16> {
        let arg_nodes = self.call_arg_values(node);
        if arg_nodes.is_empty() {
            self.error("E135", "mtof() requires 1 argument", n.location);
            return Some(BUFFER_UNUSED);
        }

        let midi_node = arg_nodes[0];
        self.visit(midi_node);

        if !self.is_multi_buffer(midi_node) {
            return None; // single buffer: generic path handles it
        }

        let midi_buffers = self.get_multi_buffers(midi_node);
        let mut freq_buffers = Vec::with_capacity(midi_buffers.len());

        for midi_buf in midi_buffers {
            let freq_buf = self.buffers.allocate();
            if freq_buf == BUFFER_UNUSED {
                self.error("E101", "Buffer pool exhausted", n.location);
                return Some(BUFFER_UNUSED);
            }
            self.emit(Instruction::unary(Opcode::Mtof, freq_buf, midi_buf));
            freq_buffers.push(freq_buf);
        }

        let first = self.register_multi_buffer(node, freq_buffers);
        self.node_buffers.insert(node, first);
        Some(first)
    }

    // ------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------

    pub(crate) fn emit(&mut self, inst: Instruction) {
        self.instructions.push(inst);
    }

    /// PUSH_CONST into a fresh buffer; reports E101 on exhaustion
    pub(crate) fn emit_const(&mut self, value: f32, location: SourceLocation) -> u16 {
        let out = self.buffers.allocate();
        if out == BUFFER_UNUSED {
            self.error("E101", "Buffer pool exhausted", location);
            return BUFFER_UNUSED;
        }
        self.emit(Instruction::push_const(out, value));
        out
    }

    /// PUSH_CONST(midi) then MTOF: the shared pitch/chord lowering
    pub(crate) fn emit_midi_to_freq(&mut self, midi: f32, location: SourceLocation) -> u16 {
        let midi_buf = self.emit_const(midi, location);
        if midi_buf == BUFFER_UNUSED {
            return BUFFER_UNUSED;
        }

        let freq_buf = self.buffers.allocate();
        if freq_buf == BUFFER_UNUSED {
            self.error("E101", "Buffer pool exhausted", location);
            return BUFFER_UNUSED;
        }
        self.emit(Instruction::unary(Opcode::Mtof, freq_buf, midi_buf));
        freq_buf
    }

    /// Argument value nodes of a call, unwrapping Argument wrappers
    pub(crate) fn call_arg_values(&self, call: NodeIndex) -> Vec<NodeIndex> {
        let mut values = Vec::new();
        let mut arg = self.node(call).first_child;
        while arg != NULL_NODE {
            let arg_node = self.node(arg);
            let value = if arg_node.kind == NodeKind::Argument {
                arg_node.first_child
            } else {
                arg
            };
            values.push(value);
            arg = arg_node.next_sibling;
        }
        values
    }

    /// Literal numeric value of argument `index`, if present
    pub(crate) fn literal_arg(&self, arg_nodes: &[NodeIndex], index: usize) -> Option<f32> {
        let node = *arg_nodes.get(index)?;
        if node == NULL_NODE {
            return None;
        }
        let n = self.node(node);
        if n.kind == NodeKind::NumberLit {
            n.number().map(|v| v as f32)
        } else {
            None
        }
    }

    pub(crate) fn next_call_count(&mut self, name: &str) -> u32 {
        let counter = self.call_counters.entry(name.to_string()).or_insert(0);
        let count = *counter;
        *counter += 1;
        count
    }

    pub(crate) fn compute_state_id(&self) -> u32 {
        fnv1a_hash(&self.path_stack.join("/"))
    }

    pub(crate) fn push_path(&mut self, segment: &str) {
        self.path_stack.push(segment.to_string());
    }

    pub(crate) fn pop_path(&mut self) {
        self.path_stack.pop();
    }

    // Multi-buffer bookkeeping

    pub(crate) fn register_multi_buffer(&mut self, node: NodeIndex, buffers: Vec<u16>) -> u16 {
        if buffers.is_empty() {
            return BUFFER_UNUSED;
        }
        let first = buffers[0];
        self.multi_buffers.insert(node, buffers);
        first
    }

    pub(crate) fn is_multi_buffer(&self, node: NodeIndex) -> bool {
        self.multi_buffers
            .get(&node)
            .map(|b| b.len() > 1)
            .unwrap_or(false)
    }

    pub(crate) fn get_multi_buffers(&self, node: NodeIndex) -> Vec<u16> {
        if let Some(buffers) = self.multi_buffers.get(&node) {
            return buffers.clone();
        }
        match self.node_buffers.get(&node) {
            Some(buf) if *buf != BUFFER_UNUSED => vec![*buf],
            _ => Vec::new(),
        }
    }

    pub(crate) fn error(&mut self, code: &str, message: &str, location: SourceLocation) {
        self.diagnostics.push(Diagnostic::error(
            code,
            message,
            &self.filename,
            location,
        ));
    }
}

/// Generate bytecode from an analyzed AST
pub fn generate(
    ast: &Ast,
    symbols: &mut SymbolTable,
    filename: &str,
    sample_registry: Option<&SampleRegistry>,
) -> CodeGenResult {
    CodeGenerator::new(ast, symbols, filename, sample_registry).generate()
}
