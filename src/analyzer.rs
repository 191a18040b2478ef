//! Semantic analyzer
//!
//! Three passes over the parsed arena, emitting into a fresh output arena:
//!
//! 1. Definition collection: assignments and function definitions are
//!    registered in the symbol table, classified by their RHS (pattern,
//!    array, function value, plain variable).
//! 2. Pipe rewriting: every `Pipe(LHS, RHS)` becomes the RHS subtree with
//!    all holes substituted by the rewritten LHS. Multiple holes share the
//!    replacement node. The old->new node map then redirects every node
//!    index the symbol table stored.
//! 3. Resolve and validate: unknown callees, undefined identifiers, arity
//!    windows, leftover holes, argument ordering, and closure captures.
//!
//! The analyzer never halts on error; the transformed arena is returned
//! even on failure so tooling can inspect partial results.

use crate::ast::{Ast, AstArena, MiniAtomKind, Node, NodeData, NodeIndex, NodeKind, NULL_NODE};
use crate::builtins::BuiltinInfo;
use crate::diagnostics::{has_errors, Diagnostic, SourceLocation};
use crate::symbol_table::{
    ArrayInfo, FunctionParamInfo, FunctionRef, PatternInfo, SymbolData, SymbolKind, SymbolTable,
    UserFunctionInfo,
};
use std::collections::{HashMap, HashSet};

pub struct AnalysisResult {
    pub symbols: SymbolTable,
    pub ast: Ast,
    pub diagnostics: Vec<Diagnostic>,
    pub success: bool,
}

pub struct SemanticAnalyzer<'a> {
    input: &'a Ast,
    output: AstArena,
    symbols: SymbolTable,
    node_map: HashMap<NodeIndex, NodeIndex>,
    diagnostics: Vec<Diagnostic>,
    filename: String,
}

impl<'a> SemanticAnalyzer<'a> {
    pub fn new(input: &'a Ast, filename: &str) -> Self {
        Self {
            input,
            output: AstArena::new(),
            symbols: SymbolTable::new(),
            node_map: HashMap::new(),
            diagnostics: Vec::new(),
            filename: filename.to_string(),
        }
    }

    pub fn analyze(mut self) -> AnalysisResult {
        if !self.input.valid() {
            self.error("E001", "Invalid AST: no root node", SourceLocation::default());
            return AnalysisResult {
                symbols: self.symbols,
                ast: Ast::default(),
                diagnostics: self.diagnostics,
                success: false,
            };
        }

        self.collect_definitions(self.input.root);

        let new_root = self.rewrite_pipes(self.input.root);

        // Symbols captured input-arena indices; follow them across the rewrite
        self.symbols.remap_nodes(&self.node_map);

        self.resolve_and_validate(new_root);

        let success = !has_errors(&self.diagnostics);
        AnalysisResult {
            symbols: self.symbols,
            ast: Ast {
                arena: self.output,
                root: new_root,
            },
            diagnostics: self.diagnostics,
            success,
        }
    }

    /// Borrow an input node for the full input lifetime, so reads don't
    /// conflict with mutations of the analyzer state.
    fn in_node(&self, idx: NodeIndex) -> &'a Node {
        let input: &'a Ast = self.input;
        &input.arena[idx]
    }

    // ------------------------------------------------------------------
    // Pass 1: definition collection
    // ------------------------------------------------------------------

    fn collect_definitions(&mut self, node: NodeIndex) {
        if node == NULL_NODE {
            return;
        }

        let n = self.in_node(node);

        match n.kind {
            NodeKind::Assignment => {
                let name = match &n.data {
                    NodeData::Ident(name) => name.clone(),
                    _ => String::new(),
                };
                if self.symbols.is_defined_in_current_scope(&name) {
                    self.warning(
                        "W001",
                        &format!("Variable '{}' redefined", name),
                        n.location,
                    );
                }

                let value_idx = n.first_child;
                let value_kind = if value_idx != NULL_NODE {
                    Some(self.in_node(value_idx).kind)
                } else {
                    None
                };

                match value_kind {
                    Some(NodeKind::MiniLiteral) => {
                        let is_sample_pattern = self.subtree_has_sample_atom(value_idx);
                        self.symbols.define_pattern(
                            &name,
                            PatternInfo {
                                pattern_node: value_idx,
                                is_sample_pattern,
                            },
                        );
                    }
                    Some(NodeKind::ArrayLit) => {
                        let element_count = self.input.arena.child_count(value_idx);
                        self.symbols.define_array(
                            &name,
                            ArrayInfo {
                                source_node: value_idx,
                                element_count,
                            },
                        );
                    }
                    Some(NodeKind::Closure) => {
                        let params = self.closure_params(value_idx);
                        self.symbols.define_function_value(
                            &name,
                            FunctionRef {
                                closure_node: value_idx,
                                params,
                                captures: Vec::new(),
                                is_user_function: false,
                                user_function_name: String::new(),
                            },
                        );
                    }
                    _ => {
                        // Buffer index is assigned during code generation
                        self.symbols.define_variable(&name, 0xFFFF);
                    }
                }
            }
            NodeKind::FunctionDef => {
                if let NodeData::FunctionDef { name, param_count } = &n.data {
                    let mut params = Vec::new();
                    let mut body = NULL_NODE;
                    for (i, child) in self.input.arena.children(node).enumerate() {
                        if i < *param_count {
                            let child_node = self.in_node(child);
                            params.push(FunctionParamInfo {
                                name: child_node.name().unwrap_or("").to_string(),
                                default_value: match child_node.data {
                                    NodeData::ClosureParam { default_value, .. } => default_value,
                                    _ => None,
                                },
                            });
                        } else {
                            body = child;
                        }
                    }
                    self.symbols.define_function(UserFunctionInfo {
                        name: name.clone(),
                        params,
                        body_node: body,
                        def_node: node,
                    });
                }
            }
            _ => {}
        }

        let mut child = n.first_child;
        while child != NULL_NODE {
            self.collect_definitions(child);
            child = self.in_node(child).next_sibling;
        }
    }

    fn subtree_has_sample_atom(&self, node: NodeIndex) -> bool {
        if node == NULL_NODE {
            return false;
        }
        let n = self.in_node(node);
        if let NodeData::MiniAtom { kind, .. } = &n.data {
            if *kind == MiniAtomKind::Sample {
                return true;
            }
        }
        self.input
            .arena
            .children(node)
            .any(|child| self.subtree_has_sample_atom(child))
    }

    /// Parameter list of a Closure node (the identifier-shaped children
    /// before the body).
    fn closure_params(&self, closure: NodeIndex) -> Vec<FunctionParamInfo> {
        let mut params = Vec::new();
        for child in self.input.arena.children(closure) {
            let child_node = self.in_node(child);
            if child_node.kind != NodeKind::Identifier {
                break;
            }
            match &child_node.data {
                NodeData::Ident(name) => params.push(FunctionParamInfo {
                    name: name.clone(),
                    default_value: None,
                }),
                NodeData::ClosureParam {
                    name,
                    default_value,
                } => params.push(FunctionParamInfo {
                    name: name.clone(),
                    default_value: *default_value,
                }),
                _ => break,
            }
        }
        params
    }

    // ------------------------------------------------------------------
    // Pass 2: pipe rewriting
    // ------------------------------------------------------------------

    fn rewrite_pipes(&mut self, node: NodeIndex) -> NodeIndex {
        if node == NULL_NODE {
            return NULL_NODE;
        }

        let n = self.in_node(node);

        if n.kind == NodeKind::Pipe {
            let lhs_idx = n.first_child;
            let rhs_idx = if lhs_idx != NULL_NODE {
                self.in_node(lhs_idx).next_sibling
            } else {
                NULL_NODE
            };

            if lhs_idx == NULL_NODE || rhs_idx == NULL_NODE {
                self.error("E002", "Invalid pipe expression", n.location);
                return NULL_NODE;
            }

            // LHS first: it may itself contain pipes
            let new_lhs = self.rewrite_pipes(lhs_idx);

            // a |> f(%)  =>  f(a); the pipe node disappears
            return self.substitute_holes(rhs_idx, new_lhs);
        }

        self.clone_subtree(node)
    }

    fn clone_node(&mut self, src_idx: NodeIndex) -> NodeIndex {
        let src = self.in_node(src_idx);
        let dst_idx = self.output.alloc(src.kind, src.location);
        self.output[dst_idx].data = src.data.clone();
        self.node_map.insert(src_idx, dst_idx);
        dst_idx
    }

    fn clone_subtree(&mut self, src_idx: NodeIndex) -> NodeIndex {
        if src_idx == NULL_NODE {
            return NULL_NODE;
        }

        if let Some(dst) = self.node_map.get(&src_idx) {
            return *dst;
        }

        let src = self.in_node(src_idx);
        if src.kind == NodeKind::Pipe {
            return self.rewrite_pipes(src_idx);
        }

        let dst_idx = self.clone_node(src_idx);

        let mut src_child = src.first_child;
        let mut prev_dst_child = NULL_NODE;
        while src_child != NULL_NODE {
            let dst_child = self.clone_subtree(src_child);
            if dst_child != NULL_NODE {
                if prev_dst_child == NULL_NODE {
                    self.output[dst_idx].first_child = dst_child;
                } else {
                    self.output[prev_dst_child].next_sibling = dst_child;
                }
                prev_dst_child = dst_child;
            }
            src_child = self.in_node(src_child).next_sibling;
        }

        dst_idx
    }

    /// Clone `node` into the output arena with every hole replaced by
    /// `replacement` (an output-arena index). Multiple holes share the
    /// same replacement node.
    fn substitute_holes(&mut self, node: NodeIndex, replacement: NodeIndex) -> NodeIndex {
        if node == NULL_NODE {
            return NULL_NODE;
        }

        let n = self.in_node(node);

        if n.kind == NodeKind::Hole {
            return replacement;
        }

        if n.kind == NodeKind::Pipe {
            // Nested pipe in the RHS: its LHS sees the outer replacement,
            // its RHS sees the rewritten inner LHS
            let src_lhs = n.first_child;
            let src_rhs = if src_lhs != NULL_NODE {
                self.in_node(src_lhs).next_sibling
            } else {
                NULL_NODE
            };

            let new_lhs = self.substitute_holes(src_lhs, replacement);
            return self.substitute_holes(src_rhs, new_lhs);
        }

        let new_node = self.clone_node(node);

        let mut src_child = n.first_child;
        let mut prev_dst_child = NULL_NODE;
        while src_child != NULL_NODE {
            let dst_child = self.substitute_holes(src_child, replacement);
            if dst_child != NULL_NODE {
                if prev_dst_child == NULL_NODE {
                    self.output[new_node].first_child = dst_child;
                } else {
                    self.output[prev_dst_child].next_sibling = dst_child;
                }
                prev_dst_child = dst_child;
            }
            src_child = self.in_node(src_child).next_sibling;
        }

        new_node
    }

    // ------------------------------------------------------------------
    // Pass 3: resolve and validate (walks the output arena)
    // ------------------------------------------------------------------

    fn resolve_and_validate(&mut self, node: NodeIndex) {
        if node == NULL_NODE {
            return;
        }

        let (kind, location, data, first_child) = {
            let n = &self.output[node];
            (n.kind, n.location, n.data.clone(), n.first_child)
        };

        match kind {
            NodeKind::Hole => {
                self.error("E003", "Hole '%' used outside of pipe expression", location);
            }

            NodeKind::Call => {
                if let NodeData::Ident(func_name) = &data {
                    self.validate_call(func_name, node, location);
                }
                self.validate_argument_order(node);
            }

            NodeKind::Identifier => {
                // Closure parameter nodes are handled by their closure
                if let NodeData::Ident(name) = &data {
                    if self.symbols.lookup(name).is_none() {
                        self.error(
                            "E005",
                            &format!("Undefined identifier: '{}'", name),
                            location,
                        );
                    }
                }
            }

            NodeKind::Closure => {
                self.validate_closure(node);
                return; // validate_closure recurses itself
            }

            NodeKind::FunctionDef => {
                self.validate_function_def(node, &data);
                return;
            }

            NodeKind::MiniLiteral => {
                // Child 0 is the parsed pattern; an optional closure
                // follows and gets (trigger, velocity, pitch) bound
                let mut child = first_child;
                while child != NULL_NODE {
                    if self.output[child].kind == NodeKind::Closure {
                        self.validate_closure(child);
                    }
                    child = self.output[child].next_sibling;
                }
                return;
            }

            _ => {}
        }

        let mut child = first_child;
        while child != NULL_NODE {
            self.resolve_and_validate(child);
            child = self.output[child].next_sibling;
        }
    }

    /// Resolve a callee name: E004 when unknown, arity window when builtin
    fn validate_call(&mut self, func_name: &str, node: NodeIndex, location: SourceLocation) {
        let resolved: Option<Option<BuiltinInfo>> = self.symbols.lookup(func_name).map(|symbol| {
            if symbol.kind == SymbolKind::Builtin {
                match &symbol.data {
                    SymbolData::Builtin(info) => Some(*info),
                    _ => None,
                }
            } else {
                None
            }
        });

        match resolved {
            None => {
                self.error(
                    "E004",
                    &format!("Unknown function: '{}'", func_name),
                    location,
                );
            }
            Some(Some(builtin)) => {
                let arg_count = self.output.child_count(node);
                self.validate_arity(func_name, &builtin, arg_count, location);
            }
            Some(None) => {}
        }
    }

    fn validate_arity(
        &mut self,
        func_name: &str,
        builtin: &BuiltinInfo,
        arg_count: usize,
        location: SourceLocation,
    ) {
        let min_args = builtin.input_count as usize;
        let max_args = builtin.total_params();

        if arg_count < min_args {
            self.error(
                "E006",
                &format!(
                    "Function '{}' expects at least {} argument(s), got {}",
                    func_name, min_args, arg_count
                ),
                location,
            );
        } else if arg_count > max_args {
            self.error(
                "E007",
                &format!(
                    "Function '{}' expects at most {} argument(s), got {}",
                    func_name, max_args, arg_count
                ),
                location,
            );
        }
    }

    /// Positional arguments must precede the first named argument
    fn validate_argument_order(&mut self, call: NodeIndex) {
        let mut seen_named = false;
        let mut child = self.output[call].first_child;
        while child != NULL_NODE {
            let arg = &self.output[child];
            if arg.kind == NodeKind::Argument {
                match &arg.data {
                    NodeData::Argument { name: Some(_) } => seen_named = true,
                    NodeData::Argument { name: None } if seen_named => {
                        let location = arg.location;
                        self.error(
                            "E009",
                            "Positional argument cannot follow a named argument",
                            location,
                        );
                        return;
                    }
                    _ => {}
                }
            }
            child = self.output[child].next_sibling;
        }
    }

    fn validate_function_def(&mut self, node: NodeIndex, data: &NodeData) {
        let param_count = match data {
            NodeData::FunctionDef { param_count, .. } => *param_count,
            _ => 0,
        };

        let mut params = HashSet::new();
        let mut body = NULL_NODE;
        let children: Vec<_> = self.output.children(node).collect();
        for (i, child) in children.iter().enumerate() {
            if i < param_count {
                if let Some(name) = self.output[*child].name() {
                    params.insert(name.to_string());
                }
            } else {
                body = *child;
            }
        }

        if body != NULL_NODE {
            self.validate_closure_body(body, &params);
        }
    }

    /// Validate a closure: its body may only reference its parameters,
    /// locals assigned inside the body, builtins, user functions, and
    /// pattern/array/function-value globals. Plain variable captures are
    /// errors (E008).
    fn validate_closure(&mut self, closure: NodeIndex) {
        let mut params = HashSet::new();
        let mut body = NULL_NODE;

        for child in self.output.children(closure).collect::<Vec<_>>() {
            let child_node = &self.output[child];
            if child_node.kind == NodeKind::Identifier {
                match &child_node.data {
                    NodeData::Ident(name) => {
                        params.insert(name.clone());
                        continue;
                    }
                    NodeData::ClosureParam { name, .. } => {
                        params.insert(name.clone());
                        continue;
                    }
                    _ => {}
                }
            }
            body = child;
            break;
        }

        if body != NULL_NODE {
            self.validate_closure_body(body, &params);
        }
    }

    fn validate_closure_body(&mut self, body: NodeIndex, params: &HashSet<String>) {
        // Locals assigned anywhere in the body are legal references
        let mut allowed = params.clone();
        self.collect_output_assignments(body, &mut allowed);
        self.check_captures(body, &mut allowed);
    }

    fn collect_output_assignments(&self, node: NodeIndex, names: &mut HashSet<String>) {
        if node == NULL_NODE {
            return;
        }
        let n = &self.output[node];
        if n.kind == NodeKind::Assignment {
            if let NodeData::Ident(name) = &n.data {
                names.insert(name.clone());
            }
        }
        let mut child = n.first_child;
        while child != NULL_NODE {
            self.collect_output_assignments(child, names);
            child = self.output[child].next_sibling;
        }
    }

    fn check_captures(&mut self, node: NodeIndex, allowed: &mut HashSet<String>) {
        if node == NULL_NODE {
            return;
        }

        let (kind, location, data, first_child) = {
            let n = &self.output[node];
            (n.kind, n.location, n.data.clone(), n.first_child)
        };

        match kind {
            NodeKind::Identifier => {
                if let NodeData::Ident(name) = &data {
                    if !allowed.contains(name) {
                        let kind = self.symbols.lookup(name).map(|s| s.kind);
                        match kind {
                            None => {
                                self.error(
                                    "E005",
                                    &format!("Undefined identifier: '{}'", name),
                                    location,
                                );
                            }
                            Some(SymbolKind::Variable) | Some(SymbolKind::Parameter) => {
                                self.error(
                                    "E008",
                                    &format!(
                                        "Closure cannot capture variable '{}'; only parameters, builtins and pattern/array globals may be referenced",
                                        name
                                    ),
                                    location,
                                );
                            }
                            _ => {}
                        }
                    }
                }
            }

            NodeKind::Call => {
                if let NodeData::Ident(func_name) = &data {
                    self.validate_call(func_name, node, location);
                }
                self.validate_argument_order(node);
            }

            NodeKind::Closure => {
                // Nested closures extend the allowed set with their params
                let mut inner = allowed.clone();
                let mut body = NULL_NODE;
                for child in self.output.children(node).collect::<Vec<_>>() {
                    let child_node = &self.output[child];
                    if child_node.kind == NodeKind::Identifier {
                        if let Some(name) = child_node.name() {
                            inner.insert(name.to_string());
                            continue;
                        }
                    }
                    body = child;
                    break;
                }
                if body != NULL_NODE {
                    self.collect_output_assignments(body, &mut inner);
                    self.check_captures(body, &mut inner);
                }
                return;
            }

            NodeKind::Hole => {
                self.error("E003", "Hole '%' used outside of pipe expression", location);
            }

            _ => {}
        }

        let mut child = first_child;
        while child != NULL_NODE {
            self.check_captures(child, allowed);
            child = self.output[child].next_sibling;
        }
    }

    // ------------------------------------------------------------------

    fn error(&mut self, code: &str, message: &str, location: SourceLocation) {
        self.diagnostics.push(Diagnostic::error(
            code,
            message,
            &self.filename,
            location,
        ));
    }

    fn warning(&mut self, code: &str, message: &str, location: SourceLocation) {
        self.diagnostics.push(Diagnostic::warning(
            code,
            message,
            &self.filename,
            location,
        ));
    }
}

/// Run semantic analysis over a parsed AST
pub fn analyze(ast: &Ast, filename: &str) -> AnalysisResult {
    SemanticAnalyzer::new(ast, filename).analyze()
}
