//! User-defined function and match-expression code generation
//!
//! User functions have no runtime representation: every call site inlines
//! the body with parameters bound to argument buffers. Arguments are
//! visited in the caller's scope first, so nested calls like
//! `double(double(x))` resolve correctly. `match` is resolved entirely at
//! compile time: only the matching arm's body is emitted.

use crate::ast::{Node, NodeData, NodeIndex, NodeKind, NULL_NODE};
use crate::codegen::CodeGenerator;
use crate::instruction::{fnv1a_hash, BUFFER_UNUSED};
use crate::symbol_table::{FunctionRef, UserFunctionInfo};

impl<'a> CodeGenerator<'a> {
    /// Inline-expand a user function at its call site
    pub(crate) fn handle_user_function_call(
        &mut self,
        node: NodeIndex,
        n: &'a Node,
        func: &UserFunctionInfo,
    ) -> u16 {
        let args = self.call_arg_values(node);

        // Literal arguments become visible to match scrutinees inside the body
        let saved_param_literals = std::mem::take(&mut self.param_literals);

        // Arguments evaluate in the caller's scope, before the parameter
        // scope exists
        let mut param_bufs = Vec::with_capacity(func.params.len());
        for (i, param) in func.params.iter().enumerate() {
            let param_buf = if i < args.len() {
                let arg_node = self.node(args[i]);
                if matches!(
                    arg_node.kind,
                    NodeKind::StringLit | NodeKind::NumberLit | NodeKind::BoolLit
                ) {
                    self.param_literals.insert(fnv1a_hash(&param.name), args[i]);
                }
                self.visit(args[i])
            } else if let Some(default) = param.default_value {
                let buf = self.emit_const(default as f32, n.location);
                if buf == BUFFER_UNUSED {
                    self.param_literals = saved_param_literals;
                    return BUFFER_UNUSED;
                }
                buf
            } else {
                self.error(
                    "E105",
                    &format!("Missing required argument for parameter '{}'", param.name),
                    n.location,
                );
                self.param_literals = saved_param_literals;
                return BUFFER_UNUSED;
            };
            param_bufs.push(param_buf);
        }

        self.symbols.push_scope();
        for (param, buf) in func.params.iter().zip(&param_bufs) {
            self.symbols.define_variable(&param.name, *buf);
        }

        // Function bodies are shared AST nodes visited once per call site
        // with different bindings, so the memo map is swapped out
        let saved_node_buffers = std::mem::take(&mut self.node_buffers);

        let result = if func.body_node != NULL_NODE {
            self.visit(func.body_node)
        } else {
            BUFFER_UNUSED
        };

        for (k, v) in saved_node_buffers {
            self.node_buffers.entry(k).or_insert(v);
        }

        self.symbols.pop_scope();
        self.param_literals = saved_param_literals;

        self.node_buffers.insert(node, result);
        result
    }

    /// Call through a function value (lambda bound to an identifier)
    pub(crate) fn handle_function_ref_call(
        &mut self,
        node: NodeIndex,
        n: &'a Node,
        func_ref: &FunctionRef,
    ) -> u16 {
        let args = self.call_arg_values(node);

        let mut param_bufs = Vec::with_capacity(func_ref.params.len());
        for (i, param) in func_ref.params.iter().enumerate() {
            let param_buf = if i < args.len() {
                self.visit(args[i])
            } else if let Some(default) = param.default_value {
                let buf = self.emit_const(default as f32, n.location);
                if buf == BUFFER_UNUSED {
                    return BUFFER_UNUSED;
                }
                buf
            } else {
                self.error(
                    "E105",
                    &format!("Missing required argument for parameter '{}'", param.name),
                    n.location,
                );
                return BUFFER_UNUSED;
            };
            param_bufs.push(param_buf);
        }

        self.symbols.push_scope();
        for capture in &func_ref.captures {
            self.symbols
                .define_variable(&capture.name, capture.buffer_index);
        }
        for (param, buf) in func_ref.params.iter().zip(&param_bufs) {
            self.symbols.define_variable(&param.name, *buf);
        }

        let saved_node_buffers = std::mem::take(&mut self.node_buffers);

        let body = if func_ref.is_user_function {
            func_ref.closure_node
        } else {
            self.closure_body(func_ref.closure_node)
        };
        let result = if body != NULL_NODE {
            self.visit(body)
        } else {
            BUFFER_UNUSED
        };

        for (k, v) in saved_node_buffers {
            self.node_buffers.entry(k).or_insert(v);
        }

        self.symbols.pop_scope();

        self.node_buffers.insert(node, result);
        result
    }

    /// Closure used directly as an expression: allocate parameter buffers,
    /// bind them, and emit the body in place.
    pub(crate) fn handle_closure(&mut self, node: NodeIndex, n: &'a Node) -> u16 {
        let (param_names, body) = self.closure_parts(node);

        if body == NULL_NODE {
            self.error("E112", "Closure has no body", n.location);
            return BUFFER_UNUSED;
        }

        for param in &param_names {
            let param_buf = self.buffers.allocate();
            if param_buf == BUFFER_UNUSED {
                self.error("E101", "Buffer pool exhausted", n.location);
                return BUFFER_UNUSED;
            }
            self.symbols.define_variable(param, param_buf);
        }

        let body_buf = self.visit(body);
        self.node_buffers.insert(node, body_buf);
        body_buf
    }

    /// Compile-time match: the scrutinee (or the literal argument bound to
    /// it) selects exactly one arm body; nothing else is emitted.
    pub(crate) fn handle_match_expr(&mut self, node: NodeIndex, n: &'a Node) -> u16 {
        let scrutinee = n.first_child;
        if scrutinee == NULL_NODE {
            self.error("E120", "Match expression has no scrutinee", n.location);
            return BUFFER_UNUSED;
        }

        // An identifier scrutinee may be a parameter bound to a literal at
        // this call site; substitute it for value matching
        let mut scrutinee_node = self.node(scrutinee);
        if scrutinee_node.kind == NodeKind::Identifier {
            if let Some(name) = scrutinee_node.name() {
                if let Some(literal) = self.param_literals.get(&fnv1a_hash(name)) {
                    scrutinee_node = self.node(*literal);
                }
            }
        }

        let Some(scrutinee_key) = literal_key(scrutinee_node) else {
            self.error(
                "E120",
                "Match scrutinee must be a compile-time literal",
                scrutinee_node.location,
            );
            return BUFFER_UNUSED;
        };

        let mut arm = self.node(scrutinee).next_sibling;
        let mut default_body = NULL_NODE;

        while arm != NULL_NODE {
            let arm_node = self.node(arm);
            if arm_node.kind == NodeKind::MatchArm {
                let is_wildcard = matches!(arm_node.data, NodeData::MatchArm { is_wildcard: true });

                if is_wildcard {
                    default_body = arm_node.first_child;
                } else {
                    let pattern = arm_node.first_child;
                    let body = if pattern != NULL_NODE {
                        self.node(pattern).next_sibling
                    } else {
                        NULL_NODE
                    };

                    if pattern != NULL_NODE {
                        if let Some(pattern_key) = literal_key(self.node(pattern)) {
                            if pattern_key == scrutinee_key && body != NULL_NODE {
                                let result = self.visit(body);
                                self.node_buffers.insert(node, result);
                                return result;
                            }
                        }
                    }
                }
            }
            arm = self.node(arm).next_sibling;
        }

        if default_body != NULL_NODE {
            let result = self.visit(default_body);
            self.node_buffers.insert(node, result);
            return result;
        }

        self.error("E121", "No matching pattern in match expression", n.location);
        BUFFER_UNUSED
    }

    /// Split a Closure node into (parameter names, body index)
    pub(crate) fn closure_parts(&self, closure: NodeIndex) -> (Vec<String>, NodeIndex) {
        let mut params = Vec::new();
        let mut body = NULL_NODE;

        let mut child = self.node(closure).first_child;
        while child != NULL_NODE {
            let child_node = self.node(child);
            if child_node.kind == NodeKind::Identifier {
                if let Some(name) = child_node.name() {
                    params.push(name.to_string());
                    child = child_node.next_sibling;
                    continue;
                }
            }
            body = child;
            break;
        }

        (params, body)
    }

    pub(crate) fn closure_body(&self, closure: NodeIndex) -> NodeIndex {
        self.closure_parts(closure).1
    }
}

/// Scrutinee/pattern key for compile-time match: `s:`, `n:` or `b:` prefix
fn literal_key(node: &Node) -> Option<String> {
    match (&node.kind, &node.data) {
        (NodeKind::StringLit, NodeData::Str(s)) => Some(format!("s:{}", s)),
        (NodeKind::NumberLit, NodeData::Number { value, .. }) => Some(format!("n:{}", value)),
        (NodeKind::BoolLit, NodeData::Bool(b)) => Some(format!("b:{}", *b as u8)),
        _ => None,
    }
}
