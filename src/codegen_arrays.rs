//! Array higher-order combinators
//!
//! `map`, `sum`, `fold` and friends are compile-time lowerings over the
//! multi-buffer map, not runtime constructs: each parallel voice gets its
//! own instruction stream, with per-element path segments (`elemI`,
//! `stepI`) so every voice owns distinct state IDs.

use crate::ast::{Node, NodeData, NodeIndex, NodeKind, NULL_NODE};
use crate::codegen::CodeGenerator;
use crate::diagnostics::SourceLocation;
use crate::instruction::{Instruction, Opcode, BUFFER_UNUSED};
use crate::symbol_table::{FunctionParamInfo, FunctionRef, SymbolData};

impl<'a> CodeGenerator<'a> {
    /// Exactly `count` argument value nodes, or None on arity mismatch
    fn exact_args(&self, call: NodeIndex, count: usize) -> Option<Vec<NodeIndex>> {
        let args = self.call_arg_values(call);
        if args.len() == count && args.iter().all(|a| *a != NULL_NODE) {
            Some(args)
        } else {
            None
        }
    }

    /// Resolve a function-shaped argument: an inline closure, a lambda
    /// bound to a variable, or a user function name.
    fn resolve_function_arg(&self, func_node: NodeIndex) -> Option<FunctionRef> {
        let n = self.node(func_node);

        if n.kind == NodeKind::Closure {
            let mut params = Vec::new();
            let mut child = n.first_child;
            while child != NULL_NODE {
                let child_node = self.node(child);
                if child_node.kind == NodeKind::Identifier {
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
                    child = child_node.next_sibling;
                    continue;
                }
                break;
            }
            return Some(FunctionRef {
                closure_node: func_node,
                params,
                captures: Vec::new(),
                is_user_function: false,
                user_function_name: String::new(),
            });
        }

        if n.kind == NodeKind::Identifier {
            let name = n.name()?;
            let symbol = self.symbols.lookup(name)?;
            match &symbol.data {
                SymbolData::FunctionValue(func_ref) => return Some(func_ref.clone()),
                SymbolData::UserFunction(info) => {
                    return Some(FunctionRef {
                        closure_node: info.body_node,
                        params: info.params.clone(),
                        captures: Vec::new(),
                        is_user_function: true,
                        user_function_name: info.name.clone(),
                    });
                }
                _ => {}
            }
        }

        None
    }

    /// Apply a unary function ref to one buffer, inlining its body
    fn apply_function_ref(
        &mut self,
        func_ref: &FunctionRef,
        arg_buf: u16,
        location: SourceLocation,
    ) -> u16 {
        if func_ref.params.is_empty() {
            self.error("E132", "Function must have at least one parameter", location);
            return BUFFER_UNUSED;
        }

        self.symbols.push_scope();
        for capture in &func_ref.captures {
            self.symbols
                .define_variable(&capture.name, capture.buffer_index);
        }
        self.symbols
            .define_variable(&func_ref.params[0].name, arg_buf);

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

        self.node_buffers = saved_node_buffers;
        self.symbols.pop_scope();

        result
    }

    /// Apply a binary function ref to two buffers
    fn apply_binary_function_ref(
        &mut self,
        func_ref: &FunctionRef,
        arg_buf1: u16,
        arg_buf2: u16,
        location: SourceLocation,
    ) -> u16 {
        if func_ref.params.len() < 2 {
            self.error(
                "E140",
                "Binary function must have at least two parameters",
                location,
            );
            return BUFFER_UNUSED;
        }

        self.symbols.push_scope();
        for capture in &func_ref.captures {
            self.symbols
                .define_variable(&capture.name, capture.buffer_index);
        }
        self.symbols
            .define_variable(&func_ref.params[0].name, arg_buf1);
        self.symbols
            .define_variable(&func_ref.params[1].name, arg_buf2);

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

        self.node_buffers = saved_node_buffers;
        self.symbols.pop_scope();

        result
    }

    /// Register the result list: empty -> zero constant, one -> plain
    /// buffer, many -> multi-buffer.
    fn finalize_multi(
        &mut self,
        node: NodeIndex,
        result_buffers: Vec<u16>,
        location: SourceLocation,
    ) -> u16 {
        if result_buffers.is_empty() {
            let zero = self.emit_const(0.0, location);
            self.node_buffers.insert(node, zero);
            return zero;
        }
        if result_buffers.len() == 1 {
            self.node_buffers.insert(node, result_buffers[0]);
            return result_buffers[0];
        }
        let first = self.register_multi_buffer(node, result_buffers);
        self.node_buffers.insert(node, first);
        first
    }

    // map(array, fn)
    pub(crate) fn handle_map_call(&mut self, node: NodeIndex, n: &'a Node) -> u16 {
        let Some(args) = self.exact_args(node, 2) else {
            self.error("E133", "map() requires 2 arguments: map(array, fn)", n.location);
            return BUFFER_UNUSED;
        };

        let Some(func_ref) = self.resolve_function_arg(args[1]) else {
            self.error("E130", "map() second argument must be a function", n.location);
            return BUFFER_UNUSED;
        };

        let array_buf = self.visit(args[0]);
        let map_count = self.next_call_count("map");

        if !self.is_multi_buffer(args[0]) {
            self.push_path(&format!("map#{}", map_count));
            self.push_path("elem0");
            let result = self.apply_function_ref(&func_ref, array_buf, n.location);
            self.pop_path();
            self.pop_path();
            self.node_buffers.insert(node, result);
            return result;
        }

        let element_buffers = self.get_multi_buffers(args[0]);
        let mut result_buffers = Vec::with_capacity(element_buffers.len());

        self.push_path(&format!("map#{}", map_count));
        for (i, elem_buf) in element_buffers.iter().enumerate() {
            self.push_path(&format!("elem{}", i));
            result_buffers.push(self.apply_function_ref(&func_ref, *elem_buf, n.location));
            self.pop_path();
        }
        self.pop_path();

        self.finalize_multi(node, result_buffers, n.location)
    }

    // sum(array): chained ADDs, left to right
    pub(crate) fn handle_sum_call(&mut self, node: NodeIndex, n: &'a Node) -> u16 {
        let Some(args) = self.exact_args(node, 1) else {
            self.error("E134", "sum() requires 1 argument: sum(array)", n.location);
            return BUFFER_UNUSED;
        };

        let array_buf = self.visit(args[0]);

        if !self.is_multi_buffer(args[0]) {
            self.node_buffers.insert(node, array_buf);
            return array_buf;
        }

        let buffers = self.get_multi_buffers(args[0]);
        let mut result = buffers[0];
        for buf in &buffers[1..] {
            let sum_buf = self.buffers.allocate();
            if sum_buf == BUFFER_UNUSED {
                self.error("E101", "Buffer pool exhausted", n.location);
                return BUFFER_UNUSED;
            }
            self.emit(Instruction::binary(Opcode::Add, sum_buf, result, *buf));
            result = sum_buf;
        }

        self.node_buffers.insert(node, result);
        result
    }

    // fold(array, fn, init)
    pub(crate) fn handle_fold_call(&mut self, node: NodeIndex, n: &'a Node) -> u16 {
        let Some(args) = self.exact_args(node, 3) else {
            self.error(
                "E142",
                "fold() requires 3 arguments: fold(array, fn, init)",
                n.location,
            );
            return BUFFER_UNUSED;
        };

        let Some(func_ref) = self.resolve_function_arg(args[1]) else {
            self.error(
                "E143",
                "fold() second argument must be a binary function",
                n.location,
            );
            return BUFFER_UNUSED;
        };

        let array_buf = self.visit(args[0]);
        let init_buf = self.visit(args[2]);

        let buffers = if self.is_multi_buffer(args[0]) {
            self.get_multi_buffers(args[0])
        } else {
            vec![array_buf]
        };

        if buffers.is_empty() {
            self.node_buffers.insert(node, init_buf);
            return init_buf;
        }

        let fold_count = self.next_call_count("fold");
        self.push_path(&format!("fold#{}", fold_count));
        let mut result = init_buf;
        for (i, buf) in buffers.iter().enumerate() {
            self.push_path(&format!("step{}", i));
            result = self.apply_binary_function_ref(&func_ref, result, *buf, n.location);
            self.pop_path();
        }
        self.pop_path();

        self.node_buffers.insert(node, result);
        result
    }

    // zipWith(a, b, fn): pairwise to min(|a|, |b|)
    pub(crate) fn handle_zip_with_call(&mut self, node: NodeIndex, n: &'a Node) -> u16 {
        let Some(args) = self.exact_args(node, 3) else {
            self.error(
                "E144",
                "zipWith() requires 3 arguments: zipWith(a, b, fn)",
                n.location,
            );
            return BUFFER_UNUSED;
        };

        let Some(func_ref) = self.resolve_function_arg(args[2]) else {
            self.error(
                "E145",
                "zipWith() third argument must be a binary function",
                n.location,
            );
            return BUFFER_UNUSED;
        };

        let buf_a = self.visit(args[0]);
        let buf_b = self.visit(args[1]);

        let buffers_a = if self.is_multi_buffer(args[0]) {
            self.get_multi_buffers(args[0])
        } else {
            vec![buf_a]
        };
        let buffers_b = if self.is_multi_buffer(args[1]) {
            self.get_multi_buffers(args[1])
        } else {
            vec![buf_b]
        };

        let len = buffers_a.len().min(buffers_b.len());
        if len == 0 {
            let zero = self.emit_const(0.0, n.location);
            self.node_buffers.insert(node, zero);
            return zero;
        }

        let zip_count = self.next_call_count("zipWith");
        self.push_path(&format!("zipWith#{}", zip_count));
        let mut result_buffers = Vec::with_capacity(len);
        for i in 0..len {
            self.push_path(&format!("elem{}", i));
            result_buffers.push(self.apply_binary_function_ref(
                &func_ref,
                buffers_a[i],
                buffers_b[i],
                n.location,
            ));
            self.pop_path();
        }
        self.pop_path();

        self.finalize_multi(node, result_buffers, n.location)
    }

    // zip(a, b): interleave to min length
    pub(crate) fn handle_zip_call(&mut self, node: NodeIndex, n: &'a Node) -> u16 {
        let Some(args) = self.exact_args(node, 2) else {
            self.error("E146", "zip() requires 2 arguments: zip(a, b)", n.location);
            return BUFFER_UNUSED;
        };

        let buf_a = self.visit(args[0]);
        let buf_b = self.visit(args[1]);

        let buffers_a = if self.is_multi_buffer(args[0]) {
            self.get_multi_buffers(args[0])
        } else {
            vec![buf_a]
        };
        let buffers_b = if self.is_multi_buffer(args[1]) {
            self.get_multi_buffers(args[1])
        } else {
            vec![buf_b]
        };

        let len = buffers_a.len().min(buffers_b.len());
        let mut result_buffers = Vec::with_capacity(len * 2);
        for i in 0..len {
            result_buffers.push(buffers_a[i]);
            result_buffers.push(buffers_b[i]);
        }

        self.finalize_multi(node, result_buffers, n.location)
    }

    // take(n, array)
    pub(crate) fn handle_take_call(&mut self, node: NodeIndex, n: &'a Node) -> u16 {
        let Some(args) = self.exact_args(node, 2) else {
            self.error("E147", "take() requires 2 arguments: take(n, array)", n.location);
            return BUFFER_UNUSED;
        };

        let Some(count) = self.literal_arg(&args, 0) else {
            self.error(
                "E148",
                "take() first argument must be a number literal",
                n.location,
            );
            return BUFFER_UNUSED;
        };

        let array_buf = self.visit(args[1]);
        let buffers = if self.is_multi_buffer(args[1]) {
            self.get_multi_buffers(args[1])
        } else {
            vec![array_buf]
        };

        let count = (count as usize).min(buffers.len());
        self.finalize_multi(node, buffers[..count].to_vec(), n.location)
    }

    // drop(n, array)
    pub(crate) fn handle_drop_call(&mut self, node: NodeIndex, n: &'a Node) -> u16 {
        let Some(args) = self.exact_args(node, 2) else {
            self.error("E149", "drop() requires 2 arguments: drop(n, array)", n.location);
            return BUFFER_UNUSED;
        };

        let Some(count) = self.literal_arg(&args, 0) else {
            self.error(
                "E150",
                "drop() first argument must be a number literal",
                n.location,
            );
            return BUFFER_UNUSED;
        };

        let array_buf = self.visit(args[1]);
        let buffers = if self.is_multi_buffer(args[1]) {
            self.get_multi_buffers(args[1])
        } else {
            vec![array_buf]
        };

        let count = (count as usize).min(buffers.len());
        self.finalize_multi(node, buffers[count..].to_vec(), n.location)
    }

    // reverse(array)
    pub(crate) fn handle_reverse_call(&mut self, node: NodeIndex, n: &'a Node) -> u16 {
        let Some(args) = self.exact_args(node, 1) else {
            self.error("E151", "reverse() requires 1 argument: reverse(array)", n.location);
            return BUFFER_UNUSED;
        };

        let array_buf = self.visit(args[0]);

        if !self.is_multi_buffer(args[0]) {
            self.node_buffers.insert(node, array_buf);
            return array_buf;
        }

        let mut buffers = self.get_multi_buffers(args[0]);
        buffers.reverse();

        let first = self.register_multi_buffer(node, buffers);
        self.node_buffers.insert(node, first);
        first
    }

    // range(start, end): one PUSH_CONST per integer, end exclusive
    pub(crate) fn handle_range_call(&mut self, node: NodeIndex, n: &'a Node) -> u16 {
        let Some(args) = self.exact_args(node, 2) else {
            self.error(
                "E152",
                "range() requires 2 arguments: range(start, end)",
                n.location,
            );
            return BUFFER_UNUSED;
        };

        let (Some(start), Some(end)) = (self.literal_arg(&args, 0), self.literal_arg(&args, 1))
        else {
            self.error("E153", "range() arguments must be number literals", n.location);
            return BUFFER_UNUSED;
        };

        let start = start as i32;
        let end = end as i32;
        let step = if start <= end { 1 } else { -1 };

        let mut result_buffers = Vec::new();
        let mut i = start;
        while i != end {
            let buf = self.emit_const(i as f32, n.location);
            if buf == BUFFER_UNUSED {
                return BUFFER_UNUSED;
            }
            result_buffers.push(buf);
            i += step;
        }

        self.finalize_multi(node, result_buffers, n.location)
    }

    // repeat(value, n): the same buffer replicated n times
    pub(crate) fn handle_repeat_call(&mut self, node: NodeIndex, n: &'a Node) -> u16 {
        let Some(args) = self.exact_args(node, 2) else {
            self.error(
                "E154",
                "repeat() requires 2 arguments: repeat(value, n)",
                n.location,
            );
            return BUFFER_UNUSED;
        };

        let Some(count) = self.literal_arg(&args, 1) else {
            self.error(
                "E155",
                "repeat() second argument must be a number literal",
                n.location,
            );
            return BUFFER_UNUSED;
        };

        let count = count as usize;
        let value_buf = self.visit(args[0]);

        if count == 0 {
            let zero = self.emit_const(0.0, n.location);
            self.node_buffers.insert(node, zero);
            return zero;
        }
        if count == 1 {
            self.node_buffers.insert(node, value_buf);
            return value_buf;
        }

        let first = self.register_multi_buffer(node, vec![value_buf; count]);
        self.node_buffers.insert(node, first);
        first
    }

    // len(array): element count as a constant
    pub(crate) fn handle_len_call(&mut self, node: NodeIndex, n: &'a Node) -> u16 {
        let Some(args) = self.exact_args(node, 1) else {
            self.error("E141", "len() requires 1 argument: len(array)", n.location);
            return BUFFER_UNUSED;
        };

        self.visit(args[0]);
        let count = self.get_multi_buffers(args[0]).len().max(1);

        let out = self.emit_const(count as f32, n.location);
        self.node_buffers.insert(node, out);
        out
    }
}
