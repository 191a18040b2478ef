//! UI parameter exposure: param(), button(), toggle(), dropdown()
//!
//! Each call emits an ENV_GET keyed by the FNV-1a hash of the parameter
//! name, wired to a compile-time fallback constant (the declared default),
//! and records a declaration so the host can auto-generate controls.

use crate::ast::{Node, NodeData, NodeIndex, NULL_NODE};
use crate::codegen::{CodeGenerator, ParamDecl, ParamWidget};
use crate::instruction::{fnv1a_hash, Instruction, Opcode, BUFFER_UNUSED};

impl<'a> CodeGenerator<'a> {
    pub(crate) fn handle_param_call(
        &mut self,
        node: NodeIndex,
        n: &'a Node,
        widget: ParamWidget,
    ) -> u16 {
        let args = self.call_arg_values(node);
        let Some(name_node) = args.first().copied().filter(|a| *a != NULL_NODE) else {
            self.error("E160", "Parameter builtins require a name argument", n.location);
            return BUFFER_UNUSED;
        };

        let name_n = self.node(name_node);
        let NodeData::Str(name) = &name_n.data else {
            self.error(
                "E161",
                "Parameter name must be a string literal",
                name_n.location,
            );
            return BUFFER_UNUSED;
        };

        // Buttons and toggles are 0/1 controls; sliders and dropdowns
        // default to the unit range
        let default = self.literal_arg(&args, 1).unwrap_or(match widget {
            ParamWidget::Button | ParamWidget::Toggle => 0.0,
            _ => 0.5,
        });
        let min = self.literal_arg(&args, 2).unwrap_or(0.0);
        let max = self.literal_arg(&args, 3).unwrap_or(1.0);

        self.param_decls.push(ParamDecl {
            name: name.clone(),
            widget,
            default,
            min,
            max,
        });

        // Fallback constant feeds ENV_GET until the host sets the value
        let fallback_buf = self.emit_const(default, n.location);
        if fallback_buf == BUFFER_UNUSED {
            return BUFFER_UNUSED;
        }

        let out = self.buffers.allocate();
        if out == BUFFER_UNUSED {
            self.error("E101", "Buffer pool exhausted", n.location);
            return BUFFER_UNUSED;
        }

        let mut inst = Instruction::unary(Opcode::EnvGet, out, fallback_buf);
        inst.state_id = fnv1a_hash(name);
        self.emit(inst);

        self.node_buffers.insert(node, out);
        out
    }
}
