//! Scoped symbol table
//!
//! A stack of scopes, each a hash map from FNV-1a name hash to symbol.
//! Lookup walks innermost-first. The global scope is preloaded with every
//! builtin (aliases resolved by cloning the builtin record under the alias
//! name). Because the analyzer rewrites the AST into a new arena, symbols
//! that store node indices are redirected through the old->new node map
//! after the rewrite pass.

use crate::ast::NodeIndex;
use crate::builtins::{BuiltinInfo, BUILTIN_ALIASES, BUILTIN_FUNCTIONS};
use crate::instruction::fnv1a_hash;
use std::collections::HashMap;

pub const BUFFER_UNASSIGNED: u16 = 0xFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Variable,
    Builtin,
    Parameter,
    UserFunction,
    Pattern,
    Array,
    FunctionValue,
}

#[derive(Debug, Clone)]
pub struct FunctionParamInfo {
    pub name: String,
    pub default_value: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct UserFunctionInfo {
    pub name: String,
    pub params: Vec<FunctionParamInfo>,
    pub body_node: NodeIndex,
    pub def_node: NodeIndex,
}

#[derive(Debug, Clone)]
pub struct PatternInfo {
    /// MiniLiteral node in the (transformed) arena
    pub pattern_node: NodeIndex,
    pub is_sample_pattern: bool,
}

#[derive(Debug, Clone)]
pub struct ArrayInfo {
    /// The ArrayLit source node; buffers are assigned during codegen
    pub source_node: NodeIndex,
    pub element_count: usize,
}

#[derive(Debug, Clone)]
pub struct CaptureInfo {
    pub name: String,
    pub buffer_index: u16,
}

/// A function used as a value: a lambda bound to a name, or a `fn` reference
#[derive(Debug, Clone)]
pub struct FunctionRef {
    pub closure_node: NodeIndex,
    pub params: Vec<FunctionParamInfo>,
    pub captures: Vec<CaptureInfo>,
    pub is_user_function: bool,
    pub user_function_name: String,
}

/// Kind-specific payload of a symbol
#[derive(Debug, Clone)]
pub enum SymbolData {
    None,
    Builtin(BuiltinInfo),
    UserFunction(UserFunctionInfo),
    Pattern(PatternInfo),
    Array(ArrayInfo),
    FunctionValue(FunctionRef),
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub kind: SymbolKind,
    pub name_hash: u32,
    pub name: String,
    pub buffer_index: u16,
    pub data: SymbolData,
}

pub struct SymbolTable {
    scopes: Vec<HashMap<u32, Symbol>>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut table = Self {
            scopes: vec![HashMap::new()],
        };
        table.register_builtins();
        table
    }

    fn register_builtins(&mut self) {
        for (name, info) in BUILTIN_FUNCTIONS.iter() {
            self.define(Symbol {
                kind: SymbolKind::Builtin,
                name_hash: fnv1a_hash(name),
                name: name.to_string(),
                buffer_index: BUFFER_UNASSIGNED,
                data: SymbolData::Builtin(*info),
            });
        }
        // Aliases clone the builtin record under the alias name
        for (alias, target) in BUILTIN_ALIASES.iter() {
            if let Some(info) = BUILTIN_FUNCTIONS.get(target) {
                self.define(Symbol {
                    kind: SymbolKind::Builtin,
                    name_hash: fnv1a_hash(alias),
                    name: alias.to_string(),
                    buffer_index: BUFFER_UNASSIGNED,
                    data: SymbolData::Builtin(*info),
                });
            }
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    /// Define (or overwrite) a symbol in the current scope
    pub fn define(&mut self, symbol: Symbol) {
        self.scopes
            .last_mut()
            .expect("scope stack is never empty")
            .insert(symbol.name_hash, symbol);
    }

    pub fn define_variable(&mut self, name: &str, buffer_index: u16) {
        self.define(Symbol {
            kind: SymbolKind::Variable,
            name_hash: fnv1a_hash(name),
            name: name.to_string(),
            buffer_index,
            data: SymbolData::None,
        });
    }

    pub fn define_parameter(&mut self, name: &str, buffer_index: u16) {
        self.define(Symbol {
            kind: SymbolKind::Parameter,
            name_hash: fnv1a_hash(name),
            name: name.to_string(),
            buffer_index,
            data: SymbolData::None,
        });
    }

    pub fn define_function(&mut self, info: UserFunctionInfo) {
        self.define(Symbol {
            kind: SymbolKind::UserFunction,
            name_hash: fnv1a_hash(&info.name),
            name: info.name.clone(),
            buffer_index: BUFFER_UNASSIGNED,
            data: SymbolData::UserFunction(info),
        });
    }

    pub fn define_pattern(&mut self, name: &str, info: PatternInfo) {
        self.define(Symbol {
            kind: SymbolKind::Pattern,
            name_hash: fnv1a_hash(name),
            name: name.to_string(),
            buffer_index: BUFFER_UNASSIGNED,
            data: SymbolData::Pattern(info),
        });
    }

    pub fn define_array(&mut self, name: &str, info: ArrayInfo) {
        self.define(Symbol {
            kind: SymbolKind::Array,
            name_hash: fnv1a_hash(name),
            name: name.to_string(),
            buffer_index: BUFFER_UNASSIGNED,
            data: SymbolData::Array(info),
        });
    }

    pub fn define_function_value(&mut self, name: &str, func_ref: FunctionRef) {
        self.define(Symbol {
            kind: SymbolKind::FunctionValue,
            name_hash: fnv1a_hash(name),
            name: name.to_string(),
            buffer_index: BUFFER_UNASSIGNED,
            data: SymbolData::FunctionValue(func_ref),
        });
    }

    /// Innermost-first lookup by name
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.lookup_hash(fnv1a_hash(name))
    }

    pub fn lookup_hash(&self, name_hash: u32) -> Option<&Symbol> {
        for scope in self.scopes.iter().rev() {
            if let Some(symbol) = scope.get(&name_hash) {
                return Some(symbol);
            }
        }
        None
    }

    pub fn is_defined_in_current_scope(&self, name: &str) -> bool {
        self.scopes
            .last()
            .map(|scope| scope.contains_key(&fnv1a_hash(name)))
            .unwrap_or(false)
    }

    /// Redirect stored node indices through the analyzer's old->new map.
    /// Indices absent from the map are left untouched.
    pub fn remap_nodes(&mut self, node_map: &HashMap<NodeIndex, NodeIndex>) {
        for scope in &mut self.scopes {
            for symbol in scope.values_mut() {
                match &mut symbol.data {
                    SymbolData::UserFunction(info) => {
                        if let Some(new_idx) = node_map.get(&info.body_node) {
                            info.body_node = *new_idx;
                        }
                        if let Some(new_idx) = node_map.get(&info.def_node) {
                            info.def_node = *new_idx;
                        }
                    }
                    SymbolData::Pattern(info) => {
                        if let Some(new_idx) = node_map.get(&info.pattern_node) {
                            info.pattern_node = *new_idx;
                        }
                    }
                    SymbolData::Array(info) => {
                        if let Some(new_idx) = node_map.get(&info.source_node) {
                            info.source_node = *new_idx;
                        }
                    }
                    SymbolData::FunctionValue(func_ref) => {
                        if let Some(new_idx) = node_map.get(&func_ref.closure_node) {
                            func_ref.closure_node = *new_idx;
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_preloaded() {
        let table = SymbolTable::new();
        assert!(table.lookup("sin").is_some());
        assert!(table.lookup("sine").is_some());
        assert!(table.lookup("lowpass").is_some());
        assert!(table.lookup("no_such_fn").is_none());
    }

    #[test]
    fn test_scoped_shadowing() {
        let mut table = SymbolTable::new();
        table.define_variable("x", 3);
        table.push_scope();
        table.define_variable("x", 7);
        assert_eq!(table.lookup("x").unwrap().buffer_index, 7);
        table.pop_scope();
        assert_eq!(table.lookup("x").unwrap().buffer_index, 3);
    }

    #[test]
    fn test_current_scope_check() {
        let mut table = SymbolTable::new();
        table.define_variable("x", 0);
        table.push_scope();
        assert!(!table.is_defined_in_current_scope("x"));
        table.define_variable("x", 1);
        assert!(table.is_defined_in_current_scope("x"));
    }
}
