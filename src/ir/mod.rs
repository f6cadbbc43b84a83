//! Lowered representation produced by code generation and rewritten by the optimizer

pub mod instruction;
pub mod remap;

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;

pub use self::instruction::{Instruction, Marker, MemArg, Opcode};
pub use self::remap::IndexRemap;

use crate::wasm::runtime::{RuntimeType, ENTRY_POINT};
use crate::wasm::types::ValueType;

/// Whole program as handed over by code generation
#[derive(Debug, Clone, Default)]
pub struct LoweredModule {
    /// Host functions, occupying function indices `0..imports.len()`
    pub imports: Vec<ImportedFunction>,
    pub functions: Vec<LoweredFunction>,
    pub globals: Vec<Global>,
    pub tags: Vec<Tag>,
    pub exceptions: Vec<Exception>,
    pub types: TypeUsage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportedFunction {
    pub module: String,
    pub name: String,
    pub params: Vec<ValueType>,
    pub returns: Option<ValueType>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub name: String,
    pub ty: ValueType,
    pub mutable: bool,
    /// Initializer, one of the constant opcodes
    pub init: Opcode,
}

/// Exception tag signature
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub params: Vec<ValueType>,
}

/// Exception thrown by generated code, referenced by id from `throw` sites
#[derive(Debug, Clone, PartialEq)]
pub struct Exception {
    pub message: String,
}

/// Which tracked runtime types are ever constructed in the program
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeUsage {
    constructed: BTreeSet<RuntimeType>,
}

impl TypeUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&mut self, ty: RuntimeType) {
        self.constructed.insert(ty);
    }

    /// Untracked types always count as constructed
    pub fn is_constructed(&self, ty: RuntimeType) -> bool {
        !ty.is_tracked() || self.constructed.contains(&ty)
    }
}

impl FromIterator<RuntimeType> for TypeUsage {
    fn from_iter<I: IntoIterator<Item = RuntimeType>>(iter: I) -> Self {
        Self {
            constructed: iter.into_iter().collect(),
        }
    }
}

/// Function-scoped storage slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Local {
    pub index: u32,
    pub ty: ValueType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoweredFunction {
    /// Absolute function index, imports included
    pub index: u32,
    pub name: String,
    pub params: Vec<ValueType>,
    /// Named locals; the parameters hold indices `0..params.len()`
    pub locals: BTreeMap<String, Local>,
    pub returns: Option<ValueType>,
    /// Function body as a sequence of instructions
    pub wasm: Vec<Instruction>,
    pub throws: bool,
    pub uses_memory: bool,
}

impl LoweredFunction {
    /// Create a function whose parameters are declared, in order, as its first locals
    pub fn new(
        index: u32,
        name: impl Into<String>,
        params: &[(&str, ValueType)],
        returns: Option<ValueType>,
    ) -> Self {
        let locals = params
            .iter()
            .enumerate()
            .map(|(i, (name, ty))| {
                (
                    name.to_string(),
                    Local {
                        index: i as u32,
                        ty: *ty,
                    },
                )
            })
            .collect();

        Self {
            index,
            name: name.into(),
            params: params.iter().map(|(_, ty)| *ty).collect(),
            locals,
            returns,
            wasm: Vec::new(),
            throws: false,
            uses_memory: false,
        }
    }

    pub fn with_body<I>(mut self, wasm: impl IntoIterator<Item = I>) -> Self
    where
        I: Into<Instruction>,
    {
        self.wasm = wasm.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_entry(&self) -> bool {
        self.name == ENTRY_POINT
    }

    pub fn param_count(&self) -> u32 {
        self.params.len() as u32
    }

    /// One past the highest local index in use
    pub fn next_local_index(&self) -> u32 {
        self.locals
            .values()
            .map(|local| local.index + 1)
            .max()
            .unwrap_or(0)
    }

    /// Declare a new local after all existing ones and return its index.
    /// An existing local of the same name is reused.
    pub fn add_local(&mut self, name: impl Into<String>, ty: ValueType) -> u32 {
        let index = self.next_local_index();
        self.locals
            .entry(name.into())
            .or_insert(Local { index, ty })
            .index
    }

    pub fn local(&self, name: &str) -> Option<Local> {
        self.locals.get(name).copied()
    }

    pub fn local_name(&self, index: u32) -> Option<&str> {
        self.locals
            .iter()
            .find(|(_, local)| local.index == index)
            .map(|(name, _)| name.as_str())
    }

    /// Types of the declared (non-parameter) locals in index order
    pub fn local_types(&self) -> Vec<ValueType> {
        self.locals
            .values()
            .filter(|local| local.index >= self.param_count())
            .sorted_by_key(|local| local.index)
            .map(|local| local.ty)
            .collect()
    }

    /// Whether local indices run from 0 without gaps
    pub fn has_contiguous_locals(&self) -> bool {
        self.locals
            .values()
            .map(|local| local.index)
            .sorted()
            .enumerate()
            .all(|(i, index)| i as u32 == index)
    }

    pub fn calls_self(&self) -> bool {
        self.wasm
            .iter()
            .any(|inst| inst.op == Opcode::Call(self.index))
    }
}

impl LoweredModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the first defined (non-imported) function
    pub fn function_base(&self) -> u32 {
        self.imports.len() as u32
    }

    pub fn function_by_name(&self, name: &str) -> Option<&LoweredFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn uses_memory(&self) -> bool {
        self.functions.iter().any(|f| f.uses_memory)
    }

    /// Remove a function from the table and renumber every remaining function
    /// and call site above it.
    pub fn remove_function(&mut self, index: u32) -> Option<LoweredFunction> {
        let position = self.functions.iter().position(|f| f.index == index)?;
        let removed = self.functions.remove(position);

        let remap = IndexRemap::removing([index]);
        for func in &mut self.functions {
            remap.apply(&mut func.index);
            for inst in &mut func.wasm {
                if let Some(target) = inst.op.call_target_mut() {
                    remap.apply(target);
                }
            }
        }

        Some(removed)
    }
}
