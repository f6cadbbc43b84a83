//! WebAssembly module assembly from the lowered IR

use std::borrow::Cow;
use std::collections::HashMap;

use itertools::Itertools;
use wasm_encoder::{
    CodeSection, ConstExpr, EntityType, ExportKind, ExportSection, Function, FunctionSection,
    GlobalSection, GlobalType, ImportSection, Instruction as WasmInst, MemArg as WasmMemArg,
    MemorySection, MemoryType, Module, TagKind, TagSection, TagType, TypeSection,
};

use crate::ir::{Global, LoweredFunction, LoweredModule, MemArg, Opcode};
use crate::wasm::runtime::{memory, ENTRY_POINT};
use crate::wasm::types::FunctionSignature;

/// WebAssembly code generator
pub struct WasmCodeGen {
    signatures: Vec<FunctionSignature>,
    signature_index: HashMap<FunctionSignature, u32>,
}

impl WasmCodeGen {
    pub fn new() -> Self {
        Self {
            signatures: Vec::new(),
            signature_index: HashMap::new(),
        }
    }

    /// Type index for a signature, registering it on first use
    fn signature(&mut self, sig: FunctionSignature) -> u32 {
        if let Some(index) = self.signature_index.get(&sig) {
            return *index;
        }
        let index = self.signatures.len() as u32;
        self.signatures.push(sig.clone());
        self.signature_index.insert(sig, index);
        index
    }

    /// Generate a complete WebAssembly module from the lowered IR
    pub fn generate(&mut self, lowered: &LoweredModule) -> Result<Vec<u8>, String> {
        self.signatures.clear();
        self.signature_index.clear();

        let base = lowered.function_base();
        for (i, func) in lowered.functions.iter().enumerate() {
            let expected = base + i as u32;
            if func.index != expected {
                return Err(format!(
                    "function {} has index {}, expected {}",
                    func.name, func.index, expected
                ));
            }
        }

        // 1. Imports, function declarations and tags share the type section
        let mut imports = ImportSection::new();
        for import in &lowered.imports {
            let ty = self.signature(FunctionSignature::new(import.params.clone(), import.returns));
            imports.import(&import.module, &import.name, EntityType::Function(ty));
        }

        let mut functions = FunctionSection::new();
        for func in &lowered.functions {
            functions.function(self.signature(FunctionSignature::new(func.params.clone(), func.returns)));
        }

        let mut tags = TagSection::new();
        for tag in &lowered.tags {
            tags.tag(TagType {
                kind: TagKind::Exception,
                func_type_idx: self.signature(FunctionSignature::new(tag.params.clone(), None)),
            });
        }

        let mut types = TypeSection::new();
        for sig in &self.signatures {
            types.ty().function(
                sig.params.iter().map(|t| t.to_val_type()).collect::<Vec<_>>(),
                sig.results.iter().map(|t| t.to_val_type()).collect::<Vec<_>>(),
            );
        }

        // 2. Linear memory, only when something touches it
        let uses_memory = lowered.uses_memory();
        let mut memories = MemorySection::new();
        if uses_memory {
            memories.memory(MemoryType {
                minimum: memory::INITIAL_PAGES.into(),
                maximum: Some(memory::MAX_PAGES.into()),
                memory64: false,
                shared: false,
                page_size_log2: None,
            });
        }

        let mut globals = GlobalSection::new();
        for global in &lowered.globals {
            globals.global(
                GlobalType {
                    val_type: global.ty.to_val_type(),
                    mutable: global.mutable,
                    shared: false,
                },
                &const_expr(global)?,
            );
        }

        // 3. Exports: the entry point and memory
        let mut exports = ExportSection::new();
        if let Some(entry) = lowered.function_by_name(ENTRY_POINT) {
            exports.export(ENTRY_POINT, ExportKind::Func, entry.index);
        }
        if uses_memory {
            exports.export("memory", ExportKind::Memory, 0);
        }

        // 4. Function bodies
        let mut codes = CodeSection::new();
        for func in &lowered.functions {
            codes.function(&self.compile_function(func)?);
        }

        let mut module = Module::new();
        module.section(&types);
        if !lowered.imports.is_empty() {
            module.section(&imports);
        }
        module.section(&functions);
        if uses_memory {
            module.section(&memories);
        }
        if !lowered.tags.is_empty() {
            module.section(&tags);
        }
        if !lowered.globals.is_empty() {
            module.section(&globals);
        }
        module.section(&exports);
        module.section(&codes);

        Ok(module.finish())
    }

    /// Compile a function from the IR instructions
    fn compile_function(&self, func: &LoweredFunction) -> Result<Function, String> {
        if !func.has_contiguous_locals() {
            return Err(format!("function {} has non-contiguous locals", func.name));
        }

        let locals: Vec<(u32, wasm_encoder::ValType)> = func
            .local_types()
            .into_iter()
            .chunk_by(|ty| *ty)
            .into_iter()
            .map(|(ty, group)| (group.count() as u32, ty.to_val_type()))
            .collect();

        let mut f = Function::new(locals);
        for inst in &func.wasm {
            f.instruction(&compile_instruction(&inst.op));
        }

        // Every WASM function body must end with an End instruction
        f.instruction(&WasmInst::End);

        Ok(f)
    }
}

impl Default for WasmCodeGen {
    fn default() -> Self {
        Self::new()
    }
}

fn const_expr(global: &Global) -> Result<ConstExpr, String> {
    match global.init {
        Opcode::I32Const(v) => Ok(ConstExpr::i32_const(v)),
        Opcode::I64Const(v) => Ok(ConstExpr::i64_const(v)),
        Opcode::F64Const(v) => Ok(ConstExpr::f64_const(v)),
        ref other => Err(format!(
            "global {} has non-constant initializer {}",
            global.name, other
        )),
    }
}

fn mem_arg(arg: &MemArg) -> WasmMemArg {
    WasmMemArg {
        offset: arg.offset,
        align: arg.align,
        memory_index: 0,
    }
}

/// Map a single IR opcode to its encoder instruction
fn compile_instruction(op: &Opcode) -> WasmInst<'_> {
    match op {
        // Control flow
        Opcode::Unreachable => WasmInst::Unreachable,
        Opcode::Nop => WasmInst::Nop,
        Opcode::Block(bt) => WasmInst::Block(bt.to_block_type()),
        Opcode::Loop(bt) => WasmInst::Loop(bt.to_block_type()),
        Opcode::If(bt) => WasmInst::If(bt.to_block_type()),
        Opcode::Else => WasmInst::Else,
        Opcode::End => WasmInst::End,
        Opcode::Br(depth) => WasmInst::Br(*depth),
        Opcode::BrIf(depth) => WasmInst::BrIf(*depth),
        Opcode::BrTable(targets, default) => WasmInst::BrTable(Cow::Borrowed(targets.as_slice()), *default),
        Opcode::Return => WasmInst::Return,
        Opcode::Call(f) => WasmInst::Call(*f),
        Opcode::ReturnCall(f) => WasmInst::ReturnCall(*f),

        // Exceptions
        Opcode::Try(bt) => WasmInst::Try(bt.to_block_type()),
        Opcode::Catch(tag) => WasmInst::Catch(*tag),
        Opcode::CatchAll => WasmInst::CatchAll,
        Opcode::Throw(tag) => WasmInst::Throw(*tag),
        Opcode::Rethrow(depth) => WasmInst::Rethrow(*depth),
        Opcode::Delegate(depth) => WasmInst::Delegate(*depth),

        Opcode::Drop => WasmInst::Drop,
        Opcode::Select => WasmInst::Select,

        // Variables
        Opcode::LocalGet(i) => WasmInst::LocalGet(*i),
        Opcode::LocalSet(i) => WasmInst::LocalSet(*i),
        Opcode::LocalTee(i) => WasmInst::LocalTee(*i),
        Opcode::GlobalGet(i) => WasmInst::GlobalGet(*i),
        Opcode::GlobalSet(i) => WasmInst::GlobalSet(*i),

        // Memory
        Opcode::I32Load(m) => WasmInst::I32Load(mem_arg(m)),
        Opcode::I64Load(m) => WasmInst::I64Load(mem_arg(m)),
        Opcode::F64Load(m) => WasmInst::F64Load(mem_arg(m)),
        Opcode::I32Load8U(m) => WasmInst::I32Load8U(mem_arg(m)),
        Opcode::I32Load16U(m) => WasmInst::I32Load16U(mem_arg(m)),
        Opcode::I32Store(m) => WasmInst::I32Store(mem_arg(m)),
        Opcode::I64Store(m) => WasmInst::I64Store(mem_arg(m)),
        Opcode::F64Store(m) => WasmInst::F64Store(mem_arg(m)),
        Opcode::I32Store8(m) => WasmInst::I32Store8(mem_arg(m)),
        Opcode::I32Store16(m) => WasmInst::I32Store16(mem_arg(m)),
        Opcode::MemorySize => WasmInst::MemorySize(0),
        Opcode::MemoryGrow => WasmInst::MemoryGrow(0),

        // Constants
        Opcode::I32Const(v) => WasmInst::I32Const(*v),
        Opcode::I64Const(v) => WasmInst::I64Const(*v),
        Opcode::F64Const(v) => WasmInst::F64Const(*v),

        // Comparisons
        Opcode::I32Eqz => WasmInst::I32Eqz,
        Opcode::I32Eq => WasmInst::I32Eq,
        Opcode::I32Ne => WasmInst::I32Ne,
        Opcode::I32LtS => WasmInst::I32LtS,
        Opcode::I32LtU => WasmInst::I32LtU,
        Opcode::I32GtS => WasmInst::I32GtS,
        Opcode::I32GtU => WasmInst::I32GtU,
        Opcode::I32LeS => WasmInst::I32LeS,
        Opcode::I32LeU => WasmInst::I32LeU,
        Opcode::I32GeS => WasmInst::I32GeS,
        Opcode::I32GeU => WasmInst::I32GeU,
        Opcode::I64Eqz => WasmInst::I64Eqz,
        Opcode::I64Eq => WasmInst::I64Eq,
        Opcode::I64Ne => WasmInst::I64Ne,
        Opcode::I64LtS => WasmInst::I64LtS,
        Opcode::I64GtS => WasmInst::I64GtS,
        Opcode::I64LeS => WasmInst::I64LeS,
        Opcode::I64GeS => WasmInst::I64GeS,
        Opcode::F64Eq => WasmInst::F64Eq,
        Opcode::F64Ne => WasmInst::F64Ne,
        Opcode::F64Lt => WasmInst::F64Lt,
        Opcode::F64Gt => WasmInst::F64Gt,
        Opcode::F64Le => WasmInst::F64Le,
        Opcode::F64Ge => WasmInst::F64Ge,

        // Arithmetic
        Opcode::I32Add => WasmInst::I32Add,
        Opcode::I32Sub => WasmInst::I32Sub,
        Opcode::I32Mul => WasmInst::I32Mul,
        Opcode::I32DivS => WasmInst::I32DivS,
        Opcode::I32DivU => WasmInst::I32DivU,
        Opcode::I32RemS => WasmInst::I32RemS,
        Opcode::I32RemU => WasmInst::I32RemU,
        Opcode::I32And => WasmInst::I32And,
        Opcode::I32Or => WasmInst::I32Or,
        Opcode::I32Xor => WasmInst::I32Xor,
        Opcode::I32Shl => WasmInst::I32Shl,
        Opcode::I32ShrS => WasmInst::I32ShrS,
        Opcode::I32ShrU => WasmInst::I32ShrU,
        Opcode::I64Add => WasmInst::I64Add,
        Opcode::I64Sub => WasmInst::I64Sub,
        Opcode::I64Mul => WasmInst::I64Mul,
        Opcode::I64DivS => WasmInst::I64DivS,
        Opcode::I64RemS => WasmInst::I64RemS,
        Opcode::I64And => WasmInst::I64And,
        Opcode::I64Or => WasmInst::I64Or,
        Opcode::I64Xor => WasmInst::I64Xor,
        Opcode::I64Shl => WasmInst::I64Shl,
        Opcode::I64ShrS => WasmInst::I64ShrS,
        Opcode::I64ShrU => WasmInst::I64ShrU,
        Opcode::F64Abs => WasmInst::F64Abs,
        Opcode::F64Neg => WasmInst::F64Neg,
        Opcode::F64Ceil => WasmInst::F64Ceil,
        Opcode::F64Floor => WasmInst::F64Floor,
        Opcode::F64Trunc => WasmInst::F64Trunc,
        Opcode::F64Nearest => WasmInst::F64Nearest,
        Opcode::F64Sqrt => WasmInst::F64Sqrt,
        Opcode::F64Add => WasmInst::F64Add,
        Opcode::F64Sub => WasmInst::F64Sub,
        Opcode::F64Mul => WasmInst::F64Mul,
        Opcode::F64Div => WasmInst::F64Div,
        Opcode::F64Min => WasmInst::F64Min,
        Opcode::F64Max => WasmInst::F64Max,
        Opcode::F64Copysign => WasmInst::F64Copysign,

        // Conversions
        Opcode::I32WrapI64 => WasmInst::I32WrapI64,
        Opcode::I64ExtendI32S => WasmInst::I64ExtendI32S,
        Opcode::I64ExtendI32U => WasmInst::I64ExtendI32U,
        Opcode::I32TruncF64S => WasmInst::I32TruncF64S,
        Opcode::I32TruncF64U => WasmInst::I32TruncF64U,
        Opcode::I32TruncSatF64S => WasmInst::I32TruncSatF64S,
        Opcode::I32TruncSatF64U => WasmInst::I32TruncSatF64U,
        Opcode::I64TruncSatF64S => WasmInst::I64TruncSatF64S,
        Opcode::I64TruncSatF64U => WasmInst::I64TruncSatF64U,
        Opcode::F64ConvertI32S => WasmInst::F64ConvertI32S,
        Opcode::F64ConvertI32U => WasmInst::F64ConvertI32U,
        Opcode::F64ConvertI64S => WasmInst::F64ConvertI64S,
        Opcode::F64ConvertI64U => WasmInst::F64ConvertI64U,
        Opcode::I64ReinterpretF64 => WasmInst::I64ReinterpretF64,
        Opcode::F64ReinterpretI64 => WasmInst::F64ReinterpretI64,
    }
}
