//! Stack-machine instructions of the lowered IR

use std::fmt;

use itertools::Itertools;

use crate::wasm::runtime::RuntimeType;
use crate::wasm::types::BlockType;

/// Memory immediate of load/store instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemArg {
    pub offset: u64,
    pub align: u32,
}

/// Opcode together with its immediates
#[derive(Debug, Clone, PartialEq)]
pub enum Opcode {
    // Control flow
    Unreachable,
    Nop,
    Block(BlockType),
    Loop(BlockType),
    If(BlockType),
    Else,
    End,
    Br(u32),
    BrIf(u32),
    BrTable(Vec<u32>, u32),
    Return,
    Call(u32),
    ReturnCall(u32),

    // Exceptions
    Try(BlockType),
    Catch(u32),
    CatchAll,
    Throw(u32),
    Rethrow(u32),
    Delegate(u32),

    // Parametric
    Drop,
    Select,

    // Variables
    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    GlobalGet(u32),
    GlobalSet(u32),

    // Memory
    I32Load(MemArg),
    I64Load(MemArg),
    F64Load(MemArg),
    I32Load8U(MemArg),
    I32Load16U(MemArg),
    I32Store(MemArg),
    I64Store(MemArg),
    F64Store(MemArg),
    I32Store8(MemArg),
    I32Store16(MemArg),
    MemorySize,
    MemoryGrow,

    // Constants
    I32Const(i32),
    I64Const(i64),
    F64Const(f64),

    // Comparisons
    I32Eqz,
    I32Eq,
    I32Ne,
    I32LtS,
    I32LtU,
    I32GtS,
    I32GtU,
    I32LeS,
    I32LeU,
    I32GeS,
    I32GeU,
    I64Eqz,
    I64Eq,
    I64Ne,
    I64LtS,
    I64GtS,
    I64LeS,
    I64GeS,
    F64Eq,
    F64Ne,
    F64Lt,
    F64Gt,
    F64Le,
    F64Ge,

    // Arithmetic
    I32Add,
    I32Sub,
    I32Mul,
    I32DivS,
    I32DivU,
    I32RemS,
    I32RemU,
    I32And,
    I32Or,
    I32Xor,
    I32Shl,
    I32ShrS,
    I32ShrU,
    I64Add,
    I64Sub,
    I64Mul,
    I64DivS,
    I64RemS,
    I64And,
    I64Or,
    I64Xor,
    I64Shl,
    I64ShrS,
    I64ShrU,
    F64Abs,
    F64Neg,
    F64Ceil,
    F64Floor,
    F64Trunc,
    F64Nearest,
    F64Sqrt,
    F64Add,
    F64Sub,
    F64Mul,
    F64Div,
    F64Min,
    F64Max,
    F64Copysign,

    // Conversions
    I32WrapI64,
    I64ExtendI32S,
    I64ExtendI32U,
    I32TruncF64S,
    I32TruncF64U,
    I32TruncSatF64S,
    I32TruncSatF64U,
    I64TruncSatF64S,
    I64TruncSatF64U,
    F64ConvertI32S,
    F64ConvertI32U,
    F64ConvertI64S,
    F64ConvertI64U,
    I64ReinterpretF64,
    F64ReinterpretI64,
}

impl Opcode {
    /// Opens a structured region closed by a matching `end`
    pub fn opens_region(&self) -> bool {
        matches!(
            self,
            Opcode::Block(_) | Opcode::Loop(_) | Opcode::If(_) | Opcode::Try(_)
        )
    }

    /// Carries a relative label depth
    pub fn references_label(&self) -> bool {
        matches!(
            self,
            Opcode::Br(_)
                | Opcode::BrIf(_)
                | Opcode::BrTable(..)
                | Opcode::Rethrow(_)
                | Opcode::Delegate(_)
        )
    }

    pub fn is_exception_op(&self) -> bool {
        matches!(
            self,
            Opcode::Try(_)
                | Opcode::Catch(_)
                | Opcode::CatchAll
                | Opcode::Throw(_)
                | Opcode::Rethrow(_)
                | Opcode::Delegate(_)
        )
    }

    pub fn is_const(&self) -> bool {
        matches!(
            self,
            Opcode::I32Const(_) | Opcode::I64Const(_) | Opcode::F64Const(_)
        )
    }

    /// Values popped and pushed by a plain operand-stack instruction. `None`
    /// for control flow and calls, whose effect depends on labels or signatures.
    pub fn stack_effect(&self) -> Option<(usize, usize)> {
        use Opcode::*;

        let effect = match self {
            Unreachable | Block(_) | Loop(_) | If(_) | Else | End | Br(_) | BrIf(_)
            | BrTable(..) | Return | Call(_) | ReturnCall(_) | Try(_) | Catch(_) | CatchAll
            | Throw(_) | Rethrow(_) | Delegate(_) => return None,

            Nop => (0, 0),
            Drop | LocalSet(_) | GlobalSet(_) => (1, 0),
            Select => (3, 1),
            LocalGet(_) | GlobalGet(_) | MemorySize | I32Const(_) | I64Const(_) | F64Const(_) => {
                (0, 1)
            }
            LocalTee(_) | MemoryGrow => (1, 1),

            I32Load(_) | I64Load(_) | F64Load(_) | I32Load8U(_) | I32Load16U(_) => (1, 1),
            I32Store(_) | I64Store(_) | F64Store(_) | I32Store8(_) | I32Store16(_) => (2, 0),

            I32Eqz | I64Eqz | F64Abs | F64Neg | F64Ceil | F64Floor | F64Trunc | F64Nearest
            | F64Sqrt => (1, 1),

            I32WrapI64 | I64ExtendI32S | I64ExtendI32U | I32TruncF64S | I32TruncF64U
            | I32TruncSatF64S | I32TruncSatF64U | I64TruncSatF64S | I64TruncSatF64U
            | F64ConvertI32S | F64ConvertI32U | F64ConvertI64S | F64ConvertI64U
            | I64ReinterpretF64 | F64ReinterpretI64 => (1, 1),

            I32Eq | I32Ne | I32LtS | I32LtU | I32GtS | I32GtU | I32LeS | I32LeU | I32GeS
            | I32GeU | I64Eq | I64Ne | I64LtS | I64GtS | I64LeS | I64GeS | F64Eq | F64Ne
            | F64Lt | F64Gt | F64Le | F64Ge => (2, 1),

            I32Add | I32Sub | I32Mul | I32DivS | I32DivU | I32RemS | I32RemU | I32And | I32Or
            | I32Xor | I32Shl | I32ShrS | I32ShrU | I64Add | I64Sub | I64Mul | I64DivS
            | I64RemS | I64And | I64Or | I64Xor | I64Shl | I64ShrS | I64ShrU | F64Add
            | F64Sub | F64Mul | F64Div | F64Min | F64Max | F64Copysign => (2, 1),
        };
        Some(effect)
    }

    /// Local index read or written by `local.get/set/tee`
    pub fn local_index_mut(&mut self) -> Option<&mut u32> {
        match self {
            Opcode::LocalGet(idx) | Opcode::LocalSet(idx) | Opcode::LocalTee(idx) => Some(idx),
            _ => None,
        }
    }

    /// Function index targeted by `call` or `return_call`
    pub fn call_target_mut(&mut self) -> Option<&mut u32> {
        match self {
            Opcode::Call(idx) | Opcode::ReturnCall(idx) => Some(idx),
            _ => None,
        }
    }

    fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::Unreachable => "unreachable",
            Opcode::Nop => "nop",
            Opcode::Block(_) => "block",
            Opcode::Loop(_) => "loop",
            Opcode::If(_) => "if",
            Opcode::Else => "else",
            Opcode::End => "end",
            Opcode::Br(_) => "br",
            Opcode::BrIf(_) => "br_if",
            Opcode::BrTable(..) => "br_table",
            Opcode::Return => "return",
            Opcode::Call(_) => "call",
            Opcode::ReturnCall(_) => "return_call",
            Opcode::Try(_) => "try",
            Opcode::Catch(_) => "catch",
            Opcode::CatchAll => "catch_all",
            Opcode::Throw(_) => "throw",
            Opcode::Rethrow(_) => "rethrow",
            Opcode::Delegate(_) => "delegate",
            Opcode::Drop => "drop",
            Opcode::Select => "select",
            Opcode::LocalGet(_) => "local.get",
            Opcode::LocalSet(_) => "local.set",
            Opcode::LocalTee(_) => "local.tee",
            Opcode::GlobalGet(_) => "global.get",
            Opcode::GlobalSet(_) => "global.set",
            Opcode::I32Load(_) => "i32.load",
            Opcode::I64Load(_) => "i64.load",
            Opcode::F64Load(_) => "f64.load",
            Opcode::I32Load8U(_) => "i32.load8_u",
            Opcode::I32Load16U(_) => "i32.load16_u",
            Opcode::I32Store(_) => "i32.store",
            Opcode::I64Store(_) => "i64.store",
            Opcode::F64Store(_) => "f64.store",
            Opcode::I32Store8(_) => "i32.store8",
            Opcode::I32Store16(_) => "i32.store16",
            Opcode::MemorySize => "memory.size",
            Opcode::MemoryGrow => "memory.grow",
            Opcode::I32Const(_) => "i32.const",
            Opcode::I64Const(_) => "i64.const",
            Opcode::F64Const(_) => "f64.const",
            Opcode::I32Eqz => "i32.eqz",
            Opcode::I32Eq => "i32.eq",
            Opcode::I32Ne => "i32.ne",
            Opcode::I32LtS => "i32.lt_s",
            Opcode::I32LtU => "i32.lt_u",
            Opcode::I32GtS => "i32.gt_s",
            Opcode::I32GtU => "i32.gt_u",
            Opcode::I32LeS => "i32.le_s",
            Opcode::I32LeU => "i32.le_u",
            Opcode::I32GeS => "i32.ge_s",
            Opcode::I32GeU => "i32.ge_u",
            Opcode::I64Eqz => "i64.eqz",
            Opcode::I64Eq => "i64.eq",
            Opcode::I64Ne => "i64.ne",
            Opcode::I64LtS => "i64.lt_s",
            Opcode::I64GtS => "i64.gt_s",
            Opcode::I64LeS => "i64.le_s",
            Opcode::I64GeS => "i64.ge_s",
            Opcode::F64Eq => "f64.eq",
            Opcode::F64Ne => "f64.ne",
            Opcode::F64Lt => "f64.lt",
            Opcode::F64Gt => "f64.gt",
            Opcode::F64Le => "f64.le",
            Opcode::F64Ge => "f64.ge",
            Opcode::I32Add => "i32.add",
            Opcode::I32Sub => "i32.sub",
            Opcode::I32Mul => "i32.mul",
            Opcode::I32DivS => "i32.div_s",
            Opcode::I32DivU => "i32.div_u",
            Opcode::I32RemS => "i32.rem_s",
            Opcode::I32RemU => "i32.rem_u",
            Opcode::I32And => "i32.and",
            Opcode::I32Or => "i32.or",
            Opcode::I32Xor => "i32.xor",
            Opcode::I32Shl => "i32.shl",
            Opcode::I32ShrS => "i32.shr_s",
            Opcode::I32ShrU => "i32.shr_u",
            Opcode::I64Add => "i64.add",
            Opcode::I64Sub => "i64.sub",
            Opcode::I64Mul => "i64.mul",
            Opcode::I64DivS => "i64.div_s",
            Opcode::I64RemS => "i64.rem_s",
            Opcode::I64And => "i64.and",
            Opcode::I64Or => "i64.or",
            Opcode::I64Xor => "i64.xor",
            Opcode::I64Shl => "i64.shl",
            Opcode::I64ShrS => "i64.shr_s",
            Opcode::I64ShrU => "i64.shr_u",
            Opcode::F64Abs => "f64.abs",
            Opcode::F64Neg => "f64.neg",
            Opcode::F64Ceil => "f64.ceil",
            Opcode::F64Floor => "f64.floor",
            Opcode::F64Trunc => "f64.trunc",
            Opcode::F64Nearest => "f64.nearest",
            Opcode::F64Sqrt => "f64.sqrt",
            Opcode::F64Add => "f64.add",
            Opcode::F64Sub => "f64.sub",
            Opcode::F64Mul => "f64.mul",
            Opcode::F64Div => "f64.div",
            Opcode::F64Min => "f64.min",
            Opcode::F64Max => "f64.max",
            Opcode::F64Copysign => "f64.copysign",
            Opcode::I32WrapI64 => "i32.wrap_i64",
            Opcode::I64ExtendI32S => "i64.extend_i32_s",
            Opcode::I64ExtendI32U => "i64.extend_i32_u",
            Opcode::I32TruncF64S => "i32.trunc_f64_s",
            Opcode::I32TruncF64U => "i32.trunc_f64_u",
            Opcode::I32TruncSatF64S => "i32.trunc_sat_f64_s",
            Opcode::I32TruncSatF64U => "i32.trunc_sat_f64_u",
            Opcode::I64TruncSatF64S => "i64.trunc_sat_f64_s",
            Opcode::I64TruncSatF64U => "i64.trunc_sat_f64_u",
            Opcode::F64ConvertI32S => "f64.convert_i32_s",
            Opcode::F64ConvertI32U => "f64.convert_i32_u",
            Opcode::F64ConvertI64S => "f64.convert_i64_s",
            Opcode::F64ConvertI64U => "f64.convert_i64_u",
            Opcode::I64ReinterpretF64 => "i64.reinterpret_f64",
            Opcode::F64ReinterpretI64 => "f64.reinterpret_i64",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())?;
        match self {
            Opcode::Block(ty) | Opcode::Loop(ty) | Opcode::If(ty) | Opcode::Try(ty) => match ty {
                BlockType::Empty => Ok(()),
                BlockType::Value(v) => write!(f, " (result {:?})", v),
            },
            Opcode::Br(n)
            | Opcode::BrIf(n)
            | Opcode::Call(n)
            | Opcode::ReturnCall(n)
            | Opcode::Catch(n)
            | Opcode::Throw(n)
            | Opcode::Rethrow(n)
            | Opcode::Delegate(n)
            | Opcode::LocalGet(n)
            | Opcode::LocalSet(n)
            | Opcode::LocalTee(n)
            | Opcode::GlobalGet(n)
            | Opcode::GlobalSet(n) => write!(f, " {}", n),
            Opcode::BrTable(targets, default) => {
                write!(f, " {} {}", targets.iter().join(" "), default)
            }
            Opcode::I32Load(m)
            | Opcode::I64Load(m)
            | Opcode::F64Load(m)
            | Opcode::I32Load8U(m)
            | Opcode::I32Load16U(m)
            | Opcode::I32Store(m)
            | Opcode::I64Store(m)
            | Opcode::F64Store(m)
            | Opcode::I32Store8(m)
            | Opcode::I32Store16(m) => {
                if m.offset != 0 {
                    write!(f, " offset={}", m.offset)?;
                }
                Ok(())
            }
            Opcode::I32Const(v) => write!(f, " {}", v),
            Opcode::I64Const(v) => write!(f, " {}", v),
            Opcode::F64Const(v) => write!(f, " {}", v),
            _ => Ok(()),
        }
    }
}

/// Out-of-band lowering metadata attached to an instruction.
///
/// Markers never change what an instruction does; they let the rewriter
/// recognize type-dispatch regions emitted by code generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// `local.set` capturing the discriminant of a type-dispatch region
    TypeSwitch,
    /// First instruction of the guard selecting the case for a runtime type
    TypeCase(RuntimeType),
    /// `end` closing a type-dispatch region
    TypeSwitchEnd,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub op: Opcode,
    pub marker: Option<Marker>,
}

impl Instruction {
    pub fn new(op: Opcode) -> Self {
        Self { op, marker: None }
    }

    pub fn with_marker(mut self, marker: Marker) -> Self {
        self.marker = Some(marker);
        self
    }
}

impl From<Opcode> for Instruction {
    fn from(op: Opcode) -> Self {
        Instruction::new(op)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.marker {
            Some(marker) => write!(f, "{} ;; {:?}", self.op, marker),
            None => write!(f, "{}", self.op),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wasm::types::ValueType;

    #[test]
    fn test_display() {
        assert_eq!(Opcode::LocalTee(3).to_string(), "local.tee 3");
        assert_eq!(Opcode::BrTable(vec![0, 1], 2).to_string(), "br_table 0 1 2");
        assert_eq!(
            Opcode::Block(BlockType::Value(ValueType::I32)).to_string(),
            "block (result I32)"
        );

        let inst = Instruction::new(Opcode::End).with_marker(Marker::TypeSwitchEnd);
        assert_eq!(inst.to_string(), "end ;; TypeSwitchEnd");
    }

    #[test]
    fn test_local_index_mut() {
        let mut op = Opcode::LocalSet(4);
        *op.local_index_mut().unwrap() = 1;
        assert_eq!(op, Opcode::LocalSet(1));
        assert!(Opcode::GlobalGet(0).local_index_mut().is_none());
    }

    #[test]
    fn test_stack_effect() {
        assert_eq!(Opcode::I32Const(1).stack_effect(), Some((0, 1)));
        assert_eq!(Opcode::LocalTee(0).stack_effect(), Some((1, 1)));
        assert_eq!(Opcode::I32Store(MemArg::default()).stack_effect(), Some((2, 0)));
        assert_eq!(Opcode::Select.stack_effect(), Some((3, 1)));
        assert_eq!(Opcode::Call(0).stack_effect(), None);
        assert_eq!(Opcode::Block(BlockType::Empty).stack_effect(), None);
    }
}
