//! Compile-time evaluation of arithmetic on two constants

use log::debug;

use super::OptimizerConfig;
use crate::ir::{Instruction, LoweredFunction, Opcode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
}

fn binop(op: &Opcode) -> Option<BinOp> {
    match op {
        Opcode::I32Add | Opcode::I64Add | Opcode::F64Add => Some(BinOp::Add),
        Opcode::I32Sub | Opcode::I64Sub | Opcode::F64Sub => Some(BinOp::Sub),
        Opcode::I32Mul | Opcode::I64Mul | Opcode::F64Mul => Some(BinOp::Mul),
        _ => None,
    }
}

/// Whether an integer immediate fits in one signed LEB128 byte
fn is_short_immediate(value: i64) -> bool {
    (-64..=63).contains(&value)
}

/// Evaluate `lhs op rhs` with the wrapping semantics of the operand type.
/// Integer operands wider than a single-byte immediate are not folded.
fn evaluate(lhs: &Opcode, rhs: &Opcode, op: &Opcode) -> Option<Opcode> {
    let bin = binop(op)?;
    let folded = match (lhs, rhs, op) {
        (Opcode::I32Const(a), Opcode::I32Const(b), Opcode::I32Add | Opcode::I32Sub | Opcode::I32Mul) => {
            if !is_short_immediate(*a as i64) || !is_short_immediate(*b as i64) {
                return None;
            }
            Opcode::I32Const(match bin {
                BinOp::Add => a.wrapping_add(*b),
                BinOp::Sub => a.wrapping_sub(*b),
                BinOp::Mul => a.wrapping_mul(*b),
            })
        }
        (Opcode::I64Const(a), Opcode::I64Const(b), Opcode::I64Add | Opcode::I64Sub | Opcode::I64Mul) => {
            if !is_short_immediate(*a) || !is_short_immediate(*b) {
                return None;
            }
            Opcode::I64Const(match bin {
                BinOp::Add => a.wrapping_add(*b),
                BinOp::Sub => a.wrapping_sub(*b),
                BinOp::Mul => a.wrapping_mul(*b),
            })
        }
        // fixed-width immediate, always safe to read back
        (Opcode::F64Const(a), Opcode::F64Const(b), Opcode::F64Add | Opcode::F64Sub | Opcode::F64Mul) => {
            Opcode::F64Const(match bin {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
            })
        }
        _ => return None,
    };
    Some(folded)
}

/// Fold every `const; const; add|sub|mul` window. Returns whether anything changed.
pub fn fold(func: &mut LoweredFunction, config: &OptimizerConfig) -> bool {
    let mut changed = false;
    let mut i = 2;

    while i < func.wasm.len() {
        let folded = evaluate(&func.wasm[i - 2].op, &func.wasm[i - 1].op, &func.wasm[i].op);
        let Some(folded) = folded else {
            i += 1;
            continue;
        };

        if config.verbose {
            debug!(
                target: "opt",
                "{}: folded {}; {}; {} -> {}",
                func.name,
                func.wasm[i - 2].op,
                func.wasm[i - 1].op,
                func.wasm[i].op,
                folded
            );
        }

        func.wasm.splice(i - 2..=i, [Instruction::new(folded)]);
        changed = true;
        // the result may be an operand of an enclosing fold
        i = (i - 1).max(2);
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use Opcode::*;

    fn folded(ops: Vec<Opcode>) -> Vec<Opcode> {
        let mut func = LoweredFunction::new(0, "f", &[], None).with_body(ops);
        fold(&mut func, &OptimizerConfig::default());
        func.wasm.into_iter().map(|inst| inst.op).collect()
    }

    #[test]
    fn test_fold_add() {
        assert_eq!(folded(vec![I32Const(3), I32Const(4), I32Add]), vec![I32Const(7)]);
        assert_eq!(folded(vec![I64Const(-5), I64Const(6), I64Mul]), vec![I64Const(-30)]);
        assert_eq!(
            folded(vec![F64Const(1.5), F64Const(0.25), F64Sub, Drop]),
            vec![F64Const(1.25), Drop]
        );
    }

    #[test]
    fn test_nested_folds_cascade() {
        // (2 * 3) + 4
        assert_eq!(
            folded(vec![I32Const(4), I32Const(2), I32Const(3), I32Mul, I32Add]),
            vec![I32Const(10)]
        );
    }

    #[test]
    fn test_wide_immediates_are_skipped() {
        let wide = vec![I32Const(1000), I32Const(1), I32Add];
        assert_eq!(folded(wide.clone()), wide);

        let wide = vec![I64Const(1), I64Const(-65), I64Sub];
        assert_eq!(folded(wide.clone()), wide);

        // the result itself may be wide
        assert_eq!(folded(vec![I32Const(63), I32Const(63), I32Mul]), vec![I32Const(3969)]);
    }

    #[test]
    fn test_mismatched_or_unsupported_ops() {
        let div = vec![I32Const(6), I32Const(3), I32DivS];
        assert_eq!(folded(div.clone()), div);

        let mixed = vec![I32Const(1), I64Const(1), I64Add];
        assert_eq!(folded(mixed.clone()), mixed);
    }
}
