//! Removal of locals that are never read

use std::collections::BTreeMap;

use itertools::Itertools;
use log::debug;

use super::OptimizerConfig;
use crate::ir::{IndexRemap, Instruction, LoweredFunction, Opcode};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct LocalCounts {
    gets: usize,
    sets: usize,
}

impl LocalCounts {
    fn total(self) -> usize {
        self.gets + self.sets
    }
}

/// Per-local access counts for one function
#[derive(Debug, Default)]
struct LocalUsage {
    counts: BTreeMap<u32, LocalCounts>,
}

impl LocalUsage {
    fn tally(func: &LoweredFunction) -> Self {
        let mut counts: BTreeMap<u32, LocalCounts> = func
            .locals
            .values()
            .map(|local| (local.index, LocalCounts::default()))
            .collect();

        for inst in &func.wasm {
            match inst.op {
                Opcode::LocalGet(idx) => counts.entry(idx).or_default().gets += 1,
                Opcode::LocalSet(idx) | Opcode::LocalTee(idx) => {
                    counts.entry(idx).or_default().sets += 1
                }
                _ => {}
            }
        }

        Self { counts }
    }

    fn get(&self, index: u32) -> LocalCounts {
        self.counts.get(&index).copied().unwrap_or_default()
    }
}

/// Turn stores into never-read locals into drops, then delete locals with no
/// remaining uses and compact the rest. Parameters are left alone.
pub fn eliminate(func: &mut LoweredFunction, config: &OptimizerConfig) -> bool {
    let params = func.param_count();
    let mut changed = false;

    let usage = LocalUsage::tally(func);
    let write_only = |idx: u32| idx >= params && usage.get(idx).gets == 0;

    let before = func.wasm.len();
    let mut rewritten = Vec::with_capacity(before);
    for inst in func.wasm.drain(..) {
        match inst.op {
            Opcode::LocalSet(idx) if write_only(idx) => {
                rewritten.push(Instruction::new(Opcode::Drop));
                changed = true;
            }
            // tee leaves its operand on the stack, so nothing replaces it
            Opcode::LocalTee(idx) if write_only(idx) => changed = true,
            _ => rewritten.push(inst),
        }
    }
    func.wasm = rewritten;

    let usage = LocalUsage::tally(func);
    let dead: Vec<u32> = func
        .locals
        .values()
        .map(|local| local.index)
        .filter(|idx| *idx >= params && usage.get(*idx).total() == 0)
        .collect();

    if config.verbose {
        debug!(
            target: "opt",
            "{}: use counts: {}",
            func.name,
            func.locals
                .iter()
                .sorted_by_key(|(_, local)| local.index)
                .map(|(name, local)| format!("{} ({}): {}", name, local.index, usage.get(local.index).total()))
                .join(", ")
        );
    }

    if config.verbose {
        for idx in &dead {
            debug!(
                target: "opt",
                "{}: removed unused local {} ({})",
                func.name,
                idx,
                func.local_name(*idx).unwrap_or("?")
            );
        }
    }

    let remap = IndexRemap::removing(dead);
    if remap.is_identity() {
        return changed;
    }

    func.locals.retain(|_, local| match remap.get(local.index) {
        Some(new) => {
            local.index = new;
            true
        }
        None => false,
    });
    for inst in &mut func.wasm {
        if let Some(idx) = inst.op.local_index_mut() {
            remap.apply(idx);
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wasm::types::ValueType;
    use pretty_assertions::assert_eq;
    use Opcode::*;

    fn ops(func: &LoweredFunction) -> Vec<Opcode> {
        func.wasm.iter().map(|inst| inst.op.clone()).collect()
    }

    #[test]
    fn test_write_only_local_is_removed() {
        let mut func = LoweredFunction::new(0, "f", &[("p", ValueType::I32)], None);
        let a = func.add_local("a", ValueType::I32);
        let b = func.add_local("b", ValueType::F64);
        func.wasm = [
            LocalGet(0),
            LocalSet(a),
            F64Const(2.0),
            LocalSet(b),
            LocalGet(b),
            Drop,
        ]
        .map(Instruction::from)
        .to_vec();

        assert!(eliminate(&mut func, &OptimizerConfig::default()));

        assert_eq!(
            ops(&func),
            vec![LocalGet(0), Drop, F64Const(2.0), LocalSet(1), LocalGet(1), Drop]
        );
        assert!(func.local("a").is_none());
        assert_eq!(func.local("b").unwrap().index, 1);
        assert!(func.has_contiguous_locals());
    }

    #[test]
    fn test_unreferenced_locals_compact() {
        let mut func = LoweredFunction::new(0, "f", &[], Some(ValueType::I32));
        for name in ["x", "y", "z", "w"] {
            func.add_local(name, ValueType::I32);
        }
        func.wasm = [I32Const(1), LocalTee(3), LocalGet(3), I32Add, LocalTee(1), LocalGet(1), I32Add]
            .map(Instruction::from)
            .to_vec();

        assert!(eliminate(&mut func, &OptimizerConfig::default()));

        assert_eq!(
            ops(&func),
            vec![I32Const(1), LocalTee(1), LocalGet(1), I32Add, LocalTee(0), LocalGet(0), I32Add]
        );
        assert_eq!(func.local("y").unwrap().index, 0);
        assert_eq!(func.local("w").unwrap().index, 1);
        assert_eq!(func.locals.len(), 2);
    }

    #[test]
    fn test_parameters_are_kept() {
        let mut func = LoweredFunction::new(
            0,
            "f",
            &[("a", ValueType::I32), ("b", ValueType::I32)],
            None,
        );
        func.wasm = vec![I32Const(0).into(), LocalSet(1).into()];

        assert!(!eliminate(&mut func, &OptimizerConfig::default()));
        assert_eq!(func.locals.len(), 2);
        assert_eq!(ops(&func), vec![I32Const(0), LocalSet(1)]);
    }
}
