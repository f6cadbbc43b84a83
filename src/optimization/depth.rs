//! Nesting tracker for structured control flow during a linear scan

use crate::ir::{Instruction, Opcode};
use crate::wasm::types::BlockType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Block,
    Loop,
    If,
    Try,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Region {
    kind: RegionKind,
    ty: BlockType,
}

/// Stack of the regions open at the current scan position
#[derive(Debug, Clone, Default)]
pub struct DepthTracker {
    stack: Vec<Region>,
}

impl DepthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker state after observing every instruction of `wasm`
    pub fn scan(wasm: &[Instruction]) -> Self {
        let mut tracker = Self::new();
        for inst in wasm {
            tracker.observe(&inst.op);
        }
        tracker
    }

    pub fn observe(&mut self, op: &Opcode) {
        let (kind, ty) = match op {
            Opcode::Block(ty) => (RegionKind::Block, *ty),
            Opcode::Loop(ty) => (RegionKind::Loop, *ty),
            Opcode::If(ty) => (RegionKind::If, *ty),
            Opcode::Try(ty) => (RegionKind::Try, *ty),
            // `delegate` closes its `try` like an `end`
            Opcode::End | Opcode::Delegate(_) => {
                self.stack.pop();
                return;
            }
            _ => return,
        };
        self.stack.push(Region { kind, ty });
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn inside_try(&self) -> bool {
        self.stack.iter().any(|region| region.kind == RegionKind::Try)
    }

    /// Number of values a branch to `relative_depth` carries. Depths past the
    /// innermost open region name the function label.
    pub fn label_arity(&self, relative_depth: u32, function_returns: usize) -> usize {
        let depth = relative_depth as usize;
        if depth >= self.stack.len() {
            return function_returns;
        }

        let region = self.stack[self.stack.len() - 1 - depth];
        match region.kind {
            // branching to a loop restarts it; loops take no parameters here
            RegionKind::Loop => 0,
            _ => region.ty.arity(),
        }
    }
}

/// Position of the `end` matching the region opened at `start`
pub fn matching_end(wasm: &[Instruction], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, inst) in wasm[start..].iter().enumerate() {
        if inst.op.opens_region() {
            depth += 1;
        } else if matches!(inst.op, Opcode::End | Opcode::Delegate(_)) {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(start + offset);
            }
        }
    }
    None
}
