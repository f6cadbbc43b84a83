//! Windowed pattern rewrites over a single function's instruction stream.
//!
//! The scan walks the stream left to right. At each position the rules below
//! are tried in order against the window ending there; the first that matches
//! rewrites the stream and the scan resumes at the earliest position it
//! touched, so rewrites cascade.
//!
//! | Rule | Pattern | Replacement |
//! |------|---------|-------------|
//! | `set-get` | `local.set L; local.get L` | `local.tee L` |
//! | `get-drop` | `local.get`/`global.get; drop` | (remove) |
//! | `tee-drop` | `local.tee L; drop` | `local.set L` |
//! | `const-drop` | `*.const; drop` | (remove) |
//! | `eqz` | `i32.const 0; i32.eq` | `i32.eqz` |
//! | `extend-wrap` | `i64.extend_i32_*; i32.wrap_i64` | (remove) |
//! | `convert-trunc` | `f64.convert_i32_s; i32.trunc_*_f64_s` | (remove) |
//! | `fold-trunc` | `f64.const; *.trunc_sat_f64_*` | integer const |
//! | `fold-convert` | `*.const; f64.convert_*` | `f64.const` |
//! | `tail-call` | `call f; return` | `return_call f` |
//! | `loop-increment` | `end; local.get L; local.get L` at depth 2 | single `local.get` |
//! | `post-increment` | `local.get L; local.get L; const; add; local.set L; drop` | drop first get |
//! | `param-shuffle` | `local.set X; local.tee Y; local.get X` | (remove) |
//! | `transparent-block` | `block ... end` without branches | contents |
//! | `dead-type-case` | guard for a type never constructed | (remove) |
//! | `empty-type-switch` | dispatch region without cases | `drop` |
//! | `dead-last-type` | store to a never-read `#last_type` | `drop` |

use log::debug;

use super::depth::{matching_end, DepthTracker};
use super::PassContext;
use crate::ir::{Instruction, LoweredFunction, Marker, Opcode};
use crate::wasm::runtime::locals::LAST_TYPE;
use crate::wasm::types::BlockType;

/// Per-function facts the rules consult
struct Scope<'a> {
    ctx: &'a PassContext<'a>,
    last_type: Option<u32>,
    returns: usize,
}

/// Rewrites the stream, returning the position to resume scanning from
type Rule = fn(&mut Vec<Instruction>, usize, &DepthTracker, &Scope) -> Option<usize>;

const RULES: &[(&str, Rule)] = &[
    ("set-get", set_get),
    ("get-drop", get_drop),
    ("tee-drop", tee_drop),
    ("const-drop", const_drop),
    ("eqz", eqz),
    ("extend-wrap", extend_wrap),
    ("convert-trunc", convert_trunc),
    ("fold-trunc", fold_trunc),
    ("fold-convert", fold_convert),
    ("tail-call", tail_call),
    ("loop-increment", loop_increment),
    ("post-increment", post_increment),
    ("param-shuffle", param_shuffle),
    ("transparent-block", transparent_block),
    ("dead-type-case", dead_type_case),
    ("empty-type-switch", empty_type_switch),
    ("dead-last-type", dead_last_type),
];

/// Run one full scan over `func`. Returns whether any rule fired.
pub fn rewrite(func: &mut LoweredFunction, ctx: &PassContext) -> bool {
    let scope = Scope {
        ctx,
        last_type: func.local(LAST_TYPE).map(|local| local.index),
        returns: func.returns.map_or(0, |_| 1),
    };

    let wasm = &mut func.wasm;
    let mut tracker = DepthTracker::new();
    let mut changed = false;
    let mut i = 0;

    'scan: while i < wasm.len() {
        tracker.observe(&wasm[i].op);

        for (name, rule) in RULES {
            if let Some(resume) = rule(wasm, i, &tracker, &scope) {
                if ctx.config.verbose {
                    debug!(target: "opt", "{}: applied {} at {}", func.name, name, i);
                }
                changed = true;
                i = resume;
                tracker = DepthTracker::scan(&wasm[..i]);
                continue 'scan;
            }
        }

        i += 1;
    }

    changed
}

/// Opcodes of the window `wasm[i - N + 1..=i]`, if it exists
fn window<const N: usize>(wasm: &[Instruction], i: usize) -> Option<[&Opcode; N]> {
    let start = (i + 1).checked_sub(N)?;
    let slice = wasm.get(start..=i)?;
    Some(std::array::from_fn(|k| &slice[k].op))
}

fn count_gets(wasm: &[Instruction], local: u32) -> usize {
    wasm.iter()
        .filter(|inst| inst.op == Opcode::LocalGet(local))
        .count()
}

fn set_get(wasm: &mut Vec<Instruction>, i: usize, _: &DepthTracker, _: &Scope) -> Option<usize> {
    let [Opcode::LocalSet(set), Opcode::LocalGet(get)] = window::<2>(wasm, i)? else {
        return None;
    };
    if set != get {
        return None;
    }

    let local = *set;
    wasm[i - 1].op = Opcode::LocalTee(local);
    wasm.remove(i);
    Some(i - 1)
}

fn get_drop(wasm: &mut Vec<Instruction>, i: usize, _: &DepthTracker, _: &Scope) -> Option<usize> {
    let [Opcode::LocalGet(_) | Opcode::GlobalGet(_), Opcode::Drop] = window::<2>(wasm, i)? else {
        return None;
    };

    wasm.drain(i - 1..=i);
    Some(i - 1)
}

fn tee_drop(wasm: &mut Vec<Instruction>, i: usize, _: &DepthTracker, _: &Scope) -> Option<usize> {
    let [Opcode::LocalTee(local), Opcode::Drop] = window::<2>(wasm, i)? else {
        return None;
    };

    let local = *local;
    wasm[i - 1].op = Opcode::LocalSet(local);
    wasm.remove(i);
    Some(i - 1)
}

fn const_drop(wasm: &mut Vec<Instruction>, i: usize, _: &DepthTracker, _: &Scope) -> Option<usize> {
    let [value, Opcode::Drop] = window::<2>(wasm, i)? else {
        return None;
    };
    if !value.is_const() {
        return None;
    }

    wasm.drain(i - 1..=i);
    Some(i - 1)
}

fn eqz(wasm: &mut Vec<Instruction>, i: usize, _: &DepthTracker, _: &Scope) -> Option<usize> {
    let replacement = match window::<2>(wasm, i)? {
        [Opcode::I32Const(0), Opcode::I32Eq] => Opcode::I32Eqz,
        [Opcode::I64Const(0), Opcode::I64Eq] => Opcode::I64Eqz,
        _ => return None,
    };

    wasm[i].op = replacement;
    wasm.remove(i - 1);
    Some(i - 1)
}

fn extend_wrap(wasm: &mut Vec<Instruction>, i: usize, _: &DepthTracker, _: &Scope) -> Option<usize> {
    let [Opcode::I64ExtendI32S | Opcode::I64ExtendI32U, Opcode::I32WrapI64] = window::<2>(wasm, i)?
    else {
        return None;
    };

    wasm.drain(i - 1..=i);
    Some(i - 1)
}

fn convert_trunc(wasm: &mut Vec<Instruction>, i: usize, _: &DepthTracker, _: &Scope) -> Option<usize> {
    // every i32 is exact in f64, so only a matching signedness round-trips
    match window::<2>(wasm, i)? {
        [Opcode::F64ConvertI32S, Opcode::I32TruncSatF64S | Opcode::I32TruncF64S]
        | [Opcode::F64ConvertI32U, Opcode::I32TruncSatF64U | Opcode::I32TruncF64U] => {}
        _ => return None,
    }

    wasm.drain(i - 1..=i);
    Some(i - 1)
}

fn fold_trunc(wasm: &mut Vec<Instruction>, i: usize, _: &DepthTracker, _: &Scope) -> Option<usize> {
    let [Opcode::F64Const(value), conversion] = window::<2>(wasm, i)? else {
        return None;
    };

    // `as` saturates and maps NaN to 0, exactly like trunc_sat
    let value = *value;
    let folded = match conversion {
        Opcode::I32TruncSatF64S => Opcode::I32Const(value as i32),
        Opcode::I32TruncSatF64U => Opcode::I32Const(value as u32 as i32),
        Opcode::I64TruncSatF64S => Opcode::I64Const(value as i64),
        Opcode::I64TruncSatF64U => Opcode::I64Const(value as u64 as i64),
        _ => return None,
    };

    wasm[i - 1].op = folded;
    wasm.remove(i);
    Some(i - 1)
}

fn fold_convert(wasm: &mut Vec<Instruction>, i: usize, _: &DepthTracker, _: &Scope) -> Option<usize> {
    let folded = match window::<2>(wasm, i)? {
        [Opcode::I32Const(n), Opcode::F64ConvertI32S] => *n as f64,
        [Opcode::I32Const(n), Opcode::F64ConvertI32U] => *n as u32 as f64,
        [Opcode::I64Const(n), Opcode::F64ConvertI64S] => *n as f64,
        [Opcode::I64Const(n), Opcode::F64ConvertI64U] => *n as u64 as f64,
        _ => return None,
    };

    wasm[i - 1].op = Opcode::F64Const(folded);
    wasm.remove(i);
    Some(i - 1)
}

fn tail_call(wasm: &mut Vec<Instruction>, i: usize, tracker: &DepthTracker, scope: &Scope) -> Option<usize> {
    if !scope.ctx.config.tail_calls {
        return None;
    }
    let [Opcode::Call(target), Opcode::Return] = window::<2>(wasm, i)? else {
        return None;
    };

    // a handler would be skipped, and the callee must hand back exactly our results
    let target = *target;
    if tracker.inside_try() || scope.ctx.results.get(&target) != Some(&scope.returns) {
        return None;
    }

    wasm[i - 1].op = Opcode::ReturnCall(target);
    wasm.remove(i);
    Some(i - 1)
}

/// What follows `const; add|sub; local.set L` starting at `at`
fn increment_tail(wasm: &[Instruction], at: usize, local: u32) -> Option<&Opcode> {
    let ops = wasm.get(at..at + 4)?;
    if !ops[0].op.is_const() {
        return None;
    }
    if !matches!(
        ops[1].op,
        Opcode::I32Add
            | Opcode::I32Sub
            | Opcode::I64Add
            | Opcode::I64Sub
            | Opcode::F64Add
            | Opcode::F64Sub
    ) {
        return None;
    }
    if ops[2].op != Opcode::LocalSet(local) {
        return None;
    }
    Some(&ops[3].op)
}

fn loop_increment(wasm: &mut Vec<Instruction>, i: usize, tracker: &DepthTracker, _: &Scope) -> Option<usize> {
    if tracker.depth() != 2 {
        return None;
    }
    let [Opcode::End, Opcode::LocalGet(first), Opcode::LocalGet(second)] = window::<3>(wasm, i)? else {
        return None;
    };
    if first != second {
        return None;
    }

    let local = *first;
    if increment_tail(wasm, i + 1, local)? != &Opcode::Drop {
        return None;
    }

    wasm.remove(i + 4);
    wasm.remove(i);
    Some(i)
}

fn post_increment(wasm: &mut Vec<Instruction>, i: usize, tracker: &DepthTracker, scope: &Scope) -> Option<usize> {
    let [Opcode::LocalGet(first), Opcode::LocalGet(second)] = window::<2>(wasm, i.checked_sub(4)?)?
    else {
        return None;
    };
    if first != second {
        return None;
    }

    let start = i - 5;
    let discarded_by_drop = match increment_tail(wasm, i - 3, *first)? {
        Opcode::Drop => true,
        // the branch discards the leftover value as long as its label takes none
        Opcode::Br(depth) if tracker.label_arity(*depth, scope.returns) == 0 => false,
        _ => return None,
    };

    if discarded_by_drop {
        wasm.remove(i);
    }
    wasm.remove(start);
    Some(start)
}

fn param_shuffle(wasm: &mut Vec<Instruction>, i: usize, _: &DepthTracker, _: &Scope) -> Option<usize> {
    let [Opcode::LocalSet(x), Opcode::LocalTee(y), Opcode::LocalGet(read)] = window::<3>(wasm, i)?
    else {
        return None;
    };
    let (x, y) = (*x, *y);
    if x != *read || x == y {
        return None;
    }

    // both stores must be dead for the shuffle to vanish
    if count_gets(wasm, x) != 1 || count_gets(wasm, y) != 0 {
        return None;
    }

    wasm.drain(i - 2..=i);
    Some(i - 2)
}

fn transparent_block(wasm: &mut Vec<Instruction>, i: usize, _: &DepthTracker, _: &Scope) -> Option<usize> {
    if !matches!(wasm[i].op, Opcode::Block(_)) {
        return None;
    }

    let end = matching_end(wasm, i)?;
    if wasm[end].marker == Some(Marker::TypeSwitchEnd) {
        return None;
    }
    if wasm[i + 1..end].iter().any(|inst| inst.op.references_label()) {
        return None;
    }

    wasm.remove(end);
    wasm.remove(i);
    Some(i)
}

fn dead_type_case(wasm: &mut Vec<Instruction>, i: usize, _: &DepthTracker, scope: &Scope) -> Option<usize> {
    let Some(Marker::TypeCase(ty)) = wasm[i].marker else {
        return None;
    };
    if scope.ctx.types.is_constructed(ty) {
        return None;
    }

    // the guard condition is straight-line code ending in its `if`
    let offset = wasm[i..].iter().position(|inst| {
        inst.op.opens_region() || matches!(inst.op, Opcode::End | Opcode::Else)
    })?;
    let open = i + offset;
    let Opcode::If(block_type) = wasm[open].op else {
        return None;
    };
    let end = matching_end(wasm, open)?;

    let mut depth = 0usize;
    let mut else_pos = None;
    for pos in open + 1..end {
        match wasm[pos].op {
            ref op if op.opens_region() => depth += 1,
            Opcode::End | Opcode::Delegate(_) => depth -= 1,
            Opcode::Else if depth == 0 => {
                else_pos = Some(pos);
                break;
            }
            _ => {}
        }
    }

    if scope.ctx.config.verbose {
        debug!(target: "opt", "removing case for {}, never constructed", ty);
    }

    match else_pos {
        // the else arm always runs now; a block keeps its label depth
        Some(else_pos) => {
            wasm.splice(i..=else_pos, [Instruction::new(Opcode::Block(block_type))]);
        }
        None => {
            wasm.drain(i..=end);
        }
    }

    Some(i)
}

fn empty_type_switch(wasm: &mut Vec<Instruction>, i: usize, _: &DepthTracker, _: &Scope) -> Option<usize> {
    if wasm[i].marker != Some(Marker::TypeSwitchEnd) || wasm[i].op != Opcode::End || i < 2 {
        return None;
    }
    if !matches!(wasm[i - 1].op, Opcode::Block(BlockType::Empty)) {
        return None;
    }
    let capture = &wasm[i - 2];
    if capture.marker != Some(Marker::TypeSwitch) || !matches!(capture.op, Opcode::LocalSet(_)) {
        return None;
    }

    wasm.splice(i - 2..=i, [Instruction::new(Opcode::Drop)]);
    Some(i - 2)
}

fn dead_last_type(wasm: &mut Vec<Instruction>, i: usize, _: &DepthTracker, scope: &Scope) -> Option<usize> {
    let last_type = scope.last_type?;
    let is_store = match wasm[i].op {
        Opcode::LocalSet(local) | Opcode::LocalTee(local) => local == last_type,
        _ => false,
    };
    if !is_store || count_gets(wasm, last_type) != 0 {
        return None;
    }

    if matches!(wasm[i].op, Opcode::LocalSet(_)) {
        wasm[i] = Instruction::new(Opcode::Drop);
    } else {
        wasm.remove(i);
    }
    Some(i)
}
