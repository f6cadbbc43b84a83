//! Inlining of small non-recursive functions into their callers

use std::collections::{HashMap, HashSet};

use itertools::Itertools;
use log::debug;

use super::depth::{matching_end, DepthTracker};
use super::OptimizerConfig;
use crate::ir::{Instruction, LoweredFunction, LoweredModule, Opcode};
use crate::wasm::runtime::locals::INLINE_PARAM_PREFIX;
use crate::wasm::types::BlockType;

/// Inline every eligible function at all of its call sites and drop it from
/// the function table. Returns whether anything was inlined.
pub fn inline_functions(module: &mut LoweredModule, config: &OptimizerConfig) -> bool {
    let tail_called = tail_call_targets(module);

    let candidates: Vec<String> = module
        .functions
        .iter()
        .rev()
        .filter(|f| ineligibility(f, &tail_called).is_empty())
        .map(|f| f.name.clone())
        .collect();

    if config.verbose {
        debug!(
            target: "opt",
            "found inline candidates: {} ({}/{})",
            candidates.join(", "),
            candidates.len(),
            module.functions.len().saturating_sub(1)
        );
        for func in module.functions.iter().filter(|f| !f.is_entry()) {
            let reasons = ineligibility(func, &tail_called);
            if !reasons.is_empty() {
                debug!(target: "opt", "not inlining {}: {}", func.name, reasons.join(", "));
            }
        }
    }

    let mut changed = false;
    for name in candidates {
        let Some(callee) = module.function_by_name(&name).cloned() else {
            continue;
        };

        // earlier inlining may have grown the body
        let tail_called = tail_call_targets(module);
        let reasons = ineligibility(&callee, &tail_called);
        if !reasons.is_empty() {
            if config.verbose {
                debug!(target: "opt", "no longer inlining {}: {}", callee.name, reasons.join(", "));
            }
            continue;
        }

        let body = prepare_body(&callee, &signatures(module));
        for caller in module.functions.iter_mut() {
            if caller.index == callee.index {
                continue;
            }

            let sites = inline_call_sites(caller, &callee, &body, config);
            if sites > 0 && callee.uses_memory {
                caller.uses_memory = true;
            }
        }

        module.remove_function(callee.index);
        changed = true;
    }

    changed
}

/// Reasons a function cannot be inlined; empty when it can
fn ineligibility(func: &LoweredFunction, tail_called: &HashSet<u32>) -> Vec<&'static str> {
    let mut reasons = Vec::new();

    if func.is_entry() {
        reasons.push("entry point");
    }
    if func.locals.len() != func.params.len() {
        reasons.push("declares locals beyond its parameters");
    }
    let returns = func
        .wasm
        .iter()
        .filter(|inst| inst.op == Opcode::Return)
        .count();
    if func.returns.is_some() && returns > 1 {
        reasons.push("returns from more than one place");
    }
    if func.calls_self() {
        reasons.push("calls itself");
    }
    if func.throws || func.wasm.iter().any(|inst| inst.op.is_exception_op()) {
        reasons.push("may throw");
    }
    if func
        .wasm
        .iter()
        .any(|inst| matches!(inst.op, Opcode::ReturnCall(_)))
    {
        reasons.push("makes a tail call");
    }
    if tail_called.contains(&func.index) {
        reasons.push("is the target of a tail call");
    }

    reasons
}

fn tail_call_targets(module: &LoweredModule) -> HashSet<u32> {
    module
        .functions
        .iter()
        .flat_map(|f| f.wasm.iter())
        .filter_map(|inst| match inst.op {
            Opcode::ReturnCall(target) => Some(target),
            _ => None,
        })
        .collect()
}

/// Parameter and result counts of every callable function
type Signatures = HashMap<u32, (usize, usize)>;

fn signatures(module: &LoweredModule) -> Signatures {
    let imports = module
        .imports
        .iter()
        .enumerate()
        .map(|(i, import)| (i as u32, (import.params.len(), import.returns.iter().count())));
    let functions = module
        .functions
        .iter()
        .map(|func| (func.index, (func.params.len(), func.returns.iter().count())));
    imports.chain(functions).collect()
}

/// Operand stack height after the top level of `body`, when it can be
/// followed without executing branches
fn stack_height(body: &[Instruction], signatures: &Signatures) -> Option<usize> {
    let mut height = 0usize;
    let mut i = 0;
    while i < body.len() {
        let (pops, pushes) = match &body[i].op {
            Opcode::Block(ty) | Opcode::Loop(ty) | Opcode::Try(ty) => {
                i = matching_end(body, i)?;
                (0, ty.arity())
            }
            Opcode::If(ty) => {
                i = matching_end(body, i)?;
                (1, ty.arity())
            }
            Opcode::Call(target) => *signatures.get(target)?,
            op => op.stack_effect()?,
        };
        height = height.checked_sub(pops)? + pushes;
        i += 1;
    }
    Some(height)
}

/// Callee body ready for splicing. A trailing `return` is dropped when it
/// leaves exactly the results on the stack; a body that still leaves the
/// function early, or whose `return` discards extra values, is wrapped in a
/// block whose label replaces the function label.
fn prepare_body(callee: &LoweredFunction, signatures: &Signatures) -> Vec<Instruction> {
    let mut body = callee.wasm.clone();
    if body.last().is_some_and(|inst| inst.op == Opcode::Return) {
        let results = callee.returns.iter().count();
        if stack_height(&body[..body.len() - 1], signatures) == Some(results) {
            body.pop();
        }
    }

    if !exits_early(&body) {
        return body;
    }

    let mut wrapped = Vec::with_capacity(body.len() + 2);
    wrapped.push(Instruction::new(Opcode::Block(BlockType::from_returns(
        callee.returns,
    ))));

    let mut tracker = DepthTracker::new();
    for mut inst in body {
        if inst.op == Opcode::Return {
            inst.op = Opcode::Br(tracker.depth() as u32);
        }
        tracker.observe(&inst.op);
        wrapped.push(inst);
    }

    wrapped.push(Instruction::new(Opcode::End));
    wrapped
}

/// Whether `body` returns, or branches to the function label, anywhere
fn exits_early(body: &[Instruction]) -> bool {
    let mut tracker = DepthTracker::new();
    for inst in body {
        let depth = tracker.depth() as u32;
        let exits = match &inst.op {
            Opcode::Return => true,
            Opcode::Br(n) | Opcode::BrIf(n) => *n >= depth,
            Opcode::BrTable(targets, default) => {
                *default >= depth || targets.iter().any(|n| *n >= depth)
            }
            _ => false,
        };
        if exits {
            return true;
        }
        tracker.observe(&inst.op);
    }
    false
}

/// Replace every call to `callee` in `caller`. Returns the number of sites.
fn inline_call_sites(
    caller: &mut LoweredFunction,
    callee: &LoweredFunction,
    body: &[Instruction],
    config: &OptimizerConfig,
) -> usize {
    let mut sites = 0;
    let mut i = 0;

    while i < caller.wasm.len() {
        if caller.wasm[i].op != Opcode::Call(callee.index) {
            i += 1;
            continue;
        }

        if config.verbose {
            debug!(target: "opt", "inlining call for {} (in {})", callee.name, caller.name);
        }
        caller.wasm.remove(i);

        // arguments were pushed left to right, so they pop right to left
        let mut param_locals = vec![0u32; callee.params.len()];
        let mut stores = Vec::with_capacity(callee.params.len());
        for (j, ty) in callee.params.iter().enumerate().rev() {
            let name = format!("{}{}_param_{}", INLINE_PARAM_PREFIX, callee.name, j);
            let local = caller.add_local(name, *ty);
            param_locals[j] = local;
            stores.push(Instruction::new(Opcode::LocalSet(local)));
        }

        let mut inlined = body.to_vec();
        for inst in &mut inlined {
            if let Some(local) = inst.op.local_index_mut() {
                if let Some(&fresh) = param_locals.get(*local as usize) {
                    if config.verbose {
                        debug!(target: "opt", "replacing local operand in inlined body ({} -> {})", local, fresh);
                    }
                    *local = fresh;
                }
            }
        }

        let spliced = stores.len() + inlined.len();
        caller.wasm.splice(i..i, stores.into_iter().chain(inlined));
        i += spliced;
        sites += 1;
    }

    sites
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ImportedFunction;
    use crate::wasm::types::ValueType;
    use pretty_assertions::assert_eq;
    use Opcode::*;

    fn ops(func: &LoweredFunction) -> Vec<Opcode> {
        func.wasm.iter().map(|inst| inst.op.clone()).collect()
    }

    fn print_import() -> ImportedFunction {
        ImportedFunction {
            module: "env".into(),
            name: "print".into(),
            params: vec![ValueType::I32],
            returns: None,
        }
    }

    #[test]
    fn test_inline_add1() {
        let mut module = LoweredModule::new();
        module.functions = vec![
            LoweredFunction::new(0, "add1", &[("x", ValueType::I32)], Some(ValueType::I32))
                .with_body([LocalGet(0), I32Const(1), I32Add, Return]),
            LoweredFunction::new(1, "main", &[], Some(ValueType::I32))
                .with_body([I32Const(5), Call(0), Return]),
        ];

        assert!(inline_functions(&mut module, &OptimizerConfig::default()));

        assert_eq!(module.functions.len(), 1);
        let main = &module.functions[0];
        assert_eq!(main.index, 0);
        assert_eq!(
            ops(main),
            vec![I32Const(5), LocalSet(0), LocalGet(0), I32Const(1), I32Add, Return]
        );
        assert_eq!(main.local_name(0), Some("#inline_add1_param_0"));
    }

    #[test]
    fn test_arguments_stored_in_reverse() {
        let mut module = LoweredModule::new();
        module.functions = vec![
            LoweredFunction::new(
                0,
                "sub",
                &[("a", ValueType::I32), ("b", ValueType::I32)],
                Some(ValueType::I32),
            )
            .with_body([LocalGet(0), LocalGet(1), I32Sub, Return]),
            LoweredFunction::new(1, "main", &[("n", ValueType::I32)], Some(ValueType::I32))
                .with_body([LocalGet(0), I32Const(2), Call(0), Return]),
        ];

        inline_functions(&mut module, &OptimizerConfig::default());

        let main = &module.functions[0];
        let a = main.local("#inline_sub_param_0").unwrap().index;
        let b = main.local("#inline_sub_param_1").unwrap().index;
        assert_eq!(b, 1);
        assert_eq!(a, 2);
        assert_eq!(
            ops(main),
            vec![
                LocalGet(0),
                I32Const(2),
                LocalSet(b),
                LocalSet(a),
                LocalGet(a),
                LocalGet(b),
                I32Sub,
                Return
            ]
        );
    }

    #[test]
    fn test_renumbers_functions_after_removal() {
        let mut module = LoweredModule::new();
        module.imports.push(print_import());
        module.functions = vec![
            LoweredFunction::new(1, "log", &[], None).with_body([I32Const(7), Call(0)]),
            LoweredFunction::new(2, "fib", &[("n", ValueType::I32)], Some(ValueType::I32))
                .with_body([LocalGet(0), Call(2), Return]),
            LoweredFunction::new(3, "main", &[], None)
                .with_body([Call(1), I32Const(3), Call(2), Drop]),
        ];
        module.functions[0].uses_memory = true;

        inline_functions(&mut module, &OptimizerConfig::default());

        assert!(module.function_by_name("log").is_none());
        let fib = module.function_by_name("fib").unwrap();
        assert_eq!(fib.index, 1);
        assert_eq!(ops(fib), vec![LocalGet(0), Call(1), Return]);

        let main = module.function_by_name("main").unwrap();
        assert_eq!(main.index, 2);
        assert!(main.uses_memory);
        assert_eq!(ops(main), vec![I32Const(7), Call(0), I32Const(3), Call(1), Drop]);
    }

    #[test]
    fn test_ineligible_functions_are_kept() {
        let mut with_local =
            LoweredFunction::new(0, "tmp", &[], None).with_body([I32Const(1), LocalSet(0)]);
        with_local.add_local("t", ValueType::I32);

        let mut throwing = LoweredFunction::new(1, "fail", &[], None).with_body([Throw(0)]);
        throwing.throws = true;

        let mut module = LoweredModule::new();
        module.functions = vec![
            with_local,
            throwing,
            LoweredFunction::new(2, "two", &[], Some(ValueType::I32)).with_body([
                I32Const(1),
                If(BlockType::Empty),
                I32Const(1),
                Return,
                End,
                I32Const(2),
                Return,
            ]),
            LoweredFunction::new(3, "main", &[], None).with_body([
                Call(0),
                Call(1),
                Call(2),
                Drop,
            ]),
        ];

        assert!(!inline_functions(&mut module, &OptimizerConfig::default()));
        assert_eq!(module.functions.len(), 4);
    }

    #[test]
    fn test_tail_called_function_is_kept() {
        let mut module = LoweredModule::new();
        module.functions = vec![
            LoweredFunction::new(0, "one", &[], Some(ValueType::I32)).with_body([I32Const(1)]),
            LoweredFunction::new(1, "main", &[], Some(ValueType::I32))
                .with_body([ReturnCall(0)]),
        ];

        assert!(!inline_functions(&mut module, &OptimizerConfig::default()));
        assert_eq!(module.functions.len(), 2);
    }

    #[test]
    fn test_early_return_is_wrapped() {
        let mut module = LoweredModule::new();
        module.functions = vec![
            LoweredFunction::new(0, "guard", &[("x", ValueType::I32)], None).with_body([
                LocalGet(0),
                If(BlockType::Empty),
                Return,
                End,
                I32Const(9),
                GlobalSet(0),
            ]),
            LoweredFunction::new(1, "main", &[], None).with_body([I32Const(0), Call(0)]),
        ];

        inline_functions(&mut module, &OptimizerConfig::default());

        let main = &module.functions[0];
        assert_eq!(
            ops(main),
            vec![
                I32Const(0),
                LocalSet(0),
                Block(BlockType::Empty),
                LocalGet(0),
                If(BlockType::Empty),
                Br(1),
                End,
                I32Const(9),
                GlobalSet(0),
                End,
            ]
        );
    }

    #[test]
    fn test_balanced_trailing_return_is_dropped() {
        let mut module = LoweredModule::new();
        module.functions = vec![
            LoweredFunction::new(0, "seven", &[], Some(ValueType::I32))
                .with_body([I32Const(3), I32Const(4), I32Add, Return]),
            LoweredFunction::new(1, "main", &[], Some(ValueType::I32)).with_body([Call(0)]),
        ];

        inline_functions(&mut module, &OptimizerConfig::default());
        assert_eq!(
            ops(&module.functions[0]),
            vec![I32Const(3), I32Const(4), I32Add]
        );
    }

    #[test]
    fn test_return_with_extra_values_is_wrapped() {
        let mut module = LoweredModule::new();
        module.functions = vec![
            LoweredFunction::new(0, "pick", &[], Some(ValueType::I32))
                .with_body([I32Const(1), I32Const(2), Return]),
            LoweredFunction::new(1, "main", &[], Some(ValueType::I32)).with_body([Call(0)]),
        ];

        inline_functions(&mut module, &OptimizerConfig::default());
        assert_eq!(
            ops(&module.functions[0]),
            vec![
                Block(BlockType::Value(ValueType::I32)),
                I32Const(1),
                I32Const(2),
                Br(0),
                End,
            ]
        );
    }

    #[test]
    fn test_stack_height_follows_calls_and_regions() {
        let mut signatures = Signatures::new();
        signatures.insert(0, (1, 0));
        signatures.insert(1, (2, 1));

        let body: Vec<Instruction> = [
            I32Const(1),
            I32Const(2),
            Call(1),
            F64Const(0.5),
            Call(0),
            Block(BlockType::Value(ValueType::I32)),
            I32Const(3),
            End,
        ]
        .map(Instruction::from)
        .to_vec();
        assert_eq!(stack_height(&body, &signatures), Some(2));

        let underflow = [Drop].map(Instruction::from);
        assert_eq!(stack_height(&underflow, &signatures), None);
        let unknown = [Call(7)].map(Instruction::from);
        assert_eq!(stack_height(&unknown, &signatures), None);
    }

    #[test]
    fn test_callee_inlined_into_callee_is_rechecked() {
        // inner is processed first and grows outer by a parameter local
        let mut module = LoweredModule::new();
        module.functions = vec![
            LoweredFunction::new(0, "outer", &[], Some(ValueType::I32))
                .with_body([I32Const(2), Call(1)]),
            LoweredFunction::new(1, "inner", &[("v", ValueType::I32)], Some(ValueType::I32))
                .with_body([LocalGet(0), I32Const(1), I32Add]),
            LoweredFunction::new(2, "main", &[], Some(ValueType::I32)).with_body([Call(0)]),
        ];

        inline_functions(&mut module, &OptimizerConfig::default());

        assert!(module.function_by_name("inner").is_none());
        let outer = module.function_by_name("outer").unwrap();
        assert_eq!(outer.index, 0);
        assert_eq!(
            ops(outer),
            vec![I32Const(2), LocalSet(0), LocalGet(0), I32Const(1), I32Add]
        );

        let main = module.function_by_name("main").unwrap();
        assert_eq!(main.index, 1);
        assert_eq!(ops(main), vec![Call(0)]);
    }
}
