//! Optimization passes over the lowered IR

pub mod config;
pub mod const_fold;
pub mod dead_locals;
pub mod depth;
pub mod inline;
pub mod peephole;

use std::collections::HashMap;

use log::{debug, warn};

pub use self::config::{OptLevel, OptimizerConfig};

use crate::ir::{LoweredFunction, LoweredModule, TypeUsage};

/// Upper bound on rewrite rounds per function
pub const MAX_ITERATIONS: usize = 64;

/// Upper bound on inline rounds after the first rewrite sweep
pub const MAX_INLINE_ROUNDS: usize = 16;

/// Module-wide facts shared by the per-function passes
pub struct PassContext<'a> {
    pub(crate) config: &'a OptimizerConfig,
    pub(crate) types: &'a TypeUsage,
    /// Result count of every callable function, imports included
    pub(crate) results: HashMap<u32, usize>,
}

impl<'a> PassContext<'a> {
    fn new(module: &LoweredModule, types: &'a TypeUsage, config: &'a OptimizerConfig) -> Self {
        let imports = module
            .imports
            .iter()
            .enumerate()
            .map(|(i, import)| (i as u32, import.returns.iter().count()));
        let functions = module
            .functions
            .iter()
            .map(|func| (func.index, func.returns.iter().count()));

        Self {
            config,
            types,
            results: imports.chain(functions).collect(),
        }
    }
}

/// Apply the optimization passes the configuration asks for, in place
pub fn optimize(module: &mut LoweredModule, config: &OptimizerConfig) {
    if config.level == OptLevel::NONE {
        return;
    }

    if config.tail_calls {
        warn!("tail calls are not widely supported by hosts, use at your own risk");
    }

    let inlining = config.level >= OptLevel::INLINE && !config.disable_inlining;
    if inlining {
        inline::inline_functions(module, config);
    }

    if config.inline_only {
        return;
    }

    optimize_functions(module, config);
    if !inlining {
        return;
    }

    // dropping dead locals can shrink a function under the inline limits
    for round in 0..MAX_INLINE_ROUNDS {
        if !inline::inline_functions(module, config) {
            if config.verbose {
                debug!(target: "opt", "inlining settled after {} extra rounds", round);
            }
            return;
        }
        optimize_functions(module, config);
    }

    warn!(
        "inlining did not settle after {} extra rounds",
        MAX_INLINE_ROUNDS
    );
}

fn optimize_functions(module: &mut LoweredModule, config: &OptimizerConfig) {
    let types = module.types.clone();
    let ctx = PassContext::new(module, &types, config);
    for func in &mut module.functions {
        optimize_function(func, &ctx);
    }
}

/// Run the per-function passes until a full round changes nothing
fn optimize_function(func: &mut LoweredFunction, ctx: &PassContext) {
    let config = ctx.config;

    for iteration in 0..MAX_ITERATIONS {
        let mut changed = peephole::rewrite(func, ctx);

        if config.level >= OptLevel::FOLD {
            changed |= const_fold::fold(func, config);
        }
        if config.level >= OptLevel::INLINE {
            changed |= dead_locals::eliminate(func, config);
        }

        if !changed {
            if config.verbose {
                debug!(target: "opt", "{}: converged after {} rounds", func.name, iteration + 1);
            }
            return;
        }
    }

    warn!(
        "{}: optimization did not converge after {} rounds",
        func.name, MAX_ITERATIONS
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Instruction, Opcode};
    use crate::wasm::types::{BlockType, ValueType};
    use pretty_assertions::assert_eq;
    use Opcode::*;

    /// `add1(x) = x + 1` and `main` storing into a local it never reads
    fn sample_module() -> LoweredModule {
        let add1 = LoweredFunction::new(0, "add1", &[("x", ValueType::I32)], Some(ValueType::I32))
            .with_body([LocalGet(0), I32Const(1), I32Add]);

        let mut main = LoweredFunction::new(1, "main", &[], Some(ValueType::I32));
        let unused = main.add_local("unused", ValueType::I32);
        main.wasm = [
            Block(BlockType::Empty),
            I32Const(9),
            LocalSet(unused),
            End,
            I32Const(3),
            I32Const(4),
            I32Add,
            Call(0),
        ]
        .map(Instruction::from)
        .to_vec();

        let mut module = LoweredModule::new();
        module.functions = vec![add1, main];
        module
    }

    fn ops(func: &LoweredFunction) -> Vec<Opcode> {
        func.wasm.iter().map(|inst| inst.op.clone()).collect()
    }

    #[test]
    fn test_level_zero_is_untouched() {
        let mut module = sample_module();
        let before = module.clone();
        optimize(&mut module, &OptimizerConfig::new().with_level(0));
        assert_eq!(module.functions, before.functions);
    }

    #[test]
    fn test_level_one_peephole_only() {
        let mut module = sample_module();
        optimize(&mut module, &OptimizerConfig::new().with_level(1));

        assert_eq!(module.functions.len(), 2);
        let main = module.function_by_name("main").unwrap();
        assert_eq!(
            ops(main),
            vec![I32Const(9), LocalSet(0), I32Const(3), I32Const(4), I32Add, Call(0)]
        );
        assert!(main.local("unused").is_some());
    }

    #[test]
    fn test_level_two_inlines_and_drops_locals() {
        let mut module = sample_module();
        optimize(&mut module, &OptimizerConfig::new().with_level(2));

        assert_eq!(module.functions.len(), 1);
        let main = &module.functions[0];
        assert_eq!(main.index, 0);
        assert!(main.local("unused").is_none());
        assert!(main.has_contiguous_locals());
        assert!(!main.wasm.iter().any(|inst| matches!(inst.op, Call(_))));
        // constants stay unfolded below level 3
        assert!(ops(main).windows(3).any(|w| w == [I32Const(3), I32Const(4), I32Add]));
    }

    #[test]
    fn test_level_three_folds() {
        let mut module = sample_module();
        module.functions.retain(|f| f.is_entry());
        module.functions[0].index = 0;
        module.functions[0].wasm.pop();

        optimize(&mut module, &OptimizerConfig::new().with_level(3));
        let main = &module.functions[0];
        assert_eq!(ops(main), vec![I32Const(7)]);
    }

    #[test]
    fn test_inline_only_skips_rewrites() {
        let mut module = sample_module();
        optimize(
            &mut module,
            &OptimizerConfig::new().with_level(2).with_inline_only(true),
        );

        assert_eq!(module.functions.len(), 1);
        let main = &module.functions[0];
        assert_eq!(main.wasm[0].op, Block(BlockType::Empty));
        assert!(main.local("unused").is_some());
    }

    #[test]
    fn test_inlines_again_after_locals_are_dropped() {
        // h only becomes inlinable once its dead store and local are gone
        let mut h = LoweredFunction::new(0, "h", &[("x", ValueType::I32)], Some(ValueType::I32));
        let scratch = h.add_local("scratch", ValueType::I32);
        h.wasm = [I32Const(9), LocalSet(scratch), LocalGet(0), I32Const(1), I32Add]
            .map(Instruction::from)
            .to_vec();
        let main = LoweredFunction::new(1, "main", &[], Some(ValueType::I32))
            .with_body([I32Const(5), Call(0)]);

        let mut module = LoweredModule::new();
        module.functions = vec![h, main];
        let config = OptimizerConfig::new().with_level(2);

        optimize(&mut module, &config);
        assert_eq!(module.functions.len(), 1);
        assert_eq!(ops(&module.functions[0]), vec![I32Const(5), I32Const(1), I32Add]);

        let once = module.functions.clone();
        optimize(&mut module, &config);
        assert_eq!(module.functions, once);
    }

    #[test]
    fn test_disabled_inlining_keeps_functions() {
        let mut module = sample_module();
        optimize(
            &mut module,
            &OptimizerConfig::new().with_level(2).with_inlining(false),
        );
        assert_eq!(module.functions.len(), 2);
    }
}
