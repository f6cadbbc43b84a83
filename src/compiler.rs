//! Main compiler orchestration

use log::debug;
use thiserror::Error;

use crate::ir::LoweredModule;
use crate::optimization::{self, OptimizerConfig};
use crate::wasm::codegen::WasmCodeGen;

pub type CompilerResult<T> = Result<T, CompilerError>;

#[derive(Debug, Error)]
pub enum CompilerError {
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("WASM encoding error: {0}")]
    WasmError(String),

    #[error("WASM validation error: {0}")]
    ValidationError(String),
}

/// Optimizing back end: lowered IR in, WebAssembly binary out
pub struct Compiler {
    config: OptimizerConfig,
}

impl Compiler {
    /// Create a new compiler with default settings
    pub fn new() -> Self {
        Self {
            config: OptimizerConfig::default(),
        }
    }

    /// Set optimization level (0-3)
    pub fn with_opt_level(mut self, level: u8) -> Self {
        self.config = self.config.with_level(level);
        self
    }

    pub fn with_config(mut self, config: OptimizerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Rewrite the module in place according to the configuration
    pub fn optimize(&self, module: &mut LoweredModule) {
        optimization::optimize(module, &self.config);
    }

    /// Optimize, assemble and validate a lowered module
    pub fn compile(&self, mut module: LoweredModule) -> CompilerResult<Vec<u8>> {
        // Step 1: Apply optimization passes
        self.optimize(&mut module);

        // Step 2: Generate WebAssembly
        let mut codegen = WasmCodeGen::new();
        let wasm_bytes = codegen
            .generate(&module)
            .map_err(CompilerError::WasmError)?;

        // Step 3: Reject anything the engine would refuse to load
        crate::wasm::validate(&wasm_bytes)?;

        if self.config.verbose {
            debug!(
                target: "opt",
                "assembled {} functions into {} bytes",
                module.functions.len(),
                wasm_bytes.len()
            );
        }

        Ok(wasm_bytes)
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}
