//! WebAssembly Stack Optimizer
//!
//! Rewrites the lowered stack-machine IR of a JavaScript-to-WebAssembly
//! compiler before it is assembled: inlining of small functions, windowed
//! peephole rewrites, dead-local removal and constant folding, followed by
//! assembly and validation of the final binary.

pub mod compiler;
pub mod ir;
pub mod optimization;
pub mod wasm;

pub use compiler::{Compiler, CompilerError, CompilerResult};
pub use ir::{LoweredFunction, LoweredModule};
pub use optimization::{optimize, OptLevel, OptimizerConfig};
