//! WebAssembly code generation and validation

pub mod codegen;
pub mod runtime;
pub mod types;

pub use codegen::WasmCodeGen;

use wasmparser::{Validator, WasmFeatures};

use crate::compiler::{CompilerError, CompilerResult};

/// Check an assembled module with tail calls and exceptions enabled
pub fn validate(bytes: &[u8]) -> CompilerResult<()> {
    let features = WasmFeatures::default()
        | WasmFeatures::TAIL_CALL
        | WasmFeatures::EXCEPTIONS
        | WasmFeatures::LEGACY_EXCEPTIONS;

    Validator::new_with_features(features)
        .validate_all(bytes)
        .map(|_| ())
        .map_err(|e| CompilerError::ValidationError(e.to_string()))
}
