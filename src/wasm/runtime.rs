//! Runtime conventions shared between code generation and the optimizer

use std::fmt;

/// Runtime type tags carried next to dynamically typed values
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuntimeType {
    Number = 0x00,
    Boolean = 0x01,
    String = 0x02,
    Undefined = 0x03,
    Object = 0x04,
    Function = 0x05,
    /// Growable array backed by linear memory
    Array = 0x10,
    /// Single-byte-per-character string backed by linear memory
    ByteString = 0x12,
}

impl RuntimeType {
    /// Tag value as pushed by `i32.const` in type checks
    pub fn id(self) -> i32 {
        self as i32
    }

    /// Whether construction of this type is recorded in the type-usage registry.
    /// Untracked types are assumed to exist in every program.
    pub fn is_tracked(self) -> bool {
        matches!(
            self,
            RuntimeType::Array | RuntimeType::String | RuntimeType::ByteString
        )
    }
}

impl fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuntimeType::Number => "number",
            RuntimeType::Boolean => "boolean",
            RuntimeType::String => "string",
            RuntimeType::Undefined => "undefined",
            RuntimeType::Object => "object",
            RuntimeType::Function => "function",
            RuntimeType::Array => "array",
            RuntimeType::ByteString => "bytestring",
        };
        f.write_str(name)
    }
}

/// Well-known local names emitted by code generation
pub mod locals {
    /// Bookkeeping slot holding the type of the last evaluated expression
    pub const LAST_TYPE: &str = "#last_type";

    /// Prefix of caller locals holding inlined arguments
    pub const INLINE_PARAM_PREFIX: &str = "#inline_";
}

/// Name of the program entry point, exported from the module
pub const ENTRY_POINT: &str = "main";

/// Memory layout for the linear memory
pub mod memory {
    /// Initial memory size in WASM pages (64KB each)
    pub const INITIAL_PAGES: u32 = 1;

    /// Maximum memory size in WASM pages
    pub const MAX_PAGES: u32 = 16;
}
