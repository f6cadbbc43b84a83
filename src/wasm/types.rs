//! WebAssembly value types and function signatures

use wasm_encoder::ValType;

/// Value types the lowered IR works with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueType {
    I32,
    I64,
    F64,
}

impl ValueType {
    /// Convert to wasm-encoder ValType
    pub fn to_val_type(self) -> ValType {
        match self {
            ValueType::I32 => ValType::I32,
            ValueType::I64 => ValType::I64,
            ValueType::F64 => ValType::F64,
        }
    }
}

/// Block signature of a structured control instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlockType {
    #[default]
    Empty,
    Value(ValueType),
}

impl BlockType {
    pub fn from_returns(returns: Option<ValueType>) -> Self {
        returns.map_or(BlockType::Empty, BlockType::Value)
    }

    /// Number of values the block leaves on the stack
    pub fn arity(self) -> usize {
        match self {
            BlockType::Empty => 0,
            BlockType::Value(_) => 1,
        }
    }

    pub fn to_block_type(self) -> wasm_encoder::BlockType {
        match self {
            BlockType::Empty => wasm_encoder::BlockType::Empty,
            BlockType::Value(ty) => wasm_encoder::BlockType::Result(ty.to_val_type()),
        }
    }
}

/// Function signature in WebAssembly
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionSignature {
    pub params: Vec<ValueType>,
    pub results: Vec<ValueType>,
}

impl FunctionSignature {
    pub fn new(params: Vec<ValueType>, results: Option<ValueType>) -> Self {
        Self {
            params,
            results: results.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_type_arity() {
        assert_eq!(BlockType::Empty.arity(), 0);
        assert_eq!(BlockType::from_returns(Some(ValueType::F64)).arity(), 1);
        assert_eq!(BlockType::from_returns(None), BlockType::Empty);
    }

    #[test]
    fn test_signature_results() {
        let sig = FunctionSignature::new(vec![ValueType::I32], None);
        assert!(sig.results.is_empty());

        let sig = FunctionSignature::new(vec![], Some(ValueType::I64));
        assert_eq!(sig.results, vec![ValueType::I64]);
    }
}
