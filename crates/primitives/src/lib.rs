//! Primitive types shared by the forked-state crates.

#![warn(missing_docs)]

pub use revm_bytecode::Bytecode;
pub use revm_primitives::{
    address, alloy_primitives::U64, b256, bytes, hash_map, hex, keccak256, Address, Bytes,
    HashMap, HashSet, B256, KECCAK_EMPTY, U256,
};

/// Root hash of an empty trie.
pub const KECCAK_NULL_RLP: B256 =
    b256!("0x56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421");

/// Computes the hash of the provided code, returning [`KECCAK_EMPTY`] for empty
/// code.
pub fn code_hash(code: &[u8]) -> B256 {
    if code.is_empty() {
        KECCAK_EMPTY
    } else {
        keccak256(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_code_hash() {
        assert_eq!(code_hash(&[]), KECCAK_EMPTY);
    }

    #[test]
    fn non_empty_code_hash() {
        let code = [0x60, 0x00, 0x60, 0x00, 0xf3];
        assert_eq!(code_hash(&code), keccak256(code));
    }
}
