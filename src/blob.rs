//! Packed blob emission.
//!
//! Serialization is a pure function of the finalized arena: records go out
//! in append order, all integers little-endian, and the root sentinel's
//! hash slot is patched with the total byte length (`declared_size`) so
//! the consumer and the inspector can sanity-check truncation.

use crate::trie::{NodeLink, TrieStore, HASH_LEN};

/// Linearize the arena into the packed byte blob.
pub fn serialize(store: &TrieStore) -> Vec<u8> {
    let total = store.byte_size();
    let mut out = Vec::with_capacity(total as usize);
    for node in store.iter() {
        out.extend_from_slice(&node.next_sibling.to_le_bytes());
        out.extend_from_slice(&node.link.raw().to_le_bytes());
        out.extend_from_slice(&node.features.bits().to_le_bytes());
        out.push(node.name.len() as u8);
        if node.offset == 0 {
            // Root sentinel: declared_size lives in the hash slot.
            let mut slot = [0u8; HASH_LEN];
            slot[..4].copy_from_slice(&total.to_le_bytes());
            out.extend_from_slice(&slot);
        } else {
            out.extend_from_slice(&node.integrity_hash);
        }
        out.extend_from_slice(&node.name);
    }
    debug_assert_eq!(out.len(), total as usize);
    out
}

/// Render the packed blob as a C constant array plus a size define, for
/// builds that compile the policy straight into the consumer instead of
/// loading it from a file.
pub fn emit_as_array_literal(store: &TrieStore, symbol: &str) -> String {
    let bytes = serialize(store);
    let guard = symbol.to_uppercase();

    let mut out = String::new();
    out.push_str("/* Generated by rulepack; do not edit. */\n");
    out.push_str(&format!("#define {}_SIZE {}\n\n", guard, bytes.len()));
    out.push_str(&format!("const unsigned char {}[] = {{\n", symbol));
    for row in bytes.chunks(12) {
        out.push('\t');
        for byte in row {
            out.push_str(&format!("0x{:02x}, ", byte));
        }
        out.pop();
        out.push('\n');
    }
    out.push_str("};\n");
    out
}
