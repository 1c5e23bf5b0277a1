//! Pack command - compiles a rule source into the packed policy tree.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

use crate::blob;
use crate::config;
use crate::rules::Compiler;

/// Execute the pack command: compile `rule_source`, write the
/// source-embeddable array to `packed_output` and, if given, the raw blob
/// to `binary_output`.
pub fn cmd_pack(
    rule_source: &Path,
    packed_output: &Path,
    binary_output: Option<&Path>,
) -> Result<()> {
    let text = fs::read_to_string(rule_source)
        .with_context(|| format!("Failed to read rule source {}", rule_source.display()))?;

    println!("=== Packing policy rules ===");
    println!("Source: {}", rule_source.display());

    let mut compiler = Compiler::new();
    for line in text.lines() {
        compiler.apply_line(line)?;
    }
    let rules_compiled = compiler.rules_compiled;
    let lines_skipped = compiler.lines_skipped;
    let store = compiler.finish();

    if store.is_empty() {
        eprintln!(
            "  [WARN] packed tree is empty - no rule in {} compiled",
            rule_source.display()
        );
    }

    let bytes = blob::serialize(&store);
    let literal = blob::emit_as_array_literal(&store, config::PACKED_SYMBOL);
    fs::write(packed_output, literal)
        .with_context(|| format!("Failed to write {}", packed_output.display()))?;
    if let Some(binary_output) = binary_output {
        fs::write(binary_output, &bytes)
            .with_context(|| format!("Failed to write {}", binary_output.display()))?;
    }

    let digest = Sha256::digest(&bytes);
    println!();
    println!(
        "Packed {} rule(s) into {} node(s), {} bytes",
        rules_compiled,
        store.node_count(),
        bytes.len()
    );
    if lines_skipped > 0 {
        println!("Skipped {} unrecognized line(s)", lines_skipped);
    }
    println!("Blob sha256: {:x}", digest);
    println!("Wrote {}", packed_output.display());
    if let Some(binary_output) = binary_output {
        println!("Wrote {}", binary_output.display());
    }
    Ok(())
}
