//! Reduce command - prunes a rule source against an image manifest.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::reduce::{reduce, Manifest};

/// Execute the reduce command: drop rules for files absent from the
/// manifest and refresh integrity annotations from its live hashes.
pub fn cmd_reduce(rule_source: &Path, reduced_output: &Path, manifest_file: &Path) -> Result<()> {
    let manifest = Manifest::load(manifest_file)?;
    let text = fs::read_to_string(rule_source)
        .with_context(|| format!("Failed to read rule source {}", rule_source.display()))?;

    println!("=== Reducing policy rules ===");
    println!("Source:   {}", rule_source.display());
    println!(
        "Manifest: {} ({} installed file(s))",
        manifest_file.display(),
        manifest.len()
    );
    if manifest.is_empty() {
        eprintln!(
            "  [WARN] manifest {} lists no policy-relevant files",
            manifest_file.display()
        );
    }

    let reduction = reduce(&text, &manifest);
    fs::write(reduced_output, &reduction.output)
        .with_context(|| format!("Failed to write {}", reduced_output.display()))?;

    println!();
    println!(
        "Kept {} rule(s), dropped {}, passed {} other line(s) through",
        reduction.kept, reduction.dropped, reduction.passed_through
    );
    println!("Wrote {}", reduced_output.display());
    Ok(())
}
