//! Show command - inspects a previously packed policy blob.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::inspect::{inspect, render_report};

/// Execute the show command. Corrupt input produces warnings in the
/// report, never a failure: the inspector exists to examine exactly the
/// blobs that are broken.
pub fn cmd_show(binary_input: &Path, json: bool) -> Result<()> {
    let bytes = fs::read(binary_input)
        .with_context(|| format!("Failed to read {}", binary_input.display()))?;
    let report = inspect(&bytes);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_report(&report));
    }
    Ok(())
}
