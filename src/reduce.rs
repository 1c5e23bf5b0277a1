//! Rule reduction against an installed-file manifest.
//!
//! A built image ships only a subset of the paths the master rule source
//! names. Reduction drops rules for files that were never installed and
//! substitutes the manifest's real content hashes for whatever the source
//! carried, so the packed policy always matches the image it protects.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::config;
use crate::rules::{parse_rule_line, ParsedRule};
use crate::trie::HASH_LEN;

/// Which partition an installed file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    Normal,
    Recovery,
}

impl Partition {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(Partition::Normal),
            "recovery" => Some(Partition::Recovery),
            _ => None,
        }
    }
}

/// The files actually present on a built image, keyed by (path, partition).
///
/// Manifest line format: `<path> <sha256-hex> <normal|recovery>`. Blank
/// lines and `#` comments are ignored; entries outside the policy-relevant
/// prefixes (`config::POLICY_PATH_PREFIXES`) are ignored as well.
pub struct Manifest {
    entries: HashMap<(String, Partition), [u8; HASH_LEN]>,
}

impl Manifest {
    /// Parse manifest text. Returns the manifest and the number of lines
    /// skipped as unparseable (each already reported with a diagnostic).
    pub fn parse(text: &str) -> (Self, usize) {
        let mut entries = HashMap::new();
        let mut skipped = 0;
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let parsed = (|| {
                let path = fields.next()?;
                let hash_hex = fields.next()?;
                let partition = Partition::parse(fields.next()?)?;
                if fields.next().is_some() {
                    return None;
                }
                let mut hash = [0u8; HASH_LEN];
                hex::decode_to_slice(hash_hex, &mut hash).ok()?;
                Some((path, hash, partition))
            })();
            let Some((path, hash, partition)) = parsed else {
                eprintln!("  [WARN] skipping manifest line {}: {}", lineno + 1, line);
                skipped += 1;
                continue;
            };
            if !config::is_policy_path(path) {
                continue;
            }
            entries.insert((path.to_string(), partition), hash);
        }
        (Self { entries }, skipped)
    }

    /// Load a manifest file. Unreadable files are fatal: the reducer is a
    /// build step, and a missing manifest means the image build is broken.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        let (manifest, skipped) = Self::parse(&text);
        if skipped > 0 {
            eprintln!("  [WARN] {} manifest line(s) skipped", skipped);
        }
        Ok(manifest)
    }

    pub fn hash_for(&self, path: &str, partition: Partition) -> Option<&[u8; HASH_LEN]> {
        self.entries.get(&(path.to_string(), partition))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of a reduction run.
pub struct Reduction {
    /// The reduced rule source.
    pub output: String,
    /// Rules re-emitted with a rebuilt annotation.
    pub kept: usize,
    /// Rules dropped because no installed file matched.
    pub dropped: usize,
    /// Lines with no recognizable rule syntax, copied verbatim.
    pub passed_through: usize,
}

/// Stream the rule source, dropping rules for absent files and rebuilding
/// integrity annotations from the manifest's live hashes.
pub fn reduce(rules_text: &str, manifest: &Manifest) -> Reduction {
    let mut output = String::new();
    let mut kept = 0;
    let mut dropped = 0;
    let mut passed_through = 0;

    for line in rules_text.lines() {
        let Some(rule) = parse_rule_line(line) else {
            output.push_str(line);
            output.push('\n');
            passed_through += 1;
            continue;
        };

        let normal = manifest.hash_for(rule.primary, Partition::Normal);
        let recovery = manifest.hash_for(rule.primary, Partition::Recovery);

        if normal.is_none() && recovery.is_none() {
            if rule.is_default {
                // Compiled-in default: keep, but without a stale hash.
                output.push_str(&strip_annotation(line, &rule));
                output.push('\n');
                kept += 1;
            } else {
                eprintln!(
                    "  [WARN] dropping rule with no installed file: {}(\"{}\")",
                    rule.tag, rule.primary
                );
                dropped += 1;
            }
            continue;
        }

        let mut annotation = String::new();
        if let Some(hash) = normal {
            annotation.push('N');
            annotation.push_str(&hex::encode(hash));
        }
        if let Some(hash) = recovery {
            annotation.push('R');
            annotation.push_str(&hex::encode(hash));
        }

        let stripped = strip_annotation(line, &rule);
        let mut rebuilt = stripped;
        rebuilt.insert_str(rule.body_end, &format!(" \"{}\"", annotation));
        output.push_str(&rebuilt);
        output.push('\n');
        kept += 1;
    }

    Reduction {
        output,
        kept,
        dropped,
        passed_through,
    }
}

/// Remove the quoted integrity annotation from a rule line, keeping
/// everything else (including any trailing marker) in place.
fn strip_annotation(line: &str, rule: &ParsedRule<'_>) -> String {
    match rule.annotation_span {
        Some((start, end)) => {
            format!("{}{}", line[..start].trim_end(), &line[end..])
        }
        None => line.to_string(),
    }
}
