//! Defensive inspection of packed policy blobs.
//!
//! The inspector must survive foreign, truncated, and adversarial input:
//! every offset is bounds-checked before it is dereferenced, structural
//! damage is scoped to the smallest subtree possible, and the walk is
//! bounded in both depth and revisits so a pathological offset graph can
//! neither overflow the stack nor loop forever.

use std::collections::HashSet;

use serde::Serialize;

use crate::flags::{flag_names, FeatureFlags};
use crate::trie::{Offset, HASH_LEN, MAGIC, RECORD_HEADER_LEN};

/// Deepest path level the walk will follow. Real policy trees mirror
/// filesystem paths and stay well under this.
pub const MAX_INSPECT_DEPTH: usize = 8;

/// Inspection result for a whole blob.
#[derive(Debug, Serialize)]
pub struct Report {
    pub blob_len: usize,
    pub declared_size: Option<u32>,
    /// Records actually walked (root included, damaged subtrees excluded).
    pub node_count: usize,
    pub warnings: Vec<String>,
    pub root: Option<Node>,
}

/// One walked record.
#[derive(Debug, Serialize)]
pub struct Node {
    pub name: String,
    pub offset: Offset,
    pub is_file: bool,
    pub for_recovery: bool,
    pub features: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,
    pub children: Vec<Node>,
    /// Secondary write target of a source-exception file, rendered
    /// shallowly (the target also appears in its own place in the tree).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<Box<Node>>,
}

impl Node {
    fn damaged(offset: Offset, issue: String) -> Self {
        Node {
            name: String::from("?"),
            offset,
            is_file: false,
            for_recovery: false,
            features: Vec::new(),
            hash: None,
            issue: Some(issue),
            children: Vec::new(),
            secondary: None,
        }
    }
}

/// A record's raw fields, borrowed from the blob.
struct RawRecord<'a> {
    next_sibling: Offset,
    link: Offset,
    features: u16,
    hash: &'a [u8],
    name: &'a [u8],
}

/// Read the record at `offset`, refusing to touch anything at or past
/// `bound`.
fn read_record(bytes: &[u8], offset: Offset, bound: usize) -> Result<RawRecord<'_>, String> {
    let off = offset as usize;
    let header_end = match off.checked_add(RECORD_HEADER_LEN) {
        Some(end) if end <= bound => end,
        _ => {
            return Err(format!(
                "out of bounds: record header at {:#x} exceeds {} usable bytes",
                offset, bound
            ))
        }
    };
    let name_len = bytes[off + 10] as usize;
    if name_len == 0 {
        return Err(format!("invalid record at {:#x}: empty name", offset));
    }
    let name_end = header_end + name_len;
    if name_end > bound {
        return Err(format!(
            "out of bounds: name of record at {:#x} exceeds {} usable bytes",
            offset, bound
        ));
    }
    Ok(RawRecord {
        next_sibling: u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap()),
        link: u32::from_le_bytes(bytes[off + 4..off + 8].try_into().unwrap()),
        features: u16::from_le_bytes(bytes[off + 8..off + 10].try_into().unwrap()),
        hash: &bytes[off + 11..off + 11 + HASH_LEN],
        name: &bytes[header_end..name_end],
    })
}

/// Walk a packed blob and report its structure. Never reads outside
/// `bytes`, never panics, and always returns a report — corruption shows
/// up as warnings and per-subtree issues, not errors.
pub fn inspect(bytes: &[u8]) -> Report {
    let mut warnings = Vec::new();

    let root_raw = match read_record(bytes, 0, bytes.len()) {
        Ok(raw) => raw,
        Err(issue) => {
            warnings.push(format!("no readable root record: {}", issue));
            return Report {
                blob_len: bytes.len(),
                declared_size: None,
                node_count: 0,
                warnings,
                root: None,
            };
        }
    };

    if root_raw.name != MAGIC {
        warnings.push(format!(
            "bad magic: expected {:?}, found {:?}",
            String::from_utf8_lossy(MAGIC),
            String::from_utf8_lossy(root_raw.name)
        ));
    }
    let declared_size = u32::from_le_bytes(root_raw.hash[..4].try_into().unwrap());
    if declared_size as usize != bytes.len() {
        warnings.push(format!(
            "declared size {} does not match blob length {}",
            declared_size,
            bytes.len()
        ));
    }
    if root_raw.next_sibling != 0 {
        warnings.push(format!(
            "root record claims a sibling at {:#x}",
            root_raw.next_sibling
        ));
    }

    // Never trust either length alone.
    let bound = (declared_size as usize).min(bytes.len());

    let mut walker = Walker {
        bytes,
        bound,
        visited: HashSet::from([0]),
        node_count: 1,
    };
    let children = if root_raw.link != 0 {
        walker.walk_siblings(root_raw.link, 1)
    } else {
        Vec::new()
    };

    let root = Node {
        name: String::from("/"),
        offset: 0,
        is_file: false,
        for_recovery: false,
        features: Vec::new(),
        hash: None,
        issue: None,
        children,
        secondary: None,
    };

    Report {
        blob_len: bytes.len(),
        declared_size: Some(declared_size),
        node_count: walker.node_count,
        warnings,
        root: Some(root),
    }
}

struct Walker<'a> {
    bytes: &'a [u8],
    bound: usize,
    visited: HashSet<Offset>,
    node_count: usize,
}

impl Walker<'_> {
    fn walk_siblings(&mut self, head: Offset, depth: usize) -> Vec<Node> {
        if depth > MAX_INSPECT_DEPTH {
            return vec![Node::damaged(
                head,
                format!("depth limit ({}) reached", MAX_INSPECT_DEPTH),
            )];
        }
        let mut out = Vec::new();
        let mut cur = head;
        while cur != 0 {
            if !self.visited.insert(cur) {
                out.push(Node::damaged(
                    cur,
                    format!("cycle: offset {:#x} already visited", cur),
                ));
                break;
            }
            match read_record(self.bytes, cur, self.bound) {
                Err(issue) => {
                    // Without the record there is no sibling link to
                    // follow; the rest of this chain is unreachable.
                    out.push(Node::damaged(cur, issue));
                    break;
                }
                Ok(raw) => {
                    let next = raw.next_sibling;
                    out.push(self.build_node(cur, raw, depth));
                    cur = next;
                }
            }
        }
        out
    }

    fn build_node(&mut self, offset: Offset, raw: RawRecord<'_>, depth: usize) -> Node {
        self.node_count += 1;
        let features = FeatureFlags::from_bits_retain(raw.features);
        let mut issue = None;
        if FeatureFlags::from_bits(raw.features).is_none() {
            issue = Some(format!("unknown feature bits {:#06x}", raw.features));
        }

        let is_file = features.contains(FeatureFlags::IS_FILE);
        let is_src_exception =
            is_file && features.contains(FeatureFlags::IMMUTABLE_SRC_EXCEPTION);

        let mut children = Vec::new();
        let mut secondary = None;
        if raw.link != 0 {
            if is_src_exception {
                secondary = Some(Box::new(match read_record(self.bytes, raw.link, self.bound) {
                    Ok(target) => self.shallow_node(raw.link, &target),
                    Err(issue) => Node::damaged(raw.link, issue),
                }));
            } else if is_file {
                issue = Some(format!(
                    "file node carries a child link to {:#x}",
                    raw.link
                ));
            } else {
                children = self.walk_siblings(raw.link, depth + 1);
            }
        }

        let hash = if raw.hash.iter().any(|&b| b != 0) {
            Some(hex::encode(raw.hash))
        } else {
            None
        };

        Node {
            name: String::from_utf8_lossy(raw.name).into_owned(),
            offset,
            is_file,
            for_recovery: features.contains(FeatureFlags::FOR_RECOVERY),
            features: flag_names(features),
            hash,
            issue,
            children,
            secondary,
        }
    }

    /// Render a secondary target without recursing: the target is a
    /// normal tree node and gets its full treatment in its own place.
    fn shallow_node(&self, offset: Offset, raw: &RawRecord<'_>) -> Node {
        let features = FeatureFlags::from_bits_retain(raw.features);
        Node {
            name: String::from_utf8_lossy(raw.name).into_owned(),
            offset,
            is_file: features.contains(FeatureFlags::IS_FILE),
            for_recovery: features.contains(FeatureFlags::FOR_RECOVERY),
            features: flag_names(features),
            hash: None,
            issue: None,
            children: Vec::new(),
            secondary: None,
        }
    }
}

/// Render a report as the human-readable dump `show` prints.
pub fn render_report(report: &Report) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Blob: {} bytes, declared {}, {} node(s) walked\n",
        report.blob_len,
        report
            .declared_size
            .map_or_else(|| String::from("unknown"), |size| size.to_string()),
        report.node_count
    ));
    for warning in &report.warnings {
        out.push_str(&format!("warning: {}\n", warning));
    }
    if let Some(root) = &report.root {
        out.push('\n');
        render_node(&mut out, root, 0);
    }
    out
}

fn render_node(out: &mut String, node: &Node, depth: usize) {
    let indent = "  ".repeat(depth);
    out.push_str(&indent);
    out.push_str(&node.name);
    if !node.is_file && node.name != "/" {
        out.push('/');
    }
    if node.for_recovery {
        out.push_str("  [recovery]");
    }
    if !node.features.is_empty() {
        out.push_str(&format!("  [{}]", node.features.join(",")));
    }
    if let Some(hash) = &node.hash {
        out.push_str(&format!("  sha256={}", hash));
    }
    if let Some(secondary) = &node.secondary {
        out.push_str(&format!("  -> {}", secondary.name));
    }
    if let Some(issue) = &node.issue {
        out.push_str(&format!("  !! {}", issue));
    }
    out.push('\n');
    for child in &node.children {
        render_node(out, child, depth + 1);
    }
}
