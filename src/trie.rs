//! Path trie store: an append-only arena of policy nodes addressed by the
//! byte offsets they will occupy in the packed blob.
//!
//! Offsets are plain integers, never references, so arena growth cannot
//! invalidate a link. The root sentinel occupies offset 0 and is never a
//! link target, which lets 0 double as "absent" in link fields.

use std::collections::HashMap;

use thiserror::Error;

use crate::flags::FeatureFlags;

/// Byte offset of a record in the packed blob. 0 = absent.
pub type Offset = u32;

/// Width of the integrity hash slot (SHA-256).
pub const HASH_LEN: usize = 32;

/// Fixed bytes before the name in every record:
/// next_sibling(4) + link(4) + features(2) + name_len(1) + hash(32).
pub const RECORD_HEADER_LEN: usize = 4 + 4 + 2 + 1 + HASH_LEN;

/// Name of the root sentinel record. Exactly 16 bytes.
pub const MAGIC: &[u8; 16] = b"rulepack-tree-v1";

/// Longest name a single record can carry (name_len is one byte).
pub const MAX_NAME_LEN: usize = u8::MAX as usize;

/// What a node's second offset field points at.
///
/// On disk this is a single u32; the flag combination
/// `IS_FILE | IMMUTABLE_SRC_EXCEPTION` tells the consumer which meaning
/// applies. In memory the two meanings are kept apart so a file node can
/// never grow an accidental child list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeLink {
    None,
    /// Head of the child list one path level below this node.
    Children(Offset),
    /// The single permitted write target of a source-exception file.
    SecondaryTarget(Offset),
}

impl NodeLink {
    /// The raw u32 stored in the packed record.
    pub fn raw(self) -> Offset {
        match self {
            NodeLink::None => 0,
            NodeLink::Children(off) | NodeLink::SecondaryTarget(off) => off,
        }
    }
}

/// One path segment (directory or file-name component) in the trie.
#[derive(Debug, Clone)]
pub struct TrieNode {
    pub name: Vec<u8>,
    pub features: FeatureFlags,
    pub link: NodeLink,
    pub next_sibling: Offset,
    pub integrity_hash: [u8; HASH_LEN],
    /// Byte offset this record occupies in the packed blob, fixed at
    /// insertion time.
    pub offset: Offset,
}

impl TrieNode {
    /// Total bytes this record occupies in the packed blob.
    pub fn record_len(&self) -> usize {
        RECORD_HEADER_LEN + self.name.len()
    }

    pub fn is_file(&self) -> bool {
        self.features.contains(FeatureFlags::IS_FILE)
    }

    pub fn for_recovery(&self) -> bool {
        self.features.contains(FeatureFlags::FOR_RECOVERY)
    }
}

/// Errors from the arena. Allocation failure surfaces as a typed value so
/// the caller decides how to die, not the library.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("out of memory growing the rule arena")]
    OutOfMemory,
    #[error("arena exceeds the 32-bit offset space")]
    ArenaFull,
    #[error("path segment is empty")]
    EmptyName,
    #[error("path segment exceeds {MAX_NAME_LEN} bytes (got {0})")]
    NameTooLong(usize),
    #[error("no record at offset {0:#x}")]
    UnknownOffset(Offset),
    #[error("cannot attach children under a file node")]
    ChildrenOnFile,
    #[error("cannot attach a secondary target: node is not a file or already has children")]
    SecondaryTargetConflict,
}

/// The arena. All nodes are owned here and referenced by offset; records
/// are appended during compilation and never removed. Only `feature_flags`
/// OR-ing, hash writes, and link fixups mutate an existing node.
pub struct TrieStore {
    nodes: Vec<TrieNode>,
    by_offset: HashMap<Offset, usize>,
    /// Total byte size of the packed blob so far; the next record's offset.
    size: u32,
}

impl TrieStore {
    /// Create a store holding only the root sentinel.
    pub fn new() -> Self {
        let root = TrieNode {
            name: MAGIC.to_vec(),
            features: FeatureFlags::empty(),
            link: NodeLink::None,
            next_sibling: 0,
            integrity_hash: [0; HASH_LEN],
            offset: 0,
        };
        let size = root.record_len() as u32;
        let mut by_offset = HashMap::new();
        by_offset.insert(0, 0);
        Self {
            nodes: vec![root],
            by_offset,
            size,
        }
    }

    /// Offset of the root sentinel.
    pub fn root(&self) -> Offset {
        0
    }

    /// Number of records, root included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// True when no rule has inserted anything beyond the root sentinel.
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Total byte size of the packed blob this store serializes to.
    pub fn byte_size(&self) -> u32 {
        self.size
    }

    /// Records in append (= offset) order.
    pub fn iter(&self) -> impl Iterator<Item = &TrieNode> {
        self.nodes.iter()
    }

    pub fn node(&self, offset: Offset) -> Option<&TrieNode> {
        self.by_offset.get(&offset).map(|&idx| &self.nodes[idx])
    }

    fn node_mut(&mut self, offset: Offset) -> Result<&mut TrieNode, StoreError> {
        match self.by_offset.get(&offset) {
            Some(&idx) => Ok(&mut self.nodes[idx]),
            None => Err(StoreError::UnknownOffset(offset)),
        }
    }

    /// Find a direct child of `parent` by the sibling uniqueness key
    /// `(name, is_file, for_recovery)`.
    pub fn find_child(
        &self,
        parent: Offset,
        name: &[u8],
        is_file: bool,
        for_recovery: bool,
    ) -> Option<Offset> {
        let parent = self.node(parent)?;
        let NodeLink::Children(head) = parent.link else {
            return None;
        };
        let mut cur = head;
        while cur != 0 {
            let node = self.node(cur)?;
            if node.name == name
                && node.is_file() == is_file
                && node.for_recovery() == for_recovery
            {
                return Some(cur);
            }
            cur = node.next_sibling;
        }
        None
    }

    /// Insert a child of `parent`, or return the existing sibling matching
    /// the uniqueness key `(name, is_file, for_recovery)`. New records are
    /// linked at the tail of the sibling chain, so append order is stable.
    ///
    /// Lookup is a linear scan of the sibling list. Policy trees are
    /// shallow and narrow; this has never been the slow part of a build.
    pub fn intern(
        &mut self,
        parent: Offset,
        name: &[u8],
        is_file: bool,
        for_recovery: bool,
    ) -> Result<Offset, StoreError> {
        if name.is_empty() {
            return Err(StoreError::EmptyName);
        }
        if name.len() > MAX_NAME_LEN {
            return Err(StoreError::NameTooLong(name.len()));
        }

        let parent_node = self
            .node(parent)
            .ok_or(StoreError::UnknownOffset(parent))?;
        if parent_node.is_file() {
            return Err(StoreError::ChildrenOnFile);
        }

        // Scan the sibling chain for a match, remembering the tail.
        let mut tail: Option<Offset> = None;
        match parent_node.link {
            NodeLink::Children(head) => {
                let mut cur = head;
                while cur != 0 {
                    let node = self
                        .node(cur)
                        .ok_or(StoreError::UnknownOffset(cur))?;
                    if node.name == name
                        && node.is_file() == is_file
                        && node.for_recovery() == for_recovery
                    {
                        return Ok(cur);
                    }
                    tail = Some(cur);
                    cur = node.next_sibling;
                }
            }
            NodeLink::SecondaryTarget(_) => return Err(StoreError::ChildrenOnFile),
            NodeLink::None => {}
        }

        // Append a new record.
        let mut owned = Vec::new();
        owned
            .try_reserve_exact(name.len())
            .map_err(|_| StoreError::OutOfMemory)?;
        owned.extend_from_slice(name);

        let mut features = FeatureFlags::empty();
        if is_file {
            features |= FeatureFlags::IS_FILE;
        }
        if for_recovery {
            features |= FeatureFlags::FOR_RECOVERY;
        }

        let node = TrieNode {
            name: owned,
            features,
            link: NodeLink::None,
            next_sibling: 0,
            integrity_hash: [0; HASH_LEN],
            offset: self.size,
        };
        let record_len = node.record_len() as u32;
        let new_size = self
            .size
            .checked_add(record_len)
            .ok_or(StoreError::ArenaFull)?;

        self.nodes
            .try_reserve(1)
            .map_err(|_| StoreError::OutOfMemory)?;
        let offset = node.offset;
        self.by_offset.insert(offset, self.nodes.len());
        self.nodes.push(node);
        self.size = new_size;

        // Link into the parent's chain.
        match tail {
            Some(tail) => self.node_mut(tail)?.next_sibling = offset,
            None => self.node_mut(parent)?.link = NodeLink::Children(offset),
        }
        Ok(offset)
    }

    /// OR additional feature flags into an existing node.
    pub fn or_features(&mut self, offset: Offset, flags: FeatureFlags) -> Result<(), StoreError> {
        self.node_mut(offset)?.features |= flags;
        Ok(())
    }

    /// Write an integrity hash into an existing node and mark it.
    pub fn set_hash(&mut self, offset: Offset, hash: &[u8; HASH_LEN]) -> Result<(), StoreError> {
        let node = self.node_mut(offset)?;
        node.integrity_hash = *hash;
        node.features |= FeatureFlags::INTEGRITY;
        Ok(())
    }

    /// Point a source-exception file node at its permitted write target.
    /// Refused for directory nodes and for nodes that already carry a real
    /// child list.
    pub fn set_secondary_target(
        &mut self,
        offset: Offset,
        target: Offset,
    ) -> Result<(), StoreError> {
        let node = self.node_mut(offset)?;
        if !node.features.contains(FeatureFlags::IS_FILE) {
            return Err(StoreError::SecondaryTargetConflict);
        }
        match node.link {
            NodeLink::None | NodeLink::SecondaryTarget(_) => {
                node.link = NodeLink::SecondaryTarget(target);
                Ok(())
            }
            NodeLink::Children(_) => Err(StoreError::SecondaryTargetConflict),
        }
    }

    /// Walk `path` segment by segment and report whether it fully matches
    /// the tree and some node along it carries `required`.
    ///
    /// Malformed paths (no leading separator, empty segment) never match.
    /// The final segment may name a file or a directory node; file wins
    /// when both exist.
    pub fn lookup_path(&self, path: &str, required: FeatureFlags, for_recovery: bool) -> bool {
        let Some((segments, is_dir)) = split_path(path) else {
            return false;
        };
        if segments.is_empty() {
            return false;
        }

        let mut cur = self.root();
        let mut seen = FeatureFlags::empty();
        let last = segments.len() - 1;
        for (i, segment) in segments.iter().enumerate() {
            let name = segment.as_bytes();
            let found = if i == last && !is_dir {
                self.find_child(cur, name, true, for_recovery)
                    .or_else(|| self.find_child(cur, name, false, for_recovery))
            } else {
                self.find_child(cur, name, false, for_recovery)
            };
            match found {
                Some(offset) => {
                    // node() cannot fail here; find_child resolved it.
                    if let Some(node) = self.node(offset) {
                        seen |= node.features;
                    }
                    cur = offset;
                }
                None => return false,
            }
        }
        seen.contains(required)
    }
}

impl Default for TrieStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Split an absolute path into segments. Returns `None` for malformed
/// paths: missing leading separator, or an empty segment (two separators
/// in a row). A trailing separator marks the path as naming a directory.
pub fn split_path(path: &str) -> Option<(Vec<&str>, bool)> {
    let rest = path.strip_prefix('/')?;
    if rest.is_empty() {
        // Bare "/": the root itself, no segments.
        return Some((Vec::new(), true));
    }
    let is_dir = rest.ends_with('/');
    let trimmed = rest.strip_suffix('/').unwrap_or(rest);
    let mut segments = Vec::new();
    for segment in trimmed.split('/') {
        if segment.is_empty() {
            return None;
        }
        segments.push(segment);
    }
    Some((segments, is_dir))
}
