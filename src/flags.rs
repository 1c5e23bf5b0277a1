//! Feature bitmask carried by every packed policy node.
//!
//! The low bits are independent access-control capabilities; the two high
//! bits are structural (file vs directory, normal vs recovery partition).
//! The numeric values are part of the binary format consumed by the
//! kernel-side enforcement module and must not be reordered.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FeatureFlags: u16 {
        /// Execution from this path is permitted.
        const SAFEPLACE_PATH = 1 << 0;
        /// Opening this path for write is denied.
        const IMMUTABLE_OPEN = 1 << 1;
        /// Writes to this path are denied.
        const IMMUTABLE_WRITE = 1 << 2;
        /// Writes originating at this file may target only its linked
        /// destination node.
        const IMMUTABLE_SRC_EXCEPTION = 1 << 3;
        /// Permitted destination of a linked source exception.
        const IMMUTABLE_DST_EXCEPTION = 1 << 4;
        /// Exempt from privilege checks along this path.
        const CHECK_EXCEPTION = 1 << 5;
        /// The integrity hash slot holds a real content hash.
        const INTEGRITY = 1 << 6;

        /// Node names a file rather than a directory.
        const IS_FILE = 1 << 14;
        /// Node belongs to the recovery partition's rule set.
        const FOR_RECOVERY = 1 << 15;
    }
}

/// Rule-source tag names and the capability each one grants.
///
/// `feature_immutable_dst_exception` is listed even though the compiler
/// normally sets it implicitly on secondary targets: rule sources written
/// by hand occasionally tag a destination directly.
pub const FEATURE_TAGS: &[(&str, FeatureFlags)] = &[
    ("feature_safeplace_path", FeatureFlags::SAFEPLACE_PATH),
    ("feature_immutable_path_open", FeatureFlags::IMMUTABLE_OPEN),
    ("feature_immutable_path_write", FeatureFlags::IMMUTABLE_WRITE),
    ("feature_immutable_src_exception", FeatureFlags::IMMUTABLE_SRC_EXCEPTION),
    ("feature_immutable_dst_exception", FeatureFlags::IMMUTABLE_DST_EXCEPTION),
    ("feature_check_exception", FeatureFlags::CHECK_EXCEPTION),
];

/// Capability names used in tree dumps and reports, without the
/// `feature_` source prefix.
const FLAG_NAMES: &[(&str, FeatureFlags)] = &[
    ("safeplace_path", FeatureFlags::SAFEPLACE_PATH),
    ("immutable_path_open", FeatureFlags::IMMUTABLE_OPEN),
    ("immutable_path_write", FeatureFlags::IMMUTABLE_WRITE),
    ("immutable_src_exception", FeatureFlags::IMMUTABLE_SRC_EXCEPTION),
    ("immutable_dst_exception", FeatureFlags::IMMUTABLE_DST_EXCEPTION),
    ("check_exception", FeatureFlags::CHECK_EXCEPTION),
    ("integrity", FeatureFlags::INTEGRITY),
];

/// Look up the capability granted by a rule-source tag.
pub fn tag_to_flag(tag: &str) -> Option<FeatureFlags> {
    FEATURE_TAGS
        .iter()
        .find(|(name, _)| *name == tag)
        .map(|(_, flag)| *flag)
}

/// Human-readable names for the capability bits set in `flags`.
/// Structural bits (IS_FILE, FOR_RECOVERY) are rendered separately by
/// callers and are not included here.
pub fn flag_names(flags: FeatureFlags) -> Vec<&'static str> {
    FLAG_NAMES
        .iter()
        .filter(|(_, flag)| flags.contains(*flag))
        .map(|(name, _)| *name)
        .collect()
}
