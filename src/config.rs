//! Compiled-in policy configuration.
//!
//! These tables are deliberate policy, kept in one place so a port to a
//! different image layout edits data instead of hunting string literals.

/// Marker that keeps a rule in reduced output even when no installed file
/// matches it. Compiled-in defaults carry this so an incomplete manifest
/// cannot strip the baseline rule set.
pub const DEFAULT_MARKER: &str = "/* DEFAULT */";

/// Path prefixes the reducer considers policy-relevant. Manifest entries
/// outside these are ignored; they can never match a rule the kernel
/// module would enforce.
pub const POLICY_PATH_PREFIXES: &[&str] = &[
    // Root filesystem
    "/init",
    "/bin/",
    "/sbin/",
    // System partitions
    "/system/",
    "/system_ext/",
    "/vendor/",
    "/product/",
    "/odm/",
    // Recovery partition
    "/recovery/",
    // Writable and mount-time trees
    "/data/",
    "/tmp/",
    "/apex/",
];

/// Symbol name for the source-embeddable array emitted by `pack`.
pub const PACKED_SYMBOL: &str = "rulepack_policy";

/// True when `path` falls under one of the policy-relevant prefixes.
pub fn is_policy_path(path: &str) -> bool {
    POLICY_PATH_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix))
}
