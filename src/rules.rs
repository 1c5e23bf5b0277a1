//! Rule-source parsing and compilation (the annotator).
//!
//! One rule line names a feature tag, one or two quoted paths, an optional
//! quoted integrity annotation, and an optional compiled-in-default marker:
//!
//! ```text
//! feature_safeplace_path("/vendor/bin/foo")
//! feature_immutable_src_exception("/data/local/tmp":"/data/allowed")
//! feature_immutable_path_write("/system/etc/hosts") "N<64hex>R<64hex>" /* DEFAULT */
//! ```
//!
//! The compiler is best-effort: lines that don't parse are skipped with a
//! diagnostic, never a hard error. Only arena-level failures (out of
//! memory, offset space exhausted) propagate.

use crate::config::DEFAULT_MARKER;
use crate::flags::{tag_to_flag, FeatureFlags};
use crate::trie::{split_path, Offset, StoreError, TrieStore, HASH_LEN};

/// A recognized rule line, borrowed from the source text. Spans are byte
/// indices into the original line; the reducer uses them to rebuild the
/// line with a fresh annotation.
#[derive(Debug, PartialEq, Eq)]
pub struct ParsedRule<'a> {
    pub tag: &'a str,
    pub features: FeatureFlags,
    pub primary: &'a str,
    pub secondary: Option<&'a str>,
    pub normal_hash: Option<[u8; HASH_LEN]>,
    pub recovery_hash: Option<[u8; HASH_LEN]>,
    pub is_default: bool,
    /// Index just past the `)` closing the rule body.
    pub body_end: usize,
    /// Span of the quoted integrity annotation, quotes included.
    pub annotation_span: Option<(usize, usize)>,
}

/// Parse one rule line. Returns `None` for anything that is not a
/// well-formed rule: comment lines, unknown tags, missing quotes or
/// parenthesis, malformed hash annotations.
pub fn parse_rule_line(line: &str) -> Option<ParsedRule<'_>> {
    let open = line.find('(')?;
    let tag = line[..open].trim();
    let features = tag_to_flag(tag)?;

    let (primary, primary_end) = quoted_at(line, open + 1)?;

    // Optional ':"second"' immediately after the primary path.
    let mut cursor = primary_end;
    let mut secondary = None;
    let after = line[cursor..].trim_start();
    if let Some(rest) = after.strip_prefix(':') {
        let rest_start = line.len() - rest.len();
        let (second, second_end) = quoted_at(line, rest_start)?;
        secondary = Some(second);
        cursor = second_end;
    }

    // The body must close before anything else.
    let close_rel = line[cursor..].find(')')?;
    if !line[cursor..cursor + close_rel].trim().is_empty() {
        return None;
    }
    let body_end = cursor + close_rel + 1;

    // Optional trailing quoted integrity annotation.
    let mut normal_hash = None;
    let mut recovery_hash = None;
    let mut annotation_span = None;
    if let Some(quote_rel) = line[body_end..].find('"') {
        let ann_open = body_end + quote_rel;
        let (content, ann_end) = quoted_at(line, ann_open)?;
        let (normal, recovery) = parse_annotation(content)?;
        normal_hash = normal;
        recovery_hash = recovery;
        annotation_span = Some((ann_open, ann_end));
    }

    Some(ParsedRule {
        tag,
        features,
        primary,
        secondary,
        normal_hash,
        recovery_hash,
        is_default: line.contains(DEFAULT_MARKER),
        body_end,
        annotation_span,
    })
}

/// Extract the next double-quoted string at or after `from`, allowing only
/// whitespace before the opening quote. Returns the content and the index
/// just past the closing quote.
fn quoted_at(line: &str, from: usize) -> Option<(&str, usize)> {
    let rest = &line[from..];
    let quote_rel = rest.find('"')?;
    if !rest[..quote_rel].trim().is_empty() {
        return None;
    }
    let start = from + quote_rel + 1;
    let len = line[start..].find('"')?;
    Some((&line[start..start + len], start + len + 1))
}

/// Split an integrity annotation into its partition hashes: a sequence of
/// `N` / `R` markers each followed by 64 hex digits, in either order.
fn parse_annotation(s: &str) -> Option<(Option<[u8; HASH_LEN]>, Option<[u8; HASH_LEN]>)> {
    let mut normal = None;
    let mut recovery = None;
    let mut rest = s;
    while !rest.is_empty() {
        let marker = rest.as_bytes()[0];
        let hex_part = rest.get(1..1 + HASH_LEN * 2)?;
        let mut hash = [0u8; HASH_LEN];
        hex::decode_to_slice(hex_part, &mut hash).ok()?;
        match marker {
            b'N' if normal.is_none() => normal = Some(hash),
            b'R' if recovery.is_none() => recovery = Some(hash),
            _ => return None,
        }
        rest = &rest[1 + HASH_LEN * 2..];
    }
    Some((normal, recovery))
}

/// Compiles rule lines into a trie store. Owns all compilation state; the
/// lifecycle is `new() -> apply_line()* -> finish()`.
pub struct Compiler {
    store: TrieStore,
    pub rules_compiled: usize,
    pub lines_skipped: usize,
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            store: TrieStore::new(),
            rules_compiled: 0,
            lines_skipped: 0,
        }
    }

    pub fn store(&self) -> &TrieStore {
        &self.store
    }

    pub fn finish(self) -> TrieStore {
        self.store
    }

    /// Compile one line of rule source. Unrecognized lines are skipped
    /// (with a diagnostic when they look like they were meant to be
    /// rules); only arena failures propagate.
    pub fn apply_line(&mut self, line: &str) -> Result<(), StoreError> {
        if !line.contains('"') {
            // Comment or blank line; nothing to compile.
            return Ok(());
        }
        let Some(rule) = parse_rule_line(line) else {
            eprintln!("  [WARN] skipping unrecognized rule line: {}", line.trim());
            self.lines_skipped += 1;
            return Ok(());
        };

        // A recovery hash forces a recovery-partition compile; the normal
        // variant is compiled as well only when a normal hash is present
        // or no marker was given at all. A marker-less line is
        // normal-partition only, except compiled-in defaults, which cover
        // both partitions. Asymmetric, but it is what rule authors rely on.
        let has_recovery = rule.recovery_hash.is_some();
        let no_markers = !has_recovery && rule.normal_hash.is_none();
        if has_recovery || (no_markers && rule.is_default) {
            self.compile_variant(&rule, true, rule.recovery_hash.as_ref())?;
        }
        if !has_recovery || rule.normal_hash.is_some() {
            self.compile_variant(&rule, false, rule.normal_hash.as_ref())?;
        }
        Ok(())
    }

    fn compile_variant(
        &mut self,
        rule: &ParsedRule<'_>,
        for_recovery: bool,
        hash: Option<&[u8; HASH_LEN]>,
    ) -> Result<(), StoreError> {
        let Some(leaf) = self.intern_chain(rule.primary, for_recovery)? else {
            eprintln!(
                "  [WARN] skipping rule with malformed path: {}({:?})",
                rule.tag, rule.primary
            );
            self.lines_skipped += 1;
            return Ok(());
        };
        self.store.or_features(leaf, rule.features)?;

        let is_file = self
            .store
            .node(leaf)
            .is_some_and(|node| node.is_file());
        if is_file {
            if let Some(hash) = hash {
                self.store.set_hash(leaf, hash)?;
            }
        }

        if let Some(secondary) = rule.secondary {
            if is_file {
                // The destination always lives in the normal-partition
                // tree, whichever variant the source rule compiles as.
                let Some(target) = self.intern_chain(secondary, false)? else {
                    eprintln!(
                        "  [WARN] skipping secondary target with malformed path: {:?}",
                        secondary
                    );
                    self.lines_skipped += 1;
                    return Ok(());
                };
                self.store
                    .or_features(target, FeatureFlags::IMMUTABLE_DST_EXCEPTION)?;
                self.store.set_secondary_target(leaf, target)?;
            } else {
                eprintln!(
                    "  [WARN] secondary target ignored for directory rule: {}({:?})",
                    rule.tag, rule.primary
                );
            }
        }

        self.rules_compiled += 1;
        Ok(())
    }

    /// Intern every segment of `path`; the final segment becomes a file
    /// node unless the path has a trailing separator. Returns `None` for
    /// malformed paths (the caller reports).
    fn intern_chain(
        &mut self,
        path: &str,
        for_recovery: bool,
    ) -> Result<Option<Offset>, StoreError> {
        let Some((segments, is_dir)) = split_path(path) else {
            return Ok(None);
        };
        if segments.is_empty() {
            return Ok(None);
        }
        let mut cur = self.store.root();
        let last = segments.len() - 1;
        for (i, segment) in segments.iter().enumerate() {
            let is_file = i == last && !is_dir;
            cur = self
                .store
                .intern(cur, segment.as_bytes(), is_file, for_recovery)?;
        }
        Ok(Some(cur))
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trie::NodeLink;

    fn hex64(c: char) -> String {
        std::iter::repeat(c).take(64).collect()
    }

    #[test]
    fn test_parse_basic_rule() {
        let rule = parse_rule_line(r#"feature_safeplace_path("/vendor/bin/foo")"#).unwrap();
        assert_eq!(rule.tag, "feature_safeplace_path");
        assert_eq!(rule.features, FeatureFlags::SAFEPLACE_PATH);
        assert_eq!(rule.primary, "/vendor/bin/foo");
        assert_eq!(rule.secondary, None);
        assert!(rule.normal_hash.is_none() && rule.recovery_hash.is_none());
        assert!(!rule.is_default);
        assert_eq!(rule.annotation_span, None);
    }

    #[test]
    fn test_parse_secondary_path() {
        let rule = parse_rule_line(
            r#"feature_immutable_src_exception("/data/local/tmp":"/data/allowed")"#,
        )
        .unwrap();
        assert_eq!(rule.primary, "/data/local/tmp");
        assert_eq!(rule.secondary, Some("/data/allowed"));
    }

    #[test]
    fn test_parse_annotation_markers() {
        let n = hex64('a');
        let r = hex64('b');

        let line = format!(r#"feature_immutable_path_write("/system/f") "N{n}""#);
        let rule = parse_rule_line(&line).unwrap();
        assert_eq!(rule.normal_hash, Some([0xaa; HASH_LEN]));
        assert_eq!(rule.recovery_hash, None);

        let line = format!(r#"feature_immutable_path_write("/system/f") "R{r}""#);
        let rule = parse_rule_line(&line).unwrap();
        assert_eq!(rule.normal_hash, None);
        assert_eq!(rule.recovery_hash, Some([0xbb; HASH_LEN]));

        let line = format!(r#"feature_immutable_path_write("/system/f") "N{n}R{r}""#);
        let rule = parse_rule_line(&line).unwrap();
        assert_eq!(rule.normal_hash, Some([0xaa; HASH_LEN]));
        assert_eq!(rule.recovery_hash, Some([0xbb; HASH_LEN]));
        let (start, end) = rule.annotation_span.unwrap();
        assert_eq!(&line[start..start + 1], "\"");
        assert_eq!(&line[end - 1..end], "\"");
    }

    #[test]
    fn test_parse_default_marker() {
        let rule =
            parse_rule_line(r#"feature_safeplace_path("/bin/init") /* DEFAULT */"#).unwrap();
        assert!(rule.is_default);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        // No quoted path at all.
        assert!(parse_rule_line("# a comment line").is_none());
        assert!(parse_rule_line("feature_safeplace_path()").is_none());
        // Unknown tag.
        assert!(parse_rule_line(r#"feature_unknown("/vendor/x")"#).is_none());
        // Missing closing parenthesis.
        assert!(parse_rule_line(r#"feature_safeplace_path("/vendor/x""#).is_none());
        // Bad hash annotation: wrong length, bad digits, bad marker.
        assert!(parse_rule_line(r#"feature_safeplace_path("/v/x") "Nabc""#).is_none());
        let bad = format!(r#"feature_safeplace_path("/v/x") "X{}""#, hex64('a'));
        assert!(parse_rule_line(&bad).is_none());
        let zz = format!(r#"feature_safeplace_path("/v/x") "N{}""#, hex64('z'));
        assert!(parse_rule_line(&zz).is_none());
    }

    #[test]
    fn test_compile_single_rule_builds_path_chain() {
        let mut compiler = Compiler::new();
        compiler
            .apply_line(r#"feature_safeplace_path("/vendor/bin/foo")"#)
            .unwrap();
        let store = compiler.finish();

        let vendor = store.find_child(store.root(), b"vendor", false, false).unwrap();
        let bin = store.find_child(vendor, b"bin", false, false).unwrap();
        let foo = store.find_child(bin, b"foo", true, false).unwrap();
        let node = store.node(foo).unwrap();
        assert!(node.is_file());
        assert!(node.features.contains(FeatureFlags::SAFEPLACE_PATH));
        assert!(store.lookup_path("/vendor/bin/foo", FeatureFlags::SAFEPLACE_PATH, false));
    }

    #[test]
    fn test_compile_is_idempotent() {
        let line = r#"feature_safeplace_path("/vendor/bin/foo")"#;
        let mut once = Compiler::new();
        once.apply_line(line).unwrap();
        let mut twice = Compiler::new();
        twice.apply_line(line).unwrap();
        twice.apply_line(line).unwrap();

        let once = once.finish();
        let twice = twice.finish();
        assert_eq!(once.node_count(), twice.node_count());
        assert_eq!(once.byte_size(), twice.byte_size());
    }

    #[test]
    fn test_compile_src_exception_links_secondary() {
        let mut compiler = Compiler::new();
        compiler
            .apply_line(r#"feature_immutable_src_exception("/data/local/tmp":"/data/allowed")"#)
            .unwrap();
        let store = compiler.finish();

        let data = store.find_child(store.root(), b"data", false, false).unwrap();
        let local = store.find_child(data, b"local", false, false).unwrap();
        let tmp = store.find_child(local, b"tmp", true, false).unwrap();
        let allowed = store.find_child(data, b"allowed", true, false).unwrap();

        let src = store.node(tmp).unwrap();
        assert!(src.features.contains(FeatureFlags::IMMUTABLE_SRC_EXCEPTION));
        assert_eq!(src.link, NodeLink::SecondaryTarget(allowed));

        let dst = store.node(allowed).unwrap();
        assert!(dst.features.contains(FeatureFlags::IMMUTABLE_DST_EXCEPTION));
    }

    #[test]
    fn test_compile_both_partitions_from_nr_markers() {
        let line = format!(
            r#"feature_immutable_path_write("/system/etc/hosts") "N{}R{}""#,
            hex64('a'),
            hex64('b')
        );
        let mut compiler = Compiler::new();
        compiler.apply_line(&line).unwrap();
        let store = compiler.finish();

        assert!(store.lookup_path("/system/etc/hosts", FeatureFlags::IMMUTABLE_WRITE, false));
        assert!(store.lookup_path("/system/etc/hosts", FeatureFlags::IMMUTABLE_WRITE, true));

        // Each variant carries its own partition hash.
        let sys_n = store.find_child(store.root(), b"system", false, false).unwrap();
        let etc_n = store.find_child(sys_n, b"etc", false, false).unwrap();
        let hosts_n = store.find_child(etc_n, b"hosts", true, false).unwrap();
        assert_eq!(store.node(hosts_n).unwrap().integrity_hash, [0xaa; HASH_LEN]);

        let sys_r = store.find_child(store.root(), b"system", false, true).unwrap();
        let etc_r = store.find_child(sys_r, b"etc", false, true).unwrap();
        let hosts_r = store.find_child(etc_r, b"hosts", true, true).unwrap();
        assert_eq!(store.node(hosts_r).unwrap().integrity_hash, [0xbb; HASH_LEN]);
    }

    #[test]
    fn test_compile_default_rule_covers_both_partitions() {
        // Marker-less plain rules are normal-only; marker-less defaults
        // compile for recovery as well.
        let mut plain = Compiler::new();
        plain
            .apply_line(r#"feature_safeplace_path("/bin/init")"#)
            .unwrap();
        let plain = plain.finish();
        assert!(plain.lookup_path("/bin/init", FeatureFlags::SAFEPLACE_PATH, false));
        assert!(!plain.lookup_path("/bin/init", FeatureFlags::SAFEPLACE_PATH, true));

        let mut default = Compiler::new();
        default
            .apply_line(r#"feature_safeplace_path("/bin/init") /* DEFAULT */"#)
            .unwrap();
        let default = default.finish();
        assert!(default.lookup_path("/bin/init", FeatureFlags::SAFEPLACE_PATH, false));
        assert!(default.lookup_path("/bin/init", FeatureFlags::SAFEPLACE_PATH, true));
    }

    #[test]
    fn test_compile_recovery_only_rule() {
        let line = format!(
            r#"feature_immutable_path_open("/recovery/sbin/tool") "R{}""#,
            hex64('c')
        );
        let mut compiler = Compiler::new();
        compiler.apply_line(&line).unwrap();
        let store = compiler.finish();

        assert!(store.lookup_path("/recovery/sbin/tool", FeatureFlags::IMMUTABLE_OPEN, true));
        assert!(!store.lookup_path("/recovery/sbin/tool", FeatureFlags::IMMUTABLE_OPEN, false));
    }

    #[test]
    fn test_compile_directory_rule_skips_hash() {
        let line = format!(r#"feature_safeplace_path("/vendor/bin/") "N{}""#, hex64('d'));
        let mut compiler = Compiler::new();
        compiler.apply_line(&line).unwrap();
        let store = compiler.finish();

        let vendor = store.find_child(store.root(), b"vendor", false, false).unwrap();
        let bin = store.find_child(vendor, b"bin", false, false).unwrap();
        let node = store.node(bin).unwrap();
        assert!(!node.is_file());
        assert!(node.features.contains(FeatureFlags::SAFEPLACE_PATH));
        // Hash annotations only apply to file nodes.
        assert!(!node.features.contains(FeatureFlags::INTEGRITY));
        assert_eq!(node.integrity_hash, [0; HASH_LEN]);
    }

    #[test]
    fn test_compile_hash_write_sets_integrity() {
        let line = format!(
            r#"feature_immutable_path_write("/system/etc/hosts") "N{}""#,
            hex64('e')
        );
        let mut compiler = Compiler::new();
        compiler.apply_line(&line).unwrap();
        let store = compiler.finish();

        let sys = store.find_child(store.root(), b"system", false, false).unwrap();
        let etc = store.find_child(sys, b"etc", false, false).unwrap();
        let hosts = store.find_child(etc, b"hosts", true, false).unwrap();
        let node = store.node(hosts).unwrap();
        assert!(node.features.contains(FeatureFlags::INTEGRITY));
        assert_eq!(node.integrity_hash, [0xee; HASH_LEN]);
    }

    #[test]
    fn test_unrecognized_lines_are_counted_not_fatal() {
        let mut compiler = Compiler::new();
        compiler.apply_line("").unwrap();
        compiler.apply_line("# comment").unwrap();
        compiler.apply_line(r#"feature_unknown("/vendor/x")"#).unwrap();
        assert_eq!(compiler.rules_compiled, 0);
        assert_eq!(compiler.lines_skipped, 1);
        assert!(compiler.store().is_empty());
    }
}
