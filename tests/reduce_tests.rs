//! End-to-end tests for the reduce command: rule source + manifest in,
//! reduced rule source out.

mod helpers;

use helpers::{assert_file_contains, hex64, TestEnv};
use rulepack::commands::cmd_reduce;
use std::fs;

#[test]
fn test_reduce_drops_uninstalled_rules() {
    let env = TestEnv::new();
    let rules = env.write_file(
        "rules.txt",
        "feature_safeplace_path(\"/vendor/bin/foo\")\n",
    );
    // Manifest lacks /vendor/bin/foo entirely.
    let manifest = env.write_file(
        "manifest.txt",
        &format!("/vendor/bin/other {} normal\n", hex64('a')),
    );
    let reduced = env.path("rules.reduced");

    cmd_reduce(&rules, &reduced, &manifest).expect("reduce should succeed");

    let output = fs::read_to_string(&reduced).unwrap();
    assert!(!output.contains("/vendor/bin/foo"));
}

#[test]
fn test_reduce_substitutes_live_hashes() {
    let env = TestEnv::new();
    let rules = env.write_file(
        "rules.txt",
        &format!(
            concat!(
                "# master rule source\n",
                "feature_safeplace_path(\"/vendor/bin/foo\") \"N{}\"\n",
                "feature_safeplace_path(\"/bin/init\") /* DEFAULT */\n",
            ),
            hex64('9')
        ),
    );
    let manifest = env.write_file(
        "manifest.txt",
        &format!(
            "/vendor/bin/foo {} normal\n/vendor/bin/foo {} recovery\n",
            hex64('a'),
            hex64('b')
        ),
    );
    let reduced = env.path("rules.reduced");

    cmd_reduce(&rules, &reduced, &manifest).expect("reduce should succeed");

    // Stale hash replaced by both live partition hashes; comment and
    // unmatched default rule kept.
    assert_file_contains(&reduced, "# master rule source");
    assert_file_contains(
        &reduced,
        &format!("\"N{}R{}\"", hex64('a'), hex64('b')),
    );
    assert_file_contains(&reduced, "feature_safeplace_path(\"/bin/init\") /* DEFAULT */");
    let output = fs::read_to_string(&reduced).unwrap();
    assert!(!output.contains(&hex64('9')));
}

#[test]
fn test_reduce_missing_manifest_is_fatal() {
    let env = TestEnv::new();
    let rules = env.write_file("rules.txt", "feature_safeplace_path(\"/vendor/bin/foo\")\n");
    let result = cmd_reduce(&rules, &env.path("out.txt"), &env.path("missing-manifest.txt"));
    let err = result.unwrap_err();
    assert!(err.to_string().contains("missing-manifest.txt"));
}

#[test]
fn test_reduced_source_repacks_cleanly() {
    // The reduce output feeds the annotator for a second pack pass; the
    // rebuilt annotations must parse.
    let env = TestEnv::new();
    let rules = env.write_file(
        "rules.txt",
        "feature_immutable_path_write(\"/system/etc/hosts\")\n",
    );
    let manifest = env.write_file(
        "manifest.txt",
        &format!(
            "/system/etc/hosts {} normal\n/system/etc/hosts {} recovery\n",
            hex64('c'),
            hex64('d')
        ),
    );
    let reduced = env.path("rules.reduced");
    cmd_reduce(&rules, &reduced, &manifest).expect("reduce should succeed");

    let mut compiler = rulepack::rules::Compiler::new();
    for line in fs::read_to_string(&reduced).unwrap().lines() {
        compiler.apply_line(line).unwrap();
    }
    assert_eq!(compiler.lines_skipped, 0);
    assert_eq!(compiler.rules_compiled, 2);
    let store = compiler.finish();
    assert!(store.lookup_path(
        "/system/etc/hosts",
        rulepack::flags::FeatureFlags::IMMUTABLE_WRITE,
        true
    ));
}
