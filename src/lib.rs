//! rulepack - build-time security policy compiler.
//!
//! Compiles a textual rule source describing filesystem paths and their
//! access-control features into a compact, offset-addressed binary tree
//! for a kernel-side enforcement module, prunes rule sources against an
//! installed-file manifest, and defensively inspects packed blobs.
//!
//! The binary in `main.rs` is a thin clap wrapper; everything it calls
//! lives here so integration tests can drive the same code paths.

pub mod blob;
pub mod commands;
pub mod config;
pub mod flags;
pub mod inspect;
pub mod reduce;
pub mod rules;
pub mod trie;
