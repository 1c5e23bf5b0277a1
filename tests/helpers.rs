//! Shared test utilities for rulepack tests.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Test environment with a temporary working directory.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Base directory for input and output files
    pub base_dir: PathBuf,
}

impl TestEnv {
    /// Create a new test environment with a temporary directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base_dir = temp_dir.path().to_path_buf();
        Self {
            _temp_dir: temp_dir,
            base_dir,
        }
    }

    /// Write a file under the base directory and return its path.
    pub fn write_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.base_dir.join(name);
        fs::write(&path, content).expect("Failed to write test file");
        path
    }

    /// Path under the base directory (not created).
    pub fn path(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }
}

/// A 64-char hex string of one repeated digit, for manifest/rule hashes.
pub fn hex64(c: char) -> String {
    std::iter::repeat(c).take(64).collect()
}

/// Assert that a file exists.
pub fn assert_file_exists(path: &Path) {
    assert!(path.exists(), "Expected file to exist: {}", path.display());
}

/// Assert that a file contains expected content.
pub fn assert_file_contains(path: &Path, expected: &str) {
    let content =
        fs::read_to_string(path).unwrap_or_else(|_| panic!("Failed to read {}", path.display()));
    assert!(
        content.contains(expected),
        "File {} does not contain expected content.\nExpected to find: {}\nActual content: {}",
        path.display(),
        expected,
        content
    );
}
