//! Target discovery: pairs each source file in the sandbox root with its test file.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::io::sandbox::{PathSandbox, has_source_extension};
use crate::io::tester::test_file_name_for;

/// Shared fallback test file name.
pub const FALLBACK_TEST_FILE: &str = "tests.py";

/// A source file selected for repair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub source: PathBuf,
    /// `None` when no test file was found; such targets are skipped.
    pub test_file: Option<PathBuf>,
}

/// List source files directly inside the sandbox root in lexicographic
/// order, excluding test files (any name containing `test`) and hidden files.
pub fn discover_targets(sandbox: &PathSandbox) -> Result<Vec<Target>> {
    let root = sandbox.root();
    let mut sources = Vec::new();
    for entry in fs::read_dir(root).with_context(|| format!("read {}", root.display()))? {
        let entry = entry.with_context(|| format!("read entry in {}", root.display()))?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if name.starts_with('.') || name.contains("test") || !has_source_extension(&path) {
            continue;
        }
        match sandbox.validate(&path) {
            Ok(resolved) if resolved.is_file() => sources.push(path),
            Ok(_) => {}
            Err(err) => warn!(path = %path.display(), err = %err, "skipping unsafe source file"),
        }
    }
    sources.sort();

    let fallback = root.join(FALLBACK_TEST_FILE);
    let targets = sources
        .into_iter()
        .map(|source| {
            let test_file = test_file_name_for(&source)
                .filter(|candidate| candidate.is_file())
                .or_else(|| fallback.is_file().then(|| fallback.clone()));
            match &test_file {
                Some(test) => debug!(source = %source.display(), test = %test.display(), "paired target"),
                None => warn!(source = %source.display(), "no test file found"),
            }
            Target { source, test_file }
        })
        .collect();
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(targets: &[Target]) -> Vec<(String, Option<String>)> {
        let name = |path: &PathBuf| {
            path.file_name()
                .expect("name")
                .to_string_lossy()
                .into_owned()
        };
        targets
            .iter()
            .map(|t| (name(&t.source), t.test_file.as_ref().map(name)))
            .collect()
    }

    #[test]
    fn pairs_sources_with_tests() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sandbox = PathSandbox::new(temp.path()).expect("sandbox");
        let root = sandbox.root();
        for file in ["calc.py", "test_calc.py", "util.py", "notes.md", ".hidden.py", "calc.py.bak.1"] {
            fs::write(root.join(file), "").expect("write");
        }
        fs::create_dir_all(root.join("pkg")).expect("mkdir");
        fs::write(root.join("pkg/inner.py"), "").expect("write");

        let targets = discover_targets(&sandbox).expect("discover");
        assert_eq!(
            names(&targets),
            vec![
                ("calc.py".to_string(), Some("test_calc.py".to_string())),
                ("util.py".to_string(), None),
            ]
        );
    }

    #[test]
    fn falls_back_to_shared_tests_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sandbox = PathSandbox::new(temp.path()).expect("sandbox");
        let root = sandbox.root();
        for file in ["a.py", "b.py", "test_b.py", "tests.py", "latest.py"] {
            fs::write(root.join(file), "").expect("write");
        }

        let targets = discover_targets(&sandbox).expect("discover");
        assert_eq!(
            names(&targets),
            vec![
                ("a.py".to_string(), Some("tests.py".to_string())),
                ("b.py".to_string(), Some("test_b.py".to_string())),
            ]
        );
    }
}
