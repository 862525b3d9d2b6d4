//! Path confinement for every file the tool layer touches.
//!
//! [`PathSandbox`] is the single authority deciding whether a path may be
//! read or written. Paths are resolved component by component (symlinks
//! followed, `.`/`..` applied) before the containment check, and paths that
//! do not exist yet are resolved as far as the filesystem allows.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Extension of the source files the repair loop works on.
pub const SOURCE_EXTENSION: &str = "py";

const MAX_SYMLINK_HOPS: usize = 40;

/// Programmer error: a required path argument was empty or unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid argument: {0}")]
pub struct InvalidArgument(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SandboxError {
    #[error(transparent)]
    InvalidArgument(#[from] InvalidArgument),
    #[error("security violation: {message} (attempted path: {})", attempted_path.display())]
    SecurityViolation {
        message: String,
        attempted_path: PathBuf,
    },
}

impl SandboxError {
    fn violation(message: impl Into<String>, attempted_path: &Path) -> Self {
        SandboxError::SecurityViolation {
            message: message.into(),
            attempted_path: attempted_path.to_path_buf(),
        }
    }
}

/// A directory boundary that no validated path may escape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSandbox {
    root: PathBuf,
}

impl PathSandbox {
    /// Create (if needed) and canonicalize the sandbox root.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, InvalidArgument> {
        let root = root.as_ref();
        if root.as_os_str().is_empty() {
            return Err(InvalidArgument("sandbox root cannot be empty".to_string()));
        }
        fs::create_dir_all(root).map_err(|err| {
            InvalidArgument(format!("create sandbox root {}: {err}", root.display()))
        })?;
        let root = fs::canonicalize(root).map_err(|err| {
            InvalidArgument(format!("resolve sandbox root {}: {err}", root.display()))
        })?;
        if !root.is_dir() {
            return Err(InvalidArgument(format!(
                "sandbox root {} is not a directory",
                root.display()
            )));
        }
        debug!(root = %root.display(), "sandbox ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Recreate the root directory if it was removed. Idempotent.
    pub fn ensure_exists(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)
    }

    /// Resolve `path` and require it to be the root or a descendant of it.
    ///
    /// Relative input is interpreted relative to the root.
    pub fn validate(&self, path: impl AsRef<Path>) -> Result<PathBuf, SandboxError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(InvalidArgument("path cannot be empty".to_string()).into());
        }
        let candidate = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };

        let resolved = resolve(&candidate).map_err(|err| {
            SandboxError::violation(format!("failed to resolve path: {err}"), &candidate)
        })?;

        if !resolved.starts_with(&self.root) {
            warn!(
                attempted = %candidate.display(),
                resolved = %resolved.display(),
                "path escapes sandbox"
            );
            return Err(SandboxError::violation(
                format!(
                    "path outside sandbox: {} is not within {}",
                    resolved.display(),
                    self.root.display()
                ),
                &candidate,
            ));
        }
        Ok(resolved)
    }

    /// Non-failing form of [`PathSandbox::validate`].
    pub fn is_safe(&self, path: impl AsRef<Path>) -> bool {
        self.validate(path).is_ok()
    }

    /// Join `relative` onto the root, discarding any leading root or prefix
    /// component, then validate.
    pub fn join_safe(&self, relative: impl AsRef<Path>) -> Result<PathBuf, SandboxError> {
        let relative = relative.as_ref();
        if relative.as_os_str().is_empty() {
            return Err(InvalidArgument("path cannot be empty".to_string()).into());
        }
        let stripped: PathBuf = relative
            .components()
            .filter(|component| !matches!(component, Component::RootDir | Component::Prefix(_)))
            .collect();
        self.validate(self.root.join(stripped))
    }

    /// Recursively list source files under the root or a validated
    /// subdirectory, in lexicographic order.
    pub fn list_python_files(&self, subdir: Option<&Path>) -> Result<Vec<PathBuf>, SandboxError> {
        let search_dir = match subdir {
            Some(dir) => self.validate(dir)?,
            None => self.root.clone(),
        };

        let mut files = Vec::new();
        for entry in WalkDir::new(&search_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
        {
            let path = entry.path();
            if entry.file_type().is_dir() || !has_source_extension(path) {
                continue;
            }
            // Symlinked files must still resolve inside the sandbox.
            match self.validate(path) {
                Ok(resolved) if resolved.is_file() => files.push(resolved),
                Ok(_) => {}
                Err(err) => debug!(path = %path.display(), err = %err, "skipping file"),
            }
        }
        files.sort();
        files.dedup();
        Ok(files)
    }
}

pub fn has_source_extension(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == SOURCE_EXTENSION)
}

/// Resolve `path` like a non-strict `realpath`: symlinks in existing
/// components are followed, missing components are appended as-is, and
/// `..` pops the already-resolved prefix.
fn resolve(path: &Path) -> io::Result<PathBuf> {
    let mut pending: VecDeque<OsString> = VecDeque::new();
    let mut resolved = PathBuf::new();
    let mut hops = 0usize;

    push_components(&mut pending, &mut resolved, path, true);

    while let Some(part) = pending.pop_front() {
        if part == "." {
            continue;
        }
        if part == ".." {
            resolved.pop();
            continue;
        }
        let next = resolved.join(&part);
        match fs::symlink_metadata(&next) {
            Ok(meta) if meta.file_type().is_symlink() => {
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(io::Error::other("too many levels of symbolic links"));
                }
                let target = fs::read_link(&next)?;
                let mut front = VecDeque::new();
                push_components(&mut front, &mut resolved, &target, target.is_absolute());
                while let Some(item) = front.pop_back() {
                    pending.push_front(item);
                }
            }
            Ok(_) => resolved = next,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
                ) =>
            {
                resolved = next;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(resolved)
}

/// Queue the components of `path`. When `reset` is set, anchor `resolved`
/// at the path's root (absolute targets restart resolution).
fn push_components(
    queue: &mut VecDeque<OsString>,
    resolved: &mut PathBuf,
    path: &Path,
    reset: bool,
) {
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => {
                if reset {
                    *resolved = PathBuf::from(prefix.as_os_str());
                }
            }
            Component::RootDir => {
                if reset {
                    resolved.push(Component::RootDir.as_os_str());
                }
            }
            Component::CurDir => {}
            Component::ParentDir => queue.push_back(OsString::from("..")),
            Component::Normal(name) => queue.push_back(name.to_os_string()),
        }
    }
}
