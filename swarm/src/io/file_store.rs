//! Crash-consistent file I/O confined to a [`PathSandbox`].
//!
//! Every operation validates its path first and reports expected failures
//! (missing file, permissions, sandbox escape) as a failed
//! [`FileOperationResult`]. Only an empty path argument is returned as an
//! error.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local, Utc};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::types::FileOperationResult;
use crate::io::atomic::write_atomic;
use crate::io::sandbox::{InvalidArgument, PathSandbox, SandboxError};

const PRIMARY_ENCODING: &str = "utf-8";
const FALLBACK_ENCODING: &str = "latin-1";

pub type FileOpResult = Result<FileOperationResult, InvalidArgument>;

#[derive(Debug, Clone)]
pub struct FileStore {
    sandbox: PathSandbox,
}

impl FileStore {
    pub fn new(sandbox: PathSandbox) -> Self {
        Self { sandbox }
    }

    pub fn sandbox(&self) -> &PathSandbox {
        &self.sandbox
    }

    /// Read a text file, decoding as UTF-8 and falling back to Latin-1.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn read(&self, path: impl AsRef<Path>) -> FileOpResult {
        let requested = path.as_ref();
        let resolved = match self.sandbox.validate(requested) {
            Ok(resolved) => resolved,
            Err(err) => return rejected(requested, err),
        };
        if !resolved.exists() {
            return Ok(FileOperationResult::failed(
                &resolved,
                format!("file not found: {}", resolved.display()),
            ));
        }
        if !resolved.is_file() {
            return Ok(FileOperationResult::failed(
                &resolved,
                format!("not a file: {}", resolved.display()),
            ));
        }

        let bytes = match fs::read(&resolved) {
            Ok(bytes) => bytes,
            Err(err) => return Ok(io_failure(&resolved, "read", &err)),
        };
        let size = bytes.len();
        let (content, encoding) = match String::from_utf8(bytes) {
            Ok(text) => (text, PRIMARY_ENCODING),
            Err(err) => {
                debug!("content is not valid utf-8, decoding as latin-1");
                (decode_latin1(err.as_bytes()), FALLBACK_ENCODING)
            }
        };
        let line_count = content.lines().count();

        let mut result = FileOperationResult::ok(&resolved)
            .with_meta("size_bytes", size)
            .with_meta("encoding", encoding)
            .with_meta("line_count", line_count);
        if let Some(modified) = modified_time(&resolved) {
            result = result.with_meta("modified_time", modified);
        }
        Ok(result.with_content(content))
    }

    /// Write `content` atomically, optionally backing up an existing file.
    #[instrument(skip_all, fields(path = %path.as_ref().display(), create_backup))]
    pub fn write(&self, path: impl AsRef<Path>, content: &str, create_backup: bool) -> FileOpResult {
        let requested = path.as_ref();
        let resolved = match self.sandbox.validate(requested) {
            Ok(resolved) => resolved,
            Err(err) => return rejected(requested, err),
        };
        if resolved.is_dir() {
            return Ok(FileOperationResult::failed(
                &resolved,
                format!("is a directory: {}", resolved.display()),
            ));
        }
        if let Some(parent) = resolved.parent()
            && let Err(err) = fs::create_dir_all(parent)
        {
            return Ok(io_failure(&resolved, "create parent directory", &err));
        }

        let mut backup_path = None;
        if create_backup && resolved.is_file() {
            match copy_to_backup(&resolved) {
                Ok(path) => backup_path = Some(path),
                Err(err) => return Ok(io_failure(&resolved, "backup", &err)),
            }
        }

        if let Err(err) = write_atomic(&resolved, content.as_bytes()) {
            return Ok(io_failure(&resolved, "write", &err));
        }
        debug!(bytes = content.len(), "file written");

        let mut result = FileOperationResult::ok(&resolved)
            .with_meta("size_bytes", content.len())
            .with_meta("line_count", content.lines().count())
            .with_meta("backup_created", backup_path.is_some());
        if let Some(backup) = backup_path {
            result = result.with_meta("backup_path", backup.display().to_string());
        }
        Ok(result)
    }

    /// Copy an existing file to `<name>.bak.<timestamp>` beside it.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn backup(&self, path: impl AsRef<Path>) -> FileOpResult {
        let requested = path.as_ref();
        let resolved = match self.sandbox.validate(requested) {
            Ok(resolved) => resolved,
            Err(err) => return rejected(requested, err),
        };
        if !resolved.is_file() {
            return Ok(FileOperationResult::failed(
                &resolved,
                format!("cannot backup missing file: {}", resolved.display()),
            ));
        }
        match copy_to_backup(&resolved) {
            Ok(backup) => Ok(FileOperationResult::ok(&resolved)
                .with_meta("backup_path", backup.display().to_string())),
            Err(err) => Ok(io_failure(&resolved, "backup", &err)),
        }
    }

    /// List source files under the root or a subdirectory. The sorted paths
    /// are reported in `metadata["files"]`.
    pub fn list_python_files(&self, subdir: Option<&Path>) -> FileOpResult {
        let root = self.sandbox.root().to_path_buf();
        match self.sandbox.list_python_files(subdir) {
            Ok(files) => {
                let names: Vec<Value> = files
                    .iter()
                    .map(|file| Value::String(file.display().to_string()))
                    .collect();
                let path = match subdir {
                    Some(dir) => self.sandbox.join_safe(dir).unwrap_or(root),
                    None => root,
                };
                Ok(FileOperationResult::ok(path)
                    .with_meta("count", files.len())
                    .with_meta("files", names))
            }
            Err(err) => rejected(subdir.unwrap_or(root.as_path()), err),
        }
    }

    /// Advisory existence check; paths outside the sandbox never exist.
    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.sandbox
            .validate(path)
            .is_ok_and(|resolved| resolved.exists())
    }

    pub fn info(&self, path: impl AsRef<Path>) -> FileOpResult {
        let requested = path.as_ref();
        let resolved = match self.sandbox.validate(requested) {
            Ok(resolved) => resolved,
            Err(err) => return rejected(requested, err),
        };
        let meta = match fs::metadata(&resolved) {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(FileOperationResult::failed(
                    &resolved,
                    format!("file not found: {}", resolved.display()),
                ));
            }
            Err(err) => return Ok(io_failure(&resolved, "stat", &err)),
        };

        let kind = if meta.is_dir() { "directory" } else { "file" };
        let name = resolved
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = resolved
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let mut result = FileOperationResult::ok(&resolved)
            .with_meta("size_bytes", meta.len())
            .with_meta("kind", kind)
            .with_meta("name", name)
            .with_meta("extension", extension);
        if let Ok(modified) = meta.modified() {
            result = result.with_meta("modified_time", format_time(modified));
        }
        Ok(result)
    }

    /// Delete a file, optionally backing it up first.
    #[instrument(skip_all, fields(path = %path.as_ref().display(), create_backup))]
    pub fn delete(&self, path: impl AsRef<Path>, create_backup: bool) -> FileOpResult {
        let requested = path.as_ref();
        let resolved = match self.sandbox.validate(requested) {
            Ok(resolved) => resolved,
            Err(err) => return rejected(requested, err),
        };
        if !resolved.is_file() {
            return Ok(FileOperationResult::failed(
                &resolved,
                format!("file not found: {}", resolved.display()),
            ));
        }

        let mut result = FileOperationResult::ok(&resolved);
        if create_backup {
            match copy_to_backup(&resolved) {
                Ok(backup) => {
                    result = result.with_meta("backup_path", backup.display().to_string());
                }
                Err(err) => return Ok(io_failure(&resolved, "backup", &err)),
            }
        }
        if let Err(err) = fs::remove_file(&resolved) {
            return Ok(io_failure(&resolved, "delete", &err));
        }
        Ok(result.with_meta("deleted", true))
    }
}

/// Convert a sandbox rejection into the component's result shape. Empty
/// paths stay errors; security violations become failed results.
fn rejected(requested: &Path, err: SandboxError) -> FileOpResult {
    match err {
        SandboxError::InvalidArgument(invalid) => Err(invalid),
        SandboxError::SecurityViolation { .. } => {
            warn!(path = %requested.display(), err = %err, "file operation rejected");
            Ok(FileOperationResult::failed(requested, err.to_string())
                .with_meta("error_type", "SecurityViolation"))
        }
    }
}

fn io_failure(path: &Path, action: &str, err: &io::Error) -> FileOperationResult {
    let error_type = match err.kind() {
        io::ErrorKind::NotFound => "NotFound",
        io::ErrorKind::PermissionDenied => "PermissionDenied",
        _ => "IoError",
    };
    warn!(path = %path.display(), action, err = %err, "file operation failed");
    FileOperationResult::failed(path, format!("{action} {}: {err}", path.display()))
        .with_meta("error_type", error_type)
}

fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&byte| char::from(byte)).collect()
}

fn modified_time(path: &Path) -> Option<String> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .map(format_time)
}

fn format_time(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339()
}

fn copy_to_backup(path: &Path) -> io::Result<PathBuf> {
    let backup = next_backup_path(path, &Local::now().format("%Y%m%d_%H%M%S").to_string());
    fs::copy(path, &backup)?;
    debug!(backup = %backup.display(), "backup created");
    Ok(backup)
}

/// `<name>.bak.<stamp>`, with `_<n>` appended when that path is taken.
fn next_backup_path(path: &Path, stamp: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = format!("{name}.bak.{stamp}");
    let mut candidate = path.with_file_name(&base);
    let mut n = 1u32;
    while candidate.exists() {
        candidate = path.with_file_name(format!("{base}_{n}"));
        n += 1;
    }
    candidate
}
