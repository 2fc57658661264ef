//! Backend abstraction: the contract behind every filesystem tool.
//!
//! A backend may be pure state-backed (all data in [crate::state::FileSystem])
//! or host-filesystem-backed (rooted at a directory, optional shell
//! execution). The capability to execute shell commands is structural:
//! [Backend::supports_execute] gates whether the `bash` tool is exposed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod host;
mod state;

pub use host::{HostBackend, SHELL_FILE_OP_PATTERNS};
pub use state::StateBackend;

/// Metadata for a single file or directory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

/// Result of a write.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WriteResult {
    pub success: bool,
    pub path: String,
}

/// Result of a successful edit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EditOutcome {
    pub path: String,
    pub occurrences: u32,
}

/// Raw file contents plus timestamps, deep-copied.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawFile {
    pub content: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// A single grep match. `line` is 1-indexed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GrepMatch {
    pub path: String,
    pub line: u32,
    pub text: String,
}

/// Result of a shell execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecResult {
    pub exit_code: i32,
    pub output: String,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("File not found: {path}")]
    NotFound { path: String },

    #[error("Expected exactly one occurrence of find string in {path}, found {occurrences}")]
    EditFailed { path: String, occurrences: u32 },

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("CommandBlockedError: command matches blocked pattern '{pattern}'")]
    CommandBlocked { pattern: String },

    #[error("Shell execution is not supported by this backend")]
    ExecuteUnsupported,

    #[error("Path escapes the backend root: {0}")]
    PathEscape(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The contract used by the filesystem tools and `read_file` citations.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Write `content` to `path`, creating parent directories virtually.
    /// Preserves `created_at` on overwrite and bumps `modified_at`.
    async fn write(&self, path: &str, content: &str) -> Result<WriteResult, BackendError>;

    /// Read lines formatted as `N→<line>`, numbering from `offset + 1`.
    async fn read(
        &self,
        path: &str,
        offset: u32,
        limit: Option<u32>,
    ) -> Result<String, BackendError>;

    /// Deep copy of the raw file.
    async fn read_raw(&self, path: &str) -> Result<RawFile, BackendError>;

    /// Exact-string replace. Fails when the file is missing, when `find`
    /// does not occur, or when it occurs more than once and `replace_all`
    /// is false.
    async fn edit(
        &self,
        path: &str,
        find: &str,
        replace: &str,
        replace_all: bool,
    ) -> Result<EditOutcome, BackendError>;

    /// Deep listing under `dir`.
    async fn ls_info(&self, dir: &str) -> Result<Vec<FileInfo>, BackendError>;

    /// Glob with `*`, `**`, `?` and relative-path semantics: a stored
    /// path's leading `/` does not match unrooted patterns.
    async fn glob_info(
        &self,
        pattern: &str,
        cwd: Option<&str>,
    ) -> Result<Vec<FileInfo>, BackendError>;

    /// Regex search. Matches carry 1-indexed line numbers and come back
    /// sorted by `(path, line)`.
    async fn grep_raw(
        &self,
        pattern: &str,
        path: Option<&str>,
        include_glob: Option<&str>,
    ) -> Result<Vec<GrepMatch>, BackendError>;

    /// Structural capability probe for the `bash` tool.
    fn supports_execute(&self) -> bool {
        false
    }

    async fn execute(&self, _command: &str) -> Result<ExecResult, BackendError> {
        Err(BackendError::ExecuteUnsupported)
    }
}

pub(crate) fn glob_match_options() -> glob::MatchOptions {
    glob::MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    }
}

/// Match a stored path against a glob pattern relative to `cwd`.
/// Rooted patterns (leading `/`) match the full stored path.
pub(crate) fn glob_matches(
    pattern: &glob::Pattern,
    rooted: bool,
    stored_path: &str,
    cwd: &str,
) -> bool {
    if rooted {
        return pattern.matches_with(stored_path, glob_match_options());
    }
    let prefix = if cwd == "/" {
        "/"
    } else {
        cwd.trim_end_matches('/')
    };
    let relative = if prefix == "/" {
        stored_path.strip_prefix('/')
    } else {
        stored_path
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/'))
    };
    match relative {
        Some(rel) => pattern.matches_with(rel, glob_match_options()),
        None => false,
    }
}

/// Format lines as `N→<line>` starting at `offset + 1`.
pub(crate) fn format_numbered(lines: &[String], offset: u32, limit: Option<u32>) -> String {
    let start = (offset as usize).min(lines.len());
    let end = match limit {
        Some(n) => (start + n as usize).min(lines.len()),
        None => lines.len(),
    };
    lines[start..end]
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{}→{}", start + i + 1, line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Apply the exact-string edit contract to joined content.
pub(crate) fn apply_edit(
    path: &str,
    content: &str,
    find: &str,
    replace: &str,
    replace_all: bool,
) -> Result<(String, u32), BackendError> {
    let occurrences = content.matches(find).count() as u32;
    if occurrences == 0 {
        return Err(BackendError::EditFailed {
            path: path.to_string(),
            occurrences: 0,
        });
    }
    if replace_all {
        Ok((content.replace(find, replace), occurrences))
    } else {
        if occurrences != 1 {
            return Err(BackendError::EditFailed {
                path: path.to_string(),
                occurrences,
            });
        }
        Ok((content.replacen(find, replace, 1), 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_numbered_offsets() {
        let lines: Vec<String> = vec!["a".into(), "b".into(), "c".into()];
        assert_eq!(format_numbered(&lines, 0, None), "1→a\n2→b\n3→c");
        assert_eq!(format_numbered(&lines, 1, Some(1)), "2→b");
        assert_eq!(format_numbered(&lines, 5, None), "");
    }

    #[test]
    fn test_apply_edit_exactly_one() {
        let (out, n) = apply_edit("/f", "a b a", "b", "x", false).unwrap();
        assert_eq!(out, "a x a");
        assert_eq!(n, 1);

        let err = apply_edit("/f", "a b a", "a", "x", false).unwrap_err();
        match err {
            BackendError::EditFailed { occurrences, .. } => assert_eq!(occurrences, 2),
            other => panic!("unexpected error: {other}"),
        }

        let (out, n) = apply_edit("/f", "a b a", "a", "x", true).unwrap();
        assert_eq!(out, "x b x");
        assert_eq!(n, 2);
    }

    #[test]
    fn test_glob_relative_semantics() {
        let pattern = glob::Pattern::new("*.txt").unwrap();
        // Leading slash in stored paths must not match unrooted patterns.
        assert!(glob_matches(&pattern, false, "/notes.txt", "/"));
        assert!(!glob_matches(&pattern, false, "/dir/notes.txt", "/"));

        let deep = glob::Pattern::new("**/*.txt").unwrap();
        assert!(glob_matches(&deep, false, "/dir/sub/notes.txt", "/"));

        let rooted = glob::Pattern::new("/dir/*.txt").unwrap();
        assert!(glob_matches(&rooted, true, "/dir/notes.txt", "/"));
    }
}
