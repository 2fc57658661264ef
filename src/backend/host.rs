//! Host-filesystem backend: rooted at a directory, optional shell.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;

use super::{
    apply_edit, format_numbered, glob_matches, Backend, BackendError, EditOutcome, ExecResult,
    FileInfo, GrepMatch, RawFile, WriteResult,
};
use crate::state::canonicalize_path;

/// Command patterns blocked when `accept_edits` mode installs
/// `block_shell_file_ops`: output redirection, file mutation utilities,
/// and package-manager writes.
pub const SHELL_FILE_OP_PATTERNS: &[&str] = &[
    r">",
    r"\brm\b",
    r"\bmv\b",
    r"\bcp\b",
    r"\btouch\b",
    r"\bmkdir\b",
    r"\brmdir\b",
    r"\bchmod\b",
    r"\bchown\b",
    r"\b(apt|apt-get|yum|dnf|brew|npm|pnpm|yarn|pip|pip3|cargo|gem)\s+(install|add|remove|uninstall|update|upgrade)\b",
];

/// Backend rooted at a host directory. Virtual paths (`/x/y.txt`) map to
/// `<root>/x/y.txt`; escapes via `..` are rejected.
pub struct HostBackend {
    root: PathBuf,
    shell_enabled: bool,
    blocked: Vec<Regex>,
}

impl HostBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            shell_enabled: false,
            blocked: Vec::new(),
        }
    }

    /// Enable shell execution. [Backend::supports_execute] turns true.
    pub fn with_shell(mut self) -> Self {
        self.shell_enabled = true;
        self
    }

    /// Install blocked command patterns; non-compiling patterns are treated
    /// as literal substrings.
    pub fn with_blocked_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for pattern in patterns {
            let raw = pattern.as_ref();
            match Regex::new(raw) {
                Ok(regex) => self.blocked.push(regex),
                Err(_) => {
                    if let Ok(regex) = Regex::new(&regex::escape(raw)) {
                        self.blocked.push(regex);
                    }
                }
            }
        }
        self
    }

    /// Install the [SHELL_FILE_OP_PATTERNS] pre-set.
    pub fn with_file_ops_blocked(self) -> Self {
        self.with_blocked_patterns(SHELL_FILE_OP_PATTERNS.iter().copied())
    }

    fn resolve(&self, virtual_path: &str) -> Result<PathBuf, BackendError> {
        let canonical = canonicalize_path(virtual_path);
        let relative = canonical.trim_start_matches('/');
        let relative_path = Path::new(relative);
        if relative_path
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(BackendError::PathEscape(canonical));
        }
        Ok(self.root.join(relative_path))
    }

    fn virtualize(&self, host_path: &Path) -> String {
        match host_path.strip_prefix(&self.root) {
            Ok(rel) => canonicalize_path(&rel.to_string_lossy()),
            Err(_) => canonicalize_path(&host_path.to_string_lossy()),
        }
    }

    async fn walk_files(&self, start: &Path) -> Result<Vec<PathBuf>, BackendError> {
        let mut files = Vec::new();
        let mut pending = vec![start.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    files.push(path);
                }
            }
        }
        files.sort();
        Ok(files)
    }

    async fn file_times(path: &Path) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        match tokio::fs::metadata(path).await {
            Ok(meta) => {
                let modified = meta.modified().ok().map(DateTime::<Utc>::from);
                let created = meta.created().ok().map(DateTime::<Utc>::from).or(modified);
                (created, modified)
            }
            Err(_) => (None, None),
        }
    }
}

#[async_trait]
impl Backend for HostBackend {
    async fn write(&self, path: &str, content: &str) -> Result<WriteResult, BackendError> {
        let host = self.resolve(path)?;
        if let Some(parent) = host.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&host, content).await?;
        Ok(WriteResult {
            success: true,
            path: canonicalize_path(path),
        })
    }

    async fn read(
        &self,
        path: &str,
        offset: u32,
        limit: Option<u32>,
    ) -> Result<String, BackendError> {
        let raw = self.read_raw(path).await?;
        Ok(format_numbered(&raw.content, offset, limit))
    }

    async fn read_raw(&self, path: &str) -> Result<RawFile, BackendError> {
        let host = self.resolve(path)?;
        let content = tokio::fs::read_to_string(&host)
            .await
            .map_err(|_| BackendError::NotFound {
                path: canonicalize_path(path),
            })?;
        let (created, modified) = Self::file_times(&host).await;
        let now = Utc::now();
        Ok(RawFile {
            content: crate::state::split_lines(&content),
            created_at: created.unwrap_or(now),
            modified_at: modified.unwrap_or(now),
        })
    }

    async fn edit(
        &self,
        path: &str,
        find: &str,
        replace: &str,
        replace_all: bool,
    ) -> Result<EditOutcome, BackendError> {
        let canonical = canonicalize_path(path);
        let host = self.resolve(&canonical)?;
        let content = tokio::fs::read_to_string(&host)
            .await
            .map_err(|_| BackendError::NotFound {
                path: canonical.clone(),
            })?;
        let (new_content, occurrences) =
            apply_edit(&canonical, &content, find, replace, replace_all)?;
        tokio::fs::write(&host, new_content).await?;
        Ok(EditOutcome {
            path: canonical,
            occurrences,
        })
    }

    async fn ls_info(&self, dir: &str) -> Result<Vec<FileInfo>, BackendError> {
        let start = self.resolve(dir)?;
        let mut infos = Vec::new();
        for file in self.walk_files(&start).await? {
            let meta = tokio::fs::metadata(&file).await?;
            let (_, modified) = Self::file_times(&file).await;
            infos.push(FileInfo {
                path: self.virtualize(&file),
                is_dir: false,
                size: meta.len(),
                modified_at: modified,
            });
        }
        infos.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(infos)
    }

    async fn glob_info(
        &self,
        pattern: &str,
        cwd: Option<&str>,
    ) -> Result<Vec<FileInfo>, BackendError> {
        let compiled = glob::Pattern::new(pattern)
            .map_err(|e| BackendError::InvalidPattern(e.to_string()))?;
        let rooted = pattern.starts_with('/');
        let cwd = canonicalize_path(cwd.unwrap_or("/"));
        let mut out = Vec::new();
        for file in self.walk_files(&self.root.clone()).await? {
            let virtual_path = self.virtualize(&file);
            if !glob_matches(&compiled, rooted, &virtual_path, &cwd) {
                continue;
            }
            let meta = tokio::fs::metadata(&file).await?;
            let (_, modified) = Self::file_times(&file).await;
            out.push(FileInfo {
                path: virtual_path,
                is_dir: false,
                size: meta.len(),
                modified_at: modified,
            });
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    async fn grep_raw(
        &self,
        pattern: &str,
        path: Option<&str>,
        include_glob: Option<&str>,
    ) -> Result<Vec<GrepMatch>, BackendError> {
        let regex = Regex::new(pattern).map_err(|e| BackendError::InvalidPattern(e.to_string()))?;
        let include = match include_glob {
            Some(g) => Some((
                glob::Pattern::new(g).map_err(|e| BackendError::InvalidPattern(e.to_string()))?,
                g.starts_with('/'),
            )),
            None => None,
        };
        let start = match path {
            Some(p) => self.resolve(p)?,
            None => self.root.clone(),
        };
        let mut matches = Vec::new();
        for file in self.walk_files(&start).await? {
            let virtual_path = self.virtualize(&file);
            if let Some((ref pat, rooted)) = include {
                if !glob_matches(pat, rooted, &virtual_path, "/") {
                    continue;
                }
            }
            let Ok(content) = tokio::fs::read_to_string(&file).await else {
                continue;
            };
            for (index, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    matches.push(GrepMatch {
                        path: virtual_path.clone(),
                        line: (index + 1) as u32,
                        text: line.to_string(),
                    });
                }
            }
        }
        matches.sort_by(|a, b| a.path.cmp(&b.path).then(a.line.cmp(&b.line)));
        Ok(matches)
    }

    fn supports_execute(&self) -> bool {
        self.shell_enabled
    }

    async fn execute(&self, command: &str) -> Result<ExecResult, BackendError> {
        if !self.shell_enabled {
            return Err(BackendError::ExecuteUnsupported);
        }
        for pattern in &self.blocked {
            if pattern.is_match(command) {
                return Err(BackendError::CommandBlocked {
                    pattern: pattern.as_str().to_string(),
                });
            }
        }
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .output()
            .await?;
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(ExecResult {
            exit_code: output.status.code().unwrap_or(-1),
            output: combined,
        })
    }
}
