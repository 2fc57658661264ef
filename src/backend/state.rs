//! State-backed backend: every file lives in the agent's virtual file map.

use std::collections::BTreeSet;

use async_trait::async_trait;
use regex::Regex;

use crate::state::{canonicalize_path, FileSystem};

use super::{
    apply_edit, format_numbered, glob_matches, Backend, BackendError, EditOutcome, FileInfo,
    GrepMatch, RawFile, WriteResult,
};

/// Backend over the agent's [FileSystem]. Cloning shares the map, so the
/// agent, its tools, and any shared-files subagent context all observe the
/// same writes.
#[derive(Clone, Debug, Default)]
pub struct StateBackend {
    files: FileSystem,
}

impl StateBackend {
    pub fn new(files: FileSystem) -> Self {
        Self { files }
    }

    pub fn files(&self) -> &FileSystem {
        &self.files
    }

    fn paths_under(&self, dir: &str) -> Vec<String> {
        let dir = canonicalize_path(dir);
        let prefix = if dir == "/" {
            "/".to_string()
        } else {
            format!("{}/", dir)
        };
        self.files
            .paths()
            .into_iter()
            .filter(|p| p.starts_with(&prefix) || *p == dir)
            .collect()
    }
}

#[async_trait]
impl Backend for StateBackend {
    async fn write(&self, path: &str, content: &str) -> Result<WriteResult, BackendError> {
        let key = self.files.put(path, content);
        Ok(WriteResult {
            success: true,
            path: key,
        })
    }

    async fn read(
        &self,
        path: &str,
        offset: u32,
        limit: Option<u32>,
    ) -> Result<String, BackendError> {
        let entry = self.files.get(path).ok_or_else(|| BackendError::NotFound {
            path: canonicalize_path(path),
        })?;
        Ok(format_numbered(&entry.lines, offset, limit))
    }

    async fn read_raw(&self, path: &str) -> Result<RawFile, BackendError> {
        let entry = self.files.get(path).ok_or_else(|| BackendError::NotFound {
            path: canonicalize_path(path),
        })?;
        Ok(RawFile {
            content: entry.lines.clone(),
            created_at: entry.created_at,
            modified_at: entry.modified_at,
        })
    }

    async fn edit(
        &self,
        path: &str,
        find: &str,
        replace: &str,
        replace_all: bool,
    ) -> Result<EditOutcome, BackendError> {
        let key = canonicalize_path(path);
        let entry = self
            .files
            .get(&key)
            .ok_or_else(|| BackendError::NotFound { path: key.clone() })?;
        let (new_content, occurrences) =
            apply_edit(&key, &entry.content(), find, replace, replace_all)?;
        self.files
            .update_lines(&key, crate::state::split_lines(&new_content));
        Ok(EditOutcome {
            path: key,
            occurrences,
        })
    }

    async fn ls_info(&self, dir: &str) -> Result<Vec<FileInfo>, BackendError> {
        let dir = canonicalize_path(dir);
        let mut infos = Vec::new();
        let mut seen_dirs: BTreeSet<String> = BTreeSet::new();
        for path in self.paths_under(&dir) {
            if let Some(entry) = self.files.get(&path) {
                // Synthesize directory entries from intermediate components.
                let relative_start = if dir == "/" { 1 } else { dir.len() + 1 };
                let mut component_end = relative_start;
                while let Some(slash) = path[component_end..].find('/') {
                    component_end += slash;
                    seen_dirs.insert(path[..component_end].to_string());
                    component_end += 1;
                }
                infos.push(FileInfo {
                    path,
                    is_dir: false,
                    size: entry.size(),
                    modified_at: Some(entry.modified_at),
                });
            }
        }
        for d in seen_dirs {
            infos.push(FileInfo {
                path: d,
                is_dir: true,
                size: 0,
                modified_at: None,
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
        for path in self.files.paths() {
            if !glob_matches(&compiled, rooted, &path, &cwd) {
                continue;
            }
            if let Some(entry) = self.files.get(&path) {
                out.push(FileInfo {
                    path,
                    is_dir: false,
                    size: entry.size(),
                    modified_at: Some(entry.modified_at),
                });
            }
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
        let scope = match path {
            Some(p) => self.paths_under(p),
            None => self.files.paths(),
        };
        let mut matches = Vec::new();
        for candidate in scope {
            if let Some((ref pat, rooted)) = include {
                if !glob_matches(pat, rooted, &candidate, "/") {
                    continue;
                }
            }
            if let Some(entry) = self.files.get(&candidate) {
                for (index, line) in entry.lines.iter().enumerate() {
                    if regex.is_match(line) {
                        matches.push(GrepMatch {
                            path: candidate.clone(),
                            line: (index + 1) as u32,
                            text: line.clone(),
                        });
                    }
                }
            }
        }
        matches.sort_by(|a, b| a.path.cmp(&b.path).then(a.line.cmp(&b.line)));
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> StateBackend {
        StateBackend::new(FileSystem::new())
    }

    #[tokio::test]
    async fn test_write_read_round_trip() {
        let b = backend();
        let result = b.write("notes.txt", "alpha\nbeta").await.unwrap();
        assert!(result.success);
        assert_eq!(result.path, "/notes.txt");
        let text = b.read("/notes.txt", 0, None).await.unwrap();
        assert_eq!(text, "1→alpha\n2→beta");
        let text = b.read("/notes.txt", 1, Some(1)).await.unwrap();
        assert_eq!(text, "2→beta");
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let b = backend();
        let err = b.read("/missing", 0, None).await.unwrap_err();
        assert!(err.to_string().contains("File not found"));
    }

    #[tokio::test]
    async fn test_edit_semantics() {
        let b = backend();
        b.write("/f.txt", "one two one").await.unwrap();
        let err = b.edit("/f.txt", "one", "three", false).await.unwrap_err();
        match err {
            BackendError::EditFailed { occurrences, .. } => assert_eq!(occurrences, 2),
            other => panic!("unexpected: {other}"),
        }
        let outcome = b.edit("/f.txt", "two", "four", false).await.unwrap();
        assert_eq!(outcome.occurrences, 1);
        assert_eq!(
            b.read_raw("/f.txt").await.unwrap().content.join("\n"),
            "one four one"
        );
        let outcome = b.edit("/f.txt", "one", "x", true).await.unwrap();
        assert_eq!(outcome.occurrences, 2);
    }

    #[tokio::test]
    async fn test_glob_relative_and_deep() {
        let b = backend();
        b.write("/a.txt", "x").await.unwrap();
        b.write("/src/lib.rs", "x").await.unwrap();
        b.write("/src/deep/mod.rs", "x").await.unwrap();

        let top = b.glob_info("*.txt", None).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].path, "/a.txt");

        let all_rs = b.glob_info("**/*.rs", None).await.unwrap();
        assert_eq!(all_rs.len(), 2);

        let scoped = b.glob_info("*.rs", Some("/src")).await.unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].path, "/src/lib.rs");
    }

    #[tokio::test]
    async fn test_grep_sorted_one_indexed() {
        let b = backend();
        b.write("/b.txt", "match here\nnothing\nmatch again")
            .await
            .unwrap();
        b.write("/a.txt", "no\nmatch").await.unwrap();
        let matches = b.grep_raw("match", None, None).await.unwrap();
        let locations: Vec<(&str, u32)> = matches
            .iter()
            .map(|m| (m.path.as_str(), m.line))
            .collect();
        assert_eq!(
            locations,
            vec![("/a.txt", 2), ("/b.txt", 1), ("/b.txt", 3)]
        );
    }

    #[tokio::test]
    async fn test_ls_info_synthesizes_dirs() {
        let b = backend();
        b.write("/src/lib.rs", "x").await.unwrap();
        b.write("/src/deep/mod.rs", "y").await.unwrap();
        let infos = b.ls_info("/").await.unwrap();
        let dirs: Vec<&str> = infos
            .iter()
            .filter(|i| i.is_dir)
            .map(|i| i.path.as_str())
            .collect();
        assert_eq!(dirs, vec!["/src", "/src/deep"]);
    }

    #[test]
    fn test_execute_unsupported() {
        let b = backend();
        assert!(!b.supports_execute());
    }
}
