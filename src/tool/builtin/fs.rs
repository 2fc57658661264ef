//! Filesystem tools: ls, read_file, write_file, edit_file, glob, grep.
//!
//! Each tool closes over a shared [Backend] handle; the backend decides
//! whether data lives in agent state or on the host filesystem.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::backend::Backend;
use crate::tool::{optional_str, require_str, Tool, ToolError, ToolInvocation};

/// List files and directories under a path (deep listing).
pub struct LsTool {
    backend: Arc<dyn Backend>,
}

impl LsTool {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for LsTool {
    fn name(&self) -> String {
        "ls".to_string()
    }

    fn description(&self) -> String {
        "List files and directories under the given path.".to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list. Defaults to the root."
                }
            }
        })
    }

    async fn execute(
        &self,
        input: Value,
        _invocation: &ToolInvocation,
    ) -> Result<Value, ToolError> {
        let path = optional_str(&input, "path").unwrap_or("/");
        let infos = self.backend.ls_info(path).await?;
        Ok(serde_json::to_value(infos)?)
    }
}

/// Read a file with numbered lines.
pub struct ReadFileTool {
    backend: Arc<dyn Backend>,
}

impl ReadFileTool {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> String {
        "read_file".to_string()
    }

    fn description(&self) -> String {
        "Read a file. Returns numbered lines; supports offset and limit.".to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string", "description": "Absolute path to read" },
                "offset": { "type": "integer", "description": "Line offset (0-based)" },
                "limit": { "type": "integer", "description": "Maximum number of lines" }
            },
            "required": ["file_path"]
        })
    }

    async fn execute(
        &self,
        input: Value,
        _invocation: &ToolInvocation,
    ) -> Result<Value, ToolError> {
        let path = require_str(&input, "file_path")?;
        let offset = input.get("offset").and_then(Value::as_u64).unwrap_or(0) as u32;
        let limit = input.get("limit").and_then(Value::as_u64).map(|n| n as u32);
        let text = self.backend.read(path, offset, limit).await?;
        Ok(Value::String(text))
    }
}

/// Write (create or overwrite) a file.
pub struct WriteFileTool {
    backend: Arc<dyn Backend>,
}

impl WriteFileTool {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> String {
        "write_file".to_string()
    }

    fn description(&self) -> String {
        "Write content to a file, creating it if needed.".to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string", "description": "Absolute path to write" },
                "content": { "type": "string", "description": "Full file content" }
            },
            "required": ["file_path", "content"]
        })
    }

    async fn execute(
        &self,
        input: Value,
        _invocation: &ToolInvocation,
    ) -> Result<Value, ToolError> {
        let path = require_str(&input, "file_path")?;
        let content = require_str(&input, "content")?;
        let result = self.backend.write(path, content).await?;
        Ok(serde_json::to_value(result)?)
    }
}

/// Exact-string edit of a file.
pub struct EditFileTool {
    backend: Arc<dyn Backend>,
}

impl EditFileTool {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> String {
        "edit_file".to_string()
    }

    fn description(&self) -> String {
        "Replace an exact string in a file. Fails unless the string occurs \
         exactly once, or replace_all is set."
            .to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string", "description": "Absolute path to edit" },
                "old_string": { "type": "string", "description": "Exact text to find" },
                "new_string": { "type": "string", "description": "Replacement text" },
                "replace_all": { "type": "boolean", "description": "Replace every occurrence" }
            },
            "required": ["file_path", "old_string", "new_string"]
        })
    }

    async fn execute(
        &self,
        input: Value,
        _invocation: &ToolInvocation,
    ) -> Result<Value, ToolError> {
        let path = require_str(&input, "file_path")?;
        let old_string = require_str(&input, "old_string")?;
        let new_string = require_str(&input, "new_string")?;
        let replace_all = input
            .get("replace_all")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let outcome = self
            .backend
            .edit(path, old_string, new_string, replace_all)
            .await?;
        Ok(serde_json::to_value(outcome)?)
    }
}

/// Find files by glob pattern.
pub struct GlobTool {
    backend: Arc<dyn Backend>,
}

impl GlobTool {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> String {
        "glob".to_string()
    }

    fn description(&self) -> String {
        "Find files matching a glob pattern (*, **, ?).".to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Glob pattern" },
                "path": { "type": "string", "description": "Directory to search from" }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(
        &self,
        input: Value,
        _invocation: &ToolInvocation,
    ) -> Result<Value, ToolError> {
        let pattern = require_str(&input, "pattern")?;
        let cwd = optional_str(&input, "path");
        let infos = self.backend.glob_info(pattern, cwd).await?;
        Ok(serde_json::to_value(infos)?)
    }
}

/// Search file contents by regex.
pub struct GrepTool {
    backend: Arc<dyn Backend>,
}

impl GrepTool {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> String {
        "grep".to_string()
    }

    fn description(&self) -> String {
        "Search file contents with a regular expression.".to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Regular expression" },
                "path": { "type": "string", "description": "Restrict to this path" },
                "include": { "type": "string", "description": "Restrict files by glob" }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(
        &self,
        input: Value,
        _invocation: &ToolInvocation,
    ) -> Result<Value, ToolError> {
        let pattern = require_str(&input, "pattern")?;
        let path = optional_str(&input, "path");
        let include = optional_str(&input, "include");
        let matches = self.backend.grep_raw(pattern, path, include).await?;
        Ok(serde_json::to_value(matches)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StateBackend;
    use crate::state::FileSystem;

    fn backend() -> Arc<dyn Backend> {
        Arc::new(StateBackend::new(FileSystem::new()))
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let b = backend();
        let write = WriteFileTool::new(Arc::clone(&b));
        let read = ReadFileTool::new(Arc::clone(&b));

        let result = write
            .execute(
                json!({"file_path": "/a.txt", "content": "one\ntwo"}),
                &ToolInvocation::new("c1"),
            )
            .await
            .unwrap();
        assert_eq!(result["success"], true);

        let text = read
            .execute(json!({"file_path": "/a.txt"}), &ToolInvocation::new("c2"))
            .await
            .unwrap();
        assert_eq!(text, json!("1→one\n2→two"));
    }

    #[tokio::test]
    async fn test_read_missing_is_tool_error() {
        let read = ReadFileTool::new(backend());
        let err = read
            .execute(json!({"file_path": "/nope"}), &ToolInvocation::new("c1"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("File not found"));
    }

    #[tokio::test]
    async fn test_edit_ambiguous_fails() {
        let b = backend();
        b.write("/f", "x x").await.unwrap();
        let edit = EditFileTool::new(b);
        let err = edit
            .execute(
                json!({"file_path": "/f", "old_string": "x", "new_string": "y"}),
                &ToolInvocation::new("c1"),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("found 2"));
    }

    #[tokio::test]
    async fn test_glob_and_grep() {
        let b = backend();
        b.write("/src/lib.rs", "pub fn main() {}").await.unwrap();
        b.write("/readme.md", "# docs").await.unwrap();

        let glob = GlobTool::new(Arc::clone(&b));
        let found = glob
            .execute(json!({"pattern": "**/*.rs"}), &ToolInvocation::new("c1"))
            .await
            .unwrap();
        assert_eq!(found.as_array().unwrap().len(), 1);

        let grep = GrepTool::new(b);
        let matches = grep
            .execute(json!({"pattern": "fn main"}), &ToolInvocation::new("c2"))
            .await
            .unwrap();
        let matches = matches.as_array().unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0]["line"], 1);
    }
}
