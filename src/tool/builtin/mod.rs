//! Built-in tools: filesystem, planning, shell, and subagent delegation.

mod fs;
mod shell;
mod task;
mod todos;

pub use fs::{EditFileTool, GlobTool, GrepTool, LsTool, ReadFileTool, WriteFileTool};
pub use shell::{BashTool, CommandGuard};
pub use task::TaskTool;
pub use todos::WriteTodosTool;
