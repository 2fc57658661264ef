//! Subagent coordinator: context fork/merge, single-shot execution with
//! lifecycle events, and parallel execution.
//!
//! A subagent runs one model call against an isolated copy of the parent's
//! state. Files may be shared by reference (writes observable in the parent
//! immediately) or deep-copied (observable only after merge). Todos are the
//! subagent's private task list and are never merged back.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Mutex;

use crate::backend::{Backend, StateBackend};
use crate::hooks::{HookContext, HookEngine, HookEvent, HookInput};
use crate::model::{FinishReason, LanguageModel, Message, ModelRequest};
use crate::state::{AgentState, FileSystem, Todo};
use crate::tool::builtin::{
    EditFileTool, GlobTool, GrepTool, LsTool, ReadFileTool, WriteFileTool, WriteTodosTool,
};
use crate::tool::Tool;

/// Declarative subagent definition, reachable via the `task` tool.
#[derive(Clone)]
pub struct SubagentDefinition {
    pub subagent_type: String,
    pub description: String,
    pub system_prompt: String,
    /// Subset of the parent's tool names; `None` inherits all.
    pub tools: Option<Vec<String>>,
    pub max_steps: Option<u32>,
    /// Per-tool interrupt overrides (tool name → require approval).
    pub interrupt_on: HashMap<String, bool>,
    /// Structured-output contract, when the subagent must return JSON.
    pub output_schema: Option<Value>,
    pub output_description: Option<String>,
    /// Model override; `None` uses the parent's model.
    pub model: Option<Arc<dyn LanguageModel>>,
}

impl SubagentDefinition {
    pub fn new(
        subagent_type: impl Into<String>,
        description: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            subagent_type: subagent_type.into(),
            description: description.into(),
            system_prompt: system_prompt.into(),
            tools: None,
            max_steps: None,
            interrupt_on: HashMap::new(),
            output_schema: None,
            output_description: None,
            model: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    pub fn with_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }
}

impl std::fmt::Debug for SubagentDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubagentDefinition")
            .field("subagent_type", &self.subagent_type)
            .field("tools", &self.tools)
            .field("max_steps", &self.max_steps)
            .finish()
    }
}

/// Forked state plus the flags that decide merge behavior.
#[derive(Clone, Debug)]
pub struct SubagentContext {
    pub state: AgentState,
    pub files_shared: bool,
    pub todos_isolated: bool,
}

impl SubagentContext {
    /// Fork from the parent. `share_files` aliases the parent's file map by
    /// reference; `isolate_todos` starts from `initial_todos` instead of
    /// the parent's list.
    pub fn fork(
        parent: &AgentState,
        share_files: bool,
        isolate_todos: bool,
        initial_todos: Vec<Todo>,
    ) -> Self {
        let files = if share_files {
            parent.files.clone()
        } else {
            parent.files.deep_clone()
        };
        let todos = if isolate_todos {
            initial_todos
        } else {
            parent.todos.clone()
        };
        Self {
            state: AgentState { todos, files },
            files_shared: share_files,
            todos_isolated: isolate_todos,
        }
    }

    /// Merge back into the parent. Shared files are a no-op (the parent
    /// already sees every write); copied files are unioned with
    /// subagent-added paths copied over. Todos are never merged.
    pub fn merge_into(&self, parent: &mut AgentState) {
        if !self.files_shared {
            parent.files.absorb_missing(&self.state.files);
        }
    }
}

/// Lifecycle events emitted during a subagent run.
#[derive(Clone, Debug)]
pub enum SubagentEvent {
    Start {
        subagent_type: String,
        prompt: String,
    },
    Step {
        step_number: u32,
        tool_calls: Vec<crate::model::ToolCall>,
    },
    Finish {
        success: bool,
        finish_reason: FinishReason,
    },
    Error {
        error: String,
    },
}

pub type SubagentObserver = Arc<dyn Fn(SubagentEvent) + Send + Sync>;

/// Result of one subagent run.
#[derive(Clone, Debug)]
pub struct SubagentOutcome {
    pub success: bool,
    pub text: Option<String>,
    pub steps: u32,
    pub finish_reason: FinishReason,
    pub duration: Duration,
    pub context: SubagentContext,
    pub error: Option<String>,
}

/// Aggregate of a parallel batch.
#[derive(Clone, Debug)]
pub struct ParallelOutcome {
    pub results: Vec<SubagentOutcome>,
    pub success_count: usize,
    pub failure_count: usize,
    pub all_succeeded: bool,
    pub total_duration: Duration,
}

/// One unit of work for the parallel executor.
#[derive(Clone)]
pub struct SubagentTask {
    pub definition: SubagentDefinition,
    pub prompt: String,
}

/// Builds the backend a forked context's filesystem tools run against.
pub type ForkBackendFn = Arc<dyn Fn(&FileSystem) -> Arc<dyn Backend> + Send + Sync>;

/// Everything a subagent run borrows from its parent agent.
#[derive(Clone)]
pub struct SubagentEnv {
    pub model: Arc<dyn LanguageModel>,
    pub engine: Arc<HookEngine>,
    /// The parent's tool catalog; filtered by the definition's subset.
    pub tools: Vec<Arc<dyn Tool>>,
    pub parent_state: Arc<Mutex<AgentState>>,
    pub session_id: String,
    pub cwd: String,
    /// Builds the backend the fork's filesystem tools run against.
    /// State-backed parents bind a [StateBackend] over the forked file map;
    /// host-backed parents reuse their disk backend.
    pub fork_backend: ForkBackendFn,
}

impl SubagentEnv {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        engine: Arc<HookEngine>,
        tools: Vec<Arc<dyn Tool>>,
        parent_state: Arc<Mutex<AgentState>>,
        session_id: impl Into<String>,
        cwd: impl Into<String>,
    ) -> Self {
        Self {
            model,
            engine,
            tools,
            parent_state,
            session_id: session_id.into(),
            cwd: cwd.into(),
            fork_backend: Arc::new(|files| Arc::new(StateBackend::new(files.clone()))),
        }
    }

    pub fn with_fork_backend(mut self, f: ForkBackendFn) -> Self {
        self.fork_backend = f;
        self
    }
}

/// Names of built-in tools that must be rebound to the fork's state so
/// subagent writes land in the subagent context, not the parent's.
const STATE_BOUND_TOOLS: &[&str] = &[
    "ls",
    "read_file",
    "write_file",
    "edit_file",
    "glob",
    "grep",
    "write_todos",
];

fn rebind_tool(
    name: &str,
    backend: &Arc<dyn Backend>,
    state: &Arc<Mutex<AgentState>>,
) -> Option<Arc<dyn Tool>> {
    match name {
        "ls" => Some(Arc::new(LsTool::new(Arc::clone(backend)))),
        "read_file" => Some(Arc::new(ReadFileTool::new(Arc::clone(backend)))),
        "write_file" => Some(Arc::new(WriteFileTool::new(Arc::clone(backend)))),
        "edit_file" => Some(Arc::new(EditFileTool::new(Arc::clone(backend)))),
        "glob" => Some(Arc::new(GlobTool::new(Arc::clone(backend)))),
        "grep" => Some(Arc::new(GrepTool::new(Arc::clone(backend)))),
        "write_todos" => Some(Arc::new(WriteTodosTool::new(Arc::clone(state)))),
        _ => None,
    }
}

/// Execute one subagent: fork context, filter tools, one model call,
/// lifecycle events. Sibling-safe: errors come back in the outcome.
pub async fn execute_subagent(
    definition: &SubagentDefinition,
    prompt: &str,
    env: &SubagentEnv,
    observer: Option<SubagentObserver>,
) -> SubagentOutcome {
    let started = Instant::now();
    let context = {
        let parent = env.parent_state.lock().await;
        SubagentContext::fork(&parent, true, true, Vec::new())
    };
    let files_shared = context.files_shared;
    let todos_isolated = context.todos_isolated;
    let sub_state = Arc::new(Mutex::new(context.state));
    let sub_backend = {
        let files = sub_state.lock().await.files.clone();
        (env.fork_backend)(&files)
    };

    let hook_input = HookInput::new(
        HookEvent::SubagentStart,
        env.session_id.clone(),
        env.cwd.clone(),
    )
    .with_tool(definition.subagent_type.clone(), Value::String(prompt.to_string()));
    env.engine
        .dispatch(&hook_input, &HookContext::new())
        .await;
    if let Some(observer) = &observer {
        observer(SubagentEvent::Start {
            subagent_type: definition.subagent_type.clone(),
            prompt: prompt.to_string(),
        });
    }

    // Filter to the definition's subset, rebinding state-backed builtins
    // to the fork. The task tool never crosses into a subagent.
    let allowed: Option<&[String]> = definition.tools.as_deref();
    let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
    for tool in &env.tools {
        let name = tool.name();
        if name == "task" {
            continue;
        }
        if let Some(allowed) = allowed {
            if !allowed.iter().any(|a| a == &name) {
                continue;
            }
        }
        if STATE_BOUND_TOOLS.contains(&name.as_str()) {
            if let Some(rebound) = rebind_tool(&name, &sub_backend, &sub_state) {
                tools.push(rebound);
                continue;
            }
        }
        tools.push(Arc::clone(tool));
    }

    let model = definition.model.as_ref().unwrap_or(&env.model);
    let request = ModelRequest {
        messages: vec![Message::user(prompt)],
        system: Some(definition.system_prompt.clone()),
        tools,
        max_steps: definition.max_steps,
        ..Default::default()
    };

    let result = model.generate(request).await;

    let final_state = sub_state.lock().await.clone();
    let context = SubagentContext {
        state: final_state,
        files_shared,
        todos_isolated,
    };
    let duration = started.elapsed();

    let outcome = match result {
        Ok(response) => {
            if let Some(observer) = &observer {
                for (index, step) in response.steps.iter().enumerate() {
                    observer(SubagentEvent::Step {
                        step_number: (index + 1) as u32,
                        tool_calls: step.tool_calls.clone(),
                    });
                }
                observer(SubagentEvent::Finish {
                    success: true,
                    finish_reason: response.finish_reason,
                });
            }
            SubagentOutcome {
                success: true,
                text: Some(response.text.clone()),
                steps: response.steps.len() as u32,
                finish_reason: response.finish_reason,
                duration,
                context,
                error: None,
            }
        }
        Err(error) => {
            if let Some(observer) = &observer {
                observer(SubagentEvent::Error {
                    error: error.to_string(),
                });
            }
            SubagentOutcome {
                success: false,
                text: None,
                steps: 0,
                finish_reason: FinishReason::Error,
                duration,
                context,
                error: Some(error.to_string()),
            }
        }
    };

    let stop_input = HookInput::new(
        HookEvent::SubagentStop,
        env.session_id.clone(),
        env.cwd.clone(),
    )
    .with_tool(
        definition.subagent_type.clone(),
        serde_json::json!({"success": outcome.success}),
    );
    env.engine.dispatch(&stop_input, &HookContext::new()).await;

    outcome
}

/// Run all tasks concurrently with shared files. Partial failures do not
/// cancel siblings.
pub async fn execute_subagents_parallel(
    tasks: Vec<SubagentTask>,
    env: &SubagentEnv,
    on_result: Option<Arc<dyn Fn(&SubagentOutcome) + Send + Sync>>,
) -> ParallelOutcome {
    let started = Instant::now();
    let futures = tasks.iter().map(|task| {
        let env = env.clone();
        let on_result = on_result.clone();
        async move {
            let outcome = execute_subagent(&task.definition, &task.prompt, &env, None).await;
            if let Some(on_result) = &on_result {
                on_result(&outcome);
            }
            outcome
        }
    });
    let results = futures::future::join_all(futures).await;
    let success_count = results.iter().filter(|r| r.success).count();
    let failure_count = results.len() - success_count;
    ParallelOutcome {
        all_succeeded: failure_count == 0,
        success_count,
        failure_count,
        total_duration: started.elapsed(),
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelError, ModelResponse};
    use crate::tool::ToolInvocation;
    use async_trait::async_trait;

    /// Fake model that writes a file through its write_file tool.
    struct WritingModel {
        path: String,
    }

    #[async_trait]
    impl LanguageModel for WritingModel {
        async fn generate(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
            let write = request
                .tools
                .iter()
                .find(|t| t.name() == "write_file")
                .ok_or_else(|| ModelError::Other("no write_file tool".to_string()))?;
            write
                .execute(
                    serde_json::json!({"file_path": self.path, "content": "from subagent"}),
                    &ToolInvocation::new("c1"),
                )
                .await
                .map_err(|e| ModelError::Other(e.to_string()))?;
            Ok(ModelResponse::from_text("wrote it"))
        }
    }

    struct FailingModel;

    #[async_trait]
    impl LanguageModel for FailingModel {
        async fn generate(&self, _request: ModelRequest) -> Result<ModelResponse, ModelError> {
            Err(ModelError::Provider("boom".to_string()))
        }
    }

    fn env_with_model(model: Arc<dyn LanguageModel>) -> (SubagentEnv, Arc<Mutex<AgentState>>) {
        let parent_state = Arc::new(Mutex::new(AgentState::new()));
        let backend: Arc<dyn Backend> = Arc::new(StateBackend::new(FileSystem::new()));
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(WriteFileTool::new(backend))];
        let env = SubagentEnv::new(
            model,
            Arc::new(HookEngine::new()),
            tools,
            Arc::clone(&parent_state),
            "s1",
            "/",
        );
        (env, parent_state)
    }

    #[test]
    fn test_fork_shares_or_copies_files() {
        let mut parent = AgentState::new();
        parent.files.put("/base.txt", "base");
        parent.todos.push(Todo::new("parent todo"));

        let shared = SubagentContext::fork(&parent, true, true, Vec::new());
        shared.state.files.put("/from-child.txt", "x");
        assert!(parent.files.contains("/from-child.txt"));
        assert!(shared.state.todos.is_empty());

        let isolated = SubagentContext::fork(&parent, false, false, Vec::new());
        isolated.state.files.put("/isolated.txt", "y");
        assert!(!parent.files.contains("/isolated.txt"));
        assert_eq!(isolated.state.todos.len(), 1);
    }

    #[test]
    fn test_merge_unions_files_never_todos() {
        let mut parent = AgentState::new();
        parent.files.put("/base.txt", "base");
        let ctx = SubagentContext::fork(&parent, false, true, Vec::new());
        ctx.state.files.put("/added.txt", "new");
        ctx.merge_into(&mut parent);
        assert!(parent.files.contains("/added.txt"));
        assert!(parent.todos.is_empty());

        // Shared files: merge is a no-op, parent already sees writes.
        let shared = SubagentContext::fork(&parent, true, true, vec![Todo::new("child")]);
        shared.merge_into(&mut parent);
        assert!(parent.todos.is_empty());
    }

    #[tokio::test]
    async fn test_execute_subagent_shared_write_reaches_parent() {
        let (env, parent_state) = env_with_model(Arc::new(WritingModel {
            path: "/result.txt".to_string(),
        }));
        let definition = SubagentDefinition::new("writer", "writes files", "You write files.");
        let outcome = execute_subagent(&definition, "write it", &env, None).await;
        assert!(outcome.success, "error: {:?}", outcome.error);
        assert_eq!(outcome.text.as_deref(), Some("wrote it"));
        let parent = parent_state.lock().await;
        assert_eq!(
            parent.files.get("/result.txt").unwrap().content(),
            "from subagent"
        );
    }

    #[tokio::test]
    async fn test_tool_filter_excludes_unlisted() {
        let (env, _) = env_with_model(Arc::new(WritingModel {
            path: "/x".to_string(),
        }));
        let definition = SubagentDefinition::new("narrow", "no tools", "prompt")
            .with_tools(vec!["read_file".to_string()]);
        let outcome = execute_subagent(&definition, "try", &env, None).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("no write_file tool"));
    }

    #[tokio::test]
    async fn test_parallel_aggregates_and_isolates_failures() {
        let (env, parent_state) = env_with_model(Arc::new(WritingModel {
            path: "/file-1.txt".to_string(),
        }));
        let ok_task = SubagentTask {
            definition: SubagentDefinition::new("a", "d", "p"),
            prompt: "go".to_string(),
        };
        let failing = SubagentTask {
            definition: SubagentDefinition::new("b", "d", "p")
                .with_model(Arc::new(FailingModel)),
            prompt: "go".to_string(),
        };
        let outcome =
            execute_subagents_parallel(vec![ok_task, failing], &env, None).await;
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.success_count, 1);
        assert_eq!(outcome.failure_count, 1);
        assert!(!outcome.all_succeeded);
        assert!(parent_state.lock().await.files.contains("/file-1.txt"));
    }

    #[tokio::test]
    async fn test_lifecycle_events_emitted() {
        let (env, _) = env_with_model(Arc::new(WritingModel {
            path: "/f".to_string(),
        }));
        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let observer: SubagentObserver = Arc::new(move |event| {
            sink.lock().unwrap().push(format!("{event:?}"));
        });
        let definition = SubagentDefinition::new("writer", "d", "p");
        execute_subagent(&definition, "go", &env, Some(observer)).await;
        let events = events.lock().unwrap();
        assert!(events.first().unwrap().contains("Start"));
        assert!(events.last().unwrap().contains("Finish"));
    }
}
