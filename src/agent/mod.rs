//! Agent core: assembles state, backend, tools, hooks, and subagents, and
//! drives the hook pipeline around every model call.
//!
//! `generate` runs PreGenerate (with cache short-circuit and input
//! replacement), the model call under the hook retry loop, PostGenerate
//! (with result replacement), and finally resolves the turn into complete /
//! interrupted / handoff. `stream` has identical hook semantics, with the
//! cached `respond_with` replayed as synthetic stream parts.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use futures::{FutureExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{oneshot, Mutex};

use crate::backend::{Backend, StateBackend};
use crate::checkpoint::Checkpointer;
use crate::hooks::{
    first_respond_with, first_updated_input, first_updated_result, run_with_retry, HookContext,
    HookEngine, HookEvent, HookInput, HookMatcher,
};
use crate::model::{
    synthesize_stream, LanguageModel, Message, ModelRequest, ModelResponse, ModelStream,
    ResponseAccumulator, StreamPart,
};
use crate::plugin::PluginToolOptions;
use crate::registry::{Skill, SkillTool, ToolRegistry};
use crate::registry::{CallToolTool, SearchToolsTool, UseToolsTool};
use crate::session::BackgroundTaskManager;
use crate::state::{AgentState, FileSystem};
use crate::subagent::{SubagentDefinition, SubagentEnv};
use crate::tool::builtin::{
    BashTool, CommandGuard, EditFileTool, GlobTool, GrepTool, LsTool, ReadFileTool, TaskTool,
    WriteFileTool, WriteTodosTool,
};
use crate::tool::{HookedTool, Tool};

mod config;
mod error;
mod outcome;
pub mod turn;

pub use config::{
    AgentConfig, DelegatePluginTools, GenerateOptions, PermissionMode, ResumeDecision,
};
pub use error::AgentError;
pub use outcome::{AgentStream, GenerateOutcome};

use turn::{ApprovalDecision, TurnState};

/// The unit owning state, backend, tools, and hooks.
pub struct Agent {
    name: String,
    model: Arc<dyn LanguageModel>,
    system_prompt: Option<String>,
    engine: Arc<HookEngine>,
    registry: Arc<ToolRegistry>,
    state: Arc<Mutex<AgentState>>,
    backend: Arc<dyn Backend>,
    tasks: Arc<BackgroundTaskManager>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    config: AgentConfig,
    /// Human decisions queued for the next generate (keyed by
    /// tool_call_id).
    resume_decisions: StdMutex<HashMap<String, ApprovalDecision>>,
}

impl Agent {
    pub fn builder(name: impl Into<String>, model: Arc<dyn LanguageModel>) -> AgentBuilder {
        AgentBuilder::new(name, model)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn engine(&self) -> &Arc<HookEngine> {
        &self.engine
    }

    pub fn model(&self) -> &Arc<dyn LanguageModel> {
        &self.model
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn state(&self) -> &Arc<Mutex<AgentState>> {
        &self.state
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn tasks(&self) -> &Arc<BackgroundTaskManager> {
        &self.tasks
    }

    pub fn checkpointer(&self) -> Option<&Arc<dyn Checkpointer>> {
        self.checkpointer.as_ref()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Queue a human decision for a suspended tool call; consumed by the
    /// next generate on the same `tool_call_id`.
    pub fn queue_resume(&self, tool_call_id: impl Into<String>, decision: ApprovalDecision) {
        self.resume_decisions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(tool_call_id.into(), decision);
    }

    fn drain_resume_decisions(
        &self,
        options: &GenerateOptions,
    ) -> HashMap<String, ApprovalDecision> {
        let mut decisions: HashMap<String, ApprovalDecision> = self
            .resume_decisions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        if let Some(resume) = &options.resume {
            decisions.insert(resume.tool_call_id.clone(), resume.decision);
        }
        decisions
    }

    fn hook_ctx(&self) -> HookContext {
        HookContext::new().with_state(Arc::clone(&self.state))
    }

    fn wrap_tools(&self, turn: &Arc<TurnState>) -> Vec<Arc<dyn Tool>> {
        self.registry
            .get_loaded_tools()
            .into_iter()
            .map(|tool| {
                Arc::new(HookedTool::new(
                    tool,
                    Arc::clone(&self.engine),
                    Arc::clone(turn),
                    Arc::clone(&self.state),
                    self.config.session_id.clone(),
                    self.config.cwd.clone(),
                    self.config.permission_mode,
                    self.config.max_retries,
                )) as Arc<dyn Tool>
            })
            .collect()
    }

    fn build_request(&self, messages: Vec<Message>, tools: Vec<Arc<dyn Tool>>) -> ModelRequest {
        ModelRequest {
            messages,
            system: self.system_prompt.clone(),
            tools,
            max_steps: self.config.max_steps,
            temperature: self.config.temperature,
            max_output_tokens: self.config.max_output_tokens,
        }
    }

    /// Interpret a cached `respond_with` payload as a response: a bare
    /// string becomes a text-only result.
    fn parse_cached(value: &Value) -> ModelResponse {
        match value {
            Value::String(text) => ModelResponse::from_text(text.clone()),
            other => serde_json::from_value(other.clone())
                .unwrap_or_else(|_| ModelResponse::from_text(other.to_string())),
        }
    }

    fn apply_updated_input(messages: Vec<Message>, updated: Option<&Value>) -> Vec<Message> {
        let Some(updated) = updated else {
            return messages;
        };
        let candidate = updated
            .get("messages")
            .cloned()
            .unwrap_or_else(|| updated.clone());
        match serde_json::from_value::<Vec<Message>>(candidate) {
            Ok(replaced) => replaced,
            Err(error) => {
                log::warn!("ignoring malformed updated_input for PreGenerate: {error}");
                messages
            }
        }
    }

    fn resolve_outcome(&self, turn: &TurnState, response: ModelResponse) -> GenerateOutcome {
        if let Some(interrupt) = turn.take_interrupt() {
            return GenerateOutcome::Interrupted {
                interrupt,
                partial: response,
            };
        }
        if let Some(handoff) = turn.take_handoff() {
            return GenerateOutcome::Handoff {
                target: handoff.target,
                context: handoff.context,
                resumable: handoff.resumable,
                is_handback: handoff.is_handback,
                partial: response,
            };
        }
        GenerateOutcome::Complete(response)
    }

    async fn run_post_generate(&self, ctx: &HookContext, response: ModelResponse) -> ModelResponse {
        let input = HookInput::new(
            HookEvent::PostGenerate,
            self.config.session_id.clone(),
            self.config.cwd.clone(),
        )
        .with_result(serde_json::to_value(&response).unwrap_or(Value::Null));
        let outputs = self.engine.dispatch(&input, ctx).await;
        match first_updated_result(&outputs) {
            Some(updated) => serde_json::from_value(updated.clone()).unwrap_or_else(|error| {
                log::warn!("ignoring malformed updated_result for PostGenerate: {error}");
                response
            }),
            None => response,
        }
    }

    /// One generation: PreGenerate → model (with retries) → PostGenerate →
    /// complete / interrupted / handoff.
    pub async fn generate(&self, options: GenerateOptions) -> Result<GenerateOutcome, AgentError> {
        let ctx = self.hook_ctx();
        let thread_id = options
            .thread_id
            .clone()
            .unwrap_or_else(|| self.config.session_id.clone());
        let turn = Arc::new(TurnState::new(
            thread_id,
            options.step,
            self.drain_resume_decisions(&options),
        ));

        let pre = HookInput::new(
            HookEvent::PreGenerate,
            self.config.session_id.clone(),
            self.config.cwd.clone(),
        )
        .with_prompt(serde_json::to_value(&options.messages).unwrap_or(Value::Null));
        let pre_outputs = self.engine.dispatch(&pre, &ctx).await;

        if let Some(cached) = first_respond_with(&pre_outputs) {
            return Ok(GenerateOutcome::Complete(Self::parse_cached(cached)));
        }
        let messages =
            Self::apply_updated_input(options.messages, first_updated_input(&pre_outputs));

        let request = self.build_request(messages, self.wrap_tools(&turn));
        let failure_template = HookInput::new(
            HookEvent::PostGenerateFailure,
            self.config.session_id.clone(),
            self.config.cwd.clone(),
        );
        let model = Arc::clone(&self.model);
        let response = run_with_retry(
            &self.engine,
            HookEvent::PostGenerateFailure,
            &failure_template,
            &ctx,
            self.config.max_retries,
            move |_attempt| {
                let model = Arc::clone(&model);
                let request = request.clone();
                async move { model.generate(request).await }.boxed()
            },
        )
        .await?;

        let response = self.run_post_generate(&ctx, response).await;
        Ok(self.resolve_outcome(&turn, response))
    }

    /// Streaming generation with identical hook semantics. `PostGenerate`
    /// fires once the stream's `finish` part is observed; `updated_result`
    /// applies only to the resolved final outcome, never to in-flight
    /// parts. `PostGenerateFailure` covers stream setup only.
    pub async fn stream(self: &Arc<Self>, options: GenerateOptions) -> Result<AgentStream, AgentError> {
        let ctx = self.hook_ctx();
        let thread_id = options
            .thread_id
            .clone()
            .unwrap_or_else(|| self.config.session_id.clone());
        let turn = Arc::new(TurnState::new(
            thread_id,
            options.step,
            self.drain_resume_decisions(&options),
        ));

        let pre = HookInput::new(
            HookEvent::PreGenerate,
            self.config.session_id.clone(),
            self.config.cwd.clone(),
        )
        .with_prompt(serde_json::to_value(&options.messages).unwrap_or(Value::Null));
        let pre_outputs = self.engine.dispatch(&pre, &ctx).await;

        let model_stream: ModelStream =
            if let Some(cached) = first_respond_with(&pre_outputs) {
                // Replayed so downstream consumers are indistinguishable
                // from a live stream.
                synthesize_stream(Self::parse_cached(cached))
            } else {
                let messages =
                    Self::apply_updated_input(options.messages, first_updated_input(&pre_outputs));
                let request = self.build_request(messages, self.wrap_tools(&turn));
                let failure_template = HookInput::new(
                    HookEvent::PostGenerateFailure,
                    self.config.session_id.clone(),
                    self.config.cwd.clone(),
                );
                let model = Arc::clone(&self.model);
                run_with_retry(
                    &self.engine,
                    HookEvent::PostGenerateFailure,
                    &failure_template,
                    &ctx,
                    self.config.max_retries,
                    move |_attempt| {
                        let model = Arc::clone(&model);
                        let request = request.clone();
                        async move { model.stream(request).await }.boxed()
                    },
                )
                .await?
            };

        let (tx, rx) = oneshot::channel();
        let agent = Arc::clone(self);
        let stream_ctx = ctx.clone();
        let parts = async_stream::stream! {
            let mut accumulator = Some(ResponseAccumulator::new());
            let mut tx = Some(tx);
            let mut inner = model_stream.parts;
            while let Some(part) = inner.next().await {
                if let Some(acc) = accumulator.as_mut() {
                    acc.push(&part);
                }
                let finished = matches!(part, StreamPart::Finish { .. });
                yield part;
                if finished {
                    if let (Some(acc), Some(tx)) = (accumulator.take(), tx.take()) {
                        let response = agent.run_post_generate(&stream_ctx, acc.finish()).await;
                        let _ = tx.send(agent.resolve_outcome(&turn, response));
                    }
                }
            }
        };

        Ok(AgentStream {
            parts: Box::pin(parts),
            outcome: rx,
        })
    }

    /// Streaming variant returning only the parts; the final outcome is
    /// discarded.
    pub async fn stream_response(
        self: &Arc<Self>,
        options: GenerateOptions,
    ) -> Result<crate::model::PartStream, AgentError> {
        let stream = self.stream(options).await?;
        Ok(stream.parts)
    }

    /// Build the environment a subagent run borrows from this agent.
    pub fn subagent_env(&self) -> SubagentEnv {
        let tools: Vec<Arc<dyn Tool>> = self
            .registry
            .list_all()
            .iter()
            .filter_map(|m| self.registry.get(&m.name))
            .collect();
        SubagentEnv::new(
            Arc::clone(&self.model),
            Arc::clone(&self.engine),
            tools,
            Arc::clone(&self.state),
            self.config.session_id.clone(),
            self.config.cwd.clone(),
        )
    }
}

/// Builder assembling an [Agent]. `build` is async because registration
/// dispatches `ToolRegistered` hooks.
pub struct AgentBuilder {
    name: String,
    model: Arc<dyn LanguageModel>,
    system_prompt: Option<String>,
    config: AgentConfig,
    backend: Option<Arc<dyn Backend>>,
    engine: Option<Arc<HookEngine>>,
    tools: Vec<Arc<dyn Tool>>,
    skills: Vec<Skill>,
    subagents: Vec<SubagentDefinition>,
    plugins: Vec<(String, Vec<Arc<dyn Tool>>, PluginToolOptions)>,
    delegate_plugin_tools: DelegatePluginTools,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    tasks: Option<Arc<BackgroundTaskManager>>,
    hook_registrations: Vec<(HookEvent, HookMatcher)>,
    planning: bool,
    filesystem: bool,
}

impl AgentBuilder {
    pub fn new(name: impl Into<String>, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            name: name.into(),
            model,
            system_prompt: None,
            config: AgentConfig::default(),
            backend: None,
            engine: None,
            tools: Vec::new(),
            skills: Vec::new(),
            subagents: Vec::new(),
            plugins: Vec::new(),
            delegate_plugin_tools: DelegatePluginTools::default(),
            checkpointer: None,
            tasks: None,
            hook_registrations: Vec::new(),
            planning: true,
            filesystem: true,
        }
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.config.session_id = session_id.into();
        self
    }

    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.config.cwd = cwd.into();
        self
    }

    pub fn permission_mode(mut self, mode: PermissionMode) -> Self {
        self.config.permission_mode = mode;
        self
    }

    pub fn max_steps(mut self, max_steps: u32) -> Self {
        self.config.max_steps = Some(max_steps);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = Some(temperature);
        self
    }

    pub fn max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.config.max_output_tokens = Some(max_output_tokens);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn tool_search_threshold(mut self, threshold: usize) -> Self {
        self.config.tool_search_threshold = threshold;
        self
    }

    pub fn block_shell_file_ops(mut self, block: bool) -> Self {
        self.config.block_shell_file_ops = block;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn engine(mut self, engine: Arc<HookEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn skill(mut self, skill: Skill) -> Self {
        self.skills.push(skill);
        self
    }

    pub fn subagent(mut self, definition: SubagentDefinition) -> Self {
        self.subagents.push(definition);
        self
    }

    pub fn plugin(
        mut self,
        prefix: impl Into<String>,
        tools: Vec<Arc<dyn Tool>>,
        options: PluginToolOptions,
    ) -> Self {
        self.plugins.push((prefix.into(), tools, options));
        self
    }

    pub fn delegate_plugin_tools(mut self, delegate: DelegatePluginTools) -> Self {
        self.delegate_plugin_tools = delegate;
        self
    }

    pub fn checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn task_manager(mut self, tasks: Arc<BackgroundTaskManager>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn hook(mut self, event: HookEvent, matcher: HookMatcher) -> Self {
        self.hook_registrations.push((event, matcher));
        self
    }

    pub fn without_planning(mut self) -> Self {
        self.planning = false;
        self
    }

    pub fn without_filesystem(mut self) -> Self {
        self.filesystem = false;
        self
    }

    pub async fn build(self) -> Result<Arc<Agent>, AgentError> {
        let state = AgentState::new();
        let files: FileSystem = state.files.clone();
        let state = Arc::new(Mutex::new(state));

        let state_backed = self.backend.is_none();
        let backend: Arc<dyn Backend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(StateBackend::new(files)),
        };

        let engine = self.engine.unwrap_or_else(|| Arc::new(HookEngine::new()));
        for (event, matcher) in self.hook_registrations {
            engine.add_matcher(event, matcher).await;
        }

        let registry = Arc::new(ToolRegistry::new());
        let tasks = self.tasks.unwrap_or_else(|| Arc::new(BackgroundTaskManager::new()));
        let mut eager: Vec<Arc<dyn Tool>> = Vec::new();

        if self.planning {
            eager.push(Arc::new(WriteTodosTool::new(Arc::clone(&state))));
        }
        if self.filesystem {
            eager.push(Arc::new(LsTool::new(Arc::clone(&backend))));
            eager.push(Arc::new(ReadFileTool::new(Arc::clone(&backend))));
            eager.push(Arc::new(WriteFileTool::new(Arc::clone(&backend))));
            eager.push(Arc::new(EditFileTool::new(Arc::clone(&backend))));
            eager.push(Arc::new(GlobTool::new(Arc::clone(&backend))));
            eager.push(Arc::new(GrepTool::new(Arc::clone(&backend))));
        }
        if backend.supports_execute() {
            let bash: Arc<dyn Tool> = Arc::new(BashTool::new(Arc::clone(&backend)));
            let bash = if self.config.block_shell_file_ops
                && self.config.permission_mode == PermissionMode::AcceptEdits
            {
                Arc::new(CommandGuard::new(
                    bash,
                    crate::backend::SHELL_FILE_OP_PATTERNS,
                )) as Arc<dyn Tool>
            } else {
                bash
            };
            eager.push(bash);
        }
        eager.extend(self.tools);

        for tool in eager {
            let tool_name = tool.name();
            registry
                .register(tool)
                .map_err(AgentError::Registry)?;
            registry.load([tool_name.as_str()]);
        }

        for skill in self.skills.iter().cloned() {
            registry.register_skill(skill);
        }

        // Plugins: eager, deferred, or delegated to a synthesized subagent.
        let mut subagents = self.subagents;
        let mut any_deferred = false;
        for (prefix, tools, options) in self.plugins {
            let delegated = self
                .delegate_plugin_tools
                .applies_to(&prefix)
                .unwrap_or(options.delegate_to_subagent);
            let names = registry
                .register_plugin(&prefix, tools, options.category.as_deref())
                .map_err(AgentError::Registry)?;
            if delegated {
                let prompt = options.subagent_prompt.clone().unwrap_or_else(|| {
                    format!(
                        "You operate the '{prefix}' plugin. Use its tools to \
                         complete the task, then report the result."
                    )
                });
                subagents.push(
                    SubagentDefinition::new(
                        prefix.clone(),
                        format!("Handles tasks using the '{prefix}' plugin tools"),
                        prompt,
                    )
                    .with_tools(names),
                );
            } else if options.deferred {
                any_deferred = true;
            } else {
                registry.load(names.iter().map(String::as_str).collect::<Vec<_>>());
            }
        }

        let session_id = self.config.session_id.clone();
        let cwd = self.config.cwd.clone();

        // The task tool closes over everything a subagent run needs.
        if !subagents.is_empty() {
            let env_tools: Vec<Arc<dyn Tool>> = registry
                .list_all()
                .iter()
                .filter_map(|m| registry.get(&m.name))
                .collect();
            let mut env = SubagentEnv::new(
                Arc::clone(&self.model),
                Arc::clone(&engine),
                env_tools,
                Arc::clone(&state),
                session_id.clone(),
                cwd.clone(),
            );
            if !state_backed {
                let shared = Arc::clone(&backend);
                env = env.with_fork_backend(Arc::new(move |_| Arc::clone(&shared)));
            }
            let task_tool: Arc<dyn Tool> = Arc::new(
                TaskTool::new(subagents, env).with_task_manager(Arc::clone(&tasks)),
            );
            registry.register(task_tool).map_err(AgentError::Registry)?;
            registry.load(["task"]);
        }

        // Meta-tools: the proxy pair when anything is deferred or the
        // eager set crosses the search threshold; use_tools/skill when
        // there is something to load.
        let over_threshold = registry.loaded_count() >= self.config.tool_search_threshold;
        if any_deferred || over_threshold {
            let search: Arc<dyn Tool> = Arc::new(SearchToolsTool::new(Arc::clone(&registry)));
            let call: Arc<dyn Tool> = Arc::new(CallToolTool::new(Arc::clone(&registry)));
            registry.register(search).map_err(AgentError::Registry)?;
            registry.load(["search_tools"]);
            registry.register(call).map_err(AgentError::Registry)?;
            registry.load(["call_tool"]);
        }
        let has_unloaded = registry.list_all().len() > registry.loaded_count();
        if has_unloaded {
            let use_tools: Arc<dyn Tool> = Arc::new(
                UseToolsTool::new(Arc::clone(&registry)).with_hooks(
                    Arc::clone(&engine),
                    session_id.clone(),
                    cwd.clone(),
                ),
            );
            registry.register(use_tools).map_err(AgentError::Registry)?;
            registry.load(["use_tools"]);
        }
        if !registry.skill_names().is_empty() {
            let skill_tool: Arc<dyn Tool> = Arc::new(SkillTool::new(Arc::clone(&registry)));
            registry.register(skill_tool).map_err(AgentError::Registry)?;
            registry.load(["skill"]);
        }

        // Announce the assembled tool set.
        let ctx = HookContext::new().with_state(Arc::clone(&state));
        for metadata in registry.list_all() {
            if !registry.is_loaded(&metadata.name) {
                continue;
            }
            let input = HookInput::new(HookEvent::ToolRegistered, session_id.clone(), cwd.clone())
                .with_tool(metadata.name.clone(), json!({"plugin": metadata.plugin}));
            engine.dispatch(&input, &ctx).await;
        }

        Ok(Arc::new(Agent {
            name: self.name,
            model: self.model,
            system_prompt: self.system_prompt,
            engine,
            registry,
            state,
            backend,
            tasks,
            checkpointer: self.checkpointer,
            config: self.config,
            resume_decisions: StdMutex::new(HashMap::new()),
        }))
    }
}
