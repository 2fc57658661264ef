//! Meta-tools over the registry: search_tools, call_tool, use_tools, skill.
//!
//! These are how deferred plugin tools stay reachable without being
//! exposed to the model directly, and how the model grows its own tool set
//! mid-turn.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::hooks::{HookContext, HookEngine, HookEvent, HookInput};
use crate::tool::{optional_str, require_str, Tool, ToolError, ToolInvocation};

use super::{SearchQuery, ToolRegistry};

/// Search the registry by free text; returns candidate names and
/// descriptions, including not-yet-loaded (deferred) tools.
pub struct SearchToolsTool {
    registry: Arc<ToolRegistry>,
}

impl SearchToolsTool {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Tool for SearchToolsTool {
    fn name(&self) -> String {
        "search_tools".to_string()
    }

    fn description(&self) -> String {
        "Search the tool catalog by keyword. Returns matching tool names \
         and descriptions; call them with call_tool or load them with \
         use_tools."
            .to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Keyword to search for" },
                "limit": { "type": "integer", "description": "Maximum results" }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        input: Value,
        _invocation: &ToolInvocation,
    ) -> Result<Value, ToolError> {
        let query = require_str(&input, "query")?;
        let limit = input
            .get("limit")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(10);
        let results = self
            .registry
            .search(&SearchQuery::text(query).with_limit(limit));
        let candidates: Vec<Value> = results
            .iter()
            .map(|m| {
                json!({
                    "name": m.name,
                    "description": m.description,
                    "plugin": m.plugin,
                })
            })
            .collect();
        Ok(json!({ "tools": candidates }))
    }
}

/// Invoke a registry tool by name, loaded or not. This is the proxy path
/// for deferred plugins.
pub struct CallToolTool {
    registry: Arc<ToolRegistry>,
}

impl CallToolTool {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Tool for CallToolTool {
    fn name(&self) -> String {
        "call_tool".to_string()
    }

    fn description(&self) -> String {
        "Call a tool from the catalog by name with the given arguments. \
         Use search_tools first to find candidates."
            .to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Tool name to invoke" },
                "arguments": { "type": "object", "description": "Tool arguments" }
            },
            "required": ["name"]
        })
    }

    async fn execute(
        &self,
        input: Value,
        invocation: &ToolInvocation,
    ) -> Result<Value, ToolError> {
        let name = require_str(&input, "name")?;
        let arguments = input.get("arguments").cloned().unwrap_or(json!({}));
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        tool.execute(arguments, invocation).await
    }
}

/// Load additional tools into the exposed set by names, plugin, or query.
pub struct UseToolsTool {
    registry: Arc<ToolRegistry>,
    engine: Option<Arc<HookEngine>>,
    session_id: String,
    cwd: String,
}

impl UseToolsTool {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            engine: None,
            session_id: String::new(),
            cwd: String::new(),
        }
    }

    /// Wire hook emission for load failures (`ToolLoadError`) and new
    /// loads (`ToolRegistered`).
    pub fn with_hooks(
        mut self,
        engine: Arc<HookEngine>,
        session_id: impl Into<String>,
        cwd: impl Into<String>,
    ) -> Self {
        self.engine = Some(engine);
        self.session_id = session_id.into();
        self.cwd = cwd.into();
        self
    }

    async fn emit(&self, event: HookEvent, tool_name: &str, detail: Value) {
        if let Some(engine) = &self.engine {
            let input = HookInput::new(event, self.session_id.clone(), self.cwd.clone())
                .with_tool(tool_name, detail);
            engine.dispatch(&input, &HookContext::new()).await;
        }
    }
}

#[async_trait]
impl Tool for UseToolsTool {
    fn name(&self) -> String {
        "use_tools".to_string()
    }

    fn description(&self) -> String {
        "Load additional tools so they become directly callable. Specify \
         tool names, a plugin name, or a search query."
            .to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "tools": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Exact tool names to load"
                },
                "plugin": { "type": "string", "description": "Load every tool of this plugin" },
                "query": { "type": "string", "description": "Load tools matching this search" }
            }
        })
    }

    async fn execute(
        &self,
        input: Value,
        _invocation: &ToolInvocation,
    ) -> Result<Value, ToolError> {
        let report = if let Some(names) = input.get("tools").and_then(Value::as_array) {
            let names: Vec<String> = names
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect();
            self.registry.load(names)
        } else if let Some(plugin) = optional_str(&input, "plugin") {
            self.registry
                .load_matching(|m| m.plugin.as_deref() == Some(plugin))
        } else if let Some(query) = optional_str(&input, "query") {
            let matches = self.registry.search(&SearchQuery::text(query));
            self.registry
                .load(matches.iter().map(|m| m.name.as_str()).collect::<Vec<_>>())
        } else {
            return Err(ToolError::InvalidInput(
                "provide one of 'tools', 'plugin', or 'query'".to_string(),
            ));
        };

        for name in &report.loaded {
            self.emit(HookEvent::ToolRegistered, name, json!({"loaded": true}))
                .await;
        }
        for name in &report.not_found {
            self.emit(
                HookEvent::ToolLoadError,
                name,
                json!({"error": "not found in registry"}),
            )
            .await;
        }

        Ok(json!({
            "loaded": report.loaded,
            "already_loaded": report.skipped,
            "not_found": report.not_found,
        }))
    }
}

/// Load a skill by name and return its aggregated instructions.
pub struct SkillTool {
    registry: Arc<ToolRegistry>,
}

impl SkillTool {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Tool for SkillTool {
    fn name(&self) -> String {
        "skill".to_string()
    }

    fn description(&self) -> String {
        format!(
            "Load a skill: its tools become available and its instructions \
             are returned. Available skills: {}",
            self.registry.skill_names().join(", ")
        )
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Skill name to load" },
                "argument": { "description": "Optional argument for the skill's instructions" }
            },
            "required": ["name"]
        })
    }

    async fn execute(
        &self,
        input: Value,
        _invocation: &ToolInvocation,
    ) -> Result<Value, ToolError> {
        let name = require_str(&input, "name")?;
        let argument = input.get("argument");
        let loaded = self
            .registry
            .load_skill(name, argument)
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        Ok(json!({
            "name": loaded.name,
            "instructions": loaded.instructions,
            "tools": loaded.tools.iter().map(|t| t.name()).collect::<Vec<_>>(),
            "dependencies_loaded": loaded.dependencies_loaded,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Skill, SkillInstructions};

    struct Named(&'static str, &'static str);

    #[async_trait]
    impl Tool for Named {
        fn name(&self) -> String {
            self.0.to_string()
        }
        fn description(&self) -> String {
            self.1.to_string()
        }
        async fn execute(
            &self,
            input: Value,
            _invocation: &ToolInvocation,
        ) -> Result<Value, ToolError> {
            Ok(json!({"tool": self.0, "args": input}))
        }
    }

    fn registry_with_plugin() -> Arc<ToolRegistry> {
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register_plugin(
                "notes",
                vec![
                    Arc::new(Named("create_note", "Create a note")) as Arc<dyn Tool>,
                    Arc::new(Named("find_note", "Find notes by keyword")),
                ],
                None,
            )
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_search_then_call_proxy_path() {
        let registry = registry_with_plugin();
        let search = SearchToolsTool::new(Arc::clone(&registry));
        let found = search
            .execute(json!({"query": "note"}), &ToolInvocation::new("c1"))
            .await
            .unwrap();
        assert_eq!(found["tools"].as_array().unwrap().len(), 2);

        let call = CallToolTool::new(registry);
        let result = call
            .execute(
                json!({"name": "mcp__notes__create_note", "arguments": {"title": "hi"}}),
                &ToolInvocation::new("c2"),
            )
            .await
            .unwrap();
        assert_eq!(result["tool"], "create_note");
        assert_eq!(result["args"]["title"], "hi");
    }

    #[tokio::test]
    async fn test_call_unknown_tool() {
        let call = CallToolTool::new(Arc::new(ToolRegistry::new()));
        let err = call
            .execute(json!({"name": "ghost"}), &ToolInvocation::new("c1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn test_use_tools_by_plugin_and_names() {
        let registry = registry_with_plugin();
        let use_tools = UseToolsTool::new(Arc::clone(&registry));
        let result = use_tools
            .execute(json!({"plugin": "notes"}), &ToolInvocation::new("c1"))
            .await
            .unwrap();
        assert_eq!(result["loaded"].as_array().unwrap().len(), 2);

        let again = use_tools
            .execute(
                json!({"tools": ["mcp__notes__create_note", "ghost"]}),
                &ToolInvocation::new("c2"),
            )
            .await
            .unwrap();
        assert_eq!(again["already_loaded"].as_array().unwrap().len(), 1);
        assert_eq!(again["not_found"][0], "ghost");
    }

    #[tokio::test]
    async fn test_skill_tool_loads_and_returns_instructions() {
        let registry = Arc::new(ToolRegistry::new());
        registry.register_skill(Skill {
            name: "review".to_string(),
            description: "Review code".to_string(),
            tools: vec![Arc::new(Named("annotate", "Annotate a diff"))],
            instructions: SkillInstructions::Text("Look for bugs first.".to_string()),
            dependencies: Vec::new(),
        });
        let skill = SkillTool::new(Arc::clone(&registry));
        let result = skill
            .execute(json!({"name": "review"}), &ToolInvocation::new("c1"))
            .await
            .unwrap();
        assert_eq!(result["instructions"], "Look for bugs first.");
        assert!(registry.is_loaded("annotate"));
    }
}
