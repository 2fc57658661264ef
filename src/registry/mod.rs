//! Tool registry: the named catalog behind dynamic tool loading.
//!
//! The registry tracks every known tool's metadata plus a separate
//! loaded-name set; only loaded tools are exposed to the model. Loading is
//! idempotent. Plugins register under `mcp__<plugin>__<tool>` names; skills
//! bundle tools with instructions and resolve dependencies breadth-first.
//!
//! The registry is read-mostly during a turn and synchronous; the async
//! surfaces that mutate it (meta-tools, MCP exposure) emit the
//! `ToolRegistered`/`ToolLoadError` hooks themselves.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::tool::Tool;

mod meta;
mod skills;

pub use meta::{CallToolTool, SearchToolsTool, SkillTool, UseToolsTool};
pub use skills::{LoadedSkill, Skill, SkillInstructions};

/// Default count of loaded tools above which `search_tools` is exposed
/// even for eagerly loaded sets.
pub const DEFAULT_TOOL_SEARCH_THRESHOLD: usize = 20;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Tool not found in registry: {0}")]
    ToolNotFound(String),

    #[error("Skill not found: {0}")]
    SkillNotFound(String),

    #[error("Tool is already registered: {0}")]
    DuplicateName(String),
}

/// Catalog entry describing one tool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

impl ToolMetadata {
    pub fn for_tool(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name(),
            description: tool.description(),
            plugin: None,
            category: None,
            tags: BTreeSet::new(),
        }
    }

    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Search filters; all optional, all conjunctive.
#[derive(Clone, Debug, Default)]
pub struct SearchQuery {
    pub query: Option<String>,
    pub plugin: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub include_loaded: bool,
    pub limit: Option<usize>,
}

impl SearchQuery {
    pub fn text(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            include_loaded: true,
            ..Self::default()
        }
    }

    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Outcome of a load request. Idempotent: already-loaded names land in
/// `skipped`.
#[derive(Clone, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub skipped: Vec<String>,
    pub not_found: Vec<String>,
    pub success: bool,
    pub tools: Vec<Arc<dyn Tool>>,
}

impl std::fmt::Debug for LoadReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadReport")
            .field("loaded", &self.loaded)
            .field("skipped", &self.skipped)
            .field("not_found", &self.not_found)
            .field("success", &self.success)
            .finish()
    }
}

struct RegistryEntry {
    metadata: ToolMetadata,
    definition: Arc<dyn Tool>,
}

#[derive(Default)]
struct RegistryInner {
    entries: HashMap<String, RegistryEntry>,
    /// Registration order, for deterministic listings.
    order: Vec<String>,
    loaded: HashSet<String>,
    skills: HashMap<String, Skill>,
}

/// Named tool catalog with a separate loaded set.
#[derive(Default)]
pub struct ToolRegistry {
    inner: RwLock<RegistryInner>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its own name with derived metadata.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let metadata = ToolMetadata::for_tool(tool.as_ref());
        self.register_with(tool, metadata)
    }

    pub fn register_with(
        &self,
        tool: Arc<dyn Tool>,
        metadata: ToolMetadata,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let name = metadata.name.clone();
        if inner.entries.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        inner.order.push(name.clone());
        inner.entries.insert(
            name,
            RegistryEntry {
                metadata,
                definition: tool,
            },
        );
        Ok(())
    }

    pub fn register_many(&self, tools: Vec<Arc<dyn Tool>>) -> Result<(), RegistryError> {
        for tool in tools {
            self.register(tool)?;
        }
        Ok(())
    }

    /// Register a plugin's tools under `mcp__<prefix>__<name>` names.
    /// Returns the namespaced names in registration order.
    pub fn register_plugin(
        &self,
        prefix: &str,
        tools: Vec<Arc<dyn Tool>>,
        category: Option<&str>,
    ) -> Result<Vec<String>, RegistryError> {
        let mut names = Vec::with_capacity(tools.len());
        for tool in tools {
            let namespaced = plugin_tool_name(prefix, &tool.name());
            let mut metadata = ToolMetadata::for_tool(tool.as_ref()).with_plugin(prefix);
            metadata.name = namespaced.clone();
            if let Some(category) = category {
                metadata = metadata.with_category(category);
            }
            self.register_with(tool, metadata)?;
            names.push(namespaced);
        }
        Ok(names)
    }

    pub fn unregister(&self, name: &str) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.loaded.remove(name);
        inner.order.retain(|n| n != name);
        inner.entries.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.entries.get(name).map(|e| Arc::clone(&e.definition))
    }

    pub fn metadata(&self, name: &str) -> Option<ToolMetadata> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.entries.get(name).map(|e| e.metadata.clone())
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.loaded.contains(name)
    }

    /// Load tools by name. Idempotent; unknown names are reported, not
    /// fatal.
    pub fn load<I, S>(&self, names: I) -> LoadReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let mut report = LoadReport::default();
        for name in names {
            let name = name.as_ref();
            match inner.entries.get(name) {
                Some(entry) => {
                    if inner.loaded.contains(name) {
                        report.skipped.push(name.to_string());
                    } else {
                        report.tools.push(Arc::clone(&entry.definition));
                        inner.loaded.insert(name.to_string());
                        report.loaded.push(name.to_string());
                    }
                }
                None => report.not_found.push(name.to_string()),
            }
        }
        report.success = report.not_found.is_empty();
        report
    }

    /// Load every tool whose metadata passes the filter.
    pub fn load_matching(&self, filter: impl Fn(&ToolMetadata) -> bool) -> LoadReport {
        let names: Vec<String> = {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            inner
                .order
                .iter()
                .filter(|name| {
                    inner
                        .entries
                        .get(*name)
                        .map(|e| filter(&e.metadata))
                        .unwrap_or(false)
                })
                .cloned()
                .collect()
        };
        self.load(names)
    }

    /// Case-insensitive substring search over name, description, and tags.
    pub fn search(&self, query: &SearchQuery) -> Vec<ToolMetadata> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let needle = query.query.as_deref().map(str::to_lowercase);
        let mut out = Vec::new();
        for name in &inner.order {
            let Some(entry) = inner.entries.get(name) else {
                continue;
            };
            let metadata = &entry.metadata;
            if !query.include_loaded && inner.loaded.contains(name) {
                continue;
            }
            if let Some(plugin) = &query.plugin {
                if metadata.plugin.as_deref() != Some(plugin.as_str()) {
                    continue;
                }
            }
            if let Some(category) = &query.category {
                if metadata.category.as_deref() != Some(category.as_str()) {
                    continue;
                }
            }
            if !query.tags.iter().all(|t| metadata.tags.contains(t)) {
                continue;
            }
            if let Some(needle) = &needle {
                let matches = metadata.name.to_lowercase().contains(needle)
                    || metadata.description.to_lowercase().contains(needle)
                    || metadata
                        .tags
                        .iter()
                        .any(|t| t.to_lowercase().contains(needle));
                if !matches {
                    continue;
                }
            }
            out.push(metadata.clone());
            if let Some(limit) = query.limit {
                if out.len() >= limit {
                    break;
                }
            }
        }
        out
    }

    /// Currently-loaded tool definitions in registration order.
    pub fn get_loaded_tools(&self) -> Vec<Arc<dyn Tool>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .order
            .iter()
            .filter(|name| inner.loaded.contains(*name))
            .filter_map(|name| inner.entries.get(name))
            .map(|e| Arc::clone(&e.definition))
            .collect()
    }

    pub fn loaded_count(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.loaded.len()
    }

    pub fn list_all(&self) -> Vec<ToolMetadata> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .order
            .iter()
            .filter_map(|name| inner.entries.get(name))
            .map(|e| e.metadata.clone())
            .collect()
    }

    /// Catalog index grouped by plugin (plugin `null` groups core tools).
    pub fn build_tool_index(&self, include_plugins: bool) -> Value {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut groups: HashMap<String, Vec<Value>> = HashMap::new();
        for name in &inner.order {
            let Some(entry) = inner.entries.get(name) else {
                continue;
            };
            let metadata = &entry.metadata;
            if metadata.plugin.is_some() && !include_plugins {
                continue;
            }
            let group = metadata.plugin.clone().unwrap_or_else(|| "core".to_string());
            groups.entry(group).or_default().push(json!({
                "name": metadata.name,
                "description": metadata.description,
                "loaded": inner.loaded.contains(name),
            }));
        }
        let mut keys: Vec<String> = groups.keys().cloned().collect();
        keys.sort();
        let mut index = serde_json::Map::new();
        for key in keys {
            if let Some(tools) = groups.remove(&key) {
                index.insert(key, Value::Array(tools));
            }
        }
        Value::Object(index)
    }

    /// Clear the loaded set, keeping registrations.
    pub fn reset(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.loaded.clear();
    }

    /// Remove everything.
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.entries.clear();
        inner.order.clear();
        inner.loaded.clear();
        inner.skills.clear();
    }

    // ---- Skills ----

    pub fn register_skill(&self, skill: Skill) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.skills.insert(skill.name.clone(), skill);
    }

    pub fn skill_names(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = inner.skills.keys().cloned().collect();
        names.sort();
        names
    }

    /// Load a skill by name: resolve its dependency list breadth-first
    /// (cycle-free via a visited set), aggregate tools and instructions
    /// from every transitively-loaded skill, and register+load the tools.
    pub fn load_skill(
        &self,
        name: &str,
        argument: Option<&Value>,
    ) -> Result<LoadedSkill, RegistryError> {
        // Resolve the BFS order under the read lock, then mutate.
        let resolved: Vec<Skill> = {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            if !inner.skills.contains_key(name) {
                return Err(RegistryError::SkillNotFound(name.to_string()));
            }
            let mut visited: HashSet<String> = HashSet::new();
            let mut queue: VecDeque<String> = VecDeque::new();
            let mut order: Vec<Skill> = Vec::new();
            queue.push_back(name.to_string());
            visited.insert(name.to_string());
            while let Some(current) = queue.pop_front() {
                let skill = inner
                    .skills
                    .get(&current)
                    .ok_or_else(|| RegistryError::SkillNotFound(current.clone()))?;
                order.push(skill.clone());
                for dep in &skill.dependencies {
                    if visited.insert(dep.clone()) {
                        queue.push_back(dep.clone());
                    }
                }
            }
            order
        };

        let mut instructions: Vec<String> = Vec::new();
        let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
        let mut dependencies_loaded: Vec<String> = Vec::new();
        for (index, skill) in resolved.iter().enumerate() {
            // The argument applies to the requested skill only.
            let arg = if index == 0 { argument } else { None };
            instructions.push(skill.instructions.render(arg));
            for tool in &skill.tools {
                let tool_name = tool.name();
                // Re-registration across overlapping skills is fine.
                let _ = self.register(Arc::clone(tool));
                self.load([tool_name.as_str()]);
                tools.push(Arc::clone(tool));
            }
            if index > 0 {
                dependencies_loaded.push(skill.name.clone());
            }
        }

        Ok(LoadedSkill {
            name: name.to_string(),
            instructions: instructions.join("\n\n"),
            tools,
            dependencies_loaded,
        })
    }
}

/// Namespaced plugin tool name.
pub fn plugin_tool_name(plugin: &str, tool: &str) -> String {
    format!("mcp__{plugin}__{tool}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{ToolError, ToolInvocation};
    use async_trait::async_trait;

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
            _input: Value,
            _invocation: &ToolInvocation,
        ) -> Result<Value, ToolError> {
            Ok(json!(self.0))
        }
    }

    #[test]
    fn test_register_load_idempotent() {
        let registry = ToolRegistry::new();
        registry
            .register(Arc::new(Named("fetch", "Fetch a URL")))
            .unwrap();

        let report = registry.load(["fetch", "missing"]);
        assert_eq!(report.loaded, vec!["fetch"]);
        assert_eq!(report.not_found, vec!["missing"]);
        assert!(!report.success);

        let again = registry.load(["fetch"]);
        assert_eq!(again.skipped, vec!["fetch"]);
        assert!(again.loaded.is_empty());
        assert!(again.success);
        assert_eq!(registry.get_loaded_tools().len(), 1);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(Named("x", "d"))).unwrap();
        assert!(matches!(
            registry.register(Arc::new(Named("x", "d"))),
            Err(RegistryError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_plugin_namespacing() {
        let registry = ToolRegistry::new();
        let names = registry
            .register_plugin(
                "github",
                vec![Arc::new(Named("search_issues", "Search issues"))],
                Some("vcs"),
            )
            .unwrap();
        assert_eq!(names, vec!["mcp__github__search_issues"]);
        let metadata = registry.metadata("mcp__github__search_issues").unwrap();
        assert_eq!(metadata.plugin.as_deref(), Some("github"));
        assert_eq!(metadata.category.as_deref(), Some("vcs"));
    }

    #[test]
    fn test_search_substring_and_filters() {
        let registry = ToolRegistry::new();
        registry
            .register_with(
                Arc::new(Named("fetch_url", "Fetch a web page")),
                ToolMetadata {
                    name: "fetch_url".to_string(),
                    description: "Fetch a web page".to_string(),
                    plugin: None,
                    category: Some("web".to_string()),
                    tags: ["http", "network"].iter().map(|s| s.to_string()).collect(),
                },
            )
            .unwrap();
        registry
            .register(Arc::new(Named("read_file", "Read a file")))
            .unwrap();

        let hits = registry.search(&SearchQuery::text("WEB"));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "fetch_url");

        // Tag matches too.
        let hits = registry.search(&SearchQuery::text("http"));
        assert_eq!(hits.len(), 1);

        let mut by_loaded = SearchQuery::text("file");
        by_loaded.include_loaded = false;
        registry.load(["read_file"]);
        assert!(registry.search(&by_loaded).is_empty());
    }

    #[test]
    fn test_reset_and_clear() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(Named("a", "d"))).unwrap();
        registry.load(["a"]);
        registry.reset();
        assert_eq!(registry.loaded_count(), 0);
        assert_eq!(registry.list_all().len(), 1);
        registry.clear();
        assert!(registry.list_all().is_empty());
    }

    #[test]
    fn test_build_tool_index_groups() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(Named("core_tool", "d"))).unwrap();
        registry
            .register_plugin("gh", vec![Arc::new(Named("pr", "d"))], None)
            .unwrap();
        let index = registry.build_tool_index(true);
        assert!(index["core"].is_array());
        assert!(index["gh"].is_array());
        let without = registry.build_tool_index(false);
        assert!(without.get("gh").is_none());
    }

    #[test]
    fn test_skill_dependency_bfs() {
        let registry = ToolRegistry::new();
        registry.register_skill(Skill {
            name: "release".to_string(),
            description: "Cut a release".to_string(),
            tools: vec![Arc::new(Named("tag", "Create a tag"))],
            instructions: SkillInstructions::Text("Release steps".to_string()),
            dependencies: vec!["changelog".to_string()],
        });
        registry.register_skill(Skill {
            name: "changelog".to_string(),
            description: "Write the changelog".to_string(),
            tools: vec![Arc::new(Named("diff", "Summarize diffs"))],
            instructions: SkillInstructions::Text("Changelog steps".to_string()),
            // Cycle back to release: the visited set breaks it.
            dependencies: vec!["release".to_string()],
        });

        let loaded = registry.load_skill("release", None).unwrap();
        assert_eq!(loaded.dependencies_loaded, vec!["changelog"]);
        assert!(loaded.instructions.contains("Release steps"));
        assert!(loaded.instructions.contains("Changelog steps"));
        assert_eq!(loaded.tools.len(), 2);
        assert!(registry.is_loaded("tag"));
        assert!(registry.is_loaded("diff"));
    }

    #[test]
    fn test_load_skill_missing() {
        let registry = ToolRegistry::new();
        assert!(matches!(
            registry.load_skill("nope", None),
            Err(RegistryError::SkillNotFound(_))
        ));
    }
}
