//! Skills: tool bundles with instructions, loadable by name.

use std::sync::Arc;

use serde_json::Value;

use crate::tool::Tool;

/// Instruction-building callback: receives the optional skill argument.
pub type InstructionBuilder = Arc<dyn Fn(Option<&Value>) -> String + Send + Sync>;

/// Skill instructions: a static string, or a function of an argument for
/// skills whose guidance depends on the invocation.
#[derive(Clone)]
pub enum SkillInstructions {
    Text(String),
    Builder(InstructionBuilder),
}

impl SkillInstructions {
    pub fn builder(f: impl Fn(Option<&Value>) -> String + Send + Sync + 'static) -> Self {
        Self::Builder(Arc::new(f))
    }

    pub fn render(&self, argument: Option<&Value>) -> String {
        match self {
            SkillInstructions::Text(text) => text.clone(),
            SkillInstructions::Builder(f) => f(argument),
        }
    }
}

impl std::fmt::Debug for SkillInstructions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkillInstructions::Text(text) => f.debug_tuple("Text").field(&text.len()).finish(),
            SkillInstructions::Builder(_) => f.write_str("Builder(..)"),
        }
    }
}

/// A named bundle of tools plus instructions, with optional dependencies
/// on other skills (resolved breadth-first at load time).
#[derive(Clone)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub tools: Vec<Arc<dyn Tool>>,
    pub instructions: SkillInstructions,
    pub dependencies: Vec<String>,
}

impl Skill {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            tools: Vec::new(),
            instructions: SkillInstructions::Text(instructions.into()),
            dependencies: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }
}

impl std::fmt::Debug for Skill {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Skill")
            .field("name", &self.name)
            .field("tools", &self.tools.len())
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

/// Result of loading a skill: aggregated instructions and tools from the
/// skill and its transitive dependencies.
#[derive(Clone)]
pub struct LoadedSkill {
    pub name: String,
    pub instructions: String,
    pub tools: Vec<Arc<dyn Tool>>,
    /// Dependencies loaded as a side effect, in BFS order.
    pub dependencies_loaded: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_instruction_rendering() {
        let text = SkillInstructions::Text("fixed".to_string());
        assert_eq!(text.render(None), "fixed");

        let dynamic = SkillInstructions::builder(|arg| {
            format!(
                "focus: {}",
                arg.and_then(|v| v.as_str()).unwrap_or("general")
            )
        });
        assert_eq!(dynamic.render(None), "focus: general");
        assert_eq!(dynamic.render(Some(&json!("tests"))), "focus: tests");
    }
}
