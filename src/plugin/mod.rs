//! Plugin manifests and per-plugin exposure options.
//!
//! File-format loading is out of scope; this module owns the manifest
//! shape, its validation rules, and the options that decide how a plugin's
//! tools reach the model (eager, deferred behind `search_tools`/`call_tool`,
//! or delegated to an auto-synthesized subagent).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const MAX_DESCRIPTION_LEN: usize = 1024;
pub const MAX_COMPATIBILITY_LEN: usize = 500;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Invalid plugin name '{0}': must match [a-z][a-z0-9-]* without consecutive or trailing hyphens")]
    InvalidName(String),

    #[error("Plugin description too long: {0} chars (max {MAX_DESCRIPTION_LEN})")]
    DescriptionTooLong(usize),

    #[error("Plugin compatibility too long: {0} chars (max {MAX_COMPATIBILITY_LEN})")]
    CompatibilityTooLong(usize),
}

/// Manifest metadata for a plugin or skill bundle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compatibility: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl PluginManifest {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            license: None,
            compatibility: None,
            metadata: None,
        }
    }

    pub fn validate(&self) -> Result<(), PluginError> {
        validate_plugin_name(&self.name)?;
        if self.description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(PluginError::DescriptionTooLong(
                self.description.chars().count(),
            ));
        }
        if let Some(compatibility) = &self.compatibility {
            if compatibility.chars().count() > MAX_COMPATIBILITY_LEN {
                return Err(PluginError::CompatibilityTooLong(
                    compatibility.chars().count(),
                ));
            }
        }
        Ok(())
    }
}

/// `[a-z][a-z0-9-]*`, no consecutive hyphens, no trailing hyphen.
pub fn validate_plugin_name(name: &str) -> Result<(), PluginError> {
    let mut chars = name.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_lowercase());
    let valid_rest = name
        .chars()
        .skip(1)
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid_start || !valid_rest || name.contains("--") || name.ends_with('-') {
        return Err(PluginError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// How a plugin's tools are exposed.
#[derive(Clone, Debug, Default)]
pub struct PluginToolOptions {
    /// Register but do not expose directly; reachable through
    /// `search_tools` + `call_tool`.
    pub deferred: bool,
    /// Do not expose to the primary agent at all; synthesize a subagent
    /// holding these tools, reachable via `task`.
    pub delegate_to_subagent: bool,
    /// System prompt for the synthesized subagent.
    pub subagent_prompt: Option<String>,
    pub category: Option<String>,
}

impl PluginToolOptions {
    pub fn eager() -> Self {
        Self::default()
    }

    pub fn deferred() -> Self {
        Self {
            deferred: true,
            ..Self::default()
        }
    }

    pub fn delegated(subagent_prompt: impl Into<String>) -> Self {
        Self {
            delegate_to_subagent: true,
            subagent_prompt: Some(subagent_prompt.into()),
            ..Self::default()
        }
    }
}
