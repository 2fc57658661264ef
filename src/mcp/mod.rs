//! MCP manager: remote tool servers exposed as namespaced tools.
//!
//! Transport (stdio/http) is out of scope; servers implement [McpServer]
//! and the manager handles tracking, `mcp__<server>__<tool>` bridging, and
//! the connection-transition hooks. Connection errors never fault the
//! agent: they surface through hooks, and registrations retry on
//! reconnect.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::hooks::{HookContext, HookEngine, HookEvent, HookInput};
use crate::registry::{plugin_tool_name, ToolRegistry};
use crate::tool::{Tool, ToolError, ToolInvocation};

#[derive(Debug, Error)]
pub enum McpError {
    #[error("MCP connection failed: {0}")]
    Connection(String),

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("MCP tool call failed: {0}")]
    ToolCall(String),

    #[error("Unknown MCP server: {0}")]
    UnknownServer(String),
}

/// Where a server's tools come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Inline,
    Remote,
}

/// A tool advertised by a server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct McpToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A connected (or connectable) tool server. Implementations own the
/// transport.
#[async_trait]
pub trait McpServer: Send + Sync {
    fn name(&self) -> String;

    fn source_type(&self) -> SourceType {
        SourceType::Remote
    }

    /// Establish the connection and list available tools.
    async fn connect(&self) -> Result<Vec<McpToolDescriptor>, McpError>;

    /// Invoke a tool by its unprefixed name.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Failed,
}

struct ServerEntry {
    server: Arc<dyn McpServer>,
    status: ConnectionStatus,
    tools: Vec<McpToolDescriptor>,
}

/// Tracks named servers and exposes their tools through the registry.
pub struct McpManager {
    servers: RwLock<HashMap<String, ServerEntry>>,
    engine: Arc<HookEngine>,
    session_id: String,
    cwd: String,
}

impl McpManager {
    pub fn new(
        engine: Arc<HookEngine>,
        session_id: impl Into<String>,
        cwd: impl Into<String>,
    ) -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
            engine,
            session_id: session_id.into(),
            cwd: cwd.into(),
        }
    }

    async fn emit(&self, event: HookEvent, server: &str, detail: Value) {
        let input = HookInput::new(event, self.session_id.clone(), self.cwd.clone())
            .with_tool(server, detail);
        self.engine.dispatch(&input, &HookContext::new()).await;
    }

    /// Connect a server. On success the tools become bridgeable; on
    /// failure the server is tracked as failed and `MCPConnectionFailed`
    /// fires.
    pub async fn connect(&self, server: Arc<dyn McpServer>) -> Result<Vec<String>, McpError> {
        let name = server.name();
        let was_failed = {
            let servers = self.servers.read().await;
            servers
                .get(&name)
                .map(|e| e.status == ConnectionStatus::Failed)
                .unwrap_or(false)
        };

        match server.connect().await {
            Ok(tools) => {
                let names: Vec<String> = tools
                    .iter()
                    .map(|t| plugin_tool_name(&name, &t.name))
                    .collect();
                let mut servers = self.servers.write().await;
                servers.insert(
                    name.clone(),
                    ServerEntry {
                        server,
                        status: ConnectionStatus::Connected,
                        tools,
                    },
                );
                drop(servers);
                if was_failed {
                    self.emit(
                        HookEvent::McpConnectionRestored,
                        &name,
                        json!({"tools": names.len()}),
                    )
                    .await;
                }
                Ok(names)
            }
            Err(error) => {
                let mut servers = self.servers.write().await;
                servers.insert(
                    name.clone(),
                    ServerEntry {
                        server,
                        status: ConnectionStatus::Failed,
                        tools: Vec::new(),
                    },
                );
                drop(servers);
                self.emit(
                    HookEvent::McpConnectionFailed,
                    &name,
                    json!({"error": error.to_string()}),
                )
                .await;
                Err(error)
            }
        }
    }

    /// Retry a previously-registered server.
    pub async fn reconnect(&self, name: &str) -> Result<Vec<String>, McpError> {
        let server = {
            let servers = self.servers.read().await;
            servers
                .get(name)
                .map(|e| Arc::clone(&e.server))
                .ok_or_else(|| McpError::UnknownServer(name.to_string()))?
        };
        self.connect(server).await
    }

    pub async fn status(&self, name: &str) -> Option<ConnectionStatus> {
        let servers = self.servers.read().await;
        servers.get(name).map(|e| e.status)
    }

    pub async fn server_names(&self) -> Vec<String> {
        let servers = self.servers.read().await;
        let mut names: Vec<String> = servers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Bridge tools for every connected server.
    pub async fn bridge_tools(&self) -> Vec<Arc<dyn Tool>> {
        let servers = self.servers.read().await;
        let mut out: Vec<Arc<dyn Tool>> = Vec::new();
        let mut names: Vec<&String> = servers.keys().collect();
        names.sort();
        for name in names {
            let entry = &servers[name];
            if entry.status != ConnectionStatus::Connected {
                continue;
            }
            for descriptor in &entry.tools {
                out.push(Arc::new(McpBridgeTool {
                    server: Arc::clone(&entry.server),
                    descriptor: descriptor.clone(),
                    full_name: plugin_tool_name(name, &descriptor.name),
                }));
            }
        }
        out
    }

    /// Register every connected server's bridge tools into the registry
    /// (loaded eagerly), emitting `ToolRegistered` per tool.
    pub async fn register_into(&self, registry: &ToolRegistry) -> Vec<String> {
        let mut registered = Vec::new();
        for tool in self.bridge_tools().await {
            let name = tool.name();
            if registry.register(tool).is_ok() {
                registry.load([name.as_str()]);
                self.emit(HookEvent::ToolRegistered, &name, json!({"source": "mcp"}))
                    .await;
                registered.push(name);
            }
        }
        registered
    }
}

/// Call-by-name bridge exposing one remote tool.
struct McpBridgeTool {
    server: Arc<dyn McpServer>,
    descriptor: McpToolDescriptor,
    full_name: String,
}

#[async_trait]
impl Tool for McpBridgeTool {
    fn name(&self) -> String {
        self.full_name.clone()
    }

    fn description(&self) -> String {
        self.descriptor.description.clone()
    }

    fn parameters(&self) -> Value {
        self.descriptor.input_schema.clone()
    }

    async fn execute(
        &self,
        input: Value,
        _invocation: &ToolInvocation,
    ) -> Result<Value, ToolError> {
        self.server
            .call_tool(&self.descriptor.name, input)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeServer {
        fail_first: AtomicBool,
    }

    #[async_trait]
    impl McpServer for FakeServer {
        fn name(&self) -> String {
            "weather".to_string()
        }

        async fn connect(&self) -> Result<Vec<McpToolDescriptor>, McpError> {
            if self.fail_first.swap(false, Ordering::SeqCst) {
                return Err(McpError::Connection("refused".to_string()));
            }
            Ok(vec![McpToolDescriptor {
                name: "forecast".to_string(),
                description: "Get the forecast".to_string(),
                input_schema: json!({"type": "object"}),
            }])
        }

        async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
            Ok(json!({"called": name, "args": arguments}))
        }
    }

    #[tokio::test]
    async fn test_connect_failure_then_restore_hooks() {
        let engine = Arc::new(HookEngine::new());
        let failed = Arc::new(AtomicUsize::new(0));
        let restored = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&failed);
        engine
            .on(
                HookEvent::McpConnectionFailed,
                crate::hooks::hook_fn(move |_, _| {
                    let f = Arc::clone(&f);
                    async move {
                        f.fetch_add(1, Ordering::SeqCst);
                        Ok(crate::hooks::HookOutput::default())
                    }
                }),
            )
            .await;
        let r = Arc::clone(&restored);
        engine
            .on(
                HookEvent::McpConnectionRestored,
                crate::hooks::hook_fn(move |_, _| {
                    let r = Arc::clone(&r);
                    async move {
                        r.fetch_add(1, Ordering::SeqCst);
                        Ok(crate::hooks::HookOutput::default())
                    }
                }),
            )
            .await;

        let manager = McpManager::new(Arc::clone(&engine), "s1", "/");
        let server = Arc::new(FakeServer {
            fail_first: AtomicBool::new(true),
        });

        assert!(manager.connect(Arc::clone(&server) as Arc<dyn McpServer>).await.is_err());
        assert_eq!(manager.status("weather").await, Some(ConnectionStatus::Failed));
        assert_eq!(failed.load(Ordering::SeqCst), 1);

        let names = manager.reconnect("weather").await.unwrap();
        assert_eq!(names, vec!["mcp__weather__forecast"]);
        assert_eq!(restored.load(Ordering::SeqCst), 1);
        assert_eq!(
            manager.status("weather").await,
            Some(ConnectionStatus::Connected)
        );
    }

    #[tokio::test]
    async fn test_bridge_tool_invocation_and_registry() {
        let engine = Arc::new(HookEngine::new());
        let manager = McpManager::new(engine, "s1", "/");
        let server = Arc::new(FakeServer {
            fail_first: AtomicBool::new(false),
        });
        manager
            .connect(server as Arc<dyn McpServer>)
            .await
            .unwrap();

        let registry = ToolRegistry::new();
        let registered = manager.register_into(&registry).await;
        assert_eq!(registered, vec!["mcp__weather__forecast"]);
        assert!(registry.is_loaded("mcp__weather__forecast"));

        let tool = registry.get("mcp__weather__forecast").unwrap();
        let result = tool
            .execute(json!({"city": "Lisbon"}), &ToolInvocation::new("c1"))
            .await
            .unwrap();
        assert_eq!(result["called"], "forecast");
        assert_eq!(result["args"]["city"], "Lisbon");
    }
}
