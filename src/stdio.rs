//! Stdio tool host
//!
//! Exposes the registered operations to the embedding client as an MCP
//! server on stdin/stdout, built on `rmcp`.
//!
//! | Piece | Role |
//! |-------|------|
//! | [`ToolRegistry`] | The [`OperationHost`]: operations in declaration order |
//! | [`ToolServer`] | `rmcp` `ServerHandler` answering `tools/list` and `tools/call` |
//! | [`serve`] | Runs the server and forwards registry changes as `notifications/tools/list_changed` |
//!
//! stdout carries nothing but protocol messages; all logging goes to stderr.

use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, Implementation, JsonObject, ListToolsResult,
    PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{ErrorData as McpError, ServerHandler, ServiceExt};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::BridgeError;
use crate::operations::{render_error, OperationHandler, OperationHost, OperationSpec};

struct RegisteredTool {
    spec: OperationSpec,
    handler: OperationHandler,
}

/// Operations declared by the bridge, in declaration order.
pub struct ToolRegistry {
    tools: Mutex<Vec<RegisteredTool>>,
    /// Bumped on every (re-)registration
    generation: watch::Sender<u64>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            tools: Mutex::new(Vec::new()),
            generation,
        }
    }

    /// Advertised tool list for `tools/list`.
    pub fn list(&self) -> Vec<Tool> {
        let tools = self.tools.lock().unwrap_or_else(PoisonError::into_inner);
        tools.iter().map(|tool| to_tool(&tool.spec)).collect()
    }

    pub fn handler(&self, name: &str) -> Option<OperationHandler> {
        let tools = self.tools.lock().unwrap_or_else(PoisonError::into_inner);
        tools
            .iter()
            .find(|tool| tool.spec.name == name)
            .map(|tool| Arc::clone(&tool.handler))
    }

    pub fn len(&self) -> usize {
        self.tools.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Watch registrations made from now on.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    /// Run the named tool and render its result.
    ///
    /// An operation failure is a result with `isError` set; only an unknown
    /// name is an error.
    pub async fn call(&self, name: &str, arguments: Value) -> Result<CallToolResult, BridgeError> {
        let handler = self
            .handler(name)
            .ok_or_else(|| BridgeError::Operation(format!("Unknown tool: {}", name)))?;
        let result = match handler(arguments).await {
            Ok(text) => CallToolResult::success(vec![Content::text(text)]),
            Err(e) => {
                debug!(tool = %name, error = %e, "Tool call failed");
                CallToolResult::error(vec![Content::text(render_error(&e))])
            }
        };
        Ok(result)
    }
}

impl OperationHost for ToolRegistry {
    fn register_operation(&self, spec: OperationSpec, handler: OperationHandler) {
        {
            let mut tools = self.tools.lock().unwrap_or_else(PoisonError::into_inner);
            match tools.iter_mut().find(|tool| tool.spec.name == spec.name) {
                Some(existing) => {
                    existing.spec = spec;
                    existing.handler = handler;
                }
                None => tools.push(RegisteredTool { spec, handler }),
            }
        }
        self.generation.send_modify(|generation| *generation += 1);
    }
}

fn to_tool(spec: &OperationSpec) -> Tool {
    let schema = match &spec.input_schema {
        Value::Object(map) => map.clone(),
        _ => JsonObject::new(),
    };
    Tool::new(spec.name, spec.description, schema)
}

/// MCP handler over a shared [`ToolRegistry`].
#[derive(Clone)]
pub struct ToolServer {
    registry: Arc<ToolRegistry>,
}

impl ToolServer {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }
}

impl ServerHandler for ToolServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_tool_list_changed()
                .build(),
            server_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "Ask the human in the paired editor for a choice, text or confirmation.".to_string(),
            ),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult::with_all_items(self.registry.list()))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let arguments = Value::Object(request.arguments.unwrap_or_default());
        self.registry
            .call(&request.name, arguments)
            .await
            .map_err(|e| McpError::invalid_params(e.to_string(), None))
    }
}

/// Serve the registry on this process's stdin and stdout until stdin closes.
pub async fn serve_stdio(registry: Arc<ToolRegistry>) -> Result<(), BridgeError> {
    serve(registry, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serve the registry over any reader and writer pair.
///
/// Waits for the client's `initialize`, then runs until the reader closes.
/// Registrations after the handshake are announced with
/// `notifications/tools/list_changed`.
pub async fn serve<R, W>(registry: Arc<ToolRegistry>, reader: R, writer: W) -> Result<(), BridgeError>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let mut changes = registry.subscribe();
    let service = ToolServer::new(registry)
        .serve((reader, writer))
        .await
        .map_err(|e| BridgeError::Protocol(format!("MCP handshake failed: {}", e)))?;
    info!("Tool host ready on stdio");

    let peer = service.peer().clone();
    let notifier = tokio::spawn(async move {
        while changes.changed().await.is_ok() {
            debug!("Tool list changed; notifying client");
            if let Err(e) = peer.notify_tool_list_changed().await {
                debug!(error = %e, "Client no longer reachable");
                break;
            }
        }
    });

    let quit = service.waiting().await;
    notifier.abort();
    let reason = quit.map_err(|e| BridgeError::Protocol(format!("MCP service failed: {}", e)))?;
    info!(reason = ?reason, "stdin closed; tool host exiting");
    Ok(())
}
