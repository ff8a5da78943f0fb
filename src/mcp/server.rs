//! MCP server exposing FreeCAD tool bit conversion.
//!
//! Lifecycle:
//!
//! 1. **Initialisation**: `initialize` request, then the
//!    `notifications/initialized` notification
//! 2. **Operation**: `tools/list`, `tools/call`, `ping`
//! 3. **Shutdown**: end of input or a termination signal
//!
//! Every tool validates its paths against the allowed directories. A failing
//! tool call is reported as an `isError` result; the server keeps running.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncWrite};

use crate::config::{Config, ConversionConfig};
use crate::mcp::protocol::{
    parse_message, IncomingMessage, JsonRpcError, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, RequestId, MCP_PROTOCOL_VERSION, SERVER_NAME,
};
use crate::mcp::transport::{LineTransport, StdioTransport};
use crate::toolbit::convert::{self, tool_number_duplicates};
use crate::toolbit::native::ToolStatus;
use crate::toolbit::shape::{self, SaveOutcome};
use crate::toolbit::{
    tool_bit_file_name, DuplicateIndex, ShapeAttachment, ToolBit, ToolError, ToolItem,
    ToolLibrary, ToolSet,
};

/// Reported when an attachment has nothing to write.
const NO_CONTENT: &str = "no content available";

/// Server state in the MCP lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Waiting for initialize request.
    AwaitingInit,
    /// Initialize received, waiting for initialized notification.
    Initialising,
    /// Ready for normal operation.
    Running,
    /// Shutdown in progress.
    ShuttingDown,
}

/// Server information for initialisation response.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Parameters for the initialize request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version requested by client.
    pub protocol_version: String,
    /// Client capabilities.
    #[serde(default)]
    pub capabilities: Value,
}

/// A tool definition for tools/list response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// JSON Schema for the tool's input parameters.
    pub input_schema: Value,
}

/// Parameters for tools/call request.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallParams {
    /// Name of the tool to call.
    pub name: String,
    /// Arguments for the tool.
    #[serde(default)]
    pub arguments: Value,
}

/// Content item in a tool call response.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
}

/// Result of a tool call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Content returned by the tool.
    pub content: Vec<ToolContent>,
    /// Whether the tool call resulted in an error.
    #[serde(skip_serializing_if = "is_false")]
    pub is_error: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // skip_serializing_if passes &T
const fn is_false(b: &bool) -> bool {
    !*b
}

impl ToolCallResult {
    /// Creates a successful text result.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Creates an error text result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::text(message)
        }
    }

    /// Creates a successful result from a JSON body.
    #[must_use]
    pub fn json(body: &Value) -> Self {
        Self::text(pretty(body))
    }

    /// Creates an error result describing a failed tool bit operation.
    #[must_use]
    pub fn failure(filepath: &str, error: &ToolError) -> Self {
        Self::error(pretty(&json!({
            "status": "error",
            "filepath": filepath,
            "kind": error.kind(),
            "error": error.to_string(),
        })))
    }

    /// Returns the text of the first content item.
    #[must_use]
    pub fn first_text(&self) -> &str {
        match self.content.first() {
            Some(ToolContent::Text { text }) => text,
            None => "",
        }
    }
}

fn pretty(body: &Value) -> String {
    serde_json::to_string_pretty(body).unwrap_or_else(|_| body.to_string())
}

/// A handler's outcome. Early failures travel in `Err` so handlers can use `?`.
type Handled = Result<ToolCallResult, ToolCallResult>;

fn str_arg<'a>(arguments: &'a Value, name: &str) -> Result<&'a str, ToolCallResult> {
    arguments
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolCallResult::error(format!("Missing required parameter: {name}")))
}

fn value_arg<'a>(arguments: &'a Value, name: &str) -> Result<&'a Value, ToolCallResult> {
    arguments
        .get(name)
        .filter(|value| !value.is_null())
        .ok_or_else(|| ToolCallResult::error(format!("Missing required parameter: {name}")))
}

fn typed_arg<T: serde::de::DeserializeOwned>(
    arguments: &Value,
    name: &str,
) -> Result<T, ToolCallResult> {
    serde_json::from_value(value_arg(arguments, name)?.clone())
        .map_err(|e| ToolCallResult::error(format!("Invalid parameter {name}: {e}")))
}

/// Parses `{"<tool number>": item, ...}`.
fn tool_map(value: &Value) -> Result<BTreeMap<i64, ToolItem>, ToolCallResult> {
    let obj = value.as_object().ok_or_else(|| {
        ToolCallResult::error("Invalid parameter tools: expected an object keyed by tool number")
    })?;
    obj.iter()
        .map(|(key, raw)| {
            let number = key
                .parse::<i64>()
                .map_err(|_| ToolCallResult::error(format!("Invalid tool number: {key}")))?;
            let item = serde_json::from_value(raw.clone())
                .map_err(|e| ToolCallResult::error(format!("Invalid tool item {key}: {e}")))?;
            Ok((number, item))
        })
        .collect()
}

/// Settings the server passes into conversion calls.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Directories file operations are confined to.
    pub allowed_paths: Vec<PathBuf>,
    /// Directory library entries are resolved against by default.
    pub bits_dir: Option<PathBuf>,
    /// Directories searched for shape files after the tool bit's own directory.
    pub shape_search_dirs: Vec<PathBuf>,
    /// Directory imported shape attachments are written to by default.
    pub shapes_dir: Option<PathBuf>,
    /// Conversion defaults.
    pub conversion: ConversionConfig,
}

impl ServerSettings {
    /// Settings with default conversion values and no tools directory.
    #[must_use]
    pub fn new(allowed_paths: Vec<PathBuf>) -> Self {
        Self {
            allowed_paths,
            bits_dir: None,
            shape_search_dirs: Vec::new(),
            shapes_dir: None,
            conversion: ConversionConfig::default(),
        }
    }

    /// Settings derived from a loaded configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            allowed_paths: config.allowed_paths.clone(),
            bits_dir: config.bits_dir(),
            shape_search_dirs: config.shape_search_order(),
            shapes_dir: config.shapes_dir(),
            conversion: config.conversion.clone(),
        }
    }
}

/// An outgoing line.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Reply {
    Success(JsonRpcResponse),
    Failure(JsonRpcError),
}

/// The MCP server for FreeCAD tool exchange.
pub struct McpServer {
    state: ServerState,
    protocol_version: Option<String>,
    settings: ServerSettings,
}

impl McpServer {
    /// Creates a server awaiting initialisation.
    #[must_use]
    pub const fn new(settings: ServerSettings) -> Self {
        Self {
            state: ServerState::AwaitingInit,
            protocol_version: None,
            settings,
        }
    }

    /// Returns the current server state.
    #[must_use]
    pub const fn state(&self) -> ServerState {
        self.state
    }

    /// Returns the negotiated protocol version, once initialised.
    #[must_use]
    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    /// Validates that a path is within one of the allowed paths.
    ///
    /// Paths that do not exist yet are checked through their parent directory.
    fn validate_path(&self, path: &Path) -> Result<(), ToolCallResult> {
        if self.settings.allowed_paths.is_empty() {
            return Ok(());
        }

        let canonical = if path.exists() {
            path.canonicalize().map_err(|e| {
                ToolCallResult::error(format!("Failed to resolve path '{}': {e}", path.display()))
            })?
        } else {
            let file_name = path.file_name().ok_or_else(|| {
                ToolCallResult::error(format!("Invalid path '{}': no file name", path.display()))
            })?;
            let parent = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            let canonical_parent = parent.canonicalize().map_err(|e| {
                ToolCallResult::error(format!(
                    "Parent directory '{}' does not exist or is inaccessible: {e}",
                    parent.display()
                ))
            })?;
            canonical_parent.join(file_name)
        };

        let allowed = self
            .settings
            .allowed_paths
            .iter()
            .filter_map(|allowed| allowed.canonicalize().ok())
            .any(|allowed| canonical.starts_with(allowed));

        if allowed {
            Ok(())
        } else {
            Err(ToolCallResult::error(
                "Access denied: path is outside the configured allowed directories",
            ))
        }
    }

    /// Serves stdin/stdout until end of input or a termination signal.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    pub async fn run(&mut self) -> io::Result<()> {
        let mut transport = StdioTransport::stdio();
        self.run_with_shutdown(&mut transport).await
    }

    #[cfg(unix)]
    async fn run_with_shutdown(&mut self, transport: &mut StdioTransport) -> io::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        loop {
            tokio::select! {
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT, shutting down");
                    self.state = ServerState::ShuttingDown;
                    return Ok(());
                }
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, shutting down");
                    self.state = ServerState::ShuttingDown;
                    return Ok(());
                }
                line = transport.read_line() => {
                    if self.step(transport, line?).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    #[cfg(windows)]
    async fn run_with_shutdown(&mut self, transport: &mut StdioTransport) -> io::Result<()> {
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    tracing::info!("Received Ctrl+C, shutting down");
                    self.state = ServerState::ShuttingDown;
                    return Ok(());
                }
                line = transport.read_line() => {
                    if self.step(transport, line?).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Serves an arbitrary transport until end of input.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    pub async fn serve<R, W>(&mut self, transport: &mut LineTransport<R, W>) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            let line = transport.read_line().await?;
            if self.step(transport, line).await? {
                return Ok(());
            }
        }
    }

    /// Handles one read. Returns `true` when the server should stop.
    async fn step<R, W>(
        &mut self,
        transport: &mut LineTransport<R, W>,
        line: Option<String>,
    ) -> io::Result<bool>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let Some(line) = line else {
            tracing::debug!("Input closed");
            self.state = ServerState::ShuttingDown;
            return Ok(true);
        };

        if !line.trim().is_empty() {
            if let Some(reply) = self.process_line(&line) {
                transport.send(&reply).await?;
            }
        }
        Ok(self.state == ServerState::ShuttingDown)
    }

    fn process_line(&mut self, line: &str) -> Option<Reply> {
        match parse_message(line) {
            Ok(IncomingMessage::Request(req)) => Some(match self.handle_request(&req) {
                Ok(response) => Reply::Success(response),
                Err(error) => Reply::Failure(error),
            }),
            Ok(IncomingMessage::Notification(notif)) => {
                self.handle_notification(&notif);
                None
            }
            Err(error) => Some(Reply::Failure(error)),
        }
    }

    fn handle_request(&mut self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        tracing::debug!(id = %req.id, method = %req.method, "Request");
        match req.method.as_str() {
            "initialize" => self.handle_initialize(req),
            "tools/list" => self.handle_tools_list(req),
            "tools/call" => self.handle_tools_call(req),
            "ping" => Ok(JsonRpcResponse::success(req.id.clone(), json!({}))),
            _ => Err(JsonRpcError::method_not_found(req.id.clone(), &req.method)),
        }
    }

    fn handle_notification(&mut self, notif: &JsonRpcNotification) {
        if notif.method == "notifications/initialized" && self.state == ServerState::Initialising {
            tracing::info!("Client initialised");
            self.state = ServerState::Running;
        }
    }

    fn handle_initialize(&mut self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        if self.state != ServerState::AwaitingInit {
            return Err(JsonRpcError::invalid_state(
                req.id.clone(),
                "Server already initialised",
            ));
        }

        let params: InitializeParams = parse_params(req, "initialize")?;
        tracing::debug!(client_version = %params.protocol_version, "Initialize");

        self.protocol_version = Some(MCP_PROTOCOL_VERSION.to_string());
        self.state = ServerState::Initialising;

        Ok(JsonRpcResponse::success(
            req.id.clone(),
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {"tools": {}},
                "serverInfo": ServerInfo::default(),
            }),
        ))
    }

    fn handle_tools_list(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        self.require_running(&req.id)?;
        Ok(JsonRpcResponse::success(
            req.id.clone(),
            json!({ "tools": Self::tool_definitions() }),
        ))
    }

    fn handle_tools_call(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        self.require_running(&req.id)?;
        let params: ToolCallParams = parse_params(req, "tool call")?;

        let result = self.call_tool(&params.name, &params.arguments);
        if result.is_error {
            tracing::warn!(tool = %params.name, "Tool call failed");
        }

        let value = serde_json::to_value(&result).map_err(|e| {
            tracing::error!(error = %e, "Failed to serialise tool call result");
            JsonRpcError::internal_error(
                req.id.clone(),
                "Internal error: failed to serialise result",
            )
        })?;
        Ok(JsonRpcResponse::success(req.id.clone(), value))
    }

    fn require_running(&self, id: &RequestId) -> Result<(), JsonRpcError> {
        if self.state == ServerState::Running {
            Ok(())
        } else {
            Err(JsonRpcError::invalid_state(id.clone(), "Server not initialised"))
        }
    }

    /// Dispatches a tool call by name.
    #[must_use]
    pub fn call_tool(&self, name: &str, arguments: &Value) -> ToolCallResult {
        tracing::debug!(tool = name, "Tool call");
        let outcome = match name {
            "read_tool_bit" => self.call_read_tool_bit(arguments),
            "export_tool_bit" => self.call_export_tool_bit(arguments),
            "import_tool_item" => self.call_import_tool_item(arguments),
            "read_tool_library" => self.call_read_tool_library(arguments),
            "import_tool_set" => self.call_import_tool_set(arguments),
            "export_tool_set" => self.call_export_tool_set(arguments),
            "prepare_shape_upload" => self.call_prepare_shape_upload(arguments),
            "verify_shape" => self.call_verify_shape(arguments),
            _ => Err(ToolCallResult::error(format!("Unknown tool: {name}"))),
        };
        outcome.unwrap_or_else(|failure| failure)
    }

    /// Returns the list of available tools.
    #[allow(clippy::too_many_lines)]
    fn tool_definitions() -> Vec<ToolDefinition> {
        vec![
            // === Tool bits ===
            ToolDefinition {
                name: "read_tool_bit",
                description: "Read a FreeCAD .fctb tool bit. Returns the parsed tool bit \
                              (dimensional parameters split into value and unit) and its \
                              tool-exchange item.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "filepath": {"type": "string", "description": "Path to the .fctb file"}
                    },
                    "required": ["filepath"]
                }),
            },
            ToolDefinition {
                name: "export_tool_bit",
                description: "Convert a FreeCAD .fctb tool bit to a tool-exchange item. \
                              Optionally embeds the shape file inline and checks the item \
                              against existing exchange items for duplicates.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "filepath": {"type": "string", "description": "Path to the .fctb file"},
                        "embed_shape": {
                            "type": "boolean",
                            "description": "Embed the shape file as base64 content (default false)"
                        },
                        "existing_items": {
                            "type": "array",
                            "items": {"type": "object"},
                            "description": "Exchange items to check for duplicates"
                        }
                    },
                    "required": ["filepath"]
                }),
            },
            ToolDefinition {
                name: "import_tool_item",
                description: "Write a tool-exchange item as a FreeCAD .fctb tool bit. Every \
                              dimensional geometry value must carry a <key>_unit sibling. \
                              If output_path is a directory the file is named after the \
                              item's FreeCAD id.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "item": {"type": "object", "description": "Tool-exchange item"},
                        "output_path": {
                            "type": "string",
                            "description": "Target .fctb file or directory"
                        },
                        "shapes_dir": {
                            "type": "string",
                            "description": "Directory to write an inline shape attachment to \
                                            (default: configured Shape/ directory)"
                        }
                    },
                    "required": ["item", "output_path"]
                }),
            },
            // === Libraries ===
            ToolDefinition {
                name: "read_tool_library",
                description: "Read a FreeCAD .fctl tool library, load its tool bits and \
                              return it as a tool-exchange tool set, one exchange item per \
                              loaded tool, and tool presets bound to the configured machine. \
                              Reports duplicate tool numbers.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "filepath": {"type": "string", "description": "Path to the .fctl file"},
                        "bits_dir": {
                            "type": "string",
                            "description": "Directory tool paths are relative to \
                                            (default: configured Bit/ directory, else the \
                                            library's directory)"
                        }
                    },
                    "required": ["filepath"]
                }),
            },
            ToolDefinition {
                name: "import_tool_set",
                description: "Write a tool-exchange tool set as a FreeCAD .fctl library.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "tool_set": {"type": "object", "description": "Tool-exchange tool set"},
                        "output_path": {"type": "string", "description": "Target .fctl file"}
                    },
                    "required": ["tool_set", "output_path"]
                }),
            },
            ToolDefinition {
                name: "export_tool_set",
                description: "Write a tool set and its tools as a FreeCAD library: one .fctb \
                              per member plus <name>.fctl, all in output_dir.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "tool_set": {"type": "object", "description": "Tool-exchange tool set"},
                        "tools": {
                            "type": "object",
                            "description": "Exchange items keyed by tool number",
                            "additionalProperties": {"type": "object"}
                        },
                        "output_dir": {"type": "string", "description": "Output directory"}
                    },
                    "required": ["tool_set", "tools", "output_dir"]
                }),
            },
            // === Shapes ===
            ToolDefinition {
                name: "prepare_shape_upload",
                description: "Read a shape file and return its base64 content, format, size \
                              and sha256 content hash.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "filepath": {"type": "string", "description": "Path to the shape file"}
                    },
                    "required": ["filepath"]
                }),
            },
            ToolDefinition {
                name: "verify_shape",
                description: "Check a shape file against an 'algorithm:digest' content hash.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "filepath": {"type": "string", "description": "Path to the shape file"},
                        "hash": {"type": "string", "description": "Expected hash, e.g. sha256:..."}
                    },
                    "required": ["filepath", "hash"]
                }),
            },
        ]
    }

    // ==================== Tool Handlers ====================

    fn call_read_tool_bit(&self, arguments: &Value) -> Handled {
        let filepath = str_arg(arguments, "filepath")?;
        self.validate_path(Path::new(filepath))?;

        let bit = ToolBit::open(filepath).map_err(|e| ToolCallResult::failure(filepath, &e))?;
        let item = convert::native_to_exchange_item(&bit);

        Ok(ToolCallResult::json(&json!({
            "status": "success",
            "filepath": filepath,
            "tool_bit": bit,
            "item": item,
        })))
    }

    fn call_export_tool_bit(&self, arguments: &Value) -> Handled {
        let filepath = str_arg(arguments, "filepath")?;
        self.validate_path(Path::new(filepath))?;
        let embed = arguments
            .get("embed_shape")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let bit = ToolBit::open(filepath).map_err(|e| ToolCallResult::failure(filepath, &e))?;
        let mut item = convert::native_to_exchange_item(&bit);

        let shape_report = if embed {
            self.embed_shape(Path::new(filepath), &bit, &mut item)
        } else {
            Value::Null
        };

        let duplicate = arguments
            .get("existing_items")
            .and_then(Value::as_array)
            .and_then(|existing| DuplicateIndex::from_json(existing).check(&item));

        Ok(ToolCallResult::json(&json!({
            "status": "success",
            "filepath": filepath,
            "item": item,
            "shape": shape_report,
            "duplicate": duplicate,
        })))
    }

    /// Looks up the bit's shape file and embeds it into `item`.
    ///
    /// The resolved file must itself be inside the allowed directories.
    fn embed_shape(&self, bit_path: &Path, bit: &ToolBit, item: &mut ToolItem) -> Value {
        let primary = bit_path.parent().unwrap_or_else(|| Path::new("."));
        let Some(path) =
            shape::resolve_local_path(&bit.shape_file, primary, &self.settings.shape_search_dirs)
        else {
            tracing::warn!(shape = %bit.shape_file, "Shape file not found");
            return json!({
                "embedded": false,
                "error": format!("Shape file not found: {}", bit.shape_file),
            });
        };
        if let Err(denied) = self.validate_path(&path) {
            tracing::warn!(path = %path.display(), "Shape file outside allowed directories");
            return json!({"embedded": false, "error": denied.first_text()});
        }

        match shape::prepare_upload(&path) {
            Ok(upload) => {
                item.shape_attachment = item
                    .shape_attachment
                    .take()
                    .map(|attachment| attachment.embed_upload(&upload));
                json!({
                    "embedded": true,
                    "path": path,
                    "hash": upload.hash,
                    "size_bytes": upload.size_bytes,
                })
            }
            Err(e) => json!({"embedded": false, "error": e.to_string()}),
        }
    }

    fn call_import_tool_item(&self, arguments: &Value) -> Handled {
        let item: ToolItem = typed_arg(arguments, "item")?;
        let output_path = Path::new(str_arg(arguments, "output_path")?);

        let target = if output_path.is_dir() {
            output_path.join(tool_bit_file_name(item.native_id()))
        } else {
            output_path.to_path_buf()
        };
        self.validate_path(&target)?;
        let target_str = target.display().to_string();

        let bit = convert::exchange_item_to_native(&item, &self.settings.conversion.default_shape)
            .map_err(|e| ToolCallResult::failure(&target_str, &e))?;
        bit.save(&target)
            .map_err(|e| ToolCallResult::failure(&target_str, &e))?;

        let shapes_dir = arguments
            .get("shapes_dir")
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .or_else(|| self.settings.shapes_dir.clone());
        let shape_report = match shapes_dir {
            None => Value::Null,
            Some(dir) => {
                self.validate_path(&dir)?;
                Self::save_shape(item.shape_attachment.as_ref(), &dir)
            }
        };

        Ok(ToolCallResult::json(&json!({
            "status": "success",
            "output_path": target,
            "name": bit.name,
            "shape_type": bit.shape_type,
            "shape": shape_report,
        })))
    }

    fn save_shape(attachment: Option<&ShapeAttachment>, dir: &Path) -> Value {
        let Some(attachment) = attachment else {
            return json!({"saved": false, "message": NO_CONTENT});
        };
        match shape::save_downloaded(attachment, dir, None) {
            Ok(SaveOutcome::Saved(path)) => json!({"saved": true, "path": path}),
            Ok(SaveOutcome::NoContent) => json!({"saved": false, "message": NO_CONTENT}),
            Err(e) => json!({"saved": false, "error": e.to_string()}),
        }
    }

    fn call_read_tool_library(&self, arguments: &Value) -> Handled {
        let filepath = str_arg(arguments, "filepath")?;
        let path = Path::new(filepath);
        self.validate_path(path)?;

        let library = ToolLibrary::open(path).map_err(|e| ToolCallResult::failure(filepath, &e))?;

        let bits_dir = arguments
            .get("bits_dir")
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .or_else(|| self.settings.bits_dir.clone())
            .unwrap_or_else(|| path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf());
        self.validate_path(&bits_dir)?;

        let resolved = library.resolve_tools_with(&bits_dir, |tool_path| {
            self.validate_path(tool_path)
                .map_err(|denied| denied.first_text().to_string())
        });
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut tool_set = convert::native_to_exchange_library(&library, &stem, &resolved);
        tool_set.activation.library_file = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());

        let duplicates = tool_number_duplicates(&library);
        if !duplicates.is_empty() {
            tracing::warn!(numbers = ?duplicates, "Library has duplicate tool numbers");
        }
        let presets =
            convert::library_to_presets(&library, &resolved, &self.settings.conversion.machine_id);

        let tools: Vec<Value> = resolved
            .iter()
            .map(|tool| {
                let mut entry = json!({"number": tool.entry.number, "path": tool.entry.path});
                let status = match &tool.status {
                    ToolStatus::Loaded(bit) => {
                        entry["name"] = json!(bit.name);
                        "loaded"
                    }
                    ToolStatus::Missing => "missing",
                    ToolStatus::Failed(message) => {
                        entry["error"] = json!(message);
                        "failed"
                    }
                };
                entry["status"] = json!(status);
                entry
            })
            .collect();

        let items: serde_json::Map<String, Value> = resolved
            .iter()
            .filter_map(|tool| {
                tool.tool().map(|bit| {
                    (
                        tool.entry.number.to_string(),
                        json!(convert::native_to_exchange_item(bit)),
                    )
                })
            })
            .collect();

        Ok(ToolCallResult::json(&json!({
            "status": "success",
            "filepath": filepath,
            "label": library.label,
            "version": library.version,
            "bits_dir": bits_dir,
            "machine_id": self.settings.conversion.machine_id,
            "tools": tools,
            "tool_set": tool_set,
            "items": items,
            "presets": presets,
            "duplicate_tool_numbers": duplicates,
        })))
    }

    fn call_import_tool_set(&self, arguments: &Value) -> Handled {
        let tool_set: ToolSet = typed_arg(arguments, "tool_set")?;
        let output_path = str_arg(arguments, "output_path")?;
        self.validate_path(Path::new(output_path))?;

        let library = convert::exchange_to_native_library(&tool_set)
            .map_err(|e| ToolCallResult::failure(output_path, &e))?;
        let duplicates = tool_number_duplicates(&library);
        if !duplicates.is_empty() {
            tracing::warn!(numbers = ?duplicates, "Tool set has duplicate tool numbers");
        }
        library
            .save(output_path)
            .map_err(|e| ToolCallResult::failure(output_path, &e))?;

        Ok(ToolCallResult::json(&json!({
            "status": "success",
            "output_path": output_path,
            "label": library.label,
            "tool_count": library.tools.len(),
            "duplicate_tool_numbers": duplicates,
        })))
    }

    fn call_export_tool_set(&self, arguments: &Value) -> Handled {
        let tool_set: ToolSet = typed_arg(arguments, "tool_set")?;
        let tools = tool_map(value_arg(arguments, "tools")?)?;
        let output_dir = str_arg(arguments, "output_dir")?;
        self.validate_path(Path::new(output_dir))?;

        let library_path = convert::export_tool_set(
            &tool_set,
            &tools,
            Path::new(output_dir),
            &self.settings.conversion.default_shape,
        )
        .map_err(|e| ToolCallResult::failure(output_dir, &e))?;

        Ok(ToolCallResult::json(&json!({
            "status": "success",
            "output_dir": output_dir,
            "library_path": library_path,
            "tool_count": tools.len(),
        })))
    }

    fn call_prepare_shape_upload(&self, arguments: &Value) -> Handled {
        let filepath = str_arg(arguments, "filepath")?;
        self.validate_path(Path::new(filepath))?;

        let upload = shape::prepare_upload(Path::new(filepath))
            .map_err(|e| ToolCallResult::failure(filepath, &e))?;

        Ok(ToolCallResult::json(&json!({
            "status": "success",
            "filepath": filepath,
            "upload": upload,
        })))
    }

    fn call_verify_shape(&self, arguments: &Value) -> Handled {
        let filepath = str_arg(arguments, "filepath")?;
        let hash = str_arg(arguments, "hash")?;
        self.validate_path(Path::new(filepath))?;

        Ok(ToolCallResult::json(&json!({
            "status": "success",
            "filepath": filepath,
            "valid": shape::verify_integrity(Path::new(filepath), hash),
        })))
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(
    req: &JsonRpcRequest,
    what: &str,
) -> Result<T, JsonRpcError> {
    let params = req.params.clone().ok_or_else(|| {
        JsonRpcError::invalid_params(req.id.clone(), format!("Missing {what} params"))
    })?;
    serde_json::from_value(params).map_err(|e| {
        JsonRpcError::invalid_params(req.id.clone(), format!("Invalid {what} params: {e}"))
    })
}
