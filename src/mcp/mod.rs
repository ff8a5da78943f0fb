//! Model Context Protocol (MCP) server.
//!
//! Exposes the tool bit conversions as MCP tools over stdio. Messages are
//! JSON-RPC 2.0, one per line.
//!
//! ```text
//!   stdin ──▶ transport ──▶ server (lifecycle) ──▶ tool handlers ──▶ toolbit
//!   stdout ◀──────────────────────┘
//! ```
//!
//! Targets MCP protocol version 2024-11-05.

pub mod protocol;
pub mod server;
pub mod transport;

pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION};
pub use server::{McpServer, ServerSettings};
pub use transport::{LineTransport, StdioTransport};
