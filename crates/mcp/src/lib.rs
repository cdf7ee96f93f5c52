// MCP (Model Context Protocol) gateway core
// JSON-RPC routing, the tool registry and SSE session management. Transport
// adapters live in the server crate.

pub mod clock;
pub mod eval;
pub mod protocol;
pub mod server;
pub mod session;
pub mod tools;

pub use server::McpServer;
pub use session::{SessionManager, SessionStream};
