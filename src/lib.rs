//! MCP transport abstraction with connection pooling
//!
//! This crate connects agents to Model Context Protocol tool servers over
//! four wire mechanisms behind one trait: a local child process (stdio), a
//! remote process launched through ssh, a process inside a running
//! container, and plain HTTP/HTTPS. Stream transports frame JSON-RPC 2.0 as
//! newline-delimited JSON and correlate out-of-order responses by request
//! id; the HTTP transport maps each request to one POST.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use mcp_conduit::config::{Endpoint, ServerConfig, StdioEndpoint, TransportConfig};
//! use mcp_conduit::factory::TransportFactory;
//! use mcp_conduit::pool::{ConnectionPool, PoolConfig};
//! use mcp_conduit::transport::Transport;
//! use mcp_conduit::types::JsonRpcRequest;
//!
//! # async fn example() -> Result<(), mcp_conduit::error::TransportError> {
//! let pool = ConnectionPool::new(Arc::new(TransportFactory::new()), PoolConfig::default());
//!
//! let server = ServerConfig {
//!     id: "calculator".to_string(),
//!     name: "Calculator tools".to_string(),
//!     transport: TransportConfig::new(Endpoint::Stdio(StdioEndpoint {
//!         command: "python".to_string(),
//!         args: vec!["-m".to_string(), "calculator_server".to_string()],
//!         ..Default::default()
//!     })),
//! };
//!
//! let transport = pool.get(&server).await?;
//! let id = transport.next_request_id();
//! let response = transport
//!     .send_request(JsonRpcRequest::new(id.into(), "tools/list", None))
//!     .await?;
//! pool.release(&server.id).await;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`types`] - JSON-RPC 2.0 message types shared by every transport
//! - [`error`] - the [`error::TransportError`] taxonomy with retryability
//!   classification
//! - [`config`] - transport endpoints, common options and server identity
//! - [`transport`] - the [`transport::Transport`] trait, the four
//!   implementations and the retry/request-id helpers
//! - [`factory`] - eager configuration validation and transport construction
//! - [`pool`] - bounded pooling with exclusive leases and idle eviction
//!
//! Transports are used directly when a caller manages its own connections;
//! the pool adds reuse, capacity bounds and idle cleanup on top without
//! changing the request API.

pub mod config;
pub mod error;
pub mod factory;
pub mod pool;
pub mod transport;
pub mod types;

pub use config::{Endpoint, ServerConfig, TransportConfig, TransportKind};
pub use error::TransportError;
pub use factory::{CreateTransport, TransportFactory};
pub use pool::{ConnectionPool, PoolConfig};
pub use transport::{Transport, TransportEvent, TransportStatus};
pub use types::{JsonRpcRequest, JsonRpcResponse};
