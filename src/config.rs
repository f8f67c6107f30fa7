//! Transport and server configuration
//!
//! A [`TransportConfig`] carries the options common to every transport kind
//! (request timeout, retry budget) plus one [`Endpoint`] describing the wire
//! mechanism. Kind-specific required fields are validated eagerly by the
//! factory before any connection attempt, never lazily during
//! `send_request`.
//!
//! ```rust
//! use mcp_conduit::config::{Endpoint, StdioEndpoint, TransportConfig};
//!
//! let config = TransportConfig::new(Endpoint::Stdio(StdioEndpoint {
//!     command: "python".to_string(),
//!     args: vec!["-m".to_string(), "my_mcp_server".to_string()],
//!     ..Default::default()
//! }));
//! assert_eq!(config.request_timeout_ms, 30_000);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::TransportError;

/// Default per-request deadline in milliseconds
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
/// Default number of connection attempts
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
/// Default delay between connection attempts in milliseconds
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// Configuration for one transport: common options plus the wire endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Per-request deadline in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Number of connection attempts before giving up
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Delay between connection attempts in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Wire mechanism and its kind-specific fields
    pub endpoint: Endpoint,
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

impl TransportConfig {
    /// Create a config with default timeout and retry options
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            endpoint,
        }
    }

    /// The transport kind declared by this config
    pub fn kind(&self) -> TransportKind {
        self.endpoint.kind()
    }

    /// Per-request deadline as a [`Duration`]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Delay between connection attempts as a [`Duration`]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Wire mechanism carrying JSON-RPC messages to a tool server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Endpoint {
    /// Local child process over stdin/stdout
    Stdio(StdioEndpoint),
    /// Remote process executed through the ssh client
    Ssh(SshEndpoint),
    /// Process executed inside a running container
    Container(ContainerEndpoint),
    /// HTTP/HTTPS server, one request per call
    Http(HttpEndpoint),
}

impl Endpoint {
    /// The kind discriminant for this endpoint
    pub fn kind(&self) -> TransportKind {
        match self {
            Endpoint::Stdio(_) => TransportKind::Stdio,
            Endpoint::Ssh(_) => TransportKind::Ssh,
            Endpoint::Container(_) => TransportKind::Container,
            Endpoint::Http(_) => TransportKind::Http,
        }
    }
}

/// Transport kind discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Stdio,
    Ssh,
    Container,
    Http,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Ssh => "ssh",
            TransportKind::Container => "container",
            TransportKind::Http => "http",
        };
        f.write_str(name)
    }
}

impl FromStr for TransportKind {
    type Err = TransportError;

    /// Parse a kind name from external configuration; an unrecognized kind
    /// is a configuration error at ingestion time, never at first use.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdio" => Ok(TransportKind::Stdio),
            "ssh" => Ok(TransportKind::Ssh),
            "container" => Ok(TransportKind::Container),
            "http" | "https" => Ok(TransportKind::Http),
            other => Err(TransportError::configuration(format!(
                "unrecognized transport kind: {}",
                other
            ))),
        }
    }
}

/// Configuration for process-based servers using stdin/stdout
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StdioEndpoint {
    /// Command to execute
    pub command: String,
    /// Command arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables to set for the process
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
    /// Working directory for the process
    #[serde(default)]
    pub working_dir: Option<String>,
}

/// Configuration for servers executed on a remote host through ssh
///
/// Key-file auth runs the system `ssh` client with `-i` and BatchMode;
/// password auth shells through `sshpass`, which must be installed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshEndpoint {
    /// Remote host name or address
    pub host: String,
    /// Remote ssh port
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Remote user name
    pub username: String,
    /// Password credential (requires sshpass on the local host)
    #[serde(default)]
    pub password: Option<String>,
    /// Path to a private key file
    #[serde(default)]
    pub private_key_path: Option<String>,
    /// Command to execute on the remote host
    pub command: String,
    /// Arguments for the remote command
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_ssh_port() -> u16 {
    22
}

impl Default for SshEndpoint {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_ssh_port(),
            username: String::new(),
            password: None,
            private_key_path: None,
            command: String::new(),
            args: Vec::new(),
        }
    }
}

/// Configuration for servers executed inside a running container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerEndpoint {
    /// Container engine binary (docker, podman, ...)
    #[serde(default = "default_container_engine")]
    pub engine: String,
    /// Name or id of the target container
    pub container: String,
    /// Command to execute inside the container
    pub command: String,
    /// Arguments for the command
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables injected into the exec session
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
}

fn default_container_engine() -> String {
    "docker".to_string()
}

impl Default for ContainerEndpoint {
    fn default() -> Self {
        Self {
            engine: default_container_engine(),
            container: String::new(),
            command: String::new(),
            args: Vec::new(),
            env_vars: HashMap::new(),
        }
    }
}

/// Configuration for HTTP/HTTPS servers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpEndpoint {
    /// Base URL of the server, e.g. "https://tools.example.com"
    pub base_url: String,
    /// Request path joined onto the base URL
    #[serde(default = "default_http_endpoint")]
    pub endpoint: String,
    /// Extra headers applied to every request
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Optional authentication applied to every request
    #[serde(default)]
    pub auth: Option<HttpAuth>,
    /// Whether to verify TLS certificates
    #[serde(default = "default_validate_ssl")]
    pub validate_ssl: bool,
}

fn default_http_endpoint() -> String {
    "/".to_string()
}

fn default_validate_ssl() -> bool {
    true
}

impl Default for HttpEndpoint {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            endpoint: default_http_endpoint(),
            headers: HashMap::new(),
            auth: None,
            validate_ssl: default_validate_ssl(),
        }
    }
}

/// Authentication options for the HTTP transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum HttpAuth {
    /// HTTP basic credentials
    Basic { username: String, password: String },
    /// Bearer token
    Bearer { token: String },
}

/// A registered tool server: identity plus its transport configuration
///
/// The pool keys live connections by `id`, so two servers must never share
/// one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unique server identity
    pub id: String,
    /// Human-readable name, used only for logging
    pub name: String,
    /// How to reach this server
    pub transport: TransportConfig,
}
