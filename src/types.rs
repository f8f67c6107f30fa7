//! JSON-RPC 2.0 message types carried by every transport
//!
//! This module provides the wire-level type system shared by all transports.
//! Transports serialize these types to single-line JSON (stream transports)
//! or to an HTTP request body (HTTP transport); the pending-request table
//! correlates responses to requests by the `id` field.
//!
//! # Message Types
//!
//! ```rust
//! use mcp_conduit::types::{JsonRpcRequest, JsonRpcResponse};
//! use serde_json::json;
//!
//! // Create a request
//! let request = JsonRpcRequest::new(json!(1), "tools/list", None);
//!
//! // Create a successful response
//! let response = JsonRpcResponse::success(json!(1), json!({"tools": []}));
//! ```
//!
//! # Correlation
//!
//! Request ids are produced by a per-transport monotonic counter, but the
//! wire-level `RequestId` stays a [`serde_json::Value`] because the protocol
//! is not fully trusted: a remote server may answer with a string id, a
//! null id, or an id that matches nothing. Such responses are logged and
//! dropped rather than treated as fatal.

use serde::{Deserialize, Serialize};

/// JSON-RPC 2.0 version identifier
pub const JSONRPC_VERSION: &str = "2.0";

/// Unique identifier for JSON-RPC requests
pub type RequestId = serde_json::Value;

/// Incoming message variants a transport may read off the wire
///
/// Untagged: a frame with `method` and `id` is a request, a frame with an
/// `id` and a `result`/`error` member is a response, and a frame with only a
/// `method` is a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// A request message initiating an operation
    Request(JsonRpcRequest),
    /// A response message containing a result or an error
    Response(JsonRpcResponse),
    /// A notification (request without an id, expecting no response)
    Notification(JsonRpcNotification),
}

/// Request message for initiating operations on a tool server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// Unique identifier for this request
    pub id: RequestId,
    /// Method name to invoke
    pub method: String,
    /// Optional parameters for the method
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// Response message correlated to a request via the `id` field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// Request identifier this response corresponds to
    pub id: RequestId,
    /// Either result or error, but not both
    #[serde(flatten)]
    pub payload: ResponsePayload,
}

/// Response content - either successful result data or error details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsePayload {
    /// Successful response with result data
    Success { result: serde_json::Value },
    /// Error response with error details
    Error { error: JsonRpcErrorObject },
}

/// Notification message for server-initiated events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// Method name
    pub method: String,
    /// Optional parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// Error information following the JSON-RPC 2.0 error format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    /// Numeric error code
    pub code: i32,
    /// Human-readable error message
    pub message: String,
    /// Optional additional error data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Standard JSON-RPC 2.0 error codes
impl JsonRpcErrorObject {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    /// Create a method not found error
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self {
            code: Self::METHOD_NOT_FOUND,
            message: format!("Method not found: {}", method.into()),
            data: None,
        }
    }

    /// Create an internal error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self {
            code: Self::INTERNAL_ERROR,
            message: message.into(),
            data: None,
        }
    }
}

impl JsonRpcRequest {
    /// Create a new request with the given method and parameters
    pub fn new(
        id: RequestId,
        method: impl Into<String>,
        params: Option<serde_json::Value>,
    ) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

impl JsonRpcResponse {
    /// Create a successful response
    pub fn success(id: RequestId, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            payload: ResponsePayload::Success { result },
        }
    }

    /// Create an error response
    pub fn error(id: RequestId, error: JsonRpcErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            payload: ResponsePayload::Error { error },
        }
    }
}

impl JsonRpcNotification {
    /// Create a new notification
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}
