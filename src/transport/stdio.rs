//! Transport for local child processes speaking JSON-RPC over stdin/stdout

use tokio::process::{Child, Command};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use async_trait::async_trait;

use super::retry::{with_retry, RequestIdGenerator, RetryPolicy};
use super::stream::{attach_child, StreamCore};
use super::{Transport, TransportEvent, TransportStatus};
use crate::config::{StdioEndpoint, TransportConfig, TransportKind};
use crate::error::TransportError;
use crate::types::{JsonRpcRequest, JsonRpcResponse};

/// Runs the server as a local child process and frames messages as
/// newline-delimited JSON on its stdio
pub struct StdioTransport {
    endpoint: StdioEndpoint,
    retry: RetryPolicy,
    core: StreamCore,
    child: Mutex<Option<Child>>,
    ids: RequestIdGenerator,
}

impl StdioTransport {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let endpoint = match &config.endpoint {
            crate::config::Endpoint::Stdio(endpoint) => endpoint.clone(),
            other => {
                return Err(TransportError::configuration(format!(
                    "stdio transport given a {} endpoint",
                    other.kind()
                )))
            }
        };
        Ok(Self {
            endpoint,
            retry: RetryPolicy::from_config(&config),
            core: StreamCore::new(config.request_timeout()),
            child: Mutex::new(None),
            ids: RequestIdGenerator::new(),
        })
    }

    fn build_command(&self) -> Command {
        let mut command = Command::new(&self.endpoint.command);
        command.args(&self.endpoint.args);
        command.envs(&self.endpoint.env_vars);
        if let Some(dir) = &self.endpoint.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("command", &self.endpoint.command)
            .field("status", &self.core.status_cell().get())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        // The child slot doubles as the connect lock: holding it for the
        // whole attempt keeps a concurrent connect from spawning a second
        // process against the same stream core
        let mut child_slot = self.child.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        self.core.status_cell().set(TransportStatus::Connecting);

        let connected = with_retry(&self.retry, || async {
            attach_child(&self.core, self.build_command(), &self.endpoint.command).await
        })
        .await;

        match connected {
            Ok(child) => {
                *child_slot = Some(child);
                self.core.status_cell().set(TransportStatus::Connected);
                info!(command = %self.endpoint.command, "stdio transport connected");
                Ok(())
            }
            Err(err) => {
                self.core.status_cell().emit_error(err.to_string());
                self.core.status_cell().set(TransportStatus::Error);
                Err(err)
            }
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.core.detach(TransportStatus::Disconnected).await;
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(err) = child.kill().await {
                debug!(error = %err, "child already exited");
            }
        }
        Ok(())
    }

    async fn send_request(
        &self,
        request: JsonRpcRequest,
    ) -> Result<JsonRpcResponse, TransportError> {
        self.core.send_request(request).await
    }

    fn status(&self) -> TransportStatus {
        self.core.status_cell().get()
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.core.status_cell().subscribe()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    fn next_request_id(&self) -> i64 {
        self.ids.next_id()
    }
}
