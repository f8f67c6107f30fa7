//! Transport for servers executed inside an already-running container
//!
//! The server process is started with `<engine> exec -i <container> ...`
//! (docker and podman share this CLI), keeping stdin open for the
//! newline-delimited JSON framing shared with the stdio transport. The
//! container itself is expected to exist and be running; this transport
//! never creates or removes containers.

use tokio::process::{Child, Command};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use async_trait::async_trait;

use super::retry::{with_retry, RequestIdGenerator, RetryPolicy};
use super::stream::{attach_child, StreamCore};
use super::{Transport, TransportEvent, TransportStatus};
use crate::config::{ContainerEndpoint, TransportConfig, TransportKind};
use crate::error::TransportError;
use crate::types::{JsonRpcRequest, JsonRpcResponse};

pub struct ContainerTransport {
    endpoint: ContainerEndpoint,
    retry: RetryPolicy,
    core: StreamCore,
    child: Mutex<Option<Child>>,
    ids: RequestIdGenerator,
}

impl ContainerTransport {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let endpoint = match &config.endpoint {
            crate::config::Endpoint::Container(endpoint) => endpoint.clone(),
            other => {
                return Err(TransportError::configuration(format!(
                    "container transport given a {} endpoint",
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
        let mut command = Command::new(&self.endpoint.engine);
        command.args(exec_args(&self.endpoint));
        command
    }
}

/// Arguments for `<engine> exec`; env flags are sorted for a stable line
fn exec_args(endpoint: &ContainerEndpoint) -> Vec<String> {
    let mut args = vec!["exec".to_string(), "-i".to_string()];

    let mut env: Vec<_> = endpoint.env_vars.iter().collect();
    env.sort_by_key(|(key, _)| key.as_str());
    for (key, value) in env {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }

    args.push(endpoint.container.clone());
    args.push(endpoint.command.clone());
    args.extend(endpoint.args.iter().cloned());
    args
}

impl std::fmt::Debug for ContainerTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerTransport")
            .field("engine", &self.endpoint.engine)
            .field("container", &self.endpoint.container)
            .field("status", &self.core.status_cell().get())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for ContainerTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        // The child slot doubles as the connect lock so concurrent connects
        // cannot race two exec sessions onto one stream core
        let mut child_slot = self.child.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        self.core.status_cell().set(TransportStatus::Connecting);

        let label = format!("{} exec {}", self.endpoint.engine, self.endpoint.container);
        let connected = with_retry(&self.retry, || async {
            attach_child(&self.core, self.build_command(), &label).await
        })
        .await;

        match connected {
            Ok(child) => {
                *child_slot = Some(child);
                self.core.status_cell().set(TransportStatus::Connected);
                info!(container = %self.endpoint.container, "container transport connected");
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
                debug!(error = %err, "exec session already closed");
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
        TransportKind::Container
    }

    fn next_request_id(&self) -> i64 {
        self.ids.next_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Endpoint;
    use std::collections::HashMap;

    #[test]
    fn test_exec_args_shape() {
        let endpoint = ContainerEndpoint {
            engine: "podman".to_string(),
            container: "tools".to_string(),
            command: "mcp-server".to_string(),
            args: vec!["--verbose".to_string()],
            env_vars: HashMap::new(),
        };
        assert_eq!(
            exec_args(&endpoint),
            vec!["exec", "-i", "tools", "mcp-server", "--verbose"]
        );
    }

    #[test]
    fn test_env_flags_sorted_and_injected() {
        let mut env_vars = HashMap::new();
        env_vars.insert("ZED".to_string(), "1".to_string());
        env_vars.insert("API_KEY".to_string(), "secret".to_string());
        let endpoint = ContainerEndpoint {
            container: "tools".to_string(),
            command: "mcp-server".to_string(),
            env_vars,
            ..Default::default()
        };
        assert_eq!(
            exec_args(&endpoint),
            vec!["exec", "-i", "-e", "API_KEY=secret", "-e", "ZED=1", "tools", "mcp-server"]
        );
    }

    #[test]
    fn test_rejects_mismatched_endpoint() {
        let config =
            TransportConfig::new(Endpoint::Stdio(crate::config::StdioEndpoint::default()));
        let err = ContainerTransport::new(config).unwrap_err();
        assert!(matches!(err, TransportError::Configuration { .. }));
    }
}
