//! Transport for servers launched on a remote host through the ssh client
//!
//! The remote process is started with the system `ssh` binary so that host
//! keys, agents and proxy configuration behave exactly as they do for the
//! operator's interactive sessions. Key-file auth passes `-i` and BatchMode;
//! password auth wraps the invocation in `sshpass`, which must be installed
//! on the local host. Once the session is up the framing is identical to the
//! stdio transport: newline-delimited JSON over the session's stdio.

use tokio::process::{Child, Command};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use async_trait::async_trait;

use super::retry::{with_retry, RequestIdGenerator, RetryPolicy};
use super::stream::{attach_child, StreamCore};
use super::{Transport, TransportEvent, TransportStatus};
use crate::config::{SshEndpoint, TransportConfig, TransportKind};
use crate::error::TransportError;
use crate::types::{JsonRpcRequest, JsonRpcResponse};

pub struct SshTransport {
    endpoint: SshEndpoint,
    retry: RetryPolicy,
    core: StreamCore,
    child: Mutex<Option<Child>>,
    ids: RequestIdGenerator,
}

impl SshTransport {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let endpoint = match &config.endpoint {
            crate::config::Endpoint::Ssh(endpoint) => endpoint.clone(),
            other => {
                return Err(TransportError::configuration(format!(
                    "ssh transport given a {} endpoint",
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
        let (program, args) = command_line(&self.endpoint);
        let mut command = Command::new(program);
        command.args(args);
        command
    }
}

/// The (program, args) pair launching the remote server
///
/// The remote command is shell-quoted as one argument so that arguments
/// containing spaces survive the remote shell.
fn command_line(endpoint: &SshEndpoint) -> (String, Vec<String>) {
    let mut args = Vec::new();

    if let Some(password) = &endpoint.password {
        args.push("-p".to_string());
        args.push(password.clone());
        args.push("ssh".to_string());
    }

    args.push("-p".to_string());
    args.push(endpoint.port.to_string());
    args.push("-o".to_string());
    args.push("StrictHostKeyChecking=accept-new".to_string());

    if let Some(key) = &endpoint.private_key_path {
        args.push("-i".to_string());
        args.push(key.clone());
        args.push("-o".to_string());
        args.push("BatchMode=yes".to_string());
    }

    args.push(format!("{}@{}", endpoint.username, endpoint.host));

    let remote: Vec<&str> = std::iter::once(endpoint.command.as_str())
        .chain(endpoint.args.iter().map(String::as_str))
        .collect();
    args.push(shell_words::join(remote));

    let program = if endpoint.password.is_some() {
        "sshpass"
    } else {
        "ssh"
    };
    (program.to_string(), args)
}

impl std::fmt::Debug for SshTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTransport")
            .field("host", &self.endpoint.host)
            .field("username", &self.endpoint.username)
            .field("status", &self.core.status_cell().get())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        // The child slot doubles as the connect lock so concurrent connects
        // cannot race two sessions onto one stream core
        let mut child_slot = self.child.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        self.core.status_cell().set(TransportStatus::Connecting);

        let label = format!("ssh {}@{}", self.endpoint.username, self.endpoint.host);
        let connected = with_retry(&self.retry, || async {
            attach_child(&self.core, self.build_command(), &label).await
        })
        .await;

        match connected {
            Ok(child) => {
                *child_slot = Some(child);
                self.core.status_cell().set(TransportStatus::Connected);
                info!(host = %self.endpoint.host, "ssh transport connected");
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
                debug!(error = %err, "ssh session already closed");
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
        TransportKind::Ssh
    }

    fn next_request_id(&self) -> i64 {
        self.ids.next_id()
    }
}
