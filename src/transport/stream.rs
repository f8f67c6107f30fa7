//! Shared core for stream-based transports
//!
//! The stdio, ssh and container transports all speak newline-delimited
//! JSON-RPC over a persistent byte stream; this module owns the parts they
//! share: the pending-request table, the line codec and the background
//! reader/writer tasks.
//!
//! Responses on a persistent stream are not guaranteed to arrive in send
//! order, so correlation is strictly by request id. A line that fails to
//! parse, or a response whose id matches no pending entry, is logged and
//! dropped without affecting the stream or any other pending request. On
//! stream close every remaining pending request is rejected with a
//! "transport disconnected" error and the table is cleared.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{StatusCell, TransportStatus};
use crate::error::TransportError;
use crate::types::{JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, RequestId};

type Responder = oneshot::Sender<Result<JsonRpcResponse, TransportError>>;
type PendingTable = Arc<Mutex<HashMap<RequestId, Responder>>>;
type SharedWriter = Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>;

/// Framing, correlation and lifecycle shared by the process transports
pub(crate) struct StreamCore {
    status: StatusCell,
    pending: PendingTable,
    write_tx: SharedWriter,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    request_timeout: Duration,
}

impl StreamCore {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            status: StatusCell::new(),
            pending: Arc::new(Mutex::new(HashMap::new())),
            write_tx: Arc::new(Mutex::new(None)),
            tasks: Mutex::new(Vec::new()),
            request_timeout,
        }
    }

    pub fn status_cell(&self) -> &StatusCell {
        &self.status
    }

    /// Wire the core to a byte stream, spawning the reader and writer tasks
    ///
    /// The writer drains an unbounded channel of serialized lines; the
    /// reader parses complete lines and correlates responses until EOF or an
    /// I/O error, at which point it rejects all pending requests and moves
    /// the status to Disconnected (clean EOF) or Error (I/O failure).
    pub async fn attach<R, W>(&self, reader: R, writer: W)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<String>();
        *self.write_tx.lock().await = Some(write_tx);

        let pending = Arc::clone(&self.pending);
        let write_tx_slot = Arc::clone(&self.write_tx);
        let status = self.status.clone();
        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(line) = write_rx.recv().await {
                let written = match writer.write_all(line.as_bytes()).await {
                    Ok(()) => writer.flush().await,
                    Err(err) => Err(err),
                };
                if let Err(err) = written {
                    // A dead write side means every in-flight request is
                    // lost; reject them now instead of letting each one run
                    // out its timeout
                    warn!(error = %err, "failed to write to transport stream");
                    write_tx_slot.lock().await.take();
                    fail_pending(&pending).await;
                    status.emit_error(err.to_string());
                    status.set(TransportStatus::Error);
                    break;
                }
            }
        });

        let pending = Arc::clone(&self.pending);
        let write_tx = Arc::clone(&self.write_tx);
        let status = self.status.clone();
        let reader_task = tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut line = String::new();
            let final_status = loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!("transport stream reached EOF");
                        break TransportStatus::Disconnected;
                    }
                    Ok(_) => handle_line(line.trim(), &pending).await,
                    Err(err) => {
                        warn!(error = %err, "error reading from transport stream");
                        status.emit_error(err.to_string());
                        break TransportStatus::Error;
                    }
                }
            };
            write_tx.lock().await.take();
            fail_pending(&pending).await;
            status.set(final_status);
        });

        self.tasks
            .lock()
            .await
            .extend([writer_task, reader_task]);
    }

    /// Send one request and await the response carrying the same id
    pub async fn send_request(
        &self,
        request: JsonRpcRequest,
    ) -> Result<JsonRpcResponse, TransportError> {
        if self.status.get() != TransportStatus::Connected {
            return Err(TransportError::NotConnected);
        }

        let line = format!("{}\n", serde_json::to_string(&request)?);
        let id = request.id.clone();

        // Register before writing so a fast response cannot slip past us
        let (response_tx, response_rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            match pending.entry(id.clone()) {
                Entry::Occupied(_) => {
                    return Err(TransportError::protocol(format!(
                        "request id {} is already pending",
                        id
                    )));
                }
                Entry::Vacant(slot) => {
                    slot.insert(response_tx);
                }
            }
        }

        let sent = match self.write_tx.lock().await.as_ref() {
            Some(tx) => tx.send(line).is_ok(),
            None => false,
        };
        if !sent {
            self.pending.lock().await.remove(&id);
            return Err(TransportError::connection(
                "failed to write to transport stream",
            ));
        }

        match tokio::time::timeout(self.request_timeout, response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::disconnected()),
            Err(_) => {
                // A timeout cancels only this request; the connection and
                // every other in-flight request survive
                self.pending.lock().await.remove(&id);
                Err(TransportError::timeout(self.request_timeout))
            }
        }
    }

    /// Stop the background tasks, reject all pending requests and settle the
    /// status
    pub async fn detach(&self, final_status: TransportStatus) {
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        self.write_tx.lock().await.take();
        fail_pending(&self.pending).await;
        self.status.set(final_status);
    }

    #[cfg(test)]
    async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }
}

async fn handle_line(line: &str, pending: &PendingTable) {
    if line.is_empty() {
        return;
    }
    match serde_json::from_str::<JsonRpcMessage>(line) {
        Ok(JsonRpcMessage::Response(response)) => {
            let responder = pending.lock().await.remove(&response.id);
            match responder {
                Some(tx) => {
                    let _ = tx.send(Ok(response));
                }
                None => {
                    warn!(id = %response.id, "response matches no pending request, dropping");
                }
            }
        }
        Ok(JsonRpcMessage::Notification(notification)) => {
            debug!(method = %notification.method, "notification from server");
        }
        Ok(JsonRpcMessage::Request(request)) => {
            warn!(method = %request.method, "unexpected request from server, dropping");
        }
        Err(err) => {
            // Protocol tolerance: one bad line must not poison the stream
            warn!(error = %err, "malformed line from server, dropping");
        }
    }
}

async fn fail_pending(pending: &PendingTable) {
    let mut table = pending.lock().await;
    for (_, responder) in table.drain() {
        let _ = responder.send(Err(TransportError::disconnected()));
    }
}

/// Spawn a line-speaking child process and wire its stdio into the core
///
/// Used by every process transport; only the `Command` differs. Spawn
/// failure is a connection failure, never a request failure. The child's
/// stderr is drained to the log so server diagnostics are not lost.
pub(crate) async fn attach_child(
    core: &StreamCore,
    mut command: Command,
    label: &str,
) -> Result<Child, TransportError> {
    command
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|err| {
        TransportError::connection(format!("failed to spawn {}: {}", label, err))
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| TransportError::connection(format!("no stdin handle for {}", label)))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| TransportError::connection(format!("no stdout handle for {}", label)))?;

    if let Some(stderr) = child.stderr.take() {
        let label = label.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(process = %label, "stderr: {}", line);
            }
        });
    }

    core.attach(stdout, stdin).await;
    Ok(child)
}
