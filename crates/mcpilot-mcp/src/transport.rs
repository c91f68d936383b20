//! Stdio transport for MCP server communication.
//!
//! Spawns a child process and manages async communication over stdin/stdout
//! using newline-delimited JSON-RPC messages. Responses are matched to
//! requests by id, so several requests may be in flight at once.

use crate::config::ServerDescriptor;
use crate::error::{CallError, ConnectionError};
use crate::jsonrpc::{Incoming, JsonRpcResponse, Outgoing};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Async stdio transport for communicating with an MCP server process.
pub struct StdioTransport {
    server: String,
    next_id: AtomicU64,
    write_tx: std::sync::Mutex<Option<mpsc::Sender<String>>>,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
    child: Arc<Mutex<Child>>,
}

impl StdioTransport {
    /// Spawn the server process and start background reader/writer tasks.
    pub fn spawn(descriptor: &ServerDescriptor) -> Result<Self, ConnectionError> {
        let launch_failed = |source: std::io::Error| ConnectionError::LaunchFailed {
            server: descriptor.name.clone(),
            source,
        };

        let mut cmd = Command::new(&descriptor.command);
        cmd.args(&descriptor.args)
            .envs(&descriptor.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(launch_failed)?;

        let missing_pipe = || std::io::Error::other("child stdio was not piped");
        let stdin = child.stdin.take().ok_or_else(missing_pipe).map_err(launch_failed)?;
        let stdout = child.stdout.take().ok_or_else(missing_pipe).map_err(launch_failed)?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        // Writer task: drains channel and writes to child stdin
        let (write_tx, mut write_rx) = mpsc::channel::<String>(64);
        let writer_handle = tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = write_rx.recv().await {
                if stdin.write_all(msg.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.write_all(b"\n").await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        // Reader task: reads lines from stdout, dispatches responses by id
        let server = descriptor.name.clone();
        let pending_for_reader = Arc::clone(&pending);
        let alive_for_reader = Arc::clone(&alive);
        let reader_handle = tokio::spawn(async move {
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                let resp = match Incoming::parse(&line) {
                    Ok(Incoming::Response(resp)) => resp,
                    Ok(Incoming::ServerMessage { method }) => {
                        tracing::debug!(server = %server, method = %method, "Ignoring server-initiated message");
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(server = %server, "Failed to parse MCP message: {e}: {line}");
                        continue;
                    }
                };
                if let Some(id) = resp.id {
                    let mut pending = pending_for_reader.lock().await;
                    if let Some(tx) = pending.remove(&id) {
                        let _ = tx.send(resp);
                    }
                }
            }

            // stdout closed: the server is gone. Dropping the senders wakes
            // every waiting request.
            alive_for_reader.store(false, Ordering::SeqCst);
            pending_for_reader.lock().await.clear();
            tracing::debug!(server = %server, "MCP server output closed");
        });

        Ok(Self {
            server: descriptor.name.clone(),
            next_id: AtomicU64::new(1),
            write_tx: std::sync::Mutex::new(Some(write_tx)),
            pending,
            alive,
            reader_handle,
            writer_handle,
            child: Arc::new(Mutex::new(child)),
        })
    }

    /// Whether the server process is still connected.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn sender(&self) -> Result<mpsc::Sender<String>, CallError> {
        self.write_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| self.closed())
    }

    fn closed(&self) -> CallError {
        CallError::TransportClosed {
            server: self.server.clone(),
        }
    }

    /// Send a JSON-RPC request and wait up to `timeout` for the response.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, CallError> {
        if !self.is_alive() {
            return Err(self.closed());
        }
        let sender = self.sender()?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let serialized = Outgoing::request(id, method, params).to_line()?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            // The reader marks the transport dead before clearing `pending`,
            // so checking under the lock cannot miss an exit.
            if !self.is_alive() {
                return Err(self.closed());
            }
            pending.insert(id, tx);
        }

        if sender.send(serialized).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(self.closed());
        }

        tracing::debug!(server = %self.server, id, method, "Sent MCP request");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(self.closed()),
            Err(_) => {
                // Clean up pending entry on timeout
                self.pending.lock().await.remove(&id);
                Err(CallError::Timeout {
                    server: self.server.clone(),
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Send a JSON-RPC notification (fire-and-forget, no response expected).
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), CallError> {
        let serialized = Outgoing::notification(method, params).to_line()?;

        self.sender()?
            .send(serialized)
            .await
            .map_err(|_| self.closed())
    }

    /// Shut down the transport: close stdin, wait up to `grace`, then kill.
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self, grace: Duration) {
        // Dropping the only sender ends the writer task, which closes stdin.
        self.write_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.alive.store(false, Ordering::SeqCst);
        // The reader is aborted below and never reaches EOF, so wake any
        // in-flight requests here.
        self.pending.lock().await.clear();

        let graceful = tokio::time::timeout(grace, async {
            let mut child = self.child.lock().await;
            let _ = child.wait().await;
        })
        .await;

        if graceful.is_err() {
            tracing::warn!(
                server = %self.server,
                "MCP server did not exit within {}ms, killing it",
                grace.as_millis()
            );
            let mut child = self.child.lock().await;
            if let Err(e) = child.kill().await {
                tracing::warn!(server = %self.server, "Failed to kill MCP server: {e}");
            }
        }

        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}
