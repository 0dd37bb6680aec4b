//! TCP server for client↔control-plane requests.
//!
//! The server listens on `127.0.0.1:<port>`. Each connection follows the same
//! request/response shape:
//!
//! 1. Client connects
//! 2. Client writes one JSON line (newline-terminated [`ToolRequest`])
//! 3. Server writes one JSON line (newline-terminated [`ToolResponse`])
//! 4. Server closes the connection
//!
//! Connections are handled concurrently, one task each. Shutdown stops the
//! accept loop, gives in-flight handlers a grace period and then aborts them.

use crate::context::ExecutionContext;
use crate::tools::ToolRegistry;
use hostlink_core::config::ServerConfig;
use hostlink_core::protocol::{PROTOCOL_VERSION, ToolRequest, ToolResponse, ToolStatus};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// ── Request handling ─────────────────────────────────────────────────────────

/// Decodes request lines and routes them to the tool registry.
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    ctx: ExecutionContext,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, ctx: ExecutionContext) -> Self {
        Self { registry, ctx }
    }

    /// Produce the response for one raw request line. Never fails: anything
    /// that cannot be served becomes an `error` response.
    pub async fn handle_line(&self, line: &str) -> ToolResponse {
        let request: ToolRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                warn!("Malformed control-plane request: {e}");
                return error_response(salvage_request_id(line), format!("Malformed request: {e}"));
            }
        };

        if request.version != PROTOCOL_VERSION {
            return error_response(
                request.request_id,
                format!(
                    "Unsupported protocol version {}; server supports {PROTOCOL_VERSION}",
                    request.version
                ),
            );
        }

        let reply = self
            .registry
            .dispatch(&request.tool, &self.ctx, request.arguments)
            .await;
        debug!(
            tool = %request.tool,
            request_id = %request.request_id,
            status = ?reply.status,
            "tool call answered"
        );
        ToolResponse {
            version: PROTOCOL_VERSION,
            request_id: request.request_id,
            status: reply.status,
            message: reply.message,
            payload: reply.payload,
        }
    }
}

fn error_response(request_id: String, message: String) -> ToolResponse {
    ToolResponse {
        version: PROTOCOL_VERSION,
        request_id,
        status: ToolStatus::Error,
        message,
        payload: None,
    }
}

/// Best-effort `request_id` from a line that is JSON but not a valid request.
fn salvage_request_id(line: &str) -> String {
    serde_json::from_str::<serde_json::Value>(line)
        .ok()
        .and_then(|v| v.get("request_id")?.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// The peer went away mid-exchange. Expected with impatient clients; never
/// worth more than a debug line.
pub fn is_client_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
    )
}

// ── Server lifecycle ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerOptions {
    /// How long a connection may take to deliver its request line.
    pub request_read_timeout: Duration,
    /// How long shutdown waits for in-flight handlers before aborting them.
    pub shutdown_grace: Duration,
}

impl From<&ServerConfig> for ServerOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            request_read_timeout: config.request_read_timeout(),
            shutdown_grace: config.shutdown_grace(),
        }
    }
}

/// A handle to the running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// The accept loop is still running.
    pub fn is_alive(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop accepting, drain in-flight connections within the grace period,
    /// and wait for the accept task to exit. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        let Some(task) = self.task.take() else {
            return;
        };
        if let Err(e) = task.await {
            if e.is_panic() {
                error!("Control-plane accept loop panicked: {e}");
            }
        }
    }

    /// Kill the accept loop without draining, as a crash would.
    #[cfg(any(test, feature = "test-support"))]
    pub fn abort(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Start serving on an already-bound listener.
///
/// Must be called from within a tokio runtime context.
pub fn spawn(
    listener: std::net::TcpListener,
    dispatcher: Dispatcher,
    options: ServerOptions,
) -> io::Result<ServerHandle> {
    listener.set_nonblocking(true)?;
    let listener = TcpListener::from_std(listener)?;
    let local_addr = listener.local_addr()?;
    let cancel = CancellationToken::new();

    info!("Control-plane server listening on {local_addr}");
    let task = tokio::spawn(run_accept_loop(
        listener,
        Arc::new(dispatcher),
        options,
        cancel.clone(),
    ));

    Ok(ServerHandle {
        local_addr,
        cancel,
        task: Some(task),
    })
}

async fn run_accept_loop(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    options: ServerOptions,
    cancel: CancellationToken,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Control-plane server cancelled");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let dispatcher = Arc::clone(&dispatcher);
                        let read_timeout = options.request_read_timeout;
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(stream, &dispatcher, read_timeout).await {
                                if is_client_disconnect(&e) {
                                    debug!(%peer, "client disconnected: {e}");
                                } else {
                                    warn!(%peer, "connection handler error: {e}");
                                }
                            }
                        });
                    }
                    Err(e) if is_client_disconnect(&e) => {
                        debug!("client went away during accept: {e}");
                    }
                    Err(e) => {
                        error!("Accept error on control-plane listener: {e}");
                        // Brief pause before retrying to avoid a tight error loop
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    // Release the port before draining so a restart can bind it.
    drop(listener);

    if connections.is_empty() {
        return;
    }
    let drained = tokio::time::timeout(options.shutdown_grace, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            remaining = connections.len(),
            "in-flight requests did not finish within {:?}; aborting", options.shutdown_grace
        );
        connections.abort_all();
        while connections.join_next().await.is_some() {}
    }
}

async fn handle_connection(
    stream: TcpStream,
    dispatcher: &Dispatcher,
    read_timeout: Duration,
) -> io::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();

    let response = match tokio::time::timeout(read_timeout, reader.read_line(&mut request_line)).await
    {
        Ok(Ok(0)) => {
            debug!("Client disconnected without sending a request");
            return Ok(());
        }
        Ok(Ok(_)) => dispatcher.handle_line(request_line.trim()).await,
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            debug!("Timed out waiting for a request line");
            error_response(
                String::new(),
                format!("No request received within {read_timeout:?}"),
            )
        }
    };

    let mut response_json = serde_json::to_string(&response).map_err(io::Error::other)?;
    response_json.push('\n');

    let mut stream = reader.into_inner();
    stream.write_all(response_json.as_bytes()).await?;
    stream.flush().await?;
    // The client may already have hung up after reading its line.
    let _ = stream.shutdown().await;
    Ok(())
}
