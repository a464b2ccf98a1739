//! One connected language client: the channel tasks, request routing and
//! document versioning for a single server.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::codec::{FrameReader, FrameWriter};
use crate::launcher::ServerIo;
use crate::location::normalize_path;
use crate::protocol::{self, LogMessageParams, Notification, PublishDiagnosticsParams, Request};
use crate::types::{FileEvent, ServerStopReason, SessionEvent, SessionId};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const EXIT_GRACE: Duration = Duration::from_secs(2);

const WRITER_CHANNEL_CAPACITY: usize = 64;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>>;

enum WriterCommand {
    Send(serde_json::Value),
    Close,
}

enum IncomingFrame {
    Response {
        id: u64,
        body: serde_json::Value,
    },
    ServerRequest {
        id: serde_json::Value,
        method: String,
    },
    Notification {
        method: String,
        params: Option<serde_json::Value>,
    },
}

fn parse_incoming(frame: &serde_json::Value) -> Option<IncomingFrame> {
    let id = frame.get("id");
    let method = frame
        .get("method")
        .and_then(serde_json::Value::as_str)
        .map(String::from);
    let is_reply = frame.get("result").is_some() || frame.get("error").is_some();

    match (id, method, is_reply) {
        (Some(id), None, true) => Some(IncomingFrame::Response {
            id: id.as_u64()?,
            body: frame.clone(),
        }),
        (Some(id), Some(method), _) => Some(IncomingFrame::ServerRequest {
            id: id.clone(),
            method,
        }),
        (None, Some(method), _) => Some(IncomingFrame::Notification {
            method,
            params: frame.get("params").cloned(),
        }),
        _ => None,
    }
}

/// Identity carried into the channel tasks.
#[derive(Clone)]
struct ChannelOrigin {
    session: SessionId,
    name: String,
    workspace_root: PathBuf,
}

/// A handshaken client. Holding one is proof `initialize` succeeded.
pub(crate) struct LanguageClient {
    origin: ChannelOrigin,
    language_id: String,
    child: Option<Child>,
    writer_tx: mpsc::Sender<WriterCommand>,
    next_id: u64,
    pending: PendingMap,
    /// Open documents and their last sent version.
    versions: HashMap<String, i32>,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
}

impl LanguageClient {
    /// Wire up the channel tasks and run the `initialize` handshake.
    ///
    /// The returned receiver fires once when the server closes its side of
    /// the channel.
    pub async fn start(
        session: SessionId,
        name: &str,
        language_id: &str,
        io: ServerIo,
        workspace_root: &Path,
        event_tx: mpsc::Sender<SessionEvent>,
    ) -> Result<(Self, oneshot::Receiver<ServerStopReason>)> {
        let origin = ChannelOrigin {
            session,
            name: name.to_string(),
            workspace_root: normalize_path(workspace_root),
        };
        let (reader, writer, child) = io.into_parts();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (writer_tx, writer_rx) = mpsc::channel(WRITER_CHANNEL_CAPACITY);
        let (exit_tx, exit_rx) = oneshot::channel();

        let writer_handle = tokio::spawn(Self::write_loop(writer, writer_rx, origin.name.clone()));
        let reader_handle = tokio::spawn(Self::read_loop(
            reader,
            Arc::clone(&pending),
            event_tx,
            writer_tx.clone(),
            origin.clone(),
            exit_tx,
        ));

        let mut client = Self {
            origin,
            language_id: language_id.to_string(),
            child,
            writer_tx,
            next_id: 1,
            pending,
            versions: HashMap::new(),
            reader_handle,
            writer_handle,
        };

        client.initialize().await?;
        Ok((client, exit_rx))
    }

    async fn write_loop(
        writer: impl AsyncWrite + Unpin,
        mut rx: mpsc::Receiver<WriterCommand>,
        name: String,
    ) {
        let mut writer = FrameWriter::new(writer);
        while let Some(cmd) = rx.recv().await {
            match cmd {
                WriterCommand::Send(frame) => {
                    if let Err(e) = writer.write_frame(&frame).await {
                        tracing::warn!(server = %name, "Channel write error: {e}");
                        break;
                    }
                }
                WriterCommand::Close => {
                    let _ = writer.close().await;
                    break;
                }
            }
        }
    }

    async fn read_loop(
        reader: impl AsyncRead + Unpin,
        pending: PendingMap,
        event_tx: mpsc::Sender<SessionEvent>,
        writer_tx: mpsc::Sender<WriterCommand>,
        origin: ChannelOrigin,
        exit_tx: oneshot::Sender<ServerStopReason>,
    ) {
        let mut reader = FrameReader::new(reader);
        let reason = loop {
            match reader.read_frame().await {
                Ok(Some(frame)) => {
                    Self::dispatch_frame(&frame, &pending, &event_tx, &writer_tx, &origin).await;
                }
                Ok(None) => {
                    tracing::info!(server = %origin.name, "Server closed its output");
                    break ServerStopReason::Exited;
                }
                Err(e) => {
                    tracing::warn!(server = %origin.name, "Channel read error: {e}");
                    break ServerStopReason::Failed(e.to_string());
                }
            }
        };
        // Fail outstanding requests now instead of at their timeout.
        pending.lock().await.clear();
        let _ = exit_tx.send(reason);
    }

    async fn dispatch_frame(
        frame: &serde_json::Value,
        pending: &Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>,
        event_tx: &mpsc::Sender<SessionEvent>,
        writer_tx: &mpsc::Sender<WriterCommand>,
        origin: &ChannelOrigin,
    ) {
        let Some(incoming) = parse_incoming(frame) else {
            tracing::trace!(server = %origin.name, "Ignoring malformed JSON-RPC frame");
            return;
        };

        match incoming {
            IncomingFrame::Response { id, body } => {
                let sender = pending.lock().await.remove(&id);
                if let Some(tx) = sender {
                    let _ = tx.send(body);
                }
            }
            IncomingFrame::ServerRequest { id, method } => {
                // Unanswered requests can stall the server.
                tracing::debug!(server = %origin.name, "Server sent request {method}, replying method not found");
                let reply = protocol::method_not_found(&id, &method);
                let _ = writer_tx.send(WriterCommand::Send(reply)).await;
            }
            IncomingFrame::Notification { method, params } => {
                Self::handle_notification(&method, params, event_tx, origin).await;
            }
        }
    }

    async fn handle_notification(
        method: &str,
        params: Option<serde_json::Value>,
        event_tx: &mpsc::Sender<SessionEvent>,
        origin: &ChannelOrigin,
    ) {
        let server = origin.name.as_str();
        match method {
            "textDocument/publishDiagnostics" => {
                let Some(params) = params else { return };
                let params = match serde_json::from_value::<PublishDiagnosticsParams>(params) {
                    Ok(params) => params,
                    Err(e) => {
                        tracing::debug!(server, "Malformed publishDiagnostics: {e}");
                        return;
                    }
                };
                let Some(path) = protocol::file_uri_to_path(&params.uri) else {
                    tracing::debug!(server, uri = %params.uri, "Diagnostics for non-file URI");
                    return;
                };
                if !normalize_path(&path).starts_with(&origin.workspace_root) {
                    tracing::warn!(
                        server,
                        path = %path.display(),
                        "Ignoring diagnostics for path outside workspace"
                    );
                    return;
                }
                let items = params
                    .diagnostics
                    .iter()
                    .map(protocol::WireDiagnostic::to_lint_diagnostic)
                    .collect();
                let _ = event_tx
                    .send(SessionEvent::Diagnostics {
                        session: origin.session,
                        path,
                        items,
                    })
                    .await;
            }
            "window/logMessage" | "window/showMessage" => {
                let Some(params) = params else { return };
                match serde_json::from_value::<LogMessageParams>(params) {
                    Ok(LogMessageParams { kind: 1, message }) => {
                        tracing::error!(server, "{message}");
                    }
                    Ok(LogMessageParams { kind: 2, message }) => {
                        tracing::warn!(server, "{message}");
                    }
                    Ok(LogMessageParams { kind: 3, message }) => {
                        tracing::info!(server, "{message}");
                    }
                    Ok(LogMessageParams { message, .. }) => tracing::debug!(server, "{message}"),
                    Err(e) => tracing::debug!(server, "Malformed {method}: {e}"),
                }
            }
            _ => {
                tracing::trace!(server, "Ignoring notification {method}");
            }
        }
    }

    async fn initialize(&mut self) -> Result<()> {
        let root_uri = protocol::path_to_file_uri(&self.origin.workspace_root)
            .context("converting workspace root to URI")?;

        let params = protocol::initialize_params(
            root_uri.as_str(),
            &self.origin.name,
            env!("CARGO_PKG_VERSION"),
        );
        let response = self.send_request("initialize", Some(params)).await?;

        if let Some(error) = response.get("error") {
            bail!(
                "initialize failed: {}",
                error["message"].as_str().unwrap_or("unknown error")
            );
        }

        self.send_notification("initialized", Some(serde_json::json!({})))
            .await
    }

    async fn send_request(
        &mut self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let id = self.next_id;
        self.next_id += 1;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = serde_json::to_value(Request::new(id, method, params))
            .context("serializing request")?;
        if self
            .writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .is_err()
        {
            self.pending.lock().await.remove(&id);
            bail!("writer channel closed");
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&id);
                bail!("server closed the channel before answering {method}");
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                bail!("{method} timed out after {}s", REQUEST_TIMEOUT.as_secs());
            }
        }
    }

    async fn send_notification(
        &self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<()> {
        let frame = serde_json::to_value(Notification::new(method, params))
            .context("serializing notification")?;
        self.writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .map_err(|_| anyhow!("writer channel closed"))
    }

    /// Next sync notification for `uri`: `didOpen` at version 1 on first
    /// sight, otherwise `didChange` with the version bumped.
    fn next_sync(&mut self, uri: &str, text: &str) -> (&'static str, serde_json::Value) {
        if let Some(version) = self.versions.get_mut(uri) {
            *version += 1;
            let params = protocol::did_change_params(uri, *version, text);
            return ("textDocument/didChange", params);
        }
        self.versions.insert(uri.to_string(), 1);
        let params = protocol::did_open_params(uri, &self.language_id, 1, text);
        ("textDocument/didOpen", params)
    }

    /// Full-text change. Opens the document first if it was never opened.
    pub async fn did_change(&mut self, uri: &str, text: &str) -> Result<()> {
        let (method, params) = self.next_sync(uri, text);
        self.send_notification(method, Some(params)).await
    }

    /// Opening an already-open document re-sends it as a change.
    pub async fn did_open(&mut self, uri: &str, text: &str) -> Result<()> {
        let (method, params) = self.next_sync(uri, text);
        self.send_notification(method, Some(params)).await
    }

    pub async fn did_save(&mut self, uri: &str, text: &str) -> Result<()> {
        if !self.versions.contains_key(uri) {
            self.did_open(uri, text).await?;
        }
        let params = protocol::did_save_params(uri, text);
        self.send_notification("textDocument/didSave", Some(params))
            .await
    }

    /// No-op for documents that were never opened.
    pub async fn did_close(&mut self, uri: &str) -> Result<()> {
        if self.versions.remove(uri).is_none() {
            return Ok(());
        }
        let params = protocol::did_close_params(uri);
        self.send_notification("textDocument/didClose", Some(params))
            .await
    }

    pub async fn did_change_watched_files(&self, events: &[FileEvent]) -> Result<()> {
        let params = protocol::did_change_watched_files_params(events);
        self.send_notification("workspace/didChangeWatchedFiles", Some(params))
            .await
    }

    /// `shutdown` then `exit`, close the pipe, and give the child
    /// [`EXIT_GRACE`] before killing it.
    pub async fn shutdown(mut self) {
        match self.send_request("shutdown", None).await {
            Ok(response) if response.get("error").is_none() => {
                let _ = self.send_notification("exit", None).await;
            }
            Ok(_) => tracing::debug!(server = %self.origin.name, "shutdown request was rejected"),
            Err(e) => tracing::debug!(server = %self.origin.name, "shutdown request failed: {e:#}"),
        }

        let _ = self.writer_tx.send(WriterCommand::Close).await;
        let _ = tokio::time::timeout(EXIT_GRACE, &mut self.writer_handle).await;

        if let Some(child) = self.child.as_mut() {
            match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(server = %self.origin.name, %status, "Server exited");
                }
                Ok(Err(e)) => {
                    tracing::debug!(server = %self.origin.name, "Waiting for server failed: {e}");
                }
                Err(_) => {
                    tracing::debug!(server = %self.origin.name, "Server didn't exit in time, killing");
                    let _ = child.kill().await;
                }
            }
        }
        self.reader_handle.abort();
    }
}

impl Drop for LanguageClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}
