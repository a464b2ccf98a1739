//! Shared test utilities and fixtures
//!
//! An in-memory analysis server speaking the framed JSON-RPC protocol over
//! `tokio::io::duplex`, and an activation context backed by a temp dir.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lunalint_lsp::codec::{FrameReader, FrameWriter};
use lunalint_lsp::{
    ActivationContext, CommandHandler, Disposable, FileEventSink, HostError, ServerIo,
    ServerLauncher, ServerLocation, SessionManager, Subscriptions, disposable_fn,
};
use lunalint_types::ClientSettings;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncWrite};

/// How the fake server misbehaves, if at all.
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    pub initialize_delay: Duration,
    pub fail_initialize: bool,
    pub hang_initialize: bool,
    pub ignore_shutdown: bool,
}

#[derive(Default)]
struct ServerState {
    behavior: Behavior,
    live: AtomicUsize,
    peak_live: AtomicUsize,
    launches: AtomicUsize,
    received: Mutex<Vec<serde_json::Value>>,
}

/// Launcher that connects each session to a fresh in-memory server.
#[derive(Clone, Default)]
pub struct FakeServer {
    state: Arc<ServerState>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: Behavior) -> Self {
        Self {
            state: Arc::new(ServerState {
                behavior,
                ..ServerState::default()
            }),
        }
    }

    pub fn launcher(&self) -> Arc<dyn ServerLauncher> {
        Arc::new(self.clone())
    }

    pub fn manager(&self) -> SessionManager {
        SessionManager::with_launcher(ClientSettings::default(), self.launcher())
    }

    /// Connections that have not been asked to shut down and are still open.
    pub fn live(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    /// Most connections ever open at once.
    pub fn peak_live(&self) -> usize {
        self.state.peak_live.load(Ordering::SeqCst)
    }

    pub fn launches(&self) -> usize {
        self.state.launches.load(Ordering::SeqCst)
    }

    pub fn methods(&self) -> Vec<String> {
        self.state
            .received
            .lock()
            .unwrap()
            .iter()
            .map(|frame| frame["method"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn received(&self, method: &str) -> Vec<serde_json::Value> {
        self.state
            .received
            .lock()
            .unwrap()
            .iter()
            .filter(|frame| frame["method"] == method)
            .cloned()
            .collect()
    }

    /// Wait up to five seconds for `pred` to hold.
    pub async fn wait_for(&self, pred: impl Fn(&Self) -> bool) -> bool {
        for _ in 0..250 {
            if pred(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        pred(self)
    }
}

impl ServerLauncher for FakeServer {
    fn launch(&self, _location: &ServerLocation, _args: &[String]) -> anyhow::Result<ServerIo> {
        self.state.launches.fetch_add(1, Ordering::SeqCst);
        let live = self.state.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak_live.fetch_max(live, Ordering::SeqCst);

        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        tokio::spawn(serve(Arc::clone(&self.state), server_read, server_write));
        let (client_read, client_write) = tokio::io::split(client);
        Ok(ServerIo::from_streams(client_read, client_write))
    }
}

/// One diagnostic per line mentioning `bad` (error) or `todo` (warning).
fn lint(text: &str) -> Vec<serde_json::Value> {
    let mut diagnostics = Vec::new();
    for (line, content) in text.lines().enumerate() {
        let found = [("bad", 1, "bad token"), ("todo", 2, "unfinished work")]
            .into_iter()
            .find_map(|(needle, severity, message)| {
                content.find(needle).map(|col| (col, severity, message))
            });
        if let Some((col, severity, message)) = found {
            diagnostics.push(serde_json::json!({
                "range": {
                    "start": { "line": line, "character": col },
                    "end": { "line": line, "character": col + 3 }
                },
                "severity": severity,
                "source": "lunalintd",
                "message": message
            }));
        }
    }
    diagnostics
}

async fn serve(
    state: Arc<ServerState>,
    reader: impl AsyncRead + Unpin,
    writer: impl AsyncWrite + Unpin,
) {
    let mut reader = FrameReader::new(reader);
    let mut writer = FrameWriter::new(writer);
    let mut counted = true;

    while let Ok(Some(frame)) = reader.read_frame().await {
        let method = frame["method"].as_str().unwrap_or_default().to_string();
        state.received.lock().unwrap().push(frame.clone());
        let id = frame.get("id").cloned();

        let outgoing = match method.as_str() {
            "initialize" if state.behavior.hang_initialize => continue,
            "initialize" => {
                tokio::time::sleep(state.behavior.initialize_delay).await;
                if state.behavior.fail_initialize {
                    serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": { "code": -32603, "message": "workspace is not a Lua project" }
                    })
                } else {
                    serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": {
                            "capabilities": { "textDocumentSync": 1 },
                            "serverInfo": { "name": "lunalintd" }
                        }
                    })
                }
            }
            "shutdown" if state.behavior.ignore_shutdown => continue,
            "shutdown" => {
                // Released before the reply so a successor never overlaps.
                state.live.fetch_sub(1, Ordering::SeqCst);
                counted = false;
                serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": null })
            }
            "exit" => break,
            "textDocument/didSave" => {
                let uri = frame["params"]["textDocument"]["uri"].clone();
                let text = frame["params"]["text"].as_str().unwrap_or_default();
                serde_json::json!({
                    "jsonrpc": "2.0",
                    "method": "textDocument/publishDiagnostics",
                    "params": { "uri": uri, "diagnostics": lint(text) }
                })
            }
            _ if id.is_some() => serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": null }),
            _ => continue,
        };

        if writer.write_frame(&outgoing).await.is_err() {
            break;
        }
    }

    if counted {
        state.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Activation context over a temporary workspace.
pub struct TestContext {
    workspace: TempDir,
    extension_root: Option<PathBuf>,
    subscriptions: Subscriptions,
    commands: Arc<Mutex<Vec<String>>>,
    sinks: Mutex<Vec<FileEventSink>>,
    watchers_disposed: Arc<AtomicUsize>,
}

impl TestContext {
    pub fn new() -> Self {
        let workspace = tempfile::tempdir().unwrap();
        let extension_root = Some(workspace.path().join("ext"));
        Self::build(workspace, extension_root)
    }

    pub fn without_extension_root() -> Self {
        Self::build(tempfile::tempdir().unwrap(), None)
    }

    fn build(workspace: TempDir, extension_root: Option<PathBuf>) -> Self {
        Self {
            workspace,
            extension_root,
            subscriptions: Subscriptions::new(),
            commands: Arc::new(Mutex::new(Vec::new())),
            sinks: Mutex::new(Vec::new()),
            watchers_disposed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Write `text` under the workspace and return the absolute path.
    pub fn write(&self, relative: &str, text: &str) -> PathBuf {
        let path = self.workspace.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, text).unwrap();
        path
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// The most recently created watcher sink.
    pub fn last_sink(&self) -> Option<FileEventSink> {
        self.sinks.lock().unwrap().last().cloned()
    }

    pub fn watchers_disposed(&self) -> usize {
        self.watchers_disposed.load(Ordering::SeqCst)
    }
}

impl ActivationContext for TestContext {
    fn extension_root(&self) -> Option<&Path> {
        self.extension_root.as_deref()
    }

    fn workspace_root(&self) -> &Path {
        self.workspace.path()
    }

    fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    fn create_file_watcher(&self, sink: FileEventSink) -> Result<Box<dyn Disposable>, HostError> {
        self.sinks.lock().unwrap().push(sink);
        let disposed = Arc::clone(&self.watchers_disposed);
        Ok(disposable_fn(move || {
            disposed.fetch_add(1, Ordering::SeqCst);
        }))
    }

    fn register_command(
        &self,
        command: &str,
        _handler: CommandHandler,
    ) -> Result<Box<dyn Disposable>, HostError> {
        let mut commands = self.commands.lock().unwrap();
        if commands.iter().any(|c| c == command) {
            return Err(HostError::DuplicateCommand(command.to_string()));
        }
        commands.push(command.to_string());
        let registry = Arc::clone(&self.commands);
        let command = command.to_string();
        Ok(disposable_fn(move || {
            registry.lock().unwrap().retain(|c| *c != command);
        }))
    }
}

/// Drain events until `pred` holds, for up to five seconds.
pub async fn poll_until(manager: &mut SessionManager, pred: impl Fn(&SessionManager) -> bool) -> bool {
    for _ in 0..250 {
        manager.poll_events(256);
        if pred(manager) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
