//! One session: a spawned task that owns the language client from launch
//! to teardown.
//!
//! The task is the only place the client lives. The manager talks to it
//! through a command queue and a stop signal, and observes it through a
//! `watch` channel carrying [`SessionState`].

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::client::LanguageClient;
use crate::launcher::ServerLauncher;
use crate::location::ServerLocation;
use crate::scope::ChannelConfig;
use crate::types::{FileEvent, ServerStopReason, SessionEvent, SessionId, SessionState};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("server failed to start: {0}")]
    Start(String),
    #[error("no session is active")]
    NoSession,
    #[error("session stopped before it was running")]
    Stopped,
    #[error("session task was aborted")]
    Aborted,
    #[error("session did not shut down within {}ms", .0.as_millis())]
    ShutdownTimedOut(Duration),
}

/// Work queued for the session task.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    Open { uri: String, text: String },
    Change { uri: String, text: String },
    Save { uri: String, text: String },
    Close { uri: String },
    WatchedFiles(Vec<FileEvent>),
}

/// Everything needed to launch and identify one session.
pub(crate) struct SessionSpec {
    pub id: SessionId,
    pub name: String,
    pub display_name: String,
    pub location: ServerLocation,
    pub args: Vec<String>,
    pub channel: ChannelConfig,
    pub workspace_root: PathBuf,
}

pub(crate) struct Session {
    id: SessionId,
    location: ServerLocation,
    channel: ChannelConfig,
    commands: mpsc::Sender<SessionCommand>,
    stop_tx: Option<oneshot::Sender<()>>,
    state_rx: watch::Receiver<SessionState>,
    task: JoinHandle<()>,
}

impl Session {
    /// Spawn the session task and return immediately.
    ///
    /// When `previous` is given, the new server is not launched until that
    /// shutdown has finished.
    pub fn start(
        spec: SessionSpec,
        launcher: Arc<dyn ServerLauncher>,
        previous: Option<Shutdown>,
        commands: (mpsc::Sender<SessionCommand>, mpsc::Receiver<SessionCommand>),
        event_tx: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let (commands_tx, commands_rx) = commands;
        let (stop_tx, stop_rx) = oneshot::channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Starting);

        let id = spec.id;
        let location = spec.location.clone();
        let channel = spec.channel.clone();
        let task = tokio::spawn(run(SessionTask {
            spec,
            launcher,
            previous,
            stop_rx,
            commands_rx,
            event_tx,
            state_tx,
        }));

        Self {
            id,
            location,
            channel,
            commands: commands_tx,
            stop_tx: Some(stop_tx),
            state_rx,
            task,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn location(&self) -> &ServerLocation {
        &self.location
    }

    pub fn channel(&self) -> &ChannelConfig {
        &self.channel
    }

    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Queue a command. Returns `false` once the task has ended.
    pub async fn send(&self, command: SessionCommand) -> bool {
        self.commands.send(command).await.is_ok()
    }

    /// Request a graceful stop. A stop requested while the handshake is in
    /// flight takes effect once it finishes.
    pub fn stop(mut self) -> Shutdown {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        Shutdown {
            session: self.id,
            task: self.task,
        }
    }
}

/// Completion of a requested stop.
///
/// Resolves once the session task has finished: after the shutdown
/// handshake and child exit, or at once if the server was already gone.
/// Dropping it without awaiting is fine; the stop still runs.
#[derive(Debug)]
#[must_use = "dropping a Shutdown detaches it; await it to wait for the server to exit"]
pub struct Shutdown {
    session: SessionId,
    task: JoinHandle<()>,
}

impl Shutdown {
    #[must_use]
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Cancel the stop. The client is dropped and the child killed.
    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Future for Shutdown {
    type Output = Result<(), SessionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task).poll(cx).map(|joined| {
            joined.map_err(|e| {
                if e.is_panic() {
                    tracing::error!("Session task panicked: {e}");
                }
                SessionError::Aborted
            })
        })
    }
}

struct SessionTask {
    spec: SessionSpec,
    launcher: Arc<dyn ServerLauncher>,
    previous: Option<Shutdown>,
    stop_rx: oneshot::Receiver<()>,
    commands_rx: mpsc::Receiver<SessionCommand>,
    event_tx: mpsc::Sender<SessionEvent>,
    state_tx: watch::Sender<SessionState>,
}

impl SessionTask {
    fn set_state(&self, state: SessionState) {
        tracing::debug!(session = %self.spec.id, state = state.label(), "Session state");
        self.state_tx.send_replace(state);
    }

    async fn exited(&self, reason: ServerStopReason) {
        match &reason {
            ServerStopReason::Exited => {
                tracing::info!(session = %self.spec.id, "{} server exited", self.spec.display_name);
            }
            ServerStopReason::Failed(msg) => {
                tracing::warn!(session = %self.spec.id, "{} server failed: {msg}", self.spec.display_name);
            }
        }
        self.set_state(SessionState::Exited(reason.clone()));
        let _ = self
            .event_tx
            .send(SessionEvent::Stopped {
                session: self.spec.id,
                reason,
            })
            .await;
    }
}

async fn run(mut task: SessionTask) {
    if let Some(previous) = task.previous.take() {
        let old = previous.session();
        if let Err(e) = previous.await {
            tracing::debug!(session = %task.spec.id, previous = %old, "Previous session ended: {e}");
        }
    }

    // A stop (or a dropped handle) before launch skips the server entirely,
    // unless documents are already queued for it.
    let mut stop_requested = !matches!(task.stop_rx.try_recv(), Err(TryRecvError::Empty));
    if stop_requested && task.commands_rx.is_empty() {
        task.set_state(SessionState::Absent);
        return;
    }

    let spec = &task.spec;
    tracing::info!(
        session = %spec.id,
        path = %spec.location.path().display(),
        transport = spec.channel.transport().as_str(),
        "Starting {} server",
        spec.display_name
    );

    let io = match task.launcher.launch(&spec.location, &spec.args) {
        Ok(io) => io,
        Err(e) => {
            task.exited(ServerStopReason::Failed(format!("{e:#}"))).await;
            return;
        }
    };

    // With nothing queued, a stop abandons the handshake; dropping it
    // closes the channel and kills the child.
    let started = {
        let handshake = LanguageClient::start(
            spec.id,
            &spec.name,
            spec.channel.documents().language().unwrap_or(&spec.name),
            io,
            &spec.workspace_root,
            task.event_tx.clone(),
        );
        tokio::pin!(handshake);

        loop {
            tokio::select! {
                biased;
                _ = &mut task.stop_rx, if !stop_requested => {
                    stop_requested = true;
                    if task.commands_rx.is_empty() {
                        tracing::info!(session = %task.spec.id, "Stop requested during handshake, abandoning start");
                        task.set_state(SessionState::Absent);
                        return;
                    }
                }
                started = &mut handshake => break started,
            }
        }
    };
    let (mut client, mut exit_rx) = match started {
        Ok(started) => started,
        Err(e) => {
            task.exited(ServerStopReason::Failed(format!("{e:#}"))).await;
            return;
        }
    };

    task.set_state(SessionState::Running);
    tracing::info!(session = %task.spec.id, "{} server running", task.spec.display_name);

    if stop_requested {
        stop(&mut task, client).await;
        return;
    }

    loop {
        tokio::select! {
            biased;
            _ = &mut task.stop_rx => {
                stop(&mut task, client).await;
                return;
            }
            reason = &mut exit_rx => {
                let reason = reason.unwrap_or(ServerStopReason::Exited);
                drop(client);
                task.exited(reason).await;
                return;
            }
            Some(command) = task.commands_rx.recv() => {
                if let Err(e) = forward(&mut client, command).await {
                    tracing::warn!(session = %task.spec.id, "Failed to notify server: {e:#}");
                }
            }
        }
    }
}

/// Deliver everything already queued, then shut the server down.
async fn stop(task: &mut SessionTask, mut client: LanguageClient) {
    task.set_state(SessionState::Stopping);
    let mut flushed = 0usize;
    while let Ok(command) = task.commands_rx.try_recv() {
        if let Err(e) = forward(&mut client, command).await {
            tracing::warn!(session = %task.spec.id, "Failed to notify server: {e:#}");
            break;
        }
        flushed += 1;
    }
    if flushed > 0 {
        tracing::debug!(session = %task.spec.id, flushed, "Delivered queued notifications before shutdown");
    }
    client.shutdown().await;
    task.set_state(SessionState::Absent);
    tracing::info!(session = %task.spec.id, "{} server stopped", task.spec.display_name);
}

async fn forward(client: &mut LanguageClient, command: SessionCommand) -> Result<()> {
    match command {
        SessionCommand::Open { uri, text } => client.did_open(&uri, &text).await,
        SessionCommand::Change { uri, text } => client.did_change(&uri, &text).await,
        SessionCommand::Save { uri, text } => client.did_save(&uri, &text).await,
        SessionCommand::Close { uri } => client.did_close(&uri).await,
        SessionCommand::WatchedFiles(events) => client.did_change_watched_files(&events).await,
    }
}
