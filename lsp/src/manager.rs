//! SessionManager facade: the activation and deactivation entry points
//! consumed by the host.
//!
//! The manager owns at most one session. `activate` replaces it and
//! `deactivate` stops it; everything in between (document sync, watched
//! files, diagnostics) is routed through the current session only.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lunalint_types::ClientSettings;
use tokio::sync::mpsc;

use crate::diagnostics::DiagnosticsStore;
use crate::host::{ActivationContext, CommandHandler, FileEventSink, SubscriptionId};
use crate::launcher::{ProcessLauncher, ServerLauncher};
use crate::location::{self, ResolveError, ServerLocation};
use crate::protocol;
use crate::scope::{ChannelConfig, ScopeError};
use crate::session::{Session, SessionCommand, SessionError, SessionSpec, Shutdown};
use crate::types::{
    DiagnosticsSnapshot, LintDiagnostic, ServerStopReason, SessionEvent, SessionId, SessionState,
};

/// Capacity of the event channel from session tasks to the manager.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of each session's command queue.
const COMMAND_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Scope(#[from] ScopeError),
}

enum SessionSlot {
    Absent,
    Present(Session),
}

/// Owner of the single client session.
///
/// Re-activating stops the current session before the new server is
/// launched, so two servers never run side by side.
pub struct SessionManager {
    settings: ClientSettings,
    launcher: Arc<dyn ServerLauncher>,
    slot: SessionSlot,
    /// Entries this manager parked in the host's subscriptions.
    registrations: Vec<SubscriptionId>,
    diagnostics: DiagnosticsStore,
    event_rx: mpsc::Receiver<SessionEvent>,
    event_tx: mpsc::Sender<SessionEvent>,
    next_session: u64,
}

impl SessionManager {
    /// Manager that spawns the server as a child process.
    #[must_use]
    pub fn new(settings: ClientSettings) -> Self {
        Self::with_launcher(settings, Arc::new(ProcessLauncher))
    }

    #[must_use]
    pub fn with_launcher(settings: ClientSettings, launcher: Arc<dyn ServerLauncher>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            settings,
            launcher,
            slot: SessionSlot::Absent,
            registrations: Vec::new(),
            diagnostics: DiagnosticsStore::new(),
            event_rx,
            event_tx,
            next_session: 0,
        }
    }

    /// Start a session for `ctx`. Returns without waiting for the server.
    ///
    /// Any current session is stopped first; the new server launches once
    /// that stop has completed. Registration failures are logged and do not
    /// fail activation. Must be called from within a Tokio runtime.
    pub fn activate(&mut self, ctx: &dyn ActivationContext) -> Result<(), ActivationError> {
        let previous = self.take_session();
        if let Some(previous) = &previous {
            tracing::info!(previous = %previous.session(), "Re-activation stops the current session first");
        }
        self.release_registrations(ctx);

        let location = location::resolve(ctx, &self.settings.server).inspect_err(|e| {
            tracing::error!("Cannot locate {} server: {e}", self.settings.display_name());
        })?;
        let channel = ChannelConfig::from_settings(&self.settings).inspect_err(|e| {
            tracing::error!("Invalid document or watch scope: {e}");
        })?;

        self.next_session += 1;
        let id = SessionId::new(self.next_session);
        self.diagnostics.reset(Some(id));
        let commands = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        self.register(ctx, id, &channel, &commands.0);

        tracing::debug!(
            session = %id,
            path = %location.path().display(),
            patterns = ?channel.watch().patterns(),
            "Activating"
        );
        let spec = SessionSpec {
            id,
            name: self.settings.name().to_string(),
            display_name: self.settings.display_name().to_string(),
            location,
            args: self.settings.server.args().to_vec(),
            channel,
            workspace_root: ctx.workspace_root().to_path_buf(),
        };
        let session = Session::start(
            spec,
            Arc::clone(&self.launcher),
            previous,
            commands,
            self.event_tx.clone(),
        );
        self.slot = SessionSlot::Present(session);
        Ok(())
    }

    fn register(
        &mut self,
        ctx: &dyn ActivationContext,
        id: SessionId,
        channel: &ChannelConfig,
        commands: &mpsc::Sender<SessionCommand>,
    ) {
        let command = format!("{}.activate", self.settings.name());
        let display_name = self.settings.display_name();
        let handler: CommandHandler = Arc::new(move || {
            tracing::info!(session = %id, "{display_name} is active");
        });
        match ctx.register_command(&command, handler) {
            Ok(disposable) => self.registrations.push(ctx.subscriptions().push(disposable)),
            Err(e) => tracing::warn!("Command registration failed: {e}"),
        }

        let sink = FileEventSink::new(channel.watch().clone(), commands.clone());
        match ctx.create_file_watcher(sink) {
            Ok(disposable) => self.registrations.push(ctx.subscriptions().push(disposable)),
            Err(e) => tracing::warn!("File watcher unavailable: {e}"),
        }
    }

    fn release_registrations(&mut self, ctx: &dyn ActivationContext) {
        for id in self.registrations.drain(..) {
            ctx.subscriptions().dispose(id);
        }
    }

    /// Stop the current session.
    ///
    /// `None` means there was nothing to stop. The returned future may be
    /// awaited or dropped; the stop runs either way.
    pub fn deactivate(&mut self) -> Option<Shutdown> {
        let shutdown = self.take_session();
        if shutdown.is_none() {
            tracing::debug!("deactivate called with no active session");
        }
        shutdown
    }

    /// [`deactivate`](Self::deactivate), aborting the session if it has not
    /// finished within `limit`.
    pub async fn deactivate_within(&mut self, limit: Duration) -> Result<(), SessionError> {
        let Some(mut shutdown) = self.deactivate() else {
            return Ok(());
        };
        if let Ok(done) = tokio::time::timeout(limit, &mut shutdown).await {
            done
        } else {
            tracing::warn!(session = %shutdown.session(), "Shutdown timed out, aborting session");
            shutdown.abort();
            Err(SessionError::ShutdownTimedOut(limit))
        }
    }

    fn take_session(&mut self) -> Option<Shutdown> {
        match std::mem::replace(&mut self.slot, SessionSlot::Absent) {
            SessionSlot::Absent => None,
            SessionSlot::Present(session) => {
                tracing::info!(
                    session = %session.id(),
                    state = session.state().label(),
                    "Stopping {} session",
                    self.settings.display_name()
                );
                self.diagnostics.reset(None);
                Some(session.stop())
            }
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        match &self.slot {
            SessionSlot::Absent => SessionState::Absent,
            SessionSlot::Present(session) => session.state(),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        match &self.slot {
            SessionSlot::Absent => None,
            SessionSlot::Present(session) => Some(session.id()),
        }
    }

    /// Wait for the current session to leave `Starting`.
    pub async fn ready(&self) -> Result<(), SessionError> {
        let SessionSlot::Present(session) = &self.slot else {
            return Err(SessionError::NoSession);
        };
        let mut state_rx = session.subscribe();
        let state = state_rx
            .wait_for(|state| !matches!(state, SessionState::Starting))
            .await
            .map_err(|_| SessionError::Stopped)?
            .clone();
        match state {
            SessionState::Running => Ok(()),
            SessionState::Exited(ServerStopReason::Failed(msg)) => {
                Err(SessionError::Start(msg))
            }
            _ => Err(SessionError::Stopped),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Channel configuration of the current session.
    #[must_use]
    pub fn channel_config(&self) -> Option<&ChannelConfig> {
        match &self.slot {
            SessionSlot::Absent => None,
            SessionSlot::Present(session) => Some(session.channel()),
        }
    }

    #[must_use]
    pub fn server_location(&self) -> Option<&ServerLocation> {
        match &self.slot {
            SessionSlot::Absent => None,
            SessionSlot::Present(session) => Some(session.location()),
        }
    }

    /// Queue a document notification if `path` is in scope.
    ///
    /// Returns whether it was queued. Notifications sent while the session
    /// is still starting are delivered after the handshake.
    async fn route(&self, path: &Path, command: impl FnOnce(String) -> SessionCommand) -> bool {
        let SessionSlot::Present(session) = &self.slot else {
            return false;
        };
        if !session.channel().documents().matches_path(path) {
            tracing::trace!(path = %path.display(), "Out of document scope");
            return false;
        }
        let uri = match protocol::path_to_file_uri(path) {
            Ok(uri) => uri.to_string(),
            Err(e) => {
                tracing::debug!("Skipping document notification: {e}");
                return false;
            }
        };
        session.send(command(uri)).await
    }

    pub async fn did_open(&self, path: &Path, text: &str) -> bool {
        self.route(path, |uri| SessionCommand::Open {
            uri,
            text: text.to_string(),
        })
        .await
    }

    pub async fn did_change(&self, path: &Path, text: &str) -> bool {
        self.route(path, |uri| SessionCommand::Change {
            uri,
            text: text.to_string(),
        })
        .await
    }

    pub async fn did_save(&self, path: &Path, text: &str) -> bool {
        self.route(path, |uri| SessionCommand::Save {
            uri,
            text: text.to_string(),
        })
        .await
    }

    pub async fn did_close(&self, path: &Path) -> bool {
        self.route(path, |uri| SessionCommand::Close { uri }).await
    }

    /// Drain pending session events, up to `budget`.
    ///
    /// Non-blocking. Events from sessions other than the current one are
    /// discarded.
    pub fn poll_events(&mut self, budget: usize) -> usize {
        let mut count = 0;
        while count < budget {
            match self.event_rx.try_recv() {
                Ok(event) => {
                    self.handle_event(event);
                    count += 1;
                }
                Err(mpsc::error::TryRecvError::Empty | mpsc::error::TryRecvError::Disconnected) => {
                    break;
                }
            }
        }
        count
    }

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Diagnostics {
                session,
                path,
                items,
            } => {
                let count = items.len();
                let shown = path.display().to_string();
                if self.diagnostics.publish(session, path, items) {
                    tracing::debug!(path = %shown, count, "Diagnostics updated");
                } else {
                    tracing::trace!(session = %session, "Dropping diagnostics from a superseded session");
                }
            }
            SessionEvent::Stopped { session, reason } => {
                if self.session_id() == Some(session) {
                    tracing::debug!(session = %session, %reason, "Current session ended");
                }
            }
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Error diagnostics for the given files only.
    #[must_use]
    pub fn errors_for_files(&self, paths: &[PathBuf]) -> Vec<(PathBuf, Vec<LintDiagnostic>)> {
        self.diagnostics.errors_for_files(paths)
    }

    #[cfg(test)]
    pub(crate) fn event_tx(&self) -> &mpsc::Sender<SessionEvent> {
        &self.event_tx
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(shutdown) = self.take_session() {
            tracing::debug!(session = %shutdown.session(), "Manager dropped with a live session");
        }
    }
}
