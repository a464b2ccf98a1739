//! Contract between the session manager and its host environment.
//!
//! The host supplies an [`ActivationContext`] at startup. The manager uses
//! it to resolve paths under the installation root, to create a file
//! watcher, to register commands, and to park every registration in the
//! host's [`Subscriptions`] so the host can release them on unload even if
//! `deactivate` never runs.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::location::{self, ResolveError};
use crate::scope::WatchScope;
use crate::session::SessionCommand;
use crate::types::FileEvent;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("file watcher for {patterns} could not be created: {reason}")]
    Watcher { patterns: String, reason: String },
    #[error("command '{0}' is already registered")]
    DuplicateCommand(String),
}

/// A resource released by the host or the manager.
pub trait Disposable: Send {
    fn dispose(self: Box<Self>);
}

struct DisposeFn<F>(F);

impl<F: FnOnce() + Send> Disposable for DisposeFn<F> {
    fn dispose(self: Box<Self>) {
        (self.0)();
    }
}

/// Wrap a closure as a [`Disposable`].
pub fn disposable_fn(f: impl FnOnce() + Send + 'static) -> Box<dyn Disposable> {
    Box::new(DisposeFn(f))
}

/// Callback run when a registered command is invoked.
pub type CommandHandler = Arc<dyn Fn() + Send + Sync>;

/// Handle to one entry in [`Subscriptions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct SubscriptionList {
    next_id: u64,
    entries: Vec<(SubscriptionId, Box<dyn Disposable>)>,
}

/// Disposables registry owned by the host.
///
/// Entries are disposed outside the lock, so a disposable may touch the
/// registry again without deadlocking.
#[derive(Default)]
pub struct Subscriptions {
    inner: Mutex<SubscriptionList>,
}

impl fmt::Debug for Subscriptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriptions")
            .field("len", &self.len())
            .finish()
    }
}

impl Subscriptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SubscriptionList> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, disposable: Box<dyn Disposable>) -> SubscriptionId {
        let mut list = self.lock();
        let id = SubscriptionId(list.next_id);
        list.next_id += 1;
        list.entries.push((id, disposable));
        id
    }

    /// Dispose one entry. Returns `false` if it was already gone.
    pub fn dispose(&self, id: SubscriptionId) -> bool {
        let entry = {
            let mut list = self.lock();
            list.entries
                .iter()
                .position(|(entry_id, _)| *entry_id == id)
                .map(|idx| list.entries.remove(idx))
        };
        match entry {
            Some((_, disposable)) => {
                disposable.dispose();
                true
            }
            None => false,
        }
    }

    /// Dispose every entry, most recent first. Returns how many ran.
    pub fn dispose_all(&self) -> usize {
        let entries = std::mem::take(&mut self.lock().entries);
        let count = entries.len();
        for (_, disposable) in entries.into_iter().rev() {
            disposable.dispose();
        }
        count
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.lock().entries.iter().any(|(entry_id, _)| *entry_id == id)
    }
}

/// The watcher side's connection to a session.
///
/// Events outside the watch scope are dropped here, so host watchers may
/// report anything they see.
#[derive(Clone)]
pub struct FileEventSink {
    scope: Arc<WatchScope>,
    tx: mpsc::Sender<SessionCommand>,
}

impl fmt::Debug for FileEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileEventSink")
            .field("patterns", &self.scope.patterns())
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// The session behind a sink has ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("session is no longer accepting file events")]
pub struct SinkClosed;

impl FileEventSink {
    pub(crate) fn new(scope: WatchScope, tx: mpsc::Sender<SessionCommand>) -> Self {
        Self {
            scope: Arc::new(scope),
            tx,
        }
    }

    #[must_use]
    pub fn scope(&self) -> &WatchScope {
        &self.scope
    }

    /// Forward in-scope events without waiting.
    ///
    /// A full queue drops the batch with a warning; the next change to
    /// the same file is reported again.
    pub fn send(&self, events: Vec<FileEvent>) -> Result<(), SinkClosed> {
        let events: Vec<FileEvent> = events
            .into_iter()
            .filter(|event| self.scope.is_match(&event.path))
            .collect();
        if events.is_empty() {
            return if self.tx.is_closed() {
                Err(SinkClosed)
            } else {
                Ok(())
            };
        }
        match self.tx.try_send(SessionCommand::WatchedFiles(events)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(SessionCommand::WatchedFiles(events))) => {
                tracing::warn!(dropped = events.len(), "Session queue full, dropping file events");
                Ok(())
            }
            Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Closed(_)) => Err(SinkClosed),
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Host resources available during activation.
pub trait ActivationContext {
    /// Directory the extension is installed in, if the host knows it.
    fn extension_root(&self) -> Option<&Path>;

    /// Workspace the server should analyse.
    fn workspace_root(&self) -> &Path;

    fn subscriptions(&self) -> &Subscriptions;

    /// Start watching for `sink.scope()` and forward changes into `sink`.
    fn create_file_watcher(&self, sink: FileEventSink) -> Result<Box<dyn Disposable>, HostError>;

    fn register_command(
        &self,
        command: &str,
        handler: CommandHandler,
    ) -> Result<Box<dyn Disposable>, HostError>;

    /// Resolve `relative` against the installation root.
    fn as_absolute_path(&self, relative: &Path) -> Result<PathBuf, ResolveError> {
        location::absolute_under(self.extension_root(), relative)
    }
}
