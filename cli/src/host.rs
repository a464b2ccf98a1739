//! Headless activation context for running the client outside an editor.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use lunalint_lsp::{
    ActivationContext, CommandHandler, Disposable, FileEventSink, HostError, Subscriptions,
    disposable_fn,
};

use crate::watcher;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

type CommandTable = Arc<Mutex<HashMap<String, CommandHandler>>>;

fn lock(table: &CommandTable) -> MutexGuard<'_, HashMap<String, CommandHandler>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct NativeContext {
    extension_root: Option<PathBuf>,
    workspace_root: PathBuf,
    subscriptions: Subscriptions,
    commands: CommandTable,
    poll_interval: Duration,
}

impl NativeContext {
    pub fn new(extension_root: Option<PathBuf>, workspace_root: PathBuf) -> Self {
        Self {
            extension_root,
            workspace_root,
            subscriptions: Subscriptions::new(),
            commands: Arc::new(Mutex::new(HashMap::new())),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Run a registered command. Returns `false` if it is unknown.
    pub fn execute_command(&self, command: &str) -> bool {
        let handler = lock(&self.commands).get(command).cloned();
        match handler {
            Some(handler) => {
                handler();
                true
            }
            None => false,
        }
    }

    /// Release everything registered during activation.
    pub fn dispose_all(&self) -> usize {
        let released = self.subscriptions.dispose_all();
        tracing::debug!(released, "Disposed subscriptions");
        released
    }
}

impl ActivationContext for NativeContext {
    fn extension_root(&self) -> Option<&Path> {
        self.extension_root.as_deref()
    }

    fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    fn create_file_watcher(&self, sink: FileEventSink) -> Result<Box<dyn Disposable>, HostError> {
        if !self.workspace_root.is_dir() {
            return Err(HostError::Watcher {
                patterns: sink.scope().patterns().join(", "),
                reason: format!("{} is not a directory", self.workspace_root.display()),
            });
        }
        Ok(watcher::spawn(
            self.workspace_root.clone(),
            sink,
            self.poll_interval,
        ))
    }

    fn register_command(
        &self,
        command: &str,
        handler: CommandHandler,
    ) -> Result<Box<dyn Disposable>, HostError> {
        {
            let mut commands = lock(&self.commands);
            if commands.contains_key(command) {
                return Err(HostError::DuplicateCommand(command.to_string()));
            }
            commands.insert(command.to_string(), handler);
        }
        let table = Arc::clone(&self.commands);
        let command = command.to_string();
        Ok(disposable_fn(move || {
            lock(&table).remove(&command);
        }))
    }
}
