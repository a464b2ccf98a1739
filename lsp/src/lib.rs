//! Session lifecycle for the lunalint language client.
//!
//! [`SessionManager`] is the host-facing entry point: `activate` resolves
//! the server, declares document and watch scope, and starts a session in
//! the background; `deactivate` stops it. Hosts plug in through
//! [`ActivationContext`].

pub mod codec;
pub mod types;

pub(crate) mod client;
pub(crate) mod diagnostics;
pub(crate) mod protocol;
pub(crate) mod session;

mod host;
mod launcher;
mod location;
mod manager;
mod scope;

pub use host::{
    ActivationContext, CommandHandler, Disposable, FileEventSink, HostError, SinkClosed,
    SubscriptionId, Subscriptions, disposable_fn,
};
pub use launcher::{ProcessLauncher, ServerIo, ServerLauncher};
pub use location::{LocationSource, ResolveError, ServerLocation, resolve};
pub use manager::{ActivationError, SessionManager};
pub use scope::{ChannelConfig, DocumentSelector, ScopeError, WatchScope};
pub use session::{SessionError, Shutdown};
pub use types::{
    DiagnosticSeverity, DiagnosticsSnapshot, FileChangeKind, FileEvent, LintDiagnostic, Position,
    ServerStopReason, SessionId, SessionState,
};
