//! Turning a [`ServerLocation`] into a connected byte stream.

use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

use crate::location::ServerLocation;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Both halves of a server channel, plus the child process if there is one.
pub struct ServerIo {
    pub(crate) reader: BoxedReader,
    pub(crate) writer: BoxedWriter,
    pub(crate) child: Option<Child>,
}

impl ServerIo {
    /// Channel over arbitrary streams, with no process attached.
    pub fn from_streams(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            child: None,
        }
    }

    pub(crate) fn into_parts(self) -> (BoxedReader, BoxedWriter, Option<Child>) {
        (self.reader, self.writer, self.child)
    }
}

/// Starts servers. Called from the session task, never from `activate`.
pub trait ServerLauncher: Send + Sync {
    fn launch(&self, location: &ServerLocation, args: &[String]) -> Result<ServerIo>;
}

/// Spawns the server as a child process speaking over its stdio.
///
/// stderr is discarded and the child is killed when its handle drops.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

impl ServerLauncher for ProcessLauncher {
    fn launch(&self, location: &ServerLocation, args: &[String]) -> Result<ServerIo> {
        let path = location.path();
        let mut child = Command::new(path)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {}", path.display()))?;

        let stdout = child.stdout.take().context("no stdout from child")?;
        let stdin = child.stdin.take().context("no stdin from child")?;

        tracing::debug!(pid = ?child.id(), path = %path.display(), "Spawned server");

        Ok(ServerIo {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            child: Some(child),
        })
    }
}
