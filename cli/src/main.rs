//! lunalint-client: headless host for the lunalint session manager.
//!
//! Implements the host side of the activation contract for a workspace
//! directory and drives one session from the command line.
//!
//! ```text
//! main() -> load config -> NativeContext -> SessionManager::activate
//!                                                 |
//!                                  check: sync every document, print, exit
//!                                  watch: resync on change until Ctrl-C
//! ```

mod host;
mod watcher;

use std::env;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{self, Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lunalint_lsp::{ActivationContext, FileChangeKind, SessionManager, SessionState};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::host::NativeContext;
use crate::watcher::FileSnapshot;

/// Upper bound on a graceful shutdown before the session is aborted.
const SHUTDOWN_LIMIT: Duration = Duration::from_secs(5);

/// Events drained per poll.
const EVENT_BUDGET: usize = 1024;

#[derive(Parser)]
#[command(name = "lunalint-client")]
#[command(about = "Run the lunalint analysis server against a workspace", version)]
struct Cli {
    /// Installation root the server path is resolved against [default: executable directory]
    #[arg(long, global = true)]
    extension_root: Option<PathBuf>,
    /// Workspace to analyse
    #[arg(long, global = true, default_value = ".")]
    workspace: PathBuf,
    /// Server executable or command name, overriding config and environment
    #[arg(long, global = true)]
    server: Option<PathBuf>,
    /// Config file to use instead of the usual lookup
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lint every document once and print diagnostics (exit 1 on errors)
    Check {
        /// Quiet period that ends diagnostics collection, in milliseconds
        #[arg(long, default_value_t = 500)]
        settle_ms: u64,
    },
    /// Keep the server running and print diagnostics as files change
    Watch,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // stdout carries diagnostics output.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(env_filter)
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.lunalint/logs/client.log
    if let Some(config_path) = lunalint_config::user_config_path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("client.log"));
    }

    candidates.push(PathBuf::from(".lunalint").join("logs").join("client.log"));

    candidates
}

fn default_extension_root() -> Option<PathBuf> {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("lunalint: {e:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let workspace = path::absolute(&cli.workspace)
        .with_context(|| format!("resolving workspace {}", cli.workspace.display()))?;
    let loaded = lunalint_config::load(cli.config.as_deref(), &workspace)?;
    if let Some(path) = loaded.source.path() {
        tracing::info!(path = %path.display(), "Loaded config");
    }
    let mut settings = loaded.settings;
    if let Some(server) = cli.server {
        settings.server = settings.server.with_path_override(server);
    }

    let extension_root = cli.extension_root.or_else(default_extension_root);
    let ctx = NativeContext::new(extension_root, workspace);
    let mut manager = SessionManager::new(settings);

    let code = match cli.command {
        Commands::Check { settle_ms } => {
            check(&mut manager, &ctx, Duration::from_millis(settle_ms)).await
        }
        Commands::Watch => watch(&mut manager, &ctx).await,
    };

    if let Err(e) = manager.deactivate_within(SHUTDOWN_LIMIT).await {
        tracing::warn!("Shutdown incomplete: {e}");
    }
    ctx.dispose_all();
    code
}

/// Activate and wait for the handshake. `None` means it failed and was reported.
async fn start(manager: &mut SessionManager, ctx: &NativeContext) -> Option<()> {
    if let Err(e) = manager.activate(ctx) {
        eprintln!("lunalint: {e}");
        return None;
    }
    if let Err(e) = manager.ready().await {
        eprintln!("lunalint: {e}");
        return None;
    }
    ctx.execute_command(&format!("{}.activate", manager.settings().name()));
    Some(())
}

fn in_scope_documents(manager: &SessionManager, root: &Path) -> FileSnapshot {
    let Some(channel) = manager.channel_config() else {
        return FileSnapshot::default();
    };
    let documents = channel.documents().clone();
    FileSnapshot::scan(root, |path| documents.matches_path(path))
}

async fn sync_document(manager: &SessionManager, path: &Path) {
    match fs::read_to_string(path) {
        Ok(text) => {
            manager.did_open(path, &text).await;
            manager.did_save(path, &text).await;
        }
        Err(e) => tracing::warn!(path = %path.display(), "Cannot read document: {e}"),
    }
}

/// Poll until a full `settle` period passes with no events.
async fn settle(manager: &mut SessionManager, settle: Duration) {
    loop {
        tokio::time::sleep(settle).await;
        if manager.poll_events(EVENT_BUDGET) == 0 {
            return;
        }
    }
}

fn print_diagnostics(manager: &SessionManager, root: &Path) -> io::Result<()> {
    let snapshot = manager.snapshot();
    let mut out = io::stdout().lock();
    for (path, items) in snapshot.files() {
        let shown = path.strip_prefix(root).unwrap_or(path);
        for item in items {
            writeln!(out, "{}", item.display_with_path(shown))?;
        }
    }
    out.flush()
}

async fn check(
    manager: &mut SessionManager,
    ctx: &NativeContext,
    settle_for: Duration,
) -> Result<ExitCode> {
    if start(manager, ctx).await.is_none() {
        return Ok(ExitCode::from(2));
    }

    let root = ctx.workspace_root();
    let documents = in_scope_documents(manager, root);
    if documents.is_empty() {
        tracing::warn!(root = %root.display(), "No documents in scope");
    }
    tracing::info!(count = documents.len(), "Checking documents");
    for path in documents.paths() {
        sync_document(manager, path).await;
    }
    settle(manager, settle_for).await;

    print_diagnostics(manager, root)?;
    let snapshot = manager.snapshot();
    if !snapshot.is_empty() {
        eprintln!("{}", snapshot.status_string());
    }

    if let SessionState::Exited(reason) = manager.state() {
        eprintln!("lunalint: {reason}");
        return Ok(ExitCode::from(2));
    }
    Ok(if snapshot.error_count() > 0 {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

async fn watch(manager: &mut SessionManager, ctx: &NativeContext) -> Result<ExitCode> {
    if start(manager, ctx).await.is_none() {
        return Ok(ExitCode::from(2));
    }

    let root = ctx.workspace_root();
    let mut known = in_scope_documents(manager, root);
    for path in known.paths() {
        sync_document(manager, path).await;
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(ctx.poll_interval());

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted, shutting down");
                return Ok(ExitCode::SUCCESS);
            }
            _ = ticker.tick() => {
                let current = in_scope_documents(manager, root);
                for event in current.changes_since(&known) {
                    match event.kind {
                        FileChangeKind::Created | FileChangeKind::Changed => {
                            sync_document(manager, &event.path).await;
                        }
                        FileChangeKind::Deleted => {
                            manager.did_close(&event.path).await;
                        }
                    }
                }
                known = current;

                if manager.poll_events(EVENT_BUDGET) > 0 {
                    let snapshot = manager.snapshot();
                    eprintln!("-- {}", snapshot.status_string());
                    print_diagnostics(manager, root)?;
                }
                if let SessionState::Exited(reason) = manager.state() {
                    eprintln!("lunalint: {reason}");
                    return Ok(ExitCode::from(2));
                }
            }
        }
    }
}
