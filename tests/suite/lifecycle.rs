//! Activation, deactivation and re-activation against the in-memory server.

use std::time::Duration;

use lunalint_lsp::{
    ActivationContext, ActivationError, ResolveError, ServerStopReason, SessionError,
    SessionManager, SessionState,
};
use lunalint_types::ClientSettings;

use crate::common::{Behavior, FakeServer, TestContext};

#[tokio::test]
async fn deactivate_without_activate_is_a_no_op() {
    let server = FakeServer::new();
    let mut manager = server.manager();

    assert!(manager.deactivate().is_none());
    assert!(manager.deactivate_within(Duration::from_secs(1)).await.is_ok());
    assert_eq!(manager.state(), SessionState::Absent);
    assert_eq!(server.launches(), 0);
}

#[tokio::test]
async fn activate_then_deactivate_runs_the_full_lifecycle() {
    let server = FakeServer::new();
    let ctx = TestContext::new();
    let mut manager = server.manager();

    manager.activate(&ctx).unwrap();
    manager.ready().await.unwrap();
    assert_eq!(manager.state(), SessionState::Running);
    assert_eq!(server.live(), 1);

    manager.deactivate().unwrap().await.unwrap();
    assert_eq!(manager.state(), SessionState::Absent);
    assert!(manager.session_id().is_none());
    assert!(server.wait_for(|s| s.methods().iter().any(|m| m == "exit")).await);
    assert_eq!(
        server.methods(),
        vec!["initialize", "initialized", "shutdown", "exit"]
    );
    assert_eq!(server.live(), 0);
}

#[tokio::test]
async fn deactivate_while_starting_leaves_nothing_running() {
    let server = FakeServer::with_behavior(Behavior {
        initialize_delay: Duration::from_millis(200),
        ..Behavior::default()
    });
    let ctx = TestContext::new();
    let mut manager = server.manager();

    manager.activate(&ctx).unwrap();
    let shutdown = manager.deactivate().unwrap();
    assert_eq!(manager.state(), SessionState::Absent);

    shutdown.await.unwrap();
    assert!(server.wait_for(|s| s.live() == 0).await);
}

#[tokio::test]
async fn deactivate_during_a_hung_handshake_returns_promptly() {
    let server = FakeServer::with_behavior(Behavior {
        hang_initialize: true,
        ..Behavior::default()
    });
    let ctx = TestContext::new();
    let mut manager = server.manager();

    manager.activate(&ctx).unwrap();
    assert!(server.wait_for(|s| !s.received("initialize").is_empty()).await);
    assert_eq!(manager.state(), SessionState::Starting);

    assert!(manager.deactivate_within(Duration::from_secs(2)).await.is_ok());
    assert_eq!(manager.state(), SessionState::Absent);
    assert!(server.wait_for(|s| s.live() == 0).await);
    assert_eq!(server.methods(), vec!["initialize"]);
}

#[tokio::test]
async fn documents_sent_before_a_stop_still_reach_the_server() {
    let server = FakeServer::with_behavior(Behavior {
        initialize_delay: Duration::from_millis(100),
        ..Behavior::default()
    });
    let ctx = TestContext::new();
    let mut manager = server.manager();
    let path = ctx.write("init.lua", "bad\n");

    manager.activate(&ctx).unwrap();
    assert!(manager.did_save(&path, "bad\n").await);
    manager.deactivate().unwrap().await.unwrap();

    assert!(server.wait_for(|s| s.methods().iter().any(|m| m == "exit")).await);
    assert_eq!(
        server.methods(),
        vec![
            "initialize",
            "initialized",
            "textDocument/didOpen",
            "textDocument/didSave",
            "shutdown",
            "exit"
        ]
    );
}

#[tokio::test]
async fn reactivation_never_overlaps_two_servers() {
    let server = FakeServer::with_behavior(Behavior {
        initialize_delay: Duration::from_millis(50),
        ..Behavior::default()
    });
    let ctx = TestContext::new();
    let mut manager = server.manager();

    manager.activate(&ctx).unwrap();
    let first = manager.session_id().unwrap();
    manager.activate(&ctx).unwrap();
    manager.activate(&ctx).unwrap();
    let last = manager.session_id().unwrap();
    assert!(last > first);

    manager.ready().await.unwrap();
    assert_eq!(server.live(), 1);
    assert_eq!(server.peak_live(), 1);

    manager.activate(&ctx).unwrap();
    manager.ready().await.unwrap();
    assert_eq!(server.peak_live(), 1);

    manager.deactivate().unwrap().await.unwrap();
    assert!(server.wait_for(|s| s.live() == 0).await);
}

#[tokio::test]
async fn initialize_error_is_reported_by_ready() {
    let server = FakeServer::with_behavior(Behavior {
        fail_initialize: true,
        ..Behavior::default()
    });
    let ctx = TestContext::new();
    let mut manager = server.manager();

    manager.activate(&ctx).unwrap();
    let err = manager.ready().await.unwrap_err();
    assert!(matches!(err, SessionError::Start(ref msg) if msg.contains("not a Lua project")));
    assert!(matches!(
        manager.state(),
        SessionState::Exited(ServerStopReason::Failed(_))
    ));

    manager.deactivate().unwrap().await.unwrap();
    assert_eq!(manager.state(), SessionState::Absent);
}

#[tokio::test]
async fn missing_server_binary_fails_the_session_not_activation() {
    let ctx = TestContext::new();
    let missing = ctx.workspace_root().join("bin").join("lunalintd-missing");
    let mut settings = ClientSettings::default();
    settings.server = settings.server.with_path_override(missing);
    let mut manager = SessionManager::new(settings);

    manager.activate(&ctx).unwrap();
    assert!(matches!(
        manager.ready().await,
        Err(SessionError::Start(_))
    ));
    assert!(manager.deactivate_within(Duration::from_secs(1)).await.is_ok());
}

#[tokio::test]
async fn missing_extension_root_fails_activation() {
    let server = FakeServer::new();
    let ctx = TestContext::without_extension_root();
    let mut manager = server.manager();

    let err = manager.activate(&ctx).unwrap_err();
    assert!(matches!(
        err,
        ActivationError::Resolve(ResolveError::MissingInstallRoot)
    ));
    assert_eq!(manager.state(), SessionState::Absent);
    assert!(ctx.commands().is_empty());
    assert!(matches!(manager.ready().await, Err(SessionError::NoSession)));
    assert_eq!(server.launches(), 0);
}

#[tokio::test]
async fn unresponsive_shutdown_is_aborted_after_the_limit() {
    let server = FakeServer::with_behavior(Behavior {
        ignore_shutdown: true,
        ..Behavior::default()
    });
    let ctx = TestContext::new();
    let mut manager = server.manager();

    manager.activate(&ctx).unwrap();
    manager.ready().await.unwrap();

    let limit = Duration::from_millis(200);
    assert_eq!(
        manager.deactivate_within(limit).await,
        Err(SessionError::ShutdownTimedOut(limit))
    );
    assert_eq!(manager.state(), SessionState::Absent);
    assert!(server.wait_for(|s| s.live() == 0).await);
}

#[tokio::test]
async fn dropping_the_manager_stops_the_session() {
    let server = FakeServer::new();
    let ctx = TestContext::new();
    {
        let mut manager = server.manager();
        manager.activate(&ctx).unwrap();
        manager.ready().await.unwrap();
    }
    assert!(server.wait_for(|s| s.live() == 0).await);
}
