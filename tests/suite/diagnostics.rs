//! Document sync, published diagnostics and watched-file forwarding.

use lunalint_lsp::{
    ActivationContext, DiagnosticSeverity, FileChangeKind, FileEvent, Position, SinkClosed,
};

use crate::common::{FakeServer, TestContext, poll_until};

#[tokio::test]
async fn saved_document_diagnostics_reach_the_snapshot() {
    let server = FakeServer::new();
    let ctx = TestContext::new();
    let mut manager = server.manager();
    let text = "local x = bad\n-- todo: split\nreturn x\n";
    let path = ctx.write("src/main.lua", text);

    manager.activate(&ctx).unwrap();
    manager.ready().await.unwrap();
    assert!(manager.did_open(&path, text).await);
    assert!(manager.did_save(&path, text).await);

    assert!(poll_until(&mut manager, |m| m.snapshot().total_count() == 2).await);
    let snapshot = manager.snapshot();
    assert_eq!(snapshot.error_count(), 1);
    assert_eq!(snapshot.warning_count(), 1);
    assert_eq!(snapshot.files().len(), 1);
    assert_eq!(snapshot.files()[0].0, path);

    let errors = manager.errors_for_files(&[path.clone()]);
    assert_eq!(errors.len(), 1);
    let (_, items) = &errors[0];
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].severity(), DiagnosticSeverity::Error);
    assert_eq!(items[0].message(), "bad token");
    assert_eq!(items[0].start(), Position::new(0, 10));
    assert_eq!(items[0].source(), "lunalintd");

    manager.deactivate().unwrap().await.unwrap();
    assert!(manager.snapshot().is_empty());
}

#[tokio::test]
async fn clean_save_clears_previous_diagnostics() {
    let server = FakeServer::new();
    let ctx = TestContext::new();
    let mut manager = server.manager();
    let path = ctx.write("init.lua", "bad\n");

    manager.activate(&ctx).unwrap();
    manager.ready().await.unwrap();
    assert!(manager.did_save(&path, "bad\n").await);
    assert!(poll_until(&mut manager, |m| m.snapshot().error_count() == 1).await);

    assert!(manager.did_change(&path, "return 1\n").await);
    assert!(manager.did_save(&path, "return 1\n").await);
    assert!(poll_until(&mut manager, |m| m.snapshot().is_empty()).await);

    // Saving an unopened document opens it first; the change bumps the version.
    let opened = server.received("textDocument/didOpen");
    assert_eq!(opened.len(), 1);
    let changed = server.received("textDocument/didChange");
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0]["params"]["textDocument"]["version"], 2);

    manager.deactivate().unwrap().await.unwrap();
}

#[tokio::test]
async fn watched_file_events_are_forwarded_in_scope_only() {
    let server = FakeServer::new();
    let ctx = TestContext::new();
    let mut manager = server.manager();

    manager.activate(&ctx).unwrap();
    let sink = ctx.last_sink().unwrap();
    manager.ready().await.unwrap();

    let root = ctx.workspace_root().to_path_buf();
    sink.send(vec![
        FileEvent::new(root.join("lib").join("util.lua"), FileChangeKind::Created),
        FileEvent::new(root.join("README.md"), FileChangeKind::Changed),
        FileEvent::new(root.join("old.lua"), FileChangeKind::Deleted),
    ])
    .unwrap();

    assert!(
        server
            .wait_for(|s| !s.received("workspace/didChangeWatchedFiles").is_empty())
            .await
    );
    let notes = server.received("workspace/didChangeWatchedFiles");
    let changes = notes[0]["params"]["changes"].as_array().unwrap();
    assert_eq!(changes.len(), 2);
    assert!(changes[0]["uri"].as_str().unwrap().ends_with("/lib/util.lua"));
    assert_eq!(changes[0]["type"], 1);
    assert!(changes[1]["uri"].as_str().unwrap().ends_with("/old.lua"));
    assert_eq!(changes[1]["type"], 3);

    manager.deactivate().unwrap().await.unwrap();
    assert!(sink.is_closed());
    assert_eq!(
        sink.send(vec![FileEvent::new(root.join("a.lua"), FileChangeKind::Changed)]),
        Err(SinkClosed)
    );
}

#[tokio::test]
async fn diagnostics_from_a_replaced_session_are_dropped() {
    let server = FakeServer::new();
    let ctx = TestContext::new();
    let mut manager = server.manager();
    let path = ctx.write("init.lua", "bad\n");

    manager.activate(&ctx).unwrap();
    manager.ready().await.unwrap();
    assert!(manager.did_save(&path, "bad\n").await);
    assert!(server.wait_for(|s| !s.received("textDocument/didSave").is_empty()).await);

    // Nothing is drained before the replacement, so the first session's
    // diagnostics are still queued when the second one becomes current.
    manager.activate(&ctx).unwrap();
    manager.ready().await.unwrap();
    manager.poll_events(256);
    assert!(manager.snapshot().is_empty());

    assert!(manager.did_save(&path, "todo\n").await);
    assert!(poll_until(&mut manager, |m| m.snapshot().warning_count() == 1).await);
    assert_eq!(manager.snapshot().error_count(), 0);

    manager.deactivate().unwrap().await.unwrap();
}
