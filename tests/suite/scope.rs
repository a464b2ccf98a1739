//! Server location, document scope, watch scope and host registrations.

use std::env::consts::EXE_SUFFIX;
use std::path::Path;

use lunalint_lsp::{ActivationContext, ChannelConfig, LocationSource};
use lunalint_types::ClientSettings;

use crate::common::{FakeServer, TestContext};

#[test]
fn default_selector_takes_lua_files_only() {
    let channel = ChannelConfig::from_settings(&ClientSettings::default()).unwrap();
    let documents = channel.documents();

    assert_eq!(documents.scheme(), "file");
    assert!(documents.matches_path(Path::new("/w/init.lua")));
    assert!(documents.matches_path(Path::new("/w/deep/nested/mod.lua")));
    assert!(!documents.matches_path(Path::new("/w/notes.txt")));
    assert!(!documents.matches_path(Path::new("/w/init.lua.bak")));
}

#[test]
fn watch_scope_covers_documents_plus_configured_globs() {
    let toml = r#"
[watch]
extra_globs = ["**/.luacheckrc", "**/*.rockspec"]
"#;
    let settings = lunalint_config::parse(Path::new("lunalint.toml"), toml).unwrap();
    let channel = ChannelConfig::from_settings(&settings).unwrap();
    let watch = channel.watch();

    assert!(watch.covers(channel.documents()));
    assert_eq!(watch.patterns().len(), 3);
    assert!(watch.is_match(Path::new("/w/src/a.lua")));
    assert!(watch.is_match(Path::new("/w/.luacheckrc")));
    assert!(watch.is_match(Path::new("/w/pkg-1.0.rockspec")));
    assert!(!watch.is_match(Path::new("/w/README.md")));
}

#[tokio::test]
async fn default_server_resolves_beside_extension_root() {
    let server = FakeServer::new();
    let ctx = TestContext::new();
    let mut manager = server.manager();

    manager.activate(&ctx).unwrap();
    let location = manager.server_location().unwrap();
    // `../target/debug/lunalintd`, collapsed against the extension root.
    let expected = ctx
        .extension_root()
        .and_then(Path::parent)
        .unwrap()
        .join("target")
        .join("debug")
        .join(format!("lunalintd{EXE_SUFFIX}"));
    assert_eq!(location.path(), expected);
    assert_eq!(location.source(), LocationSource::InstallRoot);

    manager.deactivate().unwrap().await.unwrap();
}

#[tokio::test]
async fn configured_absolute_path_wins_over_install_root() {
    let ctx = TestContext::new();
    let override_path = ctx.workspace_root().join("tools").join("lunalintd");
    let toml = format!("[server]\npath = {:?}\n", override_path.display().to_string());
    let settings = lunalint_config::parse(Path::new("lunalint.toml"), &toml).unwrap();

    let server = FakeServer::new();
    let mut manager = lunalint_lsp::SessionManager::with_launcher(settings, server.launcher());
    manager.activate(&ctx).unwrap();

    let location = manager.server_location().unwrap();
    assert_eq!(location.path(), override_path);
    assert_eq!(location.source(), LocationSource::Override);

    manager.deactivate().unwrap().await.unwrap();
}

#[tokio::test]
async fn registrations_live_in_host_subscriptions() {
    let server = FakeServer::new();
    let ctx = TestContext::new();
    let mut manager = server.manager();

    manager.activate(&ctx).unwrap();
    assert_eq!(ctx.subscriptions().len(), 2);
    assert_eq!(ctx.commands(), vec!["lunalint.activate"]);
    let sink = ctx.last_sink().unwrap();
    assert_eq!(sink.scope().patterns(), ["**/*.lua"]);

    // Re-activation swaps the registrations instead of stacking them.
    manager.activate(&ctx).unwrap();
    assert_eq!(ctx.subscriptions().len(), 2);
    assert_eq!(ctx.commands(), vec!["lunalint.activate"]);
    assert_eq!(ctx.watchers_disposed(), 1);

    manager.ready().await.unwrap();
    assert_eq!(ctx.subscriptions().dispose_all(), 2);
    assert!(ctx.commands().is_empty());
    assert_eq!(ctx.watchers_disposed(), 2);

    manager.deactivate().unwrap().await.unwrap();
}

#[tokio::test]
async fn out_of_scope_documents_are_not_sent() {
    let server = FakeServer::new();
    let ctx = TestContext::new();
    let mut manager = server.manager();
    let notes = ctx.write("notes.txt", "bad\n");
    let script = ctx.write("init.lua", "return {}\n");

    manager.activate(&ctx).unwrap();
    manager.ready().await.unwrap();

    assert!(!manager.did_open(&notes, "bad\n").await);
    assert!(!manager.did_save(&notes, "bad\n").await);
    assert!(manager.did_open(&script, "return {}\n").await);

    assert!(server.wait_for(|s| !s.received("textDocument/didOpen").is_empty()).await);
    let opened = server.received("textDocument/didOpen");
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0]["params"]["textDocument"]["languageId"], "lua");
    assert!(
        opened[0]["params"]["textDocument"]["uri"]
            .as_str()
            .unwrap()
            .ends_with("/init.lua")
    );

    manager.deactivate().unwrap().await.unwrap();
}
