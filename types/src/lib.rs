//! Settings types for the lunalint client.
//!
//! Pure data with no IO and no async. The config loader deserializes into
//! these types; the session manager consumes them.

#![allow(clippy::missing_errors_doc)]

mod settings;

pub use settings::{
    CLIENT_DISPLAY_NAME, CLIENT_NAME, ClientSettings, DocumentSettings, SERVER_BINARY,
    ServerSettings, SettingsError, TransportKind, WatchSettings,
};
