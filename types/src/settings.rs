//! Resolved client settings shared across crates.
//!
//! Raw TOML deserialization structs stay private to this module; the
//! validated types are produced at the parse boundary via
//! `#[serde(try_from)]`. Holding a [`ClientSettings`] is proof that every
//! field passed validation.

use std::env::consts::EXE_SUFFIX;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Client identifier used for logging and the `clientInfo` handshake field.
pub const CLIENT_NAME: &str = "lunalint";

/// Human-readable client name.
pub const CLIENT_DISPLAY_NAME: &str = "Lunalint";

/// Server executable stem; the platform suffix is appended at resolution.
pub const SERVER_BINARY: &str = "lunalintd";

#[derive(Debug, Clone, thiserror::Error)]
pub enum SettingsError {
    #[error("server path must not be empty")]
    EmptyServerPath,
    #[error("server relative_path must be relative, got {}", .0.display())]
    AbsoluteRelativePath(PathBuf),
    #[error("document scheme must not be empty")]
    EmptyScheme,
    #[error("document extension must not be empty")]
    EmptyExtension,
    #[error("document extension must not contain glob or path characters: {0}")]
    InvalidExtension(String),
    #[error("language_id must not be empty when set")]
    EmptyLanguageId,
    #[error("watch glob must not be empty")]
    EmptyWatchGlob,
}

/// How the channel to the server is carried.
///
/// Only a stdio duplex stream is supported; unknown transports are
/// rejected when the settings are parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Stdio,
}

impl TransportKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
        }
    }
}

fn default_relative_path() -> PathBuf {
    Path::new("..")
        .join("target")
        .join("debug")
        .join(format!("{SERVER_BINARY}{EXE_SUFFIX}"))
}

#[derive(Deserialize)]
struct RawServerSettings {
    path: Option<PathBuf>,
    relative_path: Option<PathBuf>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    transport: TransportKind,
}

/// Where and how to start the analysis server.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawServerSettings")]
pub struct ServerSettings {
    path_override: Option<PathBuf>,
    relative_path: PathBuf,
    args: Vec<String>,
    transport: TransportKind,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            path_override: None,
            relative_path: default_relative_path(),
            args: Vec::new(),
            transport: TransportKind::Stdio,
        }
    }
}

impl TryFrom<RawServerSettings> for ServerSettings {
    type Error = SettingsError;

    fn try_from(raw: RawServerSettings) -> Result<Self, Self::Error> {
        if let Some(path) = &raw.path
            && path.as_os_str().is_empty()
        {
            return Err(SettingsError::EmptyServerPath);
        }
        let relative_path = match raw.relative_path {
            Some(p) if p.as_os_str().is_empty() => return Err(SettingsError::EmptyServerPath),
            Some(p) if p.is_absolute() => return Err(SettingsError::AbsoluteRelativePath(p)),
            Some(p) => p,
            None => default_relative_path(),
        };
        Ok(Self {
            path_override: raw.path,
            relative_path,
            args: raw.args,
            transport: raw.transport,
        })
    }
}

impl ServerSettings {
    /// Explicit executable path or command name, preferred over `relative_path`.
    #[must_use]
    pub fn path_override(&self) -> Option<&Path> {
        self.path_override.as_deref()
    }

    /// Path of the executable relative to the extension installation root.
    #[must_use]
    pub fn relative_path(&self) -> &Path {
        &self.relative_path
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    #[must_use]
    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Replace the override. Empty paths are ignored.
    #[must_use]
    pub fn with_path_override(mut self, path: PathBuf) -> Self {
        if !path.as_os_str().is_empty() {
            self.path_override = Some(path);
        }
        self
    }
}

#[derive(Deserialize)]
struct RawDocumentSettings {
    scheme: Option<String>,
    extension: Option<String>,
    language_id: Option<String>,
}

/// Which open documents are synchronized to the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawDocumentSettings")]
pub struct DocumentSettings {
    scheme: String,
    extension: String,
    language_id: Option<String>,
}

impl Default for DocumentSettings {
    fn default() -> Self {
        Self {
            scheme: "file".to_string(),
            extension: "lua".to_string(),
            language_id: Some("lua".to_string()),
        }
    }
}

impl TryFrom<RawDocumentSettings> for DocumentSettings {
    type Error = SettingsError;

    fn try_from(raw: RawDocumentSettings) -> Result<Self, Self::Error> {
        let defaults = Self::default();
        let scheme = raw.scheme.unwrap_or(defaults.scheme);
        if scheme.trim().is_empty() {
            return Err(SettingsError::EmptyScheme);
        }
        let extension = raw
            .extension
            .map(|ext| ext.trim().trim_start_matches('.').to_string())
            .unwrap_or(defaults.extension);
        if extension.is_empty() {
            return Err(SettingsError::EmptyExtension);
        }
        if extension
            .chars()
            .any(|c| matches!(c, '*' | '?' | '[' | ']' | '{' | '}' | '/' | '\\'))
        {
            return Err(SettingsError::InvalidExtension(extension));
        }
        let language_id = match raw.language_id {
            Some(id) if id.trim().is_empty() => return Err(SettingsError::EmptyLanguageId),
            Some(id) => Some(id),
            None => defaults.language_id,
        };
        Ok(Self {
            scheme,
            extension,
            language_id,
        })
    }
}

impl DocumentSettings {
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// File extension without the leading dot (e.g. `lua`).
    #[must_use]
    pub fn extension(&self) -> &str {
        &self.extension
    }

    #[must_use]
    pub fn language_id(&self) -> Option<&str> {
        self.language_id.as_deref()
    }

    /// Glob covering every file with the configured extension.
    #[must_use]
    pub fn pattern(&self) -> String {
        format!("**/*.{}", self.extension)
    }
}

#[derive(Deserialize)]
struct RawWatchSettings {
    #[serde(default)]
    extra_globs: Vec<String>,
}

/// Additional file-watch globs on top of the document pattern.
///
/// The watcher always covers the document pattern; entries here only widen
/// it (e.g. a `**/.clientrc` reload marker).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(try_from = "RawWatchSettings")]
pub struct WatchSettings {
    extra_globs: Vec<String>,
}

impl TryFrom<RawWatchSettings> for WatchSettings {
    type Error = SettingsError;

    fn try_from(raw: RawWatchSettings) -> Result<Self, Self::Error> {
        if raw.extra_globs.iter().any(|g| g.trim().is_empty()) {
            return Err(SettingsError::EmptyWatchGlob);
        }
        Ok(Self {
            extra_globs: raw.extra_globs,
        })
    }
}

impl WatchSettings {
    #[must_use]
    pub fn extra_globs(&self) -> &[String] {
        &self.extra_globs
    }
}

/// Complete client configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientSettings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub documents: DocumentSettings,
    #[serde(default)]
    pub watch: WatchSettings,
}

impl ClientSettings {
    #[must_use]
    pub fn name(&self) -> &'static str {
        CLIENT_NAME
    }

    #[must_use]
    pub fn display_name(&self) -> &'static str {
        CLIENT_DISPLAY_NAME
    }
}
