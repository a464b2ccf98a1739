//! Configuration loading for the lunalint client.
//!
//! Settings come from the first TOML file found, in order: an explicit
//! path, `<workspace>/.lunalint.toml`, then `~/.lunalint/config.toml`.
//! With no file the defaults apply. The `LUNALINT_SERVER_PATH` variable
//! overrides `[server] path` from whichever file was used.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::{env, fs};

use lunalint_types::ClientSettings;

/// Per-workspace config file name.
pub const WORKSPACE_CONFIG_FILE: &str = ".lunalint.toml";

/// Environment variable overriding the server executable path.
pub const SERVER_PATH_ENV: &str = "LUNALINT_SERVER_PATH";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

/// Where the settings in a [`LoadedConfig`] came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Explicit(PathBuf),
    Workspace(PathBuf),
    User(PathBuf),
    Defaults,
}

impl ConfigSource {
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Explicit(path) | Self::Workspace(path) | Self::User(path) => Some(path),
            Self::Defaults => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub settings: ClientSettings,
    pub source: ConfigSource,
}

/// `~/.lunalint/config.toml`, if a home directory is known.
#[must_use]
pub fn user_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".lunalint").join("config.toml"))
}

/// Parse settings from TOML text. `path` is only used for error reporting.
pub fn parse(path: &Path, content: &str) -> Result<ClientSettings, ConfigError> {
    toml::from_str(content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn read(path: &Path) -> Result<ClientSettings, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| {
        tracing::warn!("Failed to read config at {}: {source}", path.display());
        ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }
    })?;
    parse(path, &content).inspect_err(|e| tracing::warn!("{e}"))
}

/// Load settings for `workspace`.
///
/// An explicit path must exist; the other candidates are skipped when
/// missing. A file that exists but cannot be read or parsed is an error
/// rather than a silent fall-through to the next candidate.
pub fn load(explicit: Option<&Path>, workspace: &Path) -> Result<LoadedConfig, ConfigError> {
    let mut loaded = load_file(explicit, workspace, user_config_path())?;
    loaded.settings = apply_server_override(loaded.settings, env::var_os(SERVER_PATH_ENV));
    Ok(loaded)
}

fn load_file(
    explicit: Option<&Path>,
    workspace: &Path,
    user: Option<PathBuf>,
) -> Result<LoadedConfig, ConfigError> {
    if let Some(path) = explicit {
        return Ok(LoadedConfig {
            settings: read(path)?,
            source: ConfigSource::Explicit(path.to_path_buf()),
        });
    }

    let workspace_path = workspace.join(WORKSPACE_CONFIG_FILE);
    if workspace_path.is_file() {
        return Ok(LoadedConfig {
            settings: read(&workspace_path)?,
            source: ConfigSource::Workspace(workspace_path),
        });
    }

    if let Some(user_path) = user
        && user_path.is_file()
    {
        return Ok(LoadedConfig {
            settings: read(&user_path)?,
            source: ConfigSource::User(user_path),
        });
    }

    tracing::debug!("No config file found, using defaults");
    Ok(LoadedConfig {
        settings: ClientSettings::default(),
        source: ConfigSource::Defaults,
    })
}

/// Replace `[server] path` with `value` when it is set and non-empty.
#[must_use]
pub fn apply_server_override(mut settings: ClientSettings, value: Option<OsString>) -> ClientSettings {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        tracing::debug!("{SERVER_PATH_ENV} overrides the configured server path");
        settings.server = settings.server.with_path_override(PathBuf::from(value));
    }
    settings
}
