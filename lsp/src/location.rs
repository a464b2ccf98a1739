//! Server executable resolution.

use std::path::{Component, Path, PathBuf};

use lunalint_types::ServerSettings;

use crate::host::ActivationContext;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("host did not provide an extension installation root")]
    MissingInstallRoot,
    #[error("extension installation root is not absolute: {}", .0.display())]
    RelativeInstallRoot(PathBuf),
    #[error("server command '{command}' not found in PATH")]
    NotOnPath {
        command: String,
        #[source]
        source: which::Error,
    },
}

/// Where the server executable was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationSource {
    /// Relative path under the installation root.
    InstallRoot,
    /// Configured override given as a path.
    Override,
    /// Configured override given as a bare command, found on `PATH`.
    SearchPath,
}

/// Absolute path to the server executable, fixed for one activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerLocation {
    path: PathBuf,
    source: LocationSource,
}

impl ServerLocation {
    /// Wrap an already-resolved executable path.
    #[must_use]
    pub fn new(path: PathBuf, source: LocationSource) -> Self {
        Self { path, source }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn source(&self) -> LocationSource {
        self.source
    }
}

/// Lexically collapse `.` and `..` without touching the filesystem.
///
/// `..` never climbs above a root or prefix; leading `..` on a relative
/// path is kept.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// Join `relative` onto the installation root and normalize.
pub(crate) fn absolute_under(root: Option<&Path>, relative: &Path) -> Result<PathBuf, ResolveError> {
    let root = root.ok_or(ResolveError::MissingInstallRoot)?;
    if !root.is_absolute() {
        return Err(ResolveError::RelativeInstallRoot(root.to_path_buf()));
    }
    Ok(normalize_path(&root.join(relative)))
}

fn is_bare_command(path: &Path) -> bool {
    let mut components = path.components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Resolve the server executable for one activation.
///
/// An override wins. Absolute overrides are used as given, bare command
/// names are looked up on `PATH`, and other relative overrides are taken
/// relative to the installation root. Existence of the default executable
/// is not checked here; a missing binary fails when the session spawns it.
pub fn resolve(
    ctx: &dyn ActivationContext,
    settings: &ServerSettings,
) -> Result<ServerLocation, ResolveError> {
    let Some(path) = settings.path_override() else {
        let path = ctx.as_absolute_path(settings.relative_path())?;
        return Ok(ServerLocation::new(path, LocationSource::InstallRoot));
    };

    if path.is_absolute() {
        return Ok(ServerLocation::new(
            normalize_path(path),
            LocationSource::Override,
        ));
    }

    if is_bare_command(path) {
        let found = which::which(path).map_err(|source| ResolveError::NotOnPath {
            command: path.display().to_string(),
            source,
        })?;
        return Ok(ServerLocation::new(found, LocationSource::SearchPath));
    }

    let path = ctx.as_absolute_path(path)?;
    Ok(ServerLocation::new(path, LocationSource::Override))
}
