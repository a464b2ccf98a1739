//! Document and file-watch scope declarations.
//!
//! A [`DocumentSelector`] decides which open documents are synchronized to
//! the server; a [`WatchScope`] decides which filesystem changes are
//! forwarded. The watch scope is always built from the selector's pattern
//! plus optional extras, so it covers every in-scope document.

use std::path::Path;

use globset::{GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};
use lunalint_types::{ClientSettings, DocumentSettings, TransportKind};

#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    #[error("invalid glob '{pattern}': {source}")]
    Glob {
        pattern: String,
        #[source]
        source: globset::Error,
    },
    #[error("watch scope needs at least one pattern")]
    EmptyWatchScope,
}

fn build_glob(pattern: &str) -> Result<globset::Glob, ScopeError> {
    let mut glob = GlobBuilder::new(pattern);
    glob.literal_separator(true);
    if cfg!(windows) {
        glob.case_insensitive(true);
    }
    glob.build().map_err(|source| ScopeError::Glob {
        pattern: pattern.to_string(),
        source,
    })
}

/// `{scheme, pattern, language}` filter for synchronized documents.
#[derive(Debug, Clone)]
pub struct DocumentSelector {
    scheme: String,
    pattern: String,
    language: Option<String>,
    matcher: GlobMatcher,
}

impl DocumentSelector {
    pub fn new(
        scheme: impl Into<String>,
        pattern: impl Into<String>,
        language: Option<String>,
    ) -> Result<Self, ScopeError> {
        let pattern = pattern.into();
        let matcher = build_glob(&pattern)?.compile_matcher();
        Ok(Self {
            scheme: scheme.into(),
            pattern,
            language,
            matcher,
        })
    }

    pub fn from_settings(settings: &DocumentSettings) -> Result<Self, ScopeError> {
        Self::new(
            settings.scheme(),
            settings.pattern(),
            settings.language_id().map(str::to_string),
        )
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    #[must_use]
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// Match a local filesystem path. Only a `file` selector matches paths.
    #[must_use]
    pub fn matches_path(&self, path: &Path) -> bool {
        self.scheme == "file" && self.matcher.is_match(path)
    }
}

/// Glob set whose matches are forwarded as watched-file events.
#[derive(Debug, Clone)]
pub struct WatchScope {
    patterns: Vec<String>,
    set: GlobSet,
}

impl WatchScope {
    pub fn new(patterns: Vec<String>) -> Result<Self, ScopeError> {
        if patterns.is_empty() {
            return Err(ScopeError::EmptyWatchScope);
        }
        let mut builder = GlobSetBuilder::new();
        for pattern in &patterns {
            builder.add(build_glob(pattern)?);
        }
        let set = builder.build().map_err(|source| ScopeError::Glob {
            pattern: patterns.join(", "),
            source,
        })?;
        Ok(Self { patterns, set })
    }

    /// The selector's own pattern first, then `extra` (deduplicated).
    pub fn for_documents(selector: &DocumentSelector, extra: &[String]) -> Result<Self, ScopeError> {
        let mut patterns = vec![selector.pattern().to_string()];
        for pattern in extra {
            if !patterns.contains(pattern) {
                patterns.push(pattern.clone());
            }
        }
        Self::new(patterns)
    }

    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    #[must_use]
    pub fn is_match(&self, path: &Path) -> bool {
        self.set.is_match(path)
    }

    /// Whether this scope includes the selector's pattern verbatim.
    #[must_use]
    pub fn covers(&self, selector: &DocumentSelector) -> bool {
        self.patterns.iter().any(|p| p == selector.pattern())
    }
}

/// Immutable description of one session's channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    transport: TransportKind,
    documents: DocumentSelector,
    watch: WatchScope,
}

impl ChannelConfig {
    pub fn from_settings(settings: &ClientSettings) -> Result<Self, ScopeError> {
        let documents = DocumentSelector::from_settings(&settings.documents)?;
        let watch = WatchScope::for_documents(&documents, settings.watch.extra_globs())?;
        Ok(Self {
            transport: settings.server.transport(),
            documents,
            watch,
        })
    }

    #[must_use]
    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    #[must_use]
    pub fn documents(&self) -> &DocumentSelector {
        &self.documents
    }

    #[must_use]
    pub fn watch(&self) -> &WatchScope {
        &self.watch
    }
}
