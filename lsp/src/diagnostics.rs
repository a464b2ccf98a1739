//! Diagnostics published by the current session's server.
//!
//! The store is owned by one session at a time. Publishes tagged with any
//! other session are refused, so a replaced server can never repopulate
//! it. Each file's findings are kept in source order, exact repeats
//! dropped.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::types::{DiagnosticsSnapshot, LintDiagnostic, SessionId};

fn source_order(a: &LintDiagnostic, b: &LintDiagnostic) -> Ordering {
    a.start()
        .cmp(&b.start())
        .then_with(|| a.end().cmp(&b.end()))
        .then_with(|| a.severity().cmp(&b.severity()))
        .then_with(|| a.message().cmp(b.message()))
}

#[derive(Debug, Default)]
pub(crate) struct DiagnosticsStore {
    owner: Option<SessionId>,
    files: BTreeMap<PathBuf, Vec<LintDiagnostic>>,
}

impl DiagnosticsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand the store to `owner`, or to nobody, dropping everything held.
    pub fn reset(&mut self, owner: Option<SessionId>) {
        self.owner = owner;
        self.files.clear();
    }

    /// Replace `path`'s findings with a fresh publish from `session`.
    ///
    /// An empty publish clears the file. Returns `false`, leaving the store
    /// untouched, when `session` does not own it.
    pub fn publish(
        &mut self,
        session: SessionId,
        path: PathBuf,
        mut items: Vec<LintDiagnostic>,
    ) -> bool {
        if self.owner != Some(session) {
            return false;
        }
        items.sort_by(source_order);
        items.dedup();
        if items.is_empty() {
            self.files.remove(&path);
        } else {
            self.files.insert(path, items);
        }
        true
    }

    /// Files with at least one error first, each group in path order.
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let (mut files, clean): (Vec<_>, Vec<_>) = self
            .files
            .iter()
            .map(|(path, items)| (path.clone(), items.clone()))
            .partition(|(_, items)| items.iter().any(|d| d.severity().is_error()));
        files.extend(clean);
        DiagnosticsSnapshot::new(files)
    }

    pub fn errors_for_files(&self, paths: &[PathBuf]) -> Vec<(PathBuf, Vec<LintDiagnostic>)> {
        let mut out = Vec::new();
        for path in paths {
            let Some(items) = self.files.get(path) else {
                continue;
            };
            let errors: Vec<LintDiagnostic> = items
                .iter()
                .filter(|d| d.severity().is_error())
                .cloned()
                .collect();
            if !errors.is_empty() {
                out.push((path.clone(), errors));
            }
        }
        out
    }
}
