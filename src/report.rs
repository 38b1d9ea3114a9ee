//! Run-wide diagnostic accumulation and the end-of-run summary.
//!
//! The sink is an ordinary value owned by the pipeline. Stages return their
//! diagnostics; the pipeline folds them in here.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::diagnostic::{Diagnostic, Severity};

/// Collects diagnostics for one conversion run.
#[derive(Debug, Default)]
pub struct FailureSink {
    found: usize,
    diagnostics: Vec<Diagnostic>,
}

impl FailureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more raw record read from the archive.
    pub fn note_found(&mut self) {
        self.found += 1;
    }

    pub fn found(&self) -> usize {
        self.found
    }

    pub fn record(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        self.diagnostics.extend(diagnostics);
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Number of distinct messages with a skip diagnostic.
    pub fn skipped_count(&self) -> usize {
        self.indices_with(Severity::Skipped).len()
    }

    fn indices_with(&self, severity: Severity) -> BTreeSet<usize> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity() == severity)
            .map(|d| d.message_index)
            .collect()
    }

    /// Consume the sink and produce the run summary.
    ///
    /// Diagnostics are ordered by message index; a message counts as degraded
    /// when it has at least one degraded diagnostic and was not skipped.
    pub fn into_summary(mut self, output: Option<PathBuf>) -> RunSummary {
        let skipped = self.indices_with(Severity::Skipped);
        let degraded: BTreeSet<usize> = self
            .indices_with(Severity::Degraded)
            .difference(&skipped)
            .copied()
            .collect();

        self.diagnostics.sort_by_key(|d| d.message_index);

        RunSummary {
            found: self.found,
            rendered: self.found.saturating_sub(skipped.len() + degraded.len()),
            degraded: degraded.len(),
            skipped: skipped.len(),
            oldest: None,
            newest: None,
            output,
            diagnostics: self.diagnostics,
        }
    }
}

/// What happened during a run, for display by the caller.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Raw records read from the archive.
    pub found: usize,
    /// Messages rendered without any diagnostic.
    pub rendered: usize,
    /// Messages in the output with fallback ordering, placeholder body or lossy text.
    pub degraded: usize,
    /// Messages absent from the output.
    pub skipped: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    /// Where the document was written; `None` when nothing was written.
    pub output: Option<PathBuf>,
    pub diagnostics: Vec<Diagnostic>,
}

impl RunSummary {
    /// Messages present in the output document.
    pub fn processed(&self) -> usize {
        self.rendered + self.degraded
    }
}
