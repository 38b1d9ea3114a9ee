//! Per-message diagnostics: why a message was skipped or rendered degraded.

use serde::Serialize;

/// How a diagnostic affected its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// The message is absent from the output document.
    Skipped,
    /// The message is present but incomplete (fallback ordering, placeholder body, lossy text).
    Degraded,
}

/// Closed set of reasons a message can be skipped or degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticReason {
    /// The header block could not be parsed at all.
    Unparseable,
    /// The MIME structure is broken beyond recovery.
    MalformedMime,
    /// The `Date` header is missing or unparseable; archive order is used instead.
    MissingDate,
    /// A part's content could not be decoded cleanly and was substituted lossily.
    EncodingProblem,
    /// The HTML body could not be sanitized; a placeholder body was rendered.
    BodyUnrenderable,
}

impl DiagnosticReason {
    /// Effect of this reason on its message.
    pub fn severity(self) -> Severity {
        match self {
            Self::Unparseable | Self::MalformedMime => Severity::Skipped,
            Self::MissingDate | Self::EncodingProblem | Self::BodyUnrenderable => {
                Severity::Degraded
            }
        }
    }

    /// Short human label used in the run summary.
    pub fn label(self) -> &'static str {
        match self {
            Self::Unparseable => "unparseable headers",
            Self::MalformedMime => "malformed MIME",
            Self::MissingDate => "missing date",
            Self::EncodingProblem => "encoding problem",
            Self::BodyUnrenderable => "body unrenderable",
        }
    }
}

impl std::fmt::Display for DiagnosticReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A record describing a problem with one message. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// Position of the message in the original archive (0-based).
    pub message_index: usize,
    /// What went wrong.
    pub reason: DiagnosticReason,
    /// Always `true`: fatal problems are errors, not diagnostics.
    pub recoverable: bool,
    /// Free-form detail for the log and the summary.
    pub detail: String,
}

impl Diagnostic {
    pub fn new(message_index: usize, reason: DiagnosticReason, detail: impl Into<String>) -> Self {
        Self {
            message_index,
            reason,
            recoverable: true,
            detail: detail.into(),
        }
    }

    pub fn severity(&self) -> Severity {
        self.reason.severity()
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "message #{}: {} ({})",
            self.message_index + 1,
            self.reason,
            self.detail
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_mapping() {
        assert_eq!(DiagnosticReason::Unparseable.severity(), Severity::Skipped);
        assert_eq!(DiagnosticReason::MalformedMime.severity(), Severity::Skipped);
        assert_eq!(DiagnosticReason::MissingDate.severity(), Severity::Degraded);
        assert_eq!(
            DiagnosticReason::BodyUnrenderable.severity(),
            Severity::Degraded
        );
    }

    #[test]
    fn test_display_is_one_based() {
        let d = Diagnostic::new(4, DiagnosticReason::MissingDate, "no Date header");
        assert!(d.recoverable);
        assert_eq!(d.to_string(), "message #5: missing date (no Date header)");
    }
}
