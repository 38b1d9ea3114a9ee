//! Turn one raw archive record into a [`NormalizedMessage`].
//!
//! Failures stay here: a broken record becomes a skip diagnostic, a damaged but
//! usable record becomes a message plus degraded diagnostics.

use tracing::{debug, warn};

use crate::model::address::EmailAddress;
use crate::model::diagnostic::{Diagnostic, DiagnosticReason};
use crate::model::message::{HeaderMap, MessageTime, NormalizedMessage, RawMessage};
use crate::parser::header::{self, extract_angle_bracket, parse_date, parse_header_block};
use crate::parser::mime;

/// Outcome of normalizing one record.
#[derive(Debug)]
pub enum Normalized {
    /// The message is usable. `diagnostics` holds degraded-severity notes.
    Ok {
        message: Box<NormalizedMessage>,
        diagnostics: Vec<Diagnostic>,
    },
    /// The message cannot be used at all.
    Skipped(Diagnostic),
}

impl Normalized {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }
}

/// Normalize one raw record. Never panics on bad input and never returns an error:
/// every failure is expressed as a [`Diagnostic`].
pub fn normalize(raw: &RawMessage) -> Normalized {
    let index = raw.index;
    let bytes = header::skip_envelope_lines(&raw.bytes);
    let (header_bytes, _) = header::split_header_block(bytes);

    let headers = match parse_header_block(header_bytes) {
        Ok(headers) => headers,
        Err(e) => {
            warn!(index, offset = raw.offset, error = %e, "Skipping message with unparseable headers");
            return Normalized::Skipped(Diagnostic::new(
                index,
                DiagnosticReason::Unparseable,
                e.to_string(),
            ));
        }
    };

    let content = match mime::extract_content(bytes) {
        Ok(content) => content,
        Err(e) => {
            warn!(index, offset = raw.offset, error = %e, "Skipping message with malformed MIME");
            return Normalized::Skipped(Diagnostic::new(
                index,
                DiagnosticReason::MalformedMime,
                e.to_string(),
            ));
        }
    };

    let mut diagnostics = Vec::new();

    let sent_at = match headers.get("date").and_then(parse_date) {
        Some(dt) => MessageTime::Dated(dt),
        None => {
            let detail = match headers.get("date") {
                Some(value) => format!("unparseable Date header '{value}'"),
                None => "no Date header".to_string(),
            };
            diagnostics.push(Diagnostic::new(index, DiagnosticReason::MissingDate, detail));
            MessageTime::Undated { index }
        }
    };

    for problem in content.encoding_problems {
        diagnostics.push(Diagnostic::new(
            index,
            DiagnosticReason::EncodingProblem,
            problem,
        ));
    }

    let body_empty = content.text.is_none() && content.html.is_none();
    let message = NormalizedMessage {
        index,
        from: headers
            .get("from")
            .map(EmailAddress::parse)
            .filter(|a| !a.is_empty()),
        to: address_list(&headers, "to"),
        cc: address_list(&headers, "cc"),
        subject: headers.get("subject").unwrap_or_default().to_string(),
        message_id: headers.get("message-id").map(extract_angle_bracket),
        labels: gmail_labels(&headers),
        sent_at,
        body_text: content.text,
        body_html: content.html,
        body_empty,
        attachments: content.attachments,
        headers,
    };

    debug!(
        index,
        attachments = message.attachments.len(),
        body_empty,
        "Normalized message"
    );

    Normalized::Ok {
        message: Box::new(message),
        diagnostics,
    }
}

fn address_list(headers: &HeaderMap, name: &str) -> Vec<EmailAddress> {
    headers
        .get(name)
        .map(EmailAddress::parse_list)
        .unwrap_or_default()
}

fn gmail_labels(headers: &HeaderMap) -> Vec<String> {
    headers
        .get("x-gmail-labels")
        .map(|s| {
            s.split(',')
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
