//! Raw archive records and the canonical normalized message.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, Utc};

use super::address::EmailAddress;
use super::attachment::Attachment;

/// One message as cut out of the archive, before any decoding.
///
/// Created by [`MboxReader`](crate::parser::mbox::MboxReader) and consumed by
/// the normalizer; never kept around after that.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Sequential index within the archive (0, 1, 2, …).
    pub index: usize,
    /// Byte offset of the `From ` separator line inside the archive.
    pub offset: u64,
    /// RFC 5322 bytes with the separator line removed and `>From ` quoting undone.
    pub bytes: Vec<u8>,
}

/// Decoded header fields keyed by lowercase name.
///
/// Lookups are case-insensitive and a repeated header keeps its last value.
/// Backed by a `BTreeMap` so iteration order is stable between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    fields: BTreeMap<String, String>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, replacing any earlier value with the same name.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.fields.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// When a message was sent, or where it sits in the archive if we cannot tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTime {
    /// Parsed `Date` header; the original offset is kept for display.
    Dated(DateTime<FixedOffset>),
    /// No usable `Date` header; ordered by archive index after all dated messages.
    Undated { index: usize },
}

impl MessageTime {
    /// The instant in UTC, if known.
    pub fn utc(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Dated(dt) => Some(dt.with_timezone(&Utc)),
            Self::Undated { .. } => None,
        }
    }

    /// Format for the header block, keeping the sender's offset.
    pub fn display(&self) -> String {
        match self {
            Self::Dated(dt) => dt.format("%a, %d %b %Y %H:%M:%S %z").to_string(),
            Self::Undated { .. } => "Unknown date".to_string(),
        }
    }

    /// Short form used in bookmarks.
    pub fn short_display(&self) -> String {
        match self {
            Self::Dated(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
            Self::Undated { .. } => "undated".to_string(),
        }
    }
}

/// Total ordering used by the sequencer.
///
/// Dated messages compare by UTC instant; every undated message sorts after
/// every dated one, and undated messages compare by archive index.
impl Ord for MessageTime {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            // chrono compares DateTime values on their UTC instant
            (Self::Dated(a), Self::Dated(b)) => a.cmp(b),
            (Self::Dated(_), Self::Undated { .. }) => Ordering::Less,
            (Self::Undated { .. }, Self::Dated(_)) => Ordering::Greater,
            (Self::Undated { index: a }, Self::Undated { index: b }) => a.cmp(b),
        }
    }
}

impl PartialOrd for MessageTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The canonical, decoded form of one email used by every downstream stage.
#[derive(Debug, Clone)]
pub struct NormalizedMessage {
    /// Position in the original archive.
    pub index: usize,
    /// Every decoded header field.
    pub headers: HeaderMap,
    pub from: Option<EmailAddress>,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    /// Decoded subject, empty when the header is missing.
    pub subject: String,
    pub message_id: Option<String>,
    /// Gmail labels from `X-Gmail-Labels`.
    pub labels: Vec<String>,
    pub sent_at: MessageTime,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    /// Set when neither body carries any content.
    pub body_empty: bool,
    pub attachments: Vec<Attachment>,
}

impl NormalizedMessage {
    /// Sender for display, with the archive's conventional fallback.
    pub fn from_display(&self) -> String {
        self.from
            .as_ref()
            .filter(|a| !a.is_empty())
            .map(EmailAddress::display)
            .unwrap_or_else(|| "Unknown Sender".to_string())
    }

    /// Subject for display, with the archive's conventional fallback.
    pub fn subject_display(&self) -> &str {
        if self.subject.trim().is_empty() {
            "No Subject"
        } else {
            &self.subject
        }
    }
}

/// A normalized message tagged with its final place in the document.
#[derive(Debug, Clone)]
pub struct OrderedMessage {
    /// 0-based position in chronological order.
    pub position: usize,
    pub message: NormalizedMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dated(s: &str) -> MessageTime {
        MessageTime::Dated(DateTime::parse_from_rfc2822(s).unwrap())
    }

    #[test]
    fn test_header_map_case_insensitive_last_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("Subject", "first");
        headers.insert("SUBJECT", "second");
        assert_eq!(headers.get("subject"), Some("second"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_time_order_uses_utc_instant() {
        // 10:00 +0200 is 08:00 UTC, earlier than 09:00 UTC
        let a = dated("Mon, 01 Mar 2021 10:00:00 +0200");
        let b = dated("Mon, 01 Mar 2021 09:00:00 +0000");
        assert!(a < b);
    }

    #[test]
    fn test_undated_sorts_after_dated() {
        let dated = dated("Mon, 01 Mar 2021 10:00:00 +0000");
        let undated = MessageTime::Undated { index: 0 };
        assert!(dated < undated);
        assert!(MessageTime::Undated { index: 1 } < MessageTime::Undated { index: 2 });
    }

    #[test]
    fn test_display_keeps_original_offset() {
        let t = dated("Mon, 01 Mar 2021 10:00:00 -0500");
        assert_eq!(t.display(), "Mon, 01 Mar 2021 10:00:00 -0500");
        assert_eq!(MessageTime::Undated { index: 3 }.display(), "Unknown date");
    }
}
