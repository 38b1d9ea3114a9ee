//! Chronological ordering of normalized messages.
//!
//! This is the pipeline's only full-buffering barrier: nothing can be emitted
//! until every message's timestamp is known, so memory grows with
//! O(messages × average normalized size). Attachments dominate that figure for
//! large Takeout exports.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::model::message::{NormalizedMessage, OrderedMessage};

/// Buffers normalized messages and releases them in chronological order.
///
/// Order: dated messages by UTC instant, ties by archive index; then every
/// undated message in archive order.
#[derive(Debug, Default)]
pub struct Sequencer {
    buffer: Vec<NormalizedMessage>,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: NormalizedMessage) {
        self.buffer.push(message);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Oldest and newest known send times among buffered messages.
    pub fn date_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        date_range(&self.buffer)
    }

    /// Sort and tag every buffered message with its final position.
    pub fn finish(self) -> Vec<OrderedMessage> {
        sequence(self.buffer)
    }
}

/// Order a complete set of messages.
pub fn sequence(mut messages: Vec<NormalizedMessage>) -> Vec<OrderedMessage> {
    messages.sort_by(|a, b| a.sent_at.cmp(&b.sent_at).then(a.index.cmp(&b.index)));
    debug!(count = messages.len(), "Sequenced messages");
    messages
        .into_iter()
        .enumerate()
        .map(|(position, message)| OrderedMessage { position, message })
        .collect()
}

/// Oldest and newest known send times.
pub fn date_range(messages: &[NormalizedMessage]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let mut dates = messages.iter().filter_map(|m| m.sent_at.utc());
    let first = dates.next()?;
    Some(dates.fold((first, first), |(min, max), d| (min.min(d), max.max(d))))
}
