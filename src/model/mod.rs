//! Core data model: raw records, normalized messages, attachments, diagnostics.

pub mod address;
pub mod attachment;
pub mod diagnostic;
pub mod message;
