//! `mbox2pdf` turns a Google Takeout MBOX archive into one chronological,
//! bookmarked PDF.
//!
//! The library is a forward pipeline: [`parser::mbox`] streams raw records,
//! [`parser::message`] normalizes each one, [`sequence`] orders them,
//! [`render`] turns each message into print-ready blocks and [`export`]
//! writes the document. Per-message problems become diagnostics collected in
//! [`report`]; [`pipeline::convert`] ties it together.

pub mod config;
pub mod error;
pub mod export;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod render;
pub mod report;
pub mod sequence;
