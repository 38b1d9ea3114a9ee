//! Email parsing: streaming MBOX reader, header decoding, MIME walking, and normalization.

pub mod header;
pub mod mbox;
pub mod message;
pub mod mime;
