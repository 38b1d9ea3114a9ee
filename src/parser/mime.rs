//! MIME tree walking: classify every part as a body or an attachment.
//!
//! `mail-parser` does the heavy lifting (transfer encodings and charsets);
//! this module decides what each leaf *is* for the document.

use mail_parser::{MessageParser, MessagePart, MimeHeaders, PartType};
use thiserror::Error;
use tracing::debug;

use crate::model::attachment::{synthesize_filename, Attachment};
use crate::parser::header::decode_charset;

/// Maximum nesting depth for multipart parts (guards against adversarial input).
pub const MAX_DEPTH: usize = 10;

/// Why a message's MIME structure could not be used.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MimeError {
    #[error("MIME parser could not read the message")]
    Unparseable,

    #[error("multipart nesting deeper than {MAX_DEPTH} levels")]
    TooDeep,
}

/// What a MIME part means for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartKind {
    PlainText,
    Html,
    Attachment,
    NestedMultipart,
}

/// The facts about a part that classification depends on.
#[derive(Debug, Clone, Copy)]
pub struct PartInfo<'a> {
    /// Lowercase `type/subtype`.
    pub content_type: &'a str,
    /// Lowercase disposition type (`inline`, `attachment`), if declared.
    pub disposition: Option<&'a str>,
    pub has_filename: bool,
}

/// Classify a part. Pure: depends only on the part's declared headers.
pub fn classify(info: &PartInfo<'_>) -> PartKind {
    if info.content_type.starts_with("multipart/") {
        return PartKind::NestedMultipart;
    }
    if info.disposition == Some("attachment") || info.has_filename {
        return PartKind::Attachment;
    }
    match info.content_type {
        "text/plain" => PartKind::PlainText,
        "text/html" => PartKind::Html,
        _ => PartKind::Attachment,
    }
}

/// Everything extracted from one message's MIME tree.
#[derive(Debug, Default)]
pub struct MimeContent {
    /// `text/plain` bodies joined by a blank line, if any.
    pub text: Option<String>,
    /// `text/html` bodies joined by a blank line, if any.
    pub html: Option<String>,
    pub attachments: Vec<Attachment>,
    /// Descriptions of parts whose content had to be decoded lossily.
    pub encoding_problems: Vec<String>,
}

#[derive(Default)]
struct Collector {
    text: Vec<String>,
    html: Vec<String>,
    attachments: Vec<Attachment>,
    encoding_problems: Vec<String>,
}

/// Parse a full RFC 5322 message (headers and body) and collect its bodies and attachments.
pub fn extract_content(message_bytes: &[u8]) -> Result<MimeContent, MimeError> {
    let parser = MessageParser::default();
    let msg = parser.parse(message_bytes).ok_or(MimeError::Unparseable)?;
    let root = msg.parts.first().ok_or(MimeError::Unparseable)?;

    let mut collector = Collector::default();
    walk(&msg, root, 0, &mut collector)?;

    Ok(MimeContent {
        text: join_bodies(collector.text),
        html: join_bodies(collector.html),
        attachments: collector.attachments,
        encoding_problems: collector.encoding_problems,
    })
}

fn walk(
    msg: &mail_parser::Message<'_>,
    part: &MessagePart<'_>,
    depth: usize,
    out: &mut Collector,
) -> Result<(), MimeError> {
    if depth > MAX_DEPTH {
        return Err(MimeError::TooDeep);
    }

    let content_type = content_type_of(part);
    let disposition = part
        .content_disposition()
        .map(|d| d.ctype().to_ascii_lowercase());
    let filename = part.attachment_name().map(str::to_string);

    let kind = match &part.body {
        PartType::Multipart(_) => PartKind::NestedMultipart,
        _ => classify(&PartInfo {
            content_type: &content_type,
            disposition: disposition.as_deref(),
            has_filename: filename.is_some(),
        }),
    };

    if part.is_encoding_problem {
        out.encoding_problems
            .push(format!("{content_type} part decoded lossily"));
    }

    match kind {
        PartKind::NestedMultipart => {
            if let PartType::Multipart(children) = &part.body {
                for &child in children {
                    if let Some(child_part) = msg.part(child) {
                        walk(msg, child_part, depth + 1, out)?;
                    }
                }
            }
        }
        PartKind::PlainText => out.text.push(text_of(part)),
        PartKind::Html => out.html.push(text_of(part)),
        PartKind::Attachment => {
            let index = out.attachments.len();
            let filename = filename
                .filter(|f| !f.trim().is_empty())
                .unwrap_or_else(|| synthesize_filename(index, &content_type));
            debug!(
                filename = %filename,
                content_type = %content_type,
                depth,
                "Found attachment"
            );
            out.attachments.push(Attachment {
                filename,
                content_id: part.content_id().map(clean_content_id),
                inline: disposition.as_deref() == Some("inline"),
                content: part.contents().to_vec(),
                mime_type: content_type,
            });
        }
    }

    Ok(())
}

/// Lowercase `type/subtype`, defaulting to `text/plain` as RFC 2045 does.
fn content_type_of(part: &MessagePart<'_>) -> String {
    part.content_type()
        .map(|ct| match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub),
            None => ct.ctype().to_string(),
        })
        .unwrap_or_else(|| "text/plain".to_string())
        .to_ascii_lowercase()
}

/// Text content of a body part, decoding by declared charset if mail-parser left it binary.
fn text_of(part: &MessagePart<'_>) -> String {
    match &part.body {
        PartType::Text(text) | PartType::Html(text) => text.to_string(),
        _ => {
            let charset = part
                .content_type()
                .and_then(|ct| ct.attribute("charset"))
                .unwrap_or("utf-8");
            decode_charset(charset, part.contents())
        }
    }
}

fn clean_content_id(cid: &str) -> String {
    cid.trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_string()
}

fn join_bodies(parts: Vec<String>) -> Option<String> {
    let parts: Vec<String> = parts
        .into_iter()
        .filter(|p| !p.trim().is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}
