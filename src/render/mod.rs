//! Per-message rendering: one ordered message in, one [`Fragment`] out.

pub mod fragment;
pub mod sanitize;

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::model::address::EmailAddress;
use crate::model::diagnostic::{Diagnostic, DiagnosticReason};
use crate::model::message::{NormalizedMessage, OrderedMessage};
use fragment::{Block, Fragment};
use sanitize::{sanitize_html, SanitizeOptions};

pub const NO_CONTENT: &str = "[No content available]";
pub const EMPTY_CONTENT: &str = "[Empty content]";
pub const BODY_UNRENDERABLE: &str = "[Body unrenderable]";

/// Rendering settings shared by every message of a run.
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    /// Inline image attachments and `cid:`/`data:` pictures.
    pub embed_images: bool,
    /// HTML bodies larger than this are replaced by a placeholder.
    pub max_html_bytes: usize,
    /// HTML nested deeper than this is replaced by a placeholder.
    pub max_dom_depth: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        let sanitize = SanitizeOptions::default();
        Self {
            embed_images: sanitize.embed_images,
            max_html_bytes: sanitize.max_bytes,
            max_dom_depth: sanitize.max_depth,
        }
    }
}

impl RenderOptions {
    fn sanitize_options(&self) -> SanitizeOptions {
        SanitizeOptions {
            max_bytes: self.max_html_bytes,
            max_depth: self.max_dom_depth,
            embed_images: self.embed_images,
        }
    }
}

/// A rendered message and, when its body had to be replaced, why.
#[derive(Debug)]
pub struct Rendered {
    pub fragment: Fragment,
    pub diagnostic: Option<Diagnostic>,
}

/// Render one message. Never fails: an unusable body becomes a placeholder
/// plus a `BodyUnrenderable` diagnostic.
pub fn render(ordered: OrderedMessage, options: &RenderOptions) -> Rendered {
    let OrderedMessage { position, message } = ordered;

    let mut blocks = header_blocks(&message, position);
    let mut diagnostic = None;
    let mut embedded = BTreeSet::new();

    match body_blocks(&message, options) {
        Ok((body, used)) => {
            blocks.extend(body);
            embedded = used;
            blocks.extend(attachment_blocks(&message, &embedded, options));
        }
        Err(detail) => {
            warn!(index = message.index, %detail, "Rendering placeholder for message body");
            blocks.push(Block::Notice(BODY_UNRENDERABLE.to_string()));
            diagnostic = Some(Diagnostic::new(
                message.index,
                DiagnosticReason::BodyUnrenderable,
                detail,
            ));
        }
    }

    debug!(
        index = message.index,
        position,
        blocks = blocks.len(),
        embedded = embedded.len(),
        "Rendered message"
    );

    Rendered {
        fragment: Fragment {
            index: message.index,
            position,
            bookmark: bookmark_title(&message),
            sent_at: message.sent_at,
            message_id: message.message_id.clone(),
            blocks,
        },
        diagnostic,
    }
}

/// Outline title for a message: subject and short date.
pub fn bookmark_title(message: &NormalizedMessage) -> String {
    format!(
        "{} - {}",
        message.subject_display(),
        message.sent_at.short_display()
    )
}

fn header_blocks(message: &NormalizedMessage, position: usize) -> Vec<Block> {
    let mut blocks = vec![
        Block::Title(format!(
            "Email {}: {}",
            position + 1,
            message.subject_display()
        )),
        Block::Field {
            label: "From",
            value: message.from_display(),
        },
    ];

    if !message.to.is_empty() {
        blocks.push(Block::Field {
            label: "To",
            value: EmailAddress::join(&message.to),
        });
    }
    if !message.cc.is_empty() {
        blocks.push(Block::Field {
            label: "Cc",
            value: EmailAddress::join(&message.cc),
        });
    }
    blocks.push(Block::Field {
        label: "Date",
        value: message.sent_at.display(),
    });
    if !message.labels.is_empty() {
        blocks.push(Block::Field {
            label: "Labels",
            value: message.labels.join(", "),
        });
    }
    blocks.push(Block::Rule);
    blocks
}

/// Body blocks plus the attachment indices already embedded through `cid:`.
fn body_blocks(
    message: &NormalizedMessage,
    options: &RenderOptions,
) -> Result<(Vec<Block>, BTreeSet<usize>), String> {
    if message.body_empty {
        return Ok((vec![Block::Notice(NO_CONTENT.to_string())], BTreeSet::new()));
    }

    if let Some(html) = message.body_html.as_deref().filter(|h| !h.trim().is_empty()) {
        let sanitized = sanitize_html(html, &message.attachments, &options.sanitize_options())
            .map_err(|e| e.to_string())?;
        if !sanitized.blocks.is_empty() {
            return Ok((sanitized.blocks, sanitized.embedded_attachments));
        }
    }

    Ok((plaintext_blocks(message.body_text.as_deref()), BTreeSet::new()))
}

fn plaintext_blocks(text: Option<&str>) -> Vec<Block> {
    let text = text.unwrap_or_default().replace("\r\n", "\n");
    let text = text.trim_end();
    if text.trim().is_empty() {
        vec![Block::Notice(EMPTY_CONTENT.to_string())]
    } else {
        vec![Block::Preformatted(text.to_string())]
    }
}

fn attachment_blocks(
    message: &NormalizedMessage,
    embedded: &BTreeSet<usize>,
    options: &RenderOptions,
) -> Vec<Block> {
    if message.attachments.is_empty() {
        return Vec::new();
    }

    let mut blocks = vec![Block::Heading(format!(
        "Attachments ({})",
        message.attachments.len()
    ))];

    for att in &message.attachments {
        blocks.push(Block::AttachmentEntry {
            filename: att.filename.clone(),
            mime_type: att.mime_type.clone(),
            size: humansize::format_size(att.size_bytes(), humansize::BINARY),
        });
    }

    if options.embed_images {
        for (i, att) in message.attachments.iter().enumerate() {
            if att.is_renderable_image() && !embedded.contains(&i) && !att.content.is_empty() {
                blocks.push(Block::Image {
                    mime_type: att.mime_type.clone(),
                    data: att.content.clone(),
                    caption: att.filename.clone(),
                });
            }
        }
    }

    blocks
}
