//! Print-ready markup for one message.
//!
//! A fragment is a flat list of typed blocks. Everything in it is already
//! sanitized: emitters may trust it without further filtering.

use crate::model::message::MessageTime;

/// Inline text style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SpanStyle {
    pub bold: bool,
    pub italic: bool,
    pub mono: bool,
}

impl SpanStyle {
    pub const REGULAR: Self = Self {
        bold: false,
        italic: false,
        mono: false,
    };
    pub const BOLD: Self = Self {
        bold: true,
        italic: false,
        mono: false,
    };
    pub const ITALIC: Self = Self {
        bold: false,
        italic: true,
        mono: false,
    };
}

/// A run of text with one style. May contain `\n` for hard line breaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub text: String,
    pub style: SpanStyle,
}

impl Span {
    pub fn new(text: impl Into<String>, style: SpanStyle) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }
}

/// One block of a rendered message, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    /// Message title line.
    Title(String),
    /// Section heading inside a message ("Attachments").
    Heading(String),
    /// A `Label: value` header row.
    Field { label: &'static str, value: String },
    /// Flowing text; `indent` counts quote/list levels.
    Paragraph { spans: Vec<Span>, indent: u8 },
    /// Whitespace-preserving text (plaintext bodies, `<pre>`).
    Preformatted(String),
    /// An embeddable picture (PNG, JPEG, GIF).
    Image {
        mime_type: String,
        data: Vec<u8>,
        caption: String,
    },
    /// One line of the attachment manifest.
    AttachmentEntry {
        filename: String,
        mime_type: String,
        size: String,
    },
    /// Italic note such as "[No content available]".
    Notice(String),
    /// Horizontal separator.
    Rule,
}

/// The rendered form of one message.
#[derive(Debug, Clone)]
pub struct Fragment {
    /// Position in the original archive.
    pub index: usize,
    /// Position in the chronological document.
    pub position: usize,
    /// Outline entry title: subject and date.
    pub bookmark: String,
    pub sent_at: MessageTime,
    pub message_id: Option<String>,
    pub blocks: Vec<Block>,
}

impl Fragment {
    /// All text a reader could see, for searching in tests and summaries.
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        for block in &self.blocks {
            match block {
                Block::Title(t) | Block::Heading(t) | Block::Preformatted(t) | Block::Notice(t) => {
                    out.push_str(t)
                }
                Block::Field { label, value } => {
                    out.push_str(label);
                    out.push_str(": ");
                    out.push_str(value);
                }
                Block::Paragraph { spans, .. } => {
                    for span in spans {
                        out.push_str(&span.text);
                    }
                }
                Block::Image { caption, .. } => out.push_str(caption),
                Block::AttachmentEntry {
                    filename,
                    mime_type,
                    size,
                } => out.push_str(&format!("{filename} ({mime_type}, {size})")),
                Block::Rule => {}
            }
            out.push('\n');
        }
        out
    }
}
