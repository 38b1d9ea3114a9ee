//! Single-file HTML output.
//!
//! The document is self-contained: styles are inline and pictures are `data:`
//! URIs. All fragment text is escaped, so markup can only come from this module.

use std::fmt::Write as _;
use std::path::Path;

use base64::Engine;
use tracing::info;

use super::write_atomic;
use crate::error::EmitError;
use crate::render::fragment::{Block, Fragment, Span};

const STYLE: &str = "
body { font-family: Arial, sans-serif; line-height: 1.6; max-width: 60rem; margin: 0 auto; }
.toc { margin: 2rem 0; }
.email { margin: 2rem 0; padding: 1rem; border: 1px solid #eee; }
.email h3 { color: #333; margin: 0 0 0.5rem; }
.meta { color: #666; font-size: 0.9rem; }
.body { white-space: pre-wrap; margin: 1rem 0; padding: 1rem; background: #f9f9f9; border-radius: 4px; font-family: monospace; }
.notice { color: #666; font-style: italic; }
.attachment { color: #444; font-size: 0.9rem; }
img { max-width: 100%; height: auto; margin: 0.5rem; border: 1px solid #ddd; padding: 2px; }
figure { margin: 0.5rem 0; }
figcaption { color: #666; font-size: 0.8rem; font-style: italic; }
";

/// Writes fragments as one HTML page with a table of contents.
#[derive(Debug, Clone)]
pub struct HtmlEmitter {
    title: String,
}

impl Default for HtmlEmitter {
    fn default() -> Self {
        Self::new("Email archive")
    }
}

impl HtmlEmitter {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }

    pub fn emit(&self, fragments: &[Fragment], output: &Path) -> Result<(), EmitError> {
        let html = self.to_html(fragments);
        write_atomic(output, html.as_bytes())?;
        info!(
            output = %output.display(),
            messages = fragments.len(),
            size = %humansize::format_size(html.len() as u64, humansize::BINARY),
            "HTML written"
        );
        Ok(())
    }

    pub fn to_html(&self, fragments: &[Fragment]) -> String {
        let mut out = String::with_capacity(4096 + fragments.len() * 2048);
        let title = escape(&self.title);
        let _ = write!(
            out,
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"UTF-8\">\n<title>{title}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n<h1>{title}</h1>\n"
        );

        if !fragments.is_empty() {
            out.push_str("<nav class=\"toc\">\n<ol>\n");
            for f in fragments {
                let _ = writeln!(
                    out,
                    "<li><a href=\"#email-{}\">{}</a></li>",
                    f.position + 1,
                    escape(&f.bookmark)
                );
            }
            out.push_str("</ol>\n</nav>\n");
        }

        for f in fragments {
            let _ = writeln!(out, "<div class=\"email\" id=\"email-{}\">", f.position + 1);
            for block in &f.blocks {
                write_block(&mut out, block);
            }
            out.push_str("</div>\n");
        }

        out.push_str("</body>\n</html>\n");
        out
    }
}

fn write_block(out: &mut String, block: &Block) {
    match block {
        Block::Title(text) => {
            let _ = writeln!(out, "<h3>{}</h3>", escape(text));
        }
        Block::Heading(text) => {
            let _ = writeln!(out, "<h4>{}</h4>", escape(text));
        }
        Block::Field { label, value } => {
            let _ = writeln!(
                out,
                "<div class=\"meta\"><strong>{}:</strong> {}</div>",
                escape(label),
                escape(value)
            );
        }
        Block::Paragraph { spans, indent } => {
            if *indent > 0 {
                let _ = write!(out, "<p style=\"margin-left: {}em\">", f32::from(*indent) * 1.5);
            } else {
                out.push_str("<p>");
            }
            for span in spans {
                write_span(out, span);
            }
            out.push_str("</p>\n");
        }
        Block::Preformatted(text) => {
            let _ = writeln!(out, "<div class=\"body\">{}</div>", escape(text));
        }
        Block::Image {
            mime_type,
            data,
            caption,
        } => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(data);
            let _ = write!(
                out,
                "<figure><img src=\"data:{};base64,{}\" alt=\"{}\">",
                escape(mime_type),
                encoded,
                escape(caption)
            );
            if !caption.trim().is_empty() {
                let _ = write!(out, "<figcaption>{}</figcaption>", escape(caption));
            }
            out.push_str("</figure>\n");
        }
        Block::AttachmentEntry {
            filename,
            mime_type,
            size,
        } => {
            let _ = writeln!(
                out,
                "<div class=\"attachment\">&bull; {} <em>({}, {})</em></div>",
                escape(filename),
                escape(mime_type),
                escape(size)
            );
        }
        Block::Notice(text) => {
            let _ = writeln!(out, "<p class=\"notice\">{}</p>", escape(text));
        }
        Block::Rule => out.push_str("<hr>\n"),
    }
}

fn write_span(out: &mut String, span: &Span) {
    let mut open = Vec::new();
    if span.style.bold {
        open.push("strong");
    }
    if span.style.italic {
        open.push("em");
    }
    if span.style.mono {
        open.push("code");
    }
    for tag in &open {
        let _ = write!(out, "<{tag}>");
    }
    out.push_str(&escape(&span.text).replace('\n', "<br>\n"));
    for tag in open.iter().rev() {
        let _ = write!(out, "</{tag}>");
    }
}

/// Escape text for element content and quoted attribute values.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::message::MessageTime;
    use crate::render::fragment::SpanStyle;

    fn fragment(blocks: Vec<Block>) -> Fragment {
        Fragment {
            index: 0,
            position: 0,
            bookmark: "Hello - undated".to_string(),
            sent_at: MessageTime::Undated { index: 0 },
            message_id: None,
            blocks,
        }
    }

    #[test]
    fn test_escape() {
        assert_eq!(
            escape("<a href=\"x\">Tom & 'Jerry'</a>"),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#39;Jerry&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn test_text_cannot_inject_markup() {
        let html = HtmlEmitter::default().to_html(&[fragment(vec![Block::Preformatted(
            "<script>alert(1)</script>".to_string(),
        )])]);
        assert!(!html.contains("<script"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_blocks_and_toc() {
        let html = HtmlEmitter::new("Archive").to_html(&[fragment(vec![
            Block::Title("Email 1: Hello".to_string()),
            Block::Field {
                label: "From",
                value: "Ana <ana@example.com>".to_string(),
            },
            Block::Paragraph {
                spans: vec![
                    Span::new("plain ", SpanStyle::REGULAR),
                    Span::new("loud", SpanStyle::BOLD),
                ],
                indent: 1,
            },
            Block::Image {
                mime_type: "image/png".to_string(),
                data: vec![1, 2, 3],
                caption: "dot".to_string(),
            },
            Block::Rule,
        ])]);
        assert!(html.contains("<title>Archive</title>"));
        assert!(html.contains("<a href=\"#email-1\">Hello - undated</a>"));
        assert!(html.contains("<h3>Email 1: Hello</h3>"));
        assert!(html.contains("<strong>From:</strong> Ana &lt;ana@example.com&gt;"));
        assert!(html.contains("<p style=\"margin-left: 1.5em\">plain <strong>loud</strong></p>"));
        assert!(html.contains("src=\"data:image/png;base64,AQID\""));
        assert!(html.contains("<hr>"));
    }

    #[test]
    fn test_emit_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.html");
        HtmlEmitter::default()
            .emit(&[fragment(vec![Block::Notice("[Empty content]".to_string())])], &out)
            .unwrap();
        let written = std::fs::read_to_string(&out).unwrap();
        assert!(written.contains("<p class=\"notice\">[Empty content]</p>"));
    }
}
