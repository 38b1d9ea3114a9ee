//! HTML body sanitizing.
//!
//! The body is parsed into a DOM with `html5ever` and rebuilt through an
//! allow-list into [`Block`]s. Nothing executable survives: scripting elements
//! are dropped with their content, attributes are never copied, and nothing
//! remote is ever fetched.

use std::collections::BTreeSet;

use base64::Engine;
use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use thiserror::Error;

use crate::model::attachment::{is_renderable_image, Attachment};
use crate::render::fragment::{Block, Span, SpanStyle};

/// Limits for sanitizing one body.
#[derive(Debug, Clone, Copy)]
pub struct SanitizeOptions {
    /// Bodies larger than this are not parsed.
    pub max_bytes: usize,
    /// Maximum element nesting depth walked.
    pub max_depth: usize,
    /// Embed `cid:` and `data:` images.
    pub embed_images: bool,
}

impl Default for SanitizeOptions {
    fn default() -> Self {
        Self {
            max_bytes: 8 * 1024 * 1024,
            max_depth: 256,
            embed_images: true,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SanitizeError {
    #[error("HTML body is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("HTML nesting deeper than {0} levels")]
    TooDeep(usize),
}

/// Result of sanitizing one HTML body.
#[derive(Debug, Default)]
pub struct Sanitized {
    pub blocks: Vec<Block>,
    /// Indices of attachments embedded through `cid:` references.
    pub embedded_attachments: BTreeSet<usize>,
}

/// Sanitize an HTML body into blocks.
///
/// `attachments` are the message's own parts, used to resolve `cid:` images.
pub fn sanitize_html(
    html: &str,
    attachments: &[Attachment],
    options: &SanitizeOptions,
) -> Result<Sanitized, SanitizeError> {
    if html.len() > options.max_bytes {
        return Err(SanitizeError::TooLarge {
            size: html.len(),
            limit: options.max_bytes,
        });
    }

    let dom = parse_to_dom(html);
    let mut builder = BlockBuilder::new(attachments, options);
    builder.walk(&dom.document, 0)?;
    builder.flush();
    Ok(Sanitized {
        blocks: builder.blocks,
        embedded_attachments: builder.embedded,
    })
}

fn parse_to_dom(input: &str) -> RcDom {
    parse_document(RcDom::default(), Default::default()).one(input)
}

fn node_children(h: &Handle) -> Vec<Handle> {
    h.children.borrow().clone()
}

fn attr(h: &Handle, name: &str) -> Option<String> {
    match &h.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|a| a.name.local.as_ref().eq_ignore_ascii_case(name))
            .map(|a| a.value.to_string()),
        _ => None,
    }
}

/// Elements dropped together with everything inside them.
fn is_drop_content_tag(lower: &str) -> bool {
    matches!(
        lower,
        "script"
            | "style"
            | "noscript"
            | "template"
            | "iframe"
            | "frame"
            | "frameset"
            | "object"
            | "embed"
            | "applet"
            | "svg"
            | "math"
            | "canvas"
            | "audio"
            | "video"
            | "form"
            | "input"
            | "button"
            | "select"
            | "textarea"
            | "head"
            | "title"
            | "meta"
            | "link"
            | "base"
    )
}

/// Elements that start and end a paragraph.
fn is_block_tag(lower: &str) -> bool {
    matches!(
        lower,
        "p" | "div"
            | "section"
            | "article"
            | "header"
            | "footer"
            | "main"
            | "nav"
            | "aside"
            | "center"
            | "address"
            | "figure"
            | "figcaption"
            | "table"
            | "thead"
            | "tbody"
            | "tfoot"
            | "tr"
            | "dl"
            | "dt"
            | "dd"
            | "ul"
            | "ol"
    )
}

/// Link targets worth printing next to the link text.
fn printable_href(href: &str) -> Option<&str> {
    let h = href.trim();
    let low = h.to_ascii_lowercase();
    if low.starts_with("http://") || low.starts_with("https://") || low.starts_with("mailto:") {
        Some(h)
    } else {
        None
    }
}

/// `true` when the link text already spells out the target, with or without
/// its scheme.
fn names_target(text: &str, url: &str) -> bool {
    let text = text.trim().trim_end_matches('/');
    if text.is_empty() {
        return false;
    }
    let url = url.trim_end_matches('/');
    let bare = ["https://", "http://", "mailto:"]
        .iter()
        .find_map(|scheme| {
            url.get(..scheme.len())
                .filter(|head| head.eq_ignore_ascii_case(scheme))
                .map(|_| &url[scheme.len()..])
        })
        .unwrap_or(url);
    text.eq_ignore_ascii_case(url) || text.eq_ignore_ascii_case(bare)
}

struct BlockBuilder<'a> {
    attachments: &'a [Attachment],
    options: &'a SanitizeOptions,
    blocks: Vec<Block>,
    embedded: BTreeSet<usize>,
    spans: Vec<Span>,
    style: SpanStyle,
    indent: u8,
    /// `None` for `<ul>`, `Some(counter)` for `<ol>`.
    lists: Vec<Option<usize>>,
    /// Text seen inside the innermost open `<a>`.
    link_text: Option<String>,
}

impl<'a> BlockBuilder<'a> {
    fn new(attachments: &'a [Attachment], options: &'a SanitizeOptions) -> Self {
        Self {
            attachments,
            options,
            blocks: Vec::new(),
            embedded: BTreeSet::new(),
            spans: Vec::new(),
            style: SpanStyle::REGULAR,
            indent: 0,
            lists: Vec::new(),
            link_text: None,
        }
    }

    fn walk(&mut self, node: &Handle, depth: usize) -> Result<(), SanitizeError> {
        if depth > self.options.max_depth {
            return Err(SanitizeError::TooDeep(self.options.max_depth));
        }

        match &node.data {
            NodeData::Document => self.walk_children(node, depth),
            NodeData::Text { contents } => {
                let text = contents.borrow().to_string();
                self.push_text(&text);
                Ok(())
            }
            NodeData::Element { name, .. } => {
                let tag = name.local.as_ref().to_ascii_lowercase();
                self.element(node, &tag, depth)
            }
            NodeData::Comment { .. }
            | NodeData::Doctype { .. }
            | NodeData::ProcessingInstruction { .. } => Ok(()),
        }
    }

    fn walk_children(&mut self, node: &Handle, depth: usize) -> Result<(), SanitizeError> {
        for child in node_children(node) {
            self.walk(&child, depth + 1)?;
        }
        Ok(())
    }

    fn walk_styled(
        &mut self,
        node: &Handle,
        depth: usize,
        style: SpanStyle,
    ) -> Result<(), SanitizeError> {
        let saved = self.style;
        self.style = style;
        let result = self.walk_children(node, depth);
        self.style = saved;
        result
    }

    fn element(&mut self, node: &Handle, tag: &str, depth: usize) -> Result<(), SanitizeError> {
        if is_drop_content_tag(tag) {
            return Ok(());
        }

        match tag {
            "br" => self.push_raw("\n"),
            "hr" => {
                self.flush();
                self.blocks.push(Block::Rule);
            }
            "img" => self.image(node),
            "pre" => {
                self.flush();
                let mut text = String::new();
                collect_text(node, &mut text, depth, self.options.max_depth)?;
                let text = text.trim_end().to_string();
                if !text.trim().is_empty() {
                    self.blocks.push(Block::Preformatted(text));
                }
            }
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                self.flush();
                self.walk_styled(node, depth, SpanStyle { bold: true, ..self.style })?;
                self.flush();
            }
            "b" | "strong" => self.walk_styled(node, depth, SpanStyle { bold: true, ..self.style })?,
            "i" | "em" | "cite" | "var" => {
                self.walk_styled(node, depth, SpanStyle { italic: true, ..self.style })?
            }
            "code" | "tt" | "kbd" | "samp" => {
                self.walk_styled(node, depth, SpanStyle { mono: true, ..self.style })?
            }
            "a" => {
                let outer = self.link_text.replace(String::new());
                let blocks_before = self.blocks.len();
                let result = self.walk_children(node, depth);
                let link_text = std::mem::replace(&mut self.link_text, outer).unwrap_or_default();
                if let Some(outer) = self.link_text.as_mut() {
                    outer.push_str(&link_text);
                }
                result?;
                if let Some(href) = attr(node, "href") {
                    if let Some(url) = printable_href(&href) {
                        if !names_target(&link_text, url) {
                            let flushed = self.blocks.len() > blocks_before;
                            self.append_link_target(url, flushed);
                        }
                    }
                }
            }
            "blockquote" => {
                self.flush();
                self.indent = self.indent.saturating_add(1);
                let result = self.walk_children(node, depth);
                self.flush();
                self.indent = self.indent.saturating_sub(1);
                result?;
            }
            "ul" | "ol" => {
                self.flush();
                self.lists.push(if tag == "ol" { Some(0) } else { None });
                self.indent = self.indent.saturating_add(1);
                let result = self.walk_children(node, depth);
                self.flush();
                self.indent = self.indent.saturating_sub(1);
                self.lists.pop();
                result?;
            }
            "li" => {
                self.flush();
                let marker = match self.lists.last_mut() {
                    Some(Some(counter)) => {
                        *counter += 1;
                        format!("{counter}. ")
                    }
                    _ => "\u{2022} ".to_string(),
                };
                self.push_raw(&marker);
                self.walk_children(node, depth)?;
                self.flush();
            }
            "td" | "th" => {
                let style = if tag == "th" {
                    SpanStyle { bold: true, ..self.style }
                } else {
                    self.style
                };
                self.walk_styled(node, depth, style)?;
                self.push_raw("  ");
            }
            _ if is_block_tag(tag) => {
                self.flush();
                self.walk_children(node, depth)?;
                self.flush();
            }
            _ => self.walk_children(node, depth)?,
        }
        Ok(())
    }

    fn image(&mut self, node: &Handle) {
        let src = attr(node, "src").unwrap_or_default();
        let alt = attr(node, "alt").unwrap_or_default();
        let low = src.trim().to_ascii_lowercase();

        if let Some(cid) = low.strip_prefix("cid:") {
            let found = self.attachments.iter().enumerate().find(|(_, a)| {
                a.content_id
                    .as_deref()
                    .is_some_and(|id| id.eq_ignore_ascii_case(cid))
            });
            match found {
                Some((idx, att)) if self.options.embed_images && att.is_renderable_image() => {
                    self.flush();
                    self.embedded.insert(idx);
                    self.blocks.push(Block::Image {
                        mime_type: att.mime_type.clone(),
                        data: att.content.clone(),
                        caption: if alt.trim().is_empty() {
                            att.filename.clone()
                        } else {
                            alt
                        },
                    });
                }
                _ => self.image_placeholder(&alt),
            }
            return;
        }

        if low.starts_with("data:") {
            if let Some((mime_type, data)) = decode_data_url(src.trim()) {
                if self.options.embed_images && is_renderable_image(&mime_type) {
                    self.flush();
                    self.blocks.push(Block::Image {
                        mime_type,
                        data,
                        caption: alt,
                    });
                    return;
                }
            }
        }

        // Remote or unusable source: never fetched
        self.image_placeholder(&alt);
    }

    fn image_placeholder(&mut self, alt: &str) {
        let alt = alt.trim();
        if !alt.is_empty() {
            let saved = self.style;
            self.style = SpanStyle { italic: true, ..saved };
            self.push_text(&format!("[image: {alt}]"));
            self.style = saved;
        }
    }

    /// Append text with HTML whitespace collapsing.
    fn push_text(&mut self, text: &str) {
        let mut collapsed = String::with_capacity(text.len());
        let mut last_space = self.ends_with_space();
        for ch in text.chars() {
            if ch.is_whitespace() {
                if !last_space {
                    collapsed.push(' ');
                    last_space = true;
                }
            } else {
                collapsed.push(ch);
                last_space = false;
            }
        }
        self.push_raw(&collapsed);
    }

    /// Append text verbatim (markers, line breaks).
    fn push_raw(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(link) = self.link_text.as_mut() {
            link.push_str(text);
        }
        match self.spans.last_mut() {
            Some(last) if last.style == self.style => last.text.push_str(text),
            _ => self.spans.push(Span::new(text, self.style)),
        }
    }

    fn ends_with_space(&self) -> bool {
        match self.spans.last().and_then(|s| s.text.chars().last()) {
            Some(c) => c.is_whitespace(),
            // Start of a paragraph: leading whitespace is dropped
            None => true,
        }
    }

    /// Print ` [url]` after a link. When the link's content was a block that
    /// has already been flushed, the target goes on that block.
    fn append_link_target(&mut self, url: &str, flushed: bool) {
        let suffix = format!(" [{url}]");
        if flushed && self.spans.iter().all(|s| s.text.trim().is_empty()) {
            if let Some(Block::Paragraph { spans, .. }) = self.blocks.last_mut() {
                spans.push(Span::new(suffix, SpanStyle::REGULAR));
                return;
            }
        }
        let style = std::mem::replace(&mut self.style, SpanStyle::REGULAR);
        self.push_text(&suffix);
        self.style = style;
    }

    /// Close the current paragraph, if it has any visible text.
    fn flush(&mut self) {
        let mut spans = std::mem::take(&mut self.spans);
        if let Some(last) = spans.last_mut() {
            let trimmed = last.text.trim_end().len();
            last.text.truncate(trimmed);
        }
        spans.retain(|s| !s.text.is_empty());
        if spans.iter().any(|s| !s.text.trim().is_empty()) {
            self.blocks.push(Block::Paragraph {
                spans,
                indent: self.indent,
            });
        }
    }
}

/// Raw text of a subtree (for `<pre>`), skipping dropped elements.
fn collect_text(
    node: &Handle,
    out: &mut String,
    depth: usize,
    max_depth: usize,
) -> Result<(), SanitizeError> {
    if depth > max_depth {
        return Err(SanitizeError::TooDeep(max_depth));
    }
    for child in node_children(node) {
        match &child.data {
            NodeData::Text { contents } => out.push_str(&contents.borrow()),
            NodeData::Element { name, .. } => {
                let tag = name.local.as_ref().to_ascii_lowercase();
                if tag == "br" {
                    out.push('\n');
                } else if !is_drop_content_tag(&tag) {
                    collect_text(&child, out, depth + 1, max_depth)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Decode a `data:<mime>;base64,<payload>` URL.
fn decode_data_url(url: &str) -> Option<(String, Vec<u8>)> {
    let rest = url.get(5..)?;
    let (meta, payload) = rest.split_once(',')?;
    let mut parts = meta.split(';');
    let mime_type = parts.next()?.trim().to_ascii_lowercase();
    if !parts.any(|p| p.trim().eq_ignore_ascii_case("base64")) {
        return None;
    }
    let compact: String = payload.split_whitespace().collect();
    let data = base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .ok()?;
    Some((mime_type, data))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks(html: &str) -> Vec<Block> {
        sanitize_html(html, &[], &SanitizeOptions::default())
            .unwrap()
            .blocks
    }

    fn all_text(blocks: &[Block]) -> String {
        let mut out = String::new();
        for b in blocks {
            match b {
                Block::Paragraph { spans, .. } => {
                    for s in spans {
                        out.push_str(&s.text);
                    }
                }
                Block::Preformatted(t) | Block::Notice(t) => out.push_str(t),
                _ => {}
            }
            out.push('\n');
        }
        out
    }

    #[test]
    fn test_script_and_style_are_removed() {
        let out = all_text(&blocks(
            "<p>Before</p><script>alert('xss')</script><style>p{}</style><p>After</p>",
        ));
        assert!(out.contains("Before"));
        assert!(out.contains("After"));
        assert!(!out.contains("alert"));
        assert!(!out.contains("p{}"));
    }

    #[test]
    fn test_event_handlers_and_js_links_never_survive() {
        let out = all_text(&blocks(
            "<p onclick=\"steal()\">Click <a href=\"javascript:steal()\">here</a></p>",
        ));
        assert_eq!(out.trim(), "Click here");
    }

    #[test]
    fn test_http_link_is_printed() {
        let out = all_text(&blocks("<p><a href=\"https://example.com/x\">docs</a></p>"));
        assert_eq!(out.trim(), "docs [https://example.com/x]");
    }

    #[test]
    fn test_link_text_matching_url_tail_still_prints_target() {
        let out = all_text(&blocks("<p><a href=\"https://x.com/where\">here</a></p>"));
        assert_eq!(out.trim(), "here [https://x.com/where]");
    }

    #[test]
    fn test_link_around_block_prints_target_on_that_block() {
        let out = all_text(&blocks(
            "<p>Intro</p><a href=\"https://example.com/offer\"><div>Read the offer</div></a>",
        ));
        assert_eq!(out, "Intro\nRead the offer [https://example.com/offer]\n");
    }

    #[test]
    fn test_image_only_link_prints_target() {
        let out = all_text(&blocks(
            "<p><a href=\"https://example.com/promo\"><img src=\"https://cdn.example/b.png\"></a></p>",
        ));
        assert_eq!(out.trim(), "[https://example.com/promo]");
    }

    #[test]
    fn test_link_spelling_out_its_target_is_not_repeated() {
        let out = all_text(&blocks(
            "<p><a href=\"https://example.com/\">example.com</a> and \
             <a href=\"mailto:ana@example.com\">ana@example.com</a> and \
             <a href=\"https://example.com/a\">https://example.com/a</a></p>",
        ));
        assert_eq!(out.trim(), "example.com and ana@example.com and https://example.com/a");
    }

    #[test]
    fn test_remote_image_is_not_embedded() {
        let b = blocks("<p><img src=\"https://tracker.example/pixel.gif\" alt=\"logo\"></p>");
        assert!(!b.iter().any(|b| matches!(b, Block::Image { .. })));
        assert!(all_text(&b).contains("[image: logo]"));
    }

    #[test]
    fn test_whitespace_collapses_and_br_breaks() {
        let b = blocks("<div>  Hello \n\n   <b>big</b>   world<br>next</div>");
        match &b[0] {
            Block::Paragraph { spans, .. } => {
                let text: String = spans.iter().map(|s| s.text.as_str()).collect();
                assert_eq!(text, "Hello big world\nnext");
                assert!(spans.iter().any(|s| s.style.bold && s.text == "big"));
            }
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[test]
    fn test_lists_and_quotes_indent() {
        let b = blocks("<ol><li>one</li><li>two</li></ol><blockquote>quoted</blockquote>");
        let paragraphs: Vec<(String, u8)> = b
            .iter()
            .filter_map(|b| match b {
                Block::Paragraph { spans, indent } => Some((
                    spans.iter().map(|s| s.text.as_str()).collect::<String>(),
                    *indent,
                )),
                _ => None,
            })
            .collect();
        assert_eq!(
            paragraphs,
            vec![
                ("1. one".to_string(), 1),
                ("2. two".to_string(), 1),
                ("quoted".to_string(), 1)
            ]
        );
    }

    #[test]
    fn test_pre_keeps_whitespace() {
        let b = blocks("<pre>a  b\n  c</pre>");
        assert_eq!(b, vec![Block::Preformatted("a  b\n  c".to_string())]);
    }

    #[test]
    fn test_cid_image_is_embedded() {
        let attachments = vec![Attachment {
            filename: "logo.png".to_string(),
            mime_type: "image/png".to_string(),
            content_id: Some("logo@x".to_string()),
            inline: true,
            content: vec![1, 2, 3],
        }];
        let out = sanitize_html(
            "<p>Hi</p><img src=\"cid:logo@x\">",
            &attachments,
            &SanitizeOptions::default(),
        )
        .unwrap();
        assert!(out.embedded_attachments.contains(&0));
        assert!(out
            .blocks
            .iter()
            .any(|b| matches!(b, Block::Image { data, .. } if data == &vec![1, 2, 3])));
    }

    #[test]
    fn test_data_url_image_is_embedded() {
        let b = blocks("<img src=\"data:image/png;base64,AQID\" alt=\"dot\">");
        assert_eq!(
            b,
            vec![Block::Image {
                mime_type: "image/png".to_string(),
                data: vec![1, 2, 3],
                caption: "dot".to_string(),
            }]
        );
    }

    #[test]
    fn test_limits() {
        let options = SanitizeOptions {
            max_bytes: 10,
            ..SanitizeOptions::default()
        };
        assert!(matches!(
            sanitize_html("<p>way too long</p>", &[], &options),
            Err(SanitizeError::TooLarge { .. })
        ));

        let deep = "<div>".repeat(50);
        let options = SanitizeOptions {
            max_depth: 20,
            ..SanitizeOptions::default()
        };
        assert_eq!(
            sanitize_html(&deep, &[], &options).err(),
            Some(SanitizeError::TooDeep(20))
        );
    }
}
