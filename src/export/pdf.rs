//! PDF output built with `lopdf`.
//!
//! Text uses the standard Type1 fonts (Helvetica family and Courier) with
//! WinAnsi encoding, so no font files are embedded. Characters outside
//! Windows-1252 print as `?`. Every message starts on a new page and gets one
//! outline entry.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::write_atomic;
use crate::error::EmitError;
use crate::render::fragment::{Block, Fragment, Span, SpanStyle};

const PRODUCER: &str = concat!("mbox2pdf ", env!("CARGO_PKG_VERSION"));

/// Horizontal offset per quote or list level, in points.
const INDENT_STEP: f32 = 18.0;

/// Assumed resolution of embedded pictures.
const POINTS_PER_PIXEL: f32 = 0.75;

/// Paper size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageSize {
    #[default]
    A4,
    Letter,
}

impl PageSize {
    /// Width and height in points.
    pub fn dimensions(self) -> (f32, f32) {
        match self {
            Self::A4 => (595.28, 841.89),
            Self::Letter => (612.0, 792.0),
        }
    }
}

impl FromStr for PageSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a4" => Ok(Self::A4),
            "letter" => Ok(Self::Letter),
            other => Err(format!("unknown page size '{other}' (expected a4 or letter)")),
        }
    }
}

/// Layout and metadata settings.
#[derive(Debug, Clone)]
pub struct PdfOptions {
    pub page_size: PageSize,
    /// Page margin in points.
    pub margin: f32,
    /// Body text size in points; titles and code scale from it.
    pub font_size: f32,
    /// Document title for the info dictionary.
    pub title: String,
    /// Flate-compress content streams.
    pub compress: bool,
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self {
            page_size: PageSize::A4,
            margin: 50.0,
            font_size: 10.0,
            title: "Email archive".to_string(),
            compress: true,
        }
    }
}

/// Writes fragments as one paginated, bookmarked PDF.
#[derive(Debug, Clone, Default)]
pub struct PdfEmitter {
    options: PdfOptions,
}

impl PdfEmitter {
    pub fn new(options: PdfOptions) -> Self {
        Self { options }
    }

    /// Lay out `fragments` in order and write the document atomically.
    pub fn emit(&self, fragments: &[Fragment], output: &Path) -> Result<(), EmitError> {
        let bytes = self.to_bytes(fragments)?;
        write_atomic(output, &bytes)?;
        info!(
            output = %output.display(),
            messages = fragments.len(),
            size = %humansize::format_size(bytes.len() as u64, humansize::BINARY),
            "PDF written"
        );
        Ok(())
    }

    /// Build the complete document in memory.
    ///
    /// Output depends only on `fragments` and the options: no clock, no
    /// random identifiers.
    pub fn to_bytes(&self, fragments: &[Fragment]) -> Result<Vec<u8>, EmitError> {
        let mut doc = Document::with_version("1.5");
        let mut layout = Layout::new(&self.options);

        let mut starts = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            starts.push(layout.begin_fragment());
            for block in &fragment.blocks {
                layout.block(&mut doc, block)?;
            }
        }
        let (pages, images) = layout.finish();
        debug!(pages = pages.len(), images = images.len(), "Layout complete");

        let pages_id = doc.new_object_id();

        let mut fonts = Dictionary::new();
        for font in Font::ALL {
            let id = doc.add_object(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => font.base_font(),
                "Encoding" => "WinAnsiEncoding",
            });
            fonts.set(font.resource_name(), id);
        }
        let mut xobjects = Dictionary::new();
        for (name, id) in &images {
            xobjects.set(name.as_str(), *id);
        }
        let resources_id = doc.add_object(dictionary! {
            "Font" => fonts,
            "XObject" => xobjects,
        });

        let mut page_ids = Vec::with_capacity(pages.len());
        for operations in pages {
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode()?));
            page_ids.push(doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            }));
        }

        let (width, height) = self.options.page_size.dimensions();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => page_ids.iter().map(|id| Object::Reference(*id)).collect::<Vec<_>>(),
                "Count" => page_ids.len() as i64,
                "Resources" => resources_id,
                "MediaBox" => vec![int(0), int(0), real(width), real(height)],
            }),
        );

        let mut catalog = dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        };
        if let Some(outlines_id) = add_outline(&mut doc, fragments, &starts, &page_ids) {
            catalog.set("Outlines", outlines_id);
            catalog.set("PageMode", "UseOutlines");
        }
        let catalog_id = doc.add_object(catalog);

        let info_id = doc.add_object(self.info_dictionary(fragments));

        doc.trailer.set("Root", catalog_id);
        doc.trailer.set("Info", info_id);
        let id = document_id(fragments);
        doc.trailer.set(
            "ID",
            vec![
                Object::String(id.clone(), StringFormat::Hexadecimal),
                Object::String(id, StringFormat::Hexadecimal),
            ],
        );

        if self.options.compress {
            doc.compress();
        }

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes)
            .map_err(|e| EmitError::Render(format!("PDF serialization failed: {e}")))?;
        Ok(bytes)
    }

    fn info_dictionary(&self, fragments: &[Fragment]) -> Dictionary {
        let mut info = dictionary! {
            "Title" => text_string(&self.options.title),
            "Producer" => Object::string_literal(PRODUCER),
        };
        // Dated from the archive, never from the clock
        if let Some(newest) = fragments.iter().filter_map(|f| f.sent_at.utc()).max() {
            let stamp = newest.format("D:%Y%m%d%H%M%SZ").to_string();
            info.set("CreationDate", Object::string_literal(stamp.clone()));
            info.set("ModDate", Object::string_literal(stamp));
        }
        info
    }
}

/// One outline entry per fragment, pointing at its first page.
fn add_outline(
    doc: &mut Document,
    fragments: &[Fragment],
    starts: &[usize],
    page_ids: &[ObjectId],
) -> Option<ObjectId> {
    if fragments.is_empty() {
        return None;
    }

    let outlines_id = doc.new_object_id();
    let item_ids: Vec<ObjectId> = fragments.iter().map(|_| doc.new_object_id()).collect();

    for (i, (fragment, item_id)) in fragments.iter().zip(&item_ids).enumerate() {
        let page_id = page_ids[starts[i]];
        let mut item = dictionary! {
            "Title" => text_string(&fragment.bookmark),
            "Parent" => outlines_id,
            "Dest" => vec![
                Object::Reference(page_id),
                "XYZ".into(),
                Object::Null,
                Object::Null,
                Object::Null,
            ],
        };
        if i > 0 {
            item.set("Prev", item_ids[i - 1]);
        }
        if let Some(next) = item_ids.get(i + 1) {
            item.set("Next", *next);
        }
        doc.objects.insert(*item_id, Object::Dictionary(item));
    }

    let (first, last) = (item_ids.first()?, item_ids.last()?);
    doc.objects.insert(
        outlines_id,
        Object::Dictionary(dictionary! {
            "Type" => "Outlines",
            "First" => *first,
            "Last" => *last,
            "Count" => item_ids.len() as i64,
        }),
    );
    Some(outlines_id)
}

/// Trailer `/ID`: digest of what identifies each message in the document.
fn document_id(fragments: &[Fragment]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    for f in fragments {
        hasher.update((f.index as u64).to_le_bytes());
        hasher.update((f.position as u64).to_le_bytes());
        hasher.update(f.bookmark.as_bytes());
        hasher.update([0]);
        hasher.update(f.message_id.as_deref().unwrap_or_default().as_bytes());
        hasher.update([0]);
    }
    hasher.finalize()[..16].to_vec()
}

/// Numeric operand rounded to hundredths of a point.
fn real(value: f32) -> Object {
    Object::Real(((value * 100.0).round() / 100.0).into())
}

fn int(value: i64) -> Object {
    Object::Integer(value)
}

/// PDF text string (outline titles, info): UTF-16BE with byte order mark.
fn text_string(text: &str) -> Object {
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

/// Encode text for a WinAnsi font. Unmappable characters become `?`.
fn win_ansi(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    let mut buf = [0u8; 4];
    for ch in text.chars() {
        if ch.is_ascii() {
            out.push(if ch.is_ascii_control() { b' ' } else { ch as u8 });
            continue;
        }
        let (bytes, _, had_errors) = encoding_rs::WINDOWS_1252.encode(ch.encode_utf8(&mut buf));
        match bytes.as_ref() {
            [b] if !had_errors => out.push(*b),
            _ => out.push(b'?'),
        }
    }
    out
}

// ── Fonts ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Font {
    Regular,
    Bold,
    Italic,
    BoldItalic,
    Mono,
}

/// Helvetica advance widths for ASCII 32..=126, in 1/1000 em.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // 0..9
    278, 278, 584, 584, 584, 556, 1015, // :..@
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, 667, 778, 722,
    667, 611, 722, 667, 944, 667, 667, 611, // A..Z
    278, 278, 278, 469, 556, 333, // [..`
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, 556, 556, 333,
    500, 278, 556, 500, 722, 500, 500, 500, // a..z
    334, 260, 334, 584, // {..~
];

/// Helvetica-Bold advance widths for ASCII 32..=126.
const HELVETICA_BOLD_WIDTHS: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278, // ' '../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // 0..9
    333, 333, 584, 584, 584, 611, 975, // :..@
    722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833, 722, 778, 667, 778, 722,
    667, 611, 722, 667, 944, 667, 667, 611, // A..Z
    333, 278, 333, 584, 556, 333, // [..`
    556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889, 611, 611, 611, 611, 389,
    556, 333, 611, 556, 778, 556, 556, 500, // a..z
    389, 280, 389, 584, // {..~
];

impl Font {
    const ALL: [Font; 5] = [
        Font::Regular,
        Font::Bold,
        Font::Italic,
        Font::BoldItalic,
        Font::Mono,
    ];

    fn for_style(style: SpanStyle) -> Self {
        match (style.mono, style.bold, style.italic) {
            (true, _, _) => Self::Mono,
            (false, true, true) => Self::BoldItalic,
            (false, true, false) => Self::Bold,
            (false, false, true) => Self::Italic,
            (false, false, false) => Self::Regular,
        }
    }

    fn resource_name(self) -> &'static str {
        match self {
            Self::Regular => "F1",
            Self::Bold => "F2",
            Self::Italic => "F3",
            Self::BoldItalic => "F4",
            Self::Mono => "F5",
        }
    }

    fn base_font(self) -> &'static str {
        match self {
            Self::Regular => "Helvetica",
            Self::Bold => "Helvetica-Bold",
            Self::Italic => "Helvetica-Oblique",
            Self::BoldItalic => "Helvetica-BoldOblique",
            Self::Mono => "Courier",
        }
    }

    fn glyph_width(self, ch: char) -> u16 {
        let table = match self {
            Self::Mono => return 600,
            Self::Regular | Self::Italic => &HELVETICA_WIDTHS,
            Self::Bold | Self::BoldItalic => &HELVETICA_BOLD_WIDTHS,
        };
        match ch as u32 {
            code @ 32..=126 => table[(code - 32) as usize],
            _ => 556,
        }
    }

    fn text_width(self, text: &str, size: f32) -> f32 {
        let units: u32 = text.chars().map(|c| u32::from(self.glyph_width(c))).sum();
        units as f32 * size / 1000.0
    }
}

// ── Line breaking ───────────────────────────────────────────────

type Line = Vec<(Font, String)>;

/// Greedy line filler over styled words.
struct LineBreaker {
    max_width: f32,
    size: f32,
    lines: Vec<Line>,
    line: Line,
    width: f32,
    pending_space: Option<Font>,
}

impl LineBreaker {
    fn new(max_width: f32, size: f32) -> Self {
        Self {
            max_width,
            size,
            lines: Vec::new(),
            line: Vec::new(),
            width: 0.0,
            pending_space: None,
        }
    }

    fn append(&mut self, font: Font, text: &str, width: f32) {
        match self.line.last_mut() {
            Some((f, t)) if *f == font => t.push_str(text),
            _ => self.line.push((font, text.to_string())),
        }
        self.width += width;
    }

    fn hard_break(&mut self) {
        self.lines.push(std::mem::take(&mut self.line));
        self.width = 0.0;
        self.pending_space = None;
    }

    fn space(&mut self, font: Font) {
        if !self.line.is_empty() {
            self.pending_space = Some(font);
        }
    }

    fn word(&mut self, font: Font, word: &str) {
        let width = font.text_width(word, self.size);
        let space = self
            .pending_space
            .map_or(0.0, |f| f.text_width(" ", self.size));

        if !self.line.is_empty() && self.width + space + width > self.max_width {
            self.hard_break();
        } else if let Some(space_font) = self.pending_space {
            self.append(space_font, " ", space);
        }
        self.pending_space = None;

        if width <= self.max_width {
            self.append(font, word, width);
            return;
        }

        // Longer than a whole line: split between characters
        let mut buf = [0u8; 4];
        for ch in word.chars() {
            let piece: &str = ch.encode_utf8(&mut buf);
            let w = font.text_width(piece, self.size);
            if !self.line.is_empty() && self.width + w > self.max_width {
                self.hard_break();
            }
            self.append(font, piece, w);
        }
    }

    fn finish(mut self) -> Vec<Line> {
        if !self.line.is_empty() {
            self.lines.push(self.line);
        }
        self.lines
    }
}

fn wrap_spans(spans: &[Span], max_width: f32, size: f32) -> Vec<Line> {
    let mut breaker = LineBreaker::new(max_width, size);
    for span in spans {
        let font = Font::for_style(span.style);
        for (i, segment) in span.text.split('\n').enumerate() {
            if i > 0 {
                breaker.hard_break();
            }
            let mut rest = segment;
            loop {
                let trimmed = rest.trim_start();
                if trimmed.len() != rest.len() {
                    breaker.space(font);
                }
                if trimmed.is_empty() {
                    break;
                }
                let end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
                breaker.word(font, &trimmed[..end]);
                rest = &trimmed[end..];
            }
        }
    }
    breaker.finish()
}

fn expand_tabs(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut column = 0;
    for ch in line.chars() {
        if ch == '\t' {
            let pad = 4 - column % 4;
            out.extend(std::iter::repeat(' ').take(pad));
            column += pad;
        } else {
            out.push(ch);
            column += 1;
        }
    }
    out
}

// ── Page layout ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct PlacedImage {
    name: String,
    width_px: u32,
    height_px: u32,
}

struct Layout<'a> {
    options: &'a PdfOptions,
    width: f32,
    height: f32,
    pages: Vec<Vec<Operation>>,
    y: f32,
    images: Vec<(String, ObjectId)>,
    image_cache: HashMap<[u8; 32], Option<PlacedImage>>,
}

impl<'a> Layout<'a> {
    fn new(options: &'a PdfOptions) -> Self {
        let (width, height) = options.page_size.dimensions();
        Self {
            options,
            width,
            height,
            pages: Vec::new(),
            y: height - options.margin,
            images: Vec::new(),
            image_cache: HashMap::new(),
        }
    }

    fn size(&self) -> f32 {
        self.options.font_size
    }

    fn left(&self) -> f32 {
        self.options.margin
    }

    fn top(&self) -> f32 {
        self.height - self.options.margin
    }

    fn bottom(&self) -> f32 {
        self.options.margin + self.size() * 1.5
    }

    fn content_width(&self) -> f32 {
        self.width - 2.0 * self.options.margin
    }

    fn new_page(&mut self) {
        self.pages.push(Vec::new());
        self.y = self.top();
    }

    /// Start a message on a fresh page; returns that page's index.
    fn begin_fragment(&mut self) -> usize {
        self.new_page();
        self.pages.len() - 1
    }

    fn ops(&mut self) -> &mut Vec<Operation> {
        if self.pages.is_empty() {
            self.new_page();
        }
        let last = self.pages.len() - 1;
        &mut self.pages[last]
    }

    /// Move to a new page unless `height` fits below the cursor.
    fn ensure(&mut self, height: f32) {
        let fresh = self.y >= self.top();
        if !fresh && self.y - height < self.bottom() {
            self.new_page();
        }
    }

    fn gap(&mut self, height: f32) {
        self.y -= height;
    }

    fn block(&mut self, doc: &mut Document, block: &Block) -> Result<(), EmitError> {
        let size = self.size();
        match block {
            Block::Title(text) => {
                self.spans(&[Span::new(text.as_str(), SpanStyle::BOLD)], 0, size * 1.4, 0.0);
                self.gap(size * 0.4);
            }
            Block::Heading(text) => {
                self.gap(size * 0.6);
                self.spans(&[Span::new(text.as_str(), SpanStyle::BOLD)], 0, size * 1.1, 0.0);
                self.gap(size * 0.2);
            }
            Block::Field { label, value } => {
                let spans = [
                    Span::new(format!("{label}: "), SpanStyle::BOLD),
                    Span::new(value.as_str(), SpanStyle::REGULAR),
                ];
                self.spans(&spans, 0, size, 0.25);
            }
            Block::Paragraph { spans, indent } => {
                self.spans(spans, *indent, size, 0.0);
                self.gap(size * 0.5);
            }
            Block::Preformatted(text) => {
                self.preformatted(text);
                self.gap(size * 0.5);
            }
            Block::Image {
                data, caption, ..
            } => self.image(doc, data, caption)?,
            Block::AttachmentEntry {
                filename,
                mime_type,
                size: human_size,
            } => {
                let spans = [
                    Span::new(format!("\u{2022} {filename}"), SpanStyle::REGULAR),
                    Span::new(format!(" ({mime_type}, {human_size})"), SpanStyle::ITALIC),
                ];
                self.spans(&spans, 1, size, 0.0);
            }
            Block::Notice(text) => {
                self.spans(&[Span::new(text.as_str(), SpanStyle::ITALIC)], 0, size, 0.4);
                self.gap(size * 0.5);
            }
            Block::Rule => self.rule(),
        }
        Ok(())
    }

    fn spans(&mut self, spans: &[Span], indent: u8, size: f32, gray: f32) {
        let offset = f32::from(indent) * INDENT_STEP;
        let max_width = (self.content_width() - offset).max(72.0);
        let x = self.left() + offset.min(self.content_width() - 72.0).max(0.0);
        for line in wrap_spans(spans, max_width, size) {
            self.line(x, &line, size, size * 1.3, gray);
        }
    }

    fn preformatted(&mut self, text: &str) {
        let size = self.size() * 0.9;
        let max_chars = ((self.content_width() / (0.6 * size)).floor() as usize).max(10);
        let x = self.left();
        for raw in text.lines() {
            let chars: Vec<char> = expand_tabs(raw).chars().collect();
            if chars.is_empty() {
                self.line(x, &[], size, size * 1.2, 0.0);
                continue;
            }
            for chunk in chars.chunks(max_chars) {
                let piece: String = chunk.iter().collect();
                self.line(x, &[(Font::Mono, piece)], size, size * 1.2, 0.0);
            }
        }
    }

    fn line(&mut self, x: f32, segments: &[(Font, String)], size: f32, leading: f32, gray: f32) {
        self.ensure(leading);
        let baseline = self.y - size;
        self.y -= leading;
        if segments.is_empty() {
            return;
        }

        let mut ops = vec![
            Operation::new("BT", vec![]),
            Operation::new("g", vec![real(gray)]),
            Operation::new("Td", vec![real(x), real(baseline)]),
        ];
        for (font, text) in segments {
            ops.push(Operation::new(
                "Tf",
                vec![font.resource_name().into(), real(size)],
            ));
            ops.push(Operation::new(
                "Tj",
                vec![Object::String(win_ansi(text), StringFormat::Literal)],
            ));
        }
        ops.push(Operation::new("ET", vec![]));
        self.ops().extend(ops);
    }

    fn rule(&mut self) {
        let size = self.size();
        self.ensure(size);
        self.gap(size * 0.4);
        let (x1, x2, y) = (self.left(), self.left() + self.content_width(), self.y);
        self.ops().extend([
            Operation::new("q", vec![]),
            Operation::new("G", vec![real(0.7)]),
            Operation::new("w", vec![real(0.5)]),
            Operation::new("m", vec![real(x1), real(y)]),
            Operation::new("l", vec![real(x2), real(y)]),
            Operation::new("S", vec![]),
            Operation::new("Q", vec![]),
        ]);
        self.gap(size * 0.8);
    }

    fn image(&mut self, doc: &mut Document, data: &[u8], caption: &str) -> Result<(), EmitError> {
        let key: [u8; 32] = Sha256::digest(data).into();
        let placed = match self.image_cache.get(&key) {
            Some(placed) => placed.clone(),
            None => {
                let placed = self.embed_image(doc, data)?;
                self.image_cache.insert(key, placed.clone());
                placed
            }
        };

        let size = self.size();
        let Some(img) = placed else {
            let notice = format!("[image could not be displayed: {caption}]");
            self.spans(&[Span::new(notice, SpanStyle::ITALIC)], 0, size, 0.4);
            return Ok(());
        };

        let natural_w = img.width_px as f32 * POINTS_PER_PIXEL;
        let natural_h = img.height_px as f32 * POINTS_PER_PIXEL;
        let max_h = (self.top() - self.bottom()) * 0.6;
        let scale = (self.content_width() / natural_w)
            .min(max_h / natural_h)
            .min(1.0);
        let (w, h) = (natural_w * scale, natural_h * scale);

        self.ensure(h + size);
        self.gap(size * 0.3);
        let (x, y) = (self.left(), self.y - h);
        self.ops().extend([
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![real(w), int(0), int(0), real(h), real(x), real(y)],
            ),
            Operation::new("Do", vec![img.name.as_str().into()]),
            Operation::new("Q", vec![]),
        ]);
        self.y = y;

        if !caption.trim().is_empty() {
            let small = size * 0.85;
            self.spans(&[Span::new(caption, SpanStyle::ITALIC)], 0, small, 0.4);
        }
        self.gap(size * 0.5);
        Ok(())
    }

    /// Decode a picture and add it as an RGB XObject. `None` when undecodable.
    fn embed_image(
        &mut self,
        doc: &mut Document,
        data: &[u8],
    ) -> Result<Option<PlacedImage>, EmitError> {
        let decoded = match image::load_from_memory(data) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(error = %e, bytes = data.len(), "Image could not be decoded, printing a notice instead");
                return Ok(None);
            }
        };

        let rgba = decoded.to_rgba8();
        let (width_px, height_px) = rgba.dimensions();
        if width_px == 0 || height_px == 0 {
            return Ok(None);
        }

        // Flatten transparency onto white
        let mut rgb = Vec::with_capacity(width_px as usize * height_px as usize * 3);
        for pixel in rgba.pixels() {
            let [r, g, b, a] = pixel.0;
            let alpha = u16::from(a);
            for channel in [r, g, b] {
                let blended = (u16::from(channel) * alpha + 255 * (255 - alpha)) / 255;
                rgb.push(blended as u8);
            }
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&rgb)
            .map_err(|e| EmitError::Render(format!("image compression failed: {e}")))?;
        let compressed = encoder
            .finish()
            .map_err(|e| EmitError::Render(format!("image compression failed: {e}")))?;

        let stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => i64::from(width_px),
                "Height" => i64::from(height_px),
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8_i64,
                "Filter" => "FlateDecode",
            },
            compressed,
        )
        .with_compression(false);
        let id = doc.add_object(stream);

        let name = format!("Im{}", self.images.len() + 1);
        self.images.push((name.clone(), id));
        debug!(name, width_px, height_px, "Embedded image");
        Ok(Some(PlacedImage {
            name,
            width_px,
            height_px,
        }))
    }

    /// Add page footers and hand back the page contents and image resources.
    fn finish(mut self) -> (Vec<Vec<Operation>>, Vec<(String, ObjectId)>) {
        if self.pages.is_empty() {
            self.new_page();
        }
        let total = self.pages.len();
        let footer_size = (self.size() * 0.8).max(6.0);
        let footer_y = self.options.margin * 0.5;
        for (i, ops) in self.pages.iter_mut().enumerate() {
            let text = format!("Page {} of {}", i + 1, total);
            let x = (self.width - Font::Regular.text_width(&text, footer_size)) / 2.0;
            ops.extend([
                Operation::new("BT", vec![]),
                Operation::new("g", vec![real(0.5)]),
                Operation::new(
                    "Tf",
                    vec![Font::Regular.resource_name().into(), real(footer_size)],
                ),
                Operation::new("Td", vec![real(x), real(footer_y)]),
                Operation::new(
                    "Tj",
                    vec![Object::String(win_ansi(&text), StringFormat::Literal)],
                ),
                Operation::new("ET", vec![]),
            ]);
        }
        (self.pages, self.images)
    }
}
