//! RFC 5322 header parsing: folding, encoded-words (RFC 2047), and date parsing.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::message::HeaderMap;

/// Base64 engine for encoded-words: real-world senders often drop the padding.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Why a header block was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    /// Nothing that looks like `name: value` was found.
    #[error("no header fields found")]
    NoFields,

    /// A field name contains whitespace or control characters.
    #[error("invalid header field name '{0}'")]
    InvalidFieldName(String),

    /// An encoded-word was opened (`=?charset?B?`) but never closed with `?=`.
    #[error("unterminated encoded-word in '{0}' header")]
    UnterminatedEncodedWord(String),
}

/// Drop `From ` envelope lines repeated at the very top of a message.
pub fn skip_envelope_lines(mut data: &[u8]) -> &[u8] {
    while data.starts_with(b"From ") {
        match data.iter().position(|&b| b == b'\n') {
            Some(end) => data = &data[end + 1..],
            None => return &[],
        }
    }
    data
}

/// Split a message into its header block and body at the first blank line.
///
/// A message with no blank line is all headers and an empty body.
pub fn split_header_block(data: &[u8]) -> (&[u8], &[u8]) {
    for i in 0..data.len() {
        if data[i..].starts_with(b"\n\n") {
            return (&data[..i + 1], &data[i + 2..]);
        }
        if data[i..].starts_with(b"\r\n\r\n") {
            return (&data[..i + 2], &data[i + 4..]);
        }
    }
    (data, &[])
}

/// Parse and decode a raw header block.
///
/// Every value has its encoded-words decoded. Duplicate names keep the last
/// value, as [`HeaderMap`] does.
pub fn parse_header_block(raw_headers: &[u8]) -> Result<HeaderMap, HeaderError> {
    let text = decode_header_bytes(raw_headers);
    let fields = unfold_headers(&text)?;
    if fields.is_empty() {
        return Err(HeaderError::NoFields);
    }

    let mut headers = HeaderMap::new();
    for (name, raw_value) in fields {
        let value = decode_encoded_words(&raw_value)
            .map_err(|_| HeaderError::UnterminatedEncodedWord(name.clone()))?;
        headers.insert(&name, value);
    }
    Ok(headers)
}

/// Decode raw header bytes to a string.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every byte).
fn decode_header_bytes(bytes: &[u8]) -> String {
    // Strip BOM if present
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF][..]).unwrap_or(bytes);

    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Unfold headers: join continuation lines (starting with space or tab) with the previous header.
///
/// Returns `(lowercase_name, raw_value)` pairs in order of appearance.
/// Lines that are neither a field nor a continuation are skipped with a debug log,
/// and so is a stray `From ` envelope line. Any other field name with whitespace
/// or control characters rejects the whole block.
fn unfold_headers(text: &str) -> Result<Vec<(String, String)>, HeaderError> {
    let mut result: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        if line.starts_with("From ") {
            debug!(line = line, "Ignoring envelope line inside header block");
        } else if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(last) = result.last_mut() {
                last.1.push(' ');
                last.1.push_str(line.trim());
            }
        } else if let Some(colon_pos) = line.find(':') {
            let name = line[..colon_pos].trim_end();
            if name.is_empty() || name.chars().any(|c| c.is_whitespace() || c.is_control()) {
                return Err(HeaderError::InvalidFieldName(name.to_string()));
            }
            let value = line[colon_pos + 1..].trim().to_string();
            result.push((name.to_lowercase(), value));
        } else if !line.trim().is_empty() {
            debug!(line = line, "Ignoring header line without a colon");
        }
    }

    Ok(result)
}

/// Marker error: an encoded-word was opened but never closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unterminated;

/// Decode RFC 2047 encoded-words in a header value.
///
/// Example: `"=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="` → `"Hola mundo"`
///
/// A word whose payload cannot be decoded is kept as raw text. A word that is
/// opened but never terminated is an error: the header block is broken.
pub fn decode_encoded_words(input: &str) -> Result<String, Unterminated> {
    let mut result = String::with_capacity(input.len());
    let mut remaining = input;
    let mut last_was_encoded = false;

    while let Some(start) = remaining.find("=?") {
        let before = &remaining[..start];
        // If the gap between two encoded words is only whitespace, skip it (RFC 2047 §6.2)
        if !last_was_encoded || !before.trim().is_empty() {
            result.push_str(before);
        }

        let after_start = &remaining[start + 2..];

        match scan_encoded_word(after_start) {
            WordScan::Word(word) => {
                result.push_str(&word.text);
                remaining = &remaining[start + 2 + word.consumed..];
                last_was_encoded = true;
            }
            WordScan::Unterminated => return Err(Unterminated),
            WordScan::NotAWord => {
                result.push_str("=?");
                remaining = after_start;
                last_was_encoded = false;
            }
        }
    }

    result.push_str(remaining);
    Ok(result)
}

struct DecodedWord {
    text: String,
    consumed: usize, // bytes consumed from the string *after* the initial "=?"
}

enum WordScan {
    Word(DecodedWord),
    Unterminated,
    NotAWord,
}

fn scan_encoded_word(s: &str) -> WordScan {
    // Format: charset?encoding?encoded_text?=
    let Some(first_q) = s.find('?') else {
        return WordScan::NotAWord;
    };
    let charset = &s[..first_q];
    if charset.is_empty() || !charset.chars().all(is_charset_char) {
        return WordScan::NotAWord;
    }

    let rest = &s[first_q + 1..];
    let encoding = match rest.as_bytes() {
        [e @ (b'B' | b'b' | b'Q' | b'q'), b'?', ..] => e.to_ascii_uppercase(),
        _ => return WordScan::NotAWord,
    };

    let payload = &rest[2..];
    let Some(end) = payload.find("?=") else {
        return WordScan::Unterminated;
    };
    let encoded_text = &payload[..end];
    let consumed = first_q + 1 + 2 + end + 2;
    let raw_word = &s[..consumed];

    let bytes = match encoding {
        b'B' => {
            let compact: String = encoded_text.split_whitespace().collect();
            match LENIENT_BASE64.decode(compact.as_bytes()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(error = %e, "Undecodable base64 encoded-word, keeping raw text");
                    return WordScan::Word(DecodedWord {
                        text: format!("=?{raw_word}"),
                        consumed,
                    });
                }
            }
        }
        _ => decode_q_encoding(encoded_text),
    };

    WordScan::Word(DecodedWord {
        text: decode_charset(charset, &bytes),
        consumed,
    })
}

fn is_charset_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '*')
}

/// Decode a Q-encoded payload: `_` is a space, `=XX` a byte.
///
/// A stray `=` that is not followed by two hex digits is kept literally.
fn decode_q_encoding(input: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut rest = input.as_bytes();
    while let Some((&b, tail)) = rest.split_first() {
        match (b, tail) {
            (b'_', _) => {
                out.push(b' ');
                rest = tail;
            }
            (b'=', [hi, lo, more @ ..]) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
                out.push((hex_val(*hi) << 4) | hex_val(*lo));
                rest = more;
            }
            (other, _) => {
                out.push(other);
                rest = tail;
            }
        }
    }
    out
}

fn hex_val(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        _ => b - b'A' + 10,
    }
}

/// Decode bytes using a named charset.
///
/// Unknown charsets fall back to lossy UTF-8; this never fails.
pub fn decode_charset(charset: &str, bytes: &[u8]) -> String {
    // RFC 2231 language suffix: "utf-8*en"
    let label = charset.split('*').next().unwrap_or_default().trim();
    let encoding = encoding_rs::Encoding::for_label(label.as_bytes()).unwrap_or_else(|| {
        warn!(charset = label, "Unknown charset, decoding as UTF-8");
        encoding_rs::UTF_8
    });
    let (decoded, _, _) = encoding.decode(bytes);
    decoded.into_owned()
}

/// The `<...>` part of a header value such as `Message-ID`, brackets kept.
///
/// Values without brackets come back trimmed.
pub fn extract_angle_bracket(s: &str) -> String {
    let trimmed = s.trim();
    trimmed
        .find('<')
        .and_then(|open| {
            let close = trimmed[open..].find('>')?;
            Some(&trimmed[open..=open + close])
        })
        .unwrap_or(trimmed)
        .to_string()
}

/// Parse an email date string in various common formats.
///
/// Supports RFC 2822, ISO 8601, and many broken real-world variants. The
/// sender's UTC offset is preserved; dates without any zone are read as UTC.
pub fn parse_date(date_str: &str) -> Option<DateTime<FixedOffset>> {
    let trimmed = strip_trailing_comment(date_str.trim());
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt);
    }

    // Remove leading day-of-week: "Thu, " or "Thu "
    let no_dow = strip_day_of_week(trimmed);

    // IMAP-style: "16-JUL-2025 03:01:03" → normalize to "16 Jul 2025 03:01:03"
    let no_dow_normalized = normalize_imap_date(&no_dow);

    let formats = [
        "%d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M %z",
        "%d %b %Y %H:%M:%S",
        "%d %b %Y %H:%M",
        "%b %d %H:%M:%S %Y",
        "%Y-%m-%dT%H:%M:%S%z",
        "%Y-%m-%dT%H:%M:%SZ",
        "%Y-%m-%d %H:%M:%S %z",
        "%Y-%m-%d %H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
    ];

    // Named timezones are rewritten as offsets before the format pass
    for candidate in [&no_dow, &no_dow_normalized] {
        let replaced = replace_named_tz(candidate);
        for fmt in &formats {
            if let Ok(dt) = DateTime::parse_from_str(&replaced, fmt) {
                return Some(dt);
            }
            if let Ok(ndt) = NaiveDateTime::parse_from_str(&replaced, fmt) {
                return Some(Utc.from_utc_datetime(&ndt).fixed_offset());
            }
        }
    }

    // Try using mail-parser's date parsing as last resort
    if let Some(dt) = mail_parser_date(trimmed) {
        return Some(dt);
    }

    warn!(date = trimmed, "Could not parse date");
    None
}

/// Attempt to parse a date using `mail-parser`'s built-in parser.
fn mail_parser_date(input: &str) -> Option<DateTime<FixedOffset>> {
    use mail_parser::MessageParser;

    // Wrap input in a minimal RFC 5322 message so mail-parser can parse it
    let fake_msg = format!("Date: {input}\n\n");
    let parser = MessageParser::default();
    let parsed = parser.parse(fake_msg.as_bytes())?;
    let dt = parsed.date()?.to_rfc3339();
    DateTime::parse_from_rfc3339(&dt).ok()
}

/// Drop a trailing `(PST)`-style comment.
fn strip_trailing_comment(s: &str) -> &str {
    match (s.rfind('('), s.ends_with(')')) {
        (Some(open), true) => s[..open].trim_end(),
        _ => s,
    }
}

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Rewrite IMAP-style `16-JUL-2025 03:01:03` as `16 Jul 2025 03:01:03`.
fn normalize_imap_date(s: &str) -> String {
    let mut parts = s.splitn(3, '-');
    let (Some(day), Some(month), Some(rest)) = (parts.next(), parts.next(), parts.next()) else {
        return s.to_string();
    };
    let known = MONTHS.iter().find(|m| m.eq_ignore_ascii_case(month));
    match known {
        Some(month) if day.len() <= 2 && day.chars().all(|c| c.is_ascii_digit()) => {
            format!("{day} {month} {rest}")
        }
        _ => s.to_string(),
    }
}

/// Drop a leading weekday, with or without the comma.
fn strip_day_of_week(s: &str) -> String {
    const DAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
    let head = s.get(..3).unwrap_or_default();
    let tail = s.get(3..).unwrap_or_default();
    if DAYS.iter().any(|d| d.eq_ignore_ascii_case(head))
        && (tail.starts_with(',') || tail.starts_with(' '))
    {
        tail.trim_start_matches([',', ' ']).to_string()
    } else {
        s.to_string()
    }
}

/// Numeric offsets for zone names that show up in real archives.
const NAMED_ZONES: [(&str, &str); 13] = [
    ("CEST", "+0200"),
    ("EST", "-0500"),
    ("EDT", "-0400"),
    ("CST", "-0600"),
    ("CDT", "-0500"),
    ("MST", "-0700"),
    ("MDT", "-0600"),
    ("PST", "-0800"),
    ("PDT", "-0700"),
    ("GMT", "+0000"),
    ("UTC", "+0000"),
    ("CET", "+0100"),
    ("JST", "+0900"),
];

/// Replace a trailing zone name with its numeric offset.
fn replace_named_tz(s: &str) -> String {
    NAMED_ZONES
        .iter()
        .find_map(|(name, offset)| s.strip_suffix(name).map(|head| format!("{head}{offset}")))
        .unwrap_or_else(|| s.to_string())
}
