//! Decoded attachments owned by a normalized message.

/// One attachment extracted from a message.
///
/// The content is fully decoded (transfer encoding removed) and owned by the
/// parent message; it is dropped once the message has been rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Declared filename, or `attachment_<n>.<ext>` when the part had none.
    pub filename: String,

    /// MIME content type, lowercase (e.g. `"image/jpeg"`).
    pub mime_type: String,

    /// `Content-ID` without angle brackets, for `cid:` references from HTML.
    pub content_id: Option<String>,

    /// `true` for `Content-Disposition: inline` parts.
    pub inline: bool,

    /// Decoded bytes.
    pub content: Vec<u8>,
}

impl Attachment {
    /// Decoded size in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.content.len() as u64
    }

    /// Whether the document renderer can draw this attachment as a picture.
    pub fn is_renderable_image(&self) -> bool {
        is_renderable_image(&self.mime_type)
    }
}

/// Image formats the emitters know how to embed.
pub fn is_renderable_image(mime_type: &str) -> bool {
    matches!(
        mime_type,
        "image/png" | "image/jpeg" | "image/jpg" | "image/pjpeg" | "image/gif"
    )
}

/// Build a filename for a part that did not declare one.
///
/// `index` is the attachment's position within its message.
pub fn synthesize_filename(index: usize, mime_type: &str) -> String {
    match extension_for(mime_type) {
        Some(ext) => format!("attachment_{index}.{ext}"),
        None => format!("attachment_{index}"),
    }
}

fn extension_for(mime_type: &str) -> Option<&'static str> {
    let ext = match mime_type {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/gif" => "gif",
        "application/pdf" => "pdf",
        "text/plain" => "txt",
        "text/html" => "html",
        "text/calendar" => "ics",
        "message/rfc822" => "eml",
        "application/zip" => "zip",
        _ => return None,
    };
    Some(ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthesize_filename() {
        assert_eq!(synthesize_filename(0, "image/png"), "attachment_0.png");
        assert_eq!(synthesize_filename(3, "message/rfc822"), "attachment_3.eml");
        assert_eq!(
            synthesize_filename(2, "application/x-unknown"),
            "attachment_2"
        );
    }

    #[test]
    fn test_renderable_images() {
        assert!(is_renderable_image("image/jpeg"));
        assert!(is_renderable_image("image/gif"));
        assert!(!is_renderable_image("image/svg+xml"));
        assert!(!is_renderable_image("application/pdf"));
    }
}
