//! MIME detection and text-safe encoding for downloaded attachments.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serializer;

/// Fallback MIME type when nothing else is known.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Resolve the MIME type of a downloaded attachment.
///
/// Order:
/// 1. the response `Content-Type`, unless absent or the generic octet-stream
/// 2. magic byte detection via `infer`
/// 3. the filename extension, for text formats without magic bytes
/// 4. `application/octet-stream`
pub fn detect_mime(content_type: Option<&str>, filename: &str, data: &[u8]) -> String {
    if let Some(ct) = content_type.and_then(essence) {
        if ct != OCTET_STREAM {
            return ct.to_string();
        }
    }

    if let Some(kind) = infer::get(data) {
        return kind.mime_type().to_string();
    }

    if let Some((_, ext)) = filename.rsplit_once('.') {
        if let Some(mime) = text_mime_from_extension(ext) {
            return mime.to_string();
        }
    }

    OCTET_STREAM.to_string()
}

/// `image/png; charset=...` -> `image/png`
fn essence(content_type: &str) -> Option<&str> {
    let essence = content_type.split(';').next()?.trim();
    if essence.is_empty() || !essence.contains('/') {
        None
    } else {
        Some(essence)
    }
}

/// Text formats commonly attached to review comments. Binary formats are left
/// to magic byte detection.
fn text_mime_from_extension(ext: &str) -> Option<&'static str> {
    match ext.to_lowercase().as_str() {
        "txt" | "log" => Some("text/plain"),
        "csv" => Some("text/csv"),
        "md" | "markdown" => Some("text/markdown"),
        "json" => Some("application/json"),
        "xml" => Some("application/xml"),
        "html" | "htm" => Some("text/html"),
        "svg" => Some("image/svg+xml"),
        "edl" | "otio" => Some("text/plain"),
        _ => None,
    }
}

/// Whether the type can be rendered inline as an image thumbnail.
pub fn is_image(mime_type: &str) -> bool {
    mime_type.starts_with("image/")
}

/// `data:` URI embedding `data` as base64.
pub fn data_uri(mime_type: &str, data: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(data))
}

/// Serde helper that writes bytes as a base64 string.
pub fn serialize_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];

    #[test]
    fn test_header_wins() {
        assert_eq!(
            detect_mime(Some("image/jpeg; charset=binary"), "x.png", PNG_HEADER),
            "image/jpeg"
        );
    }

    #[test]
    fn test_generic_header_falls_through_to_magic_bytes() {
        assert_eq!(
            detect_mime(Some("application/octet-stream"), "shot", PNG_HEADER),
            "image/png"
        );
        assert_eq!(detect_mime(None, "shot", PNG_HEADER), "image/png");
    }

    #[test]
    fn test_extension_for_text() {
        assert_eq!(detect_mime(None, "notes.md", b"# hi"), "text/markdown");
        assert_eq!(detect_mime(Some(""), "cut.EDL", b"TITLE: x"), "text/plain");
    }

    #[test]
    fn test_unknown_is_octet_stream() {
        assert_eq!(detect_mime(None, "blob", &[1, 2, 3]), OCTET_STREAM);
        assert_eq!(detect_mime(Some("garbage"), "blob.bin", &[]), OCTET_STREAM);
    }

    #[test]
    fn test_data_uri() {
        assert_eq!(data_uri("text/plain", b"hi"), "data:text/plain;base64,aGk=");
    }

    #[test]
    fn test_is_image() {
        assert!(is_image("image/png"));
        assert!(!is_image("application/pdf"));
    }
}
