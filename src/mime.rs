//! Image MIME detection from magic bytes.

/// Mime types that carry no information about the payload.
const GENERIC_MIME_TYPES: &[&str] = &["", "application/octet-stream", "binary/octet-stream"];

/// Identify an image format from its leading bytes.
pub fn sniff_image_mime(bytes: &[u8]) -> Option<&'static str> {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        [0x89, 0x50, 0x4E, 0x47, ..] => Some("image/png"),
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => Some("image/webp"),
        [0x47, 0x49, 0x46, 0x38, ..] => Some("image/gif"),
        [0x42, 0x4D, ..] => Some("image/bmp"),
        _ => None,
    }
}

/// Like [`sniff_image_mime`], but falls back to `image/png`.
pub fn detect_image_mime(bytes: &[u8]) -> &'static str {
    sniff_image_mime(bytes).unwrap_or_else(|| {
        tracing::warn!(
            "Unrecognized image format (first 4 bytes: {:02X?}), falling back to image/png",
            &bytes[..bytes.len().min(4)]
        );
        "image/png"
    })
}

/// Pick the mime type to trust for a downloaded resource.
///
/// The declared type wins unless it is missing or a generic binary type, in
/// which case the payload is sniffed. The result is trimmed and lowercase.
pub fn effective_mime(declared: &str, bytes: &[u8]) -> String {
    let declared = declared.trim().to_ascii_lowercase();
    if GENERIC_MIME_TYPES.contains(&declared.as_str()) {
        detect_image_mime(bytes).to_string()
    } else {
        declared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIF: &[u8] = b"GIF89a\x01\x00";
    const BMP: &[u8] = &[0x42, 0x4D, 0x36, 0x00, 0x0C, 0x00];

    #[test]
    fn test_sniff_gif_and_bmp() {
        assert_eq!(sniff_image_mime(GIF), Some("image/gif"));
        assert_eq!(sniff_image_mime(b"GIF87a"), Some("image/gif"));
        assert_eq!(sniff_image_mime(BMP), Some("image/bmp"));
    }

    #[test]
    fn test_sniff_truncated_riff_is_not_webp() {
        assert_eq!(sniff_image_mime(&[0x52, 0x49, 0x46, 0x46, 0x00]), None);
        assert_eq!(sniff_image_mime(b"RIFF\x00\x00\x00\x00WAVE"), None);
    }

    #[test]
    fn test_sniff_unknown_is_none() {
        assert_eq!(sniff_image_mime(b"%PDF-1.7"), None);
        assert_eq!(sniff_image_mime(&[]), None);
    }

    #[test]
    fn test_detect_short_payload_falls_back() {
        assert_eq!(detect_image_mime(&[0x42]), "image/png");
        assert_eq!(detect_image_mime(&[]), "image/png");
    }

    #[test]
    fn test_effective_mime_keeps_declared_type() {
        assert_eq!(effective_mime("image/jpeg", &[0x89, 0x50]), "image/jpeg");
        assert_eq!(effective_mime("text/plain", b"hello"), "text/plain");
    }

    #[test]
    fn test_effective_mime_normalizes_declared_type() {
        assert_eq!(effective_mime("  Image/JPEG \n", GIF), "image/jpeg");
    }

    #[test]
    fn test_effective_mime_sniffs_generic_type() {
        assert_eq!(effective_mime("application/octet-stream", GIF), "image/gif");
        assert_eq!(effective_mime(" Application/Octet-Stream ", BMP), "image/bmp");
        assert_eq!(effective_mime("binary/octet-stream", BMP), "image/bmp");
        assert_eq!(effective_mime("", GIF), "image/gif");
    }

    #[test]
    fn test_effective_mime_generic_unknown_payload_falls_back() {
        assert_eq!(effective_mime("   ", b"%PDF-1.7"), "image/png");
    }
}
