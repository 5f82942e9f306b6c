use tracing::debug;

/// Plain text of an uploaded file.
///
/// Only `text/*` content is decoded here; binary formats come back empty and
/// the document is stored without keywords. Invalid UTF-8 is replaced rather
/// than rejected.
pub fn extract_text(mimetype: &str, bytes: &[u8]) -> String {
    let essence = mimetype
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if !essence.starts_with("text/") {
        debug!(mimetype, "No text extractor for mimetype");
        return String::new();
    }
    let text = String::from_utf8_lossy(bytes);
    text.strip_prefix('\u{feff}').unwrap_or(&text).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_plain_text() {
        assert_eq!(extract_text("text/plain", "año fiscal".as_bytes()), "año fiscal");
        assert_eq!(
            extract_text("Text/Plain; charset=utf-8", b"\xef\xbb\xbfhola"),
            "hola"
        );
    }

    #[test]
    fn binary_formats_are_empty() {
        assert!(extract_text("application/pdf", b"%PDF-1.7").is_empty());
        assert!(extract_text("", b"abc").is_empty());
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        assert_eq!(extract_text("text/plain", b"ok\xff"), "ok\u{fffd}");
    }
}
