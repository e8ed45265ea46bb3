//! Content-type sniffing for downloaded files.
//!
//! Servers routinely mislabel responses, so validation goes by the leading
//! bytes of the file rather than by extension or Content-Type header.

use std::fs;
use std::io::Read;
use std::path::Path;

/// Expected content type of a produced artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedMime {
    Pdf,
    Xml,
    Json,
    Png,
}

impl ExpectedMime {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpectedMime::Pdf => "pdf",
            ExpectedMime::Xml => "xml",
            ExpectedMime::Json => "json",
            ExpectedMime::Png => "png",
        }
    }
}

/// Sniff the MIME type of a file from its magic bytes. Returns `None` for
/// missing or empty files.
pub fn sniff_mime(path: &Path) -> Option<&'static str> {
    let mut file = fs::File::open(path).ok()?;
    let mut head = [0u8; 512];
    let n = file.read(&mut head).ok()?;
    if n == 0 {
        return None;
    }
    Some(sniff_bytes(&head[..n]))
}

/// Classify a leading byte slice.
pub fn sniff_bytes(head: &[u8]) -> &'static str {
    if head.starts_with(b"%PDF-") {
        return "application/pdf";
    }
    if head.starts_with(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]) {
        return "image/png";
    }
    if head.starts_with(&[0x1f, 0x8b]) {
        return "application/gzip";
    }
    let text = String::from_utf8_lossy(head);
    let trimmed = text.trim_start();
    if trimmed.starts_with("<?xml") || trimmed.starts_with('<') {
        return "application/xml";
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return "application/json";
    }
    "text/plain"
}

/// True when the file is gzip-compressed.
pub fn is_gzip(path: &Path) -> bool {
    sniff_mime(path) == Some("application/gzip")
}

/// Validate a file against the expected content type. Zero-byte and missing
/// files are always invalid.
pub fn is_valid_file(path: &Path, expected: ExpectedMime) -> bool {
    let Some(mime) = sniff_mime(path) else {
        return false;
    };
    match expected {
        ExpectedMime::Pdf => mime == "application/pdf",
        ExpectedMime::Xml => mime == "application/xml" || mime == "text/xml",
        ExpectedMime::Json => mime == "application/json",
        ExpectedMime::Png => mime == "image/png",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(content).unwrap();
        path
    }

    #[test]
    fn test_sniff_pdf_and_validate() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = write_file(dir.path(), "a.pdf", b"%PDF-1.5 rest of it");
        assert_eq!(sniff_mime(&pdf), Some("application/pdf"));
        assert!(is_valid_file(&pdf, ExpectedMime::Pdf));
        assert!(!is_valid_file(&pdf, ExpectedMime::Xml));
    }

    #[test]
    fn test_sniff_xml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let xml = write_file(dir.path(), "a.xml", b"<?xml version=\"1.0\"?><TEI/>");
        let bare = write_file(dir.path(), "b.xml", b"<TEI xmlns=\"x\"/>");
        let json = write_file(dir.path(), "a.json", b"{\"ok\": true}");
        assert!(is_valid_file(&xml, ExpectedMime::Xml));
        assert!(is_valid_file(&bare, ExpectedMime::Xml));
        assert!(is_valid_file(&json, ExpectedMime::Json));
    }

    #[test]
    fn test_zero_byte_file_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let empty = write_file(dir.path(), "empty.pdf", b"");
        assert_eq!(sniff_mime(&empty), None);
        assert!(!is_valid_file(&empty, ExpectedMime::Pdf));
    }

    #[test]
    fn test_gzip_detection() {
        let dir = tempfile::tempdir().unwrap();
        let gz = write_file(dir.path(), "a.gz", &[0x1f, 0x8b, 0x08, 0x00]);
        assert!(is_gzip(&gz));
    }
}
