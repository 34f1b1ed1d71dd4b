//! Minimal scanning of S3 XML responses.
//!
//! The documents S3 returns are flat and well known, so tags are located by
//! plain string search rather than a full parser.

/// Text of the first `<tag>…</tag>` in `xml`, entity-decoded.
pub fn extract_tag(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(decode_entities(&xml[start..end]))
}

/// Inner text of every `<tag>…</tag>` block, in document order.
pub fn blocks<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut out = Vec::new();
    let mut remaining = xml;
    while let Some(start) = remaining.find(&open) {
        remaining = &remaining[start + open.len()..];
        match remaining.find(&close) {
            Some(end) => {
                out.push(&remaining[..end]);
                remaining = &remaining[end + close.len()..];
            }
            None => break,
        }
    }
    out
}

pub fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#34;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

pub fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// True when a 2xx body is actually an S3 `<Error>` document.
pub fn is_error_document(xml: &str) -> bool {
    xml.contains("<Error>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_tag() {
        let xml = "<InitiateMultipartUploadResult><Bucket>b</Bucket>\
                   <Key>a&amp;b.txt</Key><UploadId>abc-123</UploadId></InitiateMultipartUploadResult>";
        assert_eq!(extract_tag(xml, "UploadId").as_deref(), Some("abc-123"));
        assert_eq!(extract_tag(xml, "Key").as_deref(), Some("a&b.txt"));
        assert_eq!(extract_tag(xml, "Missing"), None);
    }

    #[test]
    fn test_blocks() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult>
  <Contents><Key>prefix/abc/file.txt</Key></Contents>
  <Contents><Key>prefix/def/photo.jpg</Key></Contents>
</ListBucketResult>"#;
        let found = blocks(xml, "Contents");
        assert_eq!(found.len(), 2);
        assert_eq!(extract_tag(found[1], "Key").as_deref(), Some("prefix/def/photo.jpg"));
    }

    #[test]
    fn test_escape_roundtrip() {
        let raw = r#"<a href="x">&'"#;
        assert_eq!(decode_entities(&escape(raw)), raw);
        assert_eq!(escape("\"etag\""), "&quot;etag&quot;");
    }
}
