//! Fetched page wrapper with layered charset detection
//!
//! Crawl targets are arbitrary servers, so the body's encoding is resolved
//! through a ladder: the Content-Type charset, a `<meta>` declaration in the
//! first 4KB, statistical detection when it is confident, then a fixed list
//! of common encodings, and finally UTF-8.

use encoding_rs::{Encoding, UTF_8};
use regex::bytes::Regex;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_TYPE};
use std::sync::OnceLock;

/// Bytes searched for a `<meta>` charset declaration
const META_SNIFF_LIMIT: usize = 4096;

/// Bytes fed to the statistical detector
const DETECTOR_SAMPLE_LIMIT: usize = 64 * 1024;

/// Encodings tried in order when nothing better is known
const FALLBACK_ENCODINGS: &[&str] = &[
    "utf-8",
    "windows-1252",
    "windows-1251",
    "windows-1250",
    "iso-8859-2",
    "iso-8859-15",
    "gbk",
    "gb18030",
    "big5",
    "shift_jis",
    "euc-jp",
    "iso-2022-jp",
    "euc-kr",
    "iso-8859-5",
    "iso-8859-7",
    "iso-8859-8",
    "windows-1254",
    "koi8-r",
    "koi8-u",
    "windows-1253",
    "windows-1255",
    "windows-1256",
    "windows-1257",
    "windows-874",
    "utf-16le",
    "utf-16be",
];

fn meta_charset_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?([A-Za-z0-9_:.\-]+)"#).ok())
        .as_ref()
}

fn meta_http_equiv_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?i)<meta[^>]+http-equiv\s*=\s*["']?content-type["']?[^>]+content\s*=\s*["']?[^;"'>]*;\s*charset\s*=\s*([A-Za-z0-9_:.\-]+)"#,
        )
        .ok()
    })
    .as_ref()
}

/// Where a page's encoding came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingSource {
    Header,
    Meta,
    Detected,
    Fallback,
    Default,
}

/// A successfully fetched page
#[derive(Debug)]
pub struct FetchedPage {
    /// URL the page was requested as
    pub url: String,
    /// URL after redirects
    pub final_url: String,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    encoding: &'static Encoding,
    encoding_source: EncodingSource,
    text: OnceLock<String>,
}

impl FetchedPage {
    pub fn new(
        url: impl Into<String>,
        final_url: impl Into<String>,
        status: u16,
        headers: HeaderMap,
        body: Vec<u8>,
    ) -> Self {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let (encoding, encoding_source) = detect_encoding(&body, content_type.as_deref());

        Self {
            url: url.into(),
            final_url: final_url.into(),
            status,
            headers,
            body,
            encoding,
            encoding_source,
            text: OnceLock::new(),
        }
    }

    /// Detected encoding of the body
    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    pub fn encoding_source(&self) -> EncodingSource {
        self.encoding_source
    }

    /// Body decoded to text, computed once
    pub fn text(&self) -> &str {
        self.text.get_or_init(|| decode_body(&self.body, self.encoding))
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// Returns true if the page should be parsed for links
    pub fn is_html(&self) -> bool {
        match self.content_type() {
            Some(ct) => {
                let ct = ct.to_ascii_lowercase();
                ct.contains("html") || ct.contains("xml")
            }
            None => true,
        }
    }
}

/// Filename from a Content-Disposition header, if any
pub fn content_disposition_filename(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(CONTENT_DISPOSITION)?.to_str().ok()?;
    header.split(';').find_map(|part| {
        let (key, value) = part.trim().split_once('=')?;
        if key.trim().eq_ignore_ascii_case("filename") {
            let name = value.trim().trim_matches('"');
            (!name.is_empty()).then(|| name.to_string())
        } else {
            None
        }
    })
}

/// Resolves the encoding of a response body
///
/// Each candidate is accepted only if the body decodes under it without errors.
pub fn detect_encoding(
    body: &[u8],
    content_type: Option<&str>,
) -> (&'static Encoding, EncodingSource) {
    if let Some(encoding) = content_type
        .and_then(header_charset)
        .and_then(|label| Encoding::for_label(label.as_bytes()))
    {
        if decodes_cleanly(body, encoding) {
            return (encoding, EncodingSource::Header);
        }
    }

    let html_like = content_type
        .map(|ct| ct.to_ascii_lowercase().contains("text/html"))
        .unwrap_or(true);
    if html_like {
        if let Some(encoding) = meta_charset(body) {
            if decodes_cleanly(body, encoding) {
                return (encoding, EncodingSource::Meta);
            }
        }
    }

    let sample = &body[..body.len().min(DETECTOR_SAMPLE_LIMIT)];
    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(sample, sample.len() == body.len());
    let (guess, confident) = detector.guess_assess(None, true);
    if confident && decodes_cleanly(body, guess) {
        return (guess, EncodingSource::Detected);
    }

    for label in FALLBACK_ENCODINGS {
        if let Some(encoding) = Encoding::for_label(label.as_bytes()) {
            if decodes_cleanly(body, encoding) {
                return (encoding, EncodingSource::Fallback);
            }
        }
    }

    (UTF_8, EncodingSource::Default)
}

/// Extracts the `charset=` parameter from a Content-Type value
pub fn header_charset(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        if key.trim().eq_ignore_ascii_case("charset") {
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
            (!value.is_empty()).then(|| value.to_string())
        } else {
            None
        }
    })
}

/// Finds a charset declared in a `<meta>` tag near the start of the document
pub fn meta_charset(body: &[u8]) -> Option<&'static Encoding> {
    let head = &body[..body.len().min(META_SNIFF_LIMIT)];
    [meta_charset_regex(), meta_http_equiv_regex()]
        .into_iter()
        .flatten()
        .filter_map(|re| re.captures(head))
        .filter_map(|caps| caps.get(1))
        .find_map(|label| Encoding::for_label(label.as_bytes()))
}

fn decodes_cleanly(body: &[u8], encoding: &'static Encoding) -> bool {
    encoding
        .decode_without_bom_handling_and_without_replacement(body)
        .is_some()
}

/// Decodes a body, falling back to replacement characters, then to UTF-8
pub fn decode_body(body: &[u8], encoding: &'static Encoding) -> String {
    if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(body) {
        return text.into_owned();
    }

    let (text, had_errors) = encoding.decode_without_bom_handling(body);
    if !had_errors || encoding != UTF_8 {
        tracing::debug!(
            "Decoded body as {} with replacement characters",
            encoding.name()
        );
        return text.into_owned();
    }

    String::from_utf8_lossy(body).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::{SHIFT_JIS, WINDOWS_1251, WINDOWS_1252};
    use reqwest::header::HeaderValue;

    fn page(content_type: Option<&str>, body: Vec<u8>) -> FetchedPage {
        let mut headers = HeaderMap::new();
        if let Some(ct) = content_type {
            headers.insert(CONTENT_TYPE, HeaderValue::from_str(ct).unwrap());
        }
        FetchedPage::new("http://example.com/", "http://example.com/", 200, headers, body)
    }

    #[test]
    fn test_header_charset_parsing() {
        assert_eq!(
            header_charset("text/html; charset=ISO-8859-1"),
            Some("ISO-8859-1".to_string())
        );
        assert_eq!(
            header_charset("text/html;charset=\"utf-8\""),
            Some("utf-8".to_string())
        );
        assert_eq!(header_charset("text/html"), None);
    }

    #[test]
    fn test_header_charset_wins() {
        let (body, _, _) = WINDOWS_1251.encode("Привет, мир");
        let page = page(Some("text/html; charset=windows-1251"), body.into_owned());
        assert_eq!(page.encoding(), WINDOWS_1251);
        assert_eq!(page.encoding_source(), EncodingSource::Header);
        assert_eq!(page.text(), "Привет, мир");
    }

    #[test]
    fn test_meta_charset_iso_8859_1() {
        let mut body = b"<html><head><meta charset=\"iso-8859-1\"></head><body>".to_vec();
        body.extend_from_slice(b"Caf\xe9 cr\xe8me br\xfbl\xe9e");
        body.extend_from_slice(b"</body></html>");

        let page = page(Some("text/html"), body);
        assert_eq!(page.encoding(), WINDOWS_1252);
        assert_eq!(page.encoding_source(), EncodingSource::Meta);
        assert!(page.text().contains("Café crème brûlée"));
    }

    #[test]
    fn test_meta_http_equiv() {
        let (encoded, _, _) = SHIFT_JIS.encode("日本語のページ");
        let mut body =
            b"<html><head><meta http-equiv=\"Content-Type\" content=\"text/html; charset=Shift_JIS\"></head><body>"
                .to_vec();
        body.extend_from_slice(&encoded);

        let page = page(None, body);
        assert_eq!(page.encoding(), SHIFT_JIS);
        assert!(page.text().contains("日本語のページ"));
    }

    #[test]
    fn test_wrong_header_charset_is_ignored() {
        // Declared UTF-8, but the bytes are Latin-1
        let body = b"<html><meta charset=\"iso-8859-1\"><p>na\xefve</p></html>".to_vec();
        let page = page(Some("text/html; charset=utf-8"), body);
        assert_eq!(page.encoding(), WINDOWS_1252);
        assert!(page.text().contains("naïve"));
    }

    #[test]
    fn test_plain_utf8_without_declaration() {
        let page = page(Some("text/html"), "<p>héllo wörld</p>".as_bytes().to_vec());
        assert!(page.text().contains("héllo wörld"));
    }

    #[test]
    fn test_unknown_label_falls_through() {
        let page = page(Some("text/html; charset=x-made-up"), b"<p>plain</p>".to_vec());
        assert_eq!(page.text(), "<p>plain</p>");
    }

    #[test]
    fn test_decode_body_replaces_invalid_utf8() {
        let text = decode_body(b"ok \xff\xfe end", UTF_8);
        assert!(text.starts_with("ok "));
        assert!(text.ends_with(" end"));
        assert!(text.contains('\u{FFFD}'));
    }

    #[test]
    fn test_is_html() {
        assert!(page(Some("text/html; charset=utf-8"), Vec::new()).is_html());
        assert!(page(None, Vec::new()).is_html());
        assert!(!page(Some("application/pdf"), Vec::new()).is_html());
    }

    #[test]
    fn test_content_disposition_filename() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_DISPOSITION,
            HeaderValue::from_static("attachment; filename=\"report 2024.pdf\""),
        );
        assert_eq!(
            content_disposition_filename(&headers),
            Some("report 2024.pdf".to_string())
        );
        assert_eq!(content_disposition_filename(&HeaderMap::new()), None);
    }
}
