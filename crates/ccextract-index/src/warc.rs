//! Minimal WARC record reader: enough to pull the HTTP payload out of a
//! single `response` record fetched by byte range.

use std::fmt;
use std::io::{self, BufRead, Read};

const HTTP_CONTENT_TYPE: &str = "application/http";

#[derive(Debug)]
pub enum WarcError {
    Io(io::Error),
    /// Stream did not start with a `WARC/x.y` line
    MissingVersion(String),
    MalformedHeader(String),
    MissingContentLength,
    /// Block ended before Content-Length bytes
    Truncated { expected: u64, got: u64 },
    MalformedHttp(String),
}

impl fmt::Display for WarcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::MissingVersion(line) => write!(f, "not a WARC record, starts with {line:?}"),
            Self::MalformedHeader(line) => write!(f, "malformed WARC header line {line:?}"),
            Self::MissingContentLength => f.write_str("WARC record has no Content-Length"),
            Self::Truncated { expected, got } => {
                write!(f, "WARC block truncated: expected {expected} bytes, got {got}")
            }
            Self::MalformedHttp(msg) => write!(f, "malformed HTTP message: {msg}"),
        }
    }
}

impl std::error::Error for WarcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WarcError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Case-insensitive header list, order preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse `Name: value` lines; a line starting with whitespace continues the previous value.
    fn parse_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Self, String> {
        let mut headers: Vec<(String, String)> = Vec::new();
        for line in lines {
            if line.starts_with([' ', '\t']) {
                match headers.last_mut() {
                    Some((_, value)) => {
                        value.push(' ');
                        value.push_str(line.trim());
                    }
                    None => return Err(line.to_string()),
                }
                continue;
            }
            let Some((name, value)) = line.split_once(':') else {
                return Err(line.to_string());
            };
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
        Ok(Self(headers))
    }
}

/// One WARC record with its block fully read.
#[derive(Debug, Clone)]
pub struct WarcRecord {
    pub version: String,
    pub headers: Headers,
    pub block: Vec<u8>,
}

impl WarcRecord {
    /// Read the first record from `reader` (already decompressed).
    pub fn read_from(reader: &mut impl BufRead) -> Result<Self, WarcError> {
        let mut line = String::new();
        let version = loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Err(WarcError::MissingVersion(String::new()));
            }
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                continue;
            }
            if !trimmed.starts_with("WARC/") {
                return Err(WarcError::MissingVersion(trimmed.chars().take(40).collect()));
            }
            break trimmed.to_string();
        };

        let mut header_lines = Vec::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() {
                break;
            }
            header_lines.push(trimmed.to_string());
        }
        let headers = Headers::parse_lines(header_lines.iter().map(String::as_str))
            .map_err(WarcError::MalformedHeader)?;

        let expected: u64 = headers
            .get("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .ok_or(WarcError::MissingContentLength)?;
        let mut block = Vec::with_capacity(expected.min(16 * 1024 * 1024) as usize);
        let got = reader.take(expected).read_to_end(&mut block)? as u64;
        if got < expected {
            return Err(WarcError::Truncated { expected, got });
        }

        Ok(Self {
            version,
            headers,
            block,
        })
    }

    pub fn warc_type(&self) -> Option<&str> {
        self.headers.get("WARC-Type")
    }

    /// Media type of the block without parameters, lower-cased.
    pub fn content_type_base(&self) -> Option<String> {
        self.headers
            .get("Content-Type")
            .map(|ct| ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
    }

    /// A `response` record whose block is an HTTP message.
    pub fn is_http_response(&self) -> bool {
        self.warc_type()
            .is_some_and(|t| t.eq_ignore_ascii_case("response"))
            && self.content_type_base().as_deref() == Some(HTTP_CONTENT_TYPE)
    }

    pub fn payload_digest(&self) -> Option<&str> {
        self.headers.get("WARC-Payload-Digest")
    }

    pub fn target_uri(&self) -> Option<&str> {
        self.headers.get("WARC-Target-URI")
    }

    /// Split the block into status line, headers and body.
    pub fn http_response(&self) -> Result<HttpResponse, WarcError> {
        HttpResponse::parse(&self.block)
    }
}

/// HTTP response carried in a WARC `response` block.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Headers,
    /// Body with any chunked transfer coding removed; `None` when the
    /// message has no header terminator and so no body at all.
    pub body: Option<Vec<u8>>,
}

impl HttpResponse {
    pub fn parse(block: &[u8]) -> Result<Self, WarcError> {
        let (head, body) = match find_header_end(block) {
            Some((head_end, body_start)) => (&block[..head_end], Some(&block[body_start..])),
            None => (block, None),
        };
        let head = String::from_utf8_lossy(head);
        let mut lines = head.split('\n').map(|l| l.trim_end_matches('\r'));

        let status_line = lines.next().unwrap_or("");
        let status = parse_status_line(status_line)
            .ok_or_else(|| WarcError::MalformedHttp(format!("status line {status_line:?}")))?;
        let headers = Headers::parse_lines(lines.filter(|l| !l.is_empty()))
            .map_err(|l| WarcError::MalformedHttp(format!("header line {l:?}")))?;

        let chunked = headers
            .get("Transfer-Encoding")
            .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"));
        let body = body.map(|raw| {
            if chunked {
                match dechunk(raw) {
                    Some(decoded) => decoded,
                    None => {
                        log::debug!("chunked body did not decode, keeping raw bytes");
                        raw.to_vec()
                    }
                }
            } else {
                raw.to_vec()
            }
        });

        Ok(Self {
            status,
            headers,
            body,
        })
    }

    /// The payload if there is a non-empty one.
    pub fn payload(&self) -> Option<&[u8]> {
        self.body.as_deref().filter(|b| !b.is_empty())
    }
}

fn parse_status_line(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

/// (end of headers, start of body): first `\r\n\r\n` or `\n\n`.
fn find_header_end(block: &[u8]) -> Option<(usize, usize)> {
    for i in 0..block.len() {
        if block[i..].starts_with(b"\r\n\r\n") {
            return Some((i, i + 4));
        }
        if block[i..].starts_with(b"\n\n") {
            return Some((i, i + 2));
        }
    }
    None
}

/// Decode `Transfer-Encoding: chunked`. `None` on malformed framing.
fn dechunk(mut raw: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(raw.len());
    loop {
        let line_end = raw.iter().position(|&b| b == b'\n')?;
        let size_line = std::str::from_utf8(&raw[..line_end]).ok()?;
        let size_hex = size_line.trim().split(';').next()?.trim();
        let size = usize::from_str_radix(size_hex, 16).ok()?;
        raw = &raw[line_end + 1..];
        if size == 0 {
            return Some(out);
        }
        if raw.len() < size {
            return None;
        }
        out.extend_from_slice(&raw[..size]);
        raw = &raw[size..];
        // CRLF after the chunk data
        if raw.starts_with(b"\r\n") {
            raw = &raw[2..];
        } else if raw.starts_with(b"\n") {
            raw = &raw[1..];
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a WARC record around an HTTP message.
    pub(crate) fn warc_bytes(warc_type: &str, content_type: &str, http: &[u8]) -> Vec<u8> {
        let mut out = format!(
            "WARC/1.0\r\nWARC-Type: {warc_type}\r\nWARC-Target-URI: https://example.org/a.pdf\r\n\
             Content-Type: {content_type}\r\nContent-Length: {}\r\n\r\n",
            http.len()
        )
        .into_bytes();
        out.extend_from_slice(http);
        out.extend_from_slice(b"\r\n\r\n");
        out
    }

    fn read(bytes: &[u8]) -> Result<WarcRecord, WarcError> {
        WarcRecord::read_from(&mut io::BufReader::new(bytes))
    }

    const HTTP: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: application/pdf\r\nContent-Length: 8\r\n\r\n%PDF-1.4";

    #[test]
    fn reads_response_record() {
        let rec = read(&warc_bytes("response", "application/http; msgtype=response", HTTP)).unwrap();
        assert_eq!(rec.version, "WARC/1.0");
        assert_eq!(rec.warc_type(), Some("response"));
        assert_eq!(rec.target_uri(), Some("https://example.org/a.pdf"));
        assert!(rec.is_http_response());

        let http = rec.http_response().unwrap();
        assert_eq!(http.status, 200);
        assert_eq!(http.headers.get("content-type"), Some("application/pdf"));
        assert_eq!(http.payload(), Some(&b"%PDF-1.4"[..]));
    }

    #[test]
    fn request_and_metadata_are_not_responses() {
        let rec = read(&warc_bytes("request", "application/http; msgtype=request", HTTP)).unwrap();
        assert!(!rec.is_http_response());
        let rec = read(&warc_bytes("response", "application/warc-fields", b"a: b")).unwrap();
        assert!(!rec.is_http_response());
    }

    #[test]
    fn header_names_case_insensitive() {
        let rec = read(b"WARC/1.1\nwarc-type: response\ncontent-type: APPLICATION/HTTP\ncontent-length: 0\n\n")
            .unwrap();
        assert!(rec.is_http_response());
        assert!(rec.block.is_empty());
    }

    #[test]
    fn missing_version_rejected() {
        assert!(matches!(read(b"HTTP/1.1 200 OK\r\n\r\n"), Err(WarcError::MissingVersion(_))));
        assert!(matches!(read(b""), Err(WarcError::MissingVersion(_))));
    }

    #[test]
    fn missing_content_length_rejected() {
        assert!(matches!(
            read(b"WARC/1.0\r\nWARC-Type: response\r\n\r\nabc"),
            Err(WarcError::MissingContentLength)
        ));
    }

    #[test]
    fn short_block_rejected() {
        assert!(matches!(
            read(b"WARC/1.0\r\nContent-Length: 10\r\n\r\nabc"),
            Err(WarcError::Truncated { expected: 10, got: 3 })
        ));
    }

    #[test]
    fn empty_body_has_no_payload() {
        let http = HttpResponse::parse(b"HTTP/1.1 204 No Content\r\nServer: x\r\n\r\n").unwrap();
        assert_eq!(http.status, 204);
        assert_eq!(http.body.as_deref(), Some(&b""[..]));
        assert!(http.payload().is_none());

        let http = HttpResponse::parse(b"HTTP/1.1 200 OK\r\nServer: x").unwrap();
        assert!(http.body.is_none());
    }

    #[test]
    fn chunked_body_decoded() {
        let http = HttpResponse::parse(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5;ext=1\r\npedia\r\n0\r\n\r\n",
        )
        .unwrap();
        assert_eq!(http.payload(), Some(&b"Wikipedia"[..]));
    }

    #[test]
    fn broken_chunking_keeps_raw() {
        let http =
            HttpResponse::parse(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\nabc").unwrap();
        assert_eq!(http.payload(), Some(&b"zz\r\nabc"[..]));
    }

    #[test]
    fn bad_status_line_rejected() {
        assert!(HttpResponse::parse(b"GET / HTTP/1.1\r\n\r\n").is_err());
    }

    #[test]
    fn bare_newline_separator() {
        let http = HttpResponse::parse(b"HTTP/1.0 200 OK\nX-A: 1\n continued\n\nbody").unwrap();
        assert_eq!(http.headers.get("x-a"), Some("1 continued"));
        assert_eq!(http.payload(), Some(&b"body"[..]));
    }
}
