//! CDX index records: `<surt> <timestamp> <json>` lines.
//!
//! The archive writes numeric fields as JSON strings and some lines carry
//! trailing garbage after the JSON object, so parsing is lenient: numbers
//! may be strings, and a line that does not parse is retried truncated at
//! each `}` from the right.

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};

/// One parsed CDX line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct IndexRecord {
    /// SURT-form key preceding the timestamp on the line
    #[serde(skip)]
    pub surt_key: String,
    /// 14-digit capture timestamp
    #[serde(skip)]
    pub timestamp: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_detected: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub length: Option<u64>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub languages: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    truncated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    redirect: Option<String>,
}

/// Why a line produced no record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// Fewer than two spaces: no JSON part at all
    MissingJson,
    /// No prefix ending at a `}` deserialized
    Unrepairable,
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingJson => f.write_str("no JSON after surt key and timestamp"),
            Self::Unrepairable => f.write_str("JSON could not be parsed or repaired"),
        }
    }
}

impl std::error::Error for RecordError {}

/// Parse a CDX line, repairing trailing garbage after the JSON object.
pub fn parse_line(line: &str) -> Result<IndexRecord, RecordError> {
    let mut parts = line.splitn(3, ' ');
    let (Some(surt_key), Some(timestamp), Some(json)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(RecordError::MissingJson);
    };

    let mut record = match serde_json::from_str::<IndexRecord>(json) {
        Ok(record) => record,
        Err(e) => {
            log::debug!("record JSON failed ({e}), trying repair");
            repair(json).ok_or(RecordError::Unrepairable)?
        }
    };
    record.surt_key = surt_key.to_string();
    record.timestamp = timestamp.to_string();
    Ok(record)
}

/// Try every prefix that ends at a `}`, longest first.
fn repair(json: &str) -> Option<IndexRecord> {
    json.char_indices()
        .rev()
        .filter(|(_, c)| *c == '}')
        .find_map(|(i, _)| serde_json::from_str(&json[..=i]).ok())
}

impl IndexRecord {
    /// Parse a line; failures are logged and swallowed.
    pub fn parse(line: &str) -> Option<Self> {
        match parse_line(line) {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("bad record ({e}): {line}");
                None
            }
        }
    }

    pub fn truncated(&self) -> Option<&str> {
        self.truncated.as_deref()
    }

    /// Absent or empty means the capture was complete.
    pub fn is_truncated(&self) -> bool {
        self.truncated.as_deref().is_some_and(|t| !t.is_empty())
    }

    pub fn set_truncated(&mut self, reason: Option<String>) {
        self.truncated = reason;
    }

    pub fn redirect(&self) -> Option<&str> {
        self.redirect.as_deref()
    }

    pub fn set_redirect(&mut self, redirect: Option<String>) {
        self.redirect = redirect;
    }

    /// Host of `url`; empty when the URL is missing or malformed.
    pub fn host(&self) -> String {
        self.url
            .as_deref()
            .and_then(|u| reqwest::Url::parse(u).ok())
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default()
    }

    pub fn tld(&self) -> String {
        tld_of(self.url.as_deref())
    }

    pub fn normalized_mime(&self) -> Option<String> {
        self.mime.as_deref().map(normalize_mime)
    }

    pub fn normalized_mime_detected(&self) -> Option<String> {
        self.mime_detected.as_deref().map(normalize_mime)
    }

    /// Inclusive byte range of the WARC record in its container file.
    pub fn byte_range(&self) -> Option<(u64, u64)> {
        match (self.offset, self.length) {
            (Some(offset), Some(length)) if length > 0 => {
                offset.checked_add(length - 1).map(|end| (offset, end))
            }
            _ => None,
        }
    }

    /// HTTP `Range` header value for the WARC record.
    pub fn offset_header(&self) -> Option<String> {
        self.byte_range()
            .map(|(start, end)| format!("bytes={start}-{end}"))
    }

    pub fn capture_time(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.timestamp, "%Y%m%d%H%M%S").ok()
    }
}

/// Lower-case, drop surrounding double quotes, collapse whitespace.
///
/// Quote stripping and trimming repeat until nothing changes, so the
/// result is a fixpoint: normalizing twice gives the same string.
pub fn normalize_mime(mime: &str) -> String {
    let lower = mime.to_lowercase();
    let collapsed = lower.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_matches(|c: char| c == '"' || c.is_whitespace())
        .to_string()
}

/// Last dot-separated label of the URL's host.
///
/// Empty when there is no URL, no host, no dot, a trailing dot, or when the
/// label is all digits (an IPv4 address).
pub fn tld_of(url: Option<&str>) -> String {
    let Some(url) = url else {
        return String::new();
    };
    let Ok(parsed) = reqwest::Url::parse(url) else {
        return String::new();
    };
    let Some(host) = parsed.host_str() else {
        return String::new();
    };
    match host.rfind('.') {
        Some(i) if i + 1 < host.len() => {
            let tld = &host[i + 1..];
            if tld.bytes().all(|b| b.is_ascii_digit()) {
                String::new()
            } else {
                tld.to_string()
            }
        }
        _ => String::new(),
    }
}

/// Accept `123`, `"123"`, `""` or `null` for numeric fields.
fn lenient_number<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: std::str::FromStr + TryFrom<u64>,
    T::Err: fmt::Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => T::try_from(n)
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("number out of range: {n}"))),
        Some(Raw::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Text(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
    }
}
