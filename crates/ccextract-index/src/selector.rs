//! Declarative record selection.
//!
//! A selector has three groups, each mapping a record field to a list of
//! clauses:
//!
//! - `must_not`: any matching clause rejects the record
//! - `must`: every clause must match, and the field must have a value
//! - `should`: when non-empty, at least one clause of one field must match
//!
//! ```json
//! {
//!   "must": { "status": [{ "match": "200" }] },
//!   "must_not": { "truncated": [{ "match": "length" }] },
//!   "should": {
//!     "mime_detected": [{ "match": "application/pdf" }],
//!     "url": [{ "extensions": "pdf,doc,docx", "sample": 0.1 }]
//!   }
//! }
//! ```

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::record::IndexRecord;

/// Record fields a clause can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordField {
    MimeDetected,
    Truncated,
    Mime,
    Status,
    Url,
    Host,
    Digest,
}

impl RecordField {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MimeDetected => "mime_detected",
            Self::Truncated => "truncated",
            Self::Mime => "mime",
            Self::Status => "status",
            Self::Url => "url",
            Self::Host => "host",
            Self::Digest => "digest",
        }
    }

    /// Value of this field on `record`, `None` when absent. `host` is always
    /// present (empty for a malformed URL).
    pub fn resolve<'a>(&self, record: &'a IndexRecord) -> Option<Cow<'a, str>> {
        match self {
            Self::MimeDetected => record.mime_detected.as_deref().map(Cow::Borrowed),
            Self::Truncated => record.truncated().map(Cow::Borrowed),
            Self::Mime => record.mime.as_deref().map(Cow::Borrowed),
            Self::Status => record.status.map(|s| Cow::Owned(s.to_string())),
            Self::Url => record.url.as_deref().map(Cow::Borrowed),
            Self::Host => Some(Cow::Owned(record.host())),
            Self::Digest => record.digest.as_deref().map(Cow::Borrowed),
        }
    }
}

impl fmt::Display for RecordField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Invalid clause configuration.
#[derive(Debug)]
pub enum SelectorError {
    InvalidRegex(regex::Error),
    SampleOutOfRange(f64),
    NoExtensions,
}

impl fmt::Display for SelectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRegex(e) => write!(f, "invalid pattern: {e}"),
            Self::SampleOutOfRange(p) => write!(f, "sample must be within [0, 1], got {p}"),
            Self::NoExtensions => f.write_str("extensions clause lists no extensions"),
        }
    }
}

impl std::error::Error for SelectorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidRegex(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    Exact { value: String, case_sensitive: bool },
    Regex(Regex),
    Extensions(BTreeSet<String>),
}

impl Matcher {
    fn matches(&self, value: &str) -> bool {
        match self {
            Self::Exact {
                value: expected,
                case_sensitive: true,
            } => expected == value,
            Self::Exact {
                value: expected,
                case_sensitive: false,
            } => fold_case(expected).eq(fold_case(value)),
            Self::Regex(re) => re.is_match(value),
            Self::Extensions(exts) => {
                extension_of(value).is_some_and(|ext| exts.contains(&ext.to_lowercase()))
            }
        }
    }
}

fn fold_case(s: &str) -> impl Iterator<Item = char> + '_ {
    s.chars().flat_map(char::to_lowercase)
}

/// Text after the last `.` of the last path segment.
fn extension_of(value: &str) -> Option<&str> {
    let name = value.rsplit(['/', '\\']).next().unwrap_or(value);
    let (_, ext) = name.rsplit_once('.')?;
    (!ext.trim().is_empty()).then_some(ext)
}

/// One test against a field value, optionally thinned by random sampling.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(try_from = "ClauseSpec", into = "ClauseSpec")]
pub struct Clause {
    matcher: Matcher,
    sample: Option<f64>,
}

impl Clause {
    /// Exact, case-sensitive match.
    pub fn exact(value: impl Into<String>) -> Self {
        Self {
            matcher: Matcher::Exact {
                value: value.into(),
                case_sensitive: true,
            },
            sample: None,
        }
    }

    pub fn exact_ignore_case(value: impl Into<String>) -> Self {
        Self {
            matcher: Matcher::Exact {
                value: value.into(),
                case_sensitive: false,
            },
            sample: None,
        }
    }

    /// Regex search anywhere in the value.
    pub fn regex(pattern: &str) -> Result<Self, SelectorError> {
        Ok(Self {
            matcher: Matcher::Regex(Regex::new(pattern).map_err(SelectorError::InvalidRegex)?),
            sample: None,
        })
    }

    /// Comma-separated file extensions, compared case-insensitively.
    pub fn extensions(list: &str) -> Result<Self, SelectorError> {
        let exts: BTreeSet<String> = list
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_lowercase)
            .collect();
        if exts.is_empty() {
            return Err(SelectorError::NoExtensions);
        }
        Ok(Self {
            matcher: Matcher::Extensions(exts),
            sample: None,
        })
    }

    pub fn with_sample(mut self, sample: f64) -> Result<Self, SelectorError> {
        if !(0.0..=1.0).contains(&sample) {
            return Err(SelectorError::SampleOutOfRange(sample));
        }
        self.sample = Some(sample);
        Ok(self)
    }

    pub fn select(&self, value: &str) -> bool {
        self.matcher.matches(value) && self.sample.map_or(true, |p| rand::random::<f64>() < p)
    }
}

/// Serialized shape of a clause; the variant is deduced from its keys.
#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
enum ClauseSpec {
    Match(MatchSpec),
    Regex(RegexSpec),
    Extensions(ExtensionsSpec),
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct MatchSpec {
    #[serde(rename = "match")]
    value: String,
    #[serde(default = "default_case_sensitive")]
    case_sensitive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sample: Option<f64>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct RegexSpec {
    pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sample: Option<f64>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct ExtensionsSpec {
    extensions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sample: Option<f64>,
}

fn default_case_sensitive() -> bool {
    true
}

impl TryFrom<ClauseSpec> for Clause {
    type Error = SelectorError;

    fn try_from(spec: ClauseSpec) -> Result<Self, Self::Error> {
        let (clause, sample) = match spec {
            ClauseSpec::Match(m) => {
                let clause = if m.case_sensitive {
                    Clause::exact(m.value)
                } else {
                    Clause::exact_ignore_case(m.value)
                };
                (clause, m.sample)
            }
            ClauseSpec::Regex(r) => (Clause::regex(&r.pattern)?, r.sample),
            ClauseSpec::Extensions(e) => (Clause::extensions(&e.extensions)?, e.sample),
        };
        match sample {
            Some(p) => clause.with_sample(p),
            None => Ok(clause),
        }
    }
}

impl From<Clause> for ClauseSpec {
    fn from(clause: Clause) -> Self {
        let sample = clause.sample;
        match clause.matcher {
            Matcher::Exact {
                value,
                case_sensitive,
            } => ClauseSpec::Match(MatchSpec {
                value,
                case_sensitive,
                sample,
            }),
            Matcher::Regex(re) => ClauseSpec::Regex(RegexSpec {
                pattern: re.as_str().to_string(),
                sample,
            }),
            Matcher::Extensions(exts) => ClauseSpec::Extensions(ExtensionsSpec {
                extensions: exts.into_iter().collect::<Vec<_>>().join(","),
                sample,
            }),
        }
    }
}

pub type ClauseGroup = BTreeMap<RecordField, Vec<Clause>>;

/// Boolean record filter. The default (all groups empty) accepts everything.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecordSelector {
    pub must: ClauseGroup,
    pub must_not: ClauseGroup,
    pub should: ClauseGroup,
}

impl RecordSelector {
    pub fn accept_all() -> Self {
        Self::default()
    }

    pub fn is_accept_all(&self) -> bool {
        self.must.is_empty() && self.must_not.is_empty() && self.should.is_empty()
    }

    pub fn select(&self, record: &IndexRecord) -> bool {
        for (field, clauses) in &self.must_not {
            let Some(value) = field.resolve(record) else {
                log::debug!("no value for '{field}' in must_not, skipping");
                continue;
            };
            if clauses.iter().any(|c| c.select(&value)) {
                return false;
            }
        }

        for (field, clauses) in &self.must {
            let Some(value) = field.resolve(record) else {
                log::debug!("no value for '{field}' in must, record not selected");
                return false;
            };
            if !clauses.iter().all(|c| c.select(&value)) {
                return false;
            }
        }

        if self.should.is_empty() {
            return true;
        }
        for (field, clauses) in &self.should {
            let Some(value) = field.resolve(record) else {
                log::debug!("no value for '{field}' in should, skipping");
                continue;
            };
            if clauses.iter().any(|c| c.select(&value)) {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::parse_line;

    fn record(json: &str) -> IndexRecord {
        parse_line(&format!("surt 20230201000000 {json}")).unwrap()
    }

    fn selector(json: &str) -> RecordSelector {
        serde_json::from_str(json).unwrap()
    }

    fn pdf() -> IndexRecord {
        record(
            r#"{"url": "https://example.org/a/Report.PDF", "mime": "application/pdf",
                "mime-detected": "application/pdf", "status": "200", "digest": "ABC"}"#,
        )
    }

    #[test]
    fn default_accepts_everything() {
        let sel = RecordSelector::accept_all();
        assert!(sel.is_accept_all());
        assert!(sel.select(&pdf()));
        assert!(sel.select(&IndexRecord::default()));
    }

    #[test]
    fn must_not_rejects() {
        let sel = selector(r#"{"must_not": {"mime_detected": [{"match": "application/pdf"}]}}"#);
        assert!(!sel.select(&pdf()));
        assert!(sel.select(&record(r#"{"mime-detected": "text/html"}"#)));
    }

    #[test]
    fn must_not_wins_over_should() {
        let sel = selector(
            r#"{"must_not": {"status": [{"match": "200"}]},
                "should": {"mime": [{"match": "application/pdf"}]}}"#,
        );
        assert!(!sel.select(&pdf()));
    }

    #[test]
    fn must_not_missing_value_is_skipped() {
        let sel = selector(r#"{"must_not": {"truncated": [{"pattern": "."}]}}"#);
        assert!(sel.select(&pdf()));
        assert!(!sel.select(&record(r#"{"truncated": "length"}"#)));
    }

    #[test]
    fn must_missing_value_rejects() {
        let sel = selector(r#"{"must": {"truncated": [{"pattern": ".*"}]}}"#);
        assert!(!sel.select(&pdf()));
    }

    #[test]
    fn must_requires_every_clause() {
        let sel = selector(
            r#"{"must": {"url": [{"pattern": "^https://"}, {"extensions": "pdf"}]}}"#,
        );
        assert!(sel.select(&pdf()));
        assert!(!sel.select(&record(r#"{"url": "http://example.org/a.pdf"}"#)));
        assert!(!sel.select(&record(r#"{"url": "https://example.org/a.html"}"#)));
    }

    #[test]
    fn should_any_field_any_clause() {
        let sel = selector(
            r#"{"should": {
                "mime_detected": [{"match": "application/msword"}],
                "url": [{"extensions": "doc,pdf"}]
            }}"#,
        );
        assert!(sel.select(&pdf()));
        assert!(!sel.select(&record(r#"{"url": "https://example.org/x.html"}"#)));
    }

    #[test]
    fn should_skips_missing_values() {
        let sel = selector(
            r#"{"should": {"digest": [{"match": "XYZ"}], "status": [{"match": "404"}]}}"#,
        );
        assert!(sel.select(&record(r#"{"status": 404}"#)));
        assert!(!sel.select(&record(r#"{"url": "http://x.org/"}"#)));
    }

    #[test]
    fn match_case_sensitivity() {
        let sel = selector(r#"{"must": {"mime": [{"match": "Application/PDF"}]}}"#);
        assert!(!sel.select(&pdf()));
        let sel = selector(
            r#"{"must": {"mime": [{"match": "Application/PDF", "case_sensitive": false}]}}"#,
        );
        assert!(sel.select(&pdf()));
    }

    #[test]
    fn regex_is_a_search() {
        let clause = Clause::regex("pdf").unwrap();
        assert!(clause.select("application/pdf; charset=binary"));
        assert!(!clause.select("text/html"));
    }

    #[test]
    fn host_field_matches() {
        let sel = selector(r#"{"must": {"host": [{"pattern": "(^|\\.)example\\.org$"}]}}"#);
        assert!(sel.select(&pdf()));
        // malformed url resolves to an empty host, which is a value
        let sel = selector(r#"{"must": {"host": [{"match": ""}]}}"#);
        assert!(sel.select(&record(r#"{"url": "not a url"}"#)));
    }

    #[test]
    fn extensions_case_insensitive() {
        let clause = Clause::extensions("PDF, doc ,").unwrap();
        assert!(clause.select("https://example.org/a/Report.PDF"));
        assert!(clause.select("file.Doc"));
        assert!(!clause.select("https://example.org/a.pdf/"));
        assert!(!clause.select("https://example.org/noext"));
        assert!(Clause::extensions(" , ").is_err());
    }

    #[test]
    fn sample_extremes() {
        let never = Clause::exact("x").with_sample(0.0).unwrap();
        let always = Clause::exact("x").with_sample(1.0).unwrap();
        for _ in 0..1000 {
            assert!(!never.select("x"));
            assert!(always.select("x"));
        }
        assert!(!always.select("y"));
    }

    #[test]
    fn sample_is_roughly_honored() {
        let clause = Clause::exact("x").with_sample(0.5).unwrap();
        let hits = (0..10_000).filter(|_| clause.select("x")).count();
        assert!((4_000..6_000).contains(&hits), "{hits}");
    }

    #[test]
    fn sample_out_of_range_rejected() {
        assert!(Clause::exact("x").with_sample(1.5).is_err());
        assert!(serde_json::from_str::<Clause>(r#"{"match": "x", "sample": -0.1}"#).is_err());
    }

    #[test]
    fn unknown_field_rejected_at_load() {
        let err = serde_json::from_str::<RecordSelector>(r#"{"must": {"colour": [{"match": "x"}]}}"#);
        assert!(err.is_err());
    }

    #[test]
    fn unknown_group_or_clause_rejected() {
        assert!(serde_json::from_str::<RecordSelector>(r#"{"mustnt": {}}"#).is_err());
        assert!(serde_json::from_str::<Clause>(r#"{"glob": "*.pdf"}"#).is_err());
    }

    #[test]
    fn invalid_regex_rejected() {
        assert!(serde_json::from_str::<Clause>(r#"{"pattern": "("}"#).is_err());
        assert!(matches!(Clause::regex("("), Err(SelectorError::InvalidRegex(_))));
    }

    #[test]
    fn serializes_back_to_clause_shapes() {
        let sel = selector(
            r#"{"should": {"url": [{"extensions": "pdf,doc", "sample": 0.25}, {"pattern": "a+"}],
                           "mime": [{"match": "x"}]}}"#,
        );
        let json = serde_json::to_value(&sel).unwrap();
        assert_eq!(json["should"]["url"][0]["extensions"], "doc,pdf");
        assert_eq!(json["should"]["url"][0]["sample"], 0.25);
        assert_eq!(json["should"]["url"][1]["pattern"], "a+");
        assert_eq!(json["should"]["mime"][0]["case_sensitive"], true);
    }
}
