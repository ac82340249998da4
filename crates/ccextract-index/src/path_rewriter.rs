//! Fan extracted files out into nested directories keyed by digest prefix.
//!
//! The template only matters for where its `/` separators fall: `"xx/xx"`
//! turns `abcdefgh` into `ab/abcdefgh`, `"xx/xx/xx"` into `ab/cd/abcdefgh`.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    LeadingSlash(String),
    TrailingSlash(String),
    /// Digest shorter than the deepest directory level
    DigestTooShort { digest: String, needed: usize },
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LeadingSlash(t) => write!(f, "target path pattern cannot start with '/': {t:?}"),
            Self::TrailingSlash(t) => write!(f, "target path pattern cannot end with '/': {t:?}"),
            Self::DigestTooShort { digest, needed } => write!(
                f,
                "digest {digest:?} too short for target path pattern (needs {needed} characters)"
            ),
        }
    }
}

impl std::error::Error for TemplateError {}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetPathRewriter {
    /// Position of each separator, counted in non-separator characters
    offsets: Vec<usize>,
}

impl TargetPathRewriter {
    pub fn new(template: &str) -> Result<Self, TemplateError> {
        if template.starts_with('/') {
            return Err(TemplateError::LeadingSlash(template.to_string()));
        }
        if template.ends_with('/') {
            return Err(TemplateError::TrailingSlash(template.to_string()));
        }
        let mut offsets = Vec::new();
        let mut chars = 0;
        for c in template.chars() {
            if c == '/' {
                offsets.push(chars);
            } else {
                chars += 1;
            }
        }
        Ok(Self { offsets })
    }

    /// Number of directory levels the template adds.
    pub fn depth(&self) -> usize {
        self.offsets.len()
    }

    pub fn rewrite(&self, digest: &str) -> Result<String, TemplateError> {
        if self.offsets.is_empty() {
            return Ok(digest.to_string());
        }
        let mut out = String::with_capacity(digest.len() + 2 * self.offsets.len() + 1);
        let mut start = 0;
        for &end in &self.offsets {
            let Some(part) = digest.get(start..end) else {
                return Err(TemplateError::DigestTooShort {
                    digest: digest.to_string(),
                    needed: end,
                });
            };
            out.push_str(part);
            out.push('/');
            start = end;
        }
        out.push_str(digest);
        Ok(out)
    }
}
