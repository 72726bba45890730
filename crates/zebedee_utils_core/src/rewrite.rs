//! Literal substring search and replace over raw page bytes.
//!
//! Page files are rewritten textually rather than through a JSON model so
//! that URIs nested in breadcrumbs, arrays or markdown bodies are all caught.
//! Matching is not boundary-aware: `/a/b` also matches inside `/a/bc`.

use serde::Serialize;

use crate::uri::TaxonomyUri;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UriRewrite {
    pub from: String,
    pub to: String,
}

impl UriRewrite {
    pub fn new(from: &TaxonomyUri, to: &TaxonomyUri) -> Self {
        Self {
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
        }
    }

    pub fn literal(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Returns `None` when nothing needed changing.
    pub fn apply(&self, haystack: &[u8]) -> Option<Vec<u8>> {
        replace_literal(haystack, self.from.as_bytes(), self.to.as_bytes())
    }

    pub fn inverse(&self) -> Self {
        Self {
            from: self.to.clone(),
            to: self.from.clone(),
        }
    }
}

pub fn contains_literal(haystack: &[u8], needle: &[u8]) -> bool {
    find_literal(haystack, needle, 0).is_some()
}

pub fn count_literal(haystack: &[u8], needle: &[u8]) -> usize {
    let mut count = 0;
    let mut cursor = 0;
    while let Some(index) = find_literal(haystack, needle, cursor) {
        count += 1;
        cursor = index + needle.len();
    }
    count
}

/// Replace every non-overlapping occurrence, scanning left to right.
pub fn replace_literal(haystack: &[u8], needle: &[u8], replacement: &[u8]) -> Option<Vec<u8>> {
    let first = find_literal(haystack, needle, 0)?;

    let mut out = Vec::with_capacity(haystack.len());
    let mut cursor = 0;
    let mut next = Some(first);
    while let Some(index) = next {
        out.extend_from_slice(&haystack[cursor..index]);
        out.extend_from_slice(replacement);
        cursor = index + needle.len();
        next = find_literal(haystack, needle, cursor);
    }
    out.extend_from_slice(&haystack[cursor..]);
    Some(out)
}

fn find_literal(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() || haystack.len() - from < needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|offset| from + offset)
}
