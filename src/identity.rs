//! Stable question identifiers, output filenames and content hashes.

use std::fmt;

/// Extension appended to every generated illustration.
pub const OUTPUT_EXTENSION: &str = "png";

/// Identifier derived from a question's (age, domain, item number) triple.
///
/// Two rows with the same triple always produce the same id; re-runs rely on
/// that collision to find their previous output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuestionId(String);

impl QuestionId {
    /// Builds the id `sanitize(age)_sanitize(domain)_number`.
    pub fn new(age: &str, domain: &str, number: &str) -> Self {
        Self(format!(
            "{}_{}_{}",
            sanitize(age),
            sanitize(domain),
            number.trim()
        ))
    }

    /// Returns the raw id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filename of the illustration for this id.
    pub fn output_filename(&self) -> String {
        output_filename(&self.0)
    }
}

impl fmt::Display for QuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for QuestionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Convenience wrapper around [`QuestionId::new`] returning the plain string.
pub fn question_id(age: &str, domain: &str, number: &str) -> String {
    QuestionId::new(age, domain, number).0
}

/// `id + ".png"`.
pub fn output_filename(id: &str) -> String {
    format!("{id}.{OUTPUT_EXTENSION}")
}

/// Trims, lowercases and collapses whitespace runs into single hyphens.
pub fn sanitize(field: &str) -> String {
    field
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

/// Hex MD5 digest of the question text, used only for byte-identical dedup.
pub fn content_hash(text: &str) -> String {
    format!("{:x}", md5::compute(text.as_bytes()))
}

/// Hex MD5 digest of raw bytes (the CSV source for staleness checks).
pub fn bytes_hash(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}
