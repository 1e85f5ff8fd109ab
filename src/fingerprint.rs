//! Deterministic request fingerprinting.
//!
//! Two requests that differ only in query whitespace or letter case are
//! the same piece of work; the fingerprint is the identity the registry
//! and cache key on.

use sha2::{Digest, Sha256};

use crate::types::ReportRequest;

/// Field separator inside the hash input. A control character cannot
/// appear in a normalized query, so concatenation is unambiguous.
const FIELD_SEPARATOR: char = '\u{1f}';

/// Computes the fingerprint for a request.
///
/// The query is normalized (Unicode whitespace runs collapsed to single
/// spaces, ends trimmed, lowercased); report type and tone contribute
/// their canonical snake_case names. The three fields are joined with a
/// unit separator and hashed with SHA-256; the result is lowercase hex.
///
/// The same request always produces the same fingerprint, across calls
/// and across process restarts.
///
/// # Examples
///
/// ```
/// use research_tasks::{fingerprint, ReportRequest, ReportType, Tone};
///
/// let a = ReportRequest::new("Rust async runtimes", ReportType::ResearchReport, Tone::Objective);
/// let b = ReportRequest::new("  rust   ASYNC runtimes ", ReportType::ResearchReport, Tone::Objective);
/// assert_eq!(fingerprint(&a), fingerprint(&b));
///
/// let c = ReportRequest::new("Rust async runtimes", ReportType::DetailedReport, Tone::Objective);
/// assert_ne!(fingerprint(&a), fingerprint(&c));
/// ```
pub fn fingerprint(request: &ReportRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_query(&request.query).as_bytes());
    hasher.update(FIELD_SEPARATOR.to_string().as_bytes());
    hasher.update(request.report_type.as_str().as_bytes());
    hasher.update(FIELD_SEPARATOR.to_string().as_bytes());
    hasher.update(request.tone.as_str().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Normalizes a query for fingerprinting: collapses Unicode whitespace
/// runs to single spaces, trims both ends, and lowercases.
fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
