//! Redaction of webhook headers before they are logged.

use std::collections::BTreeMap;

pub const REDACTED: &str = "[REDACTED]";

/// Header names whose values never reach the logs.
pub const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "x-gitlab-token",
    "x-hub-signature",
    "x-hub-signature-256",
];

pub fn is_sensitive_header(name: &str) -> bool {
    SENSITIVE_HEADERS
        .iter()
        .any(|sensitive| sensitive.eq_ignore_ascii_case(name))
}

/// Collect `(name, value)` pairs for logging, masking sensitive values.
///
/// Names are lowercased and sorted so the log line is stable across
/// deliveries. A header sent more than once keeps its last value.
pub fn redact_headers<'a, I>(headers: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    headers
        .into_iter()
        .map(|(name, value)| {
            let value = if is_sensitive_header(name) {
                REDACTED
            } else {
                value
            };
            (name.to_ascii_lowercase(), value.to_string())
        })
        .collect()
}
