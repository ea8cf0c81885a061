//! Real-time query filters.
//!
//! A [`Filter`] decides whether a parsed JSON log should be shipped.
//! [`RtQueryFilter`] evaluates a saved [`RtQuery`] against a log:
//!
//! - `hostname`: the log's `hostname` must be one of the listed hosts.
//! - `tag`: the log's `tags` (a string or an array of strings) must share at
//!   least one entry with the listed tags.
//! - `query`: whitespace-separated terms, all of which must match. A
//!   `field:value` term compares the field case-insensitively, `field:*`
//!   only requires the field to exist, and a bare word must appear in the
//!   log's `message`.
//! - `startDate` / `endDate`: a non-zero bound restricts the log's
//!   `@timestamp` (RFC 3339 or epoch milliseconds, integer or float).
//!
//! Absent or empty lists and zero dates impose no constraint.
//!
//! # Examples
//!
//! ```
//! use logzio_sender::filter::{Filter, RtQueryFilter};
//! use logzio_sender::model::RtQuery;
//! use serde_json::json;
//!
//! let query = RtQuery::new(1, "prod errors", "level:error", None, Some(vec!["prod".into()]), 0, 0);
//! let filter = RtQueryFilter::new(query);
//!
//! assert!(filter.matches(&json!({"level": "ERROR", "tags": ["prod"], "message": "boom"})));
//! assert!(!filter.matches(&json!({"level": "INFO", "tags": ["prod"]})));
//! ```

use crate::model::RtQuery;
use chrono::DateTime;
use serde_json::Value;

/// Field holding the log's host.
pub const HOSTNAME_FIELD: &str = "hostname";

/// Field holding the log's tags.
pub const TAGS_FIELD: &str = "tags";

/// Field searched by bare query words.
pub const MESSAGE_FIELD: &str = "message";

/// Field holding the log's timestamp.
pub const TIMESTAMP_FIELD: &str = "@timestamp";

/// Decides whether a log should be kept.
pub trait Filter: Send + Sync {
    /// Returns `true` when `log` passes this filter.
    fn matches(&self, log: &Value) -> bool;
}

/// One parsed term of a query string.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    /// `field:value`, value lowercased.
    Equals { field: String, value: String },
    /// `field:*`
    Exists { field: String },
    /// A bare word, lowercased.
    Text(String),
}

impl Term {
    fn parse(raw: &str) -> Self {
        match raw.split_once(':') {
            Some((field, "*")) if !field.is_empty() => Self::Exists {
                field: field.to_string(),
            },
            Some((field, value)) if !field.is_empty() && !value.is_empty() => Self::Equals {
                field: field.to_string(),
                value: value.to_lowercase(),
            },
            _ => Self::Text(raw.to_lowercase()),
        }
    }

    fn matches(&self, log: &Value) -> bool {
        match self {
            Self::Equals { field, value } => {
                lookup(log, field).is_some_and(|found| value_equals(found, value))
            }
            Self::Exists { field } => lookup(log, field).is_some_and(|found| !found.is_null()),
            Self::Text(word) => log
                .get(MESSAGE_FIELD)
                .and_then(Value::as_str)
                .is_some_and(|message| message.to_lowercase().contains(word.as_str())),
        }
    }
}

/// A [`Filter`] built from a saved [`RtQuery`].
#[derive(Debug, Clone)]
pub struct RtQueryFilter {
    query: RtQuery,
    terms: Vec<Term>,
}

impl RtQueryFilter {
    /// Parses the query string once and keeps the query for evaluation.
    #[must_use]
    pub fn new(query: RtQuery) -> Self {
        let terms = query.query().split_whitespace().map(Term::parse).collect();
        Self { query, terms }
    }

    /// The query this filter evaluates.
    #[must_use]
    pub fn query(&self) -> &RtQuery {
        &self.query
    }

    fn hostname_matches(&self, log: &Value) -> bool {
        match self.query.hostname() {
            None | Some([]) => true,
            Some(hosts) => log
                .get(HOSTNAME_FIELD)
                .and_then(Value::as_str)
                .is_some_and(|host| hosts.iter().any(|h| h == host)),
        }
    }

    fn tag_matches(&self, log: &Value) -> bool {
        match self.query.tag() {
            None | Some([]) => true,
            Some(wanted) => match log.get(TAGS_FIELD) {
                Some(Value::String(tag)) => wanted.iter().any(|w| w == tag),
                Some(Value::Array(tags)) => tags
                    .iter()
                    .filter_map(Value::as_str)
                    .any(|tag| wanted.iter().any(|w| w == tag)),
                _ => false,
            },
        }
    }

    fn window_matches(&self, log: &Value) -> bool {
        let (start, end) = (self.query.start_date(), self.query.end_date());
        if start == 0 && end == 0 {
            return true;
        }
        let Some(ts) = log.get(TIMESTAMP_FIELD).and_then(timestamp_millis) else {
            return false;
        };
        (start == 0 || ts >= start) && (end == 0 || ts <= end)
    }
}

impl Filter for RtQueryFilter {
    fn matches(&self, log: &Value) -> bool {
        if !log.is_object() {
            return false;
        }
        self.hostname_matches(log)
            && self.tag_matches(log)
            && self.window_matches(log)
            && self.terms.iter().all(|term| term.matches(log))
    }
}

/// Finds `field` at the top level, falling back to a dotted path through
/// nested objects.
fn lookup<'a>(log: &'a Value, field: &str) -> Option<&'a Value> {
    if let Some(found) = log.get(field) {
        return Some(found);
    }
    field
        .split('.')
        .try_fold(log, |current, segment| current.get(segment))
}

fn value_equals(found: &Value, expected: &str) -> bool {
    match found {
        Value::String(s) => s.to_lowercase() == expected,
        Value::Number(n) => n.to_string() == expected,
        Value::Bool(b) => b.to_string() == expected,
        Value::Array(items) => items.iter().any(|item| value_equals(item, expected)),
        Value::Null | Value::Object(_) => false,
    }
}

fn timestamp_millis(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis()),
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(float_millis)),
        _ => None,
    }
}

/// Epoch milliseconds written as a float, truncated toward zero.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn float_millis(millis: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, which is already out of range.
    let in_range = millis.is_finite() && millis >= i64::MIN as f64 && millis < i64::MAX as f64;
    in_range.then(|| millis.trunc() as i64)
}
