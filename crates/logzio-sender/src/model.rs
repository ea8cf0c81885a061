//! Domain types shared by the sender and its filters.

use serde::{Deserialize, Serialize};

/// A saved real-time query.
///
/// An immutable value: fields are set at construction and only exposed through
/// read-only accessors. A changed query is a new instance. No validation is
/// performed, so empty strings, empty or absent sequences and any timestamps
/// (including `end_date < start_date`) are accepted as given.
///
/// `hostname` and `tag` distinguish an absent list (`None`) from an empty one
/// (`Some(vec![])`), and that distinction is kept when serialized: absent lists
/// become `null`, empty lists become `[]`.
///
/// # Examples
///
/// ```
/// use logzio_sender::model::RtQuery;
///
/// let query = RtQuery::new(
///     7,
///     "Errors last hour",
///     "level:ERROR",
///     Some(vec!["web-1".to_string(), "web-2".to_string()]),
///     Some(vec!["prod".to_string()]),
///     1_700_000_000_000,
///     1_700_003_600_000,
/// );
/// assert_eq!(query.id(), 7);
/// assert_eq!(query.tag(), Some(&["prod".to_string()][..]));
/// assert_ne!(query, RtQuery::empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RtQuery {
    id: i32,
    title: String,
    query: String,
    hostname: Option<Vec<String>>,
    tag: Option<Vec<String>>,
    start_date: i64,
    end_date: i64,
}

impl RtQuery {
    /// Creates a query from all seven fields.
    #[must_use]
    pub fn new(
        id: i32,
        title: impl Into<String>,
        query: impl Into<String>,
        hostname: Option<Vec<String>>,
        tag: Option<Vec<String>>,
        start_date: i64,
        end_date: i64,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            query: query.into(),
            hostname,
            tag,
            start_date,
            end_date,
        }
    }

    /// The zero-valued query: id 0, empty title and query, no hostname or tag
    /// lists and both dates at 0.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            id: 0,
            title: String::new(),
            query: String::new(),
            hostname: None,
            tag: None,
            start_date: 0,
            end_date: 0,
        }
    }

    /// Query identifier.
    #[must_use]
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Human readable title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// The query string.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Hostnames the query is restricted to, if any list was given.
    #[must_use]
    pub fn hostname(&self) -> Option<&[String]> {
        self.hostname.as_deref()
    }

    /// Tags the query is restricted to, if any list was given.
    #[must_use]
    pub fn tag(&self) -> Option<&[String]> {
        self.tag.as_deref()
    }

    /// Start of the time window (epoch milliseconds).
    #[must_use]
    pub fn start_date(&self) -> i64 {
        self.start_date
    }

    /// End of the time window (epoch milliseconds).
    #[must_use]
    pub fn end_date(&self) -> i64 {
        self.end_date
    }
}
