//! Query shapes accepted from callers and handed to storage backends.

use serde::{Deserialize, Serialize};

/// Default number of events returned by a search when `size` is unset.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Upper bound on `size` for a single search.
pub const MAX_PAGE_SIZE: u32 = 1_000;

/// A search over stored events.
///
/// Time bounds are in seconds. Every list field filters with "any of"
/// semantics; an empty list does not filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Query {
    pub topic_name: Vec<String>,
    pub dc: Vec<String>,
    pub host: Vec<String>,
    pub target_host: Vec<String>,
    pub tag_set: Vec<String>,
    pub user: Vec<String>,
    pub parent_event_id: Vec<String>,
    pub start_event_time: i64,
    pub end_event_time: i64,
    pub start_received_time: i64,
    pub end_received_time: i64,
    /// Offset into the result set.
    pub from: u32,
    /// Page size; zero means [`DEFAULT_PAGE_SIZE`].
    pub size: u32,
}

impl Query {
    /// The effective page size, defaulted and clamped.
    pub fn page_size(&self) -> u32 {
        match self.size {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        }
    }
}

/// A time-window scan that only yields event ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeQuery {
    pub start_event_time: i64,
    pub end_event_time: i64,
    pub limit: u32,
    pub ascending: bool,
}

/// A resolved id filter for one dimension (topic or dc).
///
/// `Any` means the caller asked for no filter on this dimension.
/// `OneOf` with an empty list means every requested name failed to resolve
/// and must match nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdFilter {
    Any,
    OneOf(Vec<String>),
}

impl IdFilter {
    /// Returns true when the filter cannot match any row.
    pub fn matches_nothing(&self) -> bool {
        matches!(self, IdFilter::OneOf(ids) if ids.is_empty())
    }

    /// Checks a single id against the filter.
    pub fn accepts(&self, id: &str) -> bool {
        match self {
            IdFilter::Any => true,
            IdFilter::OneOf(ids) => ids.iter().any(|candidate| candidate == id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_defaults_and_clamps() {
        let mut q = Query::default();
        assert_eq!(q.page_size(), DEFAULT_PAGE_SIZE);
        q.size = 5;
        assert_eq!(q.page_size(), 5);
        q.size = 50_000;
        assert_eq!(q.page_size(), MAX_PAGE_SIZE);
    }

    #[test]
    fn empty_one_of_matches_nothing() {
        let none = IdFilter::OneOf(Vec::new());
        assert!(none.matches_nothing());
        assert!(!none.accepts("abc"));

        assert!(!IdFilter::Any.matches_nothing());
        assert!(IdFilter::Any.accepts("abc"));
    }
}
