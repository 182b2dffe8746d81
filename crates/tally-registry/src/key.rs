//! Query key normalization.
//!
//! A key is a base name plus a mode partition plus optional positional
//! parameters. Two semantically equivalent requests must normalize to the
//! same key, so parameters are canonicalized at construction: search
//! strings are trimmed and lowercased, month keys are zero-padded.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::names::QueryName;

/// Which data-access backend a session runs against.
///
/// Keys are partitioned by mode so demo data never collides with live data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Remote provider over HTTP.
    Live,
    /// Local offline backend.
    Demo,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Live => "live",
            SessionMode::Demo => "demo",
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A budget month, canonicalized to `YYYY-MM`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonthKey(String);

impl MonthKey {
    /// Build a month key from year and 1-based month, zero-padded.
    pub fn new(year: i32, month: u32) -> Self {
        Self(format!("{year:04}-{month:02}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Positional key parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyParam {
    /// Month partition (month notes, rollover status).
    Month(MonthKey),
    /// Canonicalized search string.
    Search(String),
    /// Pagination cursor.
    Cursor(String),
}

/// Normalized cache key for one query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    name: QueryName,
    mode: SessionMode,
    param: Option<KeyParam>,
}

impl QueryKey {
    /// Key for an unparameterized query.
    pub fn new(name: QueryName, mode: SessionMode) -> Self {
        Self {
            name,
            mode,
            param: None,
        }
    }

    /// Key partitioned by month.
    pub fn for_month(name: QueryName, mode: SessionMode, month: MonthKey) -> Self {
        Self {
            name,
            mode,
            param: Some(KeyParam::Month(month)),
        }
    }

    /// Key for a search query. The term is trimmed and lowercased so
    /// equivalent searches share a cache entry.
    pub fn for_search(name: QueryName, mode: SessionMode, term: &str) -> Self {
        Self {
            name,
            mode,
            param: Some(KeyParam::Search(term.trim().to_lowercase())),
        }
    }

    /// Key for one page of a cursor-paginated query.
    pub fn for_cursor(name: QueryName, mode: SessionMode, cursor: &str) -> Self {
        Self {
            name,
            mode,
            param: Some(KeyParam::Cursor(cursor.to_string())),
        }
    }

    pub fn name(&self) -> QueryName {
        self.name
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn param(&self) -> Option<&KeyParam> {
        self.param.as_ref()
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.mode, self.name)?;
        match &self.param {
            Some(KeyParam::Month(m)) => write!(f, ":{m}"),
            Some(KeyParam::Search(s)) => write!(f, ":search={s}"),
            Some(KeyParam::Cursor(c)) => write!(f, ":cursor={c}"),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equivalent_requests_normalize_to_identical_keys() {
        let a = QueryKey::for_search(QueryName::SearchResults, SessionMode::Live, "  Rent ");
        let b = QueryKey::for_search(QueryName::SearchResults, SessionMode::Live, "rent");
        assert_eq!(a, b);
    }

    #[test]
    fn any_parameter_difference_yields_distinct_keys() {
        let base = QueryKey::new(QueryName::Dashboard, SessionMode::Live);
        let demo = QueryKey::new(QueryName::Dashboard, SessionMode::Demo);
        assert_ne!(base, demo);

        let jan = QueryKey::for_month(
            QueryName::MonthNotes,
            SessionMode::Live,
            MonthKey::new(2026, 1),
        );
        let feb = QueryKey::for_month(
            QueryName::MonthNotes,
            SessionMode::Live,
            MonthKey::new(2026, 2),
        );
        assert_ne!(jan, feb);
    }

    #[test]
    fn month_keys_are_zero_padded() {
        assert_eq!(MonthKey::new(2026, 3).as_str(), "2026-03");
    }

    #[test]
    fn display_is_stable() {
        let key = QueryKey::for_month(
            QueryName::MonthNotes,
            SessionMode::Demo,
            MonthKey::new(2026, 8),
        );
        assert_eq!(key.to_string(), "demo:monthNotes:2026-08");
    }
}
