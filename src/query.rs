//! Query surface over committed snapshots.
//!
//! Reads only: nothing here mutates a [`RootSnapshot`]. Callers pass the
//! latest committed snapshot of each root, typically straight from a
//! [`SnapshotStore`](crate::store::SnapshotStore).
//!
//! ## Filter semantics
//!
//! | Filter | Matches when |
//! |---|---|
//! | `text` | case-insensitive substring of the record's JSON serialization |
//! | `models`, `loras`, `schedulers` | the entry carries any of the listed values (exact) |
//! | `steps`, `cfg_scale` | the value is present and inside the inclusive range |
//! | `modified` | the UTC calendar date of `last_modified` is inside the inclusive range |
//!
//! Empty filters match everything. Facets are OR within one facet and AND
//! across facets.

use crate::index::{IndexEntry, RootSnapshot};
use chrono::{DateTime, NaiveDate};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("invalid date {value:?} (expected YYYY-MM-DD): {source}")]
    InvalidDate {
        value: String,
        source: chrono::ParseError,
    },
    #[error("{field} range is empty: minimum is above maximum")]
    EmptyRange { field: &'static str },
}

/// Inclusive range with optional ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range<T> {
    pub min: Option<T>,
    pub max: Option<T>,
}

impl<T> Default for Range<T> {
    fn default() -> Self {
        Self { min: None, max: None }
    }
}

impl<T: PartialOrd + Copy> Range<T> {
    pub fn new(min: Option<T>, max: Option<T>) -> Self {
        Self { min, max }
    }

    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// An unbounded range accepts anything, including a missing value. A
    /// bounded one rejects a missing value.
    pub fn contains(&self, value: Option<T>) -> bool {
        if self.is_unbounded() {
            return true;
        }
        let Some(value) = value else {
            return false;
        };
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max)
    }

    fn is_empty(&self) -> bool {
        matches!((self.min, self.max), (Some(min), Some(max)) if min > max)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub text: String,
    pub models: Vec<String>,
    pub loras: Vec<String>,
    pub schedulers: Vec<String>,
    pub steps: Range<u32>,
    pub cfg_scale: Range<f64>,
    pub modified: Range<NaiveDate>,
}

impl Query {
    /// Reject ranges that can never match.
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.steps.is_empty() {
            return Err(QueryError::EmptyRange { field: "steps" });
        }
        if self.cfg_scale.is_empty() {
            return Err(QueryError::EmptyRange { field: "cfg scale" });
        }
        if self.modified.is_empty() {
            return Err(QueryError::EmptyRange { field: "date" });
        }
        Ok(())
    }

    pub fn matches(&self, entry: &IndexEntry) -> bool {
        any_of(&self.models, |m| entry.models.contains(m))
            && any_of(&self.loras, |l| entry.loras.contains(l))
            && any_of(&self.schedulers, |s| entry.scheduler == s)
            && self.steps.contains(entry.metadata.steps)
            && self.cfg_scale.contains(entry.metadata.cfg_scale)
            && self.modified.contains(modified_date(entry.last_modified))
            && self.matches_text(entry)
    }

    fn matches_text(&self, entry: &IndexEntry) -> bool {
        let needle = self.text.trim();
        if needle.is_empty() {
            return true;
        }
        match serde_json::to_string(&entry.metadata) {
            Ok(haystack) => haystack.to_lowercase().contains(&needle.to_lowercase()),
            Err(_) => false,
        }
    }
}

fn any_of(wanted: &[String], has: impl Fn(&str) -> bool) -> bool {
    wanted.is_empty() || wanted.iter().any(|w| has(w.as_str()))
}

/// UTC calendar date of a millisecond timestamp.
pub fn modified_date(last_modified: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(last_modified).map(|t| t.date_naive())
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(value: &str) -> Result<NaiveDate, QueryError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|source| QueryError::InvalidDate {
        value: value.to_string(),
        source,
    })
}

/// One matching entry and the root it belongs to.
#[derive(Debug, Clone, Copy)]
pub struct QueryHit<'a> {
    pub root: &'a RootSnapshot,
    pub entry: &'a IndexEntry,
}

/// All matching entries across `snapshots`, newest first. Ties are broken
/// by root path, then relative path.
pub fn search<'a>(snapshots: &[&'a RootSnapshot], query: &Query) -> Vec<QueryHit<'a>> {
    let mut hits: Vec<QueryHit<'a>> = snapshots
        .iter()
        .flat_map(|&root| {
            root.entries()
                .iter()
                .filter(|entry| query.matches(entry))
                .map(move |entry| QueryHit { root, entry })
        })
        .collect();
    hits.sort_by(|a, b| {
        b.entry
            .last_modified
            .cmp(&a.entry.last_modified)
            .then_with(|| a.root.root_path.cmp(&b.root.root_path))
            .then_with(|| a.entry.relative_path.cmp(&b.entry.relative_path))
    });
    hits
}

/// Value → entry count for every facet, merged across roots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Facets {
    pub models: BTreeMap<String, usize>,
    pub loras: BTreeMap<String, usize>,
    pub schedulers: BTreeMap<String, usize>,
    pub boards: BTreeMap<String, usize>,
}

impl Facets {
    pub fn aggregate(snapshots: &[&RootSnapshot]) -> Self {
        let mut facets = Facets::default();
        for entry in snapshots.iter().flat_map(|s| s.entries()) {
            for model in &entry.models {
                *facets.models.entry(model.clone()).or_default() += 1;
            }
            for lora in &entry.loras {
                *facets.loras.entry(lora.clone()).or_default() += 1;
            }
            if !entry.scheduler.is_empty() {
                *facets.schedulers.entry(entry.scheduler.clone()).or_default() += 1;
            }
            *facets.boards.entry(entry.metadata.board.clone()).or_default() += 1;
        }
        facets
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
            && self.loras.is_empty()
            && self.schedulers.is_empty()
            && self.boards.is_empty()
    }
}
