//! Synthetic labels for board ids that carry no name.
//!
//! InvokeAI often records only an opaque board id (a UUID or a number). The
//! registry hands out `"My Board N"` labels, one per distinct id in
//! first-seen order, and returns the same label for the same id for as long
//! as the registry lives. One registry is owned per indexing session; labels
//! are not stable across sessions.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Board used when a record names none.
pub const UNCATEGORIZED: &str = "Uncategorized";

#[derive(Debug, Default)]
pub struct BoardRegistry {
    labels: Mutex<HashMap<String, String>>,
}

impl BoardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Label for an opaque board id, assigning the next number on first use.
    pub fn label_for(&self, id: &str) -> String {
        let mut labels = self.labels.lock().unwrap_or_else(PoisonError::into_inner);
        let next = labels.len() + 1;
        labels
            .entry(id.trim().to_string())
            .or_insert_with(|| format!("My Board {next}"))
            .clone()
    }

    /// Number of ids labelled so far.
    pub fn len(&self) -> usize {
        self.labels.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
