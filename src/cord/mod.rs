//! Cords: lazily loaded, lock-guarded, dirty-tracked sequences of JSON
//! documents, each bound to one backing-store key.
//!
//! All cord variants share the [`Cord`] contract. Every operation, reads
//! included, runs under the cord's single mutex, so operations on one cord
//! are totally ordered. Unrelated cords never contend.
//!
//! Variants differ only in when mutations reach the store:
//!
//! - **[`VolatileCord`]**: mutations stay in memory until [`Cord::commit`]
//!   (or [`Cord::close`]).
//! - **[`DurableCord`]**: every mutation is written through before the
//!   mutating call returns.

pub mod stored;

pub use stored::{CommitStrategy, Deferred, DurableCord, StoredCord, VolatileCord, WriteThrough};

use serde_json::Value;

use crate::Document;
use crate::storage::{Result, StorePath};

/// Target value for conditional removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMatch<'a> {
    Text(&'a str),
    Integer(i64),
}

impl FieldMatch<'_> {
    /// Absent fields and fields of another type never match.
    pub fn matches(&self, value: Option<&Value>) -> bool {
        match (self, value) {
            (Self::Text(want), Some(Value::String(have))) => have == want,
            (Self::Integer(want), Some(v @ Value::Number(_))) => v.as_i64() == Some(*want),
            _ => false,
        }
    }
}

impl<'a> From<&'a str> for FieldMatch<'a> {
    fn from(value: &'a str) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FieldMatch<'_> {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for FieldMatch<'_> {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

/// Shared contract of all cord variants.
pub trait Cord: Send + Sync {
    /// Backing-store key of this cord.
    fn path(&self) -> &StorePath;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn get(&self, index: usize) -> Result<Option<Document>>;

    /// Copy of the whole sequence.
    fn snapshot(&self) -> Result<Vec<Document>>;

    fn append(&self, document: Document) -> Result<()>;

    fn append_all(&self, documents: Vec<Document>) -> Result<()>;

    fn prepend(&self, document: Document) -> Result<()>;

    /// Insert before position `index`; `index == len` appends.
    fn insert(&self, document: Document, index: usize) -> Result<()>;

    /// Remove the element at `index`, `None` when out of range.
    fn remove(&self, index: usize) -> Result<Option<Document>>;

    fn remove_first(&self) -> Result<Option<Document>>;

    fn remove_last(&self) -> Result<Option<Document>>;

    /// Remove every element whose `key` matches, returning them in scan order.
    fn remove_all_where(&self, key: &str, value: FieldMatch<'_>) -> Result<Vec<Document>>;

    /// Remove the first element whose `key` matches.
    fn remove_one_where(&self, key: &str, value: FieldMatch<'_>) -> Result<Option<Document>>;

    /// Persist the sequence if it changed since the last commit.
    ///
    /// Returns whether a write happened.
    fn commit(&self) -> Result<bool>;

    /// Commit, then drop the in-memory sequence; the next access reloads.
    fn close(&self) -> Result<()>;

    fn is_dirty(&self) -> bool;

    fn is_loaded(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_match_requires_string_field() {
        let m = FieldMatch::from("a");
        assert!(m.matches(Some(&json!("a"))));
        assert!(!m.matches(Some(&json!("b"))));
        assert!(!m.matches(Some(&json!(1))));
        assert!(!m.matches(None));
    }

    #[test]
    fn integer_match_accepts_narrow_and_wide_values() {
        assert!(FieldMatch::from(7_i32).matches(Some(&json!(7))));
        assert!(FieldMatch::from(5_000_000_000_i64).matches(Some(&json!(5_000_000_000_i64))));
        assert!(!FieldMatch::from(7_i64).matches(Some(&json!(7.5))));
        assert!(!FieldMatch::from(7_i64).matches(Some(&json!("7"))));
    }
}
