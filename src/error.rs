//! Typed failures for the row and period layers.
//!
//! Orchestration code works in `anyhow::Result` and attaches context; the
//! types here exist where callers need to tell failure classes apart. A
//! malformed row is counted and skipped, a bad period token aborts
//! sequencing, and store failures stay `rusqlite::Error`.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RowError {
    #[error("expected {expected} column(s) but found {found}")]
    ColumnCount { expected: usize, found: usize },
    #[error("key column '{0}' is blank")]
    BlankKey(&'static str),
    #[error("column '{field}' holds an invalid number '{value}'")]
    InvalidNumber { field: &'static str, value: String },
    #[error("unknown column '{0}'")]
    UnknownField(String),
    #[error("unreadable record: {0}")]
    Unreadable(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid period token '{0}' (expected YYYY-MM)")]
pub struct PeriodError(pub String);
