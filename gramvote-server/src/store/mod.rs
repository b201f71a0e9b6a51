//! Persistent storage for the election engine.
//!
//! The engine keeps all state in SQLite. Every state-changing operation
//! runs as one transaction and re-checks its precondition as part of the
//! write (conditional `UPDATE`s whose affected-row count signals
//! success or a lost race), so concurrent callers and overlapping
//! scheduler ticks cannot observe partial writes.

mod sqlite;

pub use sqlite::{SqliteStore, StatusAdvance};

use std::fmt;

/// Error from the storage layer.
#[derive(Debug)]
pub enum StoreError {
    /// A storage operation failed.
    Storage {
        operation: &'static str,
        detail: String,
    },
    /// Persisted data could not be interpreted.
    Corruption(&'static str),
}

impl StoreError {
    pub fn storage(operation: &'static str, detail: impl Into<String>) -> Self {
        Self::Storage {
            operation,
            detail: detail.into(),
        }
    }

    pub fn corruption(what: &'static str) -> Self {
        Self::Corruption(what)
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage { operation, detail } => {
                write!(f, "storage operation '{}' failed: {}", operation, detail)
            }
            Self::Corruption(what) => write!(f, "corrupt {} in database", what),
        }
    }
}

impl std::error::Error for StoreError {}
