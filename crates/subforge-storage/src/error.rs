//! Storage error types.

use subforge_core::StoreError;
use thiserror::Error;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from rusqlite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (e.g., creating directories).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// The write would break a uniqueness or reservation rule.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(String),
}

impl StorageError {
    /// Whether the error is a UNIQUE or foreign-key violation.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            StorageError::Database(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

impl From<StorageError> for StoreError {
    fn from(err: StorageError) -> Self {
        if err.is_constraint_violation() {
            return StoreError::Conflict(err.to_string());
        }
        match err {
            StorageError::NotFound(what) => StoreError::NotFound(what),
            StorageError::Conflict(what) => StoreError::Conflict(what),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_through() {
        let err: StoreError = StorageError::NotFound("subscription 3".into()).into();
        assert_eq!(err, StoreError::NotFound("subscription 3".into()));
    }

    #[test]
    fn constraint_violation_maps_to_conflict() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (name TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err = StorageError::from(
            conn.execute("INSERT INTO t VALUES ('a')", []).unwrap_err(),
        );
        assert!(err.is_constraint_violation());
        assert!(matches!(StoreError::from(err), StoreError::Conflict(_)));
    }
}
