use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// SQL-state code reported when a unique constraint rejects a write.
pub const UNIQUE_VIOLATION: &str = "23505";
/// SQL-state code reported when a foreign key rejects a write.
pub const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A unique constraint rejected the write.
    #[error("duplicate key value violates unique constraint `{constraint}`")]
    UniqueViolation {
        /// Name of the violated constraint.
        constraint: &'static str,
    },
    /// A foreign key rejected the write (referenced row is missing).
    #[error("insert or update violates foreign key constraint `{constraint}`")]
    ForeignKeyViolation {
        /// Name of the violated constraint.
        constraint: &'static str,
    },
    /// An update targeted a row that does not exist.
    #[error("{relation} row `{id}` not found")]
    NotFound {
        /// Relation (table) name.
        relation: &'static str,
        /// Identifier of the missing row.
        id: String,
    },
    /// The store has been shut down and accepts no further requests.
    #[error("storage has been shut down")]
    ShutDown,
    /// The backend could not be reached.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// Human readable context.
        message: String,
        /// Underlying failure, if any.
        #[source]
        source: Option<Box<dyn Error + Send + Sync>>,
    },
}

impl StorageError {
    /// Construct an unavailable error without an underlying cause.
    pub fn unavailable_msg(message: impl Into<String>) -> Self {
        StorageError::Unavailable {
            message: message.into(),
            source: None,
        }
    }

    /// Distinguishable error code, mirroring the relational store's SQL states.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            StorageError::UniqueViolation { .. } => Some(UNIQUE_VIOLATION),
            StorageError::ForeignKeyViolation { .. } => Some(FOREIGN_KEY_VIOLATION),
            _ => None,
        }
    }

    /// Whether this error is the unique-constraint violation for `constraint`.
    pub fn is_unique_violation_of(&self, constraint: &str) -> bool {
        matches!(self, StorageError::UniqueViolation { constraint: c } if *c == constraint)
    }
}
