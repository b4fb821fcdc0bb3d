/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use pulsemon_storage::error::StorageError;
///
/// let err = StorageError::NotFound {
///     entity: "alert_rule",
///     id: "rule-99".to_string(),
/// };
/// assert!(err.to_string().contains("alert_rule"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A required record was not found in the database.
    #[error("Storage: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// An underlying SQLite error.
    #[error("Storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failure (e.g. condition_json
    /// or context columns).
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A column contained a value that does not parse into its domain
    /// type (severity, status, source).
    #[error("Storage: invalid value in column '{column}': {reason}")]
    InvalidColumn {
        column: &'static str,
        reason: String,
    },

    /// Generic storage error for cases not covered by other variants.
    #[error("Storage: {0}")]
    Other(String),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
