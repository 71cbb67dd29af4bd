use thiserror::Error;

/// Failures of the file index.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The database file or pool could not be opened.
    #[error("cannot open index database: {0}")]
    Open(String),

    /// An embedded schema migration failed to apply.
    #[error("index migration failed: {0}")]
    Migration(String),

    /// A stored row holds a value the record type cannot represent.
    #[error("corrupt index row: {0}")]
    Decode(String),

    /// A value to be written does not fit the schema.
    #[error("value rejected by index: {0}")]
    InvalidValue(String),

    /// The backend rejected a query.
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    /// Creating the database's parent directory failed.
    #[error("index I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for index operations.
pub type Result<T> = std::result::Result<T, DatabaseError>;
