use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Item not found")]
    NotFound,
    #[error("Connection error: {0}")]
    ConnectionError(String),
    #[error("Query error: {0}")]
    QueryError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Database operation failed: {0}")]
    OperationFailed(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl DatabaseError {
    /// Errors about a single record rather than the store itself. Callers
    /// processing a batch may skip the record and carry on.
    pub fn is_record_level(&self) -> bool {
        matches!(self, DatabaseError::NotFound | DatabaseError::InvalidInput(_))
    }
}
