use std::time::Duration;

use catcher_database::DatabaseError;
use catcher_domain::metadata::MetadataError;
use thiserror::Error;

use crate::{embedder::EmbedderError, similarity::SimilarityError};

#[derive(Error, Debug)]
pub enum CatcherError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Store(#[from] DatabaseError),
    #[error("invalid event: {0}")]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Why a single event could not be organized. None of these abort a pass.
#[derive(Error, Debug)]
pub enum EventFailure {
    /// The provider failed or was too slow; retried on the next pass.
    #[error("embedding provider failed: {0}")]
    TransientProvider(#[source] EmbedderError),
    #[error("embedding provider timed out after {0:?}")]
    Timeout(Duration),
    /// The event's data is inconsistent; flagged for manual review.
    #[error("data integrity: {0}")]
    DataIntegrity(String),
}

impl EventFailure {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EventFailure::TransientProvider(_) | EventFailure::Timeout(_)
        )
    }
}

/// Provider outages are retried. Unusable vectors are not.
impl From<EmbedderError> for EventFailure {
    fn from(err: EmbedderError) -> Self {
        match err {
            EmbedderError::Request(_) | EmbedderError::Unavailable(_) => {
                EventFailure::TransientProvider(err)
            }
            EmbedderError::Empty | EmbedderError::Dimensions { .. } => {
                EventFailure::DataIntegrity(err.to_string())
            }
        }
    }
}

impl From<SimilarityError> for EventFailure {
    fn from(err: SimilarityError) -> Self {
        EventFailure::DataIntegrity(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unusable_vectors_are_not_retried() {
        let failure = EventFailure::from(EmbedderError::Dimensions {
            expected: 1536,
            actual: 512,
        });
        assert!(matches!(failure, EventFailure::DataIntegrity(_)));
        assert!(!failure.is_transient());

        assert!(!EventFailure::from(EmbedderError::Empty).is_transient());
    }

    #[test]
    fn unavailable_provider_is_retried() {
        let failure = EventFailure::from(EmbedderError::Unavailable("503".into()));
        assert!(failure.is_transient());
    }
}
