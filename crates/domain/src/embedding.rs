use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::EventId;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub event_id: EventId,
    pub vector: Vec<f32>,
    /// Identifier of the method that produced `vector`. Embeddings from a
    /// different model are never compared against each other.
    pub model: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Embedding {
    pub fn new(event_id: EventId, vector: Vec<f32>, model: impl Into<String>) -> Self {
        Self {
            event_id,
            vector,
            model: model.into(),
            created_at: Utc::now(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.vector.len()
    }
}
