use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::EventId;

/// From this many pending events on, the system reports it needs attention.
pub const UNPROCESSED_ATTENTION_THRESHOLD: u64 = 10;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub total_events: u64,
    pub unprocessed_events: u64,
    pub flagged_events: u64,
    pub total_threads: u64,
    pub total_briefings: u64,
    pub total_commands: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Running,
    NeedsAttention,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    #[serde(flatten)]
    pub counts: StoreCounts,
    pub status: Health,
}

impl From<StoreCounts> for SystemStatus {
    fn from(counts: StoreCounts) -> Self {
        let status = if counts.unprocessed_events < UNPROCESSED_ATTENTION_THRESHOLD {
            Health::Running
        } else {
            Health::NeedsAttention
        };
        Self { counts, status }
    }
}

/// An event the organizer could not place because its data is inconsistent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReviewFlag {
    pub event_id: EventId,
    pub reason: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub flagged_at: DateTime<Utc>,
}

impl ReviewFlag {
    pub fn new(event_id: EventId, reason: impl Into<String>) -> Self {
        Self {
            event_id,
            reason: reason.into(),
            flagged_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_flips_at_attention_threshold() {
        let mut counts = StoreCounts {
            unprocessed_events: 9,
            ..Default::default()
        };
        assert_eq!(SystemStatus::from(counts).status, Health::Running);

        counts.unprocessed_events = 10;
        let status = SystemStatus::from(counts);
        assert_eq!(status.status, Health::NeedsAttention);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "needs_attention");
        assert_eq!(json["unprocessed_events"], 10);
    }
}
