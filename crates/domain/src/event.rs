use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metadata::{Metadata, MetadataError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for EventId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Where an event was captured. Ingestion also accepts the product names the
/// connectors report (`slack`, `gmail`, `notion`, `zoom`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    #[serde(alias = "slack")]
    Chat,
    #[serde(alias = "gmail", alias = "email")]
    Mail,
    #[serde(alias = "notion")]
    Notes,
    Calendar,
    #[serde(alias = "zoom")]
    Meeting,
}

impl Source {
    pub fn label(&self) -> &'static str {
        match self {
            Source::Chat => "Chat",
            Source::Mail => "Mail",
            Source::Notes => "Notes",
            Source::Calendar => "Calendar",
            Source::Meeting => "Meeting",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Chat => "chat",
            Source::Mail => "mail",
            Source::Notes => "notes",
            Source::Calendar => "calendar",
            Source::Meeting => "meeting",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub source: Source,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub processed: bool,
}

impl Event {
    pub fn id(&self) -> EventId {
        self.id
    }

    /// Ordering key used for timelines: timestamp first, id as tie-breaker.
    pub fn timeline_key(&self) -> (DateTime<Utc>, EventId) {
        (self.timestamp, self.id)
    }
}

/// Drops sub-millisecond precision, which stored events do not keep.
fn truncate_to_millis(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(timestamp.timestamp_millis()).unwrap_or(timestamp)
}

/// An event as handed to the store. Metadata has already been validated.
#[derive(Clone, Debug)]
pub struct NewEvent {
    pub source: Source,
    pub content: String,
    pub metadata: Metadata,
    pub timestamp: DateTime<Utc>,
}

impl NewEvent {
    pub fn new(source: Source, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            source,
            content: content.into(),
            metadata: Metadata::default(),
            timestamp,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn into_event(self, id: EventId) -> Event {
        Event {
            id,
            source: self.source,
            content: self.content,
            metadata: self.metadata,
            timestamp: truncate_to_millis(self.timestamp),
            processed: false,
        }
    }
}

/// Wire shape of an ingestion request. Metadata arrives as an open JSON
/// object and is validated against the source before it reaches the store.
#[derive(Debug, Deserialize)]
pub struct IngestEvent {
    pub source: Source,
    pub content: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl IngestEvent {
    pub fn validate(self, now: DateTime<Utc>) -> Result<NewEvent, MetadataError> {
        let metadata = match self.metadata {
            Some(raw) => Metadata::from_raw(self.source, raw)?,
            None => Metadata::default(),
        };

        Ok(NewEvent {
            source: self.source,
            content: self.content,
            metadata,
            timestamp: truncate_to_millis(self.timestamp.unwrap_or(now)),
        })
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct EventFilter {
    pub limit: Option<usize>,
    pub source: Option<Source>,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn source_accepts_product_aliases() {
        let sources: Vec<Source> =
            serde_json::from_str(r#"["slack", "gmail", "email", "notion", "zoom", "calendar"]"#)
                .unwrap();
        assert_eq!(
            sources,
            vec![
                Source::Chat,
                Source::Mail,
                Source::Mail,
                Source::Notes,
                Source::Meeting,
                Source::Calendar
            ]
        );
        assert_eq!(serde_json::to_string(&Source::Notes).unwrap(), r#""notes""#);
    }

    #[test]
    fn ingest_defaults_timestamp_and_metadata() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let ingest: IngestEvent =
            serde_json::from_str(r#"{"source": "chat", "content": "deploy task"}"#).unwrap();

        let event = ingest.validate(now).unwrap();
        assert_eq!(event.timestamp, now);
        assert_eq!(event.metadata, Metadata::default());
    }

    #[test]
    fn timestamps_keep_millisecond_precision() {
        let ingest: IngestEvent = serde_json::from_str(
            r#"{"source": "chat", "content": "hi", "timestamp": "2024-05-01T09:00:00.123456789Z"}"#,
        )
        .unwrap();
        let millis = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
            + chrono::Duration::milliseconds(123);

        let event = ingest.validate(Utc::now()).unwrap();
        assert_eq!(event.timestamp, millis);

        let now = millis + chrono::Duration::nanoseconds(999);
        let ingest: IngestEvent =
            serde_json::from_str(r#"{"source": "chat", "content": "hi"}"#).unwrap();
        let event = ingest.validate(now).unwrap().into_event(EventId(1));
        assert_eq!(event.timestamp, millis);

        let stored = serde_json::to_value(&event).unwrap();
        assert_eq!(serde_json::from_value::<Event>(stored).unwrap(), event);
    }

    #[test]
    fn ingest_rejects_invalid_metadata() {
        let ingest: IngestEvent = serde_json::from_str(
            r#"{"source": "mail", "content": "hi", "metadata": {"priority": "whenever"}}"#,
        )
        .unwrap();

        assert!(ingest.validate(Utc::now()).is_err());
    }
}
