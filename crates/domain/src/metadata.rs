use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::Source;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl std::str::FromStr for Priority {
    type Err = MetadataError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            _ => Err(MetadataError::InvalidPriority(value.to_owned())),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum MetadataError {
    #[error("metadata must be a JSON object")]
    NotAnObject,
    #[error("metadata key `{0}` must be a string")]
    NotAString(String),
    #[error("unknown priority `{0}`, expected low, medium or high")]
    InvalidPriority(String),
    #[error("metadata key `{key}` is not valid for {origin} events")]
    UnsupportedKey { key: String, origin: Source },
}

/// Typed view over the loose key/value metadata connectors attach.
///
/// Recognized keys per source:
///
/// | key        | sources                  |
/// |------------|--------------------------|
/// | `priority` | all                      |
/// | `sender`   | chat, mail, meeting      |
/// | `channel`  | chat                     |
/// | `subject`  | mail                     |
/// | `location` | calendar, meeting        |
///
/// Any other key is kept verbatim in `extra` as long as its value is a string.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl Metadata {
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn is_high_priority(&self) -> bool {
        self.priority == Some(Priority::High)
    }

    pub fn from_raw(source: Source, raw: serde_json::Value) -> Result<Self, MetadataError> {
        let object = match raw {
            serde_json::Value::Null => return Ok(Self::default()),
            serde_json::Value::Object(object) => object,
            _ => return Err(MetadataError::NotAnObject),
        };

        let mut metadata = Self::default();
        for (key, value) in object {
            let serde_json::Value::String(value) = value else {
                return Err(MetadataError::NotAString(key));
            };

            if !Self::accepts(source, &key) {
                return Err(MetadataError::UnsupportedKey {
                    key,
                    origin: source,
                });
            }

            match key.as_str() {
                "priority" => metadata.priority = Some(value.parse()?),
                "sender" => metadata.sender = Some(value),
                "channel" => metadata.channel = Some(value),
                "subject" => metadata.subject = Some(value),
                "location" => metadata.location = Some(value),
                _ => {
                    metadata.extra.insert(key, value);
                }
            }
        }

        Ok(metadata)
    }

    fn accepts(source: Source, key: &str) -> bool {
        match key {
            "priority" => true,
            "sender" => matches!(source, Source::Chat | Source::Mail | Source::Meeting),
            "channel" => source == Source::Chat,
            "subject" => source == Source::Mail,
            "location" => matches!(source, Source::Calendar | Source::Meeting),
            _ => true,
        }
    }
}
