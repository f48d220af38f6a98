use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BriefingKind {
    Yesterday,
    Today,
}

impl fmt::Display for BriefingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BriefingKind::Yesterday => f.write_str("yesterday"),
            BriefingKind::Today => f.write_str("today"),
        }
    }
}

/// Persisted copy of a rendered briefing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Briefing {
    pub id: Uuid,
    pub kind: BriefingKind,
    pub content: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Briefing {
    pub fn new(kind: BriefingKind, content: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            content,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BriefingResponse {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: BriefingKind,
}
