use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchProvider {
    Google,
    Youtube,
}

impl SearchProvider {
    pub fn label(&self) -> &'static str {
        match self {
            SearchProvider::Google => "Google",
            SearchProvider::Youtube => "YouTube",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CommandAction {
    OpenApp { app: String },
    SearchWeb { provider: SearchProvider },
    Unknown,
}

/// Structured form of a free-text command.
///
/// Serializes as `{ "action": ..., "description": ..., "url"?: ..., "query"?: ... }`
/// with the variant fields (`app`, `provider`) inlined.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedCommand {
    #[serde(flatten)]
    pub action: CommandAction,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl ParsedCommand {
    pub fn is_unknown(&self) -> bool {
        self.action == CommandAction::Unknown
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub command_id: Uuid,
    pub parsed_command: ParsedCommand,
    pub success: bool,
    pub result: String,
}

/// Audit log entry for a dispatched command.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub id: Uuid,
    pub text: String,
    pub parsed: ParsedCommand,
    pub success: bool,
    pub result: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsed_command_wire_shape() {
        let parsed = ParsedCommand {
            action: CommandAction::SearchWeb {
                provider: SearchProvider::Youtube,
            },
            description: "Searching YouTube for lo-fi".into(),
            url: Some("https://www.youtube.com/results?search_query=lo-fi".into()),
            query: Some("lo-fi".into()),
        };

        let json = serde_json::to_value(&parsed).unwrap();
        assert_eq!(json["action"], "search_web");
        assert_eq!(json["provider"], "youtube");
        assert_eq!(json["query"], "lo-fi");

        let unknown = ParsedCommand {
            action: CommandAction::Unknown,
            description: "Command not recognized: dance".into(),
            url: None,
            query: None,
        };
        let json = serde_json::to_value(&unknown).unwrap();
        assert_eq!(json["action"], "unknown");
        assert!(json.get("url").is_none());

        let back: ParsedCommand = serde_json::from_value(json).unwrap();
        assert!(back.is_unknown());
    }
}
