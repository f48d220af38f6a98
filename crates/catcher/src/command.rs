use std::sync::Arc;

use catcher_database::{DatabaseError, Db};
use catcher_domain::command::{
    CommandAction, CommandOutcome, CommandRecord, ParsedCommand, SearchProvider,
};
use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

const GMAIL_URL: &str = "https://mail.google.com";
const NOTION_URL: &str = "https://www.notion.so";
const SLACK_URL: &str = "https://app.slack.com";

#[derive(Error, Debug)]
#[error("failed to open {url}: {source}")]
pub struct LaunchError {
    pub url: String,
    #[source]
    pub source: std::io::Error,
}

/// Opens URLs on the user's machine.
pub trait Launcher: Send + Sync {
    fn open(&self, url: &str) -> Result<(), LaunchError>;
}

/// Hands URLs to the system browser.
#[derive(Clone, Copy, Debug, Default)]
pub struct BrowserLauncher;

impl Launcher for BrowserLauncher {
    fn open(&self, url: &str) -> Result<(), LaunchError> {
        webbrowser::open(url).map_err(|source| LaunchError {
            url: url.to_string(),
            source,
        })
    }
}

/// Maps free text to a recognised intent by keyword. The first rule that
/// matches wins: mail, YouTube, Google, Notion, Slack.
pub fn parse(text: &str) -> ParsedCommand {
    let lowered = text.to_lowercase();

    if lowered.contains("gmail") || lowered.contains("email") {
        open_app("gmail", "Gmail", GMAIL_URL)
    } else if lowered.contains("youtube") {
        search(SearchProvider::Youtube, text)
    } else if lowered.contains("google") {
        search(SearchProvider::Google, text)
    } else if lowered.contains("notion") {
        open_app("notion", "Notion", NOTION_URL)
    } else if lowered.contains("slack") {
        open_app("slack", "Slack", SLACK_URL)
    } else {
        unknown(text)
    }
}

fn open_app(app: &str, label: &str, url: &str) -> ParsedCommand {
    ParsedCommand {
        action: CommandAction::OpenApp {
            app: app.to_string(),
        },
        description: format!("Opening {label}"),
        url: Some(url.to_string()),
        query: None,
    }
}

fn unknown(text: &str) -> ParsedCommand {
    ParsedCommand {
        action: CommandAction::Unknown,
        description: format!("Command not recognized: {}", text.trim()),
        url: None,
        query: None,
    }
}

fn search(provider: SearchProvider, text: &str) -> ParsedCommand {
    let keyword = match provider {
        SearchProvider::Google => "google",
        SearchProvider::Youtube => "youtube",
    };

    let query = search_terms(text, keyword);
    if query.is_empty() {
        return unknown(text);
    }

    let encoded = urlencoding::encode(&query).replace("%20", "+");
    let url = match provider {
        SearchProvider::Google => format!("https://www.google.com/search?q={encoded}"),
        SearchProvider::Youtube => {
            format!("https://www.youtube.com/results?search_query={encoded}")
        }
    };

    ParsedCommand {
        action: CommandAction::SearchWeb { provider },
        description: format!("Searching {} for {}", provider.label(), query),
        url: Some(url),
        query: Some(query),
    }
}

/// Drops the provider name and the word "search", then a leading "for".
fn search_terms(text: &str, keyword: &str) -> String {
    let mut words: Vec<&str> = text
        .split_whitespace()
        .filter(|word| {
            let bare = word.trim_matches(|c: char| !c.is_alphanumeric());
            !bare.eq_ignore_ascii_case(keyword) && !bare.eq_ignore_ascii_case("search")
        })
        .collect();

    if words
        .first()
        .is_some_and(|word| word.eq_ignore_ascii_case("for"))
    {
        words.remove(0);
    }

    words.join(" ")
}

/// Parses, launches and logs user commands.
#[derive(Clone)]
pub struct CommandDispatcher {
    db: Arc<dyn Db>,
    launcher: Arc<dyn Launcher>,
}

impl CommandDispatcher {
    pub fn new(db: Arc<dyn Db>, launcher: Arc<dyn Launcher>) -> Self {
        Self { db, launcher }
    }

    pub fn parse(&self, text: &str) -> ParsedCommand {
        parse(text)
    }

    pub fn execute(&self, parsed: ParsedCommand) -> CommandOutcome {
        let (success, result) = match (&parsed.action, &parsed.url) {
            (CommandAction::Unknown, _) | (_, None) => (false, parsed.description.clone()),
            (_, Some(url)) => match self.launcher.open(url) {
                Ok(()) => (true, parsed.description.clone()),
                Err(e) => {
                    tracing::warn!("Failed to launch command: {}", e);
                    (false, e.to_string())
                }
            },
        };

        CommandOutcome {
            command_id: Uuid::new_v4(),
            parsed_command: parsed,
            success,
            result,
        }
    }

    /// Parse, execute and record `text` in one go.
    pub async fn process(&self, text: &str) -> Result<CommandOutcome, DatabaseError> {
        let outcome = self.execute(self.parse(text));
        tracing::debug!(
            "command {:?} -> {} (success: {})",
            text,
            outcome.parsed_command.description,
            outcome.success
        );

        self.db
            .record_command(CommandRecord {
                id: outcome.command_id,
                text: text.to_string(),
                parsed: outcome.parsed_command.clone(),
                success: outcome.success,
                result: outcome.result.clone(),
                created_at: Utc::now(),
            })
            .await?;

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use catcher_in_memory_database::CatcherInMemory;

    use super::*;
    use crate::testing::RecordingLauncher;

    #[test]
    fn mail_wins_over_everything_else() {
        let parsed = parse("check my email then google the weather");
        assert_eq!(
            parsed.action,
            CommandAction::OpenApp {
                app: "gmail".into()
            }
        );
        assert_eq!(parsed.url.as_deref(), Some(GMAIL_URL));
        assert_eq!(parsed.description, "Opening Gmail");
    }

    #[test]
    fn youtube_search_extracts_the_query() {
        let parsed = parse("Search YouTube for lo-fi music");
        assert_eq!(
            parsed.action,
            CommandAction::SearchWeb {
                provider: SearchProvider::Youtube
            }
        );
        assert_eq!(parsed.query.as_deref(), Some("lo-fi music"));
        assert_eq!(
            parsed.url.as_deref(),
            Some("https://www.youtube.com/results?search_query=lo-fi+music")
        );
        assert_eq!(parsed.description, "Searching YouTube for lo-fi music");
    }

    #[test]
    fn google_matches_without_the_word_search() {
        let parsed = parse("Google vendor pricing & terms");
        assert_eq!(parsed.query.as_deref(), Some("vendor pricing & terms"));
        assert_eq!(
            parsed.url.as_deref(),
            Some("https://www.google.com/search?q=vendor+pricing+%26+terms")
        );
    }

    #[test]
    fn search_without_terms_is_not_recognized() {
        let parsed = parse("search google");
        assert!(parsed.is_unknown());
        assert_eq!(parsed.description, "Command not recognized: search google");
        assert!(parsed.url.is_none());
    }

    #[test]
    fn apps_and_fallback() {
        assert_eq!(parse("Open Notion Q3 doc").url.as_deref(), Some(NOTION_URL));
        assert_eq!(parse("slack please").url.as_deref(), Some(SLACK_URL));

        let parsed = parse("dance");
        assert!(parsed.is_unknown());
        assert_eq!(parsed.description, "Command not recognized: dance");
    }

    #[tokio::test]
    async fn process_launches_and_records() {
        let db = Arc::new(CatcherInMemory::new());
        let launcher = Arc::new(RecordingLauncher::default());
        let dispatcher = CommandDispatcher::new(db.clone(), launcher.clone());

        let outcome = dispatcher.process("open slack").await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.result, "Opening Slack");
        assert_eq!(launcher.opened(), vec![SLACK_URL.to_string()]);

        let outcome = dispatcher.process("make coffee").await.unwrap();
        assert!(!outcome.success);
        assert_eq!(launcher.opened().len(), 1, "unknown commands launch nothing");

        assert_eq!(db.counts().await.unwrap().total_commands, 2);
    }

    #[tokio::test]
    async fn launch_failures_are_reported_not_raised() {
        let db = Arc::new(CatcherInMemory::new());
        let launcher = Arc::new(RecordingLauncher::failing());
        let dispatcher = CommandDispatcher::new(db, launcher);

        let outcome = dispatcher.process("open notion").await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.result.starts_with("failed to open https://www.notion.so"));
    }
}
