use std::sync::Arc;

use catcher_database::{DatabaseError, Db};
use catcher_domain::{
    briefing::{BriefingKind, BriefingResponse},
    event::{Event, Source},
};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};

use crate::utils::content::{contains_keyword, preview};

const RECAP_PER_SOURCE: usize = 3;
const RECAP_PREVIEW_CHARS: usize = 100;
const TIME_FORMAT: &str = "%I:%M %p";

/// Renders the daily recap and plan from the event timeline and keeps a copy
/// of every briefing it produces.
#[derive(Clone)]
pub struct BriefingGenerator {
    db: Arc<dyn Db>,
    offset: FixedOffset,
}

impl BriefingGenerator {
    pub fn new(db: Arc<dyn Db>, offset: FixedOffset) -> Self {
        Self { db, offset }
    }

    /// Recap of the calendar day before `now`, in the configured offset.
    pub async fn yesterday_recap(
        &self,
        now: DateTime<Utc>,
    ) -> Result<BriefingResponse, DatabaseError> {
        let (start, end) = self.day_window(now, -1);
        self.recap(start, end).await
    }

    /// Plan for the calendar day containing `now`, in the configured offset.
    pub async fn today_plan(&self, now: DateTime<Utc>) -> Result<BriefingResponse, DatabaseError> {
        let (start, end) = self.day_window(now, 0);
        self.plan(start, end).await
    }

    pub async fn recap(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BriefingResponse, DatabaseError> {
        let events = self.db.list_in_window(start, end).await?;
        tracing::debug!("rendering recap over {} events", events.len());
        let text = render_recap(&events, self.offset);
        self.persist(BriefingKind::Yesterday, text).await
    }

    pub async fn plan(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BriefingResponse, DatabaseError> {
        let events = self.db.list_in_window(start, end).await?;
        tracing::debug!("rendering plan over {} events", events.len());
        let text = render_plan(&events, self.offset);
        self.persist(BriefingKind::Today, text).await
    }

    async fn persist(
        &self,
        kind: BriefingKind,
        text: String,
    ) -> Result<BriefingResponse, DatabaseError> {
        let briefing = self.db.store_briefing(kind, text).await?;
        Ok(BriefingResponse {
            text: briefing.content,
            kind: briefing.kind,
        })
    }

    /// `[midnight, next midnight)` of the local day `days` away from `now`.
    fn day_window(&self, now: DateTime<Utc>, days: i64) -> (DateTime<Utc>, DateTime<Utc>) {
        let today = now.with_timezone(&self.offset).date_naive();
        let day = today + Duration::days(days);
        (
            self.local_midnight(day),
            self.local_midnight(day + Duration::days(1)),
        )
    }

    fn local_midnight(&self, day: NaiveDate) -> DateTime<Utc> {
        let local = day.and_time(NaiveTime::MIN);
        (local - Duration::seconds(self.offset.local_minus_utc().into())).and_utc()
    }
}

fn clock(event: &Event, offset: FixedOffset) -> String {
    event
        .timestamp
        .with_timezone(&offset)
        .format(TIME_FORMAT)
        .to_string()
}

pub fn render_recap(events: &[Event], offset: FixedOffset) -> String {
    if events.is_empty() {
        return "Yesterday was a quiet day with no recorded activities.".to_string();
    }

    let mut groups: Vec<(Source, Vec<&Event>)> = Vec::new();
    for event in events {
        match groups.iter_mut().find(|(source, _)| *source == event.source) {
            Some((_, members)) => members.push(event),
            None => groups.push((event.source, vec![event])),
        }
    }

    let mut parts = vec!["Here's your recap from yesterday:".to_string()];
    for (source, members) in groups {
        parts.push(format!(
            "In {}, you had {} activities:",
            source.label(),
            members.len()
        ));
        for event in members.into_iter().take(RECAP_PER_SOURCE) {
            parts.push(format!(
                "At {}: {}",
                clock(event, offset),
                preview(&event.content, RECAP_PREVIEW_CHARS)
            ));
        }
    }

    parts.join(" ")
}

/// Calendar entries and notes always count; chat only when it mentions a
/// task and mail only when it is marked urgent.
fn is_actionable(event: &Event) -> bool {
    match event.source {
        Source::Calendar | Source::Notes => true,
        Source::Chat => contains_keyword(&event.content, "task"),
        Source::Mail => contains_keyword(&event.content, "urgent"),
        Source::Meeting => false,
    }
}

pub fn render_plan(events: &[Event], offset: FixedOffset) -> String {
    let mut meetings = Vec::new();
    let mut high = Vec::new();
    let mut medium = 0usize;

    for event in events.iter().filter(|event| is_actionable(event)) {
        if event.source == Source::Calendar || contains_keyword(&event.content, "meeting") {
            meetings.push(event);
        } else if event.metadata.is_high_priority() {
            high.push(event);
        } else {
            medium += 1;
        }
    }

    if meetings.is_empty() && high.is_empty() && medium == 0 {
        return "You have a light day ahead with no specific tasks scheduled.".to_string();
    }

    let mut parts = vec!["Here's your plan for today:".to_string()];
    if !meetings.is_empty() {
        parts.push(format!("You have {} meetings scheduled:", meetings.len()));
        parts.extend(
            meetings
                .iter()
                .map(|event| format!("At {}: {}", clock(event, offset), event.content)),
        );
    }
    if !high.is_empty() {
        parts.push(format!("You have {} high-priority tasks:", high.len()));
        parts.extend(high.iter().map(|event| format!("• {}", event.content)));
    }
    if medium > 0 {
        parts.push(format!("And {medium} medium-priority items to review."));
    }

    parts.join(" ")
}
