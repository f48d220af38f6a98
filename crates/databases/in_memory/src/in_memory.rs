use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::Arc,
};

use catcher_database::{
    assignment_members, check_assignment, Assignment, AssignmentOutcome, DatabaseError, Db,
    Placement,
};
use catcher_domain::{
    briefing::{Briefing, BriefingKind},
    command::CommandRecord,
    embedding::Embedding,
    event::{Event, EventFilter, EventId, NewEvent},
    status::{ReviewFlag, StoreCounts},
    thread::{CreateThread, Thread, ThreadId},
};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

#[derive(Default)]
struct Tables {
    last_event_id: u64,
    last_thread_id: u64,
    events: BTreeMap<EventId, Event>,
    embeddings: BTreeMap<EventId, Embedding>,
    threads: BTreeMap<ThreadId, Thread>,
    thread_events: HashMap<ThreadId, HashSet<EventId>>,
    flags: BTreeMap<EventId, ReviewFlag>,
    briefings: Vec<Briefing>,
    commands: Vec<CommandRecord>,
}

impl Tables {
    fn next_thread_id(&mut self) -> ThreadId {
        self.last_thread_id += 1;
        ThreadId(self.last_thread_id)
    }

    fn insert_thread(&mut self, input: CreateThread) -> Result<Thread, DatabaseError> {
        if !self.events.contains_key(&input.seed) {
            return Err(DatabaseError::NotFound);
        }

        let seed = input.seed;
        let id = self.next_thread_id();
        let thread = input.into_thread(id);
        self.threads.insert(id, thread.clone());
        self.thread_events.insert(id, HashSet::from([seed]));
        Ok(thread)
    }

    fn attach(&mut self, thread_id: ThreadId, event_id: EventId, at: DateTime<Utc>) -> bool {
        let inserted = self
            .thread_events
            .entry(thread_id)
            .or_default()
            .insert(event_id);
        if inserted {
            if let Some(thread) = self.threads.get_mut(&thread_id) {
                thread.touch(at);
            }
        }
        inserted
    }
}

/// Volatile store behind a single lock, so every trait call observes and
/// produces a consistent snapshot.
#[derive(Clone, Default)]
pub struct CatcherInMemory {
    tables: Arc<Mutex<Tables>>,
}

impl CatcherInMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Db for CatcherInMemory {
    async fn append_event(&self, input: NewEvent) -> Result<Event, DatabaseError> {
        let mut tables = self.tables.lock().await;
        tables.last_event_id += 1;
        let event = input.into_event(EventId(tables.last_event_id));
        tables.events.insert(event.id, event.clone());
        Ok(event)
    }

    async fn get_event(&self, event_id: EventId) -> Result<Event, DatabaseError> {
        let tables = self.tables.lock().await;
        tables
            .events
            .get(&event_id)
            .cloned()
            .ok_or(DatabaseError::NotFound)
    }

    async fn list_events(&self, filter: EventFilter) -> Result<Vec<Event>, DatabaseError> {
        let tables = self.tables.lock().await;
        let mut events: Vec<Event> = tables
            .events
            .values()
            .filter(|event| filter.source.map_or(true, |source| event.source == source))
            .cloned()
            .collect();

        events.sort_by(|a, b| b.timeline_key().cmp(&a.timeline_key()));
        events.truncate(filter.limit.unwrap_or(events.len()));
        Ok(events)
    }

    async fn list_unprocessed(&self, limit: Option<usize>) -> Result<Vec<Event>, DatabaseError> {
        let tables = self.tables.lock().await;
        let mut events: Vec<Event> = tables
            .events
            .values()
            .filter(|event| !event.processed && !tables.flags.contains_key(&event.id))
            .cloned()
            .collect();

        events.sort_by_key(Event::timeline_key);
        events.truncate(limit.unwrap_or(events.len()));
        Ok(events)
    }

    async fn mark_processed(&self, event_id: EventId) -> Result<(), DatabaseError> {
        let mut tables = self.tables.lock().await;
        let event = tables
            .events
            .get_mut(&event_id)
            .ok_or(DatabaseError::NotFound)?;
        event.processed = true;
        Ok(())
    }

    async fn list_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, DatabaseError> {
        let tables = self.tables.lock().await;
        let mut events: Vec<Event> = tables
            .events
            .values()
            .filter(|event| event.timestamp >= start && event.timestamp < end)
            .cloned()
            .collect();

        events.sort_by_key(Event::timeline_key);
        Ok(events)
    }

    async fn get_embedding(&self, event_id: EventId) -> Result<Option<Embedding>, DatabaseError> {
        let tables = self.tables.lock().await;
        Ok(tables.embeddings.get(&event_id).cloned())
    }

    async fn list_embeddings(&self, model: &str) -> Result<Vec<Embedding>, DatabaseError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .embeddings
            .values()
            .filter(|embedding| embedding.model == model)
            .cloned()
            .collect())
    }

    async fn create_thread(&self, input: CreateThread) -> Result<Thread, DatabaseError> {
        self.tables.lock().await.insert_thread(input)
    }

    async fn attach(&self, thread_id: ThreadId, event_id: EventId) -> Result<bool, DatabaseError> {
        let mut tables = self.tables.lock().await;
        if !tables.threads.contains_key(&thread_id) || !tables.events.contains_key(&event_id) {
            return Err(DatabaseError::NotFound);
        }
        Ok(tables.attach(thread_id, event_id, Utc::now()))
    }

    async fn thread_memberships(
        &self,
        event_ids: &[EventId],
    ) -> Result<BTreeMap<EventId, BTreeSet<ThreadId>>, DatabaseError> {
        let tables = self.tables.lock().await;
        let wanted: HashSet<&EventId> = event_ids.iter().collect();

        let mut memberships: BTreeMap<EventId, BTreeSet<ThreadId>> = BTreeMap::new();
        for (thread_id, members) in &tables.thread_events {
            for event_id in members.iter().filter(|id| wanted.contains(id)) {
                memberships.entry(*event_id).or_default().insert(*thread_id);
            }
        }
        Ok(memberships)
    }

    async fn commit_assignment(
        &self,
        assignment: Assignment,
    ) -> Result<AssignmentOutcome, DatabaseError> {
        check_assignment(&assignment)?;
        let mut tables = self.tables.lock().await;
        let members = assignment_members(&assignment);

        // Check everything up front so a rejected assignment leaves no trace.
        if members.iter().any(|id| !tables.events.contains_key(id)) {
            return Err(DatabaseError::NotFound);
        }
        if let Placement::Existing(thread_id) = &assignment.placement {
            if !tables.threads.contains_key(thread_id) {
                return Err(DatabaseError::NotFound);
            }
        }

        if let Some(embedding) = assignment.embedding {
            tables.embeddings.insert(embedding.event_id, embedding);
        }

        let now = Utc::now();
        let (thread_id, created, mut attached) = match assignment.placement {
            Placement::Existing(thread_id) => (thread_id, false, Vec::new()),
            Placement::New { thread, .. } => {
                let thread = tables.insert_thread(thread)?;
                (thread.id, true, vec![assignment.event_id])
            }
        };

        for member in members {
            if tables.attach(thread_id, member, now) {
                attached.push(member);
            }
        }

        if let Some(event) = tables.events.get_mut(&assignment.event_id) {
            event.processed = true;
        }

        Ok(AssignmentOutcome {
            thread_id,
            created,
            attached,
        })
    }

    async fn list_threads(&self) -> Result<Vec<Thread>, DatabaseError> {
        let tables = self.tables.lock().await;
        Ok(tables.threads.values().cloned().collect())
    }

    async fn get_thread(&self, thread_id: ThreadId) -> Result<Thread, DatabaseError> {
        let tables = self.tables.lock().await;
        tables
            .threads
            .get(&thread_id)
            .cloned()
            .ok_or(DatabaseError::NotFound)
    }

    async fn get_thread_events(&self, thread_id: ThreadId) -> Result<Vec<Event>, DatabaseError> {
        let tables = self.tables.lock().await;
        if !tables.threads.contains_key(&thread_id) {
            return Err(DatabaseError::NotFound);
        }

        let mut events: Vec<Event> = tables
            .thread_events
            .get(&thread_id)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.events.get(id).cloned())
            .collect();

        events.sort_by_key(Event::timeline_key);
        Ok(events)
    }

    async fn flag_for_review(
        &self,
        event_id: EventId,
        reason: String,
    ) -> Result<(), DatabaseError> {
        let mut tables = self.tables.lock().await;
        if !tables.events.contains_key(&event_id) {
            return Err(DatabaseError::NotFound);
        }
        tables
            .flags
            .insert(event_id, ReviewFlag::new(event_id, reason));
        Ok(())
    }

    async fn list_flagged(&self) -> Result<Vec<ReviewFlag>, DatabaseError> {
        let tables = self.tables.lock().await;
        Ok(tables.flags.values().cloned().collect())
    }

    async fn clear_flag(&self, event_id: EventId) -> Result<bool, DatabaseError> {
        let mut tables = self.tables.lock().await;
        Ok(tables.flags.remove(&event_id).is_some())
    }

    async fn store_briefing(
        &self,
        kind: BriefingKind,
        content: String,
    ) -> Result<Briefing, DatabaseError> {
        let briefing = Briefing::new(kind, content);
        self.tables.lock().await.briefings.push(briefing.clone());
        Ok(briefing)
    }

    async fn list_briefings(&self, limit: Option<usize>) -> Result<Vec<Briefing>, DatabaseError> {
        let tables = self.tables.lock().await;
        let limit = limit.unwrap_or(tables.briefings.len());
        Ok(tables.briefings.iter().rev().take(limit).cloned().collect())
    }

    async fn record_command(&self, record: CommandRecord) -> Result<(), DatabaseError> {
        self.tables.lock().await.commands.push(record);
        Ok(())
    }

    async fn counts(&self) -> Result<StoreCounts, DatabaseError> {
        let tables = self.tables.lock().await;
        Ok(StoreCounts {
            total_events: tables.events.len() as u64,
            unprocessed_events: tables.events.values().filter(|e| !e.processed).count() as u64,
            flagged_events: tables.flags.len() as u64,
            total_threads: tables.threads.len() as u64,
            total_briefings: tables.briefings.len() as u64,
            total_commands: tables.commands.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use catcher_domain::event::Source;
    use chrono::TimeZone;

    use super::*;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, minute, 0).unwrap()
    }

    async fn seeded() -> (CatcherInMemory, Vec<Event>) {
        let db = CatcherInMemory::new();
        let mut events = Vec::new();
        for (minute, source, content) in [
            (30, Source::Mail, "urgent: invoice"),
            (10, Source::Chat, "deploy task"),
            (20, Source::Calendar, "standup"),
        ] {
            events.push(
                db.append_event(NewEvent::new(source, content, at(minute)))
                    .await
                    .unwrap(),
            );
        }
        (db, events)
    }

    #[tokio::test]
    async fn ids_are_monotonic_and_listings_ordered() {
        let (db, events) = seeded().await;
        assert_eq!(
            events.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![EventId(1), EventId(2), EventId(3)]
        );

        let pending = db.list_unprocessed(None).await.unwrap();
        assert_eq!(
            pending.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![EventId(2), EventId(3), EventId(1)]
        );

        let newest = db
            .list_events(EventFilter {
                limit: Some(1),
                source: None,
            })
            .await
            .unwrap();
        assert_eq!(newest[0].id, EventId(1));

        let window = db.list_in_window(at(10), at(30)).await.unwrap();
        assert_eq!(window.len(), 2, "end of the window is exclusive");
    }

    #[tokio::test]
    async fn attach_is_idempotent() {
        let (db, events) = seeded().await;
        let thread = db
            .create_thread(CreateThread {
                title: "Deploy".into(),
                description: String::new(),
                seed: events[1].id,
            })
            .await
            .unwrap();

        assert!(!db.attach(thread.id, events[1].id).await.unwrap());
        assert!(db.attach(thread.id, events[0].id).await.unwrap());
        assert!(!db.attach(thread.id, events[0].id).await.unwrap());

        let members = db.get_thread_events(thread.id).await.unwrap();
        assert_eq!(
            members.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![events[1].id, events[0].id]
        );
        assert_eq!(
            db.threads_containing(&[events[0].id, events[2].id])
                .await
                .unwrap(),
            BTreeSet::from([thread.id])
        );
    }

    #[tokio::test]
    async fn rejected_assignment_writes_nothing() {
        let (db, events) = seeded().await;

        let result = db
            .commit_assignment(Assignment {
                event_id: events[0].id,
                embedding: Some(Embedding::new(events[0].id, vec![1.0], "test")),
                placement: Placement::Existing(ThreadId(42)),
            })
            .await;

        assert!(matches!(result, Err(DatabaseError::NotFound)));
        assert!(db.get_embedding(events[0].id).await.unwrap().is_none());
        assert!(!db.get_event(events[0].id).await.unwrap().processed);
    }

    #[tokio::test]
    async fn assignment_for_another_event_is_invalid() {
        let (db, events) = seeded().await;

        let result = db
            .commit_assignment(Assignment {
                event_id: events[0].id,
                embedding: None,
                placement: Placement::New {
                    thread: CreateThread {
                        title: "Chat: deploy".into(),
                        description: String::new(),
                        seed: events[1].id,
                    },
                    companions: Vec::new(),
                },
            })
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidInput(_)));
        assert!(err.is_record_level());
        assert_eq!(db.counts().await.unwrap().total_threads, 0);
    }

    #[tokio::test]
    async fn new_placement_creates_thread_and_marks_processed() {
        let (db, events) = seeded().await;

        let outcome = db
            .commit_assignment(Assignment {
                event_id: events[2].id,
                embedding: Some(Embedding::new(events[2].id, vec![0.5, 0.5], "test")),
                placement: Placement::New {
                    thread: CreateThread {
                        title: "Calendar: standup".into(),
                        description: String::new(),
                        seed: events[2].id,
                    },
                    companions: vec![events[1].id, events[2].id],
                },
            })
            .await
            .unwrap();

        assert!(outcome.created);
        assert_eq!(outcome.attached, vec![events[2].id, events[1].id]);
        assert!(db.get_event(events[2].id).await.unwrap().processed);
        assert_eq!(db.list_embeddings("test").await.unwrap().len(), 1);
        assert!(db.list_embeddings("other").await.unwrap().is_empty());

        let counts = db.counts().await.unwrap();
        assert_eq!(counts.total_threads, 1);
        assert_eq!(counts.unprocessed_events, 2);
    }

    #[tokio::test]
    async fn flagged_events_leave_the_queue() {
        let (db, events) = seeded().await;
        db.flag_for_review(events[1].id, "bad vector".into())
            .await
            .unwrap();

        let pending = db.list_unprocessed(Some(5)).await.unwrap();
        assert!(pending.iter().all(|e| e.id != events[1].id));
        assert_eq!(db.list_flagged().await.unwrap().len(), 1);

        assert!(db.clear_flag(events[1].id).await.unwrap());
        assert!(!db.clear_flag(events[1].id).await.unwrap());
        assert_eq!(db.list_unprocessed(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn briefings_are_listed_newest_first() {
        let db = CatcherInMemory::new();
        db.store_briefing(BriefingKind::Yesterday, "first".into())
            .await
            .unwrap();
        db.store_briefing(BriefingKind::Today, "second".into())
            .await
            .unwrap();

        let briefings = db.list_briefings(Some(1)).await.unwrap();
        assert_eq!(briefings[0].content, "second");
        assert_eq!(db.counts().await.unwrap().total_briefings, 2);
    }
}
