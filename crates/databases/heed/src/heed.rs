mod heed_ids;

use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
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
use heed::{
    types::{SerdeJson, Str, Unit},
    Database, EnvOpenOptions,
};
use heed_ids::{HeedId, HeedIdPair, HeedThreadMember, HeedTimestampId, HeedTimestampUuid};

const EVENT_SEQUENCE: &str = "event";
const THREAD_SEQUENCE: &str = "thread";

fn serialization_error(e: &heed::Error) -> Option<DatabaseError> {
    match e {
        heed::Error::Encoding(_) | heed::Error::Decoding(_) => {
            Some(DatabaseError::SerializationError(e.to_string()))
        }
        _ => None,
    }
}

fn query_error(e: heed::Error) -> DatabaseError {
    serialization_error(&e).unwrap_or_else(|| DatabaseError::QueryError(e.to_string()))
}

fn write_error(e: heed::Error) -> DatabaseError {
    serialization_error(&e).unwrap_or_else(|| DatabaseError::OperationFailed(e.to_string()))
}

fn timeline_key(event: &Event) -> HeedTimestampId {
    (event.timestamp.timestamp_millis(), event.id.0).into()
}

/// LMDB-backed store. Every trait call runs in a single transaction, so a
/// committed assignment is durable as a whole.
pub struct CatcherHeed {
    env: Arc<heed::Env>,
    sequences_db: Database<Str, SerdeJson<u64>>,
    events_db: Database<HeedId, SerdeJson<Event>>,
    event_time_db: Database<HeedTimestampId, Unit>,
    pending_db: Database<HeedTimestampId, Unit>,
    embeddings_db: Database<HeedId, SerdeJson<Embedding>>,
    threads_db: Database<HeedId, SerdeJson<Thread>>,
    thread_events_db: Database<HeedThreadMember, Unit>,
    event_threads_db: Database<HeedIdPair, Unit>,
    flags_db: Database<HeedId, SerdeJson<ReviewFlag>>,
    briefings_db: Database<HeedTimestampUuid, SerdeJson<Briefing>>,
    commands_db: Database<HeedTimestampUuid, SerdeJson<CommandRecord>>,
}

impl CatcherHeed {
    fn open_or_create<KC: 'static, DC: 'static>(
        env: &heed::Env,
        wtxn: &mut heed::RwTxn,
        name: &str,
        create: bool,
    ) -> Result<Database<KC, DC>, DatabaseError> {
        if create {
            env.create_database(wtxn, Some(name))
                .map_err(|e| DatabaseError::ConnectionError(e.to_string()))
        } else {
            env.open_database(wtxn, Some(name))
                .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?
                .ok_or_else(|| DatabaseError::ConnectionError(format!("{name} database not found")))
        }
    }

    pub fn new(path: &Path, create_databases: bool) -> Result<Self, DatabaseError> {
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(10 * 1024 * 1024 * 1024) // 10 GB
                .max_dbs(11)
                .open(path)
                .map_err(|e| {
                    DatabaseError::ConnectionError(format!("Failed to open Heed environment: {e}"))
                })?
        };
        let env = Arc::new(env);

        let mut wtxn = env.write_txn().map_err(write_error)?;
        let create = create_databases;
        let store = Self {
            sequences_db: Self::open_or_create(&env, &mut wtxn, "sequences", create)?,
            events_db: Self::open_or_create(&env, &mut wtxn, "events", create)?,
            event_time_db: Self::open_or_create(&env, &mut wtxn, "event_time", create)?,
            pending_db: Self::open_or_create(&env, &mut wtxn, "pending_events", create)?,
            embeddings_db: Self::open_or_create(&env, &mut wtxn, "embeddings", create)?,
            threads_db: Self::open_or_create(&env, &mut wtxn, "threads", create)?,
            thread_events_db: Self::open_or_create(&env, &mut wtxn, "thread_events", create)?,
            event_threads_db: Self::open_or_create(&env, &mut wtxn, "event_threads", create)?,
            flags_db: Self::open_or_create(&env, &mut wtxn, "review_flags", create)?,
            briefings_db: Self::open_or_create(&env, &mut wtxn, "briefings", create)?,
            commands_db: Self::open_or_create(&env, &mut wtxn, "commands", create)?,
            env: env.clone(),
        };
        wtxn.commit().map_err(write_error)?;

        Ok(store)
    }

    fn next_id(&self, wtxn: &mut heed::RwTxn, sequence: &str) -> Result<u64, DatabaseError> {
        let next = self
            .sequences_db
            .get(wtxn, sequence)
            .map_err(query_error)?
            .unwrap_or(0)
            + 1;
        self.sequences_db
            .put(wtxn, sequence, &next)
            .map_err(write_error)?;
        Ok(next)
    }

    fn load_event(&self, rtxn: &heed::RoTxn, event_id: EventId) -> Result<Event, DatabaseError> {
        self.events_db
            .get(rtxn, &event_id.0.into())
            .map_err(query_error)?
            .ok_or(DatabaseError::NotFound)
    }

    fn create_thread_internal(
        &self,
        wtxn: &mut heed::RwTxn,
        input: CreateThread,
    ) -> Result<Thread, DatabaseError> {
        let seed = self.load_event(wtxn, input.seed)?;
        let thread = input.into_thread(ThreadId(self.next_id(wtxn, THREAD_SEQUENCE)?));

        self.threads_db
            .put(wtxn, &thread.id.0.into(), &thread)
            .map_err(write_error)?;
        self.put_membership(wtxn, thread.id, &seed)?;
        Ok(thread)
    }

    fn put_membership(
        &self,
        wtxn: &mut heed::RwTxn,
        thread_id: ThreadId,
        event: &Event,
    ) -> Result<(), DatabaseError> {
        let millis = event.timestamp.timestamp_millis();
        self.thread_events_db
            .put(wtxn, &(thread_id.0, millis, event.id.0).into(), &())
            .map_err(write_error)?;
        self.event_threads_db
            .put(wtxn, &(event.id.0, thread_id.0).into(), &())
            .map_err(write_error)
    }

    fn attach_internal(
        &self,
        wtxn: &mut heed::RwTxn,
        thread_id: ThreadId,
        event_id: EventId,
    ) -> Result<bool, DatabaseError> {
        let mut thread = self
            .threads_db
            .get(wtxn, &thread_id.0.into())
            .map_err(query_error)?
            .ok_or(DatabaseError::NotFound)?;
        let event = self.load_event(wtxn, event_id)?;

        if self
            .event_threads_db
            .get(wtxn, &(event_id.0, thread_id.0).into())
            .map_err(query_error)?
            .is_some()
        {
            return Ok(false);
        }

        self.put_membership(wtxn, thread_id, &event)?;
        thread.touch(Utc::now());
        self.threads_db
            .put(wtxn, &thread_id.0.into(), &thread)
            .map_err(write_error)?;
        Ok(true)
    }

    fn mark_processed_internal(
        &self,
        wtxn: &mut heed::RwTxn,
        event_id: EventId,
    ) -> Result<(), DatabaseError> {
        let mut event = self.load_event(wtxn, event_id)?;
        if event.processed {
            return Ok(());
        }

        event.processed = true;
        self.events_db
            .put(wtxn, &event_id.0.into(), &event)
            .map_err(write_error)?;
        self.pending_db
            .delete(wtxn, &timeline_key(&event))
            .map_err(write_error)?;
        Ok(())
    }

    fn threads_of(
        &self,
        rtxn: &heed::RoTxn,
        event_id: EventId,
    ) -> Result<BTreeSet<ThreadId>, DatabaseError> {
        let range = HeedIdPair::from((event_id.0, 0))..=HeedIdPair::from((event_id.0, u64::MAX));
        let mut threads = BTreeSet::new();
        for item in self
            .event_threads_db
            .range(rtxn, &range)
            .map_err(query_error)?
        {
            let (HeedIdPair((_, thread_id)), ()) = item.map_err(query_error)?;
            threads.insert(ThreadId(thread_id));
        }
        Ok(threads)
    }
}

#[async_trait::async_trait]
impl Db for CatcherHeed {
    async fn append_event(&self, input: NewEvent) -> Result<Event, DatabaseError> {
        let mut wtxn = self.env.write_txn().map_err(write_error)?;

        let event = input.into_event(EventId(self.next_id(&mut wtxn, EVENT_SEQUENCE)?));
        self.events_db
            .put(&mut wtxn, &event.id.0.into(), &event)
            .map_err(write_error)?;
        self.event_time_db
            .put(&mut wtxn, &timeline_key(&event), &())
            .map_err(write_error)?;
        self.pending_db
            .put(&mut wtxn, &timeline_key(&event), &())
            .map_err(write_error)?;

        wtxn.commit().map_err(write_error)?;
        Ok(event)
    }

    async fn get_event(&self, event_id: EventId) -> Result<Event, DatabaseError> {
        let rtxn = self.env.read_txn().map_err(query_error)?;
        self.load_event(&rtxn, event_id)
    }

    async fn list_events(&self, filter: EventFilter) -> Result<Vec<Event>, DatabaseError> {
        let rtxn = self.env.read_txn().map_err(query_error)?;
        let limit = filter.limit.unwrap_or(usize::MAX);

        let mut events = Vec::new();
        for item in self.event_time_db.rev_iter(&rtxn).map_err(query_error)? {
            if events.len() >= limit {
                break;
            }
            let (HeedTimestampId((_, id)), ()) = item.map_err(query_error)?;
            let event = self.load_event(&rtxn, EventId(id))?;
            if filter.source.map_or(true, |source| event.source == source) {
                events.push(event);
            }
        }
        Ok(events)
    }

    async fn list_unprocessed(&self, limit: Option<usize>) -> Result<Vec<Event>, DatabaseError> {
        let rtxn = self.env.read_txn().map_err(query_error)?;
        let limit = limit.unwrap_or(usize::MAX);

        let mut events = Vec::new();
        for item in self.pending_db.iter(&rtxn).map_err(query_error)? {
            if events.len() >= limit {
                break;
            }
            let (HeedTimestampId((_, id)), ()) = item.map_err(query_error)?;
            if self
                .flags_db
                .get(&rtxn, &id.into())
                .map_err(query_error)?
                .is_some()
            {
                continue;
            }
            events.push(self.load_event(&rtxn, EventId(id))?);
        }
        Ok(events)
    }

    async fn mark_processed(&self, event_id: EventId) -> Result<(), DatabaseError> {
        let mut wtxn = self.env.write_txn().map_err(write_error)?;
        self.mark_processed_internal(&mut wtxn, event_id)?;
        wtxn.commit().map_err(write_error)
    }

    async fn list_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, DatabaseError> {
        let rtxn = self.env.read_txn().map_err(query_error)?;
        // Event ids start at 1, so id 0 bounds the window on both sides.
        let range = HeedTimestampId::from((start.timestamp_millis(), 0))
            ..HeedTimestampId::from((end.timestamp_millis(), 0));

        let mut events = Vec::new();
        for item in self
            .event_time_db
            .range(&rtxn, &range)
            .map_err(query_error)?
        {
            let (HeedTimestampId((_, id)), ()) = item.map_err(query_error)?;
            events.push(self.load_event(&rtxn, EventId(id))?);
        }
        Ok(events)
    }

    async fn get_embedding(&self, event_id: EventId) -> Result<Option<Embedding>, DatabaseError> {
        let rtxn = self.env.read_txn().map_err(query_error)?;
        self.embeddings_db
            .get(&rtxn, &event_id.0.into())
            .map_err(query_error)
    }

    async fn list_embeddings(&self, model: &str) -> Result<Vec<Embedding>, DatabaseError> {
        let rtxn = self.env.read_txn().map_err(query_error)?;
        let mut embeddings = Vec::new();
        for item in self.embeddings_db.iter(&rtxn).map_err(query_error)? {
            let (_, embedding) = item.map_err(query_error)?;
            if embedding.model == model {
                embeddings.push(embedding);
            }
        }
        Ok(embeddings)
    }

    async fn create_thread(&self, input: CreateThread) -> Result<Thread, DatabaseError> {
        let mut wtxn = self.env.write_txn().map_err(write_error)?;
        let thread = self.create_thread_internal(&mut wtxn, input)?;
        wtxn.commit().map_err(write_error)?;
        Ok(thread)
    }

    async fn attach(&self, thread_id: ThreadId, event_id: EventId) -> Result<bool, DatabaseError> {
        let mut wtxn = self.env.write_txn().map_err(write_error)?;
        let attached = self.attach_internal(&mut wtxn, thread_id, event_id)?;
        wtxn.commit().map_err(write_error)?;
        Ok(attached)
    }

    async fn thread_memberships(
        &self,
        event_ids: &[EventId],
    ) -> Result<BTreeMap<EventId, BTreeSet<ThreadId>>, DatabaseError> {
        let rtxn = self.env.read_txn().map_err(query_error)?;
        let mut memberships = BTreeMap::new();
        for &event_id in event_ids {
            let threads = self.threads_of(&rtxn, event_id)?;
            if !threads.is_empty() {
                memberships.insert(event_id, threads);
            }
        }
        Ok(memberships)
    }

    async fn commit_assignment(
        &self,
        assignment: Assignment,
    ) -> Result<AssignmentOutcome, DatabaseError> {
        check_assignment(&assignment)?;
        // Dropping the transaction on any error below aborts every write.
        let mut wtxn = self.env.write_txn().map_err(write_error)?;
        let members = assignment_members(&assignment);

        if let Some(embedding) = &assignment.embedding {
            self.embeddings_db
                .put(&mut wtxn, &embedding.event_id.0.into(), embedding)
                .map_err(write_error)?;
        }

        let (thread_id, created, mut attached) = match assignment.placement {
            Placement::Existing(thread_id) => (thread_id, false, Vec::new()),
            Placement::New { thread, .. } => {
                let thread = self.create_thread_internal(&mut wtxn, thread)?;
                (thread.id, true, vec![assignment.event_id])
            }
        };

        for member in members {
            if self.attach_internal(&mut wtxn, thread_id, member)? {
                attached.push(member);
            }
        }

        self.mark_processed_internal(&mut wtxn, assignment.event_id)?;
        wtxn.commit().map_err(write_error)?;

        Ok(AssignmentOutcome {
            thread_id,
            created,
            attached,
        })
    }

    async fn list_threads(&self) -> Result<Vec<Thread>, DatabaseError> {
        let rtxn = self.env.read_txn().map_err(query_error)?;
        let mut threads = Vec::new();
        for item in self.threads_db.iter(&rtxn).map_err(query_error)? {
            let (_, thread) = item.map_err(query_error)?;
            threads.push(thread);
        }
        Ok(threads)
    }

    async fn get_thread(&self, thread_id: ThreadId) -> Result<Thread, DatabaseError> {
        let rtxn = self.env.read_txn().map_err(query_error)?;
        self.threads_db
            .get(&rtxn, &thread_id.0.into())
            .map_err(query_error)?
            .ok_or(DatabaseError::NotFound)
    }

    async fn get_thread_events(&self, thread_id: ThreadId) -> Result<Vec<Event>, DatabaseError> {
        let rtxn = self.env.read_txn().map_err(query_error)?;
        if self
            .threads_db
            .get(&rtxn, &thread_id.0.into())
            .map_err(query_error)?
            .is_none()
        {
            return Err(DatabaseError::NotFound);
        }

        let range = HeedThreadMember::from((thread_id.0, i64::MIN, 0))
            ..=HeedThreadMember::from((thread_id.0, i64::MAX, u64::MAX));
        let mut events = Vec::new();
        for item in self
            .thread_events_db
            .range(&rtxn, &range)
            .map_err(query_error)?
        {
            let (HeedThreadMember((_, _, event_id)), ()) = item.map_err(query_error)?;
            events.push(self.load_event(&rtxn, EventId(event_id))?);
        }
        Ok(events)
    }

    async fn flag_for_review(
        &self,
        event_id: EventId,
        reason: String,
    ) -> Result<(), DatabaseError> {
        let mut wtxn = self.env.write_txn().map_err(write_error)?;
        self.load_event(&wtxn, event_id)?;
        self.flags_db
            .put(
                &mut wtxn,
                &event_id.0.into(),
                &ReviewFlag::new(event_id, reason),
            )
            .map_err(write_error)?;
        wtxn.commit().map_err(write_error)
    }

    async fn list_flagged(&self) -> Result<Vec<ReviewFlag>, DatabaseError> {
        let rtxn = self.env.read_txn().map_err(query_error)?;
        let mut flags = Vec::new();
        for item in self.flags_db.iter(&rtxn).map_err(query_error)? {
            let (_, flag) = item.map_err(query_error)?;
            flags.push(flag);
        }
        Ok(flags)
    }

    async fn clear_flag(&self, event_id: EventId) -> Result<bool, DatabaseError> {
        let mut wtxn = self.env.write_txn().map_err(write_error)?;
        let cleared = self
            .flags_db
            .delete(&mut wtxn, &event_id.0.into())
            .map_err(write_error)?;
        wtxn.commit().map_err(write_error)?;
        Ok(cleared)
    }

    async fn store_briefing(
        &self,
        kind: BriefingKind,
        content: String,
    ) -> Result<Briefing, DatabaseError> {
        let briefing = Briefing::new(kind, content);
        let mut wtxn = self.env.write_txn().map_err(write_error)?;
        self.briefings_db
            .put(
                &mut wtxn,
                &(briefing.created_at.timestamp_millis(), briefing.id).into(),
                &briefing,
            )
            .map_err(write_error)?;
        wtxn.commit().map_err(write_error)?;
        Ok(briefing)
    }

    async fn list_briefings(&self, limit: Option<usize>) -> Result<Vec<Briefing>, DatabaseError> {
        let rtxn = self.env.read_txn().map_err(query_error)?;
        let mut briefings = Vec::new();
        for item in self
            .briefings_db
            .rev_iter(&rtxn)
            .map_err(query_error)?
            .take(limit.unwrap_or(usize::MAX))
        {
            let (_, briefing) = item.map_err(query_error)?;
            briefings.push(briefing);
        }
        Ok(briefings)
    }

    async fn record_command(&self, record: CommandRecord) -> Result<(), DatabaseError> {
        let mut wtxn = self.env.write_txn().map_err(write_error)?;
        self.commands_db
            .put(
                &mut wtxn,
                &(record.created_at.timestamp_millis(), record.id).into(),
                &record,
            )
            .map_err(write_error)?;
        wtxn.commit().map_err(write_error)
    }

    async fn counts(&self) -> Result<StoreCounts, DatabaseError> {
        let rtxn = self.env.read_txn().map_err(query_error)?;
        Ok(StoreCounts {
            total_events: self.events_db.len(&rtxn).map_err(query_error)?,
            unprocessed_events: self.pending_db.len(&rtxn).map_err(query_error)?,
            flagged_events: self.flags_db.len(&rtxn).map_err(query_error)?,
            total_threads: self.threads_db.len(&rtxn).map_err(query_error)?,
            total_briefings: self.briefings_db.len(&rtxn).map_err(query_error)?,
            total_commands: self.commands_db.len(&rtxn).map_err(query_error)?,
        })
    }
}
