pub mod error;

use std::collections::{BTreeMap, BTreeSet};

pub use async_trait::async_trait;
pub use error::DatabaseError;

use catcher_domain::{
    briefing::{Briefing, BriefingKind},
    command::CommandRecord,
    embedding::Embedding,
    event::{Event, EventFilter, EventId, NewEvent},
    status::{ReviewFlag, StoreCounts},
    thread::{CreateThread, Thread, ThreadId},
};
use chrono::{DateTime, Utc};

/// Where the organizer decided an event belongs.
#[derive(Clone, Debug, PartialEq)]
pub enum Placement {
    Existing(ThreadId),
    /// Start a thread seeded by the event, pulling in previously unthreaded
    /// look-alikes as well.
    New {
        thread: CreateThread,
        companions: Vec<EventId>,
    },
}

/// Everything the organizer writes for one event. Stores apply it as a single
/// unit: either all of it lands, or none of it does.
#[derive(Clone, Debug)]
pub struct Assignment {
    pub event_id: EventId,
    /// Set when the embedding was computed during this pass.
    pub embedding: Option<Embedding>,
    pub placement: Placement,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AssignmentOutcome {
    pub thread_id: ThreadId,
    pub created: bool,
    /// Events that were newly attached; already-present members are omitted.
    pub attached: Vec<EventId>,
}

#[async_trait]
pub trait Db: Send + Sync {
    async fn append_event(&self, input: NewEvent) -> Result<Event, DatabaseError>;

    async fn get_event(&self, event_id: EventId) -> Result<Event, DatabaseError>;

    /// Newest first.
    async fn list_events(&self, filter: EventFilter) -> Result<Vec<Event>, DatabaseError>;

    /// Unprocessed events that are not flagged for review, oldest first.
    async fn list_unprocessed(&self, limit: Option<usize>) -> Result<Vec<Event>, DatabaseError>;

    async fn mark_processed(&self, event_id: EventId) -> Result<(), DatabaseError>;

    /// Events with `start <= timestamp < end`, oldest first.
    async fn list_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, DatabaseError>;

    async fn get_embedding(&self, event_id: EventId) -> Result<Option<Embedding>, DatabaseError>;

    async fn list_embeddings(&self, model: &str) -> Result<Vec<Embedding>, DatabaseError>;

    async fn create_thread(&self, input: CreateThread) -> Result<Thread, DatabaseError>;

    /// Returns `false` when the event was already a member.
    async fn attach(&self, thread_id: ThreadId, event_id: EventId) -> Result<bool, DatabaseError>;

    async fn thread_memberships(
        &self,
        event_ids: &[EventId],
    ) -> Result<BTreeMap<EventId, BTreeSet<ThreadId>>, DatabaseError>;

    async fn threads_containing(
        &self,
        event_ids: &[EventId],
    ) -> Result<BTreeSet<ThreadId>, DatabaseError> {
        Ok(self
            .thread_memberships(event_ids)
            .await?
            .into_values()
            .flatten()
            .collect())
    }

    async fn commit_assignment(
        &self,
        assignment: Assignment,
    ) -> Result<AssignmentOutcome, DatabaseError>;

    async fn list_threads(&self) -> Result<Vec<Thread>, DatabaseError>;

    async fn get_thread(&self, thread_id: ThreadId) -> Result<Thread, DatabaseError>;

    /// Members ordered by event timestamp.
    async fn get_thread_events(&self, thread_id: ThreadId) -> Result<Vec<Event>, DatabaseError>;

    async fn flag_for_review(&self, event_id: EventId, reason: String)
        -> Result<(), DatabaseError>;

    async fn list_flagged(&self) -> Result<Vec<ReviewFlag>, DatabaseError>;

    /// Returns `false` when the event was not flagged.
    async fn clear_flag(&self, event_id: EventId) -> Result<bool, DatabaseError>;

    async fn store_briefing(
        &self,
        kind: BriefingKind,
        content: String,
    ) -> Result<Briefing, DatabaseError>;

    /// Newest first.
    async fn list_briefings(&self, limit: Option<usize>) -> Result<Vec<Briefing>, DatabaseError>;

    async fn record_command(&self, record: CommandRecord) -> Result<(), DatabaseError>;

    async fn counts(&self) -> Result<StoreCounts, DatabaseError>;
}

/// Rejects assignments whose parts disagree about which event they are for.
pub fn check_assignment(assignment: &Assignment) -> Result<(), DatabaseError> {
    if let Some(embedding) = &assignment.embedding {
        if embedding.event_id != assignment.event_id {
            return Err(DatabaseError::InvalidInput(format!(
                "embedding of event {} assigned to event {}",
                embedding.event_id, assignment.event_id
            )));
        }
    }
    if let Placement::New { thread, .. } = &assignment.placement {
        if thread.seed != assignment.event_id {
            return Err(DatabaseError::InvalidInput(format!(
                "thread seeded by event {} assigned to event {}",
                thread.seed, assignment.event_id
            )));
        }
    }
    Ok(())
}

/// The events an assignment attaches: the event itself first, then any
/// companions, without duplicates.
pub fn assignment_members(assignment: &Assignment) -> Vec<EventId> {
    let mut members = vec![assignment.event_id];
    if let Placement::New { companions, .. } = &assignment.placement {
        for companion in companions {
            if !members.contains(companion) {
                members.push(*companion);
            }
        }
    }
    members
}
