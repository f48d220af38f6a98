use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};

use catcher_database::{Assignment, AssignmentOutcome, DatabaseError, Db, Placement};
use catcher_domain::{
    embedding::Embedding,
    event::{Event, EventId},
    thread::{CreateThread, ThreadId},
};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    embedder::Embedder,
    error::EventFailure,
    similarity::{rank, Match, DEFAULT_SIMILARITY_THRESHOLD},
    utils::content::preview,
};

const TITLE_PREVIEW_CHARS: usize = 60;

#[derive(Clone, Debug)]
pub struct OrganizerConfig {
    pub similarity_threshold: f32,
    pub embed_timeout: Duration,
    /// Caps how many pending events one pass takes on. `None` drains them all.
    pub batch_limit: Option<usize>,
    /// How many look-alikes join a freshly started thread.
    pub max_seed_matches: usize,
}

impl Default for OrganizerConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            embed_timeout: Duration::from_secs(10),
            batch_limit: None,
            max_seed_matches: 3,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct OrganizeReport {
    pub processed: usize,
    pub threads_created: usize,
    pub threads_extended: usize,
    /// Left unprocessed after a provider failure; picked up again next pass.
    pub skipped: Vec<EventId>,
    /// Left unprocessed and flagged for manual review.
    pub flagged: Vec<EventId>,
    /// The pass stopped early because shutdown was requested.
    pub interrupted: bool,
}

impl OrganizeReport {
    fn record(&mut self, outcome: &AssignmentOutcome) {
        self.processed += 1;
        if outcome.created {
            self.threads_created += 1;
        } else if !outcome.attached.is_empty() {
            self.threads_extended += 1;
        }
    }
}

enum StepError {
    Event(EventFailure),
    Store(DatabaseError),
}

impl From<EventFailure> for StepError {
    fn from(failure: EventFailure) -> Self {
        StepError::Event(failure)
    }
}

impl From<DatabaseError> for StepError {
    fn from(err: DatabaseError) -> Self {
        StepError::Store(err)
    }
}

/// Assigns unprocessed events to threads of similar events.
///
/// Clones share one pass guard, so at most one pass runs against the store
/// at a time no matter how many handles trigger it.
#[derive(Clone)]
pub struct Organizer {
    db: Arc<dyn Db>,
    embedder: Arc<dyn Embedder>,
    config: OrganizerConfig,
    pass: Arc<Mutex<()>>,
}

impl Organizer {
    pub fn new(db: Arc<dyn Db>, embedder: Arc<dyn Embedder>, config: OrganizerConfig) -> Self {
        Self {
            db,
            embedder,
            config,
            pass: Arc::new(Mutex::new(())),
        }
    }

    /// Runs a pass, waiting for any pass already in flight to finish first.
    pub async fn organize(&self) -> Result<OrganizeReport, DatabaseError> {
        self.organize_until(&CancellationToken::new()).await
    }

    /// Like [`Organizer::organize`], stopping between events once `shutdown`
    /// is cancelled.
    pub async fn organize_until(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<OrganizeReport, DatabaseError> {
        let _pass = self.pass.lock().await;
        self.run_pass(shutdown).await
    }

    /// Runs a pass unless one is already in flight, in which case `None`.
    pub async fn try_organize(&self) -> Option<Result<OrganizeReport, DatabaseError>> {
        let _pass = self.pass.try_lock().ok()?;
        Some(self.run_pass(&CancellationToken::new()).await)
    }

    async fn run_pass(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<OrganizeReport, DatabaseError> {
        let mut report = OrganizeReport::default();
        let pending = self.db.list_unprocessed(self.config.batch_limit).await?;
        if pending.is_empty() {
            tracing::debug!("no pending events to organize");
            return Ok(report);
        }

        let model = self.embedder.model().to_owned();
        let dimensions = self.embedder.dimensions();
        let mut index: BTreeMap<EventId, Vec<f32>> = BTreeMap::new();
        for embedding in self.db.list_embeddings(&model).await? {
            if embedding.dimensions() != dimensions {
                tracing::warn!(
                    "Ignoring stored embedding of event {}: {} dimensions, expected {}",
                    embedding.event_id,
                    embedding.dimensions(),
                    dimensions
                );
                continue;
            }
            index.insert(embedding.event_id, embedding.vector);
        }

        tracing::debug!(
            "organizing {} pending events against {} embeddings",
            pending.len(),
            index.len()
        );

        for event in pending {
            if shutdown.is_cancelled() {
                tracing::info!("organize pass interrupted before event {}", event.id);
                report.interrupted = true;
                break;
            }

            let step = match self.assign(&event, &model, &index).await {
                Ok((assignment, vector)) => self
                    .db
                    .commit_assignment(assignment)
                    .await
                    .map(|outcome| (outcome, vector))
                    .map_err(StepError::from),
                Err(err) => Err(err),
            };

            match step {
                Ok((outcome, vector)) => {
                    tracing::debug!(
                        "event {} placed in thread {} (created: {}, attached: {:?})",
                        event.id,
                        outcome.thread_id,
                        outcome.created,
                        outcome.attached
                    );
                    index.insert(event.id, vector);
                    report.record(&outcome);
                }
                Err(StepError::Event(failure)) if failure.is_transient() => {
                    tracing::warn!("Skipping event {} until next pass: {}", event.id, failure);
                    report.skipped.push(event.id);
                }
                Err(StepError::Event(failure)) => {
                    self.flag(&event, failure.to_string(), &mut report).await?;
                }
                Err(StepError::Store(err)) if err.is_record_level() => {
                    self.flag(&event, err.to_string(), &mut report).await?;
                }
                Err(StepError::Store(err)) => {
                    tracing::error!("Organize pass aborted at event {}: {}", event.id, err);
                    return Err(err);
                }
            }
        }

        tracing::info!(
            "organize pass done: {} processed, {} threads created, {} extended, {} skipped, {} flagged",
            report.processed,
            report.threads_created,
            report.threads_extended,
            report.skipped.len(),
            report.flagged.len()
        );

        Ok(report)
    }

    async fn flag(
        &self,
        event: &Event,
        reason: String,
        report: &mut OrganizeReport,
    ) -> Result<(), DatabaseError> {
        tracing::warn!("Flagging event {} for review: {}", event.id, reason);
        self.db.flag_for_review(event.id, reason).await?;
        report.flagged.push(event.id);
        Ok(())
    }

    /// Decides where `event` goes. Returns the assignment to commit and the
    /// vector to add to the in-pass index once it is committed.
    async fn assign(
        &self,
        event: &Event,
        model: &str,
        index: &BTreeMap<EventId, Vec<f32>>,
    ) -> Result<(Assignment, Vec<f32>), StepError> {
        let (embedding, fresh) = self.embedding_for(event, model).await?;

        let candidates = index
            .iter()
            .filter(|(id, _)| **id != event.id)
            .map(|(id, vector)| (*id, vector.as_slice()));
        let matches = rank(
            &embedding.vector,
            candidates,
            self.config.similarity_threshold,
        )
        .map_err(EventFailure::from)?;

        let memberships = if matches.is_empty() {
            BTreeMap::new()
        } else {
            let ids: Vec<EventId> = matches.iter().map(|m| m.event_id).collect();
            self.db.thread_memberships(&ids).await?
        };

        let placement = place(event, &matches, &memberships, self.config.max_seed_matches);
        let vector = embedding.vector.clone();

        Ok((
            Assignment {
                event_id: event.id,
                embedding: fresh.then_some(embedding),
                placement,
            },
            vector,
        ))
    }

    /// The stored embedding when one exists for the current model, otherwise
    /// a fresh one from the provider. The flag tells whether it is fresh.
    async fn embedding_for(
        &self,
        event: &Event,
        model: &str,
    ) -> Result<(Embedding, bool), StepError> {
        let dimensions = self.embedder.dimensions();
        if let Some(stored) = self.db.get_embedding(event.id).await? {
            if stored.model == model && stored.dimensions() == dimensions {
                return Ok((stored, false));
            }
        }

        let vector = tokio::time::timeout(
            self.config.embed_timeout,
            self.embedder.embed(&event.content),
        )
        .await
        .map_err(|_| EventFailure::Timeout(self.config.embed_timeout))?
        .map_err(EventFailure::from)?;

        if vector.is_empty() {
            return Err(EventFailure::DataIntegrity("embedding is empty".into()).into());
        }
        if vector.len() != dimensions {
            return Err(EventFailure::DataIntegrity(format!(
                "embedding has {} dimensions, expected {}",
                vector.len(),
                dimensions
            ))
            .into());
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(
                EventFailure::DataIntegrity("embedding has non-finite components".into()).into(),
            );
        }

        Ok((Embedding::new(event.id, vector, model), true))
    }
}

/// Thread selection policy.
///
/// The thread holding the best-scoring match wins, lowest thread id on ties.
/// When no match is threaded yet, a new thread starts with the event and its
/// best `max_seed_matches` look-alikes; with no matches at all it starts alone.
fn place(
    event: &Event,
    matches: &[Match],
    memberships: &BTreeMap<EventId, BTreeSet<ThreadId>>,
    max_seed_matches: usize,
) -> Placement {
    let best = matches
        .iter()
        .flat_map(|m| {
            memberships
                .get(&m.event_id)
                .into_iter()
                .flatten()
                .map(move |thread_id| (m.score, *thread_id))
        })
        .max_by(|a, b| a.0.total_cmp(&b.0).then_with(|| b.1.cmp(&a.1)));

    if let Some((_, thread_id)) = best {
        return Placement::Existing(thread_id);
    }

    Placement::New {
        thread: CreateThread {
            title: format!(
                "{}: {}",
                event.source.label(),
                preview(&event.content, TITLE_PREVIEW_CHARS)
            ),
            description: format!("Started from {} event #{}", event.source, event.id),
            seed: event.id,
        },
        companions: matches
            .iter()
            .take(max_seed_matches)
            .map(|m| m.event_id)
            .collect(),
    }
}
