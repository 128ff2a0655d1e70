//! Durable work queue owned by a single actor task.
//!
//! The queue is persisted as one JSON envelope under
//! [`QUEUE_STATE_KEY`] carrying a SHA-256 digest of the serialized queue.
//! Every mutation goes through [`CheckpointHandle`]: the actor applies it to
//! a copy, persists the copy and only then makes it current, so the stored
//! blob and the in-memory queue never disagree.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use orgbrief_shared::{
    EntityId, EntityOutcome, OrgBriefError, ReportPayload, Result, StageFlags, WorkDescriptor,
};
use orgbrief_storage::QUEUE_STATE_KEY;

use crate::collaborators::StateStore;

const ENVELOPE_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Queue + envelope
// ---------------------------------------------------------------------------

/// Ordered list of pending work descriptors, front first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkQueue {
    pub descriptors: VecDeque<WorkDescriptor>,
}

impl WorkQueue {
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Entities still waiting across all descriptors.
    pub fn pending_entities(&self) -> usize {
        self.descriptors.iter().map(|d| d.entities.len()).sum()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    digest: String,
    queue: String,
}

fn digest(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Serialize `queue` into its persisted envelope.
pub fn seal(queue: &WorkQueue) -> Result<String> {
    let payload = serde_json::to_string(queue)
        .map_err(|e| OrgBriefError::Storage(format!("serialize queue: {e}")))?;
    let envelope = Envelope {
        version: ENVELOPE_VERSION,
        digest: digest(&payload),
        queue: payload,
    };
    serde_json::to_string(&envelope)
        .map_err(|e| OrgBriefError::Storage(format!("serialize envelope: {e}")))
}

/// Decode and verify a persisted envelope.
pub fn open(raw: &str) -> Result<WorkQueue> {
    let envelope: Envelope = serde_json::from_str(raw)
        .map_err(|e| OrgBriefError::CorruptCheckpoint(format!("undecodable envelope: {e}")))?;
    if envelope.version != ENVELOPE_VERSION {
        return Err(OrgBriefError::CorruptCheckpoint(format!(
            "unsupported envelope version {}",
            envelope.version
        )));
    }
    if digest(&envelope.queue) != envelope.digest {
        return Err(OrgBriefError::CorruptCheckpoint("digest mismatch".into()));
    }
    let queue: WorkQueue = serde_json::from_str(&envelope.queue)
        .map_err(|e| OrgBriefError::CorruptCheckpoint(format!("undecodable queue: {e}")))?;
    if queue.descriptors.iter().any(|d| d.entities.is_empty()) {
        return Err(OrgBriefError::CorruptCheckpoint(
            "descriptor with no entities".into(),
        ));
    }
    Ok(queue)
}

// ---------------------------------------------------------------------------
// Front-of-queue view
// ---------------------------------------------------------------------------

/// The entity a resume invocation is about to process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontItem {
    pub descriptor_id: Uuid,
    pub entity: EntityId,
    pub stages: StageFlags,
    /// Invocations that started this entity, this one included.
    pub attempts: u32,
    /// Whether this is the descriptor's last entity.
    pub is_last: bool,
    pub report: Option<ReportPayload>,
    /// Entities that get a report when the descriptor drains.
    pub report_targets: Vec<EntityId>,
}

impl FrontItem {
    fn from_descriptor(descriptor: &WorkDescriptor, entity: EntityId) -> Self {
        let report_targets = descriptor.report_targets(&entity);
        Self {
            descriptor_id: descriptor.id,
            entity,
            stages: descriptor.stages,
            attempts: descriptor.front_attempts,
            is_last: descriptor.entities.len() == 1,
            report: descriptor.report.clone(),
            report_targets,
        }
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

enum Command {
    Reload(oneshot::Sender<Result<WorkQueue>>),
    Snapshot(oneshot::Sender<Result<WorkQueue>>),
    Submit(WorkDescriptor, oneshot::Sender<Result<usize>>),
    BeginFront(oneshot::Sender<Result<Option<FrontItem>>>),
    Commit {
        descriptor_id: Uuid,
        outcome: EntityOutcome,
        reply: oneshot::Sender<Result<()>>,
    },
    Clear(oneshot::Sender<Result<()>>),
}

struct CheckpointActor {
    store: Arc<dyn StateStore>,
    queue: Option<WorkQueue>,
}

impl CheckpointActor {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            // A dropped receiver only means the caller gave up waiting.
            match command {
                Command::Reload(reply) => {
                    self.queue = None;
                    let _ = reply.send(self.loaded().await.cloned());
                }
                Command::Snapshot(reply) => {
                    let _ = reply.send(self.loaded().await.cloned());
                }
                Command::Submit(descriptor, reply) => {
                    let _ = reply.send(self.submit(descriptor).await);
                }
                Command::BeginFront(reply) => {
                    let _ = reply.send(self.begin_front().await);
                }
                Command::Commit {
                    descriptor_id,
                    outcome,
                    reply,
                } => {
                    let _ = reply.send(self.commit(descriptor_id, outcome).await);
                }
                Command::Clear(reply) => {
                    let _ = reply.send(self.clear().await);
                }
            }
        }
        debug!("checkpoint actor stopped");
    }

    async fn loaded(&mut self) -> Result<&WorkQueue> {
        if self.queue.is_none() {
            let queue = match self.store.load(QUEUE_STATE_KEY).await? {
                Some(raw) => open(&raw)?,
                None => WorkQueue::default(),
            };
            self.queue = Some(queue);
        }
        self.queue
            .as_ref()
            .ok_or_else(|| OrgBriefError::Storage("checkpoint not loaded".into()))
    }

    /// Persist `next`, then make it current.
    async fn replace(&mut self, next: WorkQueue) -> Result<()> {
        if next.is_empty() {
            self.store.remove(QUEUE_STATE_KEY).await?;
        } else {
            self.store.store(QUEUE_STATE_KEY, &seal(&next)?).await?;
        }
        self.queue = Some(next);
        Ok(())
    }

    async fn submit(&mut self, descriptor: WorkDescriptor) -> Result<usize> {
        if descriptor.entities.is_empty() {
            return Err(OrgBriefError::validation("descriptor has no entities"));
        }
        let mut next = self.loaded().await?.clone();
        next.descriptors.push_back(descriptor);
        let len = next.descriptors.len();
        self.replace(next).await?;
        Ok(len)
    }

    async fn begin_front(&mut self) -> Result<Option<FrontItem>> {
        let mut next = self.loaded().await?.clone();
        let Some(descriptor) = next.descriptors.front_mut() else {
            return Ok(None);
        };
        let Some(entity) = descriptor.entities.front().cloned() else {
            return Err(OrgBriefError::CorruptCheckpoint(
                "descriptor with no entities".into(),
            ));
        };
        descriptor.front_attempts += 1;
        let item = FrontItem::from_descriptor(descriptor, entity);
        self.replace(next).await?;
        Ok(Some(item))
    }

    async fn commit(&mut self, descriptor_id: Uuid, outcome: EntityOutcome) -> Result<()> {
        let mut next = self.loaded().await?.clone();
        let Some(descriptor) = next.descriptors.front_mut() else {
            return Err(OrgBriefError::not_found("queued descriptor"));
        };
        if descriptor.id != descriptor_id {
            return Err(OrgBriefError::validation(format!(
                "descriptor {descriptor_id} is not at the front of the queue"
            )));
        }
        if descriptor.entities.front() != Some(&outcome.entity) {
            return Err(OrgBriefError::validation(format!(
                "entity '{}' is not at the front of descriptor {descriptor_id}",
                outcome.entity
            )));
        }

        descriptor.entities.pop_front();
        descriptor.processed.push(outcome);
        descriptor.front_attempts = 0;
        if descriptor.entities.is_empty() {
            info!(%descriptor_id, "descriptor drained");
            next.descriptors.pop_front();
        }
        self.replace(next).await
    }

    async fn clear(&mut self) -> Result<()> {
        self.store.remove(QUEUE_STATE_KEY).await?;
        self.queue = Some(WorkQueue::default());
        warn!("checkpoint cleared");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable sender side of the checkpoint actor.
#[derive(Clone)]
pub struct CheckpointHandle {
    tx: mpsc::Sender<Command>,
}

impl CheckpointHandle {
    /// Spawn the actor on the current Tokio runtime.
    pub fn spawn(store: Arc<dyn StateStore>) -> Self {
        let (tx, rx) = mpsc::channel(16);
        let actor = CheckpointActor { store, queue: None };
        tokio::spawn(actor.run(rx));
        Self { tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| OrgBriefError::Storage("checkpoint actor stopped".into()))?;
        rx.await
            .map_err(|_| OrgBriefError::Storage("checkpoint actor dropped a reply".into()))?
    }

    /// Discard the cached queue and read it again from the store.
    pub async fn reload(&self) -> Result<WorkQueue> {
        self.request(Command::Reload).await
    }

    pub async fn snapshot(&self) -> Result<WorkQueue> {
        self.request(Command::Snapshot).await
    }

    /// Append a descriptor; returns the queue length.
    pub async fn submit(&self, descriptor: WorkDescriptor) -> Result<usize> {
        self.request(|reply| Command::Submit(descriptor, reply)).await
    }

    /// Count an attempt on the front entity and return it.
    pub async fn begin_front(&self) -> Result<Option<FrontItem>> {
        self.request(Command::BeginFront).await
    }

    /// Pop the front entity, recording its outcome.
    pub async fn commit(&self, descriptor_id: Uuid, outcome: EntityOutcome) -> Result<()> {
        self.request(|reply| Command::Commit {
            descriptor_id,
            outcome,
            reply,
        })
        .await
    }

    pub async fn clear(&self) -> Result<()> {
        self.request(Command::Clear).await
    }
}
