//! Time-boxed, resumable processing of the work queue.
//!
//! `submit` appends a descriptor and (re)creates the recurring trigger.
//! Each `resume` call processes front entities one at a time until the queue
//! empties, the batch size is reached or the time budget runs out. The
//! checkpoint is persisted after every entity, so a killed invocation loses
//! at most the entity in flight, which the next invocation starts again.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use orgbrief_completion::Sleeper;
use orgbrief_shared::{
    EntityId, EntityOutcome, ReportPayload, Result, SchedulerLimits, Stage, StageFlags,
    StageOutcome, StageStatus, WorkDescriptor,
};

use crate::checkpoint::{CheckpointHandle, FrontItem, WorkQueue};
use crate::collaborators::{Clock, TriggerRegistry};
use crate::stages::StageExecutor;

/// Name of the recurring trigger that calls [`Scheduler::resume`].
pub const RESUME_HANDLER: &str = "resume";

/// Result of one `resume` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// Work remains; the trigger stays registered.
    Continue { processed: u32 },
    /// The queue is empty and the trigger was removed.
    Done { processed: u32 },
}

impl ResumeOutcome {
    pub fn processed(&self) -> u32 {
        match self {
            Self::Continue { processed } | Self::Done { processed } => *processed,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}

/// Queue contents plus trigger state, for `status`.
#[derive(Debug, Clone)]
pub struct QueueStatus {
    pub queue: WorkQueue,
    pub trigger_active: bool,
}

/// Progress callback for reporting scheduler activity.
pub trait SchedulerProgress: Send + Sync {
    /// Called before the first stage of an entity.
    fn entity_started(&self, entity: &EntityId, attempt: u32);
    /// Called after each stage.
    fn stage_finished(&self, entity: &EntityId, stage: Stage, status: &StageStatus);
    /// Called once the entity's outcome is checkpointed.
    fn entity_finished(&self, outcome: &EntityOutcome);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl SchedulerProgress for SilentProgress {
    fn entity_started(&self, _entity: &EntityId, _attempt: u32) {}
    fn stage_finished(&self, _entity: &EntityId, _stage: Stage, _status: &StageStatus) {}
    fn entity_finished(&self, _outcome: &EntityOutcome) {}
}

pub struct Scheduler {
    executor: Arc<StageExecutor>,
    checkpoint: CheckpointHandle,
    triggers: Arc<dyn TriggerRegistry>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    limits: SchedulerLimits,
}

impl Scheduler {
    pub fn new(
        executor: Arc<StageExecutor>,
        checkpoint: CheckpointHandle,
        triggers: Arc<dyn TriggerRegistry>,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
        limits: SchedulerLimits,
    ) -> Self {
        Self {
            executor,
            checkpoint,
            triggers,
            clock,
            sleeper,
            limits,
        }
    }

    /// Queue `entities` for `stages` and make sure the trigger exists.
    ///
    /// Returns a human-readable acknowledgement.
    #[instrument(skip_all, fields(entities = entities.len()))]
    pub async fn submit(
        &self,
        entities: Vec<EntityId>,
        stages: StageFlags,
        report: Option<ReportPayload>,
    ) -> Result<String> {
        let count = entities.len();
        let descriptor = WorkDescriptor::new(entities, stages, report, self.clock.now())?;
        let id = descriptor.id;
        let pending = self.checkpoint.submit(descriptor).await?;
        self.triggers
            .ensure(RESUME_HANDLER, self.limits.trigger_period)
            .await?;

        info!(%id, count, pending, "work submitted");
        Ok(format!(
            "Queued {count} entit{} as {id}; {pending} descriptor(s) pending.",
            if count == 1 { "y" } else { "ies" }
        ))
    }

    /// Process front entities until the queue empties or a limit is hit.
    ///
    /// Only an unreadable checkpoint makes this fail; stage failures are
    /// recorded in the entity outcome and processing moves on.
    #[instrument(skip_all)]
    pub async fn resume(&self, progress: &dyn SchedulerProgress) -> Result<ResumeOutcome> {
        let started = self.clock.now();
        self.checkpoint.reload().await?;

        let mut processed = 0u32;
        loop {
            if self.checkpoint.snapshot().await?.is_empty() {
                self.triggers.remove(RESUME_HANDLER).await?;
                info!(processed, "queue empty, trigger removed");
                return Ok(ResumeOutcome::Done { processed });
            }

            // Every invocation finishes at least one entity, whatever the budget.
            let elapsed = (self.clock.now() - started).to_std().unwrap_or_default();
            let over_budget = processed > 0 && elapsed > self.limits.time_budget;
            if processed >= self.limits.batch_size || over_budget {
                info!(processed, elapsed_secs = elapsed.as_secs(), "yielding");
                return Ok(ResumeOutcome::Continue { processed });
            }

            let Some(front) = self.checkpoint.begin_front().await? else {
                continue;
            };
            progress.entity_started(&front.entity, front.attempts);

            let mut outcome = if front.attempts > self.limits.max_entity_attempts {
                self.retire(&front)
            } else {
                self.process(&front, progress).await
            };

            if front.is_last && front.stages.report_generation {
                let report = self.generate_reports(&front, progress).await;
                outcome.stages.push(report);
            }

            self.checkpoint
                .commit(front.descriptor_id, outcome.clone())
                .await?;
            progress.entity_finished(&outcome);
            processed += 1;

            self.sleeper.sleep(self.limits.rate_limit).await;
        }
    }

    async fn process(&self, front: &FrontItem, progress: &dyn SchedulerProgress) -> EntityOutcome {
        let mut stages = Vec::new();
        for stage in front.stages.entity_stages() {
            let status = self.executor.run_stage(&front.entity, stage, None).await;
            progress.stage_finished(&front.entity, stage, &status);
            stages.push(StageOutcome { stage, status });
        }
        EntityOutcome {
            entity: front.entity.clone(),
            stages,
            finished_at: self.clock.now(),
        }
    }

    /// Give up on an entity that keeps killing its invocation.
    fn retire(&self, front: &FrontItem) -> EntityOutcome {
        let reason = format!(
            "abandoned after {} interrupted attempts",
            front.attempts - 1
        );
        warn!(entity = %front.entity, attempts = front.attempts, "retiring entity");
        EntityOutcome {
            entity: front.entity.clone(),
            stages: front
                .stages
                .entity_stages()
                .into_iter()
                .map(|stage| StageOutcome {
                    stage,
                    status: StageStatus::Failed {
                        reason: reason.clone(),
                    },
                })
                .collect(),
            finished_at: self.clock.now(),
        }
    }

    /// Render reports for every target of a draining descriptor.
    async fn generate_reports(
        &self,
        front: &FrontItem,
        progress: &dyn SchedulerProgress,
    ) -> StageOutcome {
        let template = front.report.as_ref().and_then(|r| r.template.as_deref());
        let mut failures = Vec::new();
        let mut generated = 0usize;

        for target in &front.report_targets {
            let status = self
                .executor
                .run_stage(target, Stage::ReportGeneration, template)
                .await;
            progress.stage_finished(target, Stage::ReportGeneration, &status);
            match status {
                StageStatus::Completed => generated += 1,
                StageStatus::Failed { reason } | StageStatus::Skipped { reason } => {
                    failures.push(format!("{target}: {reason}"));
                }
            }
        }

        info!(generated, failed = failures.len(), "reports generated");
        let status = if failures.is_empty() {
            StageStatus::Completed
        } else {
            StageStatus::Failed {
                reason: failures.join("; "),
            }
        };
        StageOutcome {
            stage: Stage::ReportGeneration,
            status,
        }
    }

    /// Drop all queued work and the trigger.
    pub async fn clear(&self) -> Result<()> {
        self.checkpoint.clear().await?;
        self.triggers.remove(RESUME_HANDLER).await
    }

    pub async fn status(&self) -> Result<QueueStatus> {
        Ok(QueueStatus {
            queue: self.checkpoint.reload().await?,
            trigger_active: self.triggers.exists(RESUME_HANDLER).await?,
        })
    }

    /// Host loop standing in for the recurring trigger: resume, wait one
    /// trigger period, repeat until done or the trigger disappears.
    ///
    /// Returns the number of entities processed.
    pub async fn run_until_drained(&self, progress: &dyn SchedulerProgress) -> Result<u32> {
        let mut total = 0;
        loop {
            let outcome = self.resume(progress).await?;
            total += outcome.processed();
            if outcome.is_done() {
                return Ok(total);
            }
            if !self.triggers.exists(RESUME_HANDLER).await? {
                warn!("trigger removed while work remains, stopping");
                return Ok(total);
            }
            self.sleeper.sleep(self.trigger_period()).await;
        }
    }

    pub fn trigger_period(&self) -> Duration {
        self.limits.trigger_period
    }
}
