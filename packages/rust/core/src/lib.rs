//! Core pipeline orchestration for OrgBrief.
//!
//! This crate ties the completion client, the schema-driven extractor and
//! the record store together into per-entity stages, and drives them from a
//! durable, time-boxed work queue.

pub mod adapters;
pub mod checkpoint;
pub mod collaborators;
pub mod documents;
pub mod import;
pub mod render;
pub mod scheduler;
pub mod stages;

#[cfg(test)]
mod fakes;

pub use checkpoint::{CheckpointHandle, FrontItem, WorkQueue};
pub use collaborators::{
    AssetKind, Clock, DocumentMeta, DocumentSource, ManualClock, RecordStore, ReportFields,
    ReportRenderer, StateStore, SystemClock, TriggerRegistry,
};
pub use documents::FsDocumentSource;
pub use import::{ImportSummary, import_entities};
pub use render::{DEFAULT_TEMPLATE, TemplateRenderer};
pub use scheduler::{
    QueueStatus, RESUME_HANDLER, ResumeOutcome, Scheduler, SchedulerProgress, SilentProgress,
};
pub use stages::{ExecutorSettings, StageExecutor};
