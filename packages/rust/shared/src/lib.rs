//! Shared types, error model, and configuration for OrgBrief.
//!
//! This crate is the foundation depended on by all other OrgBrief crates.
//! It provides:
//! - [`OrgBriefError`], the unified error type
//! - Domain types ([`WorkDescriptor`], [`EntityId`], [`FieldValue`], [`PartitionLocator`])
//! - The [`UnifiedFieldSchema`]
//! - Configuration ([`AppConfig`], [`SchedulerLimits`], config loading)

pub mod config;
pub mod error;
pub mod schema;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CompletionConfig, DocumentsConfig, ReportConfig, SchedulerConfig, SchedulerLimits,
    StorageConfig, api_key, config_dir, config_file_path, expand_path, init_config, load_config,
    load_config_from, validate_api_key,
};
pub use error::{OrgBriefError, Result};
pub use schema::{FieldSpec, REPORT_LINK_KEY, StageGroup, UnifiedFieldSchema};
pub use types::{
    Described, ERROR_SENTINEL, EntityId, EntityOutcome, FieldMap, FieldValue, PartitionKind,
    PartitionLocator, ReportPayload, Stage, StageFlags, StageOutcome, StageStatus, UNDISCLOSED,
    WorkDescriptor,
};
