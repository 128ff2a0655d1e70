//! Core domain types for the enrichment pipeline.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{OrgBriefError, Result};

/// Visible marker for a field nobody could determine.
pub const UNDISCLOSED: &str = "Undisclosed";

/// Visible marker for a field whose stage failed.
pub const ERROR_SENTINEL: &str = "error";

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// Organization identifier: its display name, compared case-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Wrap a display name, trimming surrounding whitespace.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().trim().to_string())
    }

    /// Display name as submitted or imported.
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Lookup key: the lowercased name.
    pub fn key(&self) -> String {
        self.0.to_lowercase()
    }
}

impl PartialEq for EntityId {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for EntityId {}

impl Hash for EntityId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// One discrete processing step applied to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    DocumentExtraction,
    WebEnrichment,
    Synthesis,
    ReportGeneration,
}

impl Stage {
    /// Execution order for a single entity.
    pub const ORDERED: [Stage; 4] = [
        Stage::DocumentExtraction,
        Stage::WebEnrichment,
        Stage::Synthesis,
        Stage::ReportGeneration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentExtraction => "document_extraction",
            Self::WebEnrichment => "web_enrichment",
            Self::Synthesis => "synthesis",
            Self::ReportGeneration => "report_generation",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stages requested by a submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StageFlags {
    pub document_extraction: bool,
    pub web_enrichment: bool,
    pub synthesis: bool,
    pub report_generation: bool,
}

impl StageFlags {
    /// Whether `stage` was requested.
    pub fn contains(&self, stage: Stage) -> bool {
        match stage {
            Stage::DocumentExtraction => self.document_extraction,
            Stage::WebEnrichment => self.web_enrichment,
            Stage::Synthesis => self.synthesis,
            Stage::ReportGeneration => self.report_generation,
        }
    }

    /// Requested stages that run per entity, in execution order.
    ///
    /// Report generation is excluded: it runs once when a descriptor drains.
    pub fn entity_stages(&self) -> Vec<Stage> {
        Stage::ORDERED
            .into_iter()
            .filter(|s| *s != Stage::ReportGeneration && self.contains(*s))
            .collect()
    }

    pub fn any(&self) -> bool {
        Stage::ORDERED.iter().any(|s| self.contains(*s))
    }
}

// ---------------------------------------------------------------------------
// Work descriptors
// ---------------------------------------------------------------------------

/// Report-specific part of a submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportPayload {
    /// Template to render; `None` uses the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Entities that get a report. Empty means every entity of the descriptor.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<EntityId>,
}

/// Final state of one stage for one entity within an invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Failed { reason: String },
    Skipped { reason: String },
}

/// Outcome of one stage run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: Stage,
    #[serde(flatten)]
    pub status: StageStatus,
}

/// Stage outcomes recorded for an entity once it leaves the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityOutcome {
    pub entity: EntityId,
    pub stages: Vec<StageOutcome>,
    pub finished_at: DateTime<Utc>,
}

/// One unit of queued intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkDescriptor {
    /// Time-sortable identifier (UUID v7).
    pub id: Uuid,
    /// Entities still to process, front first.
    pub entities: VecDeque<EntityId>,
    /// Requested stages.
    pub stages: StageFlags,
    /// Report settings, when report generation was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<ReportPayload>,
    /// Entities already processed, in processing order.
    #[serde(default)]
    pub processed: Vec<EntityOutcome>,
    /// How many invocations started work on the front entity.
    #[serde(default)]
    pub front_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl WorkDescriptor {
    /// Build a descriptor, rejecting empty entity lists and empty stage sets.
    pub fn new(
        entities: Vec<EntityId>,
        stages: StageFlags,
        report: Option<ReportPayload>,
        enqueued_at: DateTime<Utc>,
    ) -> Result<Self> {
        if entities.is_empty() {
            return Err(OrgBriefError::validation("submission has no entities"));
        }
        if !stages.any() {
            return Err(OrgBriefError::validation("submission requests no stages"));
        }
        let report = if stages.report_generation {
            Some(report.unwrap_or_default())
        } else {
            None
        };
        Ok(Self {
            id: Uuid::now_v7(),
            entities: entities.into(),
            stages,
            report,
            processed: Vec::new(),
            front_attempts: 0,
            enqueued_at,
        })
    }

    /// Entities that receive a report when this descriptor drains with
    /// `last` as its final entity.
    pub fn report_targets(&self, last: &EntityId) -> Vec<EntityId> {
        match &self.report {
            Some(payload) if !payload.entities.is_empty() => payload.entities.clone(),
            _ => self
                .processed
                .iter()
                .map(|o| o.entity.clone())
                .chain(std::iter::once(last.clone()))
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Partitions
// ---------------------------------------------------------------------------

/// Which copy of an entity's fields a value lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionKind {
    /// Internal/manual data, including fields extracted from documents.
    Internal,
    /// Fields imported from the CRM.
    Crm,
    /// Fields discovered through grounded web search.
    Discovered,
    /// The reconciled record.
    Final,
}

impl PartitionKind {
    /// The three source partitions synthesis reconciles.
    pub const SOURCES: [PartitionKind; 3] = [
        PartitionKind::Internal,
        PartitionKind::Crm,
        PartitionKind::Discovered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::Crm => "crm",
            Self::Discovered => "discovered",
            Self::Final => "final",
        }
    }
}

impl fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PartitionKind {
    type Err = OrgBriefError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "internal" => Ok(Self::Internal),
            "crm" => Ok(Self::Crm),
            "discovered" => Ok(Self::Discovered),
            "final" => Ok(Self::Final),
            other => Err(OrgBriefError::validation(format!(
                "unknown partition '{other}'"
            ))),
        }
    }
}

/// Typed address of one partition of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionLocator {
    pub entity: EntityId,
    pub partition: PartitionKind,
}

impl PartitionLocator {
    pub fn new(entity: EntityId, partition: PartitionKind) -> Self {
        Self { entity, partition }
    }
}

impl fmt::Display for PartitionLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity.key(), self.partition)
    }
}

// ---------------------------------------------------------------------------
// Field values
// ---------------------------------------------------------------------------

/// A described claim with the sources backing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Described {
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

impl Described {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            sources: Vec::new(),
        }
    }

    /// Description followed by a `Sources:` block when sources exist.
    pub fn render(&self) -> String {
        let description = if self.description.is_empty() {
            UNDISCLOSED
        } else {
            self.description.as_str()
        };
        if self.sources.is_empty() {
            description.to_string()
        } else {
            format!("{description}\n\nSources:\n{}", self.sources.join("\n"))
        }
    }
}

/// Value stored for one canonical field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Scalar(String),
    Described(Described),
    DescribedList(Vec<Described>),
}

impl FieldValue {
    pub fn undisclosed() -> Self {
        Self::Scalar(UNDISCLOSED.to_string())
    }

    pub fn error() -> Self {
        Self::Scalar(ERROR_SENTINEL.to_string())
    }

    /// Whether this is one of the visible placeholder values.
    pub fn is_sentinel(&self) -> bool {
        matches!(self, Self::Scalar(s) if s == UNDISCLOSED || s == ERROR_SENTINEL)
    }

    /// Cell text: descriptions with their sources.
    pub fn render(&self) -> String {
        match self {
            Self::Scalar(s) => s.clone(),
            Self::Described(d) => d.render(),
            Self::DescribedList(items) if items.is_empty() => UNDISCLOSED.to_string(),
            Self::DescribedList(items) => items
                .iter()
                .map(Described::render)
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }

    /// Report text: descriptions only.
    pub fn summary(&self) -> String {
        match self {
            Self::Scalar(s) => s.clone(),
            Self::Described(d) if d.description.is_empty() => UNDISCLOSED.to_string(),
            Self::Described(d) => d.description.clone(),
            Self::DescribedList(items) if items.is_empty() => UNDISCLOSED.to_string(),
            Self::DescribedList(items) => items
                .iter()
                .map(|d| d.description.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Canonical field key → value for one partition.
pub type FieldMap = BTreeMap<String, FieldValue>;
