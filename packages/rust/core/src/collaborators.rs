//! Narrow interfaces to everything outside the pipeline core.
//!
//! The stage executor and scheduler only see these traits. Production
//! implementations live in [`crate::adapters`], [`crate::documents`] and
//! [`crate::render`]; tests substitute in-memory fakes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use orgbrief_shared::{EntityId, FieldMap, PartitionLocator, Result};

// ---------------------------------------------------------------------------
// Record store
// ---------------------------------------------------------------------------

/// Kind of external asset a report can embed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Logo,
    Flag,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Logo => "logo",
            Self::Flag => "flag",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entity records addressed by typed partition locators.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Case-insensitive lookup by name.
    async fn find_entity(&self, name: &str) -> Result<Option<EntityId>>;

    /// Every stored field of the partition; empty when nothing was written.
    async fn read_partition(&self, locator: &PartitionLocator) -> Result<FieldMap>;

    /// Merge `fields` into the partition, replacing values key by key.
    async fn write_partition(&self, locator: &PartitionLocator, fields: &FieldMap) -> Result<()>;

    /// Explicitly registered asset locator, if any.
    async fn resolve_asset(&self, entity: &EntityId, kind: AssetKind) -> Result<Option<String>>;
}

// ---------------------------------------------------------------------------
// Document source
// ---------------------------------------------------------------------------

/// Listing entry of a stored document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMeta {
    pub id: String,
    pub mime_type: String,
    pub last_modified: DateTime<Utc>,
}

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Documents filed under the entity. `NotFound` when it has no location.
    async fn list_documents(&self, entity: &EntityId) -> Result<Vec<DocumentMeta>>;

    async fn document_bytes(&self, id: &str) -> Result<Vec<u8>>;
}

// ---------------------------------------------------------------------------
// Report renderer
// ---------------------------------------------------------------------------

/// Field map handed to the renderer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportFields {
    /// Display name of the entity the report is about.
    pub title: String,
    /// Canonical field key → text.
    pub text: BTreeMap<String, String>,
    /// Image description tag → image locator.
    pub images: BTreeMap<String, String>,
}

#[async_trait]
pub trait ReportRenderer: Send + Sync {
    /// Render `template_id` and return a locator for the produced report.
    async fn render_report(&self, template_id: &str, fields: &ReportFields) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Durable state and triggers
// ---------------------------------------------------------------------------

/// Key/value store for opaque state blobs.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<String>>;
    async fn store(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Recurring invocation of a named handler.
#[async_trait]
pub trait TriggerRegistry: Send + Sync {
    /// Delete any trigger for `handler`, then create one with `period`.
    async fn ensure(&self, handler: &str, period: Duration) -> Result<()>;
    async fn remove(&self, handler: &str) -> Result<()>;
    async fn exists(&self, handler: &str) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let (Ok(mut now), Ok(delta)) = (self.now.lock(), chrono::Duration::from_std(by)) {
            *now += delta;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|n| *n).unwrap_or_else(|e| *e.into_inner())
    }
}
