//! Schema-driven prompt construction and structured-output parsing.
//!
//! Everything here is driven by the [`UnifiedFieldSchema`] handed to
//! [`Extractor::new`]: which instruction lines a prompt contains, which JSON
//! skeleton the formatter must fill in, and which keys a parsed result is
//! guaranteed to carry.

mod normalize;
mod prompts;

use std::sync::Arc;

use orgbrief_shared::{FieldMap, FieldSpec, FieldValue, Result, StageGroup, UnifiedFieldSchema};

pub use normalize::normalize_value;

/// The organization a prompt is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityProfile {
    pub name: String,
    pub website: Option<String>,
}

impl EntityProfile {
    pub fn new(name: impl Into<String>, website: Option<String>) -> Self {
        Self {
            name: name.into(),
            website,
        }
    }

    fn label(&self) -> String {
        match &self.website {
            Some(site) if !site.trim().is_empty() => format!("{} ({})", self.name, site.trim()),
            _ => self.name.clone(),
        }
    }
}

/// Which schema fields a parse covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldScope {
    /// One enrichment group.
    Group(StageGroup),
    /// Every field that belongs to some group (synthesis output).
    AllGroups,
}

/// Outcome of one extraction round trip.
#[derive(Debug, Clone, PartialEq)]
pub enum StageResult {
    Parsed(FieldMap),
    Failed { reason: String },
}

impl StageResult {
    /// Fields to write: the parsed map, or the error sentinel for every
    /// field in scope.
    pub fn into_fields(self, extractor: &Extractor, scope: FieldScope) -> FieldMap {
        match self {
            Self::Parsed(fields) => fields,
            Self::Failed { .. } => extractor
                .fields(scope)
                .map(|f| (f.key.clone(), FieldValue::error()))
                .collect(),
        }
    }
}

impl From<Result<FieldMap>> for StageResult {
    fn from(result: Result<FieldMap>) -> Self {
        match result {
            Ok(fields) => Self::Parsed(fields),
            Err(e) => Self::Failed {
                reason: e.to_string(),
            },
        }
    }
}

/// Prompt builder and parser bound to one immutable schema.
#[derive(Debug, Clone)]
pub struct Extractor {
    schema: Arc<UnifiedFieldSchema>,
}

impl Extractor {
    pub fn new(schema: Arc<UnifiedFieldSchema>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &UnifiedFieldSchema {
        &self.schema
    }

    /// Fields covered by `scope`, in schema order.
    pub fn fields(&self, scope: FieldScope) -> Box<dyn Iterator<Item = &FieldSpec> + '_> {
        match scope {
            FieldScope::Group(group) => Box::new(self.schema.fields_in(group)),
            FieldScope::AllGroups => Box::new(self.schema.grouped_fields()),
        }
    }
}
