//! In-memory collaborators for executor and scheduler tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use orgbrief_completion::{CompletionClient, CompletionRequest, ModelTier, Sleeper};
use orgbrief_shared::{
    EntityId, FieldMap, FieldValue, OrgBriefError, PartitionKind, PartitionLocator, Result,
};

use crate::collaborators::{
    AssetKind, DocumentMeta, DocumentSource, ManualClock, RecordStore, ReportFields,
    ReportRenderer, StateStore, TriggerRegistry,
};

type Responder = Box<dyn Fn(&CompletionRequest) -> Result<String> + Send + Sync>;

/// Completion client answering from a closure.
pub struct FakeCompletion {
    responder: Responder,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl FakeCompletion {
    pub fn new(
        responder: impl Fn(&CompletionRequest) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Research calls get tagged text, formatting calls get `json`.
    pub fn formatting_json(json: &str) -> Self {
        let json = json.to_string();
        Self::new(move |request| {
            Ok(match request.tier {
                ModelTier::Grounded => "[NOTES] research notes".to_string(),
                ModelTier::Fast => json.clone(),
            })
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.prompt.clone())
            .collect()
    }
}

#[async_trait]
impl CompletionClient for FakeCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.calls.lock().unwrap().push(request.clone());
        (self.responder)(request)
    }
}

/// Record store keyed by lowercase entity name.
#[derive(Default)]
pub struct MemoryRecords {
    entities: Mutex<BTreeMap<String, EntityId>>,
    partitions: Mutex<HashMap<(String, PartitionKind), FieldMap>>,
    assets: Mutex<HashMap<(String, AssetKind), String>>,
}

impl MemoryRecords {
    pub fn with_entities(names: &[&str]) -> Self {
        let records = Self::default();
        for name in names {
            let id = EntityId::new(*name);
            records.entities.lock().unwrap().insert(id.key(), id);
        }
        records
    }

    pub fn seed(&self, entity: &str, partition: PartitionKind, fields: &[(&str, &str)]) {
        let mut partitions = self.partitions.lock().unwrap();
        let map = partitions
            .entry((entity.to_lowercase(), partition))
            .or_default();
        for (key, value) in fields {
            map.insert(key.to_string(), FieldValue::Scalar(value.to_string()));
        }
    }

    pub fn partition(&self, entity: &str, partition: PartitionKind) -> FieldMap {
        self.partitions
            .lock()
            .unwrap()
            .get(&(entity.to_lowercase(), partition))
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_asset(&self, entity: &str, kind: AssetKind, locator: &str) {
        self.assets
            .lock()
            .unwrap()
            .insert((entity.to_lowercase(), kind), locator.to_string());
    }
}

#[async_trait]
impl RecordStore for MemoryRecords {
    async fn find_entity(&self, name: &str) -> Result<Option<EntityId>> {
        let key = EntityId::new(name).key();
        Ok(self.entities.lock().unwrap().get(&key).cloned())
    }

    async fn read_partition(&self, locator: &PartitionLocator) -> Result<FieldMap> {
        Ok(self.partition(locator.entity.name(), locator.partition))
    }

    async fn write_partition(&self, locator: &PartitionLocator, fields: &FieldMap) -> Result<()> {
        let key = locator.entity.key();
        if !self.entities.lock().unwrap().contains_key(&key) {
            return Err(OrgBriefError::not_found(format!("entity '{}'", locator.entity)));
        }
        let mut partitions = self.partitions.lock().unwrap();
        let map = partitions.entry((key, locator.partition)).or_default();
        for (k, v) in fields {
            map.insert(k.clone(), v.clone());
        }
        Ok(())
    }

    async fn resolve_asset(&self, entity: &EntityId, kind: AssetKind) -> Result<Option<String>> {
        Ok(self.assets.lock().unwrap().get(&(entity.key(), kind)).cloned())
    }
}

/// Document source over in-memory files.
#[derive(Default)]
pub struct MemoryDocuments {
    files: Mutex<Vec<(String, DocumentMeta, Vec<u8>)>>,
}

impl MemoryDocuments {
    pub fn add(&self, entity: &str, meta: DocumentMeta, bytes: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .push((entity.to_lowercase(), meta, bytes.to_vec()));
    }
}

#[async_trait]
impl DocumentSource for MemoryDocuments {
    async fn list_documents(&self, entity: &EntityId) -> Result<Vec<DocumentMeta>> {
        let files = self.files.lock().unwrap();
        let listed: Vec<DocumentMeta> = files
            .iter()
            .filter(|(owner, _, _)| *owner == entity.key())
            .map(|(_, meta, _)| meta.clone())
            .collect();
        if listed.is_empty() {
            return Err(OrgBriefError::not_found(format!("documents for '{entity}'")));
        }
        Ok(listed)
    }

    async fn document_bytes(&self, id: &str) -> Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .iter()
            .find(|(_, meta, _)| meta.id == id)
            .map(|(_, _, bytes)| bytes.clone())
            .ok_or_else(|| OrgBriefError::not_found(format!("document {id}")))
    }
}

/// Renderer that records its inputs and returns `reports/<title>-<template>.md`.
#[derive(Default)]
pub struct RecordingRenderer {
    calls: Mutex<Vec<(String, ReportFields)>>,
}

impl RecordingRenderer {
    pub fn calls(&self) -> Vec<(String, ReportFields)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReportRenderer for RecordingRenderer {
    async fn render_report(&self, template_id: &str, fields: &ReportFields) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((template_id.to_string(), fields.clone()));
        Ok(format!("reports/{}-{template_id}.md", fields.title))
    }
}

#[derive(Default)]
pub struct MemoryState {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryState {
    pub fn get(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }

    pub fn put(&self, key: &str, value: &str) {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }
}

#[async_trait]
impl StateStore for MemoryState {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get(key))
    }

    async fn store(&self, key: &str, value: &str) -> Result<()> {
        self.put(key, value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.values.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Trigger registry that also counts how often `ensure` ran.
#[derive(Default)]
pub struct MemoryTriggers {
    triggers: Mutex<HashMap<String, Duration>>,
    ensured: Mutex<usize>,
}

impl MemoryTriggers {
    pub fn period(&self, handler: &str) -> Option<Duration> {
        self.triggers.lock().unwrap().get(handler).copied()
    }

    pub fn ensure_count(&self) -> usize {
        *self.ensured.lock().unwrap()
    }
}

#[async_trait]
impl TriggerRegistry for MemoryTriggers {
    async fn ensure(&self, handler: &str, period: Duration) -> Result<()> {
        *self.ensured.lock().unwrap() += 1;
        let mut triggers = self.triggers.lock().unwrap();
        triggers.remove(handler);
        triggers.insert(handler.to_string(), period);
        Ok(())
    }

    async fn remove(&self, handler: &str) -> Result<()> {
        self.triggers.lock().unwrap().remove(handler);
        Ok(())
    }

    async fn exists(&self, handler: &str) -> Result<bool> {
        Ok(self.triggers.lock().unwrap().contains_key(handler))
    }
}

/// Sleeper that advances a manual clock instead of waiting.
pub struct ClockSleeper {
    clock: Arc<ManualClock>,
    slept: Mutex<Vec<Duration>>,
}

impl ClockSleeper {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            slept: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for ClockSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
        self.clock.advance(duration);
    }
}
