//! libSQL-backed implementations of the collaborator traits.

use std::time::Duration;

use async_trait::async_trait;

use orgbrief_shared::{EntityId, FieldMap, OrgBriefError, PartitionLocator, Result};
use orgbrief_storage::Storage;

use crate::collaborators::{AssetKind, RecordStore, StateStore, TriggerRegistry};

#[async_trait]
impl RecordStore for Storage {
    async fn find_entity(&self, name: &str) -> Result<Option<EntityId>> {
        Storage::find_entity(self, name).await
    }

    async fn read_partition(&self, locator: &PartitionLocator) -> Result<FieldMap> {
        Storage::read_partition(self, &locator.entity, locator.partition).await
    }

    async fn write_partition(&self, locator: &PartitionLocator, fields: &FieldMap) -> Result<()> {
        if Storage::find_entity(self, locator.entity.name()).await?.is_none() {
            return Err(OrgBriefError::not_found(format!("entity '{}'", locator.entity)));
        }
        Storage::write_partition(self, &locator.entity, locator.partition, fields).await
    }

    async fn resolve_asset(&self, entity: &EntityId, kind: AssetKind) -> Result<Option<String>> {
        self.get_asset(entity, kind.as_str()).await
    }
}

#[async_trait]
impl StateStore for Storage {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        self.get_state(key).await
    }

    async fn store(&self, key: &str, value: &str) -> Result<()> {
        self.set_state(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.delete_state(key).await
    }
}

#[async_trait]
impl TriggerRegistry for Storage {
    async fn ensure(&self, handler: &str, period: Duration) -> Result<()> {
        self.delete_trigger(handler).await?;
        self.create_trigger(handler, period.as_secs().max(1)).await
    }

    async fn remove(&self, handler: &str) -> Result<()> {
        self.delete_trigger(handler).await
    }

    async fn exists(&self, handler: &str) -> Result<bool> {
        Ok(self.trigger_period(handler).await?.is_some())
    }
}
