//! Turso Embedded / libSQL storage layer (offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding entity records and
//! their partitions, the well-known state blobs (work queue, field schema),
//! recurring triggers and explicit report assets.
//!
//! **Access rules:**
//! - `orgbrief` CLI commands that mutate state: read-write via [`Storage::open`]
//! - `status`, `show`, `schema show` and `schema export`: read-only via
//!   [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};
use orgbrief_shared::{
    EntityId, FieldMap, FieldValue, OrgBriefError, PartitionKind, Result, UnifiedFieldSchema,
};

/// State key of the persisted work queue.
pub const QUEUE_STATE_KEY: &str = "work_queue";

/// State key of the persisted field schema.
pub const SCHEMA_STATE_KEY: &str = "field_schema";

fn storage_err(e: libsql::Error) -> OrgBriefError {
    OrgBriefError::Storage(e.to_string())
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| OrgBriefError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(OrgBriefError::not_found(format!(
                "database {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        OrgBriefError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(OrgBriefError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Entity operations
    // -----------------------------------------------------------------------

    /// Create the entity if its key is new. Returns the stored identifier,
    /// which keeps the display name of the first import.
    pub async fn upsert_entity(&self, entity: &EntityId) -> Result<EntityId> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO entities (key, name, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO NOTHING",
                params![entity.key(), entity.name(), now.as_str()],
            )
            .await
            .map_err(storage_err)?;

        self.find_entity(&entity.key())
            .await?
            .ok_or_else(|| OrgBriefError::not_found(format!("entity '{entity}'")))
    }

    /// Look an entity up by name, case-insensitively.
    pub async fn find_entity(&self, name: &str) -> Result<Option<EntityId>> {
        let key = EntityId::new(name).key();
        let mut rows = self
            .conn
            .query("SELECT name FROM entities WHERE key = ?1", params![key])
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(EntityId::new(
                row.get::<String>(0).map_err(storage_err)?,
            ))),
            None => Ok(None),
        }
    }

    /// List all entities in import order.
    pub async fn list_entities(&self) -> Result<Vec<EntityId>> {
        let mut rows = self
            .conn
            .query(
                "SELECT name FROM entities ORDER BY created_at, key",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(EntityId::new(row.get::<String>(0).map_err(storage_err)?));
        }
        Ok(results)
    }

    /// Assign `entity` to a cohort, or remove it from its cohort.
    pub async fn set_cohort(&self, entity: &EntityId, cohort: Option<&str>) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "UPDATE entities SET cohort = ?2 WHERE key = ?1",
                params![entity.key(), cohort],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Members of a cohort in import order, matched case-insensitively.
    pub async fn cohort_entities(&self, cohort: &str) -> Result<Vec<EntityId>> {
        let mut rows = self
            .conn
            .query(
                "SELECT name FROM entities WHERE cohort = ?1 COLLATE NOCASE
                 ORDER BY created_at, key",
                params![cohort.trim()],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(EntityId::new(row.get::<String>(0).map_err(storage_err)?));
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Partition operations
    // -----------------------------------------------------------------------

    /// Read every stored field of one partition.
    pub async fn read_partition(
        &self,
        entity: &EntityId,
        partition: PartitionKind,
    ) -> Result<FieldMap> {
        let mut rows = self
            .conn
            .query(
                "SELECT field_key, value_json FROM partition_fields
                 WHERE entity_key = ?1 AND partition = ?2",
                params![entity.key(), partition.as_str()],
            )
            .await
            .map_err(storage_err)?;

        let mut fields = FieldMap::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let key: String = row.get(0).map_err(storage_err)?;
            let raw: String = row.get(1).map_err(storage_err)?;
            let value: FieldValue = serde_json::from_str(&raw).map_err(|e| {
                OrgBriefError::Storage(format!("bad value for {partition}/{key}: {e}"))
            })?;
            fields.insert(key, value);
        }
        Ok(fields)
    }

    /// Write fields into one partition. Fields not in `fields` are left as
    /// they are; written fields replace any previous value.
    pub async fn write_partition(
        &self,
        entity: &EntityId,
        partition: PartitionKind,
        fields: &FieldMap,
    ) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction().await.map_err(storage_err)?;

        for (key, value) in fields {
            let json = serde_json::to_string(value)
                .map_err(|e| OrgBriefError::Storage(format!("cannot encode {key}: {e}")))?;
            tx.execute(
                "INSERT INTO partition_fields (entity_key, partition, field_key, value_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(entity_key, partition, field_key) DO UPDATE SET
                   value_json = excluded.value_json,
                   updated_at = excluded.updated_at",
                params![
                    entity.key(),
                    partition.as_str(),
                    key.as_str(),
                    json,
                    now.as_str()
                ],
            )
            .await
            .map_err(storage_err)?;
        }

        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // State blobs
    // -----------------------------------------------------------------------

    pub async fn get_state(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM state WHERE key = ?1", params![key])
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row.get::<String>(0).map_err(storage_err)?)),
            None => Ok(None),
        }
    }

    /// Replace the blob stored under `key`.
    pub async fn set_state(&self, key: &str, value: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO state (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                   value = excluded.value,
                   updated_at = excluded.updated_at",
                params![key, value, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    pub async fn delete_state(&self, key: &str) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute("DELETE FROM state WHERE key = ?1", params![key])
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Load the persisted field schema, if one was imported.
    pub async fn load_schema(&self) -> Result<Option<UnifiedFieldSchema>> {
        match self.get_state(SCHEMA_STATE_KEY).await? {
            Some(raw) => Ok(Some(UnifiedFieldSchema::from_json(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn save_schema(&self, schema: &UnifiedFieldSchema) -> Result<()> {
        self.set_state(SCHEMA_STATE_KEY, &schema.to_json()?).await
    }

    // -----------------------------------------------------------------------
    // Triggers
    // -----------------------------------------------------------------------

    /// Register a recurring trigger, replacing any trigger for `handler`.
    pub async fn create_trigger(&self, handler: &str, period_secs: u64) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT OR REPLACE INTO triggers (handler, period_secs, created_at)
                 VALUES (?1, ?2, ?3)",
                params![handler, period_secs as i64, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    pub async fn delete_trigger(&self, handler: &str) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute("DELETE FROM triggers WHERE handler = ?1", params![handler])
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Period of the trigger registered for `handler`, if any.
    pub async fn trigger_period(&self, handler: &str) -> Result<Option<u64>> {
        let mut rows = self
            .conn
            .query(
                "SELECT period_secs FROM triggers WHERE handler = ?1",
                params![handler],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row.get::<i64>(0).map_err(storage_err)?.max(0) as u64)),
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Assets
    // -----------------------------------------------------------------------

    /// Register an explicit asset (e.g. `logo`, `flag`) for an entity.
    pub async fn set_asset(&self, entity: &EntityId, kind: &str, locator: &str) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO assets (entity_key, kind, locator) VALUES (?1, ?2, ?3)
                 ON CONFLICT(entity_key, kind) DO UPDATE SET locator = excluded.locator",
                params![entity.key(), kind, locator],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    pub async fn get_asset(&self, entity: &EntityId, kind: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT locator FROM assets WHERE entity_key = ?1 AND kind = ?2",
                params![entity.key(), kind],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row.get::<String>(0).map_err(storage_err)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orgbrief_shared::Described;
    use uuid::Uuid;

    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("ob_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    #[tokio::test]
    async fn open_creates_schema() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("ob_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn entities_are_case_insensitive() {
        let storage = test_storage().await;
        let first = storage
            .upsert_entity(&EntityId::new("Acme Corp"))
            .await
            .expect("insert");
        let again = storage
            .upsert_entity(&EntityId::new("ACME CORP"))
            .await
            .expect("upsert");
        assert_eq!(again.name(), "Acme Corp");
        assert_eq!(first, again);

        let found = storage.find_entity("acme corp").await.unwrap();
        assert_eq!(found.map(|e| e.name().to_string()), Some("Acme Corp".into()));
        assert!(storage.find_entity("Globex").await.unwrap().is_none());
        assert_eq!(storage.list_entities().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn partition_writes_merge_per_field() {
        let storage = test_storage().await;
        let acme = storage.upsert_entity(&EntityId::new("Acme")).await.unwrap();

        let mut first = FieldMap::new();
        first.insert("arr".into(), FieldValue::Scalar("$1M".into()));
        first.insert(
            "risks".into(),
            FieldValue::DescribedList(vec![Described::new("Churn")]),
        );
        storage
            .write_partition(&acme, PartitionKind::Discovered, &first)
            .await
            .unwrap();

        let mut second = FieldMap::new();
        second.insert("arr".into(), FieldValue::Scalar("$2M".into()));
        storage
            .write_partition(&acme, PartitionKind::Discovered, &second)
            .await
            .unwrap();

        let stored = storage
            .read_partition(&acme, PartitionKind::Discovered)
            .await
            .unwrap();
        assert_eq!(stored["arr"], FieldValue::Scalar("$2M".into()));
        assert!(matches!(stored["risks"], FieldValue::DescribedList(_)));

        let other = storage
            .read_partition(&acme, PartitionKind::Final)
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn state_blobs_roundtrip() {
        let storage = test_storage().await;
        assert!(storage.get_state(QUEUE_STATE_KEY).await.unwrap().is_none());
        storage.set_state(QUEUE_STATE_KEY, "[]").await.unwrap();
        storage.set_state(QUEUE_STATE_KEY, "[1]").await.unwrap();
        assert_eq!(
            storage.get_state(QUEUE_STATE_KEY).await.unwrap().as_deref(),
            Some("[1]")
        );
        storage.delete_state(QUEUE_STATE_KEY).await.unwrap();
        assert!(storage.get_state(QUEUE_STATE_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn schema_persists() {
        let storage = test_storage().await;
        assert!(storage.load_schema().await.unwrap().is_none());
        let schema = UnifiedFieldSchema::builtin();
        storage.save_schema(&schema).await.unwrap();
        assert_eq!(storage.load_schema().await.unwrap(), Some(schema));
    }

    #[tokio::test]
    async fn trigger_recreate_keeps_one_row() {
        let storage = test_storage().await;
        storage.create_trigger("resume", 60).await.unwrap();
        storage.create_trigger("resume", 30).await.unwrap();
        assert_eq!(storage.trigger_period("resume").await.unwrap(), Some(30));
        storage.delete_trigger("resume").await.unwrap();
        assert_eq!(storage.trigger_period("resume").await.unwrap(), None);
    }

    #[tokio::test]
    async fn assets_per_entity() {
        let storage = test_storage().await;
        let acme = storage.upsert_entity(&EntityId::new("Acme")).await.unwrap();
        storage
            .set_asset(&acme, "logo", "https://cdn.example/acme.png")
            .await
            .unwrap();
        assert_eq!(
            storage.get_asset(&acme, "logo").await.unwrap().as_deref(),
            Some("https://cdn.example/acme.png")
        );
        assert!(storage.get_asset(&acme, "flag").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cohorts_group_entities() {
        let storage = test_storage().await;
        let acme = storage.upsert_entity(&EntityId::new("Acme")).await.unwrap();
        let globex = storage.upsert_entity(&EntityId::new("Globex")).await.unwrap();
        let initech = storage.upsert_entity(&EntityId::new("Initech")).await.unwrap();
        storage.set_cohort(&acme, Some("Spring 2024")).await.unwrap();
        storage.set_cohort(&globex, Some("Fall 2024")).await.unwrap();
        storage.set_cohort(&initech, Some("spring 2024")).await.unwrap();

        let spring = storage.cohort_entities("SPRING 2024").await.unwrap();
        assert_eq!(spring, vec![acme.clone(), initech]);

        storage.set_cohort(&acme, None).await.unwrap();
        assert_eq!(storage.cohort_entities("spring 2024").await.unwrap().len(), 1);
        assert!(storage.cohort_entities("Winter").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("ob_test_{}.db", Uuid::now_v7()));
        drop(Storage::open(&tmp).await.unwrap());
        let ro = Storage::open_readonly(&tmp).await.unwrap();
        let err = ro.set_state("k", "v").await.unwrap_err();
        assert!(err.to_string().contains("read-only"));
    }
}
