//! CRM import: create entity records from a JSON export.
//!
//! The file is an array of entries:
//!
//! ```json
//! [
//!   {
//!     "name": "Acme",
//!     "cohort": "Spring 2024",
//!     "crm": { "website": "https://acme.com", "arr": "$2M" },
//!     "internal": { "fundCommentary": "Strong quarter." },
//!     "assets": { "logo": "https://cdn.example/acme.png" }
//!   }
//! ]
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Deserialize;
use tracing::{info, instrument, warn};

use orgbrief_shared::{EntityId, FieldMap, OrgBriefError, PartitionKind, Result};
use orgbrief_storage::Storage;

use crate::collaborators::AssetKind;

#[derive(Debug, Deserialize)]
struct ImportEntry {
    name: String,
    /// Program cohort the entity belongs to.
    #[serde(default)]
    cohort: Option<String>,
    #[serde(default)]
    crm: FieldMap,
    #[serde(default)]
    internal: FieldMap,
    #[serde(default)]
    assets: BTreeMap<String, String>,
}

/// Counts reported after an import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub entities: usize,
    pub fields: usize,
    pub assets: usize,
    /// Distinct cohorts seen in the file.
    pub cohorts: usize,
}

fn asset_kind(raw: &str) -> Option<AssetKind> {
    match raw.to_ascii_lowercase().as_str() {
        "logo" => Some(AssetKind::Logo),
        "flag" => Some(AssetKind::Flag),
        _ => None,
    }
}

/// Parse an import file's contents.
fn parse_entries(raw: &str) -> Result<Vec<ImportEntry>> {
    let entries: Vec<ImportEntry> = serde_json::from_str(raw)
        .map_err(|e| OrgBriefError::validation(format!("invalid import file: {e}")))?;
    if let Some(i) = entries.iter().position(|e| e.name.trim().is_empty()) {
        return Err(OrgBriefError::validation(format!(
            "import entry {i} has an empty name"
        )));
    }
    Ok(entries)
}

/// Import entities from `path` into `storage`.
///
/// Names are matched case-insensitively, so re-importing merges into the
/// existing records instead of duplicating them.
#[instrument(skip_all, fields(path = %path.display()))]
pub async fn import_entities(storage: &Storage, path: &Path) -> Result<ImportSummary> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| OrgBriefError::io(path, e))?;
    let entries = parse_entries(&raw)?;

    let mut summary = ImportSummary::default();
    let mut cohorts = BTreeSet::new();
    for entry in entries {
        let entity = storage.upsert_entity(&EntityId::new(entry.name)).await?;

        let cohort = entry
            .cohort
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());
        if let Some(cohort) = cohort {
            storage.set_cohort(&entity, Some(cohort)).await?;
            cohorts.insert(cohort.to_lowercase());
        }

        for (partition, fields) in [
            (PartitionKind::Crm, &entry.crm),
            (PartitionKind::Internal, &entry.internal),
        ] {
            if !fields.is_empty() {
                storage.write_partition(&entity, partition, fields).await?;
                summary.fields += fields.len();
            }
        }

        for (kind, locator) in &entry.assets {
            match asset_kind(kind) {
                Some(kind) => {
                    storage.set_asset(&entity, kind.as_str(), locator).await?;
                    summary.assets += 1;
                }
                None => warn!(%entity, kind = %kind, "ignoring unknown asset kind"),
            }
        }
        summary.entities += 1;
    }
    summary.cohorts = cohorts.len();

    info!(
        entities = summary.entities,
        fields = summary.fields,
        assets = summary.assets,
        cohorts = summary.cohorts,
        "import complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use orgbrief_shared::FieldValue;
    use uuid::Uuid;

    #[tokio::test]
    async fn imports_and_merges_case_insensitively() {
        let dir = std::env::temp_dir().join(format!("ob_import_{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let storage = Storage::open(&dir.join("db.sqlite")).await.unwrap();

        let file = dir.join("crm.json");
        std::fs::write(
            &file,
            r#"[
                {"name": "Acme", "cohort": "Spring 2024",
                 "crm": {"website": "acme.com", "arr": "$2M"},
                 "assets": {"logo": "https://cdn.example/acme.png", "banner": "x"}},
                {"name": "Globex", "cohort": " spring 2024 "},
                {"name": "Initech", "cohort": ""}
            ]"#,
        )
        .unwrap();
        let summary = import_entities(&storage, &file).await.unwrap();
        assert_eq!(
            summary,
            ImportSummary {
                entities: 3,
                fields: 2,
                assets: 1,
                cohorts: 1
            }
        );

        std::fs::write(&file, r#"[{"name": "ACME", "crm": {"arr": "$3M"}}]"#).unwrap();
        import_entities(&storage, &file).await.unwrap();

        assert_eq!(storage.list_entities().await.unwrap().len(), 3);
        let spring = storage.cohort_entities("Spring 2024").await.unwrap();
        assert_eq!(spring, vec![EntityId::new("Acme"), EntityId::new("Globex")]);
        let acme = storage.find_entity("acme").await.unwrap().unwrap();
        assert_eq!(acme.name(), "Acme");
        let crm = storage
            .read_partition(&acme, PartitionKind::Crm)
            .await
            .unwrap();
        assert_eq!(crm["arr"], FieldValue::Scalar("$3M".into()));
        assert_eq!(crm["website"], FieldValue::Scalar("acme.com".into()));
        assert_eq!(
            storage.get_asset(&acme, "logo").await.unwrap().as_deref(),
            Some("https://cdn.example/acme.png")
        );
    }

    #[test]
    fn rejects_blank_names() {
        assert!(parse_entries(r#"[{"name": "  "}]"#).is_err());
        assert!(parse_entries("{}").is_err());
    }
}
