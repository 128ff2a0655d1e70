//! Filesystem document source: one directory per entity under a root.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use orgbrief_shared::{EntityId, OrgBriefError, Result};

use crate::collaborators::{DocumentMeta, DocumentSource};

/// Documents stored as `<root>/<entity name>/<file>`.
///
/// The entity directory is matched case-insensitively; hidden files and
/// nested directories are ignored.
#[derive(Debug, Clone)]
pub struct FsDocumentSource {
    root: PathBuf,
}

impl FsDocumentSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn entity_dir(&self, entity: &EntityId) -> Result<PathBuf> {
        let key = entity.key();
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                OrgBriefError::not_found(format!("document root {}", self.root.display()))
            } else {
                OrgBriefError::io(&self.root, e)
            }
        })?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| OrgBriefError::io(&self.root, e))?
        {
            let name = entry.file_name().to_string_lossy().trim().to_lowercase();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if is_dir && name == key {
                return Ok(entry.path());
            }
        }

        Err(OrgBriefError::not_found(format!(
            "document folder for '{entity}' under {}",
            self.root.display()
        )))
    }
}

/// MIME type inferred from the file extension.
pub fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl DocumentSource for FsDocumentSource {
    async fn list_documents(&self, entity: &EntityId) -> Result<Vec<DocumentMeta>> {
        let dir = self.entity_dir(entity).await?;
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| OrgBriefError::io(&dir, e))?;

        let mut documents = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| OrgBriefError::io(&dir, e))?
        {
            let path = entry.path();
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| OrgBriefError::io(&path, e))?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata
                .modified()
                .map_err(|e| OrgBriefError::io(&path, e))?;

            documents.push(DocumentMeta {
                id: path.to_string_lossy().into_owned(),
                mime_type: mime_for(&path).to_string(),
                last_modified: DateTime::<Utc>::from(modified),
            });
        }

        debug!(%entity, count = documents.len(), "listed documents");
        Ok(documents)
    }

    async fn document_bytes(&self, id: &str) -> Result<Vec<u8>> {
        let path = PathBuf::from(id);
        let escapes = path.components().any(|c| matches!(c, Component::ParentDir));
        if escapes || !path.starts_with(&self.root) {
            return Err(OrgBriefError::not_found(format!("document {id}")));
        }
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                OrgBriefError::not_found(format!("document {id}"))
            } else {
                OrgBriefError::io(&path, e)
            }
        })
    }
}
