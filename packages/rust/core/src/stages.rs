//! Per-entity stage execution.
//!
//! [`StageExecutor::run_stage`] runs exactly one stage for one entity and
//! reports a [`StageStatus`]. It never returns an error: a missing entity,
//! document folder or template skips the stage, anything else fails it, and
//! the scheduler moves on to the next entity either way.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};
use url::Url;

use orgbrief_completion::{CompletionClient, CompletionRequest, InlineDocument, ModelTier};
use orgbrief_extractor::{EntityProfile, Extractor, FieldScope, StageResult};
use orgbrief_shared::{
    AppConfig, EntityId, FieldMap, FieldSpec, FieldValue, OrgBriefError, PartitionKind, PartitionLocator,
    REPORT_LINK_KEY, Result, Stage, StageGroup, StageStatus,
};

use crate::collaborators::{
    AssetKind, Clock, DocumentMeta, DocumentSource, RecordStore, ReportFields, ReportRenderer,
};

/// Knobs for document selection and report assets.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Documents modified within this window count as recent.
    pub recency_window: Duration,
    pub max_recent: usize,
    /// How many of the newest documents to use when none are recent.
    pub fallback_count: usize,
    pub default_template: String,
    /// Contains `{domain}`.
    pub logo_url_template: String,
    /// Contains `{code}`.
    pub flag_url_template: String,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for ExecutorSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            recency_window: Duration::from_secs(u64::from(config.documents.recency_days) * 86_400),
            max_recent: config.documents.max_recent.max(1),
            fallback_count: config.documents.fallback_count,
            default_template: config.report.default_template.clone(),
            logo_url_template: config.report.logo_url_template.clone(),
            flag_url_template: config.report.flag_url_template.clone(),
        }
    }
}

/// Runs stages against injected collaborators.
pub struct StageExecutor {
    client: Arc<dyn CompletionClient>,
    extractor: Extractor,
    records: Arc<dyn RecordStore>,
    documents: Arc<dyn DocumentSource>,
    renderer: Arc<dyn ReportRenderer>,
    clock: Arc<dyn Clock>,
    settings: ExecutorSettings,
}

impl StageExecutor {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        extractor: Extractor,
        records: Arc<dyn RecordStore>,
        documents: Arc<dyn DocumentSource>,
        renderer: Arc<dyn ReportRenderer>,
        clock: Arc<dyn Clock>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            client,
            extractor,
            records,
            documents,
            renderer,
            clock,
            settings,
        }
    }

    /// Run one stage for one entity.
    ///
    /// `template` only matters for [`Stage::ReportGeneration`]; `None` uses
    /// the configured default.
    #[instrument(skip_all, fields(entity = %entity, stage = %stage))]
    pub async fn run_stage(
        &self,
        entity: &EntityId,
        stage: Stage,
        template: Option<&str>,
    ) -> StageStatus {
        let result = match self.records.find_entity(entity.name()).await {
            Ok(Some(record)) => match stage {
                Stage::DocumentExtraction => self.extract_documents(&record).await,
                Stage::WebEnrichment => self.enrich_from_web(&record).await,
                Stage::Synthesis => self.synthesize(&record).await,
                Stage::ReportGeneration => self.generate_report(&record, template).await,
            },
            Ok(None) => Err(OrgBriefError::not_found(format!("entity '{entity}'"))),
            Err(e) => Err(e),
        };

        match result {
            Ok(status) => {
                info!(status = ?status, "stage finished");
                status
            }
            Err(e) if e.is_not_found() => {
                warn!(error = %e, "stage skipped");
                StageStatus::Skipped {
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                warn!(error = %e, "stage failed");
                StageStatus::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Identity
    // -----------------------------------------------------------------------

    /// Identity fields, CRM first, then internal, then the record name.
    async fn identity(&self, entity: &EntityId) -> Result<FieldMap> {
        self.carried(entity, self.extractor.schema().identity_fields()).await
    }

    /// Every ungrouped field, resolved the same way as [`Self::identity`].
    async fn verbatim_fields(&self, entity: &EntityId) -> Result<FieldMap> {
        self.carried(entity, self.extractor.schema().ungrouped_fields()).await
    }

    async fn carried<'a>(
        &self,
        entity: &EntityId,
        specs: impl Iterator<Item = &'a FieldSpec>,
    ) -> Result<FieldMap> {
        let crm = self.read(entity, PartitionKind::Crm).await?;
        let internal = self.read(entity, PartitionKind::Internal).await?;

        let mut carried = FieldMap::new();
        for spec in specs {
            let value = [&crm, &internal]
                .into_iter()
                .filter_map(|partition| partition.get(&spec.key))
                .find(|v| !v.is_sentinel())
                .cloned();
            if let Some(value) = value {
                carried.insert(spec.key.clone(), value);
            }
        }
        carried
            .entry("name".into())
            .or_insert_with(|| FieldValue::Scalar(entity.name().to_string()));
        Ok(carried)
    }

    fn profile(entity: &EntityId, identity: &FieldMap) -> EntityProfile {
        let website = identity
            .get("website")
            .filter(|v| !v.is_sentinel())
            .map(FieldValue::summary);
        EntityProfile::new(entity.name(), website)
    }

    async fn read(&self, entity: &EntityId, partition: PartitionKind) -> Result<FieldMap> {
        self.records
            .read_partition(&PartitionLocator::new(entity.clone(), partition))
            .await
    }

    async fn write(
        &self,
        entity: &EntityId,
        partition: PartitionKind,
        fields: &FieldMap,
    ) -> Result<()> {
        self.records
            .write_partition(&PartitionLocator::new(entity.clone(), partition), fields)
            .await
    }

    // -----------------------------------------------------------------------
    // Document extraction
    // -----------------------------------------------------------------------

    async fn extract_documents(&self, entity: &EntityId) -> Result<StageStatus> {
        let listed = self.documents.list_documents(entity).await?;
        let selected = select_documents(listed, self.clock.now(), &self.settings);
        if selected.is_empty() {
            return Ok(StageStatus::Skipped {
                reason: "no supported documents".into(),
            });
        }

        let identity = self.identity(entity).await?;
        let profile = Self::profile(entity, &identity);

        let mut request =
            CompletionRequest::new(ModelTier::Grounded, self.extractor.document_prompt(&profile))
                .with_response_schema(self.extractor.document_response_schema());
        for meta in &selected {
            let data = self.documents.document_bytes(&meta.id).await?;
            debug!(document = %meta.id, bytes = data.len(), "attaching document");
            request = request.with_document(InlineDocument {
                mime_type: meta.mime_type.clone(),
                data,
            });
        }

        let raw = self.client.complete(&request).await?;
        let fields = self.extractor.parse_document_fields(&raw)?;
        if !fields.is_empty() {
            self.write(entity, PartitionKind::Internal, &fields).await?;
        }

        info!(documents = selected.len(), fields = fields.len(), "document fields extracted");
        Ok(StageStatus::Completed)
    }

    // -----------------------------------------------------------------------
    // Web enrichment
    // -----------------------------------------------------------------------

    async fn enrich_from_web(&self, entity: &EntityId) -> Result<StageStatus> {
        let identity = self.identity(entity).await?;
        let profile = Self::profile(entity, &identity);

        let mut failures = Vec::new();
        for group in StageGroup::ALL {
            let scope = FieldScope::Group(group);
            let result = StageResult::from(self.enrich_group(&profile, group).await);
            if let StageResult::Failed { reason } = &result {
                warn!(group = group.as_str(), reason = %reason, "group marked with error sentinel");
                failures.push(format!("{}: {reason}", group.as_str()));
            }
            let fields = result.into_fields(&self.extractor, scope);
            self.write(entity, PartitionKind::Discovered, &fields).await?;
        }

        if failures.is_empty() {
            Ok(StageStatus::Completed)
        } else {
            Ok(StageStatus::Failed {
                reason: failures.join("; "),
            })
        }
    }

    async fn enrich_group(&self, profile: &EntityProfile, group: StageGroup) -> Result<FieldMap> {
        let scope = FieldScope::Group(group);
        let research = CompletionRequest::new(
            ModelTier::Grounded,
            self.extractor.extraction_prompt(profile, group),
        )
        .with_grounding();
        let raw = self.client.complete(&research).await?;

        let formatting = CompletionRequest::new(
            ModelTier::Fast,
            self.extractor.formatting_prompt(&raw, scope),
        );
        let formatted = self.client.complete(&formatting).await?;
        self.extractor.parse_structured(&formatted, scope)
    }

    // -----------------------------------------------------------------------
    // Synthesis
    // -----------------------------------------------------------------------

    async fn synthesize(&self, entity: &EntityId) -> Result<StageStatus> {
        let mut sources = Vec::new();
        for partition in PartitionKind::SOURCES {
            sources.push((partition, self.read(entity, partition).await?));
        }
        if sources.iter().all(|(_, fields)| fields.is_empty()) {
            return Ok(StageStatus::Skipped {
                reason: "no source data to reconcile".into(),
            });
        }

        let identity = self.identity(entity).await?;
        let profile = Self::profile(entity, &identity);
        let briefing = self.extractor.briefing_package(&identity, &sources);

        let result = StageResult::from(self.reconcile(&profile, &briefing).await);
        let failed = match &result {
            StageResult::Failed { reason } => Some(reason.clone()),
            StageResult::Parsed(_) => None,
        };

        let mut fields = result.into_fields(&self.extractor, FieldScope::AllGroups);
        fields.extend(self.verbatim_fields(entity).await?);
        self.write(entity, PartitionKind::Final, &fields).await?;

        Ok(match failed {
            Some(reason) => {
                warn!(reason = %reason, "synthesis wrote error sentinels");
                StageStatus::Failed { reason }
            }
            None => StageStatus::Completed,
        })
    }

    async fn reconcile(
        &self,
        profile: &EntityProfile,
        briefing: &serde_json::Value,
    ) -> Result<FieldMap> {
        let request = CompletionRequest::new(
            ModelTier::Grounded,
            self.extractor.synthesis_prompt(profile, briefing),
        );
        let raw = self.client.complete(&request).await?;

        let formatting = CompletionRequest::new(
            ModelTier::Fast,
            self.extractor.synthesis_formatting_prompt(&raw),
        );
        let formatted = self.client.complete(&formatting).await?;
        self.extractor.parse_structured(&formatted, FieldScope::AllGroups)
    }

    // -----------------------------------------------------------------------
    // Report generation
    // -----------------------------------------------------------------------

    async fn generate_report(
        &self,
        entity: &EntityId,
        template: Option<&str>,
    ) -> Result<StageStatus> {
        let final_fields = self.read(entity, PartitionKind::Final).await?;
        if final_fields.is_empty() {
            return Ok(StageStatus::Skipped {
                reason: "no reconciled data".into(),
            });
        }

        let mut report = ReportFields {
            title: entity.name().to_string(),
            ..Default::default()
        };
        for (key, value) in &final_fields {
            if key != REPORT_LINK_KEY {
                report.text.insert(key.clone(), value.summary());
            }
        }

        let logo = match self.records.resolve_asset(entity, AssetKind::Logo).await? {
            Some(locator) => Some(locator),
            None => final_fields
                .get("website")
                .and_then(|v| domain_of(&v.summary()))
                .map(|domain| self.settings.logo_url_template.replace("{domain}", &domain)),
        };
        let flag = match self.records.resolve_asset(entity, AssetKind::Flag).await? {
            Some(locator) => Some(locator),
            None => final_fields
                .get("countryCode")
                .and_then(|v| country_code(&v.summary()))
                .map(|code| self.settings.flag_url_template.replace("{code}", &code)),
        };
        if let Some(logo) = logo {
            report.images.insert(AssetKind::Logo.as_str().into(), logo);
        }
        if let Some(flag) = flag {
            report.images.insert(AssetKind::Flag.as_str().into(), flag);
        }

        let template = template.unwrap_or(self.settings.default_template.as_str());
        let locator = self.renderer.render_report(template, &report).await?;

        let mut link = FieldMap::new();
        link.insert(REPORT_LINK_KEY.into(), FieldValue::Scalar(locator.clone()));
        self.write(entity, PartitionKind::Final, &link).await?;

        info!(report = %locator, "report generated");
        Ok(StageStatus::Completed)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn is_supported(mime_type: &str) -> bool {
    mime_type == "application/pdf" || mime_type.starts_with("text/") || mime_type.starts_with("image/")
}

/// Newest supported documents inside the recency window, capped; otherwise
/// the newest `fallback_count` regardless of age.
fn select_documents(
    mut documents: Vec<DocumentMeta>,
    now: chrono::DateTime<chrono::Utc>,
    settings: &ExecutorSettings,
) -> Vec<DocumentMeta> {
    documents.retain(|d| is_supported(&d.mime_type));
    documents.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));

    let cutoff = chrono::Duration::from_std(settings.recency_window)
        .ok()
        .and_then(|window| now.checked_sub_signed(window));
    let recent: Vec<DocumentMeta> = documents
        .iter()
        .filter(|d| cutoff.is_none_or(|c| d.last_modified >= c))
        .take(settings.max_recent)
        .cloned()
        .collect();

    if recent.is_empty() {
        documents.truncate(settings.fallback_count);
        documents
    } else {
        recent
    }
}

/// Bare host of a website value, without a leading `www.`.
fn domain_of(website: &str) -> Option<String> {
    let website = website.trim();
    if website.is_empty() || website.eq_ignore_ascii_case(orgbrief_shared::UNDISCLOSED) {
        return None;
    }
    let with_scheme = if website.contains("://") {
        website.to_string()
    } else {
        format!("https://{website}")
    };
    let url = Url::parse(&with_scheme).ok()?;
    let host = url.host_str()?;
    Some(host.strip_prefix("www.").unwrap_or(host).to_string())
}

fn country_code(raw: &str) -> Option<String> {
    let code = raw.trim();
    (code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()))
        .then(|| code.to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeCompletion, MemoryDocuments, MemoryRecords, RecordingRenderer};
    use crate::collaborators::ManualClock;
    use chrono::{TimeZone, Utc};
    use orgbrief_shared::{ERROR_SENTINEL, UNDISCLOSED, UnifiedFieldSchema};

    struct Harness {
        records: Arc<MemoryRecords>,
        documents: Arc<MemoryDocuments>,
        renderer: Arc<RecordingRenderer>,
        client: Arc<FakeCompletion>,
        executor: StageExecutor,
    }

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn harness(client: FakeCompletion) -> Harness {
        let records = Arc::new(MemoryRecords::with_entities(&["Acme"]));
        let documents = Arc::new(MemoryDocuments::default());
        let renderer = Arc::new(RecordingRenderer::default());
        let client = Arc::new(client);
        let executor = StageExecutor::new(
            client.clone(),
            Extractor::new(Arc::new(UnifiedFieldSchema::builtin())),
            records.clone(),
            documents.clone(),
            renderer.clone(),
            Arc::new(ManualClock::new(now())),
            ExecutorSettings::default(),
        );
        Harness {
            records,
            documents,
            renderer,
            client,
            executor,
        }
    }

    fn acme() -> EntityId {
        EntityId::new("acme")
    }

    fn doc(id: &str, mime: &str, days_old: i64) -> DocumentMeta {
        DocumentMeta {
            id: id.into(),
            mime_type: mime.into(),
            last_modified: now() - chrono::Duration::days(days_old),
        }
    }

    #[test]
    fn recent_documents_are_capped() {
        let docs = vec![
            doc("a", "application/pdf", 10),
            doc("b", "application/pdf", 1),
            doc("c", "text/plain", 30),
            doc("d", "image/png", 50),
            doc("e", "application/zip", 0),
        ];
        let picked = select_documents(docs, now(), &ExecutorSettings::default());
        let ids: Vec<_> = picked.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["b", "a", "c"]);
    }

    #[test]
    fn stale_documents_fall_back_to_newest_two() {
        let docs = vec![
            doc("old", "application/pdf", 900),
            doc("older", "application/pdf", 1000),
            doc("newest", "application/pdf", 400),
        ];
        let picked = select_documents(docs, now(), &ExecutorSettings::default());
        let ids: Vec<_> = picked.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["newest", "old"]);
    }

    #[test]
    fn domains_and_codes() {
        assert_eq!(domain_of("https://www.acme.com/about").as_deref(), Some("acme.com"));
        assert_eq!(domain_of("acme.io").as_deref(), Some("acme.io"));
        assert_eq!(domain_of("Undisclosed"), None);
        assert_eq!(country_code(" us ").as_deref(), Some("US"));
        assert_eq!(country_code("USA"), None);
    }

    #[tokio::test]
    async fn unknown_entity_is_skipped() {
        let h = harness(FakeCompletion::formatting_json("{}"));
        let status = h
            .executor
            .run_stage(&EntityId::new("Globex"), Stage::WebEnrichment, None)
            .await;
        assert!(matches!(status, StageStatus::Skipped { .. }));
        assert_eq!(h.client.call_count(), 0);
    }

    #[tokio::test]
    async fn web_enrichment_writes_every_group() {
        let h = harness(FakeCompletion::formatting_json(
            r#"{"companySummary": {"description": "Rockets", "sources": ["https://acme.com"]},
                "arr": "$2M"}"#,
        ));
        let status = h.executor.run_stage(&acme(), Stage::WebEnrichment, None).await;
        assert_eq!(status, StageStatus::Completed);
        // one research and one formatting call per group
        assert_eq!(h.client.call_count(), 6);

        let discovered = h.records.partition("Acme", PartitionKind::Discovered);
        assert_eq!(discovered["companySummary"].summary(), "Rockets");
        assert_eq!(discovered["arr"].summary(), "$2M");
        assert_eq!(discovered["risks"].render(), UNDISCLOSED);
        assert!(discovered.contains_key("leadInvestor"));
    }

    #[tokio::test]
    async fn web_enrichment_twice_is_idempotent() {
        let h = harness(FakeCompletion::formatting_json(r#"{"arr": "$2M"}"#));
        h.executor.run_stage(&acme(), Stage::WebEnrichment, None).await;
        let first = h.records.partition("Acme", PartitionKind::Discovered);
        h.executor.run_stage(&acme(), Stage::WebEnrichment, None).await;
        assert_eq!(first, h.records.partition("Acme", PartitionKind::Discovered));
    }

    #[tokio::test]
    async fn failing_group_gets_error_sentinels() {
        let h = harness(FakeCompletion::new(|request| {
            if request.prompt.contains("[LAST_ROUND_LEAD_INVESTOR]") && request.tier == ModelTier::Grounded {
                return Err(OrgBriefError::Transport("503".into()));
            }
            Ok(if request.tier == ModelTier::Fast {
                "{}".into()
            } else {
                "[TAG] text".into()
            })
        }));
        let status = h.executor.run_stage(&acme(), Stage::WebEnrichment, None).await;
        assert!(matches!(status, StageStatus::Failed { .. }));

        let discovered = h.records.partition("Acme", PartitionKind::Discovered);
        assert_eq!(discovered["leadInvestor"].render(), ERROR_SENTINEL);
        assert_eq!(discovered["arr"].render(), UNDISCLOSED);
    }

    #[tokio::test]
    async fn document_extraction_writes_internal() {
        let h = harness(FakeCompletion::new(|request| {
            assert_eq!(request.documents.len(), 1);
            assert!(request.response_schema.is_some());
            Ok(r#"{"arr": "$3M ARR (FY24)", "risks": ""}"#.into())
        }));
        h.documents
            .add("Acme", doc("deck.pdf", "application/pdf", 5), b"%PDF");
        let status = h
            .executor
            .run_stage(&acme(), Stage::DocumentExtraction, None)
            .await;
        assert_eq!(status, StageStatus::Completed);

        let internal = h.records.partition("Acme", PartitionKind::Internal);
        assert_eq!(internal["arr"].summary(), "$3M ARR (FY24)");
        assert!(!internal.contains_key("risks"));
    }

    #[tokio::test]
    async fn missing_document_folder_skips() {
        let h = harness(FakeCompletion::formatting_json("{}"));
        let status = h
            .executor
            .run_stage(&acme(), Stage::DocumentExtraction, None)
            .await;
        assert!(matches!(status, StageStatus::Skipped { .. }));
    }

    #[tokio::test]
    async fn malformed_document_response_writes_nothing() {
        let h = harness(FakeCompletion::new(|_| Ok("not json".into())));
        h.documents.add("Acme", doc("a.txt", "text/plain", 1), b"hi");
        let status = h
            .executor
            .run_stage(&acme(), Stage::DocumentExtraction, None)
            .await;
        assert!(matches!(status, StageStatus::Failed { .. }));
        assert!(h.records.partition("Acme", PartitionKind::Internal).is_empty());
    }

    #[tokio::test]
    async fn synthesis_preserves_identity() {
        let h = harness(FakeCompletion::formatting_json(
            r#"{"arr": "$2.5M", "name": "Wrong Name"}"#,
        ));
        h.records.seed(
            "Acme",
            PartitionKind::Crm,
            &[("name", "Acme Corp"), ("website", "https://acme.com"), ("arr", "$2M")],
        );
        let status = h.executor.run_stage(&acme(), Stage::Synthesis, None).await;
        assert_eq!(status, StageStatus::Completed);

        let final_fields = h.records.partition("Acme", PartitionKind::Final);
        assert_eq!(final_fields["name"].summary(), "Acme Corp");
        assert_eq!(final_fields["website"].summary(), "https://acme.com");
        assert_eq!(final_fields["arr"].summary(), "$2.5M");

        let prompts = h.client.prompts();
        assert!(prompts[0].contains("\"crm\""));
    }

    #[tokio::test]
    async fn malformed_synthesis_still_writes_final() {
        let h = harness(FakeCompletion::formatting_json("definitely not json"));
        h.records.seed("Acme", PartitionKind::Crm, &[("arr", "$2M")]);
        let status = h.executor.run_stage(&acme(), Stage::Synthesis, None).await;
        assert!(matches!(status, StageStatus::Failed { .. }));

        let final_fields = h.records.partition("Acme", PartitionKind::Final);
        assert_eq!(final_fields["arr"].render(), ERROR_SENTINEL);
        assert_eq!(final_fields["name"].summary(), "Acme");
    }

    #[tokio::test]
    async fn synthesis_without_sources_skips() {
        let h = harness(FakeCompletion::formatting_json("{}"));
        let status = h.executor.run_stage(&acme(), Stage::Synthesis, None).await;
        assert!(matches!(status, StageStatus::Skipped { .. }));
    }

    #[tokio::test]
    async fn report_resolves_assets_and_links_back() {
        let h = harness(FakeCompletion::formatting_json("{}"));
        h.records.seed(
            "Acme",
            PartitionKind::Final,
            &[("name", "Acme"), ("website", "www.acme.com"), ("countryCode", "de"), ("arr", "$2M")],
        );
        let status = h
            .executor
            .run_stage(&acme(), Stage::ReportGeneration, Some("brief"))
            .await;
        assert_eq!(status, StageStatus::Completed);

        let calls = h.renderer.calls();
        assert_eq!(calls.len(), 1);
        let (template, fields) = &calls[0];
        assert_eq!(template, "brief");
        assert_eq!(fields.text["arr"], "$2M");
        assert!(fields.images["logo"].contains("acme.com"));
        assert_eq!(fields.images["flag"], "https://flagsapi.com/DE/flat/64.png");

        let final_fields = h.records.partition("Acme", PartitionKind::Final);
        assert_eq!(final_fields[REPORT_LINK_KEY].summary(), "reports/Acme-brief.md");
    }

    #[tokio::test]
    async fn country_code_flows_from_crm_to_report_flag() {
        let h = harness(FakeCompletion::formatting_json(r#"{"arr": "$2M"}"#));
        h.records.seed(
            "Acme",
            PartitionKind::Crm,
            &[("name", "Acme"), ("website", "acme.com"), ("countryCode", "DE")],
        );
        let status = h.executor.run_stage(&acme(), Stage::Synthesis, None).await;
        assert_eq!(status, StageStatus::Completed);
        let final_fields = h.records.partition("Acme", PartitionKind::Final);
        assert_eq!(final_fields["countryCode"].summary(), "DE");

        let status = h
            .executor
            .run_stage(&acme(), Stage::ReportGeneration, None)
            .await;
        assert_eq!(status, StageStatus::Completed);
        let (_, fields) = &h.renderer.calls()[0];
        assert_eq!(fields.images["flag"], "https://flagsapi.com/DE/flat/64.png");
        assert!(fields.images["logo"].contains("acme.com"));
    }

    #[tokio::test]
    async fn registered_assets_win() {
        let h = harness(FakeCompletion::formatting_json("{}"));
        h.records.seed("Acme", PartitionKind::Final, &[("website", "acme.com")]);
        h.records.set_asset("Acme", AssetKind::Logo, "file:///logos/acme.png");
        h.executor.run_stage(&acme(), Stage::ReportGeneration, None).await;

        let (template, fields) = &h.renderer.calls()[0];
        assert_eq!(template, "default");
        assert_eq!(fields.images["logo"], "file:///logos/acme.png");
        assert!(!fields.images.contains_key("flag"));
    }

    #[tokio::test]
    async fn report_without_final_data_skips() {
        let h = harness(FakeCompletion::formatting_json("{}"));
        let status = h
            .executor
            .run_stage(&acme(), Stage::ReportGeneration, None)
            .await;
        assert!(matches!(status, StageStatus::Skipped { .. }));
        assert!(h.renderer.calls().is_empty());
    }
}
