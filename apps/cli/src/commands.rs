//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use orgbrief_completion::{CompletionSettings, GeminiClient, TokioSleeper};
use orgbrief_core::{
    CheckpointHandle, DEFAULT_TEMPLATE, ExecutorSettings, FsDocumentSource, ResumeOutcome,
    Scheduler, SchedulerProgress, StageExecutor, SystemClock, TemplateRenderer, import_entities,
};
use orgbrief_extractor::Extractor;
use orgbrief_shared::{
    AppConfig, EntityId, EntityOutcome, PartitionKind, ReportPayload, SchedulerLimits, Stage,
    StageFlags, StageStatus, UnifiedFieldSchema, api_key, expand_path, init_config, load_config,
};
use orgbrief_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// OrgBrief: resumable AI enrichment of organization records.
#[derive(Parser)]
#[command(
    name = "orgbrief",
    version,
    about = "Enrich organization records from documents and the web, reconcile them, and render reports.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Overrides for the `[scheduler]` config section.
#[derive(Args, Debug, Default)]
pub(crate) struct LimitArgs {
    /// Maximum entities per invocation.
    #[arg(long)]
    pub batch_size: Option<u32>,

    /// Time budget per invocation, in seconds.
    #[arg(long)]
    pub time_budget: Option<u64>,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Import entity records from a CRM JSON export.
    Import {
        /// Path to the JSON file.
        file: PathBuf,
    },

    /// Queue entities for processing.
    Submit {
        /// Entity names (repeatable).
        #[arg(short, long = "entity", required_unless_present_any = ["all", "cohorts"])]
        entities: Vec<String>,

        /// Queue every entity of an imported cohort (repeatable).
        #[arg(short, long = "cohort")]
        cohorts: Vec<String>,

        /// Queue every imported entity.
        #[arg(long, conflicts_with_all = ["entities", "cohorts"])]
        all: bool,

        /// Extract fields from the entity's documents.
        #[arg(long)]
        docs: bool,

        /// Enrich from grounded web search.
        #[arg(long)]
        web: bool,

        /// Reconcile all sources into the final record.
        #[arg(long)]
        synthesis: bool,

        /// Render reports once the submission drains.
        #[arg(long)]
        report: bool,

        /// Report template id (defaults to the configured template).
        #[arg(long, requires = "report")]
        template: Option<String>,

        /// Only report on these entities (repeatable).
        #[arg(long = "report-entity", requires = "report")]
        report_entities: Vec<String>,
    },

    /// Run one time-boxed invocation over the queue.
    Resume {
        #[command(flatten)]
        limits: LimitArgs,
    },

    /// Keep resuming on the trigger period until the queue is empty.
    Run {
        #[command(flatten)]
        limits: LimitArgs,
    },

    /// Show queued work and trigger state.
    Status,

    /// Drop all queued work and the trigger.
    Clear,

    /// Print an entity's stored fields.
    Show {
        /// Entity name.
        entity: String,

        /// Partition: internal, crm, discovered or final.
        #[arg(short, long, default_value = "final")]
        partition: String,
    },

    /// Field schema management.
    Schema {
        #[command(subcommand)]
        action: SchemaAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Schema subcommands.
#[derive(Subcommand)]
pub(crate) enum SchemaAction {
    /// List the active fields.
    Show,
    /// Write the active schema as JSON.
    Export {
        /// Output file (stdout when omitted).
        file: Option<PathBuf>,
    },
    /// Validate and persist a schema JSON file.
    Import {
        file: PathBuf,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file and default template.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "orgbrief=info",
        1 => "orgbrief=debug",
        _ => "orgbrief=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Import { file } => cmd_import(&file).await,
        Command::Submit {
            entities,
            cohorts,
            all,
            docs,
            web,
            synthesis,
            report,
            template,
            report_entities,
        } => {
            let flags = StageFlags {
                document_extraction: docs,
                web_enrichment: web,
                synthesis,
                report_generation: report,
            };
            let payload = report.then(|| ReportPayload {
                template,
                entities: report_entities.into_iter().map(EntityId::new).collect(),
            });
            let selection = Selection {
                names: entities,
                cohorts,
                all,
            };
            cmd_submit(selection, flags, payload).await
        }
        Command::Resume { limits } => cmd_resume(&limits).await,
        Command::Run { limits } => cmd_run(&limits).await,
        Command::Status => cmd_status().await,
        Command::Clear => cmd_clear().await,
        Command::Show { entity, partition } => cmd_show(&entity, &partition).await,
        Command::Schema { action } => match action {
            SchemaAction::Show => cmd_schema_show().await,
            SchemaAction::Export { file } => cmd_schema_export(file.as_deref()).await,
            SchemaAction::Import { file } => cmd_schema_import(&file).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

async fn open_storage(config: &AppConfig) -> Result<Arc<Storage>> {
    let path = expand_path(&config.storage.database_path)?;
    Ok(Arc::new(Storage::open(&path).await?))
}

async fn open_storage_readonly(config: &AppConfig) -> Result<Arc<Storage>> {
    let path = expand_path(&config.storage.database_path)?;
    Storage::open_readonly(&path)
        .await
        .map(Arc::new)
        .map_err(|e| eyre!("{e}: run `orgbrief import` first"))
}

async fn active_schema(storage: &Storage) -> Result<UnifiedFieldSchema> {
    Ok(storage
        .load_schema()
        .await?
        .unwrap_or_else(UnifiedFieldSchema::builtin))
}

/// The active schema without creating a database; built-in when none exists.
async fn stored_schema(config: &AppConfig) -> Result<UnifiedFieldSchema> {
    let path = expand_path(&config.storage.database_path)?;
    match Storage::open_readonly(&path).await {
        Ok(storage) => active_schema(&storage).await,
        Err(e) if e.is_not_found() => Ok(UnifiedFieldSchema::builtin()),
        Err(e) => Err(e.into()),
    }
}

fn limits_from(config: &AppConfig, overrides: &LimitArgs) -> SchedulerLimits {
    let mut limits = SchedulerLimits::from(config);
    if let Some(batch_size) = overrides.batch_size {
        limits.batch_size = batch_size.max(1);
    }
    if let Some(secs) = overrides.time_budget {
        limits.time_budget = Duration::from_secs(secs);
    }
    limits
}

/// Build the scheduler and everything it drives.
///
/// `api_key` may be empty for commands that never reach the completion
/// service (submit, status, clear).
async fn build_scheduler(
    config: &AppConfig,
    storage: Arc<Storage>,
    limits: SchedulerLimits,
    api_key: String,
) -> Result<Scheduler> {
    let schema = Arc::new(active_schema(&storage).await?);
    let client = GeminiClient::new(CompletionSettings::try_from(config)?, api_key)?;
    let clock = Arc::new(SystemClock);

    let executor = StageExecutor::new(
        Arc::new(client),
        Extractor::new(schema),
        storage.clone(),
        Arc::new(FsDocumentSource::new(expand_path(&config.documents.root)?)),
        Arc::new(TemplateRenderer::new(
            expand_path(&config.report.templates_dir)?,
            expand_path(&config.report.output_dir)?,
        )),
        clock.clone(),
        ExecutorSettings::from(config),
    );

    Ok(Scheduler::new(
        Arc::new(executor),
        CheckpointHandle::spawn(storage.clone()),
        storage,
        clock,
        Arc::new(TokioSleeper),
        limits,
    ))
}

/// Scheduler for queue bookkeeping only; it never calls the completion
/// service.
async fn queue_scheduler(config: &AppConfig, storage: Arc<Storage>) -> Result<Scheduler> {
    let limits = SchedulerLimits::from(config);
    build_scheduler(config, storage, limits, String::new()).await
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Result<Self> {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")?
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(80));
        Ok(Self { spinner })
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

fn status_label(status: &StageStatus) -> String {
    match status {
        StageStatus::Completed => "completed".into(),
        StageStatus::Failed { reason } => format!("failed ({reason})"),
        StageStatus::Skipped { reason } => format!("skipped ({reason})"),
    }
}

impl SchedulerProgress for CliProgress {
    fn entity_started(&self, entity: &EntityId, attempt: u32) {
        self.spinner
            .set_message(format!("Processing {entity} (attempt {attempt})"));
    }

    fn stage_finished(&self, entity: &EntityId, stage: Stage, status: &StageStatus) {
        self.spinner
            .set_message(format!("{entity}: {stage} {}", status_label(status)));
    }

    fn entity_finished(&self, outcome: &EntityOutcome) {
        let summary: Vec<String> = outcome
            .stages
            .iter()
            .map(|s| format!("{} {}", s.stage, status_label(&s.status)))
            .collect();
        self.spinner
            .println(format!("  {}: {}", outcome.entity, summary.join(", ")));
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_import(file: &Path) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;
    let summary = import_entities(&storage, file).await?;

    println!();
    println!("  Import complete!");
    println!("  Entities: {}", summary.entities);
    println!("  Fields:   {}", summary.fields);
    println!("  Assets:   {}", summary.assets);
    println!("  Cohorts:  {}", summary.cohorts);
    println!();
    Ok(())
}

/// Which entities a submission targets.
#[derive(Debug, Default)]
struct Selection {
    names: Vec<String>,
    cohorts: Vec<String>,
    all: bool,
}

/// Resolve a selection against imported records: named entities first, then
/// cohort members, without duplicates.
async fn resolve_selection(storage: &Storage, selection: Selection) -> Result<Vec<EntityId>> {
    if selection.all {
        return Ok(storage.list_entities().await?);
    }

    let mut resolved: Vec<EntityId> = Vec::new();
    for name in &selection.names {
        match storage.find_entity(name).await? {
            Some(entity) => resolved.push(entity),
            None => return Err(eyre!("unknown entity '{name}': import it first")),
        }
    }
    for cohort in &selection.cohorts {
        let members = storage.cohort_entities(cohort).await?;
        if members.is_empty() {
            return Err(eyre!("cohort '{cohort}' has no imported entities"));
        }
        resolved.extend(members);
    }

    let mut seen = std::collections::HashSet::new();
    resolved.retain(|entity| seen.insert(entity.key()));
    Ok(resolved)
}

async fn cmd_submit(
    selection: Selection,
    flags: StageFlags,
    report: Option<ReportPayload>,
) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;
    let scheduler = queue_scheduler(&config, storage.clone()).await?;
    let entities = resolve_selection(&storage, selection).await?;

    let ack = scheduler.submit(entities, flags, report).await?;
    println!("{ack}");
    Ok(())
}

async fn cmd_resume(overrides: &LimitArgs) -> Result<()> {
    let config = load_config()?;
    let key = api_key(&config)?;
    let storage = open_storage(&config).await?;
    let scheduler = build_scheduler(&config, storage, limits_from(&config, overrides), key).await?;

    let progress = CliProgress::new()?;
    let outcome = scheduler.resume(&progress).await;
    progress.finish();

    match outcome? {
        ResumeOutcome::Continue { processed } => {
            println!("Processed {processed} entities; work remains.");
        }
        ResumeOutcome::Done { processed } => {
            println!("Processed {processed} entities; queue empty.");
        }
    }
    Ok(())
}

async fn cmd_run(overrides: &LimitArgs) -> Result<()> {
    let config = load_config()?;
    let key = api_key(&config)?;
    let storage = open_storage(&config).await?;
    let scheduler = build_scheduler(&config, storage, limits_from(&config, overrides), key).await?;

    info!(
        period_secs = scheduler.trigger_period().as_secs(),
        "draining queue"
    );
    let progress = CliProgress::new()?;
    let total = scheduler.run_until_drained(&progress).await;
    progress.finish();

    println!("Processed {} entities.", total?);
    Ok(())
}

async fn cmd_status() -> Result<()> {
    let config = load_config()?;
    let scheduler = queue_scheduler(&config, open_storage_readonly(&config).await?).await?;
    let status = scheduler.status().await?;

    println!();
    println!(
        "  Trigger: {}",
        if status.trigger_active { "active" } else { "inactive" }
    );
    println!("  Pending entities: {}", status.queue.pending_entities());
    for descriptor in &status.queue.descriptors {
        let stages: Vec<&str> = Stage::ORDERED
            .iter()
            .filter(|s| descriptor.stages.contains(**s))
            .map(|s| s.as_str())
            .collect();
        let pending: Vec<String> = descriptor.entities.iter().map(|e| e.to_string()).collect();
        println!();
        println!("  {} [{}]", descriptor.id, stages.join(", "));
        println!("    pending:   {}", pending.join(", "));
        println!("    processed: {}", descriptor.processed.len());
        if descriptor.front_attempts > 0 {
            println!("    attempts on front entity: {}", descriptor.front_attempts);
        }
    }
    println!();
    Ok(())
}

async fn cmd_clear() -> Result<()> {
    let config = load_config()?;
    let scheduler = queue_scheduler(&config, open_storage(&config).await?).await?;
    scheduler.clear().await?;
    println!("Queue cleared and trigger removed.");
    Ok(())
}

async fn cmd_show(name: &str, partition: &str) -> Result<()> {
    let partition: PartitionKind = partition.parse()?;
    let config = load_config()?;
    let storage = open_storage_readonly(&config).await?;
    let entity = storage
        .find_entity(name)
        .await?
        .ok_or_else(|| eyre!("unknown entity '{name}'"))?;
    let schema = active_schema(&storage).await?;
    let fields = storage.read_partition(&entity, partition).await?;

    println!();
    println!("  {entity} / {partition}");
    println!();
    for spec in schema.fields() {
        if let Some(value) = fields.get(&spec.key) {
            println!("  {}:", spec.label);
            for line in value.render().lines() {
                println!("    {line}");
            }
        }
    }
    println!();
    Ok(())
}

async fn cmd_schema_show() -> Result<()> {
    let config = load_config()?;
    let schema = stored_schema(&config).await?;

    for spec in schema.fields() {
        let group = spec.group.map(|g| g.as_str()).unwrap_or("-");
        let mut flags = Vec::new();
        if spec.identity {
            flags.push("identity");
        }
        if spec.multi_valued {
            flags.push("multi");
        }
        if spec.boolean {
            flags.push("yes/no");
        }
        println!(
            "{:<28} {:<12} [{}] {}",
            spec.key,
            group,
            spec.tag,
            flags.join(",")
        );
    }
    Ok(())
}

async fn cmd_schema_export(file: Option<&Path>) -> Result<()> {
    let config = load_config()?;
    let json = stored_schema(&config).await?.to_json()?;
    match file {
        Some(path) => {
            std::fs::write(path, json)?;
            println!("Schema written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn cmd_schema_import(file: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(file)?;
    let schema = UnifiedFieldSchema::from_json(&raw)?;
    let config = load_config()?;
    let storage = open_storage(&config).await?;
    storage.save_schema(&schema).await?;
    println!("Schema with {} fields saved.", schema.fields().len());
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());

    let config = load_config()?;
    let templates = expand_path(&config.report.templates_dir)?;
    std::fs::create_dir_all(&templates)?;
    let template = templates.join(format!("{}.md", config.report.default_template));
    if !template.exists() {
        std::fs::write(&template, DEFAULT_TEMPLATE)?;
        println!("Default template written to: {}", template.display());
    }
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn submit_parses_stage_flags() {
        let cli = Cli::parse_from([
            "orgbrief", "submit", "-e", "Acme", "-e", "Globex", "--web", "--report", "--template",
            "brief",
        ]);
        match cli.command {
            Command::Submit {
                entities,
                web,
                report,
                template,
                docs,
                ..
            } => {
                assert_eq!(entities, ["Acme", "Globex"]);
                assert!(web && report && !docs);
                assert_eq!(template.as_deref(), Some("brief"));
            }
            _ => panic!("expected submit"),
        }
    }

    #[test]
    fn submit_accepts_cohorts_but_not_with_all() {
        let cli = Cli::parse_from(["orgbrief", "submit", "--cohort", "Spring 2024", "--web"]);
        match cli.command {
            Command::Submit {
                entities, cohorts, ..
            } => {
                assert!(entities.is_empty());
                assert_eq!(cohorts, ["Spring 2024"]);
            }
            _ => panic!("expected submit"),
        }
        assert!(Cli::try_parse_from(["orgbrief", "submit", "--all", "-c", "Spring"]).is_err());
        assert!(Cli::try_parse_from(["orgbrief", "submit", "--web"]).is_err());
    }

    #[tokio::test]
    async fn selection_merges_names_and_cohorts() {
        let path = std::env::temp_dir().join(format!(
            "ob_cli_{}_{}.db",
            std::process::id(),
            nonce()
        ));
        let storage = Storage::open(&path).await.unwrap();
        for (name, cohort) in [("Acme", "Spring"), ("Globex", "Spring"), ("Initech", "Fall")] {
            let entity = storage.upsert_entity(&EntityId::new(name)).await.unwrap();
            storage.set_cohort(&entity, Some(cohort)).await.unwrap();
        }

        let selection = Selection {
            names: vec!["globex".into()],
            cohorts: vec!["spring".into()],
            all: false,
        };
        let entities = resolve_selection(&storage, selection).await.unwrap();
        assert_eq!(entities, vec![EntityId::new("Globex"), EntityId::new("Acme")]);

        let missing = Selection {
            cohorts: vec!["Winter".into()],
            ..Default::default()
        };
        assert!(resolve_selection(&storage, missing).await.is_err());
    }

    fn nonce() -> u128 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default()
    }

    #[test]
    fn limit_overrides_apply() {
        let config = AppConfig::default();
        let limits = limits_from(
            &config,
            &LimitArgs {
                batch_size: Some(0),
                time_budget: Some(30),
            },
        );
        assert_eq!(limits.batch_size, 1);
        assert_eq!(limits.time_budget, Duration::from_secs(30));
    }
}
