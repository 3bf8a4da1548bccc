//! Per-period report pipeline.
//!
//! One run takes a [`GenerationJob`] through a fixed sequence of stages:
//!
//! | Stage | Effect | On failure |
//! |-------|--------|------------|
//! | `EnsureSchema` | Add missing date-range and relation fields to the target | `Failed` |
//! | `Fetch` | Query source entries dated inside the period | `Failed`; no entries means `Skipped` |
//! | `Summarize` | Read entry bodies, build the prompt, generate with fallback | `Failed` |
//! | `CreateDocument` | Create the report titled with the period key | `Failed` |
//! | `PublishContent` | Chunk the text and append it in batches | `Failed` (document is left partial) |
//! | `LinkSources` | Relate the report to its source entries | warning only, still `Success` |
//!
//! A run never returns an error: every outcome, including failures, is a
//! [`GenerationResult`]. The backend that produced the text is recorded as
//! soon as summarization succeeds, so it survives a later failure.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::chunk::{chunk_text, publish_blocks, to_blocks, MAX_BATCH_SIZE, MAX_FRAGMENT_LEN};
use crate::config::{PublishConfig, ReportConfig};
use crate::generation::{Backend, GenerationCapability};
use crate::models::{FieldKind, FieldSpec, GenerationJob, GenerationResult, NewDocument, Outcome};
use crate::period::range_of;
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter, Stage};
use crate::prompt::{build_prompt, combine, render_entry, SYSTEM_PROMPT};
use crate::store::DocumentStore;

/// Field names used on source entries and target reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSettings {
    pub date_property: String,
    /// Used only when the target schema reports no title field.
    pub title_property: String,
    pub start_property: Option<String>,
    pub end_property: Option<String>,
    pub relation_property: Option<String>,
    /// Source fields rendered into the prompt next to each entry.
    pub prompt_properties: Vec<String>,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            date_property: "Date".to_string(),
            title_property: "Name".to_string(),
            start_property: Some("Start".to_string()),
            end_property: Some("End".to_string()),
            relation_property: Some("Entries".to_string()),
            prompt_properties: Vec::new(),
        }
    }
}

fn optional(name: &str) -> Option<String> {
    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}

impl From<&ReportConfig> for ReportSettings {
    fn from(config: &ReportConfig) -> Self {
        Self {
            date_property: config.date_property.clone(),
            title_property: config.title_property.clone(),
            start_property: optional(&config.start_property),
            end_property: optional(&config.end_property),
            relation_property: optional(&config.relation_property),
            prompt_properties: config
                .prompt_properties
                .iter()
                .filter_map(|name| optional(name))
                .collect(),
        }
    }
}

/// Content publishing limits and decoration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishSettings {
    pub max_fragment_len: usize,
    pub max_batch_size: usize,
    pub heading: Option<String>,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            max_fragment_len: MAX_FRAGMENT_LEN,
            max_batch_size: MAX_BATCH_SIZE,
            heading: Some("AI Summary".to_string()),
        }
    }
}

impl From<&PublishConfig> for PublishSettings {
    fn from(config: &PublishConfig) -> Self {
        Self {
            max_fragment_len: config.max_fragment_len,
            max_batch_size: config.max_batch_size,
            heading: optional(&config.heading),
        }
    }
}

/// Target fields resolved by `EnsureSchema`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TargetFields {
    title: String,
    start: Option<String>,
    end: Option<String>,
    relation: Option<String>,
}

/// Runs the stages for one period. Holds only shared collaborators, so a
/// fresh pipeline can be built per job.
pub struct PeriodReportPipeline {
    store: Arc<dyn DocumentStore>,
    generation: Arc<GenerationCapability>,
    report: ReportSettings,
    publish: PublishSettings,
    progress: Arc<dyn ProgressReporter>,
}

impl PeriodReportPipeline {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        generation: Arc<GenerationCapability>,
        report: ReportSettings,
        publish: PublishSettings,
    ) -> Self {
        Self {
            store,
            generation,
            report,
            publish,
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Run every stage for `job`, requesting text from `requested`.
    pub async fn run(&self, job: &GenerationJob, requested: Backend) -> GenerationResult {
        let key = job.period.key();
        tracing::info!(period = %key, requested = %requested, "report job started");

        let mut result = GenerationResult {
            period_key: key.clone(),
            outcome: Outcome::Failed,
            document_id: None,
            url: None,
            source_entry_count: 0,
            requested_capability: requested,
            used_capability: None,
            error: None,
            warning: None,
        };

        if let Err(e) = self.execute(job, requested, &mut result).await {
            result.outcome = Outcome::Failed;
            result.error = Some(format!("{:#}", e));
        }

        tracing::info!(
            period = %key,
            outcome = %result.outcome,
            requested = %requested,
            used = ?result.used_capability,
            "report job finished"
        );
        result
    }

    async fn execute(
        &self,
        job: &GenerationJob,
        requested: Backend,
        result: &mut GenerationResult,
    ) -> Result<()> {
        let period = job.period;
        let key = period.key();

        self.stage(&key, Stage::EnsureSchema);
        let fields = self
            .ensure_schema(&job.target_database, &job.source_database)
            .await
            .with_context(|| format!("{} stage failed", Stage::EnsureSchema))?;

        self.stage(&key, Stage::Fetch);
        let range = range_of(&period);
        let entries = self
            .store
            .query_entries(&job.source_database, &self.report.date_property, Some(range))
            .await
            .with_context(|| format!("{} stage failed", Stage::Fetch))?;
        if entries.is_empty() {
            *result = GenerationResult::skipped(
                key.as_str(),
                requested,
                format!("no source entries for period {} ({})", key, range),
            );
            return Ok(());
        }
        result.source_entry_count = entries.len();

        self.stage(&key, Stage::Summarize);
        let mut sections = Vec::with_capacity(entries.len());
        for entry in &entries {
            let body = self
                .store
                .fetch_content(&entry.content_ref)
                .await
                .with_context(|| format!("failed to read entry {}", entry.id))
                .with_context(|| format!("{} stage failed", Stage::Summarize))?;
            sections.push(render_entry(entry, &body, &self.report.prompt_properties));
        }
        let prompt = build_prompt(&period, &combine(&sections));
        let generated = self
            .generation
            .generate(requested, &prompt, Some(SYSTEM_PROMPT))
            .await
            .with_context(|| format!("{} stage failed", Stage::Summarize))?;
        result.used_capability = Some(generated.used);
        if generated.fell_back() {
            self.progress.report(ProgressEvent::Fallback {
                period: key.clone(),
                requested,
                used: generated.used,
            });
        }

        self.stage(&key, Stage::CreateDocument);
        let mut dates = Vec::new();
        if let Some(start) = &fields.start {
            dates.push((start.clone(), range.start));
        }
        if let Some(end) = &fields.end {
            dates.push((end.clone(), range.end));
        }
        let document = self
            .store
            .create_document(
                &job.target_database,
                &NewDocument {
                    title_field: fields.title.clone(),
                    title: key.clone(),
                    dates,
                },
            )
            .await
            .with_context(|| format!("{} stage failed", Stage::CreateDocument))?;
        result.document_id = Some(document.id.clone());
        result.url = Some(document.url.clone());

        self.stage(&key, Stage::PublishContent);
        let blocks = to_blocks(
            chunk_text(&generated.text, self.publish.max_fragment_len),
            self.publish.heading.as_deref(),
        );
        let store = &self.store;
        let document_id = document.id.as_str();
        publish_blocks(&blocks, self.publish.max_batch_size, move |batch| {
            store.append_blocks(document_id, batch)
        })
        .await
        .with_context(|| format!("{} stage failed", Stage::PublishContent))?;

        result.outcome = Outcome::Success;

        if let Some(relation) = &fields.relation {
            self.stage(&key, Stage::LinkSources);
            let ids: Vec<String> = entries.iter().map(|e| e.id.clone()).collect();
            if let Err(e) = self.store.create_relation(&document.id, relation, &ids).await {
                let message = format!("{} stage failed: {:#}", Stage::LinkSources, e);
                tracing::warn!(period = %key, error = %message, "source linking failed; report kept");
                result.warning = Some(message);
            }
        }

        Ok(())
    }

    fn stage(&self, key: &str, stage: Stage) {
        tracing::debug!(period = %key, stage = %stage, "pipeline stage");
        self.progress.report(ProgressEvent::Stage {
            period: key.to_string(),
            stage,
        });
    }

    /// Add missing target fields and resolve which ones can be written.
    ///
    /// A configured field whose name is taken by a field of another type is
    /// left alone and not written.
    async fn ensure_schema(&self, target_db: &str, source_db: &str) -> Result<TargetFields> {
        let schema = self.store.read_schema(target_db).await?;
        let existing = |name: &str| schema.iter().find(|f| f.name == name);

        let mut missing: Vec<FieldSpec> = Vec::new();
        let mut resolve = |name: &Option<String>, wanted: FieldKind| -> Option<String> {
            let name = name.as_ref()?;
            match existing(name.as_str()) {
                Some(field) if same_kind(&field.kind, &wanted) => Some(name.clone()),
                Some(_) => None,
                None => {
                    missing.push(FieldSpec::new(name.clone(), wanted));
                    Some(name.clone())
                }
            }
        };

        let start = resolve(&self.report.start_property, FieldKind::Date);
        let end = resolve(&self.report.end_property, FieldKind::Date);
        let relation = resolve(
            &self.report.relation_property,
            FieldKind::Relation {
                database_id: source_db.to_string(),
            },
        );

        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(|f| f.name.as_str()).collect();
            tracing::info!(database = %target_db, fields = ?names, "adding fields to target schema");
            self.store.update_schema(target_db, &missing).await?;
        }

        let title = schema
            .iter()
            .find(|f| f.kind == FieldKind::Title)
            .map(|f| f.name.clone())
            .unwrap_or_else(|| self.report.title_property.clone());

        Ok(TargetFields {
            title,
            start,
            end,
            relation,
        })
    }
}

fn same_kind(a: &FieldKind, b: &FieldKind) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}
