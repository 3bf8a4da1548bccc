//! Report engine: the two entry points an external trigger calls.
//!
//! - [`ReportEngine::generate_for_period`] runs the pipeline for one period.
//! - [`ReportEngine::reconcile_and_generate`] finds every period with source
//!   entries but no published report and generates them as a bounded batch.
//!
//! The engine holds no state between calls; everything it knows comes from
//! the [`DocumentStore`] on each invocation.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;

use crate::batch::{default_concurrency, BatchExecutor};
use crate::config::Config;
use crate::generation::{Backend, GenerationCapability};
use crate::models::{BatchSummary, GenerationJob, GenerationResult};
use crate::period::{group_by_period, Period, PeriodKind};
use crate::pipeline::{PeriodReportPipeline, PublishSettings, ReportSettings};
use crate::progress::{NoProgress, ProgressReporter};
use crate::reconcile::{self, list_existing_keys};
use crate::store::DocumentStore;

/// What a reconcile run would do.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcilePlan {
    pub kind: String,
    /// Source entries with a date.
    pub entry_count: usize,
    pub existing: BTreeSet<String>,
    /// Missing periods with their entry counts, ascending.
    pub missing: Vec<MissingPeriod>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MissingPeriod {
    #[serde(skip)]
    pub period: Period,
    /// Canonical key of `period`.
    pub key: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub entries: usize,
}

pub struct ReportEngine {
    store: Arc<dyn DocumentStore>,
    generation: Arc<GenerationCapability>,
    weekly: ReportSettings,
    monthly: ReportSettings,
    publish: PublishSettings,
    progress: Arc<dyn ProgressReporter>,
}

impl ReportEngine {
    /// Engine with default field names for both kinds.
    pub fn new(store: Arc<dyn DocumentStore>, generation: Arc<GenerationCapability>) -> Self {
        Self {
            store,
            generation,
            weekly: ReportSettings::default(),
            monthly: ReportSettings::default(),
            publish: PublishSettings::default(),
            progress: Arc::new(NoProgress),
        }
    }

    /// Engine using the field names and publish settings of `config`.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn DocumentStore>,
        generation: Arc<GenerationCapability>,
    ) -> Self {
        let mut engine = Self::new(store, generation).with_publish(PublishSettings::from(&config.publish));
        if let Some(weekly) = &config.weekly {
            engine.weekly = ReportSettings::from(weekly);
        }
        if let Some(monthly) = &config.monthly {
            engine.monthly = ReportSettings::from(monthly);
        }
        engine
    }

    pub fn with_settings(mut self, kind: PeriodKind, settings: ReportSettings) -> Self {
        match kind {
            PeriodKind::Week => self.weekly = settings,
            PeriodKind::Month => self.monthly = settings,
        }
        self
    }

    pub fn with_publish(mut self, publish: PublishSettings) -> Self {
        self.publish = publish;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    fn settings(&self, kind: PeriodKind) -> &ReportSettings {
        match kind {
            PeriodKind::Week => &self.weekly,
            PeriodKind::Month => &self.monthly,
        }
    }

    /// A fresh pipeline for `kind` over the shared collaborators.
    pub fn pipeline(&self, kind: PeriodKind) -> PeriodReportPipeline {
        PeriodReportPipeline::new(
            self.store.clone(),
            self.generation.clone(),
            self.settings(kind).clone(),
            self.publish.clone(),
        )
        .with_progress(self.progress.clone())
    }

    /// Generate the report for one period. Does not check whether the report
    /// already exists.
    pub async fn generate_for_period(
        &self,
        period: Period,
        source_db: &str,
        target_db: &str,
        capability: Backend,
    ) -> GenerationResult {
        let job = GenerationJob {
            period,
            source_database: source_db.to_string(),
            target_database: target_db.to_string(),
        };
        self.pipeline(period.kind()).run(&job, capability).await
    }

    /// Work out which periods of `kind` are missing from `target_db`.
    pub async fn plan(&self, source_db: &str, target_db: &str, kind: PeriodKind) -> Result<ReconcilePlan> {
        let settings = self.settings(kind);
        let entries = self
            .store
            .query_entries(source_db, &settings.date_property, None)
            .await
            .with_context(|| format!("failed to read source entries from {}", source_db))?;
        let existing = list_existing_keys(self.store.as_ref(), target_db, kind).await?;

        let groups = group_by_period(&entries, kind);
        let missing: Vec<MissingPeriod> = reconcile::missing(&existing, &entries, kind)
            .into_iter()
            .map(|period| MissingPeriod {
                key: period.key(),
                start: period.start(),
                end: period.end(),
                entries: groups.get(&period).map_or(0, Vec::len),
                period,
            })
            .collect();

        tracing::info!(
            kind = %kind,
            entries = entries.len(),
            existing = existing.len(),
            missing = missing.len(),
            "reconcile plan"
        );

        Ok(ReconcilePlan {
            kind: kind.to_string(),
            entry_count: entries.len(),
            existing,
            missing,
        })
    }

    /// Generate every missing report of `kind`, at most `concurrency` at a
    /// time (default per kind when `None`).
    ///
    /// Fails only when the batch cannot be built: unreadable source or target,
    /// or a zero concurrency. Per-period failures are in the summary.
    pub async fn reconcile_and_generate(
        &self,
        source_db: &str,
        target_db: &str,
        kind: PeriodKind,
        capability: Backend,
        concurrency: Option<usize>,
    ) -> Result<BatchSummary> {
        let executor = BatchExecutor::new(concurrency.unwrap_or_else(|| default_concurrency(kind)))?
            .with_progress(self.progress.clone());
        let plan = self.plan(source_db, target_db, kind).await?;

        let jobs: Vec<GenerationJob> = plan
            .missing
            .iter()
            .map(|missing| GenerationJob {
                period: missing.period,
                source_database: source_db.to_string(),
                target_database: target_db.to_string(),
            })
            .collect();

        tracing::info!(
            kind = %kind,
            jobs = jobs.len(),
            concurrency = executor.concurrency(),
            requested = %capability,
            "starting batch"
        );

        let summary = executor
            .run(jobs, capability, |job| {
                let pipeline = self.pipeline(kind);
                async move { pipeline.run(&job, capability).await }
            })
            .await;
        Ok(summary)
    }
}
