//! Core data models used throughout the report engine.
//!
//! These types represent the source entries, store documents, jobs, and
//! results that flow through reconciliation and batch generation.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::generation::Backend;
use crate::period::Period;

/// One raw record in the source store. Read-only to this engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: String,
    pub date: NaiveDate,
    pub title: Option<String>,
    /// Handle used to read the entry body via
    /// [`DocumentStore::fetch_content`](crate::store::DocumentStore::fetch_content).
    pub content_ref: String,
    /// Other non-empty fields of the entry as plain text, by field name.
    pub properties: BTreeMap<String, String>,
}

/// A document as listed from a database, used to read report titles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub id: String,
    pub url: String,
    pub title: Option<String>,
}

/// Identity of a newly created document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub id: String,
    pub url: String,
}

/// Properties of a document to create in a target database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocument {
    pub title_field: String,
    pub title: String,
    /// Date-valued fields to set, by field name.
    pub dates: Vec<(String, NaiveDate)>,
}

/// A structural content unit appended to a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Divider,
    Heading(String),
    Paragraph(String),
}

/// Type of a database field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Title,
    Date,
    RichText,
    Relation { database_id: String },
    Other(String),
}

/// A named field in a database schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// An already-published report, identified solely by its title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRecord {
    pub period_key: String,
    pub document_id: String,
    pub url: String,
}

/// Input to one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationJob {
    pub period: Period,
    pub source_database: String,
    pub target_database: String,
}

/// Terminal state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    /// No source entries for the period. Expected, not an error.
    Skipped,
    Failed,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success => f.write_str("ok"),
            Outcome::Skipped => f.write_str("skipped"),
            Outcome::Failed => f.write_str("failed"),
        }
    }
}

/// Output of one job.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    pub period_key: String,
    pub outcome: Outcome,
    pub document_id: Option<String>,
    pub url: Option<String>,
    pub source_entry_count: usize,
    pub requested_capability: Backend,
    /// Backend that actually produced the text, once summarization ran.
    pub used_capability: Option<Backend>,
    /// Skip reason or failure message.
    pub error: Option<String>,
    /// Non-fatal problem after the report was published (e.g. linking).
    pub warning: Option<String>,
}

impl GenerationResult {
    pub fn skipped(period_key: impl Into<String>, requested: Backend, reason: impl Into<String>) -> Self {
        Self {
            period_key: period_key.into(),
            outcome: Outcome::Skipped,
            document_id: None,
            url: None,
            source_entry_count: 0,
            requested_capability: requested,
            used_capability: None,
            error: Some(reason.into()),
            warning: None,
        }
    }

    pub fn failed(period_key: impl Into<String>, requested: Backend, error: impl Into<String>) -> Self {
        Self {
            period_key: period_key.into(),
            outcome: Outcome::Failed,
            document_id: None,
            url: None,
            source_entry_count: 0,
            requested_capability: requested,
            used_capability: None,
            error: Some(error.into()),
            warning: None,
        }
    }

    pub fn success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    /// True when a backend other than the requested one produced the text.
    pub fn fell_back(&self) -> bool {
        self.used_capability
            .is_some_and(|used| used != self.requested_capability)
    }

    /// The published report, for successful results.
    pub fn record(&self) -> Option<ReportRecord> {
        match (&self.outcome, &self.document_id) {
            (Outcome::Success, Some(id)) => Some(ReportRecord {
                period_key: self.period_key.clone(),
                document_id: id.clone(),
                url: self.url.clone().unwrap_or_default(),
            }),
            _ => None,
        }
    }
}

/// Aggregated result of a batch, `results` in input job order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub results: Vec<GenerationResult>,
}

impl BatchSummary {
    pub fn from_results(results: Vec<GenerationResult>) -> Self {
        let count = |outcome: Outcome| results.iter().filter(|r| r.outcome == outcome).count();
        Self {
            total: results.len(),
            succeeded: count(Outcome::Success),
            skipped: count(Outcome::Skipped),
            failed: count(Outcome::Failed),
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_by_outcome() {
        let mut ok = GenerationResult::failed("2025-W01", Backend::Claude, "x");
        ok.outcome = Outcome::Success;
        ok.error = None;
        let summary = BatchSummary::from_results(vec![
            ok,
            GenerationResult::skipped("2025-W02", Backend::Claude, "no source entries for period"),
            GenerationResult::failed("2025-W03", Backend::Claude, "boom"),
            GenerationResult::failed("2025-W04", Backend::Claude, "boom"),
        ]);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.results[2].period_key, "2025-W03");
    }

    #[test]
    fn test_fell_back() {
        let mut r = GenerationResult::failed("2025-10", Backend::Claude, "x");
        assert!(!r.fell_back());
        r.used_capability = Some(Backend::Claude);
        assert!(!r.fell_back());
        r.used_capability = Some(Backend::Gemini);
        assert!(r.fell_back());
    }

    #[test]
    fn test_record_only_for_success() {
        let mut r = GenerationResult::failed("2025-10", Backend::Gemini, "x");
        r.document_id = Some("doc".into());
        assert!(r.record().is_none());
        r.outcome = Outcome::Success;
        r.url = Some("https://example/doc".into());
        let rec = r.record().unwrap();
        assert_eq!(rec.period_key, "2025-10");
        assert_eq!(rec.url, "https://example/doc");
    }
}
