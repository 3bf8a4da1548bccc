//! Set-based reconciliation of source periods against published reports.
//!
//! A report exists for a period exactly when some document in the target
//! database has the period key as its title (surrounding whitespace
//! ignored). Titles that do not parse as a key of the requested kind are
//! ignored, so hand-written pages in the target database are harmless.
//!
//! Reconciliation lists the whole target database on every run, so its cost
//! grows with the number of published reports.

use std::collections::BTreeSet;

use anyhow::{Context, Result};

use crate::models::{LogEntry, ReportRecord};
use crate::period::{group_by_period, Period, PeriodKind};
use crate::store::DocumentStore;

/// Published reports of `kind` in `target_db`, one per key.
///
/// When several documents share a key, the first listed wins.
pub async fn list_existing_reports(
    store: &dyn DocumentStore,
    target_db: &str,
    kind: PeriodKind,
) -> Result<Vec<ReportRecord>> {
    let documents = store
        .list_documents(target_db)
        .await
        .with_context(|| format!("failed to list reports in {}", target_db))?;

    let mut seen = BTreeSet::new();
    let mut records = Vec::new();
    for doc in documents {
        let Some(title) = doc.title.as_deref() else {
            continue;
        };
        let Ok(period) = title.trim().parse::<Period>() else {
            continue;
        };
        if period.kind() != kind || !seen.insert(period) {
            continue;
        }
        records.push(ReportRecord {
            period_key: period.key(),
            document_id: doc.id,
            url: doc.url,
        });
    }
    Ok(records)
}

/// Keys of published reports of `kind` in `target_db`.
pub async fn list_existing_keys(
    store: &dyn DocumentStore,
    target_db: &str,
    kind: PeriodKind,
) -> Result<BTreeSet<String>> {
    Ok(list_existing_reports(store, target_db, kind)
        .await?
        .into_iter()
        .map(|r| r.period_key)
        .collect())
}

/// Periods of `kind` that have at least one entry but no published report,
/// ascending.
pub fn missing(existing: &BTreeSet<String>, entries: &[LogEntry], kind: PeriodKind) -> Vec<Period> {
    group_by_period(entries, kind)
        .into_keys()
        .filter(|period| !existing.contains(&period.key()))
        .collect()
}
