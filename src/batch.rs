//! Bounded-concurrency batch executor.
//!
//! Runs one worker per [`GenerationJob`] with at most `concurrency` workers
//! in flight. Jobs past the ceiling wait for a permit. Each job runs on its
//! own task, so one job's error or panic never reaches its siblings; a
//! panic is recorded as a `Failed` result for that job's period.
//!
//! Results come back in input order regardless of completion order.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::Semaphore;

use crate::generation::Backend;
use crate::models::{BatchSummary, GenerationJob, GenerationResult};
use crate::period::PeriodKind;
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter};

/// Default ceiling for weekly batches.
pub const WEEKLY_CONCURRENCY: usize = 5;

/// Default ceiling for monthly batches.
pub const MONTHLY_CONCURRENCY: usize = 3;

pub fn default_concurrency(kind: PeriodKind) -> usize {
    match kind {
        PeriodKind::Week => WEEKLY_CONCURRENCY,
        PeriodKind::Month => MONTHLY_CONCURRENCY,
    }
}

pub struct BatchExecutor {
    concurrency: usize,
    progress: Arc<dyn ProgressReporter>,
}

impl BatchExecutor {
    pub fn new(concurrency: usize) -> Result<Self> {
        if concurrency == 0 {
            bail!("concurrency must be >= 1");
        }
        Ok(Self {
            concurrency,
            progress: Arc::new(NoProgress),
        })
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `worker` for every job and collect the results in job order.
    pub async fn run<F, Fut>(
        &self,
        jobs: Vec<GenerationJob>,
        requested: Backend,
        worker: F,
    ) -> BatchSummary
    where
        F: Fn(GenerationJob) -> Fut,
        Fut: Future<Output = GenerationResult> + Send + 'static,
    {
        let total = jobs.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let finished = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::with_capacity(total);
        for job in jobs {
            let key = job.period.key();
            let fut = worker(job);
            let semaphore = semaphore.clone();
            let finished = finished.clone();
            let progress = self.progress.clone();
            let period = key.clone();

            let handle = tokio::spawn(async move {
                // The semaphore is never closed.
                let _permit = semaphore.acquire_owned().await.ok();
                let result = fut.await;
                let n = finished.fetch_add(1, Ordering::SeqCst) + 1;
                progress.report(ProgressEvent::JobFinished {
                    period,
                    outcome: result.outcome,
                    n,
                    total,
                });
                result
            });
            handles.push((key, handle));
        }

        let mut results = Vec::with_capacity(total);
        for (key, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(period = %key, error = %e, "report job panicked");
                    GenerationResult::failed(key, requested, format!("job panicked: {}", e))
                }
            };
            results.push(result);
        }

        let summary = BatchSummary::from_results(results);
        tracing::info!(
            total = summary.total,
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed,
            "batch finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Outcome;
    use crate::period::Period;
    use std::time::Duration;

    fn jobs(n: u32) -> Vec<GenerationJob> {
        (1..=n)
            .map(|w| GenerationJob {
                period: Period::week(2025, w).unwrap(),
                source_database: "logs".into(),
                target_database: "weekly".into(),
            })
            .collect()
    }

    fn ok(job: &GenerationJob) -> GenerationResult {
        let mut r = GenerationResult::failed(job.period.key(), Backend::Gemini, "");
        r.outcome = Outcome::Success;
        r.error = None;
        r
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        assert!(BatchExecutor::new(0).is_err());
        assert_eq!(default_concurrency(PeriodKind::Week), 5);
        assert_eq!(default_concurrency(PeriodKind::Month), 3);
    }

    #[tokio::test]
    async fn test_ceiling_and_order() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let executor = BatchExecutor::new(3).unwrap();

        let summary = executor
            .run(jobs(5), Backend::Gemini, |job| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    // Later jobs finish first.
                    let delay = 60 - 10 * job.period.index() as u64;
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    ok(&job)
                }
            })
            .await;

        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(summary.total, 5);
        assert_eq!(summary.succeeded, 5);
        let keys: Vec<&str> = summary.results.iter().map(|r| r.period_key.as_str()).collect();
        assert_eq!(keys, vec!["2025-W01", "2025-W02", "2025-W03", "2025-W04", "2025-W05"]);
    }

    #[tokio::test]
    async fn test_failures_and_panics_are_isolated() {
        let executor = BatchExecutor::new(2).unwrap();
        let summary = executor
            .run(jobs(4), Backend::Claude, |job| async move {
                match job.period.index() {
                    2 => GenerationResult::failed(job.period.key(), Backend::Claude, "store down"),
                    3 => panic!("generator exploded"),
                    _ => ok(&job),
                }
            })
            .await;

        assert_eq!(summary.total, 4);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.results[1].error.as_deref(), Some("store down"));
        assert_eq!(summary.results[2].period_key, "2025-W03");
        assert!(summary.results[2].error.as_deref().unwrap().contains("panicked"));
        assert_eq!(summary.results[2].requested_capability, Backend::Claude);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let executor = BatchExecutor::new(1).unwrap();
        let summary = executor
            .run(Vec::new(), Backend::Gemini, |job| async move { ok(&job) })
            .await;
        assert_eq!(summary.total, 0);
        assert!(summary.results.is_empty());
    }
}
