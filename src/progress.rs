//! Report generation progress.
//!
//! Reports observable progress while reports are generated so users see
//! which stage each period is in, when a backend fell back, and how many
//! jobs of a batch are done. Progress is emitted on **stderr** so stdout
//! remains parseable for scripts.

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use crate::generation::Backend;
use crate::models::Outcome;

/// Stage of the per-period pipeline, in execution order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Stage {
    EnsureSchema,
    Fetch,
    Summarize,
    CreateDocument,
    PublishContent,
    LinkSources,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::EnsureSchema => "ensure_schema",
            Stage::Fetch => "fetch",
            Stage::Summarize => "summarize",
            Stage::CreateDocument => "create_document",
            Stage::PublishContent => "publish_content",
            Stage::LinkSources => "link_sources",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single progress event.
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    /// A pipeline entered `stage` for `period`.
    Stage { period: String, stage: Stage },
    /// The requested backend failed and another one produced the text.
    Fallback {
        period: String,
        requested: Backend,
        used: Backend,
    },
    /// A batch job finished: n of total done.
    JobFinished {
        period: String,
        outcome: Outcome,
        n: usize,
        total: usize,
    },
}

/// Reports progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    /// Emit a progress event. Called concurrently from batch jobs.
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "report 2025-W03  summarize".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Stage { period, stage } => format!("report {}  {}\n", period, stage),
            ProgressEvent::Fallback {
                period,
                requested,
                used,
            } => format!(
                "report {}  fallback  requested {}, used {}\n",
                period, requested, used
            ),
            ProgressEvent::JobFinished {
                period,
                outcome,
                n,
                total,
            } => format!(
                "report {}  {}  {} / {} jobs\n",
                period,
                outcome,
                format_number(*n as u64),
                format_number(*total as u64)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn to_json(event: &ProgressEvent) -> serde_json::Value {
        match event {
            ProgressEvent::Stage { period, stage } => serde_json::json!({
                "event": "stage",
                "period": period,
                "stage": stage.name(),
            }),
            ProgressEvent::Fallback {
                period,
                requested,
                used,
            } => serde_json::json!({
                "event": "fallback",
                "period": period,
                "requested": requested,
                "used": used,
            }),
            ProgressEvent::JobFinished {
                period,
                outcome,
                n,
                total,
            } => serde_json::json!({
                "event": "job_finished",
                "period": period,
                "outcome": outcome,
                "n": n,
                "total": total,
            }),
        }
    }
}

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        if let Ok(line) = serde_json::to_string(&Self::to_json(&event)) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode, shared by every job of a run.
    pub fn reporter(&self) -> Arc<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
        }
    }
}

impl std::str::FromStr for ProgressMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => anyhow::bail!("Unknown progress mode: '{}'. Must be off, human, or json.", other),
        }
    }
}
