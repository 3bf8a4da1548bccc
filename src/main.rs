//! # Period Reports CLI (`reports`)
//!
//! The `reports` binary is the trigger surface of the report engine: a cron
//! job or a person calls it to generate one period's report or to reconcile
//! and generate everything that is missing.
//!
//! ## Usage
//!
//! ```bash
//! reports --config ./config/reports.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `reports generate <KEY>` | Generate the report for one period (`2025-W03`, `2025-10`) |
//! | `reports reconcile` | Generate every missing weekly and/or monthly report |
//! | `reports period <DATE>` | Print the period containing a date and its range |
//!
//! ## Examples
//!
//! ```bash
//! # What would be generated?
//! reports reconcile --kind week --dry-run
//!
//! # Weekly then monthly, with Ollama as the requested backend
//! reports reconcile --kind all --backend ollama
//!
//! # Regenerate last month's report
//! reports generate 2025-09 --backend gemini
//! ```
//!
//! Logs go to stderr (`RUST_LOG` overrides the `info` default). Command
//! output goes to stdout. Partial batch failure is reported, not an error
//! exit.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use period_reports::batch::default_concurrency;
use period_reports::config::{self, Config};
use period_reports::engine::ReportEngine;
use period_reports::generation::{Backend, GenerationCapability};
use period_reports::models::{BatchSummary, GenerationResult};
use period_reports::period::{period_of, range_of, Period, PeriodKind};
use period_reports::progress::ProgressMode;
use period_reports::store::notion::NotionStore;
use period_reports::store::DocumentStore;

/// Period Reports CLI: weekly and monthly reports generated from work logs.
///
/// All commands except `period` read a TOML configuration file given by
/// `--config`. See `config/reports.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "reports",
    about = "Period Reports — weekly and monthly reports generated from dated work logs",
    version,
    long_about = "Period Reports groups dated work-log entries into ISO weeks and calendar \
    months, finds the periods without a published report, and generates them with a \
    text-generation backend, falling back to a stable backend when the requested one fails."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/reports.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    /// Progress on stderr: `off`, `human`, or `json`.
    /// Default: human when stderr is a TTY, otherwise off.
    #[arg(long, global = true)]
    progress: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Generate the report for a single period.
    ///
    /// The report is generated even if one already exists for the period.
    Generate {
        /// Period key: `YYYY-Www` for a week, `YYYY-MM` for a month.
        period: String,

        /// Requested backend: `gemini`, `claude`, or `ollama`.
        /// Defaults to `generation.default`.
        #[arg(long)]
        backend: Option<String>,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate every missing report.
    ///
    /// Periods with source entries but no report titled with their key are
    /// generated in a bounded-concurrency batch.
    Reconcile {
        /// `week`, `month`, or `all` (weekly first, then monthly).
        #[arg(long, default_value = "all")]
        kind: String,

        /// Requested backend. Defaults to `generation.default`.
        #[arg(long)]
        backend: Option<String>,

        /// Maximum reports generated at once. Defaults to the section's
        /// `concurrency`, else 5 for weeks and 3 for months.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Only list the missing periods.
        #[arg(long)]
        dry_run: bool,

        /// Print the plan or summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the period containing a date.
    Period {
        /// Date as `YYYY-MM-DD`.
        date: String,

        /// `week` or `month`.
        #[arg(long, default_value = "week")]
        kind: String,
    },
}

fn init_tracing(log_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    let installed = if log_json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if installed.is_err() {
        eprintln!("Tracing subscriber already set; skipping re-initialization.");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let progress = match &cli.progress {
        Some(mode) => mode.parse::<ProgressMode>()?,
        None => ProgressMode::default_for_tty(),
    };

    match cli.command {
        // Needs no config
        Commands::Period { date, kind } => print_period(&date, &kind)?,
        Commands::Generate {
            period,
            backend,
            json,
        } => {
            // Validate the key before touching config or the network
            let period: Period = period.parse()?;
            let cfg = config::load_config(&cli.config)?;
            let backend = requested_backend(&cfg, backend.as_deref())?;
            let engine = build_engine(&cfg, progress)?;
            run_generate(&cfg, &engine, period, backend, json).await?;
        }
        Commands::Reconcile {
            kind,
            backend,
            concurrency,
            dry_run,
            json,
        } => {
            let kinds = parse_kinds(&kind)?;
            let cfg = config::load_config(&cli.config)?;
            let backend = requested_backend(&cfg, backend.as_deref())?;
            let engine = build_engine(&cfg, progress)?;
            run_reconcile(&cfg, &engine, &kinds, backend, concurrency, dry_run, json).await?;
        }
    }

    Ok(())
}

fn print_period(date: &str, kind: &str) -> Result<()> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{}': expected YYYY-MM-DD", date))?;
    let kind: PeriodKind = kind.parse()?;
    let period = period_of(date, kind);
    println!("{}  {}", period, range_of(&period));
    Ok(())
}

fn parse_kinds(kind: &str) -> Result<Vec<PeriodKind>> {
    if kind.eq_ignore_ascii_case("all") {
        return Ok(PeriodKind::ALL.to_vec());
    }
    Ok(vec![kind.parse()?])
}

fn requested_backend(cfg: &Config, flag: Option<&str>) -> Result<Backend> {
    match flag {
        Some(name) => name.parse(),
        None => Ok(cfg.generation.default),
    }
}

fn build_engine(cfg: &Config, progress: ProgressMode) -> Result<ReportEngine> {
    let store: Arc<dyn DocumentStore> = Arc::new(NotionStore::from_config(&cfg.store)?);
    let generation = Arc::new(GenerationCapability::from_config(&cfg.generation));
    if !generation.is_available(generation.stable()) {
        tracing::warn!(stable = %generation.stable(), "stable backend is unavailable; fallback will fail");
    }
    Ok(ReportEngine::from_config(cfg, store, generation).with_progress(progress.reporter()))
}

async fn run_generate(
    cfg: &Config,
    engine: &ReportEngine,
    period: Period,
    backend: Backend,
    json: bool,
) -> Result<()> {
    let section = cfg.report(period.kind())?;
    let result = engine
        .generate_for_period(
            period,
            &section.source_database,
            &section.target_database,
            backend,
        )
        .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_reconcile(
    cfg: &Config,
    engine: &ReportEngine,
    kinds: &[PeriodKind],
    backend: Backend,
    concurrency: Option<usize>,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    // `all` runs only the configured kinds; an explicit kind must be configured
    let mut sections = Vec::new();
    for &kind in kinds {
        match cfg.report(kind) {
            Ok(section) => sections.push((kind, section)),
            Err(e) if kinds.len() == 1 => return Err(e),
            Err(_) => tracing::info!(kind = %kind, "no config section; skipping"),
        }
    }
    if sections.is_empty() {
        bail!("no [weekly] or [monthly] section in config");
    }

    let mut output = serde_json::Map::new();
    for (kind, section) in sections {
        let source = &section.source_database;
        let target = &section.target_database;

        if dry_run {
            let plan = engine.plan(source, target, kind).await?;
            if json {
                output.insert(kind.section().to_string(), serde_json::to_value(&plan)?);
                continue;
            }
            println!(
                "{}: {} entries, {} existing reports, {} missing",
                kind.section(),
                plan.entry_count,
                plan.existing.len(),
                plan.missing.len()
            );
            for missing in &plan.missing {
                println!(
                    "  {}  {} ~ {}  ({} entries)",
                    missing.key, missing.start, missing.end, missing.entries
                );
            }
            continue;
        }

        let concurrency = concurrency
            .or(section.concurrency)
            .unwrap_or_else(|| default_concurrency(kind));
        let summary = engine
            .reconcile_and_generate(source, target, kind, backend, Some(concurrency))
            .await?;

        if json {
            output.insert(kind.section().to_string(), serde_json::to_value(&summary)?);
        } else {
            print_summary(kind, &summary);
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("ok");
    }
    Ok(())
}

fn print_result(result: &GenerationResult) {
    println!(
        "{}  {}  ({} entries)",
        result.period_key, result.outcome, result.source_entry_count
    );
    if let Some(used) = result.used_capability {
        println!("  requested {}, used {}", result.requested_capability, used);
    }
    match result.record() {
        Some(record) => println!("  url: {}", record.url),
        None => {
            if let Some(url) = &result.url {
                println!("  partial document: {}", url);
            }
        }
    }
    if let Some(error) = &result.error {
        println!("  reason: {}", error);
    }
    if let Some(warning) = &result.warning {
        println!("  warning: {}", warning);
    }
}

fn print_summary(kind: PeriodKind, summary: &BatchSummary) {
    println!(
        "{}: total {}, succeeded {}, skipped {}, failed {}",
        kind.section(),
        summary.total,
        summary.succeeded,
        summary.skipped,
        summary.failed
    );
    for result in &summary.results {
        print_result(result);
    }
}
