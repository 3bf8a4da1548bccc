//! # Period Reports
//!
//! Turns dated work-log entries kept in a document store into weekly and
//! monthly reports written by a pluggable text-generation backend.
//!
//! The core is a reconciliation-and-batch engine: group source entries by
//! period, diff the periods against report titles already published, and
//! generate each missing report with bounded concurrency, isolating
//! per-period failures.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ Source logs │──▶│  Reconcile  │──▶│ BatchExecutor│
//! │  (store)    │   │ period diff │   │  ≤ N in      │
//! └─────────────┘   └─────────────┘   │  flight      │
//!                                     └──────┬───────┘
//!                                            ▼
//!            ┌──────────────────────────────────────────────────┐
//!            │ PeriodReportPipeline (one per missing period)    │
//!            │ schema → fetch → summarize → create → publish →  │
//!            │ link                                             │
//!            └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! reports period 2025-01-14                 # 2025-W03  2025-01-13 ~ 2025-01-19
//! reports reconcile --kind week --dry-run   # list missing weekly reports
//! reports reconcile --kind all              # generate everything missing
//! reports generate 2025-10 --backend ollama # one monthly report
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`period`] | ISO-week / calendar-month derivation and period keys |
//! | [`chunk`] | Text chunking and batched block publishing |
//! | [`models`] | Core data types |
//! | [`store`] | Document-store trait, Notion and in-memory stores |
//! | [`generation`] | Text-generation backends and stable fallback |
//! | [`prompt`] | Prompt construction per period kind |
//! | [`pipeline`] | Per-period generation pipeline |
//! | [`reconcile`] | Existing-report listing and missing-period diff |
//! | [`batch`] | Bounded-concurrency executor |
//! | [`engine`] | Single-period and reconcile-all entry points |
//! | [`progress`] | Progress reporting on stderr |
//! | [`config`] | TOML configuration parsing |

pub mod batch;
pub mod chunk;
pub mod config;
pub mod engine;
pub mod generation;
pub mod models;
pub mod period;
pub mod pipeline;
pub mod progress;
pub mod prompt;
pub mod reconcile;
pub mod store;
