//! Document-store abstraction consumed by the report engine.
//!
//! The [`DocumentStore`] trait covers every primitive the engine needs from
//! the external structured store: querying entries by date, listing report
//! titles, creating documents, appending content blocks, and schema and
//! relation updates. The engine owns no state of its own; everything lives
//! behind this trait.
//!
//! Implementations:
//! - [`notion::NotionStore`]: Notion REST API over `reqwest`.
//! - [`memory::InMemoryStore`]: in-process store for tests and dry runs.
//!
//! Implementations must be `Send + Sync`; concurrent jobs share one store.

pub mod memory;
pub mod notion;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Block, DocumentRef, FieldSpec, LogEntry, NewDocument, StoredDocument};
use crate::period::DateRange;

/// Abstract document store.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`query_entries`](DocumentStore::query_entries) | Entries whose date falls in a range (or all) |
/// | [`list_documents`](DocumentStore::list_documents) | Every document with its title |
/// | [`fetch_content`](DocumentStore::fetch_content) | Plain-text body of an entry |
/// | [`create_document`](DocumentStore::create_document) | New document in a database |
/// | [`append_blocks`](DocumentStore::append_blocks) | Append content blocks to a document |
/// | [`read_schema`](DocumentStore::read_schema) | Fields of a database |
/// | [`update_schema`](DocumentStore::update_schema) | Add fields to a database |
/// | [`create_relation`](DocumentStore::create_relation) | Link a document to other documents |
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Entries of `database_id` whose `date_property` falls in `range`
    /// (inclusive), or every dated entry when `range` is `None`. Entries
    /// without a date are omitted.
    async fn query_entries(
        &self,
        database_id: &str,
        date_property: &str,
        range: Option<DateRange>,
    ) -> Result<Vec<LogEntry>>;

    /// Every document in `database_id`, with its title text.
    async fn list_documents(&self, database_id: &str) -> Result<Vec<StoredDocument>>;

    /// Plain-text body behind an entry's `content_ref`.
    async fn fetch_content(&self, content_ref: &str) -> Result<String>;

    async fn create_document(&self, database_id: &str, doc: &NewDocument) -> Result<DocumentRef>;

    /// Append `blocks` in order. Callers respect the per-request block limit.
    async fn append_blocks(&self, document_id: &str, blocks: &[Block]) -> Result<()>;

    async fn read_schema(&self, database_id: &str) -> Result<Vec<FieldSpec>>;

    /// Add `fields` to the database schema.
    async fn update_schema(&self, database_id: &str, fields: &[FieldSpec]) -> Result<()>;

    /// Set relation field `field` of `document_id` to `target_ids`.
    async fn create_relation(
        &self,
        document_id: &str,
        field: &str,
        target_ids: &[String],
    ) -> Result<()>;
}
