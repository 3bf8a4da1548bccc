//! In-memory [`DocumentStore`] implementation for tests and dry runs.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Field names are checked against each database's schema the way the
//! remote store does, so writes to unknown fields fail. Individual
//! operations can be made to fail with [`InMemoryStore::fail_on`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::models::{
    Block, DocumentRef, FieldKind, FieldSpec, LogEntry, NewDocument, StoredDocument,
};
use crate::period::DateRange;

use super::DocumentStore;

/// Store operations, for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    QueryEntries,
    ListDocuments,
    FetchContent,
    CreateDocument,
    AppendBlocks,
    ReadSchema,
    UpdateSchema,
    CreateRelation,
}

/// A document held by the in-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocument {
    pub id: String,
    pub url: String,
    pub title: Option<String>,
    pub dates: HashMap<String, NaiveDate>,
    /// Text-valued fields.
    pub properties: HashMap<String, String>,
    pub content: String,
    pub blocks: Vec<Block>,
    pub relations: HashMap<String, Vec<String>>,
}

#[derive(Default)]
struct MemoryDatabase {
    schema: Vec<FieldSpec>,
    documents: Vec<MemoryDocument>,
}

/// In-memory store for testing.
pub struct InMemoryStore {
    databases: RwLock<HashMap<String, MemoryDatabase>>,
    failing: RwLock<HashSet<StoreOp>>,
    append_calls: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            databases: RwLock::new(HashMap::new()),
            failing: RwLock::new(HashSet::new()),
            append_calls: AtomicUsize::new(0),
        }
    }

    /// Create (or reset) a database with the given schema.
    pub fn create_database(&self, database_id: &str, schema: Vec<FieldSpec>) {
        self.databases.write().unwrap().insert(
            database_id.to_string(),
            MemoryDatabase {
                schema,
                documents: Vec::new(),
            },
        );
    }

    /// Add a dated entry with a body to `database_id`. Returns its id.
    pub fn insert_entry(
        &self,
        database_id: &str,
        date_property: &str,
        date: NaiveDate,
        title: &str,
        content: &str,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let mut databases = self.databases.write().unwrap();
        let db = databases.entry(database_id.to_string()).or_default();
        db.documents.push(MemoryDocument {
            id: id.clone(),
            url: format!("memory://{}/{}", database_id, id),
            title: Some(title.to_string()),
            dates: HashMap::from([(date_property.to_string(), date)]),
            content: content.to_string(),
            ..MemoryDocument::default()
        });
        id
    }

    /// Add an already-published document titled `title`. Returns its id.
    pub fn insert_titled(&self, database_id: &str, title: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let mut databases = self.databases.write().unwrap();
        let db = databases.entry(database_id.to_string()).or_default();
        db.documents.push(MemoryDocument {
            id: id.clone(),
            url: format!("memory://{}/{}", database_id, id),
            title: Some(title.to_string()),
            ..MemoryDocument::default()
        });
        id
    }

    /// Set a text field on an existing document.
    pub fn set_property(&self, document_id: &str, name: &str, value: &str) -> Result<()> {
        self.with_document(document_id, |_, doc| {
            doc.properties.insert(name.to_string(), value.to_string());
            Ok(())
        })
    }

    /// Snapshot of every document in `database_id`.
    pub fn documents(&self, database_id: &str) -> Vec<MemoryDocument> {
        self.databases
            .read()
            .unwrap()
            .get(database_id)
            .map(|db| db.documents.clone())
            .unwrap_or_default()
    }

    /// Snapshot of a document by id, from any database.
    pub fn document(&self, document_id: &str) -> Option<MemoryDocument> {
        self.databases
            .read()
            .unwrap()
            .values()
            .flat_map(|db| db.documents.iter())
            .find(|d| d.id == document_id)
            .cloned()
    }

    pub fn schema(&self, database_id: &str) -> Vec<FieldSpec> {
        self.databases
            .read()
            .unwrap()
            .get(database_id)
            .map(|db| db.schema.clone())
            .unwrap_or_default()
    }

    /// Make every subsequent call of `op` fail.
    pub fn fail_on(&self, op: StoreOp) {
        self.failing.write().unwrap().insert(op);
    }

    /// Number of `append_blocks` calls received.
    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }

    fn check(&self, op: StoreOp) -> Result<()> {
        if self.failing.read().unwrap().contains(&op) {
            bail!("injected {:?} failure", op);
        }
        Ok(())
    }

    fn with_document<T>(
        &self,
        document_id: &str,
        f: impl FnOnce(&[FieldSpec], &mut MemoryDocument) -> Result<T>,
    ) -> Result<T> {
        let mut databases = self.databases.write().unwrap();
        for db in databases.values_mut() {
            if let Some(doc) = db.documents.iter_mut().find(|d| d.id == document_id) {
                return f(&db.schema, doc);
            }
        }
        Err(anyhow!("document not found: {}", document_id))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn has_field(schema: &[FieldSpec], name: &str, wanted: impl Fn(&FieldKind) -> bool) -> bool {
    schema.iter().any(|f| f.name == name && wanted(&f.kind))
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn query_entries(
        &self,
        database_id: &str,
        date_property: &str,
        range: Option<DateRange>,
    ) -> Result<Vec<LogEntry>> {
        self.check(StoreOp::QueryEntries)?;
        let databases = self.databases.read().unwrap();
        let db = databases
            .get(database_id)
            .ok_or_else(|| anyhow!("database not found: {}", database_id))?;

        let mut entries: Vec<LogEntry> = db
            .documents
            .iter()
            .filter_map(|doc| {
                let date = *doc.dates.get(date_property)?;
                if range.is_some_and(|r| !r.contains(date)) {
                    return None;
                }
                Some(LogEntry {
                    id: doc.id.clone(),
                    date,
                    title: doc.title.clone(),
                    content_ref: doc.id.clone(),
                    properties: doc
                        .properties
                        .iter()
                        .filter(|(_, value)| !value.trim().is_empty())
                        .map(|(name, value)| (name.clone(), value.clone()))
                        .collect(),
                })
            })
            .collect();
        entries.sort_by_key(|e| e.date);
        Ok(entries)
    }

    async fn list_documents(&self, database_id: &str) -> Result<Vec<StoredDocument>> {
        self.check(StoreOp::ListDocuments)?;
        let databases = self.databases.read().unwrap();
        let db = databases
            .get(database_id)
            .ok_or_else(|| anyhow!("database not found: {}", database_id))?;
        Ok(db
            .documents
            .iter()
            .map(|d| StoredDocument {
                id: d.id.clone(),
                url: d.url.clone(),
                title: d.title.clone(),
            })
            .collect())
    }

    async fn fetch_content(&self, content_ref: &str) -> Result<String> {
        self.check(StoreOp::FetchContent)?;
        self.document(content_ref)
            .map(|d| d.content)
            .ok_or_else(|| anyhow!("document not found: {}", content_ref))
    }

    async fn create_document(&self, database_id: &str, doc: &NewDocument) -> Result<DocumentRef> {
        self.check(StoreOp::CreateDocument)?;
        let mut databases = self.databases.write().unwrap();
        let db = databases
            .get_mut(database_id)
            .ok_or_else(|| anyhow!("database not found: {}", database_id))?;

        let title_ok = db.schema.iter().all(|f| f.kind != FieldKind::Title)
            || has_field(&db.schema, &doc.title_field, |k| *k == FieldKind::Title);
        if !title_ok {
            bail!("{} is not the title property of {}", doc.title_field, database_id);
        }
        for (field, _) in &doc.dates {
            if !has_field(&db.schema, field, |k| *k == FieldKind::Date) {
                bail!("{} is not a date property that exists", field);
            }
        }

        let id = Uuid::new_v4().to_string();
        let url = format!("memory://{}/{}", database_id, id);
        db.documents.push(MemoryDocument {
            id: id.clone(),
            url: url.clone(),
            title: Some(doc.title.clone()),
            dates: doc.dates.iter().cloned().collect(),
            ..MemoryDocument::default()
        });
        Ok(DocumentRef { id, url })
    }

    async fn append_blocks(&self, document_id: &str, blocks: &[Block]) -> Result<()> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        self.check(StoreOp::AppendBlocks)?;
        if blocks.len() > crate::config::STORE_APPEND_LIMIT {
            bail!("body.children.length should be ≤ {}", crate::config::STORE_APPEND_LIMIT);
        }
        for block in blocks {
            if let Block::Paragraph(text) | Block::Heading(text) = block {
                if text.chars().count() > crate::config::STORE_TEXT_LIMIT {
                    bail!("text.content.length should be ≤ {}", crate::config::STORE_TEXT_LIMIT);
                }
            }
        }
        self.with_document(document_id, |_, doc| {
            doc.blocks.extend_from_slice(blocks);
            Ok(())
        })
    }

    async fn read_schema(&self, database_id: &str) -> Result<Vec<FieldSpec>> {
        self.check(StoreOp::ReadSchema)?;
        let databases = self.databases.read().unwrap();
        databases
            .get(database_id)
            .map(|db| db.schema.clone())
            .ok_or_else(|| anyhow!("database not found: {}", database_id))
    }

    async fn update_schema(&self, database_id: &str, fields: &[FieldSpec]) -> Result<()> {
        self.check(StoreOp::UpdateSchema)?;
        let mut databases = self.databases.write().unwrap();
        let db = databases
            .get_mut(database_id)
            .ok_or_else(|| anyhow!("database not found: {}", database_id))?;
        for field in fields {
            match db.schema.iter_mut().find(|f| f.name == field.name) {
                Some(existing) => *existing = field.clone(),
                None => db.schema.push(field.clone()),
            }
        }
        Ok(())
    }

    async fn create_relation(
        &self,
        document_id: &str,
        field: &str,
        target_ids: &[String],
    ) -> Result<()> {
        self.check(StoreOp::CreateRelation)?;
        self.with_document(document_id, |schema, doc| {
            if !has_field(schema, field, |k| matches!(k, FieldKind::Relation { .. })) {
                bail!("{} is not a relation property that exists", field);
            }
            doc.relations.insert(field.to_string(), target_ids.to_vec());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[tokio::test]
    async fn test_query_entries_by_range() {
        let store = InMemoryStore::new();
        store.create_database("logs", vec![FieldSpec::new("Date", FieldKind::Date)]);
        store.insert_entry("logs", "Date", d(2025, 1, 20), "c", "third");
        store.insert_entry("logs", "Date", d(2025, 1, 13), "a", "first");
        store.insert_entry("logs", "Date", d(2025, 1, 14), "b", "second");
        store.insert_titled("logs", "undated");

        let all = store.query_entries("logs", "Date", None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].date, d(2025, 1, 13));

        let range = DateRange { start: d(2025, 1, 13), end: d(2025, 1, 19) };
        let week = store.query_entries("logs", "Date", Some(range)).await.unwrap();
        assert_eq!(week.iter().map(|e| e.title.clone().unwrap()).collect::<Vec<_>>(), vec!["a", "b"]);

        let body = store.fetch_content(&week[1].content_ref).await.unwrap();
        assert_eq!(body, "second");
    }

    #[tokio::test]
    async fn test_entries_carry_non_empty_properties() {
        let store = InMemoryStore::new();
        store.create_database("logs", vec![FieldSpec::new("Date", FieldKind::Date)]);
        let id = store.insert_entry("logs", "Date", d(2025, 1, 13), "a", "body");
        store.set_property(&id, "Project", "Billing").unwrap();
        store.set_property(&id, "Impact", "  ").unwrap();
        assert!(store.set_property("missing", "Project", "x").is_err());

        let entries = store.query_entries("logs", "Date", None).await.unwrap();
        assert_eq!(entries[0].properties.get("Project").map(String::as_str), Some("Billing"));
        assert!(!entries[0].properties.contains_key("Impact"));
    }

    #[tokio::test]
    async fn test_create_document_checks_schema() {
        let store = InMemoryStore::new();
        store.create_database("weekly", vec![FieldSpec::new("Week", FieldKind::Title)]);

        let doc = NewDocument {
            title_field: "Week".into(),
            title: "2025-W03".into(),
            dates: vec![("Start".into(), d(2025, 1, 13))],
        };
        assert!(store.create_document("weekly", &doc).await.is_err());

        store
            .update_schema("weekly", &[FieldSpec::new("Start", FieldKind::Date)])
            .await
            .unwrap();
        let created = store.create_document("weekly", &doc).await.unwrap();
        let stored = store.document(&created.id).unwrap();
        assert_eq!(stored.title.as_deref(), Some("2025-W03"));
        assert_eq!(stored.dates["Start"], d(2025, 1, 13));
    }

    #[tokio::test]
    async fn test_append_enforces_store_limits() {
        let store = InMemoryStore::new();
        store.create_database("weekly", vec![]);
        let id = store.insert_titled("weekly", "2025-W03");

        let too_many: Vec<Block> = (0..101).map(|_| Block::Divider).collect();
        assert!(store.append_blocks(&id, &too_many).await.is_err());

        let too_long = vec![Block::Paragraph("x".repeat(2001))];
        assert!(store.append_blocks(&id, &too_long).await.is_err());

        store.append_blocks(&id, &[Block::Divider]).await.unwrap();
        assert_eq!(store.document(&id).unwrap().blocks, vec![Block::Divider]);
        assert_eq!(store.append_calls(), 3);
    }

    #[tokio::test]
    async fn test_fail_on() {
        let store = InMemoryStore::new();
        store.create_database("weekly", vec![]);
        store.fail_on(StoreOp::ListDocuments);
        assert!(store.list_documents("weekly").await.is_err());
        assert!(store.read_schema("weekly").await.is_ok());
    }
}
