//! Notion-backed [`DocumentStore`].
//!
//! Talks to the Notion REST API with `reqwest`. The integration token is read
//! from the environment variable named by `store.token_env`. All list
//! endpoints are paginated with `start_cursor`/`has_more`; this client
//! follows cursors until exhausted.
//!
//! Request and response shaping lives in free functions so it can be tested
//! without a network.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Map, Value};

use crate::config::StoreConfig;
use crate::models::{
    Block, DocumentRef, FieldKind, FieldSpec, LogEntry, NewDocument, StoredDocument,
};
use crate::period::DateRange;

use super::DocumentStore;

const PAGE_SIZE: usize = 100;

/// Notion REST client.
pub struct NotionStore {
    client: reqwest::Client,
    base_url: String,
    api_version: String,
    token: String,
}

impl NotionStore {
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let token = std::env::var(&config.token_env)
            .with_context(|| format!("{} environment variable not set", config.token_env))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            token,
        })
    }

    async fn send(&self, method: reqwest::Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let mut request = self
            .client
            .request(method.clone(), format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .header("Notion-Version", &self.api_version);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Notion request failed: {} {}", method, path))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Notion API error {}: {}", status, body_text);
        }

        Ok(response.json().await?)
    }

    /// Follow `next_cursor` until `has_more` is false, collecting `results`.
    async fn paginate(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Vec<Value>> {
        let mut results = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = if method == reqwest::Method::GET {
                let mut url = format!("{}?page_size={}", path, PAGE_SIZE);
                if let Some(c) = &cursor {
                    url.push_str(&format!("&start_cursor={}", c));
                }
                self.send(method.clone(), &url, None).await?
            } else {
                let mut body = body.clone().unwrap_or_else(|| json!({}));
                body["page_size"] = json!(PAGE_SIZE);
                if let Some(c) = &cursor {
                    body["start_cursor"] = json!(c);
                }
                self.send(method.clone(), path, Some(&body)).await?
            };

            if let Some(items) = page.get("results").and_then(|r| r.as_array()) {
                results.extend(items.iter().cloned());
            }

            let has_more = page.get("has_more").and_then(|v| v.as_bool()).unwrap_or(false);
            cursor = page
                .get("next_cursor")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            if !has_more || cursor.is_none() {
                break;
            }
        }

        Ok(results)
    }
}

#[async_trait]
impl DocumentStore for NotionStore {
    async fn query_entries(
        &self,
        database_id: &str,
        date_property: &str,
        range: Option<DateRange>,
    ) -> Result<Vec<LogEntry>> {
        let body = query_body(date_property, range);
        let pages = self
            .paginate(
                reqwest::Method::POST,
                &format!("/databases/{}/query", database_id),
                Some(body),
            )
            .await
            .with_context(|| format!("failed to query database {}", database_id))?;

        let mut entries: Vec<LogEntry> = pages
            .iter()
            .filter_map(|page| parse_entry(page, date_property))
            .filter(|e| range.map_or(true, |r| r.contains(e.date)))
            .collect();
        entries.sort_by_key(|e| e.date);
        Ok(entries)
    }

    async fn list_documents(&self, database_id: &str) -> Result<Vec<StoredDocument>> {
        let pages = self
            .paginate(
                reqwest::Method::POST,
                &format!("/databases/{}/query", database_id),
                None,
            )
            .await
            .with_context(|| format!("failed to list database {}", database_id))?;

        Ok(pages
            .iter()
            .filter_map(|page| {
                Some(StoredDocument {
                    id: page.get("id")?.as_str()?.to_string(),
                    url: page.get("url").and_then(|u| u.as_str()).unwrap_or_default().to_string(),
                    title: page_title(page),
                })
            })
            .collect())
    }

    async fn fetch_content(&self, content_ref: &str) -> Result<String> {
        let blocks = self
            .paginate(
                reqwest::Method::GET,
                &format!("/blocks/{}/children", content_ref),
                None,
            )
            .await
            .with_context(|| format!("failed to read blocks of {}", content_ref))?;
        Ok(blocks_to_text(&blocks))
    }

    async fn create_document(&self, database_id: &str, doc: &NewDocument) -> Result<DocumentRef> {
        let body = page_body(database_id, doc);
        let page = self.send(reqwest::Method::POST, "/pages", Some(&body)).await?;

        let id = page
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Invalid Notion response: created page has no id"))?;
        let url = page.get("url").and_then(|v| v.as_str()).unwrap_or_default();
        Ok(DocumentRef {
            id: id.to_string(),
            url: url.to_string(),
        })
    }

    async fn append_blocks(&self, document_id: &str, blocks: &[Block]) -> Result<()> {
        let body = json!({ "children": blocks.iter().map(block_to_json).collect::<Vec<_>>() });
        self.send(
            reqwest::Method::PATCH,
            &format!("/blocks/{}/children", document_id),
            Some(&body),
        )
        .await?;
        Ok(())
    }

    async fn read_schema(&self, database_id: &str) -> Result<Vec<FieldSpec>> {
        let db = self
            .send(reqwest::Method::GET, &format!("/databases/{}", database_id), None)
            .await?;
        Ok(parse_schema(&db))
    }

    async fn update_schema(&self, database_id: &str, fields: &[FieldSpec]) -> Result<()> {
        let properties: Map<String, Value> = fields
            .iter()
            .map(|f| (f.name.clone(), field_to_json(&f.kind)))
            .collect();
        self.send(
            reqwest::Method::PATCH,
            &format!("/databases/{}", database_id),
            Some(&json!({ "properties": properties })),
        )
        .await?;
        Ok(())
    }

    async fn create_relation(
        &self,
        document_id: &str,
        field: &str,
        target_ids: &[String],
    ) -> Result<()> {
        let ids: Vec<Value> = target_ids.iter().map(|id| json!({ "id": id })).collect();
        let body = json!({ "properties": { field: { "relation": ids } } });
        self.send(
            reqwest::Method::PATCH,
            &format!("/pages/{}", document_id),
            Some(&body),
        )
        .await?;
        Ok(())
    }
}

// ============ Request shaping ============

fn query_body(date_property: &str, range: Option<DateRange>) -> Value {
    match range {
        Some(range) => json!({
            "filter": {
                "and": [
                    { "property": date_property, "date": { "on_or_after": range.start.to_string() } },
                    { "property": date_property, "date": { "on_or_before": range.end.to_string() } },
                ]
            },
            "sorts": [{ "property": date_property, "direction": "ascending" }],
        }),
        None => json!({
            "filter": { "property": date_property, "date": { "is_not_empty": true } },
            "sorts": [{ "property": date_property, "direction": "ascending" }],
        }),
    }
}

fn rich_text(content: &str) -> Value {
    json!([{ "type": "text", "text": { "content": content } }])
}

fn page_body(database_id: &str, doc: &NewDocument) -> Value {
    let mut properties = Map::new();
    properties.insert(doc.title_field.clone(), json!({ "title": rich_text(&doc.title) }));
    for (field, date) in &doc.dates {
        properties.insert(field.clone(), json!({ "date": { "start": date.to_string() } }));
    }
    json!({
        "parent": { "database_id": database_id },
        "properties": properties,
    })
}

fn block_to_json(block: &Block) -> Value {
    match block {
        Block::Divider => json!({ "object": "block", "type": "divider", "divider": {} }),
        Block::Heading(text) => json!({
            "object": "block",
            "type": "heading_2",
            "heading_2": { "rich_text": rich_text(text) },
        }),
        Block::Paragraph(text) => json!({
            "object": "block",
            "type": "paragraph",
            "paragraph": { "rich_text": rich_text(text) },
        }),
    }
}

fn field_to_json(kind: &FieldKind) -> Value {
    match kind {
        FieldKind::Title => json!({ "title": {} }),
        FieldKind::Date => json!({ "date": {} }),
        FieldKind::RichText => json!({ "rich_text": {} }),
        FieldKind::Relation { database_id } => json!({
            "relation": { "database_id": database_id, "single_property": {} }
        }),
        FieldKind::Other(kind) => json!({ kind.as_str(): {} }),
    }
}

// ============ Response parsing ============

fn plain_text(rich: &Value) -> String {
    rich.as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("plain_text").and_then(|t| t.as_str()))
                .collect::<String>()
        })
        .unwrap_or_default()
}

/// Text of the page's title property, whatever it is named.
fn page_title(page: &Value) -> Option<String> {
    page.get("properties")?
        .as_object()?
        .values()
        .find(|prop| prop.get("type").and_then(|t| t.as_str()) == Some("title"))
        .map(|prop| plain_text(&prop["title"]))
}

/// Date of a date property. Datetimes are truncated to their date.
fn page_date(page: &Value, date_property: &str) -> Option<NaiveDate> {
    let start = page
        .pointer(&format!("/properties/{}/date/start", escape_pointer(date_property)))?
        .as_str()?;
    NaiveDate::parse_from_str(start.get(..10)?, "%Y-%m-%d").ok()
}

fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Plain-text value of a page property, for the types a prompt can use.
fn property_text(prop: &Value) -> Option<String> {
    let kind = prop.get("type")?.as_str()?;
    let value = prop.get(kind)?;
    let text = match kind {
        "rich_text" | "title" => plain_text(value),
        "select" | "status" => value.get("name")?.as_str()?.to_string(),
        "multi_select" => value
            .as_array()?
            .iter()
            .filter_map(|option| option.get("name").and_then(|n| n.as_str()))
            .collect::<Vec<_>>()
            .join(", "),
        "number" => value.as_f64().map(|n| n.to_string())?,
        "checkbox" => value.as_bool()?.to_string(),
        "url" | "email" | "phone_number" => value.as_str()?.to_string(),
        "date" => value.get("start")?.as_str()?.to_string(),
        _ => return None,
    };
    (!text.trim().is_empty()).then_some(text)
}

/// An entry from a database page; pages without the date are skipped.
fn parse_entry(page: &Value, date_property: &str) -> Option<LogEntry> {
    let id = page.get("id")?.as_str()?.to_string();
    let date = page_date(page, date_property)?;
    let properties = page
        .get("properties")
        .and_then(|p| p.as_object())
        .map(|props| {
            props
                .iter()
                .filter(|(_, prop)| prop.get("type").and_then(|t| t.as_str()) != Some("title"))
                .filter_map(|(name, prop)| Some((name.clone(), property_text(prop)?)))
                .collect()
        })
        .unwrap_or_default();
    Some(LogEntry {
        content_ref: id.clone(),
        id,
        date,
        title: page_title(page).filter(|t| !t.trim().is_empty()),
        properties,
    })
}

fn parse_schema(database: &Value) -> Vec<FieldSpec> {
    let Some(properties) = database.get("properties").and_then(|p| p.as_object()) else {
        return Vec::new();
    };

    properties
        .iter()
        .map(|(name, prop)| {
            let kind = match prop.get("type").and_then(|t| t.as_str()).unwrap_or_default() {
                "title" => FieldKind::Title,
                "date" => FieldKind::Date,
                "rich_text" => FieldKind::RichText,
                "relation" => FieldKind::Relation {
                    database_id: prop
                        .pointer("/relation/database_id")
                        .and_then(|d| d.as_str())
                        .unwrap_or_default()
                        .to_string(),
                },
                other => FieldKind::Other(other.to_string()),
            };
            FieldSpec::new(name.clone(), kind)
        })
        .collect()
}

/// Plain text of text-bearing blocks, one block per line.
fn blocks_to_text(blocks: &[Value]) -> String {
    blocks
        .iter()
        .filter_map(|block| {
            let kind = block.get("type")?.as_str()?;
            let text = plain_text(block.get(kind)?.get("rich_text")?);
            Some(match kind {
                "heading_1" => format!("# {}", text),
                "heading_2" => format!("## {}", text),
                "heading_3" => format!("### {}", text),
                "bulleted_list_item" => format!("- {}", text),
                "numbered_list_item" => format!("1. {}", text),
                "to_do" => format!("- [ ] {}", text),
                _ => text,
            })
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_page() -> Value {
        json!({
            "id": "page-1",
            "url": "https://www.notion.so/page-1",
            "properties": {
                "Date": { "type": "date", "date": { "start": "2025-01-14T09:30:00.000+09:00" } },
                "이름": { "type": "title", "title": [
                    { "plain_text": "Stand" }, { "plain_text": "up" }
                ] },
                "Tags": { "type": "multi_select", "multi_select": [] },
                "Tech Stack": { "type": "multi_select", "multi_select": [
                    { "name": "Rust" }, { "name": "Postgres" }
                ] },
                "Project": { "type": "select", "select": { "name": "Billing" } },
                "Hours": { "type": "number", "number": 2.5 },
                "Notes": { "type": "rich_text", "rich_text": [] },
            }
        })
    }

    #[test]
    fn test_parse_entry() {
        let entry = parse_entry(&sample_page(), "Date").unwrap();
        assert_eq!(entry.id, "page-1");
        assert_eq!(entry.date, NaiveDate::from_ymd_opt(2025, 1, 14).unwrap());
        assert_eq!(entry.title.as_deref(), Some("Standup"));
        assert_eq!(entry.content_ref, "page-1");
        assert_eq!(entry.properties["Tech Stack"], "Rust, Postgres");
        assert_eq!(entry.properties["Project"], "Billing");
        assert_eq!(entry.properties["Hours"], "2.5");
        assert!(entry.properties["Date"].starts_with("2025-01-14"));
        assert!(!entry.properties.contains_key("Tags"));
        assert!(!entry.properties.contains_key("Notes"));
        assert!(!entry.properties.contains_key("이름"));
        assert!(parse_entry(&sample_page(), "Missing").is_none());
    }

    #[test]
    fn test_page_title_finds_title_by_type() {
        assert_eq!(page_title(&sample_page()).as_deref(), Some("Standup"));
        assert_eq!(page_title(&json!({ "properties": {} })), None);
    }

    #[test]
    fn test_parse_schema() {
        let db = json!({
            "properties": {
                "Week": { "type": "title" },
                "Start": { "type": "date" },
                "Entries": { "type": "relation", "relation": { "database_id": "logs" } },
                "Score": { "type": "number" },
            }
        });
        let mut schema = parse_schema(&db);
        schema.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(
            schema,
            vec![
                FieldSpec::new("Entries", FieldKind::Relation { database_id: "logs".into() }),
                FieldSpec::new("Score", FieldKind::Other("number".into())),
                FieldSpec::new("Start", FieldKind::Date),
                FieldSpec::new("Week", FieldKind::Title),
            ]
        );
    }

    #[test]
    fn test_block_json_shapes() {
        assert_eq!(block_to_json(&Block::Divider)["type"], "divider");
        let heading = block_to_json(&Block::Heading("AI Summary".into()));
        assert_eq!(heading["heading_2"]["rich_text"][0]["text"]["content"], "AI Summary");
        let para = block_to_json(&Block::Paragraph("body".into()));
        assert_eq!(para["paragraph"]["rich_text"][0]["text"]["content"], "body");
    }

    #[test]
    fn test_page_body_sets_title_and_dates() {
        let doc = NewDocument {
            title_field: "Week".into(),
            title: "2025-W03".into(),
            dates: vec![("Start".into(), NaiveDate::from_ymd_opt(2025, 1, 13).unwrap())],
        };
        let body = page_body("weekly-db", &doc);
        assert_eq!(body["parent"]["database_id"], "weekly-db");
        assert_eq!(body["properties"]["Week"]["title"][0]["text"]["content"], "2025-W03");
        assert_eq!(body["properties"]["Start"]["date"]["start"], "2025-01-13");
    }

    #[test]
    fn test_query_body_range_filter() {
        let range = DateRange {
            start: NaiveDate::from_ymd_opt(2025, 1, 13).unwrap(),
            end: NaiveDate::from_ymd_opt(2025, 1, 19).unwrap(),
        };
        let body = query_body("Date", Some(range));
        assert_eq!(body["filter"]["and"][0]["date"]["on_or_after"], "2025-01-13");
        assert_eq!(body["filter"]["and"][1]["date"]["on_or_before"], "2025-01-19");
        assert_eq!(query_body("Date", None)["filter"]["date"]["is_not_empty"], true);
    }

    #[test]
    fn test_relation_field_json() {
        let v = field_to_json(&FieldKind::Relation { database_id: "logs".into() });
        assert_eq!(v["relation"]["database_id"], "logs");
        assert_eq!(field_to_json(&FieldKind::Date), json!({ "date": {} }));
    }

    #[test]
    fn test_blocks_to_text() {
        let blocks = vec![
            json!({ "type": "heading_2", "heading_2": { "rich_text": [{ "plain_text": "Done" }] } }),
            json!({ "type": "bulleted_list_item", "bulleted_list_item": { "rich_text": [{ "plain_text": "ship" }] } }),
            json!({ "type": "divider", "divider": {} }),
            json!({ "type": "paragraph", "paragraph": { "rich_text": [{ "plain_text": "notes" }] } }),
        ];
        assert_eq!(blocks_to_text(&blocks), "## Done\n- ship\nnotes");
    }

    #[test]
    fn test_from_config_requires_token() {
        let config = StoreConfig {
            token_env: "PERIOD_REPORTS_TEST_UNSET_TOKEN".into(),
            ..StoreConfig::default()
        };
        assert!(NotionStore::from_config(&config).is_err());
    }
}
