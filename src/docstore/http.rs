//! HTTP implementation of [`DocStore`] against a Notion-style API.
//!
//! Raw transport only: the facade above this layer owns rate limiting,
//! retries, and timeouts. Responses are mapped into the crate's block
//! and record model; unknown block types survive as `Unsupported`.

use crate::config::DocStoreConfig;
use crate::docstore::{Block, BlockKind, DocStore, Properties, PropertyValue, Record, RichText};
use crate::error::ExternalError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Map, Value};
use std::time::Duration;

const API_VERSION: &str = "2022-06-28";
const PAGE_SIZE: usize = 100;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct HttpDocStore {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpDocStore {
    pub fn new(config: &DocStoreConfig) -> Result<Self, ExternalError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ExternalError::transient(None, format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}/{path}", self.base_url))
            .bearer_auth(&self.token)
            .header("Notion-Version", API_VERSION)
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Value, ExternalError> {
        let response = builder.send().await.map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status_error(status.as_u16(), &body));
        }
        response
            .json()
            .await
            .map_err(|e| ExternalError::transient(None, format!("malformed response: {e}")))
    }

    /// One level of children, paging through cursors.
    async fn child_page(&self, container_id: &str) -> Result<Vec<Value>, ExternalError> {
        let mut results = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut path = format!("blocks/{container_id}/children?page_size={PAGE_SIZE}");
            if let Some(cursor) = &cursor {
                path.push_str(&format!("&start_cursor={cursor}"));
            }
            let body = self.send(self.request(reqwest::Method::GET, &path)).await?;
            if let Some(items) = body["results"].as_array() {
                results.extend(items.iter().cloned());
            }
            if body["has_more"].as_bool().unwrap_or(false) {
                cursor = body["next_cursor"].as_str().map(str::to_string);
                if cursor.is_none() {
                    break;
                }
            } else {
                break;
            }
        }
        Ok(results)
    }

    fn fetch_tree<'a>(
        &'a self,
        container_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Block>, ExternalError>> {
        async move {
            let mut blocks = Vec::new();
            for item in self.child_page(container_id).await? {
                let mut block = json_to_block(&item);
                let has_children = item["has_children"].as_bool().unwrap_or(false);
                if has_children {
                    if let Some(id) = &block.id {
                        let id = id.clone();
                        block.children = self.fetch_tree(&id).await?;
                    }
                }
                blocks.push(block);
            }
            Ok(blocks)
        }
        .boxed()
    }
}

fn map_transport_error(e: reqwest::Error) -> ExternalError {
    if e.is_timeout() {
        ExternalError::Timeout(REQUEST_TIMEOUT)
    } else {
        ExternalError::transient(None, format!("request failed: {e}"))
    }
}

fn map_status_error(status: u16, body: &str) -> ExternalError {
    let message = format!("document store returned {status}: {body}");
    if status == 429 || status >= 500 {
        ExternalError::transient(Some(status), message)
    } else {
        ExternalError::permanent(status, message)
    }
}

// --- rich text -------------------------------------------------------------

fn rich_text_to_json(segments: &[RichText]) -> Value {
    Value::Array(
        segments
            .iter()
            .map(|segment| {
                let mut text = json!({ "content": segment.text });
                if let Some(href) = &segment.href {
                    text["link"] = json!({ "url": href });
                }
                json!({
                    "type": "text",
                    "text": text,
                    "annotations": {
                        "bold": segment.bold,
                        "italic": segment.italic,
                        "code": segment.code,
                        "strikethrough": segment.strikethrough,
                        "color": segment.color.as_deref().unwrap_or("default"),
                    },
                })
            })
            .collect(),
    )
}

fn json_to_rich_text(value: &Value) -> Vec<RichText> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .map(|item| {
            let annotations = &item["annotations"];
            let color = annotations["color"].as_str().filter(|c| *c != "default");
            RichText {
                text: item["text"]["content"]
                    .as_str()
                    .or_else(|| item["plain_text"].as_str())
                    .unwrap_or_default()
                    .to_string(),
                bold: annotations["bold"].as_bool().unwrap_or(false),
                italic: annotations["italic"].as_bool().unwrap_or(false),
                code: annotations["code"].as_bool().unwrap_or(false),
                strikethrough: annotations["strikethrough"].as_bool().unwrap_or(false),
                color: color.map(str::to_string),
                href: item["href"].as_str().map(str::to_string),
            }
        })
        .collect()
}

// --- blocks ----------------------------------------------------------------

fn block_to_json(block: &Block) -> Value {
    let (kind, mut payload) = match &block.kind {
        BlockKind::Heading1 { text } => ("heading_1", json!({ "rich_text": rich_text_to_json(text) })),
        BlockKind::Heading2 { text } => ("heading_2", json!({ "rich_text": rich_text_to_json(text) })),
        BlockKind::Heading3 { text } => ("heading_3", json!({ "rich_text": rich_text_to_json(text) })),
        BlockKind::Paragraph { text } => ("paragraph", json!({ "rich_text": rich_text_to_json(text) })),
        BlockKind::BulletedListItem { text } => (
            "bulleted_list_item",
            json!({ "rich_text": rich_text_to_json(text) }),
        ),
        BlockKind::NumberedListItem { text } => (
            "numbered_list_item",
            json!({ "rich_text": rich_text_to_json(text) }),
        ),
        BlockKind::ToDo { text, checked } => (
            "to_do",
            json!({ "rich_text": rich_text_to_json(text), "checked": checked }),
        ),
        BlockKind::Quote { text } => ("quote", json!({ "rich_text": rich_text_to_json(text) })),
        BlockKind::Code { text, language } => (
            "code",
            json!({ "rich_text": rich_text_to_json(text), "language": language }),
        ),
        BlockKind::Callout { text, icon } => {
            let mut payload = json!({ "rich_text": rich_text_to_json(text) });
            if let Some(icon) = icon {
                payload["icon"] = json!({ "type": "emoji", "emoji": icon });
            }
            ("callout", payload)
        }
        BlockKind::Toggle { text } => ("toggle", json!({ "rich_text": rich_text_to_json(text) })),
        BlockKind::Divider => ("divider", json!({})),
        BlockKind::Image { url, caption } => {
            let mut payload = json!({ "type": "external", "external": { "url": url } });
            if !caption.is_empty() {
                payload["caption"] = rich_text_to_json(caption);
            }
            ("image", payload)
        }
        BlockKind::FileRef { url } => (
            "file",
            json!({ "type": "external", "external": { "url": url } }),
        ),
        BlockKind::Embed { url } => ("embed", json!({ "url": url })),
        BlockKind::ChildPage { title } => ("child_page", json!({ "title": title })),
        BlockKind::ChildDatabase { title } => ("child_database", json!({ "title": title })),
        BlockKind::Unsupported { kind } => ("paragraph", {
            json!({ "rich_text": [{ "type": "text", "text": { "content": format!("[unsupported: {kind}]") } }] })
        }),
    };
    if !block.children.is_empty() {
        payload["children"] = Value::Array(block.children.iter().map(block_to_json).collect());
    }
    let mut object = Map::new();
    object.insert("object".to_string(), json!("block"));
    object.insert("type".to_string(), json!(kind));
    object.insert(kind.to_string(), payload);
    Value::Object(object)
}

fn json_to_block(value: &Value) -> Block {
    let id = value["id"].as_str().map(str::to_string);
    let kind_name = value["type"].as_str().unwrap_or("unknown");
    let payload = &value[kind_name];
    let text = || json_to_rich_text(&payload["rich_text"]);
    let kind = match kind_name {
        "heading_1" => BlockKind::Heading1 { text: text() },
        "heading_2" => BlockKind::Heading2 { text: text() },
        "heading_3" => BlockKind::Heading3 { text: text() },
        "paragraph" => BlockKind::Paragraph { text: text() },
        "bulleted_list_item" => BlockKind::BulletedListItem { text: text() },
        "numbered_list_item" => BlockKind::NumberedListItem { text: text() },
        "to_do" => BlockKind::ToDo {
            text: text(),
            checked: payload["checked"].as_bool().unwrap_or(false),
        },
        "quote" => BlockKind::Quote { text: text() },
        "code" => BlockKind::Code {
            text: text(),
            language: payload["language"].as_str().unwrap_or_default().to_string(),
        },
        "callout" => BlockKind::Callout {
            text: text(),
            icon: payload["icon"]["emoji"].as_str().map(str::to_string),
        },
        "toggle" => BlockKind::Toggle { text: text() },
        "divider" => BlockKind::Divider,
        "image" => BlockKind::Image {
            caption: json_to_rich_text(&payload["caption"]),
            url: payload["external"]["url"]
                .as_str()
                .or_else(|| payload["file"]["url"].as_str())
                .unwrap_or_default()
                .to_string(),
        },
        "file" => BlockKind::FileRef {
            url: payload["external"]["url"]
                .as_str()
                .or_else(|| payload["file"]["url"].as_str())
                .unwrap_or_default()
                .to_string(),
        },
        "embed" => BlockKind::Embed {
            url: payload["url"].as_str().unwrap_or_default().to_string(),
        },
        "child_page" => BlockKind::ChildPage {
            title: payload["title"].as_str().unwrap_or_default().to_string(),
        },
        "child_database" => BlockKind::ChildDatabase {
            title: payload["title"].as_str().unwrap_or_default().to_string(),
        },
        other => BlockKind::Unsupported {
            kind: other.to_string(),
        },
    };
    Block {
        id,
        kind,
        children: Vec::new(),
    }
}

// --- properties ------------------------------------------------------------

fn property_to_json(value: &PropertyValue) -> Value {
    match value {
        PropertyValue::Title(s) => {
            json!({ "title": [{ "type": "text", "text": { "content": s } }] })
        }
        PropertyValue::Text(s) => {
            json!({ "rich_text": [{ "type": "text", "text": { "content": s } }] })
        }
        PropertyValue::Select(s) => json!({ "select": { "name": s } }),
        PropertyValue::MultiSelect(v) => json!({
            "multi_select": v.iter().map(|name| json!({ "name": name })).collect::<Vec<_>>()
        }),
        PropertyValue::Number(n) => json!({ "number": n }),
        PropertyValue::Relation(ids) => json!({
            "relation": ids.iter().map(|id| json!({ "id": id })).collect::<Vec<_>>()
        }),
    }
}

fn properties_to_json(properties: &Properties) -> Value {
    let mut map = Map::new();
    for (key, value) in properties {
        map.insert(key.clone(), property_to_json(value));
    }
    Value::Object(map)
}

fn collect_plain_text(value: &Value) -> String {
    json_to_rich_text(value)
        .into_iter()
        .map(|segment| segment.text)
        .collect()
}

fn json_to_property(value: &Value) -> Option<PropertyValue> {
    match value["type"].as_str()? {
        "title" => Some(PropertyValue::Title(collect_plain_text(&value["title"]))),
        "rich_text" => Some(PropertyValue::Text(collect_plain_text(&value["rich_text"]))),
        "select" => value["select"]["name"]
            .as_str()
            .map(|name| PropertyValue::Select(name.to_string())),
        "multi_select" => Some(PropertyValue::MultiSelect(
            value["multi_select"]
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| item["name"].as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
        )),
        "number" => value["number"].as_f64().map(PropertyValue::Number),
        "relation" => Some(PropertyValue::Relation(
            value["relation"]
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| item["id"].as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
        )),
        _ => None,
    }
}

fn json_to_record(value: &Value) -> Record {
    let mut properties = Properties::new();
    if let Some(map) = value["properties"].as_object() {
        for (key, prop) in map {
            if let Some(parsed) = json_to_property(prop) {
                properties.insert(key.clone(), parsed);
            }
        }
    }
    Record {
        id: value["id"].as_str().unwrap_or_default().to_string(),
        created_at: value["created_time"]
            .as_str()
            .and_then(|s| s.parse::<DateTime<Utc>>().ok()),
        properties,
    }
}

#[async_trait]
impl DocStore for HttpDocStore {
    async fn get_record(&self, page_id: &str) -> Result<Record, ExternalError> {
        let body = self
            .send(self.request(reqwest::Method::GET, &format!("pages/{page_id}")))
            .await?;
        Ok(json_to_record(&body))
    }

    async fn get_blocks(&self, container_id: &str) -> Result<Vec<Block>, ExternalError> {
        self.fetch_tree(container_id).await
    }

    async fn create_page(
        &self,
        parent_id: &str,
        title: &str,
        icon: Option<&str>,
    ) -> Result<String, ExternalError> {
        let mut payload = json!({
            "parent": { "page_id": parent_id },
            "properties": {
                "title": { "title": [{ "type": "text", "text": { "content": title } }] }
            },
        });
        if let Some(icon) = icon {
            payload["icon"] = json!({ "type": "emoji", "emoji": icon });
        }
        let body = self
            .send(self.request(reqwest::Method::POST, "pages").json(&payload))
            .await?;
        Ok(body["id"].as_str().unwrap_or_default().to_string())
    }

    async fn create_record(
        &self,
        database_id: &str,
        properties: Properties,
    ) -> Result<String, ExternalError> {
        let payload = json!({
            "parent": { "database_id": database_id },
            "properties": properties_to_json(&properties),
        });
        let body = self
            .send(self.request(reqwest::Method::POST, "pages").json(&payload))
            .await?;
        Ok(body["id"].as_str().unwrap_or_default().to_string())
    }

    async fn update_properties(
        &self,
        page_id: &str,
        properties: Properties,
    ) -> Result<(), ExternalError> {
        let payload = json!({ "properties": properties_to_json(&properties) });
        self.send(
            self.request(reqwest::Method::PATCH, &format!("pages/{page_id}"))
                .json(&payload),
        )
        .await?;
        Ok(())
    }

    async fn append_children(
        &self,
        container_id: &str,
        blocks: &[Block],
    ) -> Result<Vec<String>, ExternalError> {
        let payload = json!({
            "children": blocks.iter().map(block_to_json).collect::<Vec<_>>()
        });
        let body = self
            .send(
                self.request(
                    reqwest::Method::PATCH,
                    &format!("blocks/{container_id}/children"),
                )
                .json(&payload),
            )
            .await?;
        Ok(body["results"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item["id"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_child_ids(&self, container_id: &str) -> Result<Vec<String>, ExternalError> {
        Ok(self
            .child_page(container_id)
            .await?
            .iter()
            .filter_map(|item| item["id"].as_str().map(str::to_string))
            .collect())
    }

    async fn delete_block(&self, block_id: &str) -> Result<(), ExternalError> {
        self.send(self.request(reqwest::Method::DELETE, &format!("blocks/{block_id}")))
            .await?;
        Ok(())
    }

    async fn query_related(
        &self,
        database_id: &str,
        relation_property: &str,
        target_id: &str,
    ) -> Result<Vec<Record>, ExternalError> {
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut payload = json!({
                "filter": {
                    "property": relation_property,
                    "relation": { "contains": target_id },
                },
                "page_size": PAGE_SIZE,
            });
            if let Some(cursor) = &cursor {
                payload["start_cursor"] = json!(cursor);
            }
            let body = self
                .send(
                    self.request(
                        reqwest::Method::POST,
                        &format!("databases/{database_id}/query"),
                    )
                    .json(&payload),
                )
                .await?;
            if let Some(items) = body["results"].as_array() {
                records.extend(items.iter().map(json_to_record));
            }
            if body["has_more"].as_bool().unwrap_or(false) {
                cursor = body["next_cursor"].as_str().map(str::to_string);
                if cursor.is_none() {
                    break;
                }
            } else {
                break;
            }
        }
        Ok(records)
    }
}
