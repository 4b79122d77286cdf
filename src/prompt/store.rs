use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::{PipelineError, PipelineResult};
use crate::persistence::settings::AppSettings;

/// One archived exchange. This is both the request body of `POST /items/`
/// and the `item` echoed back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: String,
    pub request: String,
    pub response: String,
}

/// Body of a successful store call: `{"item": {...}}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemEnvelope {
    pub item: ItemRecord,
}

/// Archives a prompt/response pair and returns the stored record.
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn save(&self, record: &ItemRecord) -> PipelineResult<ItemRecord>;
}

pub struct HttpItemStore {
    http: reqwest::Client,
    base_url: String,
}

impl HttpItemStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into().trim_end_matches('/').to_string() }
    }

    pub fn from_settings(settings: &AppSettings) -> Self {
        Self::new(&settings.store_url)
    }

    pub fn items_url(&self) -> String {
        format!("{}/items/", self.base_url)
    }
}

/// Decode the echoed item. Anything without `item.response` is malformed.
pub fn parse_envelope(body: &str) -> PipelineResult<ItemRecord> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| PipelineError::Malformed(format!("invalid JSON: {}", e)))?;
    let item = value
        .get("item")
        .ok_or_else(|| PipelineError::Malformed(format!("missing `item` in {}", value)))?;
    let response = item
        .get("response")
        .and_then(|v| v.as_str())
        .ok_or_else(|| PipelineError::Malformed(format!("missing `item.response` in {}", value)))?;
    let field = |k: &str| item.get(k).and_then(|v| v.as_str()).unwrap_or_default().to_string();
    Ok(ItemRecord { id: field("id"), request: field("request"), response: response.to_string() })
}

#[async_trait]
impl ItemStore for HttpItemStore {
    async fn save(&self, record: &ItemRecord) -> PipelineResult<ItemRecord> {
        // .json() sets Content-Type: application/json
        let res = self
            .http
            .post(self.items_url())
            .json(record)
            .send()
            .await
            .map_err(|e| PipelineError::Persistence(e.to_string()))?;
        let status = res.status();
        if !status.is_success() {
            return Err(PipelineError::Persistence(format!("HTTP {}", status)));
        }
        let body = res.text().await.map_err(|e| PipelineError::Persistence(e.to_string()))?;
        parse_envelope(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_with_extra_fields_is_accepted() {
        let rec = parse_envelope(r#"{"item":{"id":"3","request":"hello","response":"hi there","stored_at":1}}"#).unwrap();
        assert_eq!(rec, ItemRecord { id: "3".into(), request: "hello".into(), response: "hi there".into() });
    }

    #[test]
    fn missing_item_or_response_is_malformed() {
        assert!(matches!(parse_envelope(r#"{"ok":true}"#), Err(PipelineError::Malformed(_))));
        assert!(matches!(parse_envelope(r#"{"item":{"id":"1"}}"#), Err(PipelineError::Malformed(_))));
        assert!(matches!(parse_envelope("not json"), Err(PipelineError::Malformed(_))));
    }
}
