use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::{PipelineError, PipelineResult};
use crate::persistence::settings::AppSettings;

/// Maps prompt text to generated text. One request, one answer, no streaming.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> PipelineResult<String>;
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Deserialize, Default)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Default)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: ResponseContent,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

/// Gemini `generateContent` over REST. The model is fixed at construction.
pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    pub fn from_settings(settings: &AppSettings) -> Self {
        let key = settings.generation_api_key().unwrap_or_else(|| {
            log::warn!("no generation API key configured; requests will be rejected upstream");
            String::new()
        });
        Self::new(&settings.generation_endpoint, &settings.generation_model, key)
    }

    pub fn model(&self) -> &str { &self.model }

    fn url(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.endpoint, self.model)
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> PipelineResult<String> {
        let body = GenerateRequest { contents: vec![Content { parts: vec![Part { text: prompt }] }] };
        let res = self
            .http
            .post(self.url())
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::Generation(e.to_string()))?;
        let status = res.status();
        if !status.is_success() {
            let detail = res.text().await.unwrap_or_default();
            return Err(PipelineError::Generation(format!("HTTP {}: {}", status, detail)));
        }
        let parsed: GenerateResponse = res
            .json()
            .await
            .map_err(|e| PipelineError::Generation(format!("unreadable response: {}", e)))?;
        extract_text(parsed)
    }
}

fn extract_text(res: GenerateResponse) -> PipelineResult<String> {
    let candidate = res
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::Generation("response carried no candidates".into()))?;
    Ok(candidate
        .content
        .parts
        .into_iter()
        .filter_map(|p| p.text)
        .collect::<Vec<_>>()
        .concat())
}
