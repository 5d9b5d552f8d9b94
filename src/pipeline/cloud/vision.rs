//! Cloud vision-language model tier.
//!
//! Model variants are tried in configured order with a fixed backoff
//! between them. An answer is accepted only after it parses into the
//! expected JSON contract; anything else advances to the next variant.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::parser::{parse_lookup_json, parse_roster_json, VisionRoster};
use super::prompt::{lookup_prompt, roster_prompt};
use super::CloudError;
use crate::config::{ScannerConfig, VisionConfig};
use crate::pipeline::extraction::date_extract::today;
use crate::pipeline::extraction::sanitize::diagnostics;
use crate::pipeline::extraction::{
    ExtractionError, ImageInput, RosterDocument, RosterStrategy, ShiftLocator, ShiftLookup,
    StrategyKind,
};
use crate::pipeline::until_cancelled;

const SERVICE: &str = "cloud vision";

/// One multimodal completion: prompt plus inline image in, text out.
#[async_trait]
pub trait VisionClient: Send + Sync {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        image: &ImageInput,
    ) -> Result<String, CloudError>;
}

// ═══════════════════════════════════════════════════════════
// Gemini client
// ═══════════════════════════════════════════════════════════

pub struct GeminiClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Text { text: &'a str },
    Image {
        #[serde(rename = "inlineData")]
        inline_data: InlineData<'a>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_mime_type: &'static str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(config: &VisionConfig) -> Result<Self, ExtractionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ExtractionError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            client,
        })
    }
}

#[async_trait]
impl VisionClient for GeminiClient {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        image: &ImageInput,
    ) -> Result<String, CloudError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or(CloudError::MissingApiKey(SERVICE))?;

        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    RequestPart::Text { text: prompt },
                    RequestPart::Image {
                        inline_data: InlineData {
                            mime_type: image.mime_type(),
                            data: image.to_base64(),
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: 0.0,
                response_mime_type: "application/json",
            },
        };

        let response = self
            .client
            .post(format!("{}/models/{model}:generateContent", self.base_url))
            .header("x-goog-api-key", key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CloudError::from_reqwest(e, SERVICE))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CloudError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| CloudError::MalformedResponse(e.to_string()))?;

        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().find_map(|p| p.text))
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| CloudError::MalformedResponse("empty completion".to_string()))
    }
}

// ═══════════════════════════════════════════════════════════
// Mock client
// ═══════════════════════════════════════════════════════════

/// Mock vision client for testing. Answers per model, falling back to a
/// default response; models marked failing return a connection error.
pub struct MockVisionClient {
    default_response: String,
    responses: HashMap<String, Result<String, String>>,
    calls: Mutex<Vec<String>>,
}

impl MockVisionClient {
    pub fn new(response: &str) -> Self {
        Self {
            default_response: response.to_string(),
            responses: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_response_for(mut self, model: &str, response: &str) -> Self {
        self.responses
            .insert(model.to_string(), Ok(response.to_string()));
        self
    }

    pub fn with_failure_for(mut self, model: &str) -> Self {
        self.responses
            .insert(model.to_string(), Err(format!("{model} unreachable")));
        self
    }

    /// Models called so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl VisionClient for MockVisionClient {
    async fn generate(
        &self,
        model: &str,
        _prompt: &str,
        _image: &ImageInput,
    ) -> Result<String, CloudError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(model.to_string());
        match self.responses.get(model) {
            Some(Ok(text)) => Ok(text.clone()),
            Some(Err(msg)) => Err(CloudError::Connection(msg.clone())),
            None => Ok(self.default_response.clone()),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Strategy
// ═══════════════════════════════════════════════════════════

pub struct VisionStrategy {
    client: Arc<dyn VisionClient>,
    config: Arc<ScannerConfig>,
}

impl VisionStrategy {
    pub fn new(client: Arc<dyn VisionClient>, config: Arc<ScannerConfig>) -> Self {
        Self { client, config }
    }

    /// Ask each model variant in turn until one answer passes `parse`.
    async fn ask<T, F>(
        &self,
        prompt: &str,
        image: &ImageInput,
        cancel: &CancellationToken,
        parse: F,
    ) -> Result<(String, T), CloudError>
    where
        T: Send,
        F: Fn(&str) -> Result<T, CloudError> + Send + Sync,
    {
        let settings = &self.config.vision;
        let mut tried = Vec::with_capacity(settings.models.len());

        for (idx, model) in settings.models.iter().enumerate() {
            if idx > 0 {
                until_cancelled(cancel, tokio::time::sleep(settings.backoff()))
                    .await
                    .ok_or(CloudError::Cancelled)?;
            }
            tried.push(model.clone());

            let answer = until_cancelled(cancel, self.client.generate(model, prompt, image))
                .await
                .ok_or(CloudError::Cancelled)?;

            match answer.and_then(|text| parse(&text)) {
                Ok(value) => {
                    debug!(model = %model, "Vision model answered");
                    return Ok((model.clone(), value));
                }
                // Every variant shares the key
                Err(CloudError::MissingApiKey(service)) => {
                    return Err(CloudError::MissingApiKey(service))
                }
                Err(e) => warn!(model = %model, error = %e, "Vision model variant failed, trying next"),
            }
        }

        Err(CloudError::NoModelSucceeded { tried })
    }
}

/// A roster answer only counts when at least one column carries a name,
/// otherwise the next model variant gets its turn.
fn parse_usable_roster(text: &str) -> Result<VisionRoster, CloudError> {
    let roster = parse_roster_json(text)?;
    if roster.columns.iter().all(|c| c.entries.is_empty()) {
        return Err(CloudError::MalformedResponse("no entries".to_string()));
    }
    Ok(roster)
}

#[async_trait]
impl RosterStrategy for VisionStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::CloudVision
    }

    async fn extract(
        &self,
        image: &ImageInput,
        cancel: &CancellationToken,
    ) -> Result<RosterDocument, ExtractionError> {
        let prompt = roster_prompt(&self.config.keywords);
        let (model, roster) = self
            .ask(&prompt, image, cancel, parse_usable_roster)
            .await
            .map_err(CloudError::into_extraction)?;

        let summary = roster
            .columns
            .iter()
            .map(|c| format!("{}: {}", c.title, c.entries.join("; ")))
            .collect::<Vec<_>>()
            .join(" | ");
        let doc = RosterDocument::new(
            Some(roster.date.unwrap_or_else(today)),
            roster.columns,
            diagnostics(&format!("cloud_vision {model}"), &summary),
        );
        info!(model = %model, columns = doc.columns.len(), entries = doc.total_entries(), "Vision roster parsed");
        Ok(doc)
    }
}

#[async_trait]
impl ShiftLocator for VisionStrategy {
    async fn locate(
        &self,
        image: &ImageInput,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<ShiftLookup, ExtractionError> {
        let prompt = lookup_prompt(&self.config.keywords, name);
        let (model, lookup) = self
            .ask(&prompt, image, cancel, |text| parse_lookup_json(text, name))
            .await
            .map_err(CloudError::into_extraction)?;

        info!(model = %model, found = lookup.found, "Vision lookup answered");
        Ok(lookup)
    }
}
