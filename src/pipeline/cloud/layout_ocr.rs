//! Remote layout-preserving OCR (LLMWhisperer-style API).
//!
//! The service answers a submission either inline or with a job hash that is
//! polled at a fixed interval up to a hard attempt ceiling. The returned text
//! keeps the page layout but carries no structure, so it becomes a single
//! raw-text column.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::CloudError;
use crate::config::{LayoutOcrConfig, ScannerConfig};
use crate::pipeline::extraction::date_extract::today;
use crate::pipeline::extraction::sanitize::raw_text_roster;
use crate::pipeline::extraction::{
    ExtractionError, ImageInput, RosterDocument, RosterStrategy, StrategyKind,
};
use crate::pipeline::until_cancelled;

const SERVICE: &str = "layout OCR";

/// Answer to a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitResponse {
    Inline(String),
    Job(String),
}

/// One poll of an asynchronous job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    pub status: String,
    pub text: Option<String>,
}

impl JobStatus {
    pub fn new(status: &str, text: Option<&str>) -> Self {
        Self {
            status: status.to_string(),
            text: text.map(str::to_string),
        }
    }
}

/// Wire access to the layout OCR service.
#[async_trait]
pub trait LayoutOcrTransport: Send + Sync {
    async fn submit(&self, image: &ImageInput) -> Result<SubmitResponse, CloudError>;
    async fn status(&self, job: &str) -> Result<JobStatus, CloudError>;
    async fn retrieve(&self, job: &str) -> Result<String, CloudError>;
}

// ═══════════════════════════════════════════════════════════
// HTTP transport
// ═══════════════════════════════════════════════════════════

pub struct HttpLayoutOcrTransport {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct SubmitBody {
    #[serde(default)]
    extracted_text: Option<String>,
    #[serde(default)]
    whisper_hash: Option<String>,
}

#[derive(Deserialize)]
struct Extraction {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct StatusBody {
    status: String,
    #[serde(default)]
    extraction: Option<Extraction>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct RetrieveBody {
    #[serde(default)]
    result_text: Option<String>,
    #[serde(default)]
    extracted_text: Option<String>,
}

impl HttpLayoutOcrTransport {
    pub fn new(config: &LayoutOcrConfig) -> Result<Self, ExtractionError> {
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

    fn key(&self) -> Result<&str, CloudError> {
        self.api_key
            .as_deref()
            .ok_or(CloudError::MissingApiKey(SERVICE))
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, CloudError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CloudError::Http {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json()
            .await
            .map_err(|e| CloudError::MalformedResponse(e.to_string()))
    }

    async fn get_job<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        job: &str,
    ) -> Result<T, CloudError> {
        let key = self.key()?;
        let response = self
            .client
            .get(format!("{}/{endpoint}", self.base_url))
            .query(&[("whisper_hash", job)])
            .header("unstract-key", key)
            .send()
            .await
            .map_err(|e| CloudError::from_reqwest(e, SERVICE))?;
        Self::read_json(response).await
    }
}

#[async_trait]
impl LayoutOcrTransport for HttpLayoutOcrTransport {
    async fn submit(&self, image: &ImageInput) -> Result<SubmitResponse, CloudError> {
        let key = self.key()?;

        let file = Part::bytes(image.bytes().to_vec())
            .file_name(image.file_name())
            .mime_str(image.mime_type())
            .map_err(|e| CloudError::MalformedResponse(format!("Bad MIME type: {e}")))?;
        let form = Form::new()
            .part("file", file)
            .text("mode", "layout_preserving")
            .text("output_format", "text");

        let response = self
            .client
            .post(format!("{}/whisper", self.base_url))
            .header("unstract-key", key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| CloudError::from_reqwest(e, SERVICE))?;

        let body: SubmitBody = Self::read_json(response).await?;
        match (body.extracted_text, body.whisper_hash) {
            (Some(text), _) if !text.trim().is_empty() => Ok(SubmitResponse::Inline(text)),
            (_, Some(hash)) if !hash.is_empty() => Ok(SubmitResponse::Job(hash)),
            _ => Err(CloudError::MalformedResponse(
                "submission returned neither text nor job hash".to_string(),
            )),
        }
    }

    async fn status(&self, job: &str) -> Result<JobStatus, CloudError> {
        let body: StatusBody = self.get_job("whisper-status", job).await?;
        let text = body.extraction.and_then(|e| e.text).or(body.text);
        Ok(JobStatus {
            status: body.status,
            text,
        })
    }

    async fn retrieve(&self, job: &str) -> Result<String, CloudError> {
        let body: RetrieveBody = self.get_job("whisper-retrieve", job).await?;
        body.result_text
            .or(body.extracted_text)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| CloudError::MalformedResponse("retrieved job has no text".to_string()))
    }
}

// ═══════════════════════════════════════════════════════════
// Mock transport
// ═══════════════════════════════════════════════════════════

/// Scripted transport for testing. Status answers are consumed in order;
/// the last one repeats.
pub struct MockLayoutOcrTransport {
    submit: Result<SubmitResponse, String>,
    statuses: Mutex<VecDeque<JobStatus>>,
    retrieved: Option<String>,
    status_calls: Mutex<u32>,
}

impl MockLayoutOcrTransport {
    pub fn new(submit: SubmitResponse) -> Self {
        Self {
            submit: Ok(submit),
            statuses: Mutex::new(VecDeque::new()),
            retrieved: None,
            status_calls: Mutex::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            submit: Err(message.to_string()),
            ..Self::new(SubmitResponse::Job(String::new()))
        }
    }

    pub fn with_statuses(self, statuses: Vec<JobStatus>) -> Self {
        *self.statuses.lock().unwrap_or_else(|e| e.into_inner()) = statuses.into();
        self
    }

    pub fn with_retrieved(mut self, text: &str) -> Self {
        self.retrieved = Some(text.to_string());
        self
    }

    pub fn status_calls(&self) -> u32 {
        *self.status_calls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LayoutOcrTransport for MockLayoutOcrTransport {
    async fn submit(&self, _image: &ImageInput) -> Result<SubmitResponse, CloudError> {
        self.submit.clone().map_err(CloudError::Connection)
    }

    async fn status(&self, _job: &str) -> Result<JobStatus, CloudError> {
        *self.status_calls.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        let mut statuses = self.statuses.lock().unwrap_or_else(|e| e.into_inner());
        let next = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().cloned()
        };
        next.ok_or_else(|| CloudError::MalformedResponse("no scripted status".to_string()))
    }

    async fn retrieve(&self, job: &str) -> Result<String, CloudError> {
        self.retrieved
            .clone()
            .ok_or_else(|| CloudError::JobFailed(job.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════
// Strategy
// ═══════════════════════════════════════════════════════════

pub struct LayoutOcrStrategy {
    transport: Arc<dyn LayoutOcrTransport>,
    config: Arc<ScannerConfig>,
}

impl LayoutOcrStrategy {
    pub fn new(transport: Arc<dyn LayoutOcrTransport>, config: Arc<ScannerConfig>) -> Self {
        Self { transport, config }
    }

    /// Submit, then poll until `processed`, `error` or the attempt ceiling.
    async fn fetch_text(
        &self,
        image: &ImageInput,
        cancel: &CancellationToken,
    ) -> Result<String, CloudError> {
        let submitted = until_cancelled(cancel, self.transport.submit(image))
            .await
            .ok_or(CloudError::Cancelled)??;

        let job = match submitted {
            SubmitResponse::Inline(text) => {
                debug!("Layout OCR answered inline");
                return Ok(text);
            }
            SubmitResponse::Job(hash) => hash,
        };

        let settings = &self.config.layout_ocr;
        for attempt in 1..=settings.max_poll_attempts {
            until_cancelled(cancel, tokio::time::sleep(settings.poll_interval()))
                .await
                .ok_or(CloudError::Cancelled)?;

            let polled = until_cancelled(cancel, self.transport.status(&job))
                .await
                .ok_or(CloudError::Cancelled)??;
            debug!(attempt, status = %polled.status, "Layout OCR poll");

            match polled.status.as_str() {
                "processed" => {
                    if let Some(text) = polled.text.filter(|t| !t.trim().is_empty()) {
                        return Ok(text);
                    }
                    return until_cancelled(cancel, self.transport.retrieve(&job))
                        .await
                        .ok_or(CloudError::Cancelled)?;
                }
                "error" | "failed" => return Err(CloudError::JobFailed(job)),
                _ => {}
            }
        }

        Err(CloudError::Timeout {
            attempts: settings.max_poll_attempts,
        })
    }
}

#[async_trait]
impl RosterStrategy for LayoutOcrStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::LayoutOcr
    }

    async fn extract(
        &self,
        image: &ImageInput,
        cancel: &CancellationToken,
    ) -> Result<RosterDocument, ExtractionError> {
        let text = self
            .fetch_text(image, cancel)
            .await
            .map_err(CloudError::into_extraction)?;

        let doc = raw_text_roster(&text, "layout_ocr", &self.config, today());
        info!(
            entries = doc.total_entries(),
            "Layout OCR text collapsed into a single raw column"
        );
        Ok(doc)
    }
}
