//! Extraction orchestrator: ordered strategy fallback.
//!
//! Strategies run strictly one after another. The first structurally valid
//! roster wins and nothing later can replace it; errors are logged at the
//! strategy boundary and only a terminal failure (or cancellation) reaches
//! the caller. Retrying the whole pipeline is left to the caller.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::input::ImageInput;
use super::local::LocalOcrStrategy;
use super::lookup::lookup_in_roster;
use super::ocr::OcrEngine;
use super::types::{
    AttemptStatus, ExtractionAttempt, LocateOutcome, RosterDocument, ShiftLookup, StrategyKind,
};
use super::ExtractionError;
use crate::config::ScannerConfig;
use crate::pipeline::cloud::{
    GeminiClient, HttpLayoutOcrTransport, LayoutOcrStrategy, VisionStrategy,
};

/// One complete extraction technique.
#[async_trait]
pub trait RosterStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn extract(
        &self,
        image: &ImageInput,
        cancel: &CancellationToken,
    ) -> Result<RosterDocument, ExtractionError>;
}

/// Targeted "where is this person" lookup.
#[async_trait]
pub trait ShiftLocator: Send + Sync {
    async fn locate(
        &self,
        image: &ImageInput,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<ShiftLookup, ExtractionError>;
}

pub struct RosterExtractor {
    strategies: Vec<Arc<dyn RosterStrategy>>,
    locator: Option<Arc<dyn ShiftLocator>>,
    config: Arc<ScannerConfig>,
}

impl RosterExtractor {
    pub fn new(strategies: Vec<Arc<dyn RosterStrategy>>, config: Arc<ScannerConfig>) -> Self {
        Self {
            strategies,
            locator: None,
            config,
        }
    }

    pub fn with_locator(mut self, locator: Arc<dyn ShiftLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    /// Production order: remote layout OCR, cloud vision, local OCR.
    /// Tiers without an API key stay in the chain and are skipped at run time.
    pub fn from_config(
        config: Arc<ScannerConfig>,
        engine: Arc<dyn OcrEngine>,
    ) -> Result<Self, ExtractionError> {
        let transport = HttpLayoutOcrTransport::new(&config.layout_ocr)?;
        let layout_ocr = LayoutOcrStrategy::new(Arc::new(transport), Arc::clone(&config));

        let gemini = GeminiClient::new(&config.vision)?;
        let vision = Arc::new(VisionStrategy::new(Arc::new(gemini), Arc::clone(&config)));

        let local = LocalOcrStrategy::new(engine, Arc::clone(&config));

        let strategies: Vec<Arc<dyn RosterStrategy>> =
            vec![Arc::new(layout_ocr), vision.clone(), Arc::new(local)];
        Ok(Self::new(strategies, config).with_locator(vision))
    }

    /// `from_config` with the linked Tesseract engine.
    #[cfg(feature = "ocr")]
    pub fn with_bundled_tesseract(config: Arc<ScannerConfig>) -> Result<Self, ExtractionError> {
        let engine = super::ocr::BundledTesseract::from_config(&config.local_ocr)?;
        Self::from_config(config, Arc::new(engine))
    }

    /// Extract a roster from a base64 or data-URI image.
    pub async fn extract_base64(
        &self,
        encoded: &str,
        cancel: &CancellationToken,
    ) -> Result<RosterDocument, ExtractionError> {
        let image = ImageInput::from_base64(encoded)?;
        self.extract(&image, cancel).await
    }

    pub async fn extract(
        &self,
        image: &ImageInput,
        cancel: &CancellationToken,
    ) -> Result<RosterDocument, ExtractionError> {
        let span = info_span!("roster_scan", scan_id = %Uuid::new_v4(), op = "extract");
        self.run_strategies(image, cancel).instrument(span).await
    }

    async fn run_strategies(
        &self,
        image: &ImageInput,
        cancel: &CancellationToken,
    ) -> Result<RosterDocument, ExtractionError> {
        let mut attempts: Vec<ExtractionAttempt> = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            if cancel.is_cancelled() {
                return Err(ExtractionError::Cancelled);
            }

            let kind = strategy.kind();
            let started = Instant::now();
            let outcome = strategy.extract(image, cancel).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(mut doc) if doc.is_valid() => {
                    attempts.push(ExtractionAttempt {
                        strategy: kind,
                        status: AttemptStatus::Success,
                    });
                    info!(
                        strategy = %kind,
                        columns = doc.columns.len(),
                        entries = doc.total_entries(),
                        elapsed_ms,
                        "Roster extracted"
                    );
                    doc.attempts = attempts;
                    return Ok(doc);
                }
                Ok(doc) => {
                    attempts.push(ExtractionAttempt {
                        strategy: kind,
                        status: AttemptStatus::Empty,
                    });
                    warn!(
                        strategy = %kind,
                        columns = doc.columns.len(),
                        elapsed_ms,
                        "Strategy returned no entries, trying next"
                    );
                }
                Err(e) if e.is_cancelled() => {
                    info!(strategy = %kind, "Extraction cancelled");
                    return Err(ExtractionError::Cancelled);
                }
                Err(e) => {
                    attempts.push(ExtractionAttempt {
                        strategy: kind,
                        status: e.attempt_status(),
                    });
                    warn!(strategy = %kind, error = %e, elapsed_ms, "Strategy failed, trying next");
                }
            }
        }

        error!(attempts = attempts.len(), "All extraction strategies failed");
        Err(ExtractionError::TerminalFailure { attempts })
    }

    /// Find one person: vision lookup first, then full extraction + roster search.
    pub async fn locate(
        &self,
        image: &ImageInput,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<LocateOutcome, ExtractionError> {
        if name.trim().is_empty() {
            return Err(ExtractionError::InvalidInput("Name to locate is empty".into()));
        }

        let span = info_span!("roster_scan", scan_id = %Uuid::new_v4(), op = "locate");
        async {
            if let Some(locator) = &self.locator {
                match locator.locate(image, name, cancel).await {
                    Ok(lookup) if lookup.found => {
                        info!(shift = ?lookup.shift, "Located via vision lookup");
                        return Ok(LocateOutcome::Found(lookup));
                    }
                    Ok(_) => info!("Vision lookup did not find the name, extracting full roster"),
                    Err(e) if e.is_cancelled() => return Err(ExtractionError::Cancelled),
                    Err(e) => warn!(error = %e, "Vision lookup failed, extracting full roster"),
                }
            }

            let roster = self.run_strategies(image, cancel).await?;
            match lookup_in_roster(&roster, name, &self.config.keywords) {
                Some(lookup) => {
                    info!(shift = ?lookup.shift, "Located in extracted roster");
                    Ok(LocateOutcome::Found(lookup))
                }
                None => {
                    info!("Name not present in extracted roster");
                    Ok(LocateOutcome::NotFound { roster })
                }
            }
        }
        .instrument(span)
        .await
    }
}
