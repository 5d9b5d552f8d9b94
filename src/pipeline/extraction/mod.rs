pub mod types;
pub mod input;
pub mod preprocess;
pub mod ocr;
pub mod layout;
pub mod column_detect;
pub mod row_classify;
pub mod date_extract;
pub mod sanitize;
pub mod local;
pub mod lookup;
pub mod orchestrator;

pub use types::*;
pub use input::*;
pub use ocr::*;
pub use local::*;
pub use orchestrator::*;

use thiserror::Error;

use crate::pipeline::cloud::CloudError;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Remote service error: {0}")]
    Cloud(#[from] CloudError),

    #[error("No roster structure found: {0}")]
    NoStructureFound(String),

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Tesseract OCR initialization failed: {0}")]
    OcrInit(String),

    #[error("OCR processing failed: {0}")]
    OcrProcessing(String),

    #[error("Extraction cancelled")]
    Cancelled,

    #[error("All extraction strategies failed ({} attempted)", attempts.len())]
    TerminalFailure { attempts: Vec<ExtractionAttempt> },
}

impl ExtractionError {
    /// Outcome recorded for the strategy that raised this error.
    pub fn attempt_status(&self) -> AttemptStatus {
        match self {
            Self::Cancelled | Self::Cloud(CloudError::Cancelled) => AttemptStatus::Cancelled,
            Self::Cloud(CloudError::Timeout { .. }) => AttemptStatus::Timeout,
            Self::NoStructureFound(_) => AttemptStatus::Empty,
            _ => AttemptStatus::Error,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.attempt_status() == AttemptStatus::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_status_classification() {
        assert_eq!(ExtractionError::Cancelled.attempt_status(), AttemptStatus::Cancelled);
        assert_eq!(
            ExtractionError::from(CloudError::Cancelled).attempt_status(),
            AttemptStatus::Cancelled
        );
        assert_eq!(
            ExtractionError::from(CloudError::Timeout { attempts: 20 }).attempt_status(),
            AttemptStatus::Timeout
        );
        assert_eq!(
            ExtractionError::NoStructureFound("no lines".into()).attempt_status(),
            AttemptStatus::Empty
        );
        assert_eq!(
            ExtractionError::Configuration("missing key".into()).attempt_status(),
            AttemptStatus::Error
        );
    }

    #[test]
    fn terminal_failure_message_counts_attempts() {
        let err = ExtractionError::TerminalFailure {
            attempts: vec![
                ExtractionAttempt {
                    strategy: StrategyKind::LayoutOcr,
                    status: AttemptStatus::Timeout,
                },
                ExtractionAttempt {
                    strategy: StrategyKind::LocalOcr,
                    status: AttemptStatus::Empty,
                },
            ],
        };
        assert_eq!(err.to_string(), "All extraction strategies failed (2 attempted)");
        assert!(!err.is_cancelled());
    }
}
