pub mod layout_ocr;
pub mod parser;
pub mod prompt;
pub mod vision;

pub use layout_ocr::*;
pub use vision::*;

use thiserror::Error;

use crate::pipeline::extraction::ExtractionError;

#[derive(Error, Debug)]
pub enum CloudError {
    #[error("API key not configured for {0}")]
    MissingApiKey(&'static str),

    #[error("Cannot reach {0}")]
    Connection(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Gave up after {attempts} polling attempts")]
    Timeout { attempts: u32 },

    #[error("Remote job failed: {0}")]
    JobFailed(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("No model variant produced a usable answer (tried: {})", tried.join(", "))]
    NoModelSucceeded { tried: Vec<String> },

    #[error("Request cancelled")]
    Cancelled,
}

impl CloudError {
    /// Map a transport failure the same way for every remote client.
    pub(crate) fn from_reqwest(e: reqwest::Error, service: &str) -> Self {
        if e.is_connect() {
            CloudError::Connection(service.to_string())
        } else if e.is_timeout() {
            CloudError::Connection(format!("{service} (request timed out)"))
        } else if e.is_decode() {
            CloudError::MalformedResponse(e.to_string())
        } else {
            CloudError::Connection(format!("{service}: {e}"))
        }
    }

    /// Strategy-boundary mapping: a missing key is a configuration problem
    /// and cancellation keeps its own outcome.
    pub(crate) fn into_extraction(self) -> ExtractionError {
        match self {
            CloudError::MissingApiKey(service) => {
                ExtractionError::Configuration(format!("API key not configured for {service}"))
            }
            CloudError::Cancelled => ExtractionError::Cancelled,
            other => ExtractionError::Cloud(other),
        }
    }
}
