//! Natural-language explanations for detected anomalies.
//!
//! The explanation service is remote and allowed to fail. Callers go through
//! [ExplainPool], which bounds concurrency, enforces a timeout per call and never
//! drops an anomaly because its explanation could not be produced.

pub mod ollama;
pub mod pool;

pub use ollama::OllamaExplainer;
pub use pool::ExplainPool;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "phi";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Error)]
pub enum ExplainError {
    #[error("Explanation service unavailable: {0}")]
    Unavailable(String),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("HTTP client timed out: {0}")]
    ClientTimeout(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ExplainError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExplainError::ClientTimeout(err.to_string())
        } else if err.is_connect() {
            ExplainError::Connection(err.to_string())
        } else if err.is_decode() {
            ExplainError::InvalidResponse(err.to_string())
        } else {
            ExplainError::Unavailable(err.to_string())
        }
    }
}

/// Settings for reaching the explanation service.
#[derive(Clone, Debug)]
pub struct ExplainConfig {
    pub url: String,
    pub model: String,
    pub timeout: Duration,
    pub workers: usize,
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            workers: DEFAULT_WORKERS,
        }
    }
}

/// A text-completion backend turning a prompt into an explanation.
#[async_trait]
pub trait Explainer: Send + Sync {
    fn name(&self) -> &str;

    async fn explain(&self, prompt: &str) -> Result<String, ExplainError>;
}
