//! Bounded, timeout-guarded dispatch of explanation requests.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::timeout;

use super::{ExplainError, Explainer};

/// Prefix of the text attached when an explanation could not be produced.
pub const FALLBACK_PREFIX: &str = "Explanation unavailable";

pub fn fallback_explanation(reason: &ExplainError) -> String {
    format!("{FALLBACK_PREFIX}: {reason}")
}

pub struct ExplainPool {
    explainer: Arc<dyn Explainer>,
    workers: usize,
    timeout: Duration,
}

impl ExplainPool {
    pub fn new(explainer: Arc<dyn Explainer>, workers: usize, timeout: Duration) -> Self {
        Self {
            explainer,
            workers: workers.max(1),
            timeout,
        }
    }

    /// Explains every prompt, at most `workers` in flight at once.
    ///
    /// `result[i]` always answers `prompts[i]`; a failed, timed out or panicked
    /// call is answered with a fallback explanation.
    pub async fn explain_all(&self, prompts: Vec<String>) -> Vec<String> {
        log::info!(
            "Requesting {} explanations from {} ({} workers, {:?} timeout).",
            prompts.len(),
            self.explainer.name(),
            self.workers,
            self.timeout
        );
        let semaphore = Arc::new(Semaphore::new(self.workers));

        let handles: Vec<_> = prompts
            .into_iter()
            .enumerate()
            .map(|(index, prompt)| {
                let semaphore = semaphore.clone();
                let explainer = self.explainer.clone();
                let limit = self.timeout;

                tokio::spawn(async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(e) => return fallback_explanation(&ExplainError::Unavailable(e.to_string())),
                    };

                    match timeout(limit, explainer.explain(&prompt)).await {
                        Ok(Ok(text)) => text,
                        Ok(Err(e)) => {
                            log::warn!("Explanation {index} failed: {e}");
                            fallback_explanation(&e)
                        }
                        Err(_) => {
                            log::warn!("Explanation {index} timed out after {limit:?}");
                            fallback_explanation(&ExplainError::Timeout(limit))
                        }
                    }
                })
            })
            .collect();

        let mut explanations = Vec::with_capacity(handles.len());
        for (index, handle) in handles.into_iter().enumerate() {
            let text = handle.await.unwrap_or_else(|e| {
                log::error!("Explanation task {index} aborted: {e}");
                fallback_explanation(&ExplainError::Unavailable(e.to_string()))
            });
            explanations.push(text);
        }
        explanations
    }
}
