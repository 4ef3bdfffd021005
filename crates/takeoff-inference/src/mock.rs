//! Mock generation backend for deterministic testing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use takeoff_inference::mock::MockGenerationBackend;
//! use takeoff_core::GenerationBackend;
//!
//! # async fn demo() {
//! let backend = MockGenerationBackend::new()
//!     .with_fixed_response(r#"{"suggested_commodity_code":"A1","reasoning_summary":"ok"}"#)
//!     .with_response_containing("category: pipe", "not json");
//!
//! let _ = backend.generate("category: duct").await;
//! assert_eq!(backend.generate_call_count(), 1);
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use takeoff_core::{Error, GenerationBackend, Result};

/// One recorded generation call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub system: String,
    pub prompt: String,
    pub timestamp: Instant,
}

#[derive(Debug, Clone)]
struct MockConfig {
    default_response: String,
    /// `(needle, response)`: the first needle contained in the prompt wins.
    containing: Vec<(String, String)>,
    latency: Duration,
    failure_rate: f64,
    model: String,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            default_response: r#"{"suggested_commodity_code":"MOCK-001","reasoning_summary":"Mock classification"}"#
                .to_string(),
            containing: Vec::new(),
            latency: Duration::ZERO,
            failure_rate: 0.0,
            model: "mock".to_string(),
        }
    }
}

/// Scripted [`GenerationBackend`] that records every call.
///
/// Clones share the call log and the script queue.
#[derive(Clone, Default)]
pub struct MockGenerationBackend {
    config: Arc<MockConfig>,
    script: Arc<Mutex<VecDeque<String>>>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockGenerationBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Response for every call not answered by the script or a mapping.
    pub fn with_fixed_response(mut self, response: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).default_response = response.into();
        self
    }

    /// Respond with `response` when the prompt contains `needle`.
    pub fn with_response_containing(
        mut self,
        needle: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        Arc::make_mut(&mut self.config)
            .containing
            .push((needle.into(), response.into()));
        self
    }

    /// Responses handed out in order before any other rule applies.
    pub fn with_script<I, S>(self, responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.script).extend(responses.into_iter().map(Into::into));
        self
    }

    /// Simulated latency per call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        Arc::make_mut(&mut self.config).latency = latency;
        self
    }

    /// Set failure rate (0.0 - 1.0) for testing error handling.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        Arc::make_mut(&mut self.config).failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_model_name(mut self, model: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).model = model.into();
        self
    }

    /// Get all logged calls for assertion.
    pub fn get_calls(&self) -> Vec<MockCall> {
        lock(&self.call_log).clone()
    }

    /// Clear the call log.
    pub fn clear_calls(&self) {
        lock(&self.call_log).clear()
    }

    pub fn generate_call_count(&self) -> usize {
        lock(&self.call_log).len()
    }

    fn should_fail(&self) -> bool {
        use rand::Rng;
        self.config.failure_rate > 0.0 && rand::thread_rng().gen::<f64>() < self.config.failure_rate
    }

    fn respond(&self, prompt: &str) -> String {
        if let Some(scripted) = lock(&self.script).pop_front() {
            return scripted;
        }
        self.config
            .containing
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| self.config.default_response.clone())
    }
}

#[async_trait]
impl GenerationBackend for MockGenerationBackend {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.generate_with_system("", prompt).await
    }

    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        lock(&self.call_log).push(MockCall {
            system: system.to_string(),
            prompt: prompt.to_string(),
            timestamp: Instant::now(),
        });

        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }

        if self.should_fail() {
            return Err(Error::Inference("Simulated failure for testing".to_string()));
        }

        Ok(self.respond(prompt))
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_mapping_then_default() {
        let backend = MockGenerationBackend::new()
            .with_fixed_response("default")
            .with_response_containing("pipe", "mapped")
            .with_script(["first"]);

        assert_eq!(backend.generate("pipe").await.unwrap(), "first");
        assert_eq!(backend.generate("pipe").await.unwrap(), "mapped");
        assert_eq!(backend.generate("duct").await.unwrap(), "default");
        assert_eq!(backend.generate_call_count(), 3);
    }

    #[tokio::test]
    async fn test_clones_share_call_log() {
        let backend = MockGenerationBackend::new();
        let clone = backend.clone();
        clone.generate_with_system("sys", "p").await.unwrap();
        let calls = backend.get_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].system, "sys");
        backend.clear_calls();
        assert_eq!(clone.generate_call_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_rate_one_always_fails() {
        let backend = MockGenerationBackend::new().with_failure_rate(1.0);
        assert!(matches!(
            backend.generate("x").await,
            Err(Error::Inference(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_simulated() {
        let backend = MockGenerationBackend::new().with_latency(Duration::from_secs(60));
        let start = tokio::time::Instant::now();
        backend.generate("x").await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(60));
    }
}
