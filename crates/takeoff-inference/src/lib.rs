//! # takeoff-inference
//!
//! Everything between a [`Pattern`](takeoff_core::Pattern) and a validated
//! suggestion request:
//!
//! - [`prompt`]: deterministic, size-capped prompt rendering
//! - [`validation`]: strict parsing of untrusted generation output
//! - Ollama generation backend (default feature `ollama`)
//! - Scripted mock backend (feature `mock`)
//!
//! # Example
//!
//! ```rust,no_run
//! use takeoff_inference::{OllamaBackend, PromptModelBuilder, SYSTEM_PROMPT};
//! use takeoff_core::GenerationBackend;
//!
//! # async fn run(pattern: takeoff_core::Pattern) -> takeoff_core::Result<()> {
//! let backend = OllamaBackend::from_env();
//! let prompt = PromptModelBuilder::new().render(&pattern);
//! let raw = backend.generate_with_system(SYSTEM_PROMPT, &prompt).await?;
//! let suggestion = takeoff_inference::parse_suggestion(&raw, Some(&pattern.fingerprint))?;
//! # Ok(())
//! # }
//! ```

pub mod prompt;
pub mod validation;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use prompt::{PromptModelBuilder, SYSTEM_PROMPT, TEMPLATE_VERSION};
pub use validation::{parse_generated, parse_suggestion, GeneratedClassification};

#[cfg(feature = "ollama")]
pub use ollama::OllamaBackend;
