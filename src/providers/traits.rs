//! Generation backend trait.
//!
//! A backend is the external text-generation service. It receives the model
//! id per call, so a single backend instance serves every candidate in the
//! fallback chain.
//!
//! # Error contract
//!
//! Backends must report failures as structured [`HuginnError`](crate::HuginnError)
//! variants so the chain can classify them without inspecting messages:
//!
//! - `QuotaExceeded`: quota / rate limit for this model; chain moves on
//! - `AuthenticationFailed`: credential rejected; chain stops
//! - `ContentBlocked` / `InvalidRequest`: request refused; chain stops
//! - anything else: chain moves on
//!
//! # Example
//!
//! ```ignore
//! async fn generate(&self, model: &str, prompt: &Prompt, options: &GenerationOptions) -> Result<String> {
//!     if self.exhausted(model) {
//!         return Err(HuginnError::QuotaExceeded { model: model.to_string(), retry_after: None });
//!     }
//!     // ... call the API
//! }
//! ```

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::persona::Prompt;
use crate::types::GenerationOptions;
use crate::{HuginnError, Result};

/// Stream of incremental text fragments.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// External text-generation service.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Backend name for logging/debugging.
    fn name(&self) -> &str;

    /// Non-streaming generation.
    async fn generate(
        &self,
        model: &str,
        prompt: &Prompt,
        options: &GenerationOptions,
    ) -> Result<String>;

    /// Streaming generation.
    ///
    /// Errors that occur before the upstream accepted the request should be
    /// returned directly; errors after that are yielded as stream items.
    async fn generate_stream(
        &self,
        model: &str,
        prompt: &Prompt,
        options: &GenerationOptions,
    ) -> Result<FragmentStream>;

    /// Model ids this backend can generate with.
    ///
    /// Default implementation returns `NotImplemented`.
    async fn list_models(&self) -> Result<Vec<String>> {
        Err(HuginnError::NotImplemented("list_models"))
    }
}
