//! Generation backends and the model fallback chain.
//!
//! The [`GenerationBackend`] trait is the seam between the gateway and a
//! hosted model API. [`GeminiClient`] is the production implementation;
//! tests plug in scripted backends.

pub mod backpressure;
pub mod fallback;
pub mod gemini;
pub mod traits;

pub use backpressure::{DEFAULT_STREAM_BUFFER, bounded_stream};
pub use fallback::{
    Completion, DEFAULT_BACKEND_TIMEOUT, DEFAULT_CANDIDATES, FallbackChain, FallbackState,
    StreamCompletion,
};
pub use gemini::GeminiClient;
pub use traits::{FragmentStream, GenerationBackend};
