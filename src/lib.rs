//! Huginn - persona chat gateway for the Gemini API
//!
//! Forwards a visitor's chat message to a hosted generative-language model
//! with a fixed persona prompt added server-side. Around the model call it
//! provides:
//!
//! - an ordered fallback across model ids that routes around quota failures
//!   and remembers where it last succeeded,
//! - a response cache for messages sent without conversation history,
//! - a per-client cooldown (used by the HTTP server),
//! - streamed replies as a sequence of [`ChatEvent`]s.
//!
//! # Example
//!
//! ```rust,no_run
//! use huginn::{ChatRequest, Huginn};
//!
//! #[tokio::main]
//! async fn main() -> huginn::Result<()> {
//!     let gateway = Huginn::builder()
//!         .gemini("your-api-key")
//!         .candidates(["gemini-1.5-flash", "gemini-1.5-pro"])
//!         .build()?;
//!
//!     let reply = gateway.chat(&ChatRequest::new("Who made you?")).await?;
//!     println!("{} (via {})", reply.response, reply.model);
//!     Ok(())
//! }
//! ```
//!
//! # Streaming
//!
//! ```rust,no_run
//! use futures_util::StreamExt;
//! use huginn::{ChatEvent, ChatRequest, Huginn};
//!
//! # async fn run() -> huginn::Result<()> {
//! let gateway = Huginn::builder().gemini("your-api-key").build()?;
//! let mut events = gateway.chat_stream(&ChatRequest::new("Tell me a joke")).await?;
//! while let Some(event) = events.next().await {
//!     match event {
//!         ChatEvent::Fragment { text } => print!("{text}"),
//!         ChatEvent::Error { message } => eprintln!("\n{message}"),
//!         ChatEvent::Done { .. } => println!(),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod error;
pub mod gateway;
pub mod limiter;
pub mod persona;
pub mod providers;
#[cfg(feature = "server")]
pub mod server;
pub mod telemetry;
pub mod types;
pub mod version;

// Re-export main types at crate root
pub use cache::{CacheConfig, ResponseCache};
pub use error::{FailureClass, HuginnError, Result};
pub use gateway::{ChatEventStream, ChatGateway, Huginn, HuginnBuilder, SpamConfig};
pub use limiter::{Admission, RateLimitConfig, RateLimiter};
pub use persona::{Persona, PersonaConfig, Prompt};
pub use providers::{FallbackChain, FragmentStream, GeminiClient, GenerationBackend};
pub use types::{ChatEvent, ChatReply, ChatRequest, GenerationOptions, Message, Role};
pub use version::{PKG_NAME, PKG_VERSION, version_string};
