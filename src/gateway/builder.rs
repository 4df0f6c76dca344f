//! Builder for configuring gateway instances

use std::sync::Arc;
use std::time::Duration;

use super::ChatGateway;
use super::spam::{SpamConfig, SpamFilter};
use crate::cache::{CacheConfig, ResponseCache};
use crate::persona::Persona;
use crate::providers::{
    DEFAULT_BACKEND_TIMEOUT, DEFAULT_CANDIDATES, DEFAULT_STREAM_BUFFER, FallbackChain,
    GeminiClient, GenerationBackend,
};
use crate::types::GenerationOptions;
use crate::{HuginnError, Result};

/// Main entry point for creating gateway instances.
pub struct Huginn;

impl Huginn {
    /// Create a new builder for configuring the gateway.
    pub fn builder() -> HuginnBuilder {
        HuginnBuilder::new()
    }
}

/// Builder for configuring gateway instances.
pub struct HuginnBuilder {
    gemini_key: Option<String>,
    gemini_base_url: Option<String>,
    system_instruction: bool,
    backend: Option<Arc<dyn GenerationBackend>>,
    candidates: Vec<String>,
    options: GenerationOptions,
    timeout: Duration,
    stream_buffer_size: usize,
    cache: Option<CacheConfig>,
    spam: SpamConfig,
    persona: Option<Persona>,
}

impl HuginnBuilder {
    pub fn new() -> Self {
        Self {
            gemini_key: None,
            gemini_base_url: None,
            system_instruction: false,
            backend: None,
            candidates: DEFAULT_CANDIDATES.iter().map(|s| s.to_string()).collect(),
            options: GenerationOptions::default(),
            timeout: DEFAULT_BACKEND_TIMEOUT,
            stream_buffer_size: DEFAULT_STREAM_BUFFER,
            cache: Some(CacheConfig::default()),
            spam: SpamConfig::default(),
            persona: None,
        }
    }

    /// Use Google Gemini with this API key.
    pub fn gemini(mut self, api_key: impl Into<String>) -> Self {
        self.gemini_key = Some(api_key.into());
        self
    }

    /// Override the Gemini API base URL (proxies, tests).
    pub fn gemini_base_url(mut self, url: impl Into<String>) -> Self {
        self.gemini_base_url = Some(url.into());
        self
    }

    /// Send persona instructions in Gemini's `systemInstruction` field.
    pub fn system_instruction(mut self, enabled: bool) -> Self {
        self.system_instruction = enabled;
        self
    }

    /// Use a custom backend instead of Gemini.
    pub fn backend(mut self, backend: Arc<dyn GenerationBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Candidate model ids, highest priority first.
    pub fn candidates<I, S>(mut self, candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.candidates = candidates.into_iter().map(Into::into).collect();
        self
    }

    pub fn generation_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    /// Bound on each backend call.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn stream_buffer_size(mut self, size: usize) -> Self {
        self.stream_buffer_size = size;
        self
    }

    /// Configure the response cache (on by default).
    pub fn response_cache(mut self, config: CacheConfig) -> Self {
        self.cache = Some(config);
        self
    }

    pub fn disable_response_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    pub fn spam(mut self, config: SpamConfig) -> Self {
        self.spam = config;
        self
    }

    pub fn persona(mut self, persona: Persona) -> Self {
        self.persona = Some(persona);
        self
    }

    /// Build the gateway.
    ///
    /// Fails with `Configuration` when no backend or API key is set, and
    /// with `NoCandidates` when the candidate list is empty.
    pub fn build(self) -> Result<ChatGateway> {
        let backend: Arc<dyn GenerationBackend> = match (self.backend, self.gemini_key) {
            (Some(backend), _) => backend,
            (None, Some(key)) if !key.trim().is_empty() => {
                let client = match self.gemini_base_url {
                    Some(url) => GeminiClient::with_base_url(key, url)?,
                    None => GeminiClient::new(key)?,
                };
                Arc::new(client.system_instruction(self.system_instruction))
            }
            _ => {
                return Err(HuginnError::Configuration(
                    "no Gemini API key configured (set GEMINI_API_KEY)".into(),
                ));
            }
        };

        let chain = FallbackChain::new(backend, self.candidates)?
            .with_options(self.options)
            .with_timeout(self.timeout)
            .with_stream_buffer_size(self.stream_buffer_size);

        Ok(ChatGateway {
            chain,
            cache: self.cache.map(|c| Arc::new(ResponseCache::new(&c))),
            spam: SpamFilter::new(self.spam),
            persona: self.persona.unwrap_or_default(),
        })
    }
}

impl Default for HuginnBuilder {
    fn default() -> Self {
        Self::new()
    }
}
