//! The chat pipeline.
//!
//! ```text
//! request ─► spam check ─► cache lookup ──hit──► reply
//!                              │
//!                             miss
//!                              ▼
//!                       fallback chain ─► cache store ─► reply
//! ```
//!
//! Only requests without conversation history use the cache. Rate limiting
//! happens in front of the gateway, at the transport layer.

use std::pin::Pin;
use std::sync::Arc;

use futures_util::{Stream, StreamExt, stream};
use tracing::{debug, instrument, warn};

use super::spam::SpamFilter;
use crate::cache::{CachedReply, Fingerprint, ResponseCache, fingerprint};
use crate::persona::Persona;
use crate::providers::{FallbackChain, FragmentStream};
use crate::types::{ChatEvent, ChatReply, ChatRequest};
use crate::Result;

/// Stream of events for one streamed reply. Always ends with `Done`.
pub type ChatEventStream = Pin<Box<dyn Stream<Item = ChatEvent> + Send>>;

/// Chat entry point composing the spam filter, cache and fallback chain.
///
/// Build one with [`Huginn::builder()`](crate::Huginn::builder).
pub struct ChatGateway {
    pub(crate) chain: FallbackChain,
    pub(crate) cache: Option<Arc<ResponseCache>>,
    pub(crate) spam: SpamFilter,
    pub(crate) persona: Persona,
}

impl ChatGateway {
    pub fn chain(&self) -> &FallbackChain {
        &self.chain
    }

    pub fn cache(&self) -> Option<&ResponseCache> {
        self.cache.as_deref()
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    /// Cache slot for this request, if it is eligible.
    fn cache_slot(&self, request: &ChatRequest) -> Option<(Arc<ResponseCache>, Fingerprint)> {
        if !request.is_stateless() {
            return None;
        }
        self.cache
            .as_ref()
            .map(|cache| (cache.clone(), fingerprint(&request.message)))
    }

    /// Answer a message in one piece.
    #[instrument(skip(self, request), fields(history = request.conversation_history.len()))]
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatReply> {
        self.spam.check(&request.message)?;

        let slot = self.cache_slot(request);
        if let Some((cache, key)) = &slot
            && let Some(hit) = cache.get(*key).await
        {
            debug!(model = %hit.model, "served from cache");
            return Ok(ChatReply {
                response: hit.text,
                model: hit.model,
                cached: true,
            });
        }

        let prompt = self
            .persona
            .prompt(&request.conversation_history, &request.message);
        let completion = self.chain.complete(&prompt).await?;

        if let Some((cache, key)) = slot {
            cache
                .put(
                    key,
                    CachedReply {
                        text: completion.text.clone(),
                        model: completion.model.clone(),
                    },
                )
                .await;
        }

        Ok(ChatReply {
            response: completion.text,
            model: completion.model,
            cached: false,
        })
    }

    /// Answer a message as a stream of events.
    ///
    /// Failures before the first fragment are returned as `Err`, with the
    /// same meaning as for [`chat`](Self::chat). Failures after it arrive
    /// in the stream as an `Error` event followed by `Done`.
    #[instrument(skip(self, request), fields(history = request.conversation_history.len()))]
    pub async fn chat_stream(&self, request: &ChatRequest) -> Result<ChatEventStream> {
        self.spam.check(&request.message)?;

        let slot = self.cache_slot(request);
        if let Some((cache, key)) = &slot
            && let Some(hit) = cache.get(*key).await
        {
            debug!(model = %hit.model, "replaying cached reply");
            return Ok(Box::pin(stream::iter([
                ChatEvent::fragment(hit.text),
                ChatEvent::Done { model: hit.model },
            ])));
        }

        let prompt = self
            .persona
            .prompt(&request.conversation_history, &request.message);
        let started = self.chain.complete_stream(&prompt).await?;

        let relay = Relay {
            fragments: started.fragments,
            model: started.model,
            collected: String::new(),
            slot,
            phase: Phase::Streaming,
        };
        Ok(Box::pin(stream::unfold(relay, Relay::step)))
    }
}

enum Phase {
    Streaming,
    Failed,
    Finished,
}

/// Turns backend fragments into chat events and caches the full text at the end.
struct Relay {
    fragments: FragmentStream,
    model: String,
    collected: String,
    slot: Option<(Arc<ResponseCache>, Fingerprint)>,
    phase: Phase,
}

impl Relay {
    async fn step(mut self) -> Option<(ChatEvent, Self)> {
        match self.phase {
            Phase::Finished => None,
            Phase::Failed => {
                self.phase = Phase::Finished;
                let done = ChatEvent::Done {
                    model: self.model.clone(),
                };
                Some((done, self))
            }
            Phase::Streaming => match self.fragments.next().await {
                Some(Ok(text)) => {
                    self.collect(&text);
                    Some((ChatEvent::Fragment { text }, self))
                }
                Some(Err(e)) => {
                    warn!(model = %self.model, error = %e, "stream failed after first fragment");
                    self.phase = Phase::Failed;
                    let event = ChatEvent::Error {
                        message: format!("stream interrupted: {e}"),
                    };
                    Some((event, self))
                }
                None => {
                    if let Some((cache, key)) = self.slot.take() {
                        let reply = CachedReply {
                            text: std::mem::take(&mut self.collected),
                            model: self.model.clone(),
                        };
                        cache.put(key, reply).await;
                    }
                    self.phase = Phase::Finished;
                    let done = ChatEvent::Done {
                        model: self.model.clone(),
                    };
                    Some((done, self))
                }
            },
        }
    }

    /// Keep the text for caching while it could still fit.
    fn collect(&mut self, text: &str) {
        let Some((cache, _)) = &self.slot else {
            return;
        };
        self.collected.push_str(text);
        if !cache.accepts(&self.collected) {
            self.slot = None;
            self.collected = String::new();
        }
    }
}
