//! Ordered model fallback with a sticky starting point.
//!
//! The `FallbackChain` holds the candidate model ids in priority order and
//! tries them one after another until one produces a reply. Where it starts
//! is remembered in a [`FallbackState`]: when a candidate runs out of quota
//! the sticky index moves past it, so later requests skip straight to a
//! model that still has headroom.
//!
//! # Failure handling
//!
//! Each failure is classified with [`HuginnError::failure_class`]:
//!
//! | Class | Effect |
//! |---|---|
//! | `Quota` | advance the sticky index, try the next candidate |
//! | `Retryable` | try the next candidate |
//! | `InvalidCredential` | stop, surface the error |
//! | `Rejected` | stop, surface the error |
//!
//! When every candidate has failed, the chain returns
//! [`HuginnError::AllModelsExhausted`] carrying the last error seen.
//!
//! # Flow
//!
//! ```text
//!          sticky index = 1
//!                 │
//!   ┌─────────────┼──────────────────────────┐
//!   │ [0] flash   │ [1] 1.0-pro   [2] 1.5-pro │
//!   └─────────────┼──────────────────────────┘
//!                 ▼
//!      try [1] ── quota ──► advance to 2, try [2] ── ok ──► reply
//!                                          │
//!                                          └─ fail ──► try [0] ... exhausted
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use futures_util::{StreamExt, stream};
use tracing::{debug, error, info, instrument, warn};

use super::backpressure::{self, DEFAULT_STREAM_BUFFER};
use super::traits::{FragmentStream, GenerationBackend};
use crate::error::FailureClass;
use crate::persona::Prompt;
use crate::telemetry;
use crate::types::GenerationOptions;
use crate::{HuginnError, Result};

/// Default bound on a single backend call.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Default candidate order.
pub const DEFAULT_CANDIDATES: &[&str] = &["gemini-1.5-flash", "gemini-1.0-pro", "gemini-1.5-pro"];

/// Sticky index into the candidate list.
///
/// Updated with compare-and-swap from the value a request last observed, so
/// a quota failure anywhere in the walk moves the index just past the failed
/// candidate unless another request moved it first. Two concurrent requests
/// may both try an exhausted candidate once; that is tolerated.
#[derive(Debug, Default)]
pub struct FallbackState {
    next: AtomicUsize,
}

impl FallbackState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the candidate to try first.
    pub fn current(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        self.next.load(Ordering::Acquire) % len
    }

    /// Move the index from `observed` to just past `failed`.
    ///
    /// `observed` is where the caller last saw the index. Returns the new
    /// index when this call moved it, `None` when another request already
    /// had or the index would not change.
    pub fn advance_past(&self, observed: usize, failed: usize, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let target = (failed + 1) % len;
        if target == observed {
            return None;
        }
        self.next
            .compare_exchange(observed, target, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| target)
    }
}

/// A finished non-streaming completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub model: String,
}

/// A streaming completion committed to one candidate.
pub struct StreamCompletion {
    /// Candidate that produced the first fragment.
    pub model: String,
    /// Fragments, starting with the first one.
    pub fragments: FragmentStream,
}

impl std::fmt::Debug for StreamCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCompletion")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// Ordered fallback across model candidates.
pub struct FallbackChain {
    backend: Arc<dyn GenerationBackend>,
    candidates: Vec<String>,
    state: FallbackState,
    options: GenerationOptions,
    timeout: Duration,
    stream_buffer_size: usize,
}

impl FallbackChain {
    /// Create a chain over `candidates`, highest priority first.
    pub fn new<I, S>(backend: Arc<dyn GenerationBackend>, candidates: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let candidates: Vec<String> = candidates.into_iter().map(Into::into).collect();
        if candidates.is_empty() {
            return Err(HuginnError::NoCandidates);
        }
        if let Some(blank) = candidates.iter().position(|c| c.trim().is_empty()) {
            return Err(HuginnError::Configuration(format!(
                "model candidate #{blank} is empty"
            )));
        }

        Ok(Self {
            backend,
            candidates,
            state: FallbackState::new(),
            options: GenerationOptions::default(),
            timeout: DEFAULT_BACKEND_TIMEOUT,
            stream_buffer_size: DEFAULT_STREAM_BUFFER,
        })
    }

    /// Generation options sent with every call.
    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    /// Bound on each backend call (and, for streams, on the first fragment).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Channel capacity between the backend stream and the caller.
    pub fn with_stream_buffer_size(mut self, size: usize) -> Self {
        self.stream_buffer_size = size;
        self
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// The candidate the next request will try first.
    pub fn next_candidate(&self) -> &str {
        &self.candidates[self.state.current(self.candidates.len())]
    }

    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    pub fn backend(&self) -> &Arc<dyn GenerationBackend> {
        &self.backend
    }

    /// Run the prompt through the candidates until one answers.
    #[instrument(skip(self, prompt), fields(operation = "complete"))]
    pub async fn complete(&self, prompt: &Prompt) -> Result<Completion> {
        let len = self.candidates.len();
        let first = self.state.current(len);
        let mut observed = first;
        let mut last_err = None;

        for offset in 0..len {
            let idx = (first + offset) % len;
            let model = &self.candidates[idx];
            let start = Instant::now();

            let result = tokio::time::timeout(
                self.timeout,
                self.backend.generate(model, prompt, &self.options),
            )
            .await
            .unwrap_or(Err(HuginnError::Timeout(self.timeout)));

            match result {
                Ok(text) => {
                    Self::record_request("complete", model, start, true);
                    debug!(model = %model, "candidate answered");
                    return Ok(Completion {
                        text,
                        model: model.clone(),
                    });
                }
                Err(e) => {
                    Self::record_request("complete", model, start, false);
                    if !self.keep_going(&mut observed, idx, model, &e) {
                        return Err(e);
                    }
                    last_err = Some(e);
                }
            }
        }

        Err(Self::exhausted(len, last_err))
    }

    /// Streaming variant of [`complete`](Self::complete).
    ///
    /// A candidate is only committed to once it has produced its first
    /// fragment. Failures before that point (including a stream that ends
    /// without any fragment) are handled like non-streaming failures. Errors
    /// after it are passed through in the stream and never cause a switch.
    #[instrument(skip(self, prompt), fields(operation = "complete_stream"))]
    pub async fn complete_stream(&self, prompt: &Prompt) -> Result<StreamCompletion> {
        let len = self.candidates.len();
        let first = self.state.current(len);
        let mut observed = first;
        let mut last_err = None;

        for offset in 0..len {
            let idx = (first + offset) % len;
            let model = &self.candidates[idx];
            let start = Instant::now();

            let attempt = async {
                let mut fragments = self
                    .backend
                    .generate_stream(model, prompt, &self.options)
                    .await?;
                match fragments.next().await {
                    Some(Ok(head)) => Ok::<_, HuginnError>((head, fragments)),
                    Some(Err(e)) => Err(e),
                    None => Err(HuginnError::EmptyResponse),
                }
            };

            let result = tokio::time::timeout(self.timeout, attempt)
                .await
                .unwrap_or(Err(HuginnError::Timeout(self.timeout)));

            match result {
                Ok((head, rest)) => {
                    Self::record_request("complete_stream", model, start, true);
                    debug!(model = %model, "candidate committed after first fragment");
                    let joined: FragmentStream =
                        Box::pin(stream::once(async move { Ok(head) }).chain(rest));
                    return Ok(StreamCompletion {
                        model: model.clone(),
                        fragments: backpressure::bounded_stream(joined, self.stream_buffer_size),
                    });
                }
                Err(e) => {
                    Self::record_request("complete_stream", model, start, false);
                    if !self.keep_going(&mut observed, idx, model, &e) {
                        return Err(e);
                    }
                    last_err = Some(e);
                }
            }
        }

        Err(Self::exhausted(len, last_err))
    }

    /// Decide whether a failure lets the chain move to the next candidate.
    ///
    /// `observed` tracks the sticky index as this request last saw it.
    fn keep_going(
        &self,
        observed: &mut usize,
        idx: usize,
        model: &str,
        err: &HuginnError,
    ) -> bool {
        match err.failure_class() {
            FailureClass::Quota => {
                let len = self.candidates.len();
                if let Some(moved) = self.state.advance_past(*observed, idx, len) {
                    *observed = moved;
                    metrics::counter!(telemetry::FALLBACK_ADVANCES_TOTAL,
                        "model" => model.to_owned(),
                    )
                    .increment(1);
                    info!(model = %model, next = %self.next_candidate(), "quota exhausted, advancing");
                } else {
                    info!(model = %model, "quota exhausted");
                }
                true
            }
            FailureClass::Retryable => {
                warn!(model = %model, error = %err, "candidate failed, trying next");
                true
            }
            FailureClass::InvalidCredential => {
                error!(model = %model, error = %err, "backend rejected credential");
                false
            }
            FailureClass::Rejected => {
                info!(model = %model, error = %err, "request rejected by backend");
                false
            }
        }
    }

    fn exhausted(attempted: usize, last_err: Option<HuginnError>) -> HuginnError {
        HuginnError::AllModelsExhausted {
            attempted,
            last: Box::new(last_err.unwrap_or(HuginnError::NoCandidates)),
        }
    }

    fn record_request(operation: &'static str, model: &str, start: Instant, ok: bool) {
        let status = if ok { "ok" } else { "error" };
        let elapsed = start.elapsed().as_secs_f64();
        metrics::counter!(telemetry::REQUESTS_TOTAL,
            "model" => model.to_owned(),
            "operation" => operation,
            "status" => status,
        )
        .increment(1);
        metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS,
            "model" => model.to_owned(),
            "operation" => operation,
        )
        .record(elapsed);
    }
}
