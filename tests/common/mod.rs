//! Shared test backend.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use futures_util::stream;

use huginn::{FragmentStream, GenerationBackend, GenerationOptions, HuginnError, Prompt, Result};

/// What a model does when called.
#[derive(Clone, Debug)]
pub enum Behavior {
    /// Answer with this text (streamed word by word).
    Reply(String),
    Quota,
    BadKey,
    Blocked,
    /// Retryable upstream failure.
    Unavailable,
    /// Stream these fragments, then fail.
    FailAfter(Vec<String>),
}

impl Behavior {
    pub fn reply(text: &str) -> Self {
        Behavior::Reply(text.to_string())
    }

    fn error(&self, model: &str) -> HuginnError {
        match self {
            Behavior::Quota => HuginnError::QuotaExceeded {
                model: model.to_string(),
                retry_after: None,
            },
            Behavior::BadKey => HuginnError::AuthenticationFailed,
            Behavior::Blocked => HuginnError::ContentBlocked {
                reason: "SAFETY".to_string(),
            },
            _ => HuginnError::Api {
                status: 503,
                message: "The model is overloaded".to_string(),
            },
        }
    }
}

/// Backend whose models follow a fixed script. Records every call.
pub struct MockBackend {
    script: Mutex<HashMap<String, Behavior>>,
    calls: Mutex<Vec<String>>,
    prompts: Mutex<Vec<Prompt>>,
    count: AtomicU32,
}

impl MockBackend {
    pub fn new(script: &[(&str, Behavior)]) -> Self {
        Self {
            script: Mutex::new(
                script
                    .iter()
                    .map(|(m, b)| (m.to_string(), b.clone()))
                    .collect(),
            ),
            calls: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
            count: AtomicU32::new(0),
        }
    }

    /// Every model answers with `text`.
    pub fn always(text: &str) -> Self {
        let backend = Self::new(&[]);
        backend.set_default(Behavior::reply(text));
        backend
    }

    fn set_default(&self, behavior: Behavior) {
        self.script
            .lock()
            .unwrap()
            .insert("*".to_string(), behavior);
    }

    /// Change what `model` does from now on.
    pub fn set(&self, model: &str, behavior: Behavior) {
        self.script
            .lock()
            .unwrap()
            .insert(model.to_string(), behavior);
    }

    pub fn call_count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_prompt(&self) -> Option<Prompt> {
        self.prompts.lock().unwrap().last().cloned()
    }

    fn record(&self, model: &str, prompt: &Prompt) -> Behavior {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(model.to_string());
        self.prompts.lock().unwrap().push(prompt.clone());
        let script = self.script.lock().unwrap();
        script
            .get(model)
            .or_else(|| script.get("*"))
            .cloned()
            .unwrap_or(Behavior::Unavailable)
    }
}

#[async_trait]
impl GenerationBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(
        &self,
        model: &str,
        prompt: &Prompt,
        _options: &GenerationOptions,
    ) -> Result<String> {
        match self.record(model, prompt) {
            Behavior::Reply(text) => Ok(text),
            other => Err(other.error(model)),
        }
    }

    async fn generate_stream(
        &self,
        model: &str,
        prompt: &Prompt,
        _options: &GenerationOptions,
    ) -> Result<FragmentStream> {
        match self.record(model, prompt) {
            Behavior::Reply(text) => {
                let parts: Vec<Result<String>> = text
                    .split_inclusive(' ')
                    .map(|s| Ok(s.to_string()))
                    .collect();
                Ok(Box::pin(stream::iter(parts)))
            }
            Behavior::FailAfter(parts) => {
                let mut items: Vec<Result<String>> = parts.into_iter().map(Ok).collect();
                items.push(Err(HuginnError::Stream("connection reset by peer".into())));
                Ok(Box::pin(stream::iter(items)))
            }
            other => Err(other.error(model)),
        }
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(self
            .script
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.as_str() != "*")
            .cloned()
            .collect())
    }
}
