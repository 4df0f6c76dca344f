//! Input screening.
//!
//! Cheap checks run before anything else touches a message: emptiness,
//! length, and character diversity. Keyboard mashing and repeated-character
//! floods are turned away without costing a backend call.

use std::collections::HashMap;

use tracing::debug;

use crate::telemetry;
use crate::{HuginnError, Result};

/// Thresholds for the spam filter.
#[derive(Debug, Clone)]
pub struct SpamConfig {
    /// Longest accepted message, in characters after trimming. Default: 2,000.
    pub max_message_chars: usize,
    /// Diversity checks only apply from this many non-whitespace characters. Default: 10.
    pub diversity_min_len: usize,
    /// Fewest distinct characters a long-enough message must use. Default: 4.
    pub min_distinct_chars: usize,
    /// Largest share one character may take of a message at least twice
    /// `diversity_min_len` long. Default: 0.5.
    pub max_dominant_share: f64,
}

impl Default for SpamConfig {
    fn default() -> Self {
        Self {
            max_message_chars: 2_000,
            diversity_min_len: 10,
            min_distinct_chars: 4,
            max_dominant_share: 0.5,
        }
    }
}

/// Why a message was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpamReason {
    Empty,
    TooLong,
    LowDiversity,
}

impl SpamReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SpamReason::Empty => "empty",
            SpamReason::TooLong => "too_long",
            SpamReason::LowDiversity => "low_diversity",
        }
    }

    fn message(self) -> &'static str {
        match self {
            SpamReason::Empty => "Message cannot be empty",
            SpamReason::TooLong => "Message is too long",
            SpamReason::LowDiversity => "Message looks like spam",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SpamFilter {
    config: SpamConfig,
}

impl SpamFilter {
    pub fn new(config: SpamConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SpamConfig {
        &self.config
    }

    /// Classify a message without side effects. `None` means accepted.
    pub fn classify(&self, message: &str) -> Option<SpamReason> {
        let trimmed = message.trim();
        if trimmed.is_empty() {
            return Some(SpamReason::Empty);
        }
        if trimmed.chars().count() > self.config.max_message_chars {
            return Some(SpamReason::TooLong);
        }

        let mut counts: HashMap<char, usize> = HashMap::new();
        let mut total = 0usize;
        for c in trimmed.chars().filter(|c| !c.is_whitespace()) {
            *counts.entry(c).or_default() += 1;
            total += 1;
        }

        if total >= self.config.diversity_min_len && counts.len() < self.config.min_distinct_chars {
            return Some(SpamReason::LowDiversity);
        }

        if total >= 2 * self.config.diversity_min_len {
            let dominant = counts.values().copied().max().unwrap_or(0);
            if dominant as f64 / total as f64 > self.config.max_dominant_share {
                return Some(SpamReason::LowDiversity);
            }
        }

        None
    }

    /// Reject spam with `InvalidInput`, recording the reason.
    pub fn check(&self, message: &str) -> Result<()> {
        match self.classify(message) {
            None => Ok(()),
            Some(reason) => {
                metrics::counter!(telemetry::SPAM_REJECTED_TOTAL, "reason" => reason.as_str())
                    .increment(1);
                debug!(reason = reason.as_str(), "message rejected");
                Err(HuginnError::InvalidInput(reason.message().to_string()))
            }
        }
    }
}
