//! Token-bounded truncation.

use std::sync::Arc;

use tracing::{debug, trace};

use super::measurer::{TokenId, TokenMeasurer};
use crate::config::TruncationConfig;
use crate::error::Result;

/// Default token budget for text handed back to callers.
pub const DEFAULT_MAX_TOKENS: usize = 20_000;

/// Suffix appended to truncated text.
pub const TRUNCATION_MARKER: &str = "\n\n[Response truncated due to length]";

/// Caps text at a token budget, keeping its beginning and appending a marker.
pub struct Truncator {
    measurer: Arc<dyn TokenMeasurer>,
    default_limit: usize,
    marker: String,
}

impl Truncator {
    /// Create a truncator with an explicit default limit and marker.
    pub fn new(
        measurer: Arc<dyn TokenMeasurer>,
        default_limit: usize,
        marker: impl Into<String>,
    ) -> Self {
        Self {
            measurer,
            default_limit,
            marker: marker.into(),
        }
    }

    /// Create a truncator using `DEFAULT_MAX_TOKENS` and `TRUNCATION_MARKER`.
    pub fn with_defaults(measurer: Arc<dyn TokenMeasurer>) -> Self {
        Self::new(measurer, DEFAULT_MAX_TOKENS, TRUNCATION_MARKER)
    }

    pub fn from_config(measurer: Arc<dyn TokenMeasurer>, config: &TruncationConfig) -> Self {
        Self::new(measurer, config.max_tokens, config.marker.clone())
    }

    pub fn limit(&self) -> usize {
        self.default_limit
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Number of tokens in `text`.
    pub fn count(&self, text: &str) -> Result<usize> {
        Ok(self.measurer.encode(text)?.len())
    }

    /// Truncate `text` to the default limit.
    pub fn truncate(&self, text: &str) -> Result<String> {
        self.truncate_to(text, self.default_limit)
    }

    /// Truncate `text` to at most `limit` tokens.
    ///
    /// Text that already fits is returned unchanged. Otherwise the result
    /// is a decoded prefix of the text's tokens followed by the marker. If
    /// the marker alone needs `limit` tokens or more, the marker alone is
    /// returned.
    pub fn truncate_to(&self, text: &str, limit: usize) -> Result<String> {
        let tokens = self.measurer.encode(text)?;
        if tokens.len() <= limit {
            return Ok(text.to_string());
        }

        let marker_tokens = self.measurer.encode(&self.marker)?.len();
        if marker_tokens >= limit {
            debug!(
                limit = limit,
                marker_tokens = marker_tokens,
                "Token limit leaves no room for content; returning marker only"
            );
            return Ok(self.marker.clone());
        }

        let mut available = limit - marker_tokens;
        loop {
            let truncated = self.join_prefix(&tokens[..available])?;
            let total = self.count(&truncated)?;

            // Tokens can merge across the join; shrink until it fits.
            if total <= limit || available == 0 {
                debug!(
                    measurer = self.measurer.name(),
                    original_tokens = tokens.len(),
                    kept_tokens = available,
                    limit = limit,
                    "Truncated text to token limit"
                );
                return Ok(truncated);
            }

            trace!(total = total, limit = limit, "Truncated text over limit after join");
            available = available.saturating_sub(total - limit);
        }
    }

    fn join_prefix(&self, prefix: &[TokenId]) -> Result<String> {
        let mut text = self.measurer.decode(prefix)?;
        text.push_str(&self.marker);
        Ok(text)
    }
}

impl std::fmt::Debug for Truncator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Truncator")
            .field("measurer", &self.measurer.name())
            .field("default_limit", &self.default_limit)
            .field("marker", &self.marker)
            .finish()
    }
}
