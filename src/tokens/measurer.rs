//! Pluggable token measurement.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tiktoken_rs::CoreBPE;
use tracing::debug;

use crate::error::{NoteguardError, Result};

/// Opaque token identifier.
pub type TokenId = usize;

/// Model whose tokenizer is used when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-4";

/// Longest run of trailing tokens dropped when a prefix ends mid-character.
const MAX_DECODE_BACKOFF: usize = 16;

/// Converts text to tokens and back.
///
/// `decode` must accept any prefix of an `encode` result and return the
/// text of that prefix, or of a slightly shorter prefix when the cut falls
/// inside a character.
pub trait TokenMeasurer: Send + Sync {
    /// Tokenize `text`.
    fn encode(&self, text: &str) -> Result<Vec<TokenId>>;

    /// Reconstruct text from a token sequence.
    ///
    /// Ids the strategy does not know are an error, not a panic.
    fn decode(&self, tokens: &[TokenId]) -> Result<String>;

    /// Short name of the strategy, for logs.
    fn name(&self) -> &str;
}

/// BPE measurement through `tiktoken-rs`.
///
/// The vocabulary is loaded on first use and can be dropped again with
/// `release`; a later call reloads it.
pub struct TiktokenMeasurer {
    model: String,
    bpe: Mutex<Option<Arc<CoreBPE>>>,
}

impl TiktokenMeasurer {
    /// Create a measurer for the given OpenAI model name.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            bpe: Mutex::new(None),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Whether the vocabulary is currently loaded.
    pub fn is_loaded(&self) -> bool {
        self.bpe.lock().is_some()
    }

    /// Drop the loaded vocabulary.
    pub fn release(&self) {
        if self.bpe.lock().take().is_some() {
            debug!(model = %self.model, "Released tokenizer");
        }
    }

    /// Guard that calls `release` when it goes out of scope, including on
    /// early returns and unwinding.
    pub fn release_on_drop(self: &Arc<Self>) -> ReleaseOnDrop {
        ReleaseOnDrop(self.clone())
    }

    fn bpe(&self) -> Result<Arc<CoreBPE>> {
        let mut slot = self.bpe.lock();
        if let Some(bpe) = slot.as_ref() {
            return Ok(bpe.clone());
        }

        let bpe = tiktoken_rs::get_bpe_from_model(&self.model).map_err(|e| {
            NoteguardError::MeasurementUnavailable(format!(
                "failed to load tokenizer for model '{}': {}",
                self.model, e
            ))
        })?;
        debug!(model = %self.model, "Loaded tokenizer");

        let bpe = Arc::new(bpe);
        *slot = Some(bpe.clone());
        Ok(bpe)
    }
}

impl Default for TiktokenMeasurer {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL)
    }
}

impl std::fmt::Debug for TiktokenMeasurer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiktokenMeasurer")
            .field("model", &self.model)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl TokenMeasurer for TiktokenMeasurer {
    fn encode(&self, text: &str) -> Result<Vec<TokenId>> {
        // Special-token text in notes is content, not control tokens.
        Ok(self.bpe()?.encode_ordinary(text))
    }

    fn decode(&self, tokens: &[TokenId]) -> Result<String> {
        let bpe = self.bpe()?;

        // A BPE token can end partway through a UTF-8 sequence. Back off to
        // the longest prefix that forms valid text.
        let mut end = tokens.len();
        loop {
            // tiktoken-rs panics on ids outside the vocabulary.
            let decoded = catch_unwind(AssertUnwindSafe(|| bpe.decode(tokens[..end].to_vec())))
                .map_err(|_| {
                    NoteguardError::MeasurementUnavailable(format!(
                        "token ids outside the '{}' vocabulary",
                        self.model
                    ))
                })?;

            match decoded {
                Ok(text) => return Ok(text),
                Err(_) if end > 0 && tokens.len() - end < MAX_DECODE_BACKOFF => end -= 1,
                Err(e) => {
                    return Err(NoteguardError::MeasurementUnavailable(format!(
                        "failed to decode {} tokens: {}",
                        tokens.len(),
                        e
                    )))
                }
            }
        }
    }

    fn name(&self) -> &str {
        "tiktoken"
    }
}

/// Releases a `TiktokenMeasurer` when dropped.
#[must_use = "the measurer is released as soon as the guard is dropped"]
pub struct ReleaseOnDrop(Arc<TiktokenMeasurer>);

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.0.release();
    }
}
