//! Token measurement and token-bounded truncation.
//!
//! Sizes are measured in model tokens through a replaceable
//! `TokenMeasurer`; the `Truncator` uses one to keep responses under a
//! token budget.

mod measurer;
mod truncator;

pub use measurer::{ReleaseOnDrop, TiktokenMeasurer, TokenId, TokenMeasurer, DEFAULT_MODEL};
pub use truncator::{Truncator, DEFAULT_MAX_TOKENS, TRUNCATION_MARKER};
