// src/lib.rs
// Public library surface for integration tests (and embedding services).

pub mod client;
pub mod config;
pub mod error;
pub mod limiter;
pub mod metrics;
pub mod models;
pub mod prompt;
pub mod scorer;

// ---- Re-exports for stable public API ----
pub use crate::client::{CompletionProvider, ModelClient, ModelScore, OpenAiProvider, ProviderError};
pub use crate::config::ScorerConfig;
pub use crate::error::{ErrorClass, ModelCallError, ScoreError};
pub use crate::limiter::{ConcurrencyBudget, RateLimiter};
pub use crate::models::{ScoringMeta, ScoringOutcome, ScoringPolicy, ScoringResult};
pub use crate::scorer::Scorer;
