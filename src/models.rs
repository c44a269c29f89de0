//! # Scoring Models
//! Value objects shared across the engine: the scoring policy (ICP
//! criteria), per-prospect results, and per-call metadata.
//!
//! Prospects themselves are schema-less `serde_json::Value` objects —
//! attribute sets vary by data vendor, so only the identifier field is a
//! typed contract (see `scorer::normalize_prospects`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Scoring policy: seller context plus Ideal-Customer-Profile criteria.
///
/// `company_description` and `exclusion_criteria` describe the seller and
/// are context only; the remaining fields define the ICP the model scores
/// against. Unknown fields are preserved and serialized into the prompt
/// unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScoringPolicy {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub company_description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub exclusion_criteria: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub industries: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub employee_range: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub revenue_range: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub funding_stages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub title_keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub seniority_levels: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buying_roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<String>,
    /// Soft guidelines (e.g. "prefer technical founders").
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub other_preferences: String,
    /// Anything else the caller put in the policy document, passed through.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One scored prospect. Exactly one exists per input prospect, in input
/// order; `score` is an integer in 0..=100.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoringResult {
    pub prospect_id: String,
    pub score: u8,
    pub justification: String,
}

impl ScoringResult {
    /// Zero-score placeholder used when a sub-batch fails.
    pub fn placeholder(prospect_id: impl Into<String>, justification: &str) -> Self {
        Self {
            prospect_id: prospect_id.into(),
            score: 0,
            justification: justification.to_string(),
        }
    }
}

/// Per-call bookkeeping returned by `Scorer::score_with_meta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringMeta {
    pub request_id: String,
    /// Number of prospects in the call.
    pub count: usize,
    /// Prospects scored by the model (no placeholder).
    pub ok: usize,
    pub ok_share: f64,
    /// Placeholder counts keyed by error class (`api_timeout`, ...).
    pub error_counts: BTreeMap<String, u64>,
    /// Sum of extra model attempts beyond the first, across all chunks.
    pub retries_total: u64,
    pub latency_s: f64,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

/// Results plus metadata; `Scorer::score` discards the meta half.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringOutcome {
    pub meta: ScoringMeta,
    pub results: Vec<ScoringResult>,
}
