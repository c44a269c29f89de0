//! # Batch Scorer
//! The orchestrator: validates and normalizes the prospect list, enforces
//! admission control, fans sub-batches out to the model client, and folds
//! the results back into input order.
//!
//! Failure policy: admission and validation problems abort the whole
//! call; everything after that degrades per sub-batch into zero-score
//! placeholders, so the caller always receives exactly one result per
//! input prospect.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use metrics::counter;
use serde_json::Value;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::client::{CompletionProvider, ModelClient, ModelScore, OpenAiProvider};
use crate::config::ScorerConfig;
use crate::error::{ErrorClass, ModelCallError, ScoreError};
use crate::limiter::{ConcurrencyBudget, RateLimiter};
use crate::metrics::{ensure_metrics_described, record_call_latency, record_chunk_error};
use crate::models::{ScoringMeta, ScoringOutcome, ScoringPolicy, ScoringResult};
use crate::prompt::build_batch_prompt;

/// Backfill justification for indices no sub-batch ever populated.
const NOT_PROCESSED: &str = "Not processed";
/// Justification when a sub-batch succeeds with the wrong array length.
const MALFORMED_LENGTH: &str = "Malformed batch response length";

/// One prospect after validation: original position, resolved id, and the
/// payload (with `prospect_id` written back) that goes into the prompt.
#[derive(Debug, Clone)]
struct NormalizedProspect {
    /// 0-based original index, used to scatter results back.
    index: usize,
    prospect_id: String,
    payload: Value,
}

/// Batch prospect scorer. Cheap to clone; the rate limiter and the
/// concurrency budget are shared, so clones (and other scorers built
/// over the same pair) draw from one quota.
#[derive(Clone)]
pub struct Scorer {
    client: ModelClient,
    chunk_size: usize,
    limiter: Arc<RateLimiter>,
    budget: ConcurrencyBudget,
}

impl Scorer {
    /// Build a scorer talking to the real chat-completions endpoint.
    pub fn new(cfg: &ScorerConfig) -> Self {
        let provider = Arc::new(OpenAiProvider::new(
            cfg.api_key.clone(),
            cfg.model.clone(),
            cfg.temperature,
            cfg.request_timeout(),
        ));
        Self::with_provider(cfg, provider)
    }

    /// Build a scorer over an injected provider (tests, alternative
    /// endpoints). Limiter and budget are fresh; see
    /// [`Scorer::with_shared_limits`] to share them across scorers.
    pub fn with_provider(cfg: &ScorerConfig, provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            client: ModelClient::new(provider, cfg.max_retries, cfg.retry_backoff()),
            chunk_size: cfg.chunk_size.max(1),
            limiter: Arc::new(RateLimiter::new(cfg.rate_limit_per_minute)),
            budget: ConcurrencyBudget::new(cfg.max_concurrent_requests),
        }
    }

    /// Replace the admission-control pair with shared instances.
    pub fn with_shared_limits(mut self, limiter: Arc<RateLimiter>, budget: ConcurrencyBudget) -> Self {
        self.limiter = limiter;
        self.budget = budget;
        self
    }

    /// Score `prospects` against `policy`. Results-only variant of
    /// [`Scorer::score_with_meta`].
    pub async fn score(
        &self,
        policy: &ScoringPolicy,
        prospects: Vec<Value>,
        caller_key: &str,
    ) -> Result<Vec<ScoringResult>, ScoreError> {
        self.score_with_meta(policy, prospects, caller_key)
            .await
            .map(|outcome| outcome.results)
    }

    /// Score `prospects` against `policy`, returning per-call metadata
    /// alongside the ordered results.
    ///
    /// The output always has exactly one entry per input prospect, in
    /// input order. Only admission failures and caller contract
    /// violations raise; model trouble degrades into placeholders.
    pub async fn score_with_meta(
        &self,
        policy: &ScoringPolicy,
        prospects: Vec<Value>,
        caller_key: &str,
    ) -> Result<ScoringOutcome, ScoreError> {
        ensure_metrics_described();
        let started = Instant::now();
        let request_id = Uuid::new_v4().to_string();

        // Admission control: sliding window first, then budget saturation.
        // Both reject the whole call before any prompt is built.
        if !self.limiter.try_acquire(caller_key) {
            counter!("scoring_rejected_total").increment(1);
            tracing::warn!(request_id, caller_key, "scoring call rejected: rate limit");
            return Err(ScoreError::RateLimited);
        }
        if !self.budget.has_capacity() {
            counter!("scoring_rejected_total").increment(1);
            tracing::warn!(request_id, caller_key, "scoring call rejected: overloaded");
            return Err(ScoreError::Overloaded);
        }
        counter!("scoring_requests_total").increment(1);

        let total = prospects.len();
        let normalized = normalize_prospects(prospects)?;

        let mut results_by_index: HashMap<usize, ScoringResult> = HashMap::with_capacity(total);
        let mut error_counts: BTreeMap<String, u64> = BTreeMap::new();
        let mut retries_total: u64 = 0;
        let mut ok: usize = 0;

        // Fan out: one task per sub-batch. Each task holds a budget
        // permit for the duration of its model call, so in-flight calls
        // across all concurrent callers never exceed the budget.
        let mut join_set: JoinSet<(Vec<NormalizedProspect>, Result<(Vec<ModelScore>, u32), ModelCallError>)> =
            JoinSet::new();

        for chunk in normalized.chunks(self.chunk_size) {
            let chunk = chunk.to_vec();
            let payloads: Vec<Value> = chunk.iter().map(|p| p.payload.clone()).collect();
            let prompt = build_batch_prompt(policy, &payloads);
            let client = self.client.clone();
            let budget = self.budget.clone();

            join_set.spawn(async move {
                let _permit = budget.acquire().await;
                counter!("scoring_chunks_total").increment(1);
                let outcome = client.call(&prompt).await;
                (chunk, outcome)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            let (chunk, outcome) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    // A panicked task loses its chunk identity; the
                    // completeness backfill below covers its indices.
                    tracing::error!(request_id, error = %e, "scoring task panicked");
                    continue;
                }
            };

            match outcome {
                Ok((scores, attempts)) => {
                    retries_total += u64::from(attempts.saturating_sub(1));
                    if scores.len() != chunk.len() {
                        tracing::warn!(
                            request_id,
                            expected = chunk.len(),
                            got = scores.len(),
                            "malformed batch response length"
                        );
                        record_chunk_error(ErrorClass::InvalidResponse);
                        for p in &chunk {
                            results_by_index.insert(
                                p.index,
                                ScoringResult::placeholder(&p.prospect_id, MALFORMED_LENGTH),
                            );
                            *error_counts
                                .entry(ErrorClass::InvalidResponse.counter_key().to_string())
                                .or_default() += 1;
                        }
                        continue;
                    }

                    for (p, m) in chunk.iter().zip(scores) {
                        if !m.prospect_id.is_empty() && m.prospect_id != p.prospect_id {
                            tracing::debug!(
                                request_id,
                                expected = %p.prospect_id,
                                echoed = %m.prospect_id,
                                "model echoed a different prospect_id"
                            );
                        }
                        results_by_index.insert(
                            p.index,
                            ScoringResult {
                                prospect_id: p.prospect_id.clone(),
                                score: m.score,
                                justification: m.justification,
                            },
                        );
                        ok += 1;
                    }
                }
                Err(err) => {
                    retries_total += u64::from(err.attempts.saturating_sub(1));
                    tracing::warn!(
                        request_id,
                        class = err.kind.counter_key(),
                        attempts = err.attempts,
                        error = %err,
                        "sub-batch failed, downgrading to placeholders"
                    );
                    record_chunk_error(err.kind);
                    let justification = err.kind.placeholder_justification();
                    for p in &chunk {
                        results_by_index.insert(
                            p.index,
                            ScoringResult::placeholder(&p.prospect_id, justification),
                        );
                        *error_counts
                            .entry(err.kind.counter_key().to_string())
                            .or_default() += 1;
                    }
                }
            }
        }

        counter!("scoring_retries_total").increment(retries_total);

        // Completeness guarantee: every input index yields a result even
        // if no sub-batch ever reported it.
        let mut results = Vec::with_capacity(total);
        for p in &normalized {
            match results_by_index.remove(&p.index) {
                Some(r) => results.push(r),
                None => {
                    results.push(ScoringResult::placeholder(&p.prospect_id, NOT_PROCESSED));
                    *error_counts
                        .entry(ErrorClass::ApiFailure.counter_key().to_string())
                        .or_default() += 1;
                }
            }
        }

        let latency_s = started.elapsed().as_secs_f64();
        record_call_latency(latency_s * 1000.0);

        let meta = ScoringMeta {
            request_id: request_id.clone(),
            count: total,
            ok,
            ok_share: ok as f64 / total.max(1) as f64,
            error_counts,
            retries_total,
            latency_s,
            finished_at: chrono::Utc::now(),
        };
        tracing::info!(
            request_id,
            caller_key,
            count = meta.count,
            ok = meta.ok,
            retries = meta.retries_total,
            latency_s = meta.latency_s,
            "scoring call finished"
        );

        Ok(ScoringOutcome { meta, results })
    }
}

/// Validate the prospect list and resolve identifiers.
///
/// Non-object entries abort the whole call (caller contract violation).
/// Missing or empty ids get the synthetic `auto-<1-based>` form, assigned
/// here — before any network call — so retries see stable ids. The `id`
/// field is accepted as a fallback spelling of `prospect_id`.
fn normalize_prospects(prospects: Vec<Value>) -> Result<Vec<NormalizedProspect>, ScoreError> {
    let mut out = Vec::with_capacity(prospects.len());
    for (i, mut item) in prospects.into_iter().enumerate() {
        let position = i + 1;
        let obj = item
            .as_object_mut()
            .ok_or(ScoreError::Validation { index: position })?;

        let pid = id_field(obj.get("prospect_id"))
            .or_else(|| id_field(obj.get("id")))
            .unwrap_or_else(|| format!("auto-{position}"));
        obj.insert("prospect_id".to_string(), Value::String(pid.clone()));

        out.push(NormalizedProspect {
            index: i,
            prospect_id: pid,
            payload: item,
        });
    }
    Ok(out)
}

/// Non-empty string or number identifiers count; everything else falls
/// through to the synthetic id.
fn id_field(v: Option<&Value>) -> Option<String> {
    match v {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn synthetic_ids_are_one_based() {
        let out = normalize_prospects(vec![json!({}), json!({"x": 1})]).unwrap();
        assert_eq!(out[0].prospect_id, "auto-1");
        assert_eq!(out[1].prospect_id, "auto-2");
        assert_eq!(out[0].payload["prospect_id"], json!("auto-1"));
    }

    #[test]
    fn explicit_and_fallback_ids_win_over_synthetic() {
        let out = normalize_prospects(vec![
            json!({"prospect_id": "p-7"}),
            json!({"id": 99}),
            json!({"prospect_id": "  "}),
        ])
        .unwrap();
        assert_eq!(out[0].prospect_id, "p-7");
        assert_eq!(out[1].prospect_id, "99");
        assert_eq!(out[2].prospect_id, "auto-3", "blank id falls back to synthetic");
    }

    #[test]
    fn non_object_entry_aborts_with_its_position() {
        let err = normalize_prospects(vec![json!({}), json!("nope")]).unwrap_err();
        assert_eq!(err, ScoreError::Validation { index: 2 });
    }
}
