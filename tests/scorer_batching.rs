// tests/scorer_batching.rs
//
// Ordering, length and failure-isolation invariants of Scorer::score
// against scripted providers. No network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use prospect_scorer::{
    CompletionProvider, ProviderError, Scorer, ScorerConfig, ScoringPolicy,
};
use serde_json::{json, Value};

/// Pull the prospect sub-batch back out of a built prompt. The prompt
/// ends with the pretty-printed prospects array after a fixed marker.
fn prospects_in_prompt(prompt: &str) -> Vec<Value> {
    let marker = "Prospects (JSON array)\n";
    let at = prompt.find(marker).expect("prompt carries prospects marker");
    serde_json::from_str(&prompt[at + marker.len()..]).expect("prospects block is valid JSON")
}

/// Echoes every prospect back with a deterministic non-zero score, except
/// for sub-batches containing `poison_id`, which fail with `error`.
struct EchoProvider {
    calls: AtomicUsize,
    poison_id: Option<String>,
    error: ProviderError,
}

impl EchoProvider {
    fn ok() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            poison_id: None,
            error: ProviderError::Api(String::new()),
        }
    }

    fn poisoned(id: &str, error: ProviderError) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            poison_id: Some(id.to_string()),
            error,
        }
    }
}

#[async_trait]
impl CompletionProvider for EchoProvider {
    async fn complete(&self, _system: &str, prompt: &str) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prospects = prospects_in_prompt(prompt);
        if let Some(poison) = &self.poison_id {
            let hit = prospects
                .iter()
                .any(|p| p["prospect_id"] == json!(poison.as_str()));
            if hit {
                return Err(self.error.clone());
            }
        }
        let out: Vec<Value> = prospects
            .iter()
            .map(|p| {
                json!({
                    "prospect_id": p["prospect_id"],
                    "score": 75,
                    "justification": "Solid ICP match (B)."
                })
            })
            .collect();
        Ok(serde_json::to_string(&out).unwrap())
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}

/// Always succeeds, but with one element too few.
struct ShortArrayProvider;

#[async_trait]
impl CompletionProvider for ShortArrayProvider {
    async fn complete(&self, _system: &str, prompt: &str) -> Result<String, ProviderError> {
        let mut prospects = prospects_in_prompt(prompt);
        prospects.pop();
        let out: Vec<Value> = prospects
            .iter()
            .map(|p| json!({"prospect_id": p["prospect_id"], "score": 60, "justification": "x"}))
            .collect();
        Ok(serde_json::to_string(&out).unwrap())
    }

    fn name(&self) -> &'static str {
        "short-array"
    }
}

fn fast_cfg(chunk_size: usize) -> ScorerConfig {
    ScorerConfig {
        chunk_size,
        retry_backoff_s: 0.0,
        ..Default::default()
    }
}

fn prospects(n: usize) -> Vec<Value> {
    (1..=n)
        .map(|i| json!({"prospect_id": format!("p-{i}"), "position_title": "CTO"}))
        .collect()
}

#[tokio::test]
async fn output_matches_input_length_and_order() {
    for chunk_size in [1, 3, 20, 100] {
        let scorer = Scorer::with_provider(&fast_cfg(chunk_size), Arc::new(EchoProvider::ok()));
        let results = scorer
            .score(&ScoringPolicy::default(), prospects(45), "tenantA")
            .await
            .unwrap();
        assert_eq!(results.len(), 45, "chunk_size={chunk_size}");
        for (i, r) in results.iter().enumerate() {
            assert_eq!(r.prospect_id, format!("p-{}", i + 1), "chunk_size={chunk_size}");
            assert_eq!(r.score, 75);
        }
    }
}

#[tokio::test]
async fn single_prospect_without_id_gets_auto_1() {
    let scorer = Scorer::with_provider(&fast_cfg(20), Arc::new(EchoProvider::ok()));
    let results = scorer
        .score(
            &ScoringPolicy::default(),
            vec![json!({"position_title": "VP Sales"})],
            "tenantA",
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].prospect_id, "auto-1");
}

#[tokio::test]
async fn empty_input_yields_empty_output() {
    let scorer = Scorer::with_provider(&fast_cfg(20), Arc::new(EchoProvider::ok()));
    let results = scorer
        .score(&ScoringPolicy::default(), vec![], "tenantA")
        .await
        .unwrap();
    assert!(results.is_empty());
}

/// 45 prospects, chunk size 20, second sub-batch times out
/// after retries. 45 entries come back; 21-40 are timeout placeholders,
/// the rest carry real scores.
#[tokio::test]
async fn timed_out_sub_batch_degrades_only_its_prospects() {
    let cfg = fast_cfg(20);
    let provider = Arc::new(EchoProvider::poisoned("p-21", ProviderError::Timeout));
    let scorer = Scorer::with_provider(&cfg, provider.clone());

    let outcome = scorer
        .score_with_meta(&ScoringPolicy::default(), prospects(45), "tenantA")
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 45);
    for (i, r) in outcome.results.iter().enumerate() {
        let pos = i + 1;
        if (21..=40).contains(&pos) {
            assert_eq!(r.score, 0, "p-{pos} must be a placeholder");
            assert_eq!(r.justification, "Model request timed out");
        } else {
            assert_eq!(r.score, 75, "p-{pos} must carry a real score");
        }
    }
    assert_eq!(outcome.meta.ok, 25);
    assert_eq!(outcome.meta.error_counts["api_timeout"], 20);
    // 2 retries (default) were burned on the poisoned chunk.
    assert_eq!(outcome.meta.retries_total, 2);
    // 3 chunks, the poisoned one called 3 times.
    assert_eq!(provider.calls.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn api_failure_placeholders_name_their_class() {
    let provider = Arc::new(EchoProvider::poisoned(
        "p-1",
        ProviderError::Api("boom".into()),
    ));
    let scorer = Scorer::with_provider(&fast_cfg(2), provider);
    let outcome = scorer
        .score_with_meta(&ScoringPolicy::default(), prospects(4), "tenantA")
        .await
        .unwrap();

    assert_eq!(outcome.results[0].justification, "Model API failure");
    assert_eq!(outcome.results[1].justification, "Model API failure");
    assert_eq!(outcome.results[2].score, 75);
    assert_eq!(outcome.results[3].score, 75);
    assert_eq!(outcome.meta.error_counts["api_failure"], 2);
}

#[tokio::test]
async fn length_mismatch_fails_the_whole_sub_batch() {
    let scorer = Scorer::with_provider(&fast_cfg(3), Arc::new(ShortArrayProvider));
    let outcome = scorer
        .score_with_meta(&ScoringPolicy::default(), prospects(3), "tenantA")
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 3);
    for r in &outcome.results {
        assert_eq!(r.score, 0);
        assert_eq!(r.justification, "Malformed batch response length");
    }
    assert_eq!(outcome.meta.ok, 0);
    assert_eq!(outcome.meta.error_counts["invalid_json"], 3);
}

/// A sub-batch task that dies mid-flight reports nothing back; the merge
/// must backfill its indices with "Not processed" placeholders instead of
/// shortening the output.
#[tokio::test]
async fn crashed_sub_batch_is_backfilled_as_not_processed() {
    struct CrashingProvider {
        poison_id: String,
    }

    #[async_trait]
    impl CompletionProvider for CrashingProvider {
        async fn complete(&self, _system: &str, prompt: &str) -> Result<String, ProviderError> {
            let prospects = prospects_in_prompt(prompt);
            if prospects
                .iter()
                .any(|p| p["prospect_id"] == json!(self.poison_id.as_str()))
            {
                panic!("simulated task crash");
            }
            let out: Vec<Value> = prospects
                .iter()
                .map(|p| json!({"prospect_id": p["prospect_id"], "score": 75, "justification": "ok (B)"}))
                .collect();
            Ok(serde_json::to_string(&out).unwrap())
        }

        fn name(&self) -> &'static str {
            "crashing"
        }
    }

    // 5 prospects, chunk size 2 -> chunks (p-1,p-2), (p-3,p-4), (p-5);
    // the middle chunk's task panics.
    let scorer = Scorer::with_provider(
        &fast_cfg(2),
        Arc::new(CrashingProvider {
            poison_id: "p-3".to_string(),
        }),
    );
    let outcome = scorer
        .score_with_meta(&ScoringPolicy::default(), prospects(5), "tenantA")
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 5);
    for (i, r) in outcome.results.iter().enumerate() {
        let pos = i + 1;
        assert_eq!(r.prospect_id, format!("p-{pos}"), "order survives a crashed chunk");
        if (3..=4).contains(&pos) {
            assert_eq!(r.score, 0, "p-{pos} must be backfilled");
            assert_eq!(r.justification, "Not processed");
        } else {
            assert_eq!(r.score, 75, "p-{pos} must carry a real score");
        }
    }
    assert_eq!(outcome.meta.ok, 3);
    assert_eq!(outcome.meta.error_counts["api_failure"], 2);
}

/// An out-of-range score anywhere in the response rejects the sub-batch
/// as invalid, never clamps.
#[tokio::test]
async fn out_of_range_score_rejects_sub_batch() {
    struct OutOfRange;
    #[async_trait]
    impl CompletionProvider for OutOfRange {
        async fn complete(&self, _s: &str, prompt: &str) -> Result<String, ProviderError> {
            let prospects = prospects_in_prompt(prompt);
            let out: Vec<Value> = prospects
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    let score = if i == 0 { 150 } else { 80 };
                    json!({"prospect_id": p["prospect_id"], "score": score, "justification": "x"})
                })
                .collect();
            Ok(serde_json::to_string(&out).unwrap())
        }
        fn name(&self) -> &'static str {
            "out-of-range"
        }
    }

    let scorer = Scorer::with_provider(&fast_cfg(5), Arc::new(OutOfRange));
    let outcome = scorer
        .score_with_meta(&ScoringPolicy::default(), prospects(2), "tenantA")
        .await
        .unwrap();
    for r in &outcome.results {
        assert_eq!(r.score, 0);
        assert_eq!(r.justification, "Invalid JSON from model (batch)");
    }
    assert_eq!(outcome.meta.error_counts["invalid_json"], 2);
}
