//! Demo that scores one prospect file against one policy file using the
//! real provider. Needs OPENAI_API_KEY (via env or `.env`).
//!
//! Usage: score-demo <policy.json> <prospects.json> [caller-key]

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use prospect_scorer::{Scorer, ScorerConfig, ScoringPolicy};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    let _ = dotenvy::dotenv();

    let mut args = std::env::args().skip(1);
    let policy_path = args.next().context("usage: score-demo <policy.json> <prospects.json> [caller-key]")?;
    let prospects_path = args.next().context("missing prospects file argument")?;
    let caller_key = args.next().unwrap_or_else(|| "demo".to_string());

    let recorder = PrometheusBuilder::new()
        .install_recorder()
        .context("install prometheus recorder")?;

    let policy: ScoringPolicy = serde_json::from_str(
        &std::fs::read_to_string(&policy_path).with_context(|| format!("read {policy_path}"))?,
    )
    .context("parse policy JSON")?;
    let prospects: Vec<serde_json::Value> = serde_json::from_str(
        &std::fs::read_to_string(&prospects_path)
            .with_context(|| format!("read {prospects_path}"))?,
    )
    .context("parse prospects JSON array")?;

    let cfg = ScorerConfig::from_env();
    anyhow::ensure!(!cfg.api_key.is_empty(), "OPENAI_API_KEY is not set");

    let scorer = Scorer::new(&cfg);
    let outcome = scorer.score_with_meta(&policy, prospects, &caller_key).await?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    println!("\n--- metrics ---\n{}", recorder.render());
    Ok(())
}
