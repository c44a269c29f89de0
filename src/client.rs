//! # Model Client
//! One network call per attempt to a chat-completions endpoint, plus the
//! retry/backoff loop and strict validation of the model's output.
//!
//! The provider seam is a trait so the orchestrator and tests can swap in
//! scripted providers without touching the retry or validation logic.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorClass, ModelCallError};
use crate::prompt::SYSTEM_MESSAGE;

/// Transport-level failure of a single completion attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Request exceeded its deadline.
    Timeout,
    /// Provider answered HTTP 429.
    RateLimited,
    /// Anything else: transport error, non-2xx status, missing choices.
    Api(String),
}

impl ProviderError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ProviderError::Timeout => ErrorClass::Timeout,
            ProviderError::RateLimited => ErrorClass::RateLimited,
            ProviderError::Api(_) => ErrorClass::ApiFailure,
        }
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::Timeout => write!(f, "request timed out"),
            ProviderError::RateLimited => write!(f, "provider rate limit"),
            ProviderError::Api(msg) => write!(f, "api error: {msg}"),
        }
    }
}

/// Low-level provider: performs a *real* remote call (one attempt, no
/// retries). Separated so the same retry/validation wrapper serves
/// production and tests.
#[async_trait::async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ProviderError>;
    fn name(&self) -> &'static str;
}

/// OpenAI-compatible chat-completions provider. Requires an API key.
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
    request_timeout: Duration,
}

impl OpenAiProvider {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        temperature: f32,
        request_timeout: Duration,
    ) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("prospect-scorer/0.1")
            .connect_timeout(Duration::from_secs(4))
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
            temperature,
            request_timeout,
        }
    }
}

#[async_trait::async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ProviderError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.temperature,
        };

        let resp = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .timeout(self.request_timeout)
            .json(&req)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Api(e.to_string())
                }
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }
        if !status.is_success() {
            return Err(ProviderError::Api(format!("http status {status}")));
        }

        let body: Resp = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Api(e.to_string())
            }
        })?;

        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProviderError::Api("empty choices in response".to_string()))
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// One validated element of the model's output array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelScore {
    pub prospect_id: String,
    pub score: u8,
    pub justification: String,
}

/// Remove leading/trailing markdown code fences (```json ... ```).
pub fn strip_fences(text: &str) -> String {
    static RE_OPEN: OnceCell<Regex> = OnceCell::new();
    static RE_CLOSE: OnceCell<Regex> = OnceCell::new();
    let re_open = RE_OPEN.get_or_init(|| Regex::new(r"^\s*```[a-zA-Z]*\s*").unwrap());
    let re_close = RE_CLOSE.get_or_init(|| Regex::new(r"\s*```\s*$").unwrap());

    let t = text.trim();
    let t = re_open.replace(t, "");
    let t = re_close.replace(&t, "");
    t.trim().to_string()
}

/// Parse and validate the model's raw text as a strict JSON array of
/// score objects.
///
/// The whole response is rejected on the first violation: a non-array
/// top level, a non-object element, or a score that is missing,
/// non-integral, or outside 0..=100. Partial conformance of other
/// elements does not repair the rest.
pub fn parse_model_scores(raw: &str) -> Result<Vec<ModelScore>, String> {
    let text = strip_fences(raw);
    if text.is_empty() {
        return Err("empty model response".to_string());
    }

    let value: Value =
        serde_json::from_str(&text).map_err(|e| format!("invalid JSON: {e}"))?;
    let items = value
        .as_array()
        .ok_or_else(|| "model response is not a JSON array".to_string())?;

    let mut out = Vec::with_capacity(items.len());
    for (pos, item) in items.iter().enumerate() {
        let obj = item
            .as_object()
            .ok_or_else(|| format!("element {pos} is not an object"))?;

        let score = match obj.get("score") {
            Some(Value::Number(n)) => integral_score(n)
                .ok_or_else(|| format!("element {pos}: score is not an integer in 0..=100"))?,
            Some(_) => return Err(format!("element {pos}: score is not a number")),
            None => return Err(format!("element {pos}: missing score")),
        };

        // The echoed id may come back as a string or a bare number.
        let prospect_id = match obj.get("prospect_id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };

        let justification = match obj.get("justification") {
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(format!("element {pos}: justification is not a string")),
            None => String::new(),
        };

        out.push(ModelScore {
            prospect_id,
            score,
            justification,
        });
    }
    Ok(out)
}

/// Accept only integral JSON numbers in 0..=100. Out-of-range values are
/// rejected, never clamped.
fn integral_score(n: &serde_json::Number) -> Option<u8> {
    let v = n.as_i64().or_else(|| {
        let f = n.as_f64()?;
        (f.fract() == 0.0).then_some(f as i64)
    })?;
    (0..=100).contains(&v).then_some(v as u8)
}

/// Retry/backoff wrapper around a [`CompletionProvider`].
///
/// Transient failures (timeout, provider rate limit, generic API error)
/// are retried up to `max_retries` extra attempts; structural failures
/// ([`ErrorClass::InvalidResponse`]) are surfaced immediately.
#[derive(Clone)]
pub struct ModelClient {
    provider: Arc<dyn CompletionProvider>,
    max_retries: u32,
    backoff_base: Duration,
}

impl ModelClient {
    pub fn new(provider: Arc<dyn CompletionProvider>, max_retries: u32, backoff_base: Duration) -> Self {
        Self {
            provider,
            max_retries,
            backoff_base,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Issue the prompt, retrying transient failures. Returns the
    /// validated score array and the number of attempts used; every
    /// error carries the same attempt count.
    pub async fn call(&self, prompt: &str) -> Result<(Vec<ModelScore>, u32), ModelCallError> {
        let total_attempts = self.max_retries + 1;
        let mut last: Option<ProviderError> = None;

        for attempt in 0..total_attempts {
            let attempts = attempt + 1;
            match self.provider.complete(SYSTEM_MESSAGE, prompt).await {
                Ok(raw) => {
                    return match parse_model_scores(&raw) {
                        Ok(items) => Ok((items, attempts)),
                        // Malformed output is not retried: the model is
                        // unlikely to self-correct within the same call
                        // shape.
                        Err(msg) => Err(ModelCallError::new(
                            ErrorClass::InvalidResponse,
                            attempts,
                            msg,
                        )),
                    };
                }
                Err(err) => {
                    if attempts < total_attempts {
                        let delay = self.backoff_delay(err.class(), attempt);
                        tracing::warn!(
                            provider = self.provider.name(),
                            attempt = attempts,
                            class = err.class().counter_key(),
                            delay_ms = delay.as_millis() as u64,
                            "model attempt failed, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        last = Some(err);
                    } else {
                        return Err(ModelCallError::new(err.class(), attempts, err.to_string()));
                    }
                }
            }
        }

        // Loop always returns; kept for totality.
        let err = last.unwrap_or(ProviderError::Api("api_failure".to_string()));
        Err(ModelCallError::new(
            err.class(),
            total_attempts,
            err.to_string(),
        ))
    }

    /// Exponential-with-jitter for provider rate limits, linear otherwise.
    fn backoff_delay(&self, class: ErrorClass, attempt: u32) -> Duration {
        let base = self.backoff_base.as_secs_f64();
        let secs = match class {
            ErrorClass::RateLimited => base * f64::from(1u32 << attempt.min(16)) + subsec_jitter(),
            _ => base * f64::from(attempt + 1),
        };
        Duration::from_secs_f64(secs)
    }
}

/// Jitter in [0,1) seconds taken from the wall clock's sub-second part.
fn subsec_jitter() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| f64::from(d.subsec_millis()) / 1000.0)
        .unwrap_or(0.0)
}
