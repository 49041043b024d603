//! Single-shot remote language-model call that applies a template prompt to
//! a transcript.
//!
//! Grounded on `api/api.rs`'s generic JSON-over-HTTP request helper
//! (classify-then-propagate shape) and `whisper_engine.rs`'s `reqwest::Client`
//! usage for building requests against a configurable API base.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PipelineError;
use crate::retry::{retry_with_backoff, RetryConfig};

use super::templates::{display_name, template_native_language, TemplateRegistry};

/// Per-call restructure configuration separate from [`RetryConfig`] — the
/// token budget is advisory (the remote service enforces the true limit)
/// and configurable.
#[derive(Debug, Clone)]
pub struct RestructureConfig {
    pub max_estimated_tokens: usize,
}

impl Default for RestructureConfig {
    fn default() -> Self {
        Self { max_estimated_tokens: 100_000 }
    }
}

/// `len / 3` heuristic. Advisory only; the remote service enforces the
/// true budget.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 3
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

pub struct HttpLanguageModel {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl HttpLanguageModel {
    pub fn new(client: Client, api_base: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self { client, api_base: api_base.into(), api_key: api_key.into(), model: model.into() }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f64,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize, Default)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[async_trait]
impl LanguageModel for HttpLanguageModel {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            // Fixed at 0 for deterministic restructuring.
            temperature: 0.0,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
        };

        debug!(model = %self.model, "submitting restructure request");

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    anyhow::Error::new(PipelineError::Timeout)
                } else {
                    anyhow::Error::new(err).context("language model request failed")
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_response(status, &text));
        }

        let text = response.text().await.context("reading language model response body")?;
        if let Some(err) = classify_body_message(&text) {
            return Err(err);
        }

        let parsed: ChatResponse =
            serde_json::from_str(&text).context("parsing language model response")?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow::anyhow!("no response"))
    }
}

/// HTTP status classification, shared with the speech-to-text classifier's
/// rules: HTTP 429 / 401 / 408 / 504 and deadline-exceeded map the same way
/// on both remote calls.
fn classify_response(status: StatusCode, body: &str) -> anyhow::Error {
    if let Some(err) = classify_body_message(body) {
        return err;
    }
    match status {
        StatusCode::TOO_MANY_REQUESTS => PipelineError::RateLimit.into(),
        StatusCode::UNAUTHORIZED => PipelineError::AuthFailed.into(),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => PipelineError::Timeout.into(),
        s if s.is_server_error() => crate::error::TransientHttp(s).into(),
        other => anyhow::anyhow!("language model service returned {}: {}", other, body),
    }
}

/// Substring match for the two `transcript-too-long` error shapes a remote
/// language-model API is documented to return, independent of HTTP status.
fn classify_body_message(body: &str) -> Option<anyhow::Error> {
    if body.contains("context_length_exceeded") || body.contains("maximum context length") {
        return Some(PipelineError::TranscriptTooLong(estimate_tokens(body)).into());
    }
    None
}

pub fn is_transient(err: &anyhow::Error) -> bool {
    crate::error::is_transient_http(err)
}

/// Builds the system prompt for `template_name`: the base prompt body,
/// prefixed with `"Respond in <language>.\n\n"` when `output_language` is
/// set and differs from the template's native language.
pub fn build_system_prompt(
    registry: &dyn TemplateRegistry,
    template_name: &str,
    output_language: &str,
) -> Result<String, PipelineError> {
    let base = registry.resolve(template_name)?;
    Ok(with_language_prefix(&base, template_name, output_language))
}

fn with_language_prefix(base_prompt: &str, template_name: &str, output_language: &str) -> String {
    if output_language.is_empty() {
        return base_prompt.to_string();
    }
    let lower = output_language.to_lowercase();
    let base_code = lower.split('-').next().unwrap_or(&lower);
    if base_code == template_native_language(template_name) {
        return base_prompt.to_string();
    }
    format!("Respond in {}.\n\n{}", display_name(output_language), base_prompt)
}

/// Applies `template_name`'s prompt to `transcript` via a single remote
/// language-model call. Returns [`PipelineError::UnknownTemplate`] or
/// [`PipelineError::TranscriptTooLong`] without calling the remote service
/// when resolvable locally.
pub async fn restructure(
    llm: &dyn LanguageModel,
    registry: &dyn TemplateRegistry,
    retry_cfg: &RetryConfig,
    restructure_cfg: &RestructureConfig,
    transcript: &str,
    template_name: &str,
    output_language: &str,
) -> Result<String> {
    let system_prompt = build_system_prompt(registry, template_name, output_language)?;

    let estimated = estimate_tokens(transcript);
    if estimated > restructure_cfg.max_estimated_tokens {
        return Err(PipelineError::TranscriptTooLong(estimated).into());
    }

    retry_with_backoff(retry_cfg, |_attempt| llm.complete(&system_prompt, transcript), is_transient).await
}

/// Builds the part-aware system prompt for map-phase call `index` of
/// `total`: the base template plus a directive that, for parts after the
/// first, no top-level heading should be emitted.
pub fn part_aware_template(base_prompt: &str, index: usize, total: usize) -> String {
    let part_number = index + 1;
    format!(
        "{base}\n\nYou are restructuring part {part} of {total} of a longer transcript. \
Continue the structural conventions of the base template above.{heading_note}",
        base = base_prompt,
        part = part_number,
        total = total,
        heading_note = if part_number == 1 {
            ""
        } else {
            " Do not emit a top-level heading; this part continues the document started in part 1."
        }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct FakeRegistry;
    impl TemplateRegistry for FakeRegistry {
        fn resolve(&self, name: &str) -> Result<String, PipelineError> {
            match name {
                "meeting" => Ok("BASE MEETING PROMPT".to_string()),
                other => Err(PipelineError::UnknownTemplate(other.to_string())),
            }
        }
    }

    #[test]
    fn unknown_template_is_rejected_before_any_call() {
        let err = build_system_prompt(&FakeRegistry, "nope", "").unwrap_err();
        assert!(matches!(err, PipelineError::UnknownTemplate(_)));
    }

    #[test]
    fn no_prefix_when_output_language_matches_native() {
        let prompt = build_system_prompt(&FakeRegistry, "meeting", "en").unwrap();
        assert_eq!(prompt, "BASE MEETING PROMPT");
    }

    #[test]
    fn prefix_added_when_output_language_differs() {
        let prompt = build_system_prompt(&FakeRegistry, "meeting", "es").unwrap();
        assert_eq!(prompt, "Respond in Spanish.\n\nBASE MEETING PROMPT");
    }

    #[test]
    fn empty_output_language_adds_no_prefix() {
        let prompt = build_system_prompt(&FakeRegistry, "meeting", "").unwrap();
        assert_eq!(prompt, "BASE MEETING PROMPT");
    }

    #[test]
    fn part_aware_prompt_omits_heading_note_on_first_part() {
        let prompt = part_aware_template("BASE", 0, 3);
        assert!(prompt.contains("part 1 of 3"));
        assert!(!prompt.contains("Do not emit a top-level heading"));
    }

    #[test]
    fn part_aware_prompt_adds_heading_note_after_first_part() {
        let prompt = part_aware_template("BASE", 1, 3);
        assert!(prompt.contains("part 2 of 3"));
        assert!(prompt.contains("Do not emit a top-level heading"));
    }

    struct FakeLlm {
        calls: AtomicU32,
        responses: Vec<Result<String, fn() -> anyhow::Error>>,
    }

    #[async_trait]
    impl LanguageModel for FakeLlm {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            match &self.responses[i] {
                Ok(s) => Ok(s.clone()),
                Err(f) => Err(f()),
            }
        }
    }

    #[tokio::test]
    async fn transcript_too_long_is_rejected_without_calling_remote() {
        let llm = FakeLlm { calls: AtomicU32::new(0), responses: vec![] };
        let cfg = RestructureConfig { max_estimated_tokens: 1 };
        let result = restructure(
            &llm,
            &FakeRegistry,
            &RetryConfig::default(),
            &cfg,
            "a transcript far longer than one estimated token",
            "meeting",
            "",
        )
        .await;

        let err = result.unwrap_err();
        assert!(crate::error::is_kind(&err, |e| matches!(e, PipelineError::TranscriptTooLong(_))));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rate_limit_retries_then_succeeds() {
        let llm = FakeLlm {
            calls: AtomicU32::new(0),
            responses: vec![
                Err(|| classify_response(StatusCode::TOO_MANY_REQUESTS, "slow down")),
                Ok("final markdown".to_string()),
            ],
        };
        let cfg = RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };

        let result = restructure(
            &llm,
            &FakeRegistry,
            &cfg,
            &RestructureConfig::default(),
            "short transcript",
            "meeting",
            "",
        )
        .await
        .unwrap();

        assert_eq!(result, "final markdown");
    }

    #[test]
    fn context_length_message_classifies_as_transcript_too_long() {
        let err = classify_response(StatusCode::BAD_REQUEST, "error: context_length_exceeded");
        assert!(crate::error::is_kind(&err, |e| matches!(e, PipelineError::TranscriptTooLong(_))));
    }
}
