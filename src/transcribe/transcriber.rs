//! Wraps the remote speech-to-text call: builds the multipart request,
//! classifies HTTP/transport failures into the tagged error taxonomy, and
//! drives the retry kernel.
//!
//! Grounded on `whisper_engine.rs`'s reqwest client usage (streaming request,
//! status-code branching) and `api/api.rs`'s generic JSON-over-HTTP helper
//! for the classify-then-propagate shape.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::error::PipelineError;
use crate::retry::{retry_with_backoff, RetryConfig};

#[derive(Debug, Clone, Default)]
pub struct TranscribeOptions {
    pub diarize: bool,
    pub prompt: String,
    pub language: String,
}

impl TranscribeOptions {
    /// The base ISO 639-1 code only, stripped of any `-XX` region variant and
    /// lower-cased — the only part forwarded to the remote service.
    pub fn base_language(&self) -> Option<String> {
        if self.language.is_empty() {
            return None;
        }
        let lower = self.language.to_lowercase();
        Some(lower.split('-').next().unwrap_or(&lower).to_string())
    }
}

#[derive(Debug, Clone)]
pub struct SttSegment {
    pub id: usize,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct SttResponse {
    pub text: String,
    pub segments: Vec<SttSegment>,
}

impl SttResponse {
    /// One line per segment as `"[Segment <id>] <text>"` when segments are
    /// present; falls back to the flat text field otherwise. The tag becomes
    /// `"[Speaker <n>]"` once real speaker attribution is available
    /// upstream — segment IDs are a diarization placeholder until then.
    pub fn format(&self) -> String {
        if self.segments.is_empty() {
            return self.text.clone();
        }
        self.segments
            .iter()
            .map(|s| format!("[Segment {}] {}", s.id, s.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe_once(&self, audio: &Path, opts: &TranscribeOptions) -> Result<SttResponse>;
}

pub struct HttpSpeechToText {
    client: Client,
    api_base: String,
    api_key: String,
}

impl HttpSpeechToText {
    pub fn new(client: Client, api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self { client, api_base: api_base.into(), api_key: api_key.into() }
    }
}

#[derive(Debug, Deserialize)]
struct FlatBody {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct DiarizedSegment {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct DiarizedBody {
    #[serde(default)]
    segments: Vec<DiarizedSegment>,
}

/// The remote speech-to-text service's hard size limit. The chunker's
/// `max_chunk_bytes` default already leaves a safety margin under this, but a
/// caller handing a pre-existing oversize chunk straight to the transcriber
/// still needs a clean, tagged failure instead of an opaque upload error.
pub const MAX_UPLOAD_BYTES: u64 = 25 * 1024 * 1024;

#[async_trait]
impl SpeechToText for HttpSpeechToText {
    async fn transcribe_once(&self, audio: &Path, opts: &TranscribeOptions) -> Result<SttResponse> {
        let metadata = tokio::fs::metadata(audio)
            .await
            .with_context(|| format!("stat-ing chunk {}", audio.display()))?;
        if metadata.len() > MAX_UPLOAD_BYTES {
            return Err(PipelineError::ChunkTooLarge(metadata.len()).into());
        }

        let bytes = tokio::fs::read(audio)
            .await
            .with_context(|| format!("reading chunk {}", audio.display()))?;
        let file_name = audio
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("chunk.mka")
            .to_string();

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/octet-stream")
            .context("building multipart body")?;

        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", if opts.diarize { "diarize-v1" } else { "standard-v1" });

        if let Some(lang) = opts.base_language() {
            form = form.text("language", lang);
        }
        if !opts.prompt.is_empty() {
            form = form.text("prompt", opts.prompt.clone());
        }
        if opts.diarize {
            form = form.text("response_format", "diarized_json");
        }

        debug!(diarize = opts.diarize, "submitting transcription request");

        let response = self
            .client
            .post(format!("{}/v1/audio/transcriptions", self.api_base))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    anyhow::Error::new(PipelineError::Timeout)
                } else {
                    anyhow::Error::new(err).context("speech-to-text request failed")
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_response(status, &body));
        }

        if opts.diarize {
            let parsed: DiarizedBody = response
                .json()
                .await
                .context("parsing diarized transcription response")?;
            Ok(SttResponse {
                text: String::new(),
                segments: parsed
                    .segments
                    .into_iter()
                    .enumerate()
                    .map(|(id, s)| SttSegment { id, text: s.text })
                    .collect(),
            })
        } else {
            let parsed: FlatBody = response
                .json()
                .await
                .context("parsing transcription response")?;
            Ok(SttResponse { text: parsed.text, segments: Vec::new() })
        }
    }
}

/// Maps a failing HTTP response to the tagged taxonomy.
fn classify_response(status: StatusCode, body: &str) -> anyhow::Error {
    let lower = body.to_lowercase();
    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            if lower.contains("quota") || lower.contains("billing") {
                PipelineError::QuotaExceeded.into()
            } else {
                PipelineError::RateLimit.into()
            }
        }
        StatusCode::UNAUTHORIZED => PipelineError::AuthFailed.into(),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => PipelineError::Timeout.into(),
        s if s.is_server_error() => crate::error::TransientHttp(s).into(),
        other => anyhow::anyhow!("speech-to-text service returned {}: {}", other, body),
    }
}

/// The retry predicate for transcription calls: rate limits, request
/// timeouts, and untagged 5xx responses are worth retrying; everything else
/// (quota, auth, unknown failures) is permanent.
pub fn is_transient(err: &anyhow::Error) -> bool {
    crate::error::is_transient_http(err)
}

/// Transcribes `audio` through `stt`, retrying transient failures per
/// `retry_cfg`, and returns the formatted text (diarized or flat).
pub async fn transcribe(
    stt: &dyn SpeechToText,
    retry_cfg: &RetryConfig,
    audio: &Path,
    opts: &TranscribeOptions,
) -> Result<String> {
    let response =
        retry_with_backoff(retry_cfg, |_attempt| stt.transcribe_once(audio, opts), is_transient).await?;
    Ok(response.format())
}
