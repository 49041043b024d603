//! Wires the core components into the CLI's three workflows: `capture`
//! (delegates to the out-of-scope [`AudioSource`] collaborator),
//! `transcribe_file` (chunk -> dispatch -> concatenate -> optionally
//! restructure), and `run` (capture, then transcribe_file).
//!
//! Recording, transcription, and restructuring stages sit behind a handful
//! of async functions that `main.rs` drives directly for a plain CLI.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::audio::chunker::{self, ChunkerConfig};
use crate::audio::AudioSource;
use crate::error::PipelineError;
use crate::restructure::map_reduce::{self, ProgressEvent};
use crate::restructure::{CompiledTemplates, LanguageModel, RestructureConfig, TemplateRegistry};
use crate::retry::RetryConfig;
use crate::subprocess;
use crate::transcribe::{transcribe_all, SpeechToText, TranscribeOptions};

/// Everything `transcribe_file` needs beyond the audio path, bundled so
/// `main.rs` can build it once from CLI flags and pass it straight through.
pub struct TranscribeFilePipeline {
    pub ffmpeg_path: PathBuf,
    pub chunker_config: ChunkerConfig,
    pub transcribe_options: TranscribeOptions,
    pub retry_config: RetryConfig,
    pub max_parallel: usize,
    pub stt: Arc<dyn SpeechToText>,
    pub llm: Option<Arc<dyn LanguageModel>>,
    pub template_registry: Arc<dyn TemplateRegistry>,
    pub restructure_config: RestructureConfig,
    pub max_map_tokens: usize,
    pub template_name: Option<String>,
    pub output_language: String,
}

impl TranscribeFilePipeline {
    /// Constructs a pipeline with the compiled-in template registry and the
    /// spec's default chunker/retry/restructure configuration; callers
    /// still need to supply the ffmpeg path and the two remote-service
    /// clients before anything can run.
    pub fn new(ffmpeg_path: PathBuf, stt: Arc<dyn SpeechToText>) -> Self {
        Self {
            ffmpeg_path,
            chunker_config: ChunkerConfig::default(),
            transcribe_options: TranscribeOptions::default(),
            retry_config: RetryConfig::default(),
            max_parallel: 4,
            stt,
            llm: None,
            template_registry: Arc::new(CompiledTemplates),
            restructure_config: RestructureConfig::default(),
            max_map_tokens: map_reduce::DEFAULT_MAX_MAP_TOKENS,
            template_name: None,
            output_language: String::new(),
        }
    }
}

/// The concatenated-but-not-yet-restructured transcript, or the finished
/// markdown document when a template was requested.
#[derive(Debug, Clone)]
pub struct TranscribeFileOutcome {
    pub transcript: String,
    pub markdown: Option<String>,
    pub used_map_reduce: bool,
}

/// Runs the full offline batch pipeline against an existing audio file:
/// chunk, dispatch to the transcriber with bounded parallelism, concatenate
/// in chunk-index order, and, if a template was requested, restructure the
/// result (recursing into map-reduce when the transcript is too long for a
/// single call).
pub async fn transcribe_file(
    audio_path: &Path,
    pipeline: &TranscribeFilePipeline,
    cancel: CancellationToken,
) -> Result<TranscribeFileOutcome> {
    if !tokio::fs::try_exists(audio_path).await.unwrap_or(false) {
        return Err(PipelineError::FileNotFound(audio_path.to_path_buf()).into());
    }

    info!(path = %audio_path.display(), "chunking audio file");
    let chunks = chunker::chunk(&pipeline.ffmpeg_path, audio_path, &pipeline.chunker_config, &cancel)
        .await
        .context("chunking audio file")?;

    let transcribe_result = transcribe_all(
        &chunks,
        Arc::clone(&pipeline.stt),
        Arc::new(pipeline.transcribe_options.clone()),
        pipeline.retry_config,
        pipeline.max_parallel,
        cancel.clone(),
    )
    .await;

    // The chunker's temp directory must not outlive the transcription it
    // served, win or lose.
    let cleanup_result = chunker::cleanup(&chunks);

    let texts = transcribe_result.context("transcribing chunks")?;
    cleanup_result.context("cleaning up chunk temp directory")?;

    let transcript = texts.join("\n\n");

    let Some(template_name) = &pipeline.template_name else {
        return Ok(TranscribeFileOutcome { transcript, markdown: None, used_map_reduce: false });
    };

    let Some(llm) = &pipeline.llm else {
        anyhow::bail!("a template was requested but no language model client was configured");
    };

    let outcome = map_reduce::restructure_map_reduce(
        llm.as_ref(),
        pipeline.template_registry.as_ref(),
        &pipeline.retry_config,
        &pipeline.restructure_config,
        &transcript,
        template_name,
        &pipeline.output_language,
        pipeline.max_map_tokens,
        |event: ProgressEvent| {
            info!(phase = ?event.phase, current = event.current, total = event.total, "restructure progress");
        },
    )
    .await
    .context("restructuring transcript")?;

    Ok(TranscribeFileOutcome {
        transcript,
        markdown: Some(outcome.markdown),
        used_map_reduce: outcome.used_map_reduce,
    })
}

/// Captures audio via the injected [`AudioSource`] collaborator, then feeds
/// the result straight into [`transcribe_file`] — the `run` workflow's
/// "capture then transcribe, back to back" behavior.
pub async fn capture_then_transcribe(
    source: &dyn AudioSource,
    out_path: &Path,
    pipeline: &TranscribeFilePipeline,
    cancel: CancellationToken,
) -> Result<TranscribeFileOutcome> {
    source.capture(out_path, cancel.clone()).await.context("capturing audio")?;
    transcribe_file(out_path, pipeline, cancel).await
}

/// Resolves `ffmpeg` on `PATH`, surfacing the setup-bucket error used by
/// both CLI subcommands that need it.
pub fn require_ffmpeg() -> Result<PathBuf> {
    crate::audio::ffmpeg::find_ffmpeg().ok_or_else(|| PipelineError::FfmpegNotFound.into())
}

/// Probes the configured ffmpeg binary's presence without running a full
/// chunk pass — used by the `run`/`transcribe` subcommands' preflight check.
pub async fn ffmpeg_version(ffmpeg_path: &Path) -> Result<String> {
    subprocess::run_captured(ffmpeg_path, &["-version".to_string()])
        .await
        .context("probing ffmpeg version")
}
