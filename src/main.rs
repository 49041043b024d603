//! CLI entry point. Defines the three end-user workflows — `record`
//! (capture only), `transcribe` (an existing file), `run` (capture then
//! transcribe) — and wires CLI flags onto the library's pipeline
//! configuration. The general-purpose argument-parsing surface belongs to
//! the acknowledged external collaborator in a full product build; this
//! binary only owns the handful of flags that drive the core pipeline
//! directly.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing_subscriber::EnvFilter;

use transcript_forge::audio::AudioSource;
use transcript_forge::error::{self, PipelineError};
use transcript_forge::interrupt::InterruptHandler;
use transcript_forge::pipeline::{self, TranscribeFilePipeline};
use transcript_forge::restructure::HttpLanguageModel;
use transcript_forge::transcribe::{HttpSpeechToText, TranscribeOptions};

#[derive(Parser)]
#[command(name = "transcript-forge", version, about = "Turns long recordings into structured markdown transcripts")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase log verbosity (stackable: -v, -vv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Capture audio from a microphone/system-audio/mixed source. The
    /// actual capture device plumbing is an external collaborator this
    /// crate doesn't implement; this subcommand exists only to complete the
    /// CLI surface.
    Record {
        #[arg(long)]
        out: PathBuf,
    },
    /// Transcribe an existing audio file and optionally restructure it.
    Transcribe(TranscribeArgs),
    /// Capture, then transcribe the captured file back to back.
    Run {
        #[arg(long)]
        out: PathBuf,
        #[command(flatten)]
        transcribe: TranscribeArgs,
    },
}

#[derive(Parser)]
struct TranscribeArgs {
    /// Path to the audio file. Required for `transcribe`; ignored for
    /// `run`, which transcribes the file it just captured via `--out`.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Markdown output path.
    #[arg(long)]
    output: PathBuf,

    /// Template name: brainstorm, meeting, or lecture. Omit to skip restructuring.
    #[arg(long)]
    template: Option<String>,

    /// ISO 639-1 (optionally with region, e.g. es-MX) output language.
    #[arg(long, default_value = "")]
    language: String,

    /// Vocabulary hint forwarded to the speech-to-text service.
    #[arg(long, default_value = "")]
    prompt: String,

    /// Request the diarization-capable model.
    #[arg(long)]
    diarize: bool,

    /// Concurrent transcription requests (clamped to >= 1).
    #[arg(long, default_value_t = 4)]
    max_parallel: usize,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let interrupt = Arc::new(InterruptHandler::new(std::time::Duration::from_secs(2)));
    interrupt.spawn_signal_listener();
    let cancel = interrupt.token();

    let result = run(cli.command, cancel).await;

    if let Err(err) = result {
        error!(%err, "transcript-forge failed");
        std::process::exit(error::exit_code_for(&err));
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();
}

async fn run(command: Command, cancel: CancellationToken) -> Result<()> {
    match command {
        Command::Record { out } => {
            let source = UnimplementedAudioSource;
            source.capture(&out, cancel).await
        }
        Command::Transcribe(args) => transcribe_command(args, cancel).await,
        Command::Run { out, transcribe } => {
            let source = UnimplementedAudioSource;
            let pipeline = build_pipeline(&transcribe).await?;
            let outcome = pipeline::capture_then_transcribe(&source, &out, &pipeline, cancel).await?;
            write_outcome(&transcribe.output, &outcome).await
        }
    }
}

async fn transcribe_command(args: TranscribeArgs, cancel: CancellationToken) -> Result<()> {
    let input = args.input.clone().context("--input is required for the transcribe subcommand")?;
    if args.output.exists() {
        return Err(PipelineError::OutputExists(args.output.clone()).into());
    }

    let pipeline = build_pipeline(&args).await?;
    let outcome = pipeline::transcribe_file(&input, &pipeline, cancel).await?;
    write_outcome(&args.output, &outcome).await
}

async fn build_pipeline(args: &TranscribeArgs) -> Result<TranscribeFilePipeline> {
    let ffmpeg_path = pipeline::require_ffmpeg()?;

    let stt_api_key = std::env::var("TRANSCRIPT_FORGE_STT_API_KEY")
        .map_err(|_| PipelineError::ApiKeyMissing("speech-to-text".to_string()))?;
    let stt_api_base = std::env::var("TRANSCRIPT_FORGE_STT_API_BASE")
        .unwrap_or_else(|_| "https://api.openai.com".to_string());

    let client = Client::new();
    let stt = Arc::new(HttpSpeechToText::new(client.clone(), stt_api_base, stt_api_key));

    let mut built = TranscribeFilePipeline::new(ffmpeg_path, stt);
    built.transcribe_options = TranscribeOptions {
        diarize: args.diarize,
        prompt: args.prompt.clone(),
        language: args.language.clone(),
    };
    built.max_parallel = args.max_parallel.max(1);

    if let Some(template) = &args.template {
        let llm_api_key = std::env::var("TRANSCRIPT_FORGE_LLM_API_KEY")
            .map_err(|_| PipelineError::ApiKeyMissing("language model".to_string()))?;
        let llm_api_base = std::env::var("TRANSCRIPT_FORGE_LLM_API_BASE")
            .unwrap_or_else(|_| "https://api.openai.com".to_string());
        let llm_model = std::env::var("TRANSCRIPT_FORGE_LLM_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());

        built.llm = Some(Arc::new(HttpLanguageModel::new(client, llm_api_base, llm_api_key, llm_model)));
        built.template_name = Some(template.clone());
        built.output_language = args.language.clone();
    }

    Ok(built)
}

async fn write_outcome(output: &PathBuf, outcome: &pipeline::TranscribeFileOutcome) -> Result<()> {
    let document = outcome.markdown.as_deref().unwrap_or(&outcome.transcript);
    tokio::fs::write(output, document)
        .await
        .with_context(|| format!("writing output to {}", output.display()))
}

/// The out-of-scope capture collaborator. Real device capture lives in the
/// surrounding application; this crate only defines the [`AudioSource`]
/// seam it plugs into.
struct UnimplementedAudioSource;

#[async_trait::async_trait]
impl AudioSource for UnimplementedAudioSource {
    async fn capture(&self, _out_path: &std::path::Path, _stop: CancellationToken) -> Result<()> {
        anyhow::bail!(PipelineError::NoAudioDevice)
    }
}
