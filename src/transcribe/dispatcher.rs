//! Fans a chunk list out to `max_parallel` concurrent transcription calls,
//! fails fast on the first permanent error, and preserves chunk-index
//! ordering in the returned results regardless of completion order.
//!
//! Bounded fan-out via a `tokio::sync::Semaphore`: N permits gate concurrent
//! calls, and every task cooperates with a shared cancellation token.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::audio::Chunk;
use crate::error::PipelineError;
use crate::retry::RetryConfig;

use super::transcriber::{transcribe, SpeechToText, TranscribeOptions};

/// Runs `chunks` through `stt` with up to `max_parallel` concurrent calls.
/// `max_parallel` is clamped to at least 1. On the first task error, every
/// sibling task is cancelled; the dispatcher returns that first error,
/// annotated with the failing chunk's index and path. Empty input returns
/// an empty result with no error.
pub async fn transcribe_all(
    chunks: &[Chunk],
    stt: Arc<dyn SpeechToText>,
    opts: Arc<TranscribeOptions>,
    retry_cfg: RetryConfig,
    max_parallel: usize,
    cancel: CancellationToken,
) -> Result<Vec<String>> {
    if chunks.is_empty() {
        return Ok(Vec::new());
    }

    let max_parallel = max_parallel.max(1);
    let semaphore = Arc::new(Semaphore::new(max_parallel));
    let mut results: Vec<Option<String>> = vec![None; chunks.len()];

    let mut tasks = tokio::task::JoinSet::new();

    for chunk in chunks {
        let semaphore = Arc::clone(&semaphore);
        let stt = Arc::clone(&stt);
        let opts = Arc::clone(&opts);
        let cancel = cancel.clone();
        let chunk = chunk.clone();

        tasks.spawn(async move {
            let permit = tokio::select! {
                acquired = semaphore.acquire_owned() => acquired.context("dispatcher semaphore closed")?,
                _ = cancel.cancelled() => anyhow::bail!(PipelineError::Interrupted),
            };

            let outcome = tokio::select! {
                res = transcribe(stt.as_ref(), &retry_cfg, &chunk.path, &opts) => res,
                _ = cancel.cancelled() => Err(anyhow::Error::new(PipelineError::Interrupted)),
            };

            drop(permit);

            outcome
                .map(|text| (chunk.index, text))
                .with_context(|| format!("transcribing chunk {} ({})", chunk.index, chunk.path.display()))
        });
    }

    let mut first_error: Option<anyhow::Error> = None;

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok((index, text))) => {
                results[index] = Some(text);
            }
            Ok(Err(err)) => {
                if first_error.is_none() {
                    warn!(%err, "transcription task failed, cancelling sibling tasks");
                    cancel.cancel();
                    first_error = Some(err);
                }
            }
            Err(join_err) => {
                if first_error.is_none() {
                    cancel.cancel();
                    first_error = Some(anyhow::Error::new(join_err).context("transcription task panicked"));
                }
            }
        }
    }

    if let Some(err) = first_error {
        return Err(err);
    }

    let ordered = results
        .into_iter()
        .enumerate()
        .map(|(i, maybe)| maybe.ok_or_else(|| anyhow::anyhow!("missing result for chunk {}", i)))
        .collect::<Result<Vec<_>>>()?;

    info!(count = ordered.len(), "dispatch complete");
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use crate::transcribe::transcriber::SttResponse;

    fn chunk_at(index: usize) -> Chunk {
        Chunk {
            path: PathBuf::from(format!("/tmp/chunk_{}.mka", index)),
            index,
            start: Duration::from_secs(30 * index as u64),
            end: Duration::from_secs(30 * (index as u64 + 1)),
        }
    }

    struct ScriptedStt {
        responses: Vec<&'static str>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl SpeechToText for ScriptedStt {
        async fn transcribe_once(&self, audio: &Path, _opts: &TranscribeOptions) -> Result<SttResponse> {
            let index: usize = audio
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.strip_prefix("chunk_"))
                .and_then(|s| s.parse().ok())
                .unwrap();
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SttResponse { text: self.responses[index].to_string(), segments: Vec::new() })
        }
    }

    struct FailFirstChunkStt {
        calls_for_chunk_0: AtomicU32,
    }

    #[async_trait]
    impl SpeechToText for FailFirstChunkStt {
        async fn transcribe_once(&self, audio: &Path, _opts: &TranscribeOptions) -> Result<SttResponse> {
            let index: usize = audio
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.strip_prefix("chunk_"))
                .and_then(|s| s.parse().ok())
                .unwrap();

            if index == 0 {
                self.calls_for_chunk_0.fetch_add(1, Ordering::SeqCst);
                return Err(anyhow::Error::new(PipelineError::AuthFailed));
            }

            // Siblings take long enough that a cancellation should win the race.
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(SttResponse { text: "late".to_string(), segments: Vec::new() })
        }
    }

    #[tokio::test]
    async fn two_chunk_happy_path_preserves_order() {
        let chunks = vec![chunk_at(0), chunk_at(1)];
        let stt = Arc::new(ScriptedStt { responses: vec!["hello", "world"], calls: AtomicU32::new(0) });

        let results = transcribe_all(
            &chunks,
            stt,
            Arc::new(TranscribeOptions::default()),
            RetryConfig::default(),
            2,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(results, vec!["hello".to_string(), "world".to_string()]);
    }

    #[tokio::test]
    async fn parallel_failure_cancels_siblings_and_tags_error() {
        let chunks = vec![chunk_at(0), chunk_at(1), chunk_at(2)];
        let stt = Arc::new(FailFirstChunkStt { calls_for_chunk_0: AtomicU32::new(0) });

        let result = transcribe_all(
            &chunks,
            stt.clone(),
            Arc::new(TranscribeOptions::default()),
            RetryConfig::default(),
            3,
            CancellationToken::new(),
        )
        .await;

        let err = result.expect_err("expected chunk 0's auth failure to propagate");
        assert!(crate::error::is_kind(&err, |e| matches!(e, PipelineError::AuthFailed)));
        assert_eq!(stt.calls_for_chunk_0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_chunk_list_returns_empty_results() {
        let stt = Arc::new(ScriptedStt { responses: vec![], calls: AtomicU32::new(0) });
        let results = transcribe_all(
            &[],
            stt,
            Arc::new(TranscribeOptions::default()),
            RetryConfig::default(),
            4,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn max_parallel_of_zero_is_clamped_to_one() {
        let chunks = vec![chunk_at(0)];
        let stt = Arc::new(ScriptedStt { responses: vec!["solo"], calls: AtomicU32::new(0) });

        let results = transcribe_all(
            &chunks,
            stt,
            Arc::new(TranscribeOptions::default()),
            RetryConfig::default(),
            0,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(results, vec!["solo".to_string()]);
    }
}
