//! Splits an audio file into size-bounded chunks, preferring cuts at
//! natural silence boundaries and falling back to fixed-width overlapping
//! windows when silence detection yields nothing usable.
//!
//! Grounded on the cascading silence/force-split strategy in
//! `other_examples`' `AudioChunker` (silence scan → greedy cut selection →
//! forced cut when no candidate exists), adapted from in-memory sample
//! ranges to on-disk ffmpeg extraction since this pipeline processes
//! arbitrarily large files without loading them into memory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::subprocess;

use super::ffmpeg::{self, SilencePoint};

pub const TEMP_DIR_PREFIX: &str = "transcript-forge-chunks-";

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    pub noise_threshold_db: f64,
    pub min_silence_duration: Duration,
    pub max_chunk_bytes: u64,
    pub target_duration: Duration,
    pub overlap: Duration,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            noise_threshold_db: -30.0,
            min_silence_duration: Duration::from_millis(500),
            max_chunk_bytes: 20 * 1024 * 1024,
            target_duration: Duration::from_secs(10 * 60),
            overlap: Duration::from_secs(30),
        }
    }
}

impl ChunkerConfig {
    /// Validates the time-based fallback's `overlap < target` invariant.
    /// Rejected at construction time rather than left to misbehave mid-run.
    pub fn validate(&self) -> Result<()> {
        if self.overlap >= self.target_duration {
            bail!(
                "overlap ({:?}) must be strictly less than target_duration ({:?})",
                self.overlap,
                self.target_duration
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub path: PathBuf,
    pub index: usize,
    pub start: Duration,
    pub end: Duration,
}

/// Splits `audio_path` into chunks under `config`'s size budget, preferring
/// silence-based cuts and falling back to fixed overlapping windows.
pub async fn chunk(
    ffmpeg_path: &Path,
    audio_path: &Path,
    config: &ChunkerConfig,
    cancel: &CancellationToken,
) -> Result<Vec<Chunk>> {
    config.validate()?;

    let metadata = tokio::fs::metadata(audio_path)
        .await
        .map_err(|_| PipelineError::FileNotFound(audio_path.to_path_buf()))?;
    let file_size = metadata.len();

    let probe_args = ffmpeg::silence_detect_args(
        audio_path,
        config.noise_threshold_db,
        config.min_silence_duration,
    );
    let diagnostic = subprocess::run_captured(ffmpeg_path, &probe_args).await?;

    let total_duration = ffmpeg::parse_total_duration(&diagnostic)
        .context("could not determine audio duration from ffmpeg output")
        .map_err(|_| PipelineError::ChunkingFailed("duration not found in ffmpeg output".into()))?;
    let silences = ffmpeg::parse_silence_points(&diagnostic);

    let boundaries = if silences.is_empty() {
        warn!("no silence points detected, falling back to time-based chunking");
        time_based_windows(total_duration, config.target_duration, config.overlap)
    } else {
        let bitrate_bytes_per_sec = file_size as f64 / total_duration.as_secs_f64().max(f64::EPSILON);
        let max_duration_per_chunk =
            Duration::from_secs_f64(config.max_chunk_bytes as f64 / bitrate_bytes_per_sec.max(1.0));

        let cuts = select_cut_points(&silences, max_duration_per_chunk);
        windows_from_cuts(&cuts, total_duration)
    };

    extract_chunks(ffmpeg_path, audio_path, &boundaries, cancel).await
}

/// Greedy cut-point selection over detected silences.
///
/// Walks silences in order, accumulating a `candidate` cut as long as the
/// distance from the last committed cut stays under budget. When a silence
/// would exceed budget, the pending candidate (if any) is committed; failing
/// that, the current silence is forced through as an oversize cut.
pub fn select_cut_points(silences: &[SilencePoint], max_duration_per_chunk: Duration) -> Vec<Duration> {
    let mut cuts = Vec::new();
    let mut last_cut = Duration::ZERO;
    let mut candidate: Option<Duration> = None;

    for silence in silences {
        let m = silence.midpoint();

        if m.saturating_sub(last_cut) < max_duration_per_chunk {
            candidate = Some(m);
            continue;
        }

        if let Some(c) = candidate.take() {
            cuts.push(c);
            last_cut = c;

            if m.saturating_sub(last_cut) < max_duration_per_chunk {
                candidate = Some(m);
            } else {
                cuts.push(m);
                last_cut = m;
            }
        } else {
            cuts.push(m);
            last_cut = m;
        }
    }

    cuts
}

fn windows_from_cuts(cuts: &[Duration], total: Duration) -> Vec<(Duration, Duration)> {
    let mut boundaries = Vec::with_capacity(cuts.len() + 2);
    boundaries.push(Duration::ZERO);
    boundaries.extend(cuts.iter().copied());
    boundaries.push(total);

    boundaries.windows(2).map(|w| (w[0], w[1])).collect()
}

/// Fixed-width overlapping windows: stride = target - overlap, so words at
/// chunk boundaries appear in at least one chunk.
pub fn time_based_windows(total: Duration, target: Duration, overlap: Duration) -> Vec<(Duration, Duration)> {
    let stride = target.saturating_sub(overlap);
    if stride.is_zero() {
        return vec![(Duration::ZERO, total)];
    }

    let mut windows = Vec::new();
    let mut start = Duration::ZERO;
    while start < total {
        let end = (start + target).min(total);
        windows.push((start, end));
        start += stride;
    }
    windows
}

async fn extract_chunks(
    ffmpeg_path: &Path,
    audio_path: &Path,
    boundaries: &[(Duration, Duration)],
    cancel: &CancellationToken,
) -> Result<Vec<Chunk>> {
    let temp_dir = tempfile::Builder::new()
        .prefix(TEMP_DIR_PREFIX)
        .tempdir()
        .context("failed to create chunk temp directory")?
        .into_path();

    let ext = audio_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("mka");

    let mut chunks = Vec::with_capacity(boundaries.len());

    for (index, (start, end)) in boundaries.iter().enumerate() {
        if cancel.is_cancelled() {
            cleanup_dir(&temp_dir);
            bail!(PipelineError::Interrupted);
        }

        let out_path = temp_dir.join(format!("chunk_{:04}.{}", index, ext));
        let args = ffmpeg::extract_segment_args(audio_path, *start, *end, &out_path);

        if let Err(err) = subprocess::run_captured(ffmpeg_path, &args).await {
            cleanup_dir(&temp_dir);
            return Err(err).context(PipelineError::ChunkingFailed(format!(
                "failed to extract chunk {}",
                index
            )));
        }

        let extracted_ok = tokio::fs::metadata(&out_path)
            .await
            .map(|m| m.len() > 0)
            .unwrap_or(false);

        if !extracted_ok {
            cleanup_dir(&temp_dir);
            bail!(PipelineError::ChunkingFailed(format!(
                "chunk {} produced no output",
                index
            )));
        }

        chunks.push(Chunk { path: out_path, index, start: *start, end: *end });
    }

    info!(count = chunks.len(), "chunking complete");
    Ok(chunks)
}

fn cleanup_dir(dir: &Path) {
    if let Err(err) = std::fs::remove_dir_all(dir) {
        warn!(%err, ?dir, "failed to clean up chunk temp directory after extraction failure");
    }
}

/// Removes the chunk parent directory, gated on its name carrying the
/// chunker's prefix marker — a safety check against deleting an unrelated
/// path if a `Chunk` was ever hand-constructed with an unexpected `path`.
/// Falls back to per-file unlinks if the prefix check fails.
pub fn cleanup(chunks: &[Chunk]) -> Result<()> {
    let Some(first) = chunks.first() else {
        return Ok(());
    };

    let parent = first.path.parent();
    let is_marked = parent
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .map(|name| name.starts_with(TEMP_DIR_PREFIX))
        .unwrap_or(false);

    if is_marked {
        if let Some(dir) = parent {
            std::fs::remove_dir_all(dir).context("removing chunk temp directory")?;
        }
        return Ok(());
    }

    for chunk in chunks {
        let _ = std::fs::remove_file(&chunk.path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sp(start_secs: u64, end_secs: u64) -> SilencePoint {
        SilencePoint { start: Duration::from_secs(start_secs), end: Duration::from_secs(end_secs) }
    }

    #[test]
    fn config_rejects_overlap_not_smaller_than_target() {
        let cfg = ChunkerConfig {
            overlap: Duration::from_secs(60),
            target_duration: Duration::from_secs(60),
            ..ChunkerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn time_based_windows_cover_whole_duration_with_overlap() {
        let windows = time_based_windows(
            Duration::from_secs(95),
            Duration::from_secs(40),
            Duration::from_secs(10),
        );

        assert_eq!(windows[0], (Duration::from_secs(0), Duration::from_secs(40)));
        assert_eq!(windows[1], (Duration::from_secs(30), Duration::from_secs(70)));
        assert_eq!(windows[2], (Duration::from_secs(60), Duration::from_secs(95)));
        assert_eq!(windows.last().unwrap().1, Duration::from_secs(95));
    }

    #[test]
    fn time_based_single_window_when_shorter_than_target() {
        let windows = time_based_windows(
            Duration::from_secs(20),
            Duration::from_secs(600),
            Duration::from_secs(30),
        );
        assert_eq!(windows, vec![(Duration::ZERO, Duration::from_secs(20))]);
    }

    #[test]
    fn cut_points_accumulate_under_budget() {
        let silences = vec![sp(10, 11), sp(20, 21), sp(30, 31)];
        // Budget comfortably covers the whole span: no cuts needed.
        let cuts = select_cut_points(&silences, Duration::from_secs(100));
        assert!(cuts.is_empty());
    }

    #[test]
    fn cut_points_commit_last_candidate_over_budget() {
        // Silences at ~10.5s, 20.5s, 31s; budget 15s from 0.
        let silences = vec![sp(10, 11), sp(20, 21), sp(30, 32)];
        let cuts = select_cut_points(&silences, Duration::from_secs(15));

        // First candidate 10.5s fits (<15s from 0), second silence at 20.5s
        // exceeds 15s from 0, so 10.5s is committed as the cut.
        assert_eq!(cuts[0], Duration::from_millis(10500));
    }

    #[test]
    fn forced_cut_when_no_candidate_exists() {
        // A single silence whose midpoint alone exceeds budget from the start.
        let silences = vec![sp(50, 52)];
        let cuts = select_cut_points(&silences, Duration::from_secs(10));
        assert_eq!(cuts, vec![Duration::from_secs(51)]);
    }

    #[test]
    fn cleanup_on_empty_chunks_is_a_noop() {
        assert!(cleanup(&[]).is_ok());
    }

    #[test]
    fn cleanup_refuses_unmarked_directories_falls_back_to_unlink() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("not_a_chunk_dir_member.mka");
        std::fs::write(&file_path, b"data").unwrap();

        let chunks = vec![Chunk { path: file_path.clone(), index: 0, start: Duration::ZERO, end: Duration::ZERO }];
        cleanup(&chunks).unwrap();

        assert!(!file_path.exists());
        assert!(dir.path().exists());
    }
}
