//! Stable, tagged error kinds used for retry decisions and process exit codes.
//!
//! `PipelineError` variants survive arbitrary `anyhow::Context` wrapping —
//! `is_kind` and `find` walk the error chain rather than relying on a single
//! concrete error type at the top.

use std::path::PathBuf;

use thiserror::Error;

/// Exit-code bucket a [`PipelineError`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorBucket {
    Setup,
    Validation,
    Transient,
    Restructure,
    Interrupt,
    Usage,
    General,
}

impl ErrorBucket {
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorBucket::Setup => 3,
            ErrorBucket::Validation => 4,
            ErrorBucket::Transient => 5,
            ErrorBucket::Restructure => 6,
            ErrorBucket::Interrupt => 130,
            ErrorBucket::Usage => 2,
            ErrorBucket::General => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    // Setup
    #[error("ffmpeg binary not found on PATH")]
    FfmpegNotFound,
    #[error("required API key is missing for '{0}'")]
    ApiKeyMissing(String),
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),
    #[error("checksum mismatch for '{0}'")]
    ChecksumMismatch(String),
    #[error("failed to download '{0}': {1}")]
    DownloadFailed(String, String),
    #[error("no audio input device available")]
    NoAudioDevice,
    #[error("loopback/system-audio device not found")]
    LoopbackNotFound,

    // Validation
    #[error("invalid duration: {0}")]
    InvalidDuration(String),
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("unknown template: '{0}'")]
    UnknownTemplate(String),
    #[error("output already exists: {0}")]
    OutputExists(PathBuf),
    #[error("chunking failed: {0}")]
    ChunkingFailed(String),
    #[error("chunk of {0} bytes exceeds the remote service's size limit")]
    ChunkTooLarge(u64),
    #[error("invalid language code: '{0}'")]
    InvalidLanguage(String),

    // Transient / remote
    #[error("rate limited by remote service")]
    RateLimit,
    #[error("quota exceeded")]
    QuotaExceeded,
    #[error("request timed out")]
    Timeout,
    #[error("authentication with remote service failed")]
    AuthFailed,

    // Restructure
    #[error("transcript too long for a single restructure call (~{0} estimated tokens)")]
    TranscriptTooLong(usize),

    // Interrupt
    #[error("operation interrupted")]
    Interrupted,
}

impl PipelineError {
    pub fn bucket(&self) -> ErrorBucket {
        use PipelineError::*;
        match self {
            FfmpegNotFound
            | ApiKeyMissing(_)
            | UnsupportedPlatform(_)
            | ChecksumMismatch(_)
            | DownloadFailed(_, _)
            | NoAudioDevice
            | LoopbackNotFound => ErrorBucket::Setup,

            InvalidDuration(_)
            | UnsupportedFormat(_)
            | FileNotFound(_)
            | UnknownTemplate(_)
            | OutputExists(_)
            | ChunkingFailed(_)
            | ChunkTooLarge(_)
            | InvalidLanguage(_) => ErrorBucket::Validation,

            RateLimit | QuotaExceeded | Timeout | AuthFailed => ErrorBucket::Transient,

            TranscriptTooLong(_) => ErrorBucket::Restructure,

            Interrupted => ErrorBucket::Interrupt,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.bucket().exit_code()
    }
}

/// Finds the first [`PipelineError`] anywhere in `err`'s cause chain.
pub fn find(err: &anyhow::Error) -> Option<&PipelineError> {
    err.chain().find_map(|cause| cause.downcast_ref::<PipelineError>())
}

/// True if `err`'s chain contains a [`PipelineError`] matching `pred`, no
/// matter how many `.context(..)` layers wrap it.
pub fn is_kind(err: &anyhow::Error, pred: impl Fn(&PipelineError) -> bool) -> bool {
    find(err).map(pred).unwrap_or(false)
}

/// The exit code the CLI layer should use for an unhandled pipeline error.
/// Defaults to the "General" bucket (1) for anything that doesn't carry a
/// tagged [`PipelineError`].
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    find(err).map(PipelineError::exit_code).unwrap_or(1)
}

/// A transient HTTP 5xx from a remote service. Deliberately not part of the
/// stable taxonomy above — there's no generic "server-error" kind there —
/// but both remote-call classifiers need a way to signal "retry me" for a
/// status that isn't one of the four named transient kinds.
#[derive(Debug)]
pub struct TransientHttp(pub reqwest::StatusCode);

impl std::fmt::Display for TransientHttp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "transient HTTP status {}", self.0)
    }
}

impl std::error::Error for TransientHttp {}

/// True if `err`'s chain carries a [`TransientHttp`] marker or a tagged
/// [`PipelineError::RateLimit`]/[`PipelineError::Timeout`].
pub fn is_transient_http(err: &anyhow::Error) -> bool {
    if is_kind(err, |e| matches!(e, PipelineError::RateLimit | PipelineError::Timeout)) {
        return true;
    }
    err.chain().any(|cause| cause.downcast_ref::<TransientHttp>().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapping_preserves_identity() {
        let base = anyhow::Error::new(PipelineError::AuthFailed);
        let wrapped = base
            .context("transcribing chunk 2")
            .context("transcribing all chunks");

        assert!(is_kind(&wrapped, |e| matches!(e, PipelineError::AuthFailed)));
        assert_eq!(exit_code_for(&wrapped), 5);
    }

    #[test]
    fn unrelated_error_has_no_kind() {
        let err = anyhow::anyhow!("some plain failure");
        assert!(find(&err).is_none());
        assert_eq!(exit_code_for(&err), 1);
    }

    #[test]
    fn bucket_exit_codes_match_spec() {
        assert_eq!(ErrorBucket::Setup.exit_code(), 3);
        assert_eq!(ErrorBucket::Validation.exit_code(), 4);
        assert_eq!(ErrorBucket::Transient.exit_code(), 5);
        assert_eq!(ErrorBucket::Restructure.exit_code(), 6);
        assert_eq!(ErrorBucket::Interrupt.exit_code(), 130);
        assert_eq!(ErrorBucket::Usage.exit_code(), 2);
        assert_eq!(ErrorBucket::General.exit_code(), 1);
    }
}
