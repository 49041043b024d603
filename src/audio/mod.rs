//! Audio chunking: splitting a long recording into size-bounded pieces at
//! natural silence boundaries, with a time-based fallback.

pub mod chunker;
pub mod ffmpeg;

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use chunker::{Chunk, ChunkerConfig};

/// The acknowledged out-of-scope collaborator: capturing audio from a
/// microphone, system-audio loopback, or mixed source. This crate ships no
/// real implementation, only the seam the `run` CLI workflow calls through —
/// device enumeration and OS-level capture live in the surrounding
/// application, not here.
#[async_trait]
pub trait AudioSource: Send + Sync {
    async fn capture(&self, out_path: &Path, stop: CancellationToken) -> Result<()>;
}
