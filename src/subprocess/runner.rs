use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Runs `binary` with `args`, captures stdout and stderr, and returns the
/// concatenated stderr text (ffmpeg reports its diagnostics — silence
/// detection, duration, progress — on stderr, not stdout). Exit status is
/// intentionally ignored: callers that care about failure inspect the
/// captured text themselves, since ffmpeg sometimes exits non-zero on
/// successful partial output (e.g. a truncated `-t` clip).
pub async fn run_captured(binary: &Path, args: &[String]) -> Result<String> {
    debug!(?binary, ?args, "running captured subprocess");

    let output = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .with_context(|| format!("failed to spawn {}", binary.display()))?;

    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    let stdout = String::from_utf8_lossy(&output.stdout);

    if !stdout.trim().is_empty() {
        debug!(bytes = stdout.len(), "subprocess produced stdout (ignored)");
    }

    Ok(stderr)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GracefulOutcome {
    /// The child exited on its own within the grace window.
    ExitedGracefully,
    /// The child had to be killed after `graceful_timeout` elapsed.
    Killed,
}

/// Runs `binary` with `args`, piping stdin so it can be asked to stop
/// gracefully. When `cancel` resolves, writes `b"q"` to the child's stdin
/// (ffmpeg's documented interactive quit key) and drops the handle, then
/// races the child's exit against `graceful_timeout`, killing it if it
/// hasn't exited in time.
pub async fn run_graceful(
    binary: &Path,
    args: &[String],
    cancel: tokio_util::sync::CancellationToken,
    graceful_timeout: Duration,
) -> Result<GracefulOutcome> {
    debug!(?binary, ?args, "starting graceful subprocess");

    let mut child = Command::new(binary)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn {}", binary.display()))?;

    let mut stdin = child.stdin.take();

    // Drain stdout/stderr concurrently so a chatty child (ffmpeg's progress
    // lines are constant) never fills the pipe buffer and blocks on write —
    // which would leave it unable to read the graceful-stop byte below.
    if let Some(mut stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let _ = tokio::io::copy(&mut stdout, &mut tokio::io::sink()).await;
        });
    }
    if let Some(mut stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let _ = tokio::io::copy(&mut stderr, &mut tokio::io::sink()).await;
        });
    }

    cancel.cancelled().await;

    if let Some(mut handle) = stdin.take() {
        if let Err(err) = handle.write_all(b"q").await {
            warn!(%err, "failed to write graceful-stop byte to child stdin");
        }
        drop(handle);
    }

    tokio::select! {
        status = child.wait() => {
            status.context("waiting for child process")?;
            Ok(GracefulOutcome::ExitedGracefully)
        }
        _ = tokio::time::sleep(graceful_timeout) => {
            warn!("child did not exit within the graceful timeout, killing it");
            child.kill().await.context("killing unresponsive child")?;
            Ok(GracefulOutcome::Killed)
        }
    }
}
