//! Parses ffmpeg's diagnostic (stderr) output and builds its argument lists.
//!
//! Direct ffmpeg invocation and argument-list construction, with `regex`
//! for scanning its diagnostic text output.

use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

static SILENCE_START_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"silence_start:\s*([\d.]+)").unwrap());
static SILENCE_END_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"silence_end:\s*([\d.]+)").unwrap());
static DURATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Duration:\s*(\d+):(\d+):(\d+)\.(\d+)").unwrap());
static TIME_PROGRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"time=(\d+):(\d+):(\d+)\.(\d+)").unwrap());

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SilencePoint {
    pub start: Duration,
    pub end: Duration,
}

impl SilencePoint {
    pub fn midpoint(&self) -> Duration {
        self.start + (self.end - self.start) / 2
    }
}

/// Normalizes a 1–6 digit fractional-seconds string to whole milliseconds.
fn frac_to_millis(frac: &str) -> u64 {
    let mut digits: String = frac.chars().take(3).collect();
    while digits.len() < 3 {
        digits.push('0');
    }
    digits.parse().unwrap_or(0)
}

fn hms_to_duration(h: &str, m: &str, s: &str, frac: &str) -> Duration {
    let hours: u64 = h.parse().unwrap_or(0);
    let mins: u64 = m.parse().unwrap_or(0);
    let secs: u64 = s.parse().unwrap_or(0);
    let millis = frac_to_millis(frac);
    Duration::from_secs(hours * 3600 + mins * 60 + secs) + Duration::from_millis(millis)
}

fn seconds_str_to_duration(s: &str) -> Duration {
    let secs: f64 = s.parse().unwrap_or(0.0);
    Duration::from_secs_f64(secs.max(0.0))
}

/// Scans ffmpeg's `silencedetect` diagnostic output for `silence_start` /
/// `silence_end` pairs. A point is only emitted when both sides appear, in
/// order — a trailing unmatched `silence_start` (silence running to EOF) is
/// dropped since there's no matching end to cut on.
pub fn parse_silence_points(diagnostic: &str) -> Vec<SilencePoint> {
    let mut points = Vec::new();
    let mut pending_start: Option<Duration> = None;

    for line in diagnostic.lines() {
        if let Some(caps) = SILENCE_START_RE.captures(line) {
            pending_start = Some(seconds_str_to_duration(&caps[1]));
        } else if let Some(caps) = SILENCE_END_RE.captures(line) {
            if let Some(start) = pending_start.take() {
                let end = seconds_str_to_duration(&caps[1]);
                if end > start {
                    points.push(SilencePoint { start, end });
                }
            }
        }
    }

    points
}

/// Parses the total media duration, preferring the `Duration: HH:MM:SS.frac`
/// header line and falling back to the last `time=HH:MM:SS.frac` progress
/// line if the header is absent.
pub fn parse_total_duration(diagnostic: &str) -> Option<Duration> {
    if let Some(caps) = DURATION_RE.captures(diagnostic) {
        return Some(hms_to_duration(&caps[1], &caps[2], &caps[3], &caps[4]));
    }

    TIME_PROGRESS_RE
        .captures_iter(diagnostic)
        .last()
        .map(|caps| hms_to_duration(&caps[1], &caps[2], &caps[3], &caps[4]))
}

/// Locates the `ffmpeg` binary on `PATH`. The absence of an on-disk config
/// store means this crate never pins/downloads a specific ffmpeg version —
/// that remains the acknowledged out-of-scope collaborator's job.
pub fn find_ffmpeg() -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    let exe_name = if cfg!(windows) { "ffmpeg.exe" } else { "ffmpeg" };

    std::env::split_paths(&path_var)
        .map(|dir| dir.join(exe_name))
        .find(|candidate| candidate.is_file())
}

fn fmt_secs(d: Duration) -> String {
    format!("{:.3}", d.as_secs_f64())
}

/// Builds the `silencedetect` probe arguments for a whole-file scan.
pub fn silence_detect_args(input: &Path, noise_threshold_db: f64, min_silence: Duration) -> Vec<String> {
    vec![
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
        "-af".to_string(),
        format!(
            "silencedetect=noise={}dB:d={}",
            noise_threshold_db,
            min_silence.as_secs_f64()
        ),
        "-f".to_string(),
        "null".to_string(),
        "-".to_string(),
    ]
}

/// Builds the stream-copy extraction arguments for `[start, end)` of
/// `input`, written to `output`. No re-encode — `-c copy`.
pub fn extract_segment_args(input: &Path, start: Duration, end: Duration, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-ss".to_string(),
        fmt_secs(start),
        "-to".to_string(),
        fmt_secs(end),
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
        "-c".to_string(),
        "copy".to_string(),
        output.to_string_lossy().into_owned(),
    ]
}
