//! Thin wrapper around spawning `ffmpeg` subprocesses.
//!
//! Grounded on `audio/import.rs::decode_audio_to_f32`'s `std::process::Command`
//! spawn-and-capture pattern, lifted onto `tokio::process::Command` so the
//! graceful-stop path can race the child against a cancellation signal
//! without blocking the async executor.

mod runner;

pub use runner::{run_captured, run_graceful, GracefulOutcome};
