//! Offline batch transcription pipeline: splits a long audio file into
//! size-bounded chunks, transcribes them in parallel against a remote
//! speech-to-text service, and optionally restructures the result into a
//! template-shaped markdown document via a remote language model.
//!
//! Audio capture, the binary's own argument parser, and the on-disk
//! configuration store are acknowledged external collaborators; this crate
//! implements the batch pipeline core only.

pub mod audio;
pub mod error;
pub mod interrupt;
pub mod pipeline;
pub mod restructure;
pub mod retry;
pub mod subprocess;
pub mod transcribe;
