//! Wraps the remote speech-to-text call and fans it out across chunks with
//! bounded concurrency.

pub mod dispatcher;
pub mod transcriber;

pub use dispatcher::transcribe_all;
pub use transcriber::{HttpSpeechToText, SpeechToText, SttResponse, SttSegment, TranscribeOptions};
