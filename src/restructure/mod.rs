//! Applies a template prompt to a transcript via a remote language-model
//! call, recursing into a map-reduce fan-out when the transcript is too
//! long for one call.

pub mod map_reduce;
pub mod restructurer;
pub mod templates;

pub use map_reduce::{restructure_map_reduce, ProgressEvent, ProgressPhase, RestructureOutcome, TranscriptChunk};
pub use restructurer::{estimate_tokens, HttpLanguageModel, LanguageModel, RestructureConfig};
pub use templates::{CompiledTemplates, TemplateRegistry};
