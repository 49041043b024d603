//! Compiled-in prompt templates and the locale display-name map.
//!
//! These templates are immutable, build-time data rather than user-editable
//! JSON on disk — template text is compiled into the binary via
//! `Lazy<HashMap<..>>`, and updating a template requires a rebuild. The
//! lookup itself still goes through a small trait so tests can substitute
//! their own registry.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::error::PipelineError;

const BRAINSTORM_PROMPT: &str = "\
You are restructuring a raw transcript of a brainstorming session into a \
structured markdown document. Produce a single top-level heading, then group \
ideas under clear subheadings, preserving attribution to speakers where the \
transcript marks them. Capture decisions and follow-up action items in a \
dedicated section at the end.";

const MEETING_PROMPT: &str = "\
You are restructuring a raw transcript of a meeting into structured markdown \
meeting minutes. Produce a single top-level heading with the meeting topic, \
an attendees section if speakers are identifiable, a discussion section \
organized by topic, and a closing action-items section with owners where \
stated.";

const LECTURE_PROMPT: &str = "\
You are restructuring a raw transcript of a lecture into structured markdown \
notes. Produce a single top-level heading with the lecture's subject, then \
organize the body into sections following the natural progression of topics \
covered, preserving key definitions, examples, and any stated conclusions.";

/// Names recognised by [`TemplateRegistry::resolve`]. Case-sensitive —
/// `"Meeting"` is not `"meeting"`.
pub const KNOWN_TEMPLATE_NAMES: &[&str] = &["brainstorm", "meeting", "lecture"];

/// Resolves a template name to its compiled-in prompt body. A trait rather
/// than a bare function so tests can inject a fake registry without
/// depending on the real prompt text.
pub trait TemplateRegistry: Send + Sync {
    fn resolve(&self, name: &str) -> Result<String, PipelineError>;
}

pub struct CompiledTemplates;

impl TemplateRegistry for CompiledTemplates {
    fn resolve(&self, name: &str) -> Result<String, PipelineError> {
        match name {
            "brainstorm" => Ok(BRAINSTORM_PROMPT.to_string()),
            "meeting" => Ok(MEETING_PROMPT.to_string()),
            "lecture" => Ok(LECTURE_PROMPT.to_string()),
            other => Err(PipelineError::UnknownTemplate(other.to_string())),
        }
    }
}

/// The "native language" each template ships its instructions in. All three
/// compiled templates are authored in English; if a caller asks for English
/// output no language prefix is needed.
pub fn template_native_language(_name: &str) -> &'static str {
    "en"
}

static DISPLAY_NAMES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("en", "English"),
        ("es", "Spanish"),
        ("fr", "French"),
        ("de", "German"),
        ("it", "Italian"),
        ("pt", "Portuguese"),
        ("nl", "Dutch"),
        ("ja", "Japanese"),
        ("zh", "Chinese"),
        ("ko", "Korean"),
        ("ru", "Russian"),
        ("ar", "Arabic"),
        ("hi", "Hindi"),
    ])
});

/// Resolves a language code to a display name for the "Respond in
/// <language>." prefix. Strips a `-XX` region suffix and falls back to the
/// base code verbatim when it isn't in the fixed locale map.
pub fn display_name(code: &str) -> String {
    let lower = code.to_lowercase();
    let base = lower.split('-').next().unwrap_or(&lower);
    DISPLAY_NAMES.get(base).map(|s| s.to_string()).unwrap_or_else(|| base.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_templates() {
        let registry = CompiledTemplates;
        assert!(registry.resolve("brainstorm").is_ok());
        assert!(registry.resolve("meeting").is_ok());
        assert!(registry.resolve("lecture").is_ok());
    }

    #[test]
    fn unknown_template_is_tagged() {
        let registry = CompiledTemplates;
        let err = registry.resolve("Meeting").unwrap_err();
        assert!(matches!(err, PipelineError::UnknownTemplate(name) if name == "Meeting"));
    }

    #[test]
    fn display_name_maps_known_codes_and_strips_region() {
        assert_eq!(display_name("es-MX"), "Spanish");
        assert_eq!(display_name("EN"), "English");
    }

    #[test]
    fn display_name_passes_through_unknown_codes() {
        assert_eq!(display_name("xx"), "xx");
    }
}
