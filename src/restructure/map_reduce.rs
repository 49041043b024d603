//! Splits long transcripts at paragraph boundaries, restructures each part
//! with a part-aware prompt, and merges the outputs with a reduce prompt.
//!
//! The map phase runs sequentially — a plain `for` loop with a running
//! counter emitted through a progress callback, no concurrency.

use anyhow::{Context, Result};
use tracing::info;

use crate::error::PipelineError;
use crate::retry::RetryConfig;

use super::restructurer::{self, estimate_tokens, LanguageModel, RestructureConfig};
use super::templates::TemplateRegistry;

pub const DEFAULT_MAX_MAP_TOKENS: usize = 80_000;
const PARAGRAPH_DELIMITER: &str = "\n\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptChunk {
    pub content: String,
    pub index: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPhase {
    Map,
    Reduce,
}

#[derive(Debug, Clone, Copy)]
pub struct ProgressEvent {
    pub phase: ProgressPhase,
    pub current: usize,
    pub total: usize,
}

#[derive(Debug, Clone)]
pub struct RestructureOutcome {
    pub markdown: String,
    pub used_map_reduce: bool,
}

/// Splits `transcript` into paragraph-aligned chunks of at most
/// `max_tokens` estimated tokens each.
///
/// Returns `None` when the transcript already fits in a single chunk, is
/// empty, or the split degenerates to fewer than two chunks — all three
/// cases delegate to the single-shot restructurer.
pub fn split_transcript(transcript: &str, max_tokens: usize) -> Option<Vec<TranscriptChunk>> {
    if transcript.is_empty() || estimate_tokens(transcript) <= max_tokens {
        return None;
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for paragraph in transcript.split(PARAGRAPH_DELIMITER) {
        let candidate_len = if current.is_empty() {
            estimate_tokens(paragraph)
        } else {
            estimate_tokens(&current) + estimate_tokens(PARAGRAPH_DELIMITER) + estimate_tokens(paragraph)
        };

        if !current.is_empty() && candidate_len > max_tokens {
            chunks.push(std::mem::take(&mut current));
        }

        if !current.is_empty() {
            current.push_str(PARAGRAPH_DELIMITER);
        }
        current.push_str(paragraph);
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    if chunks.len() < 2 {
        return None;
    }

    let total = chunks.len();
    Some(
        chunks
            .into_iter()
            .enumerate()
            .map(|(index, content)| TranscriptChunk { content, index, total })
            .collect(),
    )
}

/// Restructures `transcript` per `template_name`, recursing into a
/// map-reduce fan-out when the transcript exceeds `max_map_tokens`
/// estimated tokens. `on_progress` is invoked once per map call and once
/// for the reduce call.
#[allow(clippy::too_many_arguments)]
pub async fn restructure_map_reduce(
    llm: &dyn LanguageModel,
    registry: &dyn TemplateRegistry,
    retry_cfg: &RetryConfig,
    restructure_cfg: &RestructureConfig,
    transcript: &str,
    template_name: &str,
    output_language: &str,
    max_map_tokens: usize,
    mut on_progress: impl FnMut(ProgressEvent),
) -> Result<RestructureOutcome> {
    let Some(chunks) = split_transcript(transcript, max_map_tokens) else {
        let markdown = restructurer::restructure(
            llm,
            registry,
            retry_cfg,
            restructure_cfg,
            transcript,
            template_name,
            output_language,
        )
        .await?;
        return Ok(RestructureOutcome { markdown, used_map_reduce: false });
    };

    let base_prompt = registry.resolve(template_name).map_err(anyhow::Error::from)?;
    let total = chunks.len();
    let mut map_outputs = Vec::with_capacity(total);

    for chunk in &chunks {
        let part_prompt = restructurer::part_aware_template(&base_prompt, chunk.index, chunk.total);
        let system_prompt = apply_language_prefix(&part_prompt, template_name, output_language);

        let output = retry_against_budget(
            llm,
            retry_cfg,
            restructure_cfg,
            &system_prompt,
            &chunk.content,
        )
        .await
        .with_context(|| format!("failed to process chunk {}", chunk.index))?;

        map_outputs.push(output);
        info!(current = chunk.index + 1, total, "map phase chunk restructured");
        on_progress(ProgressEvent { phase: ProgressPhase::Map, current: chunk.index + 1, total });
    }

    let reduce_input = render_parts(&map_outputs);
    let reduce_system_prompt = build_reduce_prompt(&base_prompt, template_name, output_language);

    let merged = retry_against_budget(
        llm,
        retry_cfg,
        restructure_cfg,
        &reduce_system_prompt,
        &reduce_input,
    )
    .await
    .context("failed to merge chunks")?;

    on_progress(ProgressEvent { phase: ProgressPhase::Reduce, current: 1, total: 1 });

    Ok(RestructureOutcome { markdown: merged, used_map_reduce: true })
}

/// Runs a single restructure-style LLM call behind the same retry/transient
/// rules as the single-shot restructurer, without re-resolving the
/// template (map/reduce prompts are already fully built strings).
async fn retry_against_budget(
    llm: &dyn LanguageModel,
    retry_cfg: &RetryConfig,
    restructure_cfg: &RestructureConfig,
    system_prompt: &str,
    user_content: &str,
) -> Result<String> {
    let estimated = estimate_tokens(user_content);
    if estimated > restructure_cfg.max_estimated_tokens {
        return Err(PipelineError::TranscriptTooLong(estimated).into());
    }

    crate::retry::retry_with_backoff(
        retry_cfg,
        |_attempt| llm.complete(system_prompt, user_content),
        restructurer::is_transient,
    )
    .await
}

fn apply_language_prefix(prompt: &str, template_name: &str, output_language: &str) -> String {
    // Reuses the single-shot restructurer's language-prefix rule, which
    // applies to each map call the same as it does to a single-shot call.
    // `build_system_prompt` re-resolves the template by name, which would
    // discard the part-aware directive already folded into `prompt`, so the
    // prefix is computed against a registry that hands the caller's prompt
    // straight back.
    struct PassThrough<'a>(&'a str);
    impl<'a> TemplateRegistry for PassThrough<'a> {
        fn resolve(&self, _name: &str) -> Result<String, PipelineError> {
            Ok(self.0.to_string())
        }
    }
    restructurer::build_system_prompt(&PassThrough(prompt), template_name, output_language)
        .expect("pass-through registry never fails to resolve")
}

fn build_reduce_prompt(base_prompt: &str, template_name: &str, output_language: &str) -> String {
    let reduce_directive = format!(
        "{base}\n\nYou are merging {n_parts_note}restructured parts of a single transcript into one \
coherent markdown document, each delimited by a \"=== PART N ===\" marker below. Merge duplicated \
headings, ensure a single top-level title, preserve the original ordering of parts, and keep all \
content from every part.",
        base = base_prompt,
        n_parts_note = "",
    );
    apply_language_prefix(&reduce_directive, template_name, output_language)
}

/// Renders map outputs as `=== PART N ===` blocks for the reduce call,
/// one-indexed.
fn render_parts(outputs: &[String]) -> String {
    outputs
        .iter()
        .enumerate()
        .map(|(i, output)| format!("=== PART {} ===\n{}", i + 1, output))
        .collect::<Vec<_>>()
        .join("\n\n")
}
