//! Prompt assembly for retrieval-grounded research answers.

use super::types::SearchResult;
use crate::provider::Message;
use serde::{Deserialize, Serialize};

/// Returned when the model produces no text.
pub const EMPTY_ANALYSIS: &str = "Research complete; no relevant information was found.";

/// Title reported for sources without one.
pub const UNKNOWN_SOURCE: &str = "Unknown source";

const SYSTEM_PROMPT: &str =
    "You are a professional research analyst who specializes in in-depth analysis and synthesis.";

const NO_CONTEXT: &str = "(No relevant knowledge base material found)";

/// An analysis grounded in retrieved documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchReport {
    pub analysis: String,
    pub sources: Vec<ResearchSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchSource {
    pub title: String,
    pub similarity: f32,
}

impl From<&SearchResult> for ResearchSource {
    fn from(result: &SearchResult) -> Self {
        Self {
            title: result
                .metadata
                .title
                .clone()
                .unwrap_or_else(|| UNKNOWN_SOURCE.to_string()),
            similarity: result.similarity,
        }
    }
}

/// Renders retrieved excerpts, each tagged with its similarity.
pub fn format_context(results: &[SearchResult]) -> String {
    results
        .iter()
        .map(|r| format!("[similarity: {:.2}]\n{}", r.similarity, r.content))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// Builds the system and user messages for a research request.
pub fn build_messages(query: &str, results: &[SearchResult]) -> Vec<Message> {
    let context = format_context(results);
    let context = if context.is_empty() {
        NO_CONTEXT
    } else {
        context.as_str()
    };

    let prompt = format!(
        "Analyze the user's question in depth using the knowledge base material below.\n\n\
         Knowledge base material:\n{context}\n\n\
         User question: {query}\n\n\
         Work through it step by step:\n\
         1. Identify the core points of the question\n\
         2. Extract the relevant information from the knowledge base\n\
         3. Combine and reason over what you found\n\
         4. Give a detailed conclusion\n\
         5. State clearly anything you are unsure of\n\n\
         Answer thoroughly and professionally."
    );

    vec![Message::system(SYSTEM_PROMPT), Message::user(prompt)]
}

/// Assembles the final report from the model output and the sources used.
pub fn into_report(analysis: String, results: &[SearchResult]) -> ResearchReport {
    let analysis = if analysis.trim().is_empty() {
        EMPTY_ANALYSIS.to_string()
    } else {
        analysis
    };

    ResearchReport {
        analysis,
        sources: results.iter().map(ResearchSource::from).collect(),
    }
}
