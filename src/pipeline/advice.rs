//! LLM-backed advice generator.
//!
//! Summarizes ledger history, asks the model for a short SMS-sized tip as
//! `{"advice": "..."}`, and refuses to return anything blank.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::GenerationError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::summary::SpendingSummary;
use crate::pipeline::types::{AdviceGenerator, AdvicePayload, CategorizedTransaction, LedgerRef};

/// Field the model must populate.
const ADVICE_FIELD: &str = "advice";

/// Soft cap on advice length (a couple of SMS segments).
const ADVICE_MAX_CHARS: usize = 320;

const ADVICE_MAX_TOKENS: u32 = 400;

const ADVICE_TEMPERATURE: f32 = 0.4;

pub struct LlmAdviceGenerator {
    llm: Arc<dyn LlmProvider>,
}

impl LlmAdviceGenerator {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl AdviceGenerator for LlmAdviceGenerator {
    async fn generate(
        &self,
        history: &[CategorizedTransaction],
        ledger: &LedgerRef,
    ) -> Result<AdvicePayload, GenerationError> {
        if history.is_empty() {
            return Err(GenerationError::EmptyHistory);
        }

        let summary = SpendingSummary::from_history(history);
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_advice_system_prompt()),
            ChatMessage::user(build_advice_user_prompt(&summary, ledger)),
        ])
        .with_temperature(ADVICE_TEMPERATURE)
        .with_max_tokens(ADVICE_MAX_TOKENS)
        .with_json_output();

        debug!(model = self.llm.model_name(), transactions = history.len(), "Requesting advice");
        let response = self.llm.complete(request).await?;

        let advice = parse_advice_response(&response.content).inspect_err(|e| {
            warn!(raw_response = %response.content, error = %e, "Unusable advice response");
        })?;

        info!(chars = advice.advice().chars().count(), "Advice generated");
        Ok(advice)
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_advice_system_prompt() -> String {
    format!(
        "You are a personal finance advisor. You receive a summary of someone's \
         categorized bank transactions and reply with one short, concrete, \
         encouraging piece of advice they can act on this week.\n\n\
         Respond with ONLY a JSON object:\n\
         {{\"{ADVICE_FIELD}\": \"...\"}}\n\n\
         Rules:\n\
         - Plain text, no markdown, no emoji\n\
         - At most {ADVICE_MAX_CHARS} characters\n\
         - Reference real categories or amounts from the summary\n\
         - Never invent transactions that are not in the summary"
    )
}

fn build_advice_user_prompt(summary: &SpendingSummary, ledger: &LedgerRef) -> String {
    format!(
        "Ledger: {}\n\n{}",
        ledger.collection,
        summary.to_prompt_text()
    )
}

// ── Response parsing ────────────────────────────────────────────────

/// Parse the model output into an `AdvicePayload`.
fn parse_advice_response(raw: &str) -> Result<AdvicePayload, GenerationError> {
    let json_str = extract_json_object(raw);
    let value: serde_json::Value = serde_json::from_str(&json_str)
        .map_err(|e| GenerationError::Malformed(format!("JSON parse error: {e}")))?;

    let Some(object) = value.as_object() else {
        return Err(GenerationError::Malformed("expected a JSON object".into()));
    };
    let advice = match object.get(ADVICE_FIELD) {
        Some(serde_json::Value::String(s)) => s,
        Some(other) => {
            return Err(GenerationError::Malformed(format!(
                "'{ADVICE_FIELD}' must be a string, got {other}"
            )));
        }
        None => return Err(GenerationError::MissingField(ADVICE_FIELD.into())),
    };

    AdvicePayload::new(advice.as_str())
}

/// Extract a JSON object from LLM output (handles markdown wrapping).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}
