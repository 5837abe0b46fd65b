//! Conversation context budgeting.
//!
//! Long conversations are compacted once the estimated prompt reaches
//! `SUMMARY_TRIGGER_TOKENS`: the most recent turns stay verbatim and the
//! rest is summarised into the system prompt.

use orchestra_core::{
    text::{estimate_tokens, preview},
    traits::{ChatMessage, ChatRequest, LlmClient, Role},
};

pub const SUMMARY_TRIGGER_TOKENS: usize = 150_000;
/// Hard ceiling for system prompt plus history.
pub const CONTEXT_BUDGET_TOKENS: usize = 180_000;
pub const KEEP_RECENT_MESSAGES: usize = 6;
pub const SUMMARY_HEADER: &str = "## Conversation History Summary";

const SUMMARY_PROMPT: &str = "Summarize the conversation below for an assistant that will continue it. \
Use these sections: Key facts, Decisions made, Open questions, User preferences. \
Be concise and keep names, numbers and identifiers exact.";

/// Characters kept per message in the fallback summary.
const FALLBACK_SNIPPET_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct ContextManager {
    trigger_tokens: usize,
    budget_tokens: usize,
    keep_recent: usize,
}

impl Default for ContextManager {
    fn default() -> Self {
        Self {
            trigger_tokens: SUMMARY_TRIGGER_TOKENS,
            budget_tokens: CONTEXT_BUDGET_TOKENS,
            keep_recent: KEEP_RECENT_MESSAGES,
        }
    }
}

/// Prompt after budgeting.
#[derive(Debug, Clone)]
pub struct PreparedContext {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub summarized: bool,
}

fn message_tokens(messages: &[ChatMessage]) -> usize {
    messages.iter().map(|m| estimate_tokens(&m.content)).sum()
}

fn transcript(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{:?}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn fallback_summary(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
        .map(|m| format!("- {:?}: {}", m.role, preview(&m.content, FALLBACK_SNIPPET_CHARS)))
        .collect::<Vec<_>>()
        .join("\n")
}

impl ContextManager {
    pub fn new(trigger_tokens: usize, budget_tokens: usize, keep_recent: usize) -> Self {
        Self {
            trigger_tokens,
            budget_tokens,
            keep_recent,
        }
    }

    pub fn estimate(&self, system_prompt: &str, messages: &[ChatMessage]) -> usize {
        estimate_tokens(system_prompt) + message_tokens(messages)
    }

    pub fn needs_summary(&self, system_prompt: &str, messages: &[ChatMessage]) -> bool {
        self.estimate(system_prompt, messages) >= self.trigger_tokens
    }

    /// Compact `messages` if needed, summarising with `client`/`model`.
    /// A failed summary call falls back to a plain concatenation.
    pub async fn prepare(
        &self,
        client: &dyn LlmClient,
        model: &str,
        system_prompt: &str,
        messages: Vec<ChatMessage>,
    ) -> PreparedContext {
        if !self.needs_summary(system_prompt, &messages) || messages.len() <= self.keep_recent {
            return PreparedContext {
                system_prompt: system_prompt.to_string(),
                messages,
                summarized: false,
            };
        }

        let split = messages.len() - self.keep_recent;
        let mut messages = messages;
        let recent = messages.split_off(split);
        let older = messages;

        let request = ChatRequest::new(
            model,
            vec![
                ChatMessage::system(SUMMARY_PROMPT),
                ChatMessage::user(transcript(&older)),
            ],
        );
        let summary = match client.chat(&request).await {
            Ok(resp) if !resp.content.trim().is_empty() => resp.content,
            Ok(_) => fallback_summary(&older),
            Err(e) => {
                tracing::warn!(error = %e, "Context summary failed, using fallback");
                fallback_summary(&older)
            }
        };

        let system_prompt = format!("{}\n\n{}\n{}", system_prompt, SUMMARY_HEADER, summary);
        let mut recent = recent;
        while recent.len() > 1 && self.estimate(&system_prompt, &recent) > self.budget_tokens {
            recent.remove(0);
        }

        tracing::info!(
            summarized_messages = older.len(),
            kept_messages = recent.len(),
            "Compacted conversation context"
        );
        PreparedContext {
            system_prompt,
            messages: recent,
            summarized: true,
        }
    }
}
