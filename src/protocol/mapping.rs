use super::canonical::Role;
use crate::stream::part::{FinishReason, Usage};

// ---------------------------------------------------------------------------
// Role mappings
// ---------------------------------------------------------------------------

#[must_use]
pub fn openai_role_to_canonical(s: &str) -> Role {
    match s {
        "system" | "developer" => Role::System,
        "user" => Role::User,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        other => Role::Other(other.to_string()),
    }
}

/// Anthropic only knows `user` and `assistant`; system text travels separately.
#[must_use]
pub fn canonical_role_to_anthropic(role: &Role) -> Option<&'static str> {
    match role {
        Role::User => Some("user"),
        Role::Assistant => Some("assistant"),
        Role::System | Role::Tool | Role::Other(_) => None,
    }
}

#[must_use]
pub fn anthropic_role_to_canonical(s: &str) -> Role {
    match s {
        "assistant" => Role::Assistant,
        "user" => Role::User,
        other => Role::Other(other.to_string()),
    }
}

/// Gemini calls the assistant `model`. Tool results travel as `function` content.
#[must_use]
pub fn canonical_role_to_gemini(role: &Role) -> Option<&'static str> {
    match role {
        Role::User => Some("user"),
        Role::Assistant => Some("model"),
        Role::Tool => Some("function"),
        Role::System | Role::Other(_) => None,
    }
}

#[must_use]
pub fn gemini_role_to_canonical(s: &str) -> Role {
    match s {
        "model" => Role::Assistant,
        "function" => Role::Tool,
        "user" | "" => Role::User,
        other => Role::Other(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Finish reason mappings
// ---------------------------------------------------------------------------

#[must_use]
pub fn openai_finish_to_canonical(s: &str) -> FinishReason {
    match s {
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "length" => FinishReason::Length,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

#[must_use]
pub fn anthropic_stop_to_canonical(s: &str) -> FinishReason {
    match s {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolCalls,
        _ => FinishReason::Other,
    }
}

#[must_use]
pub fn gemini_finish_to_canonical(s: &str) -> FinishReason {
    match s {
        "STOP" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "RECITATION" => FinishReason::ContentFilter,
        "FINISH_REASON_UNSPECIFIED" | "UNSPECIFIED" => FinishReason::Unknown,
        _ => FinishReason::Other,
    }
}

// ---------------------------------------------------------------------------
// Usage mappings
// ---------------------------------------------------------------------------

/// Vendors report counts as unsigned integers; anything past `i64::MAX` is dropped.
#[must_use]
pub fn usage_from_counts(prompt: Option<u64>, completion: Option<u64>) -> Usage {
    Usage::new(
        prompt.and_then(|n| i64::try_from(n).ok()),
        completion.and_then(|n| i64::try_from(n).ok()),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
