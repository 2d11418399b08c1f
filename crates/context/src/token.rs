//! Model-aware token estimation (C1). Counts are an estimate, not an
//! exact match to any vendor's tokenizer — callers must treat them as
//! such when deciding whether a prompt fits a model's context window.

use aa_domain::config::ContextConfig;

/// Per-model-family heuristic. Token length varies with script and
/// formatting density, so different families get a different
/// chars-per-token divisor; everything else falls back to a generic
/// divisor from config (§9 open question: the source left this
/// unspecified, so the fallback is deterministic rather than guessed).
fn chars_per_token_for(model_id: Option<&str>, fallback: f64) -> f64 {
    let Some(model_id) = model_id else {
        return fallback;
    };
    let lower = model_id.to_ascii_lowercase();
    if lower.contains("gpt") || lower.contains("o1") || lower.contains("o3") {
        4.0
    } else if lower.contains("claude") {
        3.8
    } else if lower.contains("gemini") {
        4.2
    } else {
        fallback
    }
}

/// Count tokens for `text` under `model_id`. Unknown or absent model ids
/// fall back to `config.fallback_chars_per_token`.
pub fn count_tokens(text: &str, model_id: Option<&str>, config: &ContextConfig) -> u32 {
    if text.is_empty() {
        return 0;
    }
    let divisor = chars_per_token_for(model_id, config.fallback_chars_per_token);
    let chars = text.chars().count() as f64;
    (chars / divisor).ceil() as u32
}

/// `remaining_tokens = max(0, model_limit - prompt_tokens)`, used by the
/// Estimate Tokens inbound operation (§6) and turn startup.
pub fn remaining_tokens(prompt_tokens: u32, model_limit: Option<u32>) -> Option<u32> {
    model_limit.map(|limit| limit.saturating_sub(prompt_tokens))
}

/// `true` once usage crosses 90% of the model's context window.
pub fn near_limit(prompt_tokens: u32, model_limit: Option<u32>) -> bool {
    match model_limit {
        Some(limit) if limit > 0 => (prompt_tokens as f64 / limit as f64) >= 0.9,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_counts_zero() {
        let cfg = ContextConfig::default();
        assert_eq!(count_tokens("", Some("gpt-4o"), &cfg), 0);
    }

    #[test]
    fn known_family_uses_its_own_divisor() {
        let cfg = ContextConfig::default();
        let gpt = count_tokens(&"a".repeat(400), Some("gpt-4o"), &cfg);
        let claude = count_tokens(&"a".repeat(400), Some("claude-3-opus"), &cfg);
        assert_eq!(gpt, 100);
        assert!(claude > gpt);
    }

    #[test]
    fn unknown_model_uses_config_fallback() {
        let cfg = ContextConfig::default();
        let unknown = count_tokens(&"a".repeat(400), Some("some-local-model"), &cfg);
        let none = count_tokens(&"a".repeat(400), None, &cfg);
        assert_eq!(unknown, none);
    }

    #[test]
    fn remaining_tokens_never_negative() {
        assert_eq!(remaining_tokens(900, Some(1000)), Some(100));
        assert_eq!(remaining_tokens(1200, Some(1000)), Some(0));
        assert_eq!(remaining_tokens(10, None), None);
    }

    #[test]
    fn near_limit_trips_at_ninety_percent() {
        assert!(!near_limit(899, Some(1000)));
        assert!(near_limit(900, Some(1000)));
    }
}
