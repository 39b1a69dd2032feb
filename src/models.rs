//! Static lookup tables shared by the translator and the streaming
//! transcoder: model name aliasing and upstream stop-reason mapping.

/// Resolve an OpenAI-style model name to the upstream Anthropic model id.
/// Names already in upstream form, and any name not recognized, pass
/// through unchanged — resolution is idempotent.
pub fn resolve_model(name: &str) -> String {
    match name {
        "claude-3-5-sonnet-20241022"
        | "claude-3-5-haiku-20241022"
        | "claude-3-opus-20240229"
        | "claude-3-sonnet-20240229"
        | "claude-3-haiku-20240307" => name.to_string(),
        "claude-sonnet-4" => "claude-sonnet-4-20250514".to_string(),
        "claude-3.5-sonnet" => "claude-3-5-sonnet-20241022".to_string(),
        "claude-3.5-haiku" => "claude-3-5-haiku-20241022".to_string(),
        "claude-opus-4" => "claude-opus-4-20250514".to_string(),
        "claude-sonnet" => "claude-sonnet-4-20250514".to_string(),
        "claude-opus" => "claude-opus-4-20250514".to_string(),
        other => other.to_string(),
    }
}

/// Map an Anthropic `stop_reason` to an OpenAI-style `finish_reason`.
///
/// `pause_turn` and `refusal` are not represented explicitly upstream and
/// fall through to `stop`, matching the table this was distilled from.
pub fn finish_reason(stop_reason: &str) -> &'static str {
    match stop_reason {
        "end_turn" => "stop",
        "max_tokens" => "length",
        "stop_sequence" => "stop",
        "tool_use" => "tool_calls",
        _ => "stop",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_aliases() {
        assert_eq!(resolve_model("claude-sonnet-4"), "claude-sonnet-4-20250514");
        assert_eq!(resolve_model("claude-opus"), "claude-opus-4-20250514");
    }

    #[test]
    fn resolution_is_idempotent() {
        let resolved = resolve_model("claude-sonnet-4");
        assert_eq!(resolve_model(&resolved), resolved);
    }

    #[test]
    fn unknown_model_passes_through() {
        assert_eq!(resolve_model("some-future-model"), "some-future-model");
    }

    #[test]
    fn finish_reason_mapping_matches_table() {
        assert_eq!(finish_reason("end_turn"), "stop");
        assert_eq!(finish_reason("max_tokens"), "length");
        assert_eq!(finish_reason("stop_sequence"), "stop");
        assert_eq!(finish_reason("tool_use"), "tool_calls");
        assert_eq!(finish_reason("pause_turn"), "stop");
        assert_eq!(finish_reason("refusal"), "stop");
    }
}
