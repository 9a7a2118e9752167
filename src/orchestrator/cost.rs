//! Static per-model cost table (§4.11) — derives a turn's dollar cost
//! from its reported input/output token counts. Rates are USD per
//! million tokens; unknown models fall back to a conservative default
//! rather than silently reporting zero cost.

struct ModelRate {
    prefix: &'static str,
    input_per_million: f64,
    output_per_million: f64,
}

const RATES: &[ModelRate] = &[
    ModelRate { prefix: "claude-opus", input_per_million: 15.0, output_per_million: 75.0 },
    ModelRate { prefix: "claude-sonnet", input_per_million: 3.0, output_per_million: 15.0 },
    ModelRate { prefix: "claude-haiku", input_per_million: 0.8, output_per_million: 4.0 },
    ModelRate { prefix: "gpt-4o-mini", input_per_million: 0.15, output_per_million: 0.6 },
    ModelRate { prefix: "gpt-4o", input_per_million: 2.5, output_per_million: 10.0 },
    ModelRate { prefix: "gpt-4", input_per_million: 30.0, output_per_million: 60.0 },
    ModelRate { prefix: "gemini-1.5-flash", input_per_million: 0.075, output_per_million: 0.3 },
    ModelRate { prefix: "gemini", input_per_million: 1.25, output_per_million: 5.0 },
];

const DEFAULT_RATE: ModelRate = ModelRate { prefix: "", input_per_million: 3.0, output_per_million: 15.0 };

/// Estimated USD cost of one turn given the model name and its token
/// counts. Matches by model-name prefix so date-suffixed model ids
/// (`claude-sonnet-4-20250514`) still resolve.
pub fn estimate_cost(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    let rate = RATES
        .iter()
        .find(|r| model.starts_with(r.prefix))
        .unwrap_or(&DEFAULT_RATE);
    (input_tokens as f64 / 1_000_000.0) * rate.input_per_million
        + (output_tokens as f64 / 1_000_000.0) * rate.output_per_million
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_uses_its_own_rate() {
        let cost = estimate_cost("claude-sonnet-4-20250514", 1_000_000, 0);
        assert!((cost - 3.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_falls_back_to_default_rate() {
        let cost = estimate_cost("some-future-model-9000", 1_000_000, 1_000_000);
        assert!((cost - 18.0).abs() < 1e-9);
    }

    #[test]
    fn zero_tokens_cost_nothing() {
        assert_eq!(estimate_cost("claude-opus-4", 0, 0), 0.0);
    }
}
