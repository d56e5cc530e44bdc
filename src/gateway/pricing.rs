//! Model pricing registry.
//!
//! Costs are in nanodollars (1e-9 USD) per token.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Pricing information for a model.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    /// Cost per input token in nanodollars.
    pub input_nanos_per_token: i64,
    /// Cost per output token in nanodollars.
    pub output_nanos_per_token: i64,
}

impl ModelPricing {
    const fn new(input: i64, output: i64) -> Self {
        Self {
            input_nanos_per_token: input,
            output_nanos_per_token: output,
        }
    }

    /// Calculate cost for a request.
    pub fn calculate_cost(&self, input_tokens: u32, output_tokens: u32) -> i64 {
        (input_tokens as i64) * self.input_nanos_per_token
            + (output_tokens as i64) * self.output_nanos_per_token
    }
}

// =============================================================================
// PRICING DATA
// =============================================================================

// OpenRouter list prices (verify periodically against model pages)
// GPT-4o-mini: $0.15/1M input, $0.60/1M output
// GPT-3.5 Turbo 1106: $1.00/1M input, $2.00/1M output
// DeepSeek Chat / Coder: $0.14/1M input, $0.28/1M output
// Claude 3.5 Haiku: $0.80/1M input, $4.00/1M output

const GPT_4O_MINI: ModelPricing = ModelPricing::new(150, 600);
const GPT_35_TURBO: ModelPricing = ModelPricing::new(1_000, 2_000);
const GPT_5_MINI: ModelPricing = ModelPricing::new(250, 2_000);
const DEEPSEEK_CHAT: ModelPricing = ModelPricing::new(140, 280);
const CLAUDE_35_HAIKU: ModelPricing = ModelPricing::new(800, 4_000);

/// Used when a model is missing from the registry.
const UNKNOWN_MODEL: ModelPricing = ModelPricing::new(1_000, 5_000);

static PRICING_MAP: OnceLock<HashMap<&'static str, ModelPricing>> = OnceLock::new();

fn init_pricing() -> HashMap<&'static str, ModelPricing> {
    let mut map = HashMap::new();

    map.insert("openai/gpt-4o-mini", GPT_4O_MINI);
    map.insert("openai/gpt-4o-mini-2024-07-18", GPT_4O_MINI);
    map.insert("openai/gpt-3.5-turbo", GPT_35_TURBO);
    map.insert("openai/gpt-3.5-turbo-1106", GPT_35_TURBO);
    map.insert("openai/gpt-5-mini", GPT_5_MINI);
    map.insert("deepseek/deepseek-chat", DEEPSEEK_CHAT);
    map.insert("deepseek/deepseek-coder", DEEPSEEK_CHAT);
    map.insert("anthropic/claude-3-5-haiku", CLAUDE_35_HAIKU);

    map
}

/// Get pricing for a model.
pub fn get_pricing(model_id: &str) -> Option<ModelPricing> {
    let map = PRICING_MAP.get_or_init(init_pricing);
    map.get(model_id).copied()
}

/// Calculate chat cost, falling back to a mid-range price for unknown models.
pub fn chat_cost(model: &str, input_tokens: u32, output_tokens: u32) -> i64 {
    get_pricing(model)
        .unwrap_or(UNKNOWN_MODEL)
        .calculate_cost(input_tokens, output_tokens)
}

pub fn nanodollars_to_usd(nanos: i64) -> f64 {
    nanos as f64 / 1_000_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_cost() {
        // 1K input + 1K output for GPT-4o-mini
        // Input: 1000 * 150 = 150,000 nanos
        // Output: 1000 * 600 = 600,000 nanos
        let cost = chat_cost("openai/gpt-4o-mini", 1_000, 1_000);
        assert_eq!(cost, 750_000);
    }

    #[test]
    fn test_unknown_model_uses_fallback() {
        let cost = chat_cost("someone/new-model", 1, 1);
        assert_eq!(cost, 6_000);
    }

    #[test]
    fn test_nanodollars_to_usd() {
        assert!((nanodollars_to_usd(2_500_000_000) - 2.5).abs() < 1e-12);
    }
}
