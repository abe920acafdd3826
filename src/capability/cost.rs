//! Token and cost heuristics shared by the executor and the estimator.

use async_trait::async_trait;

use super::{Complexity, CostEstimate, CostEstimator};
use crate::errors::CapabilityError;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

/// Approximate characters per token for Claude models.
pub const CHARS_PER_TOKEN: usize = 4;

/// Per-1K-token prices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
}

impl ModelPricing {
    /// Pricing for `model`; unknown models are billed as the default.
    pub fn for_model(model: &str) -> Self {
        match model {
            "claude-opus-4" => ModelPricing {
                input: 0.015,
                output: 0.075,
            },
            _ => ModelPricing {
                input: 0.003,
                output: 0.015,
            },
        }
    }

    /// Cost of `tokens` assuming an even input/output split.
    pub fn cost(&self, tokens: u64) -> f64 {
        (tokens as f64 / 1000.0) * ((self.input + self.output) / 2.0)
    }
}

pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() / CHARS_PER_TOKEN) as u64
}

/// Estimates from prompt length alone; never calls out.
#[derive(Debug, Clone)]
pub struct HeuristicCostEstimator {
    model: String,
    pricing: ModelPricing,
}

impl HeuristicCostEstimator {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            pricing: ModelPricing::for_model(model),
        }
    }
}

impl Default for HeuristicCostEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL)
    }
}

#[async_trait]
impl CostEstimator for HeuristicCostEstimator {
    async fn estimate(&self, prompt: &str, complexity: Complexity) -> Result<CostEstimate, CapabilityError> {
        let prompt_tokens = estimate_tokens(prompt);
        let completion_tokens = prompt_tokens * complexity.multiplier();
        let total = prompt_tokens + completion_tokens;

        Ok(CostEstimate {
            estimated_cost: self.pricing.cost(total),
            model: self.model.clone(),
            token_estimate: total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_chars_over_four() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 0);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
    }

    #[test]
    fn sonnet_cost_per_thousand_tokens() {
        let pricing = ModelPricing::for_model(DEFAULT_MODEL);
        assert!((pricing.cost(1000) - 0.009).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_uses_default_pricing() {
        assert_eq!(
            ModelPricing::for_model("mystery"),
            ModelPricing::for_model(DEFAULT_MODEL)
        );
        assert!((ModelPricing::for_model("claude-opus-4").cost(1000) - 0.045).abs() < 1e-9);
    }

    #[tokio::test]
    async fn high_complexity_multiplies_completion() {
        let estimator = HeuristicCostEstimator::default();
        let prompt = "x".repeat(400);

        let low = estimator.estimate(&prompt, Complexity::Low).await.unwrap();
        let high = estimator.estimate(&prompt, Complexity::High).await.unwrap();

        assert_eq!(low.token_estimate, 100 + 200);
        assert_eq!(high.token_estimate, 100 + 800);
        assert!(high.estimated_cost > low.estimated_cost);
        assert_eq!(high.model, DEFAULT_MODEL);
    }
}
