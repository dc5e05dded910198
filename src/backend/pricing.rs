//! Illustrative per-backend pricing
//!
//! Prices are approximations of public list prices and are not a billing
//! model. Cost is a pure function of reported usage.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{keys, metadata_f64, metadata_u64, Metadata};

/// How a metered backend charges for one call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PricingRule {
    /// Prompt and completion tokens priced per million
    PerToken {
        input_per_million: f64,
        output_per_million: f64,
    },
    /// Flat price per processed image
    PerImage { usd: f64 },
}

impl PricingRule {
    /// Cost of one call given its reported usage
    pub fn cost(&self, metadata: &Metadata) -> f64 {
        match *self {
            PricingRule::PerToken {
                input_per_million,
                output_per_million,
            } => {
                let prompt = metadata_u64(metadata, keys::PROMPT_TOKENS).unwrap_or(0) as f64;
                let completion =
                    metadata_u64(metadata, keys::COMPLETION_TOKENS).unwrap_or(0) as f64;
                prompt / 1_000_000.0 * input_per_million
                    + completion / 1_000_000.0 * output_per_million
            }
            PricingRule::PerImage { usd } => usd,
        }
    }
}

/// Pricing rules keyed by backend id
#[derive(Debug, Clone)]
pub struct PricingTable {
    rules: HashMap<String, PricingRule>,
}

impl PricingTable {
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    pub fn insert(&mut self, backend_id: impl Into<String>, rule: PricingRule) {
        self.rules.insert(backend_id.into(), rule);
    }

    pub fn rule(&self, backend_id: &str) -> Option<&PricingRule> {
        self.rules.get(backend_id)
    }

    /// Estimate the cost of one call.
    ///
    /// A `cost_usd` value reported by the backend wins over the table.
    /// Backends without a rule yield `None`.
    pub fn estimate(&self, backend_id: &str, metadata: &Metadata) -> Option<f64> {
        if let Some(reported) = metadata_f64(metadata, keys::COST_USD) {
            return Some(reported);
        }
        self.rules.get(backend_id).map(|rule| rule.cost(metadata))
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        let mut table = Self::empty();
        table.insert(
            "openai_cloud",
            PricingRule::PerToken {
                input_per_million: 0.15,
                output_per_million: 0.60,
            },
        );
        table.insert(
            "gemini_cloud",
            PricingRule::PerToken {
                input_per_million: 0.10,
                output_per_million: 0.40,
            },
        );
        table.insert("azure_vision_cloud", PricingRule::PerImage { usd: 1.5 / 1000.0 });
        table
    }
}
