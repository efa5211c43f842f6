use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Key of the entry used for models the table does not know.
pub const DEFAULT_MODEL: &str = "default";

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelPrice {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPrice {
    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }
}

/// Static model price table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTable {
    prices: BTreeMap<String, ModelPrice>,
}

impl Default for PriceTable {
    fn default() -> Self {
        let prices = [
            ("claude-opus-4", ModelPrice::new(15.0, 75.0)),
            ("claude-sonnet-4", ModelPrice::new(3.0, 15.0)),
            ("claude-3-7-sonnet", ModelPrice::new(3.0, 15.0)),
            ("claude-3-5-sonnet", ModelPrice::new(3.0, 15.0)),
            ("claude-3-5-haiku", ModelPrice::new(0.8, 4.0)),
            ("claude-3-opus", ModelPrice::new(15.0, 75.0)),
            ("claude-3-haiku", ModelPrice::new(0.25, 1.25)),
            ("gpt-4o", ModelPrice::new(2.5, 10.0)),
            ("gpt-4o-mini", ModelPrice::new(0.15, 0.6)),
            (DEFAULT_MODEL, ModelPrice::new(3.0, 15.0)),
        ];
        Self {
            prices: prices
                .into_iter()
                .map(|(name, price)| (name.to_string(), price))
                .collect(),
        }
    }
}

impl PriceTable {
    /// Add or replace entries.
    pub fn with_overrides(mut self, overrides: impl IntoIterator<Item = (String, ModelPrice)>) -> Self {
        self.prices.extend(overrides);
        self
    }

    /// Price for a model: exact name, then the longest known name contained
    /// in it (dated releases such as `claude-sonnet-4-20250514`), then the
    /// default entry.
    pub fn price(&self, model: &str) -> ModelPrice {
        if let Some(price) = self.prices.get(model) {
            return *price;
        }
        self.prices
            .iter()
            .filter(|(name, _)| name.as_str() != DEFAULT_MODEL && model.contains(name.as_str()))
            .max_by_key(|(name, _)| name.len())
            .map(|(_, price)| *price)
            .or_else(|| self.prices.get(DEFAULT_MODEL).copied())
            .unwrap_or(ModelPrice::new(0.0, 0.0))
    }

    /// Cost in USD of a token count for a model.
    pub fn cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        let price = self.price(model);
        input_tokens as f64 / 1_000_000.0 * price.input_per_million
            + output_tokens as f64 / 1_000_000.0 * price.output_per_million
    }
}
