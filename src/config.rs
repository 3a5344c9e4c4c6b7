//! Configuration for the governance engine, loaded from TOML.
//!
//! All sections have in-code defaults so an empty file (or no file) yields
//! a working configuration matching the documented example policy.

use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GovernanceConfig {
    #[serde(default)]
    pub budget: BudgetPolicy,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
}

/// Multi-dimensional per-session caps enforced by the governor.
#[derive(Debug, Deserialize, Clone)]
pub struct BudgetPolicy {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,
    #[serde(default = "default_max_cost_usd")]
    pub max_cost_usd: f64,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Percent of any cap at which the advisory "wrapping up" message shows.
    #[serde(default = "default_warn_threshold_percent")]
    pub warn_threshold_percent: u8,
}

impl Default for BudgetPolicy {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            max_cost_usd: default_max_cost_usd(),
            max_turns: default_max_turns(),
            warn_threshold_percent: default_warn_threshold_percent(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Minutes of inactivity after which a session expires and resets.
    #[serde(default = "default_session_ttl_minutes")]
    pub ttl_minutes: u32,
    /// Most recent turns sent to the inference collaborator as history.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: default_session_ttl_minutes(),
            history_window: default_history_window(),
        }
    }
}

/// Fixed per-token price blend used to estimate the cost of a turn before
/// it runs. Actual cost is whatever the provider reports afterwards.
#[derive(Debug, Deserialize, Clone)]
pub struct PricingConfig {
    #[serde(default = "default_input_cost_per_1k")]
    pub input_cost_per_1k_tokens: f64,
    #[serde(default = "default_output_cost_per_1k")]
    pub output_cost_per_1k_tokens: f64,
    /// Share of an estimated turn assumed to be output tokens.
    #[serde(default = "default_output_share")]
    pub estimated_output_share: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            input_cost_per_1k_tokens: default_input_cost_per_1k(),
            output_cost_per_1k_tokens: default_output_cost_per_1k(),
            estimated_output_share: default_output_share(),
        }
    }
}

impl PricingConfig {
    /// Blended cost estimate for `tokens` not yet spent.
    pub fn estimated_cost(&self, tokens: u64) -> f64 {
        let tokens = tokens as f64;
        let output = tokens * self.estimated_output_share;
        let input = tokens - output;
        input / 1000.0 * self.input_cost_per_1k_tokens
            + output / 1000.0 * self.output_cost_per_1k_tokens
    }
}

fn default_max_tokens() -> u64 {
    50_000
}

fn default_max_cost_usd() -> f64 {
    0.50
}

fn default_max_turns() -> u32 {
    10
}

fn default_warn_threshold_percent() -> u8 {
    80
}

fn default_session_ttl_minutes() -> u32 {
    30
}

fn default_history_window() -> usize {
    10
}

fn default_input_cost_per_1k() -> f64 {
    0.003
}

fn default_output_cost_per_1k() -> f64 {
    0.015
}

fn default_output_share() -> f64 {
    0.25
}

impl GovernanceConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: GovernanceConfig = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_example_defaults() {
        let config: GovernanceConfig = toml::from_str("").unwrap();
        assert_eq!(config.budget.max_tokens, 50_000);
        assert_eq!(config.budget.max_cost_usd, 0.50);
        assert_eq!(config.budget.max_turns, 10);
        assert_eq!(config.budget.warn_threshold_percent, 80);
        assert_eq!(config.session.ttl_minutes, 30);
        assert_eq!(config.session.history_window, 10);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let config: GovernanceConfig = toml::from_str(
            r#"
            [budget]
            max_turns = 4

            [session]
            ttl_minutes = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.budget.max_turns, 4);
        assert_eq!(config.budget.max_tokens, 50_000);
        assert_eq!(config.session.ttl_minutes, 5);
        assert_eq!(config.session.history_window, 10);
    }

    #[test]
    fn estimated_cost_blends_input_and_output_prices() {
        let pricing = PricingConfig::default();
        // 1000 tokens: 750 input + 250 output at the default blend.
        let cost = pricing.estimated_cost(1000);
        let expected = 0.75 * 0.003 + 0.25 * 0.015;
        assert!((cost - expected).abs() < 1e-9);
        assert!(pricing.estimated_cost(0) < 1e-12);
    }
}
