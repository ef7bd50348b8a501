//! Model registry: the immutable catalog of routable LLM backends.
//!
//! The registry is loaded once at startup from the pricing catalog and never
//! mutated afterwards. Each entry (an "arm" in bandit terms) carries per-token
//! pricing and a prior quality estimate used for constraint filtering and
//! fallback ranking.

pub mod pricing;

pub use pricing::PricingCatalog;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A candidate LLM backend, identified by `provider:model_name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArm {
    /// Unique identity, `provider:model_name`.
    pub model_id: String,
    /// Bare model name.
    pub model_name: String,
    /// Provider tag (e.g. "openai", "anthropic").
    pub provider: String,
    /// Cost per input token in dollars.
    pub cost_per_input_token: f64,
    /// Cost per output token in dollars.
    pub cost_per_output_token: f64,
    /// Prior quality estimate (0.0 - 1.0).
    pub expected_quality: f64,
}

impl ModelArm {
    /// Create a new arm; the id is derived as `provider:model_name`.
    pub fn new(
        provider: impl Into<String>,
        model_name: impl Into<String>,
        cost_per_input_token: f64,
        cost_per_output_token: f64,
        expected_quality: f64,
    ) -> Self {
        let provider = provider.into();
        let model_name = model_name.into();
        Self {
            model_id: format!("{provider}:{model_name}"),
            model_name,
            provider,
            cost_per_input_token,
            cost_per_output_token,
            expected_quality,
        }
    }

    /// Average of input and output per-token cost.
    pub fn average_cost(&self) -> f64 {
        (self.cost_per_input_token + self.cost_per_output_token) / 2.0
    }

    /// Estimated dollar cost for a request of `input_tokens` prompt tokens
    /// and `output_tokens` expected completion tokens.
    pub fn estimate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        input_tokens as f64 * self.cost_per_input_token
            + output_tokens as f64 * self.cost_per_output_token
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.cost_per_input_token <= 0.0 || self.cost_per_output_token <= 0.0 {
            return Err(ConfigError::InvalidRegistryEntry {
                model_id: self.model_id.clone(),
                reason: "costs must be strictly positive".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.expected_quality) {
            return Err(ConfigError::InvalidRegistryEntry {
                model_id: self.model_id.clone(),
                reason: format!("quality must be in [0, 1], got {}", self.expected_quality),
            });
        }
        Ok(())
    }
}

/// Filter criteria for [`ModelRegistry::filter`].
#[derive(Debug, Default, Clone)]
pub struct ArmFilter {
    /// Minimum expected quality.
    pub min_quality: Option<f64>,
    /// Maximum average per-token cost.
    pub max_cost: Option<f64>,
    /// Restrict to these providers.
    pub providers: Option<Vec<String>>,
}

impl ArmFilter {
    /// Create an empty filter (matches everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum quality.
    pub fn with_min_quality(mut self, min_quality: f64) -> Self {
        self.min_quality = Some(min_quality);
        self
    }

    /// Set the maximum average per-token cost.
    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.max_cost = Some(max_cost);
        self
    }

    /// Restrict to the given providers.
    pub fn with_providers(mut self, providers: Vec<String>) -> Self {
        self.providers = Some(providers);
        self
    }
}

/// Summary statistics over a registry.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    /// Total number of arms.
    pub total_models: usize,
    /// Arm count per provider.
    pub models_by_provider: HashMap<String, usize>,
    /// (min, max) average per-token cost.
    pub cost_range: (f64, f64),
    /// (min, max) expected quality.
    pub quality_range: (f64, f64),
}

/// Immutable catalog of routable arms.
pub struct ModelRegistry {
    arms: Vec<ModelArm>,
    by_id: HashMap<String, usize>,
}

impl ModelRegistry {
    /// Build a registry from a list of arms.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` on duplicate ids, non-positive costs or
    /// out-of-range quality. Registry misconfiguration is fatal.
    pub fn new(arms: Vec<ModelArm>) -> Result<Self, ConfigError> {
        let mut by_id = HashMap::with_capacity(arms.len());
        for (idx, arm) in arms.iter().enumerate() {
            arm.validate()?;
            if by_id.insert(arm.model_id.clone(), idx).is_some() {
                return Err(ConfigError::DuplicateModelId(arm.model_id.clone()));
            }
        }
        Ok(Self { arms, by_id })
    }

    /// Build a registry from the built-in pricing catalog.
    pub fn from_default_catalog() -> Result<Self, ConfigError> {
        Self::new(PricingCatalog::builtin().into_arms())
    }

    /// Build a registry from a JSON pricing catalog
    /// (`provider -> model_name -> {input, output, quality}`).
    pub fn from_catalog_json(json: &str) -> Result<Self, ConfigError> {
        Self::new(PricingCatalog::from_json(json)?.into_arms())
    }

    /// All arms.
    pub fn all(&self) -> &[ModelArm] {
        &self.arms
    }

    /// Number of arms.
    pub fn len(&self) -> usize {
        self.arms.len()
    }

    /// True when the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.arms.is_empty()
    }

    /// Look up an arm by its `provider:model_name` id. Case-sensitive.
    pub fn by_id(&self, model_id: &str) -> Option<&ModelArm> {
        self.by_id.get(model_id).map(|&idx| &self.arms[idx])
    }

    /// True when the id refers to a registered arm.
    pub fn contains(&self, model_id: &str) -> bool {
        self.by_id.contains_key(model_id)
    }

    /// All arms for a provider.
    pub fn by_provider(&self, provider: &str) -> Vec<&ModelArm> {
        self.arms
            .iter()
            .filter(|arm| arm.provider == provider)
            .collect()
    }

    /// Arms matching the filter. Average cost uses `(input + output) / 2`.
    pub fn filter(&self, filter: &ArmFilter) -> Vec<&ModelArm> {
        self.arms
            .iter()
            .filter(|arm| {
                if let Some(min_quality) = filter.min_quality {
                    if arm.expected_quality < min_quality {
                        return false;
                    }
                }
                if let Some(max_cost) = filter.max_cost {
                    if arm.average_cost() > max_cost {
                        return false;
                    }
                }
                if let Some(ref providers) = filter.providers {
                    if !providers.iter().any(|p| p == &arm.provider) {
                        return false;
                    }
                }
                true
            })
            .collect()
    }

    /// Summary statistics.
    pub fn stats(&self) -> RegistryStats {
        let mut models_by_provider: HashMap<String, usize> = HashMap::new();
        let mut cost_min = f64::INFINITY;
        let mut cost_max = f64::NEG_INFINITY;
        let mut quality_min = f64::INFINITY;
        let mut quality_max = f64::NEG_INFINITY;

        for arm in &self.arms {
            *models_by_provider.entry(arm.provider.clone()).or_insert(0) += 1;
            let cost = arm.average_cost();
            cost_min = cost_min.min(cost);
            cost_max = cost_max.max(cost);
            quality_min = quality_min.min(arm.expected_quality);
            quality_max = quality_max.max(arm.expected_quality);
        }

        if self.arms.is_empty() {
            cost_min = 0.0;
            cost_max = 0.0;
            quality_min = 0.0;
            quality_max = 0.0;
        }

        RegistryStats {
            total_models: self.arms.len(),
            models_by_provider,
            cost_range: (cost_min, cost_max),
            quality_range: (quality_min, quality_max),
        }
    }
}
