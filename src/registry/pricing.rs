//! Pricing catalog: the data behind the model registry.
//!
//! The catalog maps `provider -> model_name -> {input, output, quality}` and
//! can be loaded from JSON or taken from the built-in table. Pricing is data,
//! not logic: nothing here depends on the routing machinery.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

use super::ModelArm;

/// Per-model pricing and prior quality.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Cost per input token in dollars.
    pub input: f64,
    /// Cost per output token in dollars.
    pub output: f64,
    /// Prior quality estimate (0.0 - 1.0).
    pub quality: f64,
}

/// Catalog of provider pricing tables.
///
/// A `BTreeMap` keeps iteration (and thus registry ordering) stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PricingCatalog {
    providers: BTreeMap<String, BTreeMap<String, ModelPricing>>,
}

impl PricingCatalog {
    /// Parse a catalog from JSON
    /// (`{"openai": {"gpt-4o": {"input": ..., "output": ..., "quality": ...}}}`).
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// The built-in catalog: 18 models across six providers.
    ///
    /// Prices are dollars per token; quality estimates come from public
    /// benchmark aggregates and are priors only — the bandit learns the rest.
    pub fn builtin() -> Self {
        let mut providers: BTreeMap<String, BTreeMap<String, ModelPricing>> = BTreeMap::new();

        let mut openai = BTreeMap::new();
        openai.insert("gpt-4o".to_string(), pricing(2.5e-6, 1.0e-5, 0.95));
        openai.insert("gpt-4o-mini".to_string(), pricing(1.5e-7, 6.0e-7, 0.85));
        openai.insert("gpt-4-turbo".to_string(), pricing(1.0e-5, 3.0e-5, 0.93));
        openai.insert("gpt-3.5-turbo".to_string(), pricing(5.0e-7, 1.5e-6, 0.78));
        providers.insert("openai".to_string(), openai);

        let mut anthropic = BTreeMap::new();
        anthropic.insert(
            "claude-3-5-sonnet-20241022".to_string(),
            pricing(3.0e-6, 1.5e-5, 0.96),
        );
        anthropic.insert(
            "claude-3-opus-20240229".to_string(),
            pricing(1.5e-5, 7.5e-5, 0.95),
        );
        anthropic.insert(
            "claude-3-haiku-20240307".to_string(),
            pricing(2.5e-7, 1.25e-6, 0.82),
        );
        providers.insert("anthropic".to_string(), anthropic);

        let mut google = BTreeMap::new();
        google.insert("gemini-1.5-pro".to_string(), pricing(1.25e-6, 5.0e-6, 0.92));
        google.insert("gemini-1.5-flash".to_string(), pricing(7.5e-8, 3.0e-7, 0.80));
        google.insert("gemini-1.0-pro".to_string(), pricing(5.0e-7, 1.5e-6, 0.76));
        providers.insert("google".to_string(), google);

        let mut groq = BTreeMap::new();
        groq.insert(
            "llama-3.1-70b-versatile".to_string(),
            pricing(5.9e-7, 7.9e-7, 0.84),
        );
        groq.insert(
            "llama-3.1-8b-instant".to_string(),
            pricing(5.0e-8, 8.0e-8, 0.70),
        );
        groq.insert(
            "mixtral-8x7b-32768".to_string(),
            pricing(2.4e-7, 2.4e-7, 0.74),
        );
        providers.insert("groq".to_string(), groq);

        let mut mistral = BTreeMap::new();
        mistral.insert("mistral-large".to_string(), pricing(2.0e-6, 6.0e-6, 0.89));
        mistral.insert("mistral-small".to_string(), pricing(2.0e-7, 6.0e-7, 0.77));
        mistral.insert("open-mixtral-8x22b".to_string(), pricing(2.0e-6, 6.0e-6, 0.83));
        providers.insert("mistral".to_string(), mistral);

        let mut cohere = BTreeMap::new();
        cohere.insert("command-r-plus".to_string(), pricing(2.5e-6, 1.0e-5, 0.86));
        cohere.insert("command-r".to_string(), pricing(1.5e-7, 6.0e-7, 0.79));
        providers.insert("cohere".to_string(), cohere);

        Self { providers }
    }

    /// Number of providers in the catalog.
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Flatten the catalog into registry arms, ordered by provider then model.
    pub fn into_arms(self) -> Vec<ModelArm> {
        let mut arms = Vec::new();
        for (provider, models) in self.providers {
            for (model_name, p) in models {
                arms.push(ModelArm::new(
                    provider.clone(),
                    model_name,
                    p.input,
                    p.output,
                    p.quality,
                ));
            }
        }
        arms
    }
}

fn pricing(input: f64, output: f64, quality: f64) -> ModelPricing {
    ModelPricing {
        input,
        output,
        quality,
    }
}
