use std::sync::Arc;

use rlplug_config::{ConfigError, ConfigSchema, Kwargs, registry};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sampling settings for rollout generation.
///
/// Mutable schema: kwargs kept aside by an adapter are attached to `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RolloutConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens_to_generate: usize,
    #[serde(default = "default_max_tokens")]
    pub max_prompt_length: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_kv_cache_size")]
    pub kv_cache_size: usize,
    #[serde(skip)]
    pub extra: Kwargs,
}

fn default_max_tokens() -> usize {
    64
}

fn default_temperature() -> f32 {
    0.9
}

fn default_kv_cache_size() -> usize {
    1024
}

impl ConfigSchema for RolloutConfig {
    fn extra_fields_mut(&mut self) -> Option<&mut Kwargs> {
        Some(&mut self.extra)
    }
}

impl RolloutConfig {
    pub fn from_kwargs(kwargs: Kwargs) -> Result<Arc<Self>, ConfigError> {
        registry().construct::<Self>(kwargs)
    }

    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}
