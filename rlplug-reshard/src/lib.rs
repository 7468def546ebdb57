pub mod cluster;
pub mod descriptor;
pub mod error;
pub mod logging;
pub mod model;
pub mod placement;
pub mod resolver;
pub mod role;
pub mod rollout;
pub mod runtime;

use std::{fmt, str::FromStr};

use envconfig::Envconfig;
use rlplug_config::{AdaptError, AdaptOptions, registry};
use tracing::info;

pub use cluster::{ClusterConfig, ModelLoader, ModelSource, RlCluster};
pub use error::PlacementError;
pub use role::Role;
pub use rollout::RolloutConfig;

/// Kwarg kept aside on cluster configs: per-role logical axis rules.
pub const ROLE_AXIS_RULES_KEY: &str = "role_to_logical_axis_rule";

#[derive(Envconfig, Clone, Debug)]
pub struct PluginConfig {
    #[envconfig(from = "RLPLUG_ROLLOUT_ENGINE", default = "vanilla")]
    pub rollout_engine: String,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            rollout_engine: RolloutEngine::Vanilla.to_string(),
        }
    }
}

impl PluginConfig {
    pub fn engine(&self) -> RolloutEngine {
        self.rollout_engine
            .parse()
            .unwrap_or(RolloutEngine::Vanilla)
    }
}

/// Rollout backend the cluster is told to use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloutEngine {
    Vanilla,
    Vllm,
    SglangJax,
    Other(String),
}

impl RolloutEngine {
    pub fn as_str(&self) -> &str {
        match self {
            RolloutEngine::Vanilla => "vanilla",
            RolloutEngine::Vllm => "vllm",
            RolloutEngine::SglangJax => "sglang_jax",
            RolloutEngine::Other(name) => name,
        }
    }

    /// Only the in-process engine needs the trimmed architecture view.
    pub fn overwrites_arch_descriptor(&self) -> bool {
        matches!(self, RolloutEngine::Vanilla)
    }
}

impl fmt::Display for RolloutEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RolloutEngine {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "" | "vanilla" => RolloutEngine::Vanilla,
            "vllm" => RolloutEngine::Vllm,
            "sglang_jax" => RolloutEngine::SglangJax,
            other => RolloutEngine::Other(other.to_string()),
        })
    }
}

/// Adapts the orchestration configuration types in the process-wide
/// registry. Safe to call from every entry point; only the first call has
/// an effect.
pub fn install(conf: &PluginConfig) -> Result<(), AdaptError> {
    let engine = conf.engine();
    let registry = registry();
    registry.adapt::<RolloutConfig>(AdaptOptions::new())?;
    registry.adapt::<ClusterConfig>(
        AdaptOptions::new()
            .keep(ROLE_AXIS_RULES_KEY)
            .set("rollout_engine", engine.as_str()),
    )?;
    info!("rollout configs adapted, rollout engine `{}`", engine);
    Ok(())
}
